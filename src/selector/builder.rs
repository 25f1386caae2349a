use super::condition::Condition;
use super::join::{Join, JoinKind};

/// SQL SELECT builder with aliased tables, correlated sub-selects
/// and derived-table joins.
///
/// The base table is always aliased (`t0` at the root); generated
/// aliases grow monotonically down subquery chains so a correlated
/// subquery never shadows an ancestor alias it references.
#[derive(Debug, Clone)]
pub struct Selector {
    from_table: String,
    from_alias: String,
    fields: Vec<String>,
    joins: Vec<Join>,
    wheres: Vec<Condition>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    alias_seq: u32,
}

impl Selector {
    /// Open a selector on `table`, aliased `t0`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            from_table: table.into(),
            from_alias: "t0".to_string(),
            fields: Vec::new(),
            joins: Vec::new(),
            wheres: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            alias_seq: 1,
        }
    }

    pub fn from_alias(&self) -> &str {
        &self.from_alias
    }

    /// Qualify a column with the base table alias.
    pub fn c(&self, column: &str) -> String {
        format!("{}.{}", self.from_alias, column)
    }

    /// Qualify a column with an explicit alias.
    pub fn qualify(alias: &str, column: &str) -> String {
        format!("{alias}.{column}")
    }

    /// Allocate a join/derived-table alias unique within this scope chain.
    pub fn fresh_alias(&mut self) -> String {
        let alias = format!("t{}", self.alias_seq);
        self.alias_seq += 1;
        alias
    }

    /// Open a subquery selector whose base alias and subsequent
    /// aliases cannot collide with any alias of this scope chain.
    pub fn sub_select(&mut self, table: impl Into<String>) -> Selector {
        let alias = self.fresh_alias();
        let mut sub = Selector::new(table);
        sub.from_alias = alias;
        sub.alias_seq = self.alias_seq;
        sub
    }

    pub fn select_fields(&mut self, fields: Vec<String>) -> &mut Self {
        self.fields = fields;
        self
    }

    pub fn append_expr(&mut self, expr: impl Into<String>) -> &mut Self {
        self.fields.push(expr.into());
        self
    }

    /// Append a correlated sub-select to the projection:
    /// `(SELECT …) AS alias`.
    pub fn append_subquery_expr(&mut self, sub: &Selector, alias: &str) -> &mut Self {
        self.fields.push(format!("({}) AS {}", sub.build_sql(), alias));
        self
    }

    pub fn and_where(&mut self, condition: Condition) -> &mut Self {
        self.wheres.push(condition);
        self
    }

    pub fn join(&mut self, table: &str, alias: &str, on: impl Into<String>) -> &mut Self {
        self.joins.push(Join::inner(table, alias, on));
        self
    }

    pub fn left_join(&mut self, table: &str, alias: &str, on: impl Into<String>) -> &mut Self {
        self.joins.push(Join::left(table, alias, on));
        self
    }

    /// LEFT JOIN a derived table built from another selector.
    pub fn left_join_derived(&mut self, sub: &Selector, alias: &str, on: impl Into<String>) -> &mut Self {
        self.joins.push(Join {
            kind: JoinKind::Left,
            table: format!("({})", sub.build_sql()),
            alias: alias.to_string(),
            on: on.into(),
        });
        self
    }

    pub fn group_by(&mut self, column: impl Into<String>) -> &mut Self {
        self.group_by.push(column.into());
        self
    }

    pub fn order_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn set_limit(&mut self, limit: i64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn set_offset(&mut self, offset: i64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Apply a predicate against a scratch scope and return the
    /// conditions it produced instead of installing them. Alias
    /// allocations and joins made by the predicate are kept, so the
    /// captured conditions stay valid in this scope.
    pub fn capture_conditions(&mut self, pred: &super::Predicate) -> Vec<Condition> {
        let mut scratch = Selector {
            from_table: self.from_table.clone(),
            from_alias: self.from_alias.clone(),
            fields: Vec::new(),
            joins: Vec::new(),
            wheres: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            alias_seq: self.alias_seq,
        };
        pred(&mut scratch);
        self.alias_seq = scratch.alias_seq;
        self.joins.extend(scratch.joins);
        scratch.wheres
    }

    /// Build the complete SQL query string.
    pub fn build_sql(&self) -> String {
        let mut sql = String::from("SELECT ");

        if self.fields.is_empty() {
            sql.push_str(&format!("{}.*", self.from_alias));
        } else {
            sql.push_str(&self.fields.join(", "));
        }

        sql.push_str(&format!(" FROM {} AS {}", self.from_table, self.from_alias));

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }

        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            let parts: Vec<String> = self.wheres.iter().map(|c| c.to_sql()).collect();
            sql.push_str(&parts.join(" AND "));
        }

        if !self.group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", self.group_by.join(", ")));
        }

        if !self.order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.order_by.join(", ")));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// One JOIN clause. `table` may be a plain table name or a
/// parenthesized derived table.
#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub on: String,
}

impl Join {
    pub fn inner(table: impl Into<String>, alias: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.into(),
            alias: alias.into(),
            on: on.into(),
        }
    }

    pub fn left(table: impl Into<String>, alias: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Left,
            table: table.into(),
            alias: alias.into(),
            on: on.into(),
        }
    }

    pub fn to_sql(&self) -> String {
        format!("{} {} AS {} ON {}", self.kind.to_sql(), self.table, self.alias, self.on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_join() {
        let join = Join::inner("articles", "t1", "t1.author_id = t0.id");
        assert_eq!(join.to_sql(), "JOIN articles AS t1 ON t1.author_id = t0.id");
    }

    #[test]
    fn left_join_derived_table() {
        let join = Join::left("(SELECT 1)", "d1", "d1.id = t0.id");
        assert_eq!(join.to_sql(), "LEFT JOIN (SELECT 1) AS d1 ON d1.id = t0.id");
    }
}

/// One WHERE condition. Conditions attached to a selector are ANDed;
/// boolean structure comes from the `And`/`Or`/`Not` variants.
#[derive(Debug, Clone)]
pub enum Condition {
    Simple {
        column: String,
        operator: String,
        value: serde_json::Value,
    },
    Like {
        column: String,
        pattern: String,
    },
    NotLike {
        column: String,
        pattern: String,
    },
    In {
        column: String,
        values: Vec<serde_json::Value>,
    },
    NotIn {
        column: String,
        values: Vec<serde_json::Value>,
    },
    /// Column-to-column equality, used to correlate subqueries with
    /// the enclosing row set.
    ColumnsEq {
        left: String,
        right: String,
    },
    Exists {
        subquery: String,
    },
    NotExists {
        subquery: String,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Raw(String),
}

impl Condition {
    pub fn simple(column: impl Into<String>, operator: &str, value: serde_json::Value) -> Self {
        Condition::Simple {
            column: column.into(),
            operator: operator.to_string(),
            value,
        }
    }

    pub fn columns_eq(left: impl Into<String>, right: impl Into<String>) -> Self {
        Condition::ColumnsEq {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Convert condition to SQL string.
    pub fn to_sql(&self) -> String {
        match self {
            Condition::Simple {
                column,
                operator,
                value,
            } => {
                format!("{} {} {}", column, operator, format_value(value))
            }
            Condition::Like { column, pattern } => {
                format!("{} LIKE {}", column, format_str(pattern))
            }
            Condition::NotLike { column, pattern } => {
                format!("{} NOT LIKE {}", column, format_str(pattern))
            }
            Condition::In { column, values } => {
                if values.is_empty() {
                    return "1 = 0".to_string();
                }
                let list = values.iter().map(format_value).collect::<Vec<_>>().join(", ");
                format!("{column} IN ({list})")
            }
            Condition::NotIn { column, values } => {
                if values.is_empty() {
                    return "1 = 1".to_string();
                }
                let list = values.iter().map(format_value).collect::<Vec<_>>().join(", ");
                format!("{column} NOT IN ({list})")
            }
            Condition::ColumnsEq { left, right } => format!("{left} = {right}"),
            Condition::Exists { subquery } => format!("EXISTS ({subquery})"),
            Condition::NotExists { subquery } => format!("NOT EXISTS ({subquery})"),
            Condition::And(conditions) => group(conditions, " AND "),
            Condition::Or(conditions) => group(conditions, " OR "),
            Condition::Not(inner) => format!("NOT ({})", inner.to_sql()),
            Condition::Raw(sql) => sql.clone(),
        }
    }
}

fn group(conditions: &[Condition], sep: &str) -> String {
    match conditions.len() {
        0 => "1 = 1".to_string(),
        1 => conditions[0].to_sql(),
        _ => {
            let parts: Vec<String> = conditions.iter().map(|c| c.to_sql()).collect();
            format!("({})", parts.join(sep))
        }
    }
}

/// Format a JSON value as a SQL literal.
pub fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format_str(s),
        other => format_str(&other.to_string()),
    }
}

fn format_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

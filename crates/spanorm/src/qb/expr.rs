//! Raw-SQL expressions and the small operand types the builder stores.

use crate::qb::QueryBuilder;
use crate::value::Value;

/// A string of raw SQL, rendered verbatim and never wrapped or parameterized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression(String);

impl Expression {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A column position: a wrappable name or a raw expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    Name(String),
    Raw(Expression),
}

impl From<&str> for Column {
    fn from(name: &str) -> Self {
        Column::Name(name.to_string())
    }
}

impl From<String> for Column {
    fn from(name: String) -> Self {
        Column::Name(name)
    }
}

impl From<&String> for Column {
    fn from(name: &String) -> Self {
        Column::Name(name.clone())
    }
}

impl From<Expression> for Column {
    fn from(expr: Expression) -> Self {
        Column::Raw(expr)
    }
}

/// A query source: a table name (possibly `table as alias`) or raw SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRef {
    Name(String),
    Raw(Expression),
}

impl TableRef {
    /// The unwrapped source text, used for `table.*` and `table.pk` spellings.
    pub(crate) fn raw_name(&self) -> &str {
        match self {
            TableRef::Name(name) => name,
            TableRef::Raw(expr) => expr.value(),
        }
    }
}

/// The right-hand side of a basic condition: a bindable value or raw SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Raw(Expression),
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<Expression> for Operand {
    fn from(expr: Expression) -> Self {
        Operand::Raw(expr)
    }
}

macro_rules! operand_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

operand_from_value!(
    bool,
    i32,
    i64,
    u32,
    f64,
    String,
    &str,
    Vec<u8>,
    chrono::NaiveDate,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
    uuid::Uuid,
);

/// A subquery argument: a built query or a raw SQL string.
#[derive(Debug, Clone)]
pub enum Subquery {
    Builder(QueryBuilder),
    Raw(String),
}

impl From<QueryBuilder> for Subquery {
    fn from(query: QueryBuilder) -> Self {
        Subquery::Builder(query)
    }
}

impl From<&str> for Subquery {
    fn from(sql: &str) -> Self {
        Subquery::Raw(sql.to_string())
    }
}

impl From<String> for Subquery {
    fn from(sql: String) -> Self {
        Subquery::Raw(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_renders_verbatim() {
        let expr = Expression::new("count(*) as total");
        assert_eq!(expr.value(), "count(*) as total");
        assert_eq!(expr.to_string(), "count(*) as total");
    }

    #[test]
    fn test_operand_conversions() {
        assert_eq!(Operand::from(25), Operand::Value(Value::Int(25)));
        assert_eq!(
            Operand::from(Expression::new("age + 1")),
            Operand::Raw(Expression::new("age + 1"))
        );
    }
}

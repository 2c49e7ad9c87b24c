//! Compilation of a builder into dialect SQL.
//!
//! Compilation is pure string assembly over the builder's state; placeholder
//! names were fixed at build time, so compiling never touches the bindings.

use crate::qb::builder::{
    Aggregate, BasicRhs, Condition, Distinct, InSource, Predicate, QueryBuilder,
};
use crate::qb::expr::{Column, TableRef};
use crate::qb::join::JoinClause;

/// The SQL grammar, parameterized only by an optional table prefix.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    table_prefix: String,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grammar prefixing every table name (and table alias) it wraps.
    pub fn with_prefix(table_prefix: impl Into<String>) -> Self {
        Self {
            table_prefix: table_prefix.into(),
        }
    }

    // ==================== Statements ====================

    /// Compile a full SELECT. Clause order is fixed: columns, from, joins,
    /// where, group by, having, order by, limit, offset; absent clauses leave
    /// no trace, single spaces in between.
    pub fn compile(&self, query: &QueryBuilder) -> String {
        let mut segments = Vec::new();
        segments.push(self.compile_columns(query));
        if let Some(from) = &query.from {
            segments.push(format!("from {}", self.wrap_table(from)));
        }
        if !query.joins.is_empty() {
            segments.push(self.compile_joins(&query.joins));
        }
        if let Some(wheres) = self.compile_wheres(query) {
            segments.push(wheres);
        }
        if !query.groups.is_empty() {
            let groups: Vec<String> = query.groups.iter().map(|g| self.wrap_name(g, false)).collect();
            segments.push(format!("group by {}", groups.join(", ")));
        }
        if !query.havings.is_empty() {
            segments.push(format!(
                "having {}",
                self.compile_condition_list(&query.havings)
            ));
        }
        if !query.orders.is_empty() {
            let orders: Vec<String> = query
                .orders
                .iter()
                .map(|order| format!("{} {}", self.wrap(&order.column), order.direction.as_str()))
                .collect();
            segments.push(format!("order by {}", orders.join(", ")));
        }
        if let Some(limit) = query.limit {
            segments.push(format!("limit {limit}"));
        }
        if let Some(offset) = query.offset {
            segments.push(format!("offset {offset}"));
        }
        concatenate(segments)
    }

    /// Compile an UPDATE from the builder's source, joins, and conditions,
    /// plus pre-rendered `column = @value<N>` assignments.
    pub fn compile_update(&self, query: &QueryBuilder, assignments: &[(String, String)]) -> String {
        let table = match &query.from {
            Some(from) => self.wrap_table(from),
            None => String::new(),
        };
        let columns: Vec<String> = assignments
            .iter()
            .map(|(column, parameter)| format!("{} = {}", self.wrap_name(column, false), parameter))
            .collect();
        let columns = columns.join(", ");
        let wheres = self.compile_wheres(query).unwrap_or_default();
        let sql = if query.joins.is_empty() {
            format!("update {table} set {columns} {wheres}")
        } else {
            let joins = self.compile_joins(&query.joins);
            format!("update {table} {joins} set {columns} {wheres}")
        };
        sql.trim().to_string()
    }

    /// Compile a DELETE. With joins the deleted alias is named explicitly,
    /// taken from the trailing ` as ` token of the wrapped source table.
    pub fn compile_delete(&self, query: &QueryBuilder) -> String {
        let table = match &query.from {
            Some(from) => self.wrap_table(from),
            None => String::new(),
        };
        let wheres = self.compile_wheres(query).unwrap_or_default();
        let sql = if query.joins.is_empty() {
            format!("delete from {table} {wheres}")
        } else {
            let alias = table.rsplit(" as ").next().unwrap_or(&table).to_string();
            let joins = self.compile_joins(&query.joins);
            format!("delete {alias} from {table} {joins} {wheres}")
        };
        sql.trim().to_string()
    }

    // ==================== Clauses ====================

    fn compile_columns(&self, query: &QueryBuilder) -> String {
        if let Some(aggregate) = &query.aggregate {
            return self.compile_aggregate(query, aggregate);
        }
        let select = match query.distinct {
            Distinct::Off => "select ",
            _ => "select distinct ",
        };
        let columns = match &query.columns {
            Some(columns) => self.columnize(columns),
            None => "*".to_string(),
        };
        format!("{select}{columns}")
    }

    fn compile_aggregate(&self, query: &QueryBuilder, aggregate: &Aggregate) -> String {
        let mut column = self.columnize(&aggregate.columns);
        match &query.distinct {
            Distinct::Columns(columns) if !columns.is_empty() => {
                let columns: Vec<String> =
                    columns.iter().map(|c| self.wrap_name(c, false)).collect();
                column = format!("distinct {}", columns.join(", "));
            }
            Distinct::All if column != "*" => {
                column = format!("distinct {column}");
            }
            _ => {}
        }
        format!(
            "select {}({column}) as aggregate",
            aggregate.function.as_str()
        )
    }

    fn compile_wheres(&self, query: &QueryBuilder) -> Option<String> {
        if query.wheres.is_empty() {
            return None;
        }
        Some(format!(
            "where {}",
            self.compile_condition_list(&query.wheres)
        ))
    }

    /// Render a condition list: each entry prefixed by its connector, with
    /// the first entry's connector dropped.
    fn compile_condition_list(&self, conditions: &[Condition]) -> String {
        let mut sql = String::new();
        for (index, condition) in conditions.iter().enumerate() {
            if index > 0 {
                sql.push(' ');
                sql.push_str(condition.connector.as_str());
                sql.push(' ');
            }
            sql.push_str(&self.compile_predicate(&condition.predicate));
        }
        sql
    }

    fn compile_predicate(&self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Basic {
                column,
                operator,
                value,
            } => {
                // `?` doubles to `??` so the driver never mistakes it for a
                // positional placeholder
                let operator = operator.replace('?', "??");
                let value = match value {
                    BasicRhs::Parameter(parameter) => parameter.clone(),
                    BasicRhs::Raw(expr) => expr.value().to_string(),
                };
                format!("{} {operator} {value}", self.wrap(column))
            }
            Predicate::Column {
                first,
                operator,
                second,
            } => format!(
                "{} {operator} {}",
                self.wrap(first),
                self.wrap(second)
            ),
            Predicate::In {
                column,
                values,
                negated,
            } => match values {
                InSource::List { empty: true, .. } => {
                    if *negated { "1 = 1" } else { "0 = 1" }.to_string()
                }
                InSource::List { parameter, .. } => {
                    let not = if *negated { "not " } else { "" };
                    format!("{} {not}in UNNEST({parameter})", self.wrap(column))
                }
                InSource::Sub(expr) => {
                    let not = if *negated { "not " } else { "" };
                    format!("{} {not}in UNNEST({})", self.wrap(column), expr.value())
                }
            },
            Predicate::Null { column, negated } => {
                let not = if *negated { "not " } else { "" };
                format!("{} is {not}null", self.wrap(column))
            }
            Predicate::Between {
                column,
                parameters: (low, high),
                negated,
            } => {
                let between = if *negated { "not between" } else { "between" };
                format!("{} {between} {low} and {high}", self.wrap(column))
            }
            Predicate::Nested { query } => {
                format!("({})", self.compile_condition_list(&query.wheres))
            }
            Predicate::Exists { query, negated } => {
                let not = if *negated { "not " } else { "" };
                format!("{not}exists ({})", self.compile(query))
            }
        }
    }

    fn compile_joins(&self, joins: &[JoinClause]) -> String {
        let clauses: Vec<String> = joins
            .iter()
            .map(|join| {
                let table = self.wrap_table(&join.table);
                // joins nested inside a join parenthesize with their table
                let table = if join.query.joins.is_empty() {
                    table
                } else {
                    format!("({table} {})", self.compile_joins(&join.query.joins))
                };
                if join.query.wheres.is_empty() {
                    format!("{} join {table}", join.join_type.as_str())
                } else {
                    format!(
                        "{} join {table} on {}",
                        join.join_type.as_str(),
                        self.compile_condition_list(&join.query.wheres)
                    )
                }
            })
            .collect();
        clauses.join(" ")
    }

    // ==================== Identifier wrapping ====================

    /// Wrap a column position; raw expressions pass through verbatim.
    pub fn wrap(&self, column: &Column) -> String {
        match column {
            Column::Raw(expr) => expr.value().to_string(),
            Column::Name(name) => self.wrap_name(name, false),
        }
    }

    /// Wrap a query source, applying the table prefix.
    pub fn wrap_table(&self, table: &TableRef) -> String {
        match table {
            TableRef::Raw(expr) => expr.value().to_string(),
            TableRef::Name(name) => {
                self.wrap_name(&format!("{}{name}", self.table_prefix), true)
            }
        }
    }

    /// Wrap one name: ` as ` aliases split case-insensitively, dotted names
    /// treat the first segment as a table. `prefix_alias` also prefixes the
    /// alias side, used when wrapping table sources.
    fn wrap_name(&self, value: &str, prefix_alias: bool) -> String {
        if let Some(position) = value.to_ascii_lowercase().find(" as ") {
            let head = &value[..position];
            let alias = &value[position + 4..];
            let alias = if prefix_alias {
                format!("{}{alias}", self.table_prefix)
            } else {
                alias.to_string()
            };
            return format!("{} as {}", self.wrap_name(head, false), wrap_value(&alias));
        }
        self.wrap_segments(value)
    }

    fn wrap_segments(&self, value: &str) -> String {
        let segments: Vec<&str> = value.split('.').collect();
        let count = segments.len();
        segments
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                if index == 0 && count > 1 {
                    self.wrap_table(&TableRef::Name((*segment).to_string()))
                } else {
                    wrap_value(segment)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    fn columnize(&self, columns: &[Column]) -> String {
        columns
            .iter()
            .map(|column| self.wrap(column))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Escape one identifier segment by doubling embedded `"`; `*` passes through.
fn wrap_value(value: &str) -> String {
    if value == "*" {
        return value.to_string();
    }
    value.replace('"', "\"\"")
}

fn concatenate(segments: Vec<String>) -> String {
    segments
        .into_iter()
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qb::builder::AggregateFunction;
    use crate::qb::{raw, table};
    use crate::value::Value;

    fn table_with_prefix(prefix: &str, name: &str) -> QueryBuilder {
        QueryBuilder::with_grammar(Grammar::with_prefix(prefix)).from(name)
    }

    #[test]
    fn test_compiles_bare_select() {
        assert_eq!(table("test").to_sql(), "select * from test");
    }

    #[test]
    fn test_applies_table_prefix() {
        assert_eq!(table_with_prefix("test", "Z").to_sql(), "select * from testZ");
    }

    #[test]
    fn test_prefixes_table_alias_too() {
        assert_eq!(
            table_with_prefix("p_", "TestA as S").to_sql(),
            "select * from p_TestA as p_S"
        );
    }

    #[test]
    fn test_prefix_leaves_bare_columns_alone() {
        let qb = table_with_prefix("p_", "TestA").where_eq("age", 1);
        assert_eq!(qb.to_sql(), "select * from p_TestA where age = @param1");
        // dotted columns get the prefix on their table segment
        let qb = table_with_prefix("p_", "TestA").where_null("TestA.deleted_at");
        assert_eq!(
            qb.to_sql(),
            "select * from p_TestA where p_TestA.deleted_at is null"
        );
    }

    #[test]
    fn test_compiles_basic_where() {
        let qb = table("test").where_("age", ">", 25).unwrap();
        assert_eq!(qb.to_sql(), "select * from test where age > @param1");
    }

    #[test]
    fn test_compiles_nested_where_without_conjunction() {
        let qb = table("test")
            .where_nested(|q| Ok(q.where_eq("age", 25)))
            .unwrap();
        assert_eq!(qb.to_sql(), "select * from test where (age = @param1)");
    }

    #[test]
    fn test_compiles_null_checks() {
        assert_eq!(
            table("test").where_null("Address").to_sql(),
            "select * from test where Address is null"
        );
        assert_eq!(
            table("test").where_not_null("Address").to_sql(),
            "select * from test where Address is not null"
        );
    }

    #[test]
    fn test_compiles_where_in_as_unnest() {
        let qb = table("test").where_in("age", [20, 25, 30]);
        assert_eq!(qb.to_sql(), "select * from test where age in UNNEST(@param1)");
        assert_eq!(
            qb.bindings().get("param1"),
            Some(&Value::Array(vec![
                Value::Int(20),
                Value::Int(25),
                Value::Int(30)
            ]))
        );
    }

    #[test]
    fn test_empty_in_collapses_to_constants() {
        let qb = table("test").where_in("age", Vec::<i64>::new());
        assert_eq!(qb.to_sql(), "select * from test where 0 = 1");
        let qb = table("test").where_not_in("age", Vec::<i64>::new());
        assert_eq!(qb.to_sql(), "select * from test where 1 = 1");
    }

    #[test]
    fn test_compiles_not_in() {
        let qb = table("test").where_not_in("age", [20]);
        assert_eq!(
            qb.to_sql(),
            "select * from test where age not in UNNEST(@param1)"
        );
    }

    #[test]
    fn test_compiles_exists_and_not_exists() {
        let qb = table("test")
            .where_exists(|q| Ok(q.from("testB").where_column("test.ColumnA", "=", "testB.ColumnA")))
            .unwrap();
        assert_eq!(
            qb.to_sql(),
            "select * from test where exists (select * from testB where test.ColumnA = testB.ColumnA)"
        );
        let qb = table("test")
            .where_not_exists(|q| {
                Ok(q.from("testB").where_column("test.ColumnA", "=", "testB.ColumnA"))
            })
            .unwrap();
        assert_eq!(
            qb.to_sql(),
            "select * from test where not exists (select * from testB where test.ColumnA = testB.ColumnA)"
        );
    }

    #[test]
    fn test_compiles_between() {
        let qb = table("test").where_between("columnA", 1, 9);
        assert_eq!(
            qb.to_sql(),
            "select * from test where columnA between @param1 and @param2"
        );
    }

    #[test]
    fn test_compiles_limit_and_offset() {
        assert_eq!(
            table("test").limit(1).offset(2).to_sql(),
            "select * from test limit 1 offset 2"
        );
    }

    #[test]
    fn test_compiles_orders() {
        let qb = table("test")
            .order_by_desc("ColumnA")
            .order_by("ColumnB", "asc")
            .unwrap();
        assert_eq!(
            qb.to_sql(),
            "select * from test order by ColumnA desc, ColumnB asc"
        );
    }

    #[test]
    fn test_compiles_group_by() {
        assert_eq!(
            table("test").group_by(&["groupA", "groupB"]).to_sql(),
            "select * from test group by groupA, groupB"
        );
    }

    #[test]
    fn test_compiles_having_after_group() {
        let qb = table("test")
            .select(&["ColumnA"])
            .group_by(&["ColumnA"])
            .having("ColumnA", ">", 30)
            .unwrap();
        assert_eq!(
            qb.to_sql(),
            "select ColumnA from test group by ColumnA having ColumnA > @param1"
        );
    }

    #[test]
    fn test_compiles_aggregate() {
        let mut qb = table("test").where_("age", ">", 30).unwrap();
        qb.aggregate = Some(Aggregate {
            function: AggregateFunction::Avg,
            columns: vec![Column::Name("age".to_string())],
        });
        assert_eq!(
            qb.to_sql(),
            "select avg(age) as aggregate from test where age > @param1"
        );
    }

    #[test]
    fn test_aggregate_respects_distinct() {
        let mut qb = table("test").distinct();
        qb.aggregate = Some(Aggregate {
            function: AggregateFunction::Avg,
            columns: vec![Column::Name("age".to_string())],
        });
        assert_eq!(qb.to_sql(), "select avg(distinct age) as aggregate from test");

        let mut qb = table("test").distinct_columns(&["age"]);
        qb.aggregate = Some(Aggregate {
            function: AggregateFunction::Avg,
            columns: vec![Column::Name("*".to_string())],
        });
        assert_eq!(qb.to_sql(), "select avg(distinct age) as aggregate from test");
    }

    #[test]
    fn test_compiles_inner_join() {
        let qb = table("TestA").join("TestB", "TestA.id", "=", "TestB.id");
        assert_eq!(
            qb.to_sql(),
            "select * from TestA inner join TestB on TestA.id = TestB.id"
        );
    }

    #[test]
    fn test_compiles_left_and_cross_joins() {
        let qb = table("TestA")
            .left_join("TestB", "TestA.id", "=", "TestB.id")
            .cross_join("TestC");
        assert_eq!(
            qb.to_sql(),
            "select * from TestA left join TestB on TestA.id = TestB.id cross join TestC"
        );
    }

    #[test]
    fn test_cross_join_keeps_its_conditions() {
        let qb = table("Users")
            .cross_join_with("Orders", |j| j.where_("Orders.total", ">", 100))
            .unwrap();
        assert_eq!(
            qb.to_sql(),
            "select * from Users cross join Orders on Orders.total > @param1"
        );
        assert_eq!(qb.bindings().get("param1"), Some(&Value::Int(100)));
    }

    #[test]
    fn test_compiles_nested_joins_parenthesized() {
        let qb = table("TestA")
            .join_with("TestB", |j| {
                Ok(j.on("TestA.id", "=", "TestB.id")
                    .join("TestC", "TestB.id", "=", "TestC.id"))
            })
            .unwrap();
        assert_eq!(
            qb.to_sql(),
            "select * from TestA inner join (TestB inner join TestC on TestB.id = TestC.id) \
             on TestA.id = TestB.id"
        );
    }

    #[test]
    fn test_compiles_delete_without_joins() {
        let qb = table("test").where_eq("id", 1);
        assert_eq!(
            qb.grammar().compile_delete(&qb),
            "delete from test where id = @param1"
        );
    }

    #[test]
    fn test_compiles_delete_with_joins_names_alias() {
        let qb = table("TestA")
            .join("TestB", "TestA.id", "=", "TestB.id")
            .where_eq("TestA", 1);
        assert_eq!(
            qb.grammar().compile_delete(&qb),
            "delete TestA from TestA inner join TestB on TestA.id = TestB.id where TestA = @param1"
        );
    }

    #[test]
    fn test_compiles_update_without_joins() {
        let qb = table("test").where_eq("id", 1);
        assert_eq!(
            qb.grammar()
                .compile_update(&qb, &[("age".to_string(), "@value1".to_string())]),
            "update test set age = @value1 where id = @param1"
        );
    }

    #[test]
    fn test_compiles_update_with_joins() {
        let qb = table("TestA")
            .join("TestB", "TestA.id", "=", "TestB.id")
            .where_eq("id", 1);
        assert_eq!(
            qb.grammar()
                .compile_update(&qb, &[("age".to_string(), "@value1".to_string())]),
            "update TestA inner join TestB on TestA.id = TestB.id set age = @value1 where id = @param1"
        );
    }

    #[test]
    fn test_expression_value_renders_verbatim_without_binding() {
        let qb = table("TestA").where_eq("age", raw("30"));
        assert_eq!(qb.to_sql(), "select * from TestA where age = 30");
        assert!(qb.bindings().is_empty());
    }

    #[test]
    fn test_expression_column_bypasses_wrapping() {
        let qb = table("TestA").where_eq(raw("RandomValue44"), 30);
        assert_eq!(qb.to_sql(), "select * from TestA where RandomValue44 = @param1");
    }

    #[test]
    fn test_wraps_aliased_column_and_table() {
        assert_eq!(
            table("TestA").select(&["age as PersonAge"]).to_sql(),
            "select age as PersonAge from TestA"
        );
        assert_eq!(table("TestA as S").to_sql(), "select * from TestA as S");
    }

    #[test]
    fn test_question_mark_operator_is_doubled() {
        let grammar = Grammar::new();
        let predicate = Predicate::Basic {
            column: Column::Name("tags".to_string()),
            operator: "?".to_string(),
            value: BasicRhs::Parameter("@param1".to_string()),
        };
        assert_eq!(grammar.compile_predicate(&predicate), "tags ?? @param1");
    }

    #[test]
    fn test_wrap_value_doubles_embedded_quotes() {
        assert_eq!(wrap_value("a\"b"), "a\"\"b");
        assert_eq!(wrap_value("*"), "*");
    }

    #[test]
    fn test_select_distinct() {
        assert_eq!(
            table("test").select(&["age"]).distinct().to_sql(),
            "select distinct age from test"
        );
    }
}

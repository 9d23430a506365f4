//! SQLite SQL dialect (Strategy pattern).

use crate::core::schema::TableSpec;
use crate::core::traits::{BuiltQuery, Dialect, TxOptions};
use crate::core::value::SqlValue;

/// SQLite dialect implementation. Upserts need SQLite 3.24+.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn param_placeholder(&self, _index: usize, _value: &SqlValue) -> String {
        "?".to_string()
    }

    /// SQLite transactions are always serializable and cannot be opened
    /// read-only, so the options are ignored.
    fn build_begin_statements(&self, _opts: &TxOptions) -> Vec<String> {
        vec!["BEGIN".to_string()]
    }

    fn build_upsert_query(
        &self,
        table: &str,
        id_column: &str,
        columns: &[String],
        update_columns: &[String],
        values: &[SqlValue],
    ) -> BuiltQuery {
        let quoted_cols = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; values.len()].join(", ");

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO",
            self.quote_table(table),
            quoted_cols,
            placeholders,
            self.quote_ident(id_column)
        );

        if update_columns.is_empty() {
            sql.push_str(" NOTHING");
        } else {
            let current = self.quote_ident(table.rsplit('.').next().unwrap_or(table));
            let set = update_columns
                .iter()
                .map(|c| format!("{} = excluded.{}", self.quote_ident(c), self.quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            let changed = update_columns
                .iter()
                .map(|c| {
                    let c = self.quote_ident(c);
                    format!("{}.{} IS NOT excluded.{}", current, c, c)
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            sql.push_str(&format!(" UPDATE SET {} WHERE {}", set, changed));
        }

        BuiltQuery::new(sql, values.to_vec())
    }

    fn build_list_columns_query(&self, spec: &TableSpec) -> BuiltQuery {
        let table = SqlValue::Text(spec.unqualified_name().to_string());
        match spec.schema() {
            Some(schema) => BuiltQuery::new(
                "SELECT name AS column_name FROM pragma_table_info(?, ?) ORDER BY cid",
                vec![table, SqlValue::Text(schema.to_string())],
            ),
            None => BuiltQuery::new(
                "SELECT name AS column_name FROM pragma_table_info(?) ORDER BY cid",
                vec![table],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_only_touches_changed_rows() {
        let dialect = SqliteDialect::new();
        let cols = vec!["id".to_string(), "name".to_string(), "age".to_string()];
        let q = dialect.build_upsert_query(
            "main.users",
            "id",
            &cols,
            &cols[1..],
            &[SqlValue::I64(1), SqlValue::Null, SqlValue::I64(3)],
        );
        assert_eq!(
            q.sql,
            "INSERT INTO \"main\".\"users\" (\"id\", \"name\", \"age\") VALUES (?, ?, ?) \
             ON CONFLICT(\"id\") DO UPDATE SET \"name\" = excluded.\"name\", \
             \"age\" = excluded.\"age\" WHERE \"users\".\"name\" IS NOT excluded.\"name\" \
             OR \"users\".\"age\" IS NOT excluded.\"age\""
        );
    }

    #[test]
    fn test_list_columns_query() {
        let dialect = SqliteDialect::new();
        let q = dialect.build_list_columns_query(&TableSpec::new("users"));
        assert!(q.sql.contains("pragma_table_info(?)"));
        assert_eq!(q.params, vec![SqlValue::Text("users".into())]);
    }

    #[test]
    fn test_page_query_without_columns_leads_with_identity() {
        let dialect = SqliteDialect::new();
        let q = dialect.build_page_query(&TableSpec::new("main.users"), None, false, 10, 0);
        assert_eq!(
            q.sql,
            "SELECT \"id\", \"users\".* FROM \"main\".\"users\" ORDER BY \"id\" LIMIT 10 OFFSET 0"
        );
    }

    #[test]
    fn test_begin_ignores_options() {
        let dialect = SqliteDialect::new();
        let opts = TxOptions::default().read_only();
        assert_eq!(dialect.build_begin_statements(&opts), vec!["BEGIN"]);
    }
}

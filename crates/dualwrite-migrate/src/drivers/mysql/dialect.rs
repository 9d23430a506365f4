//! MySQL/MariaDB SQL dialect (Strategy pattern).

use crate::core::schema::TableSpec;
use crate::core::traits::{BuiltQuery, Dialect, TxOptions};
use crate::core::value::SqlValue;

/// MySQL/MariaDB dialect implementation.
///
/// Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn param_placeholder(&self, _index: usize, _value: &SqlValue) -> String {
        "?".to_string()
    }

    fn build_begin_statements(&self, opts: &TxOptions) -> Vec<String> {
        let mut stmts = Vec::with_capacity(2);
        // Applies to the next transaction only
        if let Some(level) = opts.isolation {
            stmts.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));
        }
        stmts.push(if opts.read_only {
            "START TRANSACTION READ ONLY".to_string()
        } else {
            "START TRANSACTION".to_string()
        });
        stmts
    }

    fn build_upsert_query(
        &self,
        table: &str,
        _id_column: &str,
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

        let sql = if update_columns.is_empty() {
            format!(
                "INSERT IGNORE INTO {} ({}) VALUES ({})",
                self.quote_table(table),
                quoted_cols,
                placeholders
            )
        } else {
            // Conflicts resolve on the primary key
            let set = update_columns
                .iter()
                .map(|c| format!("{} = VALUES({})", self.quote_ident(c), self.quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                self.quote_table(table),
                quoted_cols,
                placeholders,
                set
            )
        };

        BuiltQuery::new(sql, values.to_vec())
    }

    fn build_list_columns_query(&self, spec: &TableSpec) -> BuiltQuery {
        let table = SqlValue::Text(spec.unqualified_name().to_string());
        match spec.schema() {
            Some(schema) => BuiltQuery::new(
                "SELECT COLUMN_NAME AS column_name FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
                vec![SqlValue::Text(schema.to_string()), table],
            ),
            None => BuiltQuery::new(
                "SELECT COLUMN_NAME AS column_name FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
                vec![table],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::IsolationLevel;

    #[test]
    fn test_quote_ident() {
        let dialect = MysqlDialect::new();
        assert_eq!(dialect.quote_ident("users"), "`users`");
        assert_eq!(dialect.quote_ident("we`ird"), "`we``ird`");
        assert_eq!(dialect.quote_table("app.users"), "`app`.`users`");
    }

    #[test]
    fn test_page_query_uses_question_marks() {
        let dialect = MysqlDialect::new();
        let spec = TableSpec::new("users").with_utime_column("utime");
        let q = dialect.build_page_query(&spec, Some(&SqlValue::I64(1)), true, 10, 0);
        assert_eq!(
            q.sql,
            "SELECT `id` FROM `users` WHERE `utime` >= ? ORDER BY `id` LIMIT 10 OFFSET 0"
        );
    }

    #[test]
    fn test_upsert_on_duplicate_key() {
        let dialect = MysqlDialect::new();
        let cols = vec!["id".to_string(), "name".to_string(), "email".to_string()];
        let q = dialect.build_upsert_query(
            "users",
            "id",
            &cols,
            &cols[1..],
            &[SqlValue::I64(1), SqlValue::Null, SqlValue::Null],
        );
        assert_eq!(
            q.sql,
            "INSERT INTO `users` (`id`, `name`, `email`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `name` = VALUES(`name`), `email` = VALUES(`email`)"
        );
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn test_upsert_without_update_columns() {
        let dialect = MysqlDialect::new();
        let cols = vec!["id".to_string()];
        let q = dialect.build_upsert_query("users", "id", &cols, &[], &[SqlValue::I64(1)]);
        assert_eq!(q.sql, "INSERT IGNORE INTO `users` (`id`) VALUES (?)");
    }

    #[test]
    fn test_begin_statements() {
        let dialect = MysqlDialect::new();
        let opts = TxOptions::default().with_isolation(IsolationLevel::Serializable);
        assert_eq!(
            dialect.build_begin_statements(&opts),
            vec![
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
                "START TRANSACTION"
            ]
        );
    }
}

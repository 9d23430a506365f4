//! PostgreSQL SQL dialect (Strategy pattern).

use crate::core::schema::TableSpec;
use crate::core::traits::{BuiltQuery, Dialect, TxOptions};
use crate::core::value::SqlValue;

/// Alias given to the target table in upserts.
const UPSERT_ALIAS: &str = "__cur";

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }
}

/// Explicit cast so the server does not have to infer parameter types.
///
/// NULL is left uncast: it is bound with a type-agnostic encoder and takes
/// the type the server infers from context.
pub(crate) fn sql_cast_for_value(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Null => "",
        SqlValue::Bool(_) => "::boolean",
        SqlValue::I16(_) => "::smallint",
        SqlValue::I32(_) => "::integer",
        SqlValue::I64(_) => "::bigint",
        SqlValue::F32(_) => "::real",
        SqlValue::F64(_) => "::double precision",
        SqlValue::Text(_) => "::text",
        SqlValue::Bytes(_) => "::bytea",
        SqlValue::Uuid(_) => "::uuid",
        SqlValue::Decimal(_) => "::numeric",
        SqlValue::DateTime(_) => "::timestamp",
        SqlValue::DateTimeOffset(_) => "::timestamptz",
        SqlValue::Date(_) => "::date",
        SqlValue::Time(_) => "::time",
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn param_placeholder(&self, index: usize, value: &SqlValue) -> String {
        format!("${}{}", index, sql_cast_for_value(value))
    }

    fn build_begin_statements(&self, opts: &TxOptions) -> Vec<String> {
        let mut sql = String::from("BEGIN");
        if let Some(level) = opts.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(level.as_sql());
        }
        if opts.read_only {
            sql.push_str(" READ ONLY");
        }
        vec![sql]
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
        let placeholders = values
            .iter()
            .enumerate()
            .map(|(i, v)| self.param_placeholder(i + 1, v))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "INSERT INTO {} AS {} ({}) VALUES ({}) ON CONFLICT ({}) DO",
            self.quote_table(table),
            UPSERT_ALIAS,
            quoted_cols,
            placeholders,
            self.quote_ident(id_column)
        );

        if update_columns.is_empty() {
            sql.push_str(" NOTHING");
        } else {
            let set = update_columns
                .iter()
                .map(|c| format!("{} = EXCLUDED.{}", self.quote_ident(c), self.quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            let current = update_columns
                .iter()
                .map(|c| format!("{}.{}", UPSERT_ALIAS, self.quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            let excluded = update_columns
                .iter()
                .map(|c| format!("EXCLUDED.{}", self.quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            // Skip no-op updates so a converged row reports zero affected rows
            sql.push_str(&format!(
                " UPDATE SET {} WHERE ({}) IS DISTINCT FROM ({})",
                set, current, excluded
            ));
        }

        BuiltQuery::new(sql, values.to_vec())
    }

    fn build_list_columns_query(&self, spec: &TableSpec) -> BuiltQuery {
        let table = SqlValue::Text(spec.unqualified_name().to_string());
        match spec.schema() {
            Some(schema) => BuiltQuery::new(
                "SELECT column_name::text AS column_name FROM information_schema.columns \
                 WHERE table_schema = $1::text AND table_name = $2::text \
                 ORDER BY ordinal_position",
                vec![SqlValue::Text(schema.to_string()), table],
            ),
            None => BuiltQuery::new(
                "SELECT column_name::text AS column_name FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1::text \
                 ORDER BY ordinal_position",
                vec![table],
            ),
        }
    }
}

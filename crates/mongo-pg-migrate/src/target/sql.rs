//! SQL text builders for the PostgreSQL destination.
//!
//! Every parameter is bound as text and cast in the statement, so one
//! builder serves all column types.

use super::{SqlNullType, SqlValue};
use crate::entity::{ForeignKey, UniqueField, WriteMode};
use tokio_postgres::types::ToSql;

/// Columns never touched by an upsert's UPDATE branch.
const IMMUTABLE_COLUMNS: &[&str] = &["id", "created_at"];

/// Quote a PostgreSQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a table name with schema.
pub(crate) fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Get SQL cast suffix for a SqlValue type.
fn sql_cast_for_value(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Bool(_) => "::boolean",
        SqlValue::F64(_) => "::double precision",
        SqlValue::String(_) => "::text",
        SqlValue::Bytes(_) => "::bytea",
        SqlValue::Uuid(_) => "::uuid",
        SqlValue::Date(_) => "::date",
        SqlValue::Time(_) => "::time",
        SqlValue::Timestamp(_) => "::timestamptz",
        SqlValue::Json(_) => "::jsonb",
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => "::boolean",
            SqlNullType::F64 => "::double precision",
            SqlNullType::String => "::text",
            SqlNullType::Bytes => "::bytea",
            SqlNullType::Uuid => "::uuid",
            SqlNullType::Date => "::date",
            SqlNullType::Time => "::time",
            SqlNullType::Timestamp => "::timestamptz",
            SqlNullType::Json => "::jsonb",
        },
    }
}

/// Convert SqlValue to a boxed ToSql parameter.
/// Converts ALL values to strings - PostgreSQL will cast them using SQL cast syntax.
fn sql_value_to_param(value: &SqlValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        SqlValue::Null(_) => Box::new(None::<String>),
        SqlValue::Bool(b) => Box::new(if *b { "t".to_string() } else { "f".to_string() }),
        SqlValue::F64(n) => Box::new(n.to_string()),
        SqlValue::String(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(format!("\\x{}", hex::encode(b))),
        SqlValue::Uuid(u) => Box::new(u.to_string()),
        SqlValue::Date(d) => Box::new(d.to_string()),
        SqlValue::Time(t) => Box::new(t.format("%H:%M").to_string()),
        SqlValue::Timestamp(ts) => {
            Box::new(ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
        }
        SqlValue::Json(v) => Box::new(v.to_string()),
    }
}

/// Build a multi-row INSERT, with an ON CONFLICT clause for upserts.
///
/// Upserts overwrite every column except the primary key and `created_at`,
/// so a reload keeps the original creation time and takes the new values.
pub(crate) fn build_write_sql(
    schema: &str,
    table: &str,
    cols: &[&str],
    rows: &[Vec<SqlValue>],
    mode: WriteMode,
) -> (String, Vec<Box<dyn ToSql + Sync + Send>>) {
    let col_list: String = cols
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut placeholders = Vec::with_capacity(rows.len());
    let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(rows.len() * cols.len());
    let mut idx = 1;

    // Determine column casts from first row (all rows have same structure)
    let col_casts: Vec<&'static str> = rows
        .first()
        .map(|first| first.iter().map(sql_cast_for_value).collect())
        .unwrap_or_default();

    for row in rows {
        let row_placeholders: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(col_idx, value)| {
                let p = format!("${}", idx);
                idx += 1;
                let cast = col_casts
                    .get(col_idx)
                    .copied()
                    .unwrap_or_else(|| sql_cast_for_value(value));
                format!("{}{}", p, cast)
            })
            .collect();
        placeholders.push(format!("({})", row_placeholders.join(", ")));

        for value in row {
            params.push(sql_value_to_param(value));
        }
    }

    let insert = format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualify_table(schema, table),
        col_list,
        placeholders.join(", ")
    );

    let sql = match mode {
        WriteMode::InsertOnly => insert,
        WriteMode::Upsert => {
            let update_cols: Vec<String> = cols
                .iter()
                .filter(|c| !IMMUTABLE_COLUMNS.contains(*c))
                .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
                .collect();
            if update_cols.is_empty() {
                format!("{} ON CONFLICT (\"id\") DO NOTHING", insert)
            } else {
                format!(
                    "{} ON CONFLICT (\"id\") DO UPDATE SET {}",
                    insert,
                    update_cols.join(", ")
                )
            }
        }
    };

    (sql, params)
}

/// Count rows of the child table whose foreign key points nowhere.
pub(crate) fn build_dangling_sql(schema: &str, fk: &ForeignKey) -> String {
    let column = quote_ident(fk.column);
    format!(
        "SELECT COUNT(*) FROM {} c WHERE c.{} IS NOT NULL \
         AND NOT EXISTS (SELECT 1 FROM {} p WHERE p.\"id\" = c.{})",
        qualify_table(schema, fk.kind.table_name()),
        column,
        qualify_table(schema, fk.references.table_name()),
        column
    )
}

/// List non-null values of a unique column with more than one occurrence.
pub(crate) fn build_duplicates_sql(schema: &str, field: &UniqueField) -> String {
    let column = quote_ident(field.column);
    format!(
        "SELECT {col}::text, COUNT(*) FROM {table} WHERE {col} IS NOT NULL \
         GROUP BY {col} HAVING COUNT(*) > 1 ORDER BY {col}",
        col = column,
        table = qualify_table(schema, field.kind.table_name())
    )
}

//! Live-catalog introspection: columns, primary keys, and index
//! definitions of the tables named by the model.

use crate::{exec, Result};
use sqlx::{PgConnection, Row};
use std::collections::HashSet;

/// Which catalog spelling of a column's type to read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TypeNames {
    /// `information_schema.columns.data_type`: portable names such as
    /// `integer`. Arrays come back as the bare word `ARRAY`.
    Portable,
    /// `udt_name`: underlying names such as `int4`, arrays as `_int4`.
    /// Required wherever array element types matter.
    Underlying,
}

/// A column of a source relation, with its normalised type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, raw_type: &str, nullable: bool) -> Column {
        Column {
            name: name.into(),
            sql_type: normalize_type(raw_type),
            nullable,
        }
    }

    pub fn is_array(&self) -> bool {
        self.sql_type.ends_with("[]")
    }

    /// The element type of an array column, or the type itself.
    pub fn scalar_type(&self) -> &str {
        self.sql_type.strip_suffix("[]").unwrap_or(&self.sql_type)
    }
}

fn normalize_type(raw: &str) -> String {
    if let Some(element) = raw.strip_prefix('_') {
        return format!("{}[]", normalize_scalar(element));
    }
    normalize_scalar(raw).to_string()
}

fn normalize_scalar(raw: &str) -> &str {
    match raw {
        "character" => "varchar",
        "smallint" => "integer",
        other => other,
    }
}

/// All columns of `table` in ordinal order. An unknown table yields an
/// empty vector; the caller decides whether that is an error.
pub async fn describe_columns(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
    names: TypeNames,
) -> Result<Vec<Column>> {
    let type_expr = match names {
        TypeNames::Portable => "data_type",
        TypeNames::Underlying => "udt_name",
    };
    let statement = format!(
        "SELECT column_name::text, {type_expr}::text, is_nullable::text
        FROM information_schema.columns
        WHERE table_schema = $1
        AND table_name = $2
        ORDER BY ordinal_position"
    );

    let rows = sqlx::query(&statement)
        .bind(schema)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|source| exec::dml_error(table, &statement, source))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row
            .try_get(0)
            .map_err(|source| exec::dml_error(table, &statement, source))?;
        let raw_type: String = row
            .try_get(1)
            .map_err(|source| exec::dml_error(table, &statement, source))?;
        let nullable: String = row
            .try_get(2)
            .map_err(|source| exec::dml_error(table, &statement, source))?;
        columns.push(Column::new(name, &raw_type, nullable == "YES"));
    }
    Ok(columns)
}

/// Names of the columns in the table's primary-key index. The table is
/// resolved through the session search path.
pub async fn primary_key_columns(
    conn: &mut PgConnection,
    table: &str,
) -> Result<HashSet<String>> {
    let statement = "SELECT a.attname::text
        FROM pg_index i
        JOIN pg_attribute a ON a.attrelid = i.indrelid
                           AND a.attnum = ANY(i.indkey)
        WHERE i.indrelid = $1::regclass
        AND i.indisprimary";

    let rows = sqlx::query(statement)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|source| exec::dml_error(table, statement, source))?;

    rows.into_iter()
        .map(|row| {
            row.try_get(0)
                .map_err(|source| exec::dml_error(table, statement, source))
        })
        .collect()
}

/// Textual definitions of every non-primary-key index on `table`.
pub async fn index_definitions(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
) -> Result<Vec<String>> {
    let statement = "SELECT ix.indexdef::text
        FROM pg_indexes ix
        JOIN pg_namespace n ON n.nspname = ix.schemaname
        JOIN pg_class c ON c.relname = ix.indexname AND c.relnamespace = n.oid
        JOIN pg_index i ON i.indexrelid = c.oid
        WHERE ix.schemaname = $1
        AND ix.tablename = $2
        AND NOT i.indisprimary
        ORDER BY ix.indexname";

    let rows = sqlx::query(statement)
        .bind(schema)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|source| exec::dml_error(table, statement, source))?;

    rows.into_iter()
        .map(|row| {
            row.try_get(0)
                .map_err(|source| exec::dml_error(table, statement, source))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_type_normalisation() {
        assert_eq!(Column::new("c", "character", true).sql_type, "varchar");
        assert_eq!(Column::new("c", "smallint", true).sql_type, "integer");
        assert_eq!(Column::new("c", "integer", false).sql_type, "integer");
        assert_eq!(Column::new("c", "_int4", false).sql_type, "int4[]");
        assert_eq!(Column::new("c", "_smallint", false).sql_type, "integer[]");
    }

    #[test]
    fn test_scalar_type_of_arrays() {
        let array = Column::new("s", "_int4", false);
        assert!(array.is_array());
        assert_eq!(array.scalar_type(), "int4");

        let scalar = Column::new("s", "int4", false);
        assert!(!scalar.is_array());
        assert_eq!(scalar.scalar_type(), "int4");
    }
}

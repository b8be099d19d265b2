//! Statement execution with failures wrapped so errors surface the
//! offending table and SQL, per the batch-tool contract.

use crate::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::PgConnection;

pub(crate) fn dml_error(table: &str, statement: &str, source: sqlx::Error) -> Error {
    Error::Dml {
        table: table.to_string(),
        statement: statement.to_string(),
        source,
    }
}

pub(crate) async fn execute_ddl(
    conn: &mut PgConnection,
    table: &str,
    statement: &str,
) -> Result<()> {
    tracing::debug!(%table, %statement, "executing DDL");
    sqlx::query(statement)
        .execute(&mut *conn)
        .await
        .map_err(|source| Error::Ddl {
            table: table.to_string(),
            statement: statement.to_string(),
            source,
        })?;
    Ok(())
}

pub(crate) async fn execute_dml(
    conn: &mut PgConnection,
    table: &str,
    statement: &str,
) -> Result<()> {
    tracing::debug!(%table, %statement, "executing DML");
    sqlx::query(statement)
        .execute(&mut *conn)
        .await
        .map_err(|source| dml_error(table, statement, source))?;
    Ok(())
}

pub(crate) async fn fetch_all(
    conn: &mut PgConnection,
    table: &str,
    statement: &str,
) -> Result<Vec<PgRow>> {
    tracing::debug!(%table, %statement, "fetching rows");
    sqlx::query(statement)
        .fetch_all(&mut *conn)
        .await
        .map_err(|source| dml_error(table, statement, source))
}

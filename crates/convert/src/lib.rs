//! Rewrites tables of a live Postgres database into multi-record-value
//! (MRV) backed structures: per-key shard rows selected by a random slot
//! number, stored procedures implementing the per-structure write
//! protocols, and a view plus rewrite rules which keep the original table
//! surface intact for applications.

pub mod catalog;
pub mod classify;
pub mod ddl;
mod emit;
mod exec;
pub mod pool;
pub mod shards;
pub mod structures;

use models::{Model, Structure, TableSpec};
use rand::{Rng, SeedableRng};
use sqlx::Connection;

pub use catalog::Column;
pub use classify::TableColumns;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] models::Error),
    #[error("failed to connect to database {database:?} at {host}:{port}")]
    Connection {
        database: String,
        host: String,
        port: u16,
        #[source]
        source: sqlx::Error,
    },
    #[error("table {table:?} does not exist in schema {schema:?}")]
    NoSuchTable { schema: String, table: String },
    #[error("column {column:?} is not a column of table {table:?}")]
    NoSuchColumn { table: String, column: String },
    #[error("table {table:?}: columns {columns:?} are claimed by more than one of pk/mrv/payload/order")]
    AmbiguousColumnClassification { table: String, columns: Vec<String> },
    #[error("DDL failed on table {table:?}: {statement}")]
    Ddl {
        table: String,
        statement: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("DML failed on table {table:?}: {statement}")]
    Dml {
        table: String,
        statement: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("table {table:?}: slot pool exhausted, cannot place more than maxNodes ({max_nodes}) shards per key")]
    PoolExhausted { table: String, max_nodes: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Everything the emitters need to know about one table under conversion.
pub struct Ctx<'a> {
    pub table: &'a str,
    pub cols: &'a TableColumns,
    pub max_nodes: u32,
    pub initial_nodes: u32,
    pub k: u32,
}

impl Ctx<'_> {
    /// Name the renamed source table carries while its rows are re-homed.
    pub fn aux_name(&self) -> String {
        format!("{}__aux", self.table)
    }

    /// Name of the de-MRV'd base table.
    pub fn orig_name(&self) -> String {
        format!("{}_orig", self.table)
    }

    /// Name of the shard table backing one MRV column.
    pub fn shard_name(&self, mrv: &Column) -> String {
        format!("{}_{}", self.table, mrv.name)
    }

    /// A uniform slot draw in `[0, maxNodes)`, as SQL.
    pub fn random_slot(&self) -> String {
        format!("FLOOR(RANDOM() * {})::integer", self.max_nodes)
    }
}

/// Opens a connection using the model's parameters.
pub async fn connect(model: &Model) -> Result<sqlx::PgConnection> {
    let options = sqlx::postgres::PgConnectOptions::new()
        .host(&model.host)
        .port(model.port)
        .username(&model.user)
        .password(&model.password)
        .database(&model.database)
        .application_name("mrvctl");

    sqlx::PgConnection::connect_with(&options)
        .await
        .map_err(|source| Error::Connection {
            database: model.database.clone(),
            host: model.host.clone(),
            port: model.port,
            source,
        })
}

/// Connects and converts every table of the model in one transaction.
pub async fn run(model: &Model) -> Result<()> {
    let mut conn = connect(model).await?;
    let mut rng = rand::rngs::StdRng::from_entropy();
    let result = convert_all(model, &mut conn, &mut rng).await;
    let _ = conn.close().await;
    result
}

/// Converts every table named by the model, committing all-or-nothing.
pub async fn convert_all(
    model: &Model,
    conn: &mut sqlx::PgConnection,
    rng: &mut impl Rng,
) -> Result<()> {
    let mut txn = conn.begin().await.map_err(|source| Error::Connection {
        database: model.database.clone(),
        host: model.host.clone(),
        port: model.port,
        source,
    })?;

    let search_path = format!("SET search_path TO {}", sqlgen::ident(&model.schema));
    exec::execute_ddl(&mut *txn, &model.schema, &search_path).await?;

    for table in &model.tables {
        println!("Processing table '{}'", table.name);
        convert_table(&mut *txn, model, table, rng).await?;
    }

    for statement in structures::helper_statements() {
        exec::execute_ddl(&mut *txn, "mrv helpers", &statement).await?;
    }

    txn.commit().await.map_err(|source| Error::Ddl {
        table: "(commit)".to_string(),
        statement: "COMMIT".to_string(),
        source,
    })?;

    println!("Done");
    Ok(())
}

#[tracing::instrument(err, skip_all, fields(table = %spec.name, structure = %spec.structure.as_str()))]
async fn convert_table(
    conn: &mut sqlx::PgConnection,
    model: &Model,
    spec: &TableSpec,
    rng: &mut impl Rng,
) -> Result<()> {
    let k = model.k_for(spec);
    let type_names = match spec.structure {
        Structure::Topk | Structure::Ntopk => catalog::TypeNames::Underlying,
        Structure::Max | Structure::Serial => catalog::TypeNames::Portable,
    };

    let all = catalog::describe_columns(conn, &model.schema, &spec.name, type_names).await?;
    if all.is_empty() {
        return Err(Error::NoSuchTable {
            schema: model.schema.clone(),
            table: spec.name.clone(),
        });
    }
    let pk_names = catalog::primary_key_columns(conn, &spec.name).await?;

    // Order columns participate in classification only for ntopk with a
    // top-k wider than one; a k of 1 reduces the structure to a MAX-shaped
    // join and the ranking column disappears.
    let no_order: Vec<String> = Vec::new();
    let order_names = if spec.structure == Structure::Ntopk && k > 1 {
        &spec.order
    } else {
        &no_order
    };

    let cols = classify::classify(
        &spec.name,
        all,
        &pk_names,
        &classify::Designations {
            mrv: &spec.mrv,
            payload: &spec.payload,
            order: order_names,
        },
    )?;

    if spec.structure == Structure::Ntopk && k > 1 && !cols.regular.is_empty() {
        let names: Vec<&str> = cols.regular.iter().map(|c| c.name.as_str()).collect();
        return Err(Error::Configuration(models::Error::Invalid(format!(
            "table {:?}: ntopk with k > 1 requires every column to be pk, mrv, payload or order; \
             unclassified columns: {names:?}",
            spec.name
        ))));
    }
    if spec.structure == Structure::Serial {
        for mrv in cols.mrv.iter() {
            if !matches!(mrv.sql_type.as_str(), "integer" | "bigint" | "numeric") {
                return Err(Error::Configuration(models::Error::Invalid(format!(
                    "table {:?}: serial column {:?} must be integer-typed, got {:?}",
                    spec.name, mrv.name, mrv.sql_type
                ))));
            }
        }
    }

    let ctx = Ctx {
        table: &spec.name,
        cols: &cols,
        max_nodes: model.max_nodes,
        initial_nodes: model.initial_nodes,
        k,
    };

    if spec.structure == Structure::Serial {
        // The serial source already has the shape of the base table: rename
        // it directly and drop the counter columns once shards are seeded.
        exec::execute_ddl(conn, ctx.table, &ddl::rename_to_orig(&ctx)).await?;

        for mrv in ctx.cols.mrv.iter() {
            let create = shards::create_shard_table(&ctx, spec.structure, mrv);
            exec::execute_ddl(conn, ctx.table, &create).await?;
            shards::populate(conn, &ctx, spec.structure, mrv, rng).await?;
        }
        for statement in ddl::drop_mrv_columns(&ctx) {
            exec::execute_ddl(conn, ctx.table, &statement).await?;
        }
    } else {
        exec::execute_ddl(conn, ctx.table, &ddl::rename_to_aux(&ctx)).await?;
        exec::execute_ddl(conn, ctx.table, &ddl::create_orig(&ctx)).await?;
        exec::execute_dml(conn, ctx.table, &ddl::copy_to_orig(&ctx)).await?;

        let order_refs: Vec<&str> = ctx.cols.order.iter().map(|c| c.name.as_str()).collect();
        let indexes = catalog::index_definitions(conn, &model.schema, &ctx.aux_name()).await?;
        for indexdef in indexes {
            let lifted = ddl::lift_index(&ctx, &indexdef, &order_refs);
            exec::execute_ddl(conn, ctx.table, &lifted).await?;
        }

        for mrv in ctx.cols.mrv.iter() {
            let create = shards::create_shard_table(&ctx, spec.structure, mrv);
            exec::execute_ddl(conn, ctx.table, &create).await?;
            shards::populate(conn, &ctx, spec.structure, mrv, rng).await?;
        }

        exec::execute_ddl(conn, ctx.table, &ddl::drop_aux(&ctx)).await?;
    }

    for statement in structures::statements(&ctx, spec.structure) {
        exec::execute_ddl(conn, ctx.table, &statement).await?;
    }

    tracing::info!(
        shards = ctx.cols.mrv.len(),
        "converted table to MRV-backed structure"
    );
    Ok(())
}

//! Shard-table creation and initial population: every source value is
//! re-homed into a randomly drawn slot, padded out per the structure's
//! placement rule.

use crate::pool::SlotPool;
use crate::{emit, exec, Column, Ctx, Error, Result};
use models::Structure;
use rand::Rng;
use sqlgen::{comma, ident, typed_literal};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use std::collections::BTreeMap;

/// Sentinel shared by MAX padding rows. Loses to any real value.
pub(crate) const MAX_SENTINEL: &str = "-2147483648";

/// Rows per generated `INSERT ... VALUES` statement.
const INSERT_BATCH: usize = 500;

/// The stored type of the shard value column.
pub(crate) fn shard_value_type(structure: Structure, mrv: &Column) -> String {
    match structure {
        // Top-k shards hold a sorted array of the column's element type.
        Structure::Topk if !mrv.is_array() => format!("{}[]", mrv.sql_type),
        _ => mrv.sql_type.clone(),
    }
}

pub fn create_shard_table(ctx: &Ctx<'_>, structure: Structure, mrv: &Column) -> String {
    let shard = ident(&ctx.shard_name(mrv));
    let pk_typed = emit::typed(&ctx.cols.pk);
    let pk_names = emit::names(&ctx.cols.pk);
    let m = ident(&mrv.name);
    let value_type = shard_value_type(structure, mrv);

    let value_part = match structure {
        Structure::Max | Structure::Topk => format!("{m} {value_type}"),
        Structure::Ntopk if ctx.cols.payload.is_empty() => format!("{m} {value_type}"),
        Structure::Ntopk => format!(
            "{}, {m} {value_type}",
            emit::typed(&ctx.cols.payload)
        ),
        Structure::Serial => format!("{m} {value_type},\n    valid boolean"),
    };

    format!(
        "CREATE TABLE {shard} (\n    {pk_typed},\n    rk int,\n    {value_part},\n    PRIMARY KEY ({pk_names}, rk)\n)"
    )
}

/// Reads the source rows for one MRV column and bulk-inserts the assembled
/// shard rows.
pub async fn populate(
    conn: &mut PgConnection,
    ctx: &Ctx<'_>,
    structure: Structure,
    mrv: &Column,
    rng: &mut impl Rng,
) -> Result<()> {
    let source = match structure {
        // Serial reads from the renamed base table; the counter column is
        // dropped from it afterwards.
        Structure::Serial => ctx.orig_name(),
        _ => ctx.aux_name(),
    };
    let select = source_select(ctx, structure, mrv, &source);
    let rows = exec::fetch_all(conn, ctx.table, &select).await?;

    let width = match structure {
        Structure::Ntopk => ctx.cols.pk.len() + ctx.cols.payload.len() + 1,
        _ => ctx.cols.pk.len() + 1,
    };
    let data = rows
        .iter()
        .map(|row| text_row(row, width, ctx.table, &select))
        .collect::<Result<Vec<_>>>()?;

    let tuples = match structure {
        Structure::Max => max_rows(ctx, mrv, &data, rng)?,
        Structure::Topk => topk_rows(ctx, mrv, &data, rng)?,
        Structure::Ntopk => ntopk_rows(ctx, mrv, &data, rng)?,
        Structure::Serial => serial_rows(ctx, mrv, &data, rng)?,
    };
    tracing::info!(
        shard = %ctx.shard_name(mrv),
        source_rows = data.len(),
        shard_rows = tuples.len(),
        "populating shard table"
    );

    for chunk in tuples.chunks(INSERT_BATCH) {
        let statement = format!(
            "INSERT INTO {} VALUES\n    {}",
            ident(&ctx.shard_name(mrv)),
            chunk.join(",\n    ")
        );
        exec::execute_dml(conn, ctx.table, &statement).await?;
    }
    Ok(())
}

/// The read of `(pk…, [payload…,] value)` from the source relation. Every
/// column is cast through text so one decoding path serves all types; a
/// scalar top-k source is wrapped into its one-element array here.
fn source_select(ctx: &Ctx<'_>, structure: Structure, mrv: &Column, source: &str) -> String {
    let mut parts: Vec<String> = ctx
        .cols
        .pk
        .iter()
        .map(|c| format!("{}::text", ident(&c.name)))
        .collect();
    if structure == Structure::Ntopk {
        parts.extend(
            ctx.cols
                .payload
                .iter()
                .map(|c| format!("{}::text", ident(&c.name))),
        );
    }
    let m = ident(&mrv.name);
    parts.push(match structure {
        Structure::Topk if !mrv.is_array() => format!("(ARRAY[{m}])::text"),
        _ => format!("{m}::text"),
    });
    format!("SELECT {}\nFROM {}", comma(parts), ident(source))
}

fn text_row(
    row: &PgRow,
    width: usize,
    table: &str,
    statement: &str,
) -> Result<Vec<Option<String>>> {
    (0..width)
        .map(|i| {
            row.try_get::<Option<String>, _>(i)
                .map_err(|source| exec::dml_error(table, statement, source))
        })
        .collect()
}

fn draw(ctx: &Ctx<'_>, pool: &mut SlotPool) -> Result<i32> {
    pool.draw().ok_or_else(|| Error::PoolExhausted {
        table: ctx.table.to_string(),
        max_nodes: ctx.max_nodes,
    })
}

fn literals(values: &[Option<String>], cols: &[Column]) -> Vec<String> {
    values
        .iter()
        .zip(cols)
        .map(|(v, c)| typed_literal(v.as_deref(), &c.sql_type))
        .collect()
}

fn tuple(fields: Vec<String>) -> String {
    format!("({})", fields.join(", "))
}

/// MAX placement: `initialNodes - 1` sentinel rows, then the true value.
fn max_rows(
    ctx: &Ctx<'_>,
    mrv: &Column,
    data: &[Vec<Option<String>>],
    rng: &mut impl Rng,
) -> Result<Vec<String>> {
    let npk = ctx.cols.pk.len();
    let mut tuples = Vec::new();
    for values in data {
        let (pk_vals, value) = values.split_at(npk);
        let mut pool = SlotPool::shuffled(ctx.max_nodes, rng);

        for _ in 1..ctx.initial_nodes {
            let rk = draw(ctx, &mut pool)?;
            let mut fields = literals(pk_vals, &ctx.cols.pk);
            fields.push(rk.to_string());
            fields.push(format!("'{}'::{}", MAX_SENTINEL, mrv.sql_type));
            tuples.push(tuple(fields));
        }

        let rk = draw(ctx, &mut pool)?;
        let mut fields = literals(pk_vals, &ctx.cols.pk);
        fields.push(rk.to_string());
        fields.push(typed_literal(value[0].as_deref(), &mrv.sql_type));
        tuples.push(tuple(fields));
    }
    Ok(tuples)
}

/// Top-k placement: `initialNodes - 1` empty-array rows, then one slot
/// holding the (wrapped) source value.
fn topk_rows(
    ctx: &Ctx<'_>,
    mrv: &Column,
    data: &[Vec<Option<String>>],
    rng: &mut impl Rng,
) -> Result<Vec<String>> {
    let npk = ctx.cols.pk.len();
    let value_type = shard_value_type(Structure::Topk, mrv);
    let mut tuples = Vec::new();
    for values in data {
        let (pk_vals, value) = values.split_at(npk);
        let mut pool = SlotPool::shuffled(ctx.max_nodes, rng);

        for _ in 1..ctx.initial_nodes {
            let rk = draw(ctx, &mut pool)?;
            let mut fields = literals(pk_vals, &ctx.cols.pk);
            fields.push(rk.to_string());
            fields.push(format!("'{{}}'::{value_type}"));
            tuples.push(tuple(fields));
        }

        let rk = draw(ctx, &mut pool)?;
        let mut fields = literals(pk_vals, &ctx.cols.pk);
        fields.push(rk.to_string());
        fields.push(typed_literal(value[0].as_deref(), &value_type));
        tuples.push(tuple(fields));
    }
    Ok(tuples)
}

/// NTOPK placement: one slot per source row, then pad each key with
/// `(NULL payloads, 0)` rows until it holds `max(initialNodes, k)` shards.
fn ntopk_rows(
    ctx: &Ctx<'_>,
    mrv: &Column,
    data: &[Vec<Option<String>>],
    rng: &mut impl Rng,
) -> Result<Vec<String>> {
    let npk = ctx.cols.pk.len();
    let npay = ctx.cols.payload.len();
    let mut pools: BTreeMap<Vec<Option<String>>, SlotPool> = BTreeMap::new();
    let mut tuples = Vec::new();

    for values in data {
        let pk_vals = &values[..npk];
        let payload_vals = &values[npk..npk + npay];
        let value = &values[npk + npay];

        let pool = pools
            .entry(pk_vals.to_vec())
            .or_insert_with(|| SlotPool::shuffled(ctx.max_nodes, rng));
        let rk = draw(ctx, pool)?;

        let mut fields = literals(pk_vals, &ctx.cols.pk);
        fields.push(rk.to_string());
        fields.extend(literals(payload_vals, &ctx.cols.payload));
        fields.push(typed_literal(value.as_deref(), &mrv.sql_type));
        tuples.push(tuple(fields));
    }

    let target = ctx.initial_nodes.max(ctx.k) as usize;
    for (pk_vals, pool) in pools.iter_mut() {
        let mut used = ctx.max_nodes as usize - pool.remaining();
        while used < target {
            let rk = draw(ctx, pool)?;
            let mut fields = literals(pk_vals, &ctx.cols.pk);
            fields.push(rk.to_string());
            fields.extend(ctx.cols.payload.iter().map(|_| "NULL".to_string()));
            fields.push(format!("'0'::{}", mrv.sql_type));
            tuples.push(tuple(fields));
            used += 1;
        }
    }
    Ok(tuples)
}

/// SERIAL placement: `initialNodes - 1` consecutive pre-loaded counters
/// starting at the source value, all valid.
fn serial_rows(
    ctx: &Ctx<'_>,
    mrv: &Column,
    data: &[Vec<Option<String>>],
    rng: &mut impl Rng,
) -> Result<Vec<String>> {
    let npk = ctx.cols.pk.len();
    let mut tuples = Vec::new();
    for values in data {
        let (pk_vals, value) = values.split_at(npk);
        let base: i64 = value[0]
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
            .ok_or_else(|| {
                Error::Configuration(models::Error::Invalid(format!(
                    "table {:?}: serial column {:?} must hold integer counters, got {:?}",
                    ctx.table, mrv.name, value[0]
                )))
            })?;

        let mut pool = SlotPool::shuffled(ctx.max_nodes, rng);
        for i in 0..i64::from(ctx.initial_nodes) - 1 {
            let rk = draw(ctx, &mut pool)?;
            let mut fields = literals(pk_vals, &ctx.cols.pk);
            fields.push(rk.to_string());
            fields.push(format!("'{}'::{}", base + i, mrv.sql_type));
            fields.push("true".to_string());
            tuples.push(tuple(fields));
        }
    }
    Ok(tuples)
}

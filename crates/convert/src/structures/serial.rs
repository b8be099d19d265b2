//! SERIAL structure: shards are a pool of pre-loaded counters handed out
//! at most once each; a maintenance refresh re-arms spent shards with
//! fresh counters above everything issued so far.

use crate::{emit, Column, Ctx};
use sqlgen::ident;

pub fn statements(ctx: &Ctx<'_>) -> Vec<String> {
    let mut out = vec![view(ctx)];
    for mrv in ctx.cols.mrv.iter() {
        out.push(pop_fn(ctx, mrv));
        out.push(refresh_fn(ctx, mrv));
    }
    out.push(insert_fn(ctx));
    out.push(update_fn(ctx));
    out.push(super::delete_fn(ctx));
    out.extend(super::rewrite_rules(ctx, &ctx.cols.not_mrv));
    for mrv in ctx.cols.mrv.iter() {
        out.push(worker_pk_view(ctx, mrv));
    }
    out
}

/// The view joins each base row with its smallest still-valid counter.
fn view(ctx: &Ctx<'_>) -> String {
    let mrv = &ctx.cols.mrv[0];
    let m = ident(&mrv.name);
    let shard = ident(&ctx.shard_name(mrv));
    let orig = ident(&ctx.orig_name());
    let ids = emit::names(&ctx.cols.pk);

    format!(
        "CREATE VIEW {t} AS
SELECT {orig}.*, T.{m} FROM {orig} JOIN
(SELECT {ids}, MIN({m}) AS {m}
    FROM {shard} WHERE valid = true
    GROUP BY {ids}) T
ON {on}",
        t = ident(ctx.table),
        on = emit::join_on(&ctx.cols.pk, &orig, "T"),
    )
}

/// Pops the first valid counter found by a cyclic scan from a random
/// start, marking its shard spent. Returns an empty set when the pool is
/// dry.
fn pop_fn(ctx: &Ctx<'_>, mrv: &Column) -> String {
    let shard = ident(&ctx.shard_name(mrv));
    let pk_pred = emit::qualified_predicate(&ctx.cols.pk, "T", "_");

    format!(
        "CREATE OR REPLACE FUNCTION {name}({pk_params})
RETURNS TABLE (
    {table_cols}
)
AS $$
DECLARE rk_ int := {random_slot};
        node_rk int;
        cur CURSOR FOR
            (SELECT rk
            FROM {shard} AS T
            WHERE {pk_pred} AND rk >= rk_ AND valid = true
            ORDER BY rk)
            UNION ALL
            (SELECT rk
            FROM {shard} AS T
            WHERE {pk_pred} AND rk < rk_ AND valid = true
            ORDER BY rk);
BEGIN
    OPEN cur;
    FETCH cur INTO node_rk;
    IF NOT FOUND THEN
        RETURN;
    ELSE
        UPDATE {shard} AS T
        SET valid = FALSE
        WHERE {pk_pred} AND rk = node_rk;

        RETURN QUERY SELECT {returned} FROM {shard} AS T WHERE {pk_pred} AND rk = node_rk;
    END IF;
    CLOSE cur;
END
$$ LANGUAGE plpgsql",
        name = ident(&ctx.shard_name(mrv)),
        pk_params = emit::typed_suffixed(&ctx.cols.pk, "_"),
        table_cols = format!(
            "{}, {} {}",
            emit::typed(&ctx.cols.pk),
            ident(&mrv.name),
            mrv.sql_type
        ),
        random_slot = ctx.random_slot(),
        returned = format!(
            "{}, T.{}",
            emit::qualified_names(&ctx.cols.pk, "T"),
            ident(&mrv.name)
        ),
    )
}

/// Re-arms every spent shard of the key with counters strictly above the
/// current maximum. Idempotent for shards that are still valid.
fn refresh_fn(ctx: &Ctx<'_>, mrv: &Column) -> String {
    let shard = ident(&ctx.shard_name(mrv));
    let m = ident(&mrv.name);
    let pk_pred = emit::predicate(&ctx.cols.pk, "_");

    format!(
        "CREATE OR REPLACE FUNCTION {name}({pk_params}) RETURNS void
AS $$
DECLARE max_counter int;
        node_rk int;
        done bool := FALSE;
        cur CURSOR FOR
            SELECT rk FROM {shard}
            WHERE {pk_pred} AND valid = FALSE;
BEGIN
    SELECT MAX({m}) + 1 INTO max_counter
    FROM {shard}
    WHERE {pk_pred};

    OPEN cur;
    WHILE NOT done LOOP
        FETCH cur INTO node_rk;
        IF NOT FOUND THEN
            done := TRUE;
        ELSE
            UPDATE {shard}
            SET {m} = max_counter, valid = TRUE
            WHERE {pk_pred} AND rk = node_rk;

            max_counter := max_counter + 1;
        END IF;
    END LOOP;

    CLOSE cur;
END
$$ LANGUAGE plpgsql",
        name = ident(&format!("refresh_{}", ctx.shard_name(mrv))),
        pk_params = emit::typed_suffixed(&ctx.cols.pk, "_"),
    )
}

fn insert_fn(ctx: &Ctx<'_>) -> String {
    let mut body = format!(
        "    INSERT INTO {}\n    VALUES ({});\n",
        ident(&ctx.orig_name()),
        emit::suffixed(&ctx.cols.not_mrv, "_new"),
    );
    for mrv in ctx.cols.mrv.iter() {
        // Seed consecutive counters from zero, mirroring the bulk load, so
        // pops of a fresh key stay strictly increasing.
        for counter in 0..ctx.initial_nodes.saturating_sub(1) {
            body.push_str(&format!(
                "\n    INSERT INTO {}\n    VALUES ({},\n            {},\n            '{}'::{}, true);\n",
                ident(&ctx.shard_name(mrv)),
                emit::suffixed(&ctx.cols.pk, "_new"),
                ctx.random_slot(),
                counter,
                mrv.sql_type,
            ));
        }
    }
    format!(
        "CREATE OR REPLACE FUNCTION {}({}) RETURNS void\nAS $$\nBEGIN\n{}END\n$$ LANGUAGE plpgsql",
        ident(&format!("insert_{}", ctx.table)),
        emit::typed_suffixed(&ctx.cols.not_mrv, "_new"),
        body,
    )
}

fn update_fn(ctx: &Ctx<'_>) -> String {
    let mut body = super::regular_updates(ctx);
    if body.is_empty() {
        body = "\n    NULL;\n".to_string();
    }
    format!(
        "CREATE OR REPLACE FUNCTION {}(\n    {},\n    {}) RETURNS void\nAS $$\nBEGIN\n{}END\n$$ LANGUAGE plpgsql",
        ident(&format!("update_{}", ctx.table)),
        emit::typed_suffixed(&ctx.cols.not_mrv, "_new"),
        emit::typed_suffixed(&ctx.cols.not_mrv, "_old"),
        body,
    )
}

/// Enumeration surface for the background refresher: every key of the base
/// table.
fn worker_pk_view(ctx: &Ctx<'_>, mrv: &Column) -> String {
    format!(
        "CREATE VIEW {} AS\n    SELECT {} FROM {}",
        ident(&format!("{}_pk", ctx.shard_name(mrv))),
        emit::names(&ctx.cols.pk),
        ident(&ctx.orig_name()),
    )
}

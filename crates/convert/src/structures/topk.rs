//! TOPK structure: each shard holds an ascending array of at most k
//! values; the view unnests every shard, re-aggregates per key and keeps
//! the k largest.

use crate::shards::shard_value_type;
use crate::{emit, Column, Ctx};
use models::Structure;
use sqlgen::ident;

pub fn statements(ctx: &Ctx<'_>) -> Vec<String> {
    let surface = surface(ctx);
    let mut out = vec![view(ctx)];
    for mrv in ctx.cols.mrv.iter() {
        out.push(write_fn(ctx, mrv));
    }
    out.push(insert_fn(ctx, &surface));
    out.push(update_fn(ctx, &surface));
    out.push(super::delete_fn(ctx));
    out.extend(super::rewrite_rules(ctx, &surface));
    out
}

/// The view exposes the MRV column as an array of its element type, and
/// the procedures accept it in that shape.
fn surface(ctx: &Ctx<'_>) -> Vec<Column> {
    ctx.cols
        .all
        .iter()
        .map(|c| {
            let mut c = c.clone();
            if ctx.cols.mrv.iter().any(|m| m.name == c.name) {
                c.sql_type = shard_value_type(Structure::Topk, &c);
            }
            c
        })
        .collect()
}

fn write_name(ctx: &Ctx<'_>, mrv: &Column) -> String {
    ident(&format!("topk_{}_{}", ctx.table, mrv.name))
}

fn view(ctx: &Ctx<'_>) -> String {
    let mrv = &ctx.cols.mrv[0];
    let m = ident(&mrv.name);
    let shard = ident(&ctx.shard_name(mrv));
    let orig = ident(&ctx.orig_name());
    let ids = emit::names(&ctx.cols.pk);
    let k = ctx.k;

    format!(
        "CREATE VIEW {t} AS
SELECT OG.*, T.{m}
FROM {orig} AS OG INNER JOIN (
    SELECT {ids}, {m}[GREATEST(array_length({m}, 1) - {k} + 1, 1):] AS {m} FROM (
        SELECT {ids}, (ARRAY_AGG({m} ORDER BY {m} ASC)) AS {m}
        FROM (
            SELECT {ids}, UNNEST({m}) AS {m}
            FROM {shard}
        ) P
        GROUP BY {ids}
    ) K
) AS T ON {on}",
        t = ident(ctx.table),
        on = emit::join_on(&ctx.cols.pk, "OG", "T"),
    )
}

/// In-place sorted insertion into the selected shard's array, evicting the
/// smallest element once the array is full. Equal values never displace
/// the incoming one.
fn write_fn(ctx: &Ctx<'_>, mrv: &Column) -> String {
    let shard = ident(&ctx.shard_name(mrv));
    let m = ident(&mrv.name);
    let m_ = emit::param(mrv, "_");
    let pk_pred = emit::predicate(&ctx.cols.pk, "_");
    let element = mrv.scalar_type();
    let k = ctx.k;

    format!(
        "CREATE OR REPLACE FUNCTION {name}({pk_params}, rk_ int, {m_} {element}) RETURNS void
AS $$
DECLARE rk_v int;
        arr_topk {element}[];
        size int;
        loop_i int;
        loop_j int;
        cur_value {element};
BEGIN
{slot_pick}
    SELECT {m} INTO arr_topk
    FROM {shard}
    WHERE {pk_pred} AND rk = rk_v;

    size := COALESCE(array_length(arr_topk, 1), 0);

    -- Find the 1-based insertion position; the scan stops at the first
    -- element >= the incoming value.
    loop_i := 1;
    IF size > 0 THEN
        cur_value := arr_topk[loop_i];

        WHILE loop_i < size AND {m_} > cur_value
        LOOP
            loop_i := loop_i + 1;
            cur_value := arr_topk[loop_i];
        END LOOP;

        IF {m_} > cur_value THEN
            loop_i := loop_i + 1;
        END IF;
    END IF;

    IF size < {k} THEN
        -- Room left: shift the tail right and insert.
        FOR loop_j IN REVERSE size..loop_i LOOP
            UPDATE {shard}
            SET {m}[loop_j + 1] = {m}[loop_j]
            WHERE {pk_pred} AND rk = rk_v;
        END LOOP;

        UPDATE {shard}
        SET {m}[loop_i] = {m_}
        WHERE {pk_pred} AND rk = rk_v;
    ELSE
        -- Full: evict the smallest by shifting the head left, unless the
        -- incoming value is not larger than anything stored.
        IF loop_i > 1 THEN
            FOR loop_j IN 1..loop_i - 2 LOOP
                UPDATE {shard}
                SET {m}[loop_j] = {m}[loop_j + 1]
                WHERE {pk_pred} AND rk = rk_v;
            END LOOP;

            UPDATE {shard}
            SET {m}[loop_i - 1] = {m_}
            WHERE {pk_pred} AND rk = rk_v;
        END IF;
    END IF;
END
$$ LANGUAGE plpgsql",
        name = write_name(ctx, mrv),
        pk_params = emit::typed_suffixed(&ctx.cols.pk, "_"),
        slot_pick = super::slot_pick(&shard, &pk_pred),
    )
}

fn insert_fn(ctx: &Ctx<'_>, surface: &[Column]) -> String {
    let mut body = format!(
        "    INSERT INTO {}\n    VALUES ({});\n",
        ident(&ctx.orig_name()),
        emit::suffixed(&ctx.cols.not_mrv, "_new"),
    );
    let shard_rows = ctx.initial_nodes.max(ctx.k);
    for mrv in ctx.cols.mrv.iter() {
        let shard = ident(&ctx.shard_name(mrv));
        let pk_new = emit::suffixed(&ctx.cols.pk, "_new");
        body.push_str(&format!(
            "\n    INSERT INTO {shard} VALUES ({pk_new}, {}, {});\n",
            ctx.random_slot(),
            emit::param(mrv, "_new"),
        ));
        let empty = format!("'{{}}'::{}", shard_value_type(Structure::Topk, mrv));
        for _ in 1..shard_rows {
            body.push_str(&format!(
                "\n    INSERT INTO {shard} VALUES ({pk_new}, {}, {empty});\n",
                ctx.random_slot(),
            ));
        }
    }
    format!(
        "CREATE OR REPLACE FUNCTION {}({}) RETURNS void\nAS $$\nBEGIN\n{}END\n$$ LANGUAGE plpgsql",
        ident(&format!("insert_{}", ctx.table)),
        emit::typed_suffixed(surface, "_new"),
        body,
    )
}

/// The update receives the column in view shape (an array); its first
/// element is the incoming value handed to the write helper.
fn update_fn(ctx: &Ctx<'_>, surface: &[Column]) -> String {
    let mrv = &ctx.cols.mrv[0];
    let mut body = format!(
        "    PERFORM {}({}, {}, new_value);\n",
        write_name(ctx, mrv),
        emit::suffixed(&ctx.cols.pk, "_new"),
        ctx.random_slot(),
    );
    body.push_str(&super::regular_updates(ctx));

    format!(
        "CREATE OR REPLACE FUNCTION {}(\n    {},\n    {}) RETURNS void\nAS $$\nDECLARE new_value {} := {}[1];\nBEGIN\n{}END\n$$ LANGUAGE plpgsql",
        ident(&format!("update_{}", ctx.table)),
        emit::typed_suffixed(surface, "_new"),
        emit::typed_suffixed(surface, "_old"),
        mrv.scalar_type(),
        emit::param(mrv, "_new"),
        body,
    )
}

#[cfg(test)]
mod test {
    use super::super::fixtures::{classified, ctx};
    use super::*;

    fn scores() -> crate::TableColumns {
        classified(
            "scores",
            vec![
                Column::new("id", "int4", false),
                Column::new("s", "int4", true),
            ],
            &["id"],
            &["s"],
            &[],
            &[],
        )
    }

    #[test]
    fn test_surface_promotes_the_mrv_column_to_array() {
        let cols = scores();
        let ctx = ctx("scores", &cols, 3);
        let surface = surface(&ctx);
        assert_eq!(surface[0].sql_type, "int4");
        assert_eq!(surface[1].sql_type, "int4[]");
    }

    #[test]
    fn test_view_slices_the_k_largest() {
        let cols = scores();
        let ctx = ctx("scores", &cols, 3);
        let sql = view(&ctx);
        assert!(sql.contains("SELECT \"id\", UNNEST(\"s\") AS \"s\""));
        assert!(sql.contains("ARRAY_AGG(\"s\" ORDER BY \"s\" ASC)"));
        assert!(sql.contains("\"s\"[GREATEST(array_length(\"s\", 1) - 3 + 1, 1):] AS \"s\""));
        assert!(sql.contains("ON OG.\"id\" = T.\"id\""));
    }

    #[test]
    fn test_write_fn_shifts_in_place() {
        let cols = scores();
        let ctx = ctx("scores", &cols, 3);
        let sql = write_fn(&ctx, &ctx.cols.mrv[0]);

        // The helper takes the scalar element type, not the array.
        assert!(sql.starts_with(
            "CREATE OR REPLACE FUNCTION \"topk_scores_s\"(\"id_\" int4, rk_ int, \"s_\" int4) RETURNS void"
        ));
        assert!(sql.contains("arr_topk int4[];"));
        assert!(sql.contains("size := COALESCE(array_length(arr_topk, 1), 0);"));
        // Right shift when the array has room, left shift when full.
        assert!(sql.contains("FOR loop_j IN REVERSE size..loop_i LOOP"));
        assert!(sql.contains("SET \"s\"[loop_j + 1] = \"s\"[loop_j]"));
        assert!(sql.contains("FOR loop_j IN 1..loop_i - 2 LOOP"));
        assert!(sql.contains("SET \"s\"[loop_i - 1] = \"s_\""));
    }

    #[test]
    fn test_insert_fn_pads_with_empty_arrays() {
        let cols = scores();
        let ctx = ctx("scores", &cols, 3);
        let surface = surface(&ctx);
        let sql = insert_fn(&ctx, &surface);

        assert!(sql.contains("\"s_new\" int4[]"));
        // max(initialNodes, k) = 3 shard rows: one value + two empty.
        assert_eq!(sql.matches("INSERT INTO \"scores_s\"").count(), 3);
        assert_eq!(sql.matches("'{}'::int4[]").count(), 2);
    }

    #[test]
    fn test_update_fn_extracts_the_first_element() {
        let cols = scores();
        let ctx = ctx("scores", &cols, 3);
        let surface = surface(&ctx);
        let sql = update_fn(&ctx, &surface);

        assert!(sql.contains("DECLARE new_value int4 := \"s_new\"[1];"));
        assert!(sql.contains(
            "PERFORM \"topk_scores_s\"(\"id_new\", FLOOR(RANDOM() * 8)::integer, new_value);"
        ));
    }

    #[test]
    fn test_rules_cast_to_the_array_shape() {
        let cols = scores();
        let ctx = ctx("scores", &cols, 3);
        let all = statements(&ctx);
        let insert_rule = all
            .iter()
            .find(|s| s.contains("\"insert_scores_rule\""))
            .unwrap();
        assert!(insert_rule.contains("NEW.\"s\"::int4[]"));
    }
}

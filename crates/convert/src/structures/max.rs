//! MAX structure: every write monotonically raises one shard, and the view
//! aggregates `MAX()` across the key's shards.

use crate::shards::MAX_SENTINEL;
use crate::{emit, Column, Ctx};
use sqlgen::{comma, ident};

pub fn statements(ctx: &Ctx<'_>) -> Vec<String> {
    let mut out = vec![view(ctx)];
    for mrv in ctx.cols.mrv.iter() {
        out.push(write_fn(ctx, mrv));
    }
    out.push(insert_fn(ctx));
    out.push(update_fn(ctx));
    out.push(super::delete_fn(ctx));
    out.extend(super::rewrite_rules(ctx, &ctx.cols.all));
    out
}

fn write_name(ctx: &Ctx<'_>, mrv: &Column) -> String {
    ident(&format!("max_{}_{}", ctx.table, mrv.name))
}

/// One scalar `MAX()` subselect per MRV column, appended to the base row.
fn view(ctx: &Ctx<'_>) -> String {
    let orig = ident(&ctx.orig_name());
    let selects = ctx.cols.mrv.iter().map(|mrv| {
        let shard = ident(&ctx.shard_name(mrv));
        let m = ident(&mrv.name);
        format!(
            "(SELECT MAX({m}) AS {m} FROM {shard} WHERE {on})",
            on = emit::join_on(&ctx.cols.pk, &shard, &orig),
        )
    });
    format!(
        "CREATE VIEW {} AS\nSELECT {orig}.*, {}\nFROM {orig}",
        ident(ctx.table),
        comma(selects),
    )
}

/// The guarded-update write helper. Returns the number of shard rows it
/// touched: 1 when the new value raised the chosen slot, 0 otherwise.
fn write_fn(ctx: &Ctx<'_>, mrv: &Column) -> String {
    let shard = ident(&ctx.shard_name(mrv));
    let m = ident(&mrv.name);
    let m_ = emit::param(mrv, "_");
    let pk_pred = emit::predicate(&ctx.cols.pk, "_");

    format!(
        "CREATE OR REPLACE FUNCTION {name}({pk_params}, rk_ int, {m_} {mtype}) RETURNS integer
AS $$
DECLARE rk_v integer;
        d integer;
BEGIN
{slot_pick}
    UPDATE {shard}
    SET {m} = {m_}
    WHERE {pk_pred} AND rk = rk_v
        AND {m_} > {m};

    GET DIAGNOSTICS d = ROW_COUNT;
    RETURN d;
END
$$ LANGUAGE plpgsql",
        name = write_name(ctx, mrv),
        pk_params = emit::typed_suffixed(&ctx.cols.pk, "_"),
        mtype = mrv.sql_type,
        slot_pick = super::slot_pick(&shard, &pk_pred),
    )
}

fn shard_insert(ctx: &Ctx<'_>, mrv: &Column, value: &str) -> String {
    format!(
        "\n    INSERT INTO {}\n    VALUES ({},\n            {},\n            {});\n",
        ident(&ctx.shard_name(mrv)),
        emit::suffixed(&ctx.cols.pk, "_new"),
        ctx.random_slot(),
        value,
    )
}

fn insert_fn(ctx: &Ctx<'_>) -> String {
    let mut body = format!(
        "    INSERT INTO {}\n    VALUES ({});\n",
        ident(&ctx.orig_name()),
        emit::suffixed(&ctx.cols.not_mrv, "_new"),
    );
    let shard_rows = ctx.initial_nodes.max(ctx.k);
    for mrv in ctx.cols.mrv.iter() {
        body.push_str(&shard_insert(ctx, mrv, &emit::param(mrv, "_new")));
        for _ in 1..shard_rows {
            let sentinel = format!("'{}'::{}", MAX_SENTINEL, mrv.sql_type);
            body.push_str(&shard_insert(ctx, mrv, &sentinel));
        }
    }
    format!(
        "CREATE OR REPLACE FUNCTION {}({}) RETURNS void\nAS $$\nBEGIN\n{}END\n$$ LANGUAGE plpgsql",
        ident(&format!("insert_{}", ctx.table)),
        emit::typed_suffixed(&ctx.cols.all, "_new"),
        body,
    )
}

fn update_fn(ctx: &Ctx<'_>) -> String {
    let mut body = String::new();
    for mrv in ctx.cols.mrv.iter() {
        body.push_str(&format!(
            "\n    d := d + {}({}, {}, {});\n",
            write_name(ctx, mrv),
            emit::suffixed(&ctx.cols.pk, "_new"),
            ctx.random_slot(),
            emit::param(mrv, "_new"),
        ));
    }
    body.push_str(&super::regular_updates(ctx));
    body.push_str("\n    RETURN d;\n");

    format!(
        "CREATE OR REPLACE FUNCTION {}(\n    {},\n    {}) RETURNS int\nAS $$\nDECLARE d int := 0;\nBEGIN\n{}END\n$$ LANGUAGE plpgsql",
        ident(&format!("update_{}", ctx.table)),
        emit::typed_suffixed(&ctx.cols.all, "_new"),
        emit::typed_suffixed(&ctx.cols.all, "_old"),
        body,
    )
}

#[cfg(test)]
mod test {
    use super::super::fixtures::{classified, ctx};
    use super::*;

    fn sensors() -> crate::TableColumns {
        classified(
            "sensors",
            vec![
                Column::new("id", "integer", false),
                Column::new("temp", "integer", true),
                Column::new("label", "character", true),
            ],
            &["id"],
            &["temp"],
            &[],
            &[],
        )
    }

    #[test]
    fn test_view_aggregates_max_per_key() {
        let cols = sensors();
        let ctx = ctx("sensors", &cols, 1);
        insta::assert_snapshot!(view(&ctx), @r###"
        CREATE VIEW "sensors" AS
        SELECT "sensors_orig".*, (SELECT MAX("temp") AS "temp" FROM "sensors_temp" WHERE "sensors_temp"."id" = "sensors_orig"."id")
        FROM "sensors_orig"
        "###);
    }

    #[test]
    fn test_write_fn_guards_monotonicity() {
        let cols = sensors();
        let ctx = ctx("sensors", &cols, 1);
        let sql = write_fn(&ctx, &ctx.cols.mrv[0]);

        assert!(sql.starts_with(
            "CREATE OR REPLACE FUNCTION \"max_sensors_temp\"(\"id_\" integer, rk_ int, \"temp_\" integer) RETURNS integer"
        ));
        // Rendezvous slot pick with wrap-around fallback.
        assert!(sql.contains("WHERE \"id\" = \"id_\" AND rk >= rk_"));
        assert!(sql.contains("(SELECT MIN(rk)"));
        // The update only fires when the new value is strictly greater.
        assert!(sql.contains("AND \"temp_\" > \"temp\";"));
        assert!(sql.contains("GET DIAGNOSTICS d = ROW_COUNT;"));
    }

    #[test]
    fn test_insert_fn_seeds_value_and_sentinels() {
        let cols = sensors();
        let ctx = ctx("sensors", &cols, 1);
        let sql = insert_fn(&ctx);

        assert!(sql.contains("INSERT INTO \"sensors_orig\"\n    VALUES (\"id_new\", \"label_new\");"));
        // initialNodes = 3: one value row plus two sentinel rows.
        assert_eq!(sql.matches("INSERT INTO \"sensors_temp\"").count(), 3);
        assert_eq!(sql.matches("'-2147483648'::integer").count(), 2);
        // Slot draws stay inside [0, maxNodes).
        assert!(sql.contains("FLOOR(RANDOM() * 8)::integer"));
        assert!(!sql.contains("* (8 + 1)"));
    }

    #[test]
    fn test_update_fn_accumulates_touched_rows() {
        let cols = sensors();
        let ctx = ctx("sensors", &cols, 1);
        let sql = update_fn(&ctx);

        assert!(sql.contains("RETURNS int"));
        assert!(sql.contains("DECLARE d int := 0;"));
        assert!(sql.contains(
            "d := d + \"max_sensors_temp\"(\"id_new\", FLOOR(RANDOM() * 8)::integer, \"temp_new\");"
        ));
        assert!(sql.contains("IF \"label_new\" IS DISTINCT FROM \"label_old\" THEN"));
        assert!(sql.contains("RETURN d;"));
    }

    #[test]
    fn test_statements_cover_the_full_surface() {
        let cols = sensors();
        let ctx = ctx("sensors", &cols, 1);
        let all = statements(&ctx);
        // view, write helper, insert, update, delete, three rules.
        assert_eq!(all.len(), 8);
        assert!(all.iter().any(|s| s.contains("CREATE VIEW \"sensors\"")));
        assert!(all.iter().any(|s| s.contains("\"insert_sensors_rule\"")));
        assert!(all.iter().any(|s| s.contains("\"update_sensors_rule\"")));
        assert!(all.iter().any(|s| s.contains("\"delete_sensors_rule\"")));
    }
}

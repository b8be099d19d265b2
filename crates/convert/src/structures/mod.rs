//! Per-structure codegen: write helpers, insert/update/delete procedures,
//! reconstruction views and the rewrite rules that route view DML into
//! them.

pub mod max;
pub mod ntopk;
pub mod serial;
pub mod topk;

use crate::{emit, Column, Ctx};
use models::Structure;
use sqlgen::ident;

pub fn statements(ctx: &Ctx<'_>, structure: Structure) -> Vec<String> {
    match structure {
        Structure::Max => max::statements(ctx),
        Structure::Topk => topk::statements(ctx),
        Structure::Ntopk => ntopk::statements(ctx),
        Structure::Serial => serial::statements(ctx),
    }
}

/// Dynamic-SQL aggregate helpers over shard tables, emitted once per run.
pub fn helper_statements() -> Vec<String> {
    vec![
        "CREATE OR REPLACE FUNCTION mrv_size(tablename varchar, columnname varchar, pk varchar) RETURNS int
LANGUAGE plpgsql
AS $$
DECLARE ret int;
BEGIN
    EXECUTE 'SELECT count(*) FROM ' || tablename || '_' || columnname || ' WHERE ' || pk INTO ret;
    RETURN ret;
END
$$"
        .to_string(),
        "CREATE OR REPLACE FUNCTION mrv_total(tablename varchar, columnname varchar, pk varchar) RETURNS numeric
LANGUAGE plpgsql
AS $$
DECLARE ret numeric;
BEGIN
    EXECUTE 'SELECT sum(' || columnname || ') FROM ' || tablename || '_' || columnname || ' WHERE ' || pk INTO ret;
    RETURN ret;
END
$$"
        .to_string(),
    ]
}

/// The delete procedure is identical across structures: drop the base row
/// and every shard row of the key.
pub(crate) fn delete_fn(ctx: &Ctx<'_>) -> String {
    let pk = &ctx.cols.pk;
    let mut body = format!(
        "    DELETE FROM {}\n    WHERE {};\n",
        ident(&ctx.orig_name()),
        emit::predicate(pk, "_old"),
    );
    for mrv in ctx.cols.mrv.iter() {
        body.push_str(&format!(
            "\n    DELETE FROM {}\n    WHERE {};\n",
            ident(&ctx.shard_name(mrv)),
            emit::predicate(pk, "_old"),
        ));
    }
    format!(
        "CREATE OR REPLACE FUNCTION {}({}) RETURNS void\nAS $$\nBEGIN\n{}END\n$$ LANGUAGE plpgsql",
        ident(&format!("delete_{}", ctx.table)),
        emit::typed_suffixed(pk, "_old"),
        body,
    )
}

/// Column-targeted base-table updates for regular columns whose value
/// changed, shared by every update procedure.
pub(crate) fn regular_updates(ctx: &Ctx<'_>) -> String {
    let mut out = String::new();
    for regular in ctx.cols.regular.iter() {
        out.push_str(&format!(
            "\n    IF {new} IS DISTINCT FROM {old} THEN\n        UPDATE {orig}\n        SET {col} = {new}\n        WHERE {pred};\n    END IF;\n",
            new = emit::param(regular, "_new"),
            old = emit::param(regular, "_old"),
            orig = ident(&ctx.orig_name()),
            col = ident(&regular.name),
            pred = emit::predicate(&ctx.cols.pk, "_new"),
        ));
    }
    out
}

/// The three DO INSTEAD rules. `surface` is the view's column set in the
/// shape the procedures expect.
pub(crate) fn rewrite_rules(ctx: &Ctx<'_>, surface: &[Column]) -> Vec<String> {
    let t = ctx.table;
    vec![
        format!(
            "CREATE OR REPLACE RULE {} AS\nON INSERT TO {}\nDO INSTEAD SELECT {}({})",
            ident(&format!("insert_{t}_rule")),
            ident(t),
            ident(&format!("insert_{t}")),
            emit::casts(surface, "NEW."),
        ),
        format!(
            "CREATE OR REPLACE RULE {} AS\nON UPDATE TO {}\nDO INSTEAD SELECT {}(\n    {},\n    {})",
            ident(&format!("update_{t}_rule")),
            ident(t),
            ident(&format!("update_{t}")),
            emit::casts(surface, "NEW."),
            emit::casts(surface, "OLD."),
        ),
        format!(
            "CREATE OR REPLACE RULE {} AS\nON DELETE TO {}\nDO INSTEAD SELECT {}({})",
            ident(&format!("delete_{t}_rule")),
            ident(t),
            ident(&format!("delete_{t}")),
            emit::casts(&ctx.cols.pk, "OLD."),
        ),
    ]
}

/// Slot pick shared by the MAX and top-k write helpers: the smallest
/// `rk >= rk_`, falling back to the smallest slot overall.
pub(crate) fn slot_pick(shard: &str, pk_pred: &str) -> String {
    format!(
        "    SELECT rk INTO rk_v FROM (\n        (SELECT rk\n            FROM {shard}\n            WHERE {pk_pred} AND rk >= rk_\n            ORDER BY rk\n            LIMIT 1)\n        UNION ALL\n        (SELECT MIN(rk)\n            FROM {shard}\n            WHERE {pk_pred})\n    ) AS T\n    LIMIT 1;\n"
    )
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::classify::{classify, Designations};
    use crate::{Column, Ctx, TableColumns};
    use std::collections::HashSet;

    pub(crate) fn classified(
        table: &str,
        all: Vec<Column>,
        pk: &[&str],
        mrv: &[&str],
        payload: &[&str],
        order: &[&str],
    ) -> TableColumns {
        let to_strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let pk_names: HashSet<String> = pk.iter().map(|s| s.to_string()).collect();
        classify(
            table,
            all,
            &pk_names,
            &Designations {
                mrv: &to_strings(mrv),
                payload: &to_strings(payload),
                order: &to_strings(order),
            },
        )
        .unwrap()
    }

    pub(crate) fn ctx<'a>(table: &'a str, cols: &'a TableColumns, k: u32) -> Ctx<'a> {
        Ctx {
            table,
            cols,
            max_nodes: 8,
            initial_nodes: 3,
            k,
        }
    }
}

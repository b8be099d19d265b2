//! NTOPK structure: shards keep at least k "strong" values with their
//! payload columns; the view ranks them per key with a window and
//! reconstructs the dropped order column.

use crate::{emit, Column, Ctx};
use sqlgen::{comma, ident};

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

/// The view's column set, which the procedures and rules bind. With k > 1
/// the classifier leaves no regular columns, so this is total.
fn surface(ctx: &Ctx<'_>) -> Vec<Column> {
    if ctx.k > 1 {
        ctx.cols
            .pk
            .iter()
            .chain(ctx.cols.order.iter())
            .chain(ctx.cols.mrv.iter())
            .chain(ctx.cols.payload.iter())
            .cloned()
            .collect()
    } else {
        ctx.cols
            .not_mrv
            .iter()
            .chain(ctx.cols.mrv.iter())
            .chain(ctx.cols.payload.iter())
            .cloned()
            .collect()
    }
}

fn write_name(ctx: &Ctx<'_>, mrv: &Column) -> String {
    ident(&format!("topk_insert_{}_{}", ctx.table, mrv.name))
}

fn view(ctx: &Ctx<'_>) -> String {
    let mrv = &ctx.cols.mrv[0];
    let m = ident(&mrv.name);
    let shard = ident(&ctx.shard_name(mrv));
    let orig = ident(&ctx.orig_name());

    if ctx.k > 1 {
        let order = ident(&ctx.cols.order[0].name);
        let ids = emit::names(&ctx.cols.pk);
        let ids_qualified = emit::qualified_names(&ctx.cols.pk, &orig);
        let mut outer: Vec<String> = vec![ids.clone(), order.clone(), m.clone()];
        let mut inner: Vec<String> = vec![ids_qualified.clone(), m.clone()];
        if !ctx.cols.payload.is_empty() {
            outer.push(emit::names(&ctx.cols.payload));
            inner.push(emit::names(&ctx.cols.payload));
        }
        let ids_asc = comma(
            ctx.cols
                .pk
                .iter()
                .map(|c| format!("{} ASC", ident(&c.name))),
        );

        format!(
            "CREATE VIEW {t} AS
SELECT {outer} FROM (
    SELECT {inner},
           ROW_NUMBER() OVER (PARTITION BY {ids_qualified} ORDER BY {m} DESC) {order}
    FROM {shard} INNER JOIN {orig}
    ON {on}
) A
WHERE {order} <= {k}
ORDER BY {ids_asc}, {order} ASC",
            t = ident(ctx.table),
            outer = comma(outer),
            inner = comma(inner),
            on = emit::join_on(&ctx.cols.pk, &orig, &shard),
            k = ctx.k,
        )
    } else {
        // k = 1 degenerates to a MAX-shaped join carrying the payloads of
        // the maximal row.
        let payloads = if ctx.cols.payload.is_empty() {
            String::new()
        } else {
            format!(", {}", emit::names(&ctx.cols.payload))
        };
        format!(
            "CREATE VIEW {t} AS
SELECT A.*{payloads}
FROM (
    SELECT T.*, MAX({m}) AS {m}
    FROM {shard} INNER JOIN {orig} AS T
    ON {on}
    GROUP BY {group}
) A INNER JOIN {shard} B
ON {ab} AND A.{m} = B.{m}",
            t = ident(ctx.table),
            on = emit::join_on(&ctx.cols.pk, "T", &shard),
            group = emit::qualified_names(&ctx.cols.pk, "T"),
            ab = emit::join_on(&ctx.cols.pk, "A", "B"),
        )
    }
}

/// Cyclic-cursor write: count shards already holding values >= the new
/// one; if fewer than k, overwrite one of the weakest shards at random.
fn write_fn(ctx: &Ctx<'_>, mrv: &Column) -> String {
    let shard = ident(&ctx.shard_name(mrv));
    let m = ident(&mrv.name);
    let m_ = emit::param(mrv, "_");
    let pk_pred = emit::predicate(&ctx.cols.pk, "_");
    let k = ctx.k;

    let mut params = emit::typed_suffixed(&ctx.cols.pk, "_");
    params.push_str(", rk_ int, ");
    if !ctx.cols.payload.is_empty() {
        params.push_str(&emit::typed_suffixed(&ctx.cols.payload, "_"));
        params.push_str(", ");
    }
    params.push_str(&format!("{m_} {}", mrv.sql_type));

    let mut sets = format!("{m} = {m_}");
    for payload in ctx.cols.payload.iter() {
        sets.push_str(&format!(
            ", {} = {}",
            ident(&payload.name),
            emit::param(payload, "_")
        ));
    }

    format!(
        "CREATE OR REPLACE FUNCTION {name}({params}) RETURNS void
AS $$
DECLARE count int;
        ins_rk int;
        cur_rk int;
        cur_value {element};
        done bool := FALSE;
        cursor_rk CURSOR FOR
            (SELECT rk, {m}
            FROM {shard}
            WHERE {pk_pred} AND rk >= rk_
            ORDER BY rk)
            UNION ALL
            (SELECT rk, {m}
            FROM {shard}
            WHERE {pk_pred} AND rk < rk_
            ORDER BY rk);
BEGIN
    count := 0;

    OPEN cursor_rk;
    WHILE NOT done AND count < {k}
    LOOP
        FETCH cursor_rk INTO cur_rk, cur_value;
        IF NOT FOUND THEN
            done := TRUE;
        ELSEIF cur_value >= {m_} THEN
            count := count + 1;
        END IF;
    END LOOP;
    CLOSE cursor_rk;

    IF count < {k} THEN
        -- Skip the k-1 strongest shards, then pick a victim at random.
        SELECT rk INTO ins_rk FROM (
            SELECT rk, {m}
            FROM {shard}
            WHERE {pk_pred}
            ORDER BY {m} DESC
            OFFSET {offset} ROWS) AS T
        ORDER BY RANDOM()
        LIMIT 1;

        UPDATE {shard}
        SET {sets}
        WHERE {pk_pred} AND rk = ins_rk;
    END IF;
END
$$ LANGUAGE plpgsql",
        name = write_name(ctx, mrv),
        element = mrv.sql_type,
        offset = k - 1,
    )
}

fn insert_fn(ctx: &Ctx<'_>, surface: &[Column]) -> String {
    let mrv = &ctx.cols.mrv[0];
    let shard = ident(&ctx.shard_name(mrv));
    let pk_new = emit::suffixed(&ctx.cols.pk, "_new");
    let ids = emit::names(&ctx.cols.pk);
    let orig = ident(&ctx.orig_name());

    let mut body = format!(
        "    IF (NOT EXISTS (SELECT {ids} FROM {orig} WHERE {pred})) OR {k} = 1\n    THEN\n        INSERT INTO {orig}\n        VALUES ({values});\n    END IF;\n",
        pred = emit::predicate(&ctx.cols.pk, "_new"),
        k = ctx.k,
        values = emit::suffixed(&ctx.cols.not_mrv, "_new"),
    );

    let payload_new = if ctx.cols.payload.is_empty() {
        String::new()
    } else {
        format!("{}, ", emit::suffixed(&ctx.cols.payload, "_new"))
    };
    let payload_null = if ctx.cols.payload.is_empty() {
        String::new()
    } else {
        format!(
            "{}, ",
            comma(ctx.cols.payload.iter().map(|_| "NULL".to_string()))
        )
    };

    body.push_str(&format!(
        "\n    INSERT INTO {shard} VALUES ({pk_new}, {}, {payload_new}{});\n",
        ctx.random_slot(),
        emit::param(mrv, "_new"),
    ));
    for _ in 1..ctx.k.max(ctx.initial_nodes) {
        body.push_str(&format!(
            "\n    INSERT INTO {shard} VALUES ({pk_new}, {}, {payload_null}'0'::{});\n",
            ctx.random_slot(),
            mrv.sql_type,
        ));
    }

    format!(
        "CREATE OR REPLACE FUNCTION {}({}) RETURNS void\nAS $$\nBEGIN\n{}END\n$$ LANGUAGE plpgsql",
        ident(&format!("insert_{}", ctx.table)),
        emit::typed_suffixed(surface, "_new"),
        body,
    )
}

fn update_fn(ctx: &Ctx<'_>, surface: &[Column]) -> String {
    let mrv = &ctx.cols.mrv[0];
    let payload_new = if ctx.cols.payload.is_empty() {
        String::new()
    } else {
        format!("{}, ", emit::suffixed(&ctx.cols.payload, "_new"))
    };

    let mut body = format!(
        "    PERFORM {}({}, {}, {payload_new}{});\n",
        write_name(ctx, mrv),
        emit::suffixed(&ctx.cols.pk, "_new"),
        ctx.random_slot(),
        emit::param(mrv, "_new"),
    );
    body.push_str(&super::regular_updates(ctx));

    format!(
        "CREATE OR REPLACE FUNCTION {}(\n    {},\n    {}) RETURNS void\nAS $$\nBEGIN\n{}END\n$$ LANGUAGE plpgsql",
        ident(&format!("update_{}", ctx.table)),
        emit::typed_suffixed(surface, "_new"),
        emit::typed_suffixed(surface, "_old"),
        body,
    )
}

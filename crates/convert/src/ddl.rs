//! The base-table transformation DDL: rename the source away, create the
//! de-MRV'd `_orig` relation, copy deduplicated rows, and lift indexes.

use crate::{emit, Ctx};
use sqlgen::ident;

pub fn rename_to_aux(ctx: &Ctx<'_>) -> String {
    format!(
        "ALTER TABLE {} RENAME TO {}",
        ident(ctx.table),
        ident(&ctx.aux_name())
    )
}

/// The serial path renames the source straight to `_orig`: its row shape is
/// already one-per-key and only the counter columns are dropped later.
pub fn rename_to_orig(ctx: &Ctx<'_>) -> String {
    format!(
        "ALTER TABLE {} RENAME TO {}",
        ident(ctx.table),
        ident(&ctx.orig_name())
    )
}

pub fn create_orig(ctx: &Ctx<'_>) -> String {
    format!(
        "CREATE TABLE {} (\n    {},\n    PRIMARY KEY ({})\n)",
        ident(&ctx.orig_name()),
        emit::typed(&ctx.cols.not_mrv),
        emit::names(&ctx.cols.pk),
    )
}

pub fn copy_to_orig(ctx: &Ctx<'_>) -> String {
    format!(
        "INSERT INTO {} (\n    SELECT DISTINCT {}\n    FROM {}\n)",
        ident(&ctx.orig_name()),
        emit::names(&ctx.cols.not_mrv),
        ident(&ctx.aux_name()),
    )
}

pub fn drop_aux(ctx: &Ctx<'_>) -> String {
    format!("DROP TABLE {}", ident(&ctx.aux_name()))
}

pub fn drop_mrv_columns(ctx: &Ctx<'_>) -> Vec<String> {
    ctx.cols
        .mrv
        .iter()
        .map(|mrv| {
            format!(
                "ALTER TABLE {} DROP COLUMN {}",
                ident(&ctx.orig_name()),
                ident(&mrv.name)
            )
        })
        .collect()
}

/// Rewrites one introspected index definition so it applies to `_orig`:
/// substitutes the table name, drops ranking columns from the key list and
/// makes the create idempotent.
pub fn lift_index(ctx: &Ctx<'_>, indexdef: &str, order_names: &[&str]) -> String {
    let orig = ctx.orig_name();
    let retargeted = indexdef
        .replace(ctx.table, &orig)
        .replace(&format!("{orig}__aux"), &orig);
    let stripped = sqlgen::strip_index_columns(&retargeted, order_names);
    sqlgen::index_if_not_exists(&stripped)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classify::{classify, Designations};
    use crate::{Column, TableColumns};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn sensor_columns() -> TableColumns {
        let all = vec![
            Column::new("id", "integer", false),
            Column::new("temp", "integer", true),
            Column::new("label", "character", true),
        ];
        let pk: HashSet<String> = ["id".to_string()].into_iter().collect();
        classify(
            "sensors",
            all,
            &pk,
            &Designations {
                mrv: &["temp".to_string()],
                payload: &[],
                order: &[],
            },
        )
        .unwrap()
    }

    fn ctx(cols: &TableColumns) -> Ctx<'_> {
        Ctx {
            table: "sensors",
            cols,
            max_nodes: 8,
            initial_nodes: 3,
            k: 1,
        }
    }

    #[test]
    fn test_rename_and_drop() {
        let cols = sensor_columns();
        let ctx = ctx(&cols);
        insta::assert_snapshot!(
            rename_to_aux(&ctx),
            @r#"ALTER TABLE "sensors" RENAME TO "sensors__aux""#
        );
        insta::assert_snapshot!(
            rename_to_orig(&ctx),
            @r#"ALTER TABLE "sensors" RENAME TO "sensors_orig""#
        );
        insta::assert_snapshot!(drop_aux(&ctx), @r#"DROP TABLE "sensors__aux""#);
        assert_eq!(
            drop_mrv_columns(&ctx),
            vec![r#"ALTER TABLE "sensors_orig" DROP COLUMN "temp""#.to_string()]
        );
    }

    #[test]
    fn test_create_and_copy() {
        let cols = sensor_columns();
        let ctx = ctx(&cols);
        assert_eq!(
            create_orig(&ctx),
            "CREATE TABLE \"sensors_orig\" (\n    \"id\" integer, \"label\" varchar,\n    PRIMARY KEY (\"id\")\n)"
        );
        assert_eq!(
            copy_to_orig(&ctx),
            "INSERT INTO \"sensors_orig\" (\n    SELECT DISTINCT \"id\", \"label\"\n    FROM \"sensors__aux\"\n)"
        );
    }

    #[test]
    fn test_lift_index() {
        let cols = sensor_columns();
        let ctx = ctx(&cols);
        let lifted = lift_index(
            &ctx,
            "CREATE INDEX sensors_label ON public.sensors__aux USING btree (label)",
            &[],
        );
        assert_eq!(
            lifted,
            "CREATE INDEX IF NOT EXISTS sensors_orig_label ON public.sensors_orig USING btree (label)"
        );

        // Ranking columns named by the model disappear from the key list.
        let lifted = lift_index(
            &ctx,
            "CREATE UNIQUE INDEX by_rank ON public.sensors__aux USING btree (label, r)",
            &["r"],
        );
        assert_eq!(
            lifted,
            "CREATE UNIQUE INDEX IF NOT EXISTS by_rank ON public.sensors_orig USING btree (label)"
        );
    }
}

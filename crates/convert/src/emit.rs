//! Column-list expansion over classified columns: every emitter spells
//! parameter lists, value lists and key predicates through these.

use crate::Column;
use sqlgen::{and, comma, ident};

/// `"a", "b"`
pub(crate) fn names(cols: &[Column]) -> String {
    comma(cols.iter().map(|c| ident(&c.name)))
}

/// `"a_new", "b_new"`
pub(crate) fn suffixed(cols: &[Column], suffix: &str) -> String {
    comma(cols.iter().map(|c| param(c, suffix)))
}

/// `"a" integer, "b" varchar`
pub(crate) fn typed(cols: &[Column]) -> String {
    comma(cols.iter().map(|c| format!("{} {}", ident(&c.name), c.sql_type)))
}

/// `"a_new" integer, "b_new" varchar`
pub(crate) fn typed_suffixed(cols: &[Column], suffix: &str) -> String {
    comma(
        cols.iter()
            .map(|c| format!("{} {}", param(c, suffix), c.sql_type)),
    )
}

/// `NEW."a"::integer, NEW."b"::varchar`
pub(crate) fn casts(cols: &[Column], prefix: &str) -> String {
    comma(
        cols.iter()
            .map(|c| format!("{}{}::{}", prefix, ident(&c.name), c.sql_type)),
    )
}

/// `"a" = "a_" AND "b" = "b_"`
pub(crate) fn predicate(cols: &[Column], suffix: &str) -> String {
    and(cols
        .iter()
        .map(|c| format!("{} = {}", ident(&c.name), param(c, suffix))))
}

/// `T."a" = "a_" AND T."b" = "b_"`
pub(crate) fn qualified_predicate(cols: &[Column], qualifier: &str, suffix: &str) -> String {
    and(cols.iter().map(|c| {
        format!("{}.{} = {}", qualifier, ident(&c.name), param(c, suffix))
    }))
}

/// `A."a" = B."a" AND A."b" = B."b"`
pub(crate) fn join_on(cols: &[Column], left: &str, right: &str) -> String {
    and(cols.iter().map(|c| {
        format!("{}.{} = {}.{}", left, ident(&c.name), right, ident(&c.name))
    }))
}

/// `T."a", T."b"`
pub(crate) fn qualified_names(cols: &[Column], qualifier: &str) -> String {
    comma(cols.iter().map(|c| format!("{}.{}", qualifier, ident(&c.name))))
}

/// The quoted parameter identifier for a column with `suffix` appended.
pub(crate) fn param(c: &Column, suffix: &str) -> String {
    ident(&format!("{}{}", c.name, suffix))
}

#[cfg(test)]
mod test {
    use super::*;

    fn cols() -> Vec<Column> {
        vec![
            Column::new("id", "integer", false),
            Column::new("region", "character", false),
        ]
    }

    #[test]
    fn test_expansions() {
        let cols = cols();
        assert_eq!(names(&cols), r#""id", "region""#);
        assert_eq!(suffixed(&cols, "_new"), r#""id_new", "region_new""#);
        assert_eq!(typed(&cols), r#""id" integer, "region" varchar"#);
        assert_eq!(
            typed_suffixed(&cols, "_"),
            r#""id_" integer, "region_" varchar"#
        );
        assert_eq!(
            casts(&cols, "NEW."),
            r#"NEW."id"::integer, NEW."region"::varchar"#
        );
        assert_eq!(
            predicate(&cols, "_old"),
            r#""id" = "id_old" AND "region" = "region_old""#
        );
        assert_eq!(
            qualified_predicate(&cols, "T", "_"),
            r#"T."id" = "id_" AND T."region" = "region_""#
        );
        assert_eq!(
            join_on(&cols, "OG", "T"),
            r#"OG."id" = T."id" AND OG."region" = T."region""#
        );
        assert_eq!(qualified_names(&cols, "T"), r#"T."id", T."region""#);
    }
}

//! Partitions a table's columns into the disjoint classification the rest
//! of the pipeline works from.

use crate::{Column, Error, Result};
use std::collections::{BTreeSet, HashSet};

/// The model-declared column sets for one table.
pub struct Designations<'a> {
    pub mrv: &'a [String],
    pub payload: &'a [String],
    pub order: &'a [String],
}

/// A disjoint partition of a table's columns. The five classified subsets
/// union back to `all`; `not_mrv` is the complement of mrv/payload/order
/// and keeps catalog order.
#[derive(Debug, Clone)]
pub struct TableColumns {
    pub all: Vec<Column>,
    pub pk: Vec<Column>,
    pub mrv: Vec<Column>,
    pub payload: Vec<Column>,
    pub order: Vec<Column>,
    pub regular: Vec<Column>,
    pub not_mrv: Vec<Column>,
}

pub fn classify(
    table: &str,
    all: Vec<Column>,
    pk_names: &HashSet<String>,
    names: &Designations<'_>,
) -> Result<TableColumns> {
    let known: HashSet<&str> = all.iter().map(|c| c.name.as_str()).collect();
    for name in names
        .mrv
        .iter()
        .chain(names.payload.iter())
        .chain(names.order.iter())
    {
        if !known.contains(name.as_str()) {
            return Err(Error::NoSuchColumn {
                table: table.to_string(),
                column: name.clone(),
            });
        }
    }

    let mrv_set: HashSet<&str> = names.mrv.iter().map(String::as_str).collect();
    let payload_set: HashSet<&str> = names.payload.iter().map(String::as_str).collect();
    let order_set: HashSet<&str> = names.order.iter().map(String::as_str).collect();

    // The declared sets must be disjoint from one another, and neither mrv
    // nor payload columns may sit in the primary key. Order columns are
    // allowed in the key: the logical key is the index key minus them.
    let mut ambiguous = BTreeSet::new();
    for c in &all {
        let name = c.name.as_str();
        let claims = [
            mrv_set.contains(name),
            payload_set.contains(name),
            order_set.contains(name),
        ];
        let claimed = claims.iter().filter(|c| **c).count();
        if claimed > 1 {
            ambiguous.insert(c.name.clone());
        }
        if (mrv_set.contains(name) || payload_set.contains(name)) && pk_names.contains(name) {
            ambiguous.insert(c.name.clone());
        }
    }
    if !ambiguous.is_empty() {
        return Err(Error::AmbiguousColumnClassification {
            table: table.to_string(),
            columns: ambiguous.into_iter().collect(),
        });
    }

    let mut out = TableColumns {
        all: Vec::new(),
        pk: Vec::new(),
        mrv: Vec::new(),
        payload: Vec::new(),
        order: Vec::new(),
        regular: Vec::new(),
        not_mrv: Vec::new(),
    };

    for c in &all {
        let name = c.name.as_str();
        if order_set.contains(name) {
            out.order.push(c.clone());
        } else if mrv_set.contains(name) {
            out.mrv.push(c.clone());
        } else if payload_set.contains(name) {
            out.payload.push(c.clone());
        } else if pk_names.contains(name) {
            out.pk.push(c.clone());
        } else {
            out.regular.push(c.clone());
        }

        if !order_set.contains(name) && !mrv_set.contains(name) && !payload_set.contains(name) {
            out.not_mrv.push(c.clone());
        }
    }
    out.all = all;

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn columns(names: &[&str]) -> Vec<Column> {
        names
            .iter()
            .map(|n| Column::new(*n, "integer", false))
            .collect()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_partition_is_disjoint_and_total() {
        let all = columns(&["id", "r", "v", "w", "note"]);
        let pk: HashSet<String> = ["id", "r"].iter().map(|s| s.to_string()).collect();
        let out = classify(
            "votes",
            all,
            &pk,
            &Designations {
                mrv: &strings(&["v"]),
                payload: &strings(&["w"]),
                order: &strings(&["r"]),
            },
        )
        .unwrap();

        let names = |cols: &[Column]| -> Vec<String> {
            cols.iter().map(|c| c.name.clone()).collect()
        };
        assert_eq!(names(&out.pk), vec!["id"]);
        assert_eq!(names(&out.order), vec!["r"]);
        assert_eq!(names(&out.mrv), vec!["v"]);
        assert_eq!(names(&out.payload), vec!["w"]);
        assert_eq!(names(&out.regular), vec!["note"]);
        assert_eq!(names(&out.not_mrv), vec!["id", "note"]);

        let total = out.pk.len()
            + out.order.len()
            + out.mrv.len()
            + out.payload.len()
            + out.regular.len();
        assert_eq!(total, out.all.len());
    }

    #[test]
    fn test_unknown_designated_column() {
        let all = columns(&["id", "temp"]);
        let pk: HashSet<String> = ["id".to_string()].into_iter().collect();
        let err = classify(
            "sensors",
            all,
            &pk,
            &Designations {
                mrv: &strings(&["bogus"]),
                payload: &[],
                order: &[],
            },
        )
        .unwrap_err();
        assert!(
            matches!(err, Error::NoSuchColumn { ref column, .. } if column == "bogus"),
            "{err}"
        );
    }

    #[test]
    fn test_overlapping_sets_are_ambiguous() {
        let all = columns(&["id", "v", "w"]);
        let pk: HashSet<String> = ["id".to_string()].into_iter().collect();
        let err = classify(
            "votes",
            all.clone(),
            &pk,
            &Designations {
                mrv: &strings(&["v"]),
                payload: &strings(&["v"]),
                order: &[],
            },
        )
        .unwrap_err();
        assert!(
            matches!(err, Error::AmbiguousColumnClassification { ref columns, .. }
                if columns == &vec!["v".to_string()]),
            "{err}"
        );

        // An MRV column inside the primary key is ambiguous too.
        let err = classify(
            "votes",
            all,
            &pk,
            &Designations {
                mrv: &strings(&["id"]),
                payload: &[],
                order: &[],
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::AmbiguousColumnClassification { .. }), "{err}");
    }
}

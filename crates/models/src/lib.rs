use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-k width used when the model file doesn't set `k`.
pub const DEFAULT_K: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read model file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model file {path:?}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// The multi-record-value structure backing a converted table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Structure {
    /// Reads compute the maximum of the column per primary key.
    Max,
    /// Reads return the top-k values, kept as a sorted array inside each shard.
    Topk,
    /// Reads return the top-k values with payload columns, one row per slot.
    Ntopk,
    /// Shards hand out pre-loaded counters; reads return the smallest unused one.
    Serial,
}

impl Structure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Structure::Max => "max",
            Structure::Topk => "topk",
            Structure::Ntopk => "ntopk",
            Structure::Serial => "serial",
        }
    }
}

/// One table to be converted, with its designated MRV columns.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TableSpec {
    /// Name of the source table, resolved under the model schema.
    pub name: String,
    /// Which MRV structure to rewrite the table into.
    pub structure: Structure,
    /// Columns to convert into multi-record values.
    pub mrv: Vec<String>,
    /// Companion columns that travel with each MRV value (ntopk only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<String>,
    /// Columns holding the per-key ranking position in the source, dropped
    /// from storage and reconstructed by the view (ntopk only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,
}

/// The model file: connection parameters, sharding knobs, and the tables to
/// convert, in order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Model {
    pub database: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Target schema, set as the session search path.
    pub schema: String,
    /// Slot pool size per primary key.
    pub max_nodes: u32,
    /// Shards populated per primary key at conversion time.
    pub initial_nodes: u32,
    /// Top-k width for `topk` and `ntopk` tables. Defaults to [`DEFAULT_K`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
    pub tables: Vec<TableSpec>,
}

impl Model {
    /// Reads and validates a model from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Model, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        let model: Model = serde_yaml::from_str(&raw).map_err(|source| Error::Yaml {
            path: path.to_owned(),
            source,
        })?;
        model.validate()?;
        Ok(model)
    }

    /// Applies the command-line `initial-nodes` override, clamped so it never
    /// exceeds the slot pool.
    pub fn override_initial_nodes(&mut self, nodes: u32) {
        self.initial_nodes = nodes.min(self.max_nodes);
    }

    /// The effective top-k width of `table`: the model `k` for topk/ntopk
    /// structures, and 1 otherwise.
    pub fn k_for(&self, table: &TableSpec) -> u32 {
        match table.structure {
            Structure::Topk | Structure::Ntopk => self.k.unwrap_or(DEFAULT_K),
            Structure::Max | Structure::Serial => 1,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_nodes < 1 {
            return Err(Error::Invalid(format!(
                "maxNodes must be at least 1, got {}",
                self.max_nodes
            )));
        }
        if self.initial_nodes < 1 || self.initial_nodes > self.max_nodes {
            return Err(Error::Invalid(format!(
                "initialNodes must be in 1..=maxNodes ({}), got {}",
                self.max_nodes, self.initial_nodes
            )));
        }
        if let Some(k) = self.k {
            if k < 1 {
                return Err(Error::Invalid(format!("k must be at least 1, got {k}")));
            }
        }
        for table in &self.tables {
            self.validate_table(table)?;
        }
        Ok(())
    }

    fn validate_table(&self, table: &TableSpec) -> Result<(), Error> {
        let name = &table.name;
        if name.is_empty() {
            return Err(Error::Invalid("table entry with an empty name".to_string()));
        }
        if table.mrv.is_empty() {
            return Err(Error::Invalid(format!(
                "table {name:?} declares no mrv columns"
            )));
        }
        match table.structure {
            Structure::Max => {
                if !table.payload.is_empty() || !table.order.is_empty() {
                    return Err(Error::Invalid(format!(
                        "table {name:?}: payload/order columns are only valid for ntopk"
                    )));
                }
            }
            Structure::Topk | Structure::Serial => {
                if !table.payload.is_empty() || !table.order.is_empty() {
                    return Err(Error::Invalid(format!(
                        "table {name:?}: payload/order columns are only valid for ntopk"
                    )));
                }
                if table.mrv.len() != 1 {
                    return Err(Error::Invalid(format!(
                        "table {name:?}: {} structure supports exactly one mrv column, got {}",
                        table.structure.as_str(),
                        table.mrv.len()
                    )));
                }
            }
            Structure::Ntopk => {
                if table.mrv.len() != 1 {
                    return Err(Error::Invalid(format!(
                        "table {name:?}: ntopk supports exactly one mrv column, got {}",
                        table.mrv.len()
                    )));
                }
                if self.k_for(table) > 1 && table.order.len() != 1 {
                    return Err(Error::Invalid(format!(
                        "table {name:?}: ntopk with k > 1 requires exactly one order column, got {}",
                        table.order.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

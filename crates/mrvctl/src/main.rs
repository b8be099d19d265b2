mod logging;

use anyhow::Context;
use clap::Parser;
use logging::{init_logging, LogArgs};

/// mrvctl rewrites the tables named by a model file into multi-record-value
/// backed structures, in place, inside the target Postgres database.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the model YAML file.
    model: std::path::PathBuf,

    /// Overrides the model's initialNodes; clamped to maxNodes.
    initial_nodes: Option<u32>,

    #[clap(flatten)]
    log_args: LogArgs,
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_logging(&args.log_args);

    let mut model = models::Model::load(&args.model).context("loading model file")?;
    if let Some(nodes) = args.initial_nodes {
        model.override_initial_nodes(nodes);
    }
    tracing::info!(
        tables = model.tables.len(),
        max_nodes = model.max_nodes,
        initial_nodes = model.initial_nodes,
        "starting conversion"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(convert::run(&model));
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    if let Err(err) = result.as_ref() {
        tracing::error!(error = ?err, "conversion failed");
    }
    result.map_err(Into::into)
}

use std::path::Path;

use anyhow::Result;
use ort::execution_providers;
use ort::session::builder::GraphOptimizationLevel;
pub use ort::session::Session;
use tracing::debug;

pub fn initialize_model(model_path: &Path, threads: usize) -> Result<Session> {
    ort::init()
        .with_execution_providers([execution_providers::XNNPACKExecutionProvider::default()
            .build()
            .error_on_failure()])
        .commit()?;

    debug!("Loading model {model_path:?} with {threads} threads");
    let model = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .commit_from_file(model_path)?;

    Ok(model)
}

//! Two-round wrapper elimination.
//!
//! Reconditioning wraps risky operations in safety wrappers; during
//! reduction most of them are dead weight. Round one tags every wrapper
//! with a unique id and runs one representative backend to capture which
//! ids actually fire; round two reconditions again, stripping the rest.
//! Skipping the pass never changes the final signature, only the cost of
//! computing it.

use std::path::Path;

use crate::backend::BackendSpec;
use crate::collaborators::{self, ReconditionMode};
use crate::config::CollaboratorSettings;
use crate::error::OracleError;
use crate::runner::{CompilationRunner, IDS_FILE, Outcome, RunMode};

/// Recondition `source` into `staged_file` inside the runner's working
/// directory, eliminating unexercised wrappers when possible.
///
/// Returns the mode every subsequent run of `staged_file` must use. A crash
/// or timeout of the representative add-id run abandons the pass and falls
/// back to [`RunMode::Standard`] with the instrumented artifact; it never
/// aborts the caller. A reconditioner failure does abort: without a
/// compilable artifact there is nothing left to run.
pub fn prepare(
    runner: &CompilationRunner<'_>,
    collaborators_cfg: &CollaboratorSettings,
    backends: &[BackendSpec],
    source: &Path,
    staged_file: &str,
) -> Result<RunMode, OracleError> {
    collaborators::run_reconditioner(
        collaborators_cfg,
        source,
        &runner.work.path(staged_file),
        ReconditionMode::AddIds,
    )?;

    let Some(representative) = backends.first() else {
        return Ok(RunMode::Standard);
    };

    match runner.run_single(representative, staged_file, RunMode::AddId)? {
        Outcome::Success { .. } => {
            let ids_file = runner.work.path(IDS_FILE);
            collaborators::run_reconditioner(
                collaborators_cfg,
                source,
                &runner.work.path(staged_file),
                ReconditionMode::ReduceWrappers {
                    ids_file: &ids_file,
                },
            )?;
            Ok(RunMode::Reduced)
        }
        Outcome::Crash { .. } | Outcome::Timeout => {
            eprintln!(
                "Execution error on shader {} with {} and added ids, falling back on standard run",
                source.display(),
                representative.name
            );
            Ok(RunMode::Standard)
        }
    }
}

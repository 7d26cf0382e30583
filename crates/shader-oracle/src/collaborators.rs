//! External collaborator invocations: the shader generator and the
//! reconditioner. Both report success through a literal `SUCCESS!` marker
//! in their combined output rather than their exit code.

use std::path::Path;
use std::process::Command;

use crate::config::CollaboratorSettings;
use crate::error::OracleError;

const SUCCESS_MARKER: &str = "SUCCESS!";

/// Reconditioning flavors understood by the external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconditionMode<'a> {
    /// Normalize the shader so every backend can compile it.
    Plain,
    /// Additionally tag each instrumentation wrapper with a unique id.
    AddIds,
    /// Strip every wrapper whose id is absent from the ids file.
    ReduceWrappers { ids_file: &'a Path },
}

fn combined_output(command: &mut Command, label: &str) -> Result<String, OracleError> {
    let output = command.output().map_err(|source| OracleError::Spawn {
        command: label.to_string(),
        source,
    })?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(combined)
}

/// Generate `shader_count` test cases into `output_dir`. Emitted files are
/// named `test_<index>.<ext>` by the generator.
pub fn run_generator(
    collaborators: &CollaboratorSettings,
    shader_count: u32,
    output_dir: &Path,
    seed: Option<u64>,
    host: &str,
) -> Result<(), OracleError> {
    let mut command = Command::new(&collaborators.generator);
    command
        .arg("--shader-count")
        .arg(shader_count.to_string())
        .arg("--output-directory")
        .arg(output_dir);
    if let Some(seed) = seed {
        command.arg("--seed").arg(seed.to_string());
    }
    if host != "shadertrap" {
        command.arg("--printer").arg(host);
    }
    let combined = combined_output(&mut command, &collaborators.generator)?;
    if !combined.contains(SUCCESS_MARKER) {
        return Err(OracleError::GeneratorFailed { detail: combined });
    }
    Ok(())
}

/// Recondition `src` into `dest`. A failure here means the input cannot be
/// turned into a compilable artifact and aborts the pipeline for that
/// shader.
pub fn run_reconditioner(
    collaborators: &CollaboratorSettings,
    src: &Path,
    dest: &Path,
    mode: ReconditionMode<'_>,
) -> Result<(), OracleError> {
    let mut command = Command::new(&collaborators.reconditioner);
    command.arg("--src").arg(src).arg("--dest").arg(dest);
    match mode {
        ReconditionMode::Plain => {}
        ReconditionMode::AddIds => {
            command.arg("--id_wrappers");
        }
        ReconditionMode::ReduceWrappers { ids_file } => {
            command.arg("--reduce_wrappers").arg(ids_file);
        }
    }
    let combined = combined_output(&mut command, &collaborators.reconditioner)?;
    if !combined.contains(SUCCESS_MARKER) {
        return Err(OracleError::ReconditioningFailed {
            path: src.display().to_string(),
            detail: combined,
        });
    }
    Ok(())
}

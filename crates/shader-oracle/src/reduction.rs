//! Reduction driver: single attempts and batch runs over kept shaders.
//!
//! The driver never inspects the reducer's exit code; the only success
//! criterion is that the reducer's declared output file exists afterwards.
//! Scratch files live exactly as long as one attempt, tracked by a
//! [`ReductionSession`] that cleans up whichever way the attempt ends.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use serde::Serialize;

use crate::config::ReducerConfig;
use crate::error::OracleError;
use crate::interestingness::{self, OracleBinaries, ScriptEnv};
use crate::pipeline::Pipeline;
use crate::signature::{ErrorSignature, NO_DIVERGENCE_SENTINEL};
use crate::workdir::WorkDir;

/// Suffix appended to a kept shader's stem once its reduction landed.
pub const REDUCED_SUFFIX: &str = "_reduced";

/// Fixed scratch names the reducer sees, so its configured input/output
/// file names hold regardless of what the originating file was called.
pub const BATCH_INPUT_STEM: &str = "test_to_reduce";
pub const BATCH_OUTPUT_STEM: &str = "test_reduced";

/// One reduction attempt's shared context.
pub struct ReductionPlan<'a> {
    pub pipeline: &'a Pipeline<'a>,
    pub reducer: &'a ReducerConfig,
    pub binaries: &'a OracleBinaries,
    pub config_path: &'a Path,
    pub backend_names: &'a [String],
    pub reduce_timeout: bool,
    pub reference: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReductionOutcome {
    /// The original run already conforms; nothing to preserve.
    NoDivergence,
    /// The signature class is not worth reducing (timeouts without opt-in,
    /// encoding errors).
    Skipped { signature: ErrorSignature },
    /// The reducer produced its output file; the merged harness is the
    /// final artifact.
    Reduced {
        artifact: PathBuf,
        signature: ErrorSignature,
        elapsed_seconds: f64,
    },
}

/// Scratch-file set of one attempt. Registered files are removed when the
/// session drops, success or failure alike; the final artifact is
/// withdrawn before that happens. Removal failures are tolerated silently,
/// they are not part of the oracle's contract.
pub struct ReductionSession<'a> {
    work: &'a WorkDir,
    expected: String,
    scratch: Vec<String>,
}

impl<'a> ReductionSession<'a> {
    pub fn new(work: &'a WorkDir, expected: String) -> Self {
        Self {
            work,
            expected,
            scratch: Vec::new(),
        }
    }

    pub fn expected_signature(&self) -> &str {
        &self.expected
    }

    pub fn track(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.scratch.contains(&name) {
            self.scratch.push(name);
        }
    }

    /// Withdraw a file from cleanup; used for the final artifact.
    pub fn keep(&mut self, name: &str) {
        self.scratch.retain(|tracked| tracked != name);
    }
}

impl Drop for ReductionSession<'_> {
    fn drop(&mut self) {
        self.work.remove_files(&self.scratch);
    }
}

/// Reduce one harness file already sitting inside the working directory.
///
/// `input_name` is both what the generated script merges candidates into
/// and what the signature is recomputed from, so it is destroyed by the
/// attempt; `output_name` receives a pristine copy up front and the
/// reduced body at the end. A reducer that exits without producing its
/// declared output file is a failed attempt ([`OracleError::ReducerNoOutput`]),
/// not a crash of the driver.
pub fn run_reduction(
    plan: &ReductionPlan<'_>,
    input_name: &str,
    output_name: &str,
    log_name: &str,
) -> Result<ReductionOutcome, OracleError> {
    let work = plan.pipeline.work();
    let input_path = work.path(input_name);
    let original_test_files = work.files_with_prefix("test")?;

    let signature = plan
        .pipeline
        .recompute_signature(&input_path, plan.reference)?;
    // A backend name that cannot be mapped back to a descriptor is a
    // configuration mismatch, not an interesting outcome.
    if let ErrorSignature::EncodingError { detail } = &signature {
        return Err(OracleError::SignatureEncoding {
            detail: detail.clone(),
        });
    }

    let env = ScriptEnv {
        work: &work,
        config_path: plan.config_path,
        tool_name: &plan.pipeline.tool().name,
        harness_name: input_name,
        default_shader_name: &plan.reducer.input_file,
        log_name,
        backend_names: plan.backend_names,
        two_round: plan.pipeline.two_round,
        reference: plan.reference,
        binaries: plan.binaries,
    };
    let script = interestingness::build_script(&env, &signature, &plan.reducer.interestingness_test)?;
    if script.is_none() {
        println!("No error on the current shader (reference signature {NO_DIVERGENCE_SENTINEL})");
        return Ok(ReductionOutcome::NoDivergence);
    }

    let mut session = ReductionSession::new(&work, signature.code_string());
    session.track(plan.reducer.input_file.clone());
    session.track(plan.reducer.output_file.clone());
    session.track(plan.reducer.interestingness_test.clone());

    if !signature.is_reduction_eligible(plan.reduce_timeout) {
        if signature.is_timeout() {
            println!("Skipping test-case reduction for timeout shader");
        } else {
            println!("Skipping test-case reduction for signature {signature}");
        }
        return Ok(ReductionOutcome::Skipped { signature });
    }

    // Pristine harness copy: the input copy is overwritten by every merge
    // the interestingness script performs.
    let output_path = work.path(output_name);
    fs::copy(&input_path, &output_path)
        .map_err(|source| OracleError::io("failed to copy", &input_path, source))?;
    session.track(output_name.to_string());

    if plan.reducer.name == "glsl-reduce" {
        let stem = plan
            .reducer
            .input_file
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&plan.reducer.input_file);
        let metadata_name = format!("{stem}.json");
        work.write(&metadata_name, b"{}")?;
        session.track(metadata_name);
    }

    // Split the shader body out as the reducer's declared input file.
    let harness_text = work.read_text(input_name)?;
    let body = plan.pipeline.format().extract_embedded_source(&harness_text);
    work.write(&plan.reducer.input_file, body.as_bytes())?;

    let tokens = shell_split(&plan.reducer.command);
    let Some((program, args)) = tokens.split_first() else {
        return Err(OracleError::ReducerNoOutput {
            reducer: plan.reducer.name.clone(),
            output_file: plan.reducer.output_file.clone(),
        });
    };
    println!("Reduction launched: {}", tokens.join(" "));
    let started = Instant::now();
    // Streamed stdio, and the exit status is deliberately ignored: only the
    // presence of the declared output file counts.
    Command::new(program)
        .args(args)
        .current_dir(work.root())
        .status()
        .map_err(|source| OracleError::Spawn {
            command: program.clone(),
            source,
        })?;

    // Whatever test-prefixed files the reducer scattered around are scratch
    // too, except the ones that were already there and the artifact.
    for name in work.files_with_prefix("test")? {
        if name != output_name && !original_test_files.contains(&name) {
            session.track(name);
        }
    }

    if !work.exists(&plan.reducer.output_file) {
        println!("Reduction failed for shader");
        return Err(OracleError::ReducerNoOutput {
            reducer: plan.reducer.name.clone(),
            output_file: plan.reducer.output_file.clone(),
        });
    }

    let reduced_body = work.read_text(&plan.reducer.output_file)?;
    let harness_copy = work.read_text(output_name)?;
    let merged = plan
        .pipeline
        .format()
        .merge_embedded_source(&harness_copy, &reduced_body);
    work.write(output_name, merged.as_bytes())?;
    session.keep(output_name);

    let elapsed_seconds = started.elapsed().as_secs_f64();
    println!("Reduction finished in {elapsed_seconds:.1}s");
    Ok(ReductionOutcome::Reduced {
        artifact: output_path,
        signature,
        elapsed_seconds,
    })
}

/// Worklist for a batch run over the kept-shader directory: skips files
/// already bearing the reduced suffix and originals whose reduced
/// counterpart already exists.
pub fn files_to_reduce(kept_shader_dir: &Path, extension: &str) -> Result<Vec<PathBuf>, OracleError> {
    let entries = fs::read_dir(kept_shader_dir)
        .map_err(|source| OracleError::io("failed to list", kept_shader_dir, source))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|source| OracleError::io("failed to list", kept_shader_dir, source))?;
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut selected = Vec::new();
    for name in &names {
        if name.contains(REDUCED_SUFFIX) {
            continue;
        }
        let reduced_name = match name.strip_suffix(extension) {
            Some(stem) => format!("{stem}{REDUCED_SUFFIX}{extension}"),
            None => format!("{name}{REDUCED_SUFFIX}"),
        };
        if names.contains(&reduced_name) {
            continue;
        }
        selected.push(kept_shader_dir.join(name));
    }
    Ok(selected)
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReductionReport {
    pub generated_at_utc: String,
    pub reducer: String,
    pub attempted: usize,
    pub reduced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: Vec<BatchReductionItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReductionItem {
    pub file: String,
    pub status: BatchReductionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchReductionStatus {
    Reduced,
    Failed,
    Skipped,
    NoDivergence,
}

/// Reduce every file in the worklist, one blocking attempt at a time. A
/// failed or unpreparable item is recorded and the batch moves on; only
/// infrastructure errors (configuration, spawn, io) stop the run.
pub fn batch_reduction(
    plan: &ReductionPlan<'_>,
    files: &[PathBuf],
) -> Result<BatchReductionReport, OracleError> {
    let work = plan.pipeline.work();
    let extension = &plan.pipeline.tool().extension;
    let input_name = format!("{BATCH_INPUT_STEM}{extension}");
    let output_name = format!("{BATCH_OUTPUT_STEM}{extension}");

    println!("Reducing {} shaders", files.len());
    let mut items = Vec::with_capacity(files.len());
    for file in files {
        println!("Reduction of {}", file.display());
        let stem = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "shader".to_string());
        let log_name = format!("{}_{stem}.log", plan.reducer.name);

        let staged = work.path(&input_name);
        fs::copy(file, &staged)
            .map_err(|source| OracleError::io("failed to copy", file, source))?;

        let item = match run_reduction(plan, &input_name, &output_name, &log_name) {
            Ok(ReductionOutcome::Reduced {
                artifact,
                signature,
                elapsed_seconds,
            }) => {
                let reduced_path = reduced_counterpart(file, extension);
                fs::copy(&artifact, &reduced_path)
                    .map_err(|source| OracleError::io("failed to copy", &artifact, source))?;
                work.remove_files(&[output_name.clone()]);
                BatchReductionItem {
                    file: file.display().to_string(),
                    status: BatchReductionStatus::Reduced,
                    signature: Some(signature.code_string()),
                    artifact: Some(reduced_path.display().to_string()),
                    elapsed_seconds: Some(elapsed_seconds),
                    detail: None,
                }
            }
            Ok(ReductionOutcome::Skipped { signature }) => BatchReductionItem {
                file: file.display().to_string(),
                status: BatchReductionStatus::Skipped,
                signature: Some(signature.code_string()),
                artifact: None,
                elapsed_seconds: None,
                detail: None,
            },
            Ok(ReductionOutcome::NoDivergence) => BatchReductionItem {
                file: file.display().to_string(),
                status: BatchReductionStatus::NoDivergence,
                signature: Some("0".to_string()),
                artifact: None,
                elapsed_seconds: None,
                detail: None,
            },
            Err(
                error @ (OracleError::ReducerNoOutput { .. }
                | OracleError::MissingInput { .. }
                | OracleError::ReconditioningFailed { .. }),
            ) => {
                eprintln!("{error}");
                BatchReductionItem {
                    file: file.display().to_string(),
                    status: BatchReductionStatus::Failed,
                    signature: None,
                    artifact: None,
                    elapsed_seconds: None,
                    detail: Some(error.to_string()),
                }
            }
            Err(error) => return Err(error),
        };
        work.remove_files(&[input_name.clone()]);
        items.push(item);
    }

    let count = |status: BatchReductionStatus| {
        items.iter().filter(|item| item.status == status).count()
    };
    Ok(BatchReductionReport {
        generated_at_utc: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        reducer: plan.reducer.name.clone(),
        attempted: items.len(),
        reduced: count(BatchReductionStatus::Reduced),
        failed: count(BatchReductionStatus::Failed),
        skipped: count(BatchReductionStatus::Skipped)
            + count(BatchReductionStatus::NoDivergence),
        items,
    })
}

fn reduced_counterpart(file: &Path, extension: &str) -> PathBuf {
    let name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let reduced_name = match name.strip_suffix(extension) {
        Some(stem) => format!("{stem}{REDUCED_SUFFIX}{extension}"),
        None => format!("{name}{REDUCED_SUFFIX}"),
    };
    file.with_file_name(reduced_name)
}

/// Minimal shell-style tokenizer for the configured reducer command line:
/// whitespace separates, single and double quotes group.
pub fn shell_split(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    for c in command.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

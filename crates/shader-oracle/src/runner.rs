//! Per-backend compilation runner.
//!
//! One run executes one shader against one backend through the configured
//! shader tool, with the backend's environment overrides scoped to that
//! single child process and a wall-clock timeout enforced by polling. The
//! three observable outcomes are a captured buffer, a crash message, or a
//! timeout; nothing else escapes.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::backend::BackendSpec;
use crate::config::ShaderToolConfig;
use crate::error::OracleError;
use crate::harness::{self, HarnessFormat};
use crate::workdir::WorkDir;

/// Sentinel buffer body written on timeout so byte comparisons treat all
/// timeouts for a backend as equal to each other and unequal to any real
/// buffer.
pub const TIMEOUT_SENTINEL: &[u8] = b"timeout";

/// File the captured instrumentation-ids buffer is parked under between the
/// two rounds of wrapper elimination.
pub const IDS_FILE: &str = "ids.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Standard,
    AddId,
    Reduced,
}

/// Outcome of one (shader, backend) execution. Crash and timeout are
/// mutually exclusive and both exclude success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { buffer: Vec<u8> },
    Crash { message: String },
    Timeout,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One backend's recorded outcome, tagged with the backend name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRun {
    pub backend: String,
    pub outcome: Outcome,
}

pub struct CompilationRunner<'a> {
    pub work: &'a WorkDir,
    pub tool: &'a ShaderToolConfig,
    pub format: &'a dyn HarnessFormat,
    pub timeout: Duration,
}

impl CompilationRunner<'_> {
    /// Execute one backend against `shader_file` (a name inside the working
    /// directory) and capture its buffer.
    pub fn run_single(
        &self,
        backend: &BackendSpec,
        shader_file: &str,
        mode: RunMode,
    ) -> Result<Outcome, OracleError> {
        let shader_text = self.work.read_text(shader_file)?;
        let invocation = self.format.build_invocation(
            &self.tool.path,
            &backend.renderer,
            shader_file,
            &shader_text,
            mode == RunMode::AddId,
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(self.work.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in backend.scoped_env() {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| OracleError::Spawn {
            command: invocation.program.clone(),
            source,
        })?;

        let started = Instant::now();
        loop {
            let waited = child.try_wait().map_err(|source| {
                OracleError::io("failed to wait for", &invocation.program, source)
            })?;
            match waited {
                Some(_) => break,
                None => {
                    if started.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        if mode == RunMode::AddId {
                            self.work.write(IDS_FILE, b"")?;
                        }
                        return Ok(Outcome::Timeout);
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }

        let mut stdout = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            let _ = pipe.read_to_string(&mut stdout);
        }
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }

        let succeeded = self.format.run_succeeded(&stdout, &stderr);

        if mode == RunMode::AddId {
            self.park_ids_buffer()?;
            if !succeeded {
                return Ok(Outcome::Crash {
                    message: stdout + &stderr,
                });
            }
            return Ok(Outcome::Success {
                buffer: self.work.read(IDS_FILE)?,
            });
        }

        if !succeeded {
            return Ok(Outcome::Crash {
                message: stdout + &stderr,
            });
        }

        Ok(Outcome::Success {
            buffer: self.capture_buffer()?,
        })
    }

    /// Whatever file holds the ids buffer becomes `ids.txt`; no dump at all
    /// becomes an empty ids file.
    fn park_ids_buffer(&self) -> Result<(), OracleError> {
        if self.work.exists(harness::RESULT_FILE) {
            self.work.rename(harness::RESULT_FILE, IDS_FILE)
        } else if self.work.exists("buffer_ids.txt") {
            self.work.rename("buffer_ids.txt", IDS_FILE)
        } else {
            self.work.write(IDS_FILE, b"")
        }
    }

    /// Combine whatever the tool dumped into one ordered buffer. The
    /// amber-style tool writes every bound buffer into one result file; the
    /// shadertrap-style tool dumps one numbered file per declared buffer,
    /// concatenated here in declaration order.
    fn capture_buffer(&self) -> Result<Vec<u8>, OracleError> {
        if self.work.exists(harness::RESULT_FILE) {
            return self.work.read(harness::RESULT_FILE);
        }
        let dumps = self.work.numbered_buffer_dumps()?;
        self.work.concatenate(&dumps)
    }

    /// Run every backend in declaration order against one shader, writing a
    /// `buffer_<backend>[_<label>].txt` result per backend and clearing
    /// intermediate dumps between backends so nothing leaks across runs.
    pub fn execute_all(
        &self,
        backends: &[BackendSpec],
        shader_file: &str,
        result_label: Option<&str>,
        dump_dir: Option<&std::path::Path>,
        mode: RunMode,
    ) -> Result<Vec<BackendRun>, OracleError> {
        let mut runs = Vec::with_capacity(backends.len());
        let mut result_files = Vec::new();

        for backend in backends {
            let result_name = match result_label {
                Some(label) => format!("buffer_{}_{label}.txt", backend.name),
                None => format!("buffer_{}.txt", backend.name),
            };

            let outcome = self.run_single(backend, shader_file, mode)?;
            match &outcome {
                Outcome::Success { buffer } => self.work.write(&result_name, buffer)?,
                Outcome::Crash { .. } => self.work.write(&result_name, b"")?,
                Outcome::Timeout => self.work.write(&result_name, TIMEOUT_SENTINEL)?,
            }

            let mut stale = self.work.buffer_dumps()?;
            stale.retain(|name| name != &result_name && !result_files.contains(name));
            self.work.remove_files(&stale);

            if let Some(dir) = dump_dir {
                self.work.move_to(&result_name, dir)?;
            } else {
                result_files.push(result_name);
            }

            runs.push(BackendRun {
                backend: backend.name.clone(),
                outcome,
            });
        }

        Ok(runs)
    }
}

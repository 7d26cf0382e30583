//! The oracle pipeline: recondition, execute every backend, classify,
//! encode. Everything that needs a signature goes through [`Pipeline`] so
//! the batch runner, the signature binary and every generated
//! interestingness script agree on what a signature means.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::backend::BackendSpec;
use crate::collaborators::{self, ReconditionMode};
use crate::config::{ConfigError, OracleConfig, ShaderToolConfig};
use crate::error::OracleError;
use crate::harness::{self, HarnessFormat};
use crate::runner::{BackendRun, CompilationRunner, IDS_FILE, RunMode};
use crate::signature::{self, ErrorSignature};
use crate::workdir::WorkDir;
use crate::wrapper_elimination;

pub const BATCH_REPORT_SCHEMA_VERSION: &str = "shader-oracle.batch-report.v1";

/// Per-invocation wall clock; a reconditioned shader that runs longer than
/// this is reported as a timeout outcome, not retried.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Name the empty validation harness is staged under.
const EMPTY_HARNESS: &str = "empty.shadertrap";

pub struct Pipeline<'a> {
    config: &'a OracleConfig,
    backends: Vec<BackendSpec>,
    tool: &'a ShaderToolConfig,
    format: &'static dyn HarnessFormat,
    pub timeout: Duration,
    pub two_round: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a OracleConfig,
        backends: Vec<BackendSpec>,
        tool: &'a ShaderToolConfig,
        two_round: bool,
    ) -> Result<Self, OracleError> {
        let format = harness::format_for(&tool.name).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "shader tool `{}` has no supported embedding format",
                tool.name
            ))
        })?;
        Ok(Self {
            config,
            backends,
            tool,
            format,
            timeout: DEFAULT_TIMEOUT,
            two_round,
        })
    }

    pub fn backends(&self) -> &[BackendSpec] {
        &self.backends
    }

    pub fn tool(&self) -> &ShaderToolConfig {
        self.tool
    }

    pub fn format(&self) -> &'static dyn HarnessFormat {
        self.format
    }

    pub fn work(&self) -> WorkDir {
        WorkDir::new(&self.config.dirs.work_dir)
    }

    /// The reconditioned artifact every backend actually runs.
    fn staged_name(&self) -> String {
        format!("tmp{}", self.tool.extension)
    }

    /// Recondition `shader` and run it against every backend in declaration
    /// order. With `dump_dir` set, per-backend result buffers are moved
    /// there (`buffer_<backend>[_<label>].txt`) instead of staying in the
    /// working directory.
    pub fn execute(
        &self,
        shader: &Path,
        result_label: Option<&str>,
        dump_dir: Option<&Path>,
    ) -> Result<Vec<BackendRun>, OracleError> {
        if !shader.is_file() {
            return Err(OracleError::MissingInput {
                path: shader.display().to_string(),
            });
        }
        let work = self.work();
        let staged = self.staged_name();
        let runner = CompilationRunner {
            work: &work,
            tool: self.tool,
            format: self.format,
            timeout: self.timeout,
        };

        let mode = if self.two_round {
            wrapper_elimination::prepare(
                &runner,
                &self.config.collaborators,
                &self.backends,
                shader,
                &staged,
            )?
        } else {
            collaborators::run_reconditioner(
                &self.config.collaborators,
                shader,
                &work.path(&staged),
                ReconditionMode::Plain,
            )?;
            RunMode::Standard
        };

        let runs = runner.execute_all(&self.backends, &staged, result_label, dump_dir, mode)?;
        work.remove_files(&[staged, IDS_FILE.to_string()]);
        Ok(runs)
    }

    /// Recompute the error signature for one shader. With `reference` the
    /// buffers are compared against that stored buffer instead of across
    /// peers and the signature base moves accordingly.
    pub fn recompute_signature(
        &self,
        shader: &Path,
        reference: Option<&Path>,
    ) -> Result<ErrorSignature, OracleError> {
        let runs = self.execute(shader, None, None)?;
        let reference_bytes = match reference {
            Some(path) => Some(
                fs::read(path).map_err(|source| OracleError::io("failed to read", path, source))?,
            ),
            None => None,
        };
        Ok(signature::encode(
            &self.backends,
            &runs,
            reference_bytes.as_deref(),
        ))
    }

    /// Validate every backend upfront against an empty harness. Returns the
    /// backends that could not be brought up, with the tool's combined
    /// output as the detail. Only meaningful for the shadertrap-style tool,
    /// which reports the active renderer with `--show-gl-info`.
    pub fn validate_backends(&self) -> Result<Vec<(String, String)>, OracleError> {
        let work = self.work();
        work.write(EMPTY_HARNESS, b"")?;
        let mut failures = Vec::new();
        for backend in &self.backends {
            let mut command = Command::new(&self.tool.path);
            command
                .args([
                    "--show-gl-info",
                    "--require-vendor-renderer-substring",
                    &backend.renderer,
                    EMPTY_HARNESS,
                ])
                .current_dir(work.root());
            for (key, value) in backend.scoped_env() {
                command.env(key, value);
            }
            let output = command.output().map_err(|source| OracleError::Spawn {
                command: self.tool.path.clone(),
                source,
            })?;
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if !stdout.contains(&backend.renderer) {
                failures.push((backend.name.clone(), stdout + &stderr));
            }
            let stale = work.buffer_dumps()?;
            work.remove_files(&stale);
        }
        work.remove_files(&[EMPTY_HARNESS.to_string()]);
        Ok(failures)
    }
}

pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stable identifier for one batch: a digest over the seed and the backend
/// list, so reports from the same configuration are comparable.
pub fn derive_run_id(seed: u64, backends: &[BackendSpec]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    for backend in backends {
        hasher.update(backend.name.as_bytes());
        hasher.update(backend.code.to_le_bytes());
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Machine-readable outcome of one batch, printed as pretty JSON by the
/// batch runner.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub schema_version: String,
    pub run_id: String,
    pub generated_at_utc: String,
    pub seed: u64,
    pub shader_count: u32,
    pub divergent_count: usize,
    pub elapsed_seconds: f64,
    pub shaders: Vec<ShaderVerdict>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShaderVerdict {
    pub shader: String,
    /// Signature code string when the batch executed the shader itself;
    /// absent when only pre-existing buffer files were compared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub divergent: bool,
    pub kept: bool,
    /// Buffer digests keyed by backend name, recorded for kept shaders so a
    /// divergence stays inspectable after the raw buffers rotate out.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub buffer_digests: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendFamily;
    use crate::config::{CollaboratorSettings, DirSettings, ReducerConfig, ShaderToolConfig};

    fn backend(name: &str, code: u32) -> BackendSpec {
        BackendSpec {
            name: name.to_string(),
            renderer: name.to_string(),
            family: BackendFamily::Independent,
            code,
            ld_library_path: String::new(),
            vk_icd_filenames: String::new(),
            extra_envs: Vec::new(),
        }
    }

    fn stub_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path.display().to_string()
    }

    fn stub_config(root: &Path) -> OracleConfig {
        let work_dir = root.join("work");
        std::fs::create_dir_all(&work_dir).expect("mkdir");
        // The stub tool diverges on renderer `odd` and dumps a numbered
        // buffer otherwise; the stub reconditioner copies its input.
        let tool_path = stub_script(
            root,
            "fake_shadertrap",
            "case \"$3\" in\n\
             odd) printf '0 1' > buffer_1.txt ;;\n\
             *) printf '0 0' > buffer_1.txt ;;\n\
             esac\n\
             echo 'SUCCESS!' >&2",
        );
        let reconditioner =
            stub_script(root, "fake_recondition", "cp \"$2\" \"$4\"\necho 'SUCCESS!'");
        OracleConfig {
            dirs: DirSettings {
                work_dir,
                shader_output_dir: root.join("shaders"),
                dump_buffer_dir: root.join("dump"),
                kept_buffer_dir: root.join("keptbuffers"),
                kept_shader_dir: root.join("keptshaders"),
            },
            collaborators: CollaboratorSettings {
                generator: "unused".to_string(),
                reconditioner,
            },
            backends: vec![
                backend("mesa_a", 1),
                backend("mesa_b", 2),
                backend("oddball", 3),
            ],
            shader_tools: vec![ShaderToolConfig {
                name: "shadertrap".to_string(),
                path: tool_path,
                extension: ".shadertrap".to_string(),
            }],
            reducers: vec![ReducerConfig {
                name: "stub".to_string(),
                command: "true".to_string(),
                interestingness_test: "interesting.sh".to_string(),
                input_file: "shader.comp".to_string(),
                output_file: "shader_reduced_final.comp".to_string(),
            }],
        }
    }

    #[test]
    fn two_round_never_changes_the_signature() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = stub_config(dir.path());
        config.backends[0].renderer = "even".to_string();
        config.backends[1].renderer = "even".to_string();
        config.backends[2].renderer = "odd".to_string();
        let shader = config.dirs.work_dir.join("case.shadertrap");
        std::fs::write(&shader, "DECLARE_SHADER shader KIND COMPUTE\nvoid main() { }\nEND\n")
            .expect("shader");

        let tool = &config.shader_tools[0];
        let standard = Pipeline::new(&config, config.backends.clone(), tool, false)
            .expect("pipeline")
            .recompute_signature(&shader, None)
            .expect("standard signature");
        let two_round = Pipeline::new(&config, config.backends.clone(), tool, true)
            .expect("pipeline")
            .recompute_signature(&shader, None)
            .expect("two-round signature");
        assert_eq!(standard, two_round);
        assert_eq!(standard.code_string(), "3008");
    }

    #[test]
    fn missing_shader_aborts_before_any_backend_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = stub_config(dir.path());
        let tool = &config.shader_tools[0];
        let pipeline =
            Pipeline::new(&config, config.backends.clone(), tool, false).expect("pipeline");
        let result = pipeline.recompute_signature(&dir.path().join("work/absent.shadertrap"), None);
        assert!(matches!(result, Err(OracleError::MissingInput { .. })));
    }

    #[test]
    fn unknown_tool_format_is_rejected_at_construction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = stub_config(dir.path());
        config.shader_tools[0].name = "spirv-cross".to_string();
        let tool = &config.shader_tools[0];
        assert!(Pipeline::new(&config, config.backends.clone(), tool, false).is_err());
    }

    #[test]
    fn run_id_is_stable_for_a_fixed_backend_list() {
        let backends = vec![backend("a", 1), backend("b", 2)];
        assert_eq!(derive_run_id(17, &backends), derive_run_id(17, &backends));
        assert_ne!(derive_run_id(17, &backends), derive_run_id(18, &backends));
    }

    #[test]
    fn run_id_tracks_backend_codes() {
        let original = vec![backend("a", 1), backend("b", 2)];
        let recoded = vec![backend("a", 1), backend("b", 3)];
        assert_ne!(derive_run_id(17, &original), derive_run_id(17, &recoded));
    }

    #[test]
    fn digest_is_hex_of_sha256() {
        assert_eq!(
            digest_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

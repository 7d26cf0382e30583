//! Interestingness-script generation.
//!
//! External reducers only understand exit codes, so the reduction protocol
//! is a generated POSIX shell script: merge the candidate back into the
//! fixed harness, recompute the signature through the `oracle_signature`
//! binary and exit 0 iff it matches the one captured from the original
//! run. The script is self-contained; nothing from the builder process
//! survives into it except the paths and the reference code string.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::OracleError;
use crate::signature::ErrorSignature;
use crate::workdir::WorkDir;

/// Absolute paths of the oracle binaries a generated script re-invokes.
#[derive(Debug, Clone)]
pub struct OracleBinaries {
    pub harness: PathBuf,
    pub signature: PathBuf,
}

impl OracleBinaries {
    /// Derive sibling binaries from the location of the running executable,
    /// the layout cargo installs them in.
    pub fn beside_current_exe() -> Result<Self, OracleError> {
        let exe = std::env::current_exe()
            .map_err(|source| OracleError::io("failed to locate", "current executable", source))?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self {
            harness: dir.join("oracle_harness"),
            signature: dir.join("oracle_signature"),
        })
    }
}

/// Everything the emitted script needs to stand alone.
pub struct ScriptEnv<'a> {
    pub work: &'a WorkDir,
    pub config_path: &'a Path,
    pub tool_name: &'a str,
    /// Harness file (inside the working directory) candidates are merged
    /// into before re-running the pipeline.
    pub harness_name: &'a str,
    /// Candidate file assumed when the reducer invokes the script with no
    /// arguments.
    pub default_shader_name: &'a str,
    /// Attempt counter bumped on every invocation, so reduction effort
    /// stays observable from outside.
    pub log_name: &'a str,
    /// Active backend restriction; empty means every configured backend.
    pub backend_names: &'a [String],
    pub two_round: bool,
    pub reference: Option<&'a Path>,
    pub binaries: &'a OracleBinaries,
}

/// Emit the interestingness script for `signature`, or `None` when the
/// original run showed no divergence and there is nothing to preserve.
/// The script is written inside the working directory and marked
/// executable.
pub fn build_script(
    env: &ScriptEnv<'_>,
    signature: &ErrorSignature,
    script_name: &str,
) -> Result<Option<PathBuf>, OracleError> {
    if matches!(signature, ErrorSignature::NoDivergence) {
        println!("Execution seems to conform on all tested compilers");
        return Ok(None);
    }

    let code = signature.code_string();
    println!("Detected error code: {code}");

    let text = render(env, &code);
    env.work.write(script_name, text.as_bytes())?;

    let path = env.work.path(script_name);
    let mut perms = std::fs::metadata(&path)
        .map_err(|source| OracleError::io("failed to stat", &path, source))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(&path, perms)
        .map_err(|source| OracleError::io("failed to chmod", &path, source))?;
    Ok(Some(path))
}

fn render(env: &ScriptEnv<'_>, code: &str) -> String {
    let root = env.work.root().display();
    let mut text = String::new();
    text.push_str("#!/usr/bin/env bash\n");
    text.push_str("set -o pipefail\n");
    text.push_str("set -o nounset\n");
    text.push_str("set -o errexit\n");
    text.push_str(&format!("ROOT=\"{root}\"\n"));
    text.push_str(&format!("ERROR_CODE=\"{code}\"\n"));

    // Reducers come in two shapes: glsl-reduce style invokes the test with
    // no arguments against a fixed file name, creduce style passes the
    // candidate path and renames it freely. Honor both.
    text.push_str("if [ $# -eq 0 ]\n");
    text.push_str("then\n");
    text.push_str(&format!(
        "SHADER=$(pwd)\"/{}\"\n",
        env.default_shader_name
    ));
    text.push_str("else\n");
    text.push_str("SHADER_ROOT=$(echo \"$1\" | sed -e 's/\\.[^.]*$//')\n");
    text.push_str("SHADER=\"${SHADER_ROOT}.comp\"\n");
    text.push_str("fi\n");

    text.push_str(&format!("LOG=\"${{ROOT}}/{}\"\n", env.log_name));
    text.push_str("if [ -f \"$LOG\" ]\n");
    text.push_str("then\n");
    text.push_str("ATTEMPT=$(head -n 1 \"$LOG\")\n");
    text.push_str("else\n");
    text.push_str("ATTEMPT=0\n");
    text.push_str("fi\n");
    text.push_str("echo $((ATTEMPT + 1)) > \"$LOG\"\n");

    text.push_str("echo \"$(pwd)\"\n");
    text.push_str("echo \"$SHADER\"\n");
    // Fail fast on fragments the reducer mangled beyond recognition.
    text.push_str("cat \"$SHADER\" | grep \"main\"\n");

    text.push_str(&format!(
        "\"{}\" --config-file \"{}\" --host {} --merge \"${{ROOT}}/{}\" \"$SHADER\"\n",
        env.binaries.harness.display(),
        env.config_path.display(),
        env.tool_name,
        env.harness_name
    ));

    let mut recompute = format!(
        "\"{}\" --config-file \"{}\" --host {} --shader \"${{ROOT}}/{}\"",
        env.binaries.signature.display(),
        env.config_path.display(),
        env.tool_name,
        env.harness_name
    );
    if !env.backend_names.is_empty() {
        recompute.push_str(&format!(" --backends {}", env.backend_names.join(",")));
    }
    if env.two_round {
        recompute.push_str(" --two-round");
    }
    if let Some(reference) = env.reference {
        recompute.push_str(&format!(" --reference \"{}\"", reference.display()));
    }
    text.push_str(&format!("SIGNATURE=$({recompute} || true)\n"));

    text.push_str("echo \"$SIGNATURE\"\n");
    text.push_str("if [ \"$SIGNATURE\" == \"$ERROR_CODE\" ]\n");
    text.push_str("then\n");
    text.push_str("    exit 0\n");
    text.push_str("else\n");
    text.push_str("    exit 1\n");
    text.push_str("fi\n");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureBase;

    fn env<'a>(work: &'a WorkDir, binaries: &'a OracleBinaries) -> ScriptEnv<'a> {
        ScriptEnv {
            work,
            config_path: Path::new("/etc/oracle.toml"),
            tool_name: "shadertrap",
            harness_name: "test_to_reduce.shadertrap",
            default_shader_name: "shader.comp",
            log_name: "reduction.log",
            backend_names: &[],
            two_round: false,
            reference: None,
            binaries,
        }
    }

    fn binaries() -> OracleBinaries {
        OracleBinaries {
            harness: PathBuf::from("/opt/oracle/oracle_harness"),
            signature: PathBuf::from("/opt/oracle/oracle_signature"),
        }
    }

    #[test]
    fn no_divergence_emits_no_script() {
        let dir = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(dir.path());
        let binaries = binaries();
        let script = build_script(
            &env(&work, &binaries),
            &ErrorSignature::NoDivergence,
            "interesting.sh",
        )
        .expect("build");
        assert!(script.is_none());
        assert!(!work.exists("interesting.sh"));
    }

    #[test]
    fn script_compares_against_the_captured_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(dir.path());
        let binaries = binaries();
        let signature = ErrorSignature::Attributed {
            base: SignatureBase::Fresh,
            backend: "d_x".to_string(),
            code: 4,
        };
        let script = build_script(&env(&work, &binaries), &signature, "interesting.sh")
            .expect("build")
            .expect("script emitted");
        let text = work.read_text("interesting.sh").expect("read");
        assert!(text.starts_with("#!/usr/bin/env bash\n"));
        assert!(text.contains("set -o errexit"));
        assert!(text.contains("ERROR_CODE=\"3016\""));
        // Both reducer call conventions are handled.
        assert!(text.contains("if [ $# -eq 0 ]"));
        assert!(text.contains("SHADER=\"${SHADER_ROOT}.comp\""));
        // Sanity check precedes the expensive pipeline re-run.
        assert!(text.contains("grep \"main\""));
        assert!(text.contains("oracle_harness\" --config-file"));
        assert!(text.contains("oracle_signature\" --config-file"));

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&script).expect("stat").permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn restriction_and_reference_surface_in_the_recompute_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(dir.path());
        let binaries = binaries();
        let names = vec!["a".to_string(), "d_x".to_string()];
        let mut script_env = env(&work, &binaries);
        script_env.backend_names = &names;
        script_env.two_round = true;
        script_env.reference = Some(Path::new("/data/kept/d_x_17.txt"));
        build_script(
            &script_env,
            &ErrorSignature::FamilySplit {
                base: SignatureBase::Reference,
            },
            "interesting.sh",
        )
        .expect("build")
        .expect("script emitted");
        let text = work.read_text("interesting.sh").expect("read");
        assert!(text.contains("--backends a,d_x"));
        assert!(text.contains("--two-round"));
        assert!(text.contains("--reference \"/data/kept/d_x_17.txt\""));
        assert!(text.contains("ERROR_CODE=\"5099\""));
    }
}

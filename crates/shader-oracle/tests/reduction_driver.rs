//! Reduction-driver lifecycle against stub external tools: a shader tool
//! that diverges on one renderer, a reconditioner that copies its input,
//! and a reducer that either produces its declared output file or exits
//! without one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use shader_oracle::backend::{BackendFamily, BackendSpec};
use shader_oracle::config::{
    CollaboratorSettings, DirSettings, OracleConfig, ReducerConfig, ShaderToolConfig,
};
use shader_oracle::error::OracleError;
use shader_oracle::interestingness::OracleBinaries;
use shader_oracle::pipeline::Pipeline;
use shader_oracle::reduction::{self, ReductionOutcome, ReductionPlan};
use shader_oracle::workdir::WorkDir;

const HARNESS: &str = "GLES 3.1\n\
    DECLARE_SHADER shader KIND COMPUTE\n\
    void main()\n\
    {\n\
        int unused_wrapper = 0;\n\
    }\n\
    END\n\
    COMPILE_SHADER shader_compiled SHADER shader\n";

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(&path).expect("stat").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path.display().to_string()
}

fn backend(name: &str, renderer: &str, code: u32) -> BackendSpec {
    BackendSpec {
        name: name.to_string(),
        renderer: renderer.to_string(),
        family: BackendFamily::Independent,
        code,
        ld_library_path: String::new(),
        vk_icd_filenames: String::new(),
        extra_envs: Vec::new(),
    }
}

/// A workspace with a stub tool whose buffer output depends on the
/// renderer it is asked for: `odd` diverges, `slow` sleeps past any test
/// timeout, everything else agrees.
fn workspace(root: &Path) -> OracleConfig {
    let work_dir = root.join("work");
    let kept_shader_dir = root.join("keptshaders");
    for dir in [
        &work_dir,
        &root.join("shaders"),
        &root.join("dump"),
        &root.join("keptbuffers"),
        &kept_shader_dir,
    ] {
        std::fs::create_dir_all(dir).expect("mkdir");
    }
    let tool_path = write_script(
        root,
        "fake_shadertrap",
        "case \"$3\" in\n\
         odd) printf '0 1' > buffer_1.txt ;;\n\
         slow) sleep 30 ;;\n\
         *) printf '0 0' > buffer_1.txt ;;\n\
         esac\n\
         echo 'SUCCESS!' >&2",
    );
    let reconditioner = write_script(root, "fake_recondition", "cp \"$2\" \"$4\"\necho 'SUCCESS!'");
    OracleConfig {
        dirs: DirSettings {
            work_dir,
            shader_output_dir: root.join("shaders"),
            dump_buffer_dir: root.join("dump"),
            kept_buffer_dir: root.join("keptbuffers"),
            kept_shader_dir,
        },
        collaborators: CollaboratorSettings {
            generator: "unused".to_string(),
            reconditioner,
        },
        backends: vec![
            backend("mesa_a", "even", 1),
            backend("mesa_b", "even", 2),
            backend("oddball", "odd", 3),
        ],
        shader_tools: vec![ShaderToolConfig {
            name: "shadertrap".to_string(),
            path: tool_path,
            extension: ".shadertrap".to_string(),
        }],
        reducers: vec![ReducerConfig {
            name: "stub".to_string(),
            command: "sh produce_reduced.sh".to_string(),
            interestingness_test: "interesting.sh".to_string(),
            input_file: "shader.comp".to_string(),
            output_file: "shader_reduced_final.comp".to_string(),
        }],
    }
}

fn binaries() -> OracleBinaries {
    OracleBinaries {
        harness: PathBuf::from("/usr/bin/true"),
        signature: PathBuf::from("/usr/bin/true"),
    }
}

#[test]
fn successful_attempt_produces_a_merged_artifact_and_cleans_scratch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = workspace(dir.path());
    let work = WorkDir::new(&config.dirs.work_dir);
    work.write("test_to_reduce.shadertrap", HARNESS.as_bytes())
        .expect("harness");
    // The stub reducer "minimizes" by dropping a line from the split body.
    write_script(
        config.dirs.work_dir.as_path(),
        "produce_reduced.sh",
        "grep -v unused_wrapper shader.comp > shader_reduced_final.comp",
    );

    let tool = &config.shader_tools[0];
    let pipeline =
        Pipeline::new(&config, config.backends.clone(), tool, false).expect("pipeline");
    let oracle_binaries = binaries();
    let plan = ReductionPlan {
        pipeline: &pipeline,
        reducer: &config.reducers[0],
        binaries: &oracle_binaries,
        config_path: Path::new("oracle.toml"),
        backend_names: &[],
        reduce_timeout: false,
        reference: None,
    };

    let outcome = reduction::run_reduction(
        &plan,
        "test_to_reduce.shadertrap",
        "test_reduced.shadertrap",
        "reduction.log",
    )
    .expect("reduction");

    match outcome {
        ReductionOutcome::Reduced {
            artifact,
            signature,
            ..
        } => {
            // Lone outlier `oddball` carries bit 1 << 3.
            assert_eq!(signature.code_string(), "3008");
            let merged = std::fs::read_to_string(&artifact).expect("artifact");
            assert!(merged.contains("void main()"));
            assert!(!merged.contains("unused_wrapper"));
            assert!(merged.contains("COMPILE_SHADER shader_compiled SHADER shader"));
        }
        other => panic!("expected a reduced artifact, got {other:?}"),
    }

    // Scratch is gone, the artifact and the untouched input remain.
    assert!(!work.exists("shader.comp"));
    assert!(!work.exists("shader_reduced_final.comp"));
    assert!(!work.exists("interesting.sh"));
    assert!(work.exists("test_reduced.shadertrap"));
    assert!(work.exists("test_to_reduce.shadertrap"));
}

#[test]
fn reducer_without_output_is_a_failed_attempt_with_full_cleanup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = workspace(dir.path());
    config.reducers[0].command = "true".to_string();
    let work = WorkDir::new(&config.dirs.work_dir);
    work.write("test_to_reduce.shadertrap", HARNESS.as_bytes())
        .expect("harness");

    let tool = &config.shader_tools[0];
    let pipeline =
        Pipeline::new(&config, config.backends.clone(), tool, false).expect("pipeline");
    let oracle_binaries = binaries();
    let plan = ReductionPlan {
        pipeline: &pipeline,
        reducer: &config.reducers[0],
        binaries: &oracle_binaries,
        config_path: Path::new("oracle.toml"),
        backend_names: &[],
        reduce_timeout: false,
        reference: None,
    };

    let result = reduction::run_reduction(
        &plan,
        "test_to_reduce.shadertrap",
        "test_reduced.shadertrap",
        "reduction.log",
    );
    assert!(matches!(result, Err(OracleError::ReducerNoOutput { .. })));

    // No artifact survives a failed attempt, only the input harness.
    assert!(!work.exists("test_reduced.shadertrap"));
    assert!(!work.exists("shader.comp"));
    assert!(!work.exists("interesting.sh"));
    assert!(work.exists("test_to_reduce.shadertrap"));
}

#[test]
fn conforming_shader_aborts_before_any_reducer_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = workspace(dir.path());
    // Every backend agrees once the outlier renderer is gone.
    config.backends = vec![backend("mesa_a", "even", 1), backend("mesa_b", "even", 2)];
    let work = WorkDir::new(&config.dirs.work_dir);
    work.write("test_to_reduce.shadertrap", HARNESS.as_bytes())
        .expect("harness");

    let tool = &config.shader_tools[0];
    let pipeline =
        Pipeline::new(&config, config.backends.clone(), tool, false).expect("pipeline");
    let oracle_binaries = binaries();
    let plan = ReductionPlan {
        pipeline: &pipeline,
        reducer: &config.reducers[0],
        binaries: &oracle_binaries,
        config_path: Path::new("oracle.toml"),
        backend_names: &[],
        reduce_timeout: false,
        reference: None,
    };

    let outcome = reduction::run_reduction(
        &plan,
        "test_to_reduce.shadertrap",
        "test_reduced.shadertrap",
        "reduction.log",
    )
    .expect("reduction");
    assert_eq!(outcome, ReductionOutcome::NoDivergence);
    assert!(!work.exists("interesting.sh"));
    assert!(!work.exists("test_reduced.shadertrap"));
}

#[test]
fn timeouts_are_skipped_unless_opted_in() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = workspace(dir.path());
    config.backends = vec![
        backend("mesa_a", "even", 1),
        backend("sluggish", "slow", 2),
    ];
    let work = WorkDir::new(&config.dirs.work_dir);
    work.write("test_to_reduce.shadertrap", HARNESS.as_bytes())
        .expect("harness");

    let tool = &config.shader_tools[0];
    let mut pipeline =
        Pipeline::new(&config, config.backends.clone(), tool, false).expect("pipeline");
    pipeline.timeout = Duration::from_millis(300);
    let oracle_binaries = binaries();
    let plan = ReductionPlan {
        pipeline: &pipeline,
        reducer: &config.reducers[0],
        binaries: &oracle_binaries,
        config_path: Path::new("oracle.toml"),
        backend_names: &[],
        reduce_timeout: false,
        reference: None,
    };

    let outcome = reduction::run_reduction(
        &plan,
        "test_to_reduce.shadertrap",
        "test_reduced.shadertrap",
        "reduction.log",
    )
    .expect("reduction");
    match outcome {
        ReductionOutcome::Skipped { signature } => {
            assert_eq!(signature.code_string(), "2004");
        }
        other => panic!("expected a skipped attempt, got {other:?}"),
    }
    // The emitted script is scratch once the attempt is over.
    assert!(!work.exists("interesting.sh"));
}

#[test]
fn batch_reduces_only_shaders_without_a_reduced_counterpart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = workspace(dir.path());
    let kept = &config.dirs.kept_shader_dir;
    std::fs::write(kept.join("17.shadertrap"), HARNESS).expect("kept shader");
    std::fs::write(kept.join("23.shadertrap"), HARNESS).expect("kept shader");
    std::fs::write(kept.join("23_reduced.shadertrap"), HARNESS).expect("kept shader");
    write_script(
        config.dirs.work_dir.as_path(),
        "produce_reduced.sh",
        "cp shader.comp shader_reduced_final.comp",
    );

    let tool = &config.shader_tools[0];
    let pipeline =
        Pipeline::new(&config, config.backends.clone(), tool, false).expect("pipeline");
    let oracle_binaries = binaries();
    let plan = ReductionPlan {
        pipeline: &pipeline,
        reducer: &config.reducers[0],
        binaries: &oracle_binaries,
        config_path: Path::new("oracle.toml"),
        backend_names: &[],
        reduce_timeout: false,
        reference: None,
    };

    let files = reduction::files_to_reduce(kept, ".shadertrap").expect("worklist");
    let names: Vec<_> = files
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["17.shadertrap"]);

    let report = reduction::batch_reduction(&plan, &files).expect("batch");
    assert_eq!(report.attempted, 1);
    assert_eq!(report.reduced, 1);
    assert_eq!(report.failed, 0);
    assert!(kept.join("17_reduced.shadertrap").is_file());

    // Batch scratch names do not survive in the work dir.
    let work = WorkDir::new(&config.dirs.work_dir);
    assert!(!work.exists("test_to_reduce.shadertrap"));
    assert!(!work.exists("test_reduced.shadertrap"));
}

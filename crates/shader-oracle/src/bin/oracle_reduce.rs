#![forbid(unsafe_code)]

//! `oracle_reduce` drives a configured external reducer over one test file
//! or over every kept shader that has no reduced counterpart yet.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use shader_oracle::config::OracleConfig;
use shader_oracle::interestingness::OracleBinaries;
use shader_oracle::pipeline::Pipeline;
use shader_oracle::reduction::{self, ReductionOutcome, ReductionPlan};

#[derive(Debug)]
struct CliArgs {
    config: PathBuf,
    host: String,
    reducer: String,
    test_file: Option<PathBuf>,
    output_file: Option<String>,
    backends: Vec<String>,
    batch: bool,
    reduce_timeout: bool,
    two_round: bool,
    reference: Option<PathBuf>,
    print_help: bool,
}

fn main() {
    match run() {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(error) => {
            eprintln!("{error:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.print_help {
        return Ok(0);
    }

    let config = OracleConfig::load(&args.config)?;
    let backends = config.restrict_backends(&args.backends)?;
    let tool = config.select_shader_tool(&args.host);
    let reducer = config.select_reducer(&args.reducer)?;
    let pipeline = Pipeline::new(&config, backends, tool, args.two_round)?;
    let binaries = OracleBinaries::beside_current_exe()?;
    let config_path = fs::canonicalize(&args.config).unwrap_or_else(|_| args.config.clone());
    let plan = ReductionPlan {
        pipeline: &pipeline,
        reducer,
        binaries: &binaries,
        config_path: &config_path,
        backend_names: &args.backends,
        reduce_timeout: args.reduce_timeout,
        reference: args.reference.as_deref(),
    };

    if args.batch {
        let files =
            reduction::files_to_reduce(&config.dirs.kept_shader_dir, &tool.extension)?;
        let report = reduction::batch_reduction(&plan, &files)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(if report.failed > 0 { 1 } else { 0 });
    }

    let test_file = args
        .test_file
        .unwrap_or_else(|| PathBuf::from(format!("test_original{}", tool.extension)));
    let work = pipeline.work();
    // Fixed scratch name, so the reducer's configured input/output file
    // names hold whatever the originating file is called.
    let input_name = format!("{}{}", reduction::BATCH_INPUT_STEM, tool.extension);
    let staged = work.path(&input_name);
    let staged_copy = test_file.is_file()
        && fs::canonicalize(&test_file).ok() != fs::canonicalize(&staged).ok();
    if staged_copy {
        fs::copy(&test_file, &staged)
            .with_context(|| format!("failed to stage `{}`", test_file.display()))?;
    }
    let output_name = args
        .output_file
        .unwrap_or_else(|| format!("test_reduced{}", tool.extension));

    let outcome = reduction::run_reduction(&plan, &input_name, &output_name, "reduction.log")?;
    if staged_copy {
        work.remove_files(&[input_name]);
    }
    match outcome {
        ReductionOutcome::Reduced { artifact, .. } => {
            println!("Reduced test case: {}", artifact.display());
            Ok(0)
        }
        ReductionOutcome::Skipped { signature } => {
            println!("Not reduced (signature {signature})");
            Ok(0)
        }
        ReductionOutcome::NoDivergence => Ok(0),
    }
}

fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut config = PathBuf::from("oracle.toml");
    let mut host = String::new();
    let mut reducer = String::new();
    let mut test_file = None::<PathBuf>;
    let mut output_file = None::<String>;
    let mut backends = Vec::new();
    let mut batch = false;
    let mut reduce_timeout = false;
    let mut two_round = false;
    let mut reference = None::<PathBuf>;
    let mut print_help_flag = false;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config-file" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --config-file"))?;
                config = PathBuf::from(value);
            }
            "--host" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --host"))?;
                host = value;
            }
            "--reducer" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --reducer"))?;
                reducer = value;
            }
            "--test-file" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --test-file"))?;
                test_file = Some(PathBuf::from(value));
            }
            "--output-file" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --output-file"))?;
                output_file = Some(value);
            }
            "--backends" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --backends"))?;
                backends = value
                    .split(',')
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "--reference" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --reference"))?;
                reference = Some(PathBuf::from(value));
            }
            "--batch" => batch = true,
            "--reduce-timeout" => reduce_timeout = true,
            "--two-round" => two_round = true,
            "--help" | "-h" => {
                print_help();
                print_help_flag = true;
            }
            other => {
                bail!("unknown argument `{other}`");
            }
        }
    }

    Ok(CliArgs {
        config,
        host,
        reducer,
        test_file,
        output_file,
        backends,
        batch,
        reduce_timeout,
        two_round,
        reference,
        print_help: print_help_flag,
    })
}

fn print_help() {
    println!("oracle_reduce");
    println!("  --config-file <path>      oracle configuration (default: oracle.toml)");
    println!("  --host <tool>             shader tool name (default: first configured)");
    println!("  --reducer <name>          reducer to drive (default: first configured)");
    println!("  --test-file <path>        harness to reduce (default: test_original<ext>)");
    println!("  --output-file <name>      final artifact name (default: test_reduced<ext>)");
    println!("  --backends <a,b,...>      restrict the active backend set");
    println!("  --reference <bufferfile>  compare against a stored buffer");
    println!("  --batch                   reduce every kept shader without a reduced counterpart");
    println!("  --reduce-timeout          also reduce shaders that time out");
    println!("  --two-round               eliminate unexercised wrappers first");
}

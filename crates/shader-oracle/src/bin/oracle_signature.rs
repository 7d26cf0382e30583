#![forbid(unsafe_code)]

//! `oracle_signature` recomputes one error signature and prints its code
//! string on stdout. Every generated interestingness script re-invokes this
//! binary, so its output must stay exactly the code-string serialization
//! and nothing else; progress and causes go to stderr.

use std::path::PathBuf;

use anyhow::{Result, bail};
use shader_oracle::config::OracleConfig;
use shader_oracle::pipeline::Pipeline;

#[derive(Debug)]
struct CliArgs {
    config: PathBuf,
    host: String,
    shader: Option<PathBuf>,
    reference: Option<PathBuf>,
    backends: Vec<String>,
    two_round: bool,
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
    let pipeline = Pipeline::new(&config, backends, tool, args.two_round)?;

    let shader = args
        .shader
        .unwrap_or_else(|| config.dirs.work_dir.join(format!("test{}", tool.extension)));
    let signature = pipeline.recompute_signature(&shader, args.reference.as_deref())?;
    println!("{}", signature.code_string());
    Ok(0)
}

fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut config = PathBuf::from("oracle.toml");
    let mut host = String::new();
    let mut shader = None::<PathBuf>;
    let mut reference = None::<PathBuf>;
    let mut backends = Vec::new();
    let mut two_round = false;
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
            "--shader" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --shader"))?;
                shader = Some(PathBuf::from(value));
            }
            "--reference" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --reference"))?;
                reference = Some(PathBuf::from(value));
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
            "--two-round" => {
                two_round = true;
            }
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
        shader,
        reference,
        backends,
        two_round,
        print_help: print_help_flag,
    })
}

fn print_help() {
    println!("oracle_signature");
    println!("  --config-file <path>      oracle configuration (default: oracle.toml)");
    println!("  --host <tool>             shader tool name (default: first configured)");
    println!("  --shader <path>           harness file (default: test<ext> in the work dir)");
    println!("  --reference <bufferfile>  compare against a stored buffer");
    println!("  --backends <a,b,...>      restrict the active backend set");
    println!("  --two-round               eliminate unexercised wrappers first");
}

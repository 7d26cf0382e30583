#![forbid(unsafe_code)]

//! `oracle_harness` cuts the embedded shader body out of a harness file or
//! splices a (possibly reduced) body back into one. Generated
//! interestingness scripts use the merge direction to rebuild a runnable
//! harness from the reducer's candidate fragment.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use shader_oracle::config::OracleConfig;
use shader_oracle::harness;

#[derive(Debug)]
enum Operation {
    Split { harness: PathBuf, shader: PathBuf },
    Merge { harness: PathBuf, shader: PathBuf },
}

#[derive(Debug)]
struct CliArgs {
    config: PathBuf,
    host: String,
    operation: Option<Operation>,
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
    let Some(operation) = args.operation else {
        bail!("missing operation: pass --split or --merge, see --help");
    };

    let config = OracleConfig::load(&args.config)?;
    let tool = config.select_shader_tool(&args.host);
    let format = harness::format_for(&tool.name)
        .with_context(|| format!("shader tool `{}` has no supported embedding format", tool.name))?;

    match operation {
        Operation::Split { harness, shader } => {
            let harness_text = fs::read_to_string(&harness)
                .with_context(|| format!("failed to read `{}`", harness.display()))?;
            let body = format.extract_embedded_source(&harness_text);
            fs::write(&shader, body)
                .with_context(|| format!("failed to write `{}`", shader.display()))?;
        }
        Operation::Merge { harness, shader } => {
            let harness_text = fs::read_to_string(&harness)
                .with_context(|| format!("failed to read `{}`", harness.display()))?;
            let body = fs::read_to_string(&shader)
                .with_context(|| format!("failed to read `{}`", shader.display()))?;
            let merged = format.merge_embedded_source(&harness_text, &body);
            fs::write(&harness, merged)
                .with_context(|| format!("failed to write `{}`", harness.display()))?;
        }
    }
    Ok(0)
}

fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut config = PathBuf::from("oracle.toml");
    let mut host = String::new();
    let mut operation = None::<Operation>;
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
            "--split" => {
                let harness = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--split takes <harness> <shader>"))?;
                let shader = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--split takes <harness> <shader>"))?;
                set_operation(
                    &mut operation,
                    Operation::Split {
                        harness: PathBuf::from(harness),
                        shader: PathBuf::from(shader),
                    },
                )?;
            }
            "--merge" => {
                let harness = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--merge takes <harness> <shader>"))?;
                let shader = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--merge takes <harness> <shader>"))?;
                set_operation(
                    &mut operation,
                    Operation::Merge {
                        harness: PathBuf::from(harness),
                        shader: PathBuf::from(shader),
                    },
                )?;
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
        operation,
        print_help: print_help_flag,
    })
}

fn set_operation(slot: &mut Option<Operation>, operation: Operation) -> Result<()> {
    if slot.is_some() {
        bail!("pass only one of --split / --merge");
    }
    *slot = Some(operation);
    Ok(())
}

fn print_help() {
    println!("oracle_harness");
    println!("  --config-file <path>        oracle configuration (default: oracle.toml)");
    println!("  --host <tool>               shader tool name (default: first configured)");
    println!("  --split <harness> <shader>  extract the embedded shader body");
    println!("  --merge <harness> <shader>  splice a shader body into the harness, in place");
}

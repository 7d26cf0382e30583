#![forbid(unsafe_code)]

//! `oracle_batch` is the outer bug-finding loop: generate a batch of
//! shaders, run each against every configured backend, compare the dumped
//! buffers, retain diverging shaders (and their buffers) keyed by seed,
//! and optionally hand them straight to batch reduction. One JSON report
//! is printed per batch.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::{SecondsFormat, Utc};
use shader_oracle::backend::BackendSpec;
use shader_oracle::collaborators;
use shader_oracle::config::OracleConfig;
use shader_oracle::divergence;
use shader_oracle::error::OracleError;
use shader_oracle::interestingness::OracleBinaries;
use shader_oracle::pipeline::{
    self, BATCH_REPORT_SCHEMA_VERSION, BatchReport, Pipeline, ShaderVerdict,
};
use shader_oracle::reduction::{self, ReductionPlan};
use shader_oracle::signature;
use shader_oracle::workdir::WorkDir;

#[derive(Debug)]
struct CliArgs {
    config: PathBuf,
    host: String,
    seed: Option<u64>,
    shader_count: u32,
    backends: Vec<String>,
    syntax_only: bool,
    generate_only: bool,
    no_generation: bool,
    diff_files_only: bool,
    validate_compilers: bool,
    continuous: bool,
    reduce: bool,
    reducer: String,
    reduce_timeout: bool,
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
    let pipeline = Pipeline::new(&config, backends.clone(), tool, args.two_round)?;

    let mut validate_compilers = args.validate_compilers;
    let mut batch_nb = 1u64;
    loop {
        let exit = run_batch(
            &args,
            &config,
            &backends,
            &pipeline,
            &mut validate_compilers,
            batch_nb,
        )?;
        if exit != 0 {
            return Ok(exit);
        }
        batch_nb += 1;
        if !args.continuous || args.generate_only || args.syntax_only {
            return Ok(0);
        }
    }
}

fn run_batch(
    args: &CliArgs,
    config: &OracleConfig,
    backends: &[BackendSpec],
    pipeline: &Pipeline<'_>,
    validate_compilers: &mut bool,
    batch_nb: u64,
) -> Result<i32> {
    let tool = pipeline.tool();
    let started = Instant::now();
    let seed = args
        .seed
        .unwrap_or_else(|| Utc::now().timestamp().max(0) as u64);
    let mut verdicts: Vec<ShaderVerdict> = Vec::new();
    let mut kept_shaders: Vec<PathBuf> = Vec::new();

    if !args.diff_files_only {
        if !args.no_generation {
            collaborators::run_generator(
                &config.collaborators,
                args.shader_count,
                &config.dirs.shader_output_dir,
                Some(seed),
                &tool.name,
            )?;
            println!(
                "Generation of {} shaders with seed {} done",
                args.shader_count, seed
            );
            if args.generate_only {
                return Ok(0);
            }
        }

        if args.syntax_only {
            return syntax_sweep(args, config, backends, tool);
        }

        if *validate_compilers {
            if tool.name != "shadertrap" {
                println!("Impossible to validate the compilers if the host language is not shadertrap");
            } else {
                let failures = pipeline.validate_backends()?;
                if !failures.is_empty() {
                    for (name, detail) in failures {
                        eprintln!("compiler not found or not working: {name}");
                        eprintln!("{detail}");
                    }
                    return Ok(1);
                }
                println!("compilers validated");
            }
            *validate_compilers = false;
        }

        // Stale dumps from an earlier batch must not leak into this one.
        let dump = WorkDir::new(&config.dirs.dump_buffer_dir);
        let stale = dump.buffer_dumps()?;
        dump.remove_files(&stale);

        for index in 0..args.shader_count {
            let shader = config
                .dirs
                .shader_output_dir
                .join(format!("test_{index}{}", tool.extension));
            let label = index.to_string();
            match pipeline.execute(
                &shader,
                Some(label.as_str()),
                Some(config.dirs.dump_buffer_dir.as_path()),
            ) {
                Ok(runs) => {
                    let sig = signature::encode(backends, &runs, None);
                    verdicts.push(ShaderVerdict {
                        shader: shader.display().to_string(),
                        signature: Some(sig.code_string()),
                        divergent: false,
                        kept: false,
                        buffer_digests: BTreeMap::new(),
                    });
                }
                Err(
                    error @ (OracleError::MissingInput { .. }
                    | OracleError::ReconditioningFailed { .. }),
                ) => {
                    eprintln!("{error}");
                    verdicts.push(ShaderVerdict {
                        shader: shader.display().to_string(),
                        signature: None,
                        divergent: false,
                        kept: false,
                        buffer_digests: BTreeMap::new(),
                    });
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    if backends.len() == 1 {
        println!("Impossible to compare outputs for only one compiler");
        return Ok(0);
    }

    for index in 0..args.shader_count {
        let Some(buffers) = read_batch_buffers(config, backends, index)? else {
            continue;
        };
        let partition = divergence::classify(&buffers);
        if partition.is_unanimous() {
            continue;
        }
        println!(
            "Different results across implementations for shader {}",
            seed + u64::from(index)
        );
        let digests: BTreeMap<String, String> = buffers
            .iter()
            .map(|(name, bytes)| (name.clone(), pipeline::digest_hex(bytes)))
            .collect();
        let kept = keep_divergent_shader(config, backends, tool, index, seed)?;
        if let Some(kept_path) = &kept {
            kept_shaders.push(kept_path.clone());
        }
        match verdicts.get_mut(index as usize) {
            Some(verdict) => {
                verdict.divergent = true;
                verdict.kept = kept.is_some();
                verdict.buffer_digests = digests;
            }
            None => verdicts.push(ShaderVerdict {
                shader: format!("test_{index}{}", tool.extension),
                signature: None,
                divergent: true,
                kept: kept.is_some(),
                buffer_digests: digests,
            }),
        }
    }

    let divergent_count = verdicts.iter().filter(|verdict| verdict.divergent).count();

    if args.reduce && !kept_shaders.is_empty() {
        let reducer = config.select_reducer(&args.reducer)?;
        let binaries = OracleBinaries::beside_current_exe()?;
        let config_path = fs::canonicalize(&args.config).unwrap_or_else(|_| args.config.clone());
        let plan = ReductionPlan {
            pipeline,
            reducer,
            binaries: &binaries,
            config_path: &config_path,
            backend_names: &args.backends,
            reduce_timeout: args.reduce_timeout,
            reference: None,
        };
        let report = reduction::batch_reduction(&plan, &kept_shaders)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    let report = BatchReport {
        schema_version: BATCH_REPORT_SCHEMA_VERSION.to_string(),
        run_id: pipeline::derive_run_id(seed, backends),
        generated_at_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        seed,
        shader_count: args.shader_count,
        divergent_count,
        elapsed_seconds: started.elapsed().as_secs_f64(),
        shaders: verdicts,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("Batch {batch_nb} processed");
    Ok(0)
}

/// Compile each generated shader against the first backend only, as a fast
/// syntax screen for the generator's output.
fn syntax_sweep(
    args: &CliArgs,
    config: &OracleConfig,
    backends: &[BackendSpec],
    tool: &shader_oracle::config::ShaderToolConfig,
) -> Result<i32> {
    let first = backends[..1].to_vec();
    let sweep = Pipeline::new(config, first, tool, false)?;
    for index in 0..args.shader_count {
        let shader = config
            .dirs
            .shader_output_dir
            .join(format!("test_{index}{}", tool.extension));
        match sweep.recompute_signature(&shader, None) {
            Ok(sig) if sig.code_string() == "0" => println!("Shader {index} validated"),
            Ok(_) => println!("Error on shader {index}"),
            Err(error) => {
                eprintln!("{error}");
                println!("Error on shader {index}");
            }
        }
    }
    let work = sweep.work();
    let stale = work.buffer_dumps()?;
    work.remove_files(&stale);
    println!("Compilation of all programs done");
    Ok(0)
}

/// Read the dumped result buffers for one shader index in backend
/// declaration order, or `None` when any is missing (diff-only runs over a
/// partial dump directory).
fn read_batch_buffers(
    config: &OracleConfig,
    backends: &[BackendSpec],
    index: u32,
) -> Result<Option<Vec<(String, Vec<u8>)>>> {
    let mut buffers = Vec::with_capacity(backends.len());
    for backend in backends {
        let path = config
            .dirs
            .dump_buffer_dir
            .join(format!("buffer_{}_{index}.txt", backend.name));
        if !path.is_file() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read `{}`", path.display()))?;
        buffers.push((backend.name.clone(), bytes));
    }
    Ok(Some(buffers))
}

/// Move a diverging shader and its buffers into the kept directories,
/// renamed by seed so later batches never collide.
fn keep_divergent_shader(
    config: &OracleConfig,
    backends: &[BackendSpec],
    tool: &shader_oracle::config::ShaderToolConfig,
    index: u32,
    seed: u64,
) -> Result<Option<PathBuf>> {
    let shader = config
        .dirs
        .shader_output_dir
        .join(format!("test_{index}{}", tool.extension));
    let kept = if shader.is_file() {
        let dest = config
            .dirs
            .kept_shader_dir
            .join(format!("{}{}", seed + u64::from(index), tool.extension));
        move_file(&shader, &dest)?;
        Some(dest)
    } else {
        None
    };
    for backend in backends {
        let buffer = config
            .dirs
            .dump_buffer_dir
            .join(format!("buffer_{}_{index}.txt", backend.name));
        if buffer.is_file() {
            let dest = config
                .dirs
                .kept_buffer_dir
                .join(format!("{}_{}.txt", backend.name, seed + u64::from(index)));
            move_file(&buffer, &dest)?;
        }
    }
    Ok(kept)
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_err() {
        fs::copy(from, to).with_context(|| format!("failed to copy `{}`", from.display()))?;
        fs::remove_file(from)
            .with_context(|| format!("failed to remove `{}`", from.display()))?;
    }
    Ok(())
}

fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut config = PathBuf::from("oracle.toml");
    let mut host = String::new();
    let mut seed = None::<u64>;
    let mut shader_count = 50u32;
    let mut backends = Vec::new();
    let mut syntax_only = false;
    let mut generate_only = false;
    let mut no_generation = false;
    let mut diff_files_only = false;
    let mut validate_compilers = true;
    let mut continuous = false;
    let mut reduce = false;
    let mut reducer = String::new();
    let mut reduce_timeout = false;
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
            "--seed" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --seed"))?;
                seed = Some(value.parse::<u64>()?);
            }
            "--shader-count" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --shader-count"))?;
                shader_count = value.parse::<u32>()?;
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
            "--reducer" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --reducer"))?;
                reducer = value;
            }
            "--syntax-only" => syntax_only = true,
            "--generate-only" => generate_only = true,
            "--no-generation" => no_generation = true,
            "--diff-files-only" => diff_files_only = true,
            "--no-compiler-validation" => validate_compilers = false,
            "--continuous" => continuous = true,
            "--reduce" => reduce = true,
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

    if generate_only && no_generation {
        bail!("cannot combine --generate-only with --no-generation");
    }

    Ok(CliArgs {
        config,
        host,
        seed,
        shader_count,
        backends,
        syntax_only,
        generate_only,
        no_generation,
        diff_files_only,
        validate_compilers,
        continuous,
        reduce,
        reducer,
        reduce_timeout,
        two_round,
        print_help: print_help_flag,
    })
}

fn print_help() {
    println!("oracle_batch");
    println!("  --config-file <path>       oracle configuration (default: oracle.toml)");
    println!("  --host <tool>              shader tool name (default: first configured)");
    println!("  --seed <u64>               generator seed (default: current time)");
    println!("  --shader-count <n>         shaders per batch (default: 50)");
    println!("  --backends <a,b,...>       restrict the active backend set");
    println!("  --syntax-only              validate generated shaders with the first backend only");
    println!("  --generate-only            stop after generation");
    println!("  --no-generation            execute already generated shaders");
    println!("  --diff-files-only          only compare already dumped buffers");
    println!("  --no-compiler-validation   skip the upfront empty-harness check");
    println!("  --continuous               loop batch after batch until interrupted");
    println!("  --reduce                   batch-reduce diverging shaders afterwards");
    println!("  --reducer <name>           reducer for --reduce (default: first configured)");
    println!("  --reduce-timeout           also reduce shaders that time out");
    println!("  --two-round                eliminate unexercised wrappers first");
}

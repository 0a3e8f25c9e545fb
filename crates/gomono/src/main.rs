use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use gomono::cache::{DEFAULT_MAX_SPECIALIZATIONS, DEFAULT_MAX_TYPE_DEPTH};
use gomono::diagnostics;
use gomono::driver::{MonoStats, DEFAULT_MAX_CYCLES};
use gomono::tree;
use gomono::{monomorphize, MonoOptions};
use gomono_contracts::{GOMONO_DIAG_SCHEMA_VERSION, GOMONO_REPORT_SCHEMA_VERSION};

#[derive(Parser)]
#[command(name = "gomono")]
#[command(about = "Monomorphizer for signature-embedded generics.", long_about = None)]
#[command(version)]
struct Cli {
    /// Log verbosity on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args, Debug, Clone, Copy)]
struct LimitArgs {
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_CYCLES)]
    max_cycles: usize,
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_SPECIALIZATIONS)]
    max_specializations: usize,
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_TYPE_DEPTH)]
    max_type_depth: usize,
}

impl LimitArgs {
    fn options(self) -> MonoOptions {
        MonoOptions {
            max_cycles: self.max_cycles,
            max_specializations: self.max_specializations,
            max_type_depth: self.max_type_depth,
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Monomorphize an annotated tree and write the concrete tree.
    Mono {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_name = "PATH")]
        emit_mono_map: Option<PathBuf>,
        #[arg(long)]
        report_json: bool,
        #[command(flatten)]
        limits: LimitArgs,
    },
    /// Run the engine and report errors without writing anything.
    Check {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        report_json: bool,
        #[command(flatten)]
        limits: LimitArgs,
    },
}

#[derive(Debug, Serialize)]
struct GomonoToolReport {
    schema_version: &'static str,
    command: &'static str,
    ok: bool,
    r#in: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<MonoStats>,
    diagnostics_schema_version: &'static str,
    diagnostics_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    diagnostics: Vec<diagnostics::Diagnostic>,
    exit_code: u8,
}

struct Job<'a> {
    command: &'static str,
    input: &'a Path,
    output: Option<&'a Path>,
    mono_map: Option<&'a Path>,
    report_json: bool,
    options: MonoOptions,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Cmd::Mono {
            input,
            output,
            emit_mono_map,
            report_json,
            limits,
        } => run(Job {
            command: "mono",
            input: input.as_path(),
            output: Some(output.as_path()),
            mono_map: emit_mono_map.as_deref(),
            report_json,
            options: limits.options(),
        }),
        Cmd::Check {
            input,
            report_json,
            limits,
        } => run(Job {
            command: "check",
            input: input.as_path(),
            output: None,
            mono_map: None,
            report_json,
            options: limits.options(),
        }),
    }
}

fn run(job: Job<'_>) -> Result<ExitCode> {
    let bytes = match std::fs::read(job.input) {
        Ok(bytes) => bytes,
        Err(err) => {
            if job.report_json {
                return fail_report(
                    &job,
                    diagnostics::Diagnostic::error(
                        "GM-IO-READ-0001",
                        diagnostics::Stage::Parse,
                        &format!("read input {}: {err}", job.input.display()),
                    ),
                    2,
                );
            }
            return Err(err).with_context(|| format!("read input: {}", job.input.display()));
        }
    };

    let file = match tree::parse_tree_json(&bytes) {
        Ok(file) => file,
        Err(err) => {
            if job.report_json {
                return fail_report(
                    &job,
                    diagnostics::Diagnostic::error(
                        "GM-TREE-PARSE-0001",
                        diagnostics::Stage::Parse,
                        &err,
                    ),
                    2,
                );
            }
            return Err(anyhow::anyhow!("{err}"))
                .with_context(|| format!("parse annotated tree: {}", job.input.display()));
        }
    };

    let out = match monomorphize(file, &job.options) {
        Ok(out) => out,
        Err(err) => {
            if job.report_json {
                return fail_report(&job, err.to_diagnostic(), 1);
            }
            eprintln!("{}", err.describe());
            return Ok(ExitCode::from(1));
        }
    };

    // Serialize everything before touching the filesystem.
    let tree_text = tree::tree_to_canonical_json(&out.file)?;
    let map_text = canon_json_text(&out.mono_map)?;

    let mut files: Vec<(&Path, &str)> = Vec::new();
    if let Some(path) = job.output {
        files.push((path, tree_text.as_str()));
    }
    if let Some(path) = job.mono_map {
        files.push((path, map_text.as_str()));
    }
    write_outputs(&files)?;
    for (path, _) in &files {
        info!(path = %path.display(), "wrote output");
    }

    if job.report_json {
        let report = GomonoToolReport {
            schema_version: GOMONO_REPORT_SCHEMA_VERSION,
            command: job.command,
            ok: true,
            r#in: job.input.display().to_string(),
            out: job.output.map(|p| p.display().to_string()),
            stats: Some(out.mono_map.stats.clone()),
            diagnostics_schema_version: GOMONO_DIAG_SCHEMA_VERSION,
            diagnostics_count: 0,
            diagnostics: Vec::new(),
            exit_code: 0,
        };
        print_json(&report)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn fail_report(job: &Job<'_>, diag: diagnostics::Diagnostic, exit_code: u8) -> Result<ExitCode> {
    let report = GomonoToolReport {
        schema_version: GOMONO_REPORT_SCHEMA_VERSION,
        command: job.command,
        ok: false,
        r#in: job.input.display().to_string(),
        out: None,
        stats: None,
        diagnostics_schema_version: GOMONO_DIAG_SCHEMA_VERSION,
        diagnostics_count: 1,
        diagnostics: vec![diag],
        exit_code,
    };
    print_json(&report)?;
    Ok(ExitCode::from(exit_code))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn canon_json_text(value: &impl Serialize) -> Result<String> {
    let mut v = serde_json::to_value(value)?;
    tree::canon_value_jcs(&mut v);
    Ok(serde_json::to_string(&v)? + "\n")
}

/// Stage every file next to its destination, then move them all into place.
///
/// A failure while staging removes what was staged, so no destination is touched.
fn write_outputs(files: &[(&Path, &str)]) -> Result<()> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(files.len());
    for &(path, text) in files {
        match stage_next_to(path, text) {
            Ok(tmp) => staged.push((tmp, path)),
            Err(err) => {
                for (tmp, _) in &staged {
                    let _ = std::fs::remove_file(tmp);
                }
                return Err(err);
            }
        }
    }
    for (tmp, path) in staged {
        if std::fs::rename(&tmp, path).is_err() {
            let _ = std::fs::remove_file(path);
            std::fs::rename(&tmp, path).with_context(|| format!("rename: {}", path.display()))?;
        }
    }
    Ok(())
}

fn stage_next_to(path: &Path, text: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }
    let tmp = temp_path_next_to(path);
    std::fs::write(&tmp, text.as_bytes())
        .with_context(|| format!("write temp: {}", tmp.display()))?;
    Ok(tmp)
}

fn temp_path_next_to(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()))
}

pub mod cli;
pub mod codegen;
pub mod compile;
pub mod config;
pub mod data;
pub mod error;
pub mod expr;
pub mod io_utils;
pub mod localization;
pub mod payload;
pub mod pipeline;
pub mod processors;
pub mod reference;
pub mod schema;
pub mod sheet;
pub mod structured;
pub mod table;
pub mod tags;
pub mod types;
pub mod validation;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, error, info, warn};

use crate::{
    cli::{Cli, Commands, CompileArgs, InspectArgs},
    compile::Compiler,
    config::CompilerConfig,
    reference::KnownTypes,
};

static LOGGER: OnceLock<()> = OnceLock::new();

pub const LOCALIZATION_FILE: &str = "localization.csv";

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabledef", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Compile(args) => handle_compile(&args),
        Commands::Inspect(args) => handle_inspect(&args),
    }
}

fn load_known_types(args: &CompileArgs) -> Result<KnownTypes> {
    let mut known = match &args.known_types_dir {
        Some(dir) => KnownTypes::discover(dir)
            .with_context(|| format!("Discovering known types in {dir:?}"))?,
        None => KnownTypes::with_defaults(),
    };
    known.extend(args.known_types.iter().cloned());
    Ok(known)
}

fn handle_compile(args: &CompileArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => CompilerConfig::load(path)
            .with_context(|| format!("Loading configuration from {path:?}"))?,
        None => CompilerConfig::default(),
    };
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let paths = io_utils::discover_tables(&args.inputs)?;
    if paths.is_empty() {
        bail!("No table files found in the given inputs");
    }
    let sheets = paths
        .iter()
        .map(|path| io_utils::load_sheet(path, encoding))
        .collect::<Result<Vec<_>>>()?;

    let compiler = Compiler::new(config, load_known_types(args)?);
    let report = compiler.compile_all(sheets)?;

    for result in &report.results {
        if !result.success {
            for message in &result.errors {
                error!("{}: {message}", result.table);
            }
            continue;
        }
        write_table_artifacts(&args.output, result, args.emit_schema)?;
    }
    let localization = report.localization();
    if !localization.is_empty() {
        let path = args.output.join(LOCALIZATION_FILE);
        let writer = io_utils::create_output(&path)?;
        localization
            .write_csv(writer)
            .with_context(|| format!("Writing {path:?}"))?;
        info!("Wrote {} localization key(s) to {:?}", localization.len(), path);
    }
    for message in &report.cycle_errors {
        error!("{message}");
    }

    let failed = report.failed_tables();
    if !failed.is_empty() || !report.cycle_errors.is_empty() {
        bail!(
            "Compilation failed: {} table(s) failed ({}), {} circular reference error(s)",
            failed.len(),
            failed.join(", "),
            report.cycle_errors.len()
        );
    }
    info!(
        "Compiled {} table(s) into {:?}",
        report.results.len(),
        args.output
    );
    Ok(())
}

fn write_table_artifacts(
    output: &Path,
    result: &pipeline::PipelineResult,
    emit_schema: bool,
) -> Result<()> {
    let payload_path = output.join(format!("{}.bin", result.table));
    io_utils::write_artifact(&payload_path, &result.payload)?;
    for (relative, contents) in &result.generated_files {
        io_utils::write_artifact(&output.join(relative), contents.as_bytes())?;
    }
    if emit_schema && let Some(schema) = &result.schema {
        let path = output.join(format!("{}.schema.json", result.table));
        io_utils::write_artifact(&path, schema.to_json()?.as_bytes())?;
    }
    if !result.warnings.is_empty() {
        warn!(
            "{}: compiled with {} warning(s)",
            result.table,
            result.warnings.len()
        );
    }
    info!(
        "{}: {} byte(s), digest {}",
        result.table,
        result.payload.len(),
        result.payload_digest.as_deref().unwrap_or("-")
    );
    Ok(())
}

fn handle_inspect(args: &InspectArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let sheet = io_utils::load_sheet(&args.input, encoding)?;
    let resolution = schema::resolve_schema(&sheet, &args.namespace)
        .with_context(|| format!("Resolving schema of {:?}", args.input))?;
    for diagnostic in &resolution.diagnostics {
        warn!("{}: {diagnostic}", sheet.name);
    }
    if args.json {
        println!("{}", resolution.schema.to_json()?);
    } else {
        table::print_schema(&resolution.schema);
    }
    Ok(())
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Compile tag-annotated configuration tables into schemas, code and binary record sets",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compile one or more tables into payloads, generated code and a localization table
    Compile(CompileArgs),
    /// Print the resolved schema of a table
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
pub struct CompileArgs {
    /// Table files or directories containing .csv/.tsv tables
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// Directory receiving compiled artifacts
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// YAML compiler configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory whose table file names are valid reference targets
    #[arg(long = "known-types-dir")]
    pub known_types_dir: Option<PathBuf>,
    /// Additional valid reference target (repeatable)
    #[arg(long = "known-type", action = clap::ArgAction::Append)]
    pub known_types: Vec<String>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Also write the resolved schema of each table as JSON
    #[arg(long = "emit-schema")]
    pub emit_schema: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Table file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Namespace recorded on the schema
    #[arg(long, default_value = "")]
    pub namespace: String,
    /// Print the schema as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

//! CLI argument parsing for calltrace

use std::path::PathBuf;

use clap::Parser;

use crate::config::BlockReturnPolicy;

#[derive(Parser, Debug)]
#[command(name = "calltrace")]
#[command(version)]
#[command(about = "Method-call tracer: replays runtime notifications into a CSV call graph", long_about = None)]
pub struct Cli {
    /// Recorded notification script (JSON lines, `-` for stdin)
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Write records to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Filter expression (e.g., -e exclude=vendor/,/gems/ or -e only=Outer,Inner)
    #[arg(short = 'e', long = "expr", value_name = "EXPR")]
    pub filter: Option<String>,

    /// Log every call and return instead of deduplicated call edges
    #[arg(long = "events")]
    pub events: bool,

    /// Load tracer settings from a TOML file (flags override it)
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// How to treat block returns that surface above their call
    #[arg(long = "block-returns", value_enum, value_name = "POLICY")]
    pub block_returns: Option<BlockReturnPolicy>,

    /// Report the nearest non-filtered ancestor as the caller
    #[arg(long = "nearest-visible-caller")]
    pub nearest_visible_caller: bool,

    /// Also emit edges whose caller is the trace root
    #[arg(long = "root-calls")]
    pub root_calls: bool,

    /// Print a summary of tracer counters to stderr
    #[arg(short = 'c', long = "summary")]
    pub summary: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

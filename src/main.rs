use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use calltrace::cli::Cli;
use calltrace::config::{CallerPolicy, TracerConfig};
use calltrace::filter::FilterPolicy;
use calltrace::replay::{self, ReplaySummary, Replayer, ScriptOp};
use calltrace::runtime::ScriptedRuntime;
use calltrace::session::TracerSession;
use calltrace::sink::OutputSink;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Config file first, then command-line overrides
fn build_config(args: &Cli) -> Result<TracerConfig> {
    let mut config = match &args.config {
        Some(path) => TracerConfig::from_file(path)?,
        None => TracerConfig::default(),
    };
    if args.events {
        config.flatten = false;
    }
    if let Some(expr) = &args.filter {
        config.filter = FilterPolicy::from_expr(expr)?;
    }
    if let Some(policy) = args.block_returns {
        config.block_returns = policy;
    }
    if args.nearest_visible_caller {
        config.caller_policy = CallerPolicy::NearestVisible;
    }
    if args.root_calls {
        config.root_calls = true;
    }
    Ok(config)
}

fn load_script(path: &Path) -> Result<Vec<ScriptOp>> {
    if path == Path::new("-") {
        return replay::parse_script(io::stdin().lock());
    }
    let file =
        File::open(path).with_context(|| format!("Failed to open script {}", path.display()))?;
    replay::parse_script(BufReader::new(file))
        .with_context(|| format!("In script {}", path.display()))
}

fn print_replay_summary(summary: &ReplaySummary) {
    eprintln!();
    eprintln!("{:<30} {:>12}", "Script operations", summary.ops);
    eprintln!("{:<30} {:>12}", "Delivered notifications", summary.delivered);
    eprintln!("{:<30} {:>12}", "Undelivered (tracing off)", summary.undelivered);
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = build_config(&args)?;
    let ops = load_script(&args.script)?;

    let sink = match &args.output {
        Some(path) => OutputSink::create(path)?,
        None => OutputSink::stdout(),
    };
    let runtime = ScriptedRuntime::default();
    let mut session = TracerSession::open(config, sink, runtime.clone())?;

    let summary = Replayer::new(runtime).run(&mut session, &ops)?;
    session.close()?;

    if args.summary {
        session.stats().print_summary();
        print_replay_summary(&summary);
    }
    Ok(())
}

//! Entry point: pre-flight, breakpoint planning, then the watch session

use std::path::Path;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::warn;
use varwatch::args::Args;
use varwatch::breakpoints::BreakpointSet;
use varwatch::output::Reporter;
use varwatch::session::Session;
use varwatch::{dump, logging};
use varwatch_analysis::{AnalysisConfig, AnalysisError};
use varwatch_dwarf::{DebugFacts, DwarfError};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init();

    let facts = DebugFacts::analyze(
        Path::new(&args.executable),
        &args.function,
        args.scope_filter(),
        &args.watch_filter(),
    )
    .with_context(|| format!("cannot analyze {}", args.executable))?;

    if !facts.language.is_supported() {
        return Err(DwarfError::UnsupportedLanguage)
            .with_context(|| format!("cannot debug {}", args.executable));
    }

    let breakpoints = plan_breakpoints(&args, &facts)?;

    if args.dump_all {
        let mut out = Reporter::open_sink(args.output.as_deref())?;
        dump::write_summary(&mut out, &facts, &breakpoints)?;
        return Ok(());
    }

    let reporter = build_reporter(&args, &facts)?;
    Session::new(facts, breakpoints, reporter).run(&args.executable, &args.target_argv())
}

/// Full statement set by default; the static pre-pass narrows it when
/// requested
fn plan_breakpoints(args: &Args, facts: &DebugFacts) -> anyhow::Result<BreakpointSet> {
    if !args.static_analysis {
        return Ok(statement_breakpoints(args, facts));
    }

    let source = facts
        .source_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("debug info names no source file for the analysis"))?;

    let config = AnalysisConfig {
        includes: args.include.clone(),
        defines: args.define.clone(),
        undefines: args.undefine.clone(),
        standard: args.standard.clone(),
    };

    match varwatch_analysis::assignment_lines(source, &args.function, &config) {
        Ok(lines) => {
            let planned =
                varwatch_analysis::plan_breakpoints(&lines, &facts.lines, &facts.function);
            Ok(BreakpointSet::from_planned(&planned))
        }
        // A missing source was asked for explicitly; that cannot be papered
        // over.
        Err(error @ AnalysisError::SourceMissing(_)) => Err(error.into()),
        Err(error) => {
            warn!(
                "static analysis unavailable ({}); falling back to the full \
                 statement table",
                error
            );
            Ok(statement_breakpoints(args, facts))
        }
    }
}

/// The full BeginStmt breakpoint set, where the unsafe duplicate-line
/// policy actually applies
fn statement_breakpoints(args: &Args, facts: &DebugFacts) -> BreakpointSet {
    if args.avoid_equal_statements {
        warn!(
            "--avoid-equal-statements is unsafe: changes inside a repeated \
             source line may report a neighbouring line number"
        );
    }
    BreakpointSet::from_lines(&facts.lines, args.avoid_equal_statements)
}

fn build_reporter(args: &Args, facts: &DebugFacts) -> anyhow::Result<Reporter> {
    let sink = Reporter::open_sink(args.output.as_deref())
        .context("cannot open the report output")?;

    if !args.show_lines {
        return Ok(Reporter::plain(sink));
    }

    let Some(source) = facts.source_path.as_deref() else {
        bail!("--show-lines requested but the debug info names no source file");
    };
    let lines = Reporter::load_source(source).with_context(|| {
        format!(
            "--show-lines requested but {} is not readable",
            source.display()
        )
    })?;
    Ok(Reporter::detailed(sink, lines, args.context as usize))
}

//! Static assignment analysis over the target C source
//!
//! An optional pre-pass that parses the debugged function's source and
//! keeps breakpoints only on lines that can actually mutate a watchable
//! variable: assignment-like expressions whose left-most symbol is in
//! scope, declarations with initialisers, and any function call (a call may
//! mutate every visible variable through aliasing, so under-approximating
//! there would lose changes).
//!
//! The parser is the `lang-c` driver, which runs the system preprocessor
//! and exposes a typed AST with byte spans; spans are mapped back to source
//! lines through the preprocessor's line markers.

mod linemap;
mod scopes;
mod walk;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use lang_c::driver::{self, Config, Flavor};
use tracing::{debug, warn};
use varwatch_dwarf::{FunctionSpan, LineRow};

pub use scopes::WatchableNames;

/// Errors raised by the static pre-pass
#[derive(thiserror::Error, Debug)]
pub enum AnalysisError {
    #[error("source file {0} is missing or unreadable")]
    SourceMissing(PathBuf),
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("function '{0}' not found in the source")]
    FunctionNotFound(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Preprocessor and dialect knobs forwarded to the parser driver
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    /// -I include directories
    pub includes: Vec<PathBuf>,
    /// -D macro definitions ("NAME" or "NAME=VALUE")
    pub defines: Vec<String>,
    /// -U macro undefinitions
    pub undefines: Vec<String>,
    /// -std value (e.g. "gnu11", "c99"); defaults to gnu11
    pub standard: Option<String>,
}

/// A breakpoint location selected by the pre-pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedBreakpoint {
    pub addr: u64,
    /// 0 marks a synthetic entry (function first instruction)
    pub line: u32,
}

/// Parse `source` and collect the numbers of every line inside `function`
/// that may mutate a watchable variable.
pub fn assignment_lines(
    source: &Path,
    function: &str,
    config: &AnalysisConfig,
) -> Result<BTreeSet<u32>> {
    if !source.is_file() {
        return Err(AnalysisError::SourceMissing(source.to_path_buf()));
    }

    let driver_config = driver_config(config);
    let parse = driver::parse(&driver_config, source).map_err(|error| AnalysisError::Parse {
        path: source.to_path_buf(),
        message: error.to_string(),
    })?;

    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    assignment_lines_in_parse(&parse, &file_name, function)
}

/// The walk itself, separated from the preprocessor invocation so tests can
/// feed pre-expanded source
pub fn assignment_lines_in_parse(
    parse: &driver::Parse,
    file_name: &str,
    function: &str,
) -> Result<BTreeSet<u32>> {
    let map = linemap::LineMap::build(&parse.source);
    let names = scopes::WatchableNames::collect(&parse.unit, function);

    let lines = walk::mutated_lines(&parse.unit, function, &names, &map, file_name)
        .ok_or_else(|| AnalysisError::FunctionNotFound(function.to_string()))?;

    debug!("static analysis kept {} candidate lines", lines.len());
    Ok(lines)
}

/// Resolve recorded line numbers against the full statement table into the
/// exact breakpoint set.
///
/// Every BeginStmt row of a recorded line contributes its address (first
/// occurrence wins on duplicates), and two synthetic entries are always
/// present: the function's first instruction and the last row of the
/// function's line range. The result is by construction a subset of the
/// full line-table breakpoint set plus those two.
pub fn plan_breakpoints(
    lines: &BTreeSet<u32>,
    table: &[LineRow],
    span: &FunctionSpan,
) -> Vec<PlannedBreakpoint> {
    let mut planned: Vec<PlannedBreakpoint> = Vec::new();
    let mut taken: BTreeSet<u64> = BTreeSet::new();

    // The watch loop expects a breakpoint on the very first instruction.
    planned.push(PlannedBreakpoint {
        addr: span.low_pc,
        line: 0,
    });
    taken.insert(span.low_pc);

    // And one on the last row, so the function is observed once more before
    // control leaves it.
    if let Some(last) = table.last() {
        if taken.insert(last.addr) {
            planned.push(PlannedBreakpoint {
                addr: last.addr,
                line: last.line,
            });
        }
    }

    for row in table {
        if !row.is_stmt || row.line == 0 {
            continue;
        }
        if !lines.contains(&row.line) {
            continue;
        }
        if taken.insert(row.addr) {
            planned.push(PlannedBreakpoint {
                addr: row.addr,
                line: row.line,
            });
        }
    }

    planned
}

fn driver_config(config: &AnalysisConfig) -> Config {
    let mut driver_config = Config::default();

    let standard = config.standard.as_deref().unwrap_or("gnu11");
    driver_config.flavor = if standard.starts_with("gnu") {
        Flavor::GnuC11
    } else {
        Flavor::StdC11
    };
    driver_config.cpp_options.push(format!("-std={standard}"));

    for dir in &config.includes {
        driver_config
            .cpp_options
            .push(format!("-I{}", dir.display()));
    }
    for define in &config.defines {
        driver_config.cpp_options.push(format!("-D{define}"));
    }
    for undefine in &config.undefines {
        driver_config.cpp_options.push(format!("-U{undefine}"));
    }

    if !config.undefines.is_empty() || !config.defines.is_empty() {
        warn!(
            "preprocessor overrides in effect: {} defines, {} undefines",
            config.defines.len(),
            config.undefines.len()
        );
    }

    driver_config
}

#[cfg(test)]
mod tests {
    use super::*;
    use varwatch_dwarf::FunctionSpan;

    fn row(addr: u64, line: u32, is_stmt: bool) -> LineRow {
        LineRow {
            addr,
            line,
            is_stmt,
            end_sequence: false,
            basic_block: false,
        }
    }

    #[test]
    fn planned_set_is_subset_of_statement_rows_plus_synthetics() {
        let table = vec![
            row(0x100, 10, true),
            row(0x108, 11, true),
            row(0x110, 12, false),
            row(0x118, 12, true),
            row(0x120, 13, true),
        ];
        let span = FunctionSpan {
            low_pc: 0x100,
            high_pc: 0x12f,
            frame_base_offset: 0,
        };

        let lines: BTreeSet<u32> = [11, 12].into_iter().collect();
        let planned = plan_breakpoints(&lines, &table, &span);

        // Synthetic entry breakpoint first.
        assert_eq!(planned[0].addr, 0x100);
        assert_eq!(planned[0].line, 0);

        // Synthetic last-row breakpoint.
        assert!(planned.iter().any(|bp| bp.addr == 0x120));

        // Recorded lines resolve only to their BeginStmt rows.
        assert!(planned.iter().any(|bp| bp.addr == 0x108));
        assert!(planned.iter().any(|bp| bp.addr == 0x118));
        assert!(!planned.iter().any(|bp| bp.addr == 0x110));

        // No duplicates.
        let mut addrs: Vec<u64> = planned.iter().map(|bp| bp.addr).collect();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), planned.len());
    }

    #[test]
    fn unknown_lines_resolve_to_synthetics_only() {
        let table = vec![row(0x100, 10, true), row(0x108, 11, true)];
        let span = FunctionSpan {
            low_pc: 0x100,
            high_pc: 0x10f,
            frame_base_offset: 0,
        };

        let lines: BTreeSet<u32> = [99].into_iter().collect();
        let planned = plan_breakpoints(&lines, &table, &span);

        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].addr, 0x100);
        assert_eq!(planned[1].addr, 0x108);
    }
}

//! End-to-end tests against real compiled fixtures
//!
//! Each test builds a small C program with the flags the tool requires
//! (-O0 -gdwarf-2 -no-pie -fno-omit-frame-pointer) and is skipped when no
//! compiler is available. The full-session tests additionally skip when the
//! sandbox forbids ptrace.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use varwatch::breakpoints::BreakpointSet;
use varwatch::output::Reporter;
use varwatch::session::Session;
use varwatch_dwarf::{
    DebugFacts, DwarfError, Encoding, ScopeFilter, TypeClass, VarScope, WatchFilter,
};

const FIXTURE: &str = r#"
#include <stdint.h>

int64_t g_counter = 0;
int series[10];
int matrix[3][4][5];
int *cursor;

void side(void)
{
    g_counter += 1;
}

int watched(int seed)
{
    int a = 3;
    double d;
    int i;

    cursor = (int *)0x1000;

    for (i = 0; i < 10; i++)
        series[i] = i + 1;

    matrix[1][2][3]++;

    d = 2.5;
    d = d + seed;

    side();

    a = a + (int)d;
    return a;
}

int factorial(int n)
{
    int result;
    result = n;
    if (n > 1)
        result = n * factorial(n - 1);
    return result;
}

int main(void)
{
    int r = watched(4);
    r += factorial(3);
    return (r == 0) ? 1 : 0;
}
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    binary: PathBuf,
    source: PathBuf,
}

/// Compile the fixture, or None when no usable compiler is present
fn build_fixture(extra_flags: &[&str]) -> Option<Fixture> {
    let dir = tempfile::tempdir().ok()?;
    let source = dir.path().join("fixture.c");
    let binary = dir.path().join("fixture");
    fs::write(&source, FIXTURE).ok()?;

    let mut command = Command::new("gcc");
    command
        .arg("-O0")
        .arg("-gdwarf-2")
        .arg("-no-pie")
        .arg("-fno-omit-frame-pointer")
        .args(extra_flags)
        .arg("-o")
        .arg(&binary)
        .arg(&source);

    let status = command.status().ok()?;
    if !status.success() {
        return None;
    }

    Some(Fixture {
        _dir: dir,
        binary,
        source,
    })
}

fn analyze(fixture: &Fixture, function: &str, filter: &WatchFilter) -> DebugFacts {
    DebugFacts::analyze(&fixture.binary, function, ScopeFilter::default(), filter)
        .expect("fixture must analyze")
}

/// Run a watch session with the report captured in a file; None when the
/// sandbox forbids tracing
fn run_session(fixture: &Fixture, function: &str) -> Option<String> {
    let report = fixture.binary.with_extension("report");
    let facts = analyze(fixture, function, &WatchFilter::All);
    let breakpoints = BreakpointSet::from_lines(&facts.lines, false);
    let sink = Reporter::open_sink(Some(&report)).ok()?;
    let session = Session::new(facts, breakpoints, Reporter::plain(sink));

    let argv = vec![fixture.binary.to_string_lossy().into_owned()];
    match session.run(&fixture.binary.to_string_lossy(), &argv) {
        Ok(()) => fs::read_to_string(&report).ok(),
        Err(error) => {
            eprintln!("skipping: tracing unavailable here ({error:#})");
            None
        }
    }
}

#[test]
fn facts_cover_function_variables_and_lines() {
    let Some(fixture) = build_fixture(&[]) else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let facts = analyze(&fixture, "watched", &WatchFilter::All);

    assert!(facts.function.low_pc < facts.function.high_pc);
    assert!(facts.language.is_supported());
    assert!(facts.lines.iter().any(|row| row.is_stmt));
    assert!(facts
        .lines
        .iter()
        .all(|row| facts.function.contains(row.addr)));

    let find = |name: &str| {
        facts
            .variables
            .iter()
            .find(|v| v.name == name)
            .unwrap_or_else(|| panic!("variable {name} must be found"))
    };

    let counter = find("g_counter");
    assert_eq!(counter.scope, VarScope::Global);
    assert_eq!(counter.byte_size, 8);
    assert_eq!(counter.encoding, Encoding::Signed);

    let a = find("a");
    assert_eq!(a.scope, VarScope::Local);
    assert_eq!(a.type_class, TypeClass::Scalar);
    assert_eq!(a.byte_size, 4);

    let seed = find("seed");
    assert_eq!(seed.scope, VarScope::Local);

    let series = find("series");
    let shape = series.array.as_ref().expect("series is an array");
    assert_eq!(shape.extents, vec![10]);
    assert_eq!(shape.element_size, 4);
    assert_eq!(series.byte_size, 40);

    let matrix = find("matrix");
    let shape = matrix.array.as_ref().expect("matrix is an array");
    assert_eq!(shape.extents, vec![3, 4, 5]);
    assert_eq!(matrix.byte_size, 3 * 4 * 5 * 4);

    let cursor = find("cursor");
    assert_eq!(cursor.type_class, TypeClass::Pointer);
    assert_eq!(cursor.encoding, Encoding::Pointer);
}

#[test]
fn ignore_list_filters_variables_out() {
    let Some(fixture) = build_fixture(&[]) else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let ignored: std::collections::HashSet<String> =
        ["a", "seed"].iter().map(|s| s.to_string()).collect();
    let facts = analyze(&fixture, "watched", &WatchFilter::Ignore(ignored));

    assert!(!facts.variables.iter().any(|v| v.name == "a"));
    assert!(!facts.variables.iter().any(|v| v.name == "seed"));
    assert!(facts.variables.iter().any(|v| v.name == "d"));
}

#[test]
fn missing_function_is_reported() {
    let Some(fixture) = build_fixture(&[]) else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let result = DebugFacts::analyze(
        &fixture.binary,
        "no_such_function",
        ScopeFilter::default(),
        &WatchFilter::All,
    );
    assert!(matches!(result, Err(DwarfError::FunctionNotFound(_))));
}

#[test]
fn pie_binaries_are_refused() {
    let Some(dir) = tempfile::tempdir().ok() else {
        return;
    };
    let source = dir.path().join("pie.c");
    let binary = dir.path().join("pie");
    fs::write(&source, "int main(void) { return 0; }\n").unwrap();

    let status = Command::new("gcc")
        .args(["-O0", "-gdwarf-2", "-pie", "-fPIE", "-o"])
        .arg(&binary)
        .arg(&source)
        .status();
    let Ok(status) = status else {
        eprintln!("skipping: no C compiler");
        return;
    };
    if !status.success() {
        eprintln!("skipping: compiler refused -pie");
        return;
    }

    let result = DebugFacts::analyze(
        &binary,
        "main",
        ScopeFilter::default(),
        &WatchFilter::All,
    );
    assert!(matches!(result, Err(DwarfError::PieExecutable)));
}

#[test]
fn session_reports_scalar_array_and_global_changes() {
    let Some(fixture) = build_fixture(&[]) else {
        eprintln!("skipping: no C compiler");
        return;
    };
    let Some(report) = run_session(&fixture, "watched") else {
        return;
    };

    assert!(report.contains("Entering function..."));
    assert!(report.contains("Returning to function..."));

    // Local scalar initialisation with the canonical zero before-value.
    assert!(report.contains("(a) initialized!, before: 0, after: 3"));

    // Global changed through a sub-call.
    assert!(report.contains("[global] (g_counter) has changed!, before: 0, after: 1"));

    // 1-D array: every element reported with its index.
    assert!(report.contains("(series[0]) has changed!, before: 0, after: 1"));
    assert!(report.contains("(series[9]) has changed!, before: 0, after: 10"));

    // 3-D array: a single cell with the full index path.
    assert!(report.contains("(matrix[1][2][3]) has changed!, before: 0, after: 1"));
    assert!(!report.contains("(matrix[0][0][0])"));

    // Pointer value in hex.
    assert!(report.contains("(cursor) has changed!, before: 0x0, after: 0x1000"));

    // Float formatting.
    assert!(report.contains("(d) initialized!, before: 0.0, after: 2.5"));
}

#[test]
fn session_tracks_recursion_per_context() {
    let Some(fixture) = build_fixture(&[]) else {
        eprintln!("skipping: no C compiler");
        return;
    };
    let Some(report) = run_session(&fixture, "factorial") else {
        return;
    };

    // factorial(3) enters at depths 1..=3.
    assert!(report.contains("[depth: 1] Entering function..."));
    assert!(report.contains("[depth: 2] Entering function..."));
    assert!(report.contains("[depth: 3] Entering function..."));
    assert!(report.contains("[depth: 3] Returning to function..."));
    assert!(report.contains("[depth: 1] Returning to function..."));

    // result is initialised separately in each context.
    assert!(report.contains("(result) initialized!, before: 0, after: 3"));
    assert!(report.contains("(result) initialized!, before: 0, after: 2"));
    assert!(report.contains("(result) initialized!, before: 0, after: 1"));

    // The outer frame sees its multiply: 3 * factorial(2) = 6.
    assert!(report.contains("(result) has changed!, before: 3, after: 6"));
}

#[test]
fn ignored_variables_never_appear_in_the_report() {
    let Some(fixture) = build_fixture(&[]) else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let report = fixture.binary.with_extension("ignore-report");
    let ignored: std::collections::HashSet<String> =
        ["series", "a"].iter().map(|s| s.to_string()).collect();
    let facts = DebugFacts::analyze(
        &fixture.binary,
        "watched",
        ScopeFilter::default(),
        &WatchFilter::Ignore(ignored),
    )
    .expect("fixture must analyze");
    let breakpoints = BreakpointSet::from_lines(&facts.lines, false);
    let Ok(sink) = Reporter::open_sink(Some(&report)) else {
        return;
    };
    let session = Session::new(facts, breakpoints, Reporter::plain(sink));
    let argv = vec![fixture.binary.to_string_lossy().into_owned()];
    if session
        .run(&fixture.binary.to_string_lossy(), &argv)
        .is_err()
    {
        eprintln!("skipping: tracing unavailable here");
        return;
    }

    let report = fs::read_to_string(&report).unwrap_or_default();
    assert!(!report.contains("(series"));
    assert!(!report.contains("(a)"));
    assert!(report.contains("(g_counter)"));
}

#[test]
fn static_analysis_lines_are_a_subset_of_statement_lines() {
    let Some(fixture) = build_fixture(&[]) else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let facts = analyze(&fixture, "watched", &WatchFilter::All);
    let config = varwatch_analysis::AnalysisConfig::default();
    let lines = match varwatch_analysis::assignment_lines(&fixture.source, "watched", &config) {
        Ok(lines) => lines,
        Err(error) => {
            eprintln!("skipping: preprocessor unavailable ({error})");
            return;
        }
    };

    assert!(!lines.is_empty());

    let planned = varwatch_analysis::plan_breakpoints(&lines, &facts.lines, &facts.function);
    let full = BreakpointSet::from_lines(&facts.lines, false);

    // Everything the pre-pass plans (bar the synthetic entry) must exist in
    // the full statement set.
    for bp in planned {
        if bp.addr == facts.function.low_pc {
            continue;
        }
        assert!(
            full.get(bp.addr).is_some(),
            "planned breakpoint at 0x{:x} must be a statement breakpoint",
            bp.addr
        );
    }
}

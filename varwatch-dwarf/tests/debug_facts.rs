//! Fact-extraction tests against compiled fixtures
//!
//! Skipped when no C compiler is present; everything else is deterministic
//! DWARF reading, no tracing involved.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use varwatch_dwarf::{
    DebugFacts, DwarfError, Encoding, Language, ScopeFilter, TypeClass, VarLocation, VarScope,
    WatchFilter,
};

const FIXTURE: &str = r#"
typedef int counter_t;
typedef counter_t deep_counter_t;

enum mode { MODE_OFF, MODE_ON };

struct pair { int x; int y; };

int g_plain = 1;
counter_t g_typedef;
deep_counter_t g_deep_typedef;
enum mode g_mode;
struct pair g_pair;
unsigned short g_u16;
float g_f32;
double g_f64;
char *g_text;

int probed(int arg)
{
    int local_int;
    static int local_static = 7;
    struct pair local_pair;
    double grid[2][3];

    local_int = arg + local_static;
    local_pair.x = local_int;
    grid[1][2] = 0.5;
    g_mode = MODE_ON;
    return local_int + local_pair.x;
}

int main(void)
{
    return probed(1) == 0;
}
"#;

fn build() -> Option<PathBuf> {
    let dir = tempfile::tempdir().ok()?;
    let source = dir.path().join("facts.c");
    let binary = dir.path().join("facts");
    fs::write(&source, FIXTURE).ok()?;

    let status = Command::new("gcc")
        .args(["-O0", "-gdwarf-2", "-no-pie", "-fno-omit-frame-pointer", "-o"])
        .arg(&binary)
        .arg(&source)
        .status()
        .ok()?;
    if !status.success() {
        return None;
    }

    // Keep the directory alive by leaking it; the OS reclaims tmp space.
    std::mem::forget(dir);
    Some(binary)
}

fn facts(binary: &PathBuf, scope: ScopeFilter, filter: &WatchFilter) -> DebugFacts {
    DebugFacts::analyze(binary, "probed", scope, filter).expect("fixture must analyze")
}

#[test]
fn typedef_chains_resolve_to_the_base_type() {
    let Some(binary) = build() else {
        eprintln!("skipping: no C compiler");
        return;
    };
    let facts = facts(&binary, ScopeFilter::default(), &WatchFilter::All);

    for name in ["g_typedef", "g_deep_typedef"] {
        let var = facts
            .variables
            .iter()
            .find(|v| v.name == name)
            .unwrap_or_else(|| panic!("{name} must be found"));
        assert_eq!(var.type_class, TypeClass::Scalar);
        assert_eq!(var.encoding, Encoding::Signed);
        assert_eq!(var.byte_size, 4);
    }
}

#[test]
fn aggregates_are_recognised_and_dropped() {
    let Some(binary) = build() else {
        eprintln!("skipping: no C compiler");
        return;
    };
    let facts = facts(&binary, ScopeFilter::default(), &WatchFilter::All);

    assert!(!facts.variables.iter().any(|v| v.name == "g_pair"));
    assert!(!facts.variables.iter().any(|v| v.name == "local_pair"));
}

#[test]
fn enums_carry_their_byte_size() {
    let Some(binary) = build() else {
        eprintln!("skipping: no C compiler");
        return;
    };
    let facts = facts(&binary, ScopeFilter::default(), &WatchFilter::All);

    let mode = facts
        .variables
        .iter()
        .find(|v| v.name == "g_mode")
        .expect("g_mode must be found");
    assert_eq!(mode.type_class, TypeClass::Enum);
    assert_eq!(mode.byte_size, 4);
}

#[test]
fn statics_inside_the_function_classify_as_globals() {
    let Some(binary) = build() else {
        eprintln!("skipping: no C compiler");
        return;
    };
    let facts = facts(&binary, ScopeFilter::default(), &WatchFilter::All);

    let local_static = facts
        .variables
        .iter()
        .find(|v| v.name == "local_static")
        .expect("local_static must be found");
    assert_eq!(local_static.scope, VarScope::Global);
    assert!(matches!(local_static.location, VarLocation::Address(_)));

    let local_int = facts
        .variables
        .iter()
        .find(|v| v.name == "local_int")
        .expect("local_int must be found");
    assert_eq!(local_int.scope, VarScope::Local);
    assert!(matches!(local_int.location, VarLocation::FrameOffset(_)));
}

#[test]
fn scope_filters_restrict_collection() {
    let Some(binary) = build() else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let only_globals = facts(
        &binary,
        ScopeFilter {
            globals: true,
            locals: false,
        },
        &WatchFilter::All,
    );
    assert!(only_globals.variables.iter().any(|v| v.name == "g_plain"));
    assert!(!only_globals.variables.iter().any(|v| v.name == "local_int"));

    let only_locals = facts(
        &binary,
        ScopeFilter {
            globals: false,
            locals: true,
        },
        &WatchFilter::All,
    );
    assert!(!only_locals.variables.iter().any(|v| v.name == "g_plain"));
    assert!(only_locals.variables.iter().any(|v| v.name == "local_int"));
}

#[test]
fn local_arrays_keep_their_shape() {
    let Some(binary) = build() else {
        eprintln!("skipping: no C compiler");
        return;
    };
    let facts = facts(&binary, ScopeFilter::default(), &WatchFilter::All);

    let grid = facts
        .variables
        .iter()
        .find(|v| v.name == "grid")
        .expect("grid must be found");
    let shape = grid.array.as_ref().expect("grid is an array");
    assert_eq!(shape.extents, vec![2, 3]);
    assert_eq!(shape.element_size, 8);
    assert_eq!(grid.byte_size, 48);
    assert_eq!(grid.encoding, Encoding::Float);
}

#[test]
fn language_and_source_path_are_reported() {
    let Some(binary) = build() else {
        eprintln!("skipping: no C compiler");
        return;
    };
    let facts = facts(&binary, ScopeFilter::default(), &WatchFilter::All);

    assert!(matches!(
        facts.language,
        Language::C89 | Language::C99 | Language::C11
    ));
    let source = facts.source_path.expect("source path must be present");
    assert!(source.to_string_lossy().ends_with("facts.c"));
}

#[test]
fn watch_list_keeps_only_named_variables() {
    let Some(binary) = build() else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let watched: std::collections::HashSet<String> =
        ["local_int".to_string()].into_iter().collect();
    let facts = facts(&binary, ScopeFilter::default(), &WatchFilter::Watch(watched));

    assert_eq!(facts.variables.len(), 1);
    assert_eq!(facts.variables[0].name, "local_int");
}

#[test]
fn unknown_function_fails_cleanly() {
    let Some(binary) = build() else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let result = DebugFacts::analyze(
        &binary,
        "absent",
        ScopeFilter::default(),
        &WatchFilter::All,
    );
    assert!(matches!(result, Err(DwarfError::FunctionNotFound(_))));
}

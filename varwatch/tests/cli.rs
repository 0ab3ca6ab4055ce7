//! Exit-code and flag behaviour of the installed binary

use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn varwatch() -> Command {
    Command::new(env!("CARGO_BIN_EXE_varwatch"))
}

fn build_fixture() -> Option<PathBuf> {
    let dir = tempfile::tempdir().ok()?;
    let source = dir.path().join("cli.c");
    let binary = dir.path().join("cli");
    fs::write(
        &source,
        "int counter;\nint bump(void)\n{\n    counter += 1;\n    return counter;\n}\n\
         int main(void)\n{\n    return bump() == 0;\n}\n",
    )
    .ok()?;

    let status = Command::new("gcc")
        .args(["-O0", "-gdwarf-2", "-no-pie", "-fno-omit-frame-pointer", "-o"])
        .arg(&binary)
        .arg(&source)
        .status()
        .ok()?;
    if !status.success() {
        return None;
    }

    std::mem::forget(dir);
    Some(binary)
}

#[test]
fn conflicting_filter_flags_fail_before_anything_runs() {
    let output = varwatch()
        .args(["-i", "a", "-w", "b", "/bin/true", "main"])
        .output()
        .expect("binary must run");
    assert!(!output.status.success());
}

#[test]
fn missing_executable_exits_nonzero() {
    let output = varwatch()
        .args(["/no/such/file", "main"])
        .output()
        .expect("binary must run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot analyze"));
}

#[test]
fn missing_function_exits_nonzero_with_its_name() {
    let Some(binary) = build_fixture() else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let output = varwatch()
        .arg(&binary)
        .arg("does_not_exist")
        .output()
        .expect("binary must run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does_not_exist"));
}

#[test]
fn dump_all_prints_the_plan_and_exits_zero() {
    let Some(binary) = build_fixture() else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let output = varwatch()
        .arg("--dump-all")
        .arg(&binary)
        .arg("bump")
        .output()
        .expect("binary must run");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Variables:"));
    assert!(stdout.contains("counter"));
    assert!(stdout.contains("Lines:"));
    assert!(stdout.contains("Breakpoint list:"));
}

#[test]
fn dump_all_honours_the_output_redirect() {
    let Some(binary) = build_fixture() else {
        eprintln!("skipping: no C compiler");
        return;
    };

    let report = binary.with_extension("dump");
    let output = varwatch()
        .arg("--dump-all")
        .arg("-o")
        .arg(&report)
        .arg(&binary)
        .arg("bump")
        .output()
        .expect("binary must run");
    assert!(output.status.success());
    assert!(output.stdout.is_empty());

    let dumped = fs::read_to_string(&report).expect("redirect file must exist");
    assert!(dumped.contains("Breakpoint list:"));
}

#[test]
fn analysis_sub_flags_without_the_mode_are_rejected() {
    let output = varwatch()
        .args(["--std", "c11", "/bin/true", "main"])
        .output()
        .expect("binary must run");
    assert!(!output.status.success());
}

//! Contract tests for in-worker discovery and the run-scoped workspace.

use std::fs;
use std::path::Path;

use pushgate_core::discovery::metadata::{
    encode_registration, BinaryFormat, DeclaredType, OPT_OUT_KEY,
};
use pushgate_core::discovery::scan_directory;
use pushgate_core::{RunContext, ScopedKind};

fn exts(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn declared(name: &str, test_class: bool) -> DeclaredType {
    DeclaredType {
        name: name.to_string(),
        markers: if test_class {
            vec!["TestClass".to_string()]
        } else {
            Vec::new()
        },
    }
}

fn write(dir: &Path, name: &str, bytes: &[u8]) {
    fs::write(dir.join(name), bytes).unwrap();
}

/// Test: one corrupt binary among many does not hide the others
#[test]
fn test_scan_survives_corrupt_binaries() {
    let dir = tempfile::tempdir().unwrap();
    let formats = [
        BinaryFormat::Elf,
        BinaryFormat::Pe,
        BinaryFormat::MachO,
        BinaryFormat::Wasm,
    ];
    for (i, format) in formats.into_iter().enumerate() {
        write(
            dir.path(),
            &format!("Suite{i}.Tests.dll"),
            &encode_registration(format, &[], &[declared(&format!("Suite{i}.Tests"), true)]),
        );
    }
    write(dir.path(), "Truncated.dll", b"\x7fEL");
    write(
        dir.path(),
        "BadBlock.dll",
        b"MZ\x90\x00@@PUSHGATE-TESTREG@@{not json@@END-PUSHGATE-TESTREG@@",
    );

    let report = scan_directory(dir.path(), &exts(&["dll"]), None).unwrap();

    assert_eq!(report.containers.len(), 4);
    assert_eq!(report.skipped.len(), 2);
    assert!(report.opted_out.is_empty());
}

/// Test: opt-out binaries are never reported as containers
#[test]
fn test_opt_out_is_never_a_container() {
    let dir = tempfile::tempdir().unwrap();
    for value in ["false", "FALSE", "False"] {
        write(
            dir.path(),
            &format!("OptOut{value}.dll"),
            &encode_registration(
                BinaryFormat::Elf,
                &[(OPT_OUT_KEY, value)],
                &[declared("Suite.Tests", true)],
            ),
        );
    }
    write(
        dir.path(),
        "OptIn.dll",
        &encode_registration(
            BinaryFormat::Elf,
            &[(OPT_OUT_KEY, "true")],
            &[declared("Suite.Tests", true)],
        ),
    );

    let report = scan_directory(dir.path(), &exts(&["dll"]), None).unwrap();

    assert_eq!(report.containers, vec![dir.path().join("OptIn.dll")]);
    assert_eq!(report.opted_out.len(), 3);
}

/// Test: binaries without test classes are silently ignored
#[test]
fn test_binaries_without_tests_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "Domain.dll",
        &encode_registration(BinaryFormat::Elf, &[], &[declared("Domain.Order", false)]),
    );

    let report = scan_directory(dir.path(), &exts(&["dll"]), None).unwrap();
    assert!(report.containers.is_empty());
    assert!(report.skipped.is_empty());
}

/// Test: scanning leaves the build output untouched
#[test]
fn test_scan_does_not_modify_output() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = encode_registration(BinaryFormat::Elf, &[], &[declared("Suite.Tests", true)]);
    write(dir.path(), "Suite.Tests.dll", &bytes);

    scan_directory(dir.path(), &exts(&["dll"]), None).unwrap();

    assert_eq!(fs::read(dir.path().join("Suite.Tests.dll")).unwrap(), bytes);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

/// Test: a scoped build output is reused across items and emptied in between
#[test]
fn test_build_output_reused_between_items() {
    let root = tempfile::tempdir().unwrap();
    let ctx = RunContext::with_root(root.path());

    let first = ctx.scoped_path(ScopedKind::BuildOutput).unwrap();
    fs::write(first.join("A.Tests.dll"), b"").unwrap();
    assert!(ctx.release_kind(ScopedKind::BuildOutput).is_clean());

    let second = ctx.scoped_path(ScopedKind::BuildOutput).unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_dir(&second).unwrap().count(), 0);

    drop(ctx);
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code in the relay crates MUST NOT block inside
//! async functions.
//! **Required**: `tokio::net`, `tokio::time::sleep`, async `reqwest`.

use architectural_enforcement::{scan_directory, workspace_root, PRODUCTION_DIRS};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.is_dir(), "missing production source dir {}", path.display());
        violations.extend(scan_directory(&path));
    }

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O calls found in async production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::fs, tokio::net, tokio::time::sleep or async reqwest instead.");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

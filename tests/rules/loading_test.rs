//! Loading local rule files next to the builtin corpus.

use std::fs;
use std::sync::Arc;

use straylight::rules::{load_rule_set, CompileError};
use straylight::scanner::Scanner;

#[test]
fn local_rules_compile_alongside_builtins() {
    let dir = tempfile::tempdir().expect("create tempdir");
    fs::write(
        dir.path().join("internal.yar"),
        r#"
        rule InternalServiceToken {
            meta:
                name = "Internal service token"
            strings:
                $t = /svc_[0-9a-f]{24}/
            condition:
                any of them
        }
        "#,
    )
    .expect("write rule file");

    let set = load_rule_set(Some(dir.path())).expect("should compile");
    let scanner = Scanner::new(Arc::new(set));

    let report = scanner
        .scan_bytes(b"staging token: svc_0123456789abcdef01234567")
        .expect("scan");
    let ids: Vec<&str> = report
        .matches()
        .iter()
        .map(|m| m.rule().identifier())
        .collect();
    assert!(ids.contains(&"InternalServiceToken"), "matched: {ids:?}");
}

#[test]
fn local_rules_live_in_their_own_namespace() {
    // A local rule may reuse a builtin identifier without colliding.
    let dir = tempfile::tempdir().expect("create tempdir");
    fs::write(
        dir.path().join("override.yar"),
        r#"rule GithubToken { strings: $t = "gh-internal" }"#,
    )
    .expect("write rule file");

    let set = load_rule_set(Some(dir.path())).expect("should compile");
    let scanner = Scanner::new(Arc::new(set));

    let report = scanner.scan_bytes(b"found gh-internal marker").expect("scan");
    let namespaces: Vec<&str> = report
        .matches()
        .iter()
        .map(|m| m.rule().namespace())
        .collect();
    assert_eq!(namespaces, vec!["local/override"]);
}

#[test]
fn broken_local_rule_is_fatal() {
    let dir = tempfile::tempdir().expect("create tempdir");
    fs::write(
        dir.path().join("broken.yar"),
        r"rule Broken { strings: $t = /[unclosed/ }",
    )
    .expect("write rule file");

    let result = load_rule_set(Some(dir.path()));
    assert!(matches!(result, Err(CompileError::Pattern { .. })));
}

#[test]
fn non_rule_files_are_ignored() {
    let dir = tempfile::tempdir().expect("create tempdir");
    fs::write(dir.path().join("README.md"), "not a rule file").expect("write");
    fs::write(dir.path().join("notes.txt"), "rule Broken {").expect("write");

    let set = load_rule_set(Some(dir.path())).expect("should compile");
    // Only builtins.
    assert!(!set.is_empty());
}

#[test]
fn missing_rules_dir_is_fatal() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let missing = dir.path().join("does-not-exist");

    let result = load_rule_set(Some(&missing));
    assert!(matches!(result, Err(CompileError::Source { .. })));
}

//! Detection-rule corpus: model, parser, compiler, and corpus loading.
//!
//! The corpus is assembled once at startup from the embedded builtin rule
//! files plus, optionally, `.yar`/`.yara` files from a local rules
//! directory. Compilation failure is fatal — the process refuses to start
//! without a valid rule set.

use std::path::{Path, PathBuf};

pub mod compiler;
pub mod model;
pub mod parser;

pub use compiler::{CompileError, CompiledRule, CompiledRuleSet, RuleCompiler};
pub use model::{MetaEntry, MetaValue};
pub use parser::ParseError;

/// External variable every corpus compiles with, bound to the empty string.
///
/// Rules may reference it in conditions to stay portable with corpora that
/// are also used by file scanners, where it carries the scanned file name.
pub const FILENAME_EXTERNAL: &str = "filename";

/// The rule sources shipped inside the binary, as `(namespace, text)`.
fn builtin_sources() -> [(&'static str, &'static str); 2] {
    [
        (
            "builtin/credentials",
            include_str!("../../rules/credentials.yar"),
        ),
        ("builtin/keys", include_str!("../../rules/keys.yar")),
    ]
}

/// Build the process rule set: builtins plus any `.yar`/`.yara` files found
/// in `rules_dir`. Local files compile under the `local/<stem>` namespace,
/// so they may reuse builtin rule identifiers without colliding.
///
/// # Errors
///
/// Returns [`CompileError`] when a source cannot be read or compiled; the
/// caller treats this as fatal.
pub fn load_rule_set(rules_dir: Option<&Path>) -> Result<CompiledRuleSet, CompileError> {
    let mut compiler = RuleCompiler::new().define_external(FILENAME_EXTERNAL, "");

    for (namespace, text) in builtin_sources() {
        compiler = compiler.add_source(namespace, text);
    }

    if let Some(dir) = rules_dir {
        for path in local_rule_files(dir)? {
            let text = std::fs::read_to_string(&path).map_err(|source| CompileError::Source {
                path: path.clone(),
                source,
            })?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".to_owned());
            tracing::info!(path = %path.display(), namespace = %stem, "loading local rule source");
            compiler = compiler.add_source(format!("local/{stem}"), text);
        }
    }

    compiler.compile()
}

/// Rule files in `dir`, sorted by path for deterministic compilation order.
fn local_rule_files(dir: &Path) -> Result<Vec<PathBuf>, CompileError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CompileError::Source {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CompileError::Source {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_rule_file = path
            .extension()
            .is_some_and(|ext| ext == "yar" || ext == "yara");
        if is_rule_file {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_corpus_compiles() {
        let set = load_rule_set(None).expect("builtin rules must compile");
        assert!(!set.is_empty());
    }
}

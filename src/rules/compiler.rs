//! Rule compilation: parsed definitions → an executable rule set.
//!
//! Compilation happens exactly once, at startup, and is fatal on failure —
//! the process cannot serve without a valid rule set. The output
//! [`CompiledRuleSet`] is immutable and shared read-only across every
//! concurrent scan for the lifetime of the process.

use std::collections::HashSet;
use std::path::PathBuf;

use regex::bytes::Regex;
use thiserror::Error;

use super::model::{ConditionExpr, MetaEntry, PatternKind, PatternSet, Quantifier, RuleDef};
use super::parser::{parse_rules, ParseError};

/// Errors raised while building a [`CompiledRuleSet`].
///
/// All of these are startup-fatal: a process with a broken rule corpus must
/// refuse to start rather than silently scan with fewer rules.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A rule source failed to parse.
    #[error("rule source `{namespace}` is invalid: {source}")]
    Syntax {
        /// Namespace of the offending source.
        namespace: String,
        /// The underlying parse failure.
        #[source]
        source: ParseError,
    },
    /// A pattern did not compile to a valid regular expression.
    #[error("invalid pattern `${pattern}` in rule `{rule}`: {source}")]
    Pattern {
        /// Rule that declares the pattern.
        rule: String,
        /// Pattern name without the `$` sigil.
        pattern: String,
        /// The regex engine's complaint.
        #[source]
        source: regex::Error,
    },
    /// Two rules in the same namespace share an identifier.
    #[error("duplicate rule `{identifier}` in namespace `{namespace}`")]
    DuplicateRule {
        /// The namespace both rules live in.
        namespace: String,
        /// The colliding identifier.
        identifier: String,
    },
    /// A condition references a pattern or external that was never declared.
    #[error("condition of rule `{rule}` references undefined identifier `{identifier}`")]
    UndefinedIdentifier {
        /// The rule whose condition is broken.
        rule: String,
        /// The unknown identifier as written (`$name` or external name).
        identifier: String,
    },
    /// A `of ($prefix*)` group selects no patterns.
    #[error("`of (${prefix}*)` in rule `{rule}` matches no declared patterns")]
    EmptyPrefixGroup {
        /// The rule whose condition is broken.
        rule: String,
        /// The prefix as written, without sigil and star.
        prefix: String,
    },
    /// A quantified `of them` in a rule that declares no patterns.
    #[error("`of them` in rule `{rule}`, but the rule declares no patterns")]
    NoPatterns {
        /// The patternless rule.
        rule: String,
    },
    /// A rule source file could not be read.
    #[error("failed to read rule source {path}")]
    Source {
        /// Path of the unreadable file.
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Compiled artifacts
// ---------------------------------------------------------------------------

/// A pattern compiled to its executable form.
///
/// Every pattern kind lowers to a byte regex: literals are escaped,
/// case-insensitive literals additionally get `(?i)`, regexes pass through.
#[derive(Debug)]
pub struct CompiledPattern {
    name: String,
    regex: Regex,
}

impl CompiledPattern {
    /// Pattern name without the `$` sigil.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The compiled byte regex this pattern evaluates.
    pub(crate) fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// A rule's condition with every identifier resolved to an index.
#[derive(Debug)]
pub(crate) enum CompiledCondition {
    Pattern(usize),
    Of(Quantifier, Vec<usize>),
    External(usize),
    ExternalEq(usize, String),
    ExternalNe(usize, String),
    Bool(bool),
    And(Box<CompiledCondition>, Box<CompiledCondition>),
    Or(Box<CompiledCondition>, Box<CompiledCondition>),
    Not(Box<CompiledCondition>),
}

impl CompiledCondition {
    /// Evaluate against per-scan match facts and the compile-time externals.
    fn evaluate(&self, matched: &[bool], externals: &[(String, String)]) -> bool {
        match self {
            Self::Pattern(index) => matched.get(*index).copied().unwrap_or(false),
            Self::Of(quantifier, indices) => {
                let hits = indices
                    .iter()
                    .filter(|&&i| matched.get(i).copied().unwrap_or(false))
                    .count();
                match quantifier {
                    Quantifier::Any => hits >= 1,
                    Quantifier::All => hits == indices.len(),
                    Quantifier::AtLeast(n) => {
                        hits >= usize::try_from(*n).unwrap_or(usize::MAX)
                    }
                }
            }
            Self::External(index) => externals
                .get(*index)
                .is_some_and(|(_, value)| !value.is_empty()),
            Self::ExternalEq(index, expected) => externals
                .get(*index)
                .is_some_and(|(_, value)| value == expected),
            Self::ExternalNe(index, expected) => externals
                .get(*index)
                .is_some_and(|(_, value)| value != expected),
            Self::Bool(value) => *value,
            Self::And(left, right) => {
                left.evaluate(matched, externals) && right.evaluate(matched, externals)
            }
            Self::Or(left, right) => {
                left.evaluate(matched, externals) || right.evaluate(matched, externals)
            }
            Self::Not(inner) => !inner.evaluate(matched, externals),
        }
    }
}

/// A single compiled, immutable detection rule.
#[derive(Debug)]
pub struct CompiledRule {
    identifier: String,
    namespace: String,
    meta: Vec<MetaEntry>,
    patterns: Vec<CompiledPattern>,
    condition: CompiledCondition,
}

impl CompiledRule {
    /// Rule identifier, unique within [`CompiledRule::namespace`].
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Namespace the rule was compiled under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Ordered metadata entries, as declared.
    pub fn meta(&self) -> &[MetaEntry] {
        &self.meta
    }

    /// Looks up a string metadata value by key.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|entry| entry.key == key)
            .and_then(|entry| entry.value.as_str())
    }

    /// The rule's compiled patterns, in declaration order.
    pub(crate) fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    /// Whether the rule's condition holds for the given per-pattern match
    /// facts (indexed like [`CompiledRule::patterns`]).
    pub(crate) fn condition_holds(&self, matched: &[bool], externals: &[(String, String)]) -> bool {
        self.condition.evaluate(matched, externals)
    }
}

/// The full compiled corpus — every rule from every source, plus declared
/// externals. Built once, then only read.
#[derive(Debug)]
pub struct CompiledRuleSet {
    rules: Vec<CompiledRule>,
    externals: Vec<(String, String)>,
}

impl CompiledRuleSet {
    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set contains no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// All compiled rules, in source order.
    pub(crate) fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Declared externals as `(name, value)` pairs, in declaration order.
    pub(crate) fn externals(&self) -> &[(String, String)] {
        &self.externals
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Builder that accumulates rule sources and produces a [`CompiledRuleSet`].
#[derive(Debug, Default)]
pub struct RuleCompiler {
    sources: Vec<(String, String)>,
    externals: Vec<(String, String)>,
}

impl RuleCompiler {
    /// Create an empty compiler with no sources and no externals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an external variable rules may reference in conditions.
    ///
    /// Redeclaring a name overwrites its value; declaration order is
    /// otherwise preserved.
    pub fn define_external(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.externals.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.externals.push((name, value));
        }
        self
    }

    /// Add one rule source under a namespace. Multiple sources may share a
    /// namespace; their rules are then checked for identifier collisions.
    pub fn add_source(mut self, namespace: impl Into<String>, text: impl Into<String>) -> Self {
        self.sources.push((namespace.into(), text.into()));
        self
    }

    /// Compile every added source into one rule set.
    ///
    /// # Errors
    ///
    /// Returns the first [`CompileError`] encountered; partial rule sets are
    /// never produced.
    pub fn compile(self) -> Result<CompiledRuleSet, CompileError> {
        let mut rules = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for (namespace, text) in &self.sources {
            let parsed = parse_rules(text).map_err(|source| CompileError::Syntax {
                namespace: namespace.clone(),
                source,
            })?;

            for def in parsed {
                let key = (namespace.clone(), def.identifier.clone());
                if !seen.insert(key) {
                    return Err(CompileError::DuplicateRule {
                        namespace: namespace.clone(),
                        identifier: def.identifier,
                    });
                }
                rules.push(compile_rule(namespace, def, &self.externals)?);
            }
        }

        Ok(CompiledRuleSet {
            rules,
            externals: self.externals,
        })
    }
}

fn compile_rule(
    namespace: &str,
    def: RuleDef,
    externals: &[(String, String)],
) -> Result<CompiledRule, CompileError> {
    let mut patterns = Vec::with_capacity(def.patterns.len());
    for pattern in &def.patterns {
        let source = match &pattern.kind {
            PatternKind::Literal(text) => regex::escape(text),
            PatternKind::LiteralNoCase(text) => format!("(?i){}", regex::escape(text)),
            PatternKind::Regex(text) => text.clone(),
        };
        let regex = Regex::new(&source).map_err(|source| CompileError::Pattern {
            rule: def.identifier.clone(),
            pattern: pattern.name.clone(),
            source,
        })?;
        patterns.push(CompiledPattern {
            name: pattern.name.clone(),
            regex,
        });
    }

    let condition = match &def.condition {
        Some(expr) => resolve_condition(expr, &def, externals)?,
        // Implicit default: at least one pattern present.
        None => resolve_condition(
            &ConditionExpr::Of(Quantifier::Any, PatternSet::Them),
            &def,
            externals,
        )?,
    };

    Ok(CompiledRule {
        identifier: def.identifier,
        namespace: namespace.to_owned(),
        meta: def.meta,
        patterns,
        condition,
    })
}

fn resolve_condition(
    expr: &ConditionExpr,
    def: &RuleDef,
    externals: &[(String, String)],
) -> Result<CompiledCondition, CompileError> {
    let pattern_index = |name: &str| -> Result<usize, CompileError> {
        def.patterns
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| CompileError::UndefinedIdentifier {
                rule: def.identifier.clone(),
                identifier: format!("${name}"),
            })
    };
    let external_index = |name: &str| -> Result<usize, CompileError> {
        externals
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| CompileError::UndefinedIdentifier {
                rule: def.identifier.clone(),
                identifier: name.to_owned(),
            })
    };

    Ok(match expr {
        ConditionExpr::Pattern(name) => CompiledCondition::Pattern(pattern_index(name)?),
        ConditionExpr::Of(quantifier, set) => {
            let indices: Vec<usize> = match set {
                PatternSet::Them => (0..def.patterns.len()).collect(),
                PatternSet::Prefix(prefix) => def
                    .patterns
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.name.starts_with(prefix.as_str()))
                    .map(|(i, _)| i)
                    .collect(),
            };
            if indices.is_empty() {
                return Err(match set {
                    PatternSet::Them => CompileError::NoPatterns {
                        rule: def.identifier.clone(),
                    },
                    PatternSet::Prefix(prefix) => CompileError::EmptyPrefixGroup {
                        rule: def.identifier.clone(),
                        prefix: prefix.clone(),
                    },
                });
            }
            CompiledCondition::Of(*quantifier, indices)
        }
        ConditionExpr::External(name) => CompiledCondition::External(external_index(name)?),
        ConditionExpr::ExternalEq(name, value) => {
            CompiledCondition::ExternalEq(external_index(name)?, value.clone())
        }
        ConditionExpr::ExternalNe(name, value) => {
            CompiledCondition::ExternalNe(external_index(name)?, value.clone())
        }
        ConditionExpr::Bool(value) => CompiledCondition::Bool(*value),
        ConditionExpr::And(left, right) => CompiledCondition::And(
            Box::new(resolve_condition(left, def, externals)?),
            Box::new(resolve_condition(right, def, externals)?),
        ),
        ConditionExpr::Or(left, right) => CompiledCondition::Or(
            Box::new(resolve_condition(left, def, externals)?),
            Box::new(resolve_condition(right, def, externals)?),
        ),
        ConditionExpr::Not(inner) => {
            CompiledCondition::Not(Box::new(resolve_condition(inner, def, externals)?))
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        rule AwsAccessKey {
            meta:
                name = "AWS access key"
            strings:
                $id = /AKIA[0-9A-Z]{16}/
            condition:
                any of them
        }
    "#;

    #[test]
    fn compile_single_source() {
        let set = RuleCompiler::new()
            .add_source("builtin", SOURCE)
            .compile()
            .expect("should compile");

        assert_eq!(set.len(), 1);
        assert_eq!(set.rules()[0].identifier(), "AwsAccessKey");
        assert_eq!(set.rules()[0].namespace(), "builtin");
        assert_eq!(set.rules()[0].meta_str("name"), Some("AWS access key"));
    }

    #[test]
    fn duplicate_identifier_same_namespace_fails() {
        let result = RuleCompiler::new()
            .add_source("a", "rule Dup { strings: $x = \"q\" }")
            .add_source("a", "rule Dup { strings: $x = \"q\" }")
            .compile();

        assert!(matches!(
            result,
            Err(CompileError::DuplicateRule { ref namespace, ref identifier })
                if namespace == "a" && identifier == "Dup"
        ));
    }

    #[test]
    fn duplicate_identifier_across_namespaces_is_fine() {
        let set = RuleCompiler::new()
            .add_source("a", "rule Dup { strings: $x = \"q\" }")
            .add_source("b", "rule Dup { strings: $x = \"q\" }")
            .compile()
            .expect("should compile");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn invalid_regex_fails() {
        let result = RuleCompiler::new()
            .add_source("a", r"rule Bad { strings: $x = /[unclosed/ }")
            .compile();

        assert!(matches!(
            result,
            Err(CompileError::Pattern { ref rule, ref pattern, .. })
                if rule == "Bad" && pattern == "x"
        ));
    }

    #[test]
    fn undefined_pattern_in_condition_fails() {
        let result = RuleCompiler::new()
            .add_source(
                "a",
                "rule Bad { strings: $x = \"q\" condition: $x and $missing }",
            )
            .compile();

        assert!(matches!(
            result,
            Err(CompileError::UndefinedIdentifier { ref identifier, .. })
                if identifier == "$missing"
        ));
    }

    #[test]
    fn undeclared_external_fails() {
        let result = RuleCompiler::new()
            .add_source("a", "rule Bad { strings: $x = \"q\" condition: $x and mystery }")
            .compile();

        assert!(matches!(
            result,
            Err(CompileError::UndefinedIdentifier { ref identifier, .. })
                if identifier == "mystery"
        ));
    }

    #[test]
    fn declared_external_resolves() {
        let set = RuleCompiler::new()
            .define_external("filename", "")
            .add_source("a", "rule Ok { strings: $x = \"q\" condition: $x and filename == \"\" }")
            .compile()
            .expect("should compile");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn empty_prefix_group_fails() {
        let result = RuleCompiler::new()
            .add_source("a", "rule Bad { strings: $x = \"q\" condition: any of ($zzz*) }")
            .compile();

        assert!(matches!(result, Err(CompileError::EmptyPrefixGroup { .. })));
    }

    #[test]
    fn patternless_of_them_fails() {
        let result = RuleCompiler::new()
            .add_source("a", "rule Bad { condition: any of them }")
            .compile();

        assert!(matches!(result, Err(CompileError::NoPatterns { .. })));
    }

    #[test]
    fn condition_evaluation_quantifiers() {
        let set = RuleCompiler::new()
            .add_source(
                "a",
                r#"
                rule TwoOf {
                    strings:
                        $a = "a"
                        $b = "b"
                        $c = "c"
                    condition:
                        2 of them
                }
                "#,
            )
            .compile()
            .expect("should compile");

        let rule = &set.rules()[0];
        assert!(!rule.condition_holds(&[true, false, false], set.externals()));
        assert!(rule.condition_holds(&[true, false, true], set.externals()));
        assert!(rule.condition_holds(&[true, true, true], set.externals()));
    }

    #[test]
    fn condition_evaluation_booleans() {
        let set = RuleCompiler::new()
            .define_external("filename", "prod.env")
            .add_source(
                "a",
                r#"
                rule Mixed {
                    strings:
                        $a = "a"
                        $b = "b"
                    condition:
                        ($a or $b) and not filename == "ignored"
                }
                "#,
            )
            .compile()
            .expect("should compile");

        let rule = &set.rules()[0];
        assert!(rule.condition_holds(&[false, true], set.externals()));
        assert!(!rule.condition_holds(&[false, false], set.externals()));
    }
}

//! Scan engine: evaluates a compiled rule set against a byte buffer.
//!
//! A [`Scanner`] is cheap to clone and safe to share — it holds the rule
//! set behind an [`Arc`] and keeps all match-accumulation state on the
//! stack of each [`Scanner::scan_bytes`] call, so any number of requests
//! can scan concurrently against the same compiled rules.

use std::sync::Arc;

use thiserror::Error;

use crate::rules::{CompiledRule, CompiledRuleSet};

/// Default upper bound on scannable input, in bytes.
///
/// Slack message payloads are a few kilobytes at most; anything near this
/// limit is not a chat message and is rejected rather than truncated.
pub const DEFAULT_MAX_SCAN_BYTES: usize = 1024 * 1024;

/// Errors raised by a single scan invocation.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The input buffer exceeds the configured scan limit.
    ///
    /// Never downgraded to "no matches" — the caller must treat this as an
    /// internal failure.
    #[error("input of {len} bytes exceeds the scan limit of {max} bytes")]
    InputTooLarge {
        /// Size of the rejected buffer.
        len: usize,
        /// The configured limit.
        max: usize,
    },
}

/// One matched rule with the literal bytes each of its patterns matched.
#[derive(Debug)]
pub struct RuleMatch<'rules> {
    rule: &'rules CompiledRule,
    snippets: Vec<Vec<u8>>,
}

impl<'rules> RuleMatch<'rules> {
    /// Read-only view of the matched rule (identifier, namespace, metadata).
    pub fn rule(&self) -> &'rules CompiledRule {
        self.rule
    }

    /// Every matched substring occurrence, in pattern declaration order then
    /// buffer order. Raw bytes as they appeared in the input; duplicates are
    /// preserved here and deduplicated by the reporter.
    pub fn snippets(&self) -> &[Vec<u8>] {
        &self.snippets
    }
}

/// The outcome of one scan invocation: matched rules in rule-set order.
///
/// An empty report is the expected common case, not an error.
#[derive(Debug)]
pub struct ScanReport<'rules> {
    matches: Vec<RuleMatch<'rules>>,
}

impl<'rules> ScanReport<'rules> {
    /// The matches, in compiled rule order.
    pub fn matches(&self) -> &[RuleMatch<'rules>] {
        &self.matches
    }

    /// Whether no rule matched.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Number of matched rules.
    pub fn len(&self) -> usize {
        self.matches.len()
    }
}

/// Shared scan engine over one immutable rule set.
#[derive(Debug, Clone)]
pub struct Scanner {
    rules: Arc<CompiledRuleSet>,
    max_scan_bytes: usize,
}

impl Scanner {
    /// Create a scanner over a compiled rule set with the default size limit.
    pub fn new(rules: Arc<CompiledRuleSet>) -> Self {
        Self {
            rules,
            max_scan_bytes: DEFAULT_MAX_SCAN_BYTES,
        }
    }

    /// Override the input size limit.
    pub fn with_max_scan_bytes(mut self, max_scan_bytes: usize) -> Self {
        self.max_scan_bytes = max_scan_bytes;
        self
    }

    /// The rule set this scanner evaluates.
    pub fn rule_set(&self) -> &CompiledRuleSet {
        &self.rules
    }

    /// Evaluate every rule against `buffer`.
    ///
    /// A rule is matched iff its condition holds over which of its patterns
    /// matched; for each matched rule, the literal bytes of every pattern
    /// occurrence are recorded.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InputTooLarge`] when `buffer` exceeds the
    /// configured limit.
    pub fn scan_bytes(&self, buffer: &[u8]) -> Result<ScanReport<'_>, ScanError> {
        if buffer.len() > self.max_scan_bytes {
            return Err(ScanError::InputTooLarge {
                len: buffer.len(),
                max: self.max_scan_bytes,
            });
        }

        let externals = self.rules.externals();
        let mut matches = Vec::new();

        for rule in self.rules.rules() {
            let mut matched = vec![false; rule.patterns().len()];
            let mut snippets = Vec::new();

            for (index, pattern) in rule.patterns().iter().enumerate() {
                for hit in pattern.regex().find_iter(buffer) {
                    matched[index] = true;
                    snippets.push(hit.as_bytes().to_vec());
                }
            }

            if rule.condition_holds(&matched, externals) {
                matches.push(RuleMatch { rule, snippets });
            }
        }

        Ok(ScanReport { matches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleCompiler;

    fn scanner_for(source: &str) -> Scanner {
        let set = RuleCompiler::new()
            .define_external("filename", "")
            .add_source("test", source)
            .compile()
            .expect("test rules must compile");
        Scanner::new(Arc::new(set))
    }

    #[test]
    fn literal_pattern_records_snippet() {
        let scanner = scanner_for(r#"rule R { strings: $a = "hunter2" }"#);
        let report = scanner
            .scan_bytes(b"my password is hunter2, don't tell")
            .expect("scan should succeed");

        assert_eq!(report.len(), 1);
        assert_eq!(report.matches()[0].rule().identifier(), "R");
        assert_eq!(report.matches()[0].snippets(), &[b"hunter2".to_vec()]);
    }

    #[test]
    fn clean_buffer_yields_empty_report() {
        let scanner = scanner_for(r#"rule R { strings: $a = "hunter2" }"#);
        let report = scanner
            .scan_bytes(b"nothing to see here")
            .expect("scan should succeed");
        assert!(report.is_empty());
    }

    #[test]
    fn nocase_literal_matches_any_casing() {
        let scanner = scanner_for(r#"rule R { strings: $a = "secret" nocase }"#);
        let report = scanner
            .scan_bytes(b"this is SeCrEt stuff")
            .expect("scan should succeed");
        assert_eq!(report.matches()[0].snippets(), &[b"SeCrEt".to_vec()]);
    }

    #[test]
    fn case_sensitive_literal_does_not_cross_case() {
        let scanner = scanner_for(r#"rule R { strings: $a = "secret" }"#);
        let report = scanner
            .scan_bytes(b"this is SECRET stuff")
            .expect("scan should succeed");
        assert!(report.is_empty());
    }

    #[test]
    fn regex_pattern_records_every_occurrence() {
        let scanner = scanner_for(r"rule R { strings: $t = /tok_[0-9]{4}/ }");
        let report = scanner
            .scan_bytes(b"tok_1111 and tok_2222 and tok_1111")
            .expect("scan should succeed");

        assert_eq!(
            report.matches()[0].snippets(),
            &[b"tok_1111".to_vec(), b"tok_2222".to_vec(), b"tok_1111".to_vec()]
        );
    }

    #[test]
    fn condition_gates_rule_match() {
        let scanner = scanner_for(
            r#"
            rule Both {
                strings:
                    $a = "alpha"
                    $b = "bravo"
                condition:
                    all of them
            }
            "#,
        );

        let partial = scanner.scan_bytes(b"only alpha here").expect("scan");
        assert!(partial.is_empty());

        let full = scanner.scan_bytes(b"alpha then bravo").expect("scan");
        assert_eq!(full.len(), 1);
    }

    #[test]
    fn not_condition_can_match_without_snippets() {
        let scanner = scanner_for(
            r#"
            rule Absent {
                strings:
                    $a = "forbidden"
                condition:
                    not $a
            }
            "#,
        );
        let report = scanner.scan_bytes(b"all quiet").expect("scan");
        assert_eq!(report.len(), 1);
        assert!(report.matches()[0].snippets().is_empty());
    }

    #[test]
    fn oversized_input_is_rejected() {
        let scanner =
            scanner_for(r#"rule R { strings: $a = "x" }"#).with_max_scan_bytes(16);
        let result = scanner.scan_bytes(&[b'y'; 17]);

        assert!(matches!(
            result,
            Err(ScanError::InputTooLarge { len: 17, max: 16 })
        ));
    }

    #[test]
    fn input_at_limit_is_accepted() {
        let scanner =
            scanner_for(r#"rule R { strings: $a = "x" }"#).with_max_scan_bytes(16);
        assert!(scanner.scan_bytes(&[b'y'; 16]).is_ok());
    }

    #[test]
    fn concurrent_scans_share_one_rule_set() {
        let scanner = scanner_for(r#"rule R { strings: $a = "leak" }"#);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let scanner = scanner.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        let report = scanner.scan_bytes(b"a leak happened").expect("scan");
                        assert_eq!(report.len(), 1);
                    }
                });
            }
        });
    }
}

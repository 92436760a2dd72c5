//! Integration tests for `src/rules/` and the scan engine.

#[path = "rules/corpus_test.rs"]
mod corpus_test;
#[path = "rules/loading_test.rs"]
mod loading_test;

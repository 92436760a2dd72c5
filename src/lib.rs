//! Straylight — a Slack secret-disclosure sentinel.
//!
//! Single Rust binary. Receives Slack Events API webhooks, scans posted
//! messages against a compiled rule corpus, and privately warns the sender
//! when a message looks like it leaked a credential. The warning is
//! ephemeral: nobody else in the channel sees it, and nothing is stored.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod logging;
pub mod report;
pub mod rules;
pub mod scanner;
pub mod server;
pub mod slack;
pub mod webhook;

//! Slack platform integration: request authentication, event
//! classification, and the outbound Web API client.

pub mod auth;
pub mod client;
pub mod event;

pub use auth::{AuthError, SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
pub use client::{Notifier, NotifyError, SlackClient};
pub use event::{classify, InboundEvent, RouteError};

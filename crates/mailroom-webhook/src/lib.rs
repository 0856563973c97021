//! Inbound provider webhook pipeline.
//!
//! Verifies HMAC-SHA1 body signatures, decodes the supported event
//! shapes, and applies them to local state through the write
//! orchestrator, classifying every failure as either suppress-redelivery
//! or request-redelivery.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event;
pub mod handler;
pub mod processor;
pub mod signature;

pub use event::{decode_event, EventGroup, EventMemberInfo, WebhookAction, WebhookEvent};
pub use handler::{router, WebhookState, SIGNATURE_HEADER};
pub use processor::WebhookProcessor;
pub use signature::{sign, verify_signature};

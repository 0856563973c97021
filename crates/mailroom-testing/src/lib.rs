//! Shared fixtures and test doubles for the mailroom crates.
//!
//! Everything here is test-only plumbing: request fixtures with sensible
//! defaults, a fault-injecting store wrapper, and recording doubles for
//! the provider and publisher seams.

#![forbid(unsafe_code)]

pub mod fixtures;
pub mod flaky;
pub mod provider;
pub mod publisher;

pub use fixtures::{discussion_list, formation_service, member_of, primary_service};
pub use flaky::FlakyStore;
pub use provider::{ProviderCall, RecordingProvider};
pub use publisher::RecordingPublisher;

//! Write-path orchestration for mailroom resources.
//!
//! Sequences each create, update and delete as an explicit saga over the
//! revisioned KV store: uniqueness constraints first, the external
//! provider next, then the record, indices and downstream notifications,
//! with compensating rollback on failure. Conditional writes are guarded
//! by the ETag the caller last read.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod etag;
pub mod mailing_list;
pub mod member;
pub mod provider;
pub mod publisher;
pub mod rollback;
pub mod service;

pub use context::{WriterConfig, WriterContext};
pub use etag::{format_etag, parse_etag};
pub use mailing_list::{MailingListUpdate, MailingListWriter, NewMailingList};
pub use member::{MemberUpdate, MemberWriter, NewMember};
pub use provider::ProviderSync;
pub use publisher::{ChangeAction, ChangeMessage, ChangeTarget, EventPublisher, NoopPublisher};
pub use service::{NewService, ServiceUpdate, ServiceWriter};

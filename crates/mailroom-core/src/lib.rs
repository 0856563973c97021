//! Core domain models, error taxonomy and storage layer.
//!
//! Provides the strongly-typed resources managed by the mailroom service
//! (services, mailing lists, members), the error-kind taxonomy every layer
//! shares, the revisioned KV storage adapter, and the constraint/index
//! managers that emulate uniqueness and reverse lookups on top of it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use backoff::RetryPolicy;
pub use error::{Error, ErrorKind, Result};
pub use models::{
    DeliveryMode, MailingList, MailingListId, MailingListType, Member, MemberId, ModStatus,
    Revision, Service, ServiceId, ServiceType,
};
pub use storage::{ConstraintManager, IndexManager, KvStore, MemoryKvStore, RedbKvStore};
pub use time::{Clock, RealClock, TestClock};

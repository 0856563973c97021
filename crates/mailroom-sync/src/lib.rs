//! External mailing-provider client.
//!
//! Speaks the provider's form-encoded POST API with per-tenant
//! virtual-host routing, a per-domain token cache, and bounded retries,
//! translating HTTP failures into the shared error taxonomy at the
//! transport boundary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod decorator;
mod http;

pub use auth::{AuthConfig, AuthManager};
pub use client::{ProviderClient, SyncConfig};
pub use decorator::{AuthDecorator, HostDecorator, RequestContext, RequestDecorator};

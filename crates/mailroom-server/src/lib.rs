//! Mailroom service assembly: configuration loading and router wiring.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;

pub use app::build_router;
pub use config::Config;

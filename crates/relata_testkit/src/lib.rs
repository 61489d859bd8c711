//! # Relata Testkit
//!
//! Test utilities for Relata.
//!
//! This crate provides:
//! - A ready-made fixture domain (users, cards, accounts) with all
//!   three relation shapes wired up
//! - Event recording helpers for asserting on dispatched events
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use relata_testkit::prelude::*;
//!
//! let domain = Domain::new();
//! let user = domain.user(1, "Ada");
//! let card = domain.card(10);
//! card.set_related("user", Some(user.clone().into())).unwrap();
//! assert_eq!(card.get("userId").unwrap(), 1.into());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;

use tracing_subscriber::EnvFilter;

/// Initializes test logging from `RUST_LOG`, defaulting to `debug`.
/// Safe to call from multiple tests.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

//! Server-side core of a recurring-donation platform.
//!
//! The crate keeps a strict separation between:
//!
//! - **[`core`]**: Pure rules (username validation, call-to-action tiers,
//!   locale negotiation, markdown). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, SQLite, error
//!   tracking, version lookup).
//!
//! [`wireup`] assembles a [`wireup::Website`] from configuration and
//! [`cron`] runs its periodic jobs on background threads.

pub mod core;
pub mod cron;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod wireup;

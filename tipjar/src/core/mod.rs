//! Pure rules with no I/O: username validation, call-to-action tiers,
//! locale negotiation, and markdown rendering.

pub mod cta;
pub mod locale;
pub mod markdown;
pub mod username;

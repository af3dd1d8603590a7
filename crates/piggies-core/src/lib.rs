//! Business rules for Piggies: album grants, moderation and appeals,
//! referral accounting, discovery ranking and venue review.
//!
//! Nothing in this crate touches storage or the network. Callers pass in
//! current state and the current time, and get back decisions.

pub mod collaborators;
pub mod discovery;
pub mod error;
pub mod grants;
pub mod messaging;
pub mod moderation;
pub mod profile;
pub mod referrals;
pub mod venues;

pub use error::{PiggiesError, Result};

//! Query modules, one per domain area. Each adds methods to [`crate::Database`].

pub mod albums;
pub mod appeals;
pub mod conversations;
pub mod discovery;
pub mod media;
pub mod moderation;
pub mod referrals;
pub mod users;
pub mod venues;

//! Realtime side channel: one WebSocket per connected device, events
//! routed to users by id.

pub mod connection;
pub mod dispatcher;

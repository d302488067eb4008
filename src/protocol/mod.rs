//! Control-channel wire types for the Realtime data channel.

pub mod client_events;
pub mod models;
pub mod server_events;

//! Network and media seams: the concrete REST adapter and the peer/media traits.

pub mod peer;
pub mod rest;

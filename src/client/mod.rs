//! Client side of the authority protocol.

pub mod http;

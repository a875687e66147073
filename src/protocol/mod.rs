//! Artifact data contract and authority wire protocol.

pub mod models;

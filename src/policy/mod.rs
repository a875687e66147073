//! Acceptance rules applied to license artifacts.

pub mod access;
pub mod rules;

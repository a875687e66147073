//! Cryptographic primitives: canonical encoding, signing, verification and
//! at-rest protection.

pub mod canonical;
pub mod protect;
pub mod signing;
pub mod verify;

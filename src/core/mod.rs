//! Core primitives.
//!
//! Seedable randomness shared by ticket generation, number calling and
//! game codes.

pub mod rng;

pub use rng::DeterministicRng;

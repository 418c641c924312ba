//! Lease lifecycle: acquire, release and expiry reclamation.
//!
//! Per-record state machine:
//!
//! ```text
//! Available --acquire--> Locked --release--> Available
//!                        Locked --TTL expired, seen by acquire or sweep--> Available
//! ```
//!
//! Reclamation is lazy. An expired lease is only reset when the next acquire
//! (or an explicit sweep) runs, so a session can stay `locked` in the table
//! long after its TTL if nobody asks for a session.

mod manager;

pub use manager::{LeaseManager, reclaim_expired};

//! Assignment engine: pairs claimable jobs with idle workers and drives the
//! controller → worker commands (start, resume, stop).

pub mod client;
pub mod coordinator;

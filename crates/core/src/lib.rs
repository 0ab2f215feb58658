//! Domain logic shared by the controller and the worker agent.
//!
//! Nothing in this crate touches the database or the network. Callers pass
//! data in and get decisions back.

pub mod config_merge;
pub mod error;
pub mod lifecycle;
pub mod profiles;
pub mod protocol;
pub mod status;
pub mod types;
pub mod worker_pool;

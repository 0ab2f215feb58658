//! Row structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - Input DTOs for inserts and list filters
//! - Outcome enums for the conditional updates in `repositories`

pub mod job;
pub mod status;
pub mod worker;

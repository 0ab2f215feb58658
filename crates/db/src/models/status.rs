//! Status enums live in `fleet-core` so the agent can share them; they are
//! re-exported here for repository code.

pub use fleet_core::status::{status_ids, JobStatus, StatusId, WorkerStatus};

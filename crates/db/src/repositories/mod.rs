//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.
//!
//! Row locks are always taken job first, then worker, so that concurrent
//! transactions touching the same pair cannot deadlock.

pub mod job_repo;
pub mod worker_repo;

pub use job_repo::JobRepo;
pub use worker_repo::WorkerRepo;

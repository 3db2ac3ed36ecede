//! SeaORM repository implementations
//!
//! Each repository implements the matching store trait from
//! `job_scheduling`, so workers and the control API run unchanged against
//! SQLite, PostgreSQL or MySQL.

pub mod job;
pub mod run;

pub use job::JobSeaOrmRepository;
pub use run::RunSeaOrmRepository;

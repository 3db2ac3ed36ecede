//! Impression scheduler library
//!
//! Distributes large batches of independent impression jobs across a pool of
//! concurrent workers. Each job belongs to a run, is paced over time and is
//! assigned a country/device/browser profile in controlled proportions.

pub mod concurrency;
pub mod config;
pub mod database;
pub mod distribution;
pub mod entities;
pub mod errors;
pub mod job_scheduling;
pub mod models;
pub mod pacing;
pub mod utils;

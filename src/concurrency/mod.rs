//! Concurrency control
//!
//! - `calculator`: derives a worker count from target volume and pacing window
//! - `semaphore`: the live, resizable permit pool shared by worker loops
//! - `stagger`: minimum spacing between job launches

pub mod calculator;
pub mod semaphore;
pub mod stagger;

pub use calculator::{ConcurrencyCalculator, ConcurrencyRecommendation};
pub use semaphore::{ConcurrencyPermit, ResizableSemaphore};
pub use stagger::StaggerGate;

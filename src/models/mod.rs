//! Domain models shared by the scheduler components

pub mod distribution;
pub mod job;
pub mod run;

pub use distribution::*;
pub use job::*;
pub use run::*;

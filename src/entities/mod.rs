//! SeaORM entity definitions

pub mod jobs;
pub mod prelude;
pub mod runs;

pub use super::jobs::Entity as Jobs;
pub use super::runs::Entity as Runs;

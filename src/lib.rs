pub mod config;
pub mod error;
pub mod report;
pub mod update;

pub use error::UpdateError;
pub use update::{check_for_update, run, Outcome, UpdateRequest};

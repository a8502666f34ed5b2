//! CLI command handlers, one per file.

mod checksum;
mod follow;
mod get;
mod purge;
mod remove;
mod resume;
mod status;

pub use checksum::run_checksum;
pub use get::{run_get, GetArgs};
pub use purge::run_purge;
pub use remove::run_remove;
pub use resume::run_resume;
pub use status::run_status;

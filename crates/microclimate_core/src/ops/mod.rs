//! One module per Microclimate REST operation.

pub mod build;
pub mod open_close;
pub mod projects;

pub use build::{request_build, set_auto_build};
pub use open_close::set_enabled;
pub use projects::list_projects;

pub(crate) fn project_path(project_id: &str, action: &str) -> String {
    format!("/api/v1/projects/{project_id}/{action}")
}

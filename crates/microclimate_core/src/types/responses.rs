use serde::Serialize;

/// Server acknowledgement of a project action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResponse {
    pub project_id: String,
    pub action: String,
    pub status: u16,
}

impl ActionResponse {
    pub fn new(project_id: &str, action: &str, status: u16) -> Self {
        Self {
            project_id: project_id.to_string(),
            action: action.to_string(),
            status,
        }
    }
}

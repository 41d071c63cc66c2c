use super::project_path;
use crate::types::ActionResponse;
use crate::{McClient, Result};

/// Enables (opens) or disables (closes) a project on the server.
pub async fn set_enabled(client: &McClient, project_id: &str, enabled: bool) -> Result<ActionResponse> {
    let action = if enabled { "open" } else { "close" };
    let response = client.post_json(&project_path(project_id, action), None).await?;
    tracing::info!("Requested {} for project {}", action, project_id);
    Ok(ActionResponse::new(project_id, action, response.status))
}

use super::project_path;
use crate::types::ActionResponse;
use crate::{McClient, Result};
use serde_json::json;

async fn post_build_action(client: &McClient, project_id: &str, action: &str) -> Result<ActionResponse> {
    let response = client
        .post_json(&project_path(project_id, "build"), Some(json!({ "action": action })))
        .await?;
    tracing::info!("Requested {} for project {}", action, project_id);
    Ok(ActionResponse::new(project_id, action, response.status))
}

/// Starts a build of the project on the server.
pub async fn request_build(client: &McClient, project_id: &str) -> Result<ActionResponse> {
    post_build_action(client, project_id, "build").await
}

pub async fn set_auto_build(client: &McClient, project_id: &str, enabled: bool) -> Result<ActionResponse> {
    let action = if enabled {
        "enableautobuild"
    } else {
        "disableautobuild"
    };
    post_build_action(client, project_id, action).await
}

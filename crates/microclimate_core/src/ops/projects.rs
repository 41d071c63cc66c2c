use crate::types::ProjectInfo;
use crate::{McClient, Result};

pub const PROJECTS_PATH: &str = "/api/v1/projects";

pub async fn list_projects(client: &McClient) -> Result<Vec<ProjectInfo>> {
    let projects: Vec<ProjectInfo> = client.get_json(PROJECTS_PATH).await?;
    tracing::debug!("Server reports {} projects", projects.len());
    Ok(projects)
}

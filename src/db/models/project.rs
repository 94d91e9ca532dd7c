use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub purpose: Option<String>,
    /// GeoJSON polygon, stored as text
    pub geometry: Option<String>,
    /// `[lng, lat]` pair, stored as JSON text
    pub center: Option<String>,
    pub is_public: bool,
    pub public_slug: Option<String>,
    pub public_title: Option<String>,
    pub public_description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The subset of a project exposed on the unauthenticated view
#[derive(Debug, Clone, Serialize)]
pub struct PublicProject {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub geometry: Option<serde_json::Value>,
    pub center: Option<serde_json::Value>,
}

impl PublicProject {
    pub fn from_project(project: Project) -> Option<Self> {
        if !project.is_public {
            return None;
        }
        let slug = project.public_slug?;
        Some(Self {
            id: project.id,
            name: project.name,
            slug,
            title: project.public_title,
            description: project.public_description,
            geometry: parse_json_column(project.geometry.as_deref()),
            center: parse_json_column(project.center.as_deref()),
        })
    }
}

pub(crate) fn parse_json_column(value: Option<&str>) -> Option<serde_json::Value> {
    value.and_then(|v| serde_json::from_str(v).ok())
}

// DTOs for API

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub purpose: Option<String>,
    pub geometry: Option<serde_json::Value>,
    pub center: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SelectProjectRequest {
    pub project_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PublicAccessRequest {
    pub is_public: bool,
    pub public_title: Option<String>,
    pub public_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublicAccessResponse {
    pub is_public: bool,
    pub public_slug: Option<String>,
    pub public_url: Option<String>,
}

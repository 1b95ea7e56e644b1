use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::domain::{TenantId, User, WorkflowId, WorkflowStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsureTenantResponse {
    pub tenant_id: TenantId,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    pub title: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_strict_status"
    )]
    pub status: Option<WorkflowStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateWorkflowStatusRequest {
    #[serde(deserialize_with = "strict_status")]
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

const STATUS_VALUES: &[&str] = &[WorkflowStatus::IN_ARBEIT, WorkflowStatus::ERLEDIGT];

fn strict_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<WorkflowStatus, D::Error> {
    let raw = String::deserialize(deserializer)?;
    WorkflowStatus::parse_strict(&raw).ok_or_else(|| de::Error::unknown_variant(&raw, STATUS_VALUES))
}

fn optional_strict_status<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<WorkflowStatus>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|raw| {
            WorkflowStatus::parse_strict(&raw)
                .ok_or_else(|| de::Error::unknown_variant(&raw, STATUS_VALUES))
        })
        .transpose()
}

pub fn ensure_tenant_route() -> &'static str {
    "/ensure-tenant"
}

pub fn sign_up_route() -> &'static str {
    "/auth/signup"
}

pub fn sign_in_route() -> &'static str {
    "/auth/token"
}

pub fn current_user_route() -> &'static str {
    "/auth/user"
}

pub fn tenant_workflows_route(tenant_id: TenantId) -> String {
    format!("/tenants/{tenant_id}/workflows")
}

pub fn workflow_route(workflow_id: WorkflowId) -> String {
    format!("/workflows/{workflow_id}")
}

use identity::SessionConfig;
use shared::error::{ApiError, ErrorCode};
use storage::Storage;

pub mod auth;
pub mod provisioning;
pub mod workflows;

pub use auth::{authenticate, sign_in, sign_up};
pub use provisioning::{ensure_tenant, tenant_name_for, TenantDirectory};
pub use workflows::{create_workflow, list_workflows, set_workflow_status};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub sessions: SessionConfig,
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, format!("{err:#}"))
}

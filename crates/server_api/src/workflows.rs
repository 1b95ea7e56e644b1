use chrono::Utc;
use shared::{
    domain::{Membership, TenantId, User, UserId, Workflow, WorkflowId, WorkflowStatus},
    error::{ApiError, ErrorCode},
    protocol::{CreateWorkflowRequest, UpdateWorkflowStatusRequest},
};
use tracing::debug;

use crate::{internal, ApiContext};

pub async fn list_workflows(
    ctx: &ApiContext,
    user: &User,
    tenant_id: TenantId,
) -> Result<Vec<Workflow>, ApiError> {
    ensure_member(ctx, user.id, tenant_id).await?;
    ctx.storage
        .list_workflows_for_tenant(tenant_id)
        .await
        .map_err(internal)
}

pub async fn create_workflow(
    ctx: &ApiContext,
    user: &User,
    tenant_id: TenantId,
    request: &CreateWorkflowRequest,
) -> Result<Workflow, ApiError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "title must not be empty"));
    }
    ensure_member(ctx, user.id, tenant_id).await?;

    let workflow = ctx
        .storage
        .insert_workflow(
            tenant_id,
            title,
            request.status.unwrap_or(WorkflowStatus::InArbeit),
        )
        .await
        .map_err(internal)?;
    debug!(%tenant_id, workflow_id = %workflow.id, "workflow created");
    Ok(workflow)
}

/// Rows of tenants the caller does not belong to are reported as missing.
pub async fn set_workflow_status(
    ctx: &ApiContext,
    user: &User,
    workflow_id: WorkflowId,
    request: &UpdateWorkflowStatusRequest,
) -> Result<Workflow, ApiError> {
    let not_found = || ApiError::new(ErrorCode::NotFound, "workflow not found");

    let existing = ctx
        .storage
        .workflow(workflow_id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;
    if membership_in(ctx, user.id, existing.tenant_id).await?.is_none() {
        return Err(not_found());
    }

    let updated_at = request.updated_at.unwrap_or_else(Utc::now);
    ctx.storage
        .update_workflow_status(workflow_id, request.status, updated_at)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)
}

async fn ensure_member(
    ctx: &ApiContext,
    user_id: UserId,
    tenant_id: TenantId,
) -> Result<Membership, ApiError> {
    membership_in(ctx, user_id, tenant_id)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::Forbidden, "user is not a member of this tenant"))
}

async fn membership_in(
    ctx: &ApiContext,
    user_id: UserId,
    tenant_id: TenantId,
) -> Result<Option<Membership>, ApiError> {
    let membership = ctx
        .storage
        .membership_for_user(user_id)
        .await
        .map_err(internal)?;
    Ok(membership.filter(|m| m.tenant_id == tenant_id))
}

#[cfg(test)]
#[path = "tests/workflows_tests.rs"]
mod tests;

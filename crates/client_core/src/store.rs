use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use shared::{
    domain::{TenantId, Workflow, WorkflowId, WorkflowStatus},
    protocol::{
        tenant_workflows_route, workflow_route, CreateWorkflowRequest,
        UpdateWorkflowStatusRequest,
    },
};

use crate::ApiClient;

/// Tenant-scoped workflow rows as seen by the list controller.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Newest-created first.
    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Workflow>>;
    async fn insert(
        &self,
        tenant_id: TenantId,
        title: &str,
        status: WorkflowStatus,
    ) -> Result<Workflow>;
    async fn update_status(
        &self,
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Workflow>;
}

#[derive(Debug, Clone)]
pub struct HttpWorkflowStore {
    api: ApiClient,
    access_token: String,
}

impl HttpWorkflowStore {
    pub fn new(api: ApiClient, access_token: impl Into<String>) -> Self {
        Self {
            api,
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl WorkflowStore for HttpWorkflowStore {
    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Workflow>> {
        let request = self.api.request(
            Method::GET,
            &tenant_workflows_route(tenant_id),
            Some(&self.access_token),
        );
        Ok(self.api.send(request).await?)
    }

    async fn insert(
        &self,
        tenant_id: TenantId,
        title: &str,
        status: WorkflowStatus,
    ) -> Result<Workflow> {
        let request = self
            .api
            .request(
                Method::POST,
                &tenant_workflows_route(tenant_id),
                Some(&self.access_token),
            )
            .json(&CreateWorkflowRequest {
                title: title.to_string(),
                status: Some(status),
            });
        Ok(self.api.send(request).await?)
    }

    async fn update_status(
        &self,
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Workflow> {
        let request = self
            .api
            .request(
                Method::PATCH,
                &workflow_route(workflow_id),
                Some(&self.access_token),
            )
            .json(&UpdateWorkflowStatusRequest {
                status,
                updated_at: Some(updated_at),
            });
        Ok(self.api.send(request).await?)
    }
}

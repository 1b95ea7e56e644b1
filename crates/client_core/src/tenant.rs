use reqwest::Method;
use shared::{
    domain::{TenantId, User},
    protocol::{ensure_tenant_route, EnsureTenantResponse},
};
use tracing::info;

use crate::{
    identity::IdentityProvider, store::HttpWorkflowStore, workflow_list::WorkflowList, ApiClient,
    ClientError,
};

#[derive(Debug, Clone)]
pub struct TenantClient {
    api: ApiClient,
}

impl TenantClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Resolves the caller's tenant, provisioning it on first use.
    pub async fn ensure_tenant(
        &self,
        access_token: &str,
    ) -> Result<EnsureTenantResponse, ClientError> {
        let request = self
            .api
            .request(Method::POST, ensure_tenant_route(), Some(access_token));
        self.api.send(request).await
    }
}

/// Signed-in user together with their resolved tenant.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub user: User,
    pub tenant_id: TenantId,
    pub created: bool,
    access_token: String,
}

impl Workspace {
    pub fn workflow_store(&self, api: ApiClient) -> HttpWorkflowStore {
        HttpWorkflowStore::new(api, self.access_token.clone())
    }

    pub fn workflow_list(&self, api: ApiClient) -> WorkflowList<HttpWorkflowStore> {
        WorkflowList::new(self.workflow_store(api), Some(self.tenant_id))
    }
}

pub async fn open_workspace<I>(identity: &I, tenants: &TenantClient) -> Result<Workspace, ClientError>
where
    I: IdentityProvider + ?Sized,
{
    let user = identity
        .current_user()
        .await
        .ok_or(ClientError::Unauthenticated)?;
    let access_token = identity
        .session_token()
        .await
        .ok_or(ClientError::Unauthenticated)?;
    let provisioning = tenants.ensure_tenant(&access_token).await?;
    info!(
        user_id = %user.id,
        tenant_id = %provisioning.tenant_id,
        created = provisioning.created,
        "workspace ready"
    );
    Ok(Workspace {
        user,
        tenant_id: provisioning.tenant_id,
        created: provisioning.created,
        access_token,
    })
}

//! Ensure-tenant: every authenticated user ends up owning exactly one tenant.

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{Membership, User, UserId},
    error::{ApiError, ErrorCode},
    protocol::EnsureTenantResponse,
};
use storage::{Storage, TenantProvisioning};
use tracing::{error, info};

use crate::internal;

/// Privileged view of tenants and memberships. Implementations bypass
/// tenant-scoped access checks and must only be reached from provisioning.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_membership(&self, user_id: UserId) -> Result<Option<Membership>>;
    async fn create_tenant_with_owner(&self, owner: UserId, name: &str)
        -> Result<TenantProvisioning>;
}

#[async_trait]
impl TenantDirectory for Storage {
    async fn find_membership(&self, user_id: UserId) -> Result<Option<Membership>> {
        self.membership_for_user(user_id).await
    }

    async fn create_tenant_with_owner(
        &self,
        owner: UserId,
        name: &str,
    ) -> Result<TenantProvisioning> {
        Storage::create_tenant_with_owner(self, owner, name).await
    }
}

pub fn tenant_name_for(email: &str) -> String {
    format!("Maklerbüro ({email})")
}

pub async fn ensure_tenant<D>(directory: &D, user: &User) -> Result<EnsureTenantResponse, ApiError>
where
    D: TenantDirectory + ?Sized,
{
    if let Some(membership) = directory
        .find_membership(user.id)
        .await
        .map_err(store_failure)?
    {
        return Ok(EnsureTenantResponse {
            tenant_id: membership.tenant_id,
            created: false,
        });
    }

    let name = tenant_name_for(&user.email);
    match directory
        .create_tenant_with_owner(user.id, &name)
        .await
        .map_err(store_failure)?
    {
        TenantProvisioning::Created(tenant) => {
            info!(user_id = %user.id, tenant_id = %tenant.id, "provisioned tenant");
            Ok(EnsureTenantResponse {
                tenant_id: tenant.id,
                created: true,
            })
        }
        TenantProvisioning::AlreadyProvisioned => {
            // Lost the race against a concurrent first call; report the winner.
            let membership = directory
                .find_membership(user.id)
                .await
                .map_err(store_failure)?
                .ok_or_else(|| {
                    ApiError::new(
                        ErrorCode::Internal,
                        "membership conflict reported but no membership found",
                    )
                })?;
            info!(
                user_id = %user.id,
                tenant_id = %membership.tenant_id,
                "concurrent provisioning detected, reusing existing tenant"
            );
            Ok(EnsureTenantResponse {
                tenant_id: membership.tenant_id,
                created: false,
            })
        }
    }
}

fn store_failure(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "tenant provisioning store failure");
    internal(err)
}

#[cfg(test)]
#[path = "tests/provisioning_tests.rs"]
mod tests;

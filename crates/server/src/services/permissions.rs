use crate::vsphere::Vsphere;
use crate::vsphere::types::{MoRef, Permission};
use crate::web::types::{Role, RolePayload, VmPermission};
use std::collections::HashMap;
use std::sync::Arc;
use vmctl_common::prelude::{Error, Result};

/// Every role defined in vCenter.
///
pub async fn roles(vsphere: &Arc<dyn Vsphere + Send + Sync>) -> Result<Vec<Role>> {
    Ok(vsphere.roles().await?.into_iter().map(Role::from).collect())
}

/// Permissions effective on a VM, with the role names filled in.
///
/// # Returns
///
/// One entry per permission, `inherited` when it is defined on a parent
/// entity.
///
pub async fn vm_permissions(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    vm: &MoRef,
) -> Result<Vec<VmPermission>> {
    let names: HashMap<i32, String> = vsphere
        .roles()
        .await?
        .into_iter()
        .map(|role| (role.role_id, role.name))
        .collect();

    let permissions = vsphere.entity_permissions(vm).await?;
    Ok(permissions
        .into_iter()
        .map(|permission| VmPermission {
            role: names.get(&permission.role_id).cloned(),
            inherited: permission.entity.as_ref() != Some(vm),
            principal: permission.principal,
            group: permission.group,
            role_id: permission.role_id,
            propagate: permission.propagate,
        })
        .collect())
}

/// Grants a role, by name, to a user or group on a VM.
///
#[tracing::instrument(level = "trace", target = "service", skip(vsphere))]
pub async fn add_role(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    vm: &MoRef,
    payload: &RolePayload,
) -> Result<()> {
    if payload.principal.trim().is_empty() {
        return Err(Error::BadRequest("principal is required".to_owned()));
    }
    let role = vsphere
        .roles()
        .await?
        .into_iter()
        .find(|role| role.name == payload.role)
        .ok_or_else(|| Error::NotFound(format!("role '{}'", payload.role)))?;

    let permission = Permission {
        entity: Some(vm.clone()),
        principal: payload.principal.clone(),
        group: payload.group,
        role_id: role.role_id,
        propagate: payload.propagate,
    };
    vsphere.set_entity_permissions(vm, &[permission]).await?;
    tracing::info!(target: "service", %vm, principal = payload.principal, role = role.name, "Role granted");

    Ok(())
}

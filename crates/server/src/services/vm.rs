//! Synchronous VM operations. Each one runs inside the request and waits for
//! its remote task.

use crate::config::VmwareDefaults;
use crate::services::deploy::placement::{choose_datacenter, inventory_path};
use crate::services::wait_until_finish;
use crate::vsphere::Vsphere;
use crate::vsphere::types::{
    DatacenterFolder, GuestOp, MoRef, PowerState, SnapshotTask, VmTask,
};
use crate::web::types::{
    FindQuery, PowerAction, PowerPayload, Snapshot, SnapshotCreatePayload, SnapshotDeletePayload,
    VmInfo, VmListQuery,
};
use std::sync::Arc;
use vmctl_common::prelude::{Error, Result};

const TOOLS_UNAVAILABLE: &str = "ToolsUnavailable";
const TASK_POLL_SECS: u64 = 1;

/// Datacenter to work in, the requested one or else the configured default.
///
async fn datacenter(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    defaults: &VmwareDefaults,
    requested: Option<&str>,
) -> Result<(String, MoRef)> {
    let name = requested
        .filter(|name| !name.is_empty())
        .unwrap_or(&defaults.datacenter);
    choose_datacenter(vsphere, name).await
}

/// Resolves a VM by its BIOS UUID within a datacenter.
///
/// # Arguments
///
/// * `vsphere`: Client for interacting with the vSphere API.
/// * `defaults`: Configured defaults, used when no datacenter is given.
/// * `uuid`: BIOS UUID of the VM.
/// * `datacenter`: Optional datacenter name.
///
#[tracing::instrument(level = "trace", target = "service", skip(vsphere, defaults))]
pub async fn find_by_uuid(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    defaults: &VmwareDefaults,
    uuid: &str,
    datacenter_name: Option<&str>,
) -> Result<MoRef> {
    let (_, datacenter) = datacenter(vsphere, defaults, datacenter_name).await?;
    vsphere
        .find_vm_by_uuid(Some(&datacenter), uuid)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Virtual Machine '{}'", uuid)))
}

/// Lists the VMs of a resource pool, a folder or the whole datacenter, in
/// that order of preference.
///
pub async fn list(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    defaults: &VmwareDefaults,
    query: &VmListQuery,
) -> Result<Vec<VmInfo>> {
    let (datacenter_path, datacenter) =
        datacenter(vsphere, defaults, query.datacenter.as_deref()).await?;

    let container = if let Some(pool) = query.resource_pool.as_deref().filter(|p| !p.is_empty()) {
        let path = inventory_path(&datacenter_path, DatacenterFolder::Host, pool)?;
        find_kind(vsphere, &path, &["ResourcePool", "VirtualApp"], "resource pool").await?
    } else if let Some(folder) = query.folder.as_deref().filter(|f| !f.is_empty()) {
        let path = inventory_path(&datacenter_path, DatacenterFolder::Vm, folder)?;
        find_kind(vsphere, &path, &["Folder"], "folder").await?
    } else {
        vsphere
            .datacenter_folder(&datacenter, DatacenterFolder::Vm)
            .await?
    };

    let vms = vsphere.list_vms(&container).await?;
    tracing::info!(target: "service", %container, count = vms.len(), "Listed VMs");

    Ok(vms.into_iter().map(VmInfo::from).collect())
}

async fn find_kind(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    path: &str,
    kinds: &[&str],
    what: &str,
) -> Result<MoRef> {
    vsphere
        .find_by_path(path)
        .await?
        .filter(|object| object.is_any(kinds))
        .ok_or_else(|| Error::NotFound(format!("{} '{}'", what, path)))
}

pub async fn info(vsphere: &Arc<dyn Vsphere + Send + Sync>, vm: &MoRef) -> Result<VmInfo> {
    Ok(vsphere.vm_summary(vm).await?.into())
}

/// Finds a VM by inventory path, relative to the datacenter's VM folder or
/// absolute.
///
pub async fn find(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    defaults: &VmwareDefaults,
    query: &FindQuery,
) -> Result<VmInfo> {
    if query.path.trim().is_empty() {
        return Err(Error::BadRequest("path is required".to_owned()));
    }
    let (datacenter_path, _) = datacenter(vsphere, defaults, query.datacenter.as_deref()).await?;
    let path = inventory_path(&datacenter_path, DatacenterFolder::Vm, &query.path)?;
    let vm = find_kind(vsphere, &path, &["VirtualMachine"], "Virtual Machine").await?;

    info(vsphere, &vm).await
}

/// Starts a VM task and waits for it.
///
async fn run_task(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    vm: &MoRef,
    task: VmTask,
) -> Result<Option<serde_json::Value>> {
    let remote = vsphere.vm_task(vm, task).await?;
    wait_until_finish(vsphere, &remote, TASK_POLL_SECS, None).await
}

/// Destroys a VM, powering it off first if it is running.
///
#[tracing::instrument(level = "trace", target = "service", skip(vsphere))]
pub async fn destroy(vsphere: &Arc<dyn Vsphere + Send + Sync>, vm: &MoRef) -> Result<()> {
    let summary = vsphere.vm_summary(vm).await?;
    if summary.runtime.power_state == PowerState::PoweredOn {
        tracing::debug!(target: "service", %vm, "Powering off before destroy");
        run_task(vsphere, vm, VmTask::PowerOff).await?;
    }
    run_task(vsphere, vm, VmTask::Destroy).await?;
    tracing::info!(target: "service", %vm, name = summary.config.name, "Destroyed");

    Ok(())
}

pub async fn rename(vsphere: &Arc<dyn Vsphere + Send + Sync>, vm: &MoRef, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest("name is required".to_owned()));
    }
    run_task(vsphere, vm, VmTask::Rename(name.to_owned())).await?;
    tracing::info!(target: "service", %vm, name, "Renamed");

    Ok(())
}

pub async fn screenshot(vsphere: &Arc<dyn Vsphere + Send + Sync>, vm: &MoRef) -> Result<Vec<u8>> {
    vsphere.screenshot(vm).await
}

/// Changes the power state of a VM.
///
/// `reboot` and `shutdown` go through the guest OS. When VMware Tools are not
/// running they fail with the `ToolsUnavailable` fault, unless `force` is set,
/// which falls back to a hard reset or power-off.
///
/// # Arguments
///
/// * `vsphere`: Client for interacting with the vSphere API.
/// * `vm`: Target VM.
/// * `payload`: Requested state and the force flag.
///
#[tracing::instrument(level = "trace", target = "service", skip(vsphere))]
pub async fn power(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    vm: &MoRef,
    payload: &PowerPayload,
) -> Result<()> {
    let (guest_op, fallback) = match payload.state {
        PowerAction::On => return run_task(vsphere, vm, VmTask::PowerOn).await.map(drop),
        PowerAction::Off => return run_task(vsphere, vm, VmTask::PowerOff).await.map(drop),
        PowerAction::Reset => return run_task(vsphere, vm, VmTask::Reset).await.map(drop),
        PowerAction::Suspend => return run_task(vsphere, vm, VmTask::Suspend).await.map(drop),
        PowerAction::Reboot => (GuestOp::Reboot, VmTask::Reset),
        PowerAction::Shutdown => (GuestOp::Shutdown, VmTask::PowerOff),
    };

    match vsphere.guest_op(vm, guest_op).await {
        Err(error) if payload.force && error.is_fault(TOOLS_UNAVAILABLE) => {
            tracing::warn!(target: "service", %vm, ?fallback, "VMware Tools unavailable, forcing");
            run_task(vsphere, vm, fallback).await.map(drop)
        }
        result => result,
    }
}

// -----------------------------------------------------------------------------

pub async fn snapshots(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    vm: &MoRef,
) -> Result<Vec<Snapshot>> {
    Ok(vsphere
        .vm_snapshots(vm)
        .await?
        .map(|info| Snapshot::flatten(&info))
        .unwrap_or_default())
}

/// Takes a snapshot and returns it as listed afterwards.
///
pub async fn create_snapshot(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    vm: &MoRef,
    payload: SnapshotCreatePayload,
) -> Result<Snapshot> {
    if payload.name.trim().is_empty() {
        return Err(Error::BadRequest("snapshot name is required".to_owned()));
    }
    let task = VmTask::CreateSnapshot {
        name: payload.name,
        description: payload.description,
        memory: payload.memory,
        quiesce: payload.quiesce,
    };
    let created: MoRef = match run_task(vsphere, vm, task).await? {
        Some(value) => serde_json::from_value(value)?,
        None => return Err(Error::Any("snapshot task returned no snapshot".to_owned())),
    };

    let info = vsphere.vm_snapshots(vm).await?.unwrap_or_default();
    Snapshot::flatten(&info)
        .into_iter()
        .zip(info.walk())
        .find(|(_, (node, _))| node.snapshot == created)
        .map(|(snapshot, _)| snapshot)
        .ok_or_else(|| Error::NotFound(format!("snapshot '{}'", created.value)))
}

/// Resolves a snapshot by its integer ID.
///
async fn snapshot_ref(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    vm: &MoRef,
    id: i32,
) -> Result<MoRef> {
    vsphere
        .vm_snapshots(vm)
        .await?
        .and_then(|info| info.find(id).map(|node| node.snapshot.clone()))
        .ok_or_else(|| Error::NotFound(format!("snapshot {}", id)))
}

pub async fn delete_snapshot(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    vm: &MoRef,
    payload: &SnapshotDeletePayload,
) -> Result<()> {
    let snapshot = snapshot_ref(vsphere, vm, payload.id).await?;
    let task = SnapshotTask::Remove {
        remove_children: payload.children,
        consolidate: payload.consolidate,
    };
    let remote = vsphere.snapshot_task(&snapshot, task).await?;
    wait_until_finish(vsphere, &remote, TASK_POLL_SECS, None).await?;
    tracing::info!(target: "service", %vm, id = payload.id, "Snapshot removed");

    Ok(())
}

pub async fn revert_snapshot(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    vm: &MoRef,
    id: i32,
) -> Result<()> {
    let snapshot = snapshot_ref(vsphere, vm, id).await?;
    let remote = vsphere.snapshot_task(&snapshot, SnapshotTask::Revert).await?;
    wait_until_finish(vsphere, &remote, TASK_POLL_SECS, None).await?;
    tracing::info!(target: "service", %vm, id, "Reverted to snapshot");

    Ok(())
}

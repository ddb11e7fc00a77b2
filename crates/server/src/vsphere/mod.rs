pub mod client;
#[cfg(test)]
pub(crate) mod fake;
pub mod types;

// -----------------------------------------------------------------------------

use crate::vsphere::types::*;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc::UnboundedSender;
use vmctl_common::prelude::Result;

/// Operations the service needs from vCenter.
///
/// Everything above this trait (deployment pipeline, handlers, tests) depends
/// only on it, the concrete binding lives in [`client::VsphereClient`].
///
#[async_trait]
pub trait Vsphere {
    async fn login(&self) -> Result<()>;
    async fn logout(&self) -> Result<()>;
    async fn session_alive(&self) -> Result<bool>;

    async fn find_by_path(&self, path: &str) -> Result<Option<MoRef>>;
    async fn find_vm_by_uuid(&self, datacenter: Option<&MoRef>, uuid: &str)
    -> Result<Option<MoRef>>;
    async fn datacenter_folder(&self, datacenter: &MoRef, folder: DatacenterFolder)
    -> Result<MoRef>;
    async fn parent(&self, entity: &MoRef) -> Result<MoRef>;
    async fn root_resource_pool(&self, compute_resource: &MoRef) -> Result<MoRef>;
    async fn list_vms(&self, container: &MoRef) -> Result<Vec<VmSummary>>;

    async fn storage_drs_enabled(&self, pod: &MoRef) -> Result<bool>;
    async fn recommend_datastores(
        &self,
        spec: &StoragePlacementSpec,
    ) -> Result<StoragePlacementResult>;

    async fn create_import_spec(
        &self,
        descriptor: &str,
        resource_pool: &MoRef,
        datastore: &MoRef,
        params: &ImportSpecParams,
    ) -> Result<ImportSpecResult>;
    async fn import_vapp(
        &self,
        resource_pool: &MoRef,
        spec: &ImportSpec,
        folder: &MoRef,
        host: Option<&MoRef>,
    ) -> Result<MoRef>;
    async fn lease_state(&self, lease: &MoRef) -> Result<LeaseState>;
    async fn lease_error(&self, lease: &MoRef) -> Result<Option<String>>;
    async fn lease_info(&self, lease: &MoRef) -> Result<LeaseInfo>;
    async fn lease_progress(&self, lease: &MoRef, percent: u8) -> Result<()>;
    async fn lease_complete(&self, lease: &MoRef) -> Result<()>;
    async fn lease_abort(&self, lease: &MoRef, reason: &str) -> Result<()>;
    async fn upload(
        &self,
        url: &str,
        file: &Path,
        create: bool,
        progress: UnboundedSender<u64>,
    ) -> Result<()>;

    async fn vm_summary(&self, vm: &MoRef) -> Result<VmSummary>;
    async fn vm_guest(&self, vm: &MoRef) -> Result<GuestInfo>;
    async fn vm_snapshots(&self, vm: &MoRef) -> Result<Option<SnapshotInfo>>;
    async fn vm_task(&self, vm: &MoRef, task: VmTask) -> Result<MoRef>;
    async fn guest_op(&self, vm: &MoRef, op: GuestOp) -> Result<()>;
    async fn snapshot_task(&self, snapshot: &MoRef, task: SnapshotTask) -> Result<MoRef>;
    async fn screenshot(&self, vm: &MoRef) -> Result<Vec<u8>>;
    async fn task_status(&self, task: &MoRef) -> Result<TaskStatus>;

    async fn roles(&self) -> Result<Vec<AuthorizationRole>>;
    async fn entity_permissions(&self, entity: &MoRef) -> Result<Vec<Permission>>;
    async fn set_entity_permissions(&self, entity: &MoRef, permissions: &[Permission])
    -> Result<()>;
}

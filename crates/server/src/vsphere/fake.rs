//! In-memory vCenter used by unit tests.

use crate::vsphere::Vsphere;
use crate::vsphere::types::*;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use vmctl_common::prelude::{Error, Fault, Result, VsphereError};

#[derive(Debug, Clone)]
pub struct Upload {
    pub url: String,
    pub file: PathBuf,
    pub size: u64,
    pub create: bool,
}

#[derive(Debug)]
pub struct FakeState {
    pub objects: HashMap<String, MoRef>,
    pub parents: HashMap<MoRef, MoRef>,
    pub root_pools: HashMap<MoRef, MoRef>,
    pub vm_folder: MoRef,
    pub drs_enabled: bool,
    pub recommendation: StoragePlacementResult,
    pub vms: Vec<VmSummary>,
    pub import_result: serde_json::Value,
    pub import_params: Option<ImportSpecParams>,
    pub imported_spec: Option<ImportSpec>,
    pub lease_states: VecDeque<LeaseState>,
    pub lease_info: serde_json::Value,
    pub lease_progress: Vec<u8>,
    pub fail_upload: bool,
    pub uploads: Vec<Upload>,
    pub guests: VecDeque<GuestInfo>,
    pub tools_running: bool,
    pub failing_methods: Vec<String>,
    pub task_results: HashMap<String, serde_json::Value>,
    pub tasks: HashMap<MoRef, TaskStatus>,
    pub snapshots: Option<SnapshotInfo>,
    pub calls: Vec<String>,
}

/// Fake vCenter with a small inventory:
///
/// ```text
/// DC                              Datacenter datacenter-1 (vmFolder group-v3)
/// DC/vm/deploys                   Folder group-v40
/// DC/host/C1                      ClusterComputeResource domain-c7 (pool resgroup-8)
/// DC/host/C1/esx-01               HostSystem host-21
/// DC/host/C1/Resources/apps       ResourcePool resgroup-30
/// DC/datastore/ds-a               Datastore datastore-11
/// DC/datastore/pod-1              StoragePod group-p1
/// DC/network/VM Network           Network network-5
/// DC/network/Frontend             DistributedVirtualPortgroup dvportgroup-6
/// ```
///
pub struct FakeVsphere {
    state: Mutex<FakeState>,
}

impl FakeVsphere {
    pub fn inventory() -> Self {
        let objects = [
            ("DC", "Datacenter", "datacenter-1"),
            ("DC/vm/deploys", "Folder", "group-v40"),
            ("DC/host/C1", "ClusterComputeResource", "domain-c7"),
            ("DC/host/C1/esx-01", "HostSystem", "host-21"),
            ("DC/host/C1/Resources/apps", "ResourcePool", "resgroup-30"),
            ("DC/datastore/ds-a", "Datastore", "datastore-11"),
            ("DC/datastore/pod-1", "StoragePod", "group-p1"),
            ("DC/network/VM Network", "Network", "network-5"),
            ("DC/network/Frontend", "DistributedVirtualPortgroup", "dvportgroup-6"),
        ]
        .into_iter()
        .map(|(path, kind, id)| (path.to_owned(), MoRef::new(kind, id)))
        .collect();

        let cluster = MoRef::new("ClusterComputeResource", "domain-c7");
        let state = FakeState {
            objects,
            parents: HashMap::from([(MoRef::new("HostSystem", "host-21"), cluster.clone())]),
            root_pools: HashMap::from([(cluster, MoRef::new("ResourcePool", "resgroup-8"))]),
            vm_folder: MoRef::new("Folder", "group-v3"),
            drs_enabled: true,
            recommendation: StoragePlacementResult::default(),
            vms: Vec::new(),
            import_result: json!({
                "importSpec": {
                    "_typeName": "VirtualMachineImportSpec",
                    "configSpec": {"_typeName": "VirtualMachineConfigSpec", "name": "svc-01"}
                },
                "fileItem": [{
                    "deviceId": "/svc-01/VirtualLsiLogicController0:0",
                    "path": "disk-0.vmdk",
                    "size": 1073741824,
                    "create": true
                }]
            }),
            import_params: None,
            imported_spec: None,
            lease_states: VecDeque::from([LeaseState::Initializing, LeaseState::Ready]),
            lease_info: json!({
                "entity": {"type": "VirtualMachine", "value": "vm-100"},
                "deviceUrl": [{
                    "key": "/vm-100/VirtualLsiLogicController0:0",
                    "importKey": "/svc-01/VirtualLsiLogicController0:0",
                    "url": "https://*/nfc/52a1/disk-0.vmdk",
                    "disk": true
                }],
                "leaseTimeout": 300
            }),
            lease_progress: Vec::new(),
            fail_upload: false,
            uploads: Vec::new(),
            guests: VecDeque::from([GuestInfo {
                ip_address: Some("10.0.0.7".to_owned()),
                net: vec![GuestNicInfo {
                    network: Some("VM Network".to_owned()),
                    ip_address: vec!["10.0.0.7".to_owned()],
                }],
            }]),
            tools_running: true,
            failing_methods: Vec::new(),
            task_results: HashMap::new(),
            tasks: HashMap::new(),
            snapshots: None,
            calls: Vec::new(),
        };

        Self {
            state: Mutex::new(state),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn fault(op: VsphereError, kind: &str) -> Error {
        Error::Vsphere(
            op,
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            Fault {
                kind: kind.to_owned(),
                message: format!("{} raised by fake", kind),
            },
        )
    }

    fn start_task(&self, method: &str, target: &MoRef) -> Result<MoRef> {
        let mut state = self.state();
        state.calls.push(format!("{} {}", method, target.value));
        if state.failing_methods.iter().any(|failing| failing == method) {
            return Err(Self::fault(VsphereError::Task, "InvalidState"));
        }

        let task = MoRef::new("Task", &format!("task-{}", state.tasks.len() + 1));
        let result = state.task_results.get(method).cloned();
        state.tasks.insert(task.clone(), TaskStatus::Completed(result));
        Ok(task)
    }
}

#[async_trait]
impl Vsphere for FakeVsphere {
    async fn login(&self) -> Result<()> {
        self.record("Login".to_owned());
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.record("Logout".to_owned());
        Ok(())
    }

    async fn session_alive(&self) -> Result<bool> {
        Ok(true)
    }

    async fn find_by_path(&self, path: &str) -> Result<Option<MoRef>> {
        let mut state = self.state();
        if let Some(object) = state.objects.get(path).cloned() {
            return Ok(Some(object));
        }
        let found = state
            .vms
            .iter()
            .find(|vm| path == format!("DC/vm/{}", vm.config.name))
            .and_then(|vm| vm.vm.clone());
        state.calls.push(format!("FindByInventoryPath {}", path));
        Ok(found)
    }

    async fn find_vm_by_uuid(&self, _: Option<&MoRef>, uuid: &str) -> Result<Option<MoRef>> {
        Ok(self
            .state()
            .vms
            .iter()
            .find(|vm| vm.config.uuid.as_deref() == Some(uuid))
            .and_then(|vm| vm.vm.clone()))
    }

    async fn datacenter_folder(&self, _: &MoRef, folder: DatacenterFolder) -> Result<MoRef> {
        match folder {
            DatacenterFolder::Vm => Ok(self.state().vm_folder.clone()),
            other => Ok(MoRef::new("Folder", other.segment())),
        }
    }

    async fn parent(&self, entity: &MoRef) -> Result<MoRef> {
        self.state()
            .parents
            .get(entity)
            .cloned()
            .ok_or(Self::fault(VsphereError::Property, "ManagedObjectNotFound"))
    }

    async fn root_resource_pool(&self, compute_resource: &MoRef) -> Result<MoRef> {
        self.state()
            .root_pools
            .get(compute_resource)
            .cloned()
            .ok_or(Self::fault(VsphereError::Property, "ManagedObjectNotFound"))
    }

    async fn list_vms(&self, _: &MoRef) -> Result<Vec<VmSummary>> {
        Ok(self.state().vms.clone())
    }

    async fn storage_drs_enabled(&self, _: &MoRef) -> Result<bool> {
        Ok(self.state().drs_enabled)
    }

    async fn recommend_datastores(
        &self,
        spec: &StoragePlacementSpec,
    ) -> Result<StoragePlacementResult> {
        let mut state = self.state();
        state
            .calls
            .push(format!("RecommendDatastores {}", spec.pod_selection_spec.storage_pod.value));
        Ok(state.recommendation.clone())
    }

    async fn create_import_spec(
        &self,
        _: &str,
        _: &MoRef,
        datastore: &MoRef,
        params: &ImportSpecParams,
    ) -> Result<ImportSpecResult> {
        let mut state = self.state();
        state.calls.push(format!("CreateImportSpec {}", datastore.value));
        state.import_params = Some(params.clone());
        Ok(serde_json::from_value(state.import_result.clone())?)
    }

    async fn import_vapp(
        &self,
        resource_pool: &MoRef,
        spec: &ImportSpec,
        _: &MoRef,
        host: Option<&MoRef>,
    ) -> Result<MoRef> {
        let mut state = self.state();
        let host = host.map(|host| host.value.as_str()).unwrap_or("-");
        state
            .calls
            .push(format!("ImportVApp {} {}", resource_pool.value, host));
        state.imported_spec = Some(spec.clone());
        Ok(MoRef::new("HttpNfcLease", "session[1]lease-1"))
    }

    async fn lease_state(&self, _: &MoRef) -> Result<LeaseState> {
        let mut state = self.state();
        let current = if state.lease_states.len() > 1 {
            state.lease_states.pop_front()
        } else {
            state.lease_states.front().copied()
        };
        Ok(current.unwrap_or(LeaseState::Ready))
    }

    async fn lease_error(&self, _: &MoRef) -> Result<Option<String>> {
        Ok(Some("Host is out of space".to_owned()))
    }

    async fn lease_info(&self, _: &MoRef) -> Result<LeaseInfo> {
        Ok(serde_json::from_value(self.state().lease_info.clone())?)
    }

    async fn lease_progress(&self, _: &MoRef, percent: u8) -> Result<()> {
        self.state().lease_progress.push(percent);
        Ok(())
    }

    async fn lease_complete(&self, _: &MoRef) -> Result<()> {
        self.record("HttpNfcLeaseComplete".to_owned());
        Ok(())
    }

    async fn lease_abort(&self, _: &MoRef, reason: &str) -> Result<()> {
        self.record(format!("HttpNfcLeaseAbort {}", reason));
        Ok(())
    }

    async fn upload(
        &self,
        url: &str,
        file: &Path,
        create: bool,
        progress: UnboundedSender<u64>,
    ) -> Result<()> {
        if self.state().fail_upload {
            return Err(Error::UploadFailed(url.to_owned(), "connection reset".to_owned()));
        }
        let bytes = tokio::fs::read(file).await?;
        progress.send(bytes.len() as u64).ok();
        self.state().uploads.push(Upload {
            url: url.to_owned(),
            file: file.to_path_buf(),
            size: bytes.len() as u64,
            create,
        });
        Ok(())
    }

    async fn vm_summary(&self, vm: &MoRef) -> Result<VmSummary> {
        self.state()
            .vms
            .iter()
            .find(|summary| summary.vm.as_ref() == Some(vm))
            .cloned()
            .ok_or(Self::fault(VsphereError::Property, "ManagedObjectNotFound"))
    }

    async fn vm_guest(&self, _: &MoRef) -> Result<GuestInfo> {
        let mut state = self.state();
        let guest = if state.guests.len() > 1 {
            state.guests.pop_front()
        } else {
            state.guests.front().cloned()
        };
        Ok(guest.unwrap_or_default())
    }

    async fn vm_snapshots(&self, _: &MoRef) -> Result<Option<SnapshotInfo>> {
        Ok(self.state().snapshots.clone())
    }

    async fn vm_task(&self, vm: &MoRef, task: VmTask) -> Result<MoRef> {
        let (method, _) = task.method();
        self.start_task(method, vm)
    }

    async fn guest_op(&self, vm: &MoRef, op: GuestOp) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("{} {}", op.method(), vm.value));
        if state.tools_running {
            Ok(())
        } else {
            Err(Self::fault(VsphereError::Shutdown, "ToolsUnavailable"))
        }
    }

    async fn snapshot_task(&self, snapshot: &MoRef, task: SnapshotTask) -> Result<MoRef> {
        let (method, _) = task.method();
        self.start_task(method, snapshot)
    }

    async fn screenshot(&self, _: &MoRef) -> Result<Vec<u8>> {
        Ok(b"\x89PNG".to_vec())
    }

    async fn task_status(&self, task: &MoRef) -> Result<TaskStatus> {
        Ok(self
            .state()
            .tasks
            .get(task)
            .cloned()
            .unwrap_or(TaskStatus::Completed(None)))
    }

    async fn roles(&self) -> Result<Vec<AuthorizationRole>> {
        Ok(serde_json::from_value(json!([
            {"roleId": -1, "system": true, "name": "Admin", "info": {"label": "Administrator", "summary": "Full access rights"}},
            {"roleId": -2, "system": true, "name": "ReadOnly", "info": {"label": "Read-only", "summary": "See details of objects"}}
        ]))?)
    }

    async fn entity_permissions(&self, entity: &MoRef) -> Result<Vec<Permission>> {
        Ok(vec![Permission {
            entity: Some(entity.clone()),
            principal: "VSPHERE.LOCAL\\devops".to_owned(),
            group: true,
            role_id: -2,
            propagate: true,
        }])
    }

    async fn set_entity_permissions(&self, entity: &MoRef, permissions: &[Permission]) -> Result<()> {
        for permission in permissions {
            self.record(format!(
                "SetEntityPermissions {} {} {}",
                entity.value, permission.principal, permission.role_id
            ));
        }
        Ok(())
    }
}

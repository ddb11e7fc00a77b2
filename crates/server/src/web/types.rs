use crate::config::VmwareDefaults;
use crate::vsphere::types::{AuthorizationRole, PowerState, SnapshotInfo, VmSummary};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use vmctl_common::prelude::{Error, Result};

/// Payload for deploying a new VM from an OVA.
///
/// # Example JSON
///
/// ```json
/// {
///   "name": "svc-01",
///   "ova_url": "http://x/y.ova",
///   "datastores": {"type": "datastore", "names": ["ds-a"]},
///   "computer_resources": {"type": "cluster", "path": "/DC/host/C1"}
/// }
/// ```
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeployRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ova_url: String,
    #[serde(default)]
    pub annotation: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub folder: String,
    /// OVF network name to inventory network name.
    #[serde(default)]
    pub networks: BTreeMap<String, String>,
    #[serde(default)]
    pub datastores: DatastoreSelector,
    #[serde(default)]
    pub computer_resources: ComputerResourceSelector,
}

/// Kind is one of `datastore` or `cluster` (a datastore cluster).
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DatastoreSelector {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub names: Vec<String>,
}

/// Kind is one of `host`, `cluster` or `rp` (a resource pool).
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ComputerResourceSelector {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub path: String,
}

pub const DATASTORE: &str = "datastore";
pub const CLUSTER: &str = "cluster";
pub const HOST: &str = "host";
pub const RESOURCE_POOL: &str = "rp";

impl DeployRequest {
    /// Rejects requests missing the fields nothing can default.
    ///
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::BadRequest("name is required".to_owned()));
        }
        if self.ova_url.trim().is_empty() {
            return Err(Error::BadRequest("ova_url is required".to_owned()));
        }
        Ok(())
    }

    /// Replaces empty selectors with the configured defaults. Applying it more
    /// than once changes nothing.
    ///
    pub fn fill_defaults(&mut self, defaults: &VmwareDefaults) {
        if self.datacenter.is_empty() {
            self.datacenter = defaults.datacenter.clone();
        }
        if self.folder.is_empty() {
            self.folder = defaults.folder.clone().unwrap_or_default();
        }

        if self.datastores.kind.is_empty() {
            self.datastores.kind = DATASTORE.to_owned();
        }
        self.datastores.names.retain(|name| !name.trim().is_empty());
        if self.datastores.names.is_empty() {
            self.datastores.names = defaults.datastores.clone();
        }

        let resources = &mut self.computer_resources;
        if resources.path.is_empty() {
            let wants = |kind: &str| resources.kind.is_empty() || resources.kind == kind;
            if let Some(host) = defaults.host.as_ref().filter(|_| wants(HOST)) {
                resources.kind = HOST.to_owned();
                resources.path = host.clone();
            } else if let Some(pool) = defaults.resource_pool.as_ref().filter(|_| wants(RESOURCE_POOL)) {
                resources.kind = RESOURCE_POOL.to_owned();
                resources.path = pool.clone();
            }
        }
    }
}

// -----------------------------------------------------------------------------

/// Response of an accepted deployment.
///
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskIdResponse {
    pub task_id: Uuid,
}

/// Status map of a background task, e.g.
/// `{"stage": "complete", "message": "ok", "ip": ["10.0.0.7"]}`.
///
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct TaskStatusResponse(pub Map<String, Value>);

/// Generic acknowledgement.
///
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_owned(),
        }
    }
}

/// Build identifiers of the running binary.
///
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BuildInfo {
    pub name: String,
    pub version: String,
    pub commit: Option<String>,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            commit: option_env!("GIT_COMMIT").map(str::to_owned),
        }
    }
}

// -----------------------------------------------------------------------------

/// Query of `GET /vm`.
///
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VmListQuery {
    pub datacenter: Option<String>,
    pub folder: Option<String>,
    pub resource_pool: Option<String>,
}

/// Query selecting the datacenter a VM lives in.
///
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DatacenterQuery {
    pub datacenter: Option<String>,
}

/// Query of `GET /find/vm`.
///
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FindQuery {
    /// Inventory path, relative to the datacenter's VM folder or absolute.
    pub path: String,
    pub datacenter: Option<String>,
}

/// Summary of a virtual machine.
///
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VmInfo {
    pub uuid: Option<String>,
    pub name: String,
    pub moref: Option<String>,
    pub power_state: PowerState,
    pub template: bool,
    pub cpu: Option<i32>,
    pub memory_mb: Option<i32>,
    pub guest_os: Option<String>,
    pub host_name: Option<String>,
    pub ip_address: Option<String>,
    pub annotation: Option<String>,
    pub path: Option<String>,
}

impl From<VmSummary> for VmInfo {
    fn from(summary: VmSummary) -> Self {
        let VmSummary {
            vm,
            config,
            runtime,
            guest,
        } = summary;

        Self {
            uuid: config.uuid,
            name: config.name,
            moref: vm.map(|vm| vm.value),
            power_state: runtime.power_state,
            template: config.template,
            cpu: config.num_cpu,
            memory_mb: config.memory_size_mb,
            guest_os: config.guest_full_name,
            host_name: guest.host_name,
            ip_address: guest.ip_address,
            annotation: config.annotation.filter(|annotation| !annotation.is_empty()),
            path: config.vm_path_name,
        }
    }
}

/// Payload for renaming a VM.
///
#[derive(Debug, Deserialize, ToSchema)]
pub struct RenamePayload {
    pub name: String,
}

// -----------------------------------------------------------------------------

/// One node of a VM's snapshot tree.
///
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Snapshot {
    pub id: i32,
    pub parent_id: Option<i32>,
    pub name: String,
    pub description: String,
    pub created: Option<String>,
    pub power_state: Option<PowerState>,
    pub quiesced: bool,
    pub current: bool,
}

impl Snapshot {
    /// Flattens the tree, parents before their children.
    ///
    pub fn flatten(info: &SnapshotInfo) -> Vec<Self> {
        info.walk()
            .into_iter()
            .map(|(node, parent_id)| Self {
                id: node.id,
                parent_id,
                name: node.name.clone(),
                description: node.description.clone(),
                created: node.create_time.clone(),
                power_state: node.state,
                quiesced: node.quiesced,
                current: info.current_snapshot.as_ref() == Some(&node.snapshot),
            })
            .collect()
    }
}

/// Payload for creating a snapshot.
///
#[derive(Debug, Deserialize, ToSchema)]
pub struct SnapshotCreatePayload {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Include the memory of a running VM.
    #[serde(default)]
    pub memory: bool,
    /// Quiesce the guest file system, needs VMware Tools.
    #[serde(default)]
    pub quiesce: bool,
}

/// Payload for deleting a snapshot.
///
#[derive(Debug, Deserialize, ToSchema)]
pub struct SnapshotDeletePayload {
    pub id: i32,
    /// Also remove the snapshots below it.
    #[serde(default)]
    pub children: bool,
    #[serde(default = "default_true")]
    pub consolidate: bool,
}

fn default_true() -> bool {
    true
}

// -----------------------------------------------------------------------------

/// Payload for changing the power state of a VM.
///
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PowerPayload {
    pub state: PowerAction,
    /// Fall back to a hard reset or power-off when VMware Tools are missing.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    On,
    Off,
    Reset,
    Suspend,
    // Guest OS restart, needs VMware Tools.
    Reboot,
    // Guest OS shutdown, needs VMware Tools.
    Shutdown,
}

// -----------------------------------------------------------------------------

/// Role known to vCenter.
///
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: i32,
    pub name: String,
    pub label: Option<String>,
    pub summary: Option<String>,
    pub system: bool,
    pub privileges: Vec<String>,
}

impl From<AuthorizationRole> for Role {
    fn from(role: AuthorizationRole) -> Self {
        Self {
            id: role.role_id,
            name: role.name,
            label: role.info.as_ref().map(|info| info.label.clone()),
            summary: role.info.map(|info| info.summary),
            system: role.system,
            privileges: role.privilege,
        }
    }
}

/// Permission effective on a VM.
///
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VmPermission {
    pub principal: String,
    pub group: bool,
    pub role_id: i32,
    pub role: Option<String>,
    pub propagate: bool,
    /// Defined on a parent entity rather than on the VM itself.
    pub inherited: bool,
}

/// Payload for granting a role on a VM.
///
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RolePayload {
    pub principal: String,
    /// Role name, e.g. `ReadOnly`.
    pub role: String,
    #[serde(default)]
    pub group: bool,
    #[serde(default = "default_true")]
    pub propagate: bool,
}

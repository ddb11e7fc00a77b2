use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

/// Managed object reference, the handle of every inventory object in the
/// vim25 API.
///
/// # Example JSON
///
/// ```json
/// {"_typeName": "ManagedObjectReference", "type": "VirtualMachine", "value": "vm-42"}
/// ```
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct MoRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl MoRef {
    /// Creates a new reference to a managed object.
    ///
    pub fn new(kind: &str, value: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            value: value.to_owned(),
        }
    }

    /// Percent-encode the object ID to make it safe for use in a URL path.
    ///
    pub fn encoded(&self) -> String {
        utf8_percent_encode(&self.value, NON_ALPHANUMERIC).to_string()
    }

    /// Returns `true` if the object is one of the given managed types.
    ///
    pub fn is_any(&self, kinds: &[&str]) -> bool {
        kinds.contains(&self.kind.as_str())
    }
}

impl Serialize for MoRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ManagedObjectReference", 3)?;
        state.serialize_field("_typeName", "ManagedObjectReference")?;
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("value", &self.value)?;
        state.end()
    }
}

impl Display for MoRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

// -----------------------------------------------------------------------------

/// Managers discovered from `ServiceInstance.content`.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContent {
    pub root_folder: MoRef,
    pub session_manager: MoRef,
    pub search_index: MoRef,
    pub view_manager: MoRef,
    pub ovf_manager: MoRef,
    pub authorization_manager: MoRef,
    pub storage_resource_manager: Option<MoRef>,
}

/// Special folders every datacenter owns.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DatacenterFolder {
    Vm,
    Host,
    Datastore,
    Network,
}

impl DatacenterFolder {
    /// Name of the datacenter property holding the folder.
    ///
    pub fn property(&self) -> &'static str {
        match self {
            DatacenterFolder::Vm => "vmFolder",
            DatacenterFolder::Host => "hostFolder",
            DatacenterFolder::Datastore => "datastoreFolder",
            DatacenterFolder::Network => "networkFolder",
        }
    }

    /// Path segment of the folder inside a datacenter inventory path.
    ///
    pub fn segment(&self) -> &'static str {
        match self {
            DatacenterFolder::Vm => "vm",
            DatacenterFolder::Host => "host",
            DatacenterFolder::Datastore => "datastore",
            DatacenterFolder::Network => "network",
        }
    }
}

// -----------------------------------------------------------------------------

/// High-level status of a long-running vSphere task.
///
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Pending,
    Completed(Option<Value>),
    Failed(String),
}

/// Raw `TaskInfo` as returned by `Task/{id}/info`.
///
#[derive(Debug, Deserialize)]
pub struct TaskInfo {
    pub state: TaskState,
    pub result: Option<Value>,
    pub error: Option<LocalizedFault>,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedFault {
    pub localized_message: Option<String>,
}

impl From<TaskInfo> for TaskStatus {
    fn from(info: TaskInfo) -> Self {
        match info.state {
            TaskState::Queued | TaskState::Running => TaskStatus::Pending,
            TaskState::Success => TaskStatus::Completed(info.result),
            TaskState::Error => TaskStatus::Failed(
                info.error
                    .and_then(|error| error.localized_message)
                    .unwrap_or_else(|| "Unexpected".to_owned()),
            ),
        }
    }
}

// -----------------------------------------------------------------------------

/// Raw `VirtualMachineSummary`.
///
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSummary {
    pub vm: Option<MoRef>,
    #[serde(default)]
    pub config: VmConfigSummary,
    #[serde(default)]
    pub runtime: VmRuntime,
    #[serde(default)]
    pub guest: VmGuestSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConfigSummary {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub template: bool,
    pub vm_path_name: Option<String>,
    #[serde(rename = "memorySizeMB")]
    pub memory_size_mb: Option<i32>,
    pub num_cpu: Option<i32>,
    pub uuid: Option<String>,
    pub instance_uuid: Option<String>,
    pub guest_full_name: Option<String>,
    pub annotation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmRuntime {
    #[serde(default)]
    pub power_state: PowerState,
    pub host: Option<MoRef>,
    pub boot_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmGuestSummary {
    pub tools_running_status: Option<String>,
    pub host_name: Option<String>,
    pub ip_address: Option<String>,
}

/// Power state of a virtual machine.
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    #[default]
    PoweredOff,
    Suspended,
}

/// Raw `GuestInfo`, only the networking part of it.
///
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestInfo {
    pub ip_address: Option<String>,
    #[serde(default)]
    pub net: Vec<GuestNicInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestNicInfo {
    pub network: Option<String>,
    #[serde(default)]
    pub ip_address: Vec<String>,
}

impl GuestInfo {
    /// Flattens per-interface address lists into one list.
    ///
    pub fn ip_addresses(&self) -> Vec<String> {
        self.net
            .iter()
            .flat_map(|nic| nic.ip_address.iter().cloned())
            .collect()
    }
}

// -----------------------------------------------------------------------------

/// Raw `VirtualMachineSnapshotInfo`.
///
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub current_snapshot: Option<MoRef>,
    #[serde(default)]
    pub root_snapshot_list: Vec<SnapshotTree>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTree {
    pub snapshot: MoRef,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub id: i32,
    pub create_time: Option<String>,
    pub state: Option<PowerState>,
    #[serde(default)]
    pub quiesced: bool,
    #[serde(default)]
    pub child_snapshot_list: Vec<SnapshotTree>,
}

impl SnapshotInfo {
    /// Walks the snapshot tree depth-first, yielding every node together with
    /// the ID of its parent.
    ///
    pub fn walk(&self) -> Vec<(&SnapshotTree, Option<i32>)> {
        fn visit<'a>(
            nodes: &'a [SnapshotTree],
            parent: Option<i32>,
            out: &mut Vec<(&'a SnapshotTree, Option<i32>)>,
        ) {
            for node in nodes {
                out.push((node, parent));
                visit(&node.child_snapshot_list, Some(node.id), out);
            }
        }

        let mut out = Vec::new();
        visit(&self.root_snapshot_list, None, &mut out);
        out
    }

    /// Finds a snapshot by its integer ID.
    ///
    pub fn find(&self, id: i32) -> Option<&SnapshotTree> {
        self.walk()
            .into_iter()
            .map(|(node, _)| node)
            .find(|node| node.id == id)
    }
}

// -----------------------------------------------------------------------------

/// Long-running operations on a virtual machine, each one a `*_Task` method.
///
#[derive(Debug, Clone)]
pub enum VmTask {
    PowerOn,
    PowerOff,
    Reset,
    Suspend,
    Destroy,
    Rename(String),
    CreateSnapshot {
        name: String,
        description: String,
        memory: bool,
        quiesce: bool,
    },
}

impl VmTask {
    /// Name of the vim25 method and its JSON body.
    ///
    pub fn method(&self) -> (&'static str, Value) {
        use serde_json::json;

        match self {
            VmTask::PowerOn => ("PowerOnVM_Task", json!({})),
            VmTask::PowerOff => ("PowerOffVM_Task", json!({})),
            VmTask::Reset => ("ResetVM_Task", json!({})),
            VmTask::Suspend => ("SuspendVM_Task", json!({})),
            VmTask::Destroy => ("Destroy_Task", json!({})),
            VmTask::Rename(name) => ("Rename_Task", json!({ "newName": name })),
            VmTask::CreateSnapshot {
                name,
                description,
                memory,
                quiesce,
            } => (
                "CreateSnapshot_Task",
                json!({
                    "name": name,
                    "description": description,
                    "memory": memory,
                    "quiesce": quiesce,
                }),
            ),
        }
    }
}

/// Guest OS operations that need VMware Tools running inside the VM.
///
#[derive(Debug, Clone, Copy)]
pub enum GuestOp {
    Shutdown,
    Reboot,
}

impl GuestOp {
    pub fn method(&self) -> &'static str {
        match self {
            GuestOp::Shutdown => "ShutdownGuest",
            GuestOp::Reboot => "RebootGuest",
        }
    }
}

/// Long-running operations on a single snapshot.
///
#[derive(Debug, Clone, Copy)]
pub enum SnapshotTask {
    Remove {
        remove_children: bool,
        consolidate: bool,
    },
    Revert,
}

impl SnapshotTask {
    pub fn method(&self) -> (&'static str, Value) {
        use serde_json::json;

        match self {
            SnapshotTask::Remove {
                remove_children,
                consolidate,
            } => (
                "RemoveSnapshot_Task",
                json!({ "removeChildren": remove_children, "consolidate": consolidate }),
            ),
            SnapshotTask::Revert => ("RevertToSnapshot_Task", json!({})),
        }
    }
}

// -----------------------------------------------------------------------------

/// Raw `AuthorizationRole`.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRole {
    pub role_id: i32,
    #[serde(default)]
    pub system: bool,
    pub name: String,
    pub info: Option<RoleDescription>,
    #[serde(default)]
    pub privilege: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleDescription {
    pub label: String,
    pub summary: String,
}

/// Raw `Permission`, both read from and sent to the authorization manager.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<MoRef>,
    pub principal: String,
    pub group: bool,
    pub role_id: i32,
    pub propagate: bool,
}

// -----------------------------------------------------------------------------

/// Storage placement request sent to `RecommendDatastores`.
///
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePlacementSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub resource_pool: MoRef,
    pub folder: MoRef,
    pub pod_selection_spec: PodSelectionSpec,
    pub config_spec: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSelectionSpec {
    pub storage_pod: MoRef,
}

impl StoragePlacementSpec {
    /// Placement of a brand new VM of the given name.
    ///
    pub fn create(name: &str, resource_pool: MoRef, folder: MoRef, storage_pod: MoRef) -> Self {
        Self {
            kind: "create".to_owned(),
            resource_pool,
            folder,
            pod_selection_spec: PodSelectionSpec { storage_pod },
            config_spec: serde_json::json!({
                "_typeName": "VirtualMachineConfigSpec",
                "name": name,
            }),
        }
    }
}

/// Raw `StoragePlacementResult`.
///
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePlacementResult {
    #[serde(default)]
    pub recommendations: Vec<ClusterRecommendation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterRecommendation {
    pub key: Option<String>,
    #[serde(default)]
    pub action: Vec<ClusterAction>,
}

/// Polymorphic cluster action, only storage placement is of interest.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "_typeName")]
pub enum ClusterAction {
    StoragePlacementAction { destination: MoRef },
    #[serde(other)]
    Other,
}

/// Raw `PodStorageDrsEntry`, trimmed to the enabled switch.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStorageDrsEntry {
    pub storage_drs_config: StorageDrsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDrsConfig {
    pub pod_config: StorageDrsPodConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageDrsPodConfig {
    pub enabled: bool,
}

// -----------------------------------------------------------------------------

/// `OvfCreateImportSpecParams`.
///
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSpecParams {
    pub entity_name: String,
    pub locale: String,
    pub deployment_option: String,
    pub disk_provisioning: String,
    pub network_mapping: Vec<NetworkMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_system: Option<MoRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkMapping {
    pub name: String,
    pub network: MoRef,
}

/// `OvfCreateImportSpecResult`.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSpecResult {
    pub import_spec: Option<ImportSpec>,
    #[serde(default)]
    pub file_item: Vec<OvfFileItem>,
    #[serde(default)]
    pub error: Vec<LocalizedFault>,
    #[serde(default)]
    pub warning: Vec<LocalizedFault>,
}

/// Import spec returned by the OVF manager. The two variants keep their
/// configuration section in differently named fields, everything else is
/// carried through untouched.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_typeName")]
pub enum ImportSpec {
    #[serde(rename = "VirtualMachineImportSpec")]
    VirtualMachine(VirtualMachineImportSpec),
    #[serde(rename = "VirtualAppImportSpec")]
    VirtualApp(VirtualAppImportSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachineImportSpec {
    #[serde(rename = "configSpec")]
    pub config_spec: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualAppImportSpec {
    #[serde(rename = "vAppConfigSpec")]
    pub vapp_config_spec: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ImportSpec {
    /// Attaches the annotation to whichever configuration section the import
    /// spec carries.
    ///
    pub fn set_annotation(&mut self, annotation: &str) {
        let section = match self {
            ImportSpec::VirtualMachine(spec) => &mut spec.config_spec,
            ImportSpec::VirtualApp(spec) => &mut spec.vapp_config_spec,
        };
        section.insert("annotation".to_owned(), Value::from(annotation));
    }

    pub fn annotation(&self) -> Option<&str> {
        let section = match self {
            ImportSpec::VirtualMachine(spec) => &spec.config_spec,
            ImportSpec::VirtualApp(spec) => &spec.vapp_config_spec,
        };
        section.get("annotation").and_then(Value::as_str)
    }
}

/// `OvfFileItem`: a file of the package the server expects to receive.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OvfFileItem {
    pub device_id: String,
    pub path: String,
    pub size: Option<u64>,
    #[serde(default)]
    pub create: bool,
}

/// State of an `HttpNfcLease`.
///
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Initializing,
    Ready,
    Done,
    Error,
}

/// Raw `HttpNfcLeaseInfo`.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    pub entity: MoRef,
    #[serde(default)]
    pub device_url: Vec<DeviceUrl>,
    pub lease_timeout: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUrl {
    pub key: String,
    pub import_key: String,
    pub url: String,
    #[serde(default)]
    pub disk: bool,
}

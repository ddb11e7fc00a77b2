use crate::services::TaskContext;
use crate::services::deploy::ova::{self, StagedOva};
use crate::services::deploy::ovf::Envelope;
use crate::services::deploy::placement::{Placement, inventory_path};
use crate::services::deploy::progress::{self, ProgressReporter};
use crate::vsphere::Vsphere;
use crate::vsphere::types::{
    DatacenterFolder, ImportSpecParams, LeaseInfo, LeaseState, MoRef, NetworkMapping, OvfFileItem,
};
use crate::web::types::DeployRequest;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use vmctl_common::prelude::{Error, Result};

/// Disk provisioning mode of every import.
///
pub const DISK_PROVISIONING: &str = "thin";

/// How often the lease is told about overall progress.
///
const LEASE_UPDATE_INTERVAL: Duration = Duration::from_secs(2);
const LEASE_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Bound on the abort call, which also runs after the task deadline.
///
const LEASE_ABORT_TIMEOUT: Duration = Duration::from_secs(30);

const NETWORK_KINDS: [&str; 3] = ["Network", "DistributedVirtualPortgroup", "OpaqueNetwork"];

/// Name of the new entity, the requested one or else the envelope's.
///
pub fn entity_name(request: &DeployRequest, envelope: &Envelope) -> String {
    match request.name.trim() {
        "" => envelope.vm_name().to_owned(),
        name => name.to_owned(),
    }
}

/// Imports the staged OVA at the given placement.
///
/// # Arguments
///
/// * `vsphere`: Client for interacting with the vSphere API.
/// * `context`: Deadline and cancellation scope of the calling task.
/// * `staged`: Extracted OVA, the source of the uploaded files.
/// * `descriptor`: Raw OVF descriptor.
/// * `envelope`: Parsed OVF descriptor.
/// * `placement`: Resolved destination.
/// * `request`: Deploy request with defaults filled in.
///
/// # Returns
///
/// Reference to the created VM. The lease is completed on success and aborted
/// on any failure after it was acquired.
///
#[tracing::instrument(level = "trace", target = "service", skip_all, fields(vm = request.name))]
pub async fn import(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    context: &TaskContext,
    staged: &StagedOva,
    descriptor: &str,
    envelope: &Envelope,
    placement: &Placement,
    request: &DeployRequest,
) -> Result<MoRef> {
    let network_mapping = context
        .run(map_networks(vsphere, placement, envelope, &request.networks))
        .await?;
    let params = ImportSpecParams {
        entity_name: entity_name(request, envelope),
        locale: "US".to_owned(),
        deployment_option: String::new(),
        disk_provisioning: DISK_PROVISIONING.to_owned(),
        network_mapping,
        host_system: placement.host.clone(),
    };

    let result = context
        .run(vsphere.create_import_spec(
            descriptor,
            &placement.resource_pool,
            &placement.datastore,
            &params,
        ))
        .await?;
    if let Some(error) = result.error.first() {
        let message = error.localized_message.clone().unwrap_or_default();
        return Err(Error::LeaseFailed(format!("import spec rejected: {}", message)));
    }
    for warning in &result.warning {
        tracing::warn!(target: "service", warning = ?warning.localized_message, "Import spec warning");
    }
    let mut spec = result
        .import_spec
        .ok_or(Error::LeaseFailed("no import spec returned".to_owned()))?;
    if !request.annotation.is_empty() {
        spec.set_annotation(&request.annotation);
    }

    let lease = context
        .run(vsphere.import_vapp(
            &placement.resource_pool,
            &spec,
            &placement.folder,
            placement.host.as_ref(),
        ))
        .await?;
    tracing::info!(target: "service", %lease, "Import lease acquired");

    let outcome = async {
        let vm = upload_through_lease(
            vsphere,
            context,
            &lease,
            &result.file_item,
            &staged.descriptor_dir(),
        )
        .await?;
        context.run(vsphere.lease_complete(&lease)).await?;
        Ok::<MoRef, Error>(vm)
    }
    .await;

    match &outcome {
        Ok(vm) => tracing::info!(target: "service", %vm, "Import lease completed"),
        Err(error) => abort_lease(vsphere, &lease, &error.to_string()).await,
    }
    outcome
}

/// Maps every OVF network to itself, overlays the requested mapping and keeps
/// the pairs whose destination exists in the datacenter.
///
async fn map_networks(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    placement: &Placement,
    envelope: &Envelope,
    overrides: &BTreeMap<String, String>,
) -> Result<Vec<NetworkMapping>> {
    let mut pairs: BTreeMap<String, String> = envelope
        .networks
        .iter()
        .map(|name| (name.clone(), name.clone()))
        .collect();
    pairs.extend(overrides.clone());

    let mut mapping = Vec::with_capacity(pairs.len());
    for (name, destination) in pairs {
        let path = match inventory_path(
            &placement.datacenter_path,
            DatacenterFolder::Network,
            &destination,
        ) {
            Ok(path) => path,
            Err(error) => {
                tracing::warn!(target: "service", ovf_network = name, %error, "Network mapping dropped");
                continue;
            }
        };
        match vsphere.find_by_path(&path).await? {
            Some(network) if network.is_any(&NETWORK_KINDS) => {
                mapping.push(NetworkMapping { name, network })
            }
            _ => {
                tracing::warn!(target: "service", ovf_network = name, destination, "Network not found, mapping dropped")
            }
        }
    }

    Ok(mapping)
}

async fn wait_for_lease(vsphere: &Arc<dyn Vsphere + Send + Sync>, lease: &MoRef) -> Result<LeaseInfo> {
    loop {
        match vsphere.lease_state(lease).await? {
            LeaseState::Ready => return vsphere.lease_info(lease).await,
            LeaseState::Initializing => tokio::time::sleep(LEASE_POLL_INTERVAL).await,
            LeaseState::Error => {
                let reason = vsphere.lease_error(lease).await?;
                return Err(Error::LeaseFailed(reason.unwrap_or("unknown error".to_owned())));
            }
            LeaseState::Done => {
                return Err(Error::LeaseFailed("lease ended before upload".to_owned()));
            }
        }
    }
}

/// Uploads every file item of the import through the lease.
///
async fn upload_through_lease(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    context: &TaskContext,
    lease: &MoRef,
    items: &[OvfFileItem],
    descriptor_dir: &Path,
) -> Result<MoRef> {
    let info = context.run(wait_for_lease(vsphere, lease)).await?;

    let mut uploads = Vec::with_capacity(items.len());
    for item in items {
        let device = info
            .device_url
            .iter()
            .find(|device| device.import_key == item.device_id)
            .ok_or_else(|| Error::LeaseFailed(format!("no upload URL for '{}'", item.path)))?;
        let file = ova::safe_join(descriptor_dir, Path::new(&item.path))?;
        let size = tokio::fs::metadata(&file).await?.len();
        uploads.push((item, device.url.clone(), file, size));
    }

    let total = uploads.iter().map(|(_, _, _, size)| size).sum();
    let uploaded = Arc::new(AtomicU64::new(0));
    let _updater = LeaseUpdater::start(vsphere.clone(), lease.clone(), uploaded.clone(), total);

    for (item, url, file, size) in uploads {
        let reporter = ProgressReporter::start(
            file_name(&file),
            size,
            progress::REPORT_INTERVAL,
            uploaded.clone(),
        );
        let result = context
            .run(vsphere.upload(&url, &file, item.create, reporter.sender()))
            .await;
        reporter.finish().await;
        result?;
    }

    Ok(info.entity)
}

fn file_name(file: &Path) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn abort_lease(vsphere: &Arc<dyn Vsphere + Send + Sync>, lease: &MoRef, reason: &str) {
    match tokio::time::timeout(LEASE_ABORT_TIMEOUT, vsphere.lease_abort(lease, reason)).await {
        Ok(Ok(())) => tracing::warn!(target: "service", %lease, reason, "Import lease aborted"),
        Ok(Err(error)) => {
            tracing::error!(target: "service", %lease, ?error, "Failed to abort import lease!")
        }
        Err(_) => tracing::error!(target: "service", %lease, "Import lease abort timed out!"),
    }
}

// -----------------------------------------------------------------------------

/// Keeps an import lease alive by reporting overall progress on a fixed tick.
///
/// Stops when dropped.
///
struct LeaseUpdater {
    handle: JoinHandle<()>,
}

impl LeaseUpdater {
    fn start(
        vsphere: Arc<dyn Vsphere + Send + Sync>,
        lease: MoRef,
        uploaded: Arc<AtomicU64>,
        total: u64,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LEASE_UPDATE_INTERVAL);
            loop {
                ticker.tick().await;
                let percent = progress::percent(uploaded.load(Ordering::Relaxed), total);
                if let Err(error) = vsphere.lease_progress(&lease, percent).await {
                    tracing::warn!(target: "service", %lease, ?error, "Failed to update import lease");
                }
            }
        });

        Self { handle }
    }
}

impl Drop for LeaseUpdater {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

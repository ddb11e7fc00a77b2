use crate::vsphere::Vsphere;
use crate::vsphere::types::{ClusterAction, DatacenterFolder, MoRef, StoragePlacementSpec};
use crate::web::types::{CLUSTER, DATASTORE, DeployRequest, HOST, RESOURCE_POOL};
use rand::seq::IndexedRandom;
use std::sync::Arc;
use vmctl_common::prelude::{Error, Result, SelectorKind};

/// Where a new VM lands. Every reference was resolved under `datacenter`.
///
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub datacenter: MoRef,
    pub datacenter_path: String,
    pub folder: MoRef,
    pub resource_pool: MoRef,
    /// Unset when a cluster or resource pool picks the host at import time.
    pub host: Option<MoRef>,
    pub datastore: MoRef,
}

/// Builds an inventory path for `FindByInventoryPath`.
///
/// Absolute paths (leading `/`) are taken as they are, relative ones are
/// placed under the given special folder of the datacenter. An absolute path
/// must stay inside the datacenter, so that everything resolved for one VM
/// belongs to it.
///
pub fn inventory_path(datacenter: &str, folder: DatacenterFolder, path: &str) -> Result<String> {
    let datacenter = datacenter.trim_matches('/');
    let Some(absolute) = path.strip_prefix('/') else {
        return Ok(format!(
            "{}/{}/{}",
            datacenter,
            folder.segment(),
            path.trim_matches('/')
        ));
    };

    let absolute = absolute.trim_end_matches('/');
    match absolute.strip_prefix(datacenter) {
        Some(rest) if rest.starts_with('/') => Ok(absolute.to_owned()),
        _ => Err(Error::BadRequest(format!(
            "path '{}' is outside datacenter '{}'",
            path, datacenter
        ))),
    }
}

/// Resolves the placement of a new VM, strictly in the order datacenter,
/// folder, computer resource, datastore.
///
/// # Arguments
///
/// * `vsphere`: Client for interacting with the vSphere API.
/// * `request`: Deploy request with defaults already filled in.
/// * `vm_name`: Name of the VM, needed for storage DRS recommendations.
///
#[tracing::instrument(level = "trace", target = "service", skip_all, fields(vm = vm_name))]
pub async fn resolve(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    request: &DeployRequest,
    vm_name: &str,
) -> Result<Placement> {
    let (datacenter_path, datacenter) = choose_datacenter(vsphere, &request.datacenter).await?;
    let folder = choose_folder(vsphere, &datacenter, &datacenter_path, &request.folder).await?;
    let (resource_pool, host) = choose_computer_resource(vsphere, &datacenter_path, request).await?;
    let datastore = choose_datastore(
        vsphere,
        &datacenter_path,
        request,
        vm_name,
        &resource_pool,
        &folder,
    )
    .await?;

    let placement = Placement {
        datacenter,
        datacenter_path,
        folder,
        resource_pool,
        host,
        datastore,
    };
    tracing::info!(target: "service", ?placement, "Placement resolved");

    Ok(placement)
}

/// Finds an object by inventory path and checks its type.
///
async fn find(
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

pub async fn choose_datacenter(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    name: &str,
) -> Result<(String, MoRef)> {
    let path = name.trim_matches('/').to_owned();
    if path.is_empty() {
        return Err(Error::BadRequest("datacenter is required".to_owned()));
    }
    let datacenter = find(vsphere, &path, &["Datacenter"], "datacenter").await?;

    Ok((path, datacenter))
}

async fn choose_folder(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    datacenter: &MoRef,
    datacenter_path: &str,
    folder: &str,
) -> Result<MoRef> {
    if folder.is_empty() {
        return vsphere
            .datacenter_folder(datacenter, DatacenterFolder::Vm)
            .await;
    }
    let path = inventory_path(datacenter_path, DatacenterFolder::Vm, folder)?;
    find(vsphere, &path, &["Folder"], "folder").await
}

async fn choose_computer_resource(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    datacenter_path: &str,
    request: &DeployRequest,
) -> Result<(MoRef, Option<MoRef>)> {
    let selector = &request.computer_resources;
    let kind = selector.kind.as_str();
    if ![HOST, CLUSTER, RESOURCE_POOL].contains(&kind) {
        return Err(Error::BadSelector(SelectorKind::ComputerResource, selector.kind.clone()));
    }
    if selector.path.is_empty() {
        return Err(Error::BadRequest(format!("no path given for {}", kind)));
    }
    let path = inventory_path(datacenter_path, DatacenterFolder::Host, &selector.path)?;

    match kind {
        HOST => {
            let host = find(vsphere, &path, &["HostSystem"], "host").await?;
            let compute_resource = vsphere.parent(&host).await?;
            let pool = vsphere.root_resource_pool(&compute_resource).await?;
            Ok((pool, Some(host)))
        }
        CLUSTER => {
            let cluster = find(
                vsphere,
                &path,
                &["ClusterComputeResource", "ComputeResource"],
                "cluster",
            )
            .await?;
            let pool = vsphere.root_resource_pool(&cluster).await?;
            Ok((pool, None))
        }
        _ => {
            let pool = find(vsphere, &path, &["ResourcePool", "VirtualApp"], "resource pool").await?;
            Ok((pool, None))
        }
    }
}

/// Picks one of the names uniformly at random.
///
fn pick(names: &[String]) -> Option<&String> {
    names.choose(&mut rand::rng())
}

async fn choose_datastore(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    datacenter_path: &str,
    request: &DeployRequest,
    vm_name: &str,
    resource_pool: &MoRef,
    folder: &MoRef,
) -> Result<MoRef> {
    let selector = &request.datastores;
    let kind = selector.kind.as_str();
    if ![DATASTORE, CLUSTER].contains(&kind) {
        return Err(Error::BadSelector(SelectorKind::Datastore, selector.kind.clone()));
    }
    let name = pick(&selector.names)
        .ok_or(Error::BadRequest("no datastore given".to_owned()))?;
    let path = inventory_path(datacenter_path, DatacenterFolder::Datastore, name)?;

    if kind == DATASTORE {
        return find(vsphere, &path, &["Datastore"], "datastore").await;
    }

    let pod = find(vsphere, &path, &["StoragePod"], "datastore cluster").await?;
    if !vsphere.storage_drs_enabled(&pod).await? {
        return Err(Error::DrsDisabled(name.clone()));
    }

    let spec = StoragePlacementSpec::create(vm_name, resource_pool.clone(), folder.clone(), pod);
    let result = vsphere.recommend_datastores(&spec).await?;
    let recommendation = result
        .recommendations
        .first()
        .ok_or_else(|| Error::NoDrsRecommendation(name.clone()))?;

    match recommendation.action.first() {
        Some(ClusterAction::StoragePlacementAction { destination }) => {
            tracing::info!(target: "service", pod = name, datastore = %destination, "Storage DRS recommendation taken");
            Ok(destination.clone())
        }
        Some(action) => Err(Error::DrsRecommendationUnrecognized(format!("{:?}", action))),
        None => Err(Error::DrsRecommendationUnrecognized(
            "recommendation without actions".to_owned(),
        )),
    }
}

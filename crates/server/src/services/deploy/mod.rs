//! Asynchronous OVA deployment: download and unpack, read the descriptor,
//! resolve the placement, import through an NFC lease, power on and wait for
//! the guest to report an address.

pub mod import;
pub mod ova;
pub mod ovf;
pub mod placement;
pub mod progress;

use crate::services::{TaskContext, wait_until_finish};
use crate::state::AppState;
use crate::tasks::{Stage, Task};
use crate::vsphere::Vsphere;
use crate::vsphere::types::{DatacenterFolder, MoRef, VmTask};
use crate::web::types::DeployRequest;
use ovf::Envelope;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use vmctl_common::prelude::{Error, Result};

const IP_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Validates the request, checks the name is free and starts the deployment
/// in the background.
///
/// # Arguments
///
/// * `app_state`: Shared application state.
/// * `request`: Deploy request as received, defaults are filled in here.
///
/// # Returns
///
/// ID of the task tracking the deployment.
///
#[tracing::instrument(level = "trace", target = "service", skip_all, fields(vm = request.name))]
pub async fn submit(app_state: &AppState, mut request: DeployRequest) -> Result<Uuid> {
    request.validate()?;
    request.fill_defaults(&app_state.defaults);

    let (datacenter_path, _) =
        placement::choose_datacenter(&app_state.vsphere, &request.datacenter).await?;
    let path = placement::inventory_path(
        &datacenter_path,
        DatacenterFolder::Vm,
        &vm_path(&request.folder, &request.name),
    )?;
    if app_state.vsphere.find_by_path(&path).await?.is_some() {
        return Err(Error::Conflict(request.name));
    }

    let task = app_state.tasks.new_task();
    task.transition(Stage::Start, vec![("message", Value::from("accepted"))]);
    let context = TaskContext::new(task.expires_at(), app_state.shutdown.child_token());
    let id = task.id();
    tracing::info!(target: "service", %id, vm = request.name, "Deployment accepted");

    app_state
        .workers
        .spawn(run(app_state.clone(), task, context, request));

    Ok(id)
}

fn vm_path(folder: &str, name: &str) -> String {
    match folder.trim_end_matches('/') {
        "" => name.to_owned(),
        folder => format!("{}/{}", folder, name),
    }
}

/// Runs one deployment to its terminal stage. Never fails, the outcome is
/// recorded on the task.
///
#[tracing::instrument(level = "trace", target = "service",
	skip_all,
	fields(id = %task.id(), vm = request.name))]
pub async fn run(app_state: AppState, task: Task, context: TaskContext, request: DeployRequest) {
    let result = match deploy(&app_state, &task, &context, &request).await {
        Ok(addresses) => {
            tracing::info!(target: "service", ?addresses, "Deployment complete");
            task.transition(
                Stage::Complete,
                vec![("message", Value::from("ok")), ("ip", json!(addresses))],
            );
            "complete"
        }
        Err(error) => {
            tracing::error!(target: "service", ?error, "Deployment failed!");
            task.fail(&error);
            "error"
        }
    };

    app_state.metrics.deployment_finished(result);
}

async fn deploy(
    app_state: &AppState,
    task: &Task,
    context: &TaskContext,
    request: &DeployRequest,
) -> Result<Vec<String>> {
    let vsphere = &app_state.vsphere;

    task.set_str(&[("message", "downloading OVA")]);
    let staged = ova::stage(
        &app_state.downloader,
        &request.ova_url,
        &app_state.staging_root,
        context,
    )
    .await?;
    task.set("digest", staged.digest.clone());

    let (descriptor, envelope) = read_descriptor(&staged, context).await?;
    let vm_name = import::entity_name(request, &envelope);

    task.set_str(&[("message", "resolving placement")]);
    let placement = context
        .run(placement::resolve(vsphere, request, &vm_name))
        .await?;

    task.transition(Stage::Import, vec![("message", Value::from("uploading disks"))]);
    let vm = import::import(
        vsphere,
        context,
        &staged,
        &descriptor,
        &envelope,
        &placement,
        request,
    )
    .await?;
    drop(staged);

    task.transition(
        Stage::Create,
        vec![
            ("message", Value::from("powering on")),
            ("vm", Value::from(vm.value.clone())),
        ],
    );
    power_on(vsphere, context, &vm, &vm_name).await
}

async fn read_descriptor(staged: &ova::StagedOva, context: &TaskContext) -> Result<(String, Envelope)> {
    context.check()?;
    let descriptor = tokio::fs::read_to_string(&staged.descriptor).await?;
    let envelope = Envelope::parse(descriptor.as_bytes())?;
    Ok((descriptor, envelope))
}

/// Powers the new VM on and waits for the guest to report its addresses.
///
async fn power_on(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    context: &TaskContext,
    vm: &MoRef,
    name: &str,
) -> Result<Vec<String>> {
    let power_task = context.run(vsphere.vm_task(vm, VmTask::PowerOn)).await?;
    context
        .run(wait_until_finish(vsphere, &power_task, 1, None))
        .await?;
    tracing::info!(target: "service", %vm, "Powered on, waiting for an IP address");

    match context.run(wait_for_ip(vsphere, vm)).await {
        Err(Error::Deadline) => Err(Error::GuestNotReady(name.to_owned())),
        other => other,
    }
}

async fn wait_for_ip(vsphere: &Arc<dyn Vsphere + Send + Sync>, vm: &MoRef) -> Result<Vec<String>> {
    loop {
        let guest = vsphere.vm_guest(vm).await?;
        let mut addresses = guest.ip_addresses();
        if addresses.is_empty() {
            addresses.extend(guest.ip_address);
        }
        if !addresses.is_empty() {
            return Ok(addresses);
        }

        tokio::time::sleep(IP_POLL_INTERVAL).await;
    }
}

use crate::vsphere::Vsphere;
use crate::vsphere::types::*;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use percent_encoding::percent_decode_str;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use reqwest::{Body, Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tokio::sync::OnceCell;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::io::ReaderStream;
use url::Url;
use vmctl_common::prelude::{Error, Fault, Result, VsphereError};

/// Header carrying the session token of the vim25 JSON API.
///
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// Content type vCenter expects for streamed disk uploads.
///
const STREAM_VMDK: &str = "application/x-vnd.vmware-streamVmdk";

/// Concrete implementation of the `Vsphere` trait on top of the vim25 JSON API
/// using `reqwest` crate.
///
/// Method calls are `POST {base}/{type}/{id}/{method}` with a JSON object of
/// named arguments, property reads are `GET {base}/{type}/{id}/{property}`.
///
pub struct VsphereClient {
    client: Client,
    origin: String,
    base: String,
    username: String,
    password: SecretString,
    session: RwLock<Option<SecretString>>,
    content: OnceCell<ServiceContent>,
}

impl VsphereClient {
    /// Creates a new instance of the vSphere client.
    ///
    /// # Arguments
    ///
    /// * `url`: SDK URL with credentials, e.g. `https://user:pass@vc/sdk`.
    /// * `release`: vim25 release segment of the JSON API, e.g. `8.0.1.0`.
    /// * `insecure`: Accept invalid TLS certificates.
    ///
    pub fn new(url: &SecretString, release: &str, insecure: bool) -> Result<Self> {
        let url = Url::parse(url.expose_secret())?;
        let username = percent_decode_str(url.username())
            .decode_utf8_lossy()
            .into_owned();
        let password = percent_decode_str(url.password().unwrap_or_default())
            .decode_utf8_lossy()
            .into_owned();
        if username.is_empty() {
            return Err(Error::RemoteAuth(
                "credentials are missing from the vSphere URL".to_owned(),
            ));
        }

        let origin = url.origin().ascii_serialization();
        let client = Client::builder()
            .danger_accept_invalid_certs(insecure)
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            client,
            base: format!("{}/sdk/vim25/{}", origin, release),
            origin,
            username,
            password: password.into(),
            session: RwLock::new(None),
            content: OnceCell::new(),
        })
    }

    /// Returns the current session token as a header value, if logged in.
    ///
    fn session_header(&self) -> Result<Option<HeaderValue>> {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        session
            .as_ref()
            .map(|token| {
                let mut value = HeaderValue::from_str(token.expose_secret())?;
                value.set_sensitive(true);
                Ok::<_, Error>(value)
            })
            .transpose()
    }

    /// Lazily fetches and returns the service content.
    ///
    /// The managers it references never change for the lifetime of a vCenter,
    /// so it is fetched only once.
    ///
    async fn content(&self) -> Result<&ServiceContent> {
        self.content
            .get_or_try_init(|| async {
                self.make_request(
                    Method::GET,
                    "/ServiceInstance/ServiceInstance/content",
                    None::<&()>,
                    VsphereError::Session,
                )
                .await
            })
            .await
    }

    /// Generic helper method to perform a request to the vim25 JSON API.
    ///
    /// # Types
    ///
    /// * `B`: Type of the request body, which must be serializable.
    /// * `D`: Type of the response data, which must be deserializable. An
    ///   empty response body deserializes as JSON `null`.
    ///
    /// # Arguments
    ///
    /// * `method`: HTTP method to use for the request.
    /// * `path`: API endpoint path, relative to the versioned base.
    /// * `body`: Optional request body.
    /// * `error_var`: Specific error to use if the API call fails.
    ///
    async fn make_request<B, D>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        error_var: VsphereError,
    ) -> Result<D>
    where
        B: Serialize + ?Sized,
        D: DeserializeOwned,
    {
        let url = format!("{}{}", self.base, path);
        let mut request = self.client.request(method, &url);
        if let Some(session) = self.session_header()? {
            request = request.header(SESSION_HEADER, session);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Vsphere(error_var, status, Fault::from_body(&text)));
        }

        let text = if text.trim().is_empty() { "null" } else { &text };
        Ok(serde_json::from_str(text)?)
    }

    /// Invokes a method of a managed object.
    ///
    async fn invoke<B, D>(
        &self,
        object: &MoRef,
        method: &str,
        body: Option<&B>,
        error_var: VsphereError,
    ) -> Result<D>
    where
        B: Serialize + ?Sized,
        D: DeserializeOwned,
    {
        let path = format!("/{}/{}/{}", object.kind, object.encoded(), method);
        self.make_request(Method::POST, &path, body, error_var).await
    }

    /// Reads a property of a managed object.
    ///
    async fn property<D>(&self, object: &MoRef, name: &str, error_var: VsphereError) -> Result<D>
    where
        D: DeserializeOwned,
    {
        let path = format!("/{}/{}/{}", object.kind, object.encoded(), name);
        self.make_request(Method::GET, &path, None::<&()>, error_var)
            .await
    }

    /// Device URLs handed out by a lease may carry `*` instead of a host name,
    /// meaning "the host you are talking to".
    ///
    fn rewrite_device_url(&self, url: &str) -> String {
        match url.split_once("://*/") {
            Some((_, rest)) => format!("{}/{}", self.origin, rest),
            None => url.to_owned(),
        }
    }

    /// Summary of a VM, with the reference filled in even when vCenter omits it.
    ///
    async fn summary_of(&self, vm: MoRef) -> Result<VmSummary> {
        let mut summary: VmSummary = self.property(&vm, "summary", VsphereError::Property).await?;
        summary.vm.get_or_insert(vm);
        Ok(summary)
    }
}

fn vm_task_error(task: &VmTask) -> VsphereError {
    match task {
        VmTask::PowerOn => VsphereError::PowerOn,
        VmTask::PowerOff => VsphereError::PowerOff,
        VmTask::Reset => VsphereError::Reset,
        VmTask::Suspend => VsphereError::Suspend,
        VmTask::Destroy => VsphereError::Destroy,
        VmTask::Rename(_) => VsphereError::Rename,
        VmTask::CreateSnapshot { .. } => VsphereError::Snapshot,
    }
}

#[async_trait]
impl Vsphere for VsphereClient {
    async fn login(&self) -> Result<()> {
        let session_manager = self.content().await?.session_manager.clone();
        let url = format!(
            "{}/{}/{}/Login",
            self.base,
            session_manager.kind,
            session_manager.encoded()
        );
        let body = json!({
            "userName": self.username,
            "password": self.password.expose_secret(),
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let fault = Fault::from_body(&response.text().await?);
            return Err(Error::RemoteAuth(fault.to_string()));
        }

        let token = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(Error::RemoteAuth("session token is missing".to_owned()))?
            .to_owned();
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        tracing::info!(target: "vsphere", user = %self.username, "Session established");

        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let session_manager = self.content().await?.session_manager.clone();
        self.invoke::<(), ()>(&session_manager, "Logout", None, VsphereError::Logout)
            .await?;
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!(target: "vsphere", "Session closed");

        Ok(())
    }

    async fn session_alive(&self) -> Result<bool> {
        if self.session_header()?.is_none() {
            return Ok(false);
        }
        let session_manager = self.content().await?.session_manager.clone();
        let session: Option<Value> = self
            .property(&session_manager, "currentSession", VsphereError::Session)
            .await?;
        Ok(session.is_some())
    }

    async fn find_by_path(&self, path: &str) -> Result<Option<MoRef>> {
        let search_index = self.content().await?.search_index.clone();
        let body = json!({ "inventoryPath": path });
        self.invoke(&search_index, "FindByInventoryPath", Some(&body), VsphereError::Search)
            .await
    }

    async fn find_vm_by_uuid(
        &self,
        datacenter: Option<&MoRef>,
        uuid: &str,
    ) -> Result<Option<MoRef>> {
        let search_index = self.content().await?.search_index.clone();
        let mut body = json!({ "uuid": uuid, "vmSearch": true });
        if let Some(datacenter) = datacenter {
            body["datacenter"] = serde_json::to_value(datacenter)?;
        }
        self.invoke(&search_index, "FindByUuid", Some(&body), VsphereError::Search)
            .await
    }

    async fn datacenter_folder(
        &self,
        datacenter: &MoRef,
        folder: DatacenterFolder,
    ) -> Result<MoRef> {
        self.property(datacenter, folder.property(), VsphereError::Property)
            .await
    }

    async fn parent(&self, entity: &MoRef) -> Result<MoRef> {
        self.property(entity, "parent", VsphereError::Property)
            .await
    }

    async fn root_resource_pool(&self, compute_resource: &MoRef) -> Result<MoRef> {
        self.property(compute_resource, "resourcePool", VsphereError::Property)
            .await
    }

    async fn list_vms(&self, container: &MoRef) -> Result<Vec<VmSummary>> {
        let vms: Vec<MoRef> = if container.is_any(&["ResourcePool", "VirtualApp"]) {
            self.property(container, "vm", VsphereError::Property)
                .await?
        } else {
            let view_manager = self.content().await?.view_manager.clone();
            let body = json!({
                "container": container,
                "type": ["VirtualMachine"],
                "recursive": true,
            });
            let view: MoRef = self
                .invoke(&view_manager, "CreateContainerView", Some(&body), VsphereError::View)
                .await?;
            let vms = self.property(&view, "view", VsphereError::View).await;
            if let Err(error) = self
                .invoke::<(), ()>(&view, "DestroyView", None, VsphereError::View)
                .await
            {
                tracing::warn!(target: "vsphere", %view, ?error, "Failed to destroy container view");
            }
            vms?
        };

        futures::stream::iter(vms)
            .map(|vm| self.summary_of(vm))
            .buffered(8)
            .try_collect()
            .await
    }

    async fn storage_drs_enabled(&self, pod: &MoRef) -> Result<bool> {
        let entry: PodStorageDrsEntry = self
            .property(pod, "podStorageDrsEntry", VsphereError::Placement)
            .await?;
        Ok(entry.storage_drs_config.pod_config.enabled)
    }

    async fn recommend_datastores(
        &self,
        spec: &StoragePlacementSpec,
    ) -> Result<StoragePlacementResult> {
        let manager = self
            .content()
            .await?
            .storage_resource_manager
            .clone()
            .ok_or(Error::NotFound("storage resource manager".to_owned()))?;
        let body = json!({ "storageSpec": spec });
        self.invoke(&manager, "RecommendDatastores", Some(&body), VsphereError::Placement)
            .await
    }

    async fn create_import_spec(
        &self,
        descriptor: &str,
        resource_pool: &MoRef,
        datastore: &MoRef,
        params: &ImportSpecParams,
    ) -> Result<ImportSpecResult> {
        let ovf_manager = self.content().await?.ovf_manager.clone();
        let body = json!({
            "ovfDescriptor": descriptor,
            "resourcePool": resource_pool,
            "datastore": datastore,
            "cisp": params,
        });
        self.invoke(&ovf_manager, "CreateImportSpec", Some(&body), VsphereError::Import)
            .await
    }

    async fn import_vapp(
        &self,
        resource_pool: &MoRef,
        spec: &ImportSpec,
        folder: &MoRef,
        host: Option<&MoRef>,
    ) -> Result<MoRef> {
        let mut body = json!({ "spec": spec, "folder": folder });
        if let Some(host) = host {
            body["host"] = serde_json::to_value(host)?;
        }
        self.invoke(resource_pool, "ImportVApp", Some(&body), VsphereError::Import)
            .await
    }

    async fn lease_state(&self, lease: &MoRef) -> Result<LeaseState> {
        self.property(lease, "state", VsphereError::Lease).await
    }

    async fn lease_error(&self, lease: &MoRef) -> Result<Option<String>> {
        let fault: Option<LocalizedFault> =
            self.property(lease, "error", VsphereError::Lease).await?;
        Ok(fault.and_then(|fault| fault.localized_message))
    }

    async fn lease_info(&self, lease: &MoRef) -> Result<LeaseInfo> {
        self.property(lease, "info", VsphereError::Lease).await
    }

    async fn lease_progress(&self, lease: &MoRef, percent: u8) -> Result<()> {
        let body = json!({ "percent": percent });
        self.invoke(lease, "HttpNfcLeaseProgress", Some(&body), VsphereError::Lease)
            .await
    }

    async fn lease_complete(&self, lease: &MoRef) -> Result<()> {
        self.invoke::<(), ()>(lease, "HttpNfcLeaseComplete", None, VsphereError::Lease)
            .await
    }

    async fn lease_abort(&self, lease: &MoRef, reason: &str) -> Result<()> {
        let body = json!({
            "fault": {
                "_typeName": "LocalizedMethodFault",
                "fault": {"_typeName": "SystemError", "reason": reason},
                "localizedMessage": reason,
            }
        });
        self.invoke(lease, "HttpNfcLeaseAbort", Some(&body), VsphereError::Lease)
            .await
    }

    async fn upload(
        &self,
        url: &str,
        file: &Path,
        create: bool,
        progress: UnboundedSender<u64>,
    ) -> Result<()> {
        let url = self.rewrite_device_url(url);
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source = tokio::fs::File::open(file).await?;
        let size = source.metadata().await?.len();
        let stream = ReaderStream::new(source).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                progress.send(bytes.len() as u64).ok();
            }
        });

        let method = if create { Method::PUT } else { Method::POST };
        let mut request = self
            .client
            .request(method, &url)
            .header(CONTENT_TYPE, STREAM_VMDK)
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(stream));
        if let Some(session) = self.session_header()? {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|error| Error::UploadFailed(name.clone(), error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::UploadFailed(name, format!("status {}, body: {}", status, text)));
        }
        tracing::debug!(target: "vsphere", file = %name, size, "Upload finished");

        Ok(())
    }

    async fn vm_summary(&self, vm: &MoRef) -> Result<VmSummary> {
        self.summary_of(vm.clone()).await
    }

    async fn vm_guest(&self, vm: &MoRef) -> Result<GuestInfo> {
        self.property(vm, "guest", VsphereError::Property).await
    }

    async fn vm_snapshots(&self, vm: &MoRef) -> Result<Option<SnapshotInfo>> {
        self.property(vm, "snapshot", VsphereError::Snapshot).await
    }

    async fn vm_task(&self, vm: &MoRef, task: VmTask) -> Result<MoRef> {
        let (method, body) = task.method();
        self.invoke(vm, method, Some(&body), vm_task_error(&task))
            .await
    }

    async fn guest_op(&self, vm: &MoRef, op: GuestOp) -> Result<()> {
        let error_var = match op {
            GuestOp::Shutdown => VsphereError::Shutdown,
            GuestOp::Reboot => VsphereError::Reboot,
        };
        self.invoke::<(), ()>(vm, op.method(), None, error_var)
            .await
    }

    async fn snapshot_task(&self, snapshot: &MoRef, task: SnapshotTask) -> Result<MoRef> {
        let (method, body) = task.method();
        self.invoke(snapshot, method, Some(&body), VsphereError::Snapshot)
            .await
    }

    async fn screenshot(&self, vm: &MoRef) -> Result<Vec<u8>> {
        let url = format!("{}/screen?id={}", self.origin, vm.encoded());
        let mut request = self.client.get(&url);
        if let Some(session) = self.session_header()? {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let fault = Fault::from_body(&response.text().await?);
            return Err(Error::Vsphere(VsphereError::Screenshot, status, fault));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn task_status(&self, task: &MoRef) -> Result<TaskStatus> {
        let info: TaskInfo = self.property(task, "info", VsphereError::Task).await?;
        Ok(info.into())
    }

    async fn roles(&self) -> Result<Vec<AuthorizationRole>> {
        let manager = self.content().await?.authorization_manager.clone();
        let roles: Option<Vec<AuthorizationRole>> = self
            .property(&manager, "roleList", VsphereError::Permissions)
            .await?;
        Ok(roles.unwrap_or_default())
    }

    async fn entity_permissions(&self, entity: &MoRef) -> Result<Vec<Permission>> {
        let manager = self.content().await?.authorization_manager.clone();
        let body = json!({ "entity": entity, "inherited": true });
        let permissions: Option<Vec<Permission>> = self
            .invoke(
                &manager,
                "RetrieveEntityPermissions",
                Some(&body),
                VsphereError::Permissions,
            )
            .await?;
        Ok(permissions.unwrap_or_default())
    }

    async fn set_entity_permissions(
        &self,
        entity: &MoRef,
        permissions: &[Permission],
    ) -> Result<()> {
        let manager = self.content().await?.authorization_manager.clone();
        let body = json!({ "entity": entity, "permission": permissions });
        self.invoke(
            &manager,
            "SetEntityPermissions",
            Some(&body),
            VsphereError::Permissions,
        )
        .await
    }
}

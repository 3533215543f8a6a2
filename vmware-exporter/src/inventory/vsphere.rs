//! vCenter client over the VI/JSON API (`/sdk/vim25/{release}`).
//!
//! Each fetch opens a container view on the scope, pulls the fixed property
//! projection with `RetrievePropertiesEx` (following continuation tokens) and
//! destroys the view. The session id is kept between calls and renewed once
//! when vCenter answers 401.

use super::wire::{self, MoRef, Props, RetrieveResult, ServiceContent};
use super::{EntityKind, InventorySource, Scope};
use crate::config::VsphereConf;
use crate::error::{InventoryError, InventoryResult};
use crate::model::{Cluster, Datacenter, Datastore, Host, VirtualMachine};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

const SESSION_HEADER: &str = "vmware-api-session-id";

pub struct VsphereClient {
    http: Client,
    base: String,
    username: String,
    password: String,
    content: ServiceContent,
    session: RwLock<Option<String>>,
}

impl VsphereClient {
    /// Open and authenticate a session. Any failure here is fatal for the
    /// process.
    pub async fn connect(conf: &VsphereConf) -> InventoryResult<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(conf.insecure)
            .timeout(Duration::from_secs(conf.request_timeout_secs))
            .build()?;
        let base = format!("https://{}/sdk/vim25/{}", conf.hostname, conf.release);

        let client = Self::open(http, base, &conf.username, &conf.password).await?;
        info!("Connected to vCenter {} as {}", conf.hostname, conf.username);
        Ok(client)
    }

    /// Read the service content under `base` (the `/sdk/vim25/{release}`
    /// root, scheme included) and log in.
    pub async fn open(
        http: Client,
        base: String,
        username: &str,
        password: &str,
    ) -> InventoryResult<Self> {
        let resp = http
            .get(format!("{base}/ServiceInstance/ServiceInstance/content"))
            .send()
            .await?;
        let content: ServiceContent = check(resp, "RetrieveServiceContent").await?.json().await?;

        let client = Self {
            http,
            base,
            username: username.to_string(),
            password: password.to_string(),
            content,
            session: RwLock::new(None),
        };
        client.login().await?;
        Ok(client)
    }

    async fn login(&self) -> InventoryResult<()> {
        let sm = &self.content.session_manager;
        let resp = self
            .http
            .post(format!("{}/SessionManager/{}/Login", self.base, sm.value))
            .json(&json!({ "userName": self.username, "password": self.password }))
            .send()
            .await?;
        let resp = check(resp, "Login").await.map_err(|e| match e {
            InventoryError::Status { status, body, .. } => {
                InventoryError::Login(format!("HTTP {status}: {body}"))
            }
            other => other,
        })?;
        let session = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| InventoryError::Login(format!("no {SESSION_HEADER} header in response")))?;
        *self.session.write() = Some(session);
        debug!("vSphere session established");
        Ok(())
    }

    pub async fn logout(&self) {
        let sm = &self.content.session_manager;
        if let Err(e) = self
            .invoke::<Value>("SessionManager", &sm.value, "Logout", &Value::Null)
            .await
        {
            warn!("vSphere logout failed: {}", e);
        }
        *self.session.write() = None;
    }

    /// POST `{base}/{type}/{id}/{method}`. Empty bodies (void methods, empty
    /// results) come back as `None`.
    async fn invoke<R: DeserializeOwned>(
        &self,
        mo_type: &str,
        mo_id: &str,
        method: &str,
        body: &Value,
    ) -> InventoryResult<Option<R>> {
        let url = format!("{}/{}/{}/{}", self.base, mo_type, mo_id, method);
        let mut relogged = false;
        loop {
            let session = self.session.read().clone().unwrap_or_default();
            let mut req = self.http.post(&url).header(SESSION_HEADER, session);
            if !body.is_null() {
                req = req.json(body);
            }
            let resp = req.send().await?;

            if resp.status() == StatusCode::UNAUTHORIZED && !relogged {
                info!("vSphere session expired, logging in again");
                self.login().await?;
                relogged = true;
                continue;
            }

            let bytes = check(resp, method).await?.bytes().await?;
            if bytes.is_empty() {
                return Ok(None);
            }
            return Ok(serde_json::from_slice(&bytes)?);
        }
    }

    /// Collect `paths` of every `kind` object under `scope`.
    async fn retrieve(
        &self,
        kind: EntityKind,
        scope: &Scope,
        paths: &[&str],
    ) -> InventoryResult<Vec<Props>> {
        let container = match scope {
            Scope::Root => self.content.root_folder.clone(),
            Scope::Datacenter(id) => MoRef::new("Datacenter", id),
        };
        let vm = &self.content.view_manager;
        let view: MoRef = self
            .invoke(
                "ViewManager",
                &vm.value,
                "CreateContainerView",
                &json!({
                    "container": container.to_json(),
                    "type": [kind.vim_type()],
                    "recursive": true,
                }),
            )
            .await?
            .ok_or_else(|| InventoryError::Protocol("CreateContainerView returned nothing".into()))?;

        let result = self.collect_view(&view, kind, paths).await;

        if let Err(e) = self
            .invoke::<Value>("ContainerView", &view.value, "DestroyView", &Value::Null)
            .await
        {
            debug!("DestroyView {} failed: {}", view.value, e);
        }
        result
    }

    async fn collect_view(
        &self,
        view: &MoRef,
        kind: EntityKind,
        paths: &[&str],
    ) -> InventoryResult<Vec<Props>> {
        let pc = &self.content.property_collector.value;
        let spec = wire::retrieve_spec(view, kind.vim_type(), paths);
        let mut page: RetrieveResult = self
            .invoke("PropertyCollector", pc, "RetrievePropertiesEx", &spec)
            .await?
            .unwrap_or_default();

        let mut out: Vec<Props> = Vec::new();
        loop {
            out.extend(page.objects.drain(..).map(Props::from));
            let Some(token) = page.token.take() else { break };
            page = self
                .invoke("PropertyCollector", pc, "ContinueRetrievePropertiesEx", &json!({ "token": token }))
                .await?
                .unwrap_or_default();
        }
        debug!("retrieved {} {} objects", out.len(), kind);
        Ok(out)
    }

    /// Fetch and convert; entities that fail to decode are skipped.
    async fn fetch<T>(
        &self,
        kind: EntityKind,
        scope: &Scope,
        paths: &[&str],
        convert: fn(Props) -> Result<T, serde_json::Error>,
    ) -> InventoryResult<Vec<T>> {
        let objects = self.retrieve(kind, scope, paths).await?;
        Ok(objects
            .into_iter()
            .filter_map(|props| {
                let id = props.id.clone();
                match convert(props) {
                    Ok(entity) => Some(entity),
                    Err(e) => {
                        warn!("Skipping {} {}: {}", kind, id, e);
                        None
                    }
                }
            })
            .collect())
    }
}

impl InventorySource for VsphereClient {
    async fn datacenters(&self) -> InventoryResult<Vec<Datacenter>> {
        self.fetch(EntityKind::Datacenter, &Scope::Root, wire::DATACENTER_PATHS, wire::datacenter)
            .await
    }

    async fn clusters(&self, scope: &Scope) -> InventoryResult<Vec<Cluster>> {
        self.fetch(EntityKind::Cluster, scope, wire::CLUSTER_PATHS, wire::cluster).await
    }

    async fn hosts(&self, scope: &Scope) -> InventoryResult<Vec<Host>> {
        self.fetch(EntityKind::Host, scope, wire::HOST_PATHS, wire::host).await
    }

    async fn datastores(&self, scope: &Scope) -> InventoryResult<Vec<Datastore>> {
        self.fetch(EntityKind::Datastore, scope, wire::DATASTORE_PATHS, wire::datastore).await
    }

    async fn virtual_machines(&self, scope: &Scope) -> InventoryResult<Vec<VirtualMachine>> {
        self.fetch(EntityKind::VirtualMachine, scope, wire::VM_PATHS, wire::virtual_machine)
            .await
    }
}

/// Turn non-2xx answers into [`InventoryError::Status`], keeping the body
/// (vSphere puts the fault there).
async fn check(resp: reqwest::Response, method: &str) -> InventoryResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(InventoryError::Status {
        method: method.to_string(),
        status: status.as_u16(),
        body,
    })
}

//! Nexlink kubehub: client construction and a [`ResourceSource`] over
//! `v1/Service` backed by the Kubernetes list and watch endpoints.

#![forbid(unsafe_code)]

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::{Api, ListParams, WatchEvent as KubeEvent, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use metrics::histogram;
use nexlink_core::{ChangeKind, Listing, ResourceKey, ResourceRecord, ResourceSource, SourceError, WatchEvent, WatchStream};
use tracing::{debug, info, warn};

/// Server-side watch timeout. The API server rejects values of 295s and above.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Build a client from a kubeconfig file, or infer one (in-cluster, env) when
/// the file does not exist.
pub async fn client_from_kubeconfig(path: Option<&Path>) -> Result<Client> {
    match path.filter(|p| p.exists()) {
        Some(p) => {
            let kubeconfig = Kubeconfig::read_from(p).with_context(|| format!("reading kubeconfig {}", p.display()))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?;
            info!(kubeconfig = %p.display(), cluster = %config.cluster_url, "kube client configured");
            Client::try_from(config).context("building kube client")
        }
        None => {
            debug!("kubeconfig not found; inferring client config");
            Client::try_default().await.context("inferring kube client config")
        }
    }
}

/// Check the API server answers; returns its git version.
pub async fn probe(client: &Client) -> Result<String> {
    let info = client.apiserver_version().await.context("contacting API server")?;
    Ok(info.git_version)
}

/// Services in one namespace, or in all namespaces.
pub struct ServiceSource {
    api: Api<Service>,
    namespace: Option<String>,
}

impl ServiceSource {
    pub fn new(client: Client, namespace: Option<&str>) -> Self {
        let api = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        Self { api, namespace: namespace.map(str::to_string) }
    }
}

#[async_trait::async_trait]
impl ResourceSource for ServiceSource {
    async fn list(&self) -> Result<Listing, SourceError> {
        let started = Instant::now();
        let list = self.api.list(&ListParams::default()).await.map_err(classify)?;
        histogram!("nexlink_kube_list_ms", started.elapsed().as_secs_f64() * 1000.0);
        let version = parse_version(list.metadata.resource_version.as_deref())?;
        let listing = listing_from(list.items, version);
        debug!(ns = ?self.namespace, count = listing.items.len(), skipped = listing.skipped.len(), version, "services listed");
        Ok(listing)
    }

    async fn watch(&self, from_version: u64) -> Result<WatchStream, SourceError> {
        let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = self.api.watch(&wp, &from_version.to_string()).await.map_err(classify)?;
        debug!(ns = ?self.namespace, from_version, "service watch opened");
        Ok(stream.map(|item| item.map_err(classify).and_then(translate)).boxed())
    }
}

/// Map one kube watch notification onto the engine's vocabulary.
pub fn translate(ev: KubeEvent<Service>) -> Result<WatchEvent, SourceError> {
    match ev {
        KubeEvent::Added(s) => record_from(s).map(|r| WatchEvent::Changed(ChangeKind::Added, r)),
        KubeEvent::Modified(s) => record_from(s).map(|r| WatchEvent::Changed(ChangeKind::Modified, r)),
        KubeEvent::Deleted(s) => record_from(s).map(|r| WatchEvent::Changed(ChangeKind::Deleted, r)),
        KubeEvent::Bookmark(b) => parse_version(Some(&b.metadata.resource_version)).map(WatchEvent::Bookmark),
        KubeEvent::Error(resp) if resp.code == 410 => Err(SourceError::StaleResourceVersion),
        KubeEvent::Error(resp) => Err(SourceError::unavailable(format!("{} ({}): {}", resp.reason, resp.code, resp.message))),
    }
}

/// Decode a list page. Services that fail to decode are reported in
/// `skipped` when they carry a name, so the reflector keeps their cached state.
fn listing_from(services: Vec<Service>, version: u64) -> Listing {
    let mut listing = Listing { items: Vec::with_capacity(services.len()), version, skipped: Vec::new() };
    for svc in services {
        let key = svc.metadata.name.clone().map(|name| ResourceKey::new(svc.metadata.namespace.clone().unwrap_or_default(), name));
        match record_from(svc) {
            Ok(r) => listing.items.push(r),
            Err(e) => {
                warn!(key = ?key, error = %e, "skipping malformed service in list");
                listing.skipped.extend(key);
            }
        }
    }
    listing
}

fn classify(e: kube::Error) -> SourceError {
    match e {
        kube::Error::Api(resp) if resp.code == 410 => SourceError::StaleResourceVersion,
        kube::Error::SerdeError(e) => SourceError::malformed(e.to_string()),
        other => SourceError::unavailable(other.to_string()),
    }
}

fn parse_version(rv: Option<&str>) -> Result<u64, SourceError> {
    let rv = rv.ok_or_else(|| SourceError::malformed("missing resourceVersion"))?;
    rv.parse::<u64>().map_err(|_| SourceError::malformed(format!("non-numeric resourceVersion {rv:?}")))
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(obj) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        obj.remove("managedFields");
    }
}

fn record_from(svc: Service) -> Result<ResourceRecord, SourceError> {
    let name = svc.metadata.name.clone().ok_or_else(|| SourceError::malformed("service missing metadata.name"))?;
    let namespace = svc.metadata.namespace.clone().unwrap_or_default();
    let version = parse_version(svc.metadata.resource_version.as_deref())?;
    let mut raw = serde_json::to_value(&svc).map_err(|e| SourceError::malformed(format!("serializing service: {e}")))?;
    strip_managed_fields(&mut raw);
    Ok(ResourceRecord::new(ResourceKey::new(namespace, name), version, raw))
}

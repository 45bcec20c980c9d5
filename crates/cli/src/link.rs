//! Change handler turning service changes into link intents.
//!
//! What a link materializes as (DNS, proxy rules) is decided downstream; this
//! handler resolves the endpoint a peer cluster would need and reports it.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Service;
use metrics::counter;
use nexlink_core::{ChangeHandler, ResourceRecord};
use serde::Serialize;
use tracing::{debug, info};

/// Addressing data of a service as seen by a peer cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub cluster_ip: Option<String>,
    pub ports: Vec<String>,
}

impl Endpoint {
    pub fn from_record(r: &ResourceRecord) -> Result<Self> {
        let svc: Service = serde_json::from_value(r.raw.clone()).with_context(|| format!("decoding service {}", r.key))?;
        let spec = svc.spec.unwrap_or_default();
        let ports = spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| format!("{}/{}", p.port, p.protocol.unwrap_or_else(|| "TCP".into())))
            .collect();
        Ok(Self {
            kind: spec.type_.unwrap_or_else(|| "ClusterIP".into()),
            cluster_ip: spec.cluster_ip.filter(|ip| !ip.is_empty() && ip != "None"),
            ports,
        })
    }

    pub fn ports_label(&self) -> String {
        if self.ports.is_empty() { "-".to_string() } else { self.ports.join(",") }
    }
}

pub struct LinkHandler;

impl ChangeHandler for LinkHandler {
    fn on_add(&self, r: &ResourceRecord) -> Result<()> {
        let ep = Endpoint::from_record(r)?;
        counter!("nexlink_link_events_total", 1, "op" => "add");
        info!(service = %r.key, cluster_ip = ?ep.cluster_ip, ports = %ep.ports_label(), "link service");
        Ok(())
    }

    fn on_update(&self, old: &ResourceRecord, new: &ResourceRecord) -> Result<()> {
        let ep = Endpoint::from_record(new)?;
        if old.version == new.version {
            counter!("nexlink_link_events_total", 1, "op" => "resync");
            debug!(service = %new.key, "re-confirm link");
            return Ok(());
        }
        counter!("nexlink_link_events_total", 1, "op" => "update");
        if Endpoint::from_record(old).ok().as_ref() == Some(&ep) {
            debug!(service = %new.key, from = old.version, to = new.version, "service changed; endpoint unchanged");
        } else {
            info!(service = %new.key, cluster_ip = ?ep.cluster_ip, ports = %ep.ports_label(), "relink service");
        }
        Ok(())
    }

    fn on_delete(&self, last: &ResourceRecord) -> Result<()> {
        counter!("nexlink_link_events_total", 1, "op" => "delete");
        info!(service = %last.key, "unlink service");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexlink_core::ResourceKey;

    fn record(raw: serde_json::Value) -> ResourceRecord {
        ResourceRecord::new(ResourceKey::new("default", "svc-a"), 3, raw)
    }

    #[test]
    fn endpoint_from_service_json() {
        let r = record(serde_json::json!({
            "metadata": { "name": "svc-a", "namespace": "default" },
            "spec": { "clusterIP": "10.0.0.7", "ports": [{ "port": 80 }, { "port": 53, "protocol": "UDP" }] }
        }));
        let ep = Endpoint::from_record(&r).expect("endpoint");
        assert_eq!(ep.kind, "ClusterIP");
        assert_eq!(ep.cluster_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(ep.ports_label(), "80/TCP,53/UDP");
    }

    #[test]
    fn headless_service_has_no_ip() {
        let r = record(serde_json::json!({ "metadata": { "name": "svc-a" }, "spec": { "clusterIP": "None" } }));
        let ep = Endpoint::from_record(&r).expect("endpoint");
        assert_eq!(ep.cluster_ip, None);
        assert_eq!(ep.ports_label(), "-");
    }

    #[test]
    fn undecodable_record_fails_add() {
        let r = record(serde_json::json!({ "spec": { "ports": "not-a-list" } }));
        assert!(LinkHandler.on_add(&r).is_err());
        assert!(LinkHandler.on_delete(&r).is_ok());
    }
}

//! Assembly of the synapse JSON configuration from the service catalog

use crate::config::{Config, ServiceConfig};
use crate::error::{Error, Result};
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{info, warn};

/// A service that was left out of the rendered config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedService {
    pub service: String,
    pub reason: String,
}

/// Rendered synapse configuration
#[derive(Debug, Clone)]
pub struct SynapseRender {
    pub config: Value,
    pub skipped: Vec<SkippedService>,
}

impl SynapseRender {
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.config)?)
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut content = self.to_pretty_json()?;
        content.push('\n');
        std::fs::write(path, content).map_err(|source| Error::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Synapse config written");
        Ok(())
    }
}

/// Merge every enabled service into the base synapse config
pub fn render(config: &Config) -> SynapseRender {
    let mut document = config.synapse.base.clone();
    if !document.is_object() {
        document = Value::Object(Map::new());
    }

    let mut services = Map::new();
    let mut skipped = Vec::new();

    for name in &config.synapse.enabled_services {
        let entry = config
            .services
            .get(name)
            .ok_or_else(|| "it has no synapse config".to_string())
            .and_then(|service| service_entry(service, &config.zookeeper.smartstack_cluster));

        match entry {
            Ok(entry) => {
                services.insert(name.clone(), entry);
            }
            Err(reason) => {
                warn!(service = %name, %reason, "[synapse] skipping service");
                skipped.push(SkippedService {
                    service: name.clone(),
                    reason,
                });
            }
        }
    }

    if let Value::Object(root) = &mut document {
        object_field(root, "services").extend(services);
    }

    SynapseRender {
        config: document,
        skipped,
    }
}

/// Build the synapse entry for one service, or the reason it was skipped
pub fn service_entry(
    service: &ServiceConfig,
    zookeeper_hosts: &[String],
) -> std::result::Result<Value, String> {
    let mut entry = match service.synapse {
        Some(Value::Object(ref table)) => table.clone(),
        _ => return Err("it has no synapse config".to_string()),
    };
    let local_port = service
        .local_port
        .ok_or_else(|| "it has no local_port".to_string())?;

    let haproxy = object_field(&mut entry, "haproxy");
    haproxy.insert("port".to_string(), json!(local_port));

    if let Some(Value::Array(listen)) = haproxy.get_mut("listen") {
        let has = |line: &str| listen.iter().any(|v| v.as_str() == Some(line));
        let log_option = if has("mode http") {
            Some("option httplog")
        } else if has("mode tcp") {
            Some("option tcplog")
        } else {
            None
        };
        if let Some(option) = log_option {
            listen.push(json!(option));
        }
    }

    let method = entry
        .get("discovery")
        .and_then(|d| d.get("method"))
        .and_then(Value::as_str);

    if method == Some("zookeeper") {
        if zookeeper_hosts.is_empty() {
            return Err("no zookeeper servers specified".to_string());
        }
        let discovery = object_field(&mut entry, "discovery");
        discovery.insert("hosts".to_string(), json!(zookeeper_hosts));
        discovery.insert("path".to_string(), json!(service.zk_path));
    }

    Ok(Value::Object(entry))
}

/// Get `key` of `map` as an object, replacing anything else with `{}`
fn object_field<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(inner) => inner,
        _ => unreachable!("slot was just replaced with an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> Config {
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        config
    }

    const CATALOG: &str = r#"
[zookeeper]
smartstack_cluster = ["zk1:2181", "zk2:2181"]

[synapse]
enabled_services = ["web", "db", "cache", "nerve", "missing"]

[synapse.base.haproxy]
reload_command = "sudo /sbin/service haproxy reload"
bind_address = "localhost"

[services.nerve]
port = 1025

[services.web]
port = 8080
local_port = 3100
zk_path = "/nerve/services/web/services"

[services.web.synapse]
discovery = { method = "zookeeper" }
haproxy = { listen = ["mode http"], server_options = "check inter 2s" }

[services.db]
port = 5432
local_port = 3200

[services.db.synapse]
discovery = { method = "dns", servers = [{ host = "db.internal", port = 5432 }] }
haproxy = { listen = ["mode tcp"] }

[services.cache]
port = 6379

[services.cache.synapse]
discovery = { method = "dns" }
"#;

    #[test]
    fn test_render_catalog() {
        let render = render(&config(CATALOG));
        let doc = &render.config;

        assert_eq!(doc["haproxy"]["reload_command"], "sudo /sbin/service haproxy reload");

        let web = &doc["services"]["web"];
        assert_eq!(web["haproxy"]["port"], 3100);
        assert_eq!(web["haproxy"]["listen"], json!(["mode http", "option httplog"]));
        assert_eq!(web["haproxy"]["server_options"], "check inter 2s");
        assert_eq!(web["discovery"]["hosts"], json!(["zk1:2181", "zk2:2181"]));
        assert_eq!(web["discovery"]["path"], "/nerve/services/web/services");

        let db = &doc["services"]["db"];
        assert_eq!(db["haproxy"]["port"], 3200);
        assert_eq!(db["haproxy"]["listen"], json!(["mode tcp", "option tcplog"]));
        assert!(db["discovery"].get("hosts").is_none());

        let skipped: Vec<_> = render.skipped.iter().map(|s| s.service.as_str()).collect();
        assert_eq!(skipped, vec!["cache", "nerve", "missing"]);
        assert_eq!(render.skipped[0].reason, "it has no local_port");
        assert_eq!(render.skipped[1].reason, "it has no synapse config");
    }

    #[test]
    fn test_zookeeper_without_cluster_is_skipped() {
        let mut service = ServiceConfig::new(8080);
        service.local_port = Some(3100);
        service.synapse = Some(json!({ "discovery": { "method": "zookeeper" } }));

        assert_eq!(
            service_entry(&service, &[]),
            Err("no zookeeper servers specified".to_string())
        );
    }

    #[test]
    fn test_missing_haproxy_section_is_created() {
        let mut service = ServiceConfig::new(8080);
        service.local_port = Some(3100);
        service.synapse = Some(json!({ "discovery": { "method": "dns" } }));

        let entry = service_entry(&service, &[]).unwrap();
        assert_eq!(entry["haproxy"], json!({ "port": 3100 }));
    }

    #[test]
    fn test_listen_without_mode_is_untouched() {
        let mut service = ServiceConfig::new(8080);
        service.local_port = Some(3100);
        service.synapse = Some(json!({ "haproxy": { "listen": ["balance roundrobin"] } }));

        let entry = service_entry(&service, &[]).unwrap();
        assert_eq!(entry["haproxy"]["listen"], json!(["balance roundrobin"]));
    }

    #[test]
    fn test_write_pretty_json() {
        let render = render(&config(CATALOG));
        let file = tempfile::NamedTempFile::new().unwrap();

        render.write_to(file.path()).unwrap();

        let written = std::fs::read_to_string(file.path()).unwrap();
        let parsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, render.config);
        assert!(written.contains("\n  \"services\""));
    }

    #[test]
    fn test_write_failure_names_path() {
        let render = render(&config(CATALOG));
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("synapse.conf.json");

        let err = render.write_to(&target).unwrap_err();
        assert_eq!(err.code().as_str(), "WRITE_FAILED");
        assert!(err.to_string().contains("synapse.conf.json"), "message: {}", err);
        match err {
            Error::WriteFailed { path, .. } => assert_eq!(path, target),
            other => panic!("expected WriteFailed, got {:?}", other),
        }
    }
}

//! Consul-backed `ServiceRegistry`.
//!
//! Registration uses a TTL-style health check that this process keeps
//! passing (`PUT /v1/agent/check/pass/:id` every ~2s). Discovery is driven
//! by Consul's blocking query (`GET /v1/health/service/:name` with
//! `X-Consul-Index`) so a refresh only round-trips when the service's
//! health actually changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::RegistryError;
use crate::model::{RegistryEvent, Role, ServerEndpoint};
use crate::trait_def::ServiceRegistry;

fn service_name(role: Role) -> &'static str {
    match role {
        Role::Supervisor => "disjob-supervisor",
        Role::Worker => "disjob-worker",
    }
}

fn check_id(server: &ServerEndpoint) -> String {
    format!("{}-{}", service_name(server.role), server.address())
}

#[derive(Debug, Deserialize)]
struct ConsulServiceEntry {
    #[serde(rename = "Service")]
    service: ConsulService,
}

#[derive(Debug, Deserialize)]
struct ConsulService {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags")]
    tags: Vec<String>,
}

struct CachedSnapshot {
    servers: Vec<ServerEndpoint>,
    consul_index: u64,
    next_refresh: Instant,
}

pub struct ConsulRegistry {
    client: reqwest::Client,
    base_url: String,
    check_ttl: Duration,
    cache: DashMap<(Role, Option<String>), CachedSnapshot>,
    supervisor_tx: broadcast::Sender<RegistryEvent>,
    worker_tx: broadcast::Sender<RegistryEvent>,
    heartbeats: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl ConsulRegistry {
    pub fn new(base_url: impl Into<String>, check_ttl: Duration) -> Self {
        let (supervisor_tx, _) = broadcast::channel(256);
        let (worker_tx, _) = broadcast::channel(256);
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            check_ttl,
            cache: DashMap::new(),
            supervisor_tx,
            worker_tx,
            heartbeats: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn sender(&self, role: Role) -> &broadcast::Sender<RegistryEvent> {
        match role {
            Role::Supervisor => &self.supervisor_tx,
            Role::Worker => &self.worker_tx,
        }
    }

    fn spawn_ttl_heartbeat(&self, id: String) -> JoinHandle<()> {
        let client = self.client.clone();
        let url = format!("{}/v1/agent/check/pass/{}", self.base_url, id);
        // Consul's own agent-side TTL enforcement is ~2s per spec §4.5;
        // we pass well inside that window.
        let period = Duration::from_secs(2);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(err) = client.put(&url).send().await {
                    warn!("consul TTL check-pass failed for {url}: {err}");
                }
            }
        })
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn register(&self, server: &ServerEndpoint) -> Result<(), RegistryError> {
        let id = check_id(server);
        let mut tags = Vec::new();
        if let Some(group) = &server.group {
            tags.push(format!("group={group}"));
        }
        if let Some(ctx) = &server.context_path {
            tags.push(format!("context_path={ctx}"));
        }

        let body = serde_json::json!({
            "ID": id,
            "Name": service_name(server.role),
            "Address": server.host,
            "Port": server.port,
            "Tags": tags,
            "Check": {
                "TTL": format!("{}s", self.check_ttl.as_secs()),
                "DeregisterCriticalServiceAfter": format!("{}s", self.check_ttl.as_secs() * 10),
            }
        });

        self.client
            .put(format!("{}/v1/agent/service/register", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let handle = self.spawn_ttl_heartbeat(id.clone());
        if let Some(old) = self.heartbeats.lock().await.insert(id, handle) {
            old.abort();
        }

        let _ = self
            .sender(server.role)
            .send(RegistryEvent::Registered(server.clone()));
        Ok(())
    }

    async fn deregister(&self, server: &ServerEndpoint) -> Result<(), RegistryError> {
        let id = check_id(server);
        self.client
            .put(format!(
                "{}/v1/agent/service/deregister/{}",
                self.base_url, id
            ))
            .send()
            .await?
            .error_for_status()?;

        if let Some(handle) = self.heartbeats.lock().await.remove(&id) {
            handle.abort();
        }

        let _ = self
            .sender(server.role)
            .send(RegistryEvent::Deregistered(server.clone()));
        Ok(())
    }

    async fn discovered_servers(
        &self,
        role: Role,
        group: Option<&str>,
    ) -> Result<Vec<ServerEndpoint>, RegistryError> {
        let cache_key = (role, group.map(str::to_owned));
        if let Some(cached) = self.cache.get(&cache_key) {
            if cached.next_refresh > Instant::now() {
                return Ok(cached.servers.clone());
            }
        }

        let index = self
            .cache
            .get(&cache_key)
            .map(|c| c.consul_index)
            .unwrap_or(0);

        let url = format!(
            "{}/v1/health/service/{}?passing=true&index={}&wait=30s",
            self.base_url,
            service_name(role),
            index
        );
        let response = self.client.get(&url).send().await?.error_for_status()?;

        let next_index: u64 = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(index);

        let entries: Vec<ConsulServiceEntry> = response.json().await?;
        let mut servers: Vec<ServerEndpoint> = entries
            .into_iter()
            .map(|entry| {
                let mut ep = ServerEndpoint::new(role, entry.service.address, entry.service.port);
                for tag in entry.service.tags {
                    if let Some(group) = tag.strip_prefix("group=") {
                        ep.group = Some(group.to_owned());
                    }
                    if let Some(ctx) = tag.strip_prefix("context_path=") {
                        ep.context_path = Some(ctx.to_owned());
                    }
                }
                ep
            })
            .filter(|ep| group.map_or(true, |g| ep.group.as_deref() == Some(g)))
            .collect();
        servers.sort();

        self.cache.insert(
            cache_key,
            CachedSnapshot {
                servers: servers.clone(),
                consul_index: next_index,
                next_refresh: Instant::now() + Duration::from_secs(1),
            },
        );

        Ok(servers)
    }

    async fn is_alive(&self, server: &ServerEndpoint) -> Result<bool, RegistryError> {
        let servers = self
            .discovered_servers(server.role, server.group.as_deref())
            .await?;
        Ok(servers.iter().any(|s| s.address() == server.address()))
    }

    fn subscribe(&self, role: Role) -> broadcast::Receiver<RegistryEvent> {
        self.sender(role).subscribe()
    }
}

//! `MemoryRegistry` — an in-process `ServiceRegistry` used by unit tests and
//! by single-binary deployments that don't want an external Redis/Consul.
//!
//! A trait implementation that records what it was told and never touches
//! the network.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::RegistryError;
use crate::model::{RegistryEvent, Role, ServerEndpoint};
use crate::trait_def::ServiceRegistry;

struct Entry {
    expires_at: Instant,
}

pub struct MemoryRegistry {
    session_ttl: Duration,
    entries: DashMap<(Role, ServerEndpoint), Entry>,
    supervisor_tx: broadcast::Sender<RegistryEvent>,
    worker_tx: broadcast::Sender<RegistryEvent>,
}

impl MemoryRegistry {
    pub fn new(session_ttl: Duration) -> Self {
        let (supervisor_tx, _) = broadcast::channel(256);
        let (worker_tx, _) = broadcast::channel(256);
        Self {
            session_ttl,
            entries: DashMap::new(),
            supervisor_tx,
            worker_tx,
        }
    }

    fn sender(&self, role: Role) -> &broadcast::Sender<RegistryEvent> {
        match role {
            Role::Supervisor => &self.supervisor_tx,
            Role::Worker => &self.worker_tx,
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn register(&self, server: &ServerEndpoint) -> Result<(), RegistryError> {
        self.entries.insert(
            (server.role, server.clone()),
            Entry {
                expires_at: Instant::now() + self.session_ttl,
            },
        );
        let _ = self
            .sender(server.role)
            .send(RegistryEvent::Registered(server.clone()));
        Ok(())
    }

    async fn deregister(&self, server: &ServerEndpoint) -> Result<(), RegistryError> {
        self.entries.remove(&(server.role, server.clone()));
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
        let now = Instant::now();
        let mut live: Vec<ServerEndpoint> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == role && entry.value().expires_at > now)
            .map(|entry| entry.key().1.clone())
            .filter(|ep| group.map_or(true, |g| ep.group.as_deref() == Some(g)))
            .collect();
        live.sort();
        Ok(live)
    }

    async fn is_alive(&self, server: &ServerEndpoint) -> Result<bool, RegistryError> {
        Ok(self
            .entries
            .get(&(server.role, server.clone()))
            .map(|e| e.expires_at > Instant::now())
            .unwrap_or(false))
    }

    fn subscribe(&self, role: Role) -> broadcast::Receiver<RegistryEvent> {
        self.sender(role).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> ServerEndpoint {
        ServerEndpoint::new(Role::Worker, "127.0.0.1", port).with_group("default")
    }

    #[tokio::test]
    async fn register_then_discover_finds_the_server() {
        let registry = MemoryRegistry::default();
        registry.register(&ep(9001)).await.unwrap();

        let servers = registry
            .discovered_servers(Role::Worker, Some("default"))
            .await
            .unwrap();
        assert_eq!(servers, vec![ep(9001)]);
    }

    #[tokio::test]
    async fn deregister_excludes_the_server() {
        let registry = MemoryRegistry::default();
        registry.register(&ep(9001)).await.unwrap();
        registry.deregister(&ep(9001)).await.unwrap();

        let servers = registry
            .discovered_servers(Role::Worker, None)
            .await
            .unwrap();
        assert!(servers.is_empty());
    }

    #[tokio::test]
    async fn expired_entries_are_excluded_from_discovery() {
        let registry = MemoryRegistry::new(Duration::from_millis(10));
        registry.register(&ep(9001)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let servers = registry
            .discovered_servers(Role::Worker, None)
            .await
            .unwrap();
        assert!(servers.is_empty());
        assert!(!registry.is_alive(&ep(9001)).await.unwrap());
    }

    #[tokio::test]
    async fn group_filter_excludes_other_groups() {
        let registry = MemoryRegistry::default();
        registry.register(&ep(9001)).await.unwrap();
        let other = ServerEndpoint::new(Role::Worker, "127.0.0.1", 9002).with_group("other");
        registry.register(&other).await.unwrap();

        let servers = registry
            .discovered_servers(Role::Worker, Some("default"))
            .await
            .unwrap();
        assert_eq!(servers, vec![ep(9001)]);
    }
}

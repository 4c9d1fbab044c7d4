//! Redis-backed `ServiceRegistry`.
//!
//! Layout (spec §6, "Registry key layout"):
//! - `disjob:registry:<role>` — sorted set, member = [`ServerEndpoint::to_wire`],
//!   score = `now_ms + session_ttl_ms`.
//! - `disjob:discovery:<role>:channel` — pub/sub channel, messages are
//!   `"REGISTER:<wire>"` / `"DEREGISTER:<wire>"`.
//!
//! Liveness is enforced by pruning the sorted set (`ZREMRANGEBYSCORE -inf
//! now`) on every authoritative read; push notifications are advisory only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::model::{RegistryEvent, Role, ServerEndpoint};
use crate::trait_def::ServiceRegistry;

fn registry_key(role: Role) -> String {
    format!("disjob:registry:{role}")
}

fn channel_key(role: Role) -> String {
    format!("disjob:discovery:{role}:channel")
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct CachedSnapshot {
    servers: Vec<ServerEndpoint>,
    next_refresh: Instant,
}

/// Re-asserts a registration's score atomically, only if the member is
/// still present — mirrors the source's "re-asserted each heartbeat period
/// via a Lua script" (spec §4.5).
const REASSERT_SCRIPT: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[2]) then
  redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
  return 1
end
return 0
"#;

pub struct RedisRegistry {
    conn: ConnectionManager,
    client: redis::Client,
    session_ttl: Duration,
    cache: DashMap<(Role, Option<String>), CachedSnapshot>,
    supervisor_tx: broadcast::Sender<RegistryEvent>,
    worker_tx: broadcast::Sender<RegistryEvent>,
    heartbeats: Arc<Mutex<HashMap<(Role, String), JoinHandle<()>>>>,
}

impl RedisRegistry {
    pub async fn connect(redis_url: &str, session_ttl: Duration) -> Result<Self, RegistryError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        let (supervisor_tx, _) = broadcast::channel(256);
        let (worker_tx, _) = broadcast::channel(256);

        let registry = Self {
            conn,
            client,
            session_ttl,
            cache: DashMap::new(),
            supervisor_tx,
            worker_tx,
            heartbeats: Arc::new(Mutex::new(HashMap::new())),
        };

        registry.spawn_pubsub_listener(Role::Supervisor);
        registry.spawn_pubsub_listener(Role::Worker);

        Ok(registry)
    }

    fn sender(&self, role: Role) -> &broadcast::Sender<RegistryEvent> {
        match role {
            Role::Supervisor => &self.supervisor_tx,
            Role::Worker => &self.worker_tx,
        }
    }

    /// Background task: drains the pub/sub channel for `role` and republishes
    /// each event locally, invalidating the read cache so the next
    /// `discovered_servers` call refreshes promptly instead of waiting out
    /// the periodic interval.
    fn spawn_pubsub_listener(&self, role: Role) {
        let client = self.client.clone();
        let channel = channel_key(role);
        let tx = self.sender(role).clone();
        tokio::spawn(async move {
            loop {
                let mut pubsub = match client.get_async_pubsub().await {
                    Ok(p) => p,
                    Err(err) => {
                        warn!("redis pubsub connect failed for {channel}: {err}, retrying");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        continue;
                    }
                };
                if let Err(err) = pubsub.subscribe(&channel).await {
                    warn!("redis pubsub subscribe failed for {channel}: {err}, retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }

                let mut stream = pubsub.on_message();
                use futures::StreamExt;
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let Some((event, wire)) = payload.split_once(':') else {
                        continue;
                    };
                    let Some(endpoint) = ServerEndpoint::from_wire(role, wire) else {
                        continue;
                    };
                    let event = match event {
                        "REGISTER" => RegistryEvent::Registered(endpoint),
                        "DEREGISTER" => RegistryEvent::Deregistered(endpoint),
                        _ => continue,
                    };
                    debug!(?event, "redis discovery push notification");
                    let _ = tx.send(event);
                }
            }
        });
    }

    fn spawn_heartbeat(&self, server: ServerEndpoint) -> JoinHandle<()> {
        let mut conn = self.conn.clone();
        let key = registry_key(server.role);
        let member = server.to_wire();
        let ttl = self.session_ttl;
        let script = redis::Script::new(REASSERT_SCRIPT);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl / 2);
            loop {
                interval.tick().await;
                let score = now_ms() + ttl.as_millis() as i64;
                let result: Result<i64, _> = script
                    .key(&key)
                    .arg(score)
                    .arg(&member)
                    .invoke_async(&mut conn)
                    .await;
                if let Err(err) = result {
                    warn!("registry heartbeat failed for {member}: {err}");
                }
            }
        })
    }
}

#[async_trait]
impl ServiceRegistry for RedisRegistry {
    async fn register(&self, server: &ServerEndpoint) -> Result<(), RegistryError> {
        let key = registry_key(server.role);
        let member = server.to_wire();
        let score = now_ms() + self.session_ttl.as_millis() as i64;

        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(&key, &member, score).await?;
        conn.publish::<_, _, ()>(channel_key(server.role), format!("REGISTER:{member}"))
            .await?;

        let handle = self.spawn_heartbeat(server.clone());
        let mut heartbeats = self.heartbeats.lock().await;
        if let Some(old) = heartbeats.insert((server.role, member), handle) {
            old.abort();
        }
        Ok(())
    }

    async fn deregister(&self, server: &ServerEndpoint) -> Result<(), RegistryError> {
        let key = registry_key(server.role);
        let member = server.to_wire();

        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(&key, &member).await?;
        conn.publish::<_, _, ()>(channel_key(server.role), format!("DEREGISTER:{member}"))
            .await?;

        if let Some(handle) = self.heartbeats.lock().await.remove(&(server.role, member)) {
            handle.abort();
        }
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

        let key = registry_key(role);
        let mut conn = self.conn.clone();

        // Authoritative liveness: prune anything whose score (expiry) has passed.
        conn.zrembyscore::<_, _, _, ()>(&key, "-inf", now_ms())
            .await?;
        let members: Vec<String> = conn.zrange(&key, 0, -1).await?;

        let mut servers: Vec<ServerEndpoint> = members
            .iter()
            .filter_map(|m| ServerEndpoint::from_wire(role, m))
            .filter(|ep| group.map_or(true, |g| ep.group.as_deref() == Some(g)))
            .collect();
        servers.sort();

        self.cache.insert(
            cache_key,
            CachedSnapshot {
                servers: servers.clone(),
                next_refresh: Instant::now() + self.session_ttl / 2,
            },
        );

        Ok(servers)
    }

    async fn is_alive(&self, server: &ServerEndpoint) -> Result<bool, RegistryError> {
        let key = registry_key(server.role);
        let member = server.to_wire();
        let mut conn = self.conn.clone();
        let score: Option<i64> = conn.zscore(&key, &member).await?;
        Ok(score.map(|s| s > now_ms()).unwrap_or(false))
    }

    fn subscribe(&self, role: Role) -> broadcast::Receiver<RegistryEvent> {
        self.sender(role).subscribe()
    }
}

//! Named pool of backend channels (§4.C6 "Pool"). Mutated only from the
//! router's reconfiguration path and the admin API; request handlers only
//! ever read a cloned `Arc<Channel>` snapshot, matching §5's shared-resource
//! policy ("reads from request-handling goroutines see a snapshot").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::channel::Channel;
use crate::config::BackendConfig;

pub struct Pool {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    grace_period: Duration,
    reconnect_backoff: Duration,
}

impl Pool {
    pub fn new(grace_period: Duration, reconnect_backoff: Duration) -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            grace_period,
            reconnect_backoff,
        })
    }

    pub async fn add_backend(&self, name: String, cfg: BackendConfig) -> anyhow::Result<()> {
        let channel = Channel::connect(name.clone(), cfg, self.reconnect_backoff)?;
        let previous = self.channels.write().await.insert(name, channel);
        if let Some(previous) = previous {
            let grace = self.grace_period;
            tokio::spawn(async move { previous.close(grace).await });
        }
        Ok(())
    }

    /// Closes the named channel after the configured grace period and
    /// removes it from the pool immediately (in-flight stubs keep their own
    /// `Arc<Channel>` alive and can finish their request).
    pub async fn remove_backend(&self, name: &str) -> Option<Arc<Channel>> {
        let removed = self.channels.write().await.remove(name);
        if let Some(channel) = removed.clone() {
            let grace = self.grace_period;
            tokio::spawn(async move { channel.close(grace).await });
        }
        removed
    }

    /// Reconfigures the whole pool: the new backend set is installed
    /// immediately, prior channels drain in the background.
    pub async fn init_channels(&self, backends: HashMap<String, BackendConfig>) -> anyhow::Result<()> {
        let mut fresh = HashMap::with_capacity(backends.len());
        for (name, cfg) in backends {
            fresh.insert(name.clone(), Channel::connect(name, cfg, self.reconnect_backoff)?);
        }
        let prior = std::mem::replace(&mut *self.channels.write().await, fresh);
        let grace = self.grace_period;
        tokio::spawn(async move {
            for channel in prior.into_values() {
                channel.close(grace).await;
            }
        });
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.read().await.get(name).cloned()
    }

    /// Longest-prefix route match (§4.C7 rule 1): the channel whose
    /// `route_prefix` is the longest proper prefix of `path`, or `None` if
    /// no backend's prefix matches (→ 404).
    pub async fn resolve_route(&self, path: &str) -> Option<(String, Arc<Channel>)> {
        self.channels
            .read()
            .await
            .iter()
            .filter(|(_, channel)| is_route_prefix(&channel.backend.route_prefix, path))
            .max_by_key(|(_, channel)| channel.backend.route_prefix.len())
            .map(|(name, channel)| (name.clone(), channel.clone()))
    }

    pub async fn snapshot(&self) -> Vec<(String, BackendConfig)> {
        self.channels
            .read()
            .await
            .iter()
            .map(|(name, channel)| (name.clone(), channel.backend.clone()))
            .collect()
    }
}

fn is_route_prefix(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() || !path.starts_with(prefix) {
        return false;
    }
    prefix.len() == path.len() || prefix.ends_with('/') || path.as_bytes().get(prefix.len()) == Some(&b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_matching_prefix_wins() {
        assert!(is_route_prefix("/france", "/france/france_parts"));
        assert!(is_route_prefix("/france", "/france"));
        assert!(!is_route_prefix("/france", "/francexyz"));
        assert!(!is_route_prefix("/elsewhere", "/france/france_parts"));
    }

    #[tokio::test]
    async fn resolve_route_picks_the_longer_prefix() {
        let pool = Pool::new(Duration::from_secs(1), Duration::from_secs(5));
        pool.add_backend(
            "root".to_string(),
            BackendConfig {
                address: "http://127.0.0.1:1".to_string(),
                route_prefix: "/france".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        pool.add_backend(
            "nested".to_string(),
            BackendConfig {
                address: "http://127.0.0.1:2".to_string(),
                route_prefix: "/france/france_parts".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let (name, _) = pool
            .resolve_route("/france/france_parts/_/wfs3/collections")
            .await
            .unwrap();
        assert_eq!(name, "nested");
    }
}

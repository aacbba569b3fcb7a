//! Pooled HTTP/2 channels for the gRPC transport.
//!
//! Channels are keyed by `(endpoint, use_tls, server_name)` and reused
//! across invocations; a channel multiplexes concurrent streams, so one
//! per key is enough. Every lookup first sweeps the pool, evicting entries
//! older than the TTL or idle beyond the idle timeout. When the pool is at
//! capacity the least-recently-used entry makes room. Failed dials are
//! never cached.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

pub const DEFAULT_CONNECTION_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Dial timeout for new channels. Deliberately short so an unreachable
/// server fails fast instead of eating the whole request timeout.
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Tuning knobs for the channel pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub ttl: Duration,
    pub idle_timeout: Duration,
    pub max_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CONNECTION_TTL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    pub endpoint: String,
    pub use_tls: bool,
    pub server_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("invalid TLS configuration: {0}")]
    Tls(#[source] tonic::transport::Error),

    #[error("failed to dial '{endpoint}': {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
}

struct PoolEntry {
    channel: Channel,
    created_at: Instant,
    last_used: Instant,
}

pub(crate) struct ChannelPool {
    entries: Mutex<HashMap<PoolKey, PoolEntry>>,
    config: PoolConfig,
}

impl ChannelPool {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Returns the pooled channel for `key`, dialing a new one on miss.
    pub(crate) async fn get_or_dial(&self, key: PoolKey) -> Result<Channel, DialError> {
        if let Some(channel) = self.checkout(&key) {
            return Ok(channel);
        }

        // Dial outside the lock; concurrent misses may race, in which case
        // the later insert wins and the loser's channel is simply dropped.
        let channel = dial(&key).await?;
        self.insert(key, channel.clone());
        Ok(channel)
    }

    fn checkout(&self, key: &PoolKey) -> Option<Channel> {
        let mut entries = self.entries.lock();
        self.sweep_locked(&mut entries);

        let entry = entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(entry.channel.clone())
    }

    pub(crate) fn insert(&self, key: PoolKey, channel: Channel) {
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.config.max_connections {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        let now = Instant::now();
        entries.insert(
            key,
            PoolEntry {
                channel,
                created_at: now,
                last_used: now,
            },
        );
    }

    fn sweep_locked(&self, entries: &mut HashMap<PoolKey, PoolEntry>) {
        let now = Instant::now();
        entries.retain(|_, entry| {
            now.duration_since(entry.created_at) <= self.config.ttl
                && now.duration_since(entry.last_used) <= self.config.idle_timeout
        });
    }

    pub(crate) fn keys(&self) -> Vec<PoolKey> {
        self.entries.lock().keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

async fn dial(key: &PoolKey) -> Result<Channel, DialError> {
    let scheme = if key.use_tls { "https" } else { "http" };
    let mut builder = Endpoint::from_shared(format!("{scheme}://{}", key.endpoint))
        .map_err(|source| DialError::InvalidEndpoint {
            endpoint: key.endpoint.clone(),
            source,
        })?
        .connect_timeout(DIAL_TIMEOUT);

    if key.use_tls {
        let mut tls = ClientTlsConfig::new().with_native_roots();
        if !key.server_name.is_empty() {
            tls = tls.domain_name(key.server_name.clone());
        }
        builder = builder.tls_config(tls).map_err(DialError::Tls)?;
    }

    builder
        .connect()
        .await
        .map_err(|source| DialError::ConnectFailed {
            endpoint: key.endpoint.clone(),
            source,
        })
}

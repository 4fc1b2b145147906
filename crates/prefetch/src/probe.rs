//! # Environment Probe
//!
//! Best-effort measurements of network conditions and storage headroom, and
//! the one-time adaptation of [`CacheOptions`] to them. A failed measurement
//! never prevents the cache from operating: it selects a conservative
//! fallback instead.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use sysinfo::Disks;
use tracing::{debug, info, warn};

use crate::config::CacheOptions;
use crate::error::ProbeError;
use crate::stats::HumanSize;

/// Look-ahead cap applied on slow or unmeasurable networks.
pub const LOW_BANDWIDTH_LOOKAHEAD_SECS: u64 = 30;
/// Size ceiling applied when storage headroom cannot be measured.
pub const FALLBACK_MAX_SIZE_BYTES: u64 = 50 * 1024 * 1024; // 50MB

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkCondition {
    pub throughput_kbps: f64,
    pub latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
    pub available_bytes: u64,
    pub total_bytes: u64,
}

#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    async fn network_condition(&self) -> Result<NetworkCondition, ProbeError>;

    async fn storage_estimate(&self) -> Result<StorageEstimate, ProbeError>;
}

/// Adapt `options` to the measured environment.
///
/// - throughput below the threshold caps the look-ahead at 30 seconds
/// - storage headroom below the size budget caps it at half the headroom
pub async fn adapt_options(
    mut options: CacheOptions,
    probe: &dyn EnvironmentProbe,
) -> CacheOptions {
    match probe.network_condition().await {
        Ok(condition) => {
            debug!(
                throughput_kbps = condition.throughput_kbps,
                latency_ms = condition.latency.as_millis() as u64,
                "Measured network condition"
            );
            if condition.throughput_kbps < options.network_speed_threshold_kbps {
                options.prefetch_lookahead_secs =
                    options.prefetch_lookahead_secs.min(LOW_BANDWIDTH_LOOKAHEAD_SECS);
                info!(
                    throughput_kbps = condition.throughput_kbps,
                    threshold_kbps = options.network_speed_threshold_kbps,
                    lookahead_secs = options.prefetch_lookahead_secs,
                    "Network below threshold, limiting predictive caching"
                );
            }
        }
        Err(e) => {
            options.prefetch_lookahead_secs =
                options.prefetch_lookahead_secs.min(LOW_BANDWIDTH_LOOKAHEAD_SECS);
            warn!(
                error = %e,
                lookahead_secs = options.prefetch_lookahead_secs,
                "Network probe failed, using conservative look-ahead"
            );
        }
    }

    match probe.storage_estimate().await {
        Ok(estimate) => {
            debug!(
                available = %HumanSize(estimate.available_bytes),
                total = %HumanSize(estimate.total_bytes),
                "Measured storage headroom"
            );
            if estimate.available_bytes < options.max_size_bytes {
                options.max_size_bytes = options.max_size_bytes.min(estimate.available_bytes / 2);
                info!(
                    max_size = %HumanSize(options.max_size_bytes),
                    "Storage headroom below budget, shrinking cache size"
                );
            }
        }
        Err(e) => {
            options.max_size_bytes = options.max_size_bytes.min(FALLBACK_MAX_SIZE_BYTES);
            warn!(
                error = %e,
                max_size = %HumanSize(options.max_size_bytes),
                "Storage probe failed, using conservative cache size"
            );
        }
    }

    options
}

/// Probe returning fixed readings; `None` makes the measurement fail.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pub network: Option<NetworkCondition>,
    pub storage: Option<StorageEstimate>,
}

impl StaticProbe {
    pub fn new(network: Option<NetworkCondition>, storage: Option<StorageEstimate>) -> Self {
        Self { network, storage }
    }

    /// A probe that cannot measure anything.
    pub fn unavailable() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvironmentProbe for StaticProbe {
    async fn network_condition(&self) -> Result<NetworkCondition, ProbeError> {
        self.network
            .ok_or_else(|| ProbeError::Unavailable("no network reading configured".into()))
    }

    async fn storage_estimate(&self) -> Result<StorageEstimate, ProbeError> {
        self.storage
            .ok_or_else(|| ProbeError::Unavailable("no storage reading configured".into()))
    }
}

/// Measures throughput by downloading a probe resource
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl EnvironmentProbe for HttpProbe {
    async fn network_condition(&self) -> Result<NetworkCondition, ProbeError> {
        let started = Instant::now();
        let response =
            tokio::time::timeout(self.timeout, self.client.get(&self.url).send()).await??;
        let latency = started.elapsed();

        if !response.status().is_success() {
            return Err(ProbeError::Unavailable(format!(
                "probe resource returned status code {}",
                response.status()
            )));
        }

        let remaining = self.timeout.saturating_sub(latency);
        let body = tokio::time::timeout(remaining, response.bytes()).await??;
        let seconds = started.elapsed().as_secs_f64().max(f64::EPSILON);
        let throughput_kbps = (body.len() as f64 * 8.0 / 1000.0) / seconds;

        Ok(NetworkCondition {
            throughput_kbps,
            latency,
        })
    }

    async fn storage_estimate(&self) -> Result<StorageEstimate, ProbeError> {
        Err(ProbeError::Unavailable(
            "http probe does not measure storage".into(),
        ))
    }
}

/// Reads free space of the disk holding `path`
#[derive(Debug, Clone)]
pub struct DiskProbe {
    path: PathBuf,
}

impl DiskProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn measure(path: &Path) -> Result<StorageEstimate, ProbeError> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| StorageEstimate {
                available_bytes: disk.available_space(),
                total_bytes: disk.total_space(),
            })
            .ok_or_else(|| {
                ProbeError::Unavailable(format!("no disk found for {}", path.display()))
            })
    }
}

#[async_trait]
impl EnvironmentProbe for DiskProbe {
    async fn network_condition(&self) -> Result<NetworkCondition, ProbeError> {
        Err(ProbeError::Unavailable(
            "disk probe does not measure the network".into(),
        ))
    }

    async fn storage_estimate(&self) -> Result<StorageEstimate, ProbeError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::measure(&path))
            .await
            .map_err(|e| ProbeError::Unavailable(format!("disk probe task failed: {e}")))?
    }
}

/// Combines a network probe and a storage probe
pub struct SystemProbe {
    network: Box<dyn EnvironmentProbe>,
    storage: Box<dyn EnvironmentProbe>,
}

impl SystemProbe {
    pub fn new(network: Box<dyn EnvironmentProbe>, storage: Box<dyn EnvironmentProbe>) -> Self {
        Self { network, storage }
    }
}

#[async_trait]
impl EnvironmentProbe for SystemProbe {
    async fn network_condition(&self) -> Result<NetworkCondition, ProbeError> {
        self.network.network_condition().await
    }

    async fn storage_estimate(&self) -> Result<StorageEstimate, ProbeError> {
        self.storage.storage_estimate().await
    }
}

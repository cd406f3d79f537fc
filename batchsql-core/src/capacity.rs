//! Capacity probing for database hosts.
//!
//! Each host exposes an endpoint reporting its free execution slots. The
//! probe never fails its caller: any problem yields a capacity of one, which
//! keeps dispatch trickling instead of running unbounded while telemetry is
//! down. Probed values reach [`HostAdmission`] through [`CapacityRefresher`]
//! on a schedule, not on every admission check.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::HostAdmission;
use crate::config::{BatchConfig, CapacityConfig};
use crate::error::{BatchError, Result};
use crate::model::HostCapacitySample;

/// Capacity reported when the probe cannot get a trustworthy answer.
pub const FAIL_OPEN_CAPACITY: u32 = 1;

/// Source of per-host core counts.
#[async_trait]
pub trait CapacityProbe: Send + Sync {
    /// Available execution slots on `host`. Always `>= 1`.
    async fn capacity(&self, host: &str) -> u32;
}

#[derive(Debug, Deserialize)]
struct CapacityResponse {
    retcode: i64,
    #[serde(default)]
    return_values: Option<CapacityValues>,
}

#[derive(Debug, Deserialize)]
struct CapacityValues {
    #[serde(default)]
    available_cores: Option<Value>,
}

fn positive_integer(value: &Value) -> Option<u32> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if number.is_finite() && number >= 1.0 && number.fract() == 0.0 && number <= u32::MAX as f64 {
        Some(number as u32)
    } else {
        None
    }
}

/// Parse a capacity endpoint body, or `None` if it is not a success payload
/// carrying a positive integer.
pub fn parse_capacity_body(body: &str) -> Option<u32> {
    let response: CapacityResponse = serde_json::from_str(body).ok()?;
    if response.retcode != 0 {
        return None;
    }
    positive_integer(response.return_values?.available_cores.as_ref()?)
}

/// Probes `POST <endpoint>` on each host with a hard timeout.
#[derive(Clone)]
pub struct HttpCapacityProbe {
    client: reqwest::Client,
    config: CapacityConfig,
}

impl fmt::Debug for HttpCapacityProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCapacityProbe")
            .field("endpoint_template", &self.config.endpoint_template)
            .field("timeout_ms", &self.config.timeout_ms)
            .finish()
    }
}

impl HttpCapacityProbe {
    /// Build the HTTP client with the configured timeout.
    pub fn new(config: CapacityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| BatchError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn try_capacity(&self, host: &str) -> std::result::Result<u32, String> {
        let endpoint = self.config.endpoint_for(host);
        let url = url::Url::parse(&endpoint).map_err(|e| format!("bad endpoint {endpoint}: {e}"))?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("endpoint answered {status}"));
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("reading body failed: {e}"))?;

        parse_capacity_body(&body).ok_or_else(|| format!("unusable payload: {body}"))
    }
}

#[async_trait]
impl CapacityProbe for HttpCapacityProbe {
    async fn capacity(&self, host: &str) -> u32 {
        match self.try_capacity(host).await {
            Ok(cores) => {
                debug!(host = %host, available_cores = cores, "capacity probed");
                cores
            }
            Err(reason) => {
                warn!(host = %host, reason = %reason, "capacity probe failed; assuming 1 slot");
                FAIL_OPEN_CAPACITY
            }
        }
    }
}

/// Probe reporting the same capacity for every host.
#[derive(Clone, Copy, Debug)]
pub struct FixedCapacity(pub u32);

#[async_trait]
impl CapacityProbe for FixedCapacity {
    async fn capacity(&self, _host: &str) -> u32 {
        self.0.max(FAIL_OPEN_CAPACITY)
    }
}

/// Feeds probed capacity into the admission limits of every known host.
#[derive(Clone)]
pub struct CapacityRefresher {
    probe: Arc<dyn CapacityProbe>,
    admission: HostAdmission,
    batch: BatchConfig,
}

impl fmt::Debug for CapacityRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityRefresher")
            .field("admission", &self.admission)
            .field("worker_processes", &self.batch.worker_processes)
            .finish()
    }
}

impl CapacityRefresher {
    /// Refresher installing limits from `probe` into `admission`.
    pub fn new(probe: Arc<dyn CapacityProbe>, admission: HostAdmission, batch: BatchConfig) -> Self {
        Self {
            probe,
            admission,
            batch,
        }
    }

    /// Probe a single host.
    pub async fn sample(&self, host: &str) -> HostCapacitySample {
        HostCapacitySample {
            host: host.to_string(),
            available_cores: self.probe.capacity(host).await.max(FAIL_OPEN_CAPACITY),
        }
    }

    /// Probe every host the admission counter knows and install new limits.
    pub async fn refresh_once(&self) -> Vec<HostCapacitySample> {
        let hosts = self.admission.known_hosts().await;
        let samples = join_all(hosts.iter().map(|host| self.sample(host))).await;

        for sample in &samples {
            let limit = self.batch.per_process_limit(sample.available_cores);
            self.admission.set_limit(&sample.host, limit).await;
            debug!(
                host = %sample.host,
                available_cores = sample.available_cores,
                limit,
                "admission limit refreshed"
            );
        }
        samples
    }

    /// Refresh every `interval` until `shutdown` fires.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "capacity refresher started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("capacity refresher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        self.refresh_once().await;
                    }
                }
            }
        })
    }
}

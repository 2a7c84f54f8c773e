//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rds_monitoring_mcp::monitoring::{
    Collaborators, InMemoryRdsBackend, LoadSampleQuery, MetricQuery, MetricSampleSource,
    MetricSeries, RdsMonitoringService, ServiceSettings, WaitEventSample,
};
use rds_monitoring_mcp::{Error, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub fn demo_fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("demo.json")
}

pub fn demo_backend() -> Arc<InMemoryRdsBackend> {
    Arc::new(InMemoryRdsBackend::from_json_file(demo_fixture_path()).unwrap())
}

pub fn writable_settings() -> ServiceSettings {
    ServiceSettings {
        readonly: false,
        ..Default::default()
    }
}

pub fn demo_service(settings: ServiceSettings) -> RdsMonitoringService {
    RdsMonitoringService::new(Collaborators::in_memory(demo_backend()), settings).unwrap()
}

/// Metric source that answers `Throttled` a fixed number of times before
/// delegating to the wrapped source.
pub struct ThrottlingSource {
    inner: Arc<dyn MetricSampleSource>,
    remaining_throttles: AtomicU32,
    calls: AtomicU32,
}

impl ThrottlingSource {
    pub fn new(inner: Arc<dyn MetricSampleSource>, throttles: u32) -> Self {
        Self {
            inner,
            remaining_throttles: AtomicU32::new(throttles),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn maybe_throttle(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let throttled = self
            .remaining_throttles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            Err(Error::Throttled("Rate exceeded".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetricSampleSource for ThrottlingSource {
    async fn fetch(&self, query: &MetricQuery) -> Result<MetricSeries> {
        self.maybe_throttle()?;
        self.inner.fetch(query).await
    }

    async fn fetch_load_samples(&self, query: &LoadSampleQuery) -> Result<Vec<WaitEventSample>> {
        self.maybe_throttle()?;
        self.inner.fetch_load_samples(query).await
    }
}

//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the seeder and transport report against.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{TelemetryError, TelemetryResult};

/// Outcome label recorded for each consumer transport decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    /// Content fetched from peers.
    Completed,
    /// Direct transfer chosen before any peer fetch.
    Fallback,
    /// Peer fetch attempted and failed.
    Failed,
    /// Manifest fetched directly and indexed.
    Manifest,
}

impl TransportOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Fallback => "fallback",
            Self::Failed => "failed",
            Self::Manifest => "manifest",
        }
    }
}

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    seeded_torrents: IntGauge,
    metadata_created_total: IntCounter,
    seed_evictions_total: IntCounter,
    scan_errors_total: IntCounter,
    transport_outcomes_total: IntCounterVec,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Objects currently advertised.
    pub seeded_torrents: i64,
    /// Metadata files created since start.
    pub metadata_created_total: u64,
    /// Seeded-set entries evicted under capacity pressure.
    pub seed_evictions_total: u64,
    /// Link entries skipped because of I/O or validation failures.
    pub scan_errors_total: u64,
}

fn collector<T>(name: &'static str, built: prometheus::Result<T>) -> TelemetryResult<T> {
    built.map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let seeded_torrents = collector(
            "seeded_torrents",
            IntGauge::with_opts(Opts::new(
                "seeded_torrents",
                "Objects currently advertised to peers",
            )),
        )?;
        let metadata_created_total = collector(
            "metadata_created_total",
            IntCounter::with_opts(Opts::new(
                "metadata_created_total",
                "Distribution metadata files created",
            )),
        )?;
        let seed_evictions_total = collector(
            "seed_evictions_total",
            IntCounter::with_opts(Opts::new(
                "seed_evictions_total",
                "Seeded entries evicted to honour the capacity limit",
            )),
        )?;
        let scan_errors_total = collector(
            "scan_errors_total",
            IntCounter::with_opts(Opts::new(
                "scan_errors_total",
                "Link entries skipped during directory scans",
            )),
        )?;
        let transport_outcomes_total = collector(
            "transport_outcomes_total",
            IntCounterVec::new(
                Opts::new(
                    "transport_outcomes_total",
                    "Consumer transport decisions by outcome",
                ),
                &["outcome"],
            ),
        )?;

        register(&registry, "seeded_torrents", &seeded_torrents)?;
        register(&registry, "metadata_created_total", &metadata_created_total)?;
        register(&registry, "seed_evictions_total", &seed_evictions_total)?;
        register(&registry, "scan_errors_total", &scan_errors_total)?;
        register(
            &registry,
            "transport_outcomes_total",
            &transport_outcomes_total,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                seeded_torrents,
                metadata_created_total,
                seed_evictions_total,
                scan_errors_total,
                transport_outcomes_total,
            }),
        })
    }

    /// Set the seeded-set gauge.
    pub fn set_seeded_torrents(&self, count: usize) {
        self.inner
            .seeded_torrents
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Increment the metadata creation counter.
    pub fn inc_metadata_created(&self) {
        self.inner.metadata_created_total.inc();
    }

    /// Increment the eviction counter.
    pub fn inc_seed_eviction(&self) {
        self.inner.seed_evictions_total.inc();
    }

    /// Increment the scan error counter.
    pub fn inc_scan_error(&self) {
        self.inner.scan_errors_total.inc();
    }

    /// Record a consumer transport outcome.
    pub fn inc_transport_outcome(&self, outcome: TransportOutcome) {
        self.inner
            .transport_outcomes_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Count recorded for a single transport outcome.
    #[must_use]
    pub fn transport_outcome_count(&self, outcome: TransportOutcome) -> u64 {
        self.inner
            .transport_outcomes_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            seeded_torrents: self.inner.seeded_torrents.get(),
            metadata_created_total: self.inner.metadata_created_total.get(),
            seed_evictions_total: self.inner.seed_evictions_total.get(),
            scan_errors_total: self.inner.scan_errors_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> TelemetryResult<()> {
        let metrics = Metrics::new()?;
        metrics.set_seeded_torrents(3);
        metrics.inc_metadata_created();
        metrics.inc_metadata_created();
        metrics.inc_seed_eviction();
        metrics.inc_scan_error();
        metrics.inc_transport_outcome(TransportOutcome::Fallback);
        metrics.inc_transport_outcome(TransportOutcome::Fallback);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.seeded_torrents, 3);
        assert_eq!(snapshot.metadata_created_total, 2);
        assert_eq!(snapshot.seed_evictions_total, 1);
        assert_eq!(snapshot.scan_errors_total, 1);
        assert_eq!(
            metrics.transport_outcome_count(TransportOutcome::Fallback),
            2
        );
        assert_eq!(
            metrics.transport_outcome_count(TransportOutcome::Completed),
            0
        );

        let rendered = metrics.render()?;
        assert!(rendered.contains("seeded_torrents 3"));
        assert!(rendered.contains("transport_outcomes_total{outcome=\"fallback\"} 2"));
        Ok(())
    }

    #[test]
    fn independent_registries_do_not_collide() -> TelemetryResult<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_seed_eviction();
        assert_eq!(second.snapshot().seed_evictions_total, 0);
        Ok(())
    }
}

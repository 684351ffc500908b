//! Control-plane usage measurement with selector fallback
//!
//! Scrape setups disagree on the pod label (`pod` vs `pod_name`) and on
//! whether container-level series exist, so the collector walks
//! [`SELECTOR_VARIANTS`] in order and keeps the first variant that returns
//! any data.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::client::MetricsBackend;
use crate::error::Error;
use crate::query::{
    Component, MetricKind, MetricQuery, Selector, SelectorVariant, Window, CPU_SERIES,
    MEMORY_SERIES, SELECTOR_VARIANTS,
};
use crate::snapshot::MetricsSnapshot;

/// Queries in flight per variant
pub const QUERY_CONCURRENCY: usize = 4;

/// Where the control plane runs and how far back to look
#[derive(Clone, Debug)]
pub struct MeasureTarget {
    /// Namespace of the control-plane pods
    pub namespace: String,
    /// Regex matching API server pod names
    pub apiserver_pod_regex: String,
    /// Regex matching etcd pod names
    pub etcd_pod_regex: String,
    /// Range window for rate / avg_over_time
    pub window: Window,
}

impl MeasureTarget {
    fn pod_regex(&self, component: Component) -> &str {
        match component {
            Component::Apiserver => &self.apiserver_pod_regex,
            Component::Etcd => &self.etcd_pod_regex,
        }
    }

    /// Query for `kind` under `variant`
    pub fn query(&self, kind: MetricKind, variant: SelectorVariant) -> MetricQuery {
        MetricQuery::for_metric(
            kind,
            &self.namespace,
            self.pod_regex(kind.component()),
            variant,
            &self.window,
        )
    }

    /// Series-count queries used to diagnose empty measurements
    pub fn preflight_queries(&self) -> [(&'static str, MetricQuery); 4] {
        let ns = || Selector::new().eq("namespace", &self.namespace);
        [
            ("series_count_ns_cpu", MetricQuery::count(CPU_SERIES, ns())),
            ("series_count_ns_mem", MetricQuery::count(MEMORY_SERIES, ns())),
            (
                "series_count_apiserver",
                MetricQuery::count(CPU_SERIES, ns().regex("pod", &self.apiserver_pod_regex)),
            ),
            (
                "series_count_etcd",
                MetricQuery::count(CPU_SERIES, ns().regex("pod", &self.etcd_pod_regex)),
            ),
        ]
    }
}

/// Takes [`MetricsSnapshot`]s of the control plane
pub struct MetricsCollector {
    backend: Arc<dyn MetricsBackend>,
    target: MeasureTarget,
}

impl MetricsCollector {
    /// Create a collector over `backend`
    pub fn new(backend: Arc<dyn MetricsBackend>, target: MeasureTarget) -> Self {
        Self { backend, target }
    }

    /// Measure all four metrics.
    ///
    /// Returns the first selector variant with any non-zero value, or an
    /// all-zero snapshot. Only an unreachable backend is an error.
    pub async fn measure(&self) -> Result<MetricsSnapshot, Error> {
        info!(
            namespace = %self.target.namespace,
            window = %self.target.window,
            "Measuring control-plane CPU and memory"
        );
        self.preflight().await;

        for variant in SELECTOR_VARIANTS {
            debug!(variant = %variant, "Trying selector variant");
            let snapshot = self.measure_variant(variant).await?;
            if !snapshot.is_all_zero() {
                info!(
                    variant = %variant,
                    apiserver_cpu_cores = snapshot.apiserver_cpu_cores,
                    apiserver_mem_bytes = snapshot.apiserver_mem_bytes,
                    etcd_cpu_cores = snapshot.etcd_cpu_cores,
                    etcd_mem_bytes = snapshot.etcd_mem_bytes,
                    "Measured control plane"
                );
                return Ok(snapshot);
            }
        }

        warn!("All selector variants returned zero; recording zeros");
        Ok(MetricsSnapshot::default())
    }

    async fn preflight(&self) {
        let mut counts = Vec::with_capacity(4);
        for (name, query) in self.target.preflight_queries() {
            match self.timed_query(name, &query).await {
                Ok(v) => counts.push(format!("{}={}", name, v)),
                Err(e) => {
                    warn!(query = name, error = %e, "Pre-flight series count failed");
                    return;
                }
            }
        }
        info!(counts = %counts.join(" "), "Pre-flight series counts");
    }

    async fn measure_variant(&self, variant: SelectorVariant) -> Result<MetricsSnapshot, Error> {
        let results: Vec<(MetricKind, Result<f64, Error>)> = stream::iter(MetricKind::ALL)
            .map(|kind| {
                let query = self.target.query(kind, variant);
                async move { (kind, self.timed_query(kind.key(), &query).await) }
            })
            .buffer_unordered(QUERY_CONCURRENCY)
            .collect()
            .await;

        let mut snapshot = MetricsSnapshot::default();
        for (kind, result) in results {
            match result {
                Ok(value) => snapshot.set(kind, value),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(metric = %kind, variant = %variant, error = %e, "Query failed; using 0");
                }
            }
        }
        Ok(snapshot)
    }

    async fn timed_query(&self, name: &str, query: &MetricQuery) -> Result<f64, Error> {
        let promql = query.render();
        debug!(query_name = name, query = %promql, "Issuing metrics query");
        let start = Instant::now();
        let result = self.backend.query(&promql).await;
        debug!(
            query_name = name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            value = ?result.as_ref().ok(),
            "Metrics query finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMetricsBackend;
    use std::sync::Mutex;

    fn target() -> MeasureTarget {
        MeasureTarget {
            namespace: "milo-system".into(),
            apiserver_pod_regex: "milo-apiserver.*".into(),
            etcd_pod_regex: "etcd.*".into(),
            window: "2m".parse().unwrap(),
        }
    }

    fn is_count(q: &str) -> bool {
        q.starts_with("count(")
    }

    #[tokio::test]
    async fn test_first_variant_with_data_wins() {
        let mut backend = MockMetricsBackend::new();
        backend.expect_query().returning(|q| {
            if is_count(q) {
                Ok(3.0)
            } else if q.contains("container_cpu") && q.contains("milo-apiserver") {
                Ok(0.75)
            } else {
                Ok(0.0)
            }
        });

        let collector = MetricsCollector::new(Arc::new(backend), target());
        let snap = collector.measure().await.unwrap();
        assert_eq!(snap.apiserver_cpu_cores, 0.75);
        assert_eq!(snap.etcd_mem_bytes, 0.0);
    }

    /// Story: a scrape config that only exposes `pod_name` without
    /// container-level series is found by the last variant, and the whole
    /// variant is returned.
    #[tokio::test]
    async fn story_fallback_reaches_last_variant() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();

        let mut backend = MockMetricsBackend::new();
        backend.expect_query().returning(move |q| {
            s.lock().unwrap().push(q.to_string());
            if is_count(q) {
                return Ok(0.0);
            }
            let last_variant = q.contains("pod_name=~") && !q.contains("container!=");
            if !last_variant {
                return Ok(0.0);
            }
            Ok(if q.contains("etcd") { 2.0 } else { 1.0 })
        });

        let collector = MetricsCollector::new(Arc::new(backend), target());
        let snap = collector.measure().await.unwrap();
        assert_eq!(
            snap,
            MetricsSnapshot {
                apiserver_cpu_cores: 1.0,
                apiserver_mem_bytes: 1.0,
                etcd_cpu_cores: 2.0,
                etcd_mem_bytes: 2.0,
            }
        );

        let queries = seen.lock().unwrap();
        assert_eq!(queries.iter().filter(|q| is_count(q)).count(), 4);
        assert_eq!(queries.iter().filter(|q| !is_count(q)).count(), 16);
    }

    #[tokio::test]
    async fn test_all_zero_returns_zero_snapshot() {
        let mut backend = MockMetricsBackend::new();
        backend.expect_query().times(20).returning(|_| Ok(0.0));

        let collector = MetricsCollector::new(Arc::new(backend), target());
        assert!(collector.measure().await.unwrap().is_all_zero());
    }

    #[tokio::test]
    async fn test_per_query_failure_degrades_to_zero() {
        let mut backend = MockMetricsBackend::new();
        backend.expect_query().returning(|q| {
            if is_count(q) {
                Err(Error::malformed("nope"))
            } else if q.contains("etcd") {
                Err(Error::QueryFailed {
                    status: "error".into(),
                    message: "bad_data".into(),
                })
            } else {
                Ok(4.0)
            }
        });

        let collector = MetricsCollector::new(Arc::new(backend), target());
        let snap = collector.measure().await.unwrap();
        assert_eq!(snap.apiserver_cpu_cores, 4.0);
        assert_eq!(snap.apiserver_mem_bytes, 4.0);
        assert_eq!(snap.etcd_cpu_cores, 0.0);
        assert_eq!(snap.etcd_mem_bytes, 0.0);
    }

    /// Story: an unreachable backend aborts the measurement, while the same
    /// failure during pre-flight is only logged
    #[tokio::test]
    async fn story_unreachable_backend_is_fatal() {
        let mut backend = MockMetricsBackend::new();
        backend.expect_query().returning(|_| {
            Err(Error::Unreachable {
                attempts: 6,
                message: "connection refused".into(),
            })
        });

        let collector = MetricsCollector::new(Arc::new(backend), target());
        let err = collector.measure().await.unwrap_err();
        assert!(err.is_fatal());
    }

    /// Story: a backend rejecting every query with 400 yields a zero
    /// snapshot instead of aborting the run
    #[tokio::test]
    async fn story_rejected_queries_read_as_zero() {
        use crate::client::{PrometheusClient, QUERY_PATH};
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        // One pre-flight count, then four queries per variant
        Mock::given(method("GET"))
            .and(path(QUERY_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"status":"error","errorType":"bad_data","error":"unknown function"}"#,
            ))
            .expect(17)
            .mount(&server)
            .await;

        let client = PrometheusClient::new(&server.uri()).unwrap();
        let collector = MetricsCollector::new(Arc::new(client), target());
        assert!(collector.measure().await.unwrap().is_all_zero());
    }

    #[test]
    fn test_preflight_queries() {
        let rendered: Vec<String> = target()
            .preflight_queries()
            .iter()
            .map(|(_, q)| q.render())
            .collect();
        assert_eq!(
            rendered,
            vec![
                r#"count(container_cpu_usage_seconds_total{namespace="milo-system"})"#,
                r#"count(container_memory_working_set_bytes{namespace="milo-system"})"#,
                r#"count(container_cpu_usage_seconds_total{namespace="milo-system",pod=~"milo-apiserver.*"})"#,
                r#"count(container_cpu_usage_seconds_total{namespace="milo-system",pod=~"etcd.*"})"#,
            ]
        );
    }
}

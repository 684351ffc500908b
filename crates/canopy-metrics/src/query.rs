//! Structured PromQL construction
//!
//! Queries are assembled from typed parts and rendered once, so label values
//! are always escaped and the selector variants stay an explicit list.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// cAdvisor CPU counter
pub const CPU_SERIES: &str = "container_cpu_usage_seconds_total";
/// cAdvisor memory gauge
pub const MEMORY_SERIES: &str = "container_memory_working_set_bytes";

/// Control-plane component being measured
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// The API server pods
    Apiserver,
    /// The etcd pods
    Etcd,
}

/// The four measured values
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// API server CPU, in cores
    ApiserverCpu,
    /// API server working set, in bytes
    ApiserverMem,
    /// etcd CPU, in cores
    EtcdCpu,
    /// etcd working set, in bytes
    EtcdMem,
}

impl MetricKind {
    /// All kinds in report order
    pub const ALL: [MetricKind; 4] = [
        MetricKind::ApiserverCpu,
        MetricKind::ApiserverMem,
        MetricKind::EtcdCpu,
        MetricKind::EtcdMem,
    ];

    /// Key used in snapshots and results files
    pub fn key(&self) -> &'static str {
        match self {
            MetricKind::ApiserverCpu => "apiserver_cpu_cores",
            MetricKind::ApiserverMem => "apiserver_mem_bytes",
            MetricKind::EtcdCpu => "etcd_cpu_cores",
            MetricKind::EtcdMem => "etcd_mem_bytes",
        }
    }

    /// Component the value belongs to
    pub fn component(&self) -> Component {
        match self {
            MetricKind::ApiserverCpu | MetricKind::ApiserverMem => Component::Apiserver,
            MetricKind::EtcdCpu | MetricKind::EtcdMem => Component::Etcd,
        }
    }

    fn is_cpu(&self) -> bool {
        matches!(self, MetricKind::ApiserverCpu | MetricKind::EtcdCpu)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Label carrying the pod name; older cAdvisor setups use `pod_name`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PodLabel {
    /// `pod`
    Pod,
    /// `pod_name`
    PodName,
}

impl PodLabel {
    /// Label name
    pub fn as_str(&self) -> &'static str {
        match self {
            PodLabel::Pod => "pod",
            PodLabel::PodName => "pod_name",
        }
    }
}

/// One way of selecting a component's series
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SelectorVariant {
    /// Label matched against the pod regex
    pub pod_label: PodLabel,
    /// Exclude the pod-level aggregate and pause-container series
    pub container_filter: bool,
}

/// Variants in the order they are tried
pub const SELECTOR_VARIANTS: [SelectorVariant; 4] = [
    SelectorVariant {
        pod_label: PodLabel::Pod,
        container_filter: true,
    },
    SelectorVariant {
        pod_label: PodLabel::Pod,
        container_filter: false,
    },
    SelectorVariant {
        pod_label: PodLabel::PodName,
        container_filter: true,
    },
    SelectorVariant {
        pod_label: PodLabel::PodName,
        container_filter: false,
    },
];

impl fmt::Display for SelectorVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "label={} filter={}",
            self.pod_label.as_str(),
            self.container_filter
        )
    }
}

/// Label match operator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOp {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    Regex,
}

impl MatchOp {
    fn as_str(&self) -> &'static str {
        match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::Regex => "=~",
        }
    }
}

/// A single `label<op>"value"` matcher
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Matcher {
    label: String,
    op: MatchOp,
    value: String,
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}\"{}\"",
            self.label,
            self.op.as_str(),
            escape_label_value(&self.value)
        )
    }
}

/// Escape a label value for a double-quoted PromQL string
pub fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

/// Ordered set of label matchers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    matchers: Vec<Matcher>,
}

impl Selector {
    /// Empty selector
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, label: &str, op: MatchOp, value: &str) -> Self {
        self.matchers.push(Matcher {
            label: label.to_string(),
            op,
            value: value.to_string(),
        });
        self
    }

    /// Add `label="value"`
    pub fn eq(self, label: &str, value: &str) -> Self {
        self.with(label, MatchOp::Equal, value)
    }

    /// Add `label!="value"`
    pub fn ne(self, label: &str, value: &str) -> Self {
        self.with(label, MatchOp::NotEqual, value)
    }

    /// Add `label=~"regex"`
    pub fn regex(self, label: &str, pattern: &str) -> Self {
        self.with(label, MatchOp::Regex, pattern)
    }

    /// Selector for a component's pods under the given variant
    pub fn for_pods(namespace: &str, pod_regex: &str, variant: SelectorVariant) -> Self {
        let selector = Self::new()
            .eq("namespace", namespace)
            .regex(variant.pod_label.as_str(), pod_regex);
        if variant.container_filter {
            selector.ne("container", "").ne("container", "POD")
        } else {
            selector
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, m) in self.matchers.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", m)?;
        }
        f.write_str("}")
    }
}

/// A validated PromQL range duration such as `2m` or `1h30m`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Window(String);

const DURATION_UNITS: [&str; 7] = ["ms", "s", "m", "h", "d", "w", "y"];

impl FromStr for Window {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::invalid_query("window", format!("'{}' is not a PromQL duration", s));
        if s.is_empty() {
            return Err(invalid());
        }

        let mut rest = s;
        while !rest.is_empty() {
            let digits = rest.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                return Err(invalid());
            }
            rest = &rest[digits..];
            // "ms" must be tried before "m" and "s"
            let unit = DURATION_UNITS
                .iter()
                .find(|u| rest.starts_with(*u))
                .ok_or_else(invalid)?;
            rest = &rest[unit.len()..];
        }
        Ok(Window(s.to_string()))
    }
}

impl Window {
    /// The duration text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregating expression over one series selector
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetricQuery {
    /// `sum(rate(series{sel}[window]))`
    SumRate {
        /// Series name
        series: &'static str,
        /// Label selector
        selector: Selector,
        /// Range window
        window: Window,
    },
    /// `sum(avg_over_time(series{sel}[window]))`
    SumAvgOverTime {
        /// Series name
        series: &'static str,
        /// Label selector
        selector: Selector,
        /// Range window
        window: Window,
    },
    /// `count(series{sel})`
    Count {
        /// Series name
        series: &'static str,
        /// Label selector
        selector: Selector,
    },
}

impl MetricQuery {
    /// Query for one measured value under a selector variant
    pub fn for_metric(
        kind: MetricKind,
        namespace: &str,
        pod_regex: &str,
        variant: SelectorVariant,
        window: &Window,
    ) -> Self {
        let selector = Selector::for_pods(namespace, pod_regex, variant);
        if kind.is_cpu() {
            MetricQuery::SumRate {
                series: CPU_SERIES,
                selector,
                window: window.clone(),
            }
        } else {
            MetricQuery::SumAvgOverTime {
                series: MEMORY_SERIES,
                selector,
                window: window.clone(),
            }
        }
    }

    /// Number of series matching `selector`
    pub fn count(series: &'static str, selector: Selector) -> Self {
        MetricQuery::Count { series, selector }
    }

    /// Rendered PromQL
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MetricQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricQuery::SumRate {
                series,
                selector,
                window,
            } => write!(f, "sum(rate({}{}[{}]))", series, selector, window),
            MetricQuery::SumAvgOverTime {
                series,
                selector,
                window,
            } => write!(f, "sum(avg_over_time({}{}[{}]))", series, selector, window),
            MetricQuery::Count { series, selector } => write!(f, "count({}{})", series, selector),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> Window {
        "2m".parse().unwrap()
    }

    #[test]
    fn test_cpu_query_with_container_filter() {
        let q = MetricQuery::for_metric(
            MetricKind::ApiserverCpu,
            "milo-system",
            "milo-apiserver.*",
            SELECTOR_VARIANTS[0],
            &window(),
        );
        assert_eq!(
            q.render(),
            r#"sum(rate(container_cpu_usage_seconds_total{namespace="milo-system",pod=~"milo-apiserver.*",container!="",container!="POD"}[2m]))"#
        );
    }

    #[test]
    fn test_memory_query_unfiltered_pod_name() {
        let q = MetricQuery::for_metric(
            MetricKind::EtcdMem,
            "milo-system",
            "etcd.*",
            SELECTOR_VARIANTS[3],
            &window(),
        );
        assert_eq!(
            q.render(),
            r#"sum(avg_over_time(container_memory_working_set_bytes{namespace="milo-system",pod_name=~"etcd.*"}[2m]))"#
        );
    }

    #[test]
    fn test_variant_order() {
        let order: Vec<(&str, bool)> = SELECTOR_VARIANTS
            .iter()
            .map(|v| (v.pod_label.as_str(), v.container_filter))
            .collect();
        assert_eq!(
            order,
            vec![
                ("pod", true),
                ("pod", false),
                ("pod_name", true),
                ("pod_name", false)
            ]
        );
    }

    #[test]
    fn test_label_values_are_escaped() {
        let sel = Selector::new().regex("pod", r#"etcd\d+"x"#);
        assert_eq!(sel.to_string(), r#"{pod=~"etcd\\d+\"x"}"#);
    }

    #[test]
    fn test_count_query() {
        let q = MetricQuery::count(CPU_SERIES, Selector::new().eq("namespace", "milo-system"));
        assert_eq!(
            q.render(),
            r#"count(container_cpu_usage_seconds_total{namespace="milo-system"})"#
        );
    }

    #[test]
    fn test_window_validation() {
        for ok in ["2m", "30s", "1h30m", "500ms", "1d", "2w"] {
            assert!(ok.parse::<Window>().is_ok(), "{ok} should parse");
        }
        for bad in ["", "2", "m", "2 m", "2min", "-1m", "2m]"] {
            assert!(bad.parse::<Window>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_metric_keys() {
        let keys: Vec<&str> = MetricKind::ALL.iter().map(MetricKind::key).collect();
        assert_eq!(
            keys,
            vec![
                "apiserver_cpu_cores",
                "apiserver_mem_bytes",
                "etcd_cpu_cores",
                "etcd_mem_bytes"
            ]
        );
        assert_eq!(MetricKind::EtcdCpu.component(), Component::Etcd);
    }
}

//! Run results and the files published from them
//!
//! [`RunResults`] is what the run produced; [`render_html`] renders it and
//! [`write_outputs`] drops `results.json`, `report.html` and `meta.txt`
//! into the output directory.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use canopy_metrics::{MetricKind, MetricsSnapshot};
use canopy_provision::ObjectCounts;

use crate::Result;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Snapshots taken at each phase boundary
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub baseline: MetricsSnapshot,
    pub after_projects: MetricsSnapshot,
    /// Absent when the object phase was skipped
    pub after_objects: Option<MetricsSnapshot>,
}

/// Objects ensured during the object phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTotals {
    pub secrets: usize,
    pub configmaps: usize,
    pub already_existed: usize,
}

impl From<ObjectCounts> for ObjectTotals {
    fn from(counts: ObjectCounts) -> Self {
        Self {
            secrets: counts.secrets,
            configmaps: counts.configmaps,
            already_existed: counts.already_existed,
        }
    }
}

/// Everything a finished run reports
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub test_id: String,
    pub timestamp: DateTime<Utc>,
    pub org_name: String,
    pub phase: String,
    pub num_projects: usize,
    pub num_secrets_per_project: usize,
    pub num_configmaps_per_project: usize,
    /// Time spent waiting for every project to turn Ready
    pub projects_ready_seconds: f64,
    /// Time from the first project create to the last Ready
    pub projects_total_seconds: f64,
    pub objects: Option<ObjectTotals>,
    pub metrics: PhaseMetrics,
}

impl RunResults {
    /// Pretty JSON as written to `results.json`
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Content of `meta.txt`
    pub fn meta(&self) -> String {
        format!("test_id={}\norg_name={}\n", self.test_id, self.org_name)
    }
}

/// Average change per project between two snapshots
fn per_project(later: &MetricsSnapshot, earlier: &MetricsSnapshot, projects: usize) -> MetricsSnapshot {
    let delta = later.delta(earlier);
    if projects == 0 {
        return MetricsSnapshot::default();
    }
    let mut out = MetricsSnapshot::default();
    for kind in MetricKind::ALL {
        out.set(kind, delta.get(kind) / projects as f64);
    }
    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn metric_cells(s: &MetricsSnapshot) -> String {
    format!(
        "<td>{:.4}</td><td>{:.4}</td><td>{:.2}</td><td>{:.2}</td>",
        s.apiserver_cpu_cores,
        s.etcd_cpu_cores,
        s.apiserver_mem_bytes / BYTES_PER_MB,
        s.etcd_mem_bytes / BYTES_PER_MB
    )
}

fn delta_card(title: &str, d: &MetricsSnapshot) -> String {
    format!(
        r#"<div class="card"><div class="card-title">{title}</div><div class="kpis">
<div class="kpi"><div class="kpi-label">CPU apiserver</div><div class="kpi-value">{:+.4} cores</div></div>
<div class="kpi"><div class="kpi-label">CPU etcd</div><div class="kpi-value">{:+.4} cores</div></div>
<div class="kpi"><div class="kpi-label">MEM apiserver</div><div class="kpi-value">{:+.2} MB</div></div>
<div class="kpi"><div class="kpi-label">MEM etcd</div><div class="kpi-value">{:+.2} MB</div></div>
</div></div>
"#,
        d.apiserver_cpu_cores,
        d.etcd_cpu_cores,
        d.apiserver_mem_bytes / BYTES_PER_MB,
        d.etcd_mem_bytes / BYTES_PER_MB
    )
}

/// Self-contained HTML summary of a run
pub fn render_html(results: &RunResults) -> String {
    let m = &results.metrics;
    let per_project_s = if results.num_projects > 0 {
        results.projects_ready_seconds / results.num_projects as f64
    } else {
        0.0
    };

    let mut rows = String::new();
    let mut phases = vec![("baseline", &m.baseline), ("after-projects", &m.after_projects)];
    if let Some(after) = &m.after_objects {
        phases.push(("after-objects", after));
    }
    for (label, snapshot) in phases {
        // Writing to a String cannot fail
        let _ = writeln!(rows, "<tr><td>{}</td>{}</tr>", label, metric_cells(snapshot));
    }

    let mut cards = delta_card(
        "After projects (per-project deltas)",
        &per_project(&m.after_projects, &m.baseline, results.num_projects),
    );
    if let Some(after) = &m.after_objects {
        cards.push_str(&delta_card(
            "After objects (per-project deltas)",
            &per_project(after, &m.after_projects, results.num_projects),
        ));
    }

    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8" />
<title>Milo Performance Report</title>
<style>
body {{ font-family: -apple-system, "Segoe UI", Roboto, Arial, sans-serif; color: #1f2937; margin: 24px; }}
.subtitle {{ color: #6b7280; margin-bottom: 20px; }}
table {{ border-collapse: collapse; margin: 16px 0; }}
td, th {{ border: 1px solid #e5e7eb; padding: 4px 10px; text-align: right; }}
.card {{ border: 1px solid #e5e7eb; border-radius: 8px; padding: 12px; margin: 12px 0; }}
.card-title {{ font-weight: 600; margin-bottom: 8px; }}
.kpis {{ display: grid; grid-template-columns: repeat(4, minmax(120px, 1fr)); gap: 8px; }}
.kpi {{ background: #f9fafb; border-radius: 6px; padding: 8px; }}
.kpi-label {{ color: #6b7280; font-size: 12px; }}
.kpi-value {{ font-weight: 600; }}
</style>
</head>
<body>
<h1>Milo Performance Report</h1>
<div class="subtitle">Test {test_id} &bull; Organization {org} &bull; Projects: {projects} &bull; Time to Ready: {ready:.1}s ({per_project_s:.2}s/project)</div>
<table>
<tr><th>phase</th><th>CPU apiserver (cores)</th><th>CPU etcd (cores)</th><th>MEM apiserver (MB)</th><th>MEM etcd (MB)</th></tr>
{rows}</table>
{cards}</body>
</html>
"#,
        test_id = escape_html(&results.test_id),
        org = escape_html(&results.org_name),
        projects = results.num_projects,
        ready = results.projects_ready_seconds,
    )
}

/// Write `results.json`, `report.html` and `meta.txt` into `dir`
pub async fn write_outputs(dir: &Path, results: &RunResults, html: &str) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join("results.json"), results.to_json()?).await?;
    tokio::fs::write(dir.join("report.html"), html).await?;
    tokio::fs::write(dir.join("meta.txt"), results.meta()).await?;
    Ok(())
}

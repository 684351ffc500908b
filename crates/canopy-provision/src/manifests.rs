//! Manifests for the objects a run creates

use serde_json::{json, Value};

use canopy_common::resources::ResourceKind;
use canopy_common::run::{configmap_name, secret_name, TestRun};
use canopy_common::PROJECT_OBJECT_NAMESPACE;

fn metadata(run: &TestRun, name: &str, namespaced: bool) -> Value {
    let mut meta = json!({
        "name": name,
        "labels": run.labels(),
    });
    if namespaced {
        meta["namespace"] = Value::String(PROJECT_OBJECT_NAMESPACE.to_string());
    }
    meta
}

/// The run's Organization
pub fn organization(run: &TestRun) -> Value {
    let kind = ResourceKind::Organization;
    json!({
        "apiVersion": kind.api_version(),
        "kind": kind.kind(),
        "metadata": metadata(run, run.org_name(), false),
        "spec": {"type": "Standard"},
    })
}

/// A Project owned by the run's Organization
pub fn project(run: &TestRun, name: &str) -> Value {
    let kind = ResourceKind::Project;
    json!({
        "apiVersion": kind.api_version(),
        "kind": kind.kind(),
        "metadata": metadata(run, name, false),
        "spec": {
            "ownerRef": {
                "kind": ResourceKind::Organization.kind(),
                "name": run.org_name(),
            }
        },
    })
}

/// The `index`-th Secret (1-based) inside `project`
pub fn secret(run: &TestRun, project: &str, index: usize) -> Value {
    let kind = ResourceKind::Secret;
    json!({
        "apiVersion": kind.api_version(),
        "kind": kind.kind(),
        "metadata": metadata(run, &secret_name(index), true),
        "type": "Opaque",
        "stringData": {"note": format!("secret {} for {}", index, project)},
    })
}

/// The `index`-th ConfigMap (1-based) inside `project`
pub fn configmap(run: &TestRun, project: &str, index: usize) -> Value {
    let kind = ResourceKind::ConfigMap;
    json!({
        "apiVersion": kind.api_version(),
        "kind": kind.kind(),
        "metadata": metadata(run, &configmap_name(index), true),
        "data": {"note": format!("configmap {} for {}", index, project)},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> TestRun {
        TestRun::new(Some("abcd1234".into()), Some("acme".into()))
    }

    #[test]
    fn test_organization_manifest() {
        let body = organization(&run());
        assert_eq!(body["apiVersion"], "resourcemanager.miloapis.com/v1alpha1");
        assert_eq!(body["kind"], "Organization");
        assert_eq!(body["metadata"]["name"], "acme");
        assert_eq!(body["metadata"]["labels"]["app"], "milo-perf");
        assert_eq!(body["metadata"]["labels"]["test-id"], "abcd1234");
        assert!(body["metadata"].get("namespace").is_none());
        assert_eq!(body["spec"]["type"], "Standard");
    }

    #[test]
    fn test_project_manifest_points_at_org() {
        let body = project(&run(), "acme-p-001");
        assert_eq!(body["metadata"]["name"], "acme-p-001");
        assert_eq!(body["spec"]["ownerRef"]["kind"], "Organization");
        assert_eq!(body["spec"]["ownerRef"]["name"], "acme");
    }

    #[test]
    fn test_object_manifests() {
        let s = secret(&run(), "acme-p-002", 7);
        assert_eq!(s["metadata"]["name"], "perf-secret-007");
        assert_eq!(s["metadata"]["namespace"], "default");
        assert_eq!(s["type"], "Opaque");
        assert_eq!(s["stringData"]["note"], "secret 7 for acme-p-002");

        let c = configmap(&run(), "acme-p-002", 12);
        assert_eq!(c["apiVersion"], "v1");
        assert_eq!(c["metadata"]["name"], "perf-configmap-012");
        assert_eq!(c["data"]["note"], "configmap 12 for acme-p-002");
        assert_eq!(c["metadata"]["labels"]["test-id"], "abcd1234");
    }
}

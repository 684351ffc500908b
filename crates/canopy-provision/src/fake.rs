//! In-memory control plane and record store
//!
//! Lets the orchestrator run end to end without a cluster. Organizations
//! and Projects are cluster-wide; Secrets and ConfigMaps live in the scope
//! (descriptor name) they were created through. Every call is recorded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use canopy_common::kubeconfig::ConnectionDescriptor;
use canopy_common::resources::{ResourceKind, ResourceRef};
use canopy_common::{Error, Result};

use crate::checkpoint::{RecordData, RecordStore};
use crate::client::{ClientFactory, ControlPlane};

/// Kind of call made against the fake
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// `create`
    Create,
    /// `get`
    Get,
    /// `list`
    List,
    /// `delete`
    Delete,
}

/// One recorded call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    /// Descriptor name the call went through
    pub scope: String,
    /// Operation
    pub op: Op,
    /// Resource kind
    pub kind: ResourceKind,
    /// Object name; empty for list
    pub name: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, ResourceKind, String), Value>,
    calls: Vec<Call>,
    preexisting: BTreeSet<(ResourceKind, String)>,
    never_ready: BTreeSet<String>,
    create_failures: BTreeMap<(ResourceKind, String), u16>,
}

/// Shared in-memory cluster; also the [`ClientFactory`] handing out scopes
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<State>>,
}

impl FakeControlPlane {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic in another test thread must not hide this test's result
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make creates of `kind/name` answer 409 as if left over from an
    /// earlier attempt
    pub fn seed_existing(&self, kind: ResourceKind, name: &str) {
        self.lock().preexisting.insert((kind, name.to_string()));
    }

    /// Make the named project never report Ready
    pub fn never_ready(&self, project: &str) {
        self.lock().never_ready.insert(project.to_string());
    }

    /// Make creates of `kind/name` fail with `code`
    pub fn fail_create(&self, kind: ResourceKind, name: &str, code: u16) {
        self.lock()
            .create_failures
            .insert((kind, name.to_string()), code);
    }

    /// Every call so far
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls of `op` on `kind`
    pub fn count(&self, op: Op, kind: ResourceKind) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op && c.kind == kind)
            .count()
    }

    /// Names of stored objects of `kind`, across scopes
    pub fn stored(&self, kind: ResourceKind) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Scope under which `kind` objects are keyed
    fn storage_scope(kind: ResourceKind, scope: &str) -> String {
        if kind.is_namespaced() {
            scope.to_string()
        } else {
            String::new()
        }
    }
}

#[async_trait]
impl ClientFactory for FakeControlPlane {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn ControlPlane>> {
        Ok(Arc::new(FakeScope {
            cluster: self.clone(),
            scope: descriptor.name().to_string(),
        }))
    }
}

/// A [`FakeControlPlane`] seen through one descriptor
pub struct FakeScope {
    cluster: FakeControlPlane,
    scope: String,
}

impl FakeScope {
    fn record(&self, state: &mut State, op: Op, kind: ResourceKind, name: &str) {
        state.calls.push(Call {
            scope: self.scope.clone(),
            op,
            kind,
            name: name.to_string(),
        });
    }
}

fn labels_match(obj: &Value, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => obj
                .pointer("/metadata/labels")
                .and_then(|labels| labels.get(k))
                .and_then(Value::as_str)
                == Some(v),
            None => false,
        })
}

#[async_trait]
impl ControlPlane for FakeScope {
    async fn create(&self, kind: ResourceKind, body: &Value) -> Result<()> {
        let name = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::serialization_for_kind(kind.kind(), "manifest has no name"))?
            .to_string();

        let mut state = self.cluster.lock();
        self.record(&mut state, Op::Create, kind, &name);

        if let Some(code) = state.create_failures.get(&(kind, name.clone())) {
            return Err(Error::api(*code, format!("injected failure for {}", name)));
        }
        let key = (FakeControlPlane::storage_scope(kind, &self.scope), kind, name.clone());
        let seeded = state.preexisting.contains(&(kind, name.clone()));
        if seeded || state.objects.contains_key(&key) {
            if seeded {
                state.objects.entry(key).or_insert_with(|| body.clone());
            }
            return Err(Error::Api {
                code: 409,
                reason: "AlreadyExists".to_string(),
                body: format!("{} \"{}\" already exists", kind.plural(), name),
            });
        }
        state.objects.insert(key, body.clone());
        Ok(())
    }

    async fn get(&self, resource: &ResourceRef) -> Result<Value> {
        let mut state = self.cluster.lock();
        self.record(&mut state, Op::Get, resource.kind, &resource.name);

        let key = (
            FakeControlPlane::storage_scope(resource.kind, &self.scope),
            resource.kind,
            resource.name.clone(),
        );
        let Some(obj) = state.objects.get(&key) else {
            return Err(Error::api(404, format!("{} not found", resource)));
        };

        let mut obj = obj.clone();
        let ready = !state.never_ready.contains(&resource.name);
        obj["status"] = json!({
            "conditions": [{
                "type": "Ready",
                "status": if ready { "True" } else { "False" },
                "reason": if ready { "Ready" } else { "Provisioning" },
                "message": "",
            }]
        });
        Ok(obj)
    }

    async fn list(&self, kind: ResourceKind, label_selector: &str) -> Result<Vec<String>> {
        let mut state = self.cluster.lock();
        self.record(&mut state, Op::List, kind, "");

        let scope = FakeControlPlane::storage_scope(kind, &self.scope);
        Ok(state
            .objects
            .iter()
            .filter(|((s, k, _), obj)| *s == scope && *k == kind && labels_match(obj, label_selector))
            .map(|((_, _, name), _)| name.clone())
            .collect())
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<()> {
        let mut state = self.cluster.lock();
        self.record(&mut state, Op::Delete, resource.kind, &resource.name);

        let key = (
            FakeControlPlane::storage_scope(resource.kind, &self.scope),
            resource.kind,
            resource.name.clone(),
        );
        match state.objects.remove(&key) {
            Some(_) => {
                state.preexisting.remove(&(resource.kind, resource.name.clone()));
                Ok(())
            }
            None => Err(Error::api(404, format!("{} not found", resource))),
        }
    }
}

/// In-memory [`RecordStore`] keeping every write
#[derive(Clone, Default)]
pub struct FakeRecordStore {
    inner: Arc<Mutex<(BTreeMap<String, RecordData>, Vec<RecordData>)>>,
}

impl FakeRecordStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, (BTreeMap<String, RecordData>, Vec<RecordData>)> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current content of a record
    pub fn current(&self, name: &str) -> Option<RecordData> {
        self.lock().0.get(name).cloned()
    }

    /// Every payload written, in order
    pub fn history(&self) -> Vec<RecordData> {
        self.lock().1.clone()
    }
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn get(&self, name: &str) -> Result<Option<RecordData>> {
        Ok(self.current(name))
    }

    async fn create(&self, name: &str, data: RecordData) -> Result<()> {
        let mut guard = self.lock();
        if guard.0.contains_key(name) {
            return Err(Error::api(409, format!("configmaps \"{}\" already exists", name)));
        }
        guard.1.push(data.clone());
        guard.0.insert(name.to_string(), data);
        Ok(())
    }

    async fn replace(&self, name: &str, data: RecordData) -> Result<()> {
        let mut guard = self.lock();
        if !guard.0.contains_key(name) {
            return Err(Error::api(404, format!("configmaps \"{}\" not found", name)));
        }
        guard.1.push(data.clone());
        guard.0.insert(name.to_string(), data);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.lock().0.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::api(404, format!("configmaps \"{}\" not found", name))),
        }
    }
}

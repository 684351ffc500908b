//! Control-plane client abstraction
//!
//! The provisioner, poller and cleanup engine only need create/get/list/delete
//! on four kinds, so they talk to a [`ControlPlane`] trait object. Every
//! scope (base, organization, project) gets its own instance from a
//! [`ClientFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::debug;

use canopy_common::kube_utils::client_for_descriptor;
use canopy_common::kubeconfig::ConnectionDescriptor;
use canopy_common::resources::{ResourceKind, ResourceRef};
use canopy_common::{Error, Result, PROJECT_OBJECT_NAMESPACE};

/// Create/get/list/delete against one control-plane scope
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create an object from a full manifest (`apiVersion`, `kind`, `metadata`, ...)
    ///
    /// A 409 is returned as an [`Error::Api`] with code 409.
    async fn create(&self, kind: ResourceKind, body: &Value) -> Result<()>;

    /// Fetch an object as JSON
    async fn get(&self, resource: &ResourceRef) -> Result<Value>;

    /// Names of objects of `kind` matching a label selector.
    ///
    /// Namespaced kinds are listed in the project object namespace.
    async fn list(&self, kind: ResourceKind, label_selector: &str) -> Result<Vec<String>>;

    /// Delete an object
    async fn delete(&self, resource: &ResourceRef) -> Result<()>;
}

/// Opens a [`ControlPlane`] for a connection descriptor
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Connect to the scope described by `descriptor`
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn ControlPlane>>;
}

/// [`ControlPlane`] backed by a kube-rs client
pub struct KubeControlPlane {
    client: Client,
    scope: String,
}

impl KubeControlPlane {
    /// Wrap a kube client; `scope` names the descriptor in logs
    pub fn new(client: Client, scope: impl Into<String>) -> Self {
        Self {
            client,
            scope: scope.into(),
        }
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        if kind.is_namespaced() {
            let ns = namespace.unwrap_or(PROJECT_OBJECT_NAMESPACE);
            Api::namespaced_with(self.client.clone(), ns, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }
}

/// Decode a manifest into a dynamic object
pub fn to_dynamic_object(kind: ResourceKind, body: &Value) -> Result<DynamicObject> {
    let obj: DynamicObject = serde_json::from_value(body.clone())
        .map_err(|e| Error::serialization_for_kind(kind.kind(), e.to_string()))?;
    if obj.metadata.name.as_deref().unwrap_or_default().is_empty() {
        return Err(Error::serialization_for_kind(
            kind.kind(),
            "manifest has no metadata.name",
        ));
    }
    Ok(obj)
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn create(&self, kind: ResourceKind, body: &Value) -> Result<()> {
        let obj = to_dynamic_object(kind, body)?;
        let api = self.api(kind, obj.metadata.namespace.as_deref());
        api.create(&PostParams::default(), &obj).await?;
        debug!(
            scope = %self.scope,
            kind = %kind,
            name = obj.metadata.name.as_deref().unwrap_or_default(),
            "Created object"
        );
        Ok(())
    }

    async fn get(&self, resource: &ResourceRef) -> Result<Value> {
        let api = self.api(resource.kind, resource.namespace.as_deref());
        let obj = api.get(&resource.name).await?;
        serde_json::to_value(&obj)
            .map_err(|e| Error::serialization_for_kind(resource.kind.kind(), e.to_string()))
    }

    async fn list(&self, kind: ResourceKind, label_selector: &str) -> Result<Vec<String>> {
        let api = self.api(kind, None);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|o| o.metadata.name)
            .collect())
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<()> {
        let api = self.api(resource.kind, resource.namespace.as_deref());
        api.delete(&resource.name, &DeleteParams::default()).await?;
        debug!(scope = %self.scope, resource = %resource, "Deleted object");
        Ok(())
    }
}

/// Factory building [`KubeControlPlane`]s from descriptors
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeClientFactory;

#[async_trait]
impl ClientFactory for KubeClientFactory {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn ControlPlane>> {
        let client = client_for_descriptor(descriptor).await?;
        Ok(Arc::new(KubeControlPlane::new(client, descriptor.name())))
    }
}

//! The four resource kinds a run touches, and references to instances

use std::fmt;

use kube::api::{ApiResource, GroupVersionKind};

use crate::kubeconfig::{RESOURCE_MANAGER_GROUP, RESOURCE_MANAGER_VERSION};
use crate::PROJECT_OBJECT_NAMESPACE;

/// Resource kinds managed by canopy
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// Top-level tenant (cluster-scoped)
    Organization,
    /// Child of an organization (cluster-scoped)
    Project,
    /// Core Secret inside a project
    Secret,
    /// Core ConfigMap inside a project
    ConfigMap,
}

impl ResourceKind {
    /// API group; empty for core kinds
    pub fn group(&self) -> &'static str {
        match self {
            Self::Organization | Self::Project => RESOURCE_MANAGER_GROUP,
            Self::Secret | Self::ConfigMap => "",
        }
    }

    /// API version within the group
    pub fn version(&self) -> &'static str {
        match self {
            Self::Organization | Self::Project => RESOURCE_MANAGER_VERSION,
            Self::Secret | Self::ConfigMap => "v1",
        }
    }

    /// `apiVersion` field value
    pub fn api_version(&self) -> String {
        match self.group() {
            "" => self.version().to_string(),
            group => format!("{}/{}", group, self.version()),
        }
    }

    /// `kind` field value
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Organization => "Organization",
            Self::Project => "Project",
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
        }
    }

    /// Plural resource name used in URLs
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Organization => "organizations",
            Self::Project => "projects",
            Self::Secret => "secrets",
            Self::ConfigMap => "configmaps",
        }
    }

    /// Whether instances live in a namespace
    pub fn is_namespaced(&self) -> bool {
        matches!(self, Self::Secret | Self::ConfigMap)
    }

    /// Dynamic API resource for `Api<DynamicObject>`
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind {
            group: self.group().to_string(),
            version: self.version().to_string(),
            kind: self.kind().to_string(),
        };
        ApiResource::from_gvk_with_plural(&gvk, self.plural())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// A named instance of a [`ResourceKind`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Kind of the resource
    pub kind: ResourceKind,
    /// Object name
    pub name: String,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// Reference to a cluster-scoped or default-namespaced object.
    ///
    /// Namespaced kinds land in the project object namespace.
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        let namespace = kind
            .is_namespaced()
            .then(|| PROJECT_OBJECT_NAMESPACE.to_string());
        Self {
            kind,
            name: name.into(),
            namespace,
        }
    }

    /// Reference to an Organization
    pub fn organization(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Organization, name)
    }

    /// Reference to a Project
    pub fn project(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Project, name)
    }

    /// Reference to a Secret in the project object namespace
    pub fn secret(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Secret, name)
    }

    /// Reference to a ConfigMap in the project object namespace
    pub fn config_map(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::ConfigMap, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.plural(), self.name)
    }
}

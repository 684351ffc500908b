//! Connection descriptors and scoped derivation
//!
//! A [`ConnectionDescriptor`] is a parsed kubeconfig document. The control
//! plane exposes every organization and project as a nested API rooted under
//! the parent's path, so talking to a project means pointing the same
//! credentials at `{server}{scope_path}`. Derivation is a pure transform on a
//! deep copy; the base descriptor is shared read-only between workers.

use std::fmt;
use std::path::Path;

use serde_json::Value;

use crate::{Error, Result};

/// API group of the resource-manager kinds
pub const RESOURCE_MANAGER_GROUP: &str = "resourcemanager.miloapis.com";

/// API version of the resource-manager kinds
pub const RESOURCE_MANAGER_VERSION: &str = "v1alpha1";

/// Sub-API path of an organization's control plane
pub fn organization_scope(org_name: &str) -> String {
    format!(
        "/apis/{}/{}/organizations/{}/control-plane",
        RESOURCE_MANAGER_GROUP, RESOURCE_MANAGER_VERSION, org_name
    )
}

/// Sub-API path of a project's control plane
pub fn project_scope(project_name: &str) -> String {
    format!(
        "/apis/{}/{}/projects/{}/control-plane",
        RESOURCE_MANAGER_GROUP, RESOURCE_MANAGER_VERSION, project_name
    )
}

/// Credentials and endpoint for one control-plane scope.
///
/// Immutable: every transformation returns a new descriptor.
#[derive(Clone, PartialEq)]
pub struct ConnectionDescriptor {
    name: String,
    document: Value,
}

impl fmt::Debug for ConnectionDescriptor {
    // Never print the document: it carries tokens and client keys.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("name", &self.name)
            .field("server", &self.server())
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Build a descriptor from a parsed kubeconfig document.
    ///
    /// Requires at least one cluster, and every cluster needs a server URL.
    pub fn from_document(document: Value) -> Result<Self> {
        let clusters = document
            .get("clusters")
            .and_then(Value::as_array)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::config_for_field("clusters", "kubeconfig has no clusters"))?;

        for (i, cluster) in clusters.iter().enumerate() {
            if cluster.pointer("/cluster/server").and_then(Value::as_str).is_none() {
                return Err(Error::config_for_field(
                    format!("clusters[{}].cluster.server", i),
                    "cluster entry has no server URL",
                ));
            }
        }

        let name = document
            .get("current-context")
            .and_then(Value::as_str)
            .or_else(|| clusters[0].get("name").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        Ok(Self { name, document })
    }

    /// Parse a kubeconfig YAML string
    pub fn from_yaml(input: &str) -> Result<Self> {
        Self::from_document(crate::yaml::parse_yaml_mapping(input, "kubeconfig")?)
    }

    /// Read and parse a kubeconfig file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config_for_field(
                "kubeconfig",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_yaml(&contents)
    }

    /// Descriptor name (the current context)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server URL of the first cluster
    pub fn server(&self) -> Option<&str> {
        self.document
            .pointer("/clusters/0/cluster/server")
            .and_then(Value::as_str)
    }

    /// Name of the first user entry
    pub fn user(&self) -> Option<&str> {
        self.document
            .pointer("/users/0/name")
            .and_then(Value::as_str)
    }

    /// The underlying kubeconfig document
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Copy of this descriptor whose first user authenticates with `token`.
    pub fn with_bearer_token(&self, token: &str) -> Result<Self> {
        let mut document = self.document.clone();
        let user = document
            .pointer_mut("/users/0")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| Error::config_for_field("users", "kubeconfig has no users"))?;
        let entry = user
            .entry("user")
            .or_insert_with(|| Value::Object(Default::default()));
        let Some(fields) = entry.as_object_mut() else {
            return Err(Error::config_for_field("users[0].user", "user entry is not a mapping"));
        };
        fields.insert("token".to_string(), Value::String(token.to_string()));

        Ok(Self {
            name: self.name.clone(),
            document,
        })
    }

    /// Derive a descriptor for a nested control plane.
    ///
    /// Every cluster's server gets `scope_path` appended and every cluster and
    /// context is renamed to `new_name`. `self` is left untouched.
    pub fn derive(&self, scope_path: &str, new_name: &str) -> Result<Self> {
        if !scope_path.starts_with('/') {
            return Err(Error::config_for_field(
                "scope_path",
                format!("scope path '{}' must start with '/'", scope_path),
            ));
        }
        if new_name.is_empty() {
            return Err(Error::config_for_field("name", "derived descriptor name is empty"));
        }

        let mut document = self.document.clone();

        if let Some(clusters) = document.get_mut("clusters").and_then(Value::as_array_mut) {
            for cluster in clusters {
                let server = cluster
                    .pointer("/cluster/server")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::config_for_field("cluster.server", "cluster entry has no server URL")
                    })?
                    .trim_end_matches('/')
                    .to_string();
                cluster["name"] = Value::String(new_name.to_string());
                cluster["cluster"]["server"] = Value::String(format!("{}{}", server, scope_path));
            }
        }

        if let Some(contexts) = document.get_mut("contexts").and_then(Value::as_array_mut) {
            for context in contexts {
                context["name"] = Value::String(new_name.to_string());
                if let Some(inner) = context.get_mut("context").and_then(Value::as_object_mut) {
                    inner.insert("cluster".to_string(), Value::String(new_name.to_string()));
                }
            }
        }

        if document.get("current-context").is_some() {
            document["current-context"] = Value::String(new_name.to_string());
        }

        Ok(Self {
            name: new_name.to_string(),
            document,
        })
    }

    /// Descriptor for an organization's control plane
    pub fn for_organization(&self, org_name: &str) -> Result<Self> {
        self.derive(
            &organization_scope(org_name),
            &format!("organization-{}", org_name),
        )
    }

    /// Descriptor for a project's control plane
    pub fn for_project(&self, project_name: &str) -> Result<Self> {
        self.derive(
            &project_scope(project_name),
            &format!("project-{}", project_name),
        )
    }
}

//! esk core types: the watched resource, its change events and reconcile outcomes.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod objects;

pub use objects::{
    DependentObjectSpec, DeploymentSpec, EnvVar, ObjectKind, PodTemplate, PortSpec, ServiceAccountSpec, ServiceSpec,
};

/// Namespace assumed when the platform omits `metadata.namespace`.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Requested topology, one replica count per node role.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default)]
    pub data_nodes: u32,
    #[serde(default)]
    pub client_nodes: u32,
    #[serde(default)]
    pub master_nodes: u32,
}

impl ResourceSpec {
    pub fn count(&self, role: NodeRole) -> u32 {
        match role {
            NodeRole::Master => self.master_nodes,
            NodeRole::Data => self.data_nodes,
            NodeRole::Client => self.client_nodes,
        }
    }

    pub fn is_empty(&self) -> bool {
        NodeRole::ALL.iter().all(|r| self.count(*r) == 0)
    }
}

/// Node roles of the search cluster, in the order their workloads are built.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Data,
    Client,
}

impl NodeRole {
    pub const ALL: [NodeRole; 3] = [NodeRole::Master, NodeRole::Data, NodeRole::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Data => "data",
            NodeRole::Client => "client",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The declarative object being watched. Identity is `(namespace, name)`.
///
/// Encodes and decodes the platform's object shape
/// (`{apiVersion, kind, metadata: {name, namespace}, spec}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawResource", into = "RawResource")]
pub struct ManagedResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub resource_version: Option<String>,
    pub spec: ResourceSpec,
}

impl ManagedResource {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// A resource is only meaningful when at least one role has replicas.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.spec.is_empty() {
            return Err(ValidationError::NoNodes { key: self.key() });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResource {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: RawMeta,
    #[serde(default)]
    spec: ResourceSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_version: Option<String>,
}

impl TryFrom<RawResource> for ManagedResource {
    type Error = ResourceError;

    fn try_from(raw: RawResource) -> Result<Self, Self::Error> {
        let name = raw.metadata.name.filter(|n| !n.is_empty()).ok_or(ResourceError::MissingName)?;
        let namespace = raw
            .metadata
            .namespace
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Ok(Self {
            api_version: raw.api_version,
            kind: raw.kind,
            name,
            namespace,
            resource_version: raw.metadata.resource_version,
            spec: raw.spec,
        })
    }
}

impl From<ManagedResource> for RawResource {
    fn from(r: ManagedResource) -> Self {
        Self {
            api_version: r.api_version,
            kind: r.kind,
            metadata: RawMeta { name: Some(r.name), namespace: Some(r.namespace), resource_version: r.resource_version },
            spec: r.spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("object missing metadata.name")]
    MissingName,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("resource {key} requests no master, data or client nodes")]
    NoNodes { key: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl EventKind {
    /// Parse the wire value of a watch frame's `type` field.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "ADDED" => Some(EventKind::Added),
            "MODIFIED" => Some(EventKind::Modified),
            "DELETED" => Some(EventKind::Deleted),
            _ => None,
        }
    }
}

/// One decoded unit of the watch stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "object")]
    pub resource: ManagedResource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Outcome {
    Created,
    AlreadyExists,
    Failed(String),
}

/// Outcome of reconciling one dependent object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileResult {
    pub kind: ObjectKind,
    pub name: String,
    pub outcome: Outcome,
}

impl ReconcileResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

pub mod prelude {
    pub use super::{
        ChangeEvent, DependentObjectSpec, EventKind, ManagedResource, NodeRole, ObjectKind, Outcome, ReconcileResult,
        ResourceSpec,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_watch_frame_with_default_namespace() {
        let raw = r#"{"type":"ADDED","object":{"apiVersion":"v1","kind":"ElasticSearch","metadata":{"name":"es1"},"spec":{"dataNodes":3,"clientNodes":2,"masterNodes":1}}}"#;
        let ev: ChangeEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.kind, EventKind::Added);
        assert_eq!(ev.resource.name, "es1");
        assert_eq!(ev.resource.namespace, "default");
        assert_eq!(ev.resource.spec, ResourceSpec { data_nodes: 3, client_nodes: 2, master_nodes: 1 });
    }

    #[test]
    fn missing_spec_fields_default_to_zero() {
        let raw = r#"{"apiVersion":"ibawt.ca/v1","kind":"ElasticSearch","metadata":{"name":"x","namespace":"search"},"spec":{"dataNodes":2}}"#;
        let r: ManagedResource = serde_json::from_str(raw).unwrap();
        assert_eq!(r.namespace, "search");
        assert_eq!(r.spec.count(NodeRole::Data), 2);
        assert_eq!(r.spec.count(NodeRole::Master), 0);
        assert_eq!(r.spec.count(NodeRole::Client), 0);
    }

    #[test]
    fn missing_name_is_rejected() {
        let raw = r#"{"apiVersion":"v1","kind":"ElasticSearch","metadata":{},"spec":{}}"#;
        let err = serde_json::from_str::<ManagedResource>(raw).unwrap_err().to_string();
        assert!(err.contains("metadata.name"), "err={}", err);
    }

    #[test]
    fn encode_keeps_platform_shape() {
        let r = ManagedResource {
            api_version: "ibawt.ca/v1".into(),
            kind: "ElasticSearch".into(),
            name: "es1".into(),
            namespace: "default".into(),
            resource_version: None,
            spec: ResourceSpec { data_nodes: 1, client_nodes: 0, master_nodes: 0 },
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["metadata"]["name"], "es1");
        assert_eq!(v["metadata"]["namespace"], "default");
        assert_eq!(v["spec"]["dataNodes"], 1);
        assert!(v["metadata"].get("resourceVersion").is_none());
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert_eq!(EventKind::from_wire("MODIFIED"), Some(EventKind::Modified));
        assert_eq!(EventKind::from_wire("ERROR"), None);
        assert_eq!(EventKind::from_wire("added"), None);
    }

    #[test]
    fn empty_topology_fails_validation() {
        let raw = r#"{"metadata":{"name":"empty"},"spec":{"dataNodes":0,"clientNodes":0,"masterNodes":0}}"#;
        let r: ManagedResource = serde_json::from_str(raw).unwrap();
        assert_eq!(r.validate(), Err(ValidationError::NoNodes { key: "default/empty".into() }));
    }
}

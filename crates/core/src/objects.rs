//! Dependent object descriptions produced by the desired-state builder.
//!
//! These are plain values, not live handles: the platform adapter turns them
//! into concrete API objects at create time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type Labels = BTreeMap<String, String>;

/// Dependent object kinds. `Ord` follows reconciliation order: accounts and
/// network identity before the workloads that reference them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    ServiceAccount,
    Service,
    Deployment,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::Service => "Service",
            ObjectKind::Deployment => "Deployment",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self { name: name.to_string(), value: value.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceAccountSpec {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub labels: Labels,
    pub ports: Vec<PortSpec>,
    pub selector: Labels,
}

/// Single-container pod template for one node role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodTemplate {
    pub labels: Labels,
    pub service_account: String,
    pub container_name: String,
    pub image: String,
    pub env: Vec<EnvVar>,
    pub ports: Vec<PortSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentSpec {
    pub name: String,
    pub replicas: u32,
    pub labels: Labels,
    pub pod_template: PodTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DependentObjectSpec {
    ServiceAccount(ServiceAccountSpec),
    Service(ServiceSpec),
    Deployment(DeploymentSpec),
}

impl DependentObjectSpec {
    pub fn kind(&self) -> ObjectKind {
        match self {
            DependentObjectSpec::ServiceAccount(_) => ObjectKind::ServiceAccount,
            DependentObjectSpec::Service(_) => ObjectKind::Service,
            DependentObjectSpec::Deployment(_) => ObjectKind::Deployment,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DependentObjectSpec::ServiceAccount(s) => &s.name,
            DependentObjectSpec::Service(s) => &s.name,
            DependentObjectSpec::Deployment(d) => &d.name,
        }
    }
}

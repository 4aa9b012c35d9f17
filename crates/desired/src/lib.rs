//! Desired-state builder: maps a watched resource onto the dependent objects
//! that realize it. Pure: no I/O, no clock, no randomness.

#![forbid(unsafe_code)]

use esk_core::objects::Labels;
use esk_core::{
    DependentObjectSpec, DeploymentSpec, EnvVar, ManagedResource, NodeRole, PodTemplate, PortSpec, ServiceAccountSpec,
    ServiceSpec,
};
use serde::{Deserialize, Serialize};

pub const HTTP_PORT: u16 = 9200;
pub const TRANSPORT_PORT: u16 = 9300;
pub const CONTAINER_NAME: &str = "elasticsearch";
pub const COMPONENT: &str = "elasticsearch";

pub const DEFAULT_IMAGE: &str = "quay.io/pires/docker-elasticsearch-kubernetes:5.6.2";
pub const DEFAULT_JAVA_OPTS: &str = "-Xms256m -Xmx256m";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderOptions {
    pub image: String,
    pub java_opts: String,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self { image: DEFAULT_IMAGE.to_string(), java_opts: DEFAULT_JAVA_OPTS.to_string() }
    }
}

/// Build the full dependent set: account, service, then one deployment per
/// role with a non-zero count (master, data, client).
pub fn build(res: &ManagedResource, opts: &BuilderOptions) -> Vec<DependentObjectSpec> {
    let mut out = Vec::with_capacity(2 + NodeRole::ALL.len());
    out.push(DependentObjectSpec::ServiceAccount(service_account(res)));
    out.push(DependentObjectSpec::Service(service(res)));
    out.extend(
        NodeRole::ALL
            .iter()
            .filter_map(|role| deployment(res, *role, opts))
            .map(DependentObjectSpec::Deployment),
    );
    out
}

pub fn service_account_name(res: &ManagedResource) -> String {
    res.name.clone()
}

pub fn service_name(res: &ManagedResource) -> String {
    res.name.clone()
}

pub fn deployment_name(res: &ManagedResource, role: NodeRole) -> String {
    format!("{}-{}", res.name, role)
}

fn cluster_labels(res: &ManagedResource) -> Labels {
    Labels::from([
        ("component".to_string(), COMPONENT.to_string()),
        ("cluster".to_string(), res.name.clone()),
    ])
}

pub fn role_labels(res: &ManagedResource, role: NodeRole) -> Labels {
    let mut labels = cluster_labels(res);
    labels.insert("role".to_string(), role.to_string());
    labels
}

fn service_account(res: &ManagedResource) -> ServiceAccountSpec {
    ServiceAccountSpec { name: service_account_name(res) }
}

fn service(res: &ManagedResource) -> ServiceSpec {
    ServiceSpec {
        name: service_name(res),
        labels: cluster_labels(res),
        ports: vec![PortSpec { name: "http".to_string(), port: HTTP_PORT, target_port: HTTP_PORT }],
        selector: role_labels(res, NodeRole::Client),
    }
}

fn container_ports() -> Vec<PortSpec> {
    vec![
        PortSpec { name: "http".to_string(), port: HTTP_PORT, target_port: HTTP_PORT },
        PortSpec { name: "transport".to_string(), port: TRANSPORT_PORT, target_port: TRANSPORT_PORT },
    ]
}

fn role_env(res: &ManagedResource, role: NodeRole, opts: &BuilderOptions) -> Vec<EnvVar> {
    let flag = |on: bool| if on { "true" } else { "false" };
    vec![
        EnvVar::new("NAMESPACE", res.namespace.clone()),
        EnvVar::new("CLUSTER_NAME", res.name.clone()),
        EnvVar::new("NODE_MASTER", flag(role == NodeRole::Master)),
        EnvVar::new("NODE_DATA", flag(role == NodeRole::Data)),
        EnvVar::new("HTTP_ENABLE", flag(role == NodeRole::Client)),
        EnvVar::new("DISCOVERY_SERVICE", service_name(res)),
        EnvVar::new("ES_JAVA_OPTS", opts.java_opts.clone()),
    ]
}

fn deployment(res: &ManagedResource, role: NodeRole, opts: &BuilderOptions) -> Option<DeploymentSpec> {
    let replicas = res.spec.count(role);
    if replicas == 0 {
        return None;
    }
    let labels = role_labels(res, role);
    Some(DeploymentSpec {
        name: deployment_name(res, role),
        replicas,
        labels: labels.clone(),
        pod_template: PodTemplate {
            labels,
            service_account: service_account_name(res),
            container_name: CONTAINER_NAME.to_string(),
            image: opts.image.clone(),
            env: role_env(res, role, opts),
            ports: container_ports(),
        },
    })
}

//! kube-rs backed object API and the conversions from dependent object specs to k8s objects.

use std::fmt::Debug;

use esk_core::objects::Labels;
use esk_core::{DependentObjectSpec, DeploymentSpec, ObjectKind, PortSpec, ServiceAccountSpec, ServiceSpec};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;

use crate::{ObjectApi, PlatformError};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "esk";

impl From<kube::Error> for PlatformError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 409 => PlatformError::AlreadyExists,
            kube::Error::Api(ae) => PlatformError::Api { code: ae.code, message: ae.message },
            other => PlatformError::Transport(other.to_string()),
        }
    }
}

/// Object API over an explicitly passed kube client.
#[derive(Clone)]
pub struct KubeObjectApi {
    client: Client,
}

impl KubeObjectApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_typed<K>(&self, namespace: &str, name: &str) -> Result<Option<Json>, PlatformError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(obj) => serde_json::to_value(&obj).map(Some).map_err(|e| PlatformError::Encode(e.to_string())),
            None => Ok(None),
        }
    }

    async fn create_typed<K>(&self, namespace: &str, obj: &K) -> Result<(), PlatformError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), obj).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectApi for KubeObjectApi {
    async fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<Json>, PlatformError> {
        match kind {
            ObjectKind::ServiceAccount => self.get_typed::<corev1::ServiceAccount>(namespace, name).await,
            ObjectKind::Service => self.get_typed::<corev1::Service>(namespace, name).await,
            ObjectKind::Deployment => self.get_typed::<appsv1::Deployment>(namespace, name).await,
        }
    }

    async fn create(&self, namespace: &str, spec: &DependentObjectSpec) -> Result<(), PlatformError> {
        match spec {
            DependentObjectSpec::ServiceAccount(s) => self.create_typed(namespace, &to_service_account(namespace, s)).await,
            DependentObjectSpec::Service(s) => self.create_typed(namespace, &to_service(namespace, s)).await,
            DependentObjectSpec::Deployment(d) => self.create_typed(namespace, &to_deployment(namespace, d)).await,
        }
    }
}

fn managed(labels: &Labels) -> Labels {
    let mut out = labels.clone();
    out.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    out
}

fn meta(name: &str, namespace: &str, labels: Labels) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..metav1::ObjectMeta::default()
    }
}

pub fn to_service_account(namespace: &str, s: &ServiceAccountSpec) -> corev1::ServiceAccount {
    corev1::ServiceAccount { metadata: meta(&s.name, namespace, managed(&Labels::new())), ..corev1::ServiceAccount::default() }
}

fn service_port(p: &PortSpec) -> corev1::ServicePort {
    corev1::ServicePort {
        name: Some(p.name.clone()),
        port: i32::from(p.port),
        target_port: Some(IntOrString::Int(i32::from(p.target_port))),
        protocol: Some("TCP".to_string()),
        ..corev1::ServicePort::default()
    }
}

pub fn to_service(namespace: &str, s: &ServiceSpec) -> corev1::Service {
    corev1::Service {
        metadata: meta(&s.name, namespace, managed(&s.labels)),
        spec: Some(corev1::ServiceSpec {
            ports: Some(s.ports.iter().map(service_port).collect()),
            selector: Some(s.selector.clone()),
            ..corev1::ServiceSpec::default()
        }),
        ..corev1::Service::default()
    }
}

fn container_port(p: &PortSpec) -> corev1::ContainerPort {
    corev1::ContainerPort {
        name: Some(p.name.clone()),
        container_port: i32::from(p.target_port),
        protocol: Some("TCP".to_string()),
        ..corev1::ContainerPort::default()
    }
}

pub fn to_deployment(namespace: &str, d: &DeploymentSpec) -> appsv1::Deployment {
    let tpl = &d.pod_template;
    let env = tpl
        .env
        .iter()
        .map(|e| corev1::EnvVar { name: e.name.clone(), value: Some(e.value.clone()), ..corev1::EnvVar::default() })
        .collect();
    appsv1::Deployment {
        metadata: meta(&d.name, namespace, managed(&d.labels)),
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(i32::try_from(d.replicas).unwrap_or(i32::MAX)),
            selector: metav1::LabelSelector { match_labels: Some(tpl.labels.clone()), ..metav1::LabelSelector::default() },
            template: corev1::PodTemplateSpec {
                metadata: Some(metav1::ObjectMeta { labels: Some(tpl.labels.clone()), ..metav1::ObjectMeta::default() }),
                spec: Some(corev1::PodSpec {
                    service_account_name: Some(tpl.service_account.clone()),
                    containers: vec![corev1::Container {
                        name: tpl.container_name.clone(),
                        image: Some(tpl.image.clone()),
                        env: Some(env),
                        ports: Some(tpl.ports.iter().map(container_port).collect()),
                        ..corev1::Container::default()
                    }],
                    ..corev1::PodSpec::default()
                }),
            },
            ..appsv1::DeploymentSpec::default()
        }),
        ..appsv1::Deployment::default()
    }
}

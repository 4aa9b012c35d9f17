//! esk apply: create-if-absent reconciliation of dependent objects.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use esk_core::{DependentObjectSpec, ManagedResource, ObjectKind, Outcome, ReconcileResult, ValidationError};
use esk_desired::BuilderOptions;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

pub mod kube_api;
pub mod memory;

pub use kube_api::KubeObjectApi;
pub use memory::MemoryObjectApi;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("object already exists")]
    AlreadyExists,
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("encode: {0}")]
    Encode(String),
}

/// The slice of the platform's object API the reconciler relies on.
#[async_trait::async_trait]
pub trait ObjectApi: Send + Sync {
    /// Live object as JSON, `None` when it does not exist.
    async fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<Json>, PlatformError>;

    async fn create(&self, namespace: &str, spec: &DependentObjectSpec) -> Result<(), PlatformError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub existing: usize,
    pub failed: usize,
}

impl ReconcileSummary {
    pub fn of(results: &[ReconcileResult]) -> Self {
        results.iter().fold(Self::default(), |mut s, r| {
            match r.outcome {
                Outcome::Created => s.created += 1,
                Outcome::AlreadyExists => s.existing += 1,
                Outcome::Failed(_) => s.failed += 1,
            }
            s
        })
    }
}

pub struct Reconciler {
    api: Arc<dyn ObjectApi>,
    opts: BuilderOptions,
}

impl Reconciler {
    pub fn new(api: Arc<dyn ObjectApi>, opts: BuilderOptions) -> Self {
        Self { api, opts }
    }

    /// Validate, build the desired set for `res` and reconcile it.
    pub async fn ensure(&self, res: &ManagedResource) -> Result<Vec<ReconcileResult>, ValidationError> {
        if let Err(e) = res.validate() {
            warn!(resource = %res.key(), error = %e, "skipping invalid resource");
            return Err(e);
        }
        let t0 = Instant::now();
        let specs = esk_desired::build(res, &self.opts);
        let results = self.reconcile(&res.namespace, &specs).await;
        histogram!("reconcile_latency_ms").record(t0.elapsed().as_secs_f64() * 1000.0);
        let s = ReconcileSummary::of(&results);
        info!(resource = %res.key(), created = s.created, existing = s.existing, failed = s.failed, "reconcile pass finished");
        Ok(results)
    }

    /// One result per spec, in kind order (accounts, services, deployments).
    /// A failing object never stops the rest of the pass.
    pub async fn reconcile(&self, namespace: &str, specs: &[DependentObjectSpec]) -> Vec<ReconcileResult> {
        let mut ordered: Vec<&DependentObjectSpec> = specs.iter().collect();
        ordered.sort_by_key(|s| s.kind());
        let mut out = Vec::with_capacity(ordered.len());
        for spec in ordered {
            out.push(self.reconcile_one(namespace, spec).await);
        }
        out
    }

    async fn reconcile_one(&self, namespace: &str, spec: &DependentObjectSpec) -> ReconcileResult {
        let kind = spec.kind();
        let name = spec.name().to_string();
        let outcome = match self.api.get(kind, namespace, &name).await {
            Ok(Some(_)) => {
                debug!(%kind, ns = %namespace, name = %name, "already exists");
                Outcome::AlreadyExists
            }
            Ok(None) => match self.api.create(namespace, spec).await {
                Ok(()) => {
                    info!(%kind, ns = %namespace, name = %name, "created");
                    Outcome::Created
                }
                Err(PlatformError::AlreadyExists) => {
                    debug!(%kind, ns = %namespace, name = %name, "created concurrently; treating as existing");
                    Outcome::AlreadyExists
                }
                Err(e) => {
                    warn!(%kind, ns = %namespace, name = %name, error = %e, "create failed");
                    Outcome::Failed(e.to_string())
                }
            },
            Err(e) => {
                warn!(%kind, ns = %namespace, name = %name, error = %e, "lookup failed");
                Outcome::Failed(e.to_string())
            }
        };
        match &outcome {
            Outcome::Created => counter!("reconcile_created").increment(1),
            Outcome::AlreadyExists => counter!("reconcile_existing").increment(1),
            Outcome::Failed(_) => counter!("reconcile_failed").increment(1),
        }
        ReconcileResult { kind, name, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esk_core::{ResourceSpec, ServiceAccountSpec};

    fn resource(data: u32, client: u32, master: u32) -> ManagedResource {
        ManagedResource {
            api_version: "ibawt.ca/v1".into(),
            kind: "ElasticSearch".into(),
            name: "es1".into(),
            namespace: "default".into(),
            resource_version: None,
            spec: ResourceSpec { data_nodes: data, client_nodes: client, master_nodes: master },
        }
    }

    fn reconciler(api: &Arc<MemoryObjectApi>) -> Reconciler {
        Reconciler::new(api.clone(), BuilderOptions::default())
    }

    #[tokio::test]
    async fn creates_missing_objects_in_kind_order() {
        let api = Arc::new(MemoryObjectApi::new());
        let results = reconciler(&api).ensure(&resource(3, 2, 1)).await.unwrap();
        let got: Vec<_> = results.iter().map(|r| (r.kind, r.name.as_str(), r.outcome.clone())).collect();
        assert_eq!(
            got,
            vec![
                (ObjectKind::ServiceAccount, "es1", Outcome::Created),
                (ObjectKind::Service, "es1", Outcome::Created),
                (ObjectKind::Deployment, "es1-master", Outcome::Created),
                (ObjectKind::Deployment, "es1-data", Outcome::Created),
                (ObjectKind::Deployment, "es1-client", Outcome::Created),
            ]
        );
        assert_eq!(api.creates(), 5);
    }

    #[tokio::test]
    async fn unordered_input_is_reconciled_accounts_first() {
        let api = Arc::new(MemoryObjectApi::new());
        let mut specs = esk_desired::build(&resource(1, 0, 0), &BuilderOptions::default());
        specs.reverse();
        let results = reconciler(&api).reconcile("default", &specs).await;
        let kinds: Vec<_> = results.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ObjectKind::ServiceAccount, ObjectKind::Service, ObjectKind::Deployment]);
    }

    #[tokio::test]
    async fn create_failure_does_not_abort_the_pass() {
        let api = Arc::new(MemoryObjectApi::new());
        api.fail_create(ObjectKind::Service, "es1", PlatformError::Api { code: 422, message: "invalid port".into() });
        let results = reconciler(&api).ensure(&resource(1, 1, 1)).await.unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[1].outcome, Outcome::Failed("api error 422: invalid port".into()));
        assert!(results.iter().enumerate().filter(|(i, _)| *i != 1).all(|(_, r)| r.outcome == Outcome::Created));
        assert_eq!(ReconcileSummary::of(&results), ReconcileSummary { created: 4, existing: 0, failed: 1 });
    }

    #[tokio::test]
    async fn lookup_failure_skips_create_for_that_object() {
        let api = Arc::new(MemoryObjectApi::new());
        api.fail_get(ObjectKind::ServiceAccount, "es1", PlatformError::Transport("connection reset".into()));
        let results = reconciler(&api).ensure(&resource(1, 0, 0)).await.unwrap();
        assert!(results[0].is_failed());
        assert!(!api.contains(ObjectKind::ServiceAccount, "default", "es1"));
        assert!(api.contains(ObjectKind::Service, "default", "es1"));
    }

    #[tokio::test]
    async fn conflict_on_create_counts_as_existing() {
        let api = Arc::new(MemoryObjectApi::new());
        api.fail_create(ObjectKind::ServiceAccount, "es1", PlatformError::AlreadyExists);
        let specs = vec![DependentObjectSpec::ServiceAccount(ServiceAccountSpec { name: "es1".into() })];
        let results = reconciler(&api).reconcile("default", &specs).await;
        assert_eq!(results[0].outcome, Outcome::AlreadyExists);
    }

    #[tokio::test]
    async fn empty_topology_makes_no_platform_calls() {
        let api = Arc::new(MemoryObjectApi::new());
        let err = reconciler(&api).ensure(&resource(0, 0, 0)).await.unwrap_err();
        assert!(matches!(err, ValidationError::NoNodes { .. }));
        assert!(api.calls().is_empty());
    }
}

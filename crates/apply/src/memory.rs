//! In-memory platform: records calls, stores created specs and can be told to
//! fail specific objects. Backs the reconciler and dispatcher tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use esk_core::{DependentObjectSpec, ObjectKind};
use serde_json::Value as Json;

use crate::{ObjectApi, PlatformError};

type Key = (ObjectKind, String, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get { kind: ObjectKind, namespace: String, name: String },
    Create { kind: ObjectKind, namespace: String, name: String },
}

#[derive(Default)]
pub struct MemoryObjectApi {
    objects: Mutex<BTreeMap<Key, DependentObjectSpec>>,
    calls: Mutex<Vec<Call>>,
    fail_get: Mutex<HashMap<(ObjectKind, String), PlatformError>>,
    fail_create: Mutex<HashMap<(ObjectKind, String), PlatformError>>,
}

impl MemoryObjectApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object as if something else had created it.
    pub fn insert(&self, namespace: &str, spec: DependentObjectSpec) {
        let key = (spec.kind(), namespace.to_string(), spec.name().to_string());
        lock(&self.objects).insert(key, spec);
    }

    pub fn fail_get(&self, kind: ObjectKind, name: &str, err: PlatformError) {
        lock(&self.fail_get).insert((kind, name.to_string()), err);
    }

    pub fn fail_create(&self, kind: ObjectKind, name: &str, err: PlatformError) {
        lock(&self.fail_create).insert((kind, name.to_string()), err);
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_get).clear();
        lock(&self.fail_create).clear();
    }

    pub fn contains(&self, kind: ObjectKind, namespace: &str, name: &str) -> bool {
        lock(&self.objects).contains_key(&(kind, namespace.to_string(), name.to_string()))
    }

    pub fn object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<DependentObjectSpec> {
        lock(&self.objects).get(&(kind, namespace.to_string(), name.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Number of create calls issued, successful or not.
    pub fn creates(&self) -> usize {
        lock(&self.calls).iter().filter(|c| matches!(c, Call::Create { .. })).count()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait::async_trait]
impl ObjectApi for MemoryObjectApi {
    async fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<Json>, PlatformError> {
        lock(&self.calls).push(Call::Get { kind, namespace: namespace.to_string(), name: name.to_string() });
        if let Some(err) = lock(&self.fail_get).get(&(kind, name.to_string())) {
            return Err(err.clone());
        }
        match self.object(kind, namespace, name) {
            Some(spec) => serde_json::to_value(&spec).map(Some).map_err(|e| PlatformError::Encode(e.to_string())),
            None => Ok(None),
        }
    }

    async fn create(&self, namespace: &str, spec: &DependentObjectSpec) -> Result<(), PlatformError> {
        let (kind, name) = (spec.kind(), spec.name().to_string());
        lock(&self.calls).push(Call::Create { kind, namespace: namespace.to_string(), name: name.clone() });
        if let Some(err) = lock(&self.fail_create).get(&(kind, name.clone())) {
            return Err(err.clone());
        }
        let mut objects = lock(&self.objects);
        let key = (kind, namespace.to_string(), name);
        if objects.contains_key(&key) {
            return Err(PlatformError::AlreadyExists);
        }
        objects.insert(key, spec.clone());
        Ok(())
    }
}

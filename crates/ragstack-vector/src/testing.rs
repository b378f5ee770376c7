//! Test doubles for the database and embedding seams
//!
//! [`InMemoryDatabase`] keeps collections and objects in memory, records
//! every call, and can be told to be unready or to fail an operation.
//! [`FixedEmbedding`] returns deterministic vectors without a network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use ragstack_core::{RagstackError, Result};
use serde_json::Value;
use uuid::Uuid;

use crate::embedding::EmbeddingClient;
use crate::weaviate_store::class_definition;
use crate::{
    CollectionInfo, CollectionSpec, DatabaseMeta, DeleteFilter, DeleteSummary, EmbeddingVector,
    FilterOperator, FilterValue, VectorDatabase,
};

// ============================================================================
// In-memory database
// ============================================================================

#[derive(Debug)]
struct StoredObject {
    id: Uuid,
    properties: Value,
}

#[derive(Debug)]
struct StoredCollection {
    info: CollectionInfo,
    objects: Vec<StoredObject>,
}

#[derive(Debug)]
struct State {
    collections: BTreeMap<String, StoredCollection>,
    calls: HashMap<&'static str, usize>,
    ready: bool,
    failing_probes: u32,
    failing_operations: HashSet<&'static str>,
}

/// Vector database double backed by a `BTreeMap`
#[derive(Debug)]
pub struct InMemoryDatabase {
    state: Mutex<State>,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                collections: BTreeMap::new(),
                calls: HashMap::new(),
                ready: true,
                failing_probes: 0,
                failing_operations: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a call and fail it if configured to
    fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_default() += 1;
        if state.failing_operations.contains(operation) {
            return Err(RagstackError::UpstreamDatabase(format!(
                "{operation} failed (injected)"
            )));
        }
        Ok(state)
    }

    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    /// The next `count` probes report "not ready"
    pub fn fail_next_probes(&self, count: u32) {
        self.lock().failing_probes = count;
    }

    /// Every later call to `operation` returns an upstream error
    pub fn fail_operation(&self, operation: &'static str) {
        self.lock().failing_operations.insert(operation);
    }

    /// Number of calls made to one trait method
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Number of calls made to any trait method
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }
}

fn missing(collection: &str) -> RagstackError {
    RagstackError::UpstreamDatabase(format!("class {collection} not found"))
}

#[async_trait]
impl VectorDatabase for InMemoryDatabase {
    async fn is_ready(&self) -> Result<bool> {
        let mut state = self.enter("is_ready")?;
        if state.failing_probes > 0 {
            state.failing_probes -= 1;
            return Ok(false);
        }
        Ok(state.ready)
    }

    async fn meta(&self) -> Result<DatabaseMeta> {
        let _state = self.enter("meta")?;
        Ok(DatabaseMeta {
            version: "in-memory".to_string(),
            hostname: None,
            modules: vec![crate::VECTORIZER_MODULE.to_string()],
        })
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let state = self.enter("list_collections")?;
        Ok(state
            .collections
            .values()
            .map(|c| c.info.clone())
            .collect())
    }

    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let state = self.enter("get_collection")?;
        Ok(state.collections.get(name).map(|c| c.info.clone()))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut state = self.enter("create_collection")?;
        if state.collections.contains_key(&spec.name) {
            return Err(RagstackError::UpstreamDatabase(format!(
                "class name {} already exists",
                spec.name
            )));
        }

        let info = CollectionInfo::from_class(&class_definition(spec))
            .ok_or_else(|| RagstackError::UpstreamDatabase("invalid class".to_string()))?;
        state.collections.insert(
            spec.name.clone(),
            StoredCollection {
                info,
                objects: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut state = self.enter("delete_collection")?;
        state
            .collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| missing(name))
    }

    async fn insert_object(
        &self,
        collection: &str,
        properties: &Value,
        _vector: Option<&[f32]>,
    ) -> Result<Uuid> {
        let mut state = self.enter("insert_object")?;
        let stored = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;

        let id = Uuid::new_v4();
        stored.objects.push(StoredObject {
            id,
            properties: properties.clone(),
        });
        Ok(id)
    }

    async fn delete_objects(
        &self,
        collection: &str,
        filter: &DeleteFilter,
        dry_run: bool,
    ) -> Result<DeleteSummary> {
        let mut state = self.enter("delete_objects")?;
        let stored = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;

        let matched: Vec<Uuid> = stored
            .objects
            .iter()
            .filter(|o| matches_filter(filter, &o.properties))
            .map(|o| o.id)
            .collect();

        if !dry_run {
            stored.objects.retain(|o| !matched.contains(&o.id));
        }

        Ok(DeleteSummary {
            matches: matched.len() as u64,
            successful: if dry_run { 0 } else { matched.len() as u64 },
            failed: 0,
            dry_run,
        })
    }

    async fn count_objects(&self, collection: &str, filter: Option<&DeleteFilter>) -> Result<u64> {
        let state = self.enter("count_objects")?;
        let stored = state
            .collections
            .get(collection)
            .ok_or_else(|| missing(collection))?;

        Ok(stored
            .objects
            .iter()
            .filter(|o| filter.map_or(true, |f| matches_filter(f, &o.properties)))
            .count() as u64)
    }
}

/// Evaluate the subset of operators the double understands
fn matches_filter(filter: &DeleteFilter, properties: &Value) -> bool {
    match filter.operator {
        FilterOperator::And => filter.operands.iter().all(|f| matches_filter(f, properties)),
        FilterOperator::Or => filter.operands.iter().any(|f| matches_filter(f, properties)),
        operator => {
            let actual = filter
                .path
                .first()
                .and_then(|name| properties.get(name.as_str()));
            let (Some(actual), Some(expected)) = (actual, filter.value.as_ref()) else {
                return operator == FilterOperator::IsNull && actual.is_none();
            };
            compare(operator, actual, expected)
        }
    }
}

fn compare(operator: FilterOperator, actual: &Value, expected: &FilterValue) -> bool {
    use std::cmp::Ordering;

    let ordering = match expected {
        FilterValue::Text(s) | FilterValue::Date(s) | FilterValue::LegacyString(s) => {
            actual.as_str().map(|a| a.cmp(s.as_str()))
        }
        FilterValue::Int(n) => actual.as_i64().map(|a| a.cmp(n)),
        FilterValue::Number(n) => actual.as_f64().and_then(|a| a.partial_cmp(n)),
        FilterValue::Boolean(b) => actual.as_bool().map(|a| a.cmp(b)),
        _ => None,
    };

    match (operator, ordering) {
        (FilterOperator::Equal, Some(o)) => o == Ordering::Equal,
        (FilterOperator::NotEqual, Some(o)) => o != Ordering::Equal,
        (FilterOperator::GreaterThan, Some(o)) => o == Ordering::Greater,
        (FilterOperator::GreaterThanEqual, Some(o)) => o != Ordering::Less,
        (FilterOperator::LessThan, Some(o)) => o == Ordering::Less,
        (FilterOperator::LessThanEqual, Some(o)) => o != Ordering::Greater,
        _ => false,
    }
}

// ============================================================================
// Fixed embedding
// ============================================================================

/// Embedder returning a constant-length vector derived from the text
#[derive(Debug)]
pub struct FixedEmbedding {
    endpoint: String,
    dimension: usize,
    failing_text: Option<String>,
    requested_urls: Mutex<Vec<String>>,
}

impl FixedEmbedding {
    pub fn new(endpoint: impl Into<String>, dimension: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            dimension,
            failing_text: None,
            requested_urls: Mutex::new(Vec::new()),
        }
    }

    /// Fail whenever asked to embed exactly `text`
    pub fn failing_on(mut self, text: impl Into<String>) -> Self {
        self.failing_text = Some(text.into());
        self
    }

    /// URLs passed to [`EmbeddingClient::embed_with_url`], in order
    pub fn requested_urls(&self) -> Vec<String> {
        self.requested_urls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl EmbeddingClient for FixedEmbedding {
    async fn embed_with_url(&self, text: &str, url: &str) -> Result<EmbeddingVector> {
        self.requested_urls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url.to_string());

        if self.failing_text.as_deref() == Some(text) {
            return Err(RagstackError::UpstreamEmbedding(format!(
                "cannot embed '{text}'"
            )));
        }

        let seed = text.len() as f32;
        Ok((0..self.dimension)
            .map(|i| (seed + i as f32) / self.dimension as f32)
            .collect())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn model(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }
}

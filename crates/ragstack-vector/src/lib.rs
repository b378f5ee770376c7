//! ragstack Vector - Weaviate client wrapper
//!
//! Bridges an OpenAI-compatible embedding service into Weaviate's
//! automatic vectorization and exposes idempotent collection and object
//! management through [`VectorStoreClient`].

use async_trait::async_trait;
use ragstack_core::{require_non_empty, RagstackError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod client;
pub mod embedding;
pub mod filter;
pub mod weaviate_store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{CollectionOptions, VectorStoreClient};
pub use embedding::{EmbeddingClient, OpenAiCompatibleEmbedding};
pub use filter::{
    DeleteFilter, FilterOperator, FilterValue, GeoCoordinates, GeoDistance, GeoRange,
};
pub use weaviate_store::WeaviateHttp;

/// Ordered embedding values; length is fixed by the embedding model
pub type EmbeddingVector = Vec<f32>;

/// Name of the Weaviate module used for server-side vectorization
pub const VECTORIZER_MODULE: &str = "text2vec-openai";

// ============================================================================
// Collection Model
// ============================================================================

/// Distance metric of a collection's vector index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = RagstackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            _ => Err(RagstackError::InvalidArgument(format!(
                "unsupported distance metric '{s}', expected 'cosine' or 'dot'"
            ))),
        }
    }
}

/// Everything needed to create a collection wired to the embedding service
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    /// Canonical collection name
    pub name: String,
    /// Embedding model the vectorizer requests
    pub model: String,
    pub distance: DistanceMetric,
    /// Base URL the database uses to reach the embedding service
    pub vectorizer_base_url: String,
}

/// Collection metadata as reported by the database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub vectorizer: Option<String>,
    pub vectorizer_base_url: Option<String>,
    pub model: Option<String>,
    /// Reported as-is; the database may use metrics this crate never creates
    pub distance: Option<String>,
    /// Full class definition
    pub raw: Value,
}

impl CollectionInfo {
    /// Build from a Weaviate class definition
    pub fn from_class(class: &Value) -> Option<Self> {
        let name = class.get("class")?.as_str()?.to_string();
        let module = class
            .get("moduleConfig")
            .and_then(|m| m.get(VECTORIZER_MODULE));
        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

        Some(Self {
            name,
            vectorizer: text(class.get("vectorizer")),
            vectorizer_base_url: text(module.and_then(|m| m.get("baseURL"))),
            model: text(module.and_then(|m| m.get("model"))),
            distance: text(
                class
                    .get("vectorIndexConfig")
                    .and_then(|c| c.get("distance")),
            ),
            raw: class.clone(),
        })
    }
}

/// Canonical form of a collection name.
///
/// Weaviate stores class names with an upper-case first letter, so `docs`
/// and `Docs` name the same collection.
pub fn canonical_collection_name(name: &str) -> String {
    let name = name.trim();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Check `name` against Weaviate's class-name grammar and canonicalize it.
///
/// Names must match `[A-Za-z][_0-9A-Za-z]*` once canonicalized. Anything
/// else (`#`, `/`, `.`, `-`, spaces) is rejected, since it would change the
/// meaning of the request URL.
pub fn validate_collection_name(name: &str) -> Result<String> {
    require_non_empty("collection name", name)?;

    let canonical = canonical_collection_name(name);
    let mut chars = canonical.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
    if !valid {
        return Err(RagstackError::InvalidArgument(format!(
            "invalid collection name '{name}': use a letter followed by letters, digits or '_'"
        )));
    }
    Ok(canonical)
}

/// Server version and enabled modules
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseMeta {
    pub version: String,
    pub hostname: Option<String>,
    pub modules: Vec<String>,
}

/// Counts reported by a filtered batch delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub matches: u64,
    pub successful: u64,
    pub failed: u64,
    pub dry_run: bool,
}

// ============================================================================
// Database Trait
// ============================================================================

/// Primitive operations of the vector database.
///
/// Implementations report transport and server errors as
/// [`RagstackError::UpstreamDatabase`]; readiness checks, argument
/// validation and "already exists"/"not found" handling live in
/// [`VectorStoreClient`].
#[async_trait]
pub trait VectorDatabase: Send + Sync {
    /// Readiness endpoint; `Ok(false)` when the server answered but is not ready
    async fn is_ready(&self) -> Result<bool>;

    async fn meta(&self) -> Result<DatabaseMeta>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// `Ok(None)` when the collection does not exist
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>>;

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Insert one object; without a vector the database vectorizes it
    async fn insert_object(
        &self,
        collection: &str,
        properties: &Value,
        vector: Option<&[f32]>,
    ) -> Result<Uuid>;

    async fn delete_objects(
        &self,
        collection: &str,
        filter: &DeleteFilter,
        dry_run: bool,
    ) -> Result<DeleteSummary>;

    async fn count_objects(&self, collection: &str, filter: Option<&DeleteFilter>) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_distance_metric_parse() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!(" DOT ".parse::<DistanceMetric>().unwrap(), DistanceMetric::Dot);

        let err = "invalid".parse::<DistanceMetric>().unwrap_err();
        assert!(matches!(err, RagstackError::InvalidArgument(_)));
        assert!("l2-squared".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn test_canonical_collection_name() {
        assert_eq!(canonical_collection_name("docs"), "Docs");
        assert_eq!(canonical_collection_name("Docs"), "Docs");
        assert_eq!(canonical_collection_name(" myDocs "), "MyDocs");
        assert_eq!(canonical_collection_name(""), "");
    }

    #[test]
    fn test_validate_collection_name() {
        assert_eq!(validate_collection_name("docs").unwrap(), "Docs");
        assert_eq!(validate_collection_name(" my_docs2 ").unwrap(), "My_docs2");

        for bad in [
            "",
            "  ",
            "docs#stale",
            "x/../Other",
            "docs/",
            "my-docs",
            "my docs",
            "_docs",
            "1docs",
            "docs?x=1",
            "Dócs",
        ] {
            let err = validate_collection_name(bad).unwrap_err();
            assert!(
                matches!(err, RagstackError::InvalidArgument(_)),
                "{bad:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_collection_info_from_class() {
        let class = json!({
            "class": "Docs",
            "vectorizer": "text2vec-openai",
            "moduleConfig": {
                "text2vec-openai": {
                    "baseURL": "http://vllm-embedding:8000",
                    "model": "Qwen3-Embedding-0.6B"
                }
            },
            "vectorIndexType": "hnsw",
            "vectorIndexConfig": { "distance": "dot" }
        });

        let info = CollectionInfo::from_class(&class).unwrap();
        assert_eq!(info.name, "Docs");
        assert_eq!(info.vectorizer.as_deref(), Some("text2vec-openai"));
        assert_eq!(
            info.vectorizer_base_url.as_deref(),
            Some("http://vllm-embedding:8000")
        );
        assert_eq!(info.model.as_deref(), Some("Qwen3-Embedding-0.6B"));
        assert_eq!(info.distance.as_deref(), Some("dot"));
    }

    #[test]
    fn test_collection_info_requires_class_name() {
        assert!(CollectionInfo::from_class(&json!({ "vectorizer": "none" })).is_none());
    }
}

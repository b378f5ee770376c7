//! Vector store client
//!
//! Single point of contact for collection lifecycle, object deletion and
//! embedding. Every database operation runs a fresh readiness probe first;
//! argument errors are reported before anything touches the network.
//!
//! Author: hephaex@gmail.com

use std::collections::BTreeMap;
use std::sync::Arc;

use ragstack_core::{
    require_non_empty, AppConfig, Outcome, ProbeConfig, RagstackError, Result, SkipReason,
    DEFAULT_EMBEDDING_MODEL,
};
use serde_json::Value;
use uuid::Uuid;

use crate::embedding::{vectorizer_base_url, EmbeddingClient, OpenAiCompatibleEmbedding};
use crate::{
    validate_collection_name, CollectionInfo, CollectionSpec, DatabaseMeta, DeleteFilter,
    DeleteSummary, DistanceMetric, EmbeddingVector, VectorDatabase, WeaviateHttp,
};

/// Options for [`VectorStoreClient::create_collection`]
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOptions {
    /// Embedding model the database vectorizer requests
    pub model_name: String,
    /// `cosine` or `dot`; validated when the collection is created
    pub distance_metric: String,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_EMBEDDING_MODEL.to_string(),
            distance_metric: DistanceMetric::Cosine.to_string(),
        }
    }
}

impl CollectionOptions {
    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_distance(mut self, distance_metric: impl Into<String>) -> Self {
        self.distance_metric = distance_metric.into();
        self
    }
}

/// Client wrapping the vector database and the embedding service
pub struct VectorStoreClient {
    database: Arc<dyn VectorDatabase>,
    embedder: Arc<dyn EmbeddingClient>,
    probe: ProbeConfig,
    vectorizer_base_url: String,
}

impl VectorStoreClient {
    /// Create a client from its collaborators
    pub fn new(
        database: Arc<dyn VectorDatabase>,
        embedder: Arc<dyn EmbeddingClient>,
        probe: ProbeConfig,
    ) -> Self {
        let vectorizer_base_url = vectorizer_base_url(embedder.endpoint());
        Self {
            database,
            embedder,
            probe,
            vectorizer_base_url,
        }
    }

    /// Create the Weaviate and embedding clients described by `config`
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let database = WeaviateHttp::new(&config.weaviate, config.embedding.api_key.clone())?;
        tracing::info!(
            "Weaviate client configured: http={} grpc={}",
            database.base_url(),
            database.grpc_endpoint()
        );
        let embedder = OpenAiCompatibleEmbedding::from_config(&config.embedding)?;
        tracing::info!(
            "Embedding client configured: url={} model={}",
            embedder.endpoint(),
            embedder.model()
        );

        let mut client = Self::new(Arc::new(database), Arc::new(embedder), config.probe.clone());
        if let Some(url) = &config.embedding.vectorizer_base_url {
            client = client.with_vectorizer_base_url(url.clone());
        }
        Ok(client)
    }

    /// Override the base URL the database uses to reach the embedding service
    pub fn with_vectorizer_base_url(mut self, url: impl Into<String>) -> Self {
        self.vectorizer_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn vectorizer_base_url(&self) -> &str {
        &self.vectorizer_base_url
    }

    // ------------------------------------------------------------------------
    // Connectivity
    // ------------------------------------------------------------------------

    /// Probe database readiness, retrying with backoff per [`ProbeConfig`].
    ///
    /// The result is never cached; each call probes again.
    pub async fn ensure_ready(&self) -> Result<()> {
        let attempts = self.probe.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.database.is_ready().await {
                Ok(true) => {
                    tracing::debug!("Weaviate ready (attempt {attempt})");
                    return Ok(());
                }
                Ok(false) => tracing::debug!("Weaviate not ready (attempt {attempt}/{attempts})"),
                Err(e) => tracing::debug!("Weaviate probe failed (attempt {attempt}/{attempts}): {e}"),
            }

            if attempt < attempts {
                tokio::time::sleep(self.probe.backoff_after(attempt)).await;
            }
        }

        tracing::error!("Weaviate is not ready after {attempts} attempt(s)");
        Err(RagstackError::database_unreachable())
    }

    /// Server version and modules
    pub async fn meta(&self) -> Result<DatabaseMeta> {
        self.ensure_ready().await?;
        self.database
            .meta()
            .await
            .inspect_err(|e| tracing::error!("Failed to fetch Weaviate meta: {e}"))
    }

    // ------------------------------------------------------------------------
    // Embedding
    // ------------------------------------------------------------------------

    /// Embed `text` through the embedding service.
    ///
    /// Uses `embedding_url` when given, otherwise the configured endpoint.
    /// Failures are logged and returned; they never panic, so a caller can
    /// skip one document and keep going.
    pub async fn embed(&self, text: &str, embedding_url: Option<&str>) -> Result<EmbeddingVector> {
        require_non_empty("text", text)?;

        let url = match embedding_url {
            Some(url) => url,
            None => {
                tracing::info!("Using default embedding URL: {}", self.embedder.endpoint());
                self.embedder.endpoint()
            }
        };

        self.embedder
            .embed_with_url(text, url)
            .await
            .inspect_err(|e| tracing::warn!("Failed to vectorize text: {e}"))
    }

    /// Embed each text independently; one failure does not stop the rest
    pub async fn embed_many(&self, texts: &[String]) -> Vec<Result<EmbeddingVector>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text, None).await);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::warn!("{failed} of {} texts could not be embedded", texts.len());
        }
        results
    }

    // ------------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------------

    /// All collections, keyed by canonical name
    pub async fn list_collections(&self) -> Result<BTreeMap<String, CollectionInfo>> {
        self.ensure_ready().await?;

        let collections = self
            .database
            .list_collections()
            .await
            .inspect_err(|e| tracing::error!("Failed to list collections: {e}"))?;

        Ok(collections
            .into_iter()
            .map(|info| (info.name.clone(), info))
            .collect())
    }

    /// Metadata of one collection
    pub async fn get_collection(&self, name: &str) -> Result<Outcome<CollectionInfo>> {
        let name = validate_collection_name(name)?;
        self.ensure_ready().await?;

        match self.find_collection(&name).await? {
            Some(info) => Ok(Outcome::Done(info)),
            None => Ok(Outcome::Skipped(SkipReason::NotFound)),
        }
    }

    /// Create a collection vectorized by the embedding service.
    ///
    /// An existing collection is left untouched and reported as
    /// `Skipped(AlreadyExists)`.
    pub async fn create_collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> Result<Outcome<()>> {
        let name = validate_collection_name(name)?;
        require_non_empty("model name", &options.model_name)?;
        let distance: DistanceMetric = options.distance_metric.parse()?;

        self.ensure_ready().await?;

        if self.find_collection(&name).await?.is_some() {
            tracing::warn!("Collection {name} already exists");
            return Ok(Outcome::Skipped(SkipReason::AlreadyExists));
        }

        let spec = CollectionSpec {
            name: name.clone(),
            model: options.model_name.clone(),
            distance,
            vectorizer_base_url: self.vectorizer_base_url.clone(),
        };
        self.database
            .create_collection(&spec)
            .await
            .inspect_err(|e| tracing::error!("Failed to create collection {name}: {e}"))?;

        tracing::info!(
            "Collection {name} created (distance: {distance}, model: {}, vectorizer: {})",
            spec.model,
            spec.vectorizer_base_url
        );
        Ok(Outcome::Done(()))
    }

    /// Delete a collection and every object in it
    pub async fn delete_collection(&self, name: &str) -> Result<Outcome<()>> {
        let name = validate_collection_name(name)?;
        self.ensure_ready().await?;

        if self.find_collection(&name).await?.is_none() {
            tracing::warn!("Collection {name} does not exist");
            return Ok(Outcome::Skipped(SkipReason::NotFound));
        }

        self.database
            .delete_collection(&name)
            .await
            .inspect_err(|e| tracing::error!("Failed to delete collection {name}: {e}"))?;

        tracing::info!("Collection {name} deleted");
        Ok(Outcome::Done(()))
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    /// Insert an object; the database vectorizes its text properties
    pub async fn insert_object(&self, collection: &str, properties: &Value) -> Result<Outcome<Uuid>> {
        self.insert(collection, properties, None).await
    }

    /// Insert an object with a vector computed here from `text`
    pub async fn insert_object_with_vector(
        &self,
        collection: &str,
        properties: &Value,
        text: &str,
    ) -> Result<Outcome<Uuid>> {
        validate_collection_name(collection)?;
        let vector = self.embed(text, None).await?;
        self.insert(collection, properties, Some(&vector)).await
    }

    async fn insert(
        &self,
        collection: &str,
        properties: &Value,
        vector: Option<&[f32]>,
    ) -> Result<Outcome<Uuid>> {
        let collection = validate_collection_name(collection)?;
        if !properties.is_object() {
            return Err(RagstackError::InvalidArgument(
                "object properties must be a JSON object".to_string(),
            ));
        }
        self.ensure_ready().await?;

        if self.find_collection(&collection).await?.is_none() {
            tracing::warn!("Collection {collection} does not exist");
            return Ok(Outcome::Skipped(SkipReason::NotFound));
        }

        let id = self
            .database
            .insert_object(&collection, properties, vector)
            .await
            .inspect_err(|e| tracing::error!("Failed to insert into {collection}: {e}"))?;

        tracing::debug!("Inserted object {id} into {collection}");
        Ok(Outcome::Done(id))
    }

    /// Delete every object in `collection` matching `filter`
    pub async fn delete_objects(
        &self,
        collection: &str,
        filter: &DeleteFilter,
    ) -> Result<Outcome<DeleteSummary>> {
        self.batch_delete(collection, filter, false).await
    }

    /// Report what [`Self::delete_objects`] would remove without removing it
    pub async fn preview_delete(
        &self,
        collection: &str,
        filter: &DeleteFilter,
    ) -> Result<Outcome<DeleteSummary>> {
        self.batch_delete(collection, filter, true).await
    }

    async fn batch_delete(
        &self,
        collection: &str,
        filter: &DeleteFilter,
        dry_run: bool,
    ) -> Result<Outcome<DeleteSummary>> {
        let collection = validate_collection_name(collection)?;
        self.ensure_ready().await?;

        if self.find_collection(&collection).await?.is_none() {
            tracing::warn!("Collection {collection} does not exist");
            return Ok(Outcome::Skipped(SkipReason::NotFound));
        }

        let summary = self
            .database
            .delete_objects(&collection, filter, dry_run)
            .await
            .inspect_err(|e| tracing::error!("Failed to delete objects in {collection}: {e}"))?;

        tracing::info!(
            "Delete in {collection}{}: {} matched, {} deleted, {} failed",
            if dry_run { " (dry run)" } else { "" },
            summary.matches,
            summary.successful,
            summary.failed
        );
        Ok(Outcome::Done(summary))
    }

    /// Number of objects in `collection`, optionally restricted by `filter`
    pub async fn count_objects(
        &self,
        collection: &str,
        filter: Option<&DeleteFilter>,
    ) -> Result<Outcome<u64>> {
        let collection = validate_collection_name(collection)?;
        self.ensure_ready().await?;

        if self.find_collection(&collection).await?.is_none() {
            return Ok(Outcome::Skipped(SkipReason::NotFound));
        }

        let count = self
            .database
            .count_objects(&collection, filter)
            .await
            .inspect_err(|e| tracing::error!("Failed to count objects in {collection}: {e}"))?;
        Ok(Outcome::Done(count))
    }

    async fn find_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        self.database
            .get_collection(name)
            .await
            .inspect_err(|e| tracing::error!("Failed to look up collection {name}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedEmbedding, InMemoryDatabase};
    use crate::FilterValue;
    use serde_json::json;

    fn fast_probe(max_attempts: u32) -> ProbeConfig {
        ProbeConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
        }
    }

    fn client_with(db: &Arc<InMemoryDatabase>) -> VectorStoreClient {
        VectorStoreClient::new(
            db.clone(),
            Arc::new(FixedEmbedding::new(
                "http://vllm-embedding:8000/v1/embeddings",
                1024,
            )),
            fast_probe(1),
        )
    }

    #[tokio::test]
    async fn test_create_then_list_contains_name_once() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);

        let outcome = client
            .create_collection("docs", &CollectionOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Done(()));

        let collections = client.list_collections().await.unwrap();
        assert_eq!(collections.keys().filter(|k| *k == "Docs").count(), 1);

        let info = &collections["Docs"];
        assert_eq!(info.vectorizer.as_deref(), Some("text2vec-openai"));
        assert_eq!(
            info.vectorizer_base_url.as_deref(),
            Some("http://vllm-embedding:8000")
        );
        assert_eq!(info.model.as_deref(), Some("Qwen3-Embedding-0.6B"));
        assert_eq!(info.distance.as_deref(), Some("cosine"));
    }

    #[tokio::test]
    async fn test_create_twice_is_skipped_and_unchanged() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);

        client
            .create_collection("docs", &CollectionOptions::default())
            .await
            .unwrap();
        let before = client.list_collections().await.unwrap();

        let second = client
            .create_collection(
                "docs",
                &CollectionOptions::default()
                    .with_distance("dot")
                    .with_model("bge-m3"),
            )
            .await
            .unwrap();
        assert_eq!(second, Outcome::Skipped(SkipReason::AlreadyExists));

        let after = client.list_collections().await.unwrap();
        assert_eq!(before, after);
        assert_eq!(db.calls("create_collection"), 1);
    }

    #[tokio::test]
    async fn test_invalid_metric_rejected_before_network() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);

        let err = client
            .create_collection("docs", &CollectionOptions::default().with_distance("invalid"))
            .await
            .unwrap_err();

        assert!(matches!(err, RagstackError::InvalidArgument(_)));
        assert_eq!(db.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_names_rejected_before_network() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);

        assert!(client
            .create_collection("", &CollectionOptions::default())
            .await
            .unwrap_err()
            .is_rejected_locally());
        assert!(client.delete_collection("  ").await.is_err());
        assert!(client
            .delete_objects("", &DeleteFilter::text_equals("title", "X"))
            .await
            .is_err());
        assert!(client.embed("", None).await.is_err());
        assert_eq!(db.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_collection_names_rejected_before_network() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);
        client
            .create_collection("docs", &CollectionOptions::default())
            .await
            .unwrap();
        let calls_before = db.total_calls();

        let filter = DeleteFilter::text_equals("title", "X");
        for name in ["docs#stale", "x/../Docs", "docs/", "my-docs", "1docs"] {
            assert!(matches!(
                client.delete_collection(name).await,
                Err(RagstackError::InvalidArgument(_))
            ));
            assert!(client
                .create_collection(name, &CollectionOptions::default())
                .await
                .is_err());
            assert!(client.get_collection(name).await.is_err());
            assert!(client.delete_objects(name, &filter).await.is_err());
            assert!(client.count_objects(name, None).await.is_err());
            assert!(client
                .insert_object(name, &json!({ "title": "X" }))
                .await
                .is_err());
        }

        assert_eq!(db.total_calls(), calls_before);
        assert!(client.list_collections().await.unwrap().contains_key("Docs"));
    }

    #[tokio::test]
    async fn test_delete_missing_collection_is_skipped() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);

        let outcome = client.delete_collection("nothing_here").await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::NotFound));
        assert_eq!(db.calls("delete_collection"), 0);

        let outcome = client
            .delete_objects("nothing_here", &DeleteFilter::text_equals("title", "X"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::NotFound));
    }

    #[tokio::test]
    async fn test_unreachable_database_short_circuits() {
        let db = Arc::new(InMemoryDatabase::new());
        db.set_ready(false);
        let client = client_with(&db);

        let err = client.list_collections().await.unwrap_err();
        assert!(matches!(
            err,
            RagstackError::ConnectionUnavailable { ref service } if service == "weaviate"
        ));

        let err = client
            .create_collection("docs", &CollectionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagstackError::ConnectionUnavailable { .. }));

        assert_eq!(db.calls("get_collection"), 0);
        assert_eq!(db.calls("create_collection"), 0);
    }

    #[tokio::test]
    async fn test_probe_retries_then_succeeds() {
        let db = Arc::new(InMemoryDatabase::new());
        db.fail_next_probes(2);
        let client = VectorStoreClient::new(
            db.clone(),
            Arc::new(FixedEmbedding::new("http://embed/v1/embeddings", 4)),
            fast_probe(3),
        );

        client.ensure_ready().await.unwrap();
        assert_eq!(db.calls("is_ready"), 3);
    }

    #[tokio::test]
    async fn test_probe_gives_up_after_max_attempts() {
        let db = Arc::new(InMemoryDatabase::new());
        db.fail_next_probes(5);
        let client = VectorStoreClient::new(
            db.clone(),
            Arc::new(FixedEmbedding::new("http://embed/v1/embeddings", 4)),
            fast_probe(3),
        );

        assert!(client.ensure_ready().await.is_err());
        assert_eq!(db.calls("is_ready"), 3);
    }

    #[tokio::test]
    async fn test_probe_result_is_not_cached() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);

        client.ensure_ready().await.unwrap();
        db.set_ready(false);
        assert!(client.ensure_ready().await.is_err());
        db.set_ready(true);
        client.ensure_ready().await.unwrap();
        assert_eq!(db.calls("is_ready"), 3);
    }

    #[tokio::test]
    async fn test_embed_failure_does_not_abort_batch() {
        let db = Arc::new(InMemoryDatabase::new());
        let embedder = FixedEmbedding::new("http://embed/v1/embeddings", 8).failing_on("bad");
        let client = VectorStoreClient::new(db, Arc::new(embedder), fast_probe(1));

        let texts = vec!["one".to_string(), "bad".to_string(), "three".to_string()];
        let results = client.embed_many(&texts).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().len(), 8);
        assert!(matches!(results[1], Err(RagstackError::UpstreamEmbedding(_))));
        assert_eq!(results[2].as_ref().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_embed_uses_override_url() {
        let db = Arc::new(InMemoryDatabase::new());
        let embedder = Arc::new(FixedEmbedding::new("http://embed/v1/embeddings", 8));
        let client = VectorStoreClient::new(db, embedder.clone(), fast_probe(1));

        client.embed("text", None).await.unwrap();
        client
            .embed("text", Some("http://other:3390/v1/embeddings"))
            .await
            .unwrap();

        assert_eq!(
            embedder.requested_urls(),
            vec![
                "http://embed/v1/embeddings".to_string(),
                "http://other:3390/v1/embeddings".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_end_to_end_docs_scenario() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);

        // Create and verify the vectorizer wiring
        client
            .create_collection("docs", &CollectionOptions::default())
            .await
            .unwrap();
        let info = client.get_collection("docs").await.unwrap().done().unwrap();
        assert_eq!(
            info.vectorizer_base_url.as_deref(),
            Some(client.vectorizer_base_url())
        );

        // Embed one document outside the database and store it
        let vector = client.embed("Some document about X", None).await.unwrap();
        assert_eq!(vector.len(), 1024);
        client
            .insert_object_with_vector("docs", &json!({ "title": "X" }), "Some document about X")
            .await
            .unwrap();
        client
            .insert_object("docs", &json!({ "title": "Y" }))
            .await
            .unwrap();

        // Remove everything titled X
        let filter: DeleteFilter = serde_json::from_value(json!({
            "path": ["title"],
            "operator": "Equal",
            "valueText": "X"
        }))
        .unwrap();
        let summary = client
            .delete_objects("docs", &filter)
            .await
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(summary.successful, 1);
        assert!(!summary.dry_run);

        let remaining = client.count_objects("docs", Some(&filter)).await.unwrap();
        assert_eq!(remaining, Outcome::Done(0));
        assert_eq!(client.count_objects("docs", None).await.unwrap(), Outcome::Done(1));

        // Drop the collection
        assert!(client.delete_collection("docs").await.unwrap().is_done());
        assert!(!client.list_collections().await.unwrap().contains_key("Docs"));
    }

    #[tokio::test]
    async fn test_preview_delete_leaves_objects() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);

        client
            .create_collection("docs", &CollectionOptions::default())
            .await
            .unwrap();
        client
            .insert_object("docs", &json!({ "title": "X" }))
            .await
            .unwrap();

        let filter = DeleteFilter::new(
            &["title"],
            crate::FilterOperator::Equal,
            FilterValue::Text("X".to_string()),
        );
        let summary = client
            .preview_delete("docs", &filter)
            .await
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(summary.matches, 1);
        assert_eq!(summary.successful, 0);
        assert!(summary.dry_run);
        assert_eq!(client.count_objects("docs", None).await.unwrap(), Outcome::Done(1));
    }

    #[tokio::test]
    async fn test_insert_rejects_non_object_properties() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);

        let err = client
            .insert_object("docs", &json!(["not", "an", "object"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RagstackError::InvalidArgument(_)));
        assert_eq!(db.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_database_errors_are_returned() {
        let db = Arc::new(InMemoryDatabase::new());
        let client = client_with(&db);
        client
            .create_collection("docs", &CollectionOptions::default())
            .await
            .unwrap();

        db.fail_operation("delete_objects");
        let err = client
            .delete_objects("docs", &DeleteFilter::text_equals("title", "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagstackError::UpstreamDatabase(_)));
    }
}

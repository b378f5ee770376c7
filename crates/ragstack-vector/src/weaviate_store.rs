//! Weaviate implementation of the vector database primitives
//!
//! Uses the REST API for schema and object operations and GraphQL for
//! aggregate counts. The gRPC endpoint is carried in configuration and
//! reported, but no data travels over it.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use ragstack_core::{RagstackError, Result, WeaviateConfig};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    validate_collection_name, CollectionInfo, CollectionSpec, DatabaseMeta, DeleteFilter,
    DeleteSummary, VectorDatabase, VECTORIZER_MODULE,
};

/// Header Weaviate forwards to the `text2vec-openai` module
const OPENAI_KEY_HEADER: &str = "X-OpenAI-Api-Key";

/// Weaviate REST client
pub struct WeaviateHttp {
    client: Client,
    base_url: String,
    grpc_endpoint: String,
    api_key: Option<String>,
    vectorizer_api_key: String,
}

impl WeaviateHttp {
    /// Create a client from connection settings.
    ///
    /// No request is made; readiness is checked per operation.
    pub fn new(config: &WeaviateConfig, vectorizer_api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RagstackError::UpstreamDatabase(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.http_url(),
            grpc_endpoint: config.grpc_endpoint(),
            api_key: config.api_key.clone(),
            vectorizer_api_key: vectorizer_api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn grpc_endpoint(&self) -> &str {
        &self.grpc_endpoint
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header(OPENAI_KEY_HEADER, &self.vectorizer_api_key);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder, action: &str) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| RagstackError::UpstreamDatabase(format!("{action} failed: {e}")))
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response, action: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RagstackError::UpstreamDatabase(format!(
                "{action} returned {status}: {error_text}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| RagstackError::UpstreamDatabase(format!("{action}: malformed response: {e}")))
    }

    /// `/v1/schema/{class}` for a name that cannot alter the URL
    fn schema_path(name: &str) -> Result<String> {
        let class = validate_collection_name(name)?;
        Ok(format!("/v1/schema/{class}"))
    }

    /// One `DELETE /v1/batch/objects` request
    async fn batch_delete_pass(
        &self,
        collection: &str,
        filter: &DeleteFilter,
        dry_run: bool,
    ) -> Result<BatchDeleteResponse> {
        let output = if dry_run { "verbose" } else { "minimal" };
        let body = json!({
            "match": {
                "class": collection,
                "where": filter,
            },
            "dryRun": dry_run,
            "output": output,
        });

        let response = self
            .send(
                self.request(Method::DELETE, "/v1/batch/objects").json(&body),
                "Deleting objects",
            )
            .await?;
        Self::json_body(response, "Deleting objects").await
    }

    async fn expect_success(response: Response, action: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let error_text = response.text().await.unwrap_or_default();
        Err(RagstackError::UpstreamDatabase(format!(
            "{action} returned {status}: {error_text}"
        )))
    }
}

/// Class definition for a collection vectorized by the embedding service
pub fn class_definition(spec: &CollectionSpec) -> Value {
    json!({
        "class": spec.name,
        "vectorizer": VECTORIZER_MODULE,
        "moduleConfig": {
            VECTORIZER_MODULE: {
                "baseURL": spec.vectorizer_base_url,
                "model": spec.model,
                "vectorizeClassName": false
            }
        },
        "vectorIndexType": "hnsw",
        "vectorIndexConfig": {
            "distance": spec.distance.as_str()
        }
    })
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    #[serde(default)]
    classes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    version: String,
    hostname: Option<String>,
    #[serde(default)]
    modules: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct BatchDeleteResponse {
    #[serde(rename = "dryRun", default)]
    dry_run: bool,
    results: BatchDeleteResults,
}

#[derive(Debug, Deserialize)]
struct BatchDeleteResults {
    #[serde(default)]
    matches: u64,
    /// Most objects one request will delete (`QUERY_MAXIMUM_RESULTS`)
    #[serde(default)]
    limit: u64,
    #[serde(default)]
    successful: u64,
    #[serde(default)]
    failed: u64,
}

/// Build the GraphQL aggregate query counting objects in a collection
pub fn aggregate_count_query(collection: &str, filter: Option<&DeleteFilter>) -> String {
    let arguments = filter
        .map(|f| format!("(where: {})", f.to_graphql()))
        .unwrap_or_default();
    format!("{{ Aggregate {{ {collection}{arguments} {{ meta {{ count }} }} }} }}")
}

/// Pull the count out of an aggregate response
fn parse_aggregate_count(collection: &str, body: &Value) -> Result<u64> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            return Err(RagstackError::UpstreamDatabase(format!(
                "Aggregate query failed: {}",
                messages.join("; ")
            )));
        }
    }

    body.pointer(&format!("/data/Aggregate/{collection}/0/meta/count"))
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            RagstackError::UpstreamDatabase("Aggregate query: malformed response".to_string())
        })
}

#[async_trait]
impl VectorDatabase for WeaviateHttp {
    async fn is_ready(&self) -> Result<bool> {
        let response = self
            .send(self.request(Method::GET, "/v1/.well-known/ready"), "Readiness probe")
            .await?;
        Ok(response.status().is_success())
    }

    async fn meta(&self) -> Result<DatabaseMeta> {
        let response = self
            .send(self.request(Method::GET, "/v1/meta"), "Fetching meta")
            .await?;
        let meta: MetaResponse = Self::json_body(response, "Fetching meta").await?;

        Ok(DatabaseMeta {
            version: meta.version,
            hostname: meta.hostname,
            modules: meta.modules.keys().cloned().collect(),
        })
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let response = self
            .send(self.request(Method::GET, "/v1/schema"), "Listing collections")
            .await?;
        let schema: SchemaResponse = Self::json_body(response, "Listing collections").await?;

        Ok(schema
            .classes
            .iter()
            .filter_map(CollectionInfo::from_class)
            .collect())
    }

    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let response = self
            .send(
                self.request(Method::GET, &Self::schema_path(name)?),
                "Fetching collection",
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let class: Value = Self::json_body(response, "Fetching collection").await?;
        Ok(CollectionInfo::from_class(&class))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let response = self
            .send(
                self.request(Method::POST, "/v1/schema")
                    .json(&class_definition(spec)),
                "Creating collection",
            )
            .await?;
        Self::expect_success(response, "Creating collection").await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let response = self
            .send(
                self.request(Method::DELETE, &Self::schema_path(name)?),
                "Deleting collection",
            )
            .await?;
        Self::expect_success(response, "Deleting collection").await
    }

    async fn insert_object(
        &self,
        collection: &str,
        properties: &Value,
        vector: Option<&[f32]>,
    ) -> Result<Uuid> {
        let mut body = json!({
            "class": collection,
            "properties": properties,
        });
        if let Some(vector) = vector {
            body["vector"] = json!(vector);
        }

        let response = self
            .send(
                self.request(Method::POST, "/v1/objects").json(&body),
                "Inserting object",
            )
            .await?;
        let object: ObjectResponse = Self::json_body(response, "Inserting object").await?;
        Ok(object.id)
    }

    async fn delete_objects(
        &self,
        collection: &str,
        filter: &DeleteFilter,
        dry_run: bool,
    ) -> Result<DeleteSummary> {
        let mut summary = DeleteSummary {
            dry_run,
            ..DeleteSummary::default()
        };

        // A pass stops at `limit` matches; repeat until one comes back short.
        loop {
            let pass = self.batch_delete_pass(collection, filter, dry_run).await?;
            let results = pass.results;
            summary.matches += results.matches;
            summary.successful += results.successful;
            summary.failed += results.failed;
            summary.dry_run = pass.dry_run;

            let capped = results.limit > 0 && results.matches >= results.limit;
            if dry_run || !capped || results.successful == 0 {
                break;
            }
            tracing::debug!(
                "Batch delete in {collection} hit the {} object limit, continuing",
                results.limit
            );
        }

        Ok(summary)
    }

    async fn count_objects(&self, collection: &str, filter: Option<&DeleteFilter>) -> Result<u64> {
        let query = aggregate_count_query(collection, filter);
        let response = self
            .send(
                self.request(Method::POST, "/v1/graphql")
                    .json(&json!({ "query": query })),
                "Counting objects",
            )
            .await?;
        let body: Value = Self::json_body(response, "Counting objects").await?;
        parse_aggregate_count(collection, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DistanceMetric;

    fn spec(distance: DistanceMetric) -> CollectionSpec {
        CollectionSpec {
            name: "Docs".to_string(),
            model: "Qwen3-Embedding-0.6B".to_string(),
            distance,
            vectorizer_base_url: "http://vllm-embedding:8000".to_string(),
        }
    }

    #[test]
    fn test_class_definition_wires_vectorizer() {
        let class = class_definition(&spec(DistanceMetric::Dot));

        assert_eq!(class["class"], "Docs");
        assert_eq!(class["vectorizer"], "text2vec-openai");
        assert_eq!(
            class["moduleConfig"]["text2vec-openai"]["baseURL"],
            "http://vllm-embedding:8000"
        );
        assert_eq!(
            class["moduleConfig"]["text2vec-openai"]["model"],
            "Qwen3-Embedding-0.6B"
        );
        assert_eq!(class["vectorIndexConfig"]["distance"], "dot");

        // Reading the definition back yields the same wiring
        let info = CollectionInfo::from_class(&class).unwrap();
        assert_eq!(info.distance.as_deref(), Some("dot"));
        assert_eq!(info.model.as_deref(), Some("Qwen3-Embedding-0.6B"));
    }

    #[test]
    fn test_aggregate_count_query() {
        assert_eq!(
            aggregate_count_query("Docs", None),
            "{ Aggregate { Docs { meta { count } } } }"
        );

        let filter = DeleteFilter::text_equals("title", "X");
        assert_eq!(
            aggregate_count_query("Docs", Some(&filter)),
            r#"{ Aggregate { Docs(where: {path: ["title"], operator: Equal, valueText: "X"}) { meta { count } } } }"#
        );
    }

    #[test]
    fn test_parse_aggregate_count() {
        let body = json!({ "data": { "Aggregate": { "Docs": [ { "meta": { "count": 7 } } ] } } });
        assert_eq!(parse_aggregate_count("Docs", &body).unwrap(), 7);

        let body = json!({ "errors": [ { "message": "no such class" } ] });
        let err = parse_aggregate_count("Docs", &body).unwrap_err();
        assert!(err.to_string().contains("no such class"));

        assert!(parse_aggregate_count("Docs", &json!({ "data": {} })).is_err());
    }

    #[test]
    fn test_endpoints_from_config() {
        let config = WeaviateConfig {
            http_host: "weaviate".to_string(),
            http_port: 3340,
            grpc_port: 50052,
            ..WeaviateConfig::default()
        };
        let db = WeaviateHttp::new(&config, "dummy").unwrap();
        assert_eq!(db.base_url(), "http://weaviate:3340");
        assert_eq!(db.grpc_endpoint(), "localhost:50052");
    }
}

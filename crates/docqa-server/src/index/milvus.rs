//! Milvus REST backend (`vector.type = milvus`).
//!
//! Satisfies the same contract and filter keys as the in-memory store:
//! membership on `document_id`, prefix match on `hierarchy`, descending
//! score. Records are stored with flattened metadata fields so filters
//! compile to plain Milvus expressions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::MilvusConfig;

use super::vector_store::{ChunkMetadata, SearchFilter, VectorHit, VectorRecord, VectorStore};

pub struct MilvusVectorStore {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

impl MilvusVectorStore {
    pub fn new(config: &MilvusConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: format!("http://{}:{}", config.host, config.port),
            collection: config.collection.clone(),
            dimension: config.dimension,
        }
    }

    fn url(&self, op: &str) -> String {
        format!("{}/v2/vectordb/entities/{}", self.base_url, op)
    }

    async fn post(&self, op: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.url(op))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("milvus {} request failed", op))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("milvus {} returned {}: {}", op, status, text);
        }

        let value: Value = response
            .json()
            .await
            .with_context(|| format!("milvus {} response was not JSON", op))?;

        let code = value.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        if code != 0 {
            anyhow::bail!("milvus {} error code {}: {}", op, code, value);
        }

        Ok(value)
    }

    fn filter_expr(filter: &SearchFilter) -> String {
        let mut clauses: Vec<String> = Vec::new();

        if let Some(ids) = &filter.document_ids {
            let quoted: Vec<String> = ids.iter().map(|id| format!("\"{}\"", id)).collect();
            clauses.push(format!("document_id in [{}]", quoted.join(", ")));
        }
        if let Some(prefix) = &filter.hierarchy_prefix {
            clauses.push(format!("hierarchy like \"{}%\"", prefix));
        }

        clauses.join(" and ")
    }

    fn hit_from_row(row: &Value) -> Option<VectorHit> {
        let get_str = |key: &str| row.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());

        Some(VectorHit {
            id: get_str("id")?,
            document_id: get_str("document_id").unwrap_or_default(),
            content: get_str("content").unwrap_or_default(),
            metadata: ChunkMetadata {
                filename: get_str("filename").unwrap_or_default(),
                chunk_index: row
                    .get("chunk_index")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize,
                heading: get_str("heading").filter(|h| !h.is_empty()),
                hierarchy: get_str("hierarchy").unwrap_or_default(),
                start_page: row
                    .get("start_page")
                    .and_then(|v| v.as_i64())
                    .filter(|p| *p >= 0)
                    .map(|p| p as u32),
            },
            score: row
                .get("distance")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0) as f32,
        })
    }
}

#[async_trait]
impl VectorStore for MilvusVectorStore {
    fn kind(&self) -> &str {
        "milvus"
    }

    async fn insert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut data = Vec::with_capacity(records.len());
        for record in &records {
            if record.embedding.len() != self.dimension {
                anyhow::bail!(
                    "embedding dimension mismatch for {}: expected {}, got {}",
                    record.id,
                    self.dimension,
                    record.embedding.len()
                );
            }
            data.push(json!({
                "id": record.id,
                "document_id": record.document_id,
                "content": record.content,
                "filename": record.metadata.filename,
                "chunk_index": record.metadata.chunk_index,
                "heading": record.metadata.heading.clone().unwrap_or_default(),
                "hierarchy": record.metadata.hierarchy,
                "start_page": record.metadata.start_page.map(i64::from).unwrap_or(-1),
                "vector": record.embedding,
            }));
        }

        debug!("milvus insert: {} records", data.len());
        self.post(
            "insert",
            json!({ "collectionName": self.collection, "data": data }),
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>> {
        let mut body = json!({
            "collectionName": self.collection,
            "data": [query],
            "limit": top_k,
            "annsField": "vector",
            "outputFields": [
                "id", "document_id", "content", "filename",
                "chunk_index", "heading", "hierarchy", "start_page"
            ],
        });

        let expr = Self::filter_expr(filter);
        if !expr.is_empty() {
            body["filter"] = Value::String(expr);
        }

        let value = self.post("search", body).await?;
        let rows = value
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(rows.iter().filter_map(Self::hit_from_row).collect())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        self.post(
            "delete",
            json!({
                "collectionName": self.collection,
                "filter": format!("document_id == \"{}\"", document_id),
            }),
        )
        .await?;
        Ok(())
    }

    async fn count_by_document(&self, document_id: &str) -> Result<usize> {
        let value = self
            .post(
                "query",
                json!({
                    "collectionName": self.collection,
                    "filter": format!("document_id == \"{}\"", document_id),
                    "outputFields": ["count(*)"],
                }),
            )
            .await?;

        let count = value
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("count(*)"))
            .and_then(|c| c.as_u64())
            .unwrap_or(0);

        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_expr_combines_membership_and_prefix() {
        let filter = SearchFilter {
            document_ids: Some(vec!["d1".into(), "d2".into()]),
            hierarchy_prefix: Some("1. Basics".into()),
        };
        assert_eq!(
            MilvusVectorStore::filter_expr(&filter),
            "document_id in [\"d1\", \"d2\"] and hierarchy like \"1. Basics%\""
        );
    }

    #[test]
    fn empty_filter_is_empty_expr() {
        assert_eq!(MilvusVectorStore::filter_expr(&SearchFilter::default()), "");
    }

    #[test]
    fn hit_parsing_tolerates_missing_fields() {
        let row = json!({ "id": "c1", "distance": 0.87 });
        let hit = MilvusVectorStore::hit_from_row(&row).unwrap();
        assert_eq!(hit.id, "c1");
        assert!((hit.score - 0.87).abs() < 1e-6);
        assert!(hit.metadata.start_page.is_none());

        // no id, no hit
        assert!(MilvusVectorStore::hit_from_row(&json!({ "distance": 0.5 })).is_none());
    }
}

//! Document ingestion: parse -> chunk -> enrich -> embed -> dual index.
//!
//! Uploads create the record and store the raw file; the pipeline runs
//! off-thread and moves the document through PROCESSING to READY or
//! FAILED exactly once. Vector and BM25 entries are secondary views of
//! the chunk rows: deletion cascades, and reindexing rebuilds them from
//! the chunk table instead of repairing them.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{ChunkingSettings, DocumentConfig, RagConfig};
use crate::database::models::{Document, DocumentChunk, DocumentStatus, DocumentType};
use crate::database::Repository;
use crate::document::chunker::{ChunkingConfig, HierarchicalChunker};
use crate::document::enricher::ContextualEnricher;
use crate::document::parser::{DocumentParser, ParsedDocument};
use crate::embedding::EmbeddingClient;
use crate::index::{Bm25Index, ChunkMetadata, VectorRecord, VectorStore};
use crate::utils::error::AppError;
use crate::utils::token_estimator;

pub struct IngestService {
    repository: Arc<dyn Repository>,
    vector_store: Arc<dyn VectorStore>,
    bm25: Arc<Bm25Index>,
    embedder: Arc<dyn EmbeddingClient>,
    enricher: Arc<ContextualEnricher>,
    document_config: DocumentConfig,
    chunking: ChunkingSettings,
    rag: RagConfig,
}

impl IngestService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn Repository>,
        vector_store: Arc<dyn VectorStore>,
        bm25: Arc<Bm25Index>,
        embedder: Arc<dyn EmbeddingClient>,
        enricher: Arc<ContextualEnricher>,
        document_config: DocumentConfig,
        chunking: ChunkingSettings,
        rag: RagConfig,
    ) -> Self {
        Self {
            repository,
            vector_store,
            bm25,
            embedder,
            enricher,
            document_config,
            chunking,
            rag,
        }
    }

    /// Validate an upload, store the raw file and create the document
    /// record, returned in PROCESSING state ready for the async pipeline.
    pub async fn create_document(
        &self,
        filename: &str,
        data: &[u8],
    ) -> Result<Document, AppError> {
        if data.is_empty() {
            return Err(AppError::InvalidArgument("empty upload".to_string()));
        }
        if data.len() as u64 > self.document_config.max_file_size {
            return Err(AppError::FileTooLarge(format!(
                "{} bytes exceeds the {} byte limit",
                data.len(),
                self.document_config.max_file_size
            )));
        }

        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .ok_or_else(|| AppError::InvalidArgument("filename has no extension".to_string()))?;

        if !self.document_config.allowed_list().contains(&extension) {
            return Err(AppError::DocumentProcess(format!(
                "unsupported file type: {}",
                extension
            )));
        }
        let doc_type = DocumentType::from_extension(&extension).ok_or_else(|| {
            AppError::DocumentProcess(format!("unsupported file type: {}", extension))
        })?;

        // Cross-check the payload against the declared type; extensions lie.
        if doc_type == DocumentType::Pdf {
            let mime = infer::get(data).map(|k| k.mime_type()).unwrap_or("unknown");
            if mime != "application/pdf" {
                return Err(AppError::DocumentProcess(format!(
                    "declared pdf but payload looks like {}",
                    mime
                )));
            }
        }

        tokio::fs::create_dir_all(&self.document_config.storage_path)
            .await
            .map_err(|e| AppError::Internal(format!("storage directory: {}", e)))?;

        let stored_name = format!("{}.{}", uuid::Uuid::new_v4(), extension);
        let storage_path = Path::new(&self.document_config.storage_path)
            .join(&stored_name)
            .to_string_lossy()
            .to_string();

        tokio::fs::write(&storage_path, data)
            .await
            .map_err(|e| AppError::Internal(format!("failed to store upload: {}", e)))?;

        let doc = Document::new(
            filename.to_string(),
            doc_type,
            data.len() as u64,
            storage_path,
        );
        self.repository
            .insert_document(doc.clone())
            .await
            .map_err(AppError::from)?;

        self.repository
            .update_document_status(&doc.id, DocumentStatus::Processing)
            .await
            .map_err(AppError::from)?;

        info!("created document {} ({} bytes)", doc.id, data.len());

        let mut doc = doc;
        doc.status = DocumentStatus::Processing;
        Ok(doc)
    }

    /// Run the full pipeline for a stored upload. The terminal status
    /// transition happens exactly once, here.
    pub async fn process_document(&self, document_id: &str, data: Vec<u8>, skip_enrichment: bool) {
        match self.run_pipeline(document_id, &data, skip_enrichment).await {
            Ok(chunk_count) => {
                info!("document {} ready with {} chunks", document_id, chunk_count);
            }
            Err(e) => {
                error!("ingestion failed for document {}: {}", document_id, e);
                if let Err(e) = self
                    .repository
                    .update_document_status(document_id, DocumentStatus::Failed)
                    .await
                {
                    error!("could not mark document {} failed: {}", document_id, e);
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        document_id: &str,
        data: &[u8],
        skip_enrichment: bool,
    ) -> Result<usize, AppError> {
        let Some(doc) = self
            .repository
            .get_document(document_id)
            .await
            .map_err(AppError::from)?
        else {
            return Err(AppError::NotFound(format!("document {}", document_id)));
        };

        let parsed = DocumentParser::parse(data, doc.doc_type)?;
        debug!(
            "parsed {}: {} chars, {:?} pages",
            document_id,
            parsed.content.len(),
            parsed.page_count
        );

        let mut chunks = self.build_chunks(&doc, &parsed);
        if chunks.is_empty() {
            return Err(AppError::DocumentProcess(
                "document produced no chunks".to_string(),
            ));
        }

        if self.rag.contextual_retrieval_enabled && !skip_enrichment {
            self.enricher.enrich(&parsed.content, &mut chunks).await;
        }

        self.index_chunks(&doc, &chunks).await?;

        let chunk_count = chunks.len();
        self.repository
            .insert_chunks(document_id, chunks)
            .await
            .map_err(AppError::from)?;
        self.repository
            .mark_document_ready(document_id, parsed.content, chunk_count)
            .await
            .map_err(AppError::from)?;

        Ok(chunk_count)
    }

    /// Chunk the canonical text and attach ids, indexes, token counts and
    /// (for PDFs) page ranges.
    fn build_chunks(&self, doc: &Document, parsed: &ParsedDocument) -> Vec<DocumentChunk> {
        let chunker = HierarchicalChunker::new(ChunkingConfig {
            chunk_size: self.chunking.chunk_size,
            chunk_overlap: self.chunking.chunk_overlap,
            min_chunk_size: self.chunking.min_chunk_size,
        });

        let mut cursor = 0usize;
        let mut chunks = Vec::new();

        for (index, draft) in chunker.chunk(&parsed.content).into_iter().enumerate() {
            let (start_page, end_page) = match &parsed.page_offsets {
                Some(_) => {
                    let found = parsed.content[cursor..]
                        .find(draft.content.as_str())
                        .map(|p| cursor + p);
                    if let Some(start) = found {
                        cursor = start;
                        (
                            parsed.page_for_offset(start),
                            parsed.page_for_offset(start + draft.content.len()),
                        )
                    } else {
                        (None, None)
                    }
                }
                None => (None, None),
            };

            let id = uuid::Uuid::new_v4().to_string();
            let token_count = token_estimator::estimate_tokens(&draft.content);
            chunks.push(DocumentChunk {
                id: id.clone(),
                document_id: doc.id.clone(),
                chunk_index: index,
                content: draft.content,
                heading: draft.heading,
                hierarchy: draft.hierarchy,
                start_page,
                end_page,
                token_count,
                context_prefix: None,
                vector_id: id,
            });
        }

        chunks
    }

    /// Embed the enriched contents and write both secondary indices.
    async fn index_chunks(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<(), AppError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.enriched_content()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(AppError::Llm)?;

        let mut records = Vec::with_capacity(chunks.len());
        let mut rows = Vec::with_capacity(chunks.len());
        for ((chunk, text), embedding) in chunks.iter().zip(texts).zip(embeddings) {
            let metadata = ChunkMetadata {
                filename: doc.filename.clone(),
                chunk_index: chunk.chunk_index,
                heading: chunk.heading.clone(),
                hierarchy: chunk.hierarchy.clone(),
                start_page: chunk.start_page,
            };
            records.push(VectorRecord {
                id: chunk.id.clone(),
                document_id: doc.id.clone(),
                content: chunk.content.clone(),
                embedding,
                metadata: metadata.clone(),
            });
            rows.push((chunk.id.clone(), text, metadata));
        }

        self.vector_store
            .insert(records)
            .await
            .map_err(AppError::from)?;
        self.bm25.index_document(&doc.id, rows);
        Ok(())
    }

    /// Delete a document and everything it owns: chunks, vectors, BM25
    /// tables and the stored file.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), AppError> {
        let Some(doc) = self
            .repository
            .get_document(document_id)
            .await
            .map_err(AppError::from)?
        else {
            return Err(AppError::NotFound(format!("document {}", document_id)));
        };

        self.vector_store
            .delete_by_document(document_id)
            .await
            .map_err(AppError::from)?;
        self.bm25.remove_document(document_id);
        self.repository
            .delete_chunks(document_id)
            .await
            .map_err(AppError::from)?;
        self.repository
            .delete_document(document_id)
            .await
            .map_err(AppError::from)?;

        if let Err(e) = tokio::fs::remove_file(&doc.storage_path).await {
            warn!("stored file for {} not removed: {}", document_id, e);
        }

        info!("deleted document {} and its indices", document_id);
        Ok(())
    }

    /// Rebuild both secondary indices from the chunk table. Indices are
    /// views: they are dropped and re-created, never repaired.
    pub async fn reindex(&self, document_id: &str) -> Result<usize, AppError> {
        let Some(doc) = self
            .repository
            .get_document(document_id)
            .await
            .map_err(AppError::from)?
        else {
            return Err(AppError::NotFound(format!("document {}", document_id)));
        };

        let chunks = self
            .repository
            .get_chunks(document_id)
            .await
            .map_err(AppError::from)?;
        if chunks.is_empty() {
            return Err(AppError::InvalidArgument(format!(
                "document {} has no chunks to reindex",
                document_id
            )));
        }

        self.vector_store
            .delete_by_document(document_id)
            .await
            .map_err(AppError::from)?;
        self.bm25.remove_document(document_id);

        self.index_chunks(&doc, &chunks).await?;

        info!("reindexed document {} ({} chunks)", document_id, chunks.len());
        Ok(chunks.len())
    }
}

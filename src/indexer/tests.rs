use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::chunking::ChunkConfig;
use crate::extraction::{ContentElement, DocumentMetadata, TableCell};
use crate::index::{IndexConfig, MetadataFilter};

/// Embeds text as `[len, vowels, 1]`; fails for any text containing `FAIL`.
#[derive(Default)]
struct ShapeEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for ShapeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|text| text.contains("FAIL")) {
            return Err(RagError::Embedding("model crashed".to_string()));
        }
        Ok(texts
            .iter()
            .map(|text| {
                let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
                vec![text.len() as f32, vowels as f32, 1.0]
            })
            .collect())
    }
}

fn small_chunker() -> Chunker {
    Chunker::new(ChunkConfig {
        target_tokens: 60,
        min_tokens: 20,
        max_tokens: 80,
        overlap_tokens: 10,
        ..ChunkConfig::default()
    })
    .expect("config is valid")
}

fn indexer() -> (DocumentIndexer, Arc<ShapeEmbedder>) {
    let embedder = Arc::new(ShapeEmbedder::default());
    let index = Arc::new(VectorIndex::new(IndexConfig::default()).expect("config is valid"));
    let indexer = DocumentIndexer::new(small_chunker(), Arc::clone(&embedder) as _, index);
    (indexer, embedder)
}

fn cell(row: usize, column: usize, content: &str) -> TableCell {
    TableCell {
        content: content.to_string(),
        row_index: row,
        column_index: column,
        row_span: 1,
        column_span: 1,
    }
}

fn document(id: &str, content: &str) -> ExtractedDocument {
    ExtractedDocument {
        document_id: id.to_string(),
        content: content.to_string(),
        metadata: DocumentMetadata::default(),
        elements: Vec::new(),
    }
}

fn invoice() -> ExtractedDocument {
    let mut extra = Metadata::new();
    extra.insert("doc_type".to_string(), json!("invoice"));
    ExtractedDocument {
        document_id: "invoice-17".to_string(),
        content: "The invoice covers consulting services delivered in March.".to_string(),
        metadata: DocumentMetadata {
            page_count: Some(2),
            language: None,
            file_name: Some("invoice-17.pdf".to_string()),
            extra,
        },
        elements: vec![
            ContentElement::Table(Table {
                table_id: "t1".to_string(),
                row_count: 2,
                column_count: 2,
                cells: vec![
                    cell(0, 0, "Item"),
                    cell(0, 1, "Amount"),
                    cell(1, 0, "Consulting"),
                    cell(1, 1, "1200"),
                ],
            }),
            ContentElement::KeyValue {
                key: "Total".to_string(),
                value: "1200 EUR".to_string(),
            },
            ContentElement::KeyValue {
                key: "Due".to_string(),
                value: "2024-04-30".to_string(),
            },
            ContentElement::KeyValue {
                key: "Notes".to_string(),
                value: "   ".to_string(),
            },
        ],
    }
}

#[test]
fn structured_elements_become_their_own_chunks() {
    let (indexer, _) = indexer();
    let chunks = indexer.prepare_chunks(&invoice());

    assert_eq!(chunks.len(), 3);
    let sequence: Vec<usize> = chunks.iter().map(|c| c.sequence_index).collect();
    assert_eq!(sequence, vec![0, 1, 2]);

    let text = &chunks[0];
    assert_eq!(text.metadata["chunk_type"], "text");
    assert_eq!(text.metadata["language"], "en");
    assert_eq!(text.metadata["doc_type"], "invoice");
    assert_eq!(text.metadata["page_count"], 2);
    assert_eq!(text.metadata["file_name"], "invoice-17.pdf");

    let table = &chunks[1];
    assert_eq!(table.content, "Item | Amount\nConsulting | 1200");
    assert_eq!(table.metadata["chunk_type"], "table");
    assert_eq!(table.metadata["table_id"], "t1");
    assert_eq!(table.metadata["row_count"], 2);
    assert_eq!(table.metadata["column_count"], 2);
    assert_eq!(table.sections_range, SectionsRange::Element("table t1".to_string()));
    assert_eq!(table.token_count, indexer.chunker().counter().count(&table.content));

    let pairs = &chunks[2];
    assert_eq!(pairs.content, "Total: 1200 EUR\nDue: 2024-04-30");
    assert_eq!(pairs.metadata["chunk_type"], "key_value");
    assert_eq!(pairs.metadata["pair_count"], 2);
    assert_eq!(
        pairs.sections_range,
        SectionsRange::Element("key_value_pairs".to_string())
    );
}

#[test]
fn declared_language_wins_over_detection() {
    let (indexer, _) = indexer();
    let mut doc = document("es-doc", "El informe de la auditoría que se presenta a los socios.");
    let detected = indexer.prepare_chunks(&doc);
    assert_eq!(detected[0].metadata["language"], "es");

    doc.metadata.language = Some("pt".to_string());
    let declared = indexer.prepare_chunks(&doc);
    assert_eq!(declared[0].metadata["language"], "pt");
}

#[test]
fn element_ids_stay_unique_when_content_repeats() {
    let (indexer, _) = indexer();
    let mut doc = document("dup", "Item | Amount");
    doc.elements.push(ContentElement::Table(Table {
        table_id: "t1".to_string(),
        row_count: 1,
        column_count: 2,
        cells: vec![cell(0, 0, "Item"), cell(0, 1, "Amount")],
    }));

    let chunks = indexer.prepare_chunks(&doc);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].content, chunks[1].content);
    assert_ne!(chunks[0].id, chunks[1].id);
    assert_eq!(chunks[1].id, format!("{}-1", chunks[0].id));
}

#[test]
fn oversized_tables_are_split_to_budget() {
    let (indexer, _) = indexer();
    let mut doc = document("big-table", "");
    let cells = (0..60)
        .flat_map(|row| {
            [
                cell(row, 0, &format!("row {row}")),
                cell(row, 1, "alpha beta gamma delta"),
            ]
        })
        .collect();
    doc.elements.push(ContentElement::Table(Table {
        table_id: "wide".to_string(),
        row_count: 60,
        column_count: 2,
        cells,
    }));

    let chunks = indexer.prepare_chunks(&doc);
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.token_count <= 80));
    assert!(
        chunks
            .iter()
            .all(|c| c.sections_range == SectionsRange::Element("table wide".to_string()))
    );
    assert!(chunks.iter().all(|c| c.metadata["chunk_type"] == "table"));
}

#[tokio::test]
async fn indexing_makes_chunks_searchable() {
    let (indexer, _) = indexer();
    let report = indexer
        .index_document(&invoice())
        .await
        .expect("indexing succeeds");

    assert_eq!(report.text_chunks, 1);
    assert_eq!(report.table_chunks, 1);
    assert_eq!(report.key_value_chunks, 1);
    assert_eq!(report.replaced_chunks, 0);
    assert_eq!(indexer.index().len(), 3);
    assert_eq!(indexer.indexed_documents(), vec!["invoice-17".to_string()]);

    let tables = indexer
        .index()
        .search_by_metadata(&MetadataFilter::new().equals("chunk_type", "table"), 10);
    assert_eq!(tables.len(), 1);
}

#[tokio::test]
async fn reindexing_replaces_the_previous_version() {
    let (indexer, _) = indexer();
    indexer
        .index_document(&invoice())
        .await
        .expect("indexing succeeds");

    let revised = document("invoice-17", "A corrected invoice text.");
    let report = indexer
        .index_document(&revised)
        .await
        .expect("indexing succeeds");

    assert_eq!(report.replaced_chunks, 3);
    assert_eq!(indexer.index().len(), 1);
    let remaining = indexer
        .index()
        .search_by_metadata(&MetadataFilter::new().equals("document_id", "invoice-17"), 10);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].content, "A corrected invoice text.");
}

#[tokio::test]
async fn embedding_failure_keeps_the_old_version() {
    let (indexer, _) = indexer();
    indexer
        .index_document(&invoice())
        .await
        .expect("indexing succeeds");

    let broken = document("invoice-17", "This revision will FAIL to embed.");
    let result = indexer.index_document(&broken).await;
    assert!(matches!(result, Err(RagError::Embedding(_))));
    assert_eq!(indexer.index().len(), 3);
}

#[tokio::test]
async fn blank_document_id_is_rejected() {
    let (indexer, embedder) = indexer();
    let result = indexer.index_document(&document("  ", "text")).await;
    assert!(matches!(result, Err(RagError::InvalidInput(_))));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn batch_indexing_isolates_failures() {
    let (indexer, _) = indexer();
    let indexer = indexer.with_concurrency(2);
    let documents = vec![
        document("a", "First document about apples."),
        document("b", "Second document that will FAIL."),
        document("c", "Third document about cherries."),
        invoice(),
    ];

    let report = indexer.index_documents(&documents).await;

    let order: Vec<&str> = report.outcomes.iter().map(|o| o.document_id.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c", "invoice-17"]);
    let stats = report.stats();
    assert_eq!(stats.documents_indexed, 3);
    assert_eq!(stats.documents_failed, 1);
    assert_eq!(stats.chunks_created, 5);
    let failures: Vec<&str> = report.failures().map(|(id, _)| id).collect();
    assert_eq!(failures, vec!["b"]);
    assert_eq!(
        indexer.indexed_documents(),
        vec!["a".to_string(), "c".to_string(), "invoice-17".to_string()]
    );
}

#[tokio::test]
async fn removing_a_document_drops_all_its_chunks() {
    let (indexer, _) = indexer();
    indexer
        .index_document(&invoice())
        .await
        .expect("indexing succeeds");
    indexer
        .index_document(&document("other", "Unrelated text."))
        .await
        .expect("indexing succeeds");

    assert_eq!(indexer.remove_document("invoice-17"), 3);
    assert_eq!(indexer.remove_document("invoice-17"), 0);
    assert_eq!(indexer.indexed_documents(), vec!["other".to_string()]);
}

#[test]
fn from_config_builds_a_pipeline() {
    let config = Config::default();
    let index = Arc::new(VectorIndex::new(config.index.clone()).expect("config is valid"));
    let indexer = DocumentIndexer::from_config(&config, index).expect("default config is valid");
    assert_eq!(indexer.chunker().config(), &config.chunking);
    assert_eq!(indexer.concurrency, config.cache.concurrency);
}

use super::*;

fn cell(row_index: usize, column_index: usize, content: &str) -> TableCell {
    TableCell {
        content: content.to_string(),
        row_index,
        column_index,
        row_span: 1,
        column_span: 1,
    }
}

#[test]
fn table_renders_rows_in_order() {
    let table = Table {
        table_id: "table_0".to_string(),
        row_count: 2,
        column_count: 2,
        cells: vec![
            cell(1, 1, "10"),
            cell(0, 1, "Qty"),
            cell(1, 0, "Widget"),
            cell(0, 0, "Item"),
        ],
    };
    assert_eq!(table.to_text(), "Item | Qty\nWidget | 10");
}

#[test]
fn empty_table_renders_empty() {
    assert_eq!(Table::default().to_text(), "");
}

#[test]
fn key_values_skip_blank_entries() {
    let document = ExtractedDocument {
        document_id: "doc".to_string(),
        content: String::new(),
        metadata: DocumentMetadata::default(),
        elements: vec![
            ContentElement::KeyValue {
                key: "Invoice".to_string(),
                value: " 42 ".to_string(),
            },
            ContentElement::KeyValue {
                key: "Empty".to_string(),
                value: "  ".to_string(),
            },
            ContentElement::Figure { caption: None },
        ],
    };
    let pairs: Vec<_> = document.key_values().collect();
    assert_eq!(pairs, vec![("Invoice", "42")]);
    assert_eq!(document.tables().count(), 0);
}

#[test]
fn detects_spanish_and_english() {
    assert_eq!(
        detect_language("El contrato de servicio es para la empresa y no para el cliente."),
        "es"
    );
    assert_eq!(
        detect_language("The contract is for the company and not for the client."),
        "en"
    );
    assert_eq!(detect_language(""), "en");
}

#[test]
fn declared_language_wins() {
    let document = ExtractedDocument {
        document_id: "doc".to_string(),
        content: "The quick brown fox and the dog.".to_string(),
        metadata: DocumentMetadata {
            language: Some("fr".to_string()),
            ..DocumentMetadata::default()
        },
        elements: Vec::new(),
    };
    assert_eq!(document.language(), "fr");
}

#[test]
fn deserializes_with_defaults() {
    let json = r#"{
        "document_id": "report-7",
        "content": "Body text",
        "metadata": {"page_count": 3, "doc_type": "audit"},
        "elements": [
            {"kind": "table", "table_id": "t1", "cells": [{"content": "A"}]},
            {"kind": "key_value", "key": "Total", "value": "12"},
            {"kind": "paragraph", "content": "Title", "role": "title"},
            {"kind": "figure"}
        ]
    }"#;
    let document: ExtractedDocument = serde_json::from_str(json).expect("should parse document");

    assert_eq!(document.metadata.page_count, Some(3));
    assert_eq!(
        document.metadata.extra.get("doc_type"),
        Some(&"audit".into())
    );
    let table = document.tables().next().expect("table element");
    assert_eq!(table.cells[0].row_span, 1);
    assert_eq!(table.row_count, 0);
    assert_eq!(document.elements.len(), 4);

    let metadata = document.metadata.to_metadata();
    assert_eq!(metadata.get("page_count"), Some(&3.into()));
    assert_eq!(metadata.get("doc_type"), Some(&"audit".into()));
    assert!(metadata.get("language").is_none());
}

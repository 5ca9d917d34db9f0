//! Document extraction boundary.
//!
//! Extraction runs before a run exists; its failures are terminal and never
//! enter the retry machinery. The core ships a plain-text extractor; PDF
//! and other format-specific pathways live outside the core behind the same
//! trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ExtractionError;

/// Extracted document content plus whatever metadata the extractor found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Turns a document reference into text the analyst can work with.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, document: &str) -> Result<ExtractedDocument, ExtractionError>;
}

/// Reads UTF-8 text files from disk.
#[derive(Debug, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl DocumentExtractor for PlainTextExtractor {
    async fn extract(&self, document: &str) -> Result<ExtractedDocument, ExtractionError> {
        let text = tokio::fs::read_to_string(document).await.map_err(|err| {
            ExtractionError::Unreadable {
                document: document.to_string(),
                reason: err.to_string(),
            }
        })?;
        if text.trim().is_empty() {
            return Err(ExtractionError::Empty {
                document: document.to_string(),
            });
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), document.to_string());
        metadata.insert("chars".to_string(), text.chars().count().to_string());
        log::debug!("extracted {} chars from '{document}'", text.len());
        Ok(ExtractedDocument { text, metadata })
    }
}

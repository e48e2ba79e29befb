//! The user's document library, persisted through a [`KvStore`].

use thiserror::Error;

use crate::answer::AnswerRequest;
use crate::engine::PdfEngine;
use crate::extract::{ExtractOptions, ExtractionError, extract_text};
use crate::resolver::{ResolveError, resolve_citation, resolve_view_target};
use crate::store::{KvStore, StoreError};
use crate::{Citation, Document, ViewTarget};

/// Collection holding [`Document`] records.
pub const DOCUMENTS: &str = "documents";

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stored document record is invalid: {0}")]
    Record(#[from] serde_json::Error),
}

pub struct Library<S: KvStore> {
    store: S,
    documents: Vec<Document>,
}

impl<S: KvStore> Library<S> {
    /// Load every stored document, oldest upload first. Documents uploaded
    /// at the same instant keep the store's insertion order.
    ///
    /// Records that no longer deserialize are skipped with a warning so one
    /// bad entry does not hide the rest of the library.
    pub fn load(store: S) -> Result<Self, LibraryError> {
        let mut documents: Vec<Document> = store
            .get_all(DOCUMENTS)?
            .into_iter()
            .filter_map(|record| match serde_json::from_value(record) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable document record");
                    None
                }
            })
            .collect();
        documents.sort_by_key(|d| d.uploaded_at);
        tracing::debug!(count = documents.len(), "library loaded");
        Ok(Self { store, documents })
    }

    /// Extract `bytes` and add the result to the library.
    ///
    /// A document that cannot be read at all is rejected and nothing is
    /// stored. Unreadable pages inside an otherwise readable document are kept
    /// as placeholders.
    pub async fn upload(
        &mut self,
        engine: &dyn PdfEngine,
        name: impl Into<String>,
        bytes: Vec<u8>,
        options: ExtractOptions,
    ) -> Result<&Document, LibraryError> {
        let name = name.into();
        let extracted = match extract_text(engine, &bytes, options).await {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!(document = %name, error = %e, "upload rejected");
                return Err(e.into());
            }
        };

        let doc = Document::new(name, extracted.text, bytes);
        self.store
            .put(DOCUMENTS, &doc.id, serde_json::to_value(&doc)?)?;
        tracing::info!(
            document = %doc.name,
            id = %doc.id,
            pages = extracted.total_pages,
            indexed = extracted.extracted_pages,
            failed = extracted.failed_pages.len(),
            "document added"
        );

        self.documents.push(doc);
        Ok(&self.documents[self.documents.len() - 1])
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    /// Delete a document. Returns it if it existed.
    pub fn remove(&mut self, id: &str) -> Result<Option<Document>, LibraryError> {
        self.store.delete(DOCUMENTS, id)?;
        let Some(index) = self.documents.iter().position(|d| d.id == id) else {
            return Ok(None);
        };
        let doc = self.documents.remove(index);
        tracing::info!(document = %doc.name, id, "document removed");
        Ok(Some(doc))
    }

    pub fn clear(&mut self) -> Result<(), LibraryError> {
        self.store.clear(DOCUMENTS)?;
        tracing::info!(count = self.documents.len(), "library cleared");
        self.documents.clear();
        Ok(())
    }

    pub fn resolve(&self, citation: &Citation) -> Result<&Document, ResolveError> {
        resolve_citation(citation, &self.documents)
    }

    pub fn view_target(&self, citation: &Citation) -> Result<ViewTarget, ResolveError> {
        resolve_view_target(citation, &self.documents)
    }

    /// Build an answer-service request over the whole library.
    pub fn answer_request(&self, question: impl Into<String>) -> AnswerRequest {
        AnswerRequest::new(question, &self.documents)
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

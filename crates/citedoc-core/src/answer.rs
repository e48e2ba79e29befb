//! The JSON contract with the answer service.
//!
//! A request carries the question and the page-tagged text of every library
//! document. The response is `{answer, citations: [{standard, clause, page}]}`;
//! `standard` is a loose document name fed to the resolver.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Citation, Document};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    pub context: String,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, documents: &[Document]) -> Self {
        Self {
            question: question.into(),
            context: document_context(documents),
        }
    }
}

/// Concatenate documents as `=== Document: <name> ===` headers followed by
/// their page-tagged text.
pub fn document_context(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|doc| format!("=== Document: {} ===\n{}", doc.name, doc.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    pub standard: String,
    #[serde(default)]
    pub clause: String,
    #[serde(default, deserialize_with = "lenient_page")]
    pub page: Option<u32>,
}

impl From<&CitationRecord> for Citation {
    fn from(record: &CitationRecord) -> Self {
        Citation {
            document_name_hint: record.standard.clone(),
            clause: record.clause.clone(),
            page: record.page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<CitationRecord>,
}

impl AnswerResponse {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn citations(&self) -> Vec<Citation> {
        self.citations.iter().map(Citation::from).collect()
    }
}

/// Accept `12`, `"12"`, `"p. 12"`, or null. Anything unparseable is treated
/// as no page rather than rejecting the whole answer.
fn lenient_page<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Float(f64),
        Text(String),
    }

    let raw: Option<Raw> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(Raw::Number(n)) => u32::try_from(n).ok(),
        Some(Raw::Float(f)) if f.is_finite() && f >= 0.0 && f <= u32::MAX as f64 => {
            Some(f as u32)
        }
        Some(Raw::Text(s)) => {
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_response() {
        let json = r#"{
            "answer": "SIL 4 requires formal methods.",
            "citations": [
                {"standard": "EN-50128.pdf", "clause": "Table A.3", "page": 42},
                {"standard": "IEC 61508-3", "clause": "7.4.2", "page": "17"}
            ]
        }"#;
        let response = AnswerResponse::from_json(json).unwrap();
        let citations = response.citations();
        assert_eq!(citations.len(), 2);
        assert_eq!(
            citations[0],
            Citation::new("EN-50128.pdf", "Table A.3").with_page(42)
        );
        assert_eq!(citations[1].page, Some(17));
    }

    #[test]
    fn missing_optional_fields() {
        let json = r#"{"answer": "no sources", "citations": [{"standard": "x"}]}"#;
        let response = AnswerResponse::from_json(json).unwrap();
        assert_eq!(response.citations[0].clause, "");
        assert_eq!(response.citations[0].page, None);

        let bare = AnswerResponse::from_json(r#"{"answer": "hi"}"#).unwrap();
        assert!(bare.citations.is_empty());
    }

    #[test]
    fn lenient_page_values() {
        let parse = |page: &str| {
            let json = format!(r#"{{"standard": "x", "page": {page}}}"#);
            serde_json::from_str::<CitationRecord>(&json).unwrap().page
        };
        assert_eq!(parse("null"), None);
        assert_eq!(parse(r#""p. 12""#), Some(12));
        assert_eq!(parse(r#""n/a""#), None);
        assert_eq!(parse("3.0"), Some(3));
        assert_eq!(parse("-1"), None);
    }

    #[test]
    fn missing_standard_is_rejected() {
        assert!(AnswerResponse::from_json(r#"{"answer": "a", "citations": [{"page": 1}]}"#).is_err());
    }

    #[test]
    fn request_context_tags_documents() {
        let docs = vec![
            Document::new("a.pdf", "[Page 1] alpha".into(), vec![1]),
            Document::new("b.pdf", "[Page 1] beta".into(), vec![2]),
        ];
        let request = AnswerRequest::new("What is alpha?", &docs);
        assert_eq!(
            request.context,
            "=== Document: a.pdf ===\n[Page 1] alpha\n\n=== Document: b.pdf ===\n[Page 1] beta"
        );
        assert_eq!(request.question, "What is alpha?");
    }
}

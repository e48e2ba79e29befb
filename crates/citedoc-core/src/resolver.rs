//! Citation-to-document resolution.
//!
//! Answers name their sources loosely ("EN 50128", "standard-001.PDF"), so a
//! citation hint is matched against the stored names in two passes: an exact
//! comparison after normalization, then a bidirectional substring match with a
//! length-based tie-break.
//!
//! Normalization lower-cases, trims and strips a trailing `.pdf`. Whitespace
//! left in front of the stripped suffix is trimmed as well, so `"notes .pdf"`
//! and `"notes"` name the same document.

use thiserror::Error;

use crate::{Citation, Document, ViewTarget};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no document in the library matches \"{hint}\"")]
    DocumentNotFound { hint: String },
}

/// How a document was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// Lowercase, trim, and drop a trailing `.pdf` extension along with any
/// whitespace before it.
pub fn normalize_document_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    match lowered.strip_suffix(".pdf") {
        Some(stem) => stem.trim_end().to_string(),
        None => lowered,
    }
}

/// Find the library document a hint refers to.
///
/// The fuzzy pass picks the candidate whose normalized name length is closest
/// to the hint's. This is an approximation of name similarity: two stored
/// names of similar length can both contain the hint, and the earlier one in
/// library order wins.
pub fn find_document<'a>(
    hint: &str,
    library: &'a [Document],
) -> Result<(&'a Document, MatchKind), ResolveError> {
    let not_found = || ResolveError::DocumentNotFound {
        hint: hint.to_string(),
    };

    let needle = normalize_document_name(hint);
    if needle.is_empty() {
        return Err(not_found());
    }

    let names: Vec<String> = library
        .iter()
        .map(|doc| normalize_document_name(&doc.name))
        .collect();

    if let Some(index) = names.iter().position(|name| *name == needle) {
        return Ok((&library[index], MatchKind::Exact));
    }

    let needle_len = needle.chars().count();
    names
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.is_empty())
        .filter(|(_, name)| needle.contains(name.as_str()) || name.contains(needle.as_str()))
        // min_by_key keeps the first of equal keys, so ties resolve in library order
        .min_by_key(|(_, name)| name.chars().count().abs_diff(needle_len))
        .map(|(index, _)| (&library[index], MatchKind::Fuzzy))
        .ok_or_else(not_found)
}

/// Resolve a citation to a stored document.
pub fn resolve_citation<'a>(
    citation: &Citation,
    library: &'a [Document],
) -> Result<&'a Document, ResolveError> {
    let (doc, kind) = find_document(&citation.document_name_hint, library)?;
    tracing::debug!(
        hint = %citation.document_name_hint,
        document = %doc.name,
        kind = ?kind,
        "citation resolved"
    );
    Ok(doc)
}

/// Resolve a citation into a [`ViewTarget`] ready for the viewer.
///
/// A missing page opens the first page; page 0 is treated as page 1. Pages
/// past the end are clamped later, when the document's page count is known.
pub fn resolve_view_target(
    citation: &Citation,
    library: &[Document],
) -> Result<ViewTarget, ResolveError> {
    let doc = resolve_citation(citation, library)?;
    Ok(ViewTarget {
        document_name: doc.name.clone(),
        clause: citation.clause.clone(),
        raw_bytes: doc.raw_bytes.clone(),
        page: citation.page.unwrap_or(1).max(1),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn doc(name: &str) -> Document {
        Document::new(name, format!("[Page 1] {name}"), name.as_bytes().to_vec())
    }

    fn library(names: &[&str]) -> Vec<Document> {
        names.iter().map(|n| doc(n)).collect()
    }

    // =========================================================================
    // Normalization
    // =========================================================================

    #[test]
    fn normalize_strips_case_whitespace_and_extension() {
        assert_eq!(normalize_document_name("  Standard-001.PDF "), "standard-001");
        assert_eq!(normalize_document_name("EN-50128"), "en-50128");
        assert_eq!(normalize_document_name("notes .pdf"), "notes");
    }

    #[test]
    fn normalize_only_strips_trailing_extension() {
        assert_eq!(normalize_document_name("a.pdf.bak"), "a.pdf.bak");
        assert_eq!(normalize_document_name(".pdf"), "");
    }

    // =========================================================================
    // Exact pass
    // =========================================================================

    #[test]
    fn exact_match_ignores_case_and_extension() {
        let lib = library(&["other.pdf", "standard-001.pdf"]);
        let citation = Citation::new("Standard-001.PDF", "4.2");
        let found = resolve_citation(&citation, &lib).unwrap();
        assert_eq!(found.name, "standard-001.pdf");
    }

    #[test]
    fn exact_match_without_extension_in_hint() {
        let lib = library(&["ISO-26262-6.pdf"]);
        let (found, kind) = find_document("iso-26262-6", &lib).unwrap();
        assert_eq!(found.name, "ISO-26262-6.pdf");
        assert_eq!(kind, MatchKind::Exact);
    }

    #[test]
    fn exact_match_beats_longer_fuzzy_candidate() {
        // The longer name comes first, so only the exact pass can pick the right one.
        let lib = library(&["EN-50128-Annex.pdf", "EN-50128.pdf"]);
        let (found, kind) = find_document("EN-50128", &lib).unwrap();
        assert_eq!(found.name, "EN-50128.pdf");
        assert_eq!(kind, MatchKind::Exact);
    }

    #[test]
    fn first_exact_duplicate_wins() {
        let lib = library(&["dup.pdf", "DUP.PDF"]);
        let found = resolve_citation(&Citation::new("Dup", ""), &lib).unwrap();
        assert_eq!(found.id, lib[0].id);
    }

    // =========================================================================
    // Fuzzy pass
    // =========================================================================

    #[test]
    fn fuzzy_stored_name_inside_hint() {
        let lib = library(&["EN-50128.pdf"]);
        let (found, kind) = find_document("CENELEC EN-50128 (2011)", &lib).unwrap();
        assert_eq!(found.name, "EN-50128.pdf");
        assert_eq!(kind, MatchKind::Fuzzy);
    }

    #[test]
    fn fuzzy_hint_inside_stored_name() {
        let lib = library(&["IEC-61508-Part3-Software.pdf"]);
        let (found, kind) = find_document("61508-part3", &lib).unwrap();
        assert_eq!(found.name, "IEC-61508-Part3-Software.pdf");
        assert_eq!(kind, MatchKind::Fuzzy);
    }

    #[test]
    fn fuzzy_prefers_closest_length() {
        let lib = library(&["EN-50128-Annex-B-Tables.pdf", "EN-50128-Annex.pdf"]);
        let (found, _) = find_document("EN-50128-Anne", &lib).unwrap();
        assert_eq!(found.name, "EN-50128-Annex.pdf");
    }

    #[test]
    fn fuzzy_tie_goes_to_library_order() {
        let lib = library(&["abc-x.pdf", "abc-y.pdf"]);
        let (found, _) = find_document("abc-", &lib).unwrap();
        assert_eq!(found.name, "abc-x.pdf");
    }

    // =========================================================================
    // Misses
    // =========================================================================

    #[test]
    fn unrelated_hint_is_not_found() {
        let lib = library(&["EN-50128.pdf", "ISO-26262.pdf"]);
        let err = resolve_citation(&Citation::new("DO-178C", "6.3"), &lib).unwrap_err();
        assert_eq!(
            err,
            ResolveError::DocumentNotFound {
                hint: "DO-178C".into()
            }
        );
    }

    #[test]
    fn empty_hint_never_matches() {
        let lib = library(&["EN-50128.pdf"]);
        assert!(find_document("   ", &lib).is_err());
        assert!(find_document(".pdf", &lib).is_err());
    }

    #[test]
    fn empty_library_is_not_found() {
        assert!(resolve_citation(&Citation::new("x", ""), &[]).is_err());
    }

    // =========================================================================
    // View targets
    // =========================================================================

    #[test]
    fn view_target_shares_bytes_and_defaults_page() {
        let lib = library(&["EN-50128.pdf"]);
        let target = resolve_view_target(&Citation::new("en-50128", "7.4.2"), &lib).unwrap();
        assert_eq!(target.page, 1);
        assert_eq!(target.clause, "7.4.2");
        assert!(Arc::ptr_eq(&target.raw_bytes, &lib[0].raw_bytes));
    }

    #[test]
    fn view_target_page_zero_becomes_one() {
        let lib = library(&["EN-50128.pdf"]);
        let target =
            resolve_view_target(&Citation::new("EN-50128", "").with_page(0), &lib).unwrap();
        assert_eq!(target.page, 1);

        let target =
            resolve_view_target(&Citation::new("EN-50128", "").with_page(12), &lib).unwrap();
        assert_eq!(target.page, 12);
    }
}

use std::io::Write;

use citedoc_core::render::SurfaceLayout;
use citedoc_core::{Citation, Document, ExtractedText, ResolveError};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print the summary line after extracting a PDF.
pub fn print_extraction_summary(
    w: &mut dyn Write,
    name: &str,
    extracted: &ExtractedText,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(
        w,
        "Extracted {} of {} pages from {}",
        extracted.extracted_pages, extracted.total_pages, name
    )?;

    if !extracted.failed_pages.is_empty() {
        let pages = extracted
            .failed_pages
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let msg = format!("Could not read text on page(s) {}", pages);
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }

    if extracted.truncated {
        let msg = format!(
            "(Only the first {} pages were indexed)",
            extracted.extracted_pages
        );
        if color.enabled() {
            writeln!(w, "{}", msg.dimmed())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    Ok(())
}

/// Print the library contents, oldest first.
pub fn print_documents(
    w: &mut dyn Write,
    documents: &[Document],
    color: ColorMode,
) -> std::io::Result<()> {
    if documents.is_empty() {
        writeln!(w, "Library is empty. Add a PDF with: citedoc add <file.pdf>")?;
        return Ok(());
    }

    for doc in documents {
        let uploaded = doc.uploaded_at.format("%Y-%m-%d %H:%M");
        if color.enabled() {
            writeln!(
                w,
                "{}  {}  {}  {}",
                doc.id.dimmed(),
                doc.name.bold(),
                format_size(doc.byte_size),
                uploaded
            )?;
        } else {
            writeln!(
                w,
                "{}  {}  {}  {}",
                doc.id,
                doc.name,
                format_size(doc.byte_size),
                uploaded
            )?;
        }
    }
    writeln!(w)?;
    writeln!(w, "{} document(s)", documents.len())?;
    Ok(())
}

/// Print the outcome of resolving one citation.
pub fn print_resolution(
    w: &mut dyn Write,
    citation: &Citation,
    result: Result<&Document, &ResolveError>,
    color: ColorMode,
) -> std::io::Result<()> {
    let mut label = citation.document_name_hint.clone();
    if !citation.clause.is_empty() {
        label.push_str(&format!(" \u{a7}{}", citation.clause));
    }
    if let Some(page) = citation.page {
        label.push_str(&format!(" p.{}", page));
    }

    match result {
        Ok(doc) => {
            if color.enabled() {
                writeln!(w, "{} -> {} ({})", label, "FOUND".green(), doc.name)?;
            } else {
                writeln!(w, "{} -> FOUND ({})", label, doc.name)?;
            }
        }
        Err(e) => {
            if color.enabled() {
                writeln!(w, "{} -> {}", label, "NOT FOUND".red())?;
                writeln!(w, "   {}", e.to_string().dimmed())?;
            } else {
                writeln!(w, "{} -> NOT FOUND", label)?;
                writeln!(w, "   {}", e)?;
            }
        }
    }
    Ok(())
}

/// Print where a rendered page was written.
pub fn print_rendered(
    w: &mut dyn Write,
    document: &str,
    page: u32,
    total_pages: u32,
    layout: &SurfaceLayout,
    path: &std::path::Path,
    color: ColorMode,
) -> std::io::Result<()> {
    let what = format!("{} page {}/{}", document, page, total_pages);
    let size = format!(
        "{}x{} px (scale {}, pixel ratio {})",
        layout.pixel_width, layout.pixel_height, layout.scale, layout.device_pixel_ratio
    );
    if color.enabled() {
        writeln!(w, "Rendered {} -> {}", what.bold(), path.display())?;
        writeln!(w, "{}", size.dimmed())?;
    } else {
        writeln!(w, "Rendered {} -> {}", what, path.display())?;
        writeln!(w, "{}", size)?;
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

//! Metadata extraction from fetched documents
//!
//! Extraction is an ordered two-step strategy:
//!
//! 1. **Structured**: the document viewer embeds the article as an escaped HTML
//!    payload (`var documentText = `...`;`) with known classes for the title,
//!    header line, byline and paragraphs. When that payload yields title, date and
//!    body, the record is tagged [`ExtractionMethod::Structured`] and marked complete.
//! 2. **Heuristic**: otherwise the gaps are filled from generic page structure
//!    (meta tags, `<title>`, first heading, a date-pattern scan, all paragraphs or
//!    the full visible text). The record is tagged [`ExtractionMethod::Heuristic`]
//!    and marked incomplete.
//!
//! Page-level labels (source type, related concepts) live outside the embedded
//! payload and are read from the outer page whichever path was taken.
//!
//! Extraction never fails. A document with nothing recognizable produces a record
//! with empty optional fields.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::ExtractionIncomplete;
use crate::types::{ExtractionMethod, MetadataRecord, TargetId};

pub mod date;
mod heuristic;
mod structured;

/// Extract metadata from a fetched payload
pub fn extract(target_id: &TargetId, payload: &[u8]) -> MetadataRecord {
    let html = String::from_utf8_lossy(payload);
    let page = Html::parse_document(&html);

    let (fields, method) = match structured::extract(&html, &page) {
        Some(fields) if fields.has_required() => (fields, ExtractionMethod::Structured),
        Some(partial) => {
            debug!(
                target_id = %target_id,
                "embedded payload incomplete, filling gaps from page structure"
            );
            (partial.or(heuristic::extract(&page)), ExtractionMethod::Heuristic)
        }
        None => {
            debug!(target_id = %target_id, "no embedded payload, using page structure");
            (heuristic::extract(&page), ExtractionMethod::Heuristic)
        }
    };

    let body_text = fields.body.unwrap_or_default();
    MetadataRecord {
        target_id: target_id.clone(),
        title: fields.title,
        publication_date: fields.date,
        publication_date_raw: fields.date_raw,
        source: fields.source,
        author: fields.author,
        section: fields.section,
        word_count: fields.word_count,
        language: fields.language,
        description: fields.description,
        doc_header: fields.doc_header,
        external_url: fields.external_url,
        source_code: fields.source_code,
        certificate_id: fields.certificate_id,
        source_type: first_text(&page, "#sourceType .titreSection"),
        related_terms: related_terms(&page),
        text_characters: body_text.chars().count() as u64,
        body_text,
        extraction_method: method,
        complete: method == ExtractionMethod::Structured,
    }
}

/// Report required fields that stayed empty
pub fn ensure_required_fields(record: &MetadataRecord) -> Result<(), ExtractionIncomplete> {
    let missing = record.missing_fields();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ExtractionIncomplete {
            target_id: record.target_id.clone(),
            missing,
        })
    }
}

/// Fields produced by one extraction path
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Fields {
    title: Option<String>,
    date_raw: Option<String>,
    date: Option<String>,
    source: Option<String>,
    author: Option<String>,
    section: Option<String>,
    word_count: Option<u32>,
    language: Option<String>,
    body: Option<String>,
    description: Option<String>,
    doc_header: Option<String>,
    external_url: Option<String>,
    source_code: Option<String>,
    certificate_id: Option<String>,
}

impl Fields {
    fn has_required(&self) -> bool {
        self.title.is_some() && self.date.is_some() && self.body.is_some()
    }

    /// Keep every field already set and take the rest from `fallback`
    fn or(self, fallback: Fields) -> Fields {
        // Date and its raw text travel together
        let (date_raw, date) = if self.date.is_some() {
            (self.date_raw, self.date)
        } else {
            (fallback.date_raw.or(self.date_raw), fallback.date)
        };
        Fields {
            title: self.title.or(fallback.title),
            date_raw,
            date,
            source: self.source.or(fallback.source),
            author: self.author.or(fallback.author),
            section: self.section.or(fallback.section),
            word_count: self.word_count.or(fallback.word_count),
            language: self.language.or(fallback.language),
            body: self.body.or(fallback.body),
            description: self.description.or(fallback.description),
            doc_header: self.doc_header.or(fallback.doc_header),
            external_url: self.external_url.or(fallback.external_url),
            source_code: self.source_code.or(fallback.source_code),
            certificate_id: self.certificate_id.or(fallback.certificate_id),
        }
    }

    /// Fill the descriptive fields both paths read with the same selectors
    fn with_descriptors(mut self, document: &Html) -> Fields {
        self.description = meta_content(
            document,
            &["description", "og:description", "twitter:description"],
        );
        self.external_url = external_url(document);
        self.source_code = attr_value(document, ".icon-Information[sourcecode]", "sourcecode");
        self.certificate_id = first_text(document, ".publiC-lblNodoc");
        self
    }
}

/// Collapse runs of whitespace and trim
pub(crate) fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Cleaned text of an element
fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text of the first element matching `css` that has any
fn first_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// Content of the first `<meta>` whose name or property is one of `keys`
fn meta_content(document: &Html, keys: &[&str]) -> Option<String> {
    let selector = Selector::parse("meta[content]").ok()?;
    document.select(&selector).find_map(|meta| {
        let element = meta.value();
        let name = element
            .attr("name")
            .or_else(|| element.attr("property"))?
            .trim()
            .to_lowercase();
        if !keys.contains(&name.as_str()) {
            return None;
        }
        element.attr("content").map(clean_text).and_then(non_empty)
    })
}

/// Paragraph texts matching `css`, joined by blank lines
fn paragraphs(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let parts: Vec<String> = document
        .select(&selector)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();
    non_empty(parts.join("\n\n"))
}

/// All text a reader would see, skipping scripts and styles
fn visible_text(document: &Html) -> Option<String> {
    let root = document.root_element();
    let pieces: Vec<&str> = root
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|ancestor| {
                ancestor.value().as_element().is_some_and(|e| {
                    matches!(e.name(), "script" | "style" | "noscript" | "template" | "head")
                })
            });
            (!hidden).then_some(&**text)
        })
        .collect();
    non_empty(clean_text(&pieces.join(" ")))
}

/// First absolute link inside the article body
fn external_url(document: &Html) -> Option<String> {
    let selector = Selector::parse(".DocText a[href]").ok()?;
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .find(|href| href.starts_with("http"))
        .map(str::to_string)
}

/// Cleaned value of `attr` on the first element matching `css`
fn attr_value(document: &Html, css: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .find_map(|e| e.value().attr(attr).map(clean_text).and_then(non_empty))
}

/// Concept links of the outer page, joined by `"; "`
fn related_terms(page: &Html) -> Option<String> {
    let selector = Selector::parse("a#Concept").ok()?;
    let terms: Vec<String> = page
        .select(&selector)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();
    non_empty(terms.join("; "))
}

/// Value of `<html lang>`
fn language(document: &Html) -> Option<String> {
    let selector = Selector::parse("html[lang]").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|html| html.value().attr("lang"))
        .map(clean_text)
        .and_then(non_empty)
}

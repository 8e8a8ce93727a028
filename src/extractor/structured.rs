//! Primary path: the article payload embedded by the document viewer

use regex::Regex;
use scraper::Html;
use std::sync::LazyLock;

use super::date::parse_header;
use super::{Fields, first_text, language, meta_content, paragraphs, visible_text};

/// Decoding passes applied to the payload; it is sometimes escaped more than once
const MAX_DECODE_PASSES: usize = 3;

static DOCUMENT_TEXT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)var\s+documentText\s*=\s*`(.*?)`;").ok());

/// Fields from the embedded payload, None when the page carries no payload
///
/// `outer` is the parsed viewer page; its title meta tags back up the payload's.
pub(super) fn extract(page: &str, outer: &Html) -> Option<Fields> {
    let payload = embedded_payload(page)?;
    let content = Html::parse_document(&payload);

    let doc_header = first_text(&content, ".DocHeader");
    let header = doc_header.as_deref().map(parse_header).unwrap_or_default();

    let fields = Fields {
        title: meta_content(&content, &["og:title", "twitter:title"])
            .or_else(|| meta_content(outer, &["og:title", "twitter:title"]))
            .or_else(|| first_text(&content, ".titreArticleVisu"))
            .or_else(|| first_text(&content, "title")),
        date_raw: header.date_raw,
        date: header.date,
        source: first_text(&content, ".DocPublicationName").or_else(|| {
            meta_content(
                &content,
                &["og:site_name", "citation_journal_title", "citation_publisher", "dc.publisher"],
            )
        }),
        author: first_text(&content, ".docAuthors")
            .or_else(|| first_text(&content, "p.sm-margin-bottomNews"))
            .or_else(|| {
                meta_content(
                    &content,
                    &["author", "article:author", "citation_author", "dc.creator"],
                )
            }),
        section: header.section,
        word_count: header.word_count,
        language: language(&content),
        body: paragraphs(&content, ".docOcurrContainer p, .DocText > p")
            .or_else(|| visible_text(&content)),
        doc_header,
        ..Default::default()
    };
    Some(fields.with_descriptors(&content))
}

/// The decoded article markup, None when absent or empty
pub(super) fn embedded_payload(page: &str) -> Option<String> {
    let captures = DOCUMENT_TEXT.as_ref()?.captures(page)?;
    let mut payload = captures.get(1)?.as_str().to_string();

    for _ in 0..MAX_DECODE_PASSES {
        // Literal markup means the payload is already decoded; the parser
        // resolves any entities left inside it
        if !payload.contains('&') || payload.contains('<') {
            break;
        }
        let decoded = decode_entities(&payload);
        if decoded == payload {
            break;
        }
        payload = decoded;
    }

    let payload = payload.trim();
    (!payload.is_empty()).then(|| payload.to_string())
}

/// Resolve character references in markup-free text
fn decode_entities(text: &str) -> String {
    let fragment = Html::parse_fragment(text);
    fragment.root_element().text().collect()
}

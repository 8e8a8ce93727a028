//! Fallback path: generic page structure

use scraper::{Html, Selector};

use super::date::{find_date, normalize_date};
use super::{Fields, first_text, language, meta_content, paragraphs, visible_text};

const DATE_META: &[&str] = &[
    "article:published_time",
    "citation_publication_date",
    "citation_date",
    "dc.date",
    "date",
];

pub(super) fn extract(document: &Html) -> Fields {
    let text = visible_text(document);

    let (date_raw, date) = date(document, text.as_deref());

    let fields = Fields {
        title: meta_content(document, &["og:title", "twitter:title"])
            .or_else(|| first_text(document, "title"))
            .or_else(|| first_text(document, "h1")),
        date_raw,
        date,
        source: meta_content(
            document,
            &["og:site_name", "citation_journal_title", "citation_publisher", "dc.publisher"],
        ),
        author: meta_content(
            document,
            &["author", "article:author", "citation_author", "dc.creator"],
        )
        .or_else(|| first_text(document, "[itemprop='author'], .byline, .author")),
        section: None,
        word_count: None,
        language: language(document),
        body: paragraphs(document, "article p")
            .or_else(|| paragraphs(document, "p"))
            .or(text),
        doc_header: first_text(document, ".DocHeader"),
        ..Default::default()
    };
    fields.with_descriptors(document)
}

/// First date from a `<time datetime>`, a date meta tag, or the visible text
fn date(document: &Html, text: Option<&str>) -> (Option<String>, Option<String>) {
    let time_attr = Selector::parse("time[datetime]").ok().and_then(|selector| {
        document
            .select(&selector)
            .find_map(|t| t.value().attr("datetime").map(str::to_string))
    });

    let candidates = time_attr
        .into_iter()
        .chain(meta_content(document, DATE_META))
        .chain(text.and_then(find_date));

    let mut first_raw = None;
    for raw in candidates {
        if let Some(date) = normalize_date(&raw) {
            return (Some(raw), Some(date));
        }
        first_raw.get_or_insert(raw);
    }
    (first_raw, None)
}

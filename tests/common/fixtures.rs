//! Mock document site and run configurations

use std::path::Path;
use std::time::Duration;

use doc_harvest::{Config, ExportFormat, RetryConfig, TargetId};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock site serves documents from
pub const DOCUMENT_PATH: &str = "/Document/View";

/// Identifier of the `i`-th target
pub fn target_id(i: usize) -> TargetId {
    TargetId::new(format!("news·20240105·LE·{:04}", i))
}

/// Result listing embedding the key list the way the search page does
pub fn listing(n: usize) -> String {
    let keys: Vec<String> = (0..n)
        .map(|i| format!("\"{}\"", target_id(i).as_str()))
        .collect();
    format!(
        r#"<html><head><script>
        var _docKeyList = [{}];
        </script></head><body><div id="results"></div></body></html>"#,
        keys.join(",")
    )
}

/// Escape markup the way the document viewer does inside its script block
pub fn escape(markup: &str) -> String {
    markup
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Viewer page carrying a complete structured payload for target `i`
pub fn article_page(i: usize) -> String {
    let article = format!(
        r#"<div class="docOcurrContainer">
  <div class="DocPublicationName">Le Devoir</div>
  <div class="DocHeader">Actualités, vendredi 5 janvier 2024, p. A{i} 300 mots</div>
  <div class="titreArticle"><div class="titreArticleVisu">Article numéro {i}</div></div>
  <div class="docAuthors">Équipe {i}</div>
  <div class="DocText"><p>Corps de l'article {i}.</p></div>
</div>"#
    );
    format!(
        r#"<html lang="fr"><head><title>Visualisation</title>
        <script>var documentText = `{}`;</script></head><body></body></html>"#,
        escape(&article)
    )
}

/// Mount `n` documents on `server`; indices in `missing` answer 404
pub async fn mount_documents(server: &MockServer, n: usize, missing: &[usize]) {
    for i in 0..n {
        let response = if missing.contains(&i) {
            ResponseTemplate::new(404)
        } else {
            ResponseTemplate::new(200).set_body_string(article_page(i))
        };
        Mock::given(method("GET"))
            .and(path(DOCUMENT_PATH))
            .and(query_param("docName", target_id(i).as_str()))
            .respond_with(response)
            .mount(server)
            .await;
    }
}

/// Mount `n` documents whose responses take `delay` from index `slow_from` on
pub async fn mount_slow_documents(server: &MockServer, n: usize, slow_from: usize, delay: Duration) {
    for i in 0..n {
        let mut response = ResponseTemplate::new(200).set_body_string(article_page(i));
        if i >= slow_from {
            response = response.set_delay(delay);
        }
        Mock::given(method("GET"))
            .and(path(DOCUMENT_PATH))
            .and(query_param("docName", target_id(i).as_str()))
            .respond_with(response)
            .mount(server)
            .await;
    }
}

/// Number of requests the server has answered so far
pub async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or(0)
}

/// Configuration pointing at `server`, working under `root`
pub fn test_config(root: &Path, server: &MockServer) -> Config {
    Config {
        output_dir: root.join("2024-01-05_2024-01-05"),
        export_destination: root.join("exports"),
        document_url_template: format!(
            "{}{}?viewEvent=1&docName={{id}}&docIndex={{index}}",
            server.uri(),
            DOCUMENT_PATH
        ),
        concurrency: 3,
        batch_size: 4,
        export_format: ExportFormat::Jsonl,
        request_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..Default::default()
    }
}

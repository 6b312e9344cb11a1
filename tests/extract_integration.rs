//! End-to-end extraction tests over real files and probe servers.

use std::io::Write;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use hapiq::extract::pipeline::Extractor;
use hapiq::{ExtractionOptions, LinkKind};

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{content}").unwrap();
    file
}

// ==================== Corruption Collapse ====================

#[tokio::test]
async fn extract_file_collapses_doi_corruption_variants() {
    let file = write_temp(
        "Results are deposited at https://doi.org/10.1038/s41467-021-23778-6 \
         (also seen as https://doi.org/10.1038/s41467-021-23778-6|www.nature.com/ \
         https://doi.org/10.1038/s41467-021-23778-62 \
         https://doi.org/10.1038/s41467-021-23778-6ARTICLE \
         https://doi.org/10.1038/s41467-021-23778-64 in corrupted text).",
    );

    let extractor = Extractor::new(ExtractionOptions::default());
    let result = extractor.extract_file(file.path()).await.unwrap();

    assert_eq!(result.links.len(), 1, "all variants collapse to one link");
    let link = &result.links[0];
    assert_eq!(link.kind, LinkKind::Doi);
    assert_eq!(link.url, "https://doi.org/10.1038/s41467-021-23778-6");
    assert!(link.confidence >= 0.9);
}

// ==================== Determinism ====================

#[tokio::test]
async fn extract_file_is_deterministic() {
    let file = write_temp(
        "GSE123456 PRJNA654321 https://zenodo.org/record/55555 \
         10.1234/some.dataset https://example.org/table.csv\u{c}\
         second page mentions GSE123456 again and SRR1234567",
    );

    let extractor = Extractor::new(ExtractionOptions::default());
    let first = extractor.extract_file(file.path()).await.unwrap();
    let second = extractor.extract_file(file.path()).await.unwrap();

    let urls = |r: &hapiq::ExtractionResult| {
        r.links
            .iter()
            .map(|l| (l.url.clone(), l.kind, l.page))
            .collect::<Vec<_>>()
    };
    assert_eq!(urls(&first), urls(&second));
    assert_eq!(first.page_count, 2);
    // Duplicate GSE mention across pages still yields one link.
    assert_eq!(
        first
            .links
            .iter()
            .filter(|l| l.kind == LinkKind::Geo)
            .count(),
        1
    );
}

// ==================== Validation Interaction ====================

#[tokio::test]
async fn validation_removes_inaccessible_links_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let file = write_temp(&format!("dead link {}/gone.csv here", server.uri()));
    let options = ExtractionOptions {
        validate_links: true,
        ..ExtractionOptions::default()
    };
    let result = Extractor::new(options)
        .extract_file(file.path())
        .await
        .unwrap();

    assert!(
        result.links.is_empty(),
        "404 links are dropped when keep_404s is off: {:#?}",
        result.links
    );
    // Counters still reflect what was found before removal.
    assert_eq!(result.counts_by_kind.values().sum::<usize>(), 1);
}

#[tokio::test]
async fn validation_keeps_404s_when_requested_and_rewrites_confidence() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let file = write_temp(&format!("dead link {}/gone.csv here", server.uri()));
    let options = ExtractionOptions {
        validate_links: true,
        keep_404s: true,
        ..ExtractionOptions::default()
    };
    let result = Extractor::new(options)
        .extract_file(file.path())
        .await
        .unwrap();

    assert_eq!(result.links.len(), 1);
    let link = &result.links[0];
    let validation = link.validation.as_ref().unwrap();
    assert!(!validation.accessible);
    assert_eq!(validation.status_code, Some(404));
    assert!(link.confidence <= 0.15, "confidence {}", link.confidence);
}

#[tokio::test]
async fn validation_boosts_accessible_datasets() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/csv")
                .insert_header("Content-Length", "5242880"),
        )
        .mount(&server)
        .await;

    let file = write_temp(&format!("data at {}/counts.csv today", server.uri()));
    let options = ExtractionOptions {
        validate_links: true,
        ..ExtractionOptions::default()
    };
    let result = Extractor::new(options)
        .extract_file(file.path())
        .await
        .unwrap();

    assert_eq!(result.links.len(), 1);
    let link = &result.links[0];
    let validation = link.validation.as_ref().unwrap();
    assert!(validation.accessible);
    assert!(validation.is_dataset);
    // Dataset bonus is at most 1.1x, capped at 1.0.
    assert!(link.confidence <= 1.0);
}

// ==================== Result Shape ====================

#[tokio::test]
async fn extraction_result_serializes_cleanly() {
    let file = write_temp("See GSE123456 and 10.1234/dataset today.");
    let extractor = Extractor::new(ExtractionOptions::default());
    let result = extractor.extract_file(file.path()).await.unwrap();

    let json = serde_json::to_string_pretty(&result).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(parsed["links"].is_array());
    assert!(parsed["counts_by_kind"].is_object());
    assert_eq!(parsed["page_count"], 1);
}

#[tokio::test]
async fn missing_file_is_an_error() {
    let extractor = Extractor::new(ExtractionOptions::default());
    let result = extractor.extract_file("/no/such/file.txt").await;
    assert!(result.is_err());
}

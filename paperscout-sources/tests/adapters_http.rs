//! Adapters against mock HTTP servers.

use mockito::Matcher;
use paperscout_core::config::{ArxivConfig, BiorxivConfig, OpenAlexConfig, SemanticScholarConfig};
use paperscout_core::{SourceAdapter, SourceCursor, SourceError, SourceKind};
use paperscout_sources::{
    ArxivSource, BiorxivSource, OpenAlexSource, SemanticScholarSource, WebSearchSource,
};
use pretty_assertions::assert_eq;

const ARXIV_PAGE: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <opensearch:totalResults>3</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <published>2024-01-02T00:00:00Z</published>
    <title>CRISPR screens at scale</title>
    <summary>Pooled screens.</summary>
    <author><name>Ida Berg</name></author>
    <link href="http://arxiv.org/abs/2401.00001v1" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2312.00002v1</id>
    <published>2023-12-20T00:00:00Z</published>
    <title>Base editor delivery</title>
    <summary>Lipid nanoparticles.</summary>
    <author><name>Omar Haddad</name></author>
  </entry>
</feed>"#;

fn arxiv_config(server: &mockito::ServerGuard) -> ArxivConfig {
    ArxivConfig {
        base_url: format!("{}/api/query", server.url()),
        min_interval_ms: 0,
        retry_backoff_secs: vec![0],
    }
}

#[tokio::test]
async fn test_arxiv_pages_and_exhausts_at_total() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/query")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("search_query".into(), "all:crispr".into()),
            Matcher::UrlEncoded("start".into(), "0".into()),
            Matcher::UrlEncoded("max_results".into(), "2".into()),
            Matcher::UrlEncoded("sortBy".into(), "submittedDate".into()),
            Matcher::UrlEncoded("sortOrder".into(), "descending".into()),
        ]))
        .with_status(200)
        .with_body(ARXIV_PAGE)
        .create_async()
        .await;

    let source = ArxivSource::new(&arxiv_config(&server)).unwrap();
    let page = source
        .fetch("crispr", 2, &SourceCursor::default())
        .await
        .unwrap();
    mock.assert_async().await;

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.next.offset, 2);
    assert!(!page.is_exhausted());
    assert_eq!(page.records[0].venue, "arXiv");
    assert_eq!(page.records[1].url, "http://arxiv.org/abs/2312.00002v1");

    // Asking for 2 more from offset 2 when only 3 exist exhausts the source.
    let tail = server
        .mock("GET", "/api/query")
        .match_query(Matcher::UrlEncoded("start".into(), "2".into()))
        .with_status(200)
        .with_body(
            r#"<feed><opensearch:totalResults>3</opensearch:totalResults><entry>
            <id>http://arxiv.org/abs/2311.00003v1</id><title>Last one</title>
            <summary>x</summary></entry></feed>"#,
        )
        .create_async()
        .await;
    let last = source.fetch("crispr", 2, &page.next).await.unwrap();
    tail.assert_async().await;
    assert_eq!(last.records.len(), 1);
    assert!(last.is_exhausted());
}

#[tokio::test]
async fn test_arxiv_retries_rate_limit_then_fails() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/query")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let source = ArxivSource::new(&arxiv_config(&server)).unwrap();
    let err = source
        .fetch("crispr", 5, &SourceCursor::default())
        .await
        .unwrap_err();
    mock.assert_async().await;
    assert!(matches!(err, SourceError::Status { status: 503, .. }));
}

#[tokio::test]
async fn test_semantic_scholar_sends_key_and_follows_next() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/paper/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("query".into(), "coral reefs".into()),
            Matcher::UrlEncoded("offset".into(), "0".into()),
            Matcher::UrlEncoded("limit".into(), "2".into()),
        ]))
        .match_header("x-api-key", "s2-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"total": 10, "offset": 0, "next": 2, "data": [
                {"title": "Reef A", "url": "https://s2.org/a", "authors": [{"name": "N. One"}], "year": 2020},
                {"title": "Reef B", "url": "https://s2.org/b", "authors": [], "publicationDate": "2021-06-01"}
            ]}"#,
        )
        .create_async()
        .await;

    let config = SemanticScholarConfig {
        base_url: server.url(),
        min_interval_ms: 0,
        ..SemanticScholarConfig::default()
    };
    let source = SemanticScholarSource::with_key(&config, Some("s2-key".into())).unwrap();
    let page = source
        .fetch("coral reefs", 2, &SourceCursor::default())
        .await
        .unwrap();
    mock.assert_async().await;
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.next.offset, 2);
    assert!(!page.is_exhausted());
    assert_eq!(page.records[0].origin, SourceKind::SemanticScholar);
}

#[tokio::test]
async fn test_openalex_page_number_and_mailto() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/works")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("search".into(), "soil carbon".into()),
            Matcher::UrlEncoded("per_page".into(), "5".into()),
            Matcher::UrlEncoded("page".into(), "3".into()),
            Matcher::UrlEncoded("mailto".into(), "lab@example.org".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"meta": {"count": 12}, "results": [
                {"id": "https://openalex.org/W9", "title": "Deep soils", "publication_year": 2018}
            ]}"#,
        )
        .create_async()
        .await;

    let config = OpenAlexConfig {
        base_url: server.url(),
        email: Some("lab@example.org".into()),
        min_interval_ms: 0,
    };
    let source = OpenAlexSource::new(&config).unwrap();
    let cursor = SourceCursor {
        offset: 10,
        ..SourceCursor::default()
    };
    let page = source.fetch("soil carbon", 5, &cursor).await.unwrap();
    mock.assert_async().await;
    assert_eq!(page.records.len(), 1);
    assert!(page.is_exhausted());
}

#[tokio::test]
async fn test_biorxiv_single_shot() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Regex(r"^/search/".into()))
        .with_status(200)
        .with_body(
            r#"<div class="highwire-article-citation">
                <a class="highwire-cite-linked-title" href="https://www.biorxiv.org/content/10.1101/2024.02.03.578000v1">Planarian neoblasts</a>
            </div>"#,
        )
        .expect(1)
        .create_async()
        .await;

    let source = BiorxivSource::new(&BiorxivConfig {
        base_url: server.url(),
    })
    .unwrap();
    let page = source
        .fetch("regeneration", 10, &SourceCursor::default())
        .await
        .unwrap();
    assert_eq!(page.records.len(), 1);
    assert!(page.is_exhausted());

    // A further call makes no request and yields nothing.
    let again = source.fetch("regeneration", 10, &page.next).await.unwrap();
    assert!(again.records.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_web_search_posts_query_with_bearer() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/serp")
        .match_header("authorization", "Bearer serp-key")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "query": "lidar slam research paper",
            "num": 2
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"organic": [
                {"title": "Lidar SLAM survey", "link": "https://a.org/1"},
                {"title": "Loop closure", "link": "https://a.org/2"},
                {"title": "Extra", "link": "https://a.org/3"}
            ]}"#,
        )
        .create_async()
        .await;

    let source = WebSearchSource::new(format!("{}/serp", server.url()), "serp-key").unwrap();
    let page = source
        .fetch("lidar slam", 2, &SourceCursor::default())
        .await
        .unwrap();
    mock.assert_async().await;
    assert_eq!(page.records.len(), 2);
    assert!(page.is_exhausted());
    assert!(page.records.iter().all(|r| r.origin == SourceKind::Web));
}

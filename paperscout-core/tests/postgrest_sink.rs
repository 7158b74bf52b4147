//! PostgREST sink behavior against a mock server.

use mockito::Matcher;
use paperscout_core::{CandidatePaper, PostgrestSink, ResultSink, SinkError, SourceKind, WriteMode};

fn papers() -> Vec<CandidatePaper> {
    vec![
        CandidatePaper::new("lidar", "Dense lidar odometry", "https://l.org/1", SourceKind::Arxiv)
            .with_abstract(Some("We fuse scans\u{0} at 20Hz.".into())),
        CandidatePaper::new("lidar", "Loop closure at scale", "https://l.org/2", SourceKind::Openalex)
            .with_abstract(Some("Place recognition.".into())),
    ]
}

#[tokio::test]
async fn test_upsert_uses_url_and_tenant_conflict_key() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/rest/v1/papers")
        .match_query(Matcher::UrlEncoded("on_conflict".into(), "url,user_id".into()))
        .match_header("apikey", "service-key")
        .match_header("authorization", "Bearer service-key")
        .match_header("prefer", "resolution=merge-duplicates,return=minimal")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""user_id":"alice""#.into()),
            Matcher::Regex(r#""paper_name":"Dense lidar odometry""#.into()),
        ]))
        .with_status(201)
        .create_async()
        .await;

    let sink = PostgrestSink::new(server.url(), "service-key");
    let report = sink.store(Some("alice"), &papers()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(report.written, 2);
    assert_eq!(report.mode, WriteMode::Upsert);
    assert!(report.omitted_columns.is_empty());
}

#[tokio::test]
async fn test_rows_are_sanitized_and_untagged() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/rest/v1/library")
        .match_query(Matcher::UrlEncoded("on_conflict".into(), "url".into()))
        .match_body(Matcher::Regex(r#""abstract":"We fuse scans at 20Hz\.""#.into()))
        .with_status(201)
        .create_async()
        .await;
    let tagged = server
        .mock("POST", "/rest/v1/library")
        .match_body(Matcher::Regex(r#""source":"#.into()))
        .with_status(500)
        .expect(0)
        .create_async()
        .await;

    let sink = PostgrestSink::new(server.url(), "k").with_table("library");
    sink.store(None, &papers()).await.unwrap();
    mock.assert_async().await;
    tagged.assert_async().await;
}

#[tokio::test]
async fn test_missing_unique_constraint_falls_back_to_insert() {
    let mut server = mockito::Server::new_async().await;
    let upsert = server
        .mock("POST", "/rest/v1/papers")
        .match_query(Matcher::Any)
        .match_header("prefer", "resolution=merge-duplicates,return=minimal")
        .with_status(400)
        .with_body(
            r#"{"code":"42P10","message":"there is no unique or exclusion constraint matching the ON CONFLICT specification"}"#,
        )
        .create_async()
        .await;
    let insert = server
        .mock("POST", "/rest/v1/papers")
        .match_query(Matcher::Any)
        .match_header("prefer", "return=minimal")
        .with_status(201)
        .create_async()
        .await;

    let sink = PostgrestSink::new(server.url(), "k");
    let report = sink.store(None, &papers()).await.unwrap();

    upsert.assert_async().await;
    insert.assert_async().await;
    assert_eq!(report.mode, WriteMode::Insert);
    assert_eq!(report.written, 2);
}

#[tokio::test]
async fn test_unknown_column_is_dropped_and_retried() {
    let mut server = mockito::Server::new_async().await;
    let rejected = server
        .mock("POST", "/rest/v1/papers")
        .match_query(Matcher::Any)
        .match_body(Matcher::Regex(r#""fulltext""#.into()))
        .with_status(400)
        .with_body(
            r#"{"code":"PGRST204","message":"Could not find the 'fulltext' column of 'papers' in the schema cache"}"#,
        )
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/rest/v1/papers")
        .match_query(Matcher::Any)
        .with_status(201)
        .create_async()
        .await;

    let sink = PostgrestSink::new(server.url(), "k");
    let report = sink.store(Some("bob"), &papers()).await.unwrap();

    rejected.assert_async().await;
    accepted.assert_async().await;
    assert_eq!(report.omitted_columns, vec!["fulltext".to_string()]);
    assert_eq!(report.mode, WriteMode::Upsert);
}

#[tokio::test]
async fn test_other_failures_surface_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/rest/v1/papers")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body(r#"{"code":"42501","message":"permission denied for table papers"}"#)
        .create_async()
        .await;

    let sink = PostgrestSink::new(server.url(), "k");
    let err = sink.store(None, &papers()).await.unwrap_err();
    match err {
        SinkError::Status { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("permission denied"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_batch_makes_no_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let sink = PostgrestSink::new(server.url(), "k");
    let report = sink.store(Some("alice"), &[]).await.unwrap();
    assert_eq!(report.written, 0);
    mock.assert_async().await;
}

mod common;

use common::{NAMESPACE, RemoteFixtureServer, TestFixtures, entries, pipeline, unreachable_url};
use validatems::{IntakeError, Rejection, ScratchLease, UploadRequest};

#[tokio::test]
async fn test_local_upload_of_conformant_document() {
    let fixtures = TestFixtures::new();
    let (dir, pipeline) = pipeline(5).await;

    let outcome = pipeline
        .submit_local_file(fixtures.read(fixtures.valid_resource()), Some("resource.xml"))
        .await
        .unwrap();

    assert!(outcome.success(), "{}", outcome.message());
    assert!(outcome.message().contains("resource.xml"));
    assert!(entries(&dir).is_empty());
}

#[tokio::test]
async fn test_local_upload_with_wrong_extension_writes_nothing() {
    let fixtures = TestFixtures::new();
    let (dir, pipeline) = pipeline(5).await;

    let error = pipeline
        .submit_local_file(fixtures.read(fixtures.valid_resource()), Some("resource.txt"))
        .await
        .unwrap_err();

    assert!(error.is_rejection());
    assert_eq!(
        error.user_message(),
        "resource.txt: invalid file extension! Only XML is allowed."
    );
    assert!(entries(&dir).is_empty());
}

#[tokio::test]
async fn test_extension_policy() {
    let fixtures = TestFixtures::new();
    let bytes = fixtures.read(fixtures.valid_resource());
    let (_dir, pipeline) = pipeline(5).await;

    for accepted in ["Report.XML", "report.xml"] {
        let outcome = pipeline
            .submit_local_file(bytes.clone(), Some(accepted))
            .await
            .unwrap();
        assert!(outcome.success(), "{accepted}: {}", outcome.message());
    }

    for rejected in ["report", "report.XML.txt", "report."] {
        let result = pipeline.submit_local_file(bytes.clone(), Some(rejected)).await;
        assert!(
            matches!(
                result,
                Err(IntakeError::Rejected(Rejection::InvalidExtension { .. }))
            ),
            "{rejected} accepted"
        );
    }
}

#[tokio::test]
async fn test_name_without_safe_characters_gets_timestamp_name() {
    let fixtures = TestFixtures::new();
    let (dir, pipeline) = pipeline(5).await;

    let mut lease = ScratchLease::new();
    let resolved = pipeline
        .resolve(
            UploadRequest::local_file(fixtures.read(fixtures.valid_resource()), Some("日本")),
            &mut lease,
        )
        .await
        .unwrap();

    // YYYY-MM-DD_HHMMSS.xml
    let name = resolved.filename.as_str();
    assert_eq!(name.len(), "2016-05-12_134501.xml".len(), "{name}");
    assert!(name.ends_with(".xml"));
    assert_eq!(&name[4..5], "-");
    assert_eq!(&name[10..11], "_");
    assert_eq!(entries(&dir), vec![name.to_string()]);

    let outcome = pipeline
        .submit_local_file(fixtures.read(fixtures.valid_resource()), Some("日本"))
        .await
        .unwrap();
    assert!(outcome.success(), "{}", outcome.message());
}

#[tokio::test]
async fn test_conformant_and_broken_documents() {
    let fixtures = TestFixtures::new();
    let (_dir, pipeline) = pipeline(5).await;

    let valid = pipeline
        .submit_local_file(fixtures.read(fixtures.valid_resource()), Some("resource.xml"))
        .await
        .unwrap();
    assert!(valid.success());

    let invalid = pipeline
        .submit_local_file(fixtures.read(fixtures.invalid_resource()), Some("resource.xml"))
        .await
        .unwrap();
    assert!(!invalid.success());
    assert!(!invalid.message().trim().is_empty());
    assert!(!invalid.message().contains(NAMESPACE));

    let malformed = pipeline
        .submit_local_file(fixtures.read(fixtures.malformed_resource()), Some("resource.xml"))
        .await
        .unwrap();
    assert!(!malformed.success());
    assert!(!malformed.message().trim().is_empty());
    assert!(!malformed.message().contains(NAMESPACE));
}

#[tokio::test]
async fn test_url_upload_of_conformant_document() {
    let server = RemoteFixtureServer::start().await;
    let (dir, pipeline) = pipeline(5).await;

    let outcome = pipeline
        .submit_remote_url(&server.url("resource.xml"))
        .await
        .unwrap();

    assert!(outcome.success(), "{}", outcome.message());
    assert_eq!(outcome.subject_filename(), "resource.xml");
    assert_eq!(server.heads("resource.xml"), 1);
    assert_eq!(server.gets("resource.xml"), 1);
    assert!(entries(&dir).is_empty());
}

#[tokio::test]
async fn test_url_upload_of_schema_invalid_document() {
    let server = RemoteFixtureServer::start().await;
    let (_dir, pipeline) = pipeline(5).await;

    let outcome = pipeline
        .submit_remote_url(&server.url("broken.xml"))
        .await
        .unwrap();

    assert!(!outcome.success());
    assert_eq!(outcome.subject_filename(), "broken.xml");
    assert!(!outcome.message().contains(NAMESPACE));
}

#[tokio::test]
async fn test_url_with_html_content_type_is_never_fetched() {
    let server = RemoteFixtureServer::start().await;
    let (dir, pipeline) = pipeline(5).await;

    let result = pipeline.submit_remote_url(&server.url("page")).await;

    match result {
        Err(IntakeError::Rejected(Rejection::NotXml { content_type, .. })) => {
            assert_eq!(content_type, "text/html")
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(server.heads("page"), 1);
    assert_eq!(server.gets("page"), 0);
    assert!(entries(&dir).is_empty());
}

#[tokio::test]
async fn test_url_without_content_type_is_rejected() {
    let server = RemoteFixtureServer::start().await;
    let (_dir, pipeline) = pipeline(5).await;

    let result = pipeline.submit_remote_url(&server.url("untyped")).await;

    assert!(matches!(
        result,
        Err(IntakeError::Rejected(Rejection::NotXml { .. }))
    ));
    assert_eq!(server.gets("untyped"), 0);
}

#[tokio::test]
async fn test_unreachable_host_is_network_error() {
    let (dir, pipeline) = pipeline(5).await;

    let error = pipeline
        .submit_remote_url(&unreachable_url())
        .await
        .unwrap_err();

    assert!(error.is_network());
    assert_eq!(
        error.user_message(),
        "Something went wrong. Are you sure your URL is valid?"
    );
    assert!(entries(&dir).is_empty());
}

#[tokio::test]
async fn test_missing_remote_document_is_network_error() {
    let server = RemoteFixtureServer::start().await;
    let (_dir, pipeline) = pipeline(5).await;

    let error = pipeline
        .submit_remote_url(&server.url("gone.xml"))
        .await
        .unwrap_err();

    assert!(error.is_network());
    assert_eq!(server.gets("gone.xml"), 0);
}

#[tokio::test]
async fn test_failed_fetch_leaves_no_file_behind() {
    let server = RemoteFixtureServer::start().await;
    let (dir, pipeline) = pipeline(5).await;

    let mut lease = ScratchLease::new();
    let result = pipeline
        .resolve(UploadRequest::remote_url(server.url("flaky.xml")), &mut lease)
        .await;

    assert!(matches!(result, Err(IntakeError::Network(_))));
    assert_eq!(server.gets("flaky.xml"), 1);
    // Nothing left even while the lease is still alive
    assert!(entries(&dir).is_empty());
}

#[tokio::test]
async fn test_sequential_uploads_of_same_name() {
    let server = RemoteFixtureServer::start().await;
    let (dir, pipeline) = pipeline(5).await;

    let mut first_lease = ScratchLease::new();
    let first = pipeline
        .resolve(UploadRequest::remote_url(server.url("resource.xml")), &mut first_lease)
        .await
        .unwrap();

    let mut second_lease = ScratchLease::new();
    let second = pipeline
        .resolve(UploadRequest::remote_url(server.url("resource.xml")), &mut second_lease)
        .await
        .unwrap();

    assert_eq!(first.filename, "resource.xml");
    assert_eq!(second.filename, "resource1.xml");
    assert_eq!(entries(&dir), vec!["resource.xml", "resource1.xml"]);

    drop(second_lease);
    assert_eq!(entries(&dir), vec!["resource.xml"]);
    drop(first_lease);
    assert!(entries(&dir).is_empty());
}

#[tokio::test]
async fn test_concurrent_submissions_do_not_interfere() {
    let fixtures = TestFixtures::new();
    let valid = fixtures.read(fixtures.valid_resource());
    let invalid = fixtures.read(fixtures.invalid_resource());
    let (dir, pipeline) = pipeline(5).await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let pipeline = pipeline.clone();
            let bytes = if i % 2 == 0 { valid.clone() } else { invalid.clone() };
            tokio::spawn(async move {
                let outcome = pipeline
                    .submit_local_file(bytes, Some("same.xml"))
                    .await
                    .unwrap();
                (i, outcome.success())
            })
        })
        .collect();

    for task in tasks {
        let (i, success) = task.await.unwrap();
        assert_eq!(success, i % 2 == 0, "submission {i}");
    }
    assert!(entries(&dir).is_empty());
}

//! `GiteaApi` against a mock server.

use std::sync::Arc;

use assert_matches::assert_matches;
use phenoflow_github::host::{GitHost, PublishMode, RefOutcome};
use phenoflow_github::publish::{PublishRequest, Publisher, PublisherSettings};
use phenoflow_github::{GitHostError, GiteaApi};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ORG: &str = "phenoflow";
const REPO: &str = "Diabetes---1";

fn client(server: &MockServer) -> GiteaApi {
    GiteaApi::connect(&server.uri(), "secret").unwrap()
}

// ---------------------------------------------------------------------------
// Refs and branches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exact_ref_is_picked_from_prefix_matches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/phenoflow/Diabetes---1/git/refs/heads/read-disc"))
        .and(header("authorization", "token secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"ref": "refs/heads/read-disc-2", "object": {"sha": "other"}},
            {"ref": "refs/heads/read-disc", "object": {"sha": "tip"}}
        ])))
        .mount(&server)
        .await;

    let tip = client(&server).get_ref(ORG, REPO, "read-disc").await.unwrap();
    assert_eq!(tip.as_deref(), Some("tip"));
}

#[tokio::test]
async fn absent_ref_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/phenoflow/Diabetes---1/git/refs/heads/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert_eq!(client(&server).get_ref(ORG, REPO, "gone").await.unwrap(), None);
}

#[tokio::test]
async fn existing_branch_is_reported_not_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/phenoflow/Diabetes---1/branches"))
        .and(body_partial_json(json!({
            "new_branch_name": "read-disc",
            "old_branch_name": "main"
        })))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let outcome = client(&server)
        .create_branch(ORG, REPO, "read-disc", "main")
        .await
        .unwrap();
    assert_eq!(outcome, RefOutcome::AlreadyExists);
}

#[tokio::test]
async fn git_data_writes_are_unsupported() {
    let server = MockServer::start().await;
    let api = client(&server);
    assert_eq!(api.publish_mode(), PublishMode::Contents);
    assert_matches!(
        api.create_blob(ORG, REPO, b"x").await,
        Err(GitHostError::Unsupported(_))
    );
    assert_matches!(
        api.update_ref(ORG, REPO, "main", "sha").await,
        Err(GitHostError::Unsupported(_))
    );
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[tokio::test]
async fn created_repository_gets_its_website() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orgs/phenoflow/repos"))
        .and(body_partial_json(json!({
            "name": REPO,
            "private": true,
            "auto_init": true,
            "default_branch": "main"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"name": REPO})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/phenoflow/Diabetes---1"))
        .and(body_partial_json(json!({"website": "https://example.org"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .create_repository(
            ORG,
            &phenoflow_github::host::NewRepository {
                name: REPO.to_string(),
                description: "Diabetes phenotype".to_string(),
                homepage: "https://example.org".to_string(),
                private: true,
                auto_init: true,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn deleting_absent_repository_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/repos/phenoflow/Diabetes---1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    client(&server).delete_repository(ORG, REPO).await.unwrap();
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn existing_file_is_replaced_with_its_sha() {
    let server = MockServer::start().await;
    let file = "/repos/phenoflow/Diabetes---1/contents/python/read.py";
    Mock::given(method("POST"))
        .and(path(file))
        .respond_with(ResponseTemplate::new(422).set_body_string("file already exists"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(file))
        .and(query_param("ref", "read-disc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sha": "old"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(file))
        .and(body_partial_json(json!({
            "sha": "old",
            "branch": "read-disc",
            "content": "cHJpbnQoMSk="
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .put_file(ORG, REPO, "read-disc", "python/read.py", b"print(1)", "m")
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_replacement_surfaces_the_status() {
    let server = MockServer::start().await;
    let file = "/repos/phenoflow/Diabetes---1/contents/a.cwl";
    Mock::given(method("POST"))
        .and(path(file))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(file))
        .respond_with(ResponseTemplate::new(404).set_body_string("branch missing"))
        .mount(&server)
        .await;

    let err = client(&server)
        .put_file(ORG, REPO, "absent", "a.cwl", b"x", "m")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publisher_uploads_through_the_contents_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/phenoflow/repos"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": REPO}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/phenoflow/repos"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/phenoflow/Diabetes---1/branches"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"name": "read-disc"})))
        .expect(1)
        .mount(&server)
        .await;
    for file in ["Diabetes.cwl", "python/read.py"] {
        Mock::given(method("POST"))
            .and(path(format!("/repos/phenoflow/Diabetes---1/contents/{file}")))
            .and(body_partial_json(json!({
                "branch": "read-disc",
                "message": "Update made by Phenoflow"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("PATCH"))
        .and(path("/repos/phenoflow/Diabetes---1"))
        .and(body_partial_json(json!({"default_branch": "read-disc"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/phenoflow/Diabetes---1/git/refs/heads/read-disc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"ref": "refs/heads/read-disc", "object": {"sha": "c0ffee"}}
        ])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("python")).unwrap();
    std::fs::write(dir.path().join("Diabetes.cwl"), "cwl").unwrap();
    std::fs::write(dir.path().join("python/read.py"), "print(1)").unwrap();

    let host = phenoflow_github::connect(&server.uri(), "secret", 0).unwrap();
    assert_eq!(host.publish_mode(), PublishMode::Contents);
    let publisher = Publisher::new(
        Arc::clone(&host),
        PublisherSettings {
            organisation: ORG.to_string(),
            homepage: "https://example.org".to_string(),
            release_webhook: None,
        },
    );
    let sha = publisher
        .publish(&PublishRequest {
            repo: REPO.to_string(),
            description: "Diabetes phenotype".to_string(),
            restricted: false,
            branch: "read-disc".to_string(),
            content_dir: dir.path().to_path_buf(),
            submodules: vec![],
        })
        .await
        .unwrap();
    assert_eq!(sha, "c0ffee");
}

//! Mock tests for the GitHub issue store
//!
//! These tests use WireMock to simulate the GitHub REST API and verify the
//! requests the store sends and how it decodes responses.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::TrackerConfig;
    use crate::handler::CrashHandler;
    use crate::identity::RepoIdentity;
    use crate::report::Failure;
    use crate::types::ErrorKind;
    use crate::reconcile::ItemState;
    use crate::tracker::{GitHubIssueStore, IssueDraft, IssueStore, ItemFilter, TrackerError};

    const ISSUES: &str = "/repos/acme/widgets/issues";

    fn create_test_store(mock_server: &MockServer) -> GitHubIssueStore {
        let config = TrackerConfig {
            token: Some("mock_token".to_string()),
            api_base_url: mock_server.uri(),
            timeout_secs: 5,
            max_pages: 3,
            ..TrackerConfig::default()
        };
        GitHubIssueStore::new(&config, "acme", "widgets").expect("Failed to build issue store")
    }

    fn issue(number: u64, state: &str, body: Option<&str>) -> Value {
        json!({
            "number": number,
            "state": state,
            "locked": false,
            "state_reason": null,
            "body": body,
            "title": format!("error: {}", number),
        })
    }

    #[tokio::test]
    async fn test_list_sends_filters_and_skips_pull_requests() {
        let mock_server = MockServer::start().await;

        let mut pull_request = issue(3, "open", Some("pr"));
        pull_request["pull_request"] = json!({ "url": "https://example.invalid/pr/3" });

        Mock::given(method("GET"))
            .and(path(ISSUES))
            .and(header("authorization", "Bearer mock_token"))
            .and(header("accept", "application/vnd.github+json"))
            .and(header("x-github-api-version", "2022-11-28"))
            .and(query_param("filter", "created"))
            .and(query_param("labels", "automated-error"))
            .and(query_param("state", "all"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                issue(1, "open", Some("<!-- hash: aaa -->")),
                issue(2, "closed", None),
                pull_request,
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let items = store
            .list(&ItemFilter::automated("automated-error"))
            .await
            .expect("list succeeds");

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 1);
        assert_eq!(items[0].state, ItemState::Open);
        assert_eq!(items[1].state, ItemState::Closed);
        assert_eq!(items[1].body, "");
    }

    #[tokio::test]
    async fn test_list_follows_pages() {
        let mock_server = MockServer::start().await;

        let full_page: Vec<Value> = (1..=100).map(|n| issue(n, "open", Some("x"))).collect();
        Mock::given(method("GET"))
            .and(path(ISSUES))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(full_page)))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path(ISSUES))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([issue(101, "closed", Some("y"))])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let items = store
            .list(&ItemFilter::automated("automated-error"))
            .await
            .expect("list succeeds");

        assert_eq!(items.len(), 101);
        assert_eq!(items.last().map(|i| i.id), Some(101));
    }

    #[tokio::test]
    async fn test_list_fails_when_page_limit_is_reached() {
        let mock_server = MockServer::start().await;

        let full_page: Vec<Value> = (1..=100).map(|n| issue(n, "open", Some("x"))).collect();
        Mock::given(method("GET"))
            .and(path(ISSUES))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(full_page)))
            // two pages for the store, two more for the handler
            .expect(4)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(ISSUES))
            .respond_with(ResponseTemplate::new(201).set_body_json(issue(999, "open", Some(""))))
            .expect(0)
            .mount(&mock_server)
            .await;

        let config = TrackerConfig {
            token: Some("mock_token".to_string()),
            api_base_url: mock_server.uri(),
            max_pages: 2,
            ..TrackerConfig::default()
        };
        let store = GitHubIssueStore::new(&config, "acme", "widgets").expect("store");

        let err = store
            .list(&ItemFilter::automated("automated-error"))
            .await
            .expect_err("listing is incomplete");
        assert!(matches!(err, TrackerError::Truncated { pages: 2 }));
        assert!(!err.is_transient());

        // The handler must not file a possible duplicate on a partial listing.
        let handler = CrashHandler::new(Arc::new(store), RepoIdentity::new("acme", "widgets", "abc123"));
        let err = handler
            .handle(&Failure::from("Error: boom\n    at run (/srv/app/main.js:1:1)"))
            .await
            .expect_err("handling aborts");
        assert_eq!(err.kind, ErrorKind::Tracker);
    }

    #[tokio::test]
    async fn test_create_posts_draft() {
        let mock_server = MockServer::start().await;

        let draft = IssueDraft {
            title: "error: boom".to_string(),
            body: "<!-- hash: abc -->\n# Error report: boom".to_string(),
            labels: vec!["automated-error".to_string(), "bug".to_string()],
        };

        Mock::given(method("POST"))
            .and(path(ISSUES))
            .and(body_json(json!({
                "title": "error: boom",
                "body": "<!-- hash: abc -->\n# Error report: boom",
                "labels": ["automated-error", "bug"],
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(issue(42, "open", Some(draft.body.as_str()))))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let item = store.create(&draft).await.expect("create succeeds");
        assert_eq!(item.id, 42);
        assert!(item.body.contains("abc"));
    }

    #[tokio::test]
    async fn test_reopen_and_comment() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path(format!("{}/7", ISSUES)))
            .and(body_json(json!({ "state": "open" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue(7, "open", Some(""))))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/7/comments", ISSUES)))
            .and(body_json(json!({ "body": "still failing" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 1 })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        store.update_state(7, ItemState::Open).await.expect("reopen succeeds");
        store.add_comment(7, "still failing").await.expect("comment succeeds");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(ISSUES))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .set_body_json(json!({ "message": "API rate limit exceeded" })),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/9/comments", ISSUES)))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
            .mount(&mock_server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/9", ISSUES)))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })))
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);

        let err = store
            .list(&ItemFilter::automated("automated-error"))
            .await
            .expect_err("rate limited");
        assert!(matches!(err, TrackerError::RateLimited(ref m) if m == "API rate limit exceeded"));
        assert!(err.is_transient());

        let err = store.add_comment(9, "x").await.expect_err("missing item");
        assert!(matches!(err, TrackerError::NotFound(_)));

        let err = store.update_state(9, ItemState::Open).await.expect_err("bad token");
        assert!(matches!(err, TrackerError::Authentication(ref m) if m == "Bad credentials"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_listing_is_decode_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(ISSUES))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let err = store
            .list(&ItemFilter::automated("automated-error"))
            .await
            .expect_err("decode fails");
        assert!(matches!(err, TrackerError::Decode(_)));
    }
}

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use diego_api::{
    collect_entities, list_apps, ApiError, ApiRequest, ApiResponse, ApiResult, HostSession,
    HttpSend, ListOpts, PageParser, PaginatedRequester, RequestFactory, APPS_PATH,
};
use url::Url;

/// Transport that replays a scripted sequence of responses and records
/// every request it was asked to send.
struct ScriptedTransport {
    responses: RefCell<VecDeque<ApiResult<ApiResponse>>>,
    requests: RefCell<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<ApiResult<ApiResponse>>) -> Self {
        Self { responses: RefCell::new(responses.into()), requests: RefCell::new(Vec::new()) }
    }

    fn request_urls(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|r| r.url.to_string()).collect()
    }
}

impl HttpSend for ScriptedTransport {
    fn send(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request: {}", request.url))
    }
}

struct FakeSession {
    logged_in: bool,
}

impl HostSession for FakeSession {
    fn logged_in(&self) -> bool {
        self.logged_in
    }

    fn access_token(&self) -> ApiResult<String> {
        Ok("bearer-tok".to_string())
    }

    fn api_endpoint(&self) -> ApiResult<String> {
        Ok("https://api.example.com".to_string())
    }
}

fn ok(body: serde_json::Value) -> ApiResult<ApiResponse> {
    Ok(ApiResponse { status: 200, body: body.to_string().into_bytes() })
}

fn record(guid: &str) -> serde_json::Value {
    serde_json::json!({ "metadata": { "guid": guid }, "entity": {} })
}

fn app_record(guid: &str, name: &str, space_guid: &str, diego: bool) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "guid": guid },
        "entity": { "name": name, "space_guid": space_guid, "diego": diego },
    })
}

fn space_record(guid: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "guid": guid },
        "entity": { "name": name, "organization_guid": "o1" },
    })
}

fn requester<'a>(client: &'a ScriptedTransport) -> PaginatedRequester<'a, ScriptedTransport> {
    let base = Url::parse("https://api.example.com").unwrap();
    PaginatedRequester {
        factory: RequestFactory::new(base, "bearer-tok", APPS_PATH),
        client,
        parser: PageParser::default(),
    }
}

fn guid_of(record: &diego_core::RawRecord) -> Result<String, diego_core::RecordError> {
    record
        .get("metadata")
        .and_then(|m| m.get("guid"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(diego_core::RecordError { kind: "test", field: "metadata.guid" })
}

#[test]
fn concatenates_all_pages_in_order_with_one_request_each() {
    let transport = ScriptedTransport::new(vec![
        ok(serde_json::json!({
            "next_url": "/v2/apps?page=2",
            "resources": [record("a"), record("b")],
        })),
        ok(serde_json::json!({
            "next_url": "/v2/apps?page=3",
            "resources": [record("c")],
        })),
        ok(serde_json::json!({ "next_url": null, "resources": [record("d")] })),
    ]);
    let guids = collect_entities(&requester(&transport), guid_of).unwrap();
    assert_eq!(guids, vec!["a", "b", "c", "d"]);
    assert_eq!(
        transport.request_urls(),
        vec![
            "https://api.example.com/v2/apps",
            "https://api.example.com/v2/apps?page=2",
            "https://api.example.com/v2/apps?page=3",
        ]
    );
}

#[test]
fn empty_page_with_cursor_still_continues() {
    let transport = ScriptedTransport::new(vec![
        ok(serde_json::json!({ "next_url": "/v2/apps?page=2", "resources": [] })),
        ok(serde_json::json!({ "next_url": null, "resources": [record("z")] })),
    ]);
    let guids = collect_entities(&requester(&transport), guid_of).unwrap();
    assert_eq!(guids, vec!["z"]);
    assert_eq!(transport.requests.borrow().len(), 2);
}

#[test]
fn stops_at_first_malformed_page() {
    let transport = ScriptedTransport::new(vec![
        ok(serde_json::json!({ "next_url": "/v2/apps?page=2", "resources": [record("a")] })),
        Ok(ApiResponse { status: 200, body: b"not json at all".to_vec() }),
        // A third page is scripted but must never be requested.
        ok(serde_json::json!({ "next_url": null, "resources": [record("c")] })),
    ]);
    let err = requester(&transport).fetch_all().unwrap_err();
    assert!(matches!(err, ApiError::MalformedResponse(_)));
    assert_eq!(transport.requests.borrow().len(), 2);
}

#[test]
fn non_success_status_is_a_remote_error() {
    let transport = ScriptedTransport::new(vec![Ok(ApiResponse {
        status: 502,
        body: b"bad gateway".to_vec(),
    })]);
    let err = requester(&transport).fetch_all().unwrap_err();
    match err {
        ApiError::Remote { status, body } => {
            assert_eq!(status, 502);
            assert_eq!(body, "bad gateway");
        }
        other => panic!("expected Remote, got {other:?}"),
    }
    assert_eq!(transport.requests.borrow().len(), 1);
}

#[test]
fn transport_failure_propagates_unchanged() {
    let transport = ScriptedTransport::new(vec![Err(ApiError::Transport("connection refused".into()))]);
    let err = requester(&transport).fetch_all().unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
    assert_eq!(transport.requests.borrow().len(), 1);
}

#[test]
fn filters_are_never_reapplied_past_the_first_page() {
    let base = Url::parse("https://api.example.com").unwrap();
    let transport = ScriptedTransport::new(vec![
        ok(serde_json::json!({
            "next_url": "/v2/spaces?q=organization_guid:o1&page=2",
            "resources": [],
        })),
        ok(serde_json::json!({ "next_url": null, "resources": [] })),
    ]);
    let requester = PaginatedRequester {
        factory: RequestFactory::new(base, "bearer-tok", "/v2/spaces")
            .with_filter("q", "organization_guid:o1"),
        client: &transport,
        parser: PageParser::default(),
    };
    requester.fetch_all().unwrap();
    let urls = transport.request_urls();
    assert_eq!(urls[0], "https://api.example.com/v2/spaces?q=organization_guid%3Ao1");
    // Second request is the locator verbatim; the filter shows up once.
    assert_eq!(urls[1], "https://api.example.com/v2/spaces?q=organization_guid:o1&page=2");
}

#[test]
fn bad_record_aborts_the_collection() {
    let transport = ScriptedTransport::new(vec![ok(serde_json::json!({
        "next_url": null,
        "resources": [
            app_record("a1", "one", "s1", true),
            { "metadata": { "guid": "a2" }, "entity": { "name": "two" } },
        ],
    }))]);
    let err = collect_entities(&requester(&transport), diego_core::Application::from_record)
        .unwrap_err();
    match err {
        ApiError::MalformedRecord(e) => assert_eq!(e.field, "entity.space_guid"),
        other => panic!("expected MalformedRecord, got {other:?}"),
    }
}

#[test]
fn not_logged_in_issues_no_requests() {
    let transport = ScriptedTransport::new(vec![]);
    let session = FakeSession { logged_in: false };
    let err = list_apps(&session, &transport, &ListOpts::default()).unwrap_err();
    assert!(matches!(err, ApiError::NotLoggedIn));
    assert!(transport.requests.borrow().is_empty());
}

#[test]
fn unknown_organization_stops_before_any_collection_fetch() {
    let transport = ScriptedTransport::new(vec![
        // Org lookup comes back empty; nothing else may be requested.
        ok(serde_json::json!({ "next_url": null, "resources": [] })),
    ]);
    let session = FakeSession { logged_in: true };
    let opts = ListOpts { organization: Some("org-404".to_string()) };
    let err = list_apps(&session, &transport, &opts).unwrap_err();
    assert_eq!(err.to_string(), "Organization not found: org-404");
    let urls = transport.request_urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].starts_with("https://api.example.com/v2/organizations?q=name%3Aorg-404"));
}

#[test]
fn list_apps_filters_joins_and_preserves_order() {
    let transport = ScriptedTransport::new(vec![
        // Organization lookup.
        ok(serde_json::json!({ "next_url": null, "resources": [record("o1")] })),
        // Applications, two pages.
        ok(serde_json::json!({
            "next_url": "/v2/apps?q=organization_guid:o1&page=2",
            "resources": [app_record("a1", "one", "s1", true)],
        })),
        ok(serde_json::json!({
            "next_url": null,
            "resources": [app_record("a2", "two", "s2", false), app_record("a3", "three", "s-gone", true)],
        })),
        // Spaces arrive in reverse order of use.
        ok(serde_json::json!({
            "next_url": null,
            "resources": [space_record("s2", "qa"), space_record("s1", "dev")],
        })),
    ]);
    let session = FakeSession { logged_in: true };
    let opts = ListOpts { organization: Some("dragons".to_string()) };
    let rows = list_apps(&session, &transport, &opts).unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].app.name, "one");
    assert_eq!(rows[0].space_name(), Some("dev"));
    assert_eq!(rows[1].app.name, "two");
    assert_eq!(rows[1].space_name(), Some("qa"));
    // Unresolved space keeps the row, with the explicit unknown marker.
    assert_eq!(rows[2].app.name, "three");
    assert_eq!(rows[2].space, None);

    let urls = transport.request_urls();
    assert_eq!(urls.len(), 4);
    assert_eq!(urls[1], "https://api.example.com/v2/apps?q=organization_guid%3Ao1");
    assert_eq!(urls[3], "https://api.example.com/v2/spaces?q=organization_guid%3Ao1");
}

#[test]
fn list_apps_without_filter_queries_bare_collections() {
    let transport = ScriptedTransport::new(vec![
        ok(serde_json::json!({ "next_url": null, "resources": [app_record("a1", "one", "s1", true)] })),
        ok(serde_json::json!({ "next_url": null, "resources": [space_record("s1", "dev")] })),
    ]);
    let session = FakeSession { logged_in: true };
    let rows = list_apps(&session, &transport, &ListOpts::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        transport.request_urls(),
        vec!["https://api.example.com/v2/apps", "https://api.example.com/v2/spaces"]
    );
}

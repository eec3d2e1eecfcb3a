//! Diegoctl API pipeline: authorized paginated fetch, page parsing,
//! and the list-apps orchestrator.
//!
//! The host session and the HTTP transport are trait seams so the
//! pipeline can run against scripted fakes in tests and against any
//! client satisfying the contract in production.

#![forbid(unsafe_code)]

use std::time::Instant;

use diego_core::{Application, PresentableApp, RawRecord, RecordError, Space};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

pub const APPS_PATH: &str = "/v2/apps";
pub const SPACES_PATH: &str = "/v2/spaces";
pub const ORGS_PATH: &str = "/v2/organizations";

/// Errors surfaced by the pipeline. Fail-fast: none are retried or
/// downgraded, and no partial collection escapes past the first one.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not logged in to a cloud controller; log in first")]
    NotLoggedIn,
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("cloud controller returned {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    MalformedRecord(#[from] RecordError),
    #[error("Organization not found: {0}")]
    OrgNotFound(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

// ----------------- Host session seam -----------------

/// What the pipeline needs from its host environment.
pub trait HostSession {
    fn logged_in(&self) -> bool;
    fn access_token(&self) -> ApiResult<String>;
    fn api_endpoint(&self) -> ApiResult<String>;
    fn username(&self) -> Option<String> {
        None
    }
}

/// Session backed by environment variables set at login time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSession;

impl EnvSession {
    pub const API_VAR: &'static str = "DIEGOCTL_API";
    pub const TOKEN_VAR: &'static str = "DIEGOCTL_TOKEN";
    pub const USER_VAR: &'static str = "DIEGOCTL_USER";
}

impl HostSession for EnvSession {
    fn logged_in(&self) -> bool {
        std::env::var(Self::API_VAR).is_ok() && std::env::var(Self::TOKEN_VAR).is_ok()
    }

    fn access_token(&self) -> ApiResult<String> {
        std::env::var(Self::TOKEN_VAR).map_err(|_| ApiError::NotLoggedIn)
    }

    fn api_endpoint(&self) -> ApiResult<String> {
        std::env::var(Self::API_VAR).map_err(|_| ApiError::NotLoggedIn)
    }

    fn username(&self) -> Option<String> {
        std::env::var(Self::USER_VAR).ok()
    }
}

// ----------------- Transport seam -----------------

/// A fully-formed, authorized GET request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub url: Url,
    pub bearer: String,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking HTTP transport. One request in flight at a time; no
/// retries anywhere in the pipeline.
pub trait HttpSend {
    fn send(&self, request: &ApiRequest) -> ApiResult<ApiResponse>;
}

/// Production transport on top of a blocking reqwest client.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// `skip_ssl_validation` mirrors the host's insecure-endpoint
    /// option and is decided at command bootstrap, not here.
    pub fn new(skip_ssl_validation: bool) -> ApiResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(skip_ssl_validation)
            .build()
            .map_err(|e| ApiError::Transport(Box::new(e)))?;
        Ok(Self { client })
    }
}

impl HttpSend for ReqwestTransport {
    fn send(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
        let response = self
            .client
            .get(request.url.clone())
            .bearer_auth(&request.bearer)
            .send()
            .map_err(|e| ApiError::Transport(Box::new(e)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| ApiError::Transport(Box::new(e)))?
            .to_vec();
        Ok(ApiResponse { status, body })
    }
}

// ----------------- Page parser -----------------

/// Cursor field used by the v2 cloud controller. Retargeting to a
/// backend with a different link field is a matter of passing another
/// name to `PageParser::new`.
pub const DEFAULT_CURSOR_FIELD: &str = "next_url";

/// One page of a paginated collection: raw records plus the locator
/// of the next page, if any.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub next: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PageParser {
    cursor_field: String,
}

impl Default for PageParser {
    fn default() -> Self {
        Self::new(DEFAULT_CURSOR_FIELD)
    }
}

impl PageParser {
    pub fn new(cursor_field: impl Into<String>) -> Self {
        Self { cursor_field: cursor_field.into() }
    }

    /// Decode one response body. The cursor may be absent, null, or a
    /// string; anything else is malformed. No page size is assumed —
    /// an empty page with a cursor still continues the collection.
    pub fn parse(&self, body: &[u8]) -> ApiResult<Page> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::MalformedResponse(format!("invalid json: {e}")))?;
        let resources = value
            .get("resources")
            .and_then(|r| r.as_array())
            .ok_or_else(|| ApiError::MalformedResponse("missing resources array".into()))?;
        let mut records = Vec::with_capacity(resources.len());
        for resource in resources {
            let record = resource
                .as_object()
                .ok_or_else(|| ApiError::MalformedResponse("resource is not an object".into()))?;
            records.push(record.clone());
        }
        let next = match value.get(self.cursor_field.as_str()) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(ApiError::MalformedResponse(format!(
                    "{} is not a string: {other}",
                    self.cursor_field
                )))
            }
        };
        Ok(Page { records, next })
    }
}

// ----------------- Request factory -----------------

/// Builds authorized requests for one collection resource. Filters
/// apply to the first page only; follow-up pages use the
/// server-supplied locator verbatim, which already encodes any filter
/// state, so re-applying would duplicate query parameters.
#[derive(Debug, Clone)]
pub struct RequestFactory {
    base: Url,
    token: String,
    path: String,
    filters: Vec<(String, String)>,
}

impl RequestFactory {
    pub fn new(base: Url, token: impl Into<String>, path: impl Into<String>) -> Self {
        Self { base, token: token.into(), path: path.into(), filters: Vec::new() }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    /// `locator` is `None` for the first page, otherwise the value the
    /// previous page returned.
    pub fn request(&self, locator: Option<&str>) -> ApiResult<ApiRequest> {
        let url = match locator {
            Some(loc) => self
                .base
                .join(loc)
                .map_err(|e| ApiError::MalformedResponse(format!("bad next page locator {loc:?}: {e}")))?,
            None => {
                let mut url = self
                    .base
                    .join(&self.path)
                    .map_err(|e| ApiError::Transport(Box::new(e)))?;
                if !self.filters.is_empty() {
                    url.query_pairs_mut()
                        .extend_pairs(self.filters.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                }
                url
            }
        };
        Ok(ApiRequest { url, bearer: self.token.clone() })
    }
}

// ----------------- Paginated requester -----------------

/// Drives the fetch loop for one collection: request, check status,
/// parse page, follow the cursor until the terminal page.
pub struct PaginatedRequester<'a, C: HttpSend + ?Sized> {
    pub factory: RequestFactory,
    pub client: &'a C,
    pub parser: PageParser,
}

impl<'a, C: HttpSend + ?Sized> PaginatedRequester<'a, C> {
    pub fn fetch_all(&self) -> ApiResult<Vec<RawRecord>> {
        let t0 = Instant::now();
        let mut records = Vec::new();
        let mut locator: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let request = self.factory.request(locator.as_deref())?;
            debug!(url = %request.url, page = pages, "fetching collection page");
            let response = self.client.send(&request)?;
            if !response.is_success() {
                return Err(ApiError::Remote {
                    status: response.status,
                    body: String::from_utf8_lossy(&response.body).into_owned(),
                });
            }
            let page = self.parser.parse(&response.body)?;
            pages += 1;
            records.extend(page.records);
            match page.next {
                Some(next) => locator = Some(next),
                None => break,
            }
        }
        info!(pages, records = records.len(), took_ms = %t0.elapsed().as_millis(), "collection fetched");
        Ok(records)
    }
}

// ----------------- Collector -----------------

/// Fetch a full collection and shape every record, first error wins.
/// A single bad record fails the whole fetch; a partially parsed
/// listing would misreport enablement status.
pub fn collect_entities<T, C, P>(requester: &PaginatedRequester<'_, C>, parse: P) -> ApiResult<Vec<T>>
where
    C: HttpSend + ?Sized,
    P: Fn(&RawRecord) -> Result<T, RecordError>,
{
    let raw = requester.fetch_all()?;
    let mut entities = Vec::with_capacity(raw.len());
    for record in &raw {
        entities.push(parse(record)?);
    }
    Ok(entities)
}

// ----------------- Organization lookup -----------------

fn org_guid(record: &RawRecord) -> Result<String, RecordError> {
    record
        .get("metadata")
        .and_then(|m| m.get("guid"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(RecordError { kind: "organization", field: "metadata.guid" })
}

/// Resolve an organization name to its guid. Runs before any
/// application or space fetch so an unknown name aborts the command
/// without further requests.
pub fn find_org_guid<C: HttpSend + ?Sized>(
    client: &C,
    base: &Url,
    token: &str,
    name: &str,
) -> ApiResult<String> {
    let factory = RequestFactory::new(base.clone(), token, ORGS_PATH)
        .with_filter("q", format!("name:{name}"));
    let requester = PaginatedRequester { factory, client, parser: PageParser::default() };
    let guids = collect_entities(&requester, org_guid)?;
    guids
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::OrgNotFound(name.to_string()))
}

// ----------------- List orchestrator -----------------

#[derive(Debug, Clone, Default)]
pub struct ListOpts {
    pub organization: Option<String>,
}

/// Sequence: session check → org resolution (when filtered) → collect
/// applications → collect spaces → join. Both collections are fetched
/// sequentially over the same transport; any error aborts and nothing
/// is handed to the presenter.
pub fn list_apps<S, C>(session: &S, transport: &C, opts: &ListOpts) -> ApiResult<Vec<PresentableApp>>
where
    S: HostSession + ?Sized,
    C: HttpSend + ?Sized,
{
    let t0 = Instant::now();
    if !session.logged_in() {
        return Err(ApiError::NotLoggedIn);
    }
    let token = session.access_token()?;
    let endpoint = session.api_endpoint()?;
    let base = Url::parse(&endpoint).map_err(|e| ApiError::Transport(Box::new(e)))?;
    info!(endpoint = %base, org = ?opts.organization, "api: list start");

    let org_filter = match opts.organization.as_deref() {
        Some(name) => {
            let guid = find_org_guid(transport, &base, &token, name)?;
            debug!(org = %name, guid = %guid, "organization resolved");
            Some(format!("organization_guid:{guid}"))
        }
        None => None,
    };

    let mut app_factory = RequestFactory::new(base.clone(), token.clone(), APPS_PATH);
    let mut space_factory = RequestFactory::new(base, token, SPACES_PATH);
    if let Some(filter) = &org_filter {
        app_factory = app_factory.with_filter("q", filter.clone());
        space_factory = space_factory.with_filter("q", filter.clone());
    }

    let apps = collect_entities(
        &PaginatedRequester { factory: app_factory, client: transport, parser: PageParser::default() },
        Application::from_record,
    )?;
    let spaces = collect_entities(
        &PaginatedRequester { factory: space_factory, client: transport, parser: PageParser::default() },
        Space::from_record,
    )?;
    info!(apps = apps.len(), spaces = spaces.len(), took_ms = %t0.elapsed().as_millis(), "api: list ok");

    let index = diego_core::build_space_index(spaces);
    Ok(diego_core::join_spaces(apps, &index))
}

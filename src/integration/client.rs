//! Outbound REST calls to the integrated third-party system

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use reqwest::blocking::Client;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::digest::DigestChallenge;
use super::error::DispatchError;
use crate::config::SetupConfig;
use crate::secrets::CredentialProvider;

/// Secret store key holding the username/password pair for integrations
pub const REST_INTEGRATION_KEY: &str = "rest_integration";
/// Secret store key holding a raw `Authorization` header value
pub const AUTH_HEADER_KEY: &str = "auth_header_integration";

pub const DEFAULT_EXPECTED_STATUS_CODES: [u16; 3] = [200, 201, 204];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

impl HttpMethod {
    /// Parse a section's `http_method`; absent means POST
    pub fn parse(value: Option<&str>) -> Result<Self, DispatchError> {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("" | "post") => Ok(HttpMethod::Post),
            Some("put") => Ok(HttpMethod::Put),
            Some(other) => Err(DispatchError::configuration(format!(
                "unsupported http_method '{other}' (expected post or put)"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    #[default]
    Basic,
    Digest,
}

impl AuthMethod {
    pub fn parse(value: &str) -> Result<Self, DispatchError> {
        match value.trim().to_lowercase().as_str() {
            "" | "basic" => Ok(AuthMethod::Basic),
            "digest" => Ok(AuthMethod::Digest),
            other => Err(DispatchError::configuration(format!(
                "unsupported auth_method '{other}' (expected basic or digest)"
            ))),
        }
    }
}

/// Status codes a request is allowed to answer with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedStatusCodes(BTreeSet<u16>);

impl Default for ExpectedStatusCodes {
    fn default() -> Self {
        Self(DEFAULT_EXPECTED_STATUS_CODES.into_iter().collect())
    }
}

impl ExpectedStatusCodes {
    /// Accepts `"200, 201,204"`, a single number, or an array of either
    pub fn from_value(value: Option<&Value>) -> Result<Self, DispatchError> {
        let Some(value) = value else {
            return Ok(Self::default());
        };

        let mut codes = BTreeSet::new();
        collect_codes(value, &mut codes)?;
        if codes.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self(codes))
    }

    pub fn contains(&self, status: u16) -> bool {
        self.0.contains(&status)
    }

    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

fn collect_codes(value: &Value, codes: &mut BTreeSet<u16>) -> Result<(), DispatchError> {
    let invalid = |raw: &dyn fmt::Display| {
        DispatchError::configuration(format!("invalid expected_status_codes entry '{raw}'"))
    };

    match value {
        Value::Number(n) => {
            let code = n
                .as_u64()
                .and_then(|c| u16::try_from(c).ok())
                .ok_or_else(|| invalid(n))?;
            codes.insert(code);
        }
        Value::String(s) => {
            for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                codes.insert(part.parse().map_err(|_| invalid(&part))?);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_codes(item, codes)?;
            }
        }
        Value::Null => {}
        other => return Err(invalid(other)),
    }
    Ok(())
}

/// How a request authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Digest { username: String, password: String },
    /// Pre-built `Authorization` header value
    Header(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => write!(f, "Basic({username})"),
            Credentials::Digest { username, .. } => write!(f, "Digest({username})"),
            Credentials::Header(_) => f.write_str("Header(..)"),
        }
    }
}

impl Credentials {
    /// Username/password pair first, then the stored authorization header
    pub fn resolve(
        provider: &dyn CredentialProvider,
        auth_method: AuthMethod,
    ) -> Result<Self, DispatchError> {
        if let Some((username, password)) = provider.pair(REST_INTEGRATION_KEY) {
            return Ok(match auth_method {
                AuthMethod::Basic => Credentials::Basic { username, password },
                AuthMethod::Digest => Credentials::Digest { username, password },
            });
        }

        match provider.password(AUTH_HEADER_KEY) {
            Some(token) if !token.is_empty() => Ok(Credentials::Header(token)),
            _ => Err(DispatchError::configuration(format!(
                "both username and password must be set under '{REST_INTEGRATION_KEY}', \
                 or an authentication header must be stored under '{AUTH_HEADER_KEY}'"
            ))),
        }
    }
}

/// Connection parameters of one section, falling back to `[setup]`
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub hostname: String,
    pub protocol: String,
    pub verify_ssl: bool,
    pub auth_method: AuthMethod,
    pub proxy: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl ConnectionSettings {
    pub fn resolve(setup: &SetupConfig, section: &Map<String, Value>) -> Result<Self, DispatchError> {
        let hostname = section_str(section, "hostname")
            .or_else(|| setup.hostname.clone())
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| {
                DispatchError::configuration("the 'hostname' parameter must be set in the setup configuration")
            })?;

        let protocol = section_str(section, "protocol").unwrap_or_else(|| setup.protocol.clone());
        let verify_ssl = section
            .get("verify_ssl")
            .map_or(setup.verify_ssl, value_as_bool);
        let auth_method = AuthMethod::parse(
            &section_str(section, "auth_method").unwrap_or_else(|| setup.auth_method.clone()),
        )?;
        let proxy = section_str(section, "proxy")
            .or_else(|| setup.proxy.clone())
            .filter(|p| !p.trim().is_empty());
        let header = section_str(section, "header").or_else(|| setup.header.clone());

        Ok(Self {
            hostname: hostname.trim().to_string(),
            protocol,
            verify_ssl,
            auth_method,
            proxy,
            headers: parse_headers(header.as_deref())?,
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}://{}{}", self.protocol, self.hostname, endpoint)
    }
}

fn section_str(section: &Map<String, Value>, key: &str) -> Option<String> {
    match section.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Request headers from a JSON object string
///
/// Single quotes are accepted in place of double quotes. An empty value yields
/// the JSON defaults; `Content-Type` is always `application/json`.
pub fn parse_headers(raw: Option<&str>) -> Result<BTreeMap<String, String>, DispatchError> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty()).unwrap_or("{}");
    let parsed: Map<String, Value> = serde_json::from_str(&raw.replace('\'', "\""))
        .map_err(|e| DispatchError::configuration(format!("invalid header parameter: {e}")))?;

    let mut headers: BTreeMap<String, String> = parsed
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect();

    if headers.is_empty() {
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert("charset".to_string(), "utf-8".to_string());
    }
    headers.retain(|k, _| !k.eq_ignore_ascii_case("content-type"));
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    Ok(headers)
}

/// A fully prepared outbound request
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub credentials: Credentials,
    pub verify_ssl: bool,
    pub proxy: Option<String>,
}

impl OutboundRequest {
    pub fn new(
        settings: &ConnectionSettings,
        credentials: Credentials,
        method: HttpMethod,
        endpoint: &str,
        body: Value,
    ) -> Self {
        let mut headers = settings.headers.clone();
        if let Credentials::Header(token) = &credentials {
            headers.insert("Authorization".to_string(), token.clone());
        }
        Self {
            method,
            url: settings.url(endpoint),
            headers,
            body,
            credentials,
            verify_ssl: settings.verify_ssl,
            proxy: settings.proxy.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Body decoded as JSON, or the raw text as a JSON string
    pub fn decoded(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }
}

/// Executes outbound requests
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: &OutboundRequest) -> Result<RawResponse, DispatchError>;
}

/// Send a request and check its status against the expected set
pub fn send_checked(
    transport: &dyn HttpTransport,
    request: &OutboundRequest,
    expected: &ExpectedStatusCodes,
) -> Result<Value, DispatchError> {
    debug!(method = %request.method, url = %request.url, "Sending integration request");
    let response = transport.execute(request)?;

    if !expected.contains(response.status) {
        return Err(DispatchError::Http {
            method: request.method.to_string(),
            url: request.url.clone(),
            status: response.status,
            body: response.body,
        });
    }

    debug!(status = response.status, url = %request.url, "Integration request succeeded");
    Ok(response.decoded())
}

/// Blocking reqwest transport
#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestTransport;

impl ReqwestTransport {
    pub fn new() -> Self {
        Self
    }

    fn client(request: &OutboundRequest) -> Result<Client, DispatchError> {
        let transport_error = |message: String| DispatchError::Transport {
            url: request.url.clone(),
            message,
        };

        let mut builder = Client::builder().danger_accept_invalid_certs(!request.verify_ssl);
        if let Some(proxy) = &request.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| transport_error(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(|e| transport_error(e.to_string()))
    }

    fn dispatch(
        client: &Client,
        request: &OutboundRequest,
        authorization: Option<&str>,
    ) -> Result<reqwest::blocking::Response, DispatchError> {
        let mut builder = match request.method {
            HttpMethod::Post => client.post(&request.url),
            HttpMethod::Put => client.put(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match (&request.credentials, authorization) {
            (_, Some(header)) => builder.header(reqwest::header::AUTHORIZATION, header),
            (Credentials::Basic { username, password }, None) => {
                builder.basic_auth(username, Some(password))
            }
            _ => builder,
        };

        builder
            .body(request.body.to_string())
            .send()
            .map_err(|e| DispatchError::Transport {
                url: request.url.clone(),
                message: e.to_string(),
            })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: &OutboundRequest) -> Result<RawResponse, DispatchError> {
        let client = Self::client(request)?;
        let mut response = Self::dispatch(&client, request, None)?;

        if let Credentials::Digest { username, password } = &request.credentials {
            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                let challenge = response
                    .headers()
                    .get(reqwest::header::WWW_AUTHENTICATE)
                    .and_then(|h| h.to_str().ok())
                    .and_then(DigestChallenge::parse);
                match challenge {
                    Some(challenge) => {
                        let uri = reqwest::Url::parse(&request.url)
                            .map(|u| match u.query() {
                                Some(q) => format!("{}?{q}", u.path()),
                                None => u.path().to_string(),
                            })
                            .unwrap_or_else(|_| "/".to_string());
                        let header = challenge.authorization(
                            request.method.as_str(),
                            &uri,
                            username,
                            password,
                        );
                        response = Self::dispatch(&client, request, Some(&header))?;
                    }
                    None => warn!(url = %request.url, "401 without a digest challenge"),
                }
            }
        }

        let status = response.status().as_u16();
        let body = response.text().map_err(|e| DispatchError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        })?;
        Ok(RawResponse { status, body })
    }
}

/// Transport that records requests and replays scripted responses
#[derive(Clone)]
pub struct MockTransport {
    pub requests: Arc<Mutex<Vec<OutboundRequest>>>,
    responses: Arc<Mutex<VecDeque<RawResponse>>>,
    fallback: RawResponse,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Answers every request with `200 {}` unless responses are queued
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            fallback: RawResponse::new(200, "{}"),
        }
    }

    pub fn push_response(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(RawResponse::new(status, body));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    pub fn last_request(&self) -> Option<OutboundRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl HttpTransport for MockTransport {
    fn execute(&self, request: &OutboundRequest) -> Result<RawResponse, DispatchError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

// Async HTTP client for the appliance cloud API.
//
// Auth: `Authorization: Bearer <access token>` plus `x-api-key: <client id>`.
// Every request takes its token from the shared `CredentialManager`; a 401
// triggers exactly one `force_refresh_from` and a single retry.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::auth::{CredentialManager, CredentialSet, TokenGrant, TokenRenewer};
use crate::error::Error;
use crate::models::{
    ApplianceDetails, ApplianceState, ApplianceSummary, CommandAck, ErrorBody, RefreshRequest,
    RefreshResponse,
};
use crate::push::{ByteStream, PushSource};
use crate::transport::TransportConfig;

/// Production endpoint of the vendor's developer API.
pub const DEFAULT_BASE_URL: &str = "https://api.developer.electrolux.one/api/v1/";

// ── Dispatcher seam ──────────────────────────────────────────────────

/// The appliance operations the core consumes. The core never sees HTTP.
#[async_trait]
pub trait ApplianceApi: Send + Sync {
    async fn list_appliances(&self) -> Result<Vec<ApplianceSummary>, Error>;

    async fn appliance_details(&self, appliance_id: &str) -> Result<ApplianceDetails, Error>;

    async fn appliance_state(&self, appliance_id: &str) -> Result<ApplianceState, Error>;

    /// Send a structured command. `body` is the nested property object,
    /// e.g. `{"userSelections": {"programUID": "...", "antiCreaseValue": 60}}`.
    async fn send_command(&self, appliance_id: &str, body: &Value) -> Result<CommandAck, Error>;
}

// ── URL helpers ──────────────────────────────────────────────────────

/// Ensure the base URL ends with `/` so segment joins append instead of
/// replacing the last path component.
fn normalize_base_url(raw: &str) -> Result<Url, Error> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, Error> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn header_value(secret: &SecretString, prefix: &str) -> Result<HeaderValue, Error> {
    let mut value = HeaderValue::from_str(&format!("{prefix}{}", secret.expose_secret()))
        .map_err(|e| Error::Authentication {
            message: format!("credential is not a valid header value: {e}"),
        })?;
    value.set_sensitive(true);
    Ok(value)
}

async fn parse_error(status: StatusCode, resp: reqwest::Response) -> Error {
    let raw = resp.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorBody>(&raw) {
        Ok(body) => Error::Api {
            status: status.as_u16(),
            code: body.error.or(body.code),
            message: body.message.unwrap_or_else(|| status.to_string()),
            detail: body.detail,
        },
        Err(_) => Error::Api {
            status: status.as_u16(),
            code: None,
            message: if raw.is_empty() {
                status.to_string()
            } else {
                raw
            },
            detail: None,
        },
    }
}

async fn decode_body<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body,
        }
    })
}

// ── Token endpoint ───────────────────────────────────────────────────

/// Performs renewal against `POST {base}/token/refresh`.
///
/// Kept separate from [`CloudClient`] because the credential manager must
/// exist before the client that depends on it.
pub struct TokenEndpoint {
    http: reqwest::Client,
    base_url: Url,
}

impl TokenEndpoint {
    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url: normalize_base_url(base_url)?,
        })
    }
}

#[async_trait]
impl TokenRenewer for TokenEndpoint {
    async fn renew(
        &self,
        refresh_token: &SecretString,
        client_id: &SecretString,
    ) -> Result<TokenGrant, Error> {
        let url = endpoint(&self.base_url, &["token", "refresh"])?;
        debug!("POST {url}");

        let resp = self
            .http
            .post(url)
            .header("x-api-key", header_value(client_id, "")?)
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await?;

        let status = resp.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            let err = parse_error(status, resp).await;
            return Err(Error::RenewalRejected {
                message: err.to_string(),
            });
        }
        if !status.is_success() {
            return Err(parse_error(status, resp).await);
        }

        let body: RefreshResponse = decode_body(resp).await?;
        Ok(TokenGrant {
            access_token: SecretString::from(body.access_token),
            refresh_token: body.refresh_token.map(SecretString::from),
            expires_in: body.expires_in.map(std::time::Duration::from_secs),
        })
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the appliance cloud API.
pub struct CloudClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
    credentials: Arc<CredentialManager>,
}

impl CloudClient {
    pub fn new(
        base_url: &str,
        transport: &TransportConfig,
        credentials: Arc<CredentialManager>,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            stream_http: transport.build_streaming_client()?,
            base_url: normalize_base_url(base_url)?,
            credentials,
        })
    }

    /// The credential manager this client authenticates through.
    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    fn authorize(
        request: reqwest::RequestBuilder,
        creds: &CredentialSet,
    ) -> Result<reqwest::RequestBuilder, Error> {
        Ok(request
            .header(AUTHORIZATION, header_value(&creds.access_token, "Bearer ")?)
            .header("x-api-key", header_value(&creds.client_id, "")?))
    }

    /// Send an authorized request, renewing once on 401.
    ///
    /// The renewal lock is only held inside `force_refresh_from`; the
    /// request itself runs without it.
    async fn send<F>(&self, build: F) -> Result<reqwest::Response, Error>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let (seen, creds) = self.credentials.ensure_valid_tracked().await?;

        let resp = Self::authorize(build(), &creds)?.send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        warn!("access token rejected, renewing and retrying once");
        let creds = self.credentials.force_refresh_from(seen).await?;
        let resp = Self::authorize(build(), &creds)?.send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "access token rejected after renewal".into(),
            });
        }
        Ok(resp)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {url}");
        let resp = self.send(|| self.http.get(url.clone())).await?;
        let status = resp.status();
        if status.is_success() {
            decode_body(resp).await
        } else {
            Err(parse_error(status, resp).await)
        }
    }
}

#[async_trait]
impl ApplianceApi for CloudClient {
    async fn list_appliances(&self) -> Result<Vec<ApplianceSummary>, Error> {
        self.get(endpoint(&self.base_url, &["appliances"])?).await
    }

    async fn appliance_details(&self, appliance_id: &str) -> Result<ApplianceDetails, Error> {
        self.get(endpoint(&self.base_url, &["appliances", appliance_id, "info"])?)
            .await
    }

    async fn appliance_state(&self, appliance_id: &str) -> Result<ApplianceState, Error> {
        self.get(endpoint(&self.base_url, &["appliances", appliance_id, "state"])?)
            .await
    }

    async fn send_command(&self, appliance_id: &str, body: &Value) -> Result<CommandAck, Error> {
        let url = endpoint(&self.base_url, &["appliances", appliance_id, "command"])?;
        debug!("PUT {url}");

        let resp = self.send(|| self.http.put(url.clone()).json(body)).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(parse_error(status, resp).await);
        }

        let raw = resp.text().await?;
        if raw.trim().is_empty() {
            return Ok(CommandAck::default());
        }
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }
}

#[async_trait]
impl PushSource for CloudClient {
    async fn open(&self, appliance_ids: &[String]) -> Result<ByteStream, Error> {
        let url = endpoint(&self.base_url, &["appliances", "livestream"])?;
        let ids = appliance_ids.join(",");
        debug!("GET {url} (event stream, {} appliances)", appliance_ids.len());

        let resp = self
            .send(|| {
                self.stream_http
                    .get(url.clone())
                    .header(ACCEPT, "text/event-stream")
                    .query(&[("applianceIds", ids.as_str())])
            })
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(parse_error(status, resp).await);
        }

        let stream = async_stream::stream! {
            let mut resp = resp;
            loop {
                match resp.chunk().await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Error::Stream(e.to_string()));
                        break;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

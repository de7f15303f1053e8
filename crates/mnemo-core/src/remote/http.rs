//! Small JSON REST helper shared by the HTTP backends.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{compact_text, normalize_endpoint};

/// A decoded JSON body together with the response headers.
#[derive(Debug)]
pub struct JsonResponse<T> {
    pub body: T,
    pub headers: HeaderMap,
}

impl<T> JsonResponse<T> {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// JSON client bound to one base URL.
///
/// The underlying `reqwest::Client` is injected so connection pooling, proxy
/// and TLS configuration stay with the caller.
#[derive(Clone)]
pub struct JsonRestClient {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl JsonRestClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client,
            base_url: normalize_endpoint(base_url)?,
            headers: HeaderMap::new(),
        })
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidInput(format!("invalid header name {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidInput(format!("invalid value for header {name}")))?;
        self.headers.insert(header, value);
        Ok(self)
    }

    pub fn with_bearer(self, token: &str) -> Result<Self> {
        self.with_header("authorization", &format!("Bearer {token}"))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        tracing::debug!(%method, %url, "Sending request");
        self.client
            .request(method, url)
            .headers(self.headers.clone())
            .header("accept", "application/json")
    }

    /// `GET` a JSON document.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<JsonResponse<T>> {
        let response = self.request(Method::GET, path).query(query);
        let response = send(response, &[]).await?.ok_or_else(|| unreachable_status(path))?;
        decode(response, path).await
    }

    /// `POST` a JSON body and decode the JSON answer.
    ///
    /// Returns `Ok(None)` when the server answered with one of the `accepted`
    /// non-success status codes.
    pub async fn post<B, T>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: &B,
        accepted: &[u16],
    ) -> Result<Option<JsonResponse<T>>>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path).query(query).json(body);
        match send(request, accepted).await? {
            Some(response) => decode(response, path).await.map(Some),
            None => Ok(None),
        }
    }

    /// `POST` a JSON body and ignore whatever comes back.
    pub async fn post_discard<B>(&self, path: &str, body: &B, accepted: &[u16]) -> Result<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        send(self.request(Method::POST, path).json(body), accepted).await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str, accepted: &[u16]) -> Result<()> {
        send(self.request(Method::DELETE, path), accepted).await?;
        Ok(())
    }
}

async fn send(request: RequestBuilder, accepted: &[u16]) -> Result<Option<reqwest::Response>> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(Some(response));
    }
    if accepted.contains(&status.as_u16()) {
        tracing::debug!(status = status.as_u16(), "Accepted non-success status");
        return Ok(None);
    }

    let body = response.text().await.unwrap_or_default();
    Err(api_error(status, &body))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> Result<JsonResponse<T>> {
    let headers = response.headers().clone();
    let text = response.text().await?;
    let body = serde_json::from_str(&text).map_err(|e| Error::decode(format!("reading {path}"), e))?;
    Ok(JsonResponse { body, headers })
}

fn unreachable_status(path: &str) -> Error {
    Error::Invariant(format!("request to {path} accepted a non-success status"))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorMessage>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorMessage {
    Text(String),
    Detailed { message: String },
}

/// Map a failed response onto the error taxonomy.
pub fn api_error(status: StatusCode, body: &str) -> Error {
    let message = parse_api_error(body);
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        let message = message.unwrap_or_else(|| "credentials rejected".to_string());
        return Error::Authentication(format!("{message} ({})", status.as_u16()));
    }

    Error::Api {
        status: status.as_u16(),
        message: message.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
    }
}

fn parse_api_error(body: &str) -> Option<String> {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        let message = payload.message.or(match payload.error {
            Some(ApiErrorMessage::Text(message) | ApiErrorMessage::Detailed { message }) => {
                Some(message)
            }
            None => None,
        });
        if let Some(message) = message {
            return Some(compact_text(&message));
        }
    }

    let trimmed = compact_text(body);
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> JsonRestClient {
        JsonRestClient::new(reqwest::Client::new(), server.uri())
            .unwrap()
            .with_header("x-api-key", "key-1")
            .unwrap()
    }

    #[test]
    fn api_error_prefers_json_message() {
        let error = api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"bad item"}}"#,
        );
        assert_eq!(error.to_string(), "Remote API error: bad item (400)");

        let error = api_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(error.to_string(), "Remote API error: HTTP 502 (502)");
    }

    #[test]
    fn api_error_truncates_long_bodies() {
        let body = "x".repeat(500);
        let Error::Api { message, .. } = api_error(StatusCode::INTERNAL_SERVER_ERROR, &body)
        else {
            panic!("expected api error");
        };
        assert_eq!(message.len(), 180);
    }

    #[test]
    fn unauthorized_is_authentication_failure() {
        let error = api_error(StatusCode::UNAUTHORIZED, r#"{"message":"token expired"}"#);
        assert!(matches!(error, Error::Authentication(_)));
        assert!(error.is_session_fatal());
    }

    #[tokio::test]
    async fn get_sends_default_headers_and_captures_response_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things"))
            .and(query_param("limit", "5"))
            .and(header("x-api-key", "key-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Version", "7")
                    .set_body_json(json!({"ok": true})),
            )
            .mount(&server)
            .await;

        let response: JsonResponse<serde_json::Value> = client(&server)
            .await
            .get("things", &[("limit", "5".to_string())])
            .await
            .unwrap();

        assert_eq!(response.body, json!({"ok": true}));
        assert_eq!(response.header("x-version"), Some("7"));
    }

    #[tokio::test]
    async fn post_accepts_listed_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/things"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        let response: Option<JsonResponse<serde_json::Value>> = client(&server)
            .await
            .post("things", &[], &json!({}), &[412])
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn malformed_json_is_protocol_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let error = client(&server)
            .await
            .get::<serde_json::Value>("things", &[])
            .await
            .unwrap_err();
        assert!(matches!(error, Error::ProtocolDecode { .. }));
    }
}

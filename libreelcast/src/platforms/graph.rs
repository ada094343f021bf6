//! Minimal Graph API client shared by the Instagram and Facebook publishers

use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::PlatformError;

#[derive(Debug, Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `POST {base}/{path}` with form parameters plus the access token
    pub async fn post(
        &self,
        path: &str,
        token: &SecretString,
        params: &[(&str, &str)],
    ) -> Result<Value, PlatformError> {
        debug!(path, "Graph POST");
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("access_token", token.expose_secret()));

        let response = self
            .http
            .post(self.url(path))
            .form(&form)
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        parse_response(response).await
    }

    /// `GET {base}/{path}` with query parameters plus the access token
    pub async fn get(
        &self,
        path: &str,
        token: &SecretString,
        params: &[(&str, &str)],
    ) -> Result<Value, PlatformError> {
        debug!(path, "Graph GET");
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("access_token", token.expose_secret()));

        let response = self
            .http
            .get(self.url(path))
            .query(&query)
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        parse_response(response).await
    }
}

/// Turn a Graph response into JSON or the platform's own error message
async fn parse_response(response: Response) -> Result<Value, PlatformError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PlatformError::Network(e.to_string()))?;

    let json: Option<Value> = serde_json::from_str(&body).ok();

    if let Some(message) = json
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
    {
        return Err(PlatformError::Api(message.to_string()));
    }

    if !status.is_success() {
        return Err(PlatformError::Api(format!("HTTP {}", status)));
    }

    json.ok_or_else(|| PlatformError::Malformed("response body is not JSON".to_string()))
}

/// First string (or numeric) value found under any of `keys`
pub fn extract_id(value: &Value, keys: &[&str]) -> Result<String, PlatformError> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| PlatformError::Malformed(format!("response has no {}", keys.join("/"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token() -> SecretString {
        SecretString::from("test-token".to_string())
    }

    #[test]
    fn test_extract_id_prefers_first_key() {
        let value = json!({"id": "123", "post_id": "456"});
        assert_eq!(extract_id(&value, &["id", "post_id"]).unwrap(), "123");

        let value = json!({"post_id": "456"});
        assert_eq!(extract_id(&value, &["id", "post_id"]).unwrap(), "456");

        let value = json!({"video_id": 789});
        assert_eq!(extract_id(&value, &["video_id"]).unwrap(), "789");
    }

    #[test]
    fn test_extract_id_missing_is_malformed() {
        let value = json!({"success": true});
        assert!(matches!(
            extract_id(&value, &["id"]),
            Err(PlatformError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_post_sends_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123/media"))
            .and(body_string_contains("access_token=test-token"))
            .and(body_string_contains("image_url=https"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = GraphClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let value = client
            .post("123/media", &token(), &[("image_url", "https://x/m/t")])
            .await
            .unwrap();

        assert_eq!(value["id"], "c1");
    }

    #[tokio::test]
    async fn test_get_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/c1"))
            .and(query_param("fields", "status_code,status"))
            .and(query_param("access_token", "test-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status_code": "FINISHED"})),
            )
            .mount(&server)
            .await;

        let client = GraphClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let value = client
            .get("c1", &token(), &[("fields", "status_code,status")])
            .await
            .unwrap();

        assert_eq!(value["status_code"], "FINISHED");
    }

    #[tokio::test]
    async fn test_error_message_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "Invalid OAuth access token.", "code": 190}
            })))
            .mount(&server)
            .await;

        let client = GraphClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.post("123/media", &token(), &[]).await.unwrap_err();

        assert_eq!(err, PlatformError::Api("Invalid OAuth access token.".to_string()));
    }

    #[tokio::test]
    async fn test_non_json_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let client = GraphClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.post("123/media", &token(), &[]).await.unwrap_err();

        assert!(matches!(err, PlatformError::Api(ref m) if m.contains("502")));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = GraphClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.get("c1", &token(), &[]).await.unwrap_err();

        assert!(matches!(err, PlatformError::Network(_)));
    }
}

//! Transport backed by `reqwest`.

use async_trait::async_trait;
use tracing::debug;

use crate::error::FetchError;
use crate::pipeline::{ResourceRequest, ResourceResponse, Transport};

/// Sends requests with a shared `reqwest::Client`.
///
/// Relative URLs are joined onto `base_url` when one is set.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn resolve(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !url.contains("://") => {
                format!("{}/{}", base, url.trim_start_matches('/'))
            }
            _ => url.to_string(),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ResourceRequest) -> Result<ResourceResponse, FetchError> {
        let url = self.resolve(&request.url);
        debug!(method = %request.method, url = %url, "Sending upstream request");

        let mut builder = self
            .client
            .request(request.method, &url)
            .headers(request.headers);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(ResourceResponse::new(status)
            .with_headers(headers)
            .with_body(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::RawQuery;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::Router;
    use http::header::{ETAG, IF_NONE_MATCH};
    use http::{HeaderValue, StatusCode};

    #[test]
    fn test_resolve_joins_relative_urls() {
        let transport = ReqwestTransport::default().with_base_url("http://origin/api/");

        assert_eq!(transport.resolve("users/1"), "http://origin/api/users/1");
        assert_eq!(transport.resolve("/users/1"), "http://origin/api/users/1");
        assert_eq!(transport.resolve("https://other/x"), "https://other/x");
        assert_eq!(ReqwestTransport::default().resolve("users"), "users");
    }

    async fn origin(query: RawQuery, headers: HeaderMap) -> (StatusCode, HeaderMap, String) {
        let mut response_headers = HeaderMap::new();
        response_headers.insert(ETAG, HeaderValue::from_static("\"v1\""));
        if headers.get(IF_NONE_MATCH).is_some_and(|tag| tag == "\"v1\"") {
            return (StatusCode::NOT_MODIFIED, response_headers, String::new());
        }
        (StatusCode::OK, response_headers, query.0.unwrap_or_default())
    }

    #[tokio::test]
    async fn test_send_against_local_origin() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/items", get(origin));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let transport = ReqwestTransport::default().with_base_url(format!("http://{addr}"));

        let response = transport
            .send(ResourceRequest::get("/items").param("page", "2"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "page=2");
        assert_eq!(response.etag().unwrap(), "\"v1\"");

        let conditional = transport
            .send(
                ResourceRequest::get("/items")
                    .header(IF_NONE_MATCH, HeaderValue::from_static("\"v1\"")),
            )
            .await
            .unwrap();
        assert_eq!(conditional.status, StatusCode::NOT_MODIFIED);
        assert!(conditional.body.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::default();
        let result = transport
            .send(ResourceRequest::get(format!("http://{addr}/gone")))
            .await;

        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}

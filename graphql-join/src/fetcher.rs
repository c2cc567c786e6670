//! Transports sending origin operations to their API.

use std::sync::Arc;
use std::time::Duration;

use apollo_compiler::ast;
use async_trait::async_trait;
use http::HeaderMap;
use indexmap::IndexMap;
use url::Url;

use crate::error::ConfigurationError;
use crate::error::FetchError;
use crate::graphql;
use crate::json_ext::Object;

/// Sends one operation to one origin API.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        document: &ast::Document,
        variables: &Object,
    ) -> Result<graphql::Response, FetchError>;
}

/// Transports keyed by API name.
pub type Fetchers = IndexMap<String, Arc<dyn Fetcher>>;

/// Posts operations as GraphQL-over-HTTP JSON requests.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    http_client: reqwest::Client,
    service: Arc<String>,
    url: Arc<Url>,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

#[buildstructor::buildstructor]
impl HttpFetcher {
    /// Construct a new http fetcher that will fetch from the supplied URL.
    #[builder(visibility = "pub")]
    fn new(
        service: String,
        url: Url,
        headers: Option<HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Self, ConfigurationError> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Some(Duration::from_secs(5)))
            .build()
            .map_err(|error| ConfigurationError::HttpClient {
                api: service.clone(),
                reason: error.to_string(),
            })?;
        Ok(Self {
            http_client,
            service: Arc::new(service),
            url: Arc::new(url),
            headers: headers.unwrap_or_default(),
            timeout,
        })
    }

    fn http_error(&self, status_code: Option<u16>, reason: String) -> FetchError {
        FetchError::SubrequestHttpError {
            status_code,
            service: self.service.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        document: &ast::Document,
        variables: &Object,
    ) -> Result<graphql::Response, FetchError> {
        let body = graphql::Request::builder()
            .query(document.to_string())
            .variables(variables.clone())
            .build();
        let body = serde_json::to_vec(&body).map_err(|error| FetchError::InvalidArgument {
            name: "variables".to_string(),
            reason: error.to_string(),
        })?;

        tracing::debug!(service = %self.service, url = %self.url, "sending origin request");
        let mut request = self
            .http_client
            .post(self.url.as_str())
            .headers(self.headers.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::ACCEPT, "application/json")
            .body(body);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|error| {
            let reason = if error.is_timeout() {
                "request timed out".to_string()
            } else {
                error.to_string()
            };
            self.http_error(None, reason)
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| self.http_error(Some(status.as_u16()), error.to_string()))?;
        if !status.is_success() {
            tracing::trace!(service = %self.service, %status, body = ?bytes, "origin request failed");
            return Err(self.http_error(
                Some(status.as_u16()),
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            ));
        }
        graphql::Response::from_bytes(&self.service, bytes)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::body_json;
    use wiremock::matchers::header;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    use super::*;

    fn document() -> ast::Document {
        ast::Document::parse("{ foo }", "origin.graphql").unwrap()
    }

    async fn fetcher(server: &MockServer, timeout: Option<Duration>) -> HttpFetcher {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        HttpFetcher::builder()
            .service("test")
            .url(Url::parse(&format!("{}/graphql", server.uri())).unwrap())
            .headers(headers)
            .and_timeout(timeout)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn posts_query_and_variables_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("x-api-key", "secret"))
            .and(body_json(serde_json::json!({
                "query": document().to_string(),
                "variables": { "id": 1 }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "data": { "foo": "bar" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let variables = json!({ "id": 1 }).as_object().cloned().unwrap();
        let response = fetcher(&server, None)
            .await
            .fetch(&document(), &variables)
            .await
            .unwrap();
        assert_eq!(response.data, Some(json!({ "foo": "bar" })));
    }

    #[tokio::test]
    async fn non_success_status_is_an_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let error = fetcher(&server, None)
            .await
            .fetch(&document(), &Object::new())
            .await
            .unwrap_err();
        assert_eq!(
            error,
            FetchError::SubrequestHttpError {
                status_code: Some(503),
                service: "test".to_string(),
                reason: "Service Unavailable".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let error = fetcher(&server, None)
            .await
            .fetch(&document(), &Object::new())
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::SubrequestMalformedResponse { .. }));
    }

    #[tokio::test]
    async fn slow_origin_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "data": { "foo": "bar" } }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let error = fetcher(&server, Some(Duration::from_millis(50)))
            .await
            .fetch(&document(), &Object::new())
            .await
            .unwrap_err();
        assert_eq!(
            error,
            FetchError::SubrequestHttpError {
                status_code: None,
                service: "test".to_string(),
                reason: "request timed out".to_string(),
            }
        );
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::redirect::Policy;
use url::Url;

use super::{Upstream, UpstreamError};
use crate::http::{Headers, Request, Response, StatusCode};

/// [`Upstream`] backed by a pooled `reqwest` client.
///
/// The network destination is `base`; the `Host` header is either the fixed
/// `host_override` (virtual-host routing on the content origin) or the one on
/// the forwarded request. Redirects are relayed, never followed.
pub struct HttpUpstream {
    name: String,
    base: Url,
    host_override: Option<String>,
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(
        name: impl Into<String>,
        base: Url,
        host_override: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            name: name.into(),
            base,
            host_override,
            client,
        })
    }

    /// Resolves the request path and query against `base`. Only the path and
    /// query ever change; the scheme, host and port stay those of `base`.
    fn url_for(&self, request: &Request) -> Result<Url, UpstreamError> {
        let path = request.path();
        if !path.starts_with('/') {
            return Err(self.transport(format!("refusing non-origin-form target `{path}`")));
        }

        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{path}"));
        url.set_query(request.query_string());

        if url.host_str() != self.base.host_str()
            || url.port_or_known_default() != self.base.port_or_known_default()
        {
            return Err(self.transport(format!("target `{path}` escapes the upstream host")));
        }
        Ok(url)
    }

    fn transport(&self, err: impl std::fmt::Display) -> UpstreamError {
        UpstreamError::Transport {
            upstream: self.name.clone(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: Request) -> Result<Response, UpstreamError> {
        let url = self.url_for(&request)?;
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|e| self.transport(e))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in request.headers().end_to_end(&["host"]).iter() {
            builder = builder.header(name, value);
        }

        let original_host = request.headers().get("host");
        if let Some(host) = self.host_override.as_deref().or(original_host) {
            builder = builder.header("Host", host);
        }
        if let Some(host) = original_host {
            builder = builder.header("X-Forwarded-Host", host);
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let upstream_response = builder.send().await.map_err(|e| self.transport(e))?;

        let status = StatusCode::from_u16(upstream_response.status().as_u16());
        let headers: Headers = upstream_response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();
        let body: Bytes = upstream_response
            .bytes()
            .await
            .map_err(|e| self.transport(e))?;

        Ok(Response::from_parts(status, headers.end_to_end(&[]), body))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;
    use crate::http::Method;

    fn upstream(server: &MockServer, host_override: Option<&str>) -> HttpUpstream {
        let base = Url::parse(&server.base_url()).unwrap();
        HttpUpstream::new("origin", base, host_override.map(str::to_owned)).unwrap()
    }

    #[tokio::test]
    async fn host_override_replaces_client_host() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/wp-json/wp/v2/posts")
                    .query_param("per_page", "3")
                    .header("host", "cms.example.com")
                    .header("x-forwarded-host", "www.example.com");
                then.status(200)
                    .header("content-type", "application/json")
                    .body("[]");
            })
            .await;

        let request = Request::new(Method::Get, "/wp-json/wp/v2/posts?per_page=3")
            .header("Host", "www.example.com");
        let response = upstream(&server, Some("cms.example.com"))
            .send(request)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.media_type().as_deref(), Some("application/json"));
        assert_eq!(&response.body_ref()[..], b"[]");
    }

    #[tokio::test]
    async fn forwards_method_body_and_end_to_end_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/wp-comments-post.php")
                    .header("cookie", "session=1")
                    .header_missing("proxy-authorization")
                    .body("comment=hi");
                then.status(302).header("location", "/post#comment-1");
            })
            .await;

        let request = Request::new(Method::Post, "/wp-comments-post.php")
            .header("Cookie", "session=1")
            .header("Proxy-Authorization", "secret")
            .with_body("comment=hi");
        let response = upstream(&server, None).send(request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status().as_u16(), 302);
        assert_eq!(response.headers().get("location"), Some("/post#comment-1"));
    }

    #[test]
    fn url_stays_on_the_configured_host() {
        let base = Url::parse("http://renderer.internal:3000/app/").unwrap();
        let upstream = HttpUpstream::new("renderer", base, None).unwrap();

        let url = upstream
            .url_for(&Request::new(Method::Get, "/blog/post?page=2"))
            .unwrap();
        assert_eq!(url.as_str(), "http://renderer.internal:3000/app/blog/post?page=2");

        let url = upstream
            .url_for(&Request::new(Method::Get, "//evil.example/steal"))
            .unwrap();
        assert_eq!(url.host_str(), Some("renderer.internal"));

        let err = upstream
            .url_for(&Request::new(Method::Get, "@evil.example/steal"))
            .unwrap_err();
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let upstream = HttpUpstream::new("renderer", base, None).unwrap();
        let err = upstream
            .send(Request::new(Method::Get, "/"))
            .await
            .unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(err.upstream(), "renderer");
    }
}

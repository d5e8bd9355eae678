//! Wire access to remote instances
//!
//! [`Transport`] is the seam between the proxy client and the network.
//! [`HttpTransport`] speaks HTTP through `reqwest`; tests plug in-process peers
//! in its place.

use crate::config::Credentials;
use crate::registry::RemoteInstance;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// Request against a remote instance, relative to its base endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub method: Method,
    /// Unescaped path segments, e.g. `["source", "BaseDistro", "pack1"]`
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    /// JSON document sent with the request
    pub body: Option<Bytes>,
}

impl RemoteRequest {
    /// GET request for `segments`
    #[must_use]
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::Get,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    /// POST request for `segments`
    #[must_use]
    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::Post,
            ..Self::get(segments)
        }
    }

    /// Append a query parameter
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Slash-joined path, used for cache keys and logs
    #[must_use]
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            path.push('/');
            path.push_str(segment);
        }
        path
    }
}

impl fmt::Display for RemoteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.method, self.path())?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            write!(f, "{}{k}={v}", if i == 0 { '?' } else { '&' })?;
        }
        Ok(())
    }
}

/// Raw response from a remote instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RemoteResponse {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network failures below the HTTP status level
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("cannot build request url: {0}")]
    InvalidUrl(String),
}

/// Executes requests against a remote instance
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Execute one request; non-2xx statuses are returned, not raised
    async fn execute(
        &self,
        instance: &RemoteInstance,
        request: RemoteRequest,
    ) -> Result<RemoteResponse, TransportError>;
}

/// HTTP transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Transport with a default client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport sharing an existing client
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Full URL of `request` under the instance's base endpoint
    ///
    /// # Errors
    /// Returns error if the base endpoint cannot carry a path
    pub fn url(instance: &RemoteInstance, request: &RemoteRequest) -> Result<url::Url, TransportError> {
        let mut url = instance.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidUrl(instance.base_url.to_string()))?
            .pop_if_empty()
            .extend(&request.segments);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        instance: &RemoteInstance,
        request: RemoteRequest,
    ) -> Result<RemoteResponse, TransportError> {
        let url = Self::url(instance, &request)?;
        let mut builder = match request.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
        };
        builder = match &instance.credentials {
            Some(Credentials::Basic { user, password }) => builder.basic_auth(user, Some(password)),
            Some(Credentials::Token { token }) => builder.bearer_auth(token),
            None => builder,
        };
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder.send().await.map_err(map_reqwest)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest)?;
        Ok(RemoteResponse { status, body })
    }
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(url: &str) -> RemoteInstance {
        RemoteInstance {
            name: "peer".into(),
            base_url: url::Url::parse(url).unwrap(),
            credentials: None,
        }
    }

    #[test]
    fn request_path_and_display() {
        let req = RemoteRequest::get(["source", "BaseDistro", "pack1"])
            .with_query("rev", "abc")
            .with_query("expand", "0");
        assert_eq!(req.path(), "/source/BaseDistro/pack1");
        assert_eq!(req.to_string(), "Get /source/BaseDistro/pack1?rev=abc&expand=0");
        assert_eq!(RemoteRequest::post(["build", "p"]).method, Method::Post);
    }

    #[test]
    fn url_joins_under_base_path() {
        let req = RemoteRequest::get(["source", "home:Iggy", "pack1"]).with_query("rev", "1");
        let url = HttpTransport::url(&instance("https://peer.example.org/api/"), &req).unwrap();
        assert_eq!(
            url.as_str(),
            "https://peer.example.org/api/source/home:Iggy/pack1?rev=1"
        );
    }

    #[test]
    fn url_escapes_segments() {
        let req = RemoteRequest::get(["source", "a b", "c?d"]);
        let url = HttpTransport::url(&instance("http://peer/"), &req).unwrap();
        assert_eq!(url.as_str(), "http://peer/source/a%20b/c%3Fd");
    }
}

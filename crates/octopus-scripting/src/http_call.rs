//! Validated parameters for outbound http calls and local replies

use crate::error::{Result, ScriptError};
use bytes::Bytes;
use octopus_core::headers::{AUTHORITY, METHOD, PATH, STATUS};
use octopus_core::{Buffer, HeaderMap, HttpMessage};
use std::time::Duration;

/// Outbound request a script sends to a configured cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCallRequest {
    cluster: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
}

impl HttpCallRequest {
    /// Validate an http call.
    ///
    /// `headers` must carry `:path`, `:method` and `:authority`. A `timeout_ms`
    /// of zero means no timeout; negative values are rejected. A body sets
    /// `content-length`.
    pub fn new(
        cluster: impl Into<String>,
        mut headers: HeaderMap,
        body: Option<Bytes>,
        timeout_ms: i64,
    ) -> Result<Self> {
        let timeout_ms = u64::try_from(timeout_ms)
            .map_err(|_| ScriptError::invalid_argument("http call timeout must be >= 0"))?;

        for required in [PATH, METHOD, AUTHORITY] {
            if !headers.contains(required) {
                return Err(ScriptError::invalid_argument(format!(
                    "http call headers must include '{required}'"
                )));
            }
        }

        if let Some(body) = &body {
            headers.set_content_length(body.len());
        }

        Ok(Self {
            cluster: cluster.into(),
            headers,
            body,
            timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        })
    }

    /// Target cluster name
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request body
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Request timeout, `None` when unbounded
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn into_parts(self) -> (String, HttpMessage, Option<Duration>) {
        (
            self.cluster,
            HttpMessage::new(self.headers, self.body),
            self.timeout,
        )
    }
}

/// Response to a script's http call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCallResponse {
    /// Response headers, including `:status`
    pub headers: HeaderMap,
    /// Response body, absent when empty
    pub body: Option<Bytes>,
}

impl HttpCallResponse {
    /// Numeric `:status`
    pub fn status(&self) -> Option<u16> {
        self.headers.status().and_then(|status| status.parse().ok())
    }
}

impl From<HttpMessage> for HttpCallResponse {
    fn from(message: HttpMessage) -> Self {
        Self {
            headers: message.headers,
            body: message.body,
        }
    }
}

/// Locally generated response that ends a direction's iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReply {
    status: u16,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl LocalReply {
    /// Validate a local reply. `:status` must be an integer in 200..=599.
    pub fn new(mut headers: HeaderMap, body: Option<Bytes>) -> Result<Self> {
        let status = headers
            .status()
            .ok_or_else(|| ScriptError::invalid_argument(":status must be specified"))?;
        let status: u16 = status
            .parse()
            .ok()
            .filter(|code| (200..=599).contains(code))
            .ok_or_else(|| {
                ScriptError::invalid_argument(format!(
                    ":status must be between 200-599, got '{status}'"
                ))
            })?;

        if let Some(body) = &body {
            headers.set_content_length(body.len());
        }

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Reply sent when a script fails
    pub(crate) fn script_error() -> Self {
        let body = Bytes::from_static(b"script error");
        let mut headers = HeaderMap::new();
        headers.add(STATUS, "500");
        headers.set_content_length(body.len());
        Self {
            status: 500,
            headers,
            body: Some(body),
        }
    }

    /// Response status
    pub fn status(&self) -> u16 {
        self.status
    }

    pub(crate) fn into_parts(self) -> (HeaderMap, Option<Buffer>) {
        (self.headers, self.body.map(Buffer::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_headers() -> HeaderMap {
        [(METHOD, "POST"), (PATH, "/check"), (AUTHORITY, "auth")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_request_requires_authority() {
        let headers: HeaderMap = [(METHOD, "GET"), (PATH, "/")].into_iter().collect();
        let err = HttpCallRequest::new("auth", headers, None, 0).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidArgument { .. }));
        assert!(err.to_string().contains(":authority"));
    }

    #[test]
    fn test_request_timeout() {
        let request = HttpCallRequest::new("auth", call_headers(), None, 0).unwrap();
        assert_eq!(request.timeout(), None);

        let request = HttpCallRequest::new("auth", call_headers(), None, 250).unwrap();
        assert_eq!(request.timeout(), Some(Duration::from_millis(250)));

        assert!(HttpCallRequest::new("auth", call_headers(), None, -1).is_err());
    }

    #[test]
    fn test_request_body_sets_content_length() {
        let request = HttpCallRequest::new(
            "auth",
            call_headers(),
            Some(Bytes::from_static(b"{\"user\":1}")),
            0,
        )
        .unwrap();
        assert_eq!(request.headers().get("content-length"), Some("10"));

        let (cluster, message, _) = request.into_parts();
        assert_eq!(cluster, "auth");
        assert_eq!(message.body.as_deref(), Some(&b"{\"user\":1}"[..]));
    }

    #[test]
    fn test_reply_status_range() {
        let reply = |status: &str| {
            LocalReply::new([(STATUS, status)].into_iter().collect(), None)
        };

        assert_eq!(reply("200").unwrap().status(), 200);
        assert_eq!(reply("599").unwrap().status(), 599);
        assert!(reply("199").is_err());
        assert!(reply("600").is_err());
        assert!(reply("ok").is_err());
        assert!(LocalReply::new(HeaderMap::new(), None).is_err());
    }

    #[test]
    fn test_script_error_reply() {
        let (headers, body) = LocalReply::script_error().into_parts();
        assert_eq!(headers.status(), Some("500"));
        assert_eq!(headers.get("content-length"), Some("12"));
        assert_eq!(body.unwrap().as_slice(), b"script error");
    }

    #[test]
    fn test_response_status() {
        let response = HttpCallResponse::from(HttpMessage::new(
            [(STATUS, "204")].into_iter().collect(),
            None,
        ));
        assert_eq!(response.status(), Some(204));
    }
}

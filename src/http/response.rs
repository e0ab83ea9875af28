use std::collections::HashMap;

/// HTTP status codes the relay produces.
///
/// - `Ok` (200): forwarded reply, health document, preflight
/// - `BadRequest` (400): malformed request
/// - `NotFound` (404): GET on a path that is not the health endpoint
/// - `MethodNotAllowed` (405): anything other than GET, POST, OPTIONS
/// - `LengthRequired` (411): POST without a declared body length
/// - `PayloadTooLarge` (413): body over the configured limit
/// - `HeadersTooLarge` (431): header section over the parser limit
/// - `InternalServerError` (500): relay-internal fault
/// - `BadGateway` (502): backend sent something that is not a usable reply
/// - `ServiceUnavailable` (503): backend unreachable or timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    LengthRequired,
    PayloadTooLarge,
    HeadersTooLarge,
    InternalServerError,
    BadGateway,
    ServiceUnavailable,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use rpc_relay::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::ServiceUnavailable.as_u16(), 503);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::LengthRequired => 411,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::HeadersTooLarge => 431,
            StatusCode::InternalServerError => 500,
            StatusCode::BadGateway => 502,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::LengthRequired => "Length Required",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::HeadersTooLarge => "Request Header Fields Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// HTTP headers as key-value pairs
    pub headers: HashMap<String, String>,
    /// Response body as bytes
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the final Response.
    ///
    /// Adds a Content-Length header matching the body unless one was set.
    pub fn build(mut self) -> Response {
        self.headers
            .entry("Content-Length".to_string())
            .or_insert_with(|| self.body.len().to_string());

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// A 200 OK response carrying a JSON body.
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::json_with_status(StatusCode::Ok, body)
    }

    /// A JSON response with an arbitrary status.
    pub fn json_with_status(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "application/json")
            .body(body)
            .build()
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        ResponseBuilder::new(StatusCode::NotFound)
            .header("Content-Type", "text/plain")
            .body(b"404 Not Found".to_vec())
            .build()
    }

    /// Creates a 405 response naming the methods the relay accepts.
    pub fn method_not_allowed() -> Self {
        ResponseBuilder::new(StatusCode::MethodNotAllowed)
            .header("Allow", "GET, POST, OPTIONS")
            .header("Content-Type", "text/plain")
            .body(b"405 Method Not Allowed".to_vec())
            .build()
    }

    /// Drops the body so the response can answer a `HEAD` request.
    pub fn without_body(mut self) -> Self {
        self.body.clear();
        self.headers.insert("Content-Length".to_string(), "0".to_string());
        self
    }

    /// Adds or replaces a header on an already built response.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Looks up a header by name, ignoring ASCII case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

//! Cross-origin headers.
//!
//! Every response the relay writes passes through [`attach`], whatever its
//! status, so browser callers on other origins can always read it.

use crate::http::response::{Response, ResponseBuilder, StatusCode};

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type";

/// Adds the permissive cross-origin headers to `response`.
pub fn attach(response: &mut Response) {
    response.set_header("Access-Control-Allow-Origin", ALLOW_ORIGIN);
    response.set_header("Access-Control-Allow-Methods", ALLOW_METHODS);
    response.set_header("Access-Control-Allow-Headers", ALLOW_HEADERS);
}

/// Answer to an `OPTIONS` preflight: 200, headers only, empty body.
pub fn preflight() -> Response {
    let mut response = ResponseBuilder::new(StatusCode::Ok).build();
    attach(&mut response);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_is_empty_and_permissive() {
        let response = preflight();

        assert_eq!(response.status, StatusCode::Ok);
        assert!(response.body.is_empty());
        assert_eq!(response.header("content-length"), Some("0"));
        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(
            response.header("Access-Control-Allow-Methods"),
            Some("GET, POST, OPTIONS")
        );
        assert_eq!(
            response.header("Access-Control-Allow-Headers"),
            Some("Content-Type")
        );
    }

    #[test]
    fn attach_overrides_existing_values() {
        let mut response = Response::not_found();
        response.set_header("Access-Control-Allow-Origin", "https://example.com");

        attach(&mut response);

        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(response.status, StatusCode::NotFound);
    }
}

//! Response handling and transformation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from backend responses
//! - Append an upstream's configured extra headers
//! - Build the proxy's own error responses
//!
//! # Design Decisions
//! - Backend bodies are streamed through, never buffered
//! - Extra headers are appended, never replacing what the backend sent

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;

use crate::http::request::strip_hop_by_hop;

pub const RESTARTING_BODY: &str = "service restarting, retry";

/// Reconfiguration in progress.
pub fn restarting() -> Response<Body> {
    (StatusCode::SERVICE_UNAVAILABLE, RESTARTING_BODY).into_response()
}

/// The upstream is unknown or has no backend left.
pub fn no_backend() -> Response<Body> {
    (StatusCode::SERVICE_UNAVAILABLE, "no backend available").into_response()
}

pub fn not_found() -> Response<Body> {
    (StatusCode::NOT_FOUND, "no location matches").into_response()
}

pub fn internal_error(message: &'static str) -> Response<Body> {
    (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}

/// Finish a backend response for the client.
pub fn finalize(response: &mut Response<Body>, extra: &[(HeaderName, HeaderValue)]) {
    let headers = response.headers_mut();
    strip_hop_by_hop(headers);
    append_proxy_headers(headers, extra);
}

pub fn append_proxy_headers(headers: &mut HeaderMap, extra: &[(HeaderName, HeaderValue)]) {
    for (name, value) in extra {
        headers.append(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn extra_headers_are_appended() {
        let mut response = Response::new(Body::empty());
        response
            .headers_mut()
            .insert("x-cache", HeaderValue::from_static("miss"));
        response
            .headers_mut()
            .insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let extra = vec![
            (HeaderName::from_static("x-cache"), HeaderValue::from_static("edge")),
            (HeaderName::from_static("x-proxy"), HeaderValue::from_static("edge-proxy")),
        ];
        finalize(&mut response, &extra);

        let headers = response.headers();
        let cache: Vec<_> = headers.get_all("x-cache").iter().collect();
        assert_eq!(cache, vec!["miss", "edge"]);
        assert_eq!(headers.get("x-proxy").unwrap(), "edge-proxy");
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
    }

    #[test]
    fn restarting_is_503() {
        assert_eq!(restarting().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

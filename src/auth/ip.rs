//! Client IP extraction.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};

/// Determine the client IP of a request.
///
/// Behind a reverse proxy (`trust_proxy`), the first `X-Forwarded-For` entry
/// is used. Otherwise the peer address from `ConnectInfo`.
pub fn extract_client_ip<B>(request: &Request<B>, trust_proxy: bool) -> Option<String> {
    if trust_proxy {
        return request
            .headers()
            .get("x-forwarded-for")?
            .to_str()
            .ok()?
            .split(',')
            .next()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string);
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_forwarded_for_first_entry() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(
            extract_client_ip(&request, true).as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn test_forwarded_for_ignored_without_proxy() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_client_ip(&request, false), None);
    }

    #[test]
    fn test_connect_info() {
        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));

        assert_eq!(
            extract_client_ip(&request, false).as_deref(),
            Some("192.0.2.1")
        );
    }
}

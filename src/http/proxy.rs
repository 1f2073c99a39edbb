//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Classify each inbound request as plain HTTP or upgrade handshake
//! - Forward plain requests over the pair's upstream link, untouched
//! - Stream the upstream response back, untouched
//! - Answer with a generic failure when the upstream cannot be reached
//!
//! # Design Decisions
//! - No header is added, removed or rewritten in either direction
//! - Bodies stream through; nothing is buffered in full
//! - No retries: a failed exchange is reported and answered once

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};

use crate::error::RelayError;
use crate::http::server::RelayState;
use crate::http::websocket::forward_upgrade;
use crate::net::Pair;

/// Entry point for every request on every inbound connection.
pub(crate) async fn relay_handler(
    State(state): State<RelayState>,
    Extension(pair): Extension<Arc<Pair>>,
    request: Request<Body>,
) -> Response {
    if is_upgrade_request(request.headers()) {
        forward_upgrade(state, pair, request).await
    } else {
        forward_http(pair, request).await
    }
}

/// Whether the request asks to switch protocols (`Connection: upgrade` plus
/// an `Upgrade` header).
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        && headers.get_all(header::CONNECTION).iter().any(|value| {
            value
                .to_str()
                .map(|v| v.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")))
                .unwrap_or(false)
        })
}

async fn forward_http(pair: Arc<Pair>, request: Request<Body>) -> Response {
    let started = Instant::now();
    let observer = Arc::clone(pair.observer());
    observer.on_request_received(pair.id(), request.method(), request_target(&request));

    let result = pair.upstream().lock().await.send(request).await;

    match result {
        Ok(response) => {
            observer.on_response_relayed(pair.id(), response.status(), started.elapsed());
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(error) => {
            observer.on_error(pair.id(), &error);
            failure_response(&error)
        }
    }
}

/// Path and query as the client sent them.
pub(crate) fn request_target<B>(request: &Request<B>) -> &str {
    request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| request.uri().path())
}

/// The generic answer for an exchange that never reached the upstream's
/// response head.
pub(crate) fn failure_response(error: &RelayError) -> Response {
    let status = match error {
        RelayError::ConnectTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, "Upstream request failed").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::time::Duration;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn websocket_handshake_is_upgrade() {
        let map = headers(&[
            (header::CONNECTION, "Upgrade"),
            (header::UPGRADE, "websocket"),
        ]);
        assert!(is_upgrade_request(&map));
    }

    #[test]
    fn upgrade_token_found_in_list() {
        let map = headers(&[
            (header::CONNECTION, "keep-alive, Upgrade"),
            (header::UPGRADE, "websocket"),
        ]);
        assert!(is_upgrade_request(&map));
    }

    #[test]
    fn upgrade_needs_both_headers() {
        assert!(!is_upgrade_request(&headers(&[(header::UPGRADE, "websocket")])));
        assert!(!is_upgrade_request(&headers(&[(header::CONNECTION, "upgrade")])));
        assert!(!is_upgrade_request(&headers(&[
            (header::CONNECTION, "keep-alive"),
            (header::UPGRADE, "websocket"),
        ])));
    }

    #[test]
    fn request_target_keeps_query() {
        let request = Request::get("/stream?session=7").body(()).unwrap();
        assert_eq!(request_target(&request), "/stream?session=7");
    }

    #[test]
    fn failure_status_depends_on_cause() {
        let refused = RelayError::Connect {
            address: "127.0.0.1:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        let slow = RelayError::ConnectTimeout {
            address: "127.0.0.1:1".into(),
            after: Duration::from_secs(5),
        };
        assert_eq!(failure_response(&refused).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(failure_response(&slow).status(), StatusCode::GATEWAY_TIMEOUT);
    }
}

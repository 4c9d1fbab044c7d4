//! Axum middleware verifying the HMAC headers a worker attaches to
//! `/supervisor/rpc/*` calls (§4.6).

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use taskmesh_rpc::auth::{self, AuthHeaders};

use crate::error::ApiError;
use crate::supervisor::SupervisorState;

fn header(headers: &HeaderMap, name: &str) -> Result<String, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| ApiError::Unauthorized)
}

/// Recomputes the caller's signature against this group's configured worker
/// token and rejects the request if it doesn't match.
pub async fn require_worker_signature(
    State(state): State<SupervisorState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = AuthHeaders {
        group: header(request.headers(), auth::HEADER_GROUP)?,
        timestamp: header(request.headers(), auth::HEADER_TIMESTAMP)?
            .parse()
            .map_err(|_| ApiError::Unauthorized)?,
        nonce: header(request.headers(), auth::HEADER_NONCE)?,
        signature: header(request.headers(), auth::HEADER_SIGNATURE)?,
    };

    if !auth::verify(&state.worker_token, &headers) {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_header_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(header(&headers, auth::HEADER_GROUP), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn present_header_is_returned() {
        let mut headers = HeaderMap::new();
        headers.insert(auth::HEADER_GROUP, HeaderValue::from_static("default"));
        assert_eq!(header(&headers, auth::HEADER_GROUP).unwrap(), "default");
    }
}

//! HTTP response building helpers
//!
//! Every handler answers through these so error bodies stay uniform:
//! `{"error": message}` with a status derived from the error variant.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::GamificationError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
    response
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

pub fn no_content() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": message }))
}

pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "Method not allowed" }),
    )
}

pub fn payload_too_large(limit: u64) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        &serde_json::json!({ "error": format!("Body exceeds {} bytes", limit) }),
    )
}

/// HTTP status for an error variant
pub fn status_for(error: &GamificationError) -> StatusCode {
    match error {
        GamificationError::Validation(_) | GamificationError::Json(_) => StatusCode::BAD_REQUEST,
        GamificationError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        GamificationError::Forbidden(_) => StatusCode::FORBIDDEN,
        GamificationError::NotFound(_) => StatusCode::NOT_FOUND,
        GamificationError::Conflict(_) => StatusCode::CONFLICT,
        GamificationError::ExternalIo(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a GamificationError to an appropriate HTTP response
pub fn error_response(error: GamificationError) -> Response<Full<Bytes>> {
    let status = status_for(&error);
    let message = match &error {
        GamificationError::Validation(msg)
        | GamificationError::Unauthorized(msg)
        | GamificationError::Forbidden(msg)
        | GamificationError::NotFound(msg)
        | GamificationError::Conflict(msg) => msg.clone(),
        other => other.to_string(),
    };

    if status.is_server_error() {
        error!(status = %status, error = %message, "Request failed");
    }

    json_response(status, &serde_json::json!({ "error": message }))
}

/// Build a binary response with the given content type
pub fn binary_response(content_type: &str, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    let value = header::HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream"));
    response.headers_mut().insert(header::CONTENT_TYPE, value);
    response
}

/// Result type alias for handlers
pub type HandlerResult = Result<Response<Full<Bytes>>, GamificationError>;

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, GamificationError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}

/// Wrap a create result into an HTTP response with 201 Created
pub fn from_create_result<T: Serialize>(result: Result<T, GamificationError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => created(&value),
        Err(e) => error_response(e),
    }
}

/// Wrap a delete result into an HTTP response with 204 No Content
pub fn from_delete_result(result: Result<(), GamificationError>) -> Response<Full<Bytes>> {
    match result {
        Ok(()) => no_content(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response() {
        let resp = ok(&serde_json::json!({"test": true}));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&GamificationError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&GamificationError::Unauthorized("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&GamificationError::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&GamificationError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&GamificationError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&GamificationError::ExternalIo("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&GamificationError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_delete_result() {
        assert_eq!(from_delete_result(Ok(())).status(), StatusCode::NO_CONTENT);
        let resp = from_delete_result(Err(GamificationError::Forbidden("nope".into())));
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}

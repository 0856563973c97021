//! HTTP status translation into the shared error taxonomy.

use mailroom_core::{Error, Result};
use reqwest::{Response, StatusCode};

/// Maps a non-success response to exactly one error kind.
///
/// Rate limiting and server faults become `ServiceUnavailable` so the
/// retry loop picks them up; everything else is terminal.
///
/// # Errors
///
/// The mapped error, carrying the operation name and response body.
pub(crate) async fn check_status(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("provider {operation} returned {status}: {body}");

    Err(match status {
        StatusCode::BAD_REQUEST => Error::validation(detail),
        StatusCode::UNAUTHORIZED => Error::unauthorized(detail),
        StatusCode::FORBIDDEN => Error::validation(format!("access denied: {detail}")),
        StatusCode::NOT_FOUND => Error::not_found(detail),
        StatusCode::CONFLICT => Error::conflict(detail),
        StatusCode::TOO_MANY_REQUESTS => Error::unavailable(detail),
        status if status.is_server_error() => Error::unavailable(detail),
        _ => Error::unexpected(detail),
    })
}

//! `If-Match` header parsing for conditional writes.
//!
//! Revisions travel to HTTP callers as ETags. Updates and deletes must
//! present the revision they read; the accepted spellings are a bare
//! integer, a quoted integer, and a weak ETag (`W/"n"`, case-insensitive
//! prefix). Anything else is rejected before touching storage.

use mailroom_core::{Error, Result, Revision};

/// Parses an `If-Match` header value into a revision.
///
/// # Errors
///
/// `Validation` for a missing, empty, or malformed value.
pub fn parse_etag(raw: &str) -> Result<Revision> {
    let trimmed = raw.trim();
    let (body, weak) = match trimmed.strip_prefix("W/").or_else(|| trimmed.strip_prefix("w/")) {
        Some(rest) => (rest, true),
        None => (trimmed, false),
    };

    // The weak form is only valid quoted: `W/"n"`, never `W/n`.
    let digits = match body.strip_prefix('"') {
        Some(rest) => rest
            .strip_suffix('"')
            .ok_or_else(|| Error::validation(format!("malformed If-Match header: {raw}")))?,
        None if weak => {
            return Err(Error::validation(format!("malformed If-Match header: {raw}")));
        },
        None => body,
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::validation(format!("malformed If-Match header: {raw}")));
    }

    digits
        .parse::<u64>()
        .map(Revision)
        .map_err(|_| Error::validation(format!("If-Match revision out of range: {raw}")))
}

/// Formats a revision as the quoted ETag sent back to callers.
pub fn format_etag(revision: Revision) -> String {
    format!("\"{revision}\"")
}

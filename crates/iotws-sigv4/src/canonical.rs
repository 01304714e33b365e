//! Canonical request construction for a presigned WebSocket `GET`.
//!
//! The request AWS IoT validates is fixed in shape:
//!
//! ```text
//! GET\n
//! {path}\n
//! X-Amz-Algorithm=..&X-Amz-Credential=..&X-Amz-Date=..&X-Amz-SignedHeaders=host\n
//! host:{host}\n
//! \n
//! host\n
//! {sha256("")}
//! ```
//!
//! The query parameters are emitted in exactly that order. The signature is
//! computed over this string, so the order is part of the wire format.

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};

use crate::signing::ALGORITHM;

/// Characters left unescaped in SigV4 query values: `A-Z a-z 0-9 - _ . ~`.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// The only header covered by the signature.
pub const SIGNED_HEADERS: &str = "host";

/// Terminal element of every credential scope.
pub const SCOPE_TERMINATOR: &str = "aws4_request";

/// Percent-encode a query value with the SigV4 unreserved set.
///
/// ```
/// use iotws_sigv4::uri_encode;
///
/// assert_eq!(uri_encode("AKID/20230101"), "AKID%2F20230101");
/// assert_eq!(uri_encode("a-b_c.d~e"), "a-b_c.d~e");
/// ```
#[must_use]
pub fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// `YYYYMMDD` for the credential scope.
#[must_use]
pub fn date_stamp(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%d").to_string()
}

/// `YYYYMMDD'T'HHMMSS'Z'` for `X-Amz-Date`.
#[must_use]
pub fn amz_date(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `date/region/service/aws4_request`.
#[must_use]
pub fn credential_scope(date_stamp: &str, region: &str, service: &str) -> String {
    format!("{date_stamp}/{region}/{service}/{SCOPE_TERMINATOR}")
}

/// Build the canonical query string that the signature covers.
///
/// Parameter order is fixed: algorithm, credential, date, signed headers.
/// `X-Amz-Signature` and `X-Amz-Security-Token` are appended afterwards by
/// the caller and are not part of the signed string.
#[must_use]
pub fn build_canonical_query(access_key_id: &str, credential_scope: &str, amz_date: &str) -> String {
    let credential = uri_encode(&format!("{access_key_id}/{credential_scope}"));
    format!(
        "X-Amz-Algorithm={ALGORITHM}&X-Amz-Credential={credential}&X-Amz-Date={amz_date}&X-Amz-SignedHeaders={SIGNED_HEADERS}"
    )
}

/// Build the canonical request for a zero-body `GET` signed on `host` only.
#[must_use]
pub fn build_canonical_request(path: &str, canonical_query: &str, host: &str) -> String {
    let payload_hash = hash_payload(b"");
    format!("GET\n{path}\n{canonical_query}\nhost:{host}\n\n{SIGNED_HEADERS}\n{payload_hash}")
}

/// Hex-encoded SHA-256 of `payload`.
///
/// ```
/// use iotws_sigv4::hash_payload;
///
/// assert_eq!(
///     hash_payload(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

//! Presigned connect URLs for AWS IoT MQTT over WebSocket.
//!
//! A presigned URL embeds the whole SigV4 authorization in its query string:
//!
//! ```text
//! wss://{host}{path}?X-Amz-Algorithm=AWS4-HMAC-SHA256
//!     &X-Amz-Credential={akid}%2F{date}%2F{region}%2F{service}%2Faws4_request
//!     &X-Amz-Date={amz_date}
//!     &X-Amz-SignedHeaders=host
//!     &X-Amz-Signature={hex}
//!     [&X-Amz-Security-Token={token}]
//! ```
//!
//! The URL is bound to the instant it was computed for. It must be minted
//! again for every connection attempt.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::canonical::{
    amz_date, build_canonical_query, build_canonical_request, credential_scope, date_stamp,
    hash_payload, uri_encode,
};
use crate::signing::{build_string_to_sign, compute_signature, derive_signing_key};

/// Service name AWS IoT uses in the credential scope.
pub const IOT_SERVICE: &str = "iotdevicegateway";

/// Path of the MQTT WebSocket endpoint.
pub const MQTT_PATH: &str = "/mqtt";

/// Secure WebSocket scheme.
pub const WSS: &str = "wss";

/// Inputs for signing a single connect request.
#[derive(Debug, Clone)]
pub struct ConnectRequest<'a> {
    pub protocol: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub service: &'a str,
    pub region: &'a str,
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    /// Temporary-credential session token, appended after the signature.
    pub session_token: Option<&'a str>,
    pub now: DateTime<Utc>,
}

impl<'a> ConnectRequest<'a> {
    /// A `wss://{endpoint}/mqtt` request scoped to `iotdevicegateway`.
    pub fn iot(
        endpoint: &'a str,
        region: &'a str,
        access_key_id: &'a str,
        secret_access_key: &'a str,
        session_token: Option<&'a str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            protocol: WSS,
            host: endpoint,
            path: MQTT_PATH,
            service: IOT_SERVICE,
            region,
            access_key_id,
            secret_access_key,
            session_token,
            now,
        }
    }
}

/// A signed URL together with the intermediate values it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub canonical_request: String,
    pub string_to_sign: String,
    pub signature: String,
}

/// Sign `request` and return the full connect URL.
#[must_use]
pub fn sign_connect_url(request: &ConnectRequest<'_>) -> String {
    presign(request).url
}

/// Sign `request`, keeping the canonical request and string to sign.
#[must_use]
pub fn presign(request: &ConnectRequest<'_>) -> PresignedUrl {
    let date = date_stamp(&request.now);
    let timestamp = amz_date(&request.now);
    let scope = credential_scope(&date, request.region, request.service);

    let mut query = build_canonical_query(request.access_key_id, &scope, &timestamp);
    let canonical_request = build_canonical_request(request.path, &query, request.host);

    debug!(
        host = %request.host,
        scope = %scope,
        "built canonical connect request"
    );

    let string_to_sign =
        build_string_to_sign(&timestamp, &scope, &hash_payload(canonical_request.as_bytes()));
    let signing_key = derive_signing_key(
        request.secret_access_key,
        &date,
        request.region,
        request.service,
    );
    let signature = compute_signature(&signing_key, &string_to_sign);

    query.push_str("&X-Amz-Signature=");
    query.push_str(&signature);
    if let Some(token) = request.session_token.filter(|t| !t.is_empty()) {
        query.push_str("&X-Amz-Security-Token=");
        query.push_str(&uri_encode(token));
    }

    let url = format!(
        "{}://{}{}?{query}",
        request.protocol, request.host, request.path
    );

    PresignedUrl {
        url,
        canonical_request,
        string_to_sign,
        signature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ENDPOINT: &str = "abc.iot.us-east-1.amazonaws.com";
    const NEW_YEAR_SIGNATURE: &str =
        "8ebbfce5f1eef3a46df6d26f3feaa03d4894fcc1a09241c1a6418452075e4062";

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, h, m, s).unwrap()
    }

    fn request(now: DateTime<Utc>, token: Option<&str>) -> ConnectRequest<'_> {
        ConnectRequest::iot(ENDPOINT, "us-east-1", "AKIDEXAMPLE", "secret", token, now)
    }

    #[test]
    fn golden_url_without_session_token() {
        let url = sign_connect_url(&request(at(0, 0, 0), None));
        assert_eq!(
            url,
            format!(
                "wss://abc.iot.us-east-1.amazonaws.com/mqtt?X-Amz-Algorithm=AWS4-HMAC-SHA256\
                 &X-Amz-Credential=AKIDEXAMPLE%2F20230101%2Fus-east-1%2Fiotdevicegateway%2Faws4_request\
                 &X-Amz-Date=20230101T000000Z&X-Amz-SignedHeaders=host\
                 &X-Amz-Signature={NEW_YEAR_SIGNATURE}"
            )
        );
    }

    #[test]
    fn session_token_is_appended_after_signature_and_not_signed() {
        let token = "FwoGZXIvYXdzE/token+abc==";
        let signed = presign(&request(at(0, 0, 0), Some(token)));

        assert_eq!(signed.signature, NEW_YEAR_SIGNATURE);
        assert!(signed.url.ends_with(&format!(
            "&X-Amz-Signature={NEW_YEAR_SIGNATURE}&X-Amz-Security-Token=FwoGZXIvYXdzE%2Ftoken%2Babc%3D%3D"
        )));
    }

    #[test]
    fn empty_session_token_is_omitted() {
        let url = sign_connect_url(&request(at(0, 0, 0), Some("")));
        assert!(!url.contains("X-Amz-Security-Token"));
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = presign(&request(at(12, 30, 15), Some("tok")));
        let b = presign(&request(at(12, 30, 15), Some("tok")));
        assert_eq!(a, b);
    }

    #[test]
    fn signature_recomputes_from_canonical_request() {
        let signed = presign(&request(at(0, 0, 0), None));
        assert_eq!(
            hash_payload(signed.canonical_request.as_bytes()),
            "1ccc22039642f0861f8fa03710d55d6df5c00ab1dce3de786365056bd4f00fd4"
        );

        let sts = build_string_to_sign(
            "20230101T000000Z",
            "20230101/us-east-1/iotdevicegateway/aws4_request",
            &hash_payload(signed.canonical_request.as_bytes()),
        );
        assert_eq!(sts, signed.string_to_sign);

        let key = derive_signing_key("secret", "20230101", "us-east-1", IOT_SERVICE);
        assert_eq!(compute_signature(&key, &sts), signed.signature);
    }

    #[test]
    fn one_second_later_changes_date_and_signature() {
        let first = presign(&request(at(0, 0, 0), None));
        let second = presign(&request(at(0, 0, 1), None));

        assert!(second.url.contains("X-Amz-Date=20230101T000001Z"));
        assert_eq!(
            second.signature,
            "753c575317412eb2889b3018cdb527ee8980fd189400ec392571c9bb51631f77"
        );
        assert_ne!(first.signature, second.signature);
        assert_ne!(first.url, second.url);
    }

    #[test]
    fn crossing_midnight_changes_credential_scope() {
        let before = Utc.with_ymd_and_hms(2022, 12, 31, 23, 59, 59).unwrap();
        let first = sign_connect_url(&request(before, None));
        let second = sign_connect_url(&request(at(0, 0, 0), None));

        assert!(first.contains("AKIDEXAMPLE%2F20221231%2F"));
        assert!(second.contains("AKIDEXAMPLE%2F20230101%2F"));
    }

    #[test]
    fn signed_query_order_is_fixed() {
        let url = sign_connect_url(&request(at(0, 0, 0), Some("tok")));
        let (_, query) = url.split_once('?').unwrap();
        let keys: Vec<&str> = query
            .split('&')
            .filter_map(|pair| pair.split_once('=').map(|(k, _)| k))
            .collect();
        assert_eq!(
            keys,
            vec![
                "X-Amz-Algorithm",
                "X-Amz-Credential",
                "X-Amz-Date",
                "X-Amz-SignedHeaders",
                "X-Amz-Signature",
                "X-Amz-Security-Token",
            ]
        );
    }

    #[test]
    fn custom_protocol_and_path() {
        let req = ConnectRequest {
            protocol: "ws",
            path: "/custom",
            ..request(at(0, 0, 0), None)
        };
        let url = sign_connect_url(&req);
        assert!(url.starts_with("ws://abc.iot.us-east-1.amazonaws.com/custom?X-Amz-Algorithm="));
    }
}

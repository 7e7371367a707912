//! Header names and the base64(JSON) header codec
//!
//! Challenges and authorizations are each carried under two names: the
//! current one and a legacy `x-` prefixed one. Writers set both, readers
//! accept either (primary wins). [`HeaderAliases`] is the single place that
//! knows about this.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A primary header name plus its legacy alias
#[derive(Debug, Clone, Copy)]
pub struct HeaderAliases {
    pub primary: &'static str,
    pub legacy: &'static str,
}

/// Where the 402 response puts the requirement
pub const REQUIREMENT_HEADERS: HeaderAliases = HeaderAliases {
    primary: "payment-required",
    legacy: "x-payment-required",
};

/// Where the paid retry puts the authorization payload
pub const AUTHORIZATION_HEADERS: HeaderAliases = HeaderAliases {
    primary: "payment-signature",
    legacy: "x-payment",
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Settlement receipt on a successful paid response
pub const SETTLEMENT_HEADER: &str = "x-payment-response";

impl HeaderAliases {
    /// The first present value, primary before legacy
    pub fn resolve<'a>(&self, headers: &'a HeaderMap) -> Option<&'a HeaderValue> {
        headers
            .get(self.primary)
            .or_else(|| headers.get(self.legacy))
    }

    /// Set the same value under both names
    pub fn insert_all(&self, headers: &mut HeaderMap, value: HeaderValue) {
        headers.insert(HeaderName::from_static(self.legacy), value.clone());
        headers.insert(HeaderName::from_static(self.primary), value);
    }

    /// Both names, for `Access-Control-Expose-Headers` and logging
    pub fn names(&self) -> [&'static str; 2] {
        [self.primary, self.legacy]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderCodecError {
    #[error("Header is not valid ASCII: {0}")]
    NotAscii(#[source] http::header::ToStrError),
    #[error("Invalid base64 in header: {0}")]
    Base64(#[source] base64::DecodeError),
    #[error("Invalid JSON in header: {0}")]
    Json(#[source] serde_json::Error),
    #[error("Failed to build header value: {0}")]
    HeaderValue(#[source] http::header::InvalidHeaderValue),
}

/// base64(JSON(value)) as a header value
pub fn encode_header<T: Serialize + ?Sized>(value: &T) -> Result<HeaderValue, HeaderCodecError> {
    let json = serde_json::to_vec(value).map_err(HeaderCodecError::Json)?;
    HeaderValue::from_str(&b64.encode(json)).map_err(HeaderCodecError::HeaderValue)
}

pub fn decode_header<T: DeserializeOwned>(value: &HeaderValue) -> Result<T, HeaderCodecError> {
    let text = value.to_str().map_err(HeaderCodecError::NotAscii)?;
    let bytes = b64.decode(text.trim()).map_err(HeaderCodecError::Base64)?;
    serde_json::from_slice(&bytes).map_err(HeaderCodecError::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{AssetInfo, Network};
    use crate::x402::types::{PROTOCOL_VERSION, PaymentRequirement, Scheme, TokenAmount};

    fn requirement() -> PaymentRequirement {
        PaymentRequirement {
            protocol_version: PROTOCOL_VERSION,
            scheme: Scheme::Exact,
            network: Network::Solana,
            amount: TokenAmount(10_000),
            resource: url::Url::parse("https://api.example.com/premium/build").unwrap(),
            description: "Build".into(),
            mime_type: "application/json".into(),
            pay_to: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".into(),
            max_timeout_seconds: 60,
            asset: AssetInfo::new("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", 6, "USDC"),
        }
    }

    #[test]
    fn test_requirement_header_is_lossless() {
        let req = requirement();
        let header = encode_header(&req).unwrap();
        let decoded: PaymentRequirement = decode_header(&header).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(encode_header(&decoded).unwrap(), header);
    }

    #[test]
    fn test_resolve_prefers_primary() {
        let mut headers = HeaderMap::new();
        headers.insert("x-payment", HeaderValue::from_static("legacy"));
        assert_eq!(AUTHORIZATION_HEADERS.resolve(&headers).unwrap(), "legacy");

        headers.insert("payment-signature", HeaderValue::from_static("primary"));
        assert_eq!(AUTHORIZATION_HEADERS.resolve(&headers).unwrap(), "primary");
    }

    #[test]
    fn test_insert_all_sets_both() {
        let mut headers = HeaderMap::new();
        REQUIREMENT_HEADERS.insert_all(&mut headers, HeaderValue::from_static("v"));
        for name in REQUIREMENT_HEADERS.names() {
            assert_eq!(headers.get(name).unwrap(), "v");
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let bad = HeaderValue::from_static("not base64!!");
        assert!(matches!(
            decode_header::<PaymentRequirement>(&bad),
            Err(HeaderCodecError::Base64(_))
        ));

        let not_json = HeaderValue::from_str(&b64.encode(b"nope")).unwrap();
        assert!(matches!(
            decode_header::<PaymentRequirement>(&not_json),
            Err(HeaderCodecError::Json(_))
        ));
    }
}

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{GatewayName, Money};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub enum HttpAuth<'a> {
    None,
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

pub enum RequestBody<'a> {
    Empty,
    Json(&'a JsonValue),
    Form(&'a [(String, String)]),
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    gateway: GatewayName,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(gateway: GatewayName, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            gateway,
            timeout,
            max_retries,
        })
    }

    /// Sends a request and returns the parsed JSON body.
    ///
    /// Only GET requests are retried; order creation and refunds are sent exactly once.
    pub async fn request_value(
        &self,
        method: Method,
        url: &str,
        auth: HttpAuth<'_>,
        body: RequestBody<'_>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<JsonValue> {
        let retries = if method == Method::GET {
            self.max_retries
        } else {
            0
        };
        let mut last_error = None;

        for attempt in 0..=retries {
            let mut request = self.client.request(method.clone(), url).timeout(self.timeout);

            request = match &auth {
                HttpAuth::None => request,
                HttpAuth::Bearer(token) => request.bearer_auth(token),
                HttpAuth::Basic { username, password } => {
                    request.basic_auth(username, Some(password))
                }
            };
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            request = match &body {
                RequestBody::Empty => request,
                RequestBody::Json(payload) => request.json(payload),
                RequestBody::Form(fields) => request.form(fields),
            };

            let response = request
                .send()
                .await
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("{} request failed: {}", self.gateway, e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<JsonValue>(&text).map_err(|e| {
                            PaymentError::ProviderError {
                                gateway: self.gateway.to_string(),
                                message: format!("invalid gateway JSON response: {}", e),
                                provider_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(PaymentError::RateLimitError {
                            message: format!("{} rate limit exceeded", self.gateway),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < retries {
                        warn!(
                            gateway = %self.gateway,
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(PaymentError::ProviderError {
                        gateway: self.gateway.to_string(),
                        message: format!("HTTP {}: {}", status, error_description(&text)),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: format!("{} request failed", self.gateway),
        }))
    }
}

/// Decodes a gateway response body into a typed shape.
pub fn decode<T: DeserializeOwned>(gateway: GatewayName, raw: &JsonValue) -> PaymentResult<T> {
    serde_json::from_value(raw.clone()).map_err(|e| PaymentError::ProviderError {
        gateway: gateway.to_string(),
        message: format!("unexpected response shape: {}", e),
        provider_code: None,
        retryable: false,
    })
}

/// Pulls a human-readable description out of a gateway error body.
fn error_description(body: &str) -> String {
    let parsed: Option<JsonValue> = serde_json::from_str(body).ok();
    let described = parsed.as_ref().and_then(|v| {
        v.pointer("/error/description")
            .or_else(|| v.pointer("/error/message"))
            .or_else(|| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    described.unwrap_or_else(|| body.chars().take(500).collect())
}

fn hmac_sha256(secret: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

pub fn sign_hmac_sha256_hex(payload: &[u8], secret: &str) -> String {
    hex::encode(hmac_sha256(secret.as_bytes(), &[payload]))
}

pub fn sign_hmac_sha256_base64(parts: &[&[u8]], secret: &str) -> String {
    BASE64.encode(hmac_sha256(secret.as_bytes(), parts))
}

/// Checks a hex HMAC-SHA256 signature over the exact bytes given.
pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    if signature.is_empty() || secret.is_empty() {
        return false;
    }
    let computed = sign_hmac_sha256_hex(payload, secret);
    secure_eq(computed.as_bytes(), signature.as_bytes())
}

/// Checks a base64 HMAC-SHA256 signature over the concatenation of `parts`.
pub fn verify_hmac_sha256_base64(parts: &[&[u8]], secret: &str, signature: &str) -> bool {
    if signature.is_empty() || secret.is_empty() {
        return false;
    }
    let computed = sign_hmac_sha256_base64(parts, secret);
    secure_eq(computed.as_bytes(), signature.as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Hex SHA-256 of a webhook body, used as a dedupe key when the gateway sends no event id.
pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Number of decimal places in the currency's minor unit.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    match currency.trim().to_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "JPY" | "KMF" | "KRW" | "MGA" | "PYG" | "RWF" | "UGX"
        | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "JOD" | "KWD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Converts a major-unit amount into minor units, rounding half away from zero.
pub fn to_minor_units(money: &Money) -> PaymentResult<i64> {
    let factor = BigDecimal::from(10_i64.pow(minor_unit_exponent(&money.currency)));
    let scaled = (&money.amount * factor).with_scale_round(0, RoundingMode::HalfUp);
    scaled.to_i64().ok_or_else(|| {
        PaymentError::validation(
            format!("amount {} is out of range", money.amount),
            "amount",
        )
    })
}

pub fn from_minor_units(minor: i64, currency: &str) -> BigDecimal {
    let exponent = minor_unit_exponent(currency);
    let factor = BigDecimal::from(10_i64.pow(exponent));
    (BigDecimal::from(minor) / factor).with_scale(exponent as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn money(amount: &str, currency: &str) -> Money {
        Money::new(BigDecimal::from_str(amount).unwrap(), currency)
    }

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hex_signature_round_trips_over_raw_bytes() {
        let payload = br#"{"event":"payment.captured","payload":{}}"#;
        let signature = sign_hmac_sha256_hex(payload, "whsec_test");
        assert!(verify_hmac_sha256_hex(payload, "whsec_test", &signature));
        assert!(!verify_hmac_sha256_hex(payload, "other_secret", &signature));
    }

    #[test]
    fn any_single_byte_mutation_breaks_hex_signature() {
        let payload = br#"{"event":"payment.captured","amount":49900}"#.to_vec();
        let signature = sign_hmac_sha256_hex(&payload, "whsec_test");

        for i in 0..payload.len() {
            let mut mutated = payload.clone();
            mutated[i] ^= 0x01;
            assert!(
                !verify_hmac_sha256_hex(&mutated, "whsec_test", &signature),
                "payload mutation at byte {} still verified",
                i
            );
        }

        let sig_bytes = signature.as_bytes().to_vec();
        for i in 0..sig_bytes.len() {
            let mut mutated = sig_bytes.clone();
            mutated[i] ^= 0x01;
            let mutated = String::from_utf8_lossy(&mutated).to_string();
            assert!(!verify_hmac_sha256_hex(&payload, "whsec_test", &mutated));
        }
    }

    #[test]
    fn reserialized_json_does_not_verify() {
        let raw = br#"{"b": 1, "a": 2}"#;
        let signature = sign_hmac_sha256_hex(raw, "secret");
        let reparsed: JsonValue = serde_json::from_slice(raw).unwrap();
        let reserialized = serde_json::to_vec(&reparsed).unwrap();
        assert!(!verify_hmac_sha256_hex(&reserialized, "secret", &signature));
    }

    #[test]
    fn base64_signature_covers_all_parts() {
        let signature = sign_hmac_sha256_base64(&[b"1700000000", b"{\"a\":1}"], "secret");
        assert!(verify_hmac_sha256_base64(
            &[b"1700000000", b"{\"a\":1}"],
            "secret",
            &signature
        ));
        assert!(!verify_hmac_sha256_base64(
            &[b"1700000001", b"{\"a\":1}"],
            "secret",
            &signature
        ));
    }

    #[test]
    fn empty_signature_never_verifies() {
        assert!(!verify_hmac_sha256_hex(b"{}", "secret", ""));
        assert!(!verify_hmac_sha256_hex(b"{}", "", "abc"));
    }

    #[test]
    fn minor_unit_conversion_is_exact() {
        assert_eq!(to_minor_units(&money("499.00", "INR")).unwrap(), 49900);
        assert_eq!(to_minor_units(&money("1000", "INR")).unwrap(), 100000);
        assert_eq!(to_minor_units(&money("0.29", "USD")).unwrap(), 29);
        assert_eq!(to_minor_units(&money("19.99", "EUR")).unwrap(), 1999);
        assert_eq!(to_minor_units(&money("1234.5", "JPY")).unwrap(), 1235);
        assert_eq!(to_minor_units(&money("1.2345", "KWD")).unwrap(), 1235);
    }

    #[test]
    fn minor_unit_conversion_rounds_half_up() {
        assert_eq!(to_minor_units(&money("10.005", "INR")).unwrap(), 1001);
        assert_eq!(to_minor_units(&money("10.004", "INR")).unwrap(), 1000);
    }

    #[test]
    fn minor_units_convert_back_with_currency_scale() {
        assert_eq!(from_minor_units(49900, "INR").to_string(), "499.00");
        assert_eq!(from_minor_units(1235, "JPY").to_string(), "1235");
        assert_eq!(from_minor_units(1235, "KWD").to_string(), "1.235");
    }

    #[test]
    fn payload_digest_is_stable() {
        assert_eq!(payload_digest(b"abc"), payload_digest(b"abc"));
        assert_ne!(payload_digest(b"abc"), payload_digest(b"abd"));
    }

    #[test]
    fn error_description_prefers_gateway_message() {
        let body = r#"{"error":{"code":"BAD_REQUEST_ERROR","description":"amount too small"}}"#;
        assert_eq!(error_description(body), "amount too small");
        assert_eq!(error_description("plain failure"), "plain failure");
    }
}

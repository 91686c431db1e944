//! AWS Signature Version 4 request signing
//!
//! - Pre-computed `AWS4` + secret key bytes
//! - Daily signing key cache (avoids 4 HMAC operations per request)
//! - Constant empty payload hash
//! - `x-amz-content-sha256` is sent for the `s3` service only

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use hyper::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, HOST};
use hyper::{Request, Uri};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::Authentication;
use crate::client::{ClientError, RequestInterceptor, RequestPipeline, Result};

type HmacSha256 = Hmac<Sha256>;

static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub struct SigV4Signer {
    access_key: String,
    region: String,
    service: String,
    aws4_key: Vec<u8>,
    /// (date_stamp, derived key); the signing key only changes daily
    cached_signing_key: Mutex<Option<(String, [u8; 32])>>,
}

impl SigV4Signer {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl AsRef<str>,
        region: Option<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            region: region.unwrap_or_else(|| "us-east-1".to_string()),
            service: service.into(),
            aws4_key: format!("AWS4{}", secret_key.as_ref()).into_bytes(),
            cached_signing_key: Mutex::new(None),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Sign `request` in place with the current time
    pub fn sign(&self, request: &mut Request<Bytes>) -> Result<()> {
        self.sign_at(request, Utc::now())
    }

    pub fn sign_at(&self, request: &mut Request<Bytes>, now: DateTime<Utc>) -> Result<()> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let payload_hash = if request.body().is_empty() {
            EMPTY_SHA256.to_string()
        } else {
            hex::encode(Sha256::digest(request.body()))
        };

        let host = host_header(request.uri())?;
        let headers = request.headers_mut();
        headers.insert(HOST, header_value(&host)?);
        headers.insert(HeaderName::from_static("x-amz-date"), header_value(&amz_date)?);
        if self.service == "s3" {
            headers.insert(
                HeaderName::from_static("x-amz-content-sha256"),
                header_value(&payload_hash)?,
            );
        }

        // Lowercase names, sorted; the set of headers covered by the signature
        let mut signed = BTreeMap::new();
        for (name, value) in request.headers() {
            let name = name.as_str();
            if name == "host" || name.starts_with("x-amz-") || name == CONTENT_TYPE.as_str() {
                let value = value.to_str().map_err(|_| {
                    ClientError::InvalidRequest(format!("header '{}' is not valid ASCII", name))
                })?;
                signed.insert(name.to_string(), value.trim().to_string());
            }
        }

        let canonical_headers: String = signed
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();
        let signed_headers = signed.keys().map(String::as_str).collect::<Vec<_>>().join(";");

        // The path is used as-is; it is already URI-encoded
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method(),
            request.uri().path(),
            canonical_query_string(request.uri().query().unwrap_or("")),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = self.calculate_signature(&date_stamp, &string_to_sign);
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key, credential_scope, signed_headers, signature
        );

        let mut value = header_value(&authorization)?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn calculate_signature(&self, date_stamp: &str, string_to_sign: &str) -> String {
        let signing_key = {
            let mut cache = self
                .cached_signing_key
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match cache.as_ref() {
                Some((cached_date, cached_key)) if cached_date == date_stamp => *cached_key,
                _ => {
                    let key = self.derive_signing_key(date_stamp);
                    *cache = Some((date_stamp.to_string(), key));
                    key
                }
            }
        };

        hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()))
    }

    fn derive_signing_key(&self, date_stamp: &str) -> [u8; 32] {
        let k_date = hmac_sha256(&self.aws4_key, date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

impl std::fmt::Debug for SigV4Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigV4Signer")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl RequestInterceptor for SigV4Signer {
    fn process(&self, request: &mut Request<Bytes>) -> Result<()> {
        self.sign(request)
    }

    fn name(&self) -> &str {
        "aws-sigv4"
    }
}

/// Signs every request with AWS Signature V4
#[derive(Debug, Clone)]
pub struct SigV4Authentication {
    signer: Arc<SigV4Signer>,
}

impl SigV4Authentication {
    pub fn new(signer: SigV4Signer) -> Self {
        Self {
            signer: Arc::new(signer),
        }
    }

    pub fn signer(&self) -> &SigV4Signer {
        &self.signer
    }
}

impl Authentication for SigV4Authentication {
    fn setup_connection(&self, pipeline: &mut RequestPipeline) {
        pipeline.add_interceptor(self.signer.clone());
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ClientError::InvalidRequest(format!("invalid header value: {}", e)))
}

/// Host header value: authority without the scheme's default port
fn host_header(uri: &Uri) -> Result<String> {
    let host = uri
        .host()
        .ok_or_else(|| ClientError::InvalidRequest(format!("cannot sign '{}': no host", uri)))?;
    let default_port = match uri.scheme_str() {
        Some("https") => Some(443),
        Some("http") => Some(80),
        _ => None,
    };
    Ok(match uri.port_u16() {
        Some(port) if Some(port) != default_port => format!("{}:{}", host, port),
        _ => host.to_string(),
    })
}

/// Sorted, RFC 3986 encoded query; parameters without `=` get an empty value
fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
            let value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
            (uri_encode(&key), uri_encode(&value))
        })
        .collect();
    params.sort_unstable();

    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 16);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push('%');
                result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    result
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn example_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    fn example_signer(service: &str) -> SigV4Signer {
        SigV4Signer::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            Some("us-east-1".to_string()),
            service,
        )
    }

    #[test]
    fn test_get_vanilla() {
        let signer = example_signer("service");
        let mut request = Request::get("https://example.amazonaws.com:443/")
            .body(Bytes::new())
            .unwrap();
        signer.sign_at(&mut request, example_time()).unwrap();

        assert_eq!(request.headers()[HOST], "example.amazonaws.com");
        assert_eq!(request.headers()["x-amz-date"], "20150830T123600Z");
        assert_eq!(
            request.headers()[AUTHORIZATION],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
        assert!(request.headers()[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn test_s3_signs_payload_hash() {
        let signer = example_signer("s3");
        let mut request = Request::put("http://localhost:9000/bucket/key")
            .header(CONTENT_TYPE, "text/plain")
            .body(Bytes::from_static(b"payload"))
            .unwrap();
        signer.sign_at(&mut request, example_time()).unwrap();

        assert_eq!(request.headers()[HOST], "localhost:9000");
        assert_eq!(
            request.headers()["x-amz-content-sha256"],
            hex::encode(Sha256::digest(b"payload")).as_str()
        );
        let authorization = request.headers()[AUTHORIZATION].to_str().unwrap();
        assert!(authorization
            .contains("SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date,"));
    }

    #[test]
    fn test_signature_depends_on_body() {
        let signer = example_signer("s3");
        let sign = |body: &'static [u8]| {
            let mut request = Request::put("http://localhost/bucket/key")
                .body(Bytes::from_static(body))
                .unwrap();
            signer.sign_at(&mut request, example_time()).unwrap();
            request.headers()[AUTHORIZATION].clone()
        };

        assert_eq!(sign(&b"a"[..]), sign(&b"a"[..]));
        assert_ne!(sign(&b"a"[..]), sign(&b"b"[..]));
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("hello world"), "hello%20world");
        assert_eq!(uri_encode("hello/world"), "hello%2Fworld");
        assert_eq!(uri_encode("test@example.com"), "test%40example.com");
    }

    #[test]
    fn test_canonical_query_string() {
        assert_eq!(canonical_query_string(""), "");
        assert_eq!(canonical_query_string("key=value"), "key=value");
        assert_eq!(canonical_query_string("zebra=1&alpha=2"), "alpha=2&zebra=1");
        assert_eq!(canonical_query_string("uploads"), "uploads=");
        assert_eq!(canonical_query_string("track=a%20b&a=x/y"), "a=x%2Fy&track=a%20b");
    }

    #[test]
    fn test_signing_key_cache() {
        let signer = example_signer("s3");

        let sig1 = signer.calculate_signature("20260101", "test");
        let sig2 = signer.calculate_signature("20260101", "test");
        assert_eq!(sig1, sig2);

        let sig3 = signer.calculate_signature("20260102", "test");
        assert_ne!(sig1, sig3);
    }

    #[test]
    fn test_empty_sha256_constant() {
        assert_eq!(EMPTY_SHA256, hex::encode(Sha256::digest(b"")));
    }

    #[test]
    fn test_authentication_installs_interceptor() {
        let auth = SigV4Authentication::new(example_signer("s3"));
        let mut pipeline = RequestPipeline::new();
        auth.setup_connection(&mut pipeline);

        assert_eq!(pipeline.interceptor_names(), vec!["aws-sigv4"]);

        let mut request = Request::get("http://localhost/").body(Bytes::new()).unwrap();
        pipeline.apply(&mut request).unwrap();
        assert!(request.headers().contains_key(AUTHORIZATION));
    }
}

//! Decompressing client decorator
//!
//! Advertises gzip and deflate support on every request and decodes the
//! response body before handing it back. Responses are fully buffered, so
//! decoding happens in one pass over the collected body.

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use hyper::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH};
use hyper::{Request, Response};
use std::io::Read;
use std::sync::Arc;
use tracing::trace;

use super::error::{ClientError, Result};
use super::{HttpClient, HttpContext, HttpHost, HttpParams};

const ACCEPTED_ENCODINGS: &str = "gzip, deflate";

pub struct DecompressingHttpClient<C> {
    inner: C,
}

impl<C: HttpClient> DecompressingHttpClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for DecompressingHttpClient<C> {
    type Manager = C::Manager;

    fn params(&self) -> Result<Arc<HttpParams>> {
        self.inner.params()
    }

    fn connection_manager(&self) -> Result<Arc<C::Manager>> {
        self.inner.connection_manager()
    }

    async fn send(
        &self,
        target: Option<&HttpHost>,
        mut request: Request<Bytes>,
        context: &mut HttpContext,
    ) -> Result<Response<Bytes>> {
        if !request.headers().contains_key(ACCEPT_ENCODING) {
            request
                .headers_mut()
                .insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPTED_ENCODINGS));
        }

        let response = self.inner.send(target, request, context).await?;
        decode(response)
    }
}

fn decode(response: Response<Bytes>) -> Result<Response<Bytes>> {
    let encoding = match response.headers().get(CONTENT_ENCODING) {
        Some(value) => value
            .to_str()
            .map_err(|_| ClientError::UnsupportedEncoding(format!("{:?}", value)))?
            .trim()
            .to_ascii_lowercase(),
        None => return Ok(response),
    };

    // HEAD and 204 responses carry the header without a body
    if response.body().is_empty() {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let decoded = match encoding.as_str() {
        // Concatenated gzip members decode to the concatenation of their payloads
        "gzip" | "x-gzip" => read_all(MultiGzDecoder::new(&body[..]))?,
        "deflate" => match read_all(ZlibDecoder::new(&body[..])) {
            Ok(decoded) => decoded,
            // Some servers send raw deflate without the zlib wrapper
            Err(_) => read_all(DeflateDecoder::new(&body[..]))?,
        },
        "identity" => body.to_vec(),
        other => return Err(ClientError::UnsupportedEncoding(other.to_string())),
    };

    trace!(
        encoding = %encoding,
        encoded_len = body.len(),
        decoded_len = decoded.len(),
        "Decoded response body"
    );

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(decoded.len()));
    Ok(Response::from_parts(parts, Bytes::from(decoded)))
}

fn read_all<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    reader
        .read_to_end(&mut decoded)
        .map_err(ClientError::Decompression)?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn encoded(encoding: &str, body: Bytes) -> Response<Bytes> {
        Response::builder()
            .header(CONTENT_ENCODING, encoding)
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .unwrap()
    }

    fn gzip(data: &[u8]) -> Bytes {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        Bytes::from(encoder.finish().unwrap())
    }

    #[test]
    fn test_decode_gzip() {
        let response = decode(encoded("gzip", gzip(b"hello stream"))).unwrap();

        assert_eq!(response.body(), "hello stream");
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(response.headers()[CONTENT_LENGTH], "12");
    }

    #[test]
    fn test_decode_multi_member_gzip() {
        let mut body = gzip(b"hello ").to_vec();
        body.extend_from_slice(&gzip(b"world"));

        let response = decode(encoded("gzip", Bytes::from(body))).unwrap();

        assert_eq!(response.body(), "hello world");
        assert_eq!(response.headers()[CONTENT_LENGTH], "11");
    }

    #[test]
    fn test_decode_deflate_zlib_and_raw() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"wrapped").unwrap();
        let response = decode(encoded("deflate", Bytes::from(zlib.finish().unwrap()))).unwrap();
        assert_eq!(response.body(), "wrapped");

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(b"raw").unwrap();
        let response = decode(encoded("Deflate", Bytes::from(raw.finish().unwrap()))).unwrap();
        assert_eq!(response.body(), "raw");
    }

    #[test]
    fn test_plain_response_passes_through() {
        let response = Response::new(Bytes::from_static(b"plain"));
        let decoded = decode(response).unwrap();
        assert_eq!(decoded.body(), "plain");
    }

    #[test]
    fn test_unknown_encoding_is_rejected() {
        let err = decode(encoded("br", Bytes::from_static(b"\x00\x01"))).unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedEncoding(e) if e == "br"));
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        let err = decode(encoded("gzip", Bytes::from_static(b"not gzip"))).unwrap_err();
        assert!(matches!(err, ClientError::Decompression(_)));
    }

    #[test]
    fn test_empty_body_is_left_alone() {
        let response = decode(encoded("gzip", Bytes::new())).unwrap();
        assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
    }
}

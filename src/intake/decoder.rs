//! Request body acquisition and request metadata.
//!
//! # Responsibilities
//! - Read the request body up to the configured limit
//! - Undo `Content-Encoding: gzip` / `deflate` (zlib)
//! - Derive request-level metadata (client IP, user agent)
//!
//! # Design Decisions
//! - Compression headers are checked up front so a mislabelled body fails
//!   as one request error rather than as a read error mid-stream
//! - The body is fully buffered before decoding, bounded by the size limit
//! - Decompressed output is bounded by the same limit; going past it is a
//!   read error wrapping `BodyError::TooLarge`

use std::io::{self, BufRead, BufReader, Read};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap},
};
use bytes::Buf;
use flate2::read::{GzDecoder, ZlibDecoder};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::{json, Map, Value};

use crate::http::result::BoxError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("request body too large")]
    TooLarge,

    #[error("failed to read request body: {0}")]
    Read(BoxError),

    #[error("invalid {0} header in compressed request body")]
    Compression(&'static str),
}

/// Collect the request body, failing with `TooLarge` past `limit` bytes.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(BodyError::TooLarge),
        Err(e) => Err(BodyError::Read(e)),
    }
}

fn is_zlib_header(bytes: &[u8]) -> bool {
    match bytes {
        [cmf, flg, ..] => {
            *cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}

/// Fails reads once more than `remaining` bytes came out of `inner`.
struct Capped<R> {
    inner: R,
    remaining: u64,
}

impl<R> Capped<R> {
    fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit as u64,
        }
    }
}

impl<R: Read> Read for Capped<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n as u64 > self.remaining {
            self.remaining = 0;
            return Err(io::Error::other(BodyError::TooLarge));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Line reader over the (possibly compressed) body. At most `max_decoded`
/// bytes are produced by decompression.
pub fn body_reader(
    bytes: Bytes,
    content_encoding: &str,
    max_decoded: usize,
) -> Result<Box<dyn BufRead + Send>, BodyError> {
    match content_encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" => {
            if !bytes.starts_with(&GZIP_MAGIC) {
                return Err(BodyError::Compression("gzip"));
            }
            let decoder = GzDecoder::new(bytes.reader());
            Ok(Box::new(BufReader::new(Capped::new(decoder, max_decoded))))
        }
        "deflate" => {
            if !is_zlib_header(&bytes) {
                return Err(BodyError::Compression("zlib"));
            }
            let decoder = ZlibDecoder::new(bytes.reader());
            Ok(Box::new(BufReader::new(Capped::new(decoder, max_decoded))))
        }
        _ => Ok(Box::new(bytes.reader())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid User-Agent header: {0}")]
    UserAgent(#[from] std::str::Utf8Error),
}

/// How request metadata is derived for an intake route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecoder {
    /// Backend agents: client IP reported as the host's address.
    System { augment: bool },
    /// Browsers: client IP and user agent reported for the end user.
    User { augment: bool },
}

impl RequestDecoder {
    /// Metadata for the request. `augment` adds personal data.
    pub fn decode(&self, headers: &HeaderMap, remote_addr: &str) -> Result<Map<String, Value>, DecodeError> {
        let mut metadata = Map::new();
        match *self {
            RequestDecoder::System { augment } => {
                if augment && !remote_addr.is_empty() {
                    metadata.insert("system".into(), json!({ "ip": remote_addr }));
                }
            }
            RequestDecoder::User { augment } => {
                if augment {
                    let mut user = Map::new();
                    if !remote_addr.is_empty() {
                        user.insert("ip".into(), Value::from(remote_addr));
                    }
                    if let Some(ua) = headers.get(header::USER_AGENT) {
                        let ua = std::str::from_utf8(ua.as_bytes())?;
                        user.insert("user-agent".into(), Value::from(ua));
                    }
                    if !user.is_empty() {
                        metadata.insert("user".into(), Value::Object(user));
                    }
                }
            }
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use flate2::{write::GzEncoder, write::ZlibEncoder, Compression};
    use std::io::{Read, Write};

    fn read_all(mut reader: Box<dyn BufRead + Send>) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn test_read_body_limit() {
        let bytes = read_body(Body::from("0123456789"), 10).await.unwrap();
        assert_eq!(bytes.len(), 10);
        assert!(matches!(
            read_body(Body::from("0123456789a"), 10).await,
            Err(BodyError::TooLarge)
        ));
    }

    #[test]
    fn test_gzip_and_deflate_bodies() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(b"{\"a\":1}\n").unwrap();
        let gz = gz.finish().unwrap();
        let reader = body_reader(Bytes::from(gz), "gzip", 1024).unwrap();
        assert_eq!(read_all(reader), "{\"a\":1}\n");

        let mut zl = ZlibEncoder::new(Vec::new(), Compression::default());
        zl.write_all(b"{\"b\":2}\n").unwrap();
        let zl = zl.finish().unwrap();
        let reader = body_reader(Bytes::from(zl), "Deflate", 1024).unwrap();
        assert_eq!(read_all(reader), "{\"b\":2}\n");

        let reader = body_reader(Bytes::from_static(b"plain"), "", 1024).unwrap();
        assert_eq!(read_all(reader), "plain");
    }

    #[test]
    fn test_mislabelled_compression_rejected() {
        assert!(matches!(
            body_reader(Bytes::from_static(b"{\"a\":1}"), "gzip", 1024),
            Err(BodyError::Compression("gzip"))
        ));
        assert!(matches!(
            body_reader(Bytes::from_static(b"{\"a\":1}"), "deflate", 1024),
            Err(BodyError::Compression("zlib"))
        ));
        assert!(matches!(
            body_reader(Bytes::new(), "deflate", 1024),
            Err(BodyError::Compression("zlib"))
        ));
    }

    #[test]
    fn test_decompressed_size_capped() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::best());
        gz.write_all(&[b'\n'; 4096]).unwrap();
        let gz = gz.finish().unwrap();
        assert!(gz.len() < 100);

        let mut reader = body_reader(Bytes::from(gz.clone()), "gzip", 4096).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 4096);

        let mut reader = body_reader(Bytes::from(gz), "gzip", 1000).unwrap();
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<BodyError>());
        assert!(matches!(inner, Some(BodyError::TooLarge)));
    }

    #[test]
    fn test_system_metadata() {
        let decoder = RequestDecoder::System { augment: true };
        let meta = decoder.decode(&HeaderMap::new(), "10.1.1.1").unwrap();
        assert_eq!(Value::Object(meta), json!({ "system": { "ip": "10.1.1.1" } }));

        let decoder = RequestDecoder::System { augment: false };
        assert!(decoder.decode(&HeaderMap::new(), "10.1.1.1").unwrap().is_empty());
    }

    #[test]
    fn test_user_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        let meta = RequestDecoder::User { augment: true }
            .decode(&headers, "1.2.3.4")
            .unwrap();
        assert_eq!(
            Value::Object(meta),
            json!({ "user": { "ip": "1.2.3.4", "user-agent": "Mozilla/5.0" } })
        );
    }

    #[test]
    fn test_invalid_user_agent_is_decode_error() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap());
        let err = RequestDecoder::User { augment: true }
            .decode(&headers, "1.2.3.4")
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid User-Agent header"));
    }
}

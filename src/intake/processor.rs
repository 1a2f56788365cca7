//! Newline-delimited JSON event processing.
//!
//! # Responsibilities
//! - Split the body into lines, bounded by the maximum event size
//! - Decode each line into an event (`{"<kind>": {...}}`)
//! - Merge an optional leading `{"metadata": {...}}` line with request metadata
//! - Publish events in batches, rate limiting per batch
//!
//! # Design Decisions
//! - A bad line is reported and skipped; the rest of the stream still counts
//! - Capacity failures (`QueueFull`, `ShuttingDown`) and rate limiting stop
//!   the stream; nothing after them is read
//! - Oversized lines are skipped up to their newline without buffering them
//! - Decoding is synchronous, so the loop yields to the runtime once per
//!   `batch_size` lines read; a dropped request future stops the stream there

use std::io::{self, BufRead, Read};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::IntakeConfig;
use crate::intake::decoder::BodyError;
use crate::intake::stream::{ErrorKind, StreamError, StreamProcessor, StreamResult};
use crate::publish::{Batch, Event, PublishError, Publisher};
use crate::security::RateLimiter;

const METADATA_KEY: &str = "metadata";

pub const MSG_EVENT_TOO_LARGE: &str = "event exceeded the permitted size";
pub const MSG_UNRECOGNIZED_OBJECT: &str = "did not recognize object type";
pub const MSG_METADATA_NOT_FIRST: &str = "metadata must be the first line of the stream";
pub const MSG_RATE_LIMIT: &str = "rate limit exceeded";

enum Line {
    Data(Vec<u8>),
    Blank,
    TooLarge,
}

/// Reads lines of at most `max` bytes (excluding the newline).
struct LineReader<R> {
    reader: R,
    max: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    fn new(reader: R, max: usize) -> Self {
        Self {
            reader,
            max,
            buf: Vec::new(),
        }
    }

    /// Next line, or `None` at end of input.
    fn next_line(&mut self) -> io::Result<Option<Line>> {
        self.buf.clear();
        let limit = self.max as u64 + 1;
        let n = (&mut self.reader).take(limit).read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }

        let terminated = self.buf.last() == Some(&b'\n');
        if terminated {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        } else if self.buf.len() > self.max {
            self.skip_line()?;
            return Ok(Some(Line::TooLarge));
        }

        if self.buf.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(Line::Blank));
        }
        Ok(Some(Line::Data(std::mem::take(&mut self.buf))))
    }

    fn at_eof(&mut self) -> io::Result<bool> {
        Ok(self.reader.fill_buf()?.is_empty())
    }

    fn skip_line(&mut self) -> io::Result<()> {
        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(i) => {
                    self.reader.consume(i + 1);
                    return Ok(());
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                }
            }
        }
    }
}

/// Merge `overlay` into `base`; nested objects merge, other values replace.
fn merge_json(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match value {
            Value::Object(incoming) => match base.get_mut(&key) {
                Some(Value::Object(existing)) => merge_json(existing, incoming),
                _ => {
                    base.insert(key, Value::Object(incoming));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

enum Decoded {
    Event(Event),
    Metadata(Map<String, Value>),
}

fn read_error(err: io::Error) -> StreamError {
    let too_large = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<BodyError>())
        .is_some_and(|inner| matches!(inner, BodyError::TooLarge));
    if too_large {
        StreamError::new(ErrorKind::InputTooLarge, err.to_string())
    } else {
        StreamError::new(ErrorKind::InvalidInput, format!("data read error: {}", err))
    }
}

fn decode_line(line: &[u8]) -> Result<Decoded, StreamError> {
    let document = || String::from_utf8_lossy(line).into_owned();
    let value: Value = serde_json::from_slice(line).map_err(|e| {
        StreamError::new(ErrorKind::InvalidInput, format!("data decoding error: {}", e))
            .with_document(document())
    })?;

    let Value::Object(object) = value else {
        return Err(StreamError::new(ErrorKind::InvalidInput, MSG_UNRECOGNIZED_OBJECT)
            .with_document(document()));
    };
    if object.len() != 1 {
        return Err(StreamError::new(ErrorKind::InvalidInput, MSG_UNRECOGNIZED_OBJECT)
            .with_document(document()));
    }
    let Some((kind, payload)) = object.into_iter().next() else {
        return Err(StreamError::new(ErrorKind::InvalidInput, MSG_UNRECOGNIZED_OBJECT));
    };

    if kind == METADATA_KEY {
        return match payload {
            Value::Object(meta) => Ok(Decoded::Metadata(meta)),
            _ => Err(StreamError::new(ErrorKind::InvalidInput, "invalid metadata object")
                .with_document(document())),
        };
    }
    Ok(Decoded::Event(Event { kind, payload }))
}

/// Default stream processor: NDJSON lines → batched `Publisher` calls.
pub struct NdjsonProcessor {
    max_event_size: usize,
    batch_size: usize,
    publisher: Arc<dyn Publisher>,
}

impl NdjsonProcessor {
    pub fn new(config: &IntakeConfig, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            max_event_size: config.max_event_size,
            batch_size: config.batch_size.max(1),
            publisher,
        }
    }
}

#[async_trait]
impl StreamProcessor for NdjsonProcessor {
    async fn handle_stream(
        &self,
        limiter: Option<Arc<RateLimiter>>,
        request_metadata: Map<String, Value>,
        request_time: SystemTime,
        reader: Box<dyn BufRead + Send>,
    ) -> StreamResult {
        let mut result = StreamResult::new();
        let mut lines = LineReader::new(reader, self.max_event_size);
        let mut metadata = Map::new();
        let mut request_metadata = Some(request_metadata);
        let mut first_line = true;
        let mut read_since_yield = 0;

        loop {
            match lines.at_eof() {
                Ok(false) => {}
                Ok(true) => break,
                Err(e) => {
                    result.add_error(read_error(e));
                    break;
                }
            }
            if let Some(limiter) = &limiter {
                if !limiter.allow_n(self.batch_size) {
                    result.add(ErrorKind::RateLimit, MSG_RATE_LIMIT);
                    break;
                }
            }

            let mut events = Vec::with_capacity(self.batch_size);
            let mut done = false;
            while events.len() < self.batch_size {
                if read_since_yield >= self.batch_size {
                    tokio::task::yield_now().await;
                    read_since_yield = 0;
                }
                read_since_yield += 1;

                let line = match lines.next_line() {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        done = true;
                        break;
                    }
                    Err(e) => {
                        result.add_error(read_error(e));
                        done = true;
                        break;
                    }
                };
                let bytes = match line {
                    Line::Data(bytes) => bytes,
                    Line::Blank => continue,
                    Line::TooLarge => {
                        first_line = false;
                        result.add(ErrorKind::InputTooLarge, MSG_EVENT_TOO_LARGE);
                        continue;
                    }
                };
                let is_first = std::mem::replace(&mut first_line, false);

                match decode_line(&bytes) {
                    Ok(Decoded::Event(event)) => events.push(event),
                    Ok(Decoded::Metadata(stream_metadata)) if is_first => {
                        metadata = stream_metadata;
                    }
                    Ok(Decoded::Metadata(_)) => result.add_error(
                        StreamError::new(ErrorKind::InvalidInput, MSG_METADATA_NOT_FIRST)
                            .with_document(String::from_utf8_lossy(&bytes).into_owned()),
                    ),
                    Err(err) => result.add_error(err),
                }
            }

            if let Some(request_metadata) = request_metadata.take() {
                merge_json(&mut metadata, request_metadata);
            }

            if !events.is_empty() {
                let count = events.len();
                let batch = Batch {
                    metadata: metadata.clone(),
                    events,
                    request_time,
                };
                match self.publisher.publish(batch).await {
                    Ok(()) => result.accepted += count,
                    Err(e @ PublishError::QueueFull) => {
                        result.add(ErrorKind::QueueFull, e.to_string());
                        break;
                    }
                    Err(e @ PublishError::ShuttingDown) => {
                        result.add(ErrorKind::ShuttingDown, e.to_string());
                        break;
                    }
                }
            }

            if done {
                break;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::result::ResultId;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Records batches; fails with `fail` once `accept` batches were taken.
    struct Recorder {
        batches: Mutex<Vec<Batch>>,
        accept: usize,
        fail: PublishError,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Self::failing_after(usize::MAX, PublishError::QueueFull)
        }

        fn failing_after(accept: usize, fail: PublishError) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                accept,
                fail,
            })
        }

        fn events(&self) -> usize {
            self.batches.lock().unwrap().iter().map(|b| b.events.len()).sum()
        }
    }

    #[async_trait]
    impl Publisher for Recorder {
        async fn publish(&self, batch: Batch) -> Result<(), PublishError> {
            let mut batches = self.batches.lock().unwrap();
            if batches.len() >= self.accept {
                return Err(self.fail);
            }
            batches.push(batch);
            Ok(())
        }
    }

    fn processor(publisher: Arc<Recorder>, batch_size: usize, max_event_size: usize) -> NdjsonProcessor {
        let config = IntakeConfig {
            max_event_size,
            batch_size,
            ..Default::default()
        };
        NdjsonProcessor::new(&config, publisher)
    }

    async fn run(p: &NdjsonProcessor, body: &str, limiter: Option<Arc<RateLimiter>>) -> StreamResult {
        p.handle_stream(
            limiter,
            Map::new(),
            SystemTime::now(),
            Box::new(Cursor::new(body.as_bytes().to_vec())),
        )
        .await
    }

    #[tokio::test]
    async fn test_valid_lines_accepted_in_batches() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 2, 1024);
        let body = "{\"transaction\":{}}\n{\"span\":{}}\n\n{\"span\":{}}\n{\"error\":{}}\n{\"span\":{}}";
        let result = run(&p, body, None).await;

        assert_eq!(result.accepted, 5);
        assert!(result.errors().is_empty());
        assert_eq!(result.result_id(), ResultId::Accepted);
        let batches = recorder.batches.lock().unwrap();
        assert_eq!(batches.iter().map(|b| b.events.len()).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(batches[0].events[0].kind, "transaction");
    }

    #[tokio::test]
    async fn test_malformed_line_reported_and_skipped() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 10, 1024);
        let result = run(&p, "{\"span\":{}}\n{not json\n{\"span\":{}}\n", None).await;

        assert_eq!(result.accepted, 2);
        assert_eq!(result.errors().len(), 1);
        let err = &result.errors()[0];
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(err.message.starts_with("data decoding error"));
        assert_eq!(err.document.as_deref(), Some("{not json"));
        assert_eq!(result.result_id(), ResultId::Validate);
    }

    #[tokio::test]
    async fn test_unrecognized_objects() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 10, 1024);
        let result = run(&p, "[1,2]\n{\"a\":{},\"b\":{}}\n", None).await;
        assert_eq!(result.accepted, 0);
        assert_eq!(result.errors().len(), 2);
        assert!(result.errors().iter().all(|e| e.message == MSG_UNRECOGNIZED_OBJECT));
    }

    #[tokio::test]
    async fn test_oversized_line_skipped() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 10, 16);
        let big = format!("{{\"span\":{{\"x\":\"{}\"}}}}", "a".repeat(64));
        let body = format!("{}\n{{\"span\":{{}}}}\n", big);
        let result = run(&p, &body, None).await;

        assert_eq!(result.accepted, 1);
        assert_eq!(result.errors()[0].kind, ErrorKind::InputTooLarge);
        assert_eq!(result.result_id().status().as_u16(), 413);
    }

    #[tokio::test]
    async fn test_metadata_line_merged() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 10, 1024);
        let mut request_meta = Map::new();
        request_meta.insert("system".into(), serde_json::json!({ "ip": "10.0.0.1" }));
        let body = "{\"metadata\":{\"service\":{\"name\":\"checkout\"},\"system\":{\"hostname\":\"h\"}}}\n{\"span\":{}}\n";

        let result = p
            .handle_stream(None, request_meta, SystemTime::now(), Box::new(Cursor::new(body.as_bytes().to_vec())))
            .await;
        assert_eq!(result.accepted, 1);

        let batches = recorder.batches.lock().unwrap();
        assert_eq!(
            Value::Object(batches[0].metadata.clone()),
            serde_json::json!({
                "service": { "name": "checkout" },
                "system": { "hostname": "h", "ip": "10.0.0.1" },
            })
        );
    }

    #[tokio::test]
    async fn test_late_metadata_rejected() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 10, 1024);
        let result = run(&p, "{\"span\":{}}\n{\"metadata\":{}}\n", None).await;
        assert_eq!(result.accepted, 1);
        assert_eq!(result.errors()[0].message, MSG_METADATA_NOT_FIRST);
    }

    #[tokio::test]
    async fn test_queue_full_stops_stream() {
        let recorder = Recorder::failing_after(1, PublishError::QueueFull);
        let p = processor(recorder.clone(), 1, 1024);
        let result = run(&p, "{\"span\":{}}\n{\"span\":{}}\n{\"span\":{}}\n", None).await;

        assert_eq!(result.accepted, 1);
        assert_eq!(recorder.events(), 1);
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.result_id(), ResultId::FullQueue);
    }

    #[tokio::test]
    async fn test_shutting_down_outranks_earlier_errors() {
        let recorder = Recorder::failing_after(0, PublishError::ShuttingDown);
        let p = processor(recorder.clone(), 10, 1024);
        let result = run(&p, "{bad\n{\"span\":{}}\n", None).await;
        assert_eq!(result.accepted, 0);
        assert_eq!(result.result_id(), ResultId::ShuttingDown);
        assert_eq!(result.errors()[1].message, "server is shutting down");
    }

    #[tokio::test]
    async fn test_rate_limit_per_batch() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 2, 1024);
        let limiter = Arc::new(RateLimiter::new(0.001, 2));
        let result = run(&p, "{\"span\":{}}\n{\"span\":{}}\n{\"span\":{}}\n", Some(limiter)).await;

        assert_eq!(result.accepted, 2);
        assert_eq!(result.result_id(), ResultId::RateLimit);
        assert_eq!(result.errors()[0].message, MSG_RATE_LIMIT);
    }

    #[tokio::test]
    async fn test_exact_batch_multiple_not_rate_limited() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 10, 1024);
        let limiter = Arc::new(RateLimiter::new(0.001, 15));
        let body = "{\"span\":{}}\n".repeat(10);
        let result = run(&p, &body, Some(limiter)).await;

        assert_eq!(result.accepted, 10);
        assert!(result.errors().is_empty());
        assert_eq!(result.result_id(), ResultId::Accepted);
    }

    #[tokio::test]
    async fn test_invalid_lines_yield_between_batches() {
        use futures_util::FutureExt;

        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 2, 1024);
        let body = "{bad\n".repeat(100);
        let pending = p
            .handle_stream(None, Map::new(), SystemTime::now(), Box::new(Cursor::new(body.into_bytes())))
            .now_or_never();
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn test_endless_blank_lines_can_time_out() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 10, 1024);
        let reader = Box::new(std::io::BufReader::new(std::io::repeat(b'\n')));
        let stream = p.handle_stream(None, Map::new(), SystemTime::now(), reader);

        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), stream).await;
        assert!(outcome.is_err());
        assert_eq!(recorder.events(), 0);
    }

    #[tokio::test]
    async fn test_decompressed_overflow_is_too_large() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 10, 1024);
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all("{\"span\":{}}\n".repeat(1000).as_bytes()).unwrap();
        let gz = gz.finish().unwrap();
        let reader = crate::intake::decoder::body_reader(gz.into(), "gzip", 120).unwrap();
        let result = p.handle_stream(None, Map::new(), SystemTime::now(), reader).await;

        assert!(result.accepted < 1000);
        let last = result.errors().last().unwrap();
        assert_eq!(last.kind, ErrorKind::InputTooLarge);
        assert_eq!(last.message, "request body too large");
        assert_eq!(result.result_id().status().as_u16(), 413);
    }

    #[tokio::test]
    async fn test_corrupt_compressed_body_is_read_error() {
        let recorder = Recorder::new();
        let p = processor(recorder.clone(), 10, 1024);
        // valid gzip header followed by a deflate block of reserved type 0b11
        let bytes = vec![0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff, 0x07, 0x00];
        let reader = Box::new(std::io::BufReader::new(flate2::read::GzDecoder::new(Cursor::new(bytes))));
        let result = p.handle_stream(None, Map::new(), SystemTime::now(), reader).await;

        assert_eq!(result.accepted, 0);
        assert!(result.errors()[0].message.starts_with("data read error"));
    }
}

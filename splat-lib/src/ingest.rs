//! Incremental assembly of a raw splat byte stream.
//!
//! Bytes are accumulated into a buffer preallocated to the declared length.
//! Each time the number of complete rows grows, the newly completed row bytes
//! are published together with the cumulative row count, so a consumer can
//! render partial results while the transfer continues.

use crate::error::SplatError;
use crate::row::{rows_in, ROW_LENGTH};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation for a load. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestUpdate {
    /// Row bytes completed since the previous update.
    pub rows: Vec<u8>,
    /// Total complete rows received so far.
    pub vertex_count: usize,
    /// Set on the first update of a load. Its rows start a new buffer
    /// instead of extending the previous one.
    pub first: bool,
    /// Set on the update published when the stream ends.
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResult {
    /// Every byte received, including any trailing partial row.
    pub buffer: Vec<u8>,
    pub vertex_count: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct StreamIngest {
    buffer: Vec<u8>,
    content_length: usize,
    published_rows: usize,
    started: bool,
}

impl StreamIngest {
    /// Preallocates `content_length` bytes. An allocation that cannot be
    /// satisfied is a transfer error.
    pub fn new(content_length: usize) -> Result<Self, SplatError> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(content_length).map_err(|e| {
            SplatError::Transfer(format!(
                "Cannot allocate {} bytes for the download: {}",
                content_length, e
            ))
        })?;
        Ok(Self {
            buffer,
            content_length,
            published_rows: 0,
            started: false,
        })
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn bytes_written(&self) -> usize {
        self.buffer.len()
    }

    pub fn rows_complete(&self) -> usize {
        rows_in(self.buffer.len())
    }

    /// Appends a chunk. Returns an update when it completed at least one row.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<IngestUpdate>, SplatError> {
        if self.buffer.len() + chunk.len() > self.content_length {
            return Err(SplatError::Transfer(format!(
                "Received more than the declared {} bytes",
                self.content_length
            )));
        }
        self.buffer.extend_from_slice(chunk);

        let rows = self.rows_complete();
        if rows > self.published_rows {
            Ok(Some(self.take_update(rows, false)))
        } else {
            Ok(None)
        }
    }

    /// Final update for the end of the stream. Its count may equal the last
    /// published one; trailing partial bytes are never counted.
    pub fn finish(&mut self) -> IngestUpdate {
        let rows = self.rows_complete();
        self.take_update(rows, true)
    }

    fn take_update(&mut self, rows: usize, done: bool) -> IngestUpdate {
        let bytes = self.buffer[self.published_rows * ROW_LENGTH..rows * ROW_LENGTH].to_vec();
        self.published_rows = rows;
        let first = !self.started;
        self.started = true;
        IngestUpdate {
            rows: bytes,
            vertex_count: rows,
            first,
            done,
        }
    }

    /// Forgets an update that was taken but never delivered, so the result
    /// only counts rows a consumer has seen.
    fn withdraw(&mut self, update: &IngestUpdate) {
        self.published_rows = update.vertex_count - rows_in(update.rows.len());
        if update.first {
            self.started = false;
        }
    }

    pub fn into_result(self, cancelled: bool) -> IngestResult {
        IngestResult {
            vertex_count: self.published_rows,
            buffer: self.buffer,
            cancelled,
        }
    }
}

/// Publishes `update` unless the load was cancelled meanwhile. Returns false
/// when cancelled.
fn deliver<F>(
    ingest: &mut StreamIngest,
    update: IngestUpdate,
    cancel: &CancelFlag,
    publish: &mut F,
) -> Result<bool, SplatError>
where
    F: FnMut(IngestUpdate) -> Result<(), SplatError>,
{
    if cancel.is_cancelled() {
        log::warn!("Load cancelled after {} bytes", ingest.bytes_written());
        ingest.withdraw(&update);
        return Ok(false);
    }
    publish(update)?;
    Ok(true)
}

/// Drives a [`StreamIngest`] from an iterator of chunks.
///
/// `cancel` is checked before each chunk is applied; once set, nothing more
/// is published, including the final update.
pub fn ingest_chunks<I, B, F>(
    chunks: I,
    content_length: usize,
    cancel: &CancelFlag,
    mut publish: F,
) -> Result<IngestResult, SplatError>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
    F: FnMut(IngestUpdate) -> Result<(), SplatError>,
{
    let mut ingest = StreamIngest::new(content_length)?;
    for chunk in chunks {
        if cancel.is_cancelled() {
            log::warn!("Load cancelled after {} bytes", ingest.bytes_written());
            return Ok(ingest.into_result(true));
        }
        if let Some(update) = ingest.push(chunk.as_ref())? {
            if !deliver(&mut ingest, update, cancel, &mut publish)? {
                return Ok(ingest.into_result(true));
            }
        }
    }
    let update = ingest.finish();
    let delivered = deliver(&mut ingest, update, cancel, &mut publish)?;
    Ok(ingest.into_result(!delivered))
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use futures::{Stream, StreamExt};

    /// Async counterpart of [`ingest_chunks`] over a fallible chunk stream.
    /// A stream error is a fatal transfer error.
    pub async fn ingest_stream<S, B, E, F>(
        stream: S,
        content_length: usize,
        cancel: &CancelFlag,
        mut publish: F,
    ) -> Result<IngestResult, SplatError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
        F: FnMut(IngestUpdate) -> Result<(), SplatError>,
    {
        let mut stream = std::pin::pin!(stream);
        let mut ingest = StreamIngest::new(content_length)?;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                log::warn!("Load cancelled after {} bytes", ingest.bytes_written());
                return Ok(ingest.into_result(true));
            }
            let chunk = chunk.map_err(|e| SplatError::Transfer(e.to_string()))?;
            if let Some(update) = ingest.push(chunk.as_ref())? {
                if !deliver(&mut ingest, update, cancel, &mut publish)? {
                    return Ok(ingest.into_result(true));
                }
            }
        }
        let update = ingest.finish();
        let delivered = deliver(&mut ingest, update, cancel, &mut publish)?;
        Ok(ingest.into_result(!delivered))
    }

    /// Streams raw splat rows from `url` with a default client.
    pub async fn fetch_splats<F>(
        url: &str,
        cancel: &CancelFlag,
        publish: F,
    ) -> Result<IngestResult, SplatError>
    where
        F: FnMut(IngestUpdate) -> Result<(), SplatError>,
    {
        fetch_splats_with(&reqwest::Client::new(), url, cancel, publish).await
    }

    /// Streams raw splat rows from `url`. The response must be `200 OK` and
    /// carry a `Content-Length`; both are checked before any body is read.
    pub async fn fetch_splats_with<F>(
        client: &reqwest::Client,
        url: &str,
        cancel: &CancelFlag,
        publish: F,
    ) -> Result<IngestResult, SplatError>
    where
        F: FnMut(IngestUpdate) -> Result<(), SplatError>,
    {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| SplatError::Transfer(format!("Unable to load {}: {}", url, e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(SplatError::Transfer(format!(
                "{} Unable to load {}",
                response.status().as_u16(),
                url
            )));
        }
        let content_length = response.content_length().ok_or_else(|| {
            SplatError::Transfer(format!("Missing Content-Length for {}", url))
        })?;
        let content_length = usize::try_from(content_length).map_err(|_| {
            SplatError::Transfer(format!(
                "Content-Length {} of {} does not fit in memory",
                content_length, url
            ))
        })?;

        log::info!("Loading {} ({} bytes, {} rows)", url, content_length, rows_in(content_length));
        let result = ingest_stream(response.bytes_stream(), content_length, cancel, publish).await?;
        log::info!("Loaded {} rows from {}", result.vertex_count, url);
        Ok(result)
    }
}
}

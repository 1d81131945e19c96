//! Document ingestion: registry entries → plain text → chunks.
//!
//! [`Ingestor::ingest`] returns a lazy, single-pass stream. Sources are
//! processed strictly in registry order, one at a time, only as the
//! consumer polls. A source that fails yields one [`IngestionError`] item
//! and the stream moves on to the next source.
//!
//! URL fetches go through the shared retry policy; local file reads are
//! never retried. Response bodies are read incrementally and abandoned as
//! soon as they pass the size limit, with or without a `Content-Length`.

use futures::stream::{self, Stream, StreamExt};
use papertrail_core::chunk::{chunk_source, ChunkingParams};
use papertrail_core::error::CapabilityError;
use papertrail_core::models::{Chunk, RegistryEntry, SourceKind};
use reqwest::header::CONTENT_TYPE;

use crate::config::Config;
use crate::error::{IngestCause, IngestionError};
use crate::extract::{extract_text, ContentKind};
use crate::http::{build_client, check_status, classify_error};
use crate::retry::{with_retry, RetryPolicy};

pub struct Ingestor {
    params: ChunkingParams,
    client: reqwest::Client,
    retry: RetryPolicy,
    max_source_bytes: u64,
}

/// Everything one ingestion pass produced.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub chunks: Vec<Chunk>,
    pub failures: Vec<IngestionError>,
}

impl IngestReport {
    /// Drain an ingestion stream.
    pub async fn collect<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Chunk, IngestionError>>,
    {
        let mut report = IngestReport::default();
        let mut stream = std::pin::pin!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => report.chunks.push(chunk),
                Err(err) => report.failures.push(err),
            }
        }
        report
    }
}

enum Fetched {
    Body {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    TooLarge(u64),
}

impl Ingestor {
    pub fn new(
        params: ChunkingParams,
        client: reqwest::Client,
        retry: RetryPolicy,
        max_source_bytes: u64,
    ) -> Self {
        Self {
            params,
            client,
            retry,
            max_source_bytes,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let params =
            ChunkingParams::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        Ok(Self::new(
            params,
            build_client(config.ingest.timeout_secs)?,
            RetryPolicy::from_config(&config.retry),
            config.ingest.max_source_bytes,
        ))
    }

    pub fn params(&self) -> &ChunkingParams {
        &self.params
    }

    /// Lazily ingest `entries` in order.
    pub fn ingest<'a>(
        &'a self,
        entries: &'a [RegistryEntry],
    ) -> impl Stream<Item = Result<Chunk, IngestionError>> + Send + 'a {
        stream::iter(entries.iter().enumerate())
            .then(move |(ordinal, entry)| self.ingest_one(ordinal, entry))
            .flat_map(stream::iter)
    }

    /// Ingest everything and collect chunks and failures.
    pub async fn ingest_all(&self, entries: &[RegistryEntry]) -> IngestReport {
        IngestReport::collect(self.ingest(entries)).await
    }

    async fn ingest_one(
        &self,
        ordinal: usize,
        entry: &RegistryEntry,
    ) -> Vec<Result<Chunk, IngestionError>> {
        match self.load_text(entry).await {
            Ok(text) => {
                let chunks = chunk_source(ordinal, entry, &text, &self.params);
                tracing::info!(
                    source_id = %entry.id,
                    kind = %entry.source_kind,
                    chars = text.chars().count(),
                    chunks = chunks.len(),
                    "ingested source"
                );
                chunks.into_iter().map(Ok).collect()
            }
            Err(cause) => {
                let err = IngestionError::new(&entry.id, cause);
                tracing::warn!(source_id = %entry.id, error = %err.cause, "skipping source");
                vec![Err(err)]
            }
        }
    }

    async fn load_text(&self, entry: &RegistryEntry) -> Result<String, IngestCause> {
        let (bytes, kind) = match entry.source_kind {
            SourceKind::LocalFile => self.read_local(&entry.source_location).await?,
            SourceKind::Url => self.fetch_url(&entry.source_location).await?,
        };

        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, kind))
            .await
            .map_err(|e| IngestCause::Extract(format!("extraction task failed: {}", e)))?
            .map_err(|e| IngestCause::Extract(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(IngestCause::EmptyText);
        }
        Ok(text)
    }

    async fn read_local(&self, location: &str) -> Result<(Vec<u8>, ContentKind), IngestCause> {
        let meta = tokio::fs::metadata(location).await?;
        if meta.len() > self.max_source_bytes {
            return Err(IngestCause::TooLarge {
                bytes: meta.len(),
                limit: self.max_source_bytes,
            });
        }
        let bytes = tokio::fs::read(location).await?;
        Ok((bytes, ContentKind::detect(location, None)))
    }

    async fn fetch_url(&self, url: &str) -> Result<(Vec<u8>, ContentKind), IngestCause> {
        let limit = self.max_source_bytes;
        let client = &self.client;
        let fetched = with_retry(&self.retry, "fetch", || async move {
            let response = client.get(url).send().await.map_err(classify_error)?;
            let response = check_status(response).await?;
            if let Some(len) = response.content_length() {
                if len > limit {
                    return Ok::<_, CapabilityError>(Fetched::TooLarge(len));
                }
            }
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let mut response = response;
            let mut bytes = Vec::new();
            while let Some(chunk) = response.chunk().await.map_err(classify_error)? {
                let seen = (bytes.len() + chunk.len()) as u64;
                if seen > limit {
                    return Ok(Fetched::TooLarge(seen));
                }
                bytes.extend_from_slice(&chunk);
            }
            Ok(Fetched::Body {
                bytes,
                content_type,
            })
        })
        .await?;

        match fetched {
            Fetched::TooLarge(bytes) => Err(IngestCause::TooLarge { bytes, limit }),
            Fetched::Body {
                bytes,
                content_type,
            } => {
                let kind = ContentKind::detect(url, content_type.as_deref());
                Ok((bytes, kind))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn entry(id: &str, path: &Path) -> RegistryEntry {
        RegistryEntry {
            id: id.into(),
            title: id.to_uppercase(),
            source_kind: SourceKind::LocalFile,
            source_location: path.to_string_lossy().into_owned(),
            tags: vec![],
            authors: vec![],
            year: None,
            venue: None,
            doi: None,
        }
    }

    fn ingestor(size: usize, overlap: usize, max_bytes: u64) -> Ingestor {
        Ingestor::new(
            ChunkingParams::new(size, overlap).unwrap(),
            reqwest::Client::new(),
            RetryPolicy::none(),
            max_bytes,
        )
    }

    #[tokio::test]
    async fn test_local_text_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "abcdefghijklmnopqrstuvwxyz").unwrap();
        std::fs::write(&b, "short").unwrap();

        let entries = vec![entry("a", &a), entry("b", &b)];
        let report = ingestor(10, 2, 1024).ingest_all(&entries).await;

        assert!(report.failures.is_empty());
        let a_chunks: Vec<&Chunk> = report.chunks.iter().filter(|c| c.source_id == "a").collect();
        assert_eq!(a_chunks.len(), 3);
        assert_eq!(report.chunks.last().unwrap().source_id, "b");
        assert_eq!(report.chunks.last().unwrap().provenance.ordinal, 1);
        assert_eq!(report.chunks.last().unwrap().provenance.title, "B");
    }

    #[tokio::test]
    async fn test_failing_source_does_not_abort_others() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, "evidence").unwrap();
        let entries = vec![entry("missing", &dir.path().join("nope.txt")), entry("good", &good)];

        let report = ingestor(100, 10, 1024).ingest_all(&entries).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_id, "missing");
        assert!(matches!(report.failures[0].cause, IngestCause::Read(_)));
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.chunks[0].source_id, "good");
    }

    #[tokio::test]
    async fn test_blank_text_is_empty_error() {
        let dir = tempfile::tempdir().unwrap();
        let blank = dir.path().join("blank.txt");
        std::fs::write(&blank, "   \n\t ").unwrap();
        let report = ingestor(100, 10, 1024).ingest_all(&[entry("blank", &blank)]).await;
        assert!(report.chunks.is_empty());
        assert!(matches!(report.failures[0].cause, IngestCause::EmptyText));
    }

    #[tokio::test]
    async fn test_oversized_source_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big.txt");
        std::fs::write(&big, "x".repeat(64)).unwrap();
        let report = ingestor(100, 10, 16).ingest_all(&[entry("big", &big)]).await;
        assert!(matches!(
            report.failures[0].cause,
            IngestCause::TooLarge { bytes: 64, limit: 16 }
        ));
    }

    /// Serves one chunked response of `chunks` x 1 KiB with no Content-Length.
    async fn serve_chunked(chunks: usize) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let head = "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n";
                    if socket.write_all(head.as_bytes()).await.is_err() {
                        return;
                    }
                    let chunk = format!("400\r\n{}\r\n", "y".repeat(1024));
                    for _ in 0..chunks {
                        if socket.write_all(chunk.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    let _ = socket.write_all(b"0\r\n\r\n").await;
                });
            }
        });
        format!("http://{}/paper.txt", addr)
    }

    #[tokio::test]
    async fn test_unsized_url_body_stops_at_limit() {
        let url = serve_chunked(4096).await;
        let mut e = entry("stream", Path::new("unused"));
        e.source_kind = SourceKind::Url;
        e.source_location = url;

        let report = ingestor(100, 10, 1024).ingest_all(&[e]).await;
        assert_eq!(report.failures.len(), 1);
        match report.failures[0].cause {
            IngestCause::TooLarge { bytes, limit } => {
                assert_eq!(limit, 1024);
                assert!(bytes > 1024);
                assert!(bytes < 4 * 1024 * 1024);
            }
            ref other => panic!("expected TooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsized_url_body_under_limit_is_read() {
        let url = serve_chunked(2).await;
        let mut e = entry("small", Path::new("unused"));
        e.source_kind = SourceKind::Url;
        e.source_location = url;

        let report = ingestor(4096, 10, 4096).ingest_all(&[e]).await;
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.chunks[0].text.len(), 2048);
    }

    #[tokio::test]
    async fn test_undecodable_pdf_is_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("broken.pdf");
        std::fs::write(&pdf, b"definitely not a pdf").unwrap();
        let report = ingestor(100, 10, 1024).ingest_all(&[entry("broken", &pdf)]).await;
        assert!(matches!(report.failures[0].cause, IngestCause::Extract(_)));
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        std::fs::write(&a, "first source text").unwrap();
        let late = dir.path().join("late.txt");
        let entries = vec![entry("a", &a), entry("late", &late)];

        let ing = ingestor(100, 10, 1024);
        let mut stream = std::pin::pin!(ing.ingest(&entries));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.source_id, "a");

        // Second source is only read once polled.
        std::fs::write(&late, "written after the stream started").unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.source_id, "late");
        assert!(stream.next().await.is_none());
    }
}

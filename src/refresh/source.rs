//! Remote dump source
//!
//! Two network calls drive a refresh: resolving the manifest to the URL of
//! the latest dump, and a (possibly ranged) GET of that dump. Both sit
//! behind [`DumpSource`] so the pipeline can run against an in-memory
//! source in tests.

use crate::refresh::error::{RefreshError, RefreshResult};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;

/// Streaming body of a dump response
#[async_trait]
pub trait DumpBody: Send {
    /// Next chunk of bytes, `None` at end of body
    async fn next_chunk(&mut self) -> RefreshResult<Option<Vec<u8>>>;
}

/// How the server answered a request starting at some byte offset
pub enum RangeOutcome {
    /// 200: the whole dump, any partial file must be replaced
    Full(Box<dyn DumpBody>),
    /// 206: the remainder starting at the requested offset
    Partial(Box<dyn DumpBody>),
    /// 416: the requested offset is already at the end
    AlreadyComplete,
}

impl std::fmt::Debug for RangeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeOutcome::Full(_) => f.write_str("Full"),
            RangeOutcome::Partial(_) => f.write_str("Partial"),
            RangeOutcome::AlreadyComplete => f.write_str("AlreadyComplete"),
        }
    }
}

/// Where refreshes get their data from
#[async_trait]
pub trait DumpSource: Send + Sync {
    /// URL of the most recent dump
    async fn latest_dump_url(&self) -> RefreshResult<String>;

    /// Open `url` starting at byte `offset` (0 = from the beginning)
    async fn open_dump(&self, url: &str, offset: u64) -> RefreshResult<RangeOutcome>;
}

/// [`DumpSource`] over HTTP
pub struct HttpDumpSource {
    client: Client,
    manifest_url: String,
    read_timeout: Duration,
}

impl HttpDumpSource {
    pub fn new(
        manifest_url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> RefreshResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("hashwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            manifest_url: manifest_url.into(),
            read_timeout,
        })
    }

    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }
}

#[async_trait]
impl DumpSource for HttpDumpSource {
    async fn latest_dump_url(&self) -> RefreshResult<String> {
        let response =
            tokio::time::timeout(self.read_timeout, self.client.get(&self.manifest_url).send())
                .await??;

        if !response.status().is_success() {
            return Err(RefreshError::Status {
                status: response.status().as_u16(),
            });
        }

        let body = tokio::time::timeout(self.read_timeout, response.text()).await??;
        let url = body.trim();
        if url.is_empty() {
            return Err(RefreshError::NoManifestUrl);
        }

        Ok(url.to_string())
    }

    async fn open_dump(&self, url: &str, offset: u64) -> RefreshResult<RangeOutcome> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = tokio::time::timeout(self.read_timeout, request.send()).await??;
        let status = response.status();
        let body = Box::new(HttpBody {
            response,
            read_timeout: self.read_timeout,
        });

        match status {
            StatusCode::OK => Ok(RangeOutcome::Full(body)),
            StatusCode::PARTIAL_CONTENT => Ok(RangeOutcome::Partial(body)),
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(RangeOutcome::AlreadyComplete),
            other => Err(RefreshError::Status {
                status: other.as_u16(),
            }),
        }
    }
}

struct HttpBody {
    response: reqwest::Response,
    read_timeout: Duration,
}

#[async_trait]
impl DumpBody for HttpBody {
    async fn next_chunk(&mut self) -> RefreshResult<Option<Vec<u8>>> {
        let chunk = tokio::time::timeout(self.read_timeout, self.response.chunk()).await??;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

//! TDF3 archives read over HTTP byte ranges
//!
//! Only the bytes the zip directory walk touches are fetched: a suffix
//! window holding the central directory and manifest, then whatever else the
//! walk asks for. [`RangeArchive`] serves the fetched spans through `Read +
//! Seek`, so the ordinary [`Tdf3Reader`] runs over it unchanged. Reads that
//! land outside the fetched spans fail and record the offset; the caller
//! fetches that range and walks again.

use crate::error::TdfError;
use crate::kas::KasClient;
use crate::tdf3::reader::{PayloadLocation, Tdf3Reader};
use opentdf_protocol::TdfManifest;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::io::{self, Read, Seek, SeekFrom};
use tracing::debug;

/// Bytes requested from the end of the archive on the first fetch
pub const DEFAULT_TAIL_WINDOW: u64 = 64 * 1024;

const MAX_DIRECTORY_FETCHES: u32 = 8;

#[derive(Debug)]
struct Span {
    start: u64,
    bytes: Vec<u8>,
}

impl Span {
    fn end(&self) -> u64 {
        self.start + self.bytes.len() as u64
    }

    fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end()
    }
}

/// Sparse, range-fetched view of a remote archive
#[derive(Debug)]
pub struct RangeArchive {
    http: Client,
    url: String,
    len: u64,
    spans: Vec<Span>,
    pos: u64,
    missing: Option<u64>,
}

impl RangeArchive {
    /// Fetch enough of `url` to read its zip directory and manifest
    pub async fn fetch_directory(
        http: Client,
        url: impl Into<String>,
        tail_window: u64,
    ) -> Result<(Self, TdfManifest, PayloadLocation), TdfError> {
        let url = url.into();
        if tail_window == 0 {
            return Err(TdfError::Config("tail window must be positive".to_string()));
        }
        let tail = fetch_range(&http, &url, RangeRequest::Suffix(tail_window)).await?;
        let mut archive = Self {
            http,
            url,
            len: tail.total,
            spans: Vec::new(),
            pos: 0,
            missing: None,
        };
        archive.insert(tail.start, tail.bytes);

        let mut window = tail_window;
        for _ in 0..MAX_DIRECTORY_FETCHES {
            archive.pos = 0;
            archive.missing = None;
            let outcome = Tdf3Reader::read_manifest(&mut archive)
                .map(|(manifest, location, _)| (manifest, location));
            match (outcome, archive.missing.take()) {
                (Ok((manifest, location)), _) => return Ok((archive, manifest, location)),
                (Err(_), Some(offset)) => {
                    let end = archive.gap_end(offset).min(offset + window);
                    archive.fetch(offset, end - offset).await?;
                    window = window.saturating_mul(2);
                }
                (Err(err), None) => return Err(err),
            }
        }
        Err(TdfError::extraction(format!(
            "zip directory of {} not resolved after {MAX_DIRECTORY_FETCHES} range fetches",
            archive.url
        )))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Total archive length reported by the server
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes held locally
    pub fn fetched_bytes(&self) -> u64 {
        self.spans.iter().map(|span| span.bytes.len() as u64).sum()
    }

    /// Fetch `len` bytes at `offset` unless they are already held
    pub async fn fetch(&mut self, offset: u64, len: u64) -> Result<(), TdfError> {
        if len == 0 || self.covers(offset, len) {
            return Ok(());
        }
        let last = offset + len - 1;
        if last >= self.len {
            return Err(TdfError::extraction(format!(
                "range {offset}-{last} beyond archive length {}",
                self.len
            )));
        }
        let chunk = fetch_range(&self.http, &self.url, RangeRequest::Bounded(offset, last)).await?;
        self.insert(chunk.start, chunk.bytes);
        Ok(())
    }

    fn covers(&self, offset: u64, len: u64) -> bool {
        self.spans
            .iter()
            .any(|span| span.start <= offset && offset + len <= span.end())
    }

    /// First fetched byte after `offset`, or the archive end
    fn gap_end(&self, offset: u64) -> u64 {
        self.spans
            .iter()
            .map(|span| span.start)
            .filter(|&start| start > offset)
            .min()
            .unwrap_or(self.len)
    }

    fn insert(&mut self, start: u64, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.spans.push(Span { start, bytes });
        self.spans.sort_by_key(|span| span.start);
    }
}

impl Read for RangeArchive {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }
        let pos = self.pos;
        let Some(span) = self.spans.iter().rev().find(|span| span.contains(pos)) else {
            self.missing = Some(self.missing.map_or(pos, |earlier| earlier.min(pos)));
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("archive bytes at {pos} not fetched"),
            ));
        };
        let at = (pos - span.start) as usize;
        let n = buf.len().min(span.bytes.len() - at);
        buf[..n].copy_from_slice(&span.bytes[at..at + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for RangeArchive {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let next = match target {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let next = next.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of archive")
        })?;
        self.pos = next;
        Ok(next)
    }
}

impl Tdf3Reader<RangeArchive> {
    /// Read the manifest of a remote archive with `Range` requests
    pub async fn manifest_from_url(
        http: &Client,
        url: &str,
    ) -> Result<(TdfManifest, PayloadLocation), TdfError> {
        let (archive, manifest, location) =
            RangeArchive::fetch_directory(http.clone(), url, DEFAULT_TAIL_WINDOW).await?;
        debug!(
            url,
            archive_len = archive.len(),
            fetched = archive.fetched_bytes(),
            "remote manifest read"
        );
        Ok((manifest, location))
    }

    /// Open a remote archive; the payload is fetched once the root
    /// signature has been verified
    pub async fn open_url(http: &Client, url: &str, kas: &KasClient) -> Result<Self, TdfError> {
        let (archive, _, _) =
            RangeArchive::fetch_directory(http.clone(), url, DEFAULT_TAIL_WINDOW).await?;
        let mut reader = Self::open(archive, kas).await?;
        let payload = reader.payload_location();
        reader.source.fetch(payload.offset, payload.len).await?;
        Ok(reader)
    }
}

enum RangeRequest {
    /// Last `n` bytes
    Suffix(u64),
    /// Inclusive bounds
    Bounded(u64, u64),
}

impl RangeRequest {
    fn header(&self) -> String {
        match self {
            RangeRequest::Suffix(n) => format!("bytes=-{n}"),
            RangeRequest::Bounded(first, last) => format!("bytes={first}-{last}"),
        }
    }
}

struct RangeChunk {
    start: u64,
    total: u64,
    bytes: Vec<u8>,
}

async fn fetch_range(
    http: &Client,
    url: &str,
    request: RangeRequest,
) -> Result<RangeChunk, TdfError> {
    let range = request.header();
    let response = http
        .get(url)
        .header(RANGE, &range)
        .send()
        .await
        .map_err(|e| TdfError::extraction_from(format!("range request to {url} failed"), e))?;

    let status = response.status();
    let content_range = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if !status.is_success() {
        return Err(TdfError::extraction(format!(
            "range request {range} to {url} returned HTTP {}",
            status.as_u16()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| TdfError::extraction_from(format!("range body from {url} failed"), e))?
        .to_vec();

    let chunk = if status == StatusCode::PARTIAL_CONTENT {
        let header = content_range.ok_or_else(|| {
            TdfError::extraction(format!("{url} answered {range} without Content-Range"))
        })?;
        let (start, last, total) = parse_content_range(&header)?;
        if last - start + 1 != bytes.len() as u64 {
            return Err(TdfError::extraction(format!(
                "Content-Range {header} does not match a {} byte body",
                bytes.len()
            )));
        }
        RangeChunk { start, total, bytes }
    } else {
        // the server ignored the range and sent the whole archive
        RangeChunk {
            start: 0,
            total: bytes.len() as u64,
            bytes,
        }
    };
    debug!(url, range = %range, start = chunk.start, len = chunk.bytes.len(), "range fetched");
    Ok(chunk)
}

/// `bytes first-last/total`
fn parse_content_range(header: &str) -> Result<(u64, u64, u64), TdfError> {
    let malformed = || TdfError::extraction(format!("malformed Content-Range: {header}"));
    let spec = header.trim().strip_prefix("bytes ").ok_or_else(malformed)?;
    let (bounds, total) = spec.split_once('/').ok_or_else(malformed)?;
    let (first, last) = bounds.split_once('-').ok_or_else(malformed)?;
    let first: u64 = first.trim().parse().map_err(|_| malformed())?;
    let last: u64 = last.trim().parse().map_err(|_| malformed())?;
    let total: u64 = total.trim().parse().map_err(|_| malformed())?;
    if first > last || last >= total {
        return Err(malformed());
    }
    Ok((first, last, total))
}

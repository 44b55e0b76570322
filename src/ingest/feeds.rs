// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed has no more messages")]
    Closed,
}

pub trait FeedSource: Send {
    /// `Ok(None)` means nothing arrived within about `timeout`.
    /// [`FeedError::Closed`] means the source is exhausted for good.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, FeedError>;
}

/// Replays newline-delimited JSON, one message per non-blank line.
///
/// Lines are handed on as raw bytes; invalid UTF-8 is the consumer's problem.
pub struct JsonLinesFeed<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: BufRead + Send> JsonLinesFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }
}

impl JsonLinesFeed<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead + Send> FeedSource for JsonLinesFeed<R> {
    fn poll(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, FeedError> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Err(FeedError::Closed);
            }

            let trimmed = self.line.trim_ascii();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_vec()));
            }
        }
    }
}

/// Polls an HTTP endpoint returning newline-delimited JSON.
pub struct HttpPollFeed {
    client: reqwest::blocking::Client,
    url: String,
    interval: Duration,
    last_fetch: Option<Instant>,
    pending: VecDeque<Vec<u8>>,
}

impl HttpPollFeed {
    pub fn new(url: impl Into<String>, interval: Duration) -> Result<Self, FeedError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            interval,
            last_fetch: None,
            pending: VecDeque::new(),
        })
    }

    fn fetch(&mut self) -> Result<(), FeedError> {
        self.last_fetch = Some(Instant::now());

        let body = self
            .client
            .get(&self.url)
            .send()?
            .error_for_status()?
            .text()?;

        self.pending.extend(
            body.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| line.as_bytes().to_vec()),
        );

        tracing::debug!(url = %self.url, queued = self.pending.len(), "fetched feed batch");
        Ok(())
    }
}

impl FeedSource for HttpPollFeed {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, FeedError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }

        if let Some(last) = self.last_fetch {
            let since = last.elapsed();
            if since < self.interval {
                std::thread::sleep(timeout.min(self.interval - since));
                return Ok(None);
            }
        }

        self.fetch()?;
        Ok(self.pending.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn replays_lines_and_skips_blanks() {
        let mut feed = JsonLinesFeed::new(Cursor::new("{\"a\":1}\n\n   \n{\"b\":2}\r\n"));

        assert_eq!(
            feed.poll(Duration::ZERO).unwrap().as_deref(),
            Some(&b"{\"a\":1}"[..])
        );
        assert_eq!(
            feed.poll(Duration::ZERO).unwrap().as_deref(),
            Some(&b"{\"b\":2}"[..])
        );
        assert!(matches!(feed.poll(Duration::ZERO), Err(FeedError::Closed)));
    }

    #[test]
    fn invalid_utf8_line_is_passed_through() {
        let mut feed = JsonLinesFeed::new(Cursor::new(b"\xff\xfe{}\n{\"a\":1}\n".to_vec()));

        assert_eq!(
            feed.poll(Duration::ZERO).unwrap().as_deref(),
            Some(&b"\xff\xfe{}"[..])
        );
        assert_eq!(
            feed.poll(Duration::ZERO).unwrap().as_deref(),
            Some(&b"{\"a\":1}"[..])
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            JsonLinesFeed::open(dir.path().join("absent.ndjson")),
            Err(FeedError::Io(_))
        ));
    }

    #[test]
    fn unreachable_endpoint_is_http_error() {
        let mut feed = HttpPollFeed::new("http://127.0.0.1:9/feed", Duration::from_secs(1)).unwrap();
        assert!(matches!(feed.poll(Duration::ZERO), Err(FeedError::Http(_))));
    }
}

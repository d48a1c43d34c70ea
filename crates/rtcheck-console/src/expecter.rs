//! Buffered expect engine over an async reader/writer pair.
//!
//! Output read from the console accumulates in a byte buffer. An expect
//! consumes the buffer up to the end of its match; unmatched output stays
//! buffered for the next step.

use std::time::Duration;

use regex::bytes::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use rtcheck_core::batch::{BatchError, BatchRes, Batcher, Case, CaseAction};
use rtcheck_core::error::{CheckupError, CheckupResult};

const READ_CHUNK: usize = 4096;

pub struct Expecter<R, W> {
    reader: R,
    writer: W,
    buffer: Vec<u8>,
    send_timeout: Duration,
    verbose: bool,
}

/// A successful match: consumed output plus capture groups.
struct Matched {
    output: String,
    captures: Vec<String>,
}

impl<R, W> Expecter<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, send_timeout: Duration) -> Self {
        Self {
            reader,
            writer,
            buffer: Vec::new(),
            send_timeout,
            verbose: false,
        }
    }

    /// Trace every byte sent to and received from the console.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Write `text` to the console and flush it.
    pub async fn send(&mut self, text: &str) -> CheckupResult<()> {
        if self.verbose {
            trace!(data = ?text, "console send");
        }
        let write = async {
            self.writer.write_all(text.as_bytes()).await?;
            self.writer.flush().await
        };
        match tokio::time::timeout(self.send_timeout, write).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(CheckupError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("sending {text:?} to the console timed out"),
            ))),
        }
    }

    /// Wait until `pattern` matches the buffered output or `timeout` elapses.
    pub async fn expect(&mut self, pattern: &str, timeout: Duration) -> CheckupResult<BatchRes> {
        let re = Regex::new(pattern)?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.take_match(&re) {
                return Ok(BatchRes {
                    index: 0,
                    output: found.output,
                    captures: found.captures,
                });
            }
            self.fill(pattern, deadline, timeout).await?;
        }
    }

    /// Wait for whichever case matches first, acting on it.
    ///
    /// Among the cases matching the buffered output, the one whose match
    /// starts earliest wins; ties go to the earlier case. A case carrying a
    /// reply sends it and discards everything buffered so far, so a reply is
    /// never sent twice for the same prompt.
    pub async fn switch_case(&mut self, cases: &[Case], timeout: Duration) -> CheckupResult<BatchRes> {
        let compiled = cases
            .iter()
            .map(|case| Regex::new(&case.pattern))
            .collect::<Result<Vec<_>, _>>()?;
        let mut budgets: Vec<u32> = cases.iter().map(|case| case.retries).collect();
        let description = cases
            .iter()
            .map(|case| case.pattern.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        let deadline = Instant::now() + timeout;

        loop {
            let Some((index, found)) = self.take_earliest(&compiled, cases) else {
                self.fill(&description, deadline, timeout).await?;
                continue;
            };
            let case = &cases[index];
            if let Some(label) = &case.label {
                debug!(case = %label, "switch case matched");
            }

            if let Some(reply) = &case.send {
                self.send(reply).await?;
            }

            match &case.action {
                CaseAction::Succeed => {
                    return Ok(BatchRes {
                        index: 0,
                        output: found.output,
                        captures: found.captures,
                    });
                }
                CaseAction::Fail(message) => {
                    warn!(pattern = %case.pattern, "{message}");
                    return Err(CheckupError::PermissionDenied(message.clone()));
                }
                CaseAction::Next => {
                    if budgets[index] == 0 {
                        return Err(CheckupError::RetriesExhausted(case.pattern.clone()));
                    }
                    budgets[index] -= 1;
                }
            }
        }
    }

    /// Run a raw batch. Every expecting step gets the full `timeout`.
    pub async fn expect_batch(
        &mut self,
        batch: &[Batcher],
        timeout: Duration,
    ) -> Result<Vec<BatchRes>, BatchError> {
        let mut results = Vec::new();
        for (index, step) in batch.iter().enumerate() {
            let outcome = match step {
                Batcher::Send(text) => self.send(text).await.map(|_| None),
                Batcher::Expect(pattern) => self.expect(pattern, timeout).await.map(Some),
                Batcher::SwitchCase(cases) => self.switch_case(cases, timeout).await.map(Some),
            };
            match outcome {
                Ok(Some(mut res)) => {
                    res.index = index;
                    results.push(res);
                }
                Ok(None) => {}
                Err(error) => {
                    return Err(BatchError {
                        partial: results,
                        error,
                    })
                }
            }
        }
        Ok(results)
    }

    /// Shut down the write side so the remote pump sees end of input.
    pub async fn shutdown(&mut self) -> CheckupResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn fill(&mut self, waiting_for: &str, deadline: Instant, timeout: Duration) -> CheckupResult<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match tokio::time::timeout_at(deadline, self.reader.read(&mut chunk)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(CheckupError::Timeout {
                    pattern: waiting_for.to_string(),
                    after: timeout,
                })
            }
        };
        if n == 0 {
            return Err(CheckupError::StreamClosed {
                pattern: waiting_for.to_string(),
            });
        }
        if self.verbose {
            trace!(data = %String::from_utf8_lossy(&chunk[..n]), "console recv");
        }
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    fn take_match(&mut self, re: &Regex) -> Option<Matched> {
        let (end, captures) = {
            let caps = re.captures(&self.buffer)?;
            let end = caps.get(0)?.end();
            (end, collect_captures(&caps))
        };
        Some(self.consume(end, captures))
    }

    fn take_earliest(&mut self, compiled: &[Regex], cases: &[Case]) -> Option<(usize, Matched)> {
        let (index, end, captures) = {
            let mut best: Option<(usize, usize, regex::bytes::Captures<'_>)> = None;
            for (index, re) in compiled.iter().enumerate() {
                let Some(caps) = re.captures(&self.buffer) else {
                    continue;
                };
                let Some(start) = caps.get(0).map(|m| m.start()) else {
                    continue;
                };
                if best.as_ref().map_or(true, |(_, best_start, _)| start < *best_start) {
                    best = Some((index, start, caps));
                }
            }
            let (index, _, caps) = best?;
            let end = if cases[index].send.is_some() {
                self.buffer.len()
            } else {
                caps.get(0)?.end()
            };
            (index, end, collect_captures(&caps))
        };
        Some((index, self.consume(end, captures)))
    }

    fn consume(&mut self, end: usize, captures: Vec<String>) -> Matched {
        let output = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
        self.buffer.drain(..end);
        Matched { output, captures }
    }
}

fn collect_captures(caps: &regex::bytes::Captures<'_>) -> Vec<String> {
    caps.iter()
        .map(|group| {
            group
                .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
                .unwrap_or_default()
        })
        .collect()
}

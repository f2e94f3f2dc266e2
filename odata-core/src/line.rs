//! Line-oriented scanning of batch payloads.
//!
//! The scanner splits a byte stream on `\n`, remembers which terminator each
//! line carried and hands out [`Line`]s with their 1-based number and byte
//! offset. Bodies may legitimately contain bare LF, so terminator policy is
//! only enforced on framing lines via [`LineScanner::check_framing`].

use crate::{BatchConfig, BatchError, Result};
use bytes::Bytes;
use std::borrow::Cow;
use std::io::{BufRead, Read};

/// Terminator found at the end of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// `\r\n`
    CrLf,
    /// Bare `\n`
    Lf,
    /// End of stream without terminator
    None,
}

impl LineEnding {
    /// Terminator bytes.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::CrLf => b"\r\n",
            LineEnding::Lf => b"\n",
            LineEnding::None => b"",
        }
    }
}

/// A scanned line without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    content: Bytes,
    ending: LineEnding,
    number: usize,
    offset: u64,
}

impl Line {
    /// Line content, terminator excluded.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Line content as shared bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.content
    }

    /// Line content decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Terminator of this line.
    pub fn ending(&self) -> LineEnding {
        self.ending
    }

    /// 1-based line number.
    pub fn number(&self) -> usize {
        self.number
    }

    /// Byte offset of the first byte of this line in the scanned stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the line has no content.
    pub fn is_blank(&self) -> bool {
        self.content.is_empty()
    }

    /// Whether the line ended with a terminator.
    pub fn is_terminated(&self) -> bool {
        self.ending != LineEnding::None
    }

    /// Length including the terminator.
    pub fn raw_len(&self) -> usize {
        self.content.len() + self.ending.as_bytes().len()
    }
}

/// Forward-only line scanner with one line of lookahead.
#[derive(Debug)]
pub struct LineScanner<R> {
    reader: R,
    strict: bool,
    max_line_length: Option<usize>,
    next_number: usize,
    offset: u64,
    current: Option<Line>,
    peeked: Option<Line>,
    buf: Vec<u8>,
}

impl<R: BufRead> LineScanner<R> {
    /// Create a strict scanner over a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            strict: true,
            max_line_length: None,
            next_number: 1,
            offset: 0,
            current: None,
            peeked: None,
            buf: Vec::with_capacity(256),
        }
    }

    /// Create a scanner honoring the strictness and line limit of a config.
    pub fn with_config(reader: R, config: &BatchConfig) -> Self {
        Self::new(reader)
            .strict(config.strict_crlf)
            .max_line_length(config.max_line_length)
    }

    /// Enable or disable strict CRLF framing.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Bound the length of a single line.
    pub fn max_line_length(mut self, max: Option<usize>) -> Self {
        self.max_line_length = max;
        self
    }

    /// Number the first line `line_number` instead of 1.
    ///
    /// Used when scanning a region cut out of a larger stream so that errors
    /// still point at the line of the original payload.
    pub fn starting_at(mut self, line_number: usize) -> Self {
        self.next_number = line_number.max(1);
        self
    }

    /// Whether strict CRLF framing is enforced.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Whether another line is available.
    pub fn has_next(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_some())
    }

    /// Look at the next line without consuming it.
    pub fn peek(&mut self) -> Result<Option<&Line>> {
        if self.peeked.is_none() {
            self.peeked = self.read_line()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Consume and return the next line.
    pub fn next_line(&mut self) -> Result<Option<Line>> {
        let line = match self.peeked.take() {
            Some(line) => Some(line),
            None => self.read_line()?,
        };
        if let Some(line) = &line {
            self.current = Some(line.clone());
        }
        Ok(line)
    }

    /// The last line returned by [`next_line`](Self::next_line).
    pub fn current(&self) -> Option<&Line> {
        self.current.as_ref()
    }

    /// Number of the last line returned, 0 before the first.
    pub fn line_number(&self) -> usize {
        self.current.as_ref().map_or(0, Line::number)
    }

    /// Byte offset of the next unconsumed line.
    pub fn position(&self) -> u64 {
        self.peeked.as_ref().map_or(self.offset, Line::offset)
    }

    /// Enforce the terminator policy on a framing line.
    pub fn check_framing(&self, line: &Line) -> Result<()> {
        if !self.strict {
            return Ok(());
        }
        match line.ending() {
            LineEnding::CrLf => Ok(()),
            LineEnding::Lf => Err(BatchError::MalformedStream {
                line: line.number(),
                message: "bare LF line terminator".to_string(),
            }),
            LineEnding::None => Err(BatchError::MalformedStream {
                line: line.number(),
                message: "stream ended mid-line".to_string(),
            }),
        }
    }

    /// Recover the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_line(&mut self) -> Result<Option<Line>> {
        self.buf.clear();
        let read = match self.max_line_length {
            Some(max) => (&mut self.reader)
                .take((max as u64).saturating_add(2))
                .read_until(b'\n', &mut self.buf)?,
            None => self.reader.read_until(b'\n', &mut self.buf)?,
        };
        if read == 0 {
            return Ok(None);
        }

        let number = self.next_number;
        let (len, ending) = if self.buf.ends_with(b"\r\n") {
            (read - 2, LineEnding::CrLf)
        } else if self.buf.ends_with(b"\n") {
            (read - 1, LineEnding::Lf)
        } else {
            (read, LineEnding::None)
        };

        if let Some(max) = self.max_line_length
            && len > max
        {
            return Err(BatchError::LineTooLong { line: number, max });
        }

        let line = Line {
            content: Bytes::copy_from_slice(&self.buf[..len]),
            ending,
            number,
            offset: self.offset,
        };
        self.next_number += 1;
        self.offset += read as u64;
        tracing::trace!(line = number, len, "Scanned line");
        Ok(Some(line))
    }
}

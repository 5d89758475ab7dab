//! Line-Oriented Request Decoder
//!
//! Clients send requests in one of two framings, told apart by the first
//! byte of a line:
//!
//! - **Array framing** (`*`): what real clients send.
//!   `*<count>\r\n` followed by `count` fields, each `$<len>\r\n<bytes>\r\n`.
//!   Each field is read by its declared length, so it may contain spaces,
//!   CR/LF or NUL bytes.
//! - **Inline framing** (anything else): a single line typed into telnet.
//!   The line is trimmed and split on every single space. There is no
//!   quoting, so an argument can never contain a space.
//!
//! In both framings the first field is the command name, matched
//! case-insensitively, and the rest are its arguments.
//!
//! ## Errors
//!
//! [`RequestReader::read_request`] returns:
//! - `Ok(Some(request))` - a complete request was decoded
//! - `Ok(None)` - the client closed the stream between requests
//! - `Err(DecodeError::Protocol(_))` - malformed input; see [`DecodeError::is_fatal`]
//! - `Err(DecodeError::Io(_))` - the transport failed, including EOF mid-request

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Errors caused by malformed request framing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The `*<count>` header is not a number or is too large
    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(String),

    /// A field header inside an array did not start with `$`
    #[error("expected '$', got '{0}'")]
    ExpectedBulkPrefix(char),

    /// The `$<len>` header is not a non-negative number
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(String),

    /// A field's payload was not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// A line or field exceeds the allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl ParseError {
    /// Whether the reader lost its place in the stream.
    ///
    /// A bad `*<count>` header spoils only its own line. Every error after
    /// the header leaves unread fields behind, and oversized input cannot
    /// be skipped, so the stream is abandoned.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ParseError::InvalidArrayLength(_))
    }
}

/// Errors returned while reading a request from a stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),
}

impl DecodeError {
    /// Whether the connection must be closed.
    ///
    /// Transport failures leave the stream at an unknown position, and so
    /// does any framing error inside an array.
    pub fn is_fatal(&self) -> bool {
        match self {
            DecodeError::Io(_) => true,
            DecodeError::Protocol(err) => err.is_fatal(),
        }
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk field (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of any protocol line, inline commands included (64 KB)
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Maximum number of fields in one array request
pub const MAX_ARRAY_LEN: i64 = 1024 * 1024;

/// Which framing a request arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Array,
    Inline,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Array => f.write_str("array"),
            Framing::Inline => f.write_str("inline"),
        }
    }
}

/// A decoded request: lower-cased command name plus raw arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub name: String,
    pub args: Vec<Bytes>,
    pub framing: Framing,
}

impl Request {
    /// Builds a request from raw fields. Returns `None` if there are none.
    pub fn from_fields(mut fields: Vec<Bytes>, framing: Framing) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let name = String::from_utf8_lossy(&fields.remove(0)).to_ascii_lowercase();
        Some(Self {
            name,
            args: fields,
            framing,
        })
    }
}

/// Reads requests one at a time from a buffered stream.
///
/// # Example
///
/// ```
/// use multikv::protocol::RequestReader;
///
/// # tokio_test::block_on(async {
/// let mut reader = RequestReader::new(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
/// let request = reader.read_request().await.unwrap().unwrap();
/// assert_eq!(request.name, "get");
/// assert_eq!(request.args, vec![bytes::Bytes::from("name")]);
/// # });
/// ```
#[derive(Debug)]
pub struct RequestReader<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> RequestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(256),
        }
    }

    /// Reads the next request.
    ///
    /// Blank inline lines and empty arrays carry no command and are skipped.
    pub async fn read_request(&mut self) -> Result<Option<Request>, DecodeError> {
        loop {
            if !self.read_line().await? {
                return Ok(None);
            }

            let request = if self.line.first() == Some(&prefix::ARRAY) {
                let count = parse_array_len(&self.line[1..])?;
                let fields = self.read_array_fields(count).await?;
                Request::from_fields(fields, Framing::Array)
            } else {
                Request::from_fields(split_inline(&self.line), Framing::Inline)
            };

            if request.is_some() {
                return Ok(request);
            }
        }
    }

    /// Reads `count` bulk fields following an array header.
    async fn read_array_fields(&mut self, count: usize) -> Result<Vec<Bytes>, DecodeError> {
        let mut fields = Vec::with_capacity(count.min(64));

        for _ in 0..count {
            if !self.read_line().await? {
                return Err(unexpected_eof().into());
            }

            match self.line.first() {
                Some(&prefix::BULK_STRING) => {}
                Some(&other) => return Err(ParseError::ExpectedBulkPrefix(other as char).into()),
                None => return Err(ParseError::ExpectedBulkPrefix(' ').into()),
            }

            let len = parse_bulk_len(&self.line[1..])?;
            fields.push(self.read_bulk(len).await?);
        }

        Ok(fields)
    }

    /// Reads exactly `len` payload bytes plus the trailing CRLF.
    async fn read_bulk(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        let total = len + CRLF.len();
        let mut buf = Vec::with_capacity(total.min(MAX_INLINE_SIZE));

        (&mut self.reader)
            .take(total as u64)
            .read_to_end(&mut buf)
            .await?;

        if buf.len() < total {
            return Err(unexpected_eof().into());
        }
        if &buf[len..] != CRLF {
            return Err(ParseError::MissingCrlf.into());
        }

        buf.truncate(len);
        Ok(Bytes::from(buf))
    }

    /// Reads one `\n`-terminated line into `self.line`.
    ///
    /// Returns `false` on a clean EOF before any byte of the line.
    async fn read_line(&mut self) -> Result<bool, DecodeError> {
        self.line.clear();

        let n = (&mut self.reader)
            .take(MAX_INLINE_SIZE as u64 + 1)
            .read_until(b'\n', &mut self.line)
            .await?;

        if n == 0 {
            return Ok(false);
        }

        if self.line.last() != Some(&b'\n') {
            if self.line.len() > MAX_INLINE_SIZE {
                return Err(ParseError::MessageTooLarge {
                    size: self.line.len(),
                    max: MAX_INLINE_SIZE,
                }
                .into());
            }
            return Err(unexpected_eof().into());
        }

        Ok(true)
    }
}

/// Parses the count of an array header. Non-positive counts yield zero fields.
fn parse_array_len(header: &[u8]) -> ParseResult<usize> {
    let text = String::from_utf8_lossy(header);
    let count: i64 = text
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidArrayLength(text.trim().to_string()))?;

    if count > MAX_ARRAY_LEN {
        return Err(ParseError::InvalidArrayLength(count.to_string()));
    }

    Ok(count.max(0) as usize)
}

/// Parses the length of a `$<len>` field header.
fn parse_bulk_len(header: &[u8]) -> ParseResult<usize> {
    let text = String::from_utf8_lossy(header);
    let len: i64 = text
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidBulkLength(text.trim().to_string()))?;

    if len < 0 {
        return Err(ParseError::InvalidBulkLength(len.to_string()));
    }

    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }

    Ok(len)
}

/// Splits an inline command line on single spaces.
///
/// Consecutive spaces produce empty arguments. A blank line yields nothing.
fn split_inline(line: &[u8]) -> Vec<Bytes> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Vec::new();
    }

    line.split(|b| *b == b' ')
        .map(Bytes::copy_from_slice)
        .collect()
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended mid-request")
}

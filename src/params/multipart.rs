//! `multipart/form-data` bodies ([RFC 7578](https://www.rfc-editor.org/rfc/rfc7578)).

use crate::{errors::ParseError, mime};
use memchr::memmem;
use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("no multipart boundary param in Content-Type")]
    MissingBoundary,

    #[error("multipart body has no opening boundary")]
    MissingDelimiter,

    #[error("multipart body ended before the closing boundary")]
    Unterminated,

    #[error("malformed part header `{0}`")]
    InvalidHeader(String),

    /// Text fields exceed the in-memory budget.
    #[error("multipart fields exceed {limit} bytes")]
    TooLarge { limit: usize },

    #[error("spill file part to temporary storage: {0}")]
    Spill(#[source] io::Error),
}

#[derive(Debug)]
enum Storage {
    Memory(Vec<u8>),
    Disk(File),
}

/// A file part of a multipart body.
///
/// Small files are kept in memory. Once the in-memory budget is used up,
/// further files are written to an anonymous temporary file that is removed
/// when the `FormFile` is dropped.
#[derive(Debug)]
pub struct FormFile {
    name: String,
    filename: String,
    content_type: Option<String>,
    size: usize,
    storage: Storage,
}

impl FormFile {
    /// Name of the form field.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name sent by the client, without any directory part.
    #[inline(always)]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[inline(always)]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the content lives in a temporary file.
    #[inline(always)]
    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, Storage::Disk(_))
    }

    /// Reads the whole content.
    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        match &self.storage {
            Storage::Memory(data) => Ok(data.clone()),
            Storage::Disk(file) => {
                let mut file = file;
                let mut data = Vec::with_capacity(self.size);
                file.seek(SeekFrom::Start(0))?;
                file.read_to_end(&mut data)?;
                Ok(data)
            }
        }
    }
}

/// Fields and files of a multipart body, in body order.
#[derive(Debug, Default)]
pub(crate) struct Form {
    pub(crate) values: Vec<(String, String)>,
    pub(crate) files: Vec<FormFile>,
}

const READ_CONTEXT: &str = "read multipart body";
const READ_CHUNK: usize = 8 * 1024;
/// Largest header block of a single part.
const MAX_PART_HEAD: usize = 16 * 1024;

/// Reads a multipart body part by part.
///
/// Only a window around the next delimiter is buffered: field values are
/// collected as they arrive and file contents go to memory or to a
/// temporary file. Parts without a `form-data` disposition or without a
/// `name` are skipped. Text fields count against `max_memory` and fail the
/// parse once it is exhausted, a file part is spilled to disk as soon as it
/// outgrows what is left. Reading stops at the closing delimiter.
pub(crate) async fn read<R>(
    body: R,
    boundary: &str,
    max_memory: usize,
    max_body: usize,
) -> Result<Form, ParseError>
where
    R: AsyncRead + Unpin,
{
    if boundary.is_empty() {
        return Err(MultipartError::MissingBoundary.into());
    }

    Source::new(body, max_body).form(boundary, max_memory).await
}

/// Body reader with a small lookahead buffer.
struct Source<R> {
    body: R,
    buf: Vec<u8>,
    read: usize,
    max_body: usize,
}

impl<R: AsyncRead + Unpin> Source<R> {
    fn new(body: R, max_body: usize) -> Self {
        Self {
            body,
            buf: Vec::with_capacity(READ_CHUNK),
            read: 0,
            max_body,
        }
    }

    /// Appends the next chunk of the body, `false` at its end.
    async fn more(&mut self) -> Result<bool, ParseError> {
        self.buf.reserve(READ_CHUNK);
        let n = self
            .body
            .read_buf(&mut self.buf)
            .await
            .map_err(|source| ParseError::Read {
                context: READ_CONTEXT,
                source,
            })?;

        self.read += n;
        if self.read > self.max_body {
            return Err(ParseError::BodyTooLarge {
                limit: self.max_body,
            });
        }
        Ok(n != 0)
    }

    /// Buffers at least `len` bytes, failing with `err` if the body ends first.
    async fn fill(&mut self, len: usize, err: MultipartError) -> Result<(), ParseError> {
        while self.buf.len() < len {
            if !self.more().await? {
                return Err(err.into());
            }
        }
        Ok(())
    }

    #[inline(always)]
    fn consume(&mut self, len: usize) {
        self.buf.drain(..len);
    }

    async fn form(&mut self, boundary: &str, max_memory: usize) -> Result<Form, ParseError> {
        let delimiter = [b"\r\n--", boundary.as_bytes()].concat();
        let finder = memmem::Finder::new(&delimiter);

        self.skip_preamble(&finder).await?;

        let mut form = Form::default();
        let mut memory = max_memory;

        loop {
            self.fill(2, MultipartError::Unterminated).await?;
            if self.buf.starts_with(b"--") {
                return Ok(form);
            }

            loop {
                let padding = self
                    .buf
                    .iter()
                    .take_while(|&&b| b == b' ' || b == b'\t')
                    .count();
                self.consume(padding);
                if self.buf.len() >= 2 {
                    break;
                }
                if !self.more().await? {
                    return Err(MultipartError::Unterminated.into());
                }
            }
            if !self.buf.starts_with(b"\r\n") {
                return Err(MultipartError::Unterminated.into());
            }
            self.consume(2);

            let head = self.part_head(&finder).await?;
            let head = PartHead::parse(&head)?;

            let mut sink = match (&head.name, &head.filename) {
                (None, _) => Sink::Discard,
                (Some(_), None) => Sink::Field(Vec::new()),
                (Some(_), Some(_)) => Sink::File {
                    data: Vec::new(),
                    spilled: None,
                    size: 0,
                },
            };

            loop {
                if let Some(index) = finder.find(&self.buf) {
                    sink.write(&self.buf[..index], &mut memory, max_memory)?;
                    self.consume(index + delimiter.len());
                    break;
                }

                let keep = delimiter.len() - 1;
                if self.buf.len() > keep {
                    let ready = self.buf.len() - keep;
                    sink.write(&self.buf[..ready], &mut memory, max_memory)?;
                    self.consume(ready);
                }
                if !self.more().await? {
                    return Err(MultipartError::Unterminated.into());
                }
            }

            sink.finish(head, &mut form);
        }
    }

    /// Consumes everything up to and including the opening delimiter, which
    /// either starts the body or starts a line.
    async fn skip_preamble(&mut self, finder: &memmem::Finder<'_>) -> Result<(), ParseError> {
        let delimiter = finder.needle();
        let opening = &delimiter[2..];

        while self.buf.len() < opening.len() && self.more().await? {}
        if self.buf.starts_with(opening) {
            self.consume(opening.len());
            return Ok(());
        }

        loop {
            if let Some(index) = finder.find(&self.buf) {
                self.consume(index + delimiter.len());
                return Ok(());
            }

            let keep = delimiter.len() - 1;
            if self.buf.len() > keep {
                self.consume(self.buf.len() - keep);
            }
            if !self.more().await? {
                return Err(MultipartError::MissingDelimiter.into());
            }
        }
    }

    /// Consumes the header block of a part and its blank line.
    async fn part_head(&mut self, finder: &memmem::Finder<'_>) -> Result<String, ParseError> {
        loop {
            self.fill(2, MultipartError::Unterminated).await?;
            if self.buf.starts_with(b"\r\n") {
                self.consume(2);
                return Ok(String::new());
            }

            let blank = memmem::find(&self.buf, b"\r\n\r\n");
            let delimiter = finder.find(&self.buf);

            let head_end = blank.filter(|&end| delimiter.map_or(true, |d| d > end));

            match (head_end, delimiter) {
                (Some(end), _) => {
                    let head = std::str::from_utf8(&self.buf[..end])
                        .map(str::to_owned)
                        .map_err(|_| invalid_header(&self.buf[..end]))?;
                    self.consume(end + 4);
                    return Ok(head);
                }
                (_, Some(end)) => return Err(invalid_header(&self.buf[..end]).into()),
                (None, None) if self.buf.len() > MAX_PART_HEAD => {
                    return Err(invalid_header(&self.buf[..MAX_PART_HEAD]).into());
                }
                (None, None) => {
                    if !self.more().await? {
                        return Err(MultipartError::Unterminated.into());
                    }
                }
            }
        }
    }
}

fn invalid_header(raw: &[u8]) -> MultipartError {
    MultipartError::InvalidHeader(String::from_utf8_lossy(raw).into_owned())
}

/// Destination of the content of one part.
enum Sink {
    Discard,
    Field(Vec<u8>),
    File {
        data: Vec<u8>,
        spilled: Option<File>,
        size: usize,
    },
}

impl Sink {
    fn write(&mut self, chunk: &[u8], memory: &mut usize, limit: usize) -> Result<(), MultipartError> {
        match self {
            Sink::Discard => {}
            Sink::Field(data) => {
                *memory = memory
                    .checked_sub(chunk.len())
                    .ok_or(MultipartError::TooLarge { limit })?;
                data.extend_from_slice(chunk);
            }
            Sink::File {
                data,
                spilled,
                size,
            } => {
                *size += chunk.len();
                if let Some(file) = spilled {
                    file.write_all(chunk).map_err(MultipartError::Spill)?;
                } else if let Some(left) = memory.checked_sub(chunk.len()) {
                    *memory = left;
                    data.extend_from_slice(chunk);
                } else {
                    let mut file = spill(&data[..]).map_err(MultipartError::Spill)?;
                    file.write_all(chunk).map_err(MultipartError::Spill)?;
                    *memory += data.len();
                    *data = Vec::new();
                    *spilled = Some(file);
                }
            }
        }
        Ok(())
    }

    fn finish(self, head: PartHead, form: &mut Form) {
        let Some(name) = head.name else {
            return;
        };

        match self {
            Sink::Discard => {}
            Sink::Field(data) => {
                let value = String::from_utf8_lossy(&data).into_owned();
                form.values.push((name, value));
            }
            Sink::File {
                data,
                spilled,
                size,
            } => {
                let storage = match spilled {
                    Some(file) => {
                        tracing::debug!(size, "multipart file part spilled to disk");
                        Storage::Disk(file)
                    }
                    None => Storage::Memory(data),
                };

                form.files.push(FormFile {
                    name,
                    filename: head.filename.as_deref().map(base_name).unwrap_or_default().to_owned(),
                    content_type: head.content_type,
                    size,
                    storage,
                });
            }
        }
    }
}

fn spill(content: &[u8]) -> io::Result<File> {
    let mut file = tempfile::tempfile()?;
    file.write_all(content)?;
    Ok(file)
}

fn base_name(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}

struct PartHead {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHead {
    fn parse(head: &str) -> Result<Self, MultipartError> {
        let mut part = PartHead {
            name: None,
            filename: None,
            content_type: None,
        };

        for line in head.split("\r\n").filter(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| MultipartError::InvalidHeader(line.to_owned()))?;
            let value = value.trim();

            if name.trim().eq_ignore_ascii_case("content-disposition") {
                if !mime::media_type(value).eq_ignore_ascii_case("form-data") {
                    continue;
                }
                part.name = mime::param(value, "name")
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned);
                part.filename = mime::param(value, "filename").map(str::to_owned);
            } else if name.trim().eq_ignore_ascii_case("content-type") {
                part.content_type = Some(value.to_owned());
            }
        }

        Ok(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::io::ReadBuf;

    const BOUNDARY: &str = "XyZ";

    fn body(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (headers, content) in parts {
            out.extend_from_slice(format!("--{BOUNDARY}\r\n{headers}\r\n\r\n{content}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        out
    }

    async fn parse(raw: &[u8], boundary: &str, max_memory: usize) -> Result<Form, ParseError> {
        read(raw, boundary, max_memory, usize::MAX).await
    }

    /// Hands out its data `step` bytes at a time.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl AsyncRead for Trickle<'_> {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let data = self.data;
            let n = self.step.min(data.len()).min(buf.remaining());
            let (chunk, rest) = data.split_at(n);
            buf.put_slice(chunk);
            self.data = rest;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn fields_and_files() {
        let raw = body(&[
            ("Content-Disposition: form-data; name=\"title\"", "hello"),
            ("Content-Disposition: form-data; name=\"tag\"", "a"),
            ("Content-Disposition: form-data; name=\"tag\"", "b"),
            (
                "Content-Disposition: form-data; name=\"doc\"; filename=\"C:\\\\tmp\\\\a.txt\"\r\nContent-Type: text/plain",
                "file body",
            ),
        ]);

        let form = parse(&raw, BOUNDARY, 1 << 20).await.unwrap();

        assert_eq!(
            form.values,
            [
                ("title".to_owned(), "hello".to_owned()),
                ("tag".to_owned(), "a".to_owned()),
                ("tag".to_owned(), "b".to_owned()),
            ]
        );
        assert_eq!(form.files.len(), 1);

        let file = &form.files[0];
        assert_eq!(file.name(), "doc");
        assert_eq!(file.filename(), "a.txt");
        assert_eq!(file.content_type(), Some("text/plain"));
        assert_eq!(file.size(), 9);
        assert!(!file.is_spilled());
        assert_eq!(file.bytes().unwrap(), b"file body");
    }

    #[tokio::test]
    async fn chunk_boundaries_do_not_matter() {
        let mut raw = b"preamble\r\n".to_vec();
        raw.extend(body(&[
            ("Content-Disposition: form-data; name=\"a\"", "one\r\n-two"),
            ("Content-Disposition: form-data; name=\"f\"; filename=\"f.txt\"", "--XyZ-ish"),
            ("Content-Disposition: form-data; name=\"b\"", ""),
        ]));

        for step in 1..=13 {
            let reader = Trickle { data: &raw, step };
            let form = read(reader, BOUNDARY, 1 << 20, usize::MAX).await.unwrap();

            assert_eq!(
                form.values,
                [
                    ("a".to_owned(), "one\r\n-two".to_owned()),
                    ("b".to_owned(), String::new()),
                ],
                "step {step}"
            );
            assert_eq!(form.files[0].bytes().unwrap(), b"--XyZ-ish", "step {step}");
        }
    }

    #[tokio::test]
    async fn preamble_and_nameless_parts() {
        let mut raw = b"ignored preamble\r\n".to_vec();
        raw.extend(body(&[
            ("Content-Disposition: attachment; name=\"x\"", "skipped"),
            ("Content-Type: text/plain", "no disposition"),
            ("Content-Disposition: form-data; name=\"kept\"", "yes"),
        ]));

        let form = parse(&raw, BOUNDARY, 1 << 20).await.unwrap();

        assert_eq!(form.values, [("kept".to_owned(), "yes".to_owned())]);
    }

    #[tokio::test]
    async fn content_may_contain_crlf() {
        let raw = body(&[("Content-Disposition: form-data; name=\"t\"", "line1\r\nline2\r\n")]);
        let form = parse(&raw, BOUNDARY, 1 << 20).await.unwrap();

        assert_eq!(form.values[0].1, "line1\r\nline2\r\n");
    }

    #[tokio::test]
    async fn large_files_spill_to_disk() {
        let big = "x".repeat(64);
        let raw = body(&[
            (
                "Content-Disposition: form-data; name=\"small\"; filename=\"s.bin\"",
                "1234",
            ),
            (
                "Content-Disposition: form-data; name=\"big\"; filename=\"b.bin\"",
                big.as_str(),
            ),
        ]);

        for step in [3, 1024] {
            let reader = Trickle { data: &raw, step };
            let form = read(reader, BOUNDARY, 32, usize::MAX).await.unwrap();

            assert!(!form.files[0].is_spilled());
            assert!(form.files[1].is_spilled());
            assert_eq!(form.files[1].size(), 64);
            assert_eq!(form.files[1].bytes().unwrap(), big.as_bytes());
        }
    }

    #[tokio::test]
    async fn uploads_are_not_buffered_whole() {
        let content = "0123456789abcdef".repeat(256 * 1024);
        let raw = body(&[(
            "Content-Disposition: form-data; name=\"upload\"; filename=\"big.bin\"",
            content.as_str(),
        )]);
        let max_memory = 64 * 1024;

        let mut source = Source::new(&raw[..], usize::MAX);
        let form = source.form(BOUNDARY, max_memory).await.unwrap();

        let file = &form.files[0];
        assert!(file.is_spilled());
        assert_eq!(file.size(), content.len());
        assert_eq!(file.bytes().unwrap(), content.as_bytes());
        assert!(source.buf.capacity() < max_memory, "{}", source.buf.capacity());
    }

    #[tokio::test]
    async fn fields_over_budget_fail() {
        let raw = body(&[
            ("Content-Disposition: form-data; name=\"a\"", "12345"),
            ("Content-Disposition: form-data; name=\"b\"", "12345"),
        ]);

        assert!(matches!(
            parse(&raw, BOUNDARY, 8).await,
            Err(ParseError::Multipart(MultipartError::TooLarge { limit: 8 }))
        ));
        assert!(parse(&raw, BOUNDARY, 10).await.is_ok());
    }

    #[tokio::test]
    async fn body_limit_applies_while_streaming() {
        let raw = body(&[("Content-Disposition: form-data; name=\"a\"", "12345")]);

        assert!(matches!(
            read(&raw[..], BOUNDARY, 1024, 16).await,
            Err(ParseError::BodyTooLarge { limit: 16 })
        ));
        assert!(read(&raw[..], BOUNDARY, 1024, raw.len()).await.is_ok());
    }

    #[tokio::test]
    async fn malformed_bodies() {
        let header = "Content-Disposition: form-data; name=\"a\"";
        let unterminated = format!("--{BOUNDARY}\r\n{header}\r\n\r\nvalue");
        let bad_header = format!("--{BOUNDARY}\r\nnot a header\r\n\r\nv\r\n--{BOUNDARY}--");
        let no_blank_line = format!("--{BOUNDARY}\r\n{header}\r\n--{BOUNDARY}--");
        let no_crlf = format!("--{BOUNDARY}garbage");

        let cases: [(&[u8], fn(&MultipartError) -> bool); 5] = [
            (&b"no delimiter here"[..], |e| matches!(e, MultipartError::MissingDelimiter)),
            (unterminated.as_bytes(), |e| matches!(e, MultipartError::Unterminated)),
            (bad_header.as_bytes(), |e| matches!(e, MultipartError::InvalidHeader(_))),
            (no_blank_line.as_bytes(), |e| matches!(e, MultipartError::InvalidHeader(_))),
            (no_crlf.as_bytes(), |e| matches!(e, MultipartError::Unterminated)),
        ];

        for (raw, expected) in cases {
            match parse(raw, BOUNDARY, 1024).await {
                Err(ParseError::Multipart(err)) => {
                    assert!(expected(&err), "{err:?} for {}", String::from_utf8_lossy(raw))
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        assert!(matches!(
            parse(b"", "", 1024).await,
            Err(ParseError::Multipart(MultipartError::MissingBoundary))
        ));
    }

    #[tokio::test]
    async fn empty_form() {
        let raw = format!("--{BOUNDARY}--\r\n");
        let form = parse(raw.as_bytes(), BOUNDARY, 1024).await.unwrap();

        assert!(form.values.is_empty());
        assert!(form.files.is_empty());
    }
}

//! Everything related to reading lines out of a tracked file.

use std::io::{self, SeekFrom};
use std::path::Path;

use tokio::fs::{metadata, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::state::FileState;

/// Chunk size for forward and backward reads.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Appended to the text of any line cut at the byte ceiling.
pub const TRUNCATION_MARKER: &str = " [truncated]";

/// A line captured from a tracked file.
///
/// A partial line has no terminator yet. An update replaces the partial line
/// previously emitted for the same path instead of appending a new one.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Line {
    path: String,
    text: String,
    partial: bool,
    update: bool,
}

impl Line {
    pub(crate) fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Line {
            path: path.into(),
            text: text.into(),
            partial: false,
            update: false,
        }
    }

    pub(crate) fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub(crate) fn update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    /// Returns the display path (absolute or root-relative) of the source file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the line content, without terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn is_update(&self) -> bool {
        self.update
    }

    /// Returns `(path, text, partial, update)`.
    pub fn into_inner(self) -> (String, String, bool, bool) {
        let Line {
            path,
            text,
            partial,
            update,
        } = self;
        (path, text, partial, update)
    }
}

/// Reads appended bytes and turns them into [`Line`]s.
#[derive(Clone, Copy, Debug)]
pub struct IncrementalReader {
    max_line_bytes: usize,
}

impl IncrementalReader {
    /// `max_line_bytes` of zero disables truncation.
    pub fn new(max_line_bytes: usize) -> Self {
        IncrementalReader { max_line_bytes }
    }

    /// Reads whatever was appended since `state.offset`.
    ///
    /// If the file shrank below the stored offset it was truncated or
    /// replaced: the offset is reset and any held partial discarded before
    /// reading everything from the start.
    pub async fn read_new<F>(
        &self,
        path: &Path,
        display: &str,
        state: &mut FileState,
        emit: F,
    ) -> io::Result<()>
    where
        F: FnMut(Line),
    {
        let meta = metadata(path).await?;
        if !meta.is_file() {
            return Ok(());
        }

        let size = meta.len();
        if size == state.offset {
            return Ok(());
        }
        if size < state.offset {
            tracing::debug!(
                path = %path.display(),
                old_offset = state.offset,
                new_len = size,
                "file truncated, resetting offset to 0"
            );
            state.reset();
        }

        let offset = state.offset;
        self.read_from(path, display, state, offset, true, emit).await
    }

    /// Reads from `offset` to end-of-file, emitting complete lines and
    /// leaving any unterminated tail in `state.partial`.
    ///
    /// With `include_existing_partial`, the held partial is prepended to the
    /// first line read. The first event of the call is flagged as an update
    /// when that partial had already been delivered.
    ///
    /// A line longer than the ceiling is emitted once, truncated; the rest of
    /// it is skipped up to its terminator, across calls if need be.
    ///
    /// On a mid-stream failure the offset still covers every byte consumed,
    /// and bytes not yet emitted are held back for the next call.
    pub async fn read_from<F>(
        &self,
        path: &Path,
        display: &str,
        state: &mut FileState,
        offset: u64,
        include_existing_partial: bool,
        mut emit: F,
    ) -> io::Result<()>
    where
        F: FnMut(Line),
    {
        let mut file = File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut lines =
            Assembler::resume(display, self.max_line_bytes, state, include_existing_partial);

        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut consumed = 0u64;
        let result = loop {
            match file.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    consumed += n as u64;
                    lines.feed(&buf[..n], &mut emit);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        state.offset = offset + consumed;

        match result {
            Ok(()) => {
                lines.finish(state, &mut emit);
                Ok(())
            }
            Err(e) => {
                lines.suspend(state);
                Err(e)
            }
        }
    }
}

/// Splits the bytes of one read call into line events.
struct Assembler<'a> {
    display: &'a str,
    max_line_bytes: usize,
    carry: Vec<u8>,
    /// Skipping the remainder of a line already emitted truncated.
    discarding: bool,
    /// The next event replaces a partial the consumer has already seen.
    pending_update: bool,
}

impl<'a> Assembler<'a> {
    fn resume(
        display: &'a str,
        max_line_bytes: usize,
        state: &mut FileState,
        include_existing_partial: bool,
    ) -> Self {
        let mut lines = Assembler {
            display,
            max_line_bytes,
            carry: Vec::new(),
            discarding: false,
            pending_update: false,
        };
        if include_existing_partial {
            lines.pending_update = state.partial_delivered && !state.partial.is_empty();
            lines.carry = std::mem::take(&mut state.partial);
            lines.discarding = state.discarding;
        }
        lines
    }

    fn send<F: FnMut(Line)>(&mut self, text: String, partial: bool, emit: &mut F) {
        let update = std::mem::replace(&mut self.pending_update, false);
        emit(Line::new(self.display, text).partial(partial).update(update));
    }

    fn feed<F: FnMut(Line)>(&mut self, mut data: &[u8], emit: &mut F) {
        while !data.is_empty() {
            let newline = data.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(idx) => {
                        self.discarding = false;
                        data = &data[idx + 1..];
                        continue;
                    }
                    None => return,
                }
            }

            match newline {
                Some(idx) => {
                    self.carry.extend_from_slice(&data[..idx]);
                    let (text, _) = truncate_line(trim_cr(&self.carry), self.max_line_bytes);
                    self.carry.clear();
                    self.send(text, false, emit);
                    data = &data[idx + 1..];
                }
                None => {
                    self.carry.extend_from_slice(data);
                    if self.max_line_bytes > 0 && self.carry.len() > self.max_line_bytes {
                        let (text, _) = truncate_line(&self.carry, self.max_line_bytes);
                        self.carry.clear();
                        self.discarding = true;
                        self.send(text, false, emit);
                    }
                    return;
                }
            }
        }
    }

    /// End of file: surface the unterminated remainder as a partial.
    fn finish<F: FnMut(Line)>(mut self, state: &mut FileState, emit: &mut F) {
        state.discarding = self.discarding;
        if self.carry.is_empty() {
            state.clear_partial();
            return;
        }

        let (text, truncated) = truncate_line(trim_cr(&self.carry), self.max_line_bytes);
        self.send(text, !truncated, emit);
        if truncated {
            state.clear_partial();
            state.discarding = true;
        } else {
            state.partial = std::mem::take(&mut self.carry);
            state.partial_delivered = true;
        }
    }

    /// Failed read: hold back what was not emitted. A partial counts as
    /// delivered only if it was shown before and nothing replaced it since.
    fn suspend(self, state: &mut FileState) {
        state.partial = self.carry;
        state.partial_delivered = self.pending_update;
        state.discarding = self.discarding;
    }
}

/// The last lines of a file, as returned by [`tail_last_lines`].
#[derive(Debug, Default, Eq, PartialEq)]
pub struct Tail {
    /// Complete lines, CR stripped, oldest first.
    pub lines: Vec<Vec<u8>>,
    /// Unterminated trailing bytes, if the file does not end in `\n`.
    pub partial: Option<Vec<u8>>,
    /// File size observed while reading.
    pub size: u64,
}

/// Reads backwards from the end of `path` until `n` trailing lines are known.
///
/// If the file lacks a final terminator the unterminated fragment counts as
/// one of the `n` and is returned separately as the partial.
pub async fn tail_last_lines(path: &Path, n: usize) -> io::Result<Tail> {
    let mut file = File::open(path).await?;
    let size = file.metadata().await?.len();

    let mut tail = Tail {
        size,
        ..Tail::default()
    };
    if n == 0 || size == 0 {
        return Ok(tail);
    }

    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut remaining = size;
    let mut newlines = 0usize;
    while remaining > 0 && newlines <= n {
        let len = remaining.min(READ_CHUNK_SIZE as u64);
        remaining -= len;

        let mut chunk = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(remaining)).await?;
        file.read_exact(&mut chunk).await?;
        newlines += chunk.iter().filter(|b| **b == b'\n').count();
        chunks.push(chunk);
    }

    let data: Vec<u8> = chunks.into_iter().rev().flatten().collect();
    let (lines, partial) = split_lines(&data);

    let keep = if partial.is_empty() { n } else { n - 1 };
    let skip = lines.len().saturating_sub(keep);
    tail.lines = lines[skip..].iter().map(|l| l.to_vec()).collect();
    if !partial.is_empty() {
        tail.partial = Some(partial.to_vec());
    }

    Ok(tail)
}

/// Splits `data` on `\n`, stripping one trailing `\r` from each complete
/// line. Returns the complete lines and the unterminated remainder.
pub fn split_lines(data: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, b) in data.iter().enumerate() {
        if *b == b'\n' {
            lines.push(trim_cr(&data[start..i]));
            start = i + 1;
        }
    }
    (lines, &data[start..])
}

pub(crate) fn trim_cr(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\r").unwrap_or(data)
}

/// Decodes a line, cutting it at `max` bytes and appending
/// [`TRUNCATION_MARKER`] if it is longer. Returns whether it was cut.
pub(crate) fn truncate_line(data: &[u8], max: usize) -> (String, bool) {
    if max > 0 && data.len() > max {
        let mut text = String::from_utf8_lossy(&data[..max]).into_owned();
        text.push_str(TRUNCATION_MARKER);
        (text, true)
    } else {
        (String::from_utf8_lossy(data).into_owned(), false)
    }
}

// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use crate::harvester::offset_tracker::LineOffset;
use crate::registry::FileIdentity;

/// A complete line read from a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line content without the trailing newline, possibly truncated
    pub text: String,
    /// Position and full byte length of the line in the file
    pub offset: LineOffset,
}

/// Reads complete, newline-terminated lines from a single file.
///
/// A trailing line without a newline is left unread until the writer
/// finishes it, so `offset` always sits at a line boundary.
pub struct LineReader {
    identity: FileIdentity,
    reader: BufReader<File>,
    /// Byte position of the next unread line
    offset: u64,
    /// Maximum bytes kept from a single line
    max_line_bytes: usize,
    /// Incremented every time the file is found truncated
    generation: u64,
    buf: Vec<u8>,
}

impl LineReader {
    /// Open `path` and position the reader at `offset`.
    pub fn open(path: impl AsRef<Path>, offset: u64, max_line_bytes: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file, offset, max_line_bytes)
    }

    /// Wrap an already opened file.
    pub fn from_file(file: File, offset: u64, max_line_bytes: usize) -> io::Result<Self> {
        let identity = FileIdentity::from_file(&file)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;

        Ok(Self {
            identity,
            reader,
            offset,
            max_line_bytes,
            generation: 0,
            buf: Vec::new(),
        })
    }

    pub fn identity(&self) -> FileIdentity {
        self.identity
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current size of the open file
    pub fn file_len(&self) -> io::Result<u64> {
        Ok(self.reader.get_ref().metadata()?.len())
    }

    /// The file shrank below the read position, i.e. it was truncated.
    pub fn is_truncated(&self) -> io::Result<bool> {
        Ok(self.file_len()? < self.offset)
    }

    /// Start over from the beginning of the file.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.offset = 0;
        self.generation += 1;
        Ok(())
    }

    /// Read up to `max_lines` complete lines.
    pub fn read_lines(&mut self, max_lines: usize) -> io::Result<Vec<Line>> {
        let mut lines = Vec::new();

        while lines.len() < max_lines {
            self.buf.clear();
            let n = self.reader.read_until(b'\n', &mut self.buf)?;
            if n == 0 {
                break;
            }

            if self.buf.last() != Some(&b'\n') {
                // Incomplete line; re-read it once the writer finishes
                self.reader.seek(SeekFrom::Start(self.offset))?;
                break;
            }

            let len = u32::try_from(n).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "line exceeds 4 GiB")
            })?;
            let line_offset = LineOffset::new(self.offset, len);
            self.offset += n as u64;

            let mut content = &self.buf[..n - 1];
            if content.last() == Some(&b'\r') {
                content = &content[..content.len() - 1];
            }
            if content.is_empty() {
                continue;
            }

            lines.push(Line {
                text: truncate(content, self.max_line_bytes),
                offset: line_offset,
            });
        }

        Ok(lines)
    }
}

fn truncate(content: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(content);
    if text.len() <= max_bytes {
        return text.into_owned();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

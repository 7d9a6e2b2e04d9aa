//! Streaming character source for the tokenizer.
//!
//! Bytes are decoded incrementally with `encoding_rs` (BOM sniffing included) and line separators
//! are reported as a distinct [`Item::Newline`] so that a literal `\r` or `\n` that is *not* the
//! configured separator stays ordinary data.

use std::collections::VecDeque;
use std::io::{self, BufRead};

use encoding_rs::{Decoder, Encoding};
use tracing::warn;

use super::LineSeparator;

/// One unit of decoded input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Item {
    Char(char),
    Newline,
}

pub(crate) struct CharReader<R> {
    inner: R,
    decoder: Decoder,
    pending: VecDeque<char>,
    eof: bool,
    separator: LineSeparator,
    peeked: Option<Option<Item>>,
    line: usize,
    column: usize,
    malformed: usize,
}

impl<R: BufRead> CharReader<R> {
    pub(crate) fn new(inner: R, encoding: &'static Encoding, separator: LineSeparator) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            pending: VecDeque::new(),
            eof: false,
            separator,
            peeked: None,
            line: 1,
            column: 1,
            malformed: 0,
        }
    }

    /// 1-based `(line, column)` of the next item to be returned.
    pub(crate) fn position(&self) -> (usize, usize) {
        (self.line, self.column)
    }

    /// Decoded chunks in which malformed byte sequences were replaced with U+FFFD.
    pub(crate) fn malformed_chunks(&self) -> usize {
        self.malformed
    }

    pub(crate) fn peek(&mut self) -> io::Result<Option<Item>> {
        if let Some(item) = self.peeked {
            return Ok(item);
        }
        let item = self.decode_item()?;
        self.peeked = Some(item);
        Ok(item)
    }

    pub(crate) fn next(&mut self) -> io::Result<Option<Item>> {
        let item = match self.peeked.take() {
            Some(item) => item,
            None => self.decode_item()?,
        };
        match item {
            Some(Item::Newline) => {
                self.line += 1;
                self.column = 1;
            }
            Some(Item::Char(_)) => self.column += 1,
            None => {}
        }
        Ok(item)
    }

    fn decode_item(&mut self) -> io::Result<Option<Item>> {
        self.fill(2)?;
        let Some(c) = self.pending.pop_front() else {
            return Ok(None);
        };
        let item = match (self.separator, c) {
            (LineSeparator::Lf, '\n') | (LineSeparator::Any, '\n') => Item::Newline,
            (LineSeparator::Cr, '\r') => Item::Newline,
            (LineSeparator::CrLf, '\r') | (LineSeparator::Any, '\r') => {
                if self.pending.front() == Some(&'\n') {
                    self.pending.pop_front();
                    Item::Newline
                } else if self.separator == LineSeparator::Any {
                    Item::Newline
                } else {
                    Item::Char('\r')
                }
            }
            _ => Item::Char(c),
        };
        Ok(Some(item))
    }

    /// Decode until at least `want` chars are buffered or the input is exhausted.
    fn fill(&mut self, want: usize) -> io::Result<()> {
        while self.pending.len() < want && !self.eof {
            let buf = self.inner.fill_buf()?;
            let mut out = String::with_capacity(
                self.decoder
                    .max_utf8_buffer_length(buf.len())
                    .unwrap_or(buf.len() * 3 + 4),
            );
            let last = buf.is_empty();
            let (_, read, had_errors) = self.decoder.decode_to_string(buf, &mut out, last);
            self.inner.consume(read);
            if had_errors {
                self.malformed += 1;
                warn!(
                    encoding = self.decoder.encoding().name(),
                    line = self.line,
                    "malformed input bytes replaced with U+FFFD"
                );
            }
            self.pending.extend(out.chars());
            self.eof = last;
        }
        Ok(())
    }
}

//! Quote/escape state machine producing one field array per record.

use std::io::BufRead;

use crate::error::TokenizeError;

use super::reader::{CharReader, Item};
use super::{QuoteHandling, TokenizerConfig};

/// What follows a closing quote.
enum AfterQuote {
    /// The value ended at a delimiter, newline or end of input.
    Done(String),
    /// Content followed the quote; keep parsing the value as quoted.
    Resume(String),
    /// Content followed the quote; finish the value as unquoted.
    Unquoted(String),
}

pub(crate) struct Engine<R> {
    reader: CharReader<R>,
    config: TokenizerConfig,
}

impl<R: BufRead> Engine<R> {
    pub(crate) fn new(inner: R, config: TokenizerConfig) -> Self {
        let reader = CharReader::new(inner, config.encoding, config.line_separator);
        Self { reader, config }
    }

    pub(crate) fn position(&self) -> (usize, usize) {
        self.reader.position()
    }

    pub(crate) fn malformed_chunks(&self) -> usize {
        self.reader.malformed_chunks()
    }

    /// Parse the next record, or `None` at end of input.
    pub(crate) fn next_record(&mut self) -> Result<Option<Vec<String>>, TokenizeError> {
        if self.reader.peek()?.is_none() {
            return Ok(None);
        }

        let delimiter = self.config.delimiter;
        let collapse = self.config.collapse_delimiters;
        let mut fields = Vec::new();
        if collapse {
            self.skip_delimiter_run()?;
        }

        loop {
            if self.config.ignore_leading_ws {
                self.skip_whitespace()?;
            }

            match self.reader.peek()? {
                None => {
                    fields.push(String::new());
                    break;
                }
                Some(Item::Newline) => {
                    self.reader.next()?;
                    if !(collapse && !fields.is_empty()) {
                        fields.push(String::new());
                    }
                    break;
                }
                Some(Item::Char(c)) if c == delimiter => {
                    self.reader.next()?;
                    fields.push(String::new());
                    continue;
                }
                Some(Item::Char(c)) if c == self.config.quote => {
                    let start = self.reader.position();
                    self.reader.next()?;
                    fields.push(self.parse_quoted(start)?);
                }
                Some(Item::Char(_)) => {
                    fields.push(self.parse_unquoted(String::new())?);
                }
            }

            // Values stop only at a delimiter, a newline or the end of input.
            match self.reader.next()? {
                Some(Item::Char(c)) if c == delimiter => {
                    if collapse {
                        self.skip_delimiter_run()?;
                        if matches!(self.reader.peek()?, None | Some(Item::Newline)) {
                            self.reader.next()?;
                            break;
                        }
                    }
                }
                _ => break,
            }
        }

        Ok(Some(fields))
    }

    fn parse_quoted(&mut self, start: (usize, usize)) -> Result<String, TokenizeError> {
        let quote = self.config.quote;
        let mut value = String::new();
        if self.config.keep_quotes {
            value.push(quote);
        }

        loop {
            match self.reader.next()? {
                None => {
                    return Err(TokenizeError::UnterminatedQuote {
                        line: start.0,
                        column: start.1,
                    });
                }
                Some(Item::Newline) => value.push(self.config.normalized_newline),
                Some(Item::Char(c)) => {
                    if self.is_escape_char(c) && self.handle_escape(c, &mut value)? {
                        continue;
                    }
                    if c != quote {
                        value.push(c);
                        continue;
                    }
                    if self.config.keep_quotes {
                        value.push(quote);
                    }
                    match self.after_closing_quote(value)? {
                        AfterQuote::Done(v) => return Ok(v),
                        AfterQuote::Resume(v) => value = v,
                        AfterQuote::Unquoted(v) => return self.parse_unquoted(v),
                    }
                }
            }
        }
    }

    /// Decide what a closing quote means given what follows it.
    ///
    /// Whitespace after the quote is buffered: it is dropped (or kept, without
    /// `ignore_trailing_ws`) when the value ends, and folded back into the value otherwise.
    fn after_closing_quote(&mut self, mut value: String) -> Result<AfterQuote, TokenizeError> {
        let quote_at = self.reader.position();
        let mut ws = String::new();
        while let Some(Item::Char(c)) = self.reader.peek()? {
            if c == self.config.delimiter || !c.is_whitespace() {
                break;
            }
            ws.push(c);
            self.reader.next()?;
        }

        match self.reader.peek()? {
            None | Some(Item::Newline) => {}
            Some(Item::Char(c)) if c == self.config.delimiter => {}
            Some(Item::Char(_)) => {
                let fold = |mut value: String, keep_quotes: bool, quote: char| {
                    if !keep_quotes {
                        value.push(quote);
                    }
                    value.push_str(&ws);
                    value
                };
                return match self.config.quote_handling {
                    QuoteHandling::RaiseError => Err(TokenizeError::UnescapedQuote {
                        ch: self.config.quote,
                        line: quote_at.0,
                        column: quote_at.1.saturating_sub(1),
                    }),
                    QuoteHandling::SkipValue => {
                        self.skip_to_delimiter()?;
                        Ok(AfterQuote::Done(String::new()))
                    }
                    QuoteHandling::StopAtDelimiter => Ok(AfterQuote::Unquoted(fold(
                        value,
                        self.config.keep_quotes,
                        self.config.quote,
                    ))),
                    QuoteHandling::StopAtClosingQuote => Ok(AfterQuote::Resume(fold(
                        value,
                        self.config.keep_quotes,
                        self.config.quote,
                    ))),
                };
            }
        }

        if !self.config.ignore_trailing_ws {
            value.push_str(&ws);
        }
        Ok(AfterQuote::Done(value))
    }

    fn parse_unquoted(&mut self, mut value: String) -> Result<String, TokenizeError> {
        let quote = self.config.quote;
        loop {
            let at = self.reader.position();
            let c = match self.reader.peek()? {
                None | Some(Item::Newline) => break,
                Some(Item::Char(c)) if c == self.config.delimiter => break,
                Some(Item::Char(c)) => c,
            };
            self.reader.next()?;

            if self.is_escape_char(c) && self.handle_escape(c, &mut value)? {
                continue;
            }
            if c != quote {
                value.push(c);
                continue;
            }

            match self.config.quote_handling {
                QuoteHandling::RaiseError => {
                    return Err(TokenizeError::UnescapedQuote {
                        ch: c,
                        line: at.0,
                        column: at.1,
                    });
                }
                QuoteHandling::SkipValue => {
                    self.skip_to_delimiter()?;
                    return Ok(String::new());
                }
                QuoteHandling::StopAtDelimiter => value.push(c),
                QuoteHandling::StopAtClosingQuote => {
                    value.push(c);
                    self.read_through_quote(&mut value, at)?;
                }
            }
        }

        if self.config.ignore_trailing_ws {
            let len = value.trim_end().len();
            value.truncate(len);
        }
        Ok(value)
    }

    fn is_escape_char(&self, c: char) -> bool {
        c == self.config.quote_escape || Some(c) == self.config.escape_escape
    }

    /// Handle an escape sequence starting with the already-consumed `c`.
    ///
    /// Returns `false` when `c` does not start an escape sequence here, leaving the input untouched.
    fn handle_escape(&mut self, c: char, value: &mut String) -> Result<bool, TokenizeError> {
        let next = match self.reader.peek()? {
            Some(Item::Char(n)) => n,
            _ => return Ok(false),
        };
        let escaped = if c == self.config.quote_escape && next == self.config.quote {
            self.config.quote
        } else if Some(c) == self.config.escape_escape
            && self.config.quote_escape != self.config.quote
            && next == self.config.quote_escape
        {
            self.config.quote_escape
        } else {
            return Ok(false);
        };

        self.reader.next()?;
        if self.config.keep_escape {
            value.push(c);
        }
        value.push(escaped);
        Ok(true)
    }

    /// Copy input verbatim up to and including the next quote.
    fn read_through_quote(&mut self, value: &mut String, start: (usize, usize)) -> Result<(), TokenizeError> {
        loop {
            match self.reader.next()? {
                None => {
                    return Err(TokenizeError::UnterminatedQuote {
                        line: start.0,
                        column: start.1,
                    });
                }
                Some(Item::Newline) => value.push(self.config.normalized_newline),
                Some(Item::Char(c)) => {
                    value.push(c);
                    if c == self.config.quote {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn skip_to_delimiter(&mut self) -> Result<(), TokenizeError> {
        while let Some(Item::Char(c)) = self.reader.peek()? {
            if c == self.config.delimiter {
                break;
            }
            self.reader.next()?;
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) -> Result<(), TokenizeError> {
        while let Some(Item::Char(c)) = self.reader.peek()? {
            if c == self.config.delimiter || c == self.config.quote || !c.is_whitespace() {
                break;
            }
            self.reader.next()?;
        }
        Ok(())
    }

    fn skip_delimiter_run(&mut self) -> Result<(), TokenizeError> {
        while let Some(Item::Char(c)) = self.reader.peek()? {
            if c != self.config.delimiter {
                break;
            }
            self.reader.next()?;
        }
        Ok(())
    }
}

//! Delimited-text tokenizer.
//!
//! [`Tokenizer`] pulls one record at a time from a byte stream and yields the raw field strings
//! of that record. Quote, escape and whitespace handling is driven by [`TokenizerConfig`]; the
//! behaviour on an unescaped quote inside a value is selected by [`QuoteHandling`].
//!
//! ```rust
//! use csvx::tokenizer::{tokenize_str, TokenizerConfig};
//!
//! let rows = tokenize_str("id,name\n1,\"Ada \"\"the first\"\"\"\n", &TokenizerConfig::default()).unwrap();
//! assert_eq!(rows[1], vec!["1", "Ada \"the first\""]);
//! ```
//!
//! [`TokenizerConfig::whitespace`] selects the space-delimited mode, where runs of spaces count
//! as a single delimiter.

mod engine;
mod reader;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use encoding_rs::Encoding;

use crate::error::TokenizeError;

use engine::Engine;

/// Behaviour when an unescaped quote is found inside a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteHandling {
    /// Fail with [`TokenizeError::UnescapedQuote`].
    RaiseError,
    /// Discard the whole value (it becomes an empty field).
    SkipValue,
    /// Keep the quote and continue reading a quoted value up to the next closing quote.
    #[default]
    StopAtClosingQuote,
    /// Keep the quote and continue reading an unquoted value up to the next delimiter.
    StopAtDelimiter,
}

impl QuoteHandling {
    /// Parse the schema-source spelling (`"raiseError"`, `"skipValue"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "raiseError" => Some(Self::RaiseError),
            "skipValue" => Some(Self::SkipValue),
            "stopAtClosingQuote" => Some(Self::StopAtClosingQuote),
            "stopAtDelimiter" => Some(Self::StopAtDelimiter),
            _ => None,
        }
    }
}

/// Which physical line separator ends a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSeparator {
    /// `\r\n`, `\r` and `\n` all end a record.
    #[default]
    Any,
    Lf,
    CrLf,
    Cr,
}

impl LineSeparator {
    pub fn from_text(text: &str) -> Option<Self> {
        match text {
            "\n" => Some(Self::Lf),
            "\r\n" => Some(Self::CrLf),
            "\r" => Some(Self::Cr),
            _ => None,
        }
    }
}

/// Tokenizer configuration.
#[derive(Debug, Clone, Copy)]
pub struct TokenizerConfig {
    pub delimiter: char,
    pub quote: char,
    /// Escapes a quote inside a value. Equal to `quote` for the doubled-quote convention.
    pub quote_escape: char,
    /// Escapes the quote escape itself (e.g. `\\` when `quote_escape` is `\`).
    pub escape_escape: Option<char>,
    /// Character a line separator inside a quoted value becomes.
    pub normalized_newline: char,
    pub line_separator: LineSeparator,
    pub ignore_leading_ws: bool,
    pub ignore_trailing_ws: bool,
    /// Keep the enclosing quotes of quoted values.
    pub keep_quotes: bool,
    /// Keep escape characters in front of the characters they escape.
    pub keep_escape: bool,
    pub quote_handling: QuoteHandling,
    /// Treat a run of consecutive delimiters as one.
    pub collapse_delimiters: bool,
    pub encoding: &'static Encoding,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            quote_escape: '"',
            escape_escape: None,
            normalized_newline: '\n',
            line_separator: LineSeparator::Any,
            ignore_leading_ws: false,
            ignore_trailing_ws: false,
            keep_quotes: false,
            keep_escape: false,
            quote_handling: QuoteHandling::default(),
            collapse_delimiters: false,
            encoding: encoding_rs::UTF_8,
        }
    }
}

impl TokenizerConfig {
    /// Space-delimited mode: runs of spaces separate fields, leading/trailing runs are ignored.
    pub fn whitespace() -> Self {
        Self {
            delimiter: ' ',
            collapse_delimiters: true,
            ..Self::default()
        }
    }
}

/// Pull-based record reader.
///
/// Iterating yields `Ok(fields)` once per record and stops after the first error.
pub struct Tokenizer<R> {
    engine: Engine<R>,
    failed: bool,
    records: usize,
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(reader: R, config: TokenizerConfig) -> Self {
        Self {
            engine: Engine::new(reader, config),
            failed: false,
            records: 0,
        }
    }

    /// Read the next record, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<Vec<String>>, TokenizeError> {
        if self.failed {
            return Ok(None);
        }
        match self.engine.next_record() {
            Ok(Some(fields)) => {
                self.records += 1;
                Ok(Some(fields))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Number of records returned so far.
    pub fn records_read(&self) -> usize {
        self.records
    }

    /// 1-based `(line, column)` of the next unread character.
    pub fn position(&self) -> (usize, usize) {
        self.engine.position()
    }

    /// Number of decoded chunks so far that held bytes invalid for the configured encoding.
    ///
    /// Such bytes come through as U+FFFD; each affected chunk is also logged at `warn`.
    pub fn malformed_chunks(&self) -> usize {
        self.engine.malformed_chunks()
    }
}

impl Tokenizer<BufReader<File>> {
    /// Open `path` for tokenizing.
    pub fn from_path(path: impl AsRef<Path>, config: TokenizerConfig) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), config))
    }
}

impl<R: BufRead> Iterator for Tokenizer<R> {
    type Item = Result<Vec<String>, TokenizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Tokenize an in-memory string into records.
pub fn tokenize_str(input: &str, config: &TokenizerConfig) -> Result<Vec<Vec<String>>, TokenizeError> {
    let config = TokenizerConfig {
        encoding: encoding_rs::UTF_8,
        ..*config
    };
    Tokenizer::new(input.as_bytes(), config).collect()
}

#[cfg(test)]
mod tests {
    use super::{tokenize_str, LineSeparator, QuoteHandling, Tokenizer, TokenizerConfig};
    use crate::error::TokenizeError;

    fn rows(input: &str, config: &TokenizerConfig) -> Vec<Vec<String>> {
        tokenize_str(input, config).unwrap()
    }

    fn with_handling(handling: QuoteHandling) -> TokenizerConfig {
        TokenizerConfig {
            quote_handling: handling,
            ..TokenizerConfig::default()
        }
    }

    #[test]
    fn splits_simple_records() {
        let got = rows("a,b,c\n1,2,3\n", &TokenizerConfig::default());
        assert_eq!(got, vec![vec!["a", "b", "c"], vec!["1", "2", "3"]]);
    }

    #[test]
    fn final_record_without_newline_is_returned() {
        let got = rows("a,b\n1,2", &TokenizerConfig::default());
        assert_eq!(got.len(), 2);
        assert_eq!(got[1], vec!["1", "2"]);
    }

    #[test]
    fn empty_fields_and_empty_records() {
        let got = rows("a,,\n\n,b\n", &TokenizerConfig::default());
        assert_eq!(got, vec![vec!["a", "", ""], vec![""], vec!["", "b"]]);
    }

    #[test]
    fn doubled_quote_is_unescaped() {
        let got = rows("\"a\"\"b\"\n", &TokenizerConfig::default());
        assert_eq!(got, vec![vec!["a\"b"]]);
    }

    #[test]
    fn keep_quotes_and_keep_escape() {
        let config = TokenizerConfig {
            keep_quotes: true,
            keep_escape: true,
            ..TokenizerConfig::default()
        };
        let got = rows("\"a\"\"b\",c\n", &config);
        assert_eq!(got, vec![vec!["\"a\"\"b\"", "c"]]);
    }

    #[test]
    fn backslash_escapes_with_escape_escape() {
        let config = TokenizerConfig {
            quote_escape: '\\',
            escape_escape: Some('\\'),
            ..TokenizerConfig::default()
        };
        let got = rows(r#""a\"b","c\\",d\"e"#, &config);
        assert_eq!(got, vec![vec!["a\"b", "c\\", "d\"e"]]);
    }

    #[test]
    fn quoted_values_keep_delimiters_and_normalise_newlines() {
        let got = rows("\"x,y\",\"line1\r\nline2\"\n", &TokenizerConfig::default());
        assert_eq!(got, vec![vec!["x,y", "line1\nline2"]]);
    }

    #[test]
    fn whitespace_after_closing_quote_is_trimmed_or_kept() {
        let trimmed = TokenizerConfig {
            ignore_trailing_ws: true,
            ..TokenizerConfig::default()
        };
        assert_eq!(rows("\"a\"  ,b\n", &trimmed), vec![vec!["a", "b"]]);
        assert_eq!(
            rows("\"a\"  ,b\n", &TokenizerConfig::default()),
            vec![vec!["a  ", "b"]]
        );
    }

    #[test]
    fn leading_whitespace_before_quote_is_skipped() {
        let config = TokenizerConfig {
            ignore_leading_ws: true,
            ignore_trailing_ws: true,
            ..TokenizerConfig::default()
        };
        assert_eq!(rows("  \"a b\" ,  c  \n", &config), vec![vec!["a b", "c"]]);
    }

    #[test]
    fn content_after_closing_quote_resumes_quoted_parsing() {
        let got = rows("\"a\" b\"c,d\",e\n", &with_handling(QuoteHandling::StopAtClosingQuote));
        assert_eq!(got, vec![vec!["a\" b\"c,d", "e"]]);
    }

    #[test]
    fn content_after_closing_quote_stops_at_delimiter() {
        let got = rows("\"a\"b,c\n", &with_handling(QuoteHandling::StopAtDelimiter));
        assert_eq!(got, vec![vec!["a\"b", "c"]]);
    }

    #[test]
    fn skip_value_discards_the_field() {
        let got = rows("x\"y,z\n\"a\"b,c\n", &with_handling(QuoteHandling::SkipValue));
        assert_eq!(got, vec![vec!["", "z"], vec!["", "c"]]);
    }

    #[test]
    fn raise_error_reports_position() {
        let err = tokenize_str("ok\nab\"c\n", &with_handling(QuoteHandling::RaiseError)).unwrap_err();
        match err {
            TokenizeError::UnescapedQuote { ch, line, column } => {
                assert_eq!(ch, '"');
                assert_eq!(line, 2);
                assert_eq!(column, 3);
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = tokenize_str("\"a\"b\n", &with_handling(QuoteHandling::RaiseError)).unwrap_err();
        assert!(matches!(err, TokenizeError::UnescapedQuote { line: 1, column: 3, .. }));
    }

    #[test]
    fn unquoted_embedded_quote_reads_through_closing_quote() {
        let got = rows("a\"b,c\"d,e\n", &TokenizerConfig::default());
        assert_eq!(got, vec![vec!["a\"b,c\"d", "e"]]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = tokenize_str("a,\"bc\n", &TokenizerConfig::default()).unwrap_err();
        assert!(matches!(err, TokenizeError::UnterminatedQuote { line: 1, column: 3 }));
    }

    #[test]
    fn whitespace_mode_collapses_runs() {
        let got = rows("  a   b c  \n\n1 2\n", &TokenizerConfig::whitespace());
        assert_eq!(got, vec![vec!["a", "b", "c"], vec![""], vec!["1", "2"]]);
    }

    #[test]
    fn explicit_line_separator_keeps_other_breaks_as_data() {
        let config = TokenizerConfig {
            line_separator: LineSeparator::CrLf,
            ..TokenizerConfig::default()
        };
        let got = rows("a\nb,c\r\nd\r\n", &config);
        assert_eq!(got, vec![vec!["a\nb", "c"], vec!["d"]]);
    }

    #[test]
    fn iterator_stops_after_error() {
        let mut t = Tokenizer::new(
            "\"open\n".as_bytes(),
            with_handling(QuoteHandling::RaiseError),
        );
        assert!(t.next().unwrap().is_err());
        assert!(t.next().is_none());
        assert_eq!(t.records_read(), 0);
    }

    #[cfg(feature = "deep_tests")]
    #[test]
    fn quoted_round_trip_over_generated_values() {
        let alphabet = ['a', ',', '"', ' ', '\n', 'z'];
        for n in 0..4096usize {
            let mut v = String::new();
            let mut k = n;
            for _ in 0..6 {
                v.push(alphabet[k % alphabet.len()]);
                k /= alphabet.len();
            }
            let line = format!("\"{}\",x\n", v.replace('"', "\"\""));
            let got = rows(&line, &TokenizerConfig::default());
            assert_eq!(got, vec![vec![v.clone(), "x".to_string()]], "input {line:?}");
        }
    }
}

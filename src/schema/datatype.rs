//! XSD 1.1 simple types recognised in `@datatype`, with lexical checking.
//!
//! Names may be bare (`integer`), prefixed (`xsd:integer`, `xs:integer`) or full IRIs
//! (`http://www.w3.org/2001/XMLSchema#integer`). An unrecognised name is a schema error.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::Value;

const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// A recognised XSD simple type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    String,
    NormalizedString,
    Token,
    Language,
    Name,
    NcName,
    QName,
    Notation,
    AnyUri,
    Boolean,
    Decimal,
    Integer,
    Long,
    Int,
    Short,
    Byte,
    NonNegativeInteger,
    PositiveInteger,
    NonPositiveInteger,
    NegativeInteger,
    UnsignedLong,
    UnsignedInt,
    UnsignedShort,
    UnsignedByte,
    Float,
    Double,
    Date,
    Time,
    DateTime,
    GYear,
    GYearMonth,
    GMonth,
    GMonthDay,
    GDay,
    Duration,
    Base64Binary,
    HexBinary,
}

const ALL: &[(Datatype, &str)] = &[
    (Datatype::String, "string"),
    (Datatype::NormalizedString, "normalizedString"),
    (Datatype::Token, "token"),
    (Datatype::Language, "language"),
    (Datatype::Name, "Name"),
    (Datatype::NcName, "NCName"),
    (Datatype::QName, "QName"),
    (Datatype::Notation, "NOTATION"),
    (Datatype::AnyUri, "anyURI"),
    (Datatype::Boolean, "boolean"),
    (Datatype::Decimal, "decimal"),
    (Datatype::Integer, "integer"),
    (Datatype::Long, "long"),
    (Datatype::Int, "int"),
    (Datatype::Short, "short"),
    (Datatype::Byte, "byte"),
    (Datatype::NonNegativeInteger, "nonNegativeInteger"),
    (Datatype::PositiveInteger, "positiveInteger"),
    (Datatype::NonPositiveInteger, "nonPositiveInteger"),
    (Datatype::NegativeInteger, "negativeInteger"),
    (Datatype::UnsignedLong, "unsignedLong"),
    (Datatype::UnsignedInt, "unsignedInt"),
    (Datatype::UnsignedShort, "unsignedShort"),
    (Datatype::UnsignedByte, "unsignedByte"),
    (Datatype::Float, "float"),
    (Datatype::Double, "double"),
    (Datatype::Date, "date"),
    (Datatype::Time, "time"),
    (Datatype::DateTime, "dateTime"),
    (Datatype::GYear, "gYear"),
    (Datatype::GYearMonth, "gYearMonth"),
    (Datatype::GMonth, "gMonth"),
    (Datatype::GMonthDay, "gMonthDay"),
    (Datatype::GDay, "gDay"),
    (Datatype::Duration, "duration"),
    (Datatype::Base64Binary, "base64Binary"),
    (Datatype::HexBinary, "hexBinary"),
];

static DECIMAL: Lazy<Regex> = Lazy::new(|| re(r"^[+-]?(\d+(\.\d*)?|\.\d+)$"));
static TZ: Lazy<Regex> = Lazy::new(|| re(r"(Z|[+-]\d{2}:\d{2})$"));
static G_YEAR: Lazy<Regex> = Lazy::new(|| re(r"^-?\d{4,}$"));
static G_YEAR_MONTH: Lazy<Regex> = Lazy::new(|| re(r"^-?\d{4,}-(0[1-9]|1[0-2])$"));
static G_MONTH: Lazy<Regex> = Lazy::new(|| re(r"^--(0[1-9]|1[0-2])$"));
static G_MONTH_DAY: Lazy<Regex> = Lazy::new(|| re(r"^--(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])$"));
static G_DAY: Lazy<Regex> = Lazy::new(|| re(r"^---(0[1-9]|[12]\d|3[01])$"));
static DURATION: Lazy<Regex> = Lazy::new(|| {
    re(r"^-?P(\d+Y)?(\d+M)?(\d+D)?(T(\d+H)?(\d+M)?(\d+(\.\d+)?S)?)?$")
});
static NCNAME: Lazy<Regex> = Lazy::new(|| re(r"^[\p{L}_][\p{L}\p{N}_.\-]*$"));
static NAME: Lazy<Regex> = Lazy::new(|| re(r"^[\p{L}_:][\p{L}\p{N}_.:\-]*$"));
static LANGUAGE: Lazy<Regex> = Lazy::new(|| re(r"^[a-zA-Z]{1,8}(-[a-zA-Z0-9]{1,8})*$"));

pub(crate) fn re(pattern: &str) -> Regex {
    // Patterns above are literals covered by unit tests.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
}

impl Datatype {
    /// Resolve a datatype name; `None` when it is not a recognised XSD simple type.
    pub fn from_name(name: &str) -> Option<Self> {
        let local = name
            .strip_prefix(XSD_NS)
            .or_else(|| name.strip_prefix("xsd:"))
            .or_else(|| name.strip_prefix("xs:"))
            .unwrap_or(name);
        ALL.iter().find(|(_, n)| *n == local).map(|(d, _)| *d)
    }

    /// Local XSD name (`integer`, `dateTime`, ...).
    pub fn name(&self) -> &'static str {
        ALL.iter()
            .find(|(d, _)| d == self)
            .map(|(_, n)| *n)
            .unwrap_or("string")
    }

    /// Suffix a Turtle literal of this type carries, or `None` for types written bare
    /// (`string`, `integer`, `decimal`, `boolean`).
    pub fn literal_suffix(&self) -> Option<String> {
        match self {
            Datatype::String | Datatype::Integer | Datatype::Decimal | Datatype::Boolean => None,
            other => Some(format!("^^xsd:{}", other.name())),
        }
    }

    /// Check `raw` against the lexical space of this type and produce a typed value.
    pub fn parse_value(&self, raw: &str) -> Result<Value, String> {
        match self {
            Datatype::String | Datatype::AnyUri | Datatype::Notation => Ok(Value::Utf8(raw.to_string())),
            Datatype::NormalizedString => {
                if raw.contains(['\r', '\n', '\t']) {
                    Err("contains line breaks or tabs".to_string())
                } else {
                    Ok(Value::Utf8(raw.to_string()))
                }
            }
            Datatype::Token => {
                if raw.contains(['\r', '\n', '\t']) || raw.trim() != raw || raw.contains("  ") {
                    Err("not a collapsed token".to_string())
                } else {
                    Ok(Value::Utf8(raw.to_string()))
                }
            }
            Datatype::Language => lexical(&LANGUAGE, raw, "language tag"),
            Datatype::Name => lexical(&NAME, raw, "XML name"),
            Datatype::NcName => lexical(&NCNAME, raw, "non-colonized name"),
            Datatype::QName => {
                let ok = match raw.split_once(':') {
                    Some((prefix, local)) => NCNAME.is_match(prefix) && NCNAME.is_match(local),
                    None => NCNAME.is_match(raw),
                };
                if ok {
                    Ok(Value::Utf8(raw.to_string()))
                } else {
                    Err("expected prefix:local".to_string())
                }
            }
            Datatype::Boolean => match raw.trim() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err("expected true/false/1/0".to_string()),
            },
            Datatype::Decimal => {
                let t = raw.trim();
                if !DECIMAL.is_match(t) {
                    return Err("expected a decimal number".to_string());
                }
                t.parse::<f64>().map(Value::Float64).map_err(|e| e.to_string())
            }
            Datatype::Float | Datatype::Double => match raw.trim() {
                "INF" | "+INF" => Ok(Value::Float64(f64::INFINITY)),
                "-INF" => Ok(Value::Float64(f64::NEG_INFINITY)),
                "NaN" => Ok(Value::Float64(f64::NAN)),
                t if t.eq_ignore_ascii_case("inf") || t.eq_ignore_ascii_case("nan") => {
                    Err("special values are spelled INF, -INF and NaN".to_string())
                }
                t => t.parse::<f64>().map(Value::Float64).map_err(|e| e.to_string()),
            },
            Datatype::Date => {
                let t = strip_tz(raw.trim());
                NaiveDate::parse_from_str(t, "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|e| e.to_string())
            }
            Datatype::Time => {
                let t = strip_tz(raw.trim());
                NaiveTime::parse_from_str(t, "%H:%M:%S%.f")
                    .map(Value::Time)
                    .map_err(|e| e.to_string())
            }
            Datatype::DateTime => {
                let t = strip_tz(raw.trim());
                NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(Value::DateTime)
                    .map_err(|e| e.to_string())
            }
            Datatype::GYear => lexical(&G_YEAR, strip_tz(raw.trim()), "gYear"),
            Datatype::GYearMonth => lexical(&G_YEAR_MONTH, strip_tz(raw.trim()), "gYearMonth"),
            Datatype::GMonth => lexical(&G_MONTH, strip_tz(raw.trim()), "gMonth"),
            Datatype::GMonthDay => lexical(&G_MONTH_DAY, strip_tz(raw.trim()), "gMonthDay"),
            Datatype::GDay => lexical(&G_DAY, strip_tz(raw.trim()), "gDay"),
            Datatype::Duration => {
                let t = raw.trim();
                if t.ends_with('P') || t.ends_with('T') || !DURATION.is_match(t) {
                    Err("expected an ISO 8601 duration".to_string())
                } else {
                    Ok(Value::Utf8(t.to_string()))
                }
            }
            Datatype::Base64Binary => {
                let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
                let body = compact.trim_end_matches('=');
                let ok = compact.len() % 4 == 0
                    && compact.len() - body.len() <= 2
                    && body.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/');
                if ok {
                    Ok(Value::Utf8(compact))
                } else {
                    Err("expected base64".to_string())
                }
            }
            Datatype::HexBinary => {
                let t = raw.trim();
                if t.len() % 2 == 0 && t.chars().all(|c| c.is_ascii_hexdigit()) {
                    Ok(Value::Utf8(t.to_string()))
                } else {
                    Err("expected an even number of hex digits".to_string())
                }
            }
            integer => parse_integer(*integer, raw.trim()),
        }
    }
}

fn lexical(pattern: &Regex, raw: &str, what: &str) -> Result<Value, String> {
    if pattern.is_match(raw) {
        Ok(Value::Utf8(raw.to_string()))
    } else {
        Err(format!("not a valid {what}"))
    }
}

fn strip_tz(raw: &str) -> &str {
    match TZ.find(raw) {
        Some(m) if m.start() > 0 => &raw[..m.start()],
        _ => raw,
    }
}

fn parse_integer(datatype: Datatype, raw: &str) -> Result<Value, String> {
    let digits = raw.strip_prefix('+').unwrap_or(raw);
    let n: i128 = digits.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    let (lo, hi): (i128, i128) = match datatype {
        Datatype::Long => (i64::MIN.into(), i64::MAX.into()),
        Datatype::Int => (i32::MIN.into(), i32::MAX.into()),
        Datatype::Short => (i16::MIN.into(), i16::MAX.into()),
        Datatype::Byte => (i8::MIN.into(), i8::MAX.into()),
        Datatype::NonNegativeInteger => (0, i128::MAX),
        Datatype::PositiveInteger => (1, i128::MAX),
        Datatype::NonPositiveInteger => (i128::MIN, 0),
        Datatype::NegativeInteger => (i128::MIN, -1),
        Datatype::UnsignedLong => (0, u64::MAX.into()),
        Datatype::UnsignedInt => (0, u32::MAX.into()),
        Datatype::UnsignedShort => (0, u16::MAX.into()),
        Datatype::UnsignedByte => (0, u8::MAX.into()),
        _ => (i128::MIN, i128::MAX),
    };
    if n < lo || n > hi {
        return Err(format!("{n} is outside [{lo}, {hi}] for {}", datatype.name()));
    }
    Ok(i64::try_from(n)
        .map(Value::Int64)
        .unwrap_or_else(|_| Value::Utf8(digits.to_string())))
}

#[cfg(test)]
mod tests {
    use super::Datatype;
    use crate::types::Value;

    #[test]
    fn names_resolve_with_and_without_prefixes() {
        assert_eq!(Datatype::from_name("integer"), Some(Datatype::Integer));
        assert_eq!(Datatype::from_name("xsd:dateTime"), Some(Datatype::DateTime));
        assert_eq!(
            Datatype::from_name("http://www.w3.org/2001/XMLSchema#gYear"),
            Some(Datatype::GYear)
        );
        assert_eq!(Datatype::from_name("Integer"), None);
        assert_eq!(Datatype::from_name("varchar"), None);
    }

    #[test]
    fn literal_suffixes_follow_turtle_shorthand() {
        assert_eq!(Datatype::Integer.literal_suffix(), None);
        assert_eq!(Datatype::Boolean.literal_suffix(), None);
        assert_eq!(Datatype::Long.literal_suffix().as_deref(), Some("^^xsd:long"));
        assert_eq!(
            Datatype::UnsignedShort.literal_suffix().as_deref(),
            Some("^^xsd:unsignedShort")
        );
    }

    #[test]
    fn integers_respect_type_ranges() {
        assert_eq!(Datatype::Byte.parse_value("127"), Ok(Value::Int64(127)));
        assert!(Datatype::Byte.parse_value("128").is_err());
        assert!(Datatype::UnsignedInt.parse_value("-1").is_err());
        assert!(Datatype::PositiveInteger.parse_value("0").is_err());
        assert_eq!(Datatype::Integer.parse_value("+42"), Ok(Value::Int64(42)));
        assert_eq!(
            Datatype::Integer.parse_value("99999999999999999999"),
            Ok(Value::Utf8("99999999999999999999".to_string()))
        );
        assert!(Datatype::Integer.parse_value("4.2").is_err());
    }

    #[test]
    fn decimals_and_floats() {
        assert_eq!(Datatype::Decimal.parse_value("-1.50"), Ok(Value::Float64(-1.5)));
        assert!(Datatype::Decimal.parse_value("1e3").is_err());
        assert_eq!(Datatype::Double.parse_value("1e3"), Ok(Value::Float64(1000.0)));
        assert_eq!(
            Datatype::Float.parse_value("-INF"),
            Ok(Value::Float64(f64::NEG_INFINITY))
        );
        assert!(Datatype::Float.parse_value("inf").is_err());
    }

    #[test]
    fn dates_and_times_accept_time_zones() {
        assert!(matches!(Datatype::Date.parse_value("2024-02-29"), Ok(Value::Date(_))));
        assert!(matches!(Datatype::Date.parse_value("2024-02-29Z"), Ok(Value::Date(_))));
        assert!(Datatype::Date.parse_value("2023-02-29").is_err());
        assert!(matches!(
            Datatype::DateTime.parse_value("2024-01-01T10:00:00.5+02:00"),
            Ok(Value::DateTime(_))
        ));
        assert!(matches!(Datatype::Time.parse_value("23:59:59"), Ok(Value::Time(_))));
        assert!(Datatype::GYear.parse_value("2024").is_ok());
        assert!(Datatype::GYear.parse_value("-0044").is_ok());
        assert!(Datatype::GMonthDay.parse_value("--12-25").is_ok());
        assert!(Datatype::GDay.parse_value("---32").is_err());
    }

    #[test]
    fn miscellaneous_lexical_forms() {
        assert!(Datatype::Duration.parse_value("P1Y2M3DT4H5M6.5S").is_ok());
        assert!(Datatype::Duration.parse_value("P").is_err());
        assert!(Datatype::Duration.parse_value("P1DT").is_err());
        assert!(Datatype::HexBinary.parse_value("0fA9").is_ok());
        assert!(Datatype::HexBinary.parse_value("abc").is_err());
        assert!(Datatype::Base64Binary.parse_value("aGk=").is_ok());
        assert!(Datatype::Base64Binary.parse_value("a===").is_err());
        assert!(Datatype::QName.parse_value("xsd:string").is_ok());
        assert!(Datatype::NcName.parse_value("a:b").is_err());
        assert_eq!(Datatype::Boolean.parse_value("1"), Ok(Value::Bool(true)));
        assert!(Datatype::Boolean.parse_value("yes").is_err());
    }
}

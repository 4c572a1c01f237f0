//! printf-style number formats with sexagesimal support
//!
//! Number elements declare how their value is rendered on the wire with a
//! C printf conversion (`%g`, `%6.2f`, `%d`, `%e`, `%x`). One extension is
//! supported: the `m` conversion renders an angle or hour value in
//! sexagesimal form. For `%<w>.<f>m` the precision `f` selects the
//! resolution:
//!
//! | f | output          | resolution     |
//! |---|-----------------|----------------|
//! | 3 | `d:mm`          | 1 minute       |
//! | 5 | `d:mm.m`        | 0.1 minute     |
//! | 6 | `d:mm:ss`       | 1 second       |
//! | 8 | `d:mm:ss.s`     | 0.1 second     |
//! | 9 | `d:mm:ss.ss`    | 0.01 second    |
//!
//! Any other precision falls back to whole minutes. The degree field is
//! right-aligned in `w - f` columns.
//!
//! Parsing accepts plain decimals as well as `d:m:s`, `d m s` or `d;m;s`
//! sexagesimal input. A `%x` format reads its own value as hexadecimal;
//! [`scan_number`], which has no format to go by, reads text as hex only
//! when it carries a `0x` prefix or a hex letter.

use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Decimal,
    Fixed,
    Exponent { upper: bool },
    General { upper: bool },
    Hex { upper: bool },
    Sexagesimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Flags {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
}

/// A parsed printf-style numeric format
#[derive(Debug, Clone, PartialEq)]
pub struct NumberFormat {
    spec: String,
    flags: Flags,
    width: usize,
    precision: Option<usize>,
    conversion: Conversion,
}

impl NumberFormat {
    /// Parse a format string such as `%g`, `%8.3f` or `%010.6m`
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || ModelError::InvalidFormat(spec.to_string());
        let trimmed = spec.trim();
        let mut chars = trimmed.strip_prefix('%').ok_or_else(invalid)?.chars().peekable();

        let mut flags = Flags::default();
        while let Some(&c) = chars.peek() {
            match c {
                '-' => flags.left = true,
                '0' => flags.zero = true,
                '+' => flags.plus = true,
                ' ' => flags.space = true,
                '#' => flags.alt = true,
                _ => break,
            }
            chars.next();
        }

        let mut width = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p * 10 + d as usize;
                chars.next();
            }
            precision = Some(p);
        }

        // Length modifiers carry no meaning for a double
        while matches!(chars.peek(), Some('l') | Some('h') | Some('L')) {
            chars.next();
        }

        let conversion = match chars.next().ok_or_else(invalid)? {
            'd' | 'i' | 'u' => Conversion::Decimal,
            'f' | 'F' => Conversion::Fixed,
            'e' => Conversion::Exponent { upper: false },
            'E' => Conversion::Exponent { upper: true },
            'g' => Conversion::General { upper: false },
            'G' => Conversion::General { upper: true },
            'x' => Conversion::Hex { upper: false },
            'X' => Conversion::Hex { upper: true },
            'm' => Conversion::Sexagesimal,
            _ => return Err(invalid()),
        };

        if chars.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            spec: trimmed.to_string(),
            flags,
            width,
            precision,
            conversion,
        })
    }

    /// The original format string
    pub fn as_str(&self) -> &str {
        &self.spec
    }

    /// Whether this is a sexagesimal (`m`) conversion
    pub fn is_sexagesimal(&self) -> bool {
        self.conversion == Conversion::Sexagesimal
    }

    /// Smallest distinguishable step of a sexagesimal format, in units
    ///
    /// Returns `None` for ordinary conversions.
    pub fn resolution(&self) -> Option<f64> {
        self.is_sexagesimal()
            .then(|| 1.0 / sexagesimal_base(self.precision.unwrap_or(6)) as f64)
    }

    /// Render a value according to this format
    pub fn format(&self, value: f64) -> String {
        if !value.is_finite() {
            return self.pad(String::new(), non_finite(value, self.conversion));
        }

        let body = match self.conversion {
            Conversion::Decimal => format!("{}", value.round() as i64),
            Conversion::Fixed => format!("{:.*}", self.precision.unwrap_or(6), value),
            Conversion::Exponent { upper } => {
                let s = c_exponent(value, self.precision.unwrap_or(6));
                if upper {
                    s.to_uppercase()
                } else {
                    s
                }
            }
            Conversion::General { upper } => {
                let s = c_general(value, self.precision.unwrap_or(6), self.flags.alt);
                if upper {
                    s.to_uppercase()
                } else {
                    s
                }
            }
            Conversion::Hex { upper } => {
                let n = value.round() as i64;
                let digits = if upper {
                    format!("{:X}", n.unsigned_abs())
                } else {
                    format!("{:x}", n.unsigned_abs())
                };
                let prefix = match (self.flags.alt && n != 0, upper) {
                    (false, _) => "",
                    (true, false) => "0x",
                    (true, true) => "0X",
                };
                let sign = if n < 0 { "-" } else { "" };
                format!("{sign}{prefix}{digits}")
            }
            Conversion::Sexagesimal => {
                let frac = self.precision.unwrap_or(6);
                format_sexagesimal(value, self.width.saturating_sub(frac), frac)
            }
        };

        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest.to_string()),
            None if self.flags.plus => ("+", body),
            None if self.flags.space => (" ", body),
            None => ("", body),
        };
        self.pad(sign.to_string(), digits)
    }

    /// Parse text produced by this format back into a value
    ///
    /// Formats other than `%x` also accept decimal and sexagesimal text in
    /// any of the other notations.
    pub fn parse_value(&self, text: &str) -> Result<f64> {
        match self.conversion {
            Conversion::Hex { .. } => scan_hex(text).or_else(|_| scan_number(text)),
            _ => scan_number(text),
        }
    }

    fn pad(&self, sign: String, digits: String) -> String {
        let len = sign.chars().count() + digits.chars().count();
        if len >= self.width {
            return format!("{sign}{digits}");
        }
        let fill = self.width - len;
        if self.flags.left {
            format!("{sign}{digits}{}", " ".repeat(fill))
        } else if self.flags.zero && digits.chars().all(|c| c.is_ascii_hexdigit() || ".eE+-".contains(c)) {
            format!("{sign}{}{digits}", "0".repeat(fill))
        } else {
            format!("{}{sign}{digits}", " ".repeat(fill))
        }
    }
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self {
            spec: "%g".to_string(),
            flags: Flags::default(),
            width: 0,
            precision: None,
            conversion: Conversion::General { upper: false },
        }
    }
}

impl FromStr for NumberFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for NumberFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

// ============================================================================
// Scanning
// ============================================================================

fn invalid_number(text: &str) -> ModelError {
    ModelError::InvalidValue {
        kind: crate::state::PropertyKind::Number,
        value: text.to_string(),
    }
}

/// Read a hexadecimal integer with optional sign and `0x` prefix
pub fn scan_hex(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
        .unwrap_or(rest);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid_number(text));
    }
    let n = i64::from_str_radix(digits, 16).map_err(|_| invalid_number(text))?;
    Ok(if negative { -(n as f64) } else { n as f64 })
}

/// Read a number whose format is unknown
///
/// Decimal notation wins. Text with a `0x` prefix or a hex letter is read
/// as hexadecimal, anything else as sexagesimal.
pub fn scan_number(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Ok(v);
    }
    let unsigned = trimmed.trim_start_matches(|c: char| c == '-' || c == '+');
    let looks_hex = unsigned.starts_with("0x")
        || unsigned.starts_with("0X")
        || (!unsigned.is_empty()
            && unsigned.chars().all(|c| c.is_ascii_hexdigit())
            && unsigned.chars().any(|c| c.is_ascii_alphabetic()));
    if looks_hex {
        scan_hex(text)
    } else {
        scan_sexagesimal(text)
    }
}

// ============================================================================
// Sexagesimal
// ============================================================================

fn sexagesimal_base(frac: usize) -> u64 {
    match frac {
        9 => 360_000,
        8 => 36_000,
        6 => 3_600,
        5 => 600,
        _ => 60,
    }
}

/// Render `value` as `d:mm[:ss[.s]]` with the degree field in `width` columns
pub fn format_sexagesimal(value: f64, width: usize, frac: usize) -> String {
    let base = sexagesimal_base(frac);
    let negative = value < 0.0;
    let n = (value.abs() * base as f64 + 0.5) as u64;
    let whole = n / base;
    let f = n % base;

    let degrees = if negative {
        format!("-{whole}")
    } else {
        whole.to_string()
    };
    let mut out = format!("{degrees:>width$}");

    match base {
        60 => out.push_str(&format!(":{:02}", f)),
        600 => out.push_str(&format!(":{:02}.{:1}", f / 10, f % 10)),
        3_600 => out.push_str(&format!(":{:02}:{:02}", f / 60, f % 60)),
        36_000 => out.push_str(&format!(
            ":{:02}:{:02}.{:1}",
            f / 600,
            (f / 10) % 60,
            f % 10
        )),
        _ => out.push_str(&format!(
            ":{:02}:{:02}.{:02}",
            f / 6_000,
            (f / 100) % 60,
            f % 100
        )),
    }
    out
}

/// Parse a decimal or sexagesimal string
///
/// A `-` anywhere in the input makes the whole value negative, so both
/// `-0:30:00` and `-12.5` work. Up to three numeric fields separated by any
/// non-numeric characters are read as degrees, minutes and seconds.
pub fn scan_sexagesimal(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Ok(v);
    }

    let invalid = || invalid_number(text);

    let negative = trimmed.contains('-');
    let fields: Vec<&str> = trimmed
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|s| !s.is_empty())
        .collect();

    if fields.is_empty() || fields.len() > 3 {
        return Err(invalid());
    }

    let mut value = 0.0;
    let mut scale = 1.0;
    for field in fields {
        let part: f64 = field.parse().map_err(|_| invalid())?;
        value += part / scale;
        scale *= 60.0;
    }

    Ok(if negative { -value } else { value })
}

// ============================================================================
// C-compatible exponent and general conversions
// ============================================================================

fn non_finite(value: f64, conversion: Conversion) -> String {
    let s = if value.is_nan() {
        "nan"
    } else if value > 0.0 {
        "inf"
    } else {
        "-inf"
    };
    match conversion {
        Conversion::Exponent { upper: true } | Conversion::General { upper: true } => {
            s.to_uppercase()
        }
        _ => s.to_string(),
    }
}

/// Split Rust's `{:e}` output into mantissa and exponent
fn split_exponent(s: &str) -> (&str, i32) {
    match s.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse().unwrap_or(0)),
        None => (s, 0),
    }
}

fn c_exponent(value: f64, precision: usize) -> String {
    let s = format!("{:.*e}", precision, value);
    let (mantissa, exp) = split_exponent(&s);
    join_exponent(mantissa, exp)
}

fn join_exponent(mantissa: &str, exp: i32) -> String {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

fn strip_trailing_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn c_general(value: f64, precision: usize, alt: bool) -> String {
    let p = precision.max(1);

    let exp = if value == 0.0 {
        0
    } else {
        let s = format!("{:.*e}", p - 1, value);
        split_exponent(&s).1
    };

    if exp < -4 || exp >= p as i32 {
        let s = format!("{:.*e}", p - 1, value);
        let (mantissa, exp) = split_exponent(&s);
        let mantissa = if alt { mantissa } else { strip_trailing_zeros(mantissa) };
        join_exponent(mantissa, exp)
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let s = format!("{:.*}", decimals, value);
        if alt {
            s
        } else {
            strip_trailing_zeros(&s).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("%g", 20.0, "20")]
    #[case("%g", 18.5, "18.5")]
    #[case("%g", 0.0001, "0.0001")]
    #[case("%g", 0.00001, "1e-05")]
    #[case("%g", 1234567.0, "1.23457e+06")]
    #[case("%6.2f", 3.14159, "  3.14")]
    #[case("%-6.1f", 2.26, "2.3   ")]
    #[case("%06.2f", -1.5, "-01.50")]
    #[case("%+.1f", 1.0, "+1.0")]
    #[case("%d", 41.6, "42")]
    #[case("%5d", -3.0, "   -3")]
    #[case("%.3e", 12345.678, "1.235e+04")]
    #[case("%E", 0.5, "5.000000E-01")]
    #[case("%x", 255.0, "ff")]
    #[case("%X", 255.0, "FF")]
    #[case("%#x", 255.0, "0xff")]
    #[case("%x", -16.0, "-10")]
    fn test_printf_conversions(#[case] spec: &str, #[case] value: f64, #[case] expected: &str) {
        let format = NumberFormat::parse(spec).unwrap();
        assert_eq!(format.format(value), expected);
    }

    #[rstest]
    #[case("%010.6m", 12.5, "  12:30:00")]
    #[case("%010.6m", -0.5, "  -0:30:00")]
    #[case("%9.6m", 359.999, "359:59:56")]
    #[case("%.3m", 1.5, "1:30")]
    #[case("%6.5m", 2.755, "2:45.3")]
    #[case("%8.8m", 1.2345, "1:14:04.2")]
    #[case("%11.9m", -23.4567, "-23:27:24.12")]
    fn test_sexagesimal_format(#[case] spec: &str, #[case] value: f64, #[case] expected: &str) {
        let format = NumberFormat::parse(spec).unwrap();
        assert!(format.is_sexagesimal());
        assert_eq!(format.format(value), expected);
    }

    #[rstest]
    #[case("%x", 255.0)]
    #[case("%X", 4096.0)]
    #[case("%#x", 16.0)]
    #[case("%x", -16.0)]
    #[case("%x", 0.0)]
    #[case("%6.2f", -12.25)]
    #[case("%g", 18.5)]
    #[case("%d", 42.0)]
    #[case("%010.6m", 12.5)]
    fn test_value_survives_its_own_format(#[case] spec: &str, #[case] value: f64) {
        let format = NumberFormat::parse(spec).unwrap();
        let text = format.format(value);
        let back = format.parse_value(&text).unwrap();
        assert!((back - value).abs() < 1e-9, "{spec}: {value} -> {text:?} -> {back}");
    }

    #[rstest]
    #[case("ff", 255.0)]
    #[case("0x10", 16.0)]
    #[case("-0X1F", -31.0)]
    #[case("10", 10.0)]
    #[case("1e3", 1000.0)]
    #[case("12:30", 12.5)]
    fn test_scan_number_without_format(#[case] text: &str, #[case] expected: f64) {
        assert_eq!(scan_number(text).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("0x")]
    #[case("fg")]
    fn test_scan_hex_rejects_garbage(#[case] text: &str) {
        assert!(scan_hex(text).is_err());
    }

    #[rstest]
    #[case("12:30:00", 12.5)]
    #[case("-0:30:00", -0.5)]
    #[case("12 30", 12.5)]
    #[case("12;30;36", 12.51)]
    #[case("  -12.25 ", -12.25)]
    #[case("1e-3", 0.001)]
    fn test_scan_sexagesimal(#[case] text: &str, #[case] expected: f64) {
        let value = scan_sexagesimal(text).unwrap();
        assert!((value - expected).abs() < 1e-9, "{text} -> {value}");
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("1:2:3:4")]
    fn test_scan_rejects_garbage(#[case] text: &str) {
        assert!(scan_sexagesimal(text).is_err());
    }

    #[rstest]
    #[case("g")]
    #[case("%")]
    #[case("%q")]
    #[case("%6.2f degrees")]
    fn test_invalid_formats(#[case] spec: &str) {
        assert_eq!(
            NumberFormat::parse(spec),
            Err(ModelError::InvalidFormat(spec.to_string()))
        );
    }

    #[test]
    fn test_length_modifier_is_ignored() {
        let format = NumberFormat::parse("%.2lf").unwrap();
        assert_eq!(format.format(1.0), "1.00");
    }

    #[test]
    fn test_resolution() {
        assert_eq!(NumberFormat::parse("%g").unwrap().resolution(), None);
        let res = NumberFormat::parse("%10.6m").unwrap().resolution().unwrap();
        assert!((res - 1.0 / 3600.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_sexagesimal_round_trip(
            value in -360.0f64..360.0,
            frac in prop::sample::select(vec![3usize, 5, 6, 8, 9]),
        ) {
            let format = NumberFormat::parse(&format!("%12.{frac}m")).unwrap();
            let text = format.format(value);
            let parsed = format.parse_value(&text).unwrap();
            let tolerance = format.resolution().unwrap() / 2.0 + 1e-9;
            prop_assert!((parsed - value).abs() <= tolerance, "{} -> {} -> {}", value, text, parsed);
        }
    }
}

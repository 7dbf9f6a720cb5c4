//! Parsing of `token; key=value; key="value"` style header values, as found
//! in `Content-Type` and `Content-Disposition`.

use crate::constants::{hex_value, BACKSLASH, EQUALS, QUOTE, SEMICOLON};
use std::collections::HashMap;

/// Parses a header value into its main value and a map of parameters.
///
/// The main value and parameter names are lowercased and stripped; parameter
/// values keep their original bytes. Quoted strings may escape `\` and `"`
/// with a backslash; an unterminated quoted string runs to the end of the
/// input. RFC 2231 extended parameters (`name*=charset''pct-encoded`) and
/// continuations (`name*0=`, `name*1*=`, ...) are decoded and reassembled,
/// yielding raw bytes in the declared charset — transcoding is up to the
/// caller. Duplicate parameter names keep the last value seen.
///
/// Windows-style paths in `filename=` are returned verbatim; stripping the
/// directory part is the consumer's job.
///
/// # Examples
///
/// ```
/// use multiform::parse_options_header;
///
/// let (main, params) = parse_options_header(b"multipart/form-data; boundary=AaB03x");
/// assert_eq!(main, b"multipart/form-data");
/// assert_eq!(params[b"boundary".as_slice()], b"AaB03x");
/// ```
pub fn parse_options_header(value: &[u8]) -> (Vec<u8>, HashMap<Vec<u8>, Vec<u8>>) {
    let mut options = HashMap::new();
    let value = trim(value);
    if value.is_empty() {
        return (Vec::new(), options);
    }

    let mut segments = split_segments(value);
    let main_value = trim(segments.remove(0)).to_ascii_lowercase();

    // RFC 2231 continuations are collected first and reassembled by index
    // once every segment has been seen.
    let mut continuations: HashMap<Vec<u8>, Vec<(usize, Vec<u8>)>> = HashMap::new();

    for segment in segments {
        let segment = trim(segment);
        let eq = match memchr::memchr(EQUALS, segment) {
            Some(eq) => eq,
            None => continue,
        };
        let name = trim(&segment[..eq]).to_ascii_lowercase();
        let raw_value = trim(&segment[eq + 1..]);
        if name.is_empty() {
            continue;
        }

        match classify(&name) {
            ParamName::Plain => {
                options.insert(name, unquote(raw_value));
            }
            ParamName::Extended(base) => {
                options.insert(base, decode_extended(raw_value, true));
            }
            ParamName::Continuation {
                base,
                index,
                extended,
            } => {
                let decoded = if extended {
                    // Only the first segment carries the charset'lang' prefix.
                    decode_extended(raw_value, index == 0)
                } else {
                    unquote(raw_value)
                };
                continuations.entry(base).or_default().push((index, decoded));
            }
        }
    }

    for (base, mut parts) in continuations {
        parts.sort_by_key(|(index, _)| *index);
        let mut assembled = Vec::new();
        for (_, part) in parts {
            assembled.extend_from_slice(&part);
        }
        options.insert(base, assembled);
    }

    (main_value, options)
}

enum ParamName {
    Plain,
    Extended(Vec<u8>),
    Continuation {
        base: Vec<u8>,
        index: usize,
        extended: bool,
    },
}

fn classify(name: &[u8]) -> ParamName {
    let (stem, extended) = match name.last() {
        Some(&b'*') => (&name[..name.len() - 1], true),
        _ => (name, false),
    };

    if let Some(star) = memchr::memrchr(b'*', stem) {
        let digits = &stem[star + 1..];
        if !digits.is_empty() && digits.iter().all(u8::is_ascii_digit) {
            let index = digits.iter().fold(0usize, |acc, &d| {
                acc.saturating_mul(10).saturating_add((d - b'0') as usize)
            });
            return ParamName::Continuation {
                base: stem[..star].to_vec(),
                index,
                extended,
            };
        }
    }

    if extended && !stem.is_empty() {
        ParamName::Extended(stem.to_vec())
    } else {
        ParamName::Plain
    }
}

// Splits on top-level semicolons; semicolons inside double quotes do not
// separate, and a backslash escapes the next byte inside quotes.
fn split_segments(value: &[u8]) -> Vec<&[u8]> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, &b) in value.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        if in_quotes {
            match b {
                BACKSLASH => escaped = true,
                QUOTE => in_quotes = false,
                _ => {}
            }
        } else {
            match b {
                QUOTE => in_quotes = true,
                SEMICOLON => {
                    segments.push(&value[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
    }

    segments.push(&value[start..]);
    segments
}

fn unquote(value: &[u8]) -> Vec<u8> {
    if value.first() != Some(&QUOTE) {
        return value.to_vec();
    }

    let inner = if value.len() >= 2 && value.last() == Some(&QUOTE) {
        &value[1..value.len() - 1]
    } else {
        // Unterminated quoted string, take everything to the end.
        &value[1..]
    };

    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] == BACKSLASH
            && i + 1 < inner.len()
            && (inner[i + 1] == BACKSLASH || inner[i + 1] == QUOTE)
        {
            out.push(inner[i + 1]);
            i += 2;
        } else {
            out.push(inner[i]);
            i += 1;
        }
    }
    out
}

fn decode_extended(value: &[u8], with_charset: bool) -> Vec<u8> {
    let mut rest = value;
    if with_charset {
        // charset'lang'pct-encoded; keep the whole value if the prefix is
        // missing.
        if let Some(first) = memchr::memchr(b'\'', rest) {
            if let Some(second) = memchr::memchr(b'\'', &rest[first + 1..]) {
                rest = &rest[first + 1 + second + 1..];
            }
        }
    }
    percent_decode(rest)
}

fn percent_decode(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let mut i = 0;
    while i < value.len() {
        if value[i] == b'%' && i + 2 < value.len() {
            if let (Some(hi), Some(lo)) = (hex_value(value[i + 1]), hex_value(value[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(value[i]);
        i += 1;
    }
    out
}

fn trim(mut value: &[u8]) -> &[u8] {
    while let Some((first, rest)) = value.split_first() {
        if *first == b' ' || *first == b'\t' {
            value = rest;
        } else {
            break;
        }
    }
    while let Some((last, rest)) = value.split_last() {
        if *last == b' ' || *last == b'\t' {
            value = rest;
        } else {
            break;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param<'m>(params: &'m HashMap<Vec<u8>, Vec<u8>>, name: &str) -> &'m [u8] {
        params
            .get(name.as_bytes())
            .unwrap_or_else(|| panic!("missing param {name:?}"))
    }

    #[test]
    fn test_no_options() {
        let (main, params) = parse_options_header(b"Text/Plain ");
        assert_eq!(main, b"text/plain");
        assert!(params.is_empty());
    }

    #[test]
    fn test_empty_value() {
        let (main, params) = parse_options_header(b"");
        assert!(main.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_basic_params() {
        let (main, params) =
            parse_options_header(b"multipart/form-data; boundary=AaB03x; charset=utf-8");
        assert_eq!(main, b"multipart/form-data");
        assert_eq!(param(&params, "boundary"), b"AaB03x");
        assert_eq!(param(&params, "charset"), b"utf-8");
    }

    #[test]
    fn test_names_lowercased_values_kept() {
        let (main, params) = parse_options_header(b"Form-Data; NAME=MixedCase");
        assert_eq!(main, b"form-data");
        assert_eq!(param(&params, "name"), b"MixedCase");
    }

    #[test]
    fn test_quoted_string_with_semicolon() {
        let (_, params) = parse_options_header(br#"form-data; name="a;b"; extra=1"#);
        assert_eq!(param(&params, "name"), b"a;b");
        assert_eq!(param(&params, "extra"), b"1");
    }

    #[test]
    fn test_quoted_string_escapes() {
        let (_, params) = parse_options_header(br#"form-data; name="a\"b\\c""#);
        assert_eq!(param(&params, "name"), br#"a"b\c"#);
    }

    #[test]
    fn test_unterminated_quote_runs_to_end() {
        let (_, params) = parse_options_header(br#"form-data; name="unterminated"#);
        assert_eq!(param(&params, "name"), b"unterminated");
    }

    #[test]
    fn test_ie_full_path_returned_verbatim() {
        let (_, params) =
            parse_options_header(br#"form-data; name="file"; filename="C:\foo\bar.txt""#);
        assert_eq!(param(&params, "filename"), br"C:\foo\bar.txt");
    }

    #[test]
    fn test_rfc2231_extended_value() {
        let (main, params) = parse_options_header(
            b"form-data; name=\"file\"; filename*=UTF-8''r%C3%A9sum%C3%A9.txt",
        );
        assert_eq!(main, b"form-data");
        assert_eq!(param(&params, "name"), b"file");
        assert_eq!(param(&params, "filename"), "r\u{e9}sum\u{e9}.txt".as_bytes());
    }

    #[test]
    fn test_rfc2231_continuations() {
        let (_, params) = parse_options_header(
            b"attachment; filename*1=\"half.txt\"; filename*0=\"second-\"",
        );
        assert_eq!(param(&params, "filename"), b"second-half.txt");
    }

    #[test]
    fn test_rfc2231_extended_continuations() {
        let (_, params) = parse_options_header(
            b"attachment; filename*0*=UTF-8''a%20b; filename*1*=%20c",
        );
        assert_eq!(param(&params, "filename"), b"a b c");
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let (_, params) = parse_options_header(b"form-data; name=first; name=second");
        assert_eq!(param(&params, "name"), b"second");
    }

    #[test]
    fn test_missing_equals_segment_skipped() {
        let (_, params) = parse_options_header(b"form-data; lonely; name=x");
        assert!(!params.contains_key(b"lonely".as_slice()));
        assert_eq!(param(&params, "name"), b"x");
    }
}

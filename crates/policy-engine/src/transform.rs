//! String normalization applied to resolved values before comparison.
//!
//! A transform that cannot decode its input never fails the evaluation: the
//! pre-transform value is kept and a decode-failure note is recorded.

use std::borrow::Cow;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use percent_encoding::percent_decode;
use serde_json::Value;
use thiserror::Error;

use crate::schema::Transform;
use crate::trace::EvalScope;

/// Standard alphabet, accepting input with or without `=` padding.
const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Longest entity body (between `&` and `;`) we try to interpret.
const MAX_ENTITY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("invalid percent escape at byte {0}")]
    PercentEscape(usize),
    #[error("decoded bytes are not valid UTF-8")]
    Utf8,
    #[error("malformed html entity at byte {0}")]
    HtmlEntity(usize),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Run `transforms` over `value` in order.
///
/// Non-string values pass through untouched, as does everything when the
/// transform list is empty.
pub(crate) fn apply<'v>(
    value: &'v Value,
    transforms: &[Transform],
    field: &str,
    scope: &mut EvalScope<'_>,
) -> Cow<'v, Value> {
    let input = match value {
        Value::String(s) if !transforms.is_empty() => s,
        _ => return Cow::Borrowed(value),
    };

    let mut current = input.clone();
    for &transform in transforms {
        match apply_one(transform, &current) {
            Ok(next) => current = next,
            Err(err) => scope.decode_failure(field, transform, err.to_string()),
        }
    }
    Cow::Owned(Value::String(current))
}

/// Apply a single transform to a string.
pub fn apply_one(transform: Transform, input: &str) -> Result<String, DecodeError> {
    match transform {
        Transform::Lowercase => Ok(input.to_lowercase()),
        Transform::UrlDecode => url_decode(input),
        Transform::HtmlEntityDecode => html_entity_decode(input),
        Transform::Base64Decode => base64_decode(input),
    }
}

fn url_decode(input: &str) -> Result<String, DecodeError> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(DecodeError::PercentEscape(i));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    let spaced = input.replace('+', " ");
    percent_decode(spaced.as_bytes())
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|_| DecodeError::Utf8)
}

fn html_entity_decode(input: &str) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut offset = 0;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let at = offset + amp;

        let starts_entity = after
            .chars()
            .next()
            .is_some_and(|c| c == '#' || c.is_ascii_alphabetic());
        if !starts_entity {
            out.push('&');
            rest = after;
            offset = at + 1;
            continue;
        }

        let end = after
            .char_indices()
            .take(MAX_ENTITY_LEN + 1)
            .find(|&(_, c)| c == ';')
            .map(|(idx, _)| idx)
            .ok_or(DecodeError::HtmlEntity(at))?;
        let body = &after[..end];
        let decoded = decode_entity(body).ok_or(DecodeError::HtmlEntity(at))?;
        out.push(decoded);

        rest = &after[end + 1..];
        offset = at + 1 + end + 1;
    }
    out.push_str(rest);
    Ok(out)
}

fn decode_entity(body: &str) -> Option<char> {
    if let Some(num) = body.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    match body {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => None,
    }
}

fn base64_decode(input: &str) -> Result<String, DecodeError> {
    let bytes = BASE64_LENIENT.decode(input.trim())?;
    String::from_utf8(bytes).map_err(|_| DecodeError::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_folds_case() {
        assert_eq!(apply_one(Transform::Lowercase, "/ADMIN").unwrap(), "/admin");
    }

    #[test]
    fn url_decode_handles_escapes_and_plus() {
        assert_eq!(apply_one(Transform::UrlDecode, "/ADM%49N").unwrap(), "/ADMIN");
        assert_eq!(apply_one(Transform::UrlDecode, "a+b%20c").unwrap(), "a b c");
        assert_eq!(
            apply_one(Transform::UrlDecode, "%3Cscript%3E").unwrap(),
            "<script>"
        );
    }

    #[test]
    fn url_decode_rejects_malformed_escape() {
        assert_eq!(
            apply_one(Transform::UrlDecode, "/admin%ZZ"),
            Err(DecodeError::PercentEscape(6))
        );
        assert!(apply_one(Transform::UrlDecode, "trailing%4").is_err());
        assert!(apply_one(Transform::UrlDecode, "%").is_err());
    }

    #[test]
    fn url_decode_rejects_invalid_utf8() {
        assert_eq!(apply_one(Transform::UrlDecode, "%FF%FE"), Err(DecodeError::Utf8));
    }

    #[test]
    fn html_entities_decode() {
        assert_eq!(
            apply_one(Transform::HtmlEntityDecode, "&lt;script&gt;alert(&quot;x&quot;)").unwrap(),
            "<script>alert(\"x\")"
        );
        assert_eq!(
            apply_one(Transform::HtmlEntityDecode, "&#60;&#x3E;&#X41;").unwrap(),
            "<>A"
        );
    }

    #[test]
    fn bare_ampersand_is_literal() {
        assert_eq!(
            apply_one(Transform::HtmlEntityDecode, "fish & chips &").unwrap(),
            "fish & chips &"
        );
    }

    #[test]
    fn html_entity_failures() {
        assert!(apply_one(Transform::HtmlEntityDecode, "&bogus;").is_err());
        assert!(apply_one(Transform::HtmlEntityDecode, "&lt no semicolon").is_err());
        assert!(apply_one(Transform::HtmlEntityDecode, "&#xZZ;").is_err());
        assert!(apply_one(Transform::HtmlEntityDecode, "&#1114112;").is_err());
    }

    #[test]
    fn base64_with_and_without_padding() {
        assert_eq!(apply_one(Transform::Base64Decode, "YWRtaW4=").unwrap(), "admin");
        assert_eq!(apply_one(Transform::Base64Decode, "YWRtaW4").unwrap(), "admin");
    }

    #[test]
    fn base64_failures() {
        assert!(matches!(
            apply_one(Transform::Base64Decode, "not base64!!"),
            Err(DecodeError::Base64(_))
        ));
        // 0xFF 0xFE is valid base64 but not UTF-8.
        assert_eq!(apply_one(Transform::Base64Decode, "//4="), Err(DecodeError::Utf8));
    }
}

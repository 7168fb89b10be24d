// SPDX-License-Identifier: GPL-2.0-or-later

//! Segment-template token validation, shared by the `ts` and `fmp4`
//! segmenters. Rules per spec.md §6:
//! - must contain `$Number$` or `$Time$` but not both.
//! - `$RepresentationID$` is forwarded verbatim.
//! - `$Number%0Nd$` width specifiers must parse as a positive integer.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template must contain $Number$ or $Time$")]
    MissingToken,

    #[error("template must not contain both $Number$ and $Time$")]
    BothTokens,

    #[error("invalid $Number%0Nd$ width specifier: '{0}'")]
    InvalidWidth(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumberToken {
    Plain,
    Width(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentToken {
    Number(NumberToken),
    Time,
}

/// Validates a segment template and reports which numbering token it uses.
pub fn validate(template: &str) -> Result<SegmentToken, TemplateError> {
    let has_time = template.contains("$Time$");
    let number_token = find_number_token(template)?;

    match (number_token, has_time) {
        (Some(_), true) => Err(TemplateError::BothTokens),
        (None, false) => Err(TemplateError::MissingToken),
        (Some(n), false) => Ok(SegmentToken::Number(n)),
        (None, true) => Ok(SegmentToken::Time),
    }
}

fn find_number_token(template: &str) -> Result<Option<NumberToken>, TemplateError> {
    if template.contains("$Number$") {
        return Ok(Some(NumberToken::Plain));
    }
    let Some(start) = template.find("$Number%0") else {
        return Ok(None);
    };
    let rest = &template[start + "$Number%0".len()..];
    let Some(end) = rest.find("d$") else {
        return Err(TemplateError::InvalidWidth(template.to_owned()));
    };
    let width_str = &rest[..end];
    let width: u32 = width_str
        .parse()
        .map_err(|_| TemplateError::InvalidWidth(template.to_owned()))?;
    if width == 0 {
        return Err(TemplateError::InvalidWidth(template.to_owned()));
    }
    Ok(Some(NumberToken::Width(width)))
}

/// Expands a validated template for one segment. `$RepresentationID$` is
/// forwarded verbatim by the caller (not resolved here); this only fills in
/// the numbering token.
#[must_use]
pub fn expand(template: &str, token: SegmentToken, number: u64, time: i64) -> String {
    match token {
        SegmentToken::Number(NumberToken::Plain) => {
            template.replace("$Number$", &number.to_string())
        }
        SegmentToken::Number(NumberToken::Width(w)) => {
            let needle_start = template.find("$Number%0").unwrap_or(0);
            let Some(tail) = template.find("d$") else {
                return template.to_owned();
            };
            let prefix = &template[..needle_start];
            let suffix = &template[tail + 2..];
            #[allow(clippy::as_conversions)]
            format!("{prefix}{number:0width$}{suffix}", width = w as usize)
        }
        SegmentToken::Time => template.replace("$Time$", &time.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_number() {
        assert_eq!(
            Ok(SegmentToken::Number(NumberToken::Plain)),
            validate("seg-$Number$.ts")
        );
    }

    #[test]
    fn test_validate_time() {
        assert_eq!(Ok(SegmentToken::Time), validate("seg-$Time$.ts"));
    }

    #[test]
    fn test_validate_width() {
        assert_eq!(
            Ok(SegmentToken::Number(NumberToken::Width(5))),
            validate("seg-$Number%05d$.ts")
        );
    }

    #[test]
    fn test_validate_missing() {
        assert_eq!(Err(TemplateError::MissingToken), validate("seg.ts"));
    }

    #[test]
    fn test_validate_both() {
        assert_eq!(
            Err(TemplateError::BothTokens),
            validate("seg-$Number$-$Time$.ts")
        );
    }

    #[test]
    fn test_expand_number() {
        let t = validate("seg-$Number$.ts").unwrap();
        assert_eq!("seg-7.ts", expand("seg-$Number$.ts", t, 7, 0));
    }

    #[test]
    fn test_expand_width() {
        let t = validate("seg-$Number%05d$.ts").unwrap();
        assert_eq!("seg-00007.ts", expand("seg-$Number%05d$.ts", t, 7, 0));
    }

    #[test]
    fn test_expand_time() {
        let t = validate("seg-$Time$.ts").unwrap();
        assert_eq!("seg-12345.ts", expand("seg-$Time$.ts", t, 0, 12345));
    }

    #[test]
    fn test_representation_id_forwarded() {
        // Not resolved by `expand`; only the numbering token is filled in.
        let t = validate("$RepresentationID$/seg-$Number$.ts").unwrap();
        assert_eq!(
            "$RepresentationID$/seg-7.ts",
            expand("$RepresentationID$/seg-$Number$.ts", t, 7, 0)
        );
    }
}

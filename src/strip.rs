//! The line-oriented whitespace preprocessor that runs before lexing.

use crate::node::StripMode;

/// Returns whether a stripped line consists of exactly one "removable
/// marker": `{{#`, `{{/`, `{{>`, or `{{!`, and nothing else but the closing
/// `}}`.
fn is_removable_marker(line: &[u8]) -> bool {
    line.starts_with(b"{{")
        && matches!(line.get(2), Some(b'#') | Some(b'/') | Some(b'>') | Some(b'!'))
        && line.len() >= 4
        && line.ends_with(b"}}")
}

/// Applies `mode` to `source`, returning the stripped bytes.
///
/// The output is never larger than the input, so callers may preallocate a
/// buffer sized to `source.len()`.
pub fn strip(source: &[u8], mode: StripMode) -> Vec<u8> {
    match mode {
        StripMode::DoNotStrip => source.to_vec(),
        StripMode::StripWhitespace => strip_whitespace(source),
        StripMode::StripBlankLines => strip_blank_lines(source),
    }
}

fn split_lines(source: &[u8]) -> impl Iterator<Item = (&[u8], bool)> {
    let mut rest = source;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match memchr::memchr(b'\n', rest) {
            Some(pos) => {
                let (line, tail) = rest.split_at(pos + 1);
                rest = tail;
                Some((&line[..line.len() - 1], true))
            }
            None => {
                let line = rest;
                rest = &[];
                Some((line, false))
            }
        }
    })
}

fn strip_whitespace(source: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(source.len());
    for (line, _had_newline) in split_lines(source) {
        let trimmed = trim_ascii_whitespace(line);
        out.extend_from_slice(trimmed);
    }
    out
}

fn strip_blank_lines(source: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(source.len());
    for (line, had_newline) in split_lines(source) {
        let trimmed = trim_ascii_whitespace(line);
        let drop = trimmed.is_empty() || is_removable_marker(trimmed);
        if drop {
            continue;
        }
        out.extend_from_slice(line);
        if had_newline {
            out.push(b'\n');
        }
    }
    out
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn do_not_strip_is_identity() {
        let src = b"  a  \n\tb\t\n";
        assert_eq!(strip(src, StripMode::DoNotStrip), src);
    }

    #[test]
    fn strip_whitespace_trims_and_drops_newlines() {
        let src = b"  hello  \n  world  ";
        assert_eq!(strip(src, StripMode::StripWhitespace), b"helloworld");
    }

    #[test]
    fn strip_blank_lines_drops_blank_and_marker_only_lines() {
        let src = b"a\n\n  \n{{#SEC}}\nb\n{{/SEC}}\nc";
        assert_eq!(strip(src, StripMode::StripBlankLines), b"a\nb\nc");
    }

    #[test]
    fn strip_blank_lines_keeps_lines_with_marker_plus_other_text() {
        let src = b"{{#SEC}} trailing\n";
        assert_eq!(strip(src, StripMode::StripBlankLines), src);
    }

    #[test]
    fn strip_blank_lines_preserves_non_blank_newlines() {
        let src = b"a\nb";
        assert_eq!(strip(src, StripMode::StripBlankLines), b"a\nb");
    }
}

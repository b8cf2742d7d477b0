//! Splits stripped template source into a stream of tokens.

use crate::node::StripMode;

/// The kind of marker a token represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    /// Literal text between markers.
    Text,
    /// `{{NAME[:mods]}}`.
    Variable,
    /// `{{#NAME}}`.
    SectionStart,
    /// `{{/NAME}}`.
    SectionEnd,
    /// `{{>NAME[:mods]}}`.
    Include,
    /// `{{!...}}`.
    Comment,
    /// End of input, or a syntax error (see [`Lexer::had_error`]).
    Null,
}

/// An unresolved `:name[=value]` reference, exactly as written in the source.
#[derive(Clone)]
pub struct RawModifier {
    /// The text between `:` and the next `:`, `=`, or `}}`.
    pub name: String,
    /// The text after `=`, if any (not including the `=`).
    pub value: Option<String>,
    /// Byte offset of the modifier reference, for diagnostics.
    pub offset: usize,
}

/// One token produced by the lexer.
pub struct LexToken {
    /// The token's kind.
    pub kind: TokenKind,
    /// For `Text`: the literal bytes. For everything else: the identifier.
    pub text: std::ops::Range<usize>,
    /// Byte offset where this token's marker (or text run) begins.
    pub offset: usize,
    /// In-template modifiers, in source order. Always empty for
    /// `SectionStart`, `SectionEnd`, `Comment`, and `Null`.
    pub modifiers: Vec<RawModifier>,
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// A cursor over stripped template source, producing one token per call to
/// [`Lexer::next_token`].
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    strip: StripMode,
    /// Set the first time a syntax error is encountered; once set, every
    /// subsequent `next_token` call returns a `Null` token with no further
    /// scanning, matching the "truncate the remaining input" error rule.
    had_error: bool,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over already-stripped `source`.
    pub fn new(source: &'a [u8], strip: StripMode) -> Self {
        Lexer { source, pos: 0, strip, had_error: false }
    }

    /// Whether the last-returned `Null` token was a syntax error rather than
    /// a clean end-of-input.
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    /// The full source buffer tokens' `text` ranges are indices into.
    pub fn source_bytes(&self) -> &'a [u8] {
        self.source
    }

    fn fail(&mut self, offset: usize) -> LexToken {
        self.had_error = true;
        self.pos = self.source.len();
        LexToken { kind: TokenKind::Null, text: offset..offset, offset, modifiers: Vec::new() }
    }

    /// Returns the next token, or a `Null`-kind token at end of input (check
    /// [`Self::had_error`] to distinguish a clean EOF from a syntax error).
    pub fn next_token(&mut self) -> LexToken {
        if self.had_error {
            return LexToken { kind: TokenKind::Null, text: self.pos..self.pos, offset: self.pos, modifiers: Vec::new() };
        }
        if self.pos >= self.source.len() {
            return LexToken { kind: TokenKind::Null, text: self.pos..self.pos, offset: self.pos, modifiers: Vec::new() };
        }
        self.getting_text()
    }

    fn getting_text(&mut self) -> LexToken {
        let start = self.pos;
        while self.pos < self.source.len() {
            if self.source[self.pos] == b'{' {
                let after = &self.source[self.pos..];
                if after.starts_with(b"{{") && after.get(2) != Some(&b'{') {
                    let text_end = self.pos;
                    self.pos += 2;
                    if text_end > start {
                        return LexToken { kind: TokenKind::Text, text: start..text_end, offset: start, modifiers: Vec::new() };
                    }
                    return self.getting_name();
                }
            }
            self.pos += 1;
        }
        // Ran out of input while scanning text: emit whatever text remains.
        LexToken { kind: TokenKind::Text, text: start..self.pos, offset: start, modifiers: Vec::new() }
    }

    fn getting_name(&mut self) -> LexToken {
        let marker_start = self.pos - 2;
        let (kind, sigil_len) = match self.source.get(self.pos) {
            Some(b'#') => (TokenKind::SectionStart, 1),
            Some(b'/') => (TokenKind::SectionEnd, 1),
            Some(b'>') => (TokenKind::Include, 1),
            Some(b'!') => (TokenKind::Comment, 1),
            Some(_) => (TokenKind::Variable, 0),
            None => return self.fail(marker_start),
        };
        self.pos += sigil_len;

        if kind == TokenKind::Comment {
            return self.lex_comment(marker_start);
        }

        let name_start = self.pos;
        while self.pos < self.source.len() && is_identifier_byte(self.source[self.pos]) {
            self.pos += 1;
        }
        if self.pos == name_start {
            return self.fail(marker_start);
        }
        let name_end = self.pos;

        let mut modifiers = Vec::new();
        loop {
            match self.source.get(self.pos) {
                Some(b':') => {
                    let mod_offset = self.pos;
                    self.pos += 1;
                    let mod_name_start = self.pos;
                    while self.pos < self.source.len() && self.source[self.pos] != b'=' && self.source[self.pos] != b':' && !self.at_close() {
                        self.pos += 1;
                    }
                    if self.pos == mod_name_start {
                        return self.fail(mod_offset);
                    }
                    let mod_name = String::from_utf8_lossy(&self.source[mod_name_start..self.pos]).into_owned();
                    let value = if self.source.get(self.pos) == Some(&b'=') {
                        self.pos += 1;
                        let value_start = self.pos;
                        while self.pos < self.source.len() && self.source[self.pos] != b':' && !self.at_close() {
                            self.pos += 1;
                        }
                        Some(String::from_utf8_lossy(&self.source[value_start..self.pos]).into_owned())
                    } else {
                        None
                    };
                    if kind != TokenKind::Variable && kind != TokenKind::Include {
                        return self.fail(mod_offset);
                    }
                    modifiers.push(RawModifier { name: mod_name, value, offset: mod_offset });
                }
                Some(b'}') if self.at_close() => break,
                _ => return self.fail(marker_start),
            }
        }

        if !self.at_close() {
            return self.fail(marker_start);
        }
        self.pos += 2;
        self.maybe_eat_newline(kind);

        LexToken { kind, text: name_start..name_end, offset: marker_start, modifiers }
    }

    fn lex_comment(&mut self, marker_start: usize) -> LexToken {
        let body_start = self.pos;
        while self.pos < self.source.len() && self.source[self.pos] != b'}' {
            self.pos += 1;
        }
        if !self.at_close() {
            return self.fail(marker_start);
        }
        let body_end = self.pos;
        self.pos += 2;
        self.maybe_eat_newline(TokenKind::Comment);
        LexToken { kind: TokenKind::Comment, text: body_start..body_end, offset: marker_start, modifiers: Vec::new() }
    }

    fn at_close(&self) -> bool {
        self.source.get(self.pos) == Some(&b'}') && self.source.get(self.pos + 1) == Some(&b'}')
    }

    /// After a non-`VARIABLE` marker's closing `}}`, eat a following `\n`
    /// (or, if the marker was preceded by `\` before the newline, preserve
    /// it by only consuming the backslash). Only active under
    /// `StripMode::StripWhitespace`.
    fn maybe_eat_newline(&mut self, kind: TokenKind) {
        if self.strip != StripMode::StripWhitespace || kind == TokenKind::Variable {
            return;
        }
        if self.source.get(self.pos) == Some(&b'\n') {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_text_and_variable() {
        let mut lexer = Lexer::new(b"Hello {{NAME}}!", StripMode::DoNotStrip);
        let t1 = lexer.next_token();
        assert_eq!(t1.kind, TokenKind::Text);
        assert_eq!(&lexer.source[t1.text.clone()], b"Hello ");
        let t2 = lexer.next_token();
        assert_eq!(t2.kind, TokenKind::Variable);
        assert_eq!(&lexer.source[t2.text.clone()], b"NAME");
        let t3 = lexer.next_token();
        assert_eq!(t3.kind, TokenKind::Text);
        assert_eq!(&lexer.source[t3.text.clone()], b"!");
        let t4 = lexer.next_token();
        assert_eq!(t4.kind, TokenKind::Null);
        assert!(!lexer.had_error());
    }

    #[test]
    fn triple_brace_is_literal() {
        let mut lexer = Lexer::new(b"{{{X}}", StripMode::DoNotStrip);
        let t = lexer.next_token();
        assert_eq!(t.kind, TokenKind::Text);
    }

    #[test]
    fn unterminated_marker_is_error() {
        let mut lexer = Lexer::new(b"{{NAME", StripMode::DoNotStrip);
        let t = lexer.next_token();
        assert_eq!(t.kind, TokenKind::Null);
        assert!(lexer.had_error());
    }

    #[test]
    fn modifier_with_value_is_parsed() {
        let mut lexer = Lexer::new(b"{{NAME:validate_url=html}}", StripMode::DoNotStrip);
        let t = lexer.next_token();
        assert_eq!(t.kind, TokenKind::Variable);
        assert_eq!(t.modifiers.len(), 1);
        assert_eq!(t.modifiers[0].name, "validate_url");
        assert_eq!(t.modifiers[0].value.as_deref(), Some("html"));
    }

    #[test]
    fn section_with_modifier_is_error() {
        let mut lexer = Lexer::new(b"{{#SEC:h}}", StripMode::DoNotStrip);
        let t = lexer.next_token();
        assert_eq!(t.kind, TokenKind::Null);
        assert!(lexer.had_error());
    }
}

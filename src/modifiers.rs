//! Escape modifiers: pure `bytes -> bytes` transforms applied to variable and
//! include output.
//!
//! Every modifier here has the shape `(input, argument, per-expand data) ->
//! writes to an [`Emitter`]`. None of them can fail: a malformed or
//! unexpected input is always mapped to *some* safe output rather than
//! propagating an error, matching the "modifiers never error" rule.

use std::collections::HashMap;

use crate::emitter::Emitter;

/// Opaque, caller-supplied data threaded through a single `expand` call.
///
/// A handful of modifiers (none of the built-ins currently, but extension
/// modifiers commonly do) want to consult state that isn't part of the
/// dictionary, e.g. a nonce for a Content-Security-Policy header. This is a
/// simple string-keyed bag of `&dyn Any`-style values set by the caller
/// before expansion and read during it.
#[derive(Default)]
pub struct ModifierData<'a> {
    entries: HashMap<&'static str, &'a (dyn std::any::Any + Send + Sync)>,
}

impl<'a> ModifierData<'a> {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value under `key`, overwriting any previous entry.
    pub fn insert(&mut self, key: &'static str, value: &'a (dyn std::any::Any + Send + Sync)) {
        self.entries.insert(key, value);
    }

    /// Looks up a value by key and downcasts it to `T`.
    pub fn get<T: 'static>(&self, key: &str) -> Option<&'a T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }
}

/// The function signature every modifier implements.
///
/// `argument` is the text after `:modname`, including the leading `=` if
/// present, or `""` if the modifier was referenced with no argument.
pub type ModifierFn = fn(input: &[u8], argument: &str, data: &ModifierData<'_>, out: &mut dyn Emitter);

/// The XSS-equivalence class of a modifier, used by the auto-escape
/// reconciliation in the resolver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum XssClass {
    /// One of the built-in family of mutually-substitutable escapers (html,
    /// js, url, css-safe).
    WebStandard,
    /// Substitutable only with itself (`none`, user `x-*` extensions).
    Unique,
    /// The template author has asserted this modifier's output is safe in
    /// context; registered via `add_xss_safe_modifier`.
    Safe,
}

/// Static metadata about a registered modifier.
#[derive(Clone, Copy)]
pub struct ModifierInfo {
    /// The modifier's long name, e.g. `"html_escape"` or `"validate_url=html"`.
    pub long_name: &'static str,
    /// A single-character shorthand, if one is registered.
    pub short_name: Option<char>,
    /// Whether referencing this modifier requires a `=value` argument.
    pub value_required: bool,
    /// The XSS-equivalence class.
    pub xss_class: XssClass,
    /// The transform function.
    pub func: ModifierFn,
}

impl ModifierInfo {
    /// The base name before any `=value` specialization.
    pub fn base_name(&self) -> &'static str {
        self.long_name.split('=').next().unwrap_or(self.long_name)
    }

    /// The specialization value after `=`, if this is a specialized entry.
    pub fn specialization(&self) -> Option<&'static str> {
        self.long_name.split_once('=').map(|(_, v)| v)
    }
}

impl std::fmt::Debug for ModifierInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModifierInfo")
            .field("long_name", &self.long_name)
            .field("short_name", &self.short_name)
            .field("value_required", &self.value_required)
            .field("xss_class", &self.xss_class)
            .finish()
    }
}

// --- Built-in modifier implementations -------------------------------------

/// `& " ' < >` to entities; `\r \n \v \f \t` to a single space; else passthrough.
pub fn html_escape(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    for &b in input {
        match b {
            b'&' => out.append_str("&amp;"),
            b'"' => out.append_str("&quot;"),
            b'\'' => out.append_str("&#39;"),
            b'<' => out.append_str("&lt;"),
            b'>' => out.append_str("&gt;"),
            b'\r' | b'\n' | 0x0B | 0x0C | b'\t' => out.append_byte(b' '),
            other => out.append_byte(other),
        }
    }
}

/// Like [`html_escape`] but leaves all whitespace byte-for-byte intact.
pub fn pre_escape(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    for &b in input {
        match b {
            b'&' => out.append_str("&amp;"),
            b'"' => out.append_str("&quot;"),
            b'\'' => out.append_str("&#39;"),
            b'<' => out.append_str("&lt;"),
            b'>' => out.append_str("&gt;"),
            other => out.append_byte(other),
        }
    }
}

/// Like [`html_escape`], but additionally allows balanced `<b>…</b>`, `<br>`,
/// and `<wbr>` through unescaped, and guards against Netscape-4's `&{ ... }`
/// JavaScript entity syntax.
pub fn snippet_escape(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    let mut inside_b = false;
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'"' => {
                out.append_str("&quot;");
                i += 1;
            }
            b'\'' => {
                out.append_str("&#39;");
                i += 1;
            }
            b'>' => {
                out.append_str("&gt;");
                i += 1;
            }
            b'\r' | b'\n' | 0x0B | 0x0C | b'\t' => {
                out.append_byte(b' ');
                i += 1;
            }
            b'&' => {
                if input.get(i + 1) == Some(&b'{') {
                    // Could be a JavaScript entity, an XSS risk in Netscape 4.
                    out.append_str("&amp;");
                } else {
                    out.append_byte(b'&');
                }
                i += 1;
            }
            b'<' => {
                let rest = &input[i..];
                let valid_tag: Option<&[u8]> = if !inside_b && rest.starts_with(b"<b>") {
                    inside_b = true;
                    Some(b"<b>")
                } else if inside_b && rest.starts_with(b"</b>") {
                    inside_b = false;
                    Some(b"</b>")
                } else if rest.starts_with(b"<br>") {
                    Some(b"<br>")
                } else if rest.starts_with(b"<wbr>") {
                    Some(b"<wbr>")
                } else {
                    None
                };
                if let Some(tag) = valid_tag {
                    out.append_bytes(tag);
                    i += tag.len();
                } else {
                    out.append_str("&lt;");
                    i += 1;
                }
            }
            other => {
                out.append_byte(other);
                i += 1;
            }
        }
    }
    if inside_b {
        out.append_str("</b>");
    }
}

/// Permits `[A-Za-z0-9_:.-]`; a leading or trailing `=` becomes `_`; every
/// other byte becomes `_`.
pub fn cleanse_attribute(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    let last = input.len().wrapping_sub(1);
    for (i, &b) in input.iter().enumerate() {
        match b {
            b'=' if i == 0 || i == last => out.append_byte(b'_'),
            b'=' | b'-' | b'.' | b'_' | b':' => out.append_byte(b),
            _ if b.is_ascii_alphanumeric() => out.append_byte(b),
            _ => out.append_byte(b'_'),
        }
    }
}

/// Permits `[A-Za-z0-9_ .,!#%-]`; other bytes are dropped.
pub fn cleanse_css(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    for &b in input {
        match b {
            b' ' | b'_' | b'.' | b',' | b'!' | b'#' | b'%' | b'-' => out.append_byte(b),
            _ if b.is_ascii_alphanumeric() => out.append_byte(b),
            _ => {}
        }
    }
}

fn is_safe_url_scheme(input: &[u8]) -> bool {
    let slash = memchr::memchr(b'/', input).unwrap_or(input.len());
    let Some(_colon) = memchr::memchr(b':', &input[..slash]) else {
        return true; // no scheme at all: relative URL, always fine
    };
    let starts_with_ci = |scheme: &[u8]| {
        input.len() > scheme.len() && input[..scheme.len()].eq_ignore_ascii_case(scheme)
    };
    starts_with_ci(b"http://") || starts_with_ci(b"https://")
}

/// If `input` has a scheme before the first `/` that is not (case-insensitive)
/// `http://` or `https://`, emits a literal `#` through `chained` instead of
/// the input. Otherwise pipes the whole input through `chained`.
fn validate_url_chained(
    input: &[u8],
    argument: &str,
    data: &ModifierData<'_>,
    out: &mut dyn Emitter,
    chained: ModifierFn,
) {
    if is_safe_url_scheme(input) {
        chained(input, argument, data, out);
    } else {
        chained(b"#", "", data, out);
    }
}

/// `validate_url` chained with [`html_escape`].
pub fn validate_url_html_escape(input: &[u8], argument: &str, data: &ModifierData<'_>, out: &mut dyn Emitter) {
    validate_url_chained(input, argument, data, out, html_escape);
}

/// `validate_url` chained with [`crate::modifiers::javascript_escape`].
pub fn validate_url_javascript_escape(input: &[u8], argument: &str, data: &ModifierData<'_>, out: &mut dyn Emitter) {
    validate_url_chained(input, argument, data, out, javascript_escape);
}

/// `validate_url` chained with [`cleanse_css`].
pub fn validate_url_css_escape(input: &[u8], argument: &str, data: &ModifierData<'_>, out: &mut dyn Emitter) {
    validate_url_chained(input, argument, data, out, cleanse_css);
}

/// `& " ' < >` to entities; no other transformation.
pub fn xml_escape(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    for &b in input {
        match b {
            b'&' => out.append_str("&amp;"),
            b'"' => out.append_str("&quot;"),
            b'\'' => out.append_str("&#39;"),
            b'<' => out.append_str("&lt;"),
            b'>' => out.append_str("&gt;"),
            other => out.append_byte(other),
        }
    }
}

/// Decodes one UTF-8 code unit from the start of `bytes`, returning its
/// scalar value and the number of bytes it occupies. Truncated or malformed
/// sequences decode as a single raw byte each, with no attempt to compose a
/// code point, matching what `javascript_escape` needs to stay in lockstep
/// with genuinely broken input.
fn next_code_unit(bytes: &[u8]) -> (u32, usize) {
    let first = bytes[0];
    let lead_len = match first & 0xF0 {
        0xC0 | 0xD0 => 2,
        0xE0 => 3,
        _ => return (u32::from(first), 1),
    };
    if lead_len > bytes.len() {
        return (0xFFFD, 1);
    }
    let mut code_unit = u32::from(first) & (0xFF >> lead_len);
    for &tail in &bytes[1..lead_len] {
        if tail & 0xC0 != 0x80 {
            return (0xFFFD, 1);
        }
        code_unit = (code_unit << 6) | (u32::from(tail) & 0x3F);
    }
    (code_unit, lead_len)
}

/// Escapes `\0 " ' \ \t \r \n \b \v & < > =` as `\xHH`; U+2028/U+2029 as
/// ` `/` `; everything else passes through. Iterates UTF-8 code
/// units rather than bytes so multi-byte sequences are never split.
pub fn javascript_escape(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    let mut i = 0;
    while i < input.len() {
        let (code_unit, len) = next_code_unit(&input[i..]);
        match code_unit {
            0x00 => out.append_str("\\x00"),
            0x22 => out.append_str("\\x22"),
            0x27 => out.append_str("\\x27"),
            0x5C => out.append_str("\\\\"),
            0x09 => out.append_str("\\t"),
            0x0D => out.append_str("\\r"),
            0x0A => out.append_str("\\n"),
            0x08 => out.append_str("\\b"),
            0x0B => out.append_str("\\x0b"),
            0x26 => out.append_str("\\x26"),
            0x3C => out.append_str("\\x3c"),
            0x3E => out.append_str("\\x3e"),
            0x3D => out.append_str("\\x3d"),
            0x2028 => out.append_str("\\u2028"),
            0x2029 => out.append_str("\\u2029"),
            _ => out.append_bytes(&input[i..i + len]),
        }
        i += len;
    }
}

/// Passes `true`/`false` and `[0-9+-.eE]+`/`0x[0-9A-Fa-f]+` numeric literals
/// through unchanged; replaces anything else with the literal `null`.
pub fn javascript_number(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    if input.is_empty() {
        return;
    }
    if input == b"true" || input == b"false" {
        out.append_bytes(input);
        return;
    }
    let valid = if input.len() > 2 && input[0] == b'0' && matches!(input[1], b'x' | b'X') {
        !input[2..].is_empty() && input[2..].iter().all(u8::is_ascii_hexdigit)
    } else {
        input
            .iter()
            .all(|&b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
    };
    if valid {
        out.append_bytes(input);
    } else {
        out.append_str("null");
    }
}

fn is_url_query_safe(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'.' | b',' | b'_' | b'*' | b'/' | b'~' | b'!' | b'(' | b')' | b'-')
}

/// `[0-9A-Za-z.,_*/~!()-]` pass through; space becomes `+`; everything else
/// is percent-encoded as `%HH` (uppercase hex).
pub fn url_query_escape(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &b in input {
        if b == b' ' {
            out.append_byte(b'+');
        } else if is_url_query_safe(b) {
            out.append_byte(b);
        } else {
            out.append_byte(b'%');
            out.append_byte(HEX[usize::from(b >> 4)]);
            out.append_byte(HEX[usize::from(b & 0xF)]);
        }
    }
}

/// `" \ /` and `\b \f \n \r \t` become backslash escapes; everything else
/// passes through untouched (including bytes hostile to HTML).
pub fn json_escape(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    for &b in input {
        match b {
            b'"' => out.append_str("\\\""),
            b'\\' => out.append_str("\\\\"),
            b'/' => out.append_str("\\/"),
            0x08 => out.append_str("\\b"),
            0x0C => out.append_str("\\f"),
            b'\n' => out.append_str("\\n"),
            b'\r' => out.append_str("\\r"),
            b'\t' => out.append_str("\\t"),
            other => out.append_byte(other),
        }
    }
}

/// Splits `input` on `\n`, `\r`, or `\r\n` and emits `argument` (with any
/// leading `=` stripped) after every line including its terminator.
///
/// Used internally by the tree builder to re-indent multi-line includes so
/// each emitted line lines up with the include's call site.
pub fn prefix_line(input: &[u8], argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    let prefix = argument.strip_prefix('=').unwrap_or(argument);
    let len = input.len();
    let mut start = 0;
    while start < len {
        let Some(nl_rel) = memchr::memchr(b'\n', &input[start..]) else {
            match memchr::memchr(b'\r', &input[start..]) {
                None => {
                    out.append_bytes(&input[start..]);
                    return;
                }
                Some(cr_rel) => {
                    let end = start + cr_rel + 1;
                    out.append_bytes(&input[start..end]);
                    out.append_str(prefix);
                    start = end;
                    continue;
                }
            }
        };
        let nl = start + nl_rel;
        let end = match memchr::memchr(b'\r', &input[start..nl]) {
            Some(cr_rel) => {
                let cr = start + cr_rel;
                if cr + 1 == nl { nl + 1 } else { cr + 1 }
            }
            None => nl + 1,
        };
        out.append_bytes(&input[start..end]);
        out.append_str(prefix);
        start = end;
    }
}

/// The identity modifier; an author's explicit assertion that a value is
/// already safe in context.
pub fn null(input: &[u8], _argument: &str, _data: &ModifierData<'_>, out: &mut dyn Emitter) {
    out.append_bytes(input);
}

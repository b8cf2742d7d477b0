//! A byte-driven HTML/JavaScript/CSS context tracker.
//!
//! This is deliberately *not* a full HTML parser: its only obligation is to
//! answer, at any byte boundary reached so far, "what kind of thing would a
//! browser be reading right now" — tag name, attribute name and type,
//! whether we're inside a quoted value, whether we're inside JavaScript or
//! CSS, and where within the current value we are. The auto-escape resolver
//! (`builder.rs`) is the only caller; it feeds literal template text through
//! [`HtmlParser::parse`] and reads the tracked state back out.

use std::sync::OnceLock;

/// The parser's top-level state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Ordinary HTML text, outside any tag.
    Text,
    /// Between `<tagname` (or its closing variant) and the closing `>`.
    Tag,
    /// Reading an attribute name.
    Attr,
    /// Reading an attribute's value.
    Value,
    /// Inside an HTML comment `<!-- … -->`.
    Comment,
    /// Inside a `<script>` element body (not inside a tag).
    JsFile,
    /// Inside a `<style>` element body (not inside a tag).
    CssFile,
    /// The parser has observed something it cannot model and has given up;
    /// all further input is accepted but ignored.
    Error,
}

/// The kind of attribute the parser believes it's currently inside.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttributeType {
    /// No attribute is currently open.
    None,
    /// An attribute with no special escaping rule (e.g. `id`, `class`).
    Regular,
    /// A URI-valued attribute (`href`, `src`, …).
    Uri,
    /// An inline event-handler attribute (`onclick`, …): its value is JS.
    Js,
    /// The `style` attribute: its value is CSS.
    Style,
}

/// JavaScript tokenizer sub-state, tracked whenever the parser is inside a
/// `<script>` body or a JS-typed attribute value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JsState {
    /// Plain JS source text, not inside a string or comment.
    Text,
    /// Inside a `'…'` string literal.
    SingleQuote,
    /// Inside a `"…"` string literal.
    DoubleQuote,
    /// Inside a `/…/` regular expression literal.
    Regexp,
    /// Inside a `/* … */` or `// …` comment.
    Comment,
}

impl JsState {
    /// Whether a substitution landing here would be inside a quoted JS
    /// string (as opposed to bare in an expression position).
    pub fn is_quoted(self) -> bool {
        matches!(self, JsState::SingleQuote | JsState::DoubleQuote)
    }
}

/// The mode a parser is reset into: the initial assumption about what kind
/// of document the bytes about to be fed in represent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParserMode {
    /// Start in [`State::Text`] (ordinary HTML body).
    Html,
    /// Start in [`State::JsFile`] (a standalone `.js` file).
    Js,
    /// Start in [`State::CssFile`] (a standalone `.css` file).
    Css,
    /// Start in [`State::Tag`] (as if already inside an open tag's body).
    HtmlInTag,
}

fn attribute_table() -> &'static phf::Map<&'static str, AttributeType> {
    static TABLE: OnceLock<phf::Map<&'static str, AttributeType>> = OnceLock::new();
    TABLE.get_or_init(|| {
        phf::phf_map! {
            "href" => AttributeType::Uri,
            "src" => AttributeType::Uri,
            "action" => AttributeType::Uri,
            "formaction" => AttributeType::Uri,
            "cite" => AttributeType::Uri,
            "longdesc" => AttributeType::Uri,
            "profile" => AttributeType::Uri,
            "usemap" => AttributeType::Uri,
            "background" => AttributeType::Uri,
            "poster" => AttributeType::Uri,
            "manifest" => AttributeType::Uri,
            "style" => AttributeType::Style,
            "onabort" => AttributeType::Js,
            "onblur" => AttributeType::Js,
            "onchange" => AttributeType::Js,
            "onclick" => AttributeType::Js,
            "oncontextmenu" => AttributeType::Js,
            "ondblclick" => AttributeType::Js,
            "ondrag" => AttributeType::Js,
            "ondrop" => AttributeType::Js,
            "onerror" => AttributeType::Js,
            "onfocus" => AttributeType::Js,
            "oninput" => AttributeType::Js,
            "oninvalid" => AttributeType::Js,
            "onkeydown" => AttributeType::Js,
            "onkeypress" => AttributeType::Js,
            "onkeyup" => AttributeType::Js,
            "onload" => AttributeType::Js,
            "onmousedown" => AttributeType::Js,
            "onmousemove" => AttributeType::Js,
            "onmouseout" => AttributeType::Js,
            "onmouseover" => AttributeType::Js,
            "onmouseup" => AttributeType::Js,
            "onplay" => AttributeType::Js,
            "onpause" => AttributeType::Js,
            "onreset" => AttributeType::Js,
            "onscroll" => AttributeType::Js,
            "onselect" => AttributeType::Js,
            "onsubmit" => AttributeType::Js,
            "ontouchstart" => AttributeType::Js,
            "ontouchend" => AttributeType::Js,
            "ontouchmove" => AttributeType::Js,
            "onunload" => AttributeType::Js,
            "onwheel" => AttributeType::Js,
        }
    })
}

fn lookup_attribute_type(name: &str) -> AttributeType {
    if name.len() > 32 {
        return AttributeType::Regular;
    }
    let mut lower = [0u8; 32];
    for (i, &b) in name.as_bytes().iter().enumerate() {
        lower[i] = b.to_ascii_lowercase();
    }
    let lowered = std::str::from_utf8(&lower[..name.len()]).unwrap_or("");
    attribute_table().get(lowered).copied().unwrap_or(AttributeType::Regular)
}

/// The streaming state tracker itself. See the module docs for scope.
///
/// # One-deep tag tracking
///
/// `tag_name` reflects only the innermost tag the parser is *currently*
/// inside the opening of, or (once past the `>`) the most recently opened
/// element — no stack is kept. Inside `<b>x<i>y</i>z</b>`, the parser
/// reports `b` while scanning `x`, `i` while scanning `y`, then `None` while
/// scanning `z`. Do not "fix" this: the auto-escape context table in
/// `builder.rs` is written assuming it.
pub struct HtmlParser {
    state: State,
    reset_mode: ParserMode,

    // Tag-name scanning.
    reading_tag_name: bool,
    closing_tag: bool,
    tag_buf: String,
    tag_name: Option<String>,

    // Attribute scanning.
    attr_buf: String,
    attr_name: Option<String>,
    attr_type: AttributeType,
    attr_quoted: bool,
    quote_char: u8,
    pending_quote_check: bool,
    value_index: usize,

    // JS / CSS.
    in_js: bool,
    js_state: JsState,
    in_css: bool,

    // Comment scanning: count of consecutive trailing `-` seen so far.
    comment_dashes: u8,
}

impl HtmlParser {
    /// Creates a parser starting in the state implied by `mode`.
    pub fn new(mode: ParserMode) -> Self {
        let mut p = HtmlParser {
            state: State::Text,
            reset_mode: mode,
            reading_tag_name: false,
            closing_tag: false,
            tag_buf: String::new(),
            tag_name: None,
            attr_buf: String::new(),
            attr_name: None,
            attr_type: AttributeType::None,
            attr_quoted: false,
            quote_char: 0,
            pending_quote_check: false,
            value_index: 0,
            in_js: false,
            js_state: JsState::Text,
            in_css: false,
            comment_dashes: 0,
        };
        p.reset_mode(mode);
        p
    }

    /// Restarts the parser with its current mode.
    pub fn reset(&mut self) {
        self.reset_mode(self.reset_mode);
    }

    /// Restarts the parser with a (possibly new) initial mode.
    pub fn reset_mode(&mut self, mode: ParserMode) {
        self.reset_mode = mode;
        self.reading_tag_name = false;
        self.closing_tag = false;
        self.tag_buf.clear();
        self.tag_name = None;
        self.attr_buf.clear();
        self.attr_name = None;
        self.attr_type = AttributeType::None;
        self.attr_quoted = false;
        self.quote_char = 0;
        self.pending_quote_check = false;
        self.value_index = 0;
        self.in_css = false;
        self.js_state = JsState::Text;
        self.comment_dashes = 0;
        match mode {
            ParserMode::Html => {
                self.state = State::Text;
                self.in_js = false;
            }
            ParserMode::Js => {
                self.state = State::JsFile;
                self.in_js = true;
            }
            ParserMode::Css => {
                self.state = State::CssFile;
                self.in_js = false;
                self.in_css = true;
            }
            ParserMode::HtmlInTag => {
                self.state = State::Tag;
                self.in_js = false;
            }
        }
    }

    /// Copies the full state of `other` into `self`, e.g. to checkpoint
    /// before a speculative feed and restore afterward.
    pub fn copy_from(&mut self, other: &HtmlParser) {
        self.state = other.state;
        self.reset_mode = other.reset_mode;
        self.reading_tag_name = other.reading_tag_name;
        self.closing_tag = other.closing_tag;
        self.tag_buf.clone_from(&other.tag_buf);
        self.tag_name = other.tag_name.clone();
        self.attr_buf.clone_from(&other.attr_buf);
        self.attr_name = other.attr_name.clone();
        self.attr_type = other.attr_type;
        self.attr_quoted = other.attr_quoted;
        self.quote_char = other.quote_char;
        self.pending_quote_check = other.pending_quote_check;
        self.value_index = other.value_index;
        self.in_js = other.in_js;
        self.js_state = other.js_state;
        self.in_css = other.in_css;
        self.comment_dashes = other.comment_dashes;
    }

    /// Current top-level state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The one-deep tag name tracked right now, if any.
    pub fn tag_name(&self) -> Option<&str> {
        self.tag_name.as_deref()
    }

    /// The attribute name currently being read or whose value is being read.
    pub fn attr_name(&self) -> Option<&str> {
        self.attr_name.as_deref()
    }

    /// The type of the current attribute.
    pub fn attr_type(&self) -> AttributeType {
        self.attr_type
    }

    /// Whether the current attribute value is quoted.
    pub fn attr_quoted(&self) -> bool {
        self.attr_quoted
    }

    /// The 0-based byte offset reached so far within the current attribute
    /// value.
    pub fn value_index(&self) -> usize {
        self.value_index
    }

    /// Whether we are inside JavaScript: a `<script>` body, or a JS-typed
    /// attribute value.
    pub fn in_js(&self) -> bool {
        self.in_js
    }

    /// Whether the current JS position is inside a quoted string literal.
    pub fn js_quoted(&self) -> bool {
        self.in_js && self.js_state.is_quoted()
    }

    /// Whether we are inside CSS: a `<style>` body, or the value of a
    /// `style` attribute.
    pub fn in_css(&self) -> bool {
        self.in_css
    }

    /// Signals that a template expansion occurs at the current position:
    /// the parser cannot see the substituted bytes, but must still model
    /// that *something* was inserted here so it doesn't glue an unquoted
    /// attribute value straight into the following attribute (e.g.
    /// `<a href={{URL}} alt=…>`).
    pub fn insert_text(&mut self) {
        if self.state == State::Value {
            self.value_index += 1;
            if !self.attr_quoted {
                self.end_value();
                self.state = State::Tag;
            }
        }
    }

    fn end_value(&mut self) {
        self.attr_name = None;
        self.attr_type = AttributeType::None;
        self.attr_quoted = false;
        self.quote_char = 0;
        self.value_index = 0;
        self.in_js = false;
        self.in_css = false;
    }

    /// Advances the state by feeding in the next chunk of literal template
    /// text.
    pub fn parse(&mut self, bytes: &[u8]) {
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            let rest = &bytes[i + 1..];
            match self.state {
                State::Error => {}
                State::Text => self.step_text(b, rest),
                State::Comment => self.step_comment(b),
                State::Tag => self.step_tag(b),
                State::Attr => self.step_attr(b),
                State::Value => self.step_value(b),
                State::JsFile => self.step_js(b, rest),
                State::CssFile => self.step_css_file(b),
            }
            i += 1;
        }
    }

    fn step_text(&mut self, b: u8, rest: &[u8]) {
        if b != b'<' {
            return;
        }
        if rest.starts_with(b"!--") {
            self.state = State::Comment;
            self.comment_dashes = 0;
        } else if rest.first() == Some(&b'/') {
            self.state = State::Tag;
            self.reading_tag_name = true;
            self.closing_tag = true;
            self.tag_buf.clear();
        } else if rest.first().is_some_and(u8::is_ascii_alphabetic) {
            self.state = State::Tag;
            self.reading_tag_name = true;
            self.closing_tag = false;
            self.tag_buf.clear();
        }
        // A lone `<` not starting a recognizable construct: stay in text,
        // matching a browser's lenient handling.
    }

    fn step_comment(&mut self, b: u8) {
        if b == b'-' {
            self.comment_dashes = (self.comment_dashes + 1).min(2);
        } else if b == b'>' && self.comment_dashes >= 2 {
            self.state = State::Text;
            self.comment_dashes = 0;
        } else {
            self.comment_dashes = 0;
        }
    }

    fn step_tag(&mut self, b: u8) {
        if self.reading_tag_name {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b':' {
                self.tag_buf.push(b as char);
                return;
            }
            self.reading_tag_name = false;
            self.tag_name = if self.closing_tag { None } else { Some(self.tag_buf.clone()) };
        }
        match b {
            b'>' => {
                let opened = self.tag_name.clone().unwrap_or_default().to_ascii_lowercase();
                self.tag_buf.clear();
                if !self.closing_tag {
                    match opened.as_str() {
                        "script" => {
                            self.state = State::JsFile;
                            self.in_js = true;
                            self.js_state = JsState::Text;
                            return;
                        }
                        "style" => {
                            self.state = State::CssFile;
                            self.in_css = true;
                            return;
                        }
                        _ => {}
                    }
                }
                self.state = State::Text;
            }
            b'/' | b' ' | b'\t' | b'\n' | b'\r' => {
                // Self-closing slash or inter-attribute whitespace: no-op.
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                self.attr_buf.clear();
                self.attr_buf.push(b as char);
                self.state = State::Attr;
            }
            _ => {}
        }
    }

    fn step_attr(&mut self, b: u8) {
        match b {
            b'=' => {
                self.attr_name = Some(self.attr_buf.clone());
                self.attr_type = lookup_attribute_type(&self.attr_buf);
                self.attr_buf.clear();
                self.value_index = 0;
                self.attr_quoted = false;
                self.quote_char = 0;
                self.pending_quote_check = true;
                self.in_js = self.attr_type == AttributeType::Js;
                self.in_css = self.attr_type == AttributeType::Style;
                self.js_state = JsState::Text;
                self.state = State::Value;
            }
            b' ' | b'\t' | b'\n' | b'\r' => {
                self.attr_name = Some(self.attr_buf.clone());
                self.attr_type = AttributeType::None;
                self.attr_buf.clear();
                self.state = State::Tag;
            }
            b'>' => {
                self.attr_name = Some(self.attr_buf.clone());
                self.attr_type = AttributeType::None;
                self.attr_buf.clear();
                self.state = State::Text;
            }
            _ => self.attr_buf.push(b as char),
        }
    }

    fn step_value(&mut self, b: u8) {
        if self.pending_quote_check {
            self.pending_quote_check = false;
            if b == b'"' || b == b'\'' {
                self.attr_quoted = true;
                self.quote_char = b;
                if self.in_js {
                    self.js_state = if b == b'"' { JsState::DoubleQuote } else { JsState::SingleQuote };
                }
                return;
            }
        }
        if self.attr_quoted {
            if b == self.quote_char {
                self.end_value();
                self.state = State::Tag;
            } else {
                self.value_index += 1;
            }
            return;
        }
        if matches!(b, b' ' | b'\t' | b'\n' | b'\r') {
            self.end_value();
            self.state = State::Tag;
            return;
        }
        if b == b'>' {
            self.end_value();
            self.state = State::Text;
            return;
        }
        self.value_index += 1;
    }

    fn step_js(&mut self, b: u8, rest: &[u8]) {
        match self.js_state {
            JsState::Text => match b {
                b'\'' => self.js_state = JsState::SingleQuote,
                b'"' => self.js_state = JsState::DoubleQuote,
                b'/' if rest.first() == Some(&b'/') || rest.first() == Some(&b'*') => {
                    self.js_state = JsState::Comment;
                }
                b'<' if rest.len() >= 7 && rest[..7].eq_ignore_ascii_case(b"/script") => {
                    self.state = State::Tag;
                    self.reading_tag_name = true;
                    self.closing_tag = true;
                    self.in_js = false;
                    self.tag_buf.clear();
                }
                _ => {}
            },
            JsState::SingleQuote => match b {
                b'\\' => {}
                b'\'' => self.js_state = JsState::Text,
                _ => {}
            },
            JsState::DoubleQuote => match b {
                b'\\' => {}
                b'"' => self.js_state = JsState::Text,
                _ => {}
            },
            JsState::Regexp => {
                if b == b'/' {
                    self.js_state = JsState::Text;
                }
            }
            JsState::Comment => {
                if b == b'\n' {
                    self.js_state = JsState::Text;
                }
            }
        }
    }

    fn step_css_file(&mut self, b: u8) {
        if b == b'<' {
            self.state = State::Tag;
            self.reading_tag_name = true;
            self.closing_tag = true;
            self.in_css = false;
            self.tag_buf.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_tag_and_attribute_type() {
        let mut p = HtmlParser::new(ParserMode::Html);
        p.parse(b"<a href=");
        assert_eq!(p.state(), State::Value);
        assert_eq!(p.tag_name(), Some("a"));
        assert_eq!(p.attr_type(), AttributeType::Uri);
    }

    #[test]
    fn quoted_value_tracks_index() {
        let mut p = HtmlParser::new(ParserMode::Html);
        p.parse(b"<a href=\"abc");
        assert!(p.attr_quoted());
        assert_eq!(p.value_index(), 3);
        p.parse(b"\">");
        assert_eq!(p.state(), State::Text);
    }

    #[test]
    fn one_deep_tag_tracking_drops_on_nesting() {
        let mut p = HtmlParser::new(ParserMode::Html);
        p.parse(b"<b>x<i>y</i>z");
        assert_eq!(p.tag_name(), None);
    }

    #[test]
    fn script_body_enters_js_state() {
        let mut p = HtmlParser::new(ParserMode::Html);
        p.parse(b"<script>var x=1;");
        assert_eq!(p.state(), State::JsFile);
        assert!(p.in_js());
    }

    #[test]
    fn insert_text_terminates_unquoted_value() {
        let mut p = HtmlParser::new(ParserMode::Html);
        p.parse(b"<a href=");
        p.insert_text();
        assert_eq!(p.state(), State::Tag);
    }
}

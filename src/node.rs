//! The compiled node tree and the small enums that select compiler
//! behavior: strip mode and template context.

use crate::modifiers::ModifierInfo;

/// Whitespace-stripping policy applied to the raw source before lexing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StripMode {
    /// No stripping; bytes pass through the preprocessor unchanged.
    #[default]
    DoNotStrip,
    /// Blank lines, and lines containing exactly one removable marker, are
    /// dropped entirely.
    StripBlankLines,
    /// Every line has leading/trailing ASCII whitespace trimmed and its
    /// newline removed.
    StripWhitespace,
}

/// What kind of text a template produces, selecting whether the HTML
/// context parser runs and which modifier list auto-escape attaches.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateContext {
    /// No parser, no auto-escape: the author is fully responsible.
    Manual,
    /// HTML body text; the context parser runs starting in `Text`.
    Html,
    /// A standalone `.js` file; the context parser runs starting in `JsFile`.
    Js,
    /// A standalone `.css` file; the context parser runs starting in `CssFile`.
    Css,
    /// A JSON document: every variable is `javascript_escape`d.
    Json,
    /// An XML document: every variable is `xml_escape`d.
    Xml,
    /// HTML, but the template's first byte is already inside a tag body.
    HtmlInTag,
    /// No modifier list is ever attached automatically, and no parser runs,
    /// but (unlike `Manual`) this is the context an include is given when
    /// its own in-template modifiers already fully cover escaping.
    None,
}

impl TemplateContext {
    /// Whether this context runs the HTML/JS/CSS parser during compilation.
    pub fn uses_html_parser(self) -> bool {
        matches!(self, TemplateContext::Html | TemplateContext::Js | TemplateContext::Css | TemplateContext::HtmlInTag)
    }

    /// Whether auto-escape is active at all in this context.
    pub fn auto_escapes(self) -> bool {
        !matches!(self, TemplateContext::Manual | TemplateContext::None)
    }
}

/// A single `:name[=value]` modifier reference attached to a token.
#[derive(Clone)]
pub struct ModifierRef {
    /// The resolved modifier.
    pub info: ModifierInfo,
    /// The argument text, empty or starting with `=`.
    pub argument: String,
}

/// A variable or include reference: a name plus its resolved modifier chain.
#[derive(Clone)]
pub struct Reference {
    /// The identifier between the delimiters (or sigil-adjacent for includes).
    pub name: String,
    /// The resolved, auto-escape-completed modifier chain, in application order.
    pub modifiers: Vec<ModifierRef>,
    /// Byte offset of the marker in the (stripped) source, for diagnostics.
    pub offset: usize,
}

/// One node of the compiled template tree.
pub enum Node {
    /// Literal bytes, emitted verbatim.
    Text(Vec<u8>),
    /// A `{{NAME[:mods]}}` substitution point.
    Variable(Reference),
    /// A `{{>NAME[:mods]}}` reference to another template.
    Include {
        /// The reference (name + resolved modifiers).
        reference: Reference,
        /// Strip mode to load the included template with.
        strip: StripMode,
        /// Context to load the included template with (see §4.5 on how
        /// this is derived, and why it becomes `NONE` when `reference` has
        /// explicit modifiers).
        included_context: TemplateContext,
    },
    /// A named, possibly-repeated block.
    Section {
        /// The section's name; the distinguished root section is named
        /// [`MAIN_SECTION_NAME`].
        name: String,
        /// The section's fully-resolved children.
        children: Vec<Node>,
    },
}

/// The reserved name of the tree's root section.
pub const MAIN_SECTION_NAME: &str = "__{{MAIN}}__";

impl Node {
    /// Constructs the (always-present) root section wrapping a template's
    /// top-level nodes.
    pub fn root(children: Vec<Node>) -> Node {
        Node::Section { name: MAIN_SECTION_NAME.to_string(), children }
    }
}

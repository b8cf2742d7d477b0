//! The node tree builder and auto-escape resolver (component F).
//!
//! Consumes the token stream from [`crate::lexer`], feeds literal text
//! through the HTML context parser when one is active, and attaches a
//! fully-resolved modifier chain to every `Variable`/`Include` node.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::html_parser::{AttributeType, HtmlParser, ParserMode, State as HtmlState};
use crate::lexer::{LexToken, Lexer, TokenKind};
use crate::modifiers::{ModifierInfo, XssClass};
use crate::node::{ModifierRef, Node, Reference, StripMode, TemplateContext, MAIN_SECTION_NAME};
use crate::registry::{self, REGISTRY};

const BI_SPACE: &str = "BI_SPACE";
const BI_NEWLINE: &str = "BI_NEWLINE";

/// Compiles stripped `source` (see [`crate::strip`]) into a node tree.
///
/// `path` is used only for diagnostics. Returns `Err` if the template has a
/// syntax error or violates the auto-escape policy; on success, the tree's
/// text slices borrow nothing — all bytes are owned, copied out of `source`.
pub fn build(path: &Path, source: &[u8], strip: StripMode, context: TemplateContext) -> Result<Node> {
    let mut parser = context.uses_html_parser().then(|| {
        HtmlParser::new(match context {
            TemplateContext::Js => ParserMode::Js,
            TemplateContext::Css => ParserMode::Css,
            TemplateContext::HtmlInTag => ParserMode::HtmlInTag,
            _ => ParserMode::Html,
        })
    });
    let mut builder = Builder {
        path: path.to_path_buf(),
        lexer: Lexer::new(source, strip),
        strip,
        context,
        parser: parser.as_mut(),
        indent: None,
    };
    let children = builder.build_section(MAIN_SECTION_NAME)?;
    Ok(Node::root(children))
}

struct Builder<'a> {
    path: PathBuf,
    lexer: Lexer<'a>,
    strip: StripMode,
    context: TemplateContext,
    parser: Option<&'a mut HtmlParser>,
    /// The trailing run of spaces/tabs after the most recent `\n` seen in
    /// plain text, used to indent multi-line includes (§4.4's indentation
    /// tracking). `None` once cleared by non-whitespace content.
    indent: Option<Vec<u8>>,
}

impl<'a> Builder<'a> {
    fn build_section(&mut self, parent_name: &str) -> Result<Vec<Node>> {
        let mut children = Vec::new();
        loop {
            let token = self.lexer.next_token();
            match token.kind {
                TokenKind::Null => {
                    if self.lexer.had_error() {
                        return Err(Error::InvalidIdentifier { path: self.path.clone(), offset: token.offset });
                    }
                    if parent_name != MAIN_SECTION_NAME {
                        return Err(Error::UnclosedSection {
                            path: self.path.clone(),
                            name: parent_name.to_string(),
                            offset: token.offset,
                        });
                    }
                    return Ok(children);
                }
                TokenKind::Text => {
                    let bytes = self.token_bytes(&token).to_vec();
                    self.track_indent(&bytes);
                    if let Some(parser) = self.parser.as_deref_mut() {
                        parser.parse(&bytes);
                        if parser.state() == HtmlState::Error {
                            return Err(Error::ContextParserFailed { path: self.path.clone(), offset: token.offset });
                        }
                    }
                    children.push(Node::Text(bytes));
                }
                TokenKind::Variable => {
                    self.indent = None;
                    let name = self.token_text(&token);
                    if name == BI_SPACE || name == BI_NEWLINE {
                        let literal: &[u8] = if name == BI_SPACE { b" " } else { b"\n" };
                        if let Some(parser) = self.parser.as_deref_mut() {
                            parser.parse(literal);
                        }
                        children.push(Node::Text(literal.to_vec()));
                        continue;
                    }
                    let reference = self.resolve_reference(&token, name)?;
                    children.push(Node::Variable(reference));
                }
                TokenKind::SectionStart => {
                    self.indent = None;
                    let name = self.token_text(&token);
                    let grandchildren = self.build_section(&name)?;
                    children.push(Node::Section { name, children: grandchildren });
                }
                TokenKind::SectionEnd => {
                    let name = self.token_text(&token);
                    if name != parent_name {
                        return Err(Error::MismatchedSectionEnd {
                            path: self.path.clone(),
                            expected: parent_name.to_string(),
                            found: name,
                            offset: token.offset,
                        });
                    }
                    return Ok(children);
                }
                TokenKind::Include => {
                    let pending_indent = self.indent.take();
                    let name = self.token_text(&token);
                    let has_explicit_modifiers = !token.modifiers.is_empty();
                    let mut reference = self.resolve_reference(&token, name)?;
                    if let Some(indent) = pending_indent {
                        let indent = String::from_utf8_lossy(&indent).into_owned();
                        reference.modifiers.insert(0, ModifierRef { info: builtin("prefix_line"), argument: format!("={indent}") });
                    }
                    let included_context = self.propagate_include_context();
                    if let Some(parser) = self.parser.as_deref() {
                        if parser.state() != HtmlState::Text {
                            log::warn!("{}: include at byte {} is not at a text position", self.path.display(), token.offset);
                        }
                    }
                    let final_context = if has_explicit_modifiers { TemplateContext::None } else { included_context };
                    children.push(Node::Include { reference, strip: self.strip, included_context: final_context });
                }
                TokenKind::Comment => {}
            }
        }
    }

    fn token_bytes(&self, token: &LexToken) -> Vec<u8> {
        self.lexer_source()[token.text.clone()].to_vec()
    }

    fn token_text(&self, token: &LexToken) -> String {
        String::from_utf8_lossy(&self.lexer_source()[token.text.clone()]).into_owned()
    }

    fn lexer_source(&self) -> &[u8] {
        // Safety net for borrow-splitting: the lexer exposes no accessor, so
        // re-derive the slice the same way `Lexer::new` received it. This
        // mirrors the token ranges the lexer itself produced.
        self.lexer.source_bytes()
    }

    fn track_indent(&mut self, text: &[u8]) {
        match memrchr_newline(text) {
            Some(nl_pos) => {
                let tail = &text[nl_pos + 1..];
                if tail.iter().all(|&b| b == b' ' || b == b'\t') {
                    self.indent = Some(tail.to_vec());
                } else {
                    self.indent = None;
                }
            }
            None => {
                // No newline anywhere in this chunk. At the very start of
                // the template this is equivalent to being right after a
                // newline (there is nothing before it but the start of the
                // buffer), so an all-whitespace leading run still counts
                // as indentation for a following include.
                if text.iter().all(|&b| b == b' ' || b == b'\t') {
                    self.indent = Some(text.to_vec());
                } else {
                    self.indent = None;
                }
            }
        }
    }

    fn propagate_include_context(&self) -> TemplateContext {
        let in_js = self.parser.as_deref().is_some_and(HtmlParser::in_js);
        match self.context {
            TemplateContext::Html | TemplateContext::Js if in_js => TemplateContext::Js,
            other => other,
        }
    }

    /// Builds a `Reference` for a Variable or Include token: resolves each
    /// in-template modifier via the registry, then runs the auto-escape
    /// resolver (§4.5) to complete the chain.
    fn resolve_reference(&mut self, token: &LexToken, name: String) -> Result<Reference> {
        let mut modifiers = Vec::with_capacity(token.modifiers.len());
        for raw in &token.modifiers {
            let info = REGISTRY
                .find(&raw.name, raw.value.as_deref())
                .ok_or_else(|| Error::BadModifierArgument { path: self.path.clone(), modifier: raw.name.clone(), offset: raw.offset })?;
            if info.value_required && raw.value.is_none() {
                return Err(Error::BadModifierArgument { path: self.path.clone(), modifier: raw.name.clone(), offset: raw.offset });
            }
            let argument = raw.value.as_deref().map(|v| format!("={v}")).unwrap_or_default();
            modifiers.push(ModifierRef { info, argument });
        }

        if self.context.auto_escapes() {
            self.reconcile_auto_escape(token.offset, &mut modifiers)?;
        }

        Ok(Reference { name, modifiers, offset: token.offset })
    }

    fn reconcile_auto_escape(&mut self, offset: usize, modifiers: &mut Vec<ModifierRef>) -> Result<()> {
        if let Some(last) = modifiers.last() {
            if last.info.long_name == "none" {
                return Ok(());
            }
        }
        let wanted = self.compute_context_modifiers(offset)?;
        if wanted.is_empty() {
            return Ok(());
        }
        if modifiers.is_empty() {
            modifiers.extend(wanted.into_iter().map(|info| ModifierRef { info, argument: String::new() }));
            return Ok(());
        }

        let covered = longest_covered_suffix(&wanted, modifiers);
        let missing = &wanted[..wanted.len() - covered];
        if !missing.is_empty() {
            log::warn!(
                "{}: auto-escape appending {} missing modifier(s) at byte {offset}",
                self.path.display(),
                missing.len(),
            );
            for info in missing {
                modifiers.push(ModifierRef { info: *info, argument: String::new() });
            }
        }
        Ok(())
    }

    /// Computes the context's required modifier list (§4.5's table),
    /// consulting the HTML parser when one is active.
    fn compute_context_modifiers(&mut self, offset: usize) -> Result<Vec<ModifierInfo>> {
        match self.context {
            TemplateContext::Manual | TemplateContext::None => Ok(Vec::new()),
            TemplateContext::Xml => Ok(vec![builtin("xml_escape")]),
            TemplateContext::Json => Ok(vec![builtin("javascript_escape")]),
            TemplateContext::Html | TemplateContext::Js | TemplateContext::Css | TemplateContext::HtmlInTag => {
                let parser = self.parser.as_deref_mut().expect("parser-backed context always has a parser");
                context_modifiers_from_parser(parser, &self.path, offset)
            }
        }
    }
}

fn memrchr_newline(bytes: &[u8]) -> Option<usize> {
    memchr::memrchr(b'\n', bytes)
}

fn builtin(name: &str) -> ModifierInfo {
    *registry::find_builtin(name, None).unwrap_or_else(|| panic!("missing built-in modifier '{name}'"))
}

fn builtin_specialized(name: &str, value: &str) -> ModifierInfo {
    *registry::find_builtin(name, Some(value)).unwrap_or_else(|| panic!("missing built-in modifier '{name}={value}'"))
}

fn context_modifiers_from_parser(parser: &mut HtmlParser, path: &Path, offset: usize) -> Result<Vec<ModifierInfo>> {
    match parser.state() {
        HtmlState::Error => Err(Error::ContextParserFailed { path: path.to_path_buf(), offset }),
        HtmlState::Text | HtmlState::Comment => Ok(vec![builtin("html_escape")]),
        HtmlState::Tag | HtmlState::Attr => {
            parser.insert_text();
            Ok(vec![builtin("cleanse_attribute")])
        }
        HtmlState::JsFile => {
            if parser.js_quoted() {
                Ok(vec![builtin("javascript_escape")])
            } else {
                Ok(vec![builtin("javascript_number")])
            }
        }
        HtmlState::CssFile => Ok(vec![builtin("cleanse_css")]),
        HtmlState::Value => {
            let attr_type = parser.attr_type();
            let quoted = parser.attr_quoted();
            let value_index = parser.value_index();
            let result = match attr_type {
                AttributeType::Uri => match (quoted, value_index) {
                    (true, 0) => Ok(vec![builtin_specialized("validate_url", "html")]),
                    (true, _) => Ok(vec![builtin("html_escape")]),
                    (false, 0) => Err(Error::AutoEscapePolicyViolation {
                        path: path.to_path_buf(),
                        offset,
                        reason: "unquoted URI attribute value cannot be auto-escaped",
                    }),
                    (false, _) => Ok(vec![builtin("url_query_escape")]),
                },
                AttributeType::Style => {
                    if quoted {
                        Ok(vec![builtin("cleanse_css")])
                    } else {
                        Err(Error::AutoEscapePolicyViolation {
                            path: path.to_path_buf(),
                            offset,
                            reason: "unquoted style attribute value cannot be auto-escaped",
                        })
                    }
                }
                AttributeType::Js => {
                    if !quoted {
                        Err(Error::AutoEscapePolicyViolation {
                            path: path.to_path_buf(),
                            offset,
                            reason: "unquoted JS-event attribute value cannot be auto-escaped",
                        })
                    } else if parser.js_quoted() {
                        Ok(vec![builtin("javascript_escape")])
                    } else {
                        Ok(vec![builtin("javascript_number")])
                    }
                }
                AttributeType::Regular | AttributeType::None => {
                    if quoted {
                        Ok(vec![builtin("html_escape")])
                    } else {
                        Ok(vec![builtin("cleanse_attribute")])
                    }
                }
            };
            parser.insert_text();
            result
        }
    }
}

/// §4.5.1: finds the length of the longest suffix of `wanted` already
/// covered by a (possibly filler-interspersed) suffix of `have`.
fn longest_covered_suffix(wanted: &[ModifierInfo], have: &[ModifierRef]) -> usize {
    'try_len: for try_len in (0..=wanted.len()).rev() {
        let mut remaining = try_len;
        let mut hi = have.len();
        while remaining > 0 {
            if hi == 0 {
                continue 'try_len;
            }
            hi -= 1;
            let target = &wanted[wanted.len() - remaining];
            let candidate = &have[hi];
            if registry::is_safe_alternative(target.base_name(), candidate.info.base_name()) {
                remaining -= 1;
            } else if candidate.info.xss_class == target.xss_class && target.xss_class != XssClass::Unique {
                // Neutral filler: consumed from `have` only.
            } else {
                continue 'try_len;
            }
        }
        return try_len;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn build_str(src: &str, strip: StripMode, context: TemplateContext) -> Result<Node> {
        build(Path::new("test.tpl"), src.as_bytes(), strip, context)
    }

    fn first_child(node: &Node) -> &Node {
        match node {
            Node::Section { children, .. } => &children[0],
            _ => panic!("expected root section"),
        }
    }

    #[test]
    fn empty_template_is_one_empty_text_node() {
        let tree = build_str("", StripMode::DoNotStrip, TemplateContext::Manual).unwrap();
        match tree {
            Node::Section { name, children } => {
                assert_eq!(name, MAIN_SECTION_NAME);
                assert_eq!(children.len(), 1);
                match &children[0] {
                    Node::Text(bytes) => assert!(bytes.is_empty()),
                    _ => panic!("expected Text node"),
                }
            }
            _ => panic!("expected root section"),
        }
    }

    #[test]
    fn unterminated_marker_is_error() {
        let err = build_str("hello {{X", StripMode::DoNotStrip, TemplateContext::Manual).unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier { .. }));
    }

    #[test]
    fn html_context_attaches_html_escape() {
        let tree = build_str("{{NAME}}", StripMode::DoNotStrip, TemplateContext::Html).unwrap();
        match first_child(&tree) {
            Node::Variable(reference) => {
                assert_eq!(reference.modifiers.len(), 1);
                assert_eq!(reference.modifiers[0].info.long_name, "html_escape");
            }
            _ => panic!("expected Variable node"),
        }
    }

    #[test]
    fn explicit_none_suppresses_auto_escape() {
        let tree = build_str("{{NAME:none}}", StripMode::DoNotStrip, TemplateContext::Html).unwrap();
        match first_child(&tree) {
            Node::Variable(reference) => {
                assert_eq!(reference.modifiers.len(), 1);
                assert_eq!(reference.modifiers[0].info.long_name, "none");
            }
            _ => panic!("expected Variable node"),
        }
    }

    #[test]
    fn mismatched_section_end_errors() {
        let err = build_str("{{#A}}x{{/B}}", StripMode::DoNotStrip, TemplateContext::Manual).unwrap_err();
        assert!(matches!(err, Error::MismatchedSectionEnd { .. }));
    }

    #[test]
    fn unquoted_url_in_href_is_policy_violation() {
        let err = build_str("<a href={{U}}>", StripMode::DoNotStrip, TemplateContext::Html).unwrap_err();
        assert!(matches!(err, Error::AutoEscapePolicyViolation { .. }));
    }
}

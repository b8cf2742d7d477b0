//! The expander (component G): walks a compiled node tree against a
//! dictionary stack, applying modifier chains, and streams output.

use std::path::Path;

use crate::cache::TemplateCache;
use crate::dictionary::{self, Dictionary};
use crate::emitter::{scratch_capacity_hint, Emitter};
use crate::modifiers::ModifierData;
use crate::node::{ModifierRef, Node, Reference, TemplateContext, MAIN_SECTION_NAME};

/// State threaded unchanged through an entire expansion, including across
/// include boundaries: the cache includes are loaded from, the template
/// root directory, the per-root-template global dict (§4.7's
/// "template-global dict", visible across includes but reset per root
/// expand call), and the opaque per-expand modifier context.
pub struct ExpandContext<'a> {
    /// The cache to load included templates from.
    pub cache: &'a TemplateCache,
    /// The directory include filenames are resolved against.
    pub root: &'a Path,
    /// The per-root-template dictionary consulted after the dict chain and
    /// before the process-global dictionary.
    pub template_global: &'a dyn Dictionary,
    /// Opaque data available to every modifier invoked during this expand.
    pub modifier_data: &'a ModifierData<'a>,
}

/// Expands `tree` against `dict`, writing output to `out`.
///
/// Returns `true` iff no sub-expansion failed (a missing or unloadable
/// include is the only failure mode; it does not abort expansion of
/// siblings, per §4.7).
pub fn expand(tree: &Node, dict: &dyn Dictionary, ctx: &ExpandContext<'_>, out: &mut dyn Emitter) -> bool {
    let mut stack: Vec<&dyn Dictionary> = vec![dict];
    expand_node(tree, &mut stack, ctx, out)
}

fn expand_node(node: &Node, stack: &mut Vec<&dyn Dictionary>, ctx: &ExpandContext<'_>, out: &mut dyn Emitter) -> bool {
    match node {
        Node::Text(bytes) => {
            out.append_bytes(bytes);
            true
        }
        Node::Variable(reference) => expand_variable(reference, stack, ctx, out),
        Node::Section { name, children } => expand_section(name, children, stack, ctx, out),
        Node::Include { reference, strip, included_context } => expand_include(reference, *strip, *included_context, stack, ctx, out),
    }
}

fn expand_variable(reference: &Reference, stack: &mut Vec<&dyn Dictionary>, ctx: &ExpandContext<'_>, out: &mut dyn Emitter) -> bool {
    let value = lookup_value(stack, ctx.template_global, &reference.name);
    let current = current_dict(stack);
    if current.should_annotate_output() {
        let detail = annotation_detail(reference);
        write_annotation_open(out, "VAR", &detail);
        apply_modifier_chain(&reference.modifiers, value.as_bytes(), ctx.modifier_data, out);
        write_annotation_close(out, "VAR");
    } else {
        apply_modifier_chain(&reference.modifiers, value.as_bytes(), ctx.modifier_data, out);
    }
    true
}

fn expand_children(children: &[Node], stack: &mut Vec<&dyn Dictionary>, ctx: &ExpandContext<'_>, out: &mut dyn Emitter) -> bool {
    let mut ok = true;
    for child in children {
        ok &= expand_node(child, stack, ctx, out);
    }
    ok
}

fn expand_section(name: &str, children: &[Node], stack: &mut Vec<&dyn Dictionary>, ctx: &ExpandContext<'_>, out: &mut dyn Emitter) -> bool {
    if name == MAIN_SECTION_NAME {
        return expand_children(children, stack, ctx, out);
    }
    if resolve_is_hidden_section(stack, name) {
        return true;
    }
    let subs = resolve_dictionaries(stack, name);
    let annotate_on = current_dict(stack).should_annotate_output();
    let iterations = subs.len().max(1);
    let mut ok = true;
    for i in 0..iterations {
        if let Some(&sub) = subs.get(i) {
            stack.push(sub);
        }
        if annotate_on {
            write_annotation_open(out, "SEC", name);
        }
        ok &= expand_children(children, stack, ctx, out);
        if annotate_on {
            write_annotation_close(out, "SEC");
        }
        if !subs.is_empty() {
            stack.pop();
        }
    }
    ok
}

fn expand_include(
    reference: &Reference,
    strip: crate::node::StripMode,
    included_context: TemplateContext,
    stack: &mut Vec<&dyn Dictionary>,
    ctx: &ExpandContext<'_>,
    out: &mut dyn Emitter,
) -> bool {
    let current = current_dict(stack);
    if current.is_hidden_template(&reference.name) {
        return true;
    }
    let subs = current.template_dictionaries(&reference.name);
    let annotate_on = current.should_annotate_output();
    let mut ok = true;
    for (index, &sub) in subs.iter().enumerate() {
        let Some(filename) = current.include_template_name(&reference.name, index) else {
            continue;
        };
        if filename.is_empty() {
            continue;
        }
        match ctx.cache.get(ctx.root, filename, strip, included_context) {
            Ok(tree) => {
                let mut body = Vec::new();
                let mut sub_stack: Vec<&dyn Dictionary> = vec![sub];
                ok &= expand_node(tree.as_ref(), &mut sub_stack, ctx, &mut body);
                if annotate_on {
                    let detail = strip_path_prefix(filename, current.template_path_start());
                    write_annotation_open(out, "INC", detail);
                    apply_modifier_chain(&reference.modifiers, &body, ctx.modifier_data, out);
                    write_annotation_close(out, "INC");
                } else {
                    apply_modifier_chain(&reference.modifiers, &body, ctx.modifier_data, out);
                }
            }
            Err(err) => {
                log::warn!("include '{}' iteration {index}: {err}", reference.name);
                ok = false;
            }
        }
    }
    ok
}

fn current_dict<'d>(stack: &[&'d dyn Dictionary]) -> &'d dyn Dictionary {
    *stack.last().expect("dictionary stack is never empty during expansion")
}

fn lookup_value(stack: &[&dyn Dictionary], template_global: &dyn Dictionary, name: &str) -> String {
    for dict in stack.iter().rev() {
        if let Some(v) = dict.value(name) {
            return v.to_string();
        }
    }
    if let Some(v) = template_global.value(name) {
        return v.to_string();
    }
    dictionary::process_global_value(name).unwrap_or_default()
}

fn resolve_is_hidden_section(stack: &[&dyn Dictionary], name: &str) -> bool {
    stack.iter().rev().any(|d| d.is_hidden_section(name))
}

fn resolve_dictionaries<'d>(stack: &[&'d dyn Dictionary], name: &str) -> Vec<&'d dyn Dictionary> {
    for dict in stack.iter().rev() {
        let subs = dict.dictionaries(name);
        if !subs.is_empty() {
            return subs;
        }
    }
    Vec::new()
}

/// Applies `modifiers` to `input` in order, with every stage but the last
/// writing into an intermediate buffer sized via
/// [`scratch_capacity_hint`]; the last stage writes directly to `out`.
fn apply_modifier_chain(modifiers: &[ModifierRef], input: &[u8], data: &ModifierData<'_>, out: &mut dyn Emitter) {
    match modifiers.split_last() {
        None => out.append_bytes(input),
        Some((last, rest)) => {
            let mut current = input.to_vec();
            for m in rest {
                let mut next = Vec::with_capacity(scratch_capacity_hint(current.len()));
                (m.info.func)(&current, &m.argument, data, &mut next);
                current = next;
            }
            (last.info.func)(&current, &last.argument, data, out);
        }
    }
}

fn annotation_detail(reference: &Reference) -> String {
    if reference.modifiers.is_empty() {
        reference.name.clone()
    } else {
        let mods: Vec<&str> = reference.modifiers.iter().map(|m| m.info.long_name).collect();
        format!("{}:{}", reference.name, mods.join(":"))
    }
}

fn strip_path_prefix<'a>(filename: &'a str, path_start: &str) -> &'a str {
    if path_start.is_empty() {
        filename
    } else {
        filename.strip_prefix(path_start).unwrap_or(filename)
    }
}

fn write_annotation_open(out: &mut dyn Emitter, kind: &str, detail: &str) {
    out.append_str("{{#");
    out.append_str(kind);
    out.append_str("=");
    out.append_str(detail);
    out.append_str("}}");
}

fn write_annotation_close(out: &mut dyn Emitter, kind: &str) {
    out.append_str("{{/");
    out.append_str(kind);
    out.append_str("}}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::dictionary::TemplateDictionary;
    use crate::node::StripMode;
    use std::path::Path;

    fn render(src: &str, context: TemplateContext, dict: &TemplateDictionary) -> (String, bool) {
        let tree = builder::build(Path::new("t.tpl"), src.as_bytes(), StripMode::DoNotStrip, context).unwrap();
        let cache = TemplateCache::new();
        let global = TemplateDictionary::new();
        let modifier_data = ModifierData::new();
        let ctx = ExpandContext { cache: &cache, root: Path::new("."), template_global: &global, modifier_data: &modifier_data };
        let mut out = String::new();
        let ok = expand(&tree, dict, &ctx, &mut out);
        (out, ok)
    }

    #[test]
    fn scenario_1_manual_context_does_not_escape() {
        let mut dict = TemplateDictionary::new();
        dict.set_value("NAME", "<b>");
        let (out, ok) = render("Hello {{NAME}}!", TemplateContext::Manual, &dict);
        assert!(ok);
        assert_eq!(out, "Hello <b>!");
    }

    #[test]
    fn scenario_2_html_context_escapes() {
        let mut dict = TemplateDictionary::new();
        dict.set_value("NAME", "<b>");
        let (out, ok) = render("Hello {{NAME}}!", TemplateContext::Html, &dict);
        assert!(ok);
        assert_eq!(out, "Hello &lt;b&gt;!");
    }

    #[test]
    fn scenario_3_bad_url_scheme_rewritten_to_hash() {
        let mut dict = TemplateDictionary::new();
        dict.set_value("U", "javascript:alert(1)");
        let (out, ok) = render("<a href='{{U}}'>x</a>", TemplateContext::Html, &dict);
        assert!(ok);
        assert_eq!(out, "<a href='#'>x</a>");
    }

    #[test]
    fn scenario_4_javascript_number_rejects_expression() {
        let mut dict = TemplateDictionary::new();
        dict.set_value("N", "1+1");
        let (out, _) = render("<script>var x={{N}};</script>", TemplateContext::Html, &dict);
        assert_eq!(out, "<script>var x=null;</script>");

        let mut dict2 = TemplateDictionary::new();
        dict2.set_value("N", "42");
        let (out2, _) = render("<script>var x={{N}};</script>", TemplateContext::Html, &dict2);
        assert_eq!(out2, "<script>var x=42;</script>");
    }

    #[test]
    fn scenario_5_section_iterates_once_per_sub_dict() {
        let mut dict = TemplateDictionary::new();
        dict.add_section_dictionary("S");
        dict.add_section_dictionary("S");
        let (out, ok) = render("{{#S}}x{{/S}}", TemplateContext::Manual, &dict);
        assert!(ok);
        assert_eq!(out, "xx");
    }

    #[test]
    fn unset_variable_emits_empty_string() {
        let dict = TemplateDictionary::new();
        let (out, ok) = render("[{{X}}]", TemplateContext::Manual, &dict);
        assert!(ok);
        assert_eq!(out, "[]");
    }

    #[test]
    fn section_with_no_sub_dicts_and_not_hidden_expands_once() {
        let dict = TemplateDictionary::new();
        let (out, ok) = render("{{#S}}x{{/S}}", TemplateContext::Manual, &dict);
        assert!(ok);
        assert_eq!(out, "x");
    }

    #[test]
    fn hidden_section_is_skipped_entirely() {
        let mut dict = TemplateDictionary::new();
        dict.add_section_dictionary("S");
        dict.hide_section("S");
        let (out, ok) = render("{{#S}}x{{/S}}", TemplateContext::Manual, &dict);
        assert!(ok);
        assert_eq!(out, "");
    }

    #[test]
    fn scenario_6_include_indentation_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("included.tpl"), "a\nb").unwrap();

        let tree = builder::build(Path::new("main.tpl"), b"  {{>T}}\n", StripMode::DoNotStrip, TemplateContext::Manual).unwrap();
        let cache = TemplateCache::new();
        let global = TemplateDictionary::new();
        let modifier_data = ModifierData::new();
        let ctx = ExpandContext { cache: &cache, root: dir.path(), template_global: &global, modifier_data: &modifier_data };

        let mut dict = TemplateDictionary::new();
        dict.add_include_dictionary("T", "included.tpl");

        let mut out = String::new();
        let ok = expand(&tree, &dict, &ctx, &mut out);
        assert!(ok);
        assert_eq!(out, "  a\n  b\n");
    }

    #[test]
    fn include_with_no_bound_sub_dict_emits_nothing() {
        let tree = builder::build(Path::new("main.tpl"), b"before{{>T}}after", StripMode::DoNotStrip, TemplateContext::Manual).unwrap();
        let cache = TemplateCache::new();
        let global = TemplateDictionary::new();
        let modifier_data = ModifierData::new();
        let ctx = ExpandContext { cache: &cache, root: Path::new("."), template_global: &global, modifier_data: &modifier_data };
        let dict = TemplateDictionary::new();
        let mut out = String::new();
        let ok = expand(&tree, &dict, &ctx, &mut out);
        assert!(ok);
        assert_eq!(out, "beforeafter");
    }
}

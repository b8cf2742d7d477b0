//! `tplc`: compile a template and expand it against a JSON dictionary.
//!
//! Usage: `tplc [--strip=none|blank-lines|whitespace] [--context=CONTEXT]
//! [--annotate] TEMPLATE DICTIONARY.json`
//!
//! `TEMPLATE` is resolved against the current directory, which also becomes
//! the include root. `DICTIONARY.json` maps variable/section/include names
//! to strings, nested objects (a single section iteration), or arrays of
//! objects (repeated iterations); see [`load_dictionary`].

use std::path::{Path, PathBuf};

use autoescape_tpl::{expand, Dictionary, ExpandContext, ModifierData, StripMode, TemplateCache, TemplateContext, TemplateDictionary};

/// Uses the [`Display`](core::fmt::Display) formatter for an error even when
/// the [`Debug`](core::fmt::Debug) formatter is requested.
struct DisplayError(Box<dyn std::error::Error>);

impl core::fmt::Debug for DisplayError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl<E: Into<Box<dyn std::error::Error>>> From<E> for DisplayError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

const USAGE: &str = "\
Usage: tplc [--strip=none|blank-lines|whitespace] [--context=CONTEXT]
            [--annotate] TEMPLATE DICTIONARY.json

CONTEXT is one of: manual, html, js, css, json, xml, html-in-tag (default: html).
";

fn parse_strip(s: &str) -> Result<StripMode, &'static str> {
    match s {
        "none" => Ok(StripMode::DoNotStrip),
        "blank-lines" => Ok(StripMode::StripBlankLines),
        "whitespace" => Ok(StripMode::StripWhitespace),
        _ => Err("--strip must be one of: none, blank-lines, whitespace"),
    }
}

fn parse_context(s: &str) -> Result<TemplateContext, &'static str> {
    match s {
        "manual" => Ok(TemplateContext::Manual),
        "html" => Ok(TemplateContext::Html),
        "js" => Ok(TemplateContext::Js),
        "css" => Ok(TemplateContext::Css),
        "json" => Ok(TemplateContext::Json),
        "xml" => Ok(TemplateContext::Xml),
        "html-in-tag" => Ok(TemplateContext::HtmlInTag),
        _ => Err("--context must be one of: manual, html, js, css, json, xml, html-in-tag"),
    }
}

/// Populates `dict` from a JSON value: strings become scalar values, objects
/// become a single bound section iteration, and arrays of objects become one
/// section iteration per element. A JSON object value whose key ends in
/// `".tpl"`-style naming isn't special-cased; includes are not expressible
/// from this CLI's dictionary format since there is no way to name the
/// included filename inline — use section/value testing only.
fn load_dictionary(dict: &mut TemplateDictionary, json: &serde_json::Value) {
    let serde_json::Value::Object(map) = json else {
        return;
    };
    for (key, value) in map {
        match value {
            serde_json::Value::String(s) => {
                dict.set_value(key.clone(), s.clone());
            }
            serde_json::Value::Bool(b) => {
                dict.set_value(key.clone(), b.to_string());
            }
            serde_json::Value::Number(n) => {
                dict.set_value(key.clone(), n.to_string());
            }
            serde_json::Value::Object(_) => {
                let sub = dict.add_section_dictionary(key.clone());
                load_dictionary(sub, value);
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    let sub = dict.add_section_dictionary(key.clone());
                    load_dictionary(sub, item);
                }
            }
            serde_json::Value::Null => {}
        }
    }
}

fn main() -> Result<(), DisplayError> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{USAGE}");
        return Ok(());
    }
    let strip = match args.opt_value_from_fn("--strip", parse_strip)? {
        Some(mode) => mode,
        None => StripMode::DoNotStrip,
    };
    let context = match args.opt_value_from_fn("--context", parse_context)? {
        Some(ctx) => ctx,
        None => TemplateContext::Html,
    };
    let annotate = args.contains("--annotate");

    let template: PathBuf = args.free_from_str().map_err(|_| format!("missing TEMPLATE argument\n\n{USAGE}"))?;
    let dictionary_path: PathBuf = args.free_from_str().map_err(|_| format!("missing DICTIONARY argument\n\n{USAGE}"))?;
    let remaining = args.finish();
    if !remaining.is_empty() {
        return Err(format!("unexpected extra arguments: {remaining:?}\n\n{USAGE}").into());
    }

    let root = template.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let filename = template.file_name().ok_or("TEMPLATE has no filename component")?.to_str().ok_or("TEMPLATE is not valid UTF-8")?;

    let dictionary_text = std::fs::read_to_string(&dictionary_path)?;
    let dictionary_json: serde_json::Value = serde_json::from_str(&dictionary_text)?;
    let mut dict = TemplateDictionary::new();
    load_dictionary(&mut dict, &dictionary_json);
    dict.set_should_annotate_output(annotate);

    let cache = TemplateCache::new();
    let tree = cache.get(root, filename, strip, context)?;

    let global = TemplateDictionary::new();
    let modifier_data = ModifierData::new();
    let ctx = ExpandContext { cache: &cache, root, template_global: &global, modifier_data: &modifier_data };

    let mut out = String::new();
    let ok = expand(&tree, &dict, &ctx, &mut out);
    print!("{out}");
    if !ok {
        log::warn!("one or more includes failed to expand; output may be incomplete");
        std::process::exit(1);
    }
    Ok(())
}

//! `tplcheck`: check template syntax and optionally list the variable,
//! section, and include names a template references.
//!
//! A Rust-idiomatic analogue of ctemplate's `make_tpl_varnames_h`: instead
//! of emitting a C++ header of `#define`d key constants, it prints the
//! sorted name list to stdout, suitable for diffing against a dictionary
//! schema in a pre-deploy check.
//!
//! Usage: `tplcheck [--context=CONTEXT] [--strip=MODE] [--varnames] FILE...`
//!
//! Exit code is the number of files that failed to parse (capped at 127,
//! matching the original tool's convention).

use std::path::PathBuf;
use std::process::ExitCode;

use autoescape_tpl::node::{StripMode, TemplateContext};
use autoescape_tpl::{builder, strip, varnames};

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
Usage: tplcheck [--context=CONTEXT] [--strip=MODE] [--varnames] FILE...

Checks each FILE for template syntax errors. With --varnames, also prints
the sorted set of variable/section/include names each file references.
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

fn main() -> Result<ExitCode, DisplayError> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    }
    let strip_mode = args.opt_value_from_fn("--strip", parse_strip)?.unwrap_or(StripMode::DoNotStrip);
    let context = args.opt_value_from_fn("--context", parse_context)?.unwrap_or(TemplateContext::Manual);
    let show_varnames = args.contains("--varnames");

    let files: Vec<PathBuf> = args.finish().into_iter().map(PathBuf::from).collect();
    if files.is_empty() {
        return Err(format!("must specify at least one template file\n\n{USAGE}").into());
    }

    let mut errors = 0u32;
    for path in &files {
        match std::fs::read(path) {
            Ok(bytes) => {
                let stripped = strip::strip(&bytes, strip_mode);
                match builder::build(path, &stripped, strip_mode, context) {
                    Ok(tree) => {
                        log::info!("{}: no syntax errors detected", path.display());
                        if show_varnames {
                            for name in varnames::collect_names(&tree) {
                                println!("{}\t{name}", path.display());
                            }
                        }
                    }
                    Err(err) => {
                        log::error!("{}: {err}", path.display());
                        errors += 1;
                    }
                }
            }
            Err(err) => {
                log::error!("{}: could not read file: {err}", path.display());
                errors += 1;
            }
        }
    }

    Ok(ExitCode::from(errors.min(127) as u8))
}

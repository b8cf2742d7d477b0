//! The modifier registry: built-in modifiers, process-wide extension
//! modifiers, and the per-process unknown-modifier table.
//!
//! Mirrors the three-tier lookup ctemplate itself uses: a small built-in
//! table checked first, then caller-registered extensions, then a growing
//! table of as-yet-unresolved names seen by the lexer (kept so later
//! references to the same unknown name are deduplicated rather than
//! re-allocated).

use parking_lot::RwLock;
use std::sync::LazyLock;

use crate::modifiers::{self, ModifierFn, ModifierInfo, XssClass};

macro_rules! modifier {
    ($long:expr, $short:expr, $value_required:expr, $class:expr, $func:expr) => {
        ModifierInfo {
            long_name: $long,
            short_name: $short,
            value_required: $value_required,
            xss_class: $class,
            func: $func,
        }
    };
}

/// The built-in modifiers, in registration order. Indices here are stable
/// and referenced by [`SAFE_ALTERNATIVES`].
pub static BUILTINS: &[ModifierInfo] = &[
    modifier!("html_escape", Some('h'), false, XssClass::WebStandard, modifiers::html_escape),
    modifier!("pre_escape", Some('p'), false, XssClass::WebStandard, modifiers::pre_escape),
    modifier!("snippet_escape", None, false, XssClass::WebStandard, modifiers::snippet_escape),
    modifier!("cleanse_attribute", None, false, XssClass::WebStandard, modifiers::cleanse_attribute),
    modifier!("cleanse_css", Some('c'), false, XssClass::WebStandard, modifiers::cleanse_css),
    modifier!("validate_url=html", None, true, XssClass::WebStandard, modifiers::validate_url_html_escape),
    modifier!("validate_url=javascript", None, true, XssClass::WebStandard, modifiers::validate_url_javascript_escape),
    modifier!("validate_url=css", None, true, XssClass::WebStandard, modifiers::validate_url_css_escape),
    modifier!("xml_escape", None, false, XssClass::WebStandard, modifiers::xml_escape),
    modifier!("javascript_escape", Some('j'), false, XssClass::WebStandard, modifiers::javascript_escape),
    modifier!("javascript_number", None, false, XssClass::WebStandard, modifiers::javascript_number),
    modifier!("url_query_escape", Some('u'), false, XssClass::WebStandard, modifiers::url_query_escape),
    modifier!("json_escape", Some('o'), false, XssClass::WebStandard, modifiers::json_escape),
    modifier!("prefix_line", None, true, XssClass::Unique, modifiers::prefix_line),
    modifier!("none", None, false, XssClass::Unique, modifiers::null),
];

/// The XSS-safe-alternative relation: for a base name, the set of other base
/// names whose output is an acceptable web-standard substitute. Transcribed
/// from ctemplate's own `g_modifiers` alternative lists, deduplicated across
/// the `=value`-specialized entries that collapse onto one name here.
pub static SAFE_ALTERNATIVES: phf::Map<&'static str, &'static [&'static str]> = phf::phf_map! {
    "html_escape" => &["snippet_escape", "pre_escape", "cleanse_attribute", "url_query_escape"],
    "pre_escape" => &["html_escape", "snippet_escape", "cleanse_attribute", "url_query_escape"],
    "snippet_escape" => &["html_escape", "pre_escape", "cleanse_attribute", "url_query_escape"],
    "xml_escape" => &["html_escape", "cleanse_attribute"],
    "json_escape" => &["javascript_escape"],
};

/// Looks up a modifier by its reference text as it appears after the `:` in
/// a template (e.g. `html_escape`, `h`, `validate_url=html`).
///
/// `name` is the bare modifier name (no leading `:`), `value` is the text
/// after `=` if present.
pub fn find_builtin(name: &str, value: Option<&str>) -> Option<&'static ModifierInfo> {
    let mut best: Option<&'static ModifierInfo> = None;
    for info in BUILTINS {
        let matches_name = info.base_name() == name
            || (name.chars().count() == 1 && info.short_name == name.chars().next());
        if !matches_name {
            continue;
        }
        match (info.specialization(), value) {
            (None, _) => {
                // An unspecialized entry always matches; keep looking for a
                // longer, more specific specialization.
                if best.is_none() {
                    best = Some(info);
                }
            }
            (Some(spec), Some(value)) if value.starts_with(spec) => {
                // Prefer the longest matching specialization.
                if best.map(|b| b.specialization().map_or(0, str::len)).unwrap_or(0) < spec.len() {
                    best = Some(info);
                }
            }
            _ => {}
        }
    }
    best
}

/// Returns whether `candidate` is a recognized safe substitute for `wanted`
/// under the built-in web-standard equivalence classes.
pub fn is_safe_alternative(wanted: &str, candidate: &str) -> bool {
    if wanted == candidate {
        return true;
    }
    SAFE_ALTERNATIVES
        .get(wanted)
        .is_some_and(|alts| alts.contains(&candidate))
}

/// A single caller-registered modifier, extension or XSS-safe.
#[derive(Clone, Copy)]
pub struct RegisteredModifier {
    /// The metadata users see through introspection; `xss_class` is always
    /// [`XssClass::Unique`] for an extension, or [`XssClass::Safe`] for one
    /// registered via [`Registry::add_xss_safe_modifier`].
    pub info: ModifierInfo,
}

/// The process-wide registry of extension, XSS-safe, and lazily-discovered
/// unknown modifiers.
///
/// Built-ins never change after process start and need no lock; extensions
/// are registered once at startup in the common case but the lock keeps
/// late registration (e.g. from a plugin loaded after the cache is already
/// warm) safe.
pub struct Registry {
    extensions: RwLock<Vec<RegisteredModifier>>,
    /// `x-*` names seen for the first time during lexing, registered lazily
    /// so later references to the same name are cheap and stable. See the
    /// design note on stable references to registry entries: we hand callers
    /// an owned `Copy` struct rather than a pointer into this vector, so
    /// reallocation on push is harmless.
    unknown: RwLock<Vec<&'static str>>,
}

impl Registry {
    fn new() -> Self {
        Self { extensions: RwLock::new(Vec::new()), unknown: RwLock::new(Vec::new()) }
    }

    /// Registers an extension modifier. Its XSS class is `Unique`: it is
    /// never silently substituted by the auto-escape resolver.
    ///
    /// Returns `false` (and registers nothing) if `long_name` does not start
    /// with `x-`, or a modifier with the same base name is already
    /// registered under a different specialization scheme.
    pub fn add_modifier(&self, long_name: &'static str, short_name: Option<char>, value_required: bool, func: ModifierFn) -> bool {
        self.add_with_class(long_name, short_name, value_required, func, XssClass::Unique)
    }

    /// Registers a modifier the template author is vouching for as already
    /// safe in context. Recorded with XSS class `Safe`; the resolver accepts
    /// it without inserting an escaper. Same conflict rules as
    /// [`Self::add_modifier`].
    pub fn add_xss_safe_modifier(&self, long_name: &'static str, short_name: Option<char>, value_required: bool, func: ModifierFn) -> bool {
        self.add_with_class(long_name, short_name, value_required, func, XssClass::Safe)
    }

    fn add_with_class(&self, long_name: &'static str, short_name: Option<char>, value_required: bool, func: ModifierFn, class: XssClass) -> bool {
        if !long_name.starts_with("x-") {
            return false;
        }
        let base = long_name.split('=').next().unwrap_or(long_name);
        let mut extensions = self.extensions.write();
        let conflicts = extensions.iter().any(|reg| reg.info.base_name() == base && reg.info.long_name == long_name);
        if conflicts {
            return false;
        }
        extensions.push(RegisteredModifier {
            info: ModifierInfo { long_name, short_name, value_required, xss_class: class, func },
        });
        true
    }

    /// Looks up a modifier reference across built-ins, then extensions,
    /// then previously-seen unknown names. An `x-*` name seen for the first
    /// time is registered as a `Unique`-class no-op placeholder.
    pub fn find(&self, name: &str, value: Option<&str>) -> Option<ModifierInfo> {
        if let Some(info) = find_builtin(name, value) {
            return Some(*info);
        }
        if let Some(info) = self.find_in(&self.extensions.read(), name, value) {
            return Some(info);
        }
        if name.starts_with("x-") {
            {
                let unknown = self.unknown.read();
                if let Some(&existing) = unknown.iter().find(|&&n| n == name) {
                    return Some(ModifierInfo {
                        long_name: existing,
                        short_name: None,
                        value_required: false,
                        xss_class: XssClass::Unique,
                        func: modifiers::null,
                    });
                }
            }
            let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
            self.unknown.write().push(leaked);
            log::warn!("unknown modifier '{name}' registered as a no-op placeholder");
            return Some(ModifierInfo {
                long_name: leaked,
                short_name: None,
                value_required: false,
                xss_class: XssClass::Unique,
                func: modifiers::null,
            });
        }
        None
    }

    fn find_in(&self, table: &[RegisteredModifier], name: &str, value: Option<&str>) -> Option<ModifierInfo> {
        let mut best: Option<ModifierInfo> = None;
        for reg in table {
            let info = reg.info;
            let matches_name = info.base_name() == name
                || (name.chars().count() == 1 && info.short_name == name.chars().next());
            if !matches_name {
                continue;
            }
            match (info.specialization(), value) {
                (None, _) => {
                    if best.is_none() {
                        best = Some(info);
                    }
                }
                (Some(spec), Some(value)) if value.starts_with(spec) => {
                    if best.map(|b| b.specialization().map_or(0, str::len)).unwrap_or(0) < spec.len() {
                        best = Some(info);
                    }
                }
                _ => {}
            }
        }
        best
    }
}

/// The process-wide modifier registry.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_builtin_by_long_name() {
        let info = find_builtin("html_escape", None).expect("html_escape registered");
        assert_eq!(info.long_name, "html_escape");
    }

    #[test]
    fn finds_builtin_by_short_name() {
        let info = find_builtin("h", None).expect("h registered");
        assert_eq!(info.long_name, "html_escape");
    }

    #[test]
    fn finds_specialized_validate_url() {
        let info = find_builtin("validate_url", Some("html")).expect("validate_url=html registered");
        assert_eq!(info.long_name, "validate_url=html");
    }

    #[test]
    fn safe_alternative_relation_is_not_symmetric_by_default() {
        assert!(is_safe_alternative("html_escape", "snippet_escape"));
        assert!(!is_safe_alternative("cleanse_attribute", "html_escape"));
    }

    #[test]
    fn every_modifier_is_its_own_safe_alternative() {
        assert!(is_safe_alternative("cleanse_css", "cleanse_css"));
    }
}

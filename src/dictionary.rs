//! The dictionary interface consumed by the expander (component I).
//!
//! The data-dictionary's storage is explicitly out of scope for this crate
//! (see the overview): callers may implement [`Dictionary`] however suits
//! their application. [`TemplateDictionary`] is one straightforward
//! reference implementation, built for tests and the `tplc` CLI tool.
//!
//! Per-node lookups here are deliberately *local* (this node only); the
//! "walks the parent chain" / "does not walk the parent chain" rules from
//! the interface contract are implemented once, in [`crate::expander`],
//! against a stack of `&dyn Dictionary` rather than duplicated into every
//! implementation.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::LazyLock;

/// A single dictionary node: scalar values, section sub-dictionaries, and
/// include sub-dictionaries bound at this level.
///
/// All accessors are local to this node. See the module docs for how
/// parent-chain semantics are layered on top by the expander.
pub trait Dictionary {
    /// The value bound to `name` at this node, or `None` if unbound here.
    fn value(&self, name: &str) -> Option<&str>;

    /// Whether this node explicitly marks `name`'s section as hidden.
    fn is_hidden_section(&self, name: &str) -> bool;

    /// The sub-dictionaries bound to section `name` at this node, or an
    /// empty list if nothing is bound here (the expander keeps walking up
    /// the chain until it finds a non-empty list or runs out of ancestors —
    /// either way, an unbound-but-not-hidden section still expands once
    /// against the current dict, per the boundary behavior in §8).
    fn dictionaries(&self, name: &str) -> Vec<&dyn Dictionary>;

    /// Whether this node explicitly marks include `name` as hidden. Checked
    /// only at the node active at the include site; never walks the chain.
    fn is_hidden_template(&self, name: &str) -> bool;

    /// The sub-dictionaries bound to include `name` at this node.
    fn template_dictionaries(&self, name: &str) -> Vec<&dyn Dictionary>;

    /// The filename bound to the `index`-th sub-dictionary of include `name`.
    fn include_template_name(&self, name: &str, index: usize) -> Option<&str>;

    /// Whether expansion should bracket output with annotation markers (§6.5).
    fn should_annotate_output(&self) -> bool;

    /// The filename prefix stripped from annotation details (§6.5).
    fn template_path_start(&self) -> &str;
}

/// An owned, in-memory reference implementation of [`Dictionary`].
#[derive(Default)]
pub struct TemplateDictionary {
    values: IndexMap<String, String>,
    hidden_sections: HashSet<String>,
    sections: IndexMap<String, Vec<TemplateDictionary>>,
    hidden_templates: HashSet<String>,
    includes: IndexMap<String, Vec<(String, TemplateDictionary)>>,
    annotate: bool,
    path_start: String,
}

impl TemplateDictionary {
    /// Creates an empty dictionary node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a scalar `value` to `name`, copied into the dictionary's own
    /// storage (mirroring the "entries are copied on insert" resource rule).
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Marks `name`'s section as hidden regardless of whether sub-dicts are
    /// later bound to it.
    pub fn hide_section(&mut self, name: impl Into<String>) -> &mut Self {
        self.hidden_sections.insert(name.into());
        self
    }

    /// Appends a new, empty sub-dictionary to section `name` and returns it
    /// for the caller to populate.
    pub fn add_section_dictionary(&mut self, name: impl Into<String>) -> &mut TemplateDictionary {
        let list = self.sections.entry(name.into()).or_default();
        list.push(TemplateDictionary::new());
        list.last_mut().expect("just pushed")
    }

    /// Marks include `name` as hidden.
    pub fn hide_template(&mut self, name: impl Into<String>) -> &mut Self {
        self.hidden_templates.insert(name.into());
        self
    }

    /// Appends a new sub-dictionary bound to include `name`, associated
    /// with the filename to load for this iteration.
    pub fn add_include_dictionary(&mut self, name: impl Into<String>, filename: impl Into<String>) -> &mut TemplateDictionary {
        let list = self.includes.entry(name.into()).or_default();
        list.push((filename.into(), TemplateDictionary::new()));
        &mut list.last_mut().expect("just pushed").1
    }

    /// Enables or disables annotation output for this dictionary subtree.
    pub fn set_should_annotate_output(&mut self, annotate: bool) -> &mut Self {
        self.annotate = annotate;
        self
    }

    /// Sets the path prefix stripped from annotation detail strings.
    pub fn set_template_path_start(&mut self, path_start: impl Into<String>) -> &mut Self {
        self.path_start = path_start.into();
        self
    }
}

impl Dictionary for TemplateDictionary {
    fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    fn is_hidden_section(&self, name: &str) -> bool {
        self.hidden_sections.contains(name)
    }

    fn dictionaries(&self, name: &str) -> Vec<&dyn Dictionary> {
        self.sections.get(name).map(|list| list.iter().map(|d| d as &dyn Dictionary).collect()).unwrap_or_default()
    }

    fn is_hidden_template(&self, name: &str) -> bool {
        self.hidden_templates.contains(name)
    }

    fn template_dictionaries(&self, name: &str) -> Vec<&dyn Dictionary> {
        self.includes.get(name).map(|list| list.iter().map(|(_, d)| d as &dyn Dictionary).collect()).unwrap_or_default()
    }

    fn include_template_name(&self, name: &str, index: usize) -> Option<&str> {
        self.includes.get(name)?.get(index).map(|(filename, _)| filename.as_str())
    }

    fn should_annotate_output(&self) -> bool {
        self.annotate
    }

    fn template_path_start(&self) -> &str {
        &self.path_start
    }
}

/// The process-wide dictionary consulted as the last tier of variable
/// lookup (§4.7: "self → parent chain → template-global dict →
/// process-global dict"), crossing every include and template boundary.
static PROCESS_GLOBAL: LazyLock<RwLock<TemplateDictionary>> = LazyLock::new(|| RwLock::new(TemplateDictionary::new()));

/// Binds `name` to `value` in the process-global dictionary, under a
/// writer lock. Entries here outlive any individual expand call.
pub fn set_global_value(name: impl Into<String>, value: impl Into<String>) {
    PROCESS_GLOBAL.write().set_value(name, value);
}

/// Looks up `name` in the process-global dictionary, under a reader lock.
pub fn process_global_value(name: &str) -> Option<String> {
    PROCESS_GLOBAL.read().value(name).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_miss_returns_none_locally() {
        let dict = TemplateDictionary::new();
        assert_eq!(dict.value("X"), None);
    }

    #[test]
    fn nested_section_dictionaries_are_independent() {
        let mut root = TemplateDictionary::new();
        root.add_section_dictionary("S").set_value("X", "1");
        root.add_section_dictionary("S").set_value("X", "2");
        let subs = root.dictionaries("S");
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].value("X"), Some("1"));
        assert_eq!(subs[1].value("X"), Some("2"));
    }

    #[test]
    fn unbound_section_returns_empty_list_not_hidden() {
        let root = TemplateDictionary::new();
        assert!(!root.is_hidden_section("S"));
        assert!(root.dictionaries("S").is_empty());
    }

    #[test]
    fn process_global_value_is_visible_process_wide() {
        set_global_value("GREETING", "hi");
        assert_eq!(process_global_value("GREETING").as_deref(), Some("hi"));
    }
}

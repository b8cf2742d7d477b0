//! Collects every variable, section, and include name referenced by a
//! compiled tree, for the `tplcheck` tool's `--varnames` mode.
//!
//! This mirrors what `make_tpl_varnames_h` did for the original project:
//! let a program check, ahead of deploying a dictionary, which keys a
//! template actually consults.

use std::collections::BTreeSet;

use crate::node::{Node, MAIN_SECTION_NAME};

/// Returns every distinct variable, section, and include name reachable
/// from `tree`, sorted.
pub fn collect_names(tree: &Node) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    walk(tree, &mut names);
    names
}

fn walk(node: &Node, names: &mut BTreeSet<String>) {
    match node {
        Node::Text(_) => {}
        Node::Variable(reference) => {
            names.insert(reference.name.clone());
        }
        Node::Include { reference, .. } => {
            names.insert(reference.name.clone());
        }
        Node::Section { name, children } => {
            if name != MAIN_SECTION_NAME {
                names.insert(name.clone());
            }
            for child in children {
                walk(child, names);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::node::{StripMode, TemplateContext};
    use std::path::Path;

    #[test]
    fn collects_variables_sections_and_includes() {
        let tree = builder::build(
            Path::new("t.tpl"),
            b"{{A}}{{#S}}{{B}}{{/S}}{{>INC}}",
            StripMode::DoNotStrip,
            TemplateContext::Manual,
        )
        .unwrap();
        let names = collect_names(&tree);
        assert_eq!(names, BTreeSet::from(["A".to_string(), "S".to_string(), "B".to_string(), "INC".to_string()]));
    }

    #[test]
    fn main_section_sentinel_is_not_reported() {
        let tree = builder::build(Path::new("t.tpl"), b"plain text", StripMode::DoNotStrip, TemplateContext::Manual).unwrap();
        assert!(collect_names(&tree).is_empty());
    }
}

//! Template cache (component H): compiles and caches node trees keyed by
//! `(absolute path, strip mode, context)`, with mtime-based reload.
//!
//! Lock discipline follows §4.8/§5: one process-wide mutex protects the
//! map of keys to slots; each slot then has its own reader/writer lock
//! covering its own mtime/status/tree. A thread never holds the map lock
//! while acquiring a slot's lock.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::builder;
use crate::error::{Error, Result};
use crate::node::{Node, StripMode, TemplateContext};
use crate::strip;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Status {
    Empty,
    Ready,
    ShouldReload,
    Error,
}

#[derive(Clone, Eq, PartialEq, Hash)]
struct Key {
    path: PathBuf,
    strip: StripMode,
    context: TemplateContext,
}

struct Entry {
    status: Status,
    mtime: Option<SystemTime>,
    tree: Option<Arc<Node>>,
}

/// One cached template and its own lock, independent of the cache-wide map.
struct Slot {
    path: PathBuf,
    strip: StripMode,
    context: TemplateContext,
    state: RwLock<Entry>,
}

impl Slot {
    fn new(path: PathBuf, strip: StripMode, context: TemplateContext) -> Self {
        Slot { path, strip, context, state: RwLock::new(Entry { status: Status::Empty, mtime: None, tree: None }) }
    }
}

/// The process-wide template cache.
#[derive(Default)]
pub struct TemplateCache {
    map: Mutex<HashMap<Key, Arc<Slot>>>,
}

impl TemplateCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled tree for `filename` (resolved against `root`),
    /// compiling or reloading it first if it is not yet `READY`.
    pub fn get(&self, root: &Path, filename: &str, strip: StripMode, context: TemplateContext) -> Result<Arc<Node>> {
        let path = resolve_path(root, filename);
        let effective = effective_strip(&path, strip);
        let key = Key { path: path.clone(), strip: effective, context };

        let slot = {
            let mut map = self.map.lock();
            Arc::clone(map.entry(key).or_insert_with(|| Arc::new(Slot::new(path.clone(), effective, context))))
        };

        let needs_reload = matches!(slot.state.read().status, Status::Empty | Status::ShouldReload);
        if needs_reload {
            perform_reload(&slot);
        }

        let entry = slot.state.read();
        match (entry.status, &entry.tree) {
            (Status::Ready, Some(tree)) => Ok(Arc::clone(tree)),
            _ => Err(Error::Unavailable(slot.path.clone())),
        }
    }

    /// Reloads every cached variant of `filename` (resolved against `root`)
    /// whose file mtime has changed since it was last loaded.
    pub fn reload_if_changed(&self, root: &Path, filename: &str) {
        let path = resolve_path(root, filename);
        let slots: Vec<Arc<Slot>> = {
            let map = self.map.lock();
            map.iter().filter(|(key, _)| key.path == path).map(|(_, slot)| Arc::clone(slot)).collect()
        };
        for slot in slots {
            perform_reload(&slot);
        }
    }

    /// Marks every cached template `SHOULD_RELOAD`; each reloads lazily the
    /// next time [`Self::get`] observes it.
    pub fn reload_all_if_changed(&self) {
        let slots: Vec<Arc<Slot>> = self.map.lock().values().cloned().collect();
        for slot in slots {
            let mut entry = slot.state.write();
            if entry.status == Status::Ready {
                entry.status = Status::ShouldReload;
            }
        }
    }

    /// Atomically drops every cached entry. Callers must not invoke this
    /// concurrently with an in-flight expansion (see §4.8).
    pub fn clear(&self) {
        *self.map.lock() = HashMap::new();
    }
}

fn resolve_path(root: &Path, filename: &str) -> PathBuf {
    let candidate = Path::new(filename);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}

/// `.js`-suffixed files requested with `STRIP_WHITESPACE` are silently
/// downgraded to `STRIP_BLANK_LINES` (§6.2), preserving the newlines that
/// terminate `//` comments.
fn effective_strip(path: &Path, strip: StripMode) -> StripMode {
    if strip == StripMode::StripWhitespace && path.extension().is_some_and(|ext| ext == "js") {
        StripMode::StripBlankLines
    } else {
        strip
    }
}

fn perform_reload(slot: &Slot) {
    let mut entry = slot.state.write();
    match fs::metadata(&slot.path) {
        Ok(meta) => {
            let mtime = meta.modified().ok();
            if entry.status == Status::Ready && entry.tree.is_some() && mtime == entry.mtime {
                return;
            }
            match fs::read(&slot.path) {
                Ok(bytes) => {
                    let stripped = strip::strip(&bytes, slot.strip);
                    match builder::build(&slot.path, &stripped, slot.strip, slot.context) {
                        Ok(tree) => {
                            entry.tree = Some(Arc::new(tree));
                            entry.mtime = mtime;
                            entry.status = Status::Ready;
                        }
                        Err(err) => {
                            log::error!("{}: compile failed: {err}", slot.path.display());
                            entry.status = Status::Error;
                        }
                    }
                }
                Err(io_err) => {
                    log::warn!("{}: read failed, keeping prior tree if any: {io_err}", slot.path.display());
                    entry.status = if entry.tree.is_some() { Status::Ready } else { Status::Error };
                }
            }
        }
        Err(io_err) => {
            log::warn!("{}: stat failed, keeping prior tree if any: {io_err}", slot.path.display());
            entry.status = if entry.tree.is_some() { Status::Ready } else { Status::Error };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn write_tpl(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn compiles_and_caches_a_template() {
        let dir = tempfile::tempdir().unwrap();
        write_tpl(&dir, "hello.tpl", "Hello {{NAME}}!");
        let cache = TemplateCache::new();
        let tree = cache.get(dir.path(), "hello.tpl", StripMode::DoNotStrip, TemplateContext::Manual).unwrap();
        assert!(matches!(*tree, Node::Section { .. }));
        let tree2 = cache.get(dir.path(), "hello.tpl", StripMode::DoNotStrip, TemplateContext::Manual).unwrap();
        assert!(Arc::ptr_eq(&tree, &tree2));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TemplateCache::new();
        let err = cache.get(dir.path(), "missing.tpl", StripMode::DoNotStrip, TemplateContext::Manual).unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[test]
    fn js_strip_whitespace_downgrades_to_strip_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_tpl(&dir, "a.js", "var x = 1; // {{NOTE}}\n");
        let cache = TemplateCache::new();
        // Would corrupt the trailing line comment under STRIP_WHITESPACE if
        // the downgrade didn't apply; just confirm it compiles successfully.
        cache.get(dir.path(), "a.js", StripMode::StripWhitespace, TemplateContext::Manual).unwrap();
    }

    #[test]
    fn clear_forces_recompilation() {
        let dir = tempfile::tempdir().unwrap();
        write_tpl(&dir, "hello.tpl", "Hello {{NAME}}!");
        let cache = TemplateCache::new();
        let tree = cache.get(dir.path(), "hello.tpl", StripMode::DoNotStrip, TemplateContext::Manual).unwrap();
        cache.clear();
        let tree2 = cache.get(dir.path(), "hello.tpl", StripMode::DoNotStrip, TemplateContext::Manual).unwrap();
        assert!(!Arc::ptr_eq(&tree, &tree2));
    }
}

//! Error types shared across the compiler, resolver, cache, and expander.

use std::path::PathBuf;

/// Errors that can occur while compiling or expanding a template.
///
/// These never cross the public API as panics; a syntax or policy error
/// instead flips the owning [`Template`](crate::cache::Template)'s status to
/// `Error` and is reported to the caller as an `Err` from whichever
/// operation observed it first.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The `{{` delimiter was opened but never closed before the input ran out.
    #[error("{path}: unterminated '{{{{' starting at byte {offset}")]
    UnterminatedMarker {
        /// The template the error occurred in.
        path: PathBuf,
        /// Byte offset of the opening delimiter.
        offset: usize,
    },

    /// An identifier inside `{{…}}` contained a byte outside `[A-Za-z0-9_]`.
    #[error("{path}: invalid identifier at byte {offset}")]
    InvalidIdentifier {
        /// The template the error occurred in.
        path: PathBuf,
        /// Byte offset of the offending identifier.
        offset: usize,
    },

    /// A `{{#SECTION}}` was never matched by a `{{/SECTION}}` of the same name.
    #[error("{path}: section '{name}' starting at byte {offset} was never closed")]
    UnclosedSection {
        /// The template the error occurred in.
        path: PathBuf,
        /// The section name.
        name: String,
        /// Byte offset of the opening marker.
        offset: usize,
    },

    /// A `{{/SECTION}}` did not match the name of the section it closes.
    #[error("{path}: section end '{found}' does not match open section '{expected}' at byte {offset}")]
    MismatchedSectionEnd {
        /// The template the error occurred in.
        path: PathBuf,
        /// The name that was expected to close.
        expected: String,
        /// The name actually found.
        found: String,
        /// Byte offset of the mismatched end marker.
        offset: usize,
    },

    /// A modifier required a `=value` argument but none was given, or forbade
    /// one but one was given anyway.
    #[error("{path}: modifier ':{modifier}' at byte {offset} has a bad argument")]
    BadModifierArgument {
        /// The template the error occurred in.
        path: PathBuf,
        /// The modifier name.
        modifier: String,
        /// Byte offset of the modifier reference.
        offset: usize,
    },

    /// A modifier chain was attached to a token kind that may not carry one
    /// (`SECTION_START`, `SECTION_END`, or `COMMENT`).
    #[error("{path}: modifiers are not allowed on this marker at byte {offset}")]
    ModifiersNotAllowed {
        /// The template the error occurred in.
        path: PathBuf,
        /// Byte offset of the marker.
        offset: usize,
    },

    /// Auto-escape determined that a variable sits somewhere the context
    /// parser cannot safely escape: an unquoted URL, unquoted style
    /// attribute, or unquoted JS-event attribute.
    #[error("{path}: byte {offset}: {reason}")]
    AutoEscapePolicyViolation {
        /// The template the error occurred in.
        path: PathBuf,
        /// Byte offset of the variable.
        offset: usize,
        /// A human-readable description of the violated rule.
        reason: &'static str,
    },

    /// The HTML/JS/CSS context parser itself hit a state it cannot recover
    /// from (e.g. text fed to it after it already reported `ERROR`).
    #[error("{path}: HTML context parser failed near byte {offset}")]
    ContextParserFailed {
        /// The template the error occurred in.
        path: PathBuf,
        /// Approximate byte offset in the stripped source.
        offset: usize,
    },

    /// Reading the template source from disk failed.
    #[error("{path}: I/O error: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The template is not currently available: it is missing, or its last
    /// compile failed and no prior usable tree exists.
    #[error("{0}: template unavailable")]
    Unavailable(PathBuf),

    /// A configuration file could not be parsed.
    #[error("{path}: invalid configuration: {source}")]
    InvalidConfig {
        /// The configuration file.
        path: PathBuf,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// A convenience alias for fallible compiler/expander operations.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

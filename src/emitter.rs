//! The output sink used by modifiers and the expander.

/// A minimal append-only byte sink.
///
/// Modifiers never allocate on the caller's behalf; they write their
/// transformed output directly through an `Emitter`. `String` and `Vec<u8>`
/// both implement it so modifiers can target either a final output buffer or
/// an intermediate scratch buffer in a chain.
pub trait Emitter {
    /// Appends a raw byte slice.
    fn append_bytes(&mut self, bytes: &[u8]);

    /// Appends a single byte.
    #[inline]
    fn append_byte(&mut self, byte: u8) {
        self.append_bytes(&[byte]);
    }

    /// Appends a `str` slice.
    #[inline]
    fn append_str(&mut self, s: &str) {
        self.append_bytes(s.as_bytes());
    }

    /// Appends a single `char`, UTF-8 encoded.
    #[inline]
    fn append_char(&mut self, c: char) {
        let mut buf = [0u8; 4];
        self.append_bytes(c.encode_utf8(&mut buf).as_bytes());
    }
}

impl Emitter for String {
    /// Appends raw bytes to the string.
    ///
    /// All built-in modifiers only ever pass through byte ranges copied
    /// verbatim from a `&str` input, or ASCII escape sequences they
    /// construct themselves, so `bytes` is always valid UTF-8 in practice.
    /// Anything that is not is replaced with `U+FFFD`, matching what a
    /// genuinely malformed multi-byte sequence would do if it reached here.
    #[inline]
    fn append_bytes(&mut self, bytes: &[u8]) {
        match std::str::from_utf8(bytes) {
            Ok(s) => self.push_str(s),
            Err(_) => self.push_str(&String::from_utf8_lossy(bytes)),
        }
    }

    #[inline]
    fn append_byte(&mut self, byte: u8) {
        debug_assert!(byte.is_ascii(), "non-ASCII byte pushed through String::append_byte");
        self.push(byte as char);
    }

    #[inline]
    fn append_str(&mut self, s: &str) {
        self.push_str(s);
    }

    #[inline]
    fn append_char(&mut self, c: char) {
        self.push(c);
    }
}

impl Emitter for Vec<u8> {
    #[inline]
    fn append_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    #[inline]
    fn append_byte(&mut self, byte: u8) {
        self.push(byte);
    }
}

/// Returns the scratch-buffer capacity hint used for intermediate modifier
/// chain buffers: `len + len/8 + 16`.
///
/// This captures the observed expansion factor of the escape modifiers (see
/// design notes on modifier chain performance).
#[inline]
pub fn scratch_capacity_hint(len: usize) -> usize {
    len + len / 8 + 16
}

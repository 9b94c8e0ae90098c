//! Scrubbable secret buffers.
//!
//! Passwords, `user:pass` strings, digest A1 concatenations and decrypted
//! credential files are held in a [`SecretBuf`]. The buffer is overwritten by
//! [`SecretBuf::wipe`], and `Drop` wipes it too, so every exit path of the
//! owning scope releases the material, including `?` early returns.

use std::fmt;

use zeroize::Zeroize;

/// A growable byte buffer whose contents are zeroized on drop.
#[derive(Default)]
pub struct SecretBuf {
    bytes: Vec<u8>,
}

impl SecretBuf {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Pre-size the buffer so appends never reallocate and leave copies behind.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { bytes: Vec::with_capacity(capacity) }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = Self::with_capacity(bytes.len());
        buf.bytes.extend_from_slice(bytes);
        buf
    }

    /// Take ownership of `bytes`; the vector is wiped when this value drops.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn push(&mut self, byte: u8) {
        self.reserve_exact_for(1);
        self.bytes.push(byte);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.reserve_exact_for(bytes.len());
        self.bytes.extend_from_slice(bytes);
    }

    /// Grow by hand so the old allocation is zeroized instead of being
    /// released with secret bytes still in it.
    fn reserve_exact_for(&mut self, additional: usize) {
        let needed = self.bytes.len() + additional;
        if needed <= self.bytes.capacity() {
            return;
        }
        let mut grown = Vec::with_capacity(needed.max(self.bytes.capacity() * 2));
        grown.extend_from_slice(&self.bytes);
        self.bytes.zeroize();
        self.bytes = grown;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// View the contents as UTF-8, if they are.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overwrite the contents with zeros and empty the buffer.
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for SecretBuf {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl PartialEq for SecretBuf {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SecretBuf {}

impl fmt::Debug for SecretBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBuf([REDACTED; {}])", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wipe_clears_contents() {
        let mut buf = SecretBuf::from_slice(b"user:pass");
        assert_eq!(buf.as_str(), Some("user:pass"));
        buf.wipe();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_growth_keeps_contents() {
        let mut buf = SecretBuf::with_capacity(2);
        buf.extend_from_slice(b"alice");
        buf.push(b':');
        buf.extend_from_slice(b"wonderland");
        assert_eq!(buf.as_bytes(), b"alice:wonderland");
    }

    #[test]
    fn test_debug_is_redacted() {
        let buf = SecretBuf::from_slice(b"hunter2");
        let shown = format!("{:?}", buf);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("REDACTED"));
    }
}

//! Interned string and byte constants.
//!
//! Constants live in linear memory starting at the configured data offset.
//! Each distinct byte sequence is stored once; a constant value is built at
//! run time as `struct.new $STRING (offset) (len)` over its segment.

use rustc_hash::FxHashMap;

/// Module-wide constant pool.
#[derive(Debug)]
pub struct StringPool {
    base: u32,
    next: u32,
    segments: Vec<(u32, Vec<u8>)>,
    index: FxHashMap<Vec<u8>, u32>,
}

impl StringPool {
    pub fn new(base: u32) -> Self {
        Self {
            base,
            next: base,
            segments: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Intern `bytes`, returning `(offset, len)`.
    pub fn intern(&mut self, bytes: &[u8]) -> (u32, u32) {
        let len = bytes.len() as u32;
        if let Some(&offset) = self.index.get(bytes) {
            return (offset, len);
        }
        let offset = self.next;
        self.next += len;
        self.index.insert(bytes.to_vec(), offset);
        self.segments.push((offset, bytes.to_vec()));
        (offset, len)
    }

    pub fn intern_str(&mut self, s: &str) -> (u32, u32) {
        self.intern(s.as_bytes())
    }

    /// First byte past the last constant, rounded up to 8.
    pub fn end(&self) -> u32 {
        (self.next + 7) & !7
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// `(data ...)` segment declarations.
    pub fn segments(&self) -> impl Iterator<Item = String> + '_ {
        self.segments
            .iter()
            .filter(|(_, bytes)| !bytes.is_empty())
            .map(|(offset, bytes)| {
                format!("(data (i32.const {offset}) \"{}\")", escape_bytes(bytes))
            })
    }
}

/// Escape bytes for a WAT string literal.
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{b:02x}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut pool = StringPool::new(2048);
        assert_eq!(pool.intern_str("hello"), (2048, 5));
        assert_eq!(pool.intern_str("world"), (2053, 5));
        assert_eq!(pool.intern_str("hello"), (2048, 5));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.end(), 2064);
    }

    #[test]
    fn empty_string_has_no_segment() {
        let mut pool = StringPool::new(100);
        assert_eq!(pool.intern_str(""), (100, 0));
        assert_eq!(pool.segments().count(), 0);
    }

    #[test]
    fn escapes_non_printable() {
        assert_eq!(escape_bytes(b"a\"b\\c\n"), "a\\\"b\\\\c\\0a");
        assert_eq!(escape_bytes("é".as_bytes()), "\\c3\\a9");
    }
}

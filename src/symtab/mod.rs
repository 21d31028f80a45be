//! Bidirectional symbol table: instrument name to small index.
//!
//! Forward lookups go through a double-array [`Trie`]; reverse lookups
//! through a flat index-addressed name array. Index 0 is reserved and
//! never assigned; indices grow monotonically and, once assigned, are
//! never reused or renamed within a file's lifetime short of an
//! explicit administrative unbind.

pub mod trie;

pub use trie::Trie;

use crate::endian::Endianness;
use crate::error::{Result, StoreError};

/// Current serialization version, recorded in the file header.
pub const SYMTAB_VERSION: u16 = 1;

/// Name/index map backing the symbol field of record headers.
#[derive(Debug, Default)]
pub struct SymbolTable {
    trie: Trie,
    /// Indexed by symbol index; slot 0 reserved, unbound slots empty.
    names: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            trie: Trie::new(),
            names: vec![String::new()],
        }
    }

    /// Number of live symbols.
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    /// Index for `name`, assigning the next free index for an unseen
    /// name. Assignment is monotonic: indices are handed out in first
    /// resolution order starting at 1.
    pub fn resolve(&mut self, name: &str) -> Result<u16> {
        if let Some(idx) = self.trie.get(name.as_bytes()) {
            return Ok(idx as u16);
        }
        let next = self.names.len();
        if next > u16::MAX as usize {
            return Err(StoreError::SymbolOverflow(next));
        }
        self.trie.insert(name.as_bytes(), next as u32);
        self.names.push(name.to_string());
        Ok(next as u16)
    }

    /// Index bound to `name`, without assigning one.
    pub fn get(&self, name: &str) -> Option<u16> {
        self.trie.get(name.as_bytes()).map(|v| v as u16)
    }

    /// Name bound to `index`, if any.
    pub fn name(&self, index: u16) -> Option<&str> {
        self.names
            .get(index as usize)
            .filter(|n| !n.is_empty())
            .map(String::as_str)
    }

    /// Bind `name` to an index chosen by the caller (table merge
    /// path).
    ///
    /// Idempotent for identical bindings; a bind that would overwrite a
    /// different existing binding on either side is rejected.
    pub fn bind(&mut self, name: &str, index: u16) -> Result<()> {
        if index == 0 {
            return Err(StoreError::InvalidFormat(
                "symbol index 0 is reserved".into(),
            ));
        }
        if let Some(bound) = self.trie.get(name.as_bytes()) {
            return if bound as u16 == index {
                Ok(())
            } else {
                Err(StoreError::SymbolConflict {
                    name: name.to_string(),
                    bound: bound as u16,
                    requested: index,
                })
            };
        }
        if let Some(existing) = self.name(index) {
            // Index already names a different symbol.
            return Err(StoreError::SymbolConflict {
                name: existing.to_string(),
                bound: index,
                requested: index,
            });
        }
        if self.names.len() <= index as usize {
            self.names.resize(index as usize + 1, String::new());
        }
        self.trie.insert(name.as_bytes(), index as u32);
        self.names[index as usize] = name.to_string();
        Ok(())
    }

    /// Drop a binding. The index is retired, never reassigned by
    /// [`SymbolTable::resolve`].
    pub fn unbind(&mut self, name: &str) -> Option<u16> {
        let idx = self.trie.remove(name.as_bytes())? as u16;
        if let Some(slot) = self.names.get_mut(idx as usize) {
            slot.clear();
        }
        Some(idx)
    }

    /// All live (index, name) pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.is_empty())
            .map(|(i, n)| (i as u16, n.as_str()))
    }

    // ── Serialization ──────────────────────────────────────────────

    pub fn serialized_size(&self) -> usize {
        self.trie.serialized_size()
    }

    /// Write the table in the file's byte order.
    pub fn write_to<W: std::io::Write>(&self, w: &mut W, endian: Endianness) -> Result<()> {
        self.trie.write_to(w, endian)
    }

    /// Parse a serialized table; names are rebuilt by walking the trie.
    /// Returns the table and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8], endian: Endianness) -> Result<(Self, usize)> {
        let (trie, consumed) = Trie::from_bytes(bytes, endian)?;
        let mut names: Vec<String> = vec![String::new()];
        let mut bad = None;
        trie.for_each(|key, value| {
            let idx = value as usize;
            if idx == 0 || idx > u16::MAX as usize {
                bad = Some(value);
                return;
            }
            if names.len() <= idx {
                names.resize(idx + 1, String::new());
            }
            names[idx] = String::from_utf8_lossy(key).into_owned();
        });
        if let Some(value) = bad {
            return Err(StoreError::InvalidFormat(format!(
                "symbol table entry with out-of-range index {}",
                value
            )));
        }
        Ok((Self { trie, names }, consumed))
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_assigns_monotonic_indices() {
        let mut table = SymbolTable::new();
        assert_eq!(table.resolve("EUR.USD").unwrap(), 1);
        assert_eq!(table.resolve("GBP.USD").unwrap(), 2);
        assert_eq!(table.resolve("EUR.USD").unwrap(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_name_reverse_lookup() {
        let mut table = SymbolTable::new();
        let idx = table.resolve("USD.JPY").unwrap();
        assert_eq!(table.name(idx), Some("USD.JPY"));
        assert_eq!(table.name(0), None);
        assert_eq!(table.name(999), None);
    }

    #[test]
    fn test_resolve_name_roundtrip() {
        let mut table = SymbolTable::new();
        for name in ["AAPL", "MSFT", "ES.Z26", "6E.H27", "AAPL"] {
            let idx = table.resolve(name).unwrap();
            assert_eq!(table.name(idx), Some(name));
        }
    }

    #[test]
    fn test_bind_idempotent_and_conflicting() {
        let mut table = SymbolTable::new();
        table.bind("EUR.USD", 5).unwrap();
        table.bind("EUR.USD", 5).unwrap(); // same binding: no-op

        let err = table.bind("EUR.USD", 6).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SymbolConflict { bound: 5, requested: 6, .. }
        ));

        let err = table.bind("GBP.USD", 5).unwrap_err();
        assert!(matches!(err, StoreError::SymbolConflict { .. }));
    }

    #[test]
    fn test_bind_rejects_reserved_index() {
        let mut table = SymbolTable::new();
        assert!(table.bind("X", 0).is_err());
    }

    #[test]
    fn test_resolve_after_bind_skips_taken_index() {
        let mut table = SymbolTable::new();
        table.bind("EUR.USD", 3).unwrap();
        // Fresh names go past the highest slot, not into the gap below.
        assert_eq!(table.resolve("GBP.USD").unwrap(), 4);
        assert_eq!(table.resolve("EUR.USD").unwrap(), 3);
    }

    #[test]
    fn test_unbind_retires_index() {
        let mut table = SymbolTable::new();
        table.resolve("EUR.USD").unwrap();
        table.resolve("GBP.USD").unwrap();
        assert_eq!(table.unbind("EUR.USD"), Some(1));
        assert_eq!(table.name(1), None);
        assert_eq!(table.unbind("EUR.USD"), None);
        // Index 1 is never handed out again.
        assert_eq!(table.resolve("USD.JPY").unwrap(), 3);
    }

    #[test]
    fn test_iter_in_index_order() {
        let mut table = SymbolTable::new();
        table.resolve("B").unwrap();
        table.resolve("A").unwrap();
        table.resolve("C").unwrap();
        let pairs: Vec<(u16, String)> =
            table.iter().map(|(i, n)| (i, n.to_string())).collect();
        assert_eq!(
            pairs,
            vec![(1, "B".into()), (2, "A".into()), (3, "C".into())]
        );
    }

    #[test]
    fn test_serialize_roundtrip_both_orders() {
        let mut table = SymbolTable::new();
        for name in ["EUR.USD", "GBP.USD", "USD.JPY", "XAU.USD"] {
            table.resolve(name).unwrap();
        }

        for endian in [Endianness::Little, Endianness::Big] {
            let mut buf = Vec::new();
            table.write_to(&mut buf, endian).unwrap();
            assert_eq!(buf.len(), table.serialized_size());

            let (parsed, consumed) = SymbolTable::from_bytes(&buf, endian).unwrap();
            assert_eq!(consumed, buf.len());
            assert_eq!(parsed.len(), 4);
            assert_eq!(parsed.name(1), Some("EUR.USD"));
            assert_eq!(parsed.name(4), Some("XAU.USD"));
            let mut reparsed = parsed;
            assert_eq!(reparsed.resolve("GBP.USD").unwrap(), 2);
            assert_eq!(reparsed.resolve("NEW.SYM").unwrap(), 5);
        }
    }

    #[test]
    fn test_from_bytes_truncated() {
        let mut table = SymbolTable::new();
        table.resolve("EUR.USD").unwrap();
        let mut buf = Vec::new();
        table.write_to(&mut buf, Endianness::Little).unwrap();
        assert!(SymbolTable::from_bytes(&buf[..buf.len() - 2], Endianness::Little).is_err());
    }
}

//! Double-array trie over byte strings.
//!
//! Two parallel growable arrays encode the transition table: `BASE`
//! holds each node's child offset (or, negated, a reference into the
//! tail pool), `CHECK` holds each cell's parent so a transition
//! `BASE[s] + code` is valid only when `CHECK[BASE[s] + code] == s`.
//! Unmatched suffixes live out-of-line in tail blocks together with
//! the stored value.
//!
//! ## Cell conventions
//!
//! ```text
//! index 0     never used
//! index 1     root
//! CHECK == 0  vacant cell
//! BASE >= 0   internal node (children at BASE + code)
//! BASE < 0    leaf: tail id is -BASE - 1
//! ```
//!
//! Byte codes are `b + 2` (2..=257); code 1 is the terminator edge
//! taken when a key ends at an internal node. Vacated cells are kept
//! in an explicit free list rather than linked through the arrays, so
//! the vacancy invariant (`CHECK == 0`) stays independently checkable.

use crate::endian::Endianness;
use crate::error::{Result, StoreError};

const ROOT: usize = 1;
/// Terminator edge code.
const TERM: usize = 1;
/// Highest edge code (byte 255).
const MAX_CODE: usize = 257;

#[inline]
fn code(b: u8) -> usize {
    b as usize + 2
}

/// One out-of-line suffix block. `None` slots are free and reusable.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Tail {
    suffix: Vec<u8>,
    value: u32,
}

/// Double-array trie mapping byte strings to u32 values.
#[derive(Debug, Default)]
pub struct Trie {
    base: Vec<i32>,
    check: Vec<u32>,
    tails: Vec<Option<Tail>>,
    /// Vacated trie cells, candidates for re-use.
    free_cells: Vec<u32>,
    /// Vacated tail slots.
    free_tails: Vec<u32>,
    len: usize,
}

impl Trie {
    pub fn new() -> Self {
        Self {
            // Cell 0 unused, cell 1 is the root.
            base: vec![0, 0],
            check: vec![0, 0],
            tails: Vec::new(),
            free_cells: Vec::new(),
            free_tails: Vec::new(),
            len: 0,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // ── Cell helpers ───────────────────────────────────────────────

    fn is_vacant(&self, idx: usize) -> bool {
        idx > ROOT && (idx >= self.check.len() || self.check[idx] == 0)
    }

    fn ensure_cell(&mut self, idx: usize) {
        if idx >= self.base.len() {
            self.base.resize(idx + 1, 0);
            self.check.resize(idx + 1, 0);
        }
    }

    fn occupy(&mut self, idx: usize, parent: usize, base: i32) {
        self.ensure_cell(idx);
        self.check[idx] = parent as u32;
        self.base[idx] = base;
        self.free_cells.retain(|&f| f as usize != idx);
    }

    fn vacate(&mut self, idx: usize) {
        self.base[idx] = 0;
        self.check[idx] = 0;
        self.free_cells.push(idx as u32);
    }

    /// Child of `s` along `c`, if present.
    fn child(&self, s: usize, c: usize) -> Option<usize> {
        if self.base[s] < 0 {
            return None;
        }
        let t = self.base[s] as usize + c;
        if t < self.check.len() && self.check[t] == s as u32 {
            Some(t)
        } else {
            None
        }
    }

    /// Codes of all children of `s`, ascending.
    fn child_codes(&self, s: usize) -> Vec<usize> {
        let mut out = Vec::new();
        if self.base[s] < 0 {
            return out;
        }
        for c in TERM..=MAX_CODE {
            if self.child(s, c).is_some() {
                out.push(c);
            }
        }
        out
    }

    /// Find a base where every code in `codes` lands on a vacant cell.
    /// Free-list cells seed the candidates; past-the-end always works.
    fn find_base(&self, codes: &[usize]) -> usize {
        debug_assert!(!codes.is_empty());
        let first = codes[0];
        for &f in &self.free_cells {
            let f = f as usize;
            if f <= first {
                continue;
            }
            let b = f - first;
            if codes.iter().all(|&c| self.is_vacant(b + c)) {
                return b;
            }
        }
        self.check.len().max(2)
    }

    // ── Tail pool ──────────────────────────────────────────────────

    fn alloc_tail(&mut self, suffix: Vec<u8>, value: u32) -> usize {
        let tail = Tail { suffix, value };
        match self.free_tails.pop() {
            Some(id) => {
                self.tails[id as usize] = Some(tail);
                id as usize
            }
            None => {
                self.tails.push(Some(tail));
                self.tails.len() - 1
            }
        }
    }

    fn free_tail(&mut self, id: usize) {
        self.tails[id] = None;
        self.free_tails.push(id as u32);
    }

    fn tail_of(&self, node: usize) -> Option<(usize, &Tail)> {
        if self.base[node] >= 0 {
            return None;
        }
        let id = (-self.base[node] - 1) as usize;
        self.tails[id].as_ref().map(|t| (id, t))
    }

    fn make_leaf(&mut self, node: usize, suffix: Vec<u8>, value: u32) {
        let id = self.alloc_tail(suffix, value);
        self.base[node] = -(id as i32) - 1;
    }

    // ── Relocation ─────────────────────────────────────────────────

    /// Move every child of `s` so that `extra` also fits; returns the
    /// new base.
    fn relocate(&mut self, s: usize, extra: usize) -> usize {
        let mut codes = self.child_codes(s);
        codes.push(extra);
        codes.sort_unstable();
        let new_base = self.find_base(&codes);

        let old_base = self.base[s] as usize;
        for &c in &codes {
            if c == extra {
                continue;
            }
            let oc = old_base + c;
            let nc = new_base + c;
            self.occupy(nc, s, self.base[oc]);
            // Re-point grandchildren at the moved cell.
            if self.base[oc] >= 0 {
                let gb = self.base[oc] as usize;
                for gc in TERM..=MAX_CODE {
                    let g = gb + gc;
                    if g < self.check.len() && self.check[g] == oc as u32 {
                        self.check[g] = nc as u32;
                    }
                }
            }
            self.vacate(oc);
        }
        self.base[s] = new_base as i32;
        new_base
    }

    /// Create the child of `s` along `c`, relocating on collision.
    fn insert_child(&mut self, s: usize, c: usize) -> usize {
        let mut b = if self.base[s] > 0 && !self.child_codes(s).is_empty() {
            self.base[s] as usize
        } else {
            // No children yet: free to pick any base.
            let b = self.find_base(&[c]);
            self.base[s] = b as i32;
            b
        };
        if !self.is_vacant(b + c) {
            b = self.relocate(s, c);
        }
        let t = b + c;
        self.occupy(t, s, 0);
        t
    }

    // ── Insert ─────────────────────────────────────────────────────

    /// Insert `key` with `value`. Returns the stored value: `value` if
    /// the key was new, the existing value otherwise.
    pub fn insert(&mut self, key: &[u8], value: u32) -> u32 {
        let mut s = ROOT;
        let mut i = 0;

        loop {
            if let Some((tail_id, tail)) = self.tail_of(s) {
                let existing = tail.value;
                let suffix = tail.suffix.clone();
                if suffix == key[i..] {
                    return existing;
                }
                self.split_leaf(s, tail_id, suffix, existing, &key[i..], value);
                self.len += 1;
                return value;
            }

            let c = if i < key.len() { code(key[i]) } else { TERM };
            match self.child(s, c) {
                Some(t) => {
                    if c == TERM {
                        // Key ends here; terminator leaf holds the value.
                        let (_, tail) = self.tail_of(t).expect("terminator leaf");
                        return tail.value;
                    }
                    s = t;
                    i += 1;
                }
                None => {
                    let t = self.insert_child(s, c);
                    let suffix = if c == TERM {
                        Vec::new()
                    } else {
                        key[i + 1..].to_vec()
                    };
                    self.make_leaf(t, suffix, value);
                    self.len += 1;
                    return value;
                }
            }
        }
    }

    /// Turn leaf `s` into internal nodes covering the common prefix of
    /// the old suffix and the new remainder, then hang both values as
    /// fresh leaves below the divergence point.
    fn split_leaf(
        &mut self,
        s: usize,
        old_tail: usize,
        old_suffix: Vec<u8>,
        old_value: u32,
        new_rest: &[u8],
        new_value: u32,
    ) {
        self.free_tail(old_tail);
        self.base[s] = 0;

        let common = old_suffix
            .iter()
            .zip(new_rest.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let mut node = s;
        for &b in &old_suffix[..common] {
            node = self.insert_child(node, code(b));
        }

        // Old side.
        let t = if common < old_suffix.len() {
            let t = self.insert_child(node, code(old_suffix[common]));
            self.make_leaf(t, old_suffix[common + 1..].to_vec(), old_value);
            t
        } else {
            let t = self.insert_child(node, TERM);
            self.make_leaf(t, Vec::new(), old_value);
            t
        };
        debug_assert!(self.base[t] < 0);

        // New side.
        if common < new_rest.len() {
            let t = self.insert_child(node, code(new_rest[common]));
            self.make_leaf(t, new_rest[common + 1..].to_vec(), new_value);
        } else {
            let t = self.insert_child(node, TERM);
            self.make_leaf(t, Vec::new(), new_value);
        }
    }

    // ── Search ─────────────────────────────────────────────────────

    /// Value stored for `key`, if present.
    pub fn get(&self, key: &[u8]) -> Option<u32> {
        let mut s = ROOT;
        let mut i = 0;
        loop {
            if let Some((_, tail)) = self.tail_of(s) {
                return (tail.suffix == key[i..]).then_some(tail.value);
            }
            let c = if i < key.len() { code(key[i]) } else { TERM };
            match self.child(s, c) {
                Some(t) => {
                    if c == TERM {
                        let (_, tail) = self.tail_of(t)?;
                        return tail.suffix.is_empty().then_some(tail.value);
                    }
                    s = t;
                    i += 1;
                }
                None => return None,
            }
        }
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Remove `key`, pruning single-child chains back toward the root.
    /// Returns the removed value.
    pub fn remove(&mut self, key: &[u8]) -> Option<u32> {
        // Locate the leaf, keeping the path for pruning.
        let mut s = ROOT;
        let mut i = 0;
        let leaf = loop {
            if self.tail_of(s).is_some() {
                break s;
            }
            let c = if i < key.len() { code(key[i]) } else { TERM };
            s = self.child(s, c)?;
            if c != TERM {
                i += 1;
            }
        };
        let (tail_id, tail) = self.tail_of(leaf)?;
        if tail.suffix != key[i..] {
            return None;
        }
        let value = tail.value;
        self.free_tail(tail_id);

        // Prune: vacate the leaf, then every ancestor left childless.
        let mut node = leaf;
        loop {
            if node == ROOT {
                self.base[ROOT] = 0;
                break;
            }
            let parent = self.check[node] as usize;
            self.vacate(node);
            if !self.child_codes(parent).is_empty() {
                break;
            }
            node = parent;
        }
        self.len -= 1;
        Some(value)
    }

    // ── Iteration ──────────────────────────────────────────────────

    /// Visit every (key, value) pair in depth-first code order.
    pub fn for_each<F: FnMut(&[u8], u32)>(&self, mut visit: F) {
        let mut key = Vec::new();
        self.dfs(ROOT, &mut key, &mut visit);
    }

    fn dfs<F: FnMut(&[u8], u32)>(&self, s: usize, key: &mut Vec<u8>, visit: &mut F) {
        if let Some((_, tail)) = self.tail_of(s) {
            let depth = key.len();
            key.extend_from_slice(&tail.suffix);
            visit(key, tail.value);
            key.truncate(depth);
            return;
        }
        for c in self.child_codes(s) {
            match self.child(s, c) {
                Some(t) if c == TERM => {
                    if let Some((_, tail)) = self.tail_of(t) {
                        visit(key, tail.value);
                    }
                }
                Some(t) => {
                    key.push((c - 2) as u8);
                    self.dfs(t, key, visit);
                    key.pop();
                }
                None => {}
            }
        }
    }

    // ── Serialization ──────────────────────────────────────────────

    /// Serialized byte size in the on-disk layout.
    pub fn serialized_size(&self) -> usize {
        let tail_bytes: usize = self
            .tails
            .iter()
            .map(|t| 12 + t.as_ref().map_or(0, |t| t.suffix.len()))
            .sum();
        // cell count + tail count + per-cell (base i32, check u32).
        8 + self.base.len() * 8 + tail_bytes
    }

    /// Write the trie in the given byte order: cell count, tail count,
    /// BASE array, CHECK array, then one block per tail slot
    /// (next-free link, value, suffix length, suffix bytes).
    pub fn write_to<W: std::io::Write>(&self, w: &mut W, endian: Endianness) -> Result<()> {
        w.write_all(&endian.write_u32(self.base.len() as u32))?;
        w.write_all(&endian.write_u32(self.tails.len() as u32))?;
        for &b in &self.base {
            w.write_all(&endian.write_i32(b))?;
        }
        for &c in &self.check {
            w.write_all(&endian.write_u32(c))?;
        }
        // Free tail slots chain through their next-free link (stored
        // id + 1, all-ones terminates); live blocks carry 0.
        let mut next_free = u32::MAX;
        let mut links = vec![0u32; self.tails.len()];
        for &id in self.free_tails.iter().rev() {
            links[id as usize] = next_free;
            next_free = id + 1;
        }
        for (id, slot) in self.tails.iter().enumerate() {
            match slot {
                Some(tail) => {
                    w.write_all(&endian.write_u32(0))?;
                    w.write_all(&endian.write_u32(tail.value))?;
                    w.write_all(&endian.write_u32(tail.suffix.len() as u32))?;
                    w.write_all(&tail.suffix)?;
                }
                None => {
                    w.write_all(&endian.write_u32(links[id]))?;
                    w.write_all(&endian.write_u32(0))?;
                    w.write_all(&endian.write_u32(0))?;
                }
            }
        }
        Ok(())
    }

    /// Parse a serialized trie. Returns the trie and the number of
    /// bytes consumed.
    pub fn from_bytes(bytes: &[u8], endian: Endianness) -> Result<(Self, usize)> {
        let need = |have: usize, want: usize| -> Result<()> {
            if have < want {
                Err(StoreError::InvalidFormat(format!(
                    "symbol table truncated: need {} bytes, {} available",
                    want, have
                )))
            } else {
                Ok(())
            }
        };

        need(bytes.len(), 8)?;
        let cells = endian.read_u32(bytes[0..4].try_into().expect("length checked")) as usize;
        let tail_count = endian.read_u32(bytes[4..8].try_into().expect("length checked")) as usize;
        if cells < 2 {
            return Err(StoreError::InvalidFormat(format!(
                "symbol table cell count {} below minimum",
                cells
            )));
        }
        let mut pos = 8;
        need(bytes.len(), pos + cells * 8)?;

        let mut base = Vec::with_capacity(cells);
        for _ in 0..cells {
            base.push(endian.read_i32(bytes[pos..pos + 4].try_into().expect("length checked")));
            pos += 4;
        }
        let mut check = Vec::with_capacity(cells);
        for _ in 0..cells {
            check.push(endian.read_u32(bytes[pos..pos + 4].try_into().expect("length checked")));
            pos += 4;
        }

        let mut tails = Vec::with_capacity(tail_count);
        let mut free_tails = Vec::new();
        for id in 0..tail_count {
            need(bytes.len(), pos + 12)?;
            let link = endian.read_u32(bytes[pos..pos + 4].try_into().expect("length checked"));
            let value = endian.read_u32(bytes[pos + 4..pos + 8].try_into().expect("length checked"));
            let len =
                endian.read_u32(bytes[pos + 8..pos + 12].try_into().expect("length checked")) as usize;
            pos += 12;
            if link != 0 {
                free_tails.push(id as u32);
                tails.push(None);
                continue;
            }
            need(bytes.len(), pos + len)?;
            tails.push(Some(Tail {
                suffix: bytes[pos..pos + len].to_vec(),
                value,
            }));
            pos += len;
        }

        let mut free_cells = Vec::new();
        for idx in 2..cells {
            if check[idx] == 0 {
                free_cells.push(idx as u32);
            }
        }
        let mut trie = Self {
            base,
            check,
            tails,
            free_cells,
            free_tails,
            len: 0,
        };
        trie.validate_cells()?;
        let mut count = 0usize;
        trie.for_each(|_, _| count += 1);
        trie.len = count;
        Ok((trie, pos))
    }

    /// Structural checks on untrusted arrays, before any traversal:
    /// every live cell's parent must be a live internal node that
    /// reaches it through a valid edge code, and every leaf must
    /// reference a live tail block.
    fn validate_cells(&self) -> Result<()> {
        let invalid = |what: String| Err(StoreError::InvalidFormat(what));
        if self.check[ROOT] != 0 {
            return invalid("symbol table root cell has a parent".into());
        }
        for idx in 2..self.check.len() {
            if self.check[idx] == 0 {
                continue;
            }
            let parent = self.check[idx] as usize;
            let parent_live =
                parent == ROOT || (parent >= 2 && parent < self.check.len() && self.check[parent] != 0);
            if !parent_live || self.base[parent] < 0 {
                return invalid(format!(
                    "symbol table cell {} has invalid parent {}",
                    idx, parent
                ));
            }
            let b = self.base[parent] as usize;
            if idx <= b || idx - b > MAX_CODE {
                return invalid(format!(
                    "symbol table cell {} unreachable from parent {}",
                    idx, parent
                ));
            }
        }
        for idx in ROOT..self.base.len() {
            let live = idx == ROOT || self.check[idx] != 0;
            if !live || self.base[idx] >= 0 {
                continue;
            }
            let id = (-(self.base[idx] as i64) - 1) as usize;
            if self.tails.get(id).map_or(true, Option::is_none) {
                return invalid(format!(
                    "symbol table leaf {} references missing tail {}",
                    idx, id
                ));
            }
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────

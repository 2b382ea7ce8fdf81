use std::collections::HashMap;

use crate::packed::Packed;

// ── Interned data tables ─────────────────────────────────────────────
//
// Three session-scoped, append-only tables shared by every compiled
// unit: packed constants, raw strings, and names. Handles are dense
// u32s in first-seen order and must fit a 24-bit instruction operand;
// the tables refuse to grow past that.

pub const MAX_HANDLE: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameHandle(pub u32);

/// What a name stands for, recorded at intern time so loads and session
/// binding know which tagged value to mint for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Token,
    Setting,
    Trick,
    Var,
    Func,
}

/// Collapse spelling variants: lowercase, alphanumerics only.
/// `Kokiri_Sword`, `Kokiri Sword` and `kokirisword` intern to one handle.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Default)]
pub struct ConstTable {
    values: Vec<u64>,
    index: HashMap<u64, u32>,
}

impl ConstTable {
    pub fn intern(&mut self, value: Packed) -> ConstHandle {
        let bits = value.bits();
        if let Some(&h) = self.index.get(&bits) {
            return ConstHandle(h);
        }
        let h = self.mint();
        self.values.push(bits);
        self.index.insert(bits, h);
        ConstHandle(h)
    }

    pub fn get(&self, h: ConstHandle) -> Option<Packed> {
        self.values.get(h.0 as usize).map(|&bits| Packed::from_bits(bits))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn mint(&self) -> u32 {
        let h = self.values.len() as u32;
        assert!(h <= MAX_HANDLE, "constant table overflowed 24-bit handle space");
        h
    }
}

#[derive(Debug)]
struct StrEntry {
    offset: u32,
    len: u32,
}

/// Strings live in one byte pool; entries are (offset, len) views into it.
#[derive(Debug, Default)]
pub struct StringTable {
    pool: Vec<u8>,
    entries: Vec<StrEntry>,
    index: HashMap<String, u32>,
}

impl StringTable {
    pub fn intern(&mut self, value: &str) -> StrHandle {
        if let Some(&h) = self.index.get(value) {
            return StrHandle(h);
        }
        let h = self.entries.len() as u32;
        assert!(h <= MAX_HANDLE, "string table overflowed 24-bit handle space");
        let offset = self.pool.len() as u32;
        self.pool.extend_from_slice(value.as_bytes());
        self.entries.push(StrEntry { offset, len: value.len() as u32 });
        self.index.insert(value.to_owned(), h);
        StrHandle(h)
    }

    pub fn get(&self, h: StrHandle) -> Option<&str> {
        let entry = self.entries.get(h.0 as usize)?;
        let start = entry.offset as usize;
        let bytes = &self.pool[start..start + entry.len as usize];
        // the pool only ever receives &str bytes
        Some(std::str::from_utf8(bytes).expect("string pool holds utf-8"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct NameEntry {
    text: String,
    kind: NameKind,
}

/// Identifiers and function names, keyed by normalized spelling. The
/// first interning wins both the handle and the recorded kind.
#[derive(Debug, Default)]
pub struct NameTable {
    entries: Vec<NameEntry>,
    index: HashMap<String, u32>,
}

impl NameTable {
    pub fn intern(&mut self, name: &str, kind: NameKind) -> NameHandle {
        let key = normalize(name);
        if let Some(&h) = self.index.get(&key) {
            return NameHandle(h);
        }
        let h = self.entries.len() as u32;
        assert!(h <= MAX_HANDLE, "name table overflowed 24-bit handle space");
        self.entries.push(NameEntry { text: name.to_owned(), kind });
        self.index.insert(key, h);
        NameHandle(h)
    }

    pub fn lookup(&self, name: &str) -> Option<NameHandle> {
        self.index.get(&normalize(name)).map(|&h| NameHandle(h))
    }

    pub fn text(&self, h: NameHandle) -> Option<&str> {
        self.entries.get(h.0 as usize).map(|e| e.text.as_str())
    }

    pub fn kind(&self, h: NameHandle) -> Option<NameKind> {
        self.entries.get(h.0 as usize).map(|e| e.kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NameHandle, &str, NameKind)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (NameHandle(i as u32), e.text.as_str(), e.kind))
    }
}

/// The three tables one assembly carries.
#[derive(Debug, Default)]
pub struct DataTables {
    pub consts: ConstTable,
    pub strings: StringTable,
    pub names: NameTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut names = NameTable::default();
        let a = names.intern("Kokiri_Sword", NameKind::Token);
        let b = names.intern("Kokiri Sword", NameKind::Token);
        let c = names.intern("kokirisword", NameKind::Token);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn distinct_values_take_dense_handles_in_order() {
        let mut consts = ConstTable::default();
        let a = consts.intern(Packed::Number(7.0));
        let b = consts.intern(Packed::Bool(true));
        let c = consts.intern(Packed::Uint(7));
        assert_eq!((a.0, b.0, c.0), (0, 1, 2));
        assert_eq!(consts.intern(Packed::Number(7.0)), a);
        assert_eq!(consts.len(), 3);
    }

    #[test]
    fn string_pool_round_trips() {
        let mut strings = StringTable::default();
        let a = strings.intern("Forest");
        let b = strings.intern("Shadow Temple");
        assert_eq!(strings.get(a), Some("Forest"));
        assert_eq!(strings.get(b), Some("Shadow Temple"));
        assert_eq!(strings.intern("Forest"), a);
    }

    #[test]
    fn first_interning_wins_the_kind() {
        let mut names = NameTable::default();
        let h = names.intern("age", NameKind::Var);
        let again = names.intern("age", NameKind::Token);
        assert_eq!(h, again);
        assert_eq!(names.kind(h), Some(NameKind::Var));
    }
}

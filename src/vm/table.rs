//! Tables with an array part for keys `1..=n` and an insertion-ordered
//! hash part.
//!
//! The hash part is an index map: `index` maps a key to its slot in
//! `entries`. Assigning `nil` keeps the slot and never shrinks the
//! array part, so `next` stays valid while a traversal clears fields.

use std::hash::{Hash, Hasher};

use hashbrown::{Equivalent, HashMap};
use rustc_hash::FxBuildHasher;

use super::value::{Function, LuaStr, TableRef, Value};
use super::number;
use crate::error::{Result, runtime_error};

#[derive(Default)]
pub struct Table {
    array: Vec<Value>,
    index: HashMap<Key, u32, FxBuildHasher>,
    entries: Vec<(Key, Value)>,
    pub(crate) metatable: Option<TableRef>,
}

/// A normalized non-nil, non-NaN key. Floats with an integral value
/// are stored as integers.
#[derive(Clone)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(LuaStr),
    Table(TableRef),
    Function(Function),
}

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_REF: u8 = 5;

impl Key {
    /// `None` for keys that can never be present (`nil`, NaN).
    pub fn lookup(v: &Value) -> Option<Key> {
        Some(match v {
            Value::Nil => return None,
            Value::Bool(b) => Key::Bool(*b),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) => match number::float_to_int_exact(*f) {
                Some(i) => Key::Int(i),
                None if f.is_nan() => return None,
                None => Key::Float(f.to_bits()),
            },
            Value::Str(s) => Key::Str(s.clone()),
            Value::Table(t) => Key::Table(t.clone()),
            Value::Function(f) => Key::Function(f.clone()),
        })
    }

    pub fn for_insert(v: &Value) -> Result<Key> {
        Key::lookup(v).ok_or_else(|| match v {
            Value::Nil => runtime_error("index is nil"),
            _ => runtime_error("index is NaN"),
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Table(t) => Value::Table(t.clone()),
            Key::Function(f) => Value::Function(f.clone()),
        }
    }

    fn addr(&self) -> usize {
        match self {
            Key::Table(t) => std::rc::Rc::as_ptr(t) as *const u8 as usize,
            Key::Function(f) => f.addr(),
            _ => 0,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Bool(a), Key::Bool(b)) => a == b,
            (Key::Int(a), Key::Int(b)) => a == b,
            (Key::Float(a), Key::Float(b)) => a == b,
            (Key::Str(a), Key::Str(b)) => a == b,
            (Key::Table(_), Key::Table(_)) | (Key::Function(_), Key::Function(_)) => {
                self.addr() == other.addr()
            }
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Key::Bool(b) => (TAG_BOOL, *b).hash(state),
            Key::Int(i) => (TAG_INT, *i).hash(state),
            Key::Float(bits) => (TAG_FLOAT, *bits).hash(state),
            Key::Str(s) => (TAG_STR, s.as_str()).hash(state),
            Key::Table(_) | Key::Function(_) => (TAG_REF, self.addr()).hash(state),
        }
    }
}

/// Borrowed string key, hashed like `Key::Str`.
struct StrKey<'a>(&'a str);

impl Hash for StrKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (TAG_STR, self.0).hash(state)
    }
}

impl Equivalent<Key> for StrKey<'_> {
    fn equivalent(&self, key: &Key) -> bool {
        matches!(key, Key::Str(s) if s.as_str() == self.0)
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(array: usize, hash: usize) -> Self {
        Self {
            array: Vec::with_capacity(array),
            index: HashMap::with_capacity_and_hasher(hash, FxBuildHasher),
            entries: Vec::with_capacity(hash),
            metatable: None,
        }
    }

    #[inline]
    pub fn metatable(&self) -> Option<&TableRef> {
        self.metatable.as_ref()
    }

    pub fn set_metatable(&mut self, mt: Option<TableRef>) {
        self.metatable = mt;
    }

    fn array_slot(&self, i: i64) -> Option<usize> {
        let idx = (i as u64).wrapping_sub(1);
        (idx < self.array.len() as u64).then_some(idx as usize)
    }

    pub fn get_int(&self, i: i64) -> Value {
        match self.array_slot(i) {
            Some(idx) => self.array[idx].clone(),
            None => self.get_hashed(&Key::Int(i)),
        }
    }

    pub fn get_str(&self, key: &str) -> Value {
        match self.index.get(&StrKey(key)) {
            Some(&slot) => self.entries[slot as usize].1.clone(),
            None => Value::Nil,
        }
    }

    fn get_hashed(&self, key: &Key) -> Value {
        match self.index.get(key) {
            Some(&slot) => self.entries[slot as usize].1.clone(),
            None => Value::Nil,
        }
    }

    pub fn get(&self, key: &Value) -> Value {
        match key {
            Value::Int(i) => self.get_int(*i),
            Value::Str(s) => self.get_str(s.as_str()),
            _ => match Key::lookup(key) {
                Some(Key::Int(i)) => self.get_int(i),
                Some(k) => self.get_hashed(&k),
                None => Value::Nil,
            },
        }
    }

    pub fn set(&mut self, key: &Value, value: Value) -> Result<()> {
        match Key::for_insert(key)? {
            Key::Int(i) => self.set_int(i, value),
            k => self.set_hashed(k, value),
        }
        Ok(())
    }

    pub fn set_str(&mut self, key: LuaStr, value: Value) {
        self.set_hashed(Key::Str(key), value)
    }

    pub fn set_int(&mut self, i: i64, value: Value) {
        if let Some(idx) = self.array_slot(i) {
            self.array[idx] = value;
            return;
        }
        if i as u64 == self.array.len() as u64 + 1 && !value.is_nil() {
            self.array.push(value);
            self.remove_hashed(&Key::Int(i));
            self.migrate_from_hash();
            return;
        }
        self.set_hashed(Key::Int(i), value)
    }

    fn set_hashed(&mut self, key: Key, value: Value) {
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot as usize].1 = value,
            None if value.is_nil() => {}
            None => {
                let slot = self.entries.len() as u32;
                self.entries.push((key.clone(), value));
                self.index.insert(key, slot);
            }
        }
    }

    fn remove_hashed(&mut self, key: &Key) {
        if let Some(&slot) = self.index.get(key) {
            self.entries[slot as usize].1 = Value::Nil;
        }
    }

    /// Moves `n+1, n+2, ...` from the hash part after the array grew to `n`.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = Key::Int(self.array.len() as i64 + 1);
            let Some(&slot) = self.index.get(&next) else {
                break;
            };
            let value = std::mem::take(&mut self.entries[slot as usize].1);
            if value.is_nil() {
                break;
            }
            self.array.push(value);
        }
    }

    /// Grows the array part to hold `n` elements.
    pub fn reserve_array(&mut self, n: usize) {
        if n > self.array.len() {
            self.array.reserve(n - self.array.len());
        }
    }

    /// The border `#t`.
    pub fn len(&self) -> i64 {
        let mut n = self.array.len() as i64;
        if n > 0 && self.array[n as usize - 1].is_nil() {
            // binary search for a border inside the array part
            let (mut lo, mut hi) = (0usize, n as usize);
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.array[mid - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo as i64;
        }
        while !self.get_hashed(&Key::Int(n + 1)).is_nil() {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.array.iter().all(Value::is_nil) && self.entries.iter().all(|(_, v)| v.is_nil())
    }

    /// Traversal step: the entry after `key` (`nil` starts).
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>> {
        let mut cursor = match key {
            Value::Nil => 0,
            _ => match Key::lookup(key) {
                Some(Key::Int(i)) if self.array_slot(i).is_some() => i as usize,
                Some(k) => match self.index.get(&k) {
                    Some(&slot) => self.array.len() + slot as usize + 1,
                    None => return Err(runtime_error("invalid key to 'next'")),
                },
                None => return Err(runtime_error("invalid key to 'next'")),
            },
        };
        while cursor < self.array.len() {
            let v = &self.array[cursor];
            cursor += 1;
            if !v.is_nil() {
                return Ok(Some((Value::Int(cursor as i64), v.clone())));
            }
        }
        let mut slot = cursor - self.array.len();
        while slot < self.entries.len() {
            let (k, v) = &self.entries[slot];
            if !v.is_nil() {
                return Ok(Some((k.to_value(), v.clone())));
            }
            slot += 1;
        }
        Ok(None)
    }

    /// Rough byte size used for allocation accounting.
    pub(crate) fn footprint(array: usize, hash: usize) -> usize {
        std::mem::size_of::<Table>()
            + array * std::mem::size_of::<Value>()
            + hash * (std::mem::size_of::<(Key, Value)>() + 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_part_grows_and_migrates() {
        let mut t = Table::new();
        t.set_int(2, Value::Int(20));
        t.set_int(3, Value::Int(30));
        assert_eq!(t.len(), 0);
        t.set_int(1, Value::Int(10));
        assert_eq!(t.array.len(), 3);
        assert_eq!(t.len(), 3);
        t.set_int(3, Value::Nil);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn float_keys_normalize() {
        let mut t = Table::new();
        t.set(&Value::Float(1.0), Value::str("one")).unwrap();
        assert_eq!(t.get(&Value::Int(1)), Value::str("one"));
        t.set(&Value::Float(1.5), Value::Bool(true)).unwrap();
        assert_eq!(t.get(&Value::Float(1.5)), Value::Bool(true));
        assert!(t.set(&Value::Float(f64::NAN), Value::Int(0)).is_err());
        assert!(t.set(&Value::Nil, Value::Int(0)).is_err());
        assert_eq!(t.get(&Value::Nil), Value::Nil);
    }

    #[test]
    fn next_visits_every_live_entry_once() {
        let mut t = Table::new();
        for i in 1..=3 {
            t.set_int(i, Value::Int(i * 10));
        }
        t.set_str(LuaStr::from("a"), Value::Int(1));
        t.set_str(LuaStr::from("b"), Value::Int(2));
        t.set_str(LuaStr::from("a"), Value::Nil);

        let mut seen = Vec::new();
        let mut key = Value::Nil;
        while let Some((k, v)) = t.next(&key).unwrap() {
            seen.push(format!("{k}={v}"));
            key = k;
        }
        assert_eq!(seen, ["1=10", "2=20", "3=30", "b=2"]);
        assert!(t.next(&Value::str("zzz")).is_err());
    }
}

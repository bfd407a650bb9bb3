//! The two deduplicating constant stores referenced by compiled code.
//!
//! Scalars are packed into a byte buffer (1-byte discriminant plus a
//! fixed-width little-endian payload); everything else lives in a
//! reference pool addressed by ordinal. Both pools chain to an
//! optional base pool so that a query or an asserted clause can add
//! constants without touching the shared knowledge-base pools: indices
//! below the base length redirect to the base, appends always go to
//! the overlay.

use std::sync::Arc;

use fxhash::{FxBuildHasher, FxHashMap};
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use smallvec::SmallVec;

use crate::ast::Rule;
use crate::errors::EngineError;
use crate::value::{HostObject, Value};

const TAG_INT: u8 = 0;
const TAG_FLOAT: u8 = 1;
const TAG_CHAR: u8 = 2;

type Encoded = SmallVec<[u8; 9]>;

/// Inline scalar pool. Entries are addressed by their byte offset in
/// the (chained) buffer and never mutated once written.
#[derive(Debug, Default)]
pub(crate) struct ScalarPool {
    base: Option<Arc<ScalarPool>>,
    buf: Vec<u8>,
    dedup: FxHashMap<Encoded, u32>,
}

impl ScalarPool {
    pub fn new() -> Self {
        ScalarPool::default()
    }

    pub fn with_base(base: Arc<ScalarPool>) -> Self {
        ScalarPool {
            base: Some(base),
            buf: Vec::new(),
            dedup: FxHashMap::default(),
        }
    }

    /// Total byte length of the base chain plus this overlay.
    fn total_len(&self) -> usize {
        self.base.as_deref().map_or(0, ScalarPool::total_len) + self.buf.len()
    }

    fn base_len(&self) -> usize {
        self.base.as_deref().map_or(0, ScalarPool::total_len)
    }

    fn encode(v: &Value) -> Option<Encoded> {
        let mut out = Encoded::new();
        match v {
            Value::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_bits().to_le_bytes());
            }
            Value::Char(c) => {
                out.push(TAG_CHAR);
                out.extend_from_slice(&(*c as u32).to_le_bytes());
            }
            _ => return None,
        }
        Some(out)
    }

    fn lookup(&self, encoded: &[u8]) -> Option<u32> {
        if let Some(base) = &self.base {
            if let Some(idx) = base.lookup(encoded) {
                return Some(idx);
            }
        }
        self.dedup.get(encoded).copied()
    }

    /// Interns a scalar, returning its pool index, or `None` for
    /// values that are not inline scalars. Identical bit patterns of
    /// the same type share one slot.
    pub fn intern(&mut self, v: &Value) -> Option<u32> {
        let encoded = Self::encode(v)?;
        if let Some(idx) = self.lookup(&encoded) {
            return Some(idx);
        }
        let idx = (self.base_len() + self.buf.len()) as u32;
        self.buf.extend_from_slice(&encoded);
        self.dedup.insert(encoded, idx);
        Some(idx)
    }

    /// Decodes the entry starting at `index`.
    pub fn get(&self, index: u32) -> Result<Value, EngineError> {
        let base_len = self.base_len();
        if (index as usize) < base_len {
            // indices below the base length belong to the base chain
            if let Some(base) = &self.base {
                return base.get(index);
            }
            return Err(EngineError::BadConstant(index));
        }
        let at = index as usize - base_len;
        let tag = *self.buf.get(at).ok_or(EngineError::BadConstant(index))?;
        let payload = |n: usize| {
            self.buf
                .get(at + 1..at + 1 + n)
                .ok_or(EngineError::BadConstant(index))
        };
        let bad = || EngineError::BadConstant(index);
        match tag {
            TAG_INT => {
                let bytes: [u8; 8] = payload(8)?.try_into().map_err(|_| bad())?;
                Ok(Value::Int(i64::from_le_bytes(bytes)))
            }
            TAG_FLOAT => {
                let bytes: [u8; 8] = payload(8)?.try_into().map_err(|_| bad())?;
                Ok(Value::Float(OrderedFloat(f64::from_bits(u64::from_le_bytes(
                    bytes,
                )))))
            }
            TAG_CHAR => {
                let bytes: [u8; 4] = payload(4)?.try_into().map_err(|_| bad())?;
                char::from_u32(u32::from_le_bytes(bytes))
                    .map(Value::Char)
                    .ok_or_else(bad)
            }
            _ => Err(bad()),
        }
    }
}

/// A clause term captured for a runtime assert, together with the
/// clause-scope registers its free variables compiled to. The VM uses
/// the captures to substitute currently-bound variables by value
/// before recompiling the snapshot.
#[derive(Debug)]
pub(crate) struct ClauseSnapshot {
    pub rule: Rule,
    pub captures: Vec<(String, u8)>,
}

/// A boxed constant: strings (including variable, functor and member
/// names), lists, host objects and clause snapshots.
#[derive(Debug, Clone)]
pub(crate) enum RefConst {
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Obj(Arc<dyn HostObject>),
    Clause(Arc<ClauseSnapshot>),
}

impl RefConst {
    /// The value form seen by the unifier. Clause snapshots are not
    /// unifiable; the compiler never emits a unify against one.
    pub fn to_value(&self, index: u32) -> Result<Value, EngineError> {
        match self {
            RefConst::Str(s) => Ok(Value::Str(s.clone())),
            RefConst::List(l) => Ok(Value::List(l.clone())),
            RefConst::Obj(o) => Ok(Value::Obj(o.clone())),
            RefConst::Clause(_) => Err(EngineError::BadConstant(index)),
        }
    }
}

/// Dedup key: strings by value, everything else by pointer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RefKey {
    Str(Arc<str>),
    Ptr(usize),
}

impl RefKey {
    fn of(c: &RefConst) -> RefKey {
        match c {
            RefConst::Str(s) => RefKey::Str(s.clone()),
            RefConst::List(l) => RefKey::Ptr(Arc::as_ptr(l) as usize),
            RefConst::Obj(o) => RefKey::Ptr(Arc::as_ptr(o) as *const () as usize),
            RefConst::Clause(c) => RefKey::Ptr(Arc::as_ptr(c) as usize),
        }
    }
}

/// Reference pool: append-only, deduplicated, ordinal-addressed.
#[derive(Debug, Default)]
pub(crate) struct RefPool {
    base: Option<Arc<RefPool>>,
    entries: IndexMap<RefKey, RefConst, FxBuildHasher>,
}

impl RefPool {
    pub fn new() -> Self {
        RefPool::default()
    }

    pub fn with_base(base: Arc<RefPool>) -> Self {
        RefPool {
            base: Some(base),
            entries: IndexMap::default(),
        }
    }

    fn total_len(&self) -> usize {
        self.base.as_deref().map_or(0, RefPool::total_len) + self.entries.len()
    }

    fn base_len(&self) -> usize {
        self.base.as_deref().map_or(0, RefPool::total_len)
    }

    fn lookup(&self, key: &RefKey) -> Option<u32> {
        if let Some(base) = &self.base {
            if let Some(idx) = base.lookup(key) {
                return Some(idx);
            }
        }
        self.entries
            .get_index_of(key)
            .map(|i| (self.base_len() + i) as u32)
    }

    pub fn intern(&mut self, c: RefConst) -> u32 {
        let key = RefKey::of(&c);
        if let Some(idx) = self.lookup(&key) {
            return idx;
        }
        let idx = (self.base_len() + self.entries.len()) as u32;
        self.entries.insert(key, c);
        idx
    }

    pub fn intern_str(&mut self, s: &str) -> u32 {
        self.intern(RefConst::Str(Arc::from(s)))
    }

    pub fn get(&self, index: u32) -> Result<&RefConst, EngineError> {
        let base_len = self.base_len();
        if (index as usize) < base_len {
            if let Some(base) = &self.base {
                return base.get(index);
            }
            return Err(EngineError::BadConstant(index));
        }
        self.entries
            .get_index(index as usize - base_len)
            .map(|(_, c)| c)
            .ok_or(EngineError::BadConstant(index))
    }

    pub fn get_str(&self, index: u32) -> Result<Arc<str>, EngineError> {
        match self.get(index)? {
            RefConst::Str(s) => Ok(s.clone()),
            _ => Err(EngineError::BadConstant(index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_dedup_by_bit_pattern() {
        let mut pool = ScalarPool::new();
        let a = pool.intern(&Value::from(42)).unwrap();
        let b = pool.intern(&Value::from(42)).unwrap();
        let c = pool.intern(&Value::from(43)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.get(a).unwrap(), Value::from(42));
        assert_eq!(pool.get(c).unwrap(), Value::from(43));
    }

    #[test]
    fn scalar_same_bits_different_type_are_distinct() {
        let mut pool = ScalarPool::new();
        let i = pool.intern(&Value::from(0)).unwrap();
        let f = pool.intern(&Value::from(0.0)).unwrap();
        assert_ne!(i, f);
        assert_eq!(pool.get(i).unwrap(), Value::from(0));
        assert_eq!(pool.get(f).unwrap(), Value::from(0.0));
    }

    #[test]
    fn scalar_overlay_redirects_low_indices() {
        let mut base = ScalarPool::new();
        let a = base.intern(&Value::from(7)).unwrap();
        let base = Arc::new(base);

        let mut overlay = ScalarPool::with_base(base.clone());
        // dedup sees through to the base
        assert_eq!(overlay.intern(&Value::from(7)).unwrap(), a);
        let b = overlay.intern(&Value::from(9)).unwrap();
        assert!(b as usize >= base.total_len());
        assert_eq!(overlay.get(a).unwrap(), Value::from(7));
        assert_eq!(overlay.get(b).unwrap(), Value::from(9));
        // the base never saw the overlay's entry
        assert!(base.get(b).is_err());
    }

    #[test]
    fn ref_pool_dedups_strings_by_value() {
        let mut pool = RefPool::new();
        let a = pool.intern_str("father");
        let b = pool.intern_str("father");
        let c = pool.intern_str("mother");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.get_str(c).unwrap().as_ref(), "mother");
    }

    #[test]
    fn ref_pool_overlay_appends_after_base() {
        let mut base = RefPool::new();
        let a = base.intern_str("kb");
        let base = Arc::new(base);

        let mut overlay = RefPool::with_base(base.clone());
        assert_eq!(overlay.intern_str("kb"), a);
        let b = overlay.intern_str("query");
        assert_eq!(b as usize, base.total_len());
        assert_eq!(overlay.get_str(a).unwrap().as_ref(), "kb");
        assert_eq!(overlay.get_str(b).unwrap().as_ref(), "query");
    }
}

//! First-argument clause indexing.
//!
//! The shared index maps `functor/arity` to a [`PredicateIndex`]:
//! clauses whose first head argument is a constant are bucketed by
//! that constant, everything else goes into a catch-all list. A lookup
//! with a bound first argument merges its constant bucket with the
//! catch-all list in program order; a lookup with an unbound first
//! argument walks every clause.
//!
//! Readers take an epoch-counted snapshot through [`Arcu`] and never
//! block; writers serialize on a mutex and publish a rebuilt map.
//! Candidate sets handed to a running query are owned copies, so a
//! concurrent assert or retract never disturbs an in-flight choice
//! point.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use arcu::atomic::Arcu;
use arcu::epoch_counters::GlobalEpochCounterPool;
use arcu::Rcu;
use fxhash::FxHashMap;

use crate::ast::Term;
use crate::instructions::CodeSegment;
use crate::value::Value;

/// The head shape an index entry was registered with.
#[derive(Debug, Clone)]
pub(crate) struct ClauseHead {
    pub functor: Arc<str>,
    pub args: Arc<Vec<Term>>,
}

impl ClauseHead {
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// The bucketing key: the first head argument when it is a ground
    /// constant.
    pub fn first_key(&self) -> Option<&Value> {
        match self.args.first() {
            Some(Term::Const(v)) => Some(v),
            _ => None,
        }
    }

    /// Structural match against a retract pattern: a variable on
    /// either side matches anything, everything else must be equal.
    fn matches(&self, pattern: &[Term]) -> bool {
        self.args.len() == pattern.len()
            && self
                .args
                .iter()
                .zip(pattern)
                .all(|(a, b)| matches!(a, Term::Var(_)) || matches!(b, Term::Var(_)) || a == b)
    }
}

/// One indexed clause: where its code starts and where it sits in
/// program order. `seq` is negative for prepended clauses so that an
/// ascending sort yields solution order.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub seg: Arc<CodeSegment>,
    pub offset: usize,
    pub head: ClauseHead,
    pub seq: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexMode {
    Prepend,
    Append,
}

/// All clauses of one `functor/arity`, split for first-argument
/// dispatch. `all`, each constant bucket and `non_const` are kept
/// sorted by `seq`.
#[derive(Debug, Clone, Default)]
pub(crate) struct PredicateIndex {
    all: Vec<IndexEntry>,
    by_const: FxHashMap<Value, Vec<IndexEntry>>,
    non_const: Vec<IndexEntry>,
    next_front: i64,
    next_back: i64,
}

fn insert_sorted(list: &mut Vec<IndexEntry>, entry: IndexEntry) {
    let at = list.partition_point(|e| e.seq < entry.seq);
    list.insert(at, entry);
}

impl PredicateIndex {
    pub fn insert(
        &mut self,
        seg: Arc<CodeSegment>,
        offset: usize,
        head: ClauseHead,
        mode: IndexMode,
    ) {
        let seq = match mode {
            IndexMode::Append => {
                let s = self.next_back;
                self.next_back += 1;
                s
            }
            IndexMode::Prepend => {
                self.next_front -= 1;
                self.next_front
            }
        };
        let entry = IndexEntry {
            seg,
            offset,
            head,
            seq,
        };
        match entry.head.first_key() {
            Some(key) => {
                insert_sorted(self.by_const.entry(key.clone()).or_default(), entry.clone())
            }
            None => insert_sorted(&mut self.non_const, entry.clone()),
        }
        insert_sorted(&mut self.all, entry);
    }

    /// The clauses worth trying for a call, in program order. A bound
    /// constant first argument restricts the search to its bucket plus
    /// the clauses indexing could not discriminate; a constant with no
    /// bucket still sees the catch-all list, never the full set.
    pub fn candidates(&self, first: Option<&Value>) -> VecDeque<IndexEntry> {
        let Some(key) = first else {
            return self.all.iter().cloned().collect();
        };
        let keyed: &[IndexEntry] = self.by_const.get(key).map_or(&[], Vec::as_slice);
        let mut out = VecDeque::with_capacity(keyed.len() + self.non_const.len());
        let mut a = keyed.iter();
        let mut b = self.non_const.iter();
        let (mut na, mut nb) = (a.next(), b.next());
        loop {
            match (na, nb) {
                (Some(x), Some(y)) if x.seq < y.seq => {
                    out.push_back(x.clone());
                    na = a.next();
                }
                (_, Some(y)) => {
                    out.push_back(y.clone());
                    nb = b.next();
                }
                (Some(x), None) => {
                    out.push_back(x.clone());
                    na = a.next();
                }
                (None, None) => break,
            }
        }
        out
    }

    /// Removes the first clause in program order whose head matches
    /// the pattern. Returns false when nothing matched.
    fn remove_first_matching(&mut self, pattern: &[Term]) -> bool {
        let Some(at) = self.all.iter().position(|e| e.head.matches(pattern)) else {
            return false;
        };
        let removed = self.all.remove(at);
        match removed.head.first_key() {
            Some(key) => {
                if let Some(bucket) = self.by_const.get_mut(key) {
                    bucket.retain(|e| e.seq != removed.seq);
                    if bucket.is_empty() {
                        self.by_const.remove(key);
                    }
                }
            }
            None => self.non_const.retain(|e| e.seq != removed.seq),
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

type PredicateMap = FxHashMap<Arc<str>, FxHashMap<usize, Arc<PredicateIndex>>>;

/// The shared, concurrently readable clause index.
pub(crate) struct ClauseIndex {
    map: Arcu<PredicateMap, GlobalEpochCounterPool>,
    update: Mutex<()>,
}

impl fmt::Debug for ClauseIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClauseIndex")
            .field("map", &*self.map.read())
            .finish_non_exhaustive()
    }
}

impl ClauseIndex {
    pub fn new() -> Self {
        ClauseIndex {
            map: Arcu::new(PredicateMap::default(), GlobalEpochCounterPool),
            update: Mutex::new(()),
        }
    }

    pub fn candidates(
        &self,
        functor: &str,
        arity: usize,
        first: Option<&Value>,
    ) -> VecDeque<IndexEntry> {
        let snapshot = self.map.read();
        snapshot
            .get(functor)
            .and_then(|arities| arities.get(&arity))
            .map(|pred| pred.candidates(first))
            .unwrap_or_default()
    }

    /// Publishes a clause. Writers are serialized; readers keep
    /// whatever snapshot they already hold.
    pub fn insert(&self, seg: Arc<CodeSegment>, offset: usize, head: ClauseHead, mode: IndexMode) {
        let _update_guard = self.update.lock();
        let mut next: PredicateMap = self.map.read().clone();
        let arities = next.entry(head.functor.clone()).or_default();
        let pred = arities.entry(head.arity()).or_default();
        let mut updated = PredicateIndex::clone(pred);
        updated.insert(seg, offset, head, mode);
        *pred = Arc::new(updated);
        self.map.replace(next);
    }

    /// Removes the first clause of the pattern's predicate whose head
    /// matches it. Returns whether a clause was removed.
    pub fn remove_first_matching(&self, functor: &str, pattern: &[Term]) -> bool {
        let _update_guard = self.update.lock();
        let mut next: PredicateMap = self.map.read().clone();
        let Some(arities) = next.get_mut(functor) else {
            return false;
        };
        let Some(pred) = arities.get_mut(&pattern.len()) else {
            return false;
        };
        let mut updated = PredicateIndex::clone(pred);
        if !updated.remove_first_matching(pattern) {
            return false;
        }
        if updated.is_empty() {
            arities.remove(&pattern.len());
            if arities.is_empty() {
                next.remove(functor);
            }
        } else {
            *pred = Arc::new(updated);
        }
        self.map.replace(next);
        true
    }
}

/// A private index for clauses that exist only inside one query, such
/// as the helper clauses negation expands into. Consulted before the
/// shared index and dropped with the query.
#[derive(Debug, Default)]
pub(crate) struct LocalIndex {
    map: FxHashMap<Arc<str>, FxHashMap<usize, PredicateIndex>>,
}

impl LocalIndex {
    pub fn insert(&mut self, seg: Arc<CodeSegment>, offset: usize, head: ClauseHead, mode: IndexMode) {
        self.map
            .entry(head.functor.clone())
            .or_default()
            .entry(head.arity())
            .or_default()
            .insert(seg, offset, head, mode);
    }

    pub fn candidates(
        &self,
        functor: &str,
        arity: usize,
        first: Option<&Value>,
    ) -> Option<VecDeque<IndexEntry>> {
        self.map
            .get(functor)
            .and_then(|arities| arities.get(&arity))
            .map(|pred| pred.candidates(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{cst, var, Term};
    use crate::constants::{RefPool, ScalarPool};

    fn seg() -> Arc<CodeSegment> {
        Arc::new(CodeSegment {
            code: Vec::new(),
            scalars: Arc::new(ScalarPool::new()),
            refs: Arc::new(RefPool::new()),
        })
    }

    fn head(functor: &str, args: Vec<Term>) -> ClauseHead {
        ClauseHead {
            functor: Arc::from(functor),
            args: Arc::new(args),
        }
    }

    fn offsets(entries: &VecDeque<IndexEntry>) -> Vec<usize> {
        entries.iter().map(|e| e.offset).collect()
    }

    #[test]
    fn constant_first_arg_sees_bucket_plus_catch_all() {
        let index = ClauseIndex::new();
        let s = seg();
        index.insert(s.clone(), 0, head("fct", vec![cst(5), cst(120)]), IndexMode::Append);
        index.insert(s.clone(), 10, head("fct", vec![var("N"), var("F")]), IndexMode::Append);
        index.insert(s.clone(), 20, head("fct", vec![cst(6), cst(720)]), IndexMode::Append);

        // bound constant: its bucket merged with the variable-headed
        // clause, in program order
        assert_eq!(offsets(&index.candidates("fct", 2, Some(&5.into()))), vec![0, 10]);
        assert_eq!(offsets(&index.candidates("fct", 2, Some(&6.into()))), vec![10, 20]);
        // constant with no bucket: only the catch-all clause remains
        assert_eq!(offsets(&index.candidates("fct", 2, Some(&7.into()))), vec![10]);
        // unbound first argument: every clause
        assert_eq!(offsets(&index.candidates("fct", 2, None)), vec![0, 10, 20]);
    }

    #[test]
    fn prepend_orders_before_existing_clauses() {
        let index = ClauseIndex::new();
        let s = seg();
        index.insert(s.clone(), 0, head("p", vec![cst(1)]), IndexMode::Append);
        index.insert(s.clone(), 10, head("p", vec![cst(1)]), IndexMode::Prepend);
        index.insert(s.clone(), 20, head("p", vec![cst(1)]), IndexMode::Append);
        index.insert(s.clone(), 30, head("p", vec![cst(1)]), IndexMode::Prepend);

        assert_eq!(
            offsets(&index.candidates("p", 1, Some(&1.into()))),
            vec![30, 10, 0, 20]
        );
    }

    #[test]
    fn arity_and_functor_are_distinct_predicates() {
        let index = ClauseIndex::new();
        let s = seg();
        index.insert(s.clone(), 0, head("p", vec![cst(1)]), IndexMode::Append);
        index.insert(s.clone(), 10, head("p", vec![cst(1), cst(2)]), IndexMode::Append);

        assert_eq!(index.candidates("p", 1, None).len(), 1);
        assert_eq!(index.candidates("p", 2, None).len(), 1);
        assert!(index.candidates("q", 1, None).is_empty());
    }

    #[test]
    fn remove_first_matching_respects_program_order() {
        let index = ClauseIndex::new();
        let s = seg();
        index.insert(s.clone(), 0, head("p", vec![cst(1)]), IndexMode::Append);
        index.insert(s.clone(), 10, head("p", vec![cst(2)]), IndexMode::Append);
        index.insert(s.clone(), 20, head("p", vec![cst(1)]), IndexMode::Append);

        assert!(index.remove_first_matching("p", &[cst(1)]));
        assert_eq!(offsets(&index.candidates("p", 1, None)), vec![10, 20]);
        // variable pattern matches the earliest remaining clause
        assert!(index.remove_first_matching("p", &[var("X")]));
        assert_eq!(offsets(&index.candidates("p", 1, None)), vec![20]);
        assert!(!index.remove_first_matching("p", &[cst(9)]));
    }

    #[test]
    fn local_index_distinguishes_functor_and_arity() {
        let mut local = LocalIndex::default();
        let s = seg();
        local.insert(s.clone(), 0, head("p", vec![cst(1)]), IndexMode::Append);
        local.insert(s.clone(), 10, head("p", vec![var("X")]), IndexMode::Append);

        let found = local.candidates("p", 1, Some(&1.into())).unwrap();
        assert_eq!(offsets(&found), vec![0, 10]);
        // a miss is None, so dispatch falls through to the shared index
        assert!(local.candidates("p", 2, None).is_none());
        assert!(local.candidates("q", 1, None).is_none());
    }

    #[test]
    fn snapshot_survives_later_writes() {
        let index = ClauseIndex::new();
        let s = seg();
        index.insert(s.clone(), 0, head("p", vec![cst(1)]), IndexMode::Append);

        let before = index.candidates("p", 1, None);
        index.insert(s.clone(), 10, head("p", vec![cst(1)]), IndexMode::Append);
        index.remove_first_matching("p", &[cst(1)]);

        // the candidate set taken earlier is an owned copy
        assert_eq!(offsets(&before), vec![0]);
        assert_eq!(offsets(&index.candidates("p", 1, None)), vec![10]);
    }
}

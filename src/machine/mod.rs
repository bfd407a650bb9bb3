//! The register machine and the embedding API around it.
//!
//! A [`Machine`] owns a compiled knowledge base: its constant pools,
//! its code segment and the shared clause index. It is cheap to clone
//! and safe to share across threads; every clone sees clauses asserted
//! through any other. Queries run on [`Exec`] cursors that are local
//! to the calling thread.

mod dispatch;
pub(crate) mod frame;
mod unify;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{Rule, Term};
use crate::codegen::Compiler;
use crate::constants::{RefPool, ScalarPool};
use crate::errors::{CompileError, EngineError, Error};
use crate::indexing::{ClauseIndex, IndexMode, LocalIndex};
use crate::instructions::CodeSegment;
use crate::value::Value;

use dispatch::Exec;

/// One answer: the values the query's named variables ended up bound
/// to. Variables left unbound do not appear.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub bindings: BTreeMap<String, Value>,
}

impl Solution {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

/// A knowledge base shared between threads.
#[derive(Debug, Clone)]
pub struct Machine {
    scalars: Arc<ScalarPool>,
    refs: Arc<RefPool>,
    index: Arc<ClauseIndex>,
}

impl Machine {
    /// Compiles a program into a fresh knowledge base.
    pub fn new(rules: Vec<Rule>) -> Result<Machine, CompileError> {
        let mut scalars = ScalarPool::new();
        let mut refs = RefPool::new();
        let mut compiler = Compiler::new(&mut scalars, &mut refs);
        compiler.compile_rules(&rules)?;
        let (code, clauses) = compiler.finish();

        let seg = Arc::new(CodeSegment {
            code,
            scalars: Arc::new(scalars),
            refs: Arc::new(refs),
        });
        let index = ClauseIndex::new();
        for (offset, head) in clauses {
            index.insert(seg.clone(), offset, head, IndexMode::Append);
        }
        debug!(bytes = seg.code.len(), rules = rules.len(), "knowledge base compiled");

        Ok(Machine {
            scalars: seg.scalars.clone(),
            refs: seg.refs.clone(),
            index: Arc::new(index),
        })
    }

    /// Compiles a conjunction of goals and returns a lazy iterator
    /// over its solutions. The query gets overlay pools and its own
    /// code segment; the shared knowledge base is never touched.
    pub fn query(&self, goals: Vec<Term>) -> Result<QuerySolutions, CompileError> {
        let mut scalars = ScalarPool::with_base(self.scalars.clone());
        let mut refs = RefPool::with_base(self.refs.clone());
        let mut compiler = Compiler::new(&mut scalars, &mut refs);
        let entry = compiler.compile_query(&goals)?;
        let (code, clauses) = compiler.finish();

        let seg = Arc::new(CodeSegment {
            code,
            scalars: Arc::new(scalars),
            refs: Arc::new(refs),
        });
        // helper clauses generated for this query are visible to it
        // alone
        let mut local = LocalIndex::default();
        for (offset, head) in clauses {
            local.insert(seg.clone(), offset, head, IndexMode::Append);
        }

        Ok(QuerySolutions {
            exec: Exec::new(self.clone(), local, seg, entry),
            done: false,
        })
    }

    /// Whether the goals have at least one solution.
    pub fn any(&self, goals: Vec<Term>) -> Result<bool, Error> {
        let mut solutions = self.query(goals)?;
        match solutions.next() {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e.into()),
            None => Ok(false),
        }
    }

    /// Adds a clause in front of its predicate's existing clauses.
    pub fn assert_first(&self, rule: Rule) -> Result<(), CompileError> {
        self.assert_rule(&rule, IndexMode::Prepend)
    }

    /// Adds a clause after its predicate's existing clauses.
    pub fn assert_last(&self, rule: Rule) -> Result<(), CompileError> {
        self.assert_rule(&rule, IndexMode::Append)
    }

    /// Removes the first clause whose head matches the pattern, where
    /// a variable matches anything. Returns whether a clause was
    /// removed. Queries already running keep the candidates they hold.
    pub fn retract_first(&self, functor: &str, pattern: &[Term]) -> bool {
        self.index.remove_first_matching(functor, pattern)
    }

    pub(crate) fn assert_compiled(&self, rule: &Rule, mode: IndexMode) -> Result<(), EngineError> {
        self.assert_rule(rule, mode).map_err(EngineError::Assert)
    }

    /// Compiles one clause into its own segment layered over the
    /// knowledge-base pools and publishes it.
    fn assert_rule(&self, rule: &Rule, mode: IndexMode) -> Result<(), CompileError> {
        let mut scalars = ScalarPool::with_base(self.scalars.clone());
        let mut refs = RefPool::with_base(self.refs.clone());
        let mut compiler = Compiler::new(&mut scalars, &mut refs);
        compiler.compile_rules(std::slice::from_ref(rule))?;
        let (code, clauses) = compiler.finish();

        let seg = Arc::new(CodeSegment {
            code,
            scalars: Arc::new(scalars),
            refs: Arc::new(refs),
        });
        for (i, (offset, head)) in clauses.into_iter().enumerate() {
            // the placement mode applies to the asserted clause;
            // helper clauses are fresh predicates, order within them
            // stays compilation order
            let clause_mode = if i == 0 { mode } else { IndexMode::Append };
            self.index.insert(seg.clone(), offset, head, clause_mode);
        }
        Ok(())
    }
}

/// Lazy solution stream for one query. Backtracking state lives
/// inside, so the iterator is bound to the thread that created it.
pub struct QuerySolutions {
    exec: Exec,
    done: bool,
}

impl Iterator for QuerySolutions {
    type Item = Result<Solution, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.exec.next_solution() {
            Ok(Some(bindings)) => Some(Ok(Solution { bindings })),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{cst, fact, goal, rule, var};

    fn family() -> Machine {
        Machine::new(vec![
            fact("father", vec![cst("tywin"), cst("jaime")]),
            fact("father", vec![cst("tywin"), cst("cersei")]),
            fact("father", vec![cst("jaime"), cst("joffrey")]),
            rule(
                "grandfather",
                vec![var("G"), var("C")],
                vec![
                    goal("father", vec![var("G"), var("P")]),
                    goal("father", vec![var("P"), var("C")]),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn single_goal_enumerates_matching_facts() {
        let m = family();
        let names: Vec<Value> = m
            .query(vec![goal("father", vec![cst("tywin"), var("C")])])
            .unwrap()
            .map(|s| s.unwrap().get("C").cloned().unwrap())
            .collect();
        assert_eq!(names, vec![Value::from("jaime"), Value::from("cersei")]);
    }

    #[test]
    fn conjunction_joins_through_shared_variables() {
        let m = family();
        let solutions: Vec<Solution> = m
            .query(vec![goal("grandfather", vec![var("G"), cst("joffrey")])])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].get("G"), Some(&Value::from("tywin")));
    }

    #[test]
    fn unknown_predicate_has_no_solutions() {
        let m = family();
        assert!(!m.any(vec![goal("mother", vec![var("M"), var("C")])]).unwrap());
    }
}

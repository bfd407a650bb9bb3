//! The resolution loop.
//!
//! Execution is a cursor (`pc`) over immutable code segments plus a
//! chain of frames. Unification mismatch sets a failure flag; the loop
//! answers failure by backtracking to the youngest frame that still
//! has untried clauses. A `Proceed` in the root frame is a solution;
//! the caller can re-enter to search for the next one.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::ast::{Builtin, ListPattern, Rule, Term};
use crate::constants::RefConst;
use crate::errors::EngineError;
use crate::indexing::{IndexMode, LocalIndex};
use crate::instructions::{CodeSegment, InstrPtr, OpCode};
use crate::machine::frame::{FrameRef, RegisterValue, StackFrame, VarCell};
use crate::machine::unify::{
    unify_const, unify_empty, unify_head, unify_len, unify_nth, unify_reg, unify_tail,
};
use crate::machine::Machine;
use crate::value::Value;

enum Step {
    Continue,
    Solution,
    Exhausted,
}

/// One query's execution state over a shared knowledge base.
pub(crate) struct Exec {
    machine: Machine,
    local: LocalIndex,
    root: FrameRef,
    cur: FrameRef,
    /// Frames created by `PushFrame`, oldest first. The root frame is
    /// not in it.
    env: Vec<FrameRef>,
    next_frame_id: u64,
    pc: InstrPtr,
    failed: bool,
    started: bool,
}

impl Exec {
    pub fn new(
        machine: Machine,
        local: LocalIndex,
        query_seg: Arc<CodeSegment>,
        entry: usize,
    ) -> Self {
        let root = StackFrame::new(0, None, None);
        Exec {
            machine,
            local,
            cur: root.clone(),
            root,
            env: Vec::new(),
            next_frame_id: 1,
            pc: InstrPtr::new(query_seg, entry),
            failed: false,
            started: false,
        }
    }

    /// Runs until the next solution, returning its root-level variable
    /// bindings, or `None` once the search space is exhausted.
    pub fn next_solution(&mut self) -> Result<Option<BTreeMap<String, Value>>, EngineError> {
        if self.started {
            // resume the search as if the previous solution had failed
            if !self.backtrack() {
                return Ok(None);
            }
        }
        self.started = true;

        loop {
            match self.step()? {
                Step::Solution => return Ok(Some(self.snapshot())),
                Step::Exhausted => return Ok(None),
                Step::Continue => {
                    if self.failed && !self.backtrack() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// The bindings of every named, bound variable of the root frame.
    fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        let root = self.root.borrow();
        for reg in 0..root.regs.len() {
            if let RegisterValue::Var(cell) = root.regs.get(reg as u8) {
                let name = cell.name();
                if name.as_ref() == "_" {
                    continue;
                }
                if let Some(value) = cell.value() {
                    out.insert(name.to_string(), value);
                }
            }
        }
        out
    }

    fn backtrack(&mut self) -> bool {
        while let Some(frame) = self.env.last().cloned() {
            frame.borrow().undo_bindings();
            let entry = {
                let mut f = frame.borrow_mut();
                let arity = f.arity;
                match f.choices.take() {
                    Some(mut choices) => {
                        f.regs.truncate(arity);
                        let entry = choices.pop_front();
                        if !choices.is_empty() {
                            f.choices = Some(choices);
                        }
                        entry
                    }
                    None => None,
                }
            };
            match entry {
                Some(entry) => {
                    trace!(functor = %entry.head.functor, offset = entry.offset, "retry");
                    self.cur = frame;
                    self.pc = InstrPtr::new(entry.seg, entry.offset);
                    self.failed = false;
                    return true;
                }
                None => {
                    self.env.pop();
                }
            }
        }
        false
    }

    fn step(&mut self) -> Result<Step, EngineError> {
        let op = self.pc.opcode()?;
        match op {
            OpCode::UnifyScalar => {
                let value = self.pc.seg.scalars.get(self.pc.arg(0)? as u32)?;
                self.failed = !unify_const(&self.cur, self.pc.arg(1)?, &value)?;
            }
            OpCode::UnifyScalarWide => {
                let value = self.pc.seg.scalars.get(self.pc.arg_u32(0)?)?;
                self.failed = !unify_const(&self.cur, self.pc.arg(4)?, &value)?;
            }
            OpCode::UnifyRef => {
                let idx = self.pc.arg(0)? as u32;
                let value = self.pc.seg.refs.get(idx)?.to_value(idx)?;
                self.failed = !unify_const(&self.cur, self.pc.arg(1)?, &value)?;
            }
            OpCode::UnifyRefWide => {
                let idx = self.pc.arg_u32(0)?;
                let value = self.pc.seg.refs.get(idx)?.to_value(idx)?;
                self.failed = !unify_const(&self.cur, self.pc.arg(4)?, &value)?;
            }
            OpCode::UnifyTrue => {
                self.failed = !unify_const(&self.cur, self.pc.arg(0)?, &Value::Bool(true))?;
            }
            OpCode::UnifyFalse => {
                self.failed = !unify_const(&self.cur, self.pc.arg(0)?, &Value::Bool(false))?;
            }
            OpCode::UnifyNull => {
                self.failed = !unify_const(&self.cur, self.pc.arg(0)?, &Value::Null)?;
            }
            OpCode::UnifyReg => {
                self.failed = !unify_reg(&self.cur, self.pc.arg(0)?, self.pc.arg(1)?)?;
            }
            OpCode::UnifyEmpty => {
                self.failed = !unify_empty(&self.cur, self.pc.arg(0)?)?;
            }
            OpCode::UnifyHead => {
                self.failed = !unify_head(&self.cur, self.pc.arg(0)?, self.pc.arg(1)?)?;
            }
            OpCode::UnifyNth => {
                self.failed =
                    !unify_nth(&self.cur, self.pc.arg(0)?, self.pc.arg(1)?, self.pc.arg(2)?)?;
            }
            OpCode::UnifyTail => {
                self.failed = !unify_tail(&self.cur, self.pc.arg(0)?, self.pc.arg(1)?)?;
            }
            OpCode::UnifyLen => {
                self.failed = !unify_len(&self.cur, self.pc.arg_u32(0)?, self.pc.arg(4)?)?;
            }
            OpCode::PutArg => {
                let caller = self
                    .cur
                    .borrow()
                    .prev
                    .clone()
                    .ok_or(EngineError::FrameUnderflow)?;
                let value = caller.borrow().regs.get(self.pc.arg(0)?);
                self.cur.borrow_mut().regs.set(self.pc.arg(1)?, value);
            }
            OpCode::PushFrame => {
                let id = self.next_frame_id;
                self.next_frame_id += 1;
                let frame = StackFrame::new(id, Some(self.cur.clone()), None);
                self.env.push(frame.clone());
                self.cur = frame;
            }
            OpCode::CallGoal => {
                return self.call_goal(op);
            }
            OpCode::Proceed => {
                let prev = self.cur.borrow().prev.clone();
                match prev {
                    None => return Ok(Step::Solution),
                    Some(caller) => {
                        let cp = self
                            .cur
                            .borrow()
                            .cp
                            .clone()
                            .ok_or(EngineError::MissingContinuation)?;
                        self.cur = caller;
                        self.pc = cp;
                        return Ok(Step::Continue);
                    }
                }
            }
            OpCode::Fail => {
                self.failed = true;
            }
            OpCode::Gt => self.compare(|ord| ord == CmpOrdering::Greater)?,
            OpCode::Lt => self.compare(|ord| ord == CmpOrdering::Less)?,
            OpCode::Ge => self.compare(|ord| ord != CmpOrdering::Less)?,
            OpCode::Le => self.compare(|ord| ord != CmpOrdering::Greater)?,
            OpCode::Eq => self.equality(true)?,
            OpCode::Ne => self.equality(false)?,
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Rem => {
                self.arith(op)?;
            }
            OpCode::Cut => {
                let mut walk = Some(self.cur.clone());
                while let Some(frame) = walk {
                    if frame.borrow().choices.is_some() {
                        frame.borrow_mut().choices = None;
                        break;
                    }
                    walk = frame.borrow().prev.clone();
                }
            }
            OpCode::NewVar => {
                let name = self.pc.seg.refs.get_str(self.pc.arg_u32(0)?)?;
                let reg = self.pc.arg(4)?;
                self.cur
                    .borrow_mut()
                    .regs
                    .set(reg, RegisterValue::Var(VarCell::new(name)));
            }
            OpCode::TypeGuard => {
                let tag = self.pc.seg.refs.get_str(self.pc.arg_u32(0)?)?;
                let resolved = self.cur.borrow().regs.get(self.pc.arg(4)?).resolve();
                self.failed = match resolved {
                    Some(v) => v.type_tag() != tag.as_ref(),
                    None => true,
                };
            }
            OpCode::GetMember => {
                let name = self.pc.seg.refs.get_str(self.pc.arg_u32(0)?)?;
                let obj = self.cur.borrow().regs.get(self.pc.arg(4)?).resolve();
                match obj {
                    Some(Value::Obj(o)) => match o.get_member(&name) {
                        Some(v) => {
                            self.failed = !unify_const(&self.cur, self.pc.arg(5)?, &v)?;
                        }
                        None => self.failed = true,
                    },
                    _ => self.failed = true,
                }
            }
            OpCode::AssertFirst => self.assert(IndexMode::Prepend)?,
            OpCode::AssertLast => self.assert(IndexMode::Append)?,
        }
        self.pc = self.pc.advance(op);
        Ok(Step::Continue)
    }

    fn call_goal(&mut self, op: OpCode) -> Result<Step, EngineError> {
        let functor = self.pc.seg.refs.get_str(self.pc.arg_u32(0)?)?;
        let (arity, first) = {
            let f = self.cur.borrow();
            (f.regs.len(), f.regs.get(0).resolve())
        };

        let mut candidates = self
            .local
            .candidates(&functor, arity, first.as_ref())
            .unwrap_or_else(|| self.machine.index.candidates(&functor, arity, first.as_ref()));
        trace!(functor = %functor, arity, candidates = candidates.len(), "call");

        let Some(entry) = candidates.pop_front() else {
            self.failed = true;
            self.pc = self.pc.advance(op);
            return Ok(Step::Continue);
        };

        {
            let mut f = self.cur.borrow_mut();
            f.cp = Some(self.pc.advance(op));
            f.arity = arity;
            f.choices = if candidates.is_empty() {
                None
            } else {
                Some(candidates)
            };
        }
        self.pc = InstrPtr::new(entry.seg, entry.offset);
        Ok(Step::Continue)
    }

    fn operands(&self) -> Result<(Option<Value>, Option<Value>, u8), EngineError> {
        let f = self.cur.borrow();
        Ok((
            f.regs.get(self.pc.arg(0)?).resolve(),
            f.regs.get(self.pc.arg(1)?).resolve(),
            self.pc.arg(2)?,
        ))
    }

    /// Ordering comparison: fails on an unbound or incomparable
    /// operand, otherwise binds the boolean outcome into the result
    /// register and fails unless it is true.
    fn compare(&mut self, accept: impl Fn(CmpOrdering) -> bool) -> Result<(), EngineError> {
        let (a, b, dst) = self.operands()?;
        let outcome = match (a, b) {
            (Some(a), Some(b)) => a.compare(&b).map(&accept),
            _ => None,
        };
        match outcome {
            Some(result) => {
                self.failed = !unify_const(&self.cur, dst, &Value::Bool(result))? || !result;
            }
            None => self.failed = true,
        }
        Ok(())
    }

    fn equality(&mut self, want_equal: bool) -> Result<(), EngineError> {
        let (a, b, dst) = self.operands()?;
        match (a, b) {
            (Some(a), Some(b)) => {
                let result = (a == b) == want_equal;
                self.failed = !unify_const(&self.cur, dst, &Value::Bool(result))? || !result;
            }
            _ => self.failed = true,
        }
        Ok(())
    }

    fn arith(&mut self, op: OpCode) -> Result<(), EngineError> {
        let (a, b, dst) = self.operands()?;
        let result = match (a, b) {
            (Some(a), Some(b)) => eval_arith(op, &a, &b),
            _ => None,
        };
        match result {
            Some(value) => self.failed = !unify_const(&self.cur, dst, &value)?,
            None => self.failed = true,
        }
        Ok(())
    }

    /// Recompiles a captured clause against the knowledge-base pools
    /// and splices it into the shared index. Captured variables that
    /// are bound right now are frozen into the clause as constants.
    fn assert(&mut self, mode: IndexMode) -> Result<(), EngineError> {
        let idx = self.pc.arg_u32(0)?;
        let snapshot = match self.pc.seg.refs.get(idx)? {
            RefConst::Clause(snap) => snap.clone(),
            _ => return Err(EngineError::BadConstant(idx)),
        };

        let mut rule = snapshot.rule.clone();
        for (name, reg) in &snapshot.captures {
            if let Some(value) = self.cur.borrow().regs.get(*reg).resolve() {
                substitute_rule(&mut rule, name, &value);
            }
        }
        trace!(functor = %rule.functor, arity = rule.head.len(), ?mode, "assert");
        self.machine.assert_compiled(&rule, mode)?;
        Ok(())
    }
}

fn eval_arith(op: OpCode, a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            let r = match op {
                OpCode::Add => x.checked_add(*y),
                OpCode::Sub => x.checked_sub(*y),
                OpCode::Mul => x.checked_mul(*y),
                OpCode::Div => x.checked_div(*y),
                OpCode::Rem => x.checked_rem(*y),
                _ => None,
            };
            r.map(Value::Int)
        }
        (Value::Int(x), Value::Float(y)) => eval_float(op, *x as f64, y.0),
        (Value::Float(x), Value::Int(y)) => eval_float(op, x.0, *y as f64),
        (Value::Float(x), Value::Float(y)) => eval_float(op, x.0, y.0),
        _ => None,
    }
}

fn eval_float(op: OpCode, x: f64, y: f64) -> Option<Value> {
    let r = match op {
        OpCode::Add => x + y,
        OpCode::Sub => x - y,
        OpCode::Mul => x * y,
        OpCode::Div => x / y,
        OpCode::Rem => x % y,
        _ => return None,
    };
    r.is_finite().then(|| Value::from(r))
}

fn substitute_term(term: &mut Term, name: &str, value: &Value) {
    match term {
        Term::Var(n) if n == name => *term = Term::Const(value.clone()),
        Term::Var(_) | Term::Const(_) => {}
        Term::Compound { args, .. } => {
            for arg in args {
                substitute_term(arg, name, value);
            }
        }
        Term::ListPattern(ListPattern { items, .. }) => {
            // a tail name is a binder, not a reference; it stays free
            for item in items {
                substitute_term(item, name, value);
            }
        }
        Term::Builtin(b) => match &mut **b {
            Builtin::Cut | Builtin::Fail => {}
            Builtin::Not(g) => substitute_term(g, name, value),
            Builtin::Cmp(_, x, y) | Builtin::Arith(_, x, y) | Builtin::Is(x, y) => {
                substitute_term(x, name, value);
                substitute_term(y, name, value);
            }
            Builtin::OfType(v, _) | Builtin::MemberAccess(v, _) => substitute_term(v, name, value),
            // nested asserts have their own scope
            Builtin::AssertFirst(_) | Builtin::AssertLast(_) => {}
        },
    }
}

fn substitute_rule(rule: &mut Rule, name: &str, value: &Value) {
    for term in rule.head.iter_mut().chain(rule.body.iter_mut()) {
        substitute_term(term, name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_guards_division() {
        assert_eq!(
            eval_arith(OpCode::Add, &Value::from(2), &Value::from(3)),
            Some(Value::from(5))
        );
        assert_eq!(eval_arith(OpCode::Div, &Value::from(7), &Value::from(2)), Some(Value::from(3)));
        assert_eq!(eval_arith(OpCode::Div, &Value::from(1), &Value::from(0)), None);
        assert_eq!(eval_arith(OpCode::Rem, &Value::from(1), &Value::from(0)), None);
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        assert_eq!(
            eval_arith(OpCode::Mul, &Value::from(2), &Value::from(1.5)),
            Some(Value::from(3.0))
        );
        assert_eq!(eval_arith(OpCode::Div, &Value::from(1.0), &Value::from(0.0)), None);
    }

    #[test]
    fn substitution_freezes_captured_variables() {
        let mut rule = crate::ast::rule(
            "p",
            vec![crate::ast::var("X"), crate::ast::var("Y")],
            vec![crate::ast::gt(crate::ast::var("X"), crate::ast::var("Y"))],
        );
        substitute_rule(&mut rule, "X", &Value::from(4));
        assert_eq!(rule.head[0], Term::Const(Value::from(4)));
        assert_eq!(rule.head[1], crate::ast::var("Y"));
        match &rule.body[0] {
            Term::Builtin(b) => match &**b {
                Builtin::Cmp(_, a, _) => assert_eq!(*a, Term::Const(Value::from(4))),
                other => panic!("unexpected builtin {other:?}"),
            },
            other => panic!("unexpected term {other:?}"),
        }
    }
}

//! Clause and query lowering.
//!
//! Register discipline: head arguments occupy registers `0..arity`,
//! every named variable gets one register for the whole clause, and
//! temporaries are appended after. Goal calls fill the callee's
//! argument registers between `PushFrame` and `CallGoal`; everything
//! else targets the running clause's own frame.
//!
//! Negation does not get its own opcode. `not(G)` is rewritten into a
//! generated predicate with two clauses, `[G, !, fail]` and an
//! unconditional fact, called with the free variables of `G` as
//! arguments. The rewrite recurses, so nested negation costs nothing
//! extra.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::ast::{cut, fail, var, ArithOp, Builtin, CmpOp, ListPattern, Rule, Term};
use crate::constants::{ClauseSnapshot, RefConst, RefPool, ScalarPool};
use crate::errors::CompileError;
use crate::indexing::ClauseHead;
use crate::instructions::{CodeWriter, OpCode, SHORT_INDEX_MAX};
use crate::value::Value;

static NEG_SEQ: AtomicU64 = AtomicU64::new(0);

/// Per-clause register state.
#[derive(Default)]
struct ClauseCtx {
    vars: FxHashMap<String, u8>,
    next_reg: usize,
}

impl ClauseCtx {
    fn alloc(&mut self) -> Result<u8, CompileError> {
        if self.next_reg > u8::MAX as usize {
            return Err(CompileError::RegisterOverflow);
        }
        let reg = self.next_reg as u8;
        self.next_reg += 1;
        Ok(reg)
    }
}

/// A follow-up match emitted after a list-pattern element lands in its
/// register: against an earlier occurrence of the same variable, or
/// against a constant.
enum Check {
    Reg(u8),
    Value(Value),
}

/// Collects the distinct named variables of a term, in first-seen
/// order. Variables inside an asserted clause belong to that clause's
/// own scope and are not collected.
fn collect_free_vars(term: &Term, out: &mut Vec<String>) {
    match term {
        Term::Var(name) => {
            if !out.iter().any(|v| v == name) {
                out.push(name.clone());
            }
        }
        Term::Const(_) => {}
        Term::Compound { args, .. } => {
            for arg in args {
                collect_free_vars(arg, out);
            }
        }
        Term::ListPattern(p) => {
            for item in &p.items {
                collect_free_vars(item, out);
            }
            if let Some(tail) = &p.tail {
                if !out.iter().any(|v| v == tail) {
                    out.push(tail.clone());
                }
            }
        }
        Term::Builtin(b) => match &**b {
            Builtin::Cut | Builtin::Fail => {}
            Builtin::Not(g) => collect_free_vars(g, out),
            Builtin::Cmp(_, a, b) | Builtin::Arith(_, a, b) | Builtin::Is(a, b) => {
                collect_free_vars(a, out);
                collect_free_vars(b, out);
            }
            Builtin::OfType(v, _) | Builtin::MemberAccess(v, _) => collect_free_vars(v, out),
            Builtin::AssertFirst(_) | Builtin::AssertLast(_) => {}
        },
    }
}

fn cmp_opcode(op: CmpOp) -> OpCode {
    match op {
        CmpOp::Gt => OpCode::Gt,
        CmpOp::Lt => OpCode::Lt,
        CmpOp::Ge => OpCode::Ge,
        CmpOp::Le => OpCode::Le,
        CmpOp::Eq => OpCode::Eq,
        CmpOp::Ne => OpCode::Ne,
    }
}

fn arith_opcode(op: ArithOp) -> OpCode {
    match op {
        ArithOp::Add => OpCode::Add,
        ArithOp::Sub => OpCode::Sub,
        ArithOp::Mul => OpCode::Mul,
        ArithOp::Div => OpCode::Div,
        ArithOp::Rem => OpCode::Rem,
    }
}

/// Lowers rules and queries into one code buffer, interning constants
/// into the pools it borrows.
pub(crate) struct Compiler<'a> {
    scalars: &'a mut ScalarPool,
    refs: &'a mut RefPool,
    code: CodeWriter,
    clauses: Vec<(usize, ClauseHead)>,
    pending: Vec<Rule>,
}

impl<'a> Compiler<'a> {
    pub fn new(scalars: &'a mut ScalarPool, refs: &'a mut RefPool) -> Self {
        Compiler {
            scalars,
            refs,
            code: CodeWriter::new(),
            clauses: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Compiles a batch of program rules, plus whatever helper clauses
    /// they expand into.
    pub fn compile_rules(&mut self, rules: &[Rule]) -> Result<(), CompileError> {
        for rule in rules {
            self.compile_clause(rule, true)?;
        }
        self.drain_pending()
    }

    /// Compiles query goals as a body-only clause and returns its
    /// entry offset. The query clause itself is not indexed; helper
    /// clauses it expands into are.
    pub fn compile_query(&mut self, goals: &[Term]) -> Result<usize, CompileError> {
        let query = Rule {
            functor: "?-".to_string(),
            head: Vec::new(),
            body: goals.to_vec(),
        };
        let entry = self.compile_clause(&query, false)?;
        self.drain_pending()?;
        Ok(entry)
    }

    /// The finished code buffer and the entry offsets of every indexed
    /// clause, in compilation order.
    pub fn finish(self) -> (Vec<u8>, Vec<(usize, ClauseHead)>) {
        (self.code.finish(), self.clauses)
    }

    fn drain_pending(&mut self) -> Result<(), CompileError> {
        // clause expansion may queue further clauses
        let mut at = 0;
        while at < self.pending.len() {
            let rule = self.pending[at].clone();
            at += 1;
            self.compile_clause(&rule, true)?;
        }
        self.pending.clear();
        Ok(())
    }

    fn compile_clause(&mut self, rule: &Rule, register: bool) -> Result<usize, CompileError> {
        let entry = self.code.here();
        if rule.head.len() > u8::MAX as usize {
            return Err(CompileError::TooManyArguments {
                functor: rule.functor.clone(),
                arity: rule.head.len(),
            });
        }

        let mut ctx = ClauseCtx {
            vars: FxHashMap::default(),
            next_reg: rule.head.len(),
        };
        let mut dups: Vec<(u8, u8)> = Vec::new();
        let mut patterns: Vec<(u8, &ListPattern)> = Vec::new();

        for (i, arg) in rule.head.iter().enumerate() {
            let reg = i as u8;
            match arg {
                Term::Const(v) => self.emit_unify_value(v, reg),
                Term::Var(name) => match ctx.vars.get(name) {
                    Some(&first) => dups.push((first, reg)),
                    None => {
                        ctx.vars.insert(name.clone(), reg);
                    }
                },
                Term::ListPattern(p) => patterns.push((reg, p)),
                other => {
                    return Err(CompileError::BadHeadElement {
                        found: other.describe(),
                    })
                }
            }
        }
        for (reg, pattern) in patterns {
            self.compile_pattern(&mut ctx, reg, pattern)?;
        }

        for goal in &rule.body {
            self.compile_goal(&mut ctx, goal)?;
        }
        // duplicate head positions unify after the body, so body side
        // effects happen even when the repeated positions mismatch
        for (first, dup) in dups {
            self.code.op(OpCode::UnifyReg, &[first, dup]);
        }
        self.code.op(OpCode::Proceed, &[]);

        if register {
            self.clauses.push((
                entry,
                ClauseHead {
                    functor: Arc::from(rule.functor.as_str()),
                    args: Arc::new(rule.head.clone()),
                },
            ));
        }
        Ok(entry)
    }

    /// The register of a named variable, introducing it with `NewVar`
    /// on first sight. `NewVar` rewrites its slot on every execution,
    /// so a variable introduced after a choice point is fresh again on
    /// each retry.
    fn var_reg(&mut self, ctx: &mut ClauseCtx, name: &str) -> Result<u8, CompileError> {
        if let Some(&reg) = ctx.vars.get(name) {
            return Ok(reg);
        }
        let reg = ctx.alloc()?;
        ctx.vars.insert(name.to_string(), reg);
        let idx = self.refs.intern_str(name);
        self.code.op_u32_u8(OpCode::NewVar, idx, reg);
        Ok(reg)
    }

    /// A fresh anonymous cell for computed results.
    fn temp_var(&mut self, ctx: &mut ClauseCtx) -> Result<u8, CompileError> {
        let reg = ctx.alloc()?;
        let idx = self.refs.intern_str("_");
        self.code.op_u32_u8(OpCode::NewVar, idx, reg);
        Ok(reg)
    }

    fn emit_unify_value(&mut self, v: &Value, reg: u8) {
        match v {
            Value::Bool(true) => self.code.op(OpCode::UnifyTrue, &[reg]),
            Value::Bool(false) => self.code.op(OpCode::UnifyFalse, &[reg]),
            Value::Null => self.code.op(OpCode::UnifyNull, &[reg]),
            Value::Int(_) | Value::Float(_) | Value::Char(_) => {
                let Some(idx) = self.scalars.intern(v) else {
                    unreachable!("ints, floats and chars are inline scalars")
                };
                if idx <= SHORT_INDEX_MAX {
                    self.code.op(OpCode::UnifyScalar, &[idx as u8, reg]);
                } else {
                    self.code.op_u32_u8(OpCode::UnifyScalarWide, idx, reg);
                }
            }
            Value::Str(s) => self.emit_unify_ref(RefConst::Str(s.clone()), reg),
            Value::List(l) => self.emit_unify_ref(RefConst::List(l.clone()), reg),
            Value::Obj(o) => self.emit_unify_ref(RefConst::Obj(o.clone()), reg),
        }
    }

    fn emit_unify_ref(&mut self, c: RefConst, reg: u8) {
        let idx = self.refs.intern(c);
        if idx <= SHORT_INDEX_MAX {
            self.code.op(OpCode::UnifyRef, &[idx as u8, reg]);
        } else {
            self.code.op_u32_u8(OpCode::UnifyRefWide, idx, reg);
        }
    }

    fn compile_pattern(
        &mut self,
        ctx: &mut ClauseCtx,
        list_reg: u8,
        pattern: &ListPattern,
    ) -> Result<(), CompileError> {
        if pattern.items.is_empty() {
            if pattern.tail.is_some() {
                return Err(CompileError::TailNotLast);
            }
            self.code.op(OpCode::UnifyEmpty, &[list_reg]);
            return Ok(());
        }
        if pattern.items.len() > u8::MAX as usize {
            return Err(CompileError::ListPatternTooLong);
        }

        for (j, item) in pattern.items.iter().enumerate() {
            // the element lands in `target`; `check` runs afterwards
            // when the element must also match something older
            let (target, check) = match item {
                Term::Var(name) => match ctx.vars.get(name) {
                    Some(&first) => (ctx.alloc()?, Some(Check::Reg(first))),
                    None => (self.var_reg(ctx, name)?, None),
                },
                Term::Const(v) => (ctx.alloc()?, Some(Check::Value(v.clone()))),
                other => {
                    return Err(CompileError::BadHeadElement {
                        found: other.describe(),
                    })
                }
            };
            if j == 0 {
                self.code.op(OpCode::UnifyHead, &[list_reg, target]);
            } else {
                self.code.op(OpCode::UnifyNth, &[list_reg, target, j as u8]);
            }
            match check {
                Some(Check::Reg(first)) => self.code.op(OpCode::UnifyReg, &[first, target]),
                Some(Check::Value(v)) => self.emit_unify_value(&v, target),
                None => {}
            }
        }

        match &pattern.tail {
            Some(name) => {
                // the tail after k fixed elements is k single-step
                // tails chained through temporaries
                let mut cur = list_reg;
                for _ in 1..pattern.items.len() {
                    let step = ctx.alloc()?;
                    self.code.op(OpCode::UnifyTail, &[cur, step]);
                    cur = step;
                }
                let tail_reg = self.var_reg(ctx, name)?;
                self.code.op(OpCode::UnifyTail, &[cur, tail_reg]);
            }
            None => {
                self.code
                    .op_u32_u8(OpCode::UnifyLen, pattern.items.len() as u32, list_reg);
            }
        }
        Ok(())
    }

    fn compile_goal(&mut self, ctx: &mut ClauseCtx, goal: &Term) -> Result<(), CompileError> {
        match goal {
            Term::Compound { functor, args } => self.compile_call(ctx, functor, args),
            Term::Builtin(b) => match &**b {
                Builtin::Cut => {
                    self.code.op(OpCode::Cut, &[]);
                    Ok(())
                }
                Builtin::Fail => {
                    self.code.op(OpCode::Fail, &[]);
                    Ok(())
                }
                Builtin::Not(inner) => self.compile_not(ctx, inner),
                Builtin::Cmp(op, a, b) => {
                    let ra = self.operand(ctx, a)?;
                    let rb = self.operand(ctx, b)?;
                    let dst = self.temp_var(ctx)?;
                    self.code.op(cmp_opcode(*op), &[ra, rb, dst]);
                    Ok(())
                }
                Builtin::Is(lhs, rhs) => self.compile_is(ctx, lhs, rhs),
                Builtin::OfType(v, tag) => {
                    let reg = self.operand(ctx, v)?;
                    let idx = self.refs.intern_str(tag);
                    self.code.op_u32_u8(OpCode::TypeGuard, idx, reg);
                    Ok(())
                }
                Builtin::AssertFirst(rule) => self.compile_assert(ctx, rule, OpCode::AssertFirst),
                Builtin::AssertLast(rule) => self.compile_assert(ctx, rule, OpCode::AssertLast),
                Builtin::Arith(..) | Builtin::MemberAccess(..) => {
                    Err(CompileError::UnsupportedBuiltin(goal.describe()))
                }
            },
            Term::ListPattern(_) => Err(CompileError::ListPatternOutsideHead),
            other => Err(CompileError::InvalidGoal {
                found: other.describe(),
            }),
        }
    }

    fn compile_call(
        &mut self,
        ctx: &mut ClauseCtx,
        functor: &str,
        args: &[Term],
    ) -> Result<(), CompileError> {
        if args.len() > u8::MAX as usize {
            return Err(CompileError::TooManyArguments {
                functor: functor.to_string(),
                arity: args.len(),
            });
        }
        // introduce fresh variables in the caller before the callee
        // frame opens, so the shared cells live in caller registers
        for arg in args {
            if let Term::Var(name) = arg {
                self.var_reg(ctx, name)?;
            }
        }

        self.code.op(OpCode::PushFrame, &[]);
        for (j, arg) in args.iter().enumerate() {
            match arg {
                Term::Var(name) => {
                    let src = self.var_reg(ctx, name)?;
                    self.code.op(OpCode::PutArg, &[src, j as u8]);
                }
                Term::Const(v) => self.emit_unify_value(v, j as u8),
                Term::Compound { functor, .. } => {
                    return Err(CompileError::NestedCompound {
                        functor: functor.clone(),
                    })
                }
                Term::ListPattern(_) => return Err(CompileError::ListPatternOutsideHead),
                Term::Builtin(_) => {
                    return Err(CompileError::InvalidGoal {
                        found: arg.describe(),
                    })
                }
            }
        }
        let idx = self.refs.intern_str(functor);
        self.code.op_u32(OpCode::CallGoal, idx);
        Ok(())
    }

    /// The register holding an operand value, materializing constants
    /// and nested computations into temporaries.
    fn operand(&mut self, ctx: &mut ClauseCtx, term: &Term) -> Result<u8, CompileError> {
        match term {
            Term::Var(name) => self.var_reg(ctx, name),
            Term::Const(v) => {
                let reg = ctx.alloc()?;
                self.emit_unify_value(v, reg);
                Ok(reg)
            }
            Term::Builtin(b) => match &**b {
                Builtin::Arith(op, a, b) => {
                    let ra = self.operand(ctx, a)?;
                    let rb = self.operand(ctx, b)?;
                    let dst = self.temp_var(ctx)?;
                    self.code.op(arith_opcode(*op), &[ra, rb, dst]);
                    Ok(dst)
                }
                Builtin::MemberAccess(recv, name) => {
                    let obj = self.operand(ctx, recv)?;
                    let dst = self.temp_var(ctx)?;
                    let idx = self.refs.intern_str(name);
                    self.code.op_u32_u8_u8(OpCode::GetMember, idx, obj, dst);
                    Ok(dst)
                }
                _ => Err(CompileError::InvalidGoal {
                    found: term.describe(),
                }),
            },
            Term::Compound { functor, .. } => Err(CompileError::NestedCompound {
                functor: functor.clone(),
            }),
            Term::ListPattern(_) => Err(CompileError::ListPatternOutsideHead),
        }
    }

    fn compile_is(
        &mut self,
        ctx: &mut ClauseCtx,
        lhs: &Term,
        rhs: &Term,
    ) -> Result<(), CompileError> {
        let Term::Var(name) = lhs else {
            return Err(CompileError::InvalidAssignment);
        };
        match rhs {
            Term::Const(v) => {
                let reg = self.var_reg(ctx, name)?;
                self.emit_unify_value(v, reg);
                Ok(())
            }
            Term::Var(rname) => {
                let src = self.var_reg(ctx, rname)?;
                let dst = self.var_reg(ctx, name)?;
                self.code.op(OpCode::UnifyReg, &[src, dst]);
                Ok(())
            }
            Term::Builtin(b) => match &**b {
                Builtin::Arith(op, a, b) => {
                    let ra = self.operand(ctx, a)?;
                    let rb = self.operand(ctx, b)?;
                    let dst = self.var_reg(ctx, name)?;
                    self.code.op(arith_opcode(*op), &[ra, rb, dst]);
                    Ok(())
                }
                Builtin::MemberAccess(recv, member) => {
                    let obj = self.operand(ctx, recv)?;
                    let dst = self.var_reg(ctx, name)?;
                    let idx = self.refs.intern_str(member);
                    self.code.op_u32_u8_u8(OpCode::GetMember, idx, obj, dst);
                    Ok(())
                }
                _ => Err(CompileError::AssignmentFromGoal),
            },
            Term::Compound { .. } => Err(CompileError::AssignmentFromGoal),
            Term::ListPattern(_) => Err(CompileError::ListPatternOutsideHead),
        }
    }

    fn compile_not(&mut self, ctx: &mut ClauseCtx, inner: &Term) -> Result<(), CompileError> {
        match inner {
            Term::Compound { .. } => {}
            Term::Builtin(b) => match &**b {
                Builtin::Cut
                | Builtin::Fail
                | Builtin::MemberAccess(..)
                | Builtin::Arith(..)
                | Builtin::AssertFirst(_)
                | Builtin::AssertLast(_) => return Err(CompileError::UncallableNegation),
                _ => {}
            },
            _ => return Err(CompileError::UncallableNegation),
        }

        let mut vars = Vec::new();
        collect_free_vars(inner, &mut vars);
        if vars.len() > u8::MAX as usize {
            return Err(CompileError::TooManyArguments {
                functor: "not".to_string(),
                arity: vars.len(),
            });
        }

        let seq = NEG_SEQ.fetch_add(1, Ordering::Relaxed);
        let functor = match inner {
            Term::Compound { functor, .. } => format!("$not_{functor}_{seq}"),
            _ => format!("$not_{seq}"),
        };
        let head: Vec<Term> = vars.iter().map(|n| var(n)).collect();

        self.pending.push(Rule {
            functor: functor.clone(),
            head: head.clone(),
            body: vec![inner.clone(), cut(), fail()],
        });
        self.pending.push(Rule {
            functor: functor.clone(),
            head,
            body: Vec::new(),
        });

        let args: Vec<Term> = vars.iter().map(|n| var(n)).collect();
        self.compile_call(ctx, &functor, &args)
    }

    fn compile_assert(
        &mut self,
        ctx: &mut ClauseCtx,
        rule: &Rule,
        op: OpCode,
    ) -> Result<(), CompileError> {
        let mut vars = Vec::new();
        for term in rule.head.iter().chain(&rule.body) {
            collect_free_vars(term, &mut vars);
        }
        let captures: Vec<(String, u8)> = vars
            .into_iter()
            .filter_map(|name| ctx.vars.get(&name).map(|&reg| (name, reg)))
            .collect();

        let snapshot = ClauseSnapshot {
            rule: rule.clone(),
            captures,
        };
        let idx = self.refs.intern(RefConst::Clause(Arc::new(snapshot)));
        self.code.op_u32(op, idx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{self, cst, fact, goal, rule};

    fn compile(rules: &[Rule]) -> Result<(Vec<u8>, Vec<(usize, ClauseHead)>), CompileError> {
        let mut scalars = ScalarPool::new();
        let mut refs = RefPool::new();
        let mut compiler = Compiler::new(&mut scalars, &mut refs);
        compiler.compile_rules(rules)?;
        Ok(compiler.finish())
    }

    #[test]
    fn fact_compiles_to_unifies_and_proceed() {
        let (code, clauses) = compile(&[fact("age", vec![cst("tom"), cst(30)])]).unwrap();
        assert_eq!(
            code,
            vec![
                OpCode::UnifyRef as u8,
                0,
                0,
                OpCode::UnifyScalar as u8,
                0,
                1,
                OpCode::Proceed as u8,
            ]
        );
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].0, 0);
        assert_eq!(clauses[0].1.functor.as_ref(), "age");
    }

    #[test]
    fn duplicate_head_variables_unify_their_registers() {
        let (code, _) = compile(&[fact("same", vec![ast::var("X"), ast::var("X")])]).unwrap();
        assert_eq!(code, vec![OpCode::UnifyReg as u8, 0, 1, OpCode::Proceed as u8]);
    }

    #[test]
    fn duplicate_head_unifies_follow_the_body() {
        let (code, _) = compile(&[rule(
            "same",
            vec![ast::var("X"), ast::var("X")],
            vec![ast::cut()],
        )])
        .unwrap();
        assert_eq!(
            code,
            vec![
                OpCode::Cut as u8,
                OpCode::UnifyReg as u8,
                0,
                1,
                OpCode::Proceed as u8,
            ]
        );
    }

    #[test]
    fn nested_compound_goal_argument_is_rejected() {
        let err = compile(&[rule(
            "p",
            vec![ast::var("X")],
            vec![goal("q", vec![goal("r", vec![ast::var("X")])])],
        )])
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::NestedCompound {
                functor: "r".to_string()
            }
        );
    }

    #[test]
    fn list_pattern_is_head_only() {
        let err = compile(&[rule(
            "p",
            vec![ast::var("X")],
            vec![ast::list_pattern(vec![ast::var("H")], Some("T"))],
        )])
        .unwrap_err();
        assert_eq!(err, CompileError::ListPatternOutsideHead);
    }

    #[test]
    fn bare_tail_pattern_is_rejected() {
        let err = compile(&[fact("p", vec![ast::list_pattern(vec![], Some("T"))])]).unwrap_err();
        assert_eq!(err, CompileError::TailNotLast);
    }

    #[test]
    fn assignment_target_must_be_a_variable() {
        let err = compile(&[rule(
            "p",
            vec![ast::var("X")],
            vec![ast::is_(cst(1), ast::var("X"))],
        )])
        .unwrap_err();
        assert_eq!(err, CompileError::InvalidAssignment);

        let err = compile(&[rule(
            "p",
            vec![ast::var("X")],
            vec![ast::is_(ast::var("Y"), goal("q", vec![ast::var("X")]))],
        )])
        .unwrap_err();
        assert_eq!(err, CompileError::AssignmentFromGoal);
    }

    #[test]
    fn negation_expands_into_two_helper_clauses() {
        let (_, clauses) = compile(&[rule(
            "lonely",
            vec![ast::var("X")],
            vec![ast::not(goal("friend", vec![ast::var("X"), ast::var("Y")]))],
        )])
        .unwrap();

        // the source clause plus the guard clause and the fact
        assert_eq!(clauses.len(), 3);
        assert_eq!(clauses[0].1.functor.as_ref(), "lonely");
        let helper = clauses[1].1.functor.clone();
        assert!(helper.starts_with("$not_friend_"));
        assert_eq!(clauses[2].1.functor, helper);
        // both helper clauses take the negated goal's free variables
        assert_eq!(clauses[1].1.arity(), 2);
        assert_eq!(clauses[2].1.arity(), 2);
    }

    #[test]
    fn nested_negation_reuses_the_expansion() {
        let (_, clauses) = compile(&[rule(
            "p",
            vec![ast::var("X")],
            vec![ast::not(ast::not(goal("q", vec![ast::var("X")])))],
        )])
        .unwrap();

        // p, outer pair, inner pair
        assert_eq!(clauses.len(), 5);
    }

    #[test]
    fn cut_and_fail_are_plain_opcodes() {
        let (code, _) = compile(&[rule("p", vec![], vec![ast::cut(), ast::fail()])]).unwrap();
        assert_eq!(
            code,
            vec![OpCode::Cut as u8, OpCode::Fail as u8, OpCode::Proceed as u8]
        );
    }

    #[test]
    fn too_many_head_arguments() {
        let args: Vec<Term> = (0..256).map(cst).collect();
        let err = compile(&[fact("wide", args)]).unwrap_err();
        assert!(matches!(err, CompileError::TooManyArguments { arity: 256, .. }));
    }
}

//! The clause and query AST consumed by the compiler, and the builder
//! functions that construct it.
//!
//! Programs are described as [`Rule`]s (a fact is a body-less rule)
//! whose elements are [`Term`]s. The free functions at the bottom of
//! this module are the supported way to build terms; there is no
//! parser and no dynamic member interception, term construction is
//! entirely explicit.

use crate::value::Value;

/// One element of a clause head, goal argument or operator operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// A ground constant.
    Const(Value),
    /// A named logic variable, scoped to its clause or query.
    Var(String),
    /// A callable compound term: body goal or query goal.
    Compound { functor: String, args: Vec<Term> },
    /// A built-in predicate.
    Builtin(Box<Builtin>),
    /// A head-position list destructuring pattern.
    ListPattern(ListPattern),
}

/// Fixed leading elements plus an optional named tail variable. The
/// empty pattern unifies only with an empty list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPattern {
    pub items: Vec<Term>,
    pub tail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// The built-in predicates understood by the compiler.
#[derive(Debug, Clone, PartialEq)]
pub enum Builtin {
    Cut,
    Fail,
    /// Negation as failure over a callable goal.
    Not(Term),
    Cmp(CmpOp, Term, Term),
    Arith(ArithOp, Term, Term),
    /// `Is(var, expr)`: binds the variable to the value of the
    /// right-hand expression.
    Is(Term, Term),
    /// Fails unless the variable's resolved value carries the tag.
    OfType(Term, String),
    /// Reads a named member off a bound host value.
    MemberAccess(Term, String),
    AssertFirst(Rule),
    AssertLast(Rule),
}

/// A fact or rule. Facts have an empty body.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub functor: String,
    pub head: Vec<Term>,
    pub body: Vec<Term>,
}

impl Term {
    pub(crate) fn describe(&self) -> String {
        match self {
            Term::Const(v) => v.to_string(),
            Term::Var(n) => n.clone(),
            Term::Compound { functor, args } => format!("{functor}/{}", args.len()),
            Term::Builtin(b) => format!("{b:?}"),
            Term::ListPattern(_) => "list pattern".to_string(),
        }
    }
}

/// A constant term.
pub fn cst(v: impl Into<Value>) -> Term {
    Term::Const(v.into())
}

/// A named variable.
pub fn var(name: &str) -> Term {
    Term::Var(name.to_string())
}

/// A callable goal.
pub fn goal(functor: &str, args: Vec<Term>) -> Term {
    Term::Compound {
        functor: functor.to_string(),
        args,
    }
}

/// A fact: body-less clause. Arguments may be constants, variables or
/// list patterns.
pub fn fact(functor: &str, args: Vec<Term>) -> Rule {
    Rule {
        functor: functor.to_string(),
        head: args,
        body: Vec::new(),
    }
}

/// A rule with a head and body goals.
pub fn rule(functor: &str, head: Vec<Term>, body: Vec<Term>) -> Rule {
    Rule {
        functor: functor.to_string(),
        head,
        body,
    }
}

/// A list pattern with fixed leading elements and an optional tail
/// variable.
pub fn list_pattern(items: Vec<Term>, tail: Option<&str>) -> Term {
    Term::ListPattern(ListPattern {
        items,
        tail: tail.map(str::to_string),
    })
}

/// The empty-list pattern.
pub fn empty() -> Term {
    Term::ListPattern(ListPattern {
        items: Vec::new(),
        tail: None,
    })
}

pub fn cut() -> Term {
    Term::Builtin(Box::new(Builtin::Cut))
}

pub fn fail() -> Term {
    Term::Builtin(Box::new(Builtin::Fail))
}

/// Negation as failure.
pub fn not(goal: Term) -> Term {
    Term::Builtin(Box::new(Builtin::Not(goal)))
}

macro_rules! cmp_builder {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(pub fn $name(a: Term, b: Term) -> Term {
            Term::Builtin(Box::new(Builtin::Cmp(CmpOp::$op, a, b)))
        })*
    };
}

macro_rules! arith_builder {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(pub fn $name(a: Term, b: Term) -> Term {
            Term::Builtin(Box::new(Builtin::Arith(ArithOp::$op, a, b)))
        })*
    };
}

cmp_builder! { gt => Gt, lt => Lt, ge => Ge, le => Le, eq => Eq, ne => Ne }
arith_builder! { add => Add, sub => Sub, mul => Mul, div => Div, rem => Rem }

/// Assignment: `is_(var("V"), add(var("X"), cst(1)))`.
pub fn is_(lhs: Term, rhs: Term) -> Term {
    Term::Builtin(Box::new(Builtin::Is(lhs, rhs)))
}

/// Type guard over a variable's resolved value.
pub fn of_type(v: Term, tag: &str) -> Term {
    Term::Builtin(Box::new(Builtin::OfType(v, tag.to_string())))
}

/// Member read off a bound host value.
pub fn member(recv: Term, name: &str) -> Term {
    Term::Builtin(Box::new(Builtin::MemberAccess(recv, name.to_string())))
}

/// Prepends a clause to its predicate at run time.
pub fn assert_first(clause: Rule) -> Term {
    Term::Builtin(Box::new(Builtin::AssertFirst(clause)))
}

/// Appends a clause to its predicate at run time.
pub fn assert_last(clause: Rule) -> Term {
    Term::Builtin(Box::new(Builtin::AssertLast(clause)))
}

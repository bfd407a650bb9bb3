//! Register unification.
//!
//! All entry points return `Ok(false)` for an ordinary mismatch, which
//! the dispatcher turns into backtracking; `Err` is reserved for
//! broken engine state. Bindings are made through [`VarCell`] so the
//! frame that made them can undo them, with one exception: writing
//! into a never-initialized register slot of the current frame needs
//! no undo record, because the slot is rewritten before any retry can
//! observe it.

use std::sync::Arc;

use crate::errors::EngineError;
use crate::machine::frame::{FrameRef, RegisterValue, VarCell};
use crate::value::Value;

/// Unifies a register with a ground value.
pub(crate) fn unify_const(frame: &FrameRef, reg: u8, value: &Value) -> Result<bool, EngineError> {
    let slot = frame.borrow().regs.get(reg);
    match slot {
        RegisterValue::Const(v) => Ok(v == *value),
        RegisterValue::Var(cell) => match cell.value() {
            Some(v) => Ok(v == *value),
            None => {
                let id = frame.borrow().id;
                cell.bind(value.clone(), id)?;
                Ok(true)
            }
        },
        RegisterValue::Unbound => {
            frame
                .borrow_mut()
                .regs
                .set(reg, RegisterValue::Const(value.clone()));
            Ok(true)
        }
    }
}

/// Unifies two registers of the same frame: ground values must be
/// equal, an unbound variable takes the other side's value, two
/// unbound variables become aliases.
pub(crate) fn unify_reg(frame: &FrameRef, a: u8, b: u8) -> Result<bool, EngineError> {
    let (slot_a, slot_b, id) = {
        let f = frame.borrow();
        (f.regs.get(a), f.regs.get(b), f.id)
    };
    match (slot_a, slot_b) {
        (RegisterValue::Unbound, RegisterValue::Unbound) => {
            let cell = VarCell::new(Arc::from("_"));
            let mut f = frame.borrow_mut();
            f.regs.set(a, RegisterValue::Var(cell.clone()));
            f.regs.set(b, RegisterValue::Var(cell));
            Ok(true)
        }
        (RegisterValue::Unbound, taken) => {
            frame.borrow_mut().regs.set(a, taken);
            Ok(true)
        }
        (taken, RegisterValue::Unbound) => {
            frame.borrow_mut().regs.set(b, taken);
            Ok(true)
        }
        (RegisterValue::Var(x), RegisterValue::Var(y)) => match (x.value(), y.value()) {
            (Some(u), Some(v)) => Ok(u == v),
            (Some(u), None) => {
                y.bind(u, id)?;
                Ok(true)
            }
            (None, Some(v)) => {
                x.bind(v, id)?;
                Ok(true)
            }
            (None, None) => {
                x.link(&y, id);
                Ok(true)
            }
        },
        (RegisterValue::Var(x), RegisterValue::Const(v))
        | (RegisterValue::Const(v), RegisterValue::Var(x)) => match x.value() {
            Some(u) => Ok(u == v),
            None => {
                x.bind(v, id)?;
                Ok(true)
            }
        },
        (RegisterValue::Const(u), RegisterValue::Const(v)) => Ok(u == v),
    }
}

fn as_list(frame: &FrameRef, reg: u8) -> Option<Arc<Vec<Value>>> {
    match frame.borrow().regs.get(reg).resolve() {
        Some(Value::List(items)) => Some(items),
        _ => None,
    }
}

/// Unifies `head` with the first element of the list in `list`. Fails
/// when the register does not hold a non-empty list.
pub(crate) fn unify_head(frame: &FrameRef, list: u8, head: u8) -> Result<bool, EngineError> {
    match as_list(frame, list) {
        Some(items) if !items.is_empty() => unify_const(frame, head, &items[0]),
        _ => Ok(false),
    }
}

/// Unifies `val` with element `n` of the list in `list`.
pub(crate) fn unify_nth(frame: &FrameRef, list: u8, val: u8, n: u8) -> Result<bool, EngineError> {
    match as_list(frame, list) {
        Some(items) if (n as usize) < items.len() => unify_const(frame, val, &items[n as usize]),
        _ => Ok(false),
    }
}

/// Unifies `tail` with everything after the first element of the list
/// in `list`. Tails further in are taken by chaining through a
/// temporary register.
pub(crate) fn unify_tail(frame: &FrameRef, list: u8, tail: u8) -> Result<bool, EngineError> {
    match as_list(frame, list) {
        Some(items) if !items.is_empty() => {
            let rest = Value::List(Arc::new(items[1..].to_vec()));
            unify_const(frame, tail, &rest)
        }
        _ => Ok(false),
    }
}

/// Succeeds when the register holds a list of exactly `len` elements.
pub(crate) fn unify_len(frame: &FrameRef, len: u32, list: u8) -> Result<bool, EngineError> {
    Ok(as_list(frame, list).is_some_and(|items| items.len() == len as usize))
}

/// Succeeds when the register holds the empty list.
pub(crate) fn unify_empty(frame: &FrameRef, list: u8) -> Result<bool, EngineError> {
    Ok(as_list(frame, list).is_some_and(|items| items.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::frame::StackFrame;

    fn frame() -> FrameRef {
        StackFrame::new(1, None, None)
    }

    fn set_var(f: &FrameRef, reg: u8, name: &str) -> VarCell {
        let cell = VarCell::new(Arc::from(name));
        f.borrow_mut().regs.set(reg, RegisterValue::Var(cell.clone()));
        cell
    }

    fn set_const(f: &FrameRef, reg: u8, v: impl Into<Value>) {
        f.borrow_mut().regs.set(reg, RegisterValue::Const(v.into()));
    }

    #[test]
    fn const_against_bound_and_unbound() {
        let f = frame();
        set_const(&f, 0, 5);
        assert!(unify_const(&f, 0, &Value::from(5)).unwrap());
        assert!(!unify_const(&f, 0, &Value::from(6)).unwrap());

        let x = set_var(&f, 1, "X");
        assert!(unify_const(&f, 1, &Value::from("a")).unwrap());
        assert_eq!(x.value(), Some(Value::from("a")));
        assert!(!unify_const(&f, 1, &Value::from("b")).unwrap());
    }

    #[test]
    fn reg_unify_is_symmetric() {
        let f = frame();
        set_const(&f, 0, 5);
        let _x = set_var(&f, 1, "X");
        assert!(unify_reg(&f, 0, 1).unwrap());
        assert!(unify_reg(&f, 1, 0).unwrap());
        assert_eq!(f.borrow().regs.get(1).resolve(), Some(Value::from(5)));
    }

    #[test]
    fn two_unbound_vars_become_aliases() {
        let f = frame();
        let x = set_var(&f, 0, "X");
        let y = set_var(&f, 1, "Y");
        assert!(unify_reg(&f, 0, 1).unwrap());

        assert!(unify_const(&f, 0, &Value::from(3)).unwrap());
        assert_eq!(x.value(), Some(Value::from(3)));
        assert_eq!(y.value(), Some(Value::from(3)));
    }

    #[test]
    fn list_decomposition() {
        let f = frame();
        set_const(&f, 0, vec![Value::from(1), Value::from(2), Value::from(3)]);
        let h = set_var(&f, 1, "H");
        let n = set_var(&f, 2, "N");
        let t = set_var(&f, 3, "T");

        assert!(unify_head(&f, 0, 1).unwrap());
        assert_eq!(h.value(), Some(Value::from(1)));
        assert!(unify_nth(&f, 0, 2, 1).unwrap());
        assert_eq!(n.value(), Some(Value::from(2)));
        assert!(unify_tail(&f, 0, 3).unwrap());
        assert_eq!(
            t.value(),
            Some(Value::from(vec![Value::from(2), Value::from(3)]))
        );
        assert!(unify_len(&f, 3, 0).unwrap());
        assert!(!unify_len(&f, 2, 0).unwrap());
    }

    #[test]
    fn structural_ops_fail_on_non_lists() {
        let f = frame();
        set_const(&f, 0, "abc");
        let _ = set_var(&f, 1, "H");
        assert!(!unify_head(&f, 0, 1).unwrap());
        assert!(!unify_tail(&f, 0, 1).unwrap());
        assert!(!unify_empty(&f, 0).unwrap());

        set_const(&f, 2, Vec::<Value>::new());
        assert!(unify_empty(&f, 2).unwrap());
        assert!(!unify_head(&f, 2, 1).unwrap());
    }
}

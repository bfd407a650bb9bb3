//! Environment frames and logic-variable cells.
//!
//! A query runs over a singly linked chain of frames, one per active
//! goal. Frames are reference counted because a variable cell can
//! outlive the frame that created it (a caller's register may hold a
//! cell that a callee bound) and because choice points resume frames
//! out of stack order.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::errors::EngineError;
use crate::indexing::IndexEntry;
use crate::instructions::InstrPtr;
use crate::value::Value;

pub(crate) type FrameId = u64;

/// A shareable logic variable. Cells are aliased across frames by
/// parameter passing, so binding state lives behind a `RefCell` and
/// every mutation records which frame performed it for undo.
#[derive(Debug, Clone)]
pub(crate) struct VarCell(Rc<RefCell<VarInner>>);

#[derive(Debug)]
struct VarInner {
    name: Arc<str>,
    value: Option<Value>,
    /// The frame whose execution bound this cell; `None` while
    /// unbound.
    owner: Option<FrameId>,
    /// Unbound-to-unbound aliases, tagged with the frame that created
    /// each link. Weak so a dead peer simply drops out.
    peers: Vec<(Weak<RefCell<VarInner>>, FrameId)>,
}

impl VarCell {
    pub fn new(name: Arc<str>) -> Self {
        VarCell(Rc::new(RefCell::new(VarInner {
            name,
            value: None,
            owner: None,
            peers: Vec::new(),
        })))
    }

    pub fn name(&self) -> Arc<str> {
        self.0.borrow().name.clone()
    }

    pub fn value(&self) -> Option<Value> {
        self.0.borrow().value.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.0.borrow().value.is_some()
    }

    pub fn ptr_eq(&self, other: &VarCell) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Aliases two unbound cells. Each side records the link and the
    /// frame that created it; the link dissolves when that frame is
    /// undone.
    pub fn link(&self, other: &VarCell, frame: FrameId) {
        if self.ptr_eq(other) {
            return;
        }
        self.0
            .borrow_mut()
            .peers
            .push((Rc::downgrade(&other.0), frame));
        other
            .0
            .borrow_mut()
            .peers
            .push((Rc::downgrade(&self.0), frame));
    }

    /// Binds the cell and propagates the value across alias links to
    /// every transitively reachable unbound peer. All cells bound by
    /// one call share the binding frame, so one undo releases them
    /// together.
    pub fn bind(&self, value: Value, frame: FrameId) -> Result<(), EngineError> {
        {
            let mut inner = self.0.borrow_mut();
            if inner.value.is_some() {
                return Err(EngineError::DoubleBind(inner.name.to_string()));
            }
            inner.value = Some(value.clone());
            inner.owner = Some(frame);
        }
        self.propagate_bind(&value, frame);
        Ok(())
    }

    fn propagate_bind(&self, value: &Value, frame: FrameId) {
        let peers: Vec<Rc<RefCell<VarInner>>> = self
            .0
            .borrow()
            .peers
            .iter()
            .filter_map(|(w, _)| w.upgrade())
            .collect();
        for peer in peers {
            let newly_bound = {
                let mut inner = peer.borrow_mut();
                if inner.value.is_none() {
                    inner.value = Some(value.clone());
                    inner.owner = Some(frame);
                    true
                } else {
                    false
                }
            };
            if newly_bound {
                VarCell(peer).propagate_bind(value, frame);
            }
        }
    }

    /// Releases the binding if and only if `frame` made it, then
    /// releases peers the same binding reached. Bindings made by other
    /// frames are left alone.
    pub fn unbind(&self, frame: FrameId) {
        let released = {
            let mut inner = self.0.borrow_mut();
            if inner.owner == Some(frame) {
                inner.value = None;
                inner.owner = None;
                true
            } else {
                false
            }
        };
        if !released {
            return;
        }
        let peers: Vec<Rc<RefCell<VarInner>>> = self
            .0
            .borrow()
            .peers
            .iter()
            .filter_map(|(w, _)| w.upgrade())
            .collect();
        for peer in peers {
            VarCell(peer).unbind(frame);
        }
    }

    /// Removes alias links created by `frame`, on this cell and the
    /// reciprocal entries on the peers they pointed at.
    pub fn dissolve_links(&self, frame: FrameId) {
        let dropped: Vec<Rc<RefCell<VarInner>>> = {
            let mut inner = self.0.borrow_mut();
            let mut gone = Vec::new();
            inner.peers.retain(|(w, f)| {
                if *f == frame {
                    if let Some(p) = w.upgrade() {
                        gone.push(p);
                    }
                    false
                } else {
                    true
                }
            });
            gone
        };
        for peer in dropped {
            if Rc::ptr_eq(&peer, &self.0) {
                continue;
            }
            peer.borrow_mut()
                .peers
                .retain(|(w, f)| !(*f == frame && w.as_ptr() == Rc::as_ptr(&self.0)));
        }
    }
}

/// One register slot. `Unbound` means the slot has never been
/// written; it unifies with anything by taking that thing's value or
/// cell.
#[derive(Debug, Clone, Default)]
pub(crate) enum RegisterValue {
    #[default]
    Unbound,
    Const(Value),
    Var(VarCell),
}

impl RegisterValue {
    /// The ground value currently visible in the slot, if any.
    pub fn resolve(&self) -> Option<Value> {
        match self {
            RegisterValue::Unbound => None,
            RegisterValue::Const(v) => Some(v.clone()),
            RegisterValue::Var(cell) => cell.value(),
        }
    }
}

/// A clause-scope register file, grown on first write.
#[derive(Debug, Default)]
pub(crate) struct Registers {
    slots: Vec<RegisterValue>,
}

impl Registers {
    pub fn get(&self, reg: u8) -> RegisterValue {
        self.slots
            .get(reg as usize)
            .cloned()
            .unwrap_or(RegisterValue::Unbound)
    }

    pub fn set(&mut self, reg: u8, value: RegisterValue) {
        let at = reg as usize;
        if at >= self.slots.len() {
            self.slots.resize(at + 1, RegisterValue::Unbound);
        }
        self.slots[at] = value;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Drops every slot past `len`. Used when a frame retries with
    /// another clause: argument registers survive, clause-local
    /// registers do not.
    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    fn vars(&self) -> impl Iterator<Item = &VarCell> {
        self.slots.iter().filter_map(|slot| match slot {
            RegisterValue::Var(cell) => Some(cell),
            _ => None,
        })
    }
}

pub(crate) type FrameRef = Rc<RefCell<StackFrame>>;

/// One activation: the registers of a running clause, the return
/// address into the caller, and the clauses still untried for the call
/// that created it.
#[derive(Debug)]
pub(crate) struct StackFrame {
    pub id: FrameId,
    pub prev: Option<FrameRef>,
    pub regs: Registers,
    /// Return address; `None` for the root frame.
    pub cp: Option<InstrPtr>,
    /// Remaining candidate clauses, front first. `None` once the call
    /// is committed (last candidate taken, or cut).
    pub choices: Option<VecDeque<IndexEntry>>,
    /// Argument count of the call that created this frame.
    pub arity: usize,
}

impl StackFrame {
    pub fn new(id: FrameId, prev: Option<FrameRef>, cp: Option<InstrPtr>) -> FrameRef {
        Rc::new(RefCell::new(StackFrame {
            id,
            prev,
            regs: Registers::default(),
            cp,
            choices: None,
            arity: 0,
        }))
    }

    /// Undoes everything this frame's execution did to variable
    /// state: bindings it made (on its own cells and on caller cells
    /// it reached) and alias links it created.
    pub fn undo_bindings(&self) {
        for cell in self.regs.vars() {
            cell.unbind(self.id);
            cell.dissolve_links(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(name: &str) -> VarCell {
        VarCell::new(Arc::from(name))
    }

    #[test]
    fn bind_and_unbind_round_trip() {
        let x = cell("X");
        x.bind(Value::from(5), 1).unwrap();
        assert_eq!(x.value(), Some(Value::from(5)));
        assert!(x.bind(Value::from(6), 1).is_err());

        // a frame that did not make the binding cannot release it
        x.unbind(2);
        assert!(x.is_bound());
        x.unbind(1);
        assert!(!x.is_bound());
    }

    #[test]
    fn binding_propagates_across_links() {
        let x = cell("X");
        let y = cell("Y");
        let z = cell("Z");
        x.link(&y, 1);
        y.link(&z, 1);

        x.bind(Value::from("a"), 2).unwrap();
        assert_eq!(y.value(), Some(Value::from("a")));
        assert_eq!(z.value(), Some(Value::from("a")));

        // one undo releases the whole propagated binding
        y.unbind(2);
        assert!(!x.is_bound());
        assert!(!z.is_bound());
    }

    #[test]
    fn links_outlive_the_binding_frame() {
        // alias created in frame 1, binding made in frame 2: undoing
        // frame 2 must keep the alias alive for the next candidate
        let x = cell("X");
        let y = cell("Y");
        x.link(&y, 1);

        x.bind(Value::from(5), 2).unwrap();
        x.unbind(2);
        assert!(!y.is_bound());

        x.bind(Value::from(7), 3).unwrap();
        assert_eq!(y.value(), Some(Value::from(7)));
    }

    #[test]
    fn dissolving_removes_both_directions() {
        let x = cell("X");
        let y = cell("Y");
        x.link(&y, 1);
        x.dissolve_links(1);

        x.bind(Value::from(5), 2).unwrap();
        assert!(!y.is_bound());
        // the reciprocal link is gone too
        x.unbind(2);
        y.bind(Value::from(6), 2).unwrap();
        assert!(!x.is_bound());
    }

    #[test]
    fn frame_undo_releases_only_its_own_work() {
        let caller = StackFrame::new(1, None, None);
        let callee = StackFrame::new(2, Some(caller.clone()), None);

        let x = cell("X");
        caller.borrow_mut().regs.set(0, RegisterValue::Var(x.clone()));
        // parameter passing shares the cell with the callee
        callee.borrow_mut().regs.set(0, RegisterValue::Var(x.clone()));

        x.bind(Value::from(9), 2).unwrap();
        callee.borrow().undo_bindings();
        assert!(!x.is_bound());

        x.bind(Value::from(9), 1).unwrap();
        callee.borrow().undo_bindings();
        assert!(x.is_bound());
    }
}

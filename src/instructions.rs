//! Bytecode layout: one opcode byte followed by 0-6 operand bytes,
//! fixed per opcode. Multi-byte operands are little-endian. Constant
//! references use a 1-byte pool index where it fits in 254, otherwise
//! the wide form of the opcode with a 4-byte index.

use std::sync::Arc;

use crate::constants::{RefPool, ScalarPool};
use crate::errors::EngineError;

/// Pool indices above this use the wide opcode forms.
pub(crate) const SHORT_INDEX_MAX: u32 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum OpCode {
    // unify a constant with a register
    UnifyScalar = 0,
    UnifyRef = 1,
    UnifyScalarWide = 2,
    UnifyRefWide = 3,
    UnifyTrue = 4,
    UnifyFalse = 5,
    UnifyNull = 6,
    // register-to-register unify (duplicate head variables, `is`)
    UnifyReg = 7,
    // structural list unify
    UnifyEmpty = 8,
    UnifyHead = 9,
    UnifyNth = 10,
    UnifyTail = 11,
    UnifyLen = 12,
    // parameter passing and frame control
    PutArg = 13,
    PushFrame = 14,
    CallGoal = 15,
    Proceed = 16,
    Fail = 17,
    // comparisons: operand, operand, boolean destination
    Gt = 18,
    Lt = 19,
    Ge = 20,
    Le = 21,
    Eq = 22,
    Ne = 23,
    // arithmetic: operand, operand, destination
    Add = 24,
    Sub = 25,
    Mul = 26,
    Div = 27,
    Rem = 28,
    Cut = 29,
    NewVar = 30,
    TypeGuard = 31,
    GetMember = 32,
    AssertFirst = 33,
    AssertLast = 34,
}

impl OpCode {
    /// Operand size in bytes; the full instruction is one byte longer.
    pub fn arg_len(self) -> usize {
        use OpCode::*;
        match self {
            PushFrame | Proceed | Fail | Cut => 0,
            UnifyTrue | UnifyFalse | UnifyNull | UnifyEmpty => 1,
            UnifyScalar | UnifyRef | UnifyReg | UnifyHead | UnifyTail | PutArg => 2,
            UnifyNth | Gt | Lt | Ge | Le | Eq | Ne | Add | Sub | Mul | Div | Rem => 3,
            CallGoal | AssertFirst | AssertLast => 4,
            UnifyScalarWide | UnifyRefWide | UnifyLen | NewVar | TypeGuard => 5,
            GetMember => 6,
        }
    }

    pub fn from_u8(b: u8) -> Result<OpCode, EngineError> {
        use OpCode::*;
        Ok(match b {
            0 => UnifyScalar,
            1 => UnifyRef,
            2 => UnifyScalarWide,
            3 => UnifyRefWide,
            4 => UnifyTrue,
            5 => UnifyFalse,
            6 => UnifyNull,
            7 => UnifyReg,
            8 => UnifyEmpty,
            9 => UnifyHead,
            10 => UnifyNth,
            11 => UnifyTail,
            12 => UnifyLen,
            13 => PutArg,
            14 => PushFrame,
            15 => CallGoal,
            16 => Proceed,
            17 => Fail,
            18 => Gt,
            19 => Lt,
            20 => Ge,
            21 => Le,
            22 => Eq,
            23 => Ne,
            24 => Add,
            25 => Sub,
            26 => Mul,
            27 => Div,
            28 => Rem,
            29 => Cut,
            30 => NewVar,
            31 => TypeGuard,
            32 => GetMember,
            33 => AssertFirst,
            34 => AssertLast,
            _ => return Err(EngineError::BadOpcode(b)),
        })
    }
}

/// Append-only instruction buffer used during compilation.
#[derive(Debug, Default)]
pub(crate) struct CodeWriter {
    buf: Vec<u8>,
}

impl CodeWriter {
    pub fn new() -> Self {
        CodeWriter::default()
    }

    pub fn here(&self) -> usize {
        self.buf.len()
    }

    pub fn op(&mut self, op: OpCode, args: &[u8]) {
        debug_assert_eq!(args.len(), op.arg_len());
        self.buf.push(op as u8);
        self.buf.extend_from_slice(args);
    }

    pub fn op_u32(&mut self, op: OpCode, v: u32) {
        self.buf.push(op as u8);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn op_u32_u8(&mut self, op: OpCode, v: u32, b: u8) {
        self.buf.push(op as u8);
        self.buf.extend_from_slice(&v.to_le_bytes());
        self.buf.push(b);
    }

    pub fn op_u32_u8_u8(&mut self, op: OpCode, v: u32, b1: u8, b2: u8) {
        self.buf.push(op as u8);
        self.buf.extend_from_slice(&v.to_le_bytes());
        self.buf.push(b1);
        self.buf.push(b2);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// One compiled code buffer together with the constant pools its
/// instructions reference. The knowledge base, each query and each
/// asserted clause own one segment apiece; segments are immutable once
/// built.
#[derive(Debug)]
pub(crate) struct CodeSegment {
    pub code: Vec<u8>,
    pub scalars: Arc<ScalarPool>,
    pub refs: Arc<RefPool>,
}

/// An instruction address: segment plus byte offset.
#[derive(Debug, Clone)]
pub(crate) struct InstrPtr {
    pub seg: Arc<CodeSegment>,
    pub p: usize,
}

impl InstrPtr {
    pub fn new(seg: Arc<CodeSegment>, p: usize) -> Self {
        InstrPtr { seg, p }
    }

    /// Decodes the opcode at the pointer.
    pub fn opcode(&self) -> Result<OpCode, EngineError> {
        let b = *self
            .seg
            .code
            .get(self.p)
            .ok_or(EngineError::CodeOverrun(self.p))?;
        OpCode::from_u8(b)
    }

    /// Operand byte `i` of the current instruction.
    pub fn arg(&self, i: usize) -> Result<u8, EngineError> {
        self.seg
            .code
            .get(self.p + 1 + i)
            .copied()
            .ok_or(EngineError::CodeOverrun(self.p))
    }

    /// Little-endian u32 operand starting at operand byte `i`.
    pub fn arg_u32(&self, i: usize) -> Result<u32, EngineError> {
        let at = self.p + 1 + i;
        let bytes = self
            .seg
            .code
            .get(at..at + 4)
            .ok_or(EngineError::CodeOverrun(self.p))?;
        let mut le = [0u8; 4];
        le.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(le))
    }

    /// The address of the next instruction.
    pub fn advance(&self, op: OpCode) -> InstrPtr {
        InstrPtr {
            seg: self.seg.clone(),
            p: self.p + 1 + op.arg_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trip() {
        for b in 0..=34u8 {
            let op = OpCode::from_u8(b).unwrap();
            assert_eq!(op as u8, b);
        }
        assert!(OpCode::from_u8(35).is_err());
    }

    #[test]
    fn writer_layout() {
        let mut w = CodeWriter::new();
        w.op(OpCode::PushFrame, &[]);
        w.op(OpCode::UnifyScalar, &[3, 0]);
        w.op_u32(OpCode::CallGoal, 0x0102_0304);
        let code = w.finish();
        assert_eq!(code[0], OpCode::PushFrame as u8);
        assert_eq!(&code[1..4], &[OpCode::UnifyScalar as u8, 3, 0]);
        assert_eq!(code[4], OpCode::CallGoal as u8);
        assert_eq!(&code[5..9], &[0x04, 0x03, 0x02, 0x01]);
    }
}

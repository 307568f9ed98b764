// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Compiles a decoded function body's [`Expression`] into an executable
//! [`CompiledCode`]: the same transcoded bytecode, plus every structured
//! control instruction's resolved branch target, computed once up front so
//! the dispatch loop never has to scan forward at execution time to find a
//! matching `end`, `else`, or legacy `catch` clause.

use hashbrown::HashMap;

use crate::core_compat::vec::Vec;
use crate::expr_cursor::ExprCursor;
use crate::types::{
    AtomicMemArg, AtomicOpcode, BlockType, BulkOpcode, BulkOperandType, CallIndirectOperands,
    Expression, GcOpcode, HeapType, LabelIdx, MemArg, Opcode, OperandType, StructFieldOperands,
    ValType, VectorOpcode, BULK_OPCODE_TO_OPERAND_TYPE, OPCODE_TO_OPERAND_TYPE,
};
use crate::Allocator;

/// A legacy `catch`/`catch_all` clause attached to a `try` block, resolved
/// to the byte position right after its tag immediate (or right after the
/// opcode itself, for `catch_all`).
#[derive(Clone, Copy)]
pub(crate) struct LegacyCatchHandler {
    /// `None` for `catch_all`.
    pub(crate) tag: Option<u32>,
    pub(crate) target: u32,
}

/// Everything the interpreter needs to act on a structured control
/// instruction without re-scanning its body.
pub(crate) struct JumpTarget<A: Allocator> {
    /// Position right after the construct's matching `end` (or, for a
    /// `delegate`d legacy `try`, right after the `delegate` instruction).
    /// This is both the block's fallthrough target and (for `block`/`if`/
    /// `try`/`try_table`) its `br` target; a `loop`'s `br` target is its own
    /// start position instead, which needs no precomputation.
    pub(crate) end: u32,
    /// Position of the first instruction inside an `if`'s `else` arm, when
    /// one is present.
    pub(crate) else_: Option<u32>,
    /// A legacy `try`'s handlers, in source order. Empty for every other
    /// construct, and for a `try` that closes via `delegate` rather than
    /// explicit `catch`/`catch_all` clauses.
    pub(crate) catches: Vec<LegacyCatchHandler, A>,
}

/// A function body's transcoded bytecode paired with its precomputed branch
/// targets.
pub struct CompiledCode<A: Allocator> {
    code: Expression<A>,
    jumps: HashMap<u32, JumpTarget<A>>,
    alloc: A,
}

impl<A: Allocator + Clone> Clone for CompiledCode<A> {
    fn clone(&self) -> Self {
        let mut jumps = HashMap::with_capacity(self.jumps.len());
        for (&pos, target) in self.jumps.iter() {
            let mut catches = Vec::with_capacity_in(target.catches.len(), self.alloc.clone());
            catches.extend(target.catches.iter().copied());
            jumps.insert(pos, JumpTarget { end: target.end, else_: target.else_, catches });
        }
        Self { code: self.code.clone(), jumps, alloc: self.alloc.clone() }
    }
}

impl<A: Allocator + Clone> CompiledCode<A> {
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.code
    }

    pub(crate) fn len(&self) -> usize {
        self.code.len()
    }

    /// Looks up the [`JumpTarget`] recorded for the structured control
    /// instruction starting at `pos`. Panics if `pos` wasn't a control
    /// opcode this function's compile pass recorded, which would indicate a
    /// label/cursor desynchronization bug in the interpreter.
    pub(crate) fn jump(&self, pos: u32) -> &JumpTarget<A> {
        self.jumps.get(&pos).expect("position is a compiled control instruction")
    }
}

enum OpenKind {
    Block,
    Loop,
    If,
    Try,
    TryTable,
}

struct OpenScope<A: Allocator> {
    start: u32,
    kind: OpenKind,
    else_pos: Option<u32>,
    catches: Vec<LegacyCatchHandler, A>,
}

/// Compiles a single function body. `code` is the already-decoded,
/// already-validated expression (the function's flat instruction sequence,
/// terminated by its own closing `end`); `alloc` backs every allocation the
/// compiled form itself needs.
pub(crate) fn compile_function<A: Allocator + Clone>(code: Expression<A>, alloc: A) -> CompiledCode<A> {
    let mut jumps: HashMap<u32, JumpTarget<A>> = HashMap::new();
    let mut open: Vec<OpenScope<A>, A> = Vec::new_in(alloc.clone());
    let mut cursor = ExprCursor::new(&code[..]);

    loop {
        let start = cursor.pos() as u32;
        match cursor.opcode() {
            Opcode::Block => {
                let _: BlockType = cursor.read();
                open.push(OpenScope { start, kind: OpenKind::Block, else_pos: None, catches: Vec::new_in(alloc.clone()) });
            }
            Opcode::Loop => {
                let _: BlockType = cursor.read();
                open.push(OpenScope { start, kind: OpenKind::Loop, else_pos: None, catches: Vec::new_in(alloc.clone()) });
            }
            Opcode::If => {
                let _: BlockType = cursor.read();
                open.push(OpenScope { start, kind: OpenKind::If, else_pos: None, catches: Vec::new_in(alloc.clone()) });
            }
            Opcode::Try => {
                let _: BlockType = cursor.read();
                open.push(OpenScope { start, kind: OpenKind::Try, else_pos: None, catches: Vec::new_in(alloc.clone()) });
            }
            Opcode::TryTable => {
                let _: BlockType = cursor.read();
                // The catch clauses live inline in the instruction's own
                // operand (read back again at execution time via
                // `ExprCursor`); the compile pass only needs to skip past
                // them here.
                let _ = cursor.read_vec::<crate::types::CatchClause>();
                open.push(OpenScope { start, kind: OpenKind::TryTable, else_pos: None, catches: Vec::new_in(alloc.clone()) });
            }
            Opcode::Else => {
                let pos = cursor.pos() as u32;
                if let Some(top) = open.last_mut() {
                    top.else_pos = Some(pos);
                }
            }
            Opcode::Catch => {
                let tag: u32 = cursor.read();
                let pos = cursor.pos() as u32;
                if let Some(top) = open.last_mut() {
                    top.catches.push(LegacyCatchHandler { tag: Some(tag), target: pos });
                }
            }
            Opcode::CatchAll => {
                let pos = cursor.pos() as u32;
                if let Some(top) = open.last_mut() {
                    top.catches.push(LegacyCatchHandler { tag: None, target: pos });
                }
            }
            Opcode::Delegate => {
                let _label: LabelIdx = cursor.read();
                let scope = open.pop().expect("delegate closes an open try");
                let end = cursor.pos() as u32;
                jumps.insert(scope.start, JumpTarget { end, else_: None, catches: scope.catches });
            }
            Opcode::End => match open.pop() {
                None => {
                    // The function body's own closing `end`.
                    break;
                }
                Some(scope) => {
                    let end = cursor.pos() as u32;
                    jumps.insert(scope.start, JumpTarget { end, else_: scope.else_pos, catches: scope.catches });
                }
            },
            other => skip_base_operand(&mut cursor, OPCODE_TO_OPERAND_TYPE[other as usize]),
        }
    }

    CompiledCode { code, jumps, alloc }
}

pub(crate) fn skip_base_operand(cursor: &mut ExprCursor, operand: OperandType) {
    match operand {
        OperandType::None => {}
        OperandType::I32 => {
            let _: i32 = cursor.read();
        }
        OperandType::I64 => {
            let _: i64 = cursor.read();
        }
        OperandType::F32 => {
            let _: f32 = cursor.read();
        }
        OperandType::F64 => {
            let _: f64 = cursor.read();
        }
        OperandType::U32 => {
            let _: u32 = cursor.read();
        }
        OperandType::MemArg => {
            let _: MemArg = cursor.read();
        }
        OperandType::RefType => {
            let _: crate::types::RefType = cursor.read();
        }
        OperandType::CallIndirect => {
            let _: CallIndirectOperands = cursor.read();
        }
        OperandType::SelectT => {
            let _ = cursor.read_vec::<ValType>();
        }
        OperandType::BrTable => {
            let _ = cursor.read_vec::<LabelIdx>();
            let _: LabelIdx = cursor.read();
        }
        OperandType::BulkOp => skip_bulk_op(cursor),
        OperandType::VectorOp => skip_vector_op(cursor),
        OperandType::AtomicOp => skip_atomic_op(cursor),
        OperandType::GcOp => skip_gc_op(cursor),
        OperandType::BlockType | OperandType::TryTable => {
            unreachable!("block-structured opcodes are handled by the scope-tracking match arms")
        }
    }
}

fn skip_bulk_op(cursor: &mut ExprCursor) {
    let sub: BulkOpcode = cursor.read();
    match BULK_OPCODE_TO_OPERAND_TYPE[sub as u32 as usize] {
        BulkOperandType::None => {}
        BulkOperandType::U32 => {
            let _: u32 = cursor.read();
        }
        BulkOperandType::TableCopyOperands => {
            let _: crate::types::TableCopyOperands = cursor.read();
        }
        BulkOperandType::TableInitOperands => {
            let _: crate::types::TableInitOperands = cursor.read();
        }
    }
}

fn skip_atomic_op(cursor: &mut ExprCursor) {
    let sub: AtomicOpcode = cursor.read();
    if !matches!(sub, AtomicOpcode::Fence) {
        let _: AtomicMemArg = cursor.read();
    }
}

fn skip_gc_op(cursor: &mut ExprCursor) {
    let sub: GcOpcode = cursor.read();
    match sub {
        GcOpcode::StructNew
        | GcOpcode::StructNewDefault
        | GcOpcode::ArrayNew
        | GcOpcode::ArrayNewDefault
        | GcOpcode::ArrayGet
        | GcOpcode::ArrayGetS
        | GcOpcode::ArrayGetU
        | GcOpcode::ArraySet
        | GcOpcode::ArrayFill => {
            let _: u32 = cursor.read();
        }
        GcOpcode::StructGet | GcOpcode::StructGetS | GcOpcode::StructGetU | GcOpcode::StructSet => {
            let _: StructFieldOperands = cursor.read();
        }
        GcOpcode::ArrayNewFixed
        | GcOpcode::ArrayNewData
        | GcOpcode::ArrayNewElem
        | GcOpcode::ArrayCopy
        | GcOpcode::ArrayInitData
        | GcOpcode::ArrayInitElem => {
            let _: u32 = cursor.read();
            let _: u32 = cursor.read();
        }
        GcOpcode::RefTest | GcOpcode::RefTestNull | GcOpcode::RefCast | GcOpcode::RefCastNull => {
            let _: HeapType = cursor.read();
        }
        GcOpcode::BrOnCast | GcOpcode::BrOnCastFail => {
            let _: u8 = cursor.read();
            let _: u32 = cursor.read();
            let _: HeapType = cursor.read();
            let _: HeapType = cursor.read();
        }
        GcOpcode::ArrayLen
        | GcOpcode::AnyConvertExtern
        | GcOpcode::ExternConvertAny
        | GcOpcode::RefI31
        | GcOpcode::I31GetS
        | GcOpcode::I31GetU => {}
    }
}

fn skip_vector_op(cursor: &mut ExprCursor) {
    let sub: VectorOpcode = cursor.read();
    use VectorOpcode::*;
    match sub {
        V128Load | V128Load8x8S | V128Load8x8U | V128Load16x4S | V128Load16x4U | V128Load32x2S
        | V128Load32x2U | V128Load8Splat | V128Load16Splat | V128Load32Splat | V128Load64Splat
        | V128Store | V128Load32Zero | V128Load64Zero => {
            let _: MemArg = cursor.read();
        }
        V128Load8Lane | V128Load16Lane | V128Load32Lane | V128Load64Lane | V128Store8Lane
        | V128Store16Lane | V128Store32Lane | V128Store64Lane => {
            let _: MemArg = cursor.read();
            let _: u8 = cursor.read();
        }
        V128Const | I8x16Shuffle => {
            let _ = cursor.read_raw_bytes(16);
        }
        I8x16ExtractLaneS
        | I8x16ExtractLaneU
        | I8x16ReplaceLane
        | I16x8ExtractLaneS
        | I16x8ExtractLaneU
        | I16x8ReplaceLane
        | I32x4ExtractLane
        | I32x4ReplaceLane
        | I64x2ExtractLane
        | I64x2ReplaceLane
        | F32x4ExtractLane
        | F32x4ReplaceLane
        | F64x2ExtractLane
        | F64x2ReplaceLane => {
            let _: u8 = cursor.read();
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::compile_function;
    use crate::core_compat::alloc::Global;
    use crate::decode::expr::ExpressionBuilder;
    use crate::types::{BlockType, Expression, Opcode};

    fn build(ops: impl FnOnce(&mut ExpressionBuilder<Global>)) -> Expression<Global> {
        let mut builder = ExpressionBuilder::new(Global);
        ops(&mut builder);
        builder.finalize()
    }

    #[test]
    fn compiles_flat_function() {
        let expr = build(|b| {
            b.write(Opcode::I32Const).unwrap();
            b.write(1i32).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let compiled = compile_function(expr, Global);
        assert_eq!(compiled.len(), compiled.bytes().len());
    }

    #[test]
    fn resolves_block_end() {
        let expr = build(|b| {
            b.write(Opcode::Block).unwrap();
            b.write(BlockType::Empty).unwrap();
            b.write(Opcode::Nop).unwrap();
            b.write(Opcode::End).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let block_start = 0u32;
        let compiled = compile_function(expr, Global);
        let target = compiled.jump(block_start);
        assert!(target.else_.is_none());
        assert!(target.catches.is_empty());
    }

    #[test]
    fn resolves_if_else() {
        let expr = build(|b| {
            b.write(Opcode::If).unwrap();
            b.write(BlockType::Empty).unwrap();
            b.write(Opcode::Nop).unwrap();
            b.write(Opcode::Else).unwrap();
            b.write(Opcode::Nop).unwrap();
            b.write(Opcode::End).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let compiled = compile_function(expr, Global);
        let target = compiled.jump(0);
        assert!(target.else_.is_some());
    }

    #[test]
    fn resolves_legacy_catch() {
        let expr = build(|b| {
            b.write(Opcode::Try).unwrap();
            b.write(BlockType::Empty).unwrap();
            b.write(Opcode::Nop).unwrap();
            b.write(Opcode::Catch).unwrap();
            b.write(0u32).unwrap();
            b.write(Opcode::Nop).unwrap();
            b.write(Opcode::End).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let compiled = compile_function(expr, Global);
        let target = compiled.jump(0);
        assert_eq!(target.catches.len(), 1);
        assert_eq!(target.catches[0].tag, Some(0));
    }
}

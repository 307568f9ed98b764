// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Validates a single function body or constant expression.
//!
//! This walks an [`Expression`]'s bytecode the same way
//! [`crate::interpret::compile::compile_function`] does, but rather than
//! resolving branch targets it checks every index-bearing operand against
//! the module's section sizes and every branch/delegate/catch label against
//! the enclosing structured control stack. It does not track the value-type
//! stack: operand and result type mismatches are left for the interpreter to
//! catch as traps at execution time, matching the dynamic checks already in
//! place for memory and table accesses.

use crate::Allocator;
use crate::expr_cursor::ExprCursor;
use crate::interpret::compile::skip_base_operand;
use crate::types::{
    AtomicMemArg, AtomicOpcode, BlockType, BulkOpcode, CallIndirectOperands, CatchClause,
    CatchClauseKind, DataIdx, ElemIdx, Expression, FuncIdx, FunctionType, GcOpcode, GlobalIdx,
    HeapType, LabelIdx, Locals, MemArg, MemIdx, Opcode, OperandType, StructFieldOperands,
    TableCopyOperands, TableIdx, TableInitOperands, TagIdx, TypeIdx, ValType, VectorOpcode,
    OPCODE_TO_OPERAND_TYPE,
};

use super::{Error, Validator};

/// The enclosing context a validated expression runs in: either a function
/// body (which has access to its own locals and may use any instruction its
/// signature allows) or a constant expression (a global initializer, or a
/// data/element segment's offset, which is restricted to a small whitelist
/// of instructions and may only reference imported globals).
#[derive(Copy, Clone, Debug)]
pub(crate) enum ExpressionValidationContext<'module, A: Allocator> {
    Function { signature: &'module FunctionType<A>, locals: &'module Locals<A> },
    Constant(ValType),
}

// The maximum nesting depth of structured control instructions a single
// expression may contain. Generous enough for any realistically-compiled
// module; it exists only to bound the fixed-size scope stack below rather
// than needing an allocator to grow one.
const MAX_CONTROL_DEPTH: usize = 1024;

#[derive(Clone, Copy, Eq, PartialEq)]
enum ScopeKind {
    Block,
    Loop,
    If,
    Try,
    TryTable,
}

// A fixed-capacity stack of open structured-control scope kinds, tracked so
// `else`/`catch`/`catch_all`/`delegate` can be checked against the
// instruction that actually opened their enclosing scope.
struct ScopeStack {
    kinds: [ScopeKind; MAX_CONTROL_DEPTH],
    len: usize,
}

impl ScopeStack {
    fn new() -> Self {
        Self { kinds: [ScopeKind::Block; MAX_CONTROL_DEPTH], len: 0 }
    }

    fn depth(&self) -> u32 {
        self.len as u32
    }

    fn push(&mut self, kind: ScopeKind) -> Result<(), Error> {
        if self.len == MAX_CONTROL_DEPTH {
            return Err(Error::ControlDepthExceeded);
        }
        self.kinds[self.len] = kind;
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<ScopeKind> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.kinds[self.len])
    }

    fn top(&self) -> Option<ScopeKind> {
        self.len.checked_sub(1).map(|idx| self.kinds[idx])
    }
}

// The instructions a constant expression (global initializer, or
// data/element segment offset) may contain, per the base spec plus the
// extended-const proposal's arithmetic on the two integer types.
fn allowed_in_constant_expr(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::End
            | Opcode::I32Const
            | Opcode::I64Const
            | Opcode::F32Const
            | Opcode::F64Const
            | Opcode::GlobalGet
            | Opcode::RefNull
            | Opcode::RefFunc
            | Opcode::I32Add
            | Opcode::I32Sub
            | Opcode::I32Mul
            | Opcode::I64Add
            | Opcode::I64Sub
            | Opcode::I64Mul
    )
}

pub(crate) fn validate_expression<A: Allocator>(
    validator: &mut Validator<A>,
    expr: &Expression<A>,
    context: ExpressionValidationContext<A>,
) -> Result<(), Error> {
    let is_constant = matches!(context, ExpressionValidationContext::Constant(_));
    let local_count = match context {
        ExpressionValidationContext::Function { signature, locals } => {
            signature.parameters.len() + locals.len()
        }
        ExpressionValidationContext::Constant(_) => 0,
    };

    let mut cursor = ExprCursor::new(&expr[..]);
    let mut scopes = ScopeStack::new();

    loop {
        let op: Opcode = cursor.opcode();

        if is_constant && !allowed_in_constant_expr(op) {
            return Err(Error::IllegalConstantExpression);
        }

        match op {
            Opcode::Block => {
                let bt: BlockType = cursor.read();
                validator.validate(&bt)?;
                scopes.push(ScopeKind::Block)?;
            }
            Opcode::Loop => {
                let bt: BlockType = cursor.read();
                validator.validate(&bt)?;
                scopes.push(ScopeKind::Loop)?;
            }
            Opcode::If => {
                let bt: BlockType = cursor.read();
                validator.validate(&bt)?;
                scopes.push(ScopeKind::If)?;
            }
            Opcode::Try => {
                let bt: BlockType = cursor.read();
                validator.validate(&bt)?;
                scopes.push(ScopeKind::Try)?;
            }
            Opcode::TryTable => {
                let bt: BlockType = cursor.read();
                validator.validate(&bt)?;
                let depth = scopes.depth();
                for clause in cursor.read_vec::<CatchClause>() {
                    if !matches!(clause.kind, CatchClauseKind::CatchAll | CatchClauseKind::CatchAllRef) {
                        validator.validate(&clause.tag)?;
                    }
                    if *clause.label > depth {
                        return Err(Error::InvalidBranchTarget { label: *clause.label, depth });
                    }
                }
                scopes.push(ScopeKind::TryTable)?;
            }
            Opcode::Else => {
                if scopes.top() != Some(ScopeKind::If) {
                    return Err(Error::UnbalancedControlFlow);
                }
            }
            Opcode::Catch => {
                if scopes.top() != Some(ScopeKind::Try) {
                    return Err(Error::UnbalancedControlFlow);
                }
                let tag: u32 = cursor.read();
                validator.validate(&TagIdx::new(tag))?;
            }
            Opcode::CatchAll => {
                if scopes.top() != Some(ScopeKind::Try) {
                    return Err(Error::UnbalancedControlFlow);
                }
            }
            Opcode::Delegate => {
                if scopes.pop() != Some(ScopeKind::Try) {
                    return Err(Error::UnbalancedControlFlow);
                }
                let label: u32 = cursor.read();
                let depth = scopes.depth();
                if label > depth {
                    return Err(Error::InvalidBranchTarget { label, depth });
                }
            }
            Opcode::End => {
                if scopes.pop().is_none() {
                    break;
                }
            }
            Opcode::Br | Opcode::BrIf | Opcode::Rethrow => {
                let label: u32 = cursor.read();
                let depth = scopes.depth();
                if label > depth {
                    return Err(Error::InvalidBranchTarget { label, depth });
                }
            }
            Opcode::BrTable => {
                let depth = scopes.depth();
                for label in cursor.read_vec::<LabelIdx>() {
                    if **label > depth {
                        return Err(Error::InvalidBranchTarget { label: **label, depth });
                    }
                }
                let default: LabelIdx = cursor.read();
                if *default > depth {
                    return Err(Error::InvalidBranchTarget { label: *default, depth });
                }
            }
            Opcode::Call | Opcode::ReturnCall | Opcode::RefFunc => {
                let idx: u32 = cursor.read();
                validator.validate(&FuncIdx::new(idx))?;
            }
            Opcode::CallIndirect | Opcode::ReturnCallIndirect => {
                let operands: CallIndirectOperands = cursor.read();
                validator.validate(&operands.table)?;
                validator.validate(&operands.ty)?;
            }
            Opcode::TableGet | Opcode::TableSet => {
                let idx: u32 = cursor.read();
                validator.validate(&TableIdx::new(idx))?;
            }
            Opcode::GlobalGet => {
                let idx: u32 = cursor.read();
                validator.validate(&GlobalIdx::new(idx))?;
                if is_constant && (idx as usize) >= validator.imported_global_count() {
                    return Err(Error::IllegalConstantExpression);
                }
            }
            Opcode::GlobalSet => {
                let idx: u32 = cursor.read();
                validator.validate(&GlobalIdx::new(idx))?;
            }
            Opcode::LocalGet | Opcode::LocalSet | Opcode::LocalTee => {
                let idx: u32 = cursor.read();
                if (idx as usize) >= local_count {
                    return Err(Error::InvalidLocalIndex { index: idx, count: local_count as u32 });
                }
            }
            Opcode::Throw => {
                let tag: u32 = cursor.read();
                validator.validate(&TagIdx::new(tag))?;
            }
            Opcode::BulkPrefix => validate_bulk_op(validator, &mut cursor)?,
            Opcode::AtomicPrefix => validate_atomic_op(validator, &mut cursor)?,
            Opcode::GcPrefix => validate_gc_op(validator, &mut cursor, scopes.depth())?,
            Opcode::VectorPrefix => validate_vector_op(validator, &mut cursor)?,
            other => {
                let operand = OPCODE_TO_OPERAND_TYPE[other as usize];
                if operand == OperandType::MemArg {
                    let memarg: MemArg = cursor.read();
                    validator.validate(&MemIdx::new(memarg.memidx))?;
                } else {
                    skip_base_operand(&mut cursor, operand);
                }
            }
        }
    }

    Ok(())
}

fn validate_bulk_op<A: Allocator>(validator: &mut Validator<A>, cursor: &mut ExprCursor) -> Result<(), Error> {
    let sub: BulkOpcode = cursor.read();
    match sub {
        BulkOpcode::DataDrop | BulkOpcode::MemoryInit => {
            let idx: u32 = cursor.read();
            validator.validate(&DataIdx::new(idx))
        }
        BulkOpcode::ElemDrop => {
            let idx: u32 = cursor.read();
            validator.validate(&ElemIdx::new(idx))
        }
        BulkOpcode::TableCopy => {
            let operands: TableCopyOperands = cursor.read();
            validator.validate(&operands.src)?;
            validator.validate(&operands.dst)
        }
        BulkOpcode::TableFill | BulkOpcode::TableGrow | BulkOpcode::TableSize => {
            let idx: u32 = cursor.read();
            validator.validate(&TableIdx::new(idx))
        }
        BulkOpcode::TableInit => {
            let operands: TableInitOperands = cursor.read();
            validator.validate(&operands.table)?;
            validator.validate(&operands.elem)
        }
        BulkOpcode::MemoryCopy
        | BulkOpcode::MemoryFill
        | BulkOpcode::I32TruncSatF32S
        | BulkOpcode::I32TruncSatF32U
        | BulkOpcode::I32TruncSatF64S
        | BulkOpcode::I32TruncSatF64U
        | BulkOpcode::I64TruncSatF32S
        | BulkOpcode::I64TruncSatF32U
        | BulkOpcode::I64TruncSatF64S
        | BulkOpcode::I64TruncSatF64U => Ok(()),
    }
}

fn validate_atomic_op<A: Allocator>(validator: &mut Validator<A>, cursor: &mut ExprCursor) -> Result<(), Error> {
    let sub: AtomicOpcode = cursor.read();
    if matches!(sub, AtomicOpcode::Fence) {
        return Ok(());
    }
    let memarg: AtomicMemArg = cursor.read();
    validator.validate(&MemIdx::new(memarg.memidx))
}

// GC struct/array field and sibling-type indices (the second operand of the
// `ArrayNewData`/`ArrayNewElem`/`ArrayCopy`/`ArrayInitData`/`ArrayInitElem`
// family, and struct field indices) aren't bounds-checked here: doing so
// would require carrying each composite type's field/element layout through
// the validator, which the rest of this module doesn't otherwise need.
fn validate_gc_op<A: Allocator>(
    validator: &mut Validator<A>,
    cursor: &mut ExprCursor,
    depth: u32,
) -> Result<(), Error> {
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
            let idx: u32 = cursor.read();
            validator.validate(&TypeIdx::new(idx))
        }
        GcOpcode::StructGet | GcOpcode::StructGetS | GcOpcode::StructGetU | GcOpcode::StructSet => {
            let operands: StructFieldOperands = cursor.read();
            validator.validate(&operands.ty)
        }
        GcOpcode::ArrayNewFixed
        | GcOpcode::ArrayNewData
        | GcOpcode::ArrayNewElem
        | GcOpcode::ArrayCopy
        | GcOpcode::ArrayInitData
        | GcOpcode::ArrayInitElem => {
            let idx: u32 = cursor.read();
            let _: u32 = cursor.read();
            validator.validate(&TypeIdx::new(idx))
        }
        GcOpcode::RefTest | GcOpcode::RefTestNull | GcOpcode::RefCast | GcOpcode::RefCastNull => {
            let _: HeapType = cursor.read();
            Ok(())
        }
        GcOpcode::BrOnCast | GcOpcode::BrOnCastFail => {
            let _: u8 = cursor.read();
            let label: u32 = cursor.read();
            let _: HeapType = cursor.read();
            let _: HeapType = cursor.read();
            if label > depth {
                Err(Error::InvalidBranchTarget { label, depth })
            } else {
                Ok(())
            }
        }
        GcOpcode::ArrayLen
        | GcOpcode::AnyConvertExtern
        | GcOpcode::ExternConvertAny
        | GcOpcode::RefI31
        | GcOpcode::I31GetS
        | GcOpcode::I31GetU => Ok(()),
    }
}

fn validate_vector_op<A: Allocator>(validator: &mut Validator<A>, cursor: &mut ExprCursor) -> Result<(), Error> {
    use VectorOpcode::*;

    let sub: VectorOpcode = cursor.read();
    match sub {
        V128Load | V128Load8x8S | V128Load8x8U | V128Load16x4S | V128Load16x4U | V128Load32x2S
        | V128Load32x2U | V128Load8Splat | V128Load16Splat | V128Load32Splat | V128Load64Splat
        | V128Store | V128Load32Zero | V128Load64Zero => {
            let memarg: MemArg = cursor.read();
            validator.validate(&MemIdx::new(memarg.memidx))
        }
        V128Load8Lane | V128Load16Lane | V128Load32Lane | V128Load64Lane | V128Store8Lane
        | V128Store16Lane | V128Store32Lane | V128Store64Lane => {
            let memarg: MemArg = cursor.read();
            let _: u8 = cursor.read();
            validator.validate(&MemIdx::new(memarg.memidx))
        }
        V128Const | I8x16Shuffle => {
            let _ = cursor.read_raw_bytes(16);
            Ok(())
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
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{ExpressionValidationContext, validate_expression};
    use crate::core_compat::alloc::Global;
    use crate::core_compat::vec::Vec;
    use crate::decode::expr::ExpressionBuilder;
    use crate::types::{
        BlockType, CompositeType, Expression, FunctionType, Global as WasmGlobal, GlobalSection,
        GlobalType, GlobalTypeMutability, Locals, Opcode, ResultType, SubType, TypeSection,
        ValType,
    };
    use crate::{Module, Version};

    use super::{Error, Validator};

    fn build(ops: impl FnOnce(&mut ExpressionBuilder<Global>)) -> Expression<Global> {
        let mut builder = ExpressionBuilder::new(Global);
        ops(&mut builder);
        builder.finalize()
    }

    fn empty_module() -> Module<Global> {
        Module {
            version: Version::V1,
            typesec: TypeSection::new(Vec::new_in(Global)),
            importsec: crate::types::ImportSection::new(Vec::new_in(Global)),
            funcsec: crate::types::FunctionSection::new(Vec::new_in(Global)),
            tablesec: crate::types::TableSection::new(Vec::new_in(Global)),
            memsec: crate::types::MemorySection::new(Vec::new_in(Global)),
            globalsec: GlobalSection::new(Vec::new_in(Global)),
            exportsec: crate::types::ExportSection::new(Vec::new_in(Global)),
            startsec: None,
            elemsec: crate::types::ElementSection::new(Vec::new_in(Global)),
            datacountsec: None,
            codesec: crate::types::CodeSection::new(Vec::new_in(Global)),
            datasec: crate::types::DataSection::new(Vec::new_in(Global)),
            tagsec: crate::types::TagSection::new(Vec::new_in(Global)),
        }
    }

    // A single function type: (i32) -> (). Used as the signature of the
    // one-and-only function in these fixtures.
    fn unary_i32_type() -> FunctionType<Global> {
        let mut parameters = Vec::new_in(Global);
        parameters.push(ValType::I32);
        FunctionType { parameters, results: ResultType::new(Vec::new_in(Global)) }
    }

    fn validate_function_body(
        module: &Module<Global>,
        signature: &FunctionType<Global>,
        locals: &Locals<Global>,
        code: &Expression<Global>,
    ) -> Result<(), Error> {
        let mut validator = Validator::new(module);
        validate_expression(
            &mut validator,
            code,
            ExpressionValidationContext::Function { signature, locals },
        )
    }

    #[test]
    fn valid_body_passes() {
        let module = empty_module();
        let signature = unary_i32_type();
        let locals = Locals::new(Vec::new_in(Global));
        let code = build(|b| {
            b.write(Opcode::LocalGet).unwrap();
            b.write(0u32).unwrap();
            b.write(Opcode::Drop).unwrap();
            b.write(Opcode::End).unwrap();
        });
        validate_function_body(&module, &signature, &locals, &code).unwrap();
    }

    #[test]
    fn out_of_bounds_local_index_fails() {
        let module = empty_module();
        let signature = unary_i32_type();
        let locals = Locals::new(Vec::new_in(Global));
        let code = build(|b| {
            b.write(Opcode::LocalGet).unwrap();
            b.write(1u32).unwrap(); // only local 0 (the parameter) exists
            b.write(Opcode::Drop).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let err = validate_function_body(&module, &signature, &locals, &code).unwrap_err();
        assert!(matches!(err, Error::InvalidLocalIndex { index: 1, count: 1 }));
    }

    #[test]
    fn branch_target_exceeding_depth_fails() {
        let module = empty_module();
        let signature = unary_i32_type();
        let locals = Locals::new(Vec::new_in(Global));
        let code = build(|b| {
            b.write(Opcode::Block).unwrap();
            b.write(BlockType::Empty).unwrap();
            b.write(Opcode::Br).unwrap();
            b.write(2u32).unwrap(); // only one block is open
            b.write(Opcode::End).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let err = validate_function_body(&module, &signature, &locals, &code).unwrap_err();
        assert!(matches!(err, Error::InvalidBranchTarget { label: 2, depth: 1 }));
    }

    #[test]
    fn branch_target_at_depth_passes() {
        let module = empty_module();
        let signature = unary_i32_type();
        let locals = Locals::new(Vec::new_in(Global));
        let code = build(|b| {
            b.write(Opcode::Block).unwrap();
            b.write(BlockType::Empty).unwrap();
            b.write(Opcode::Br).unwrap();
            b.write(1u32).unwrap(); // targets the implicit function body
            b.write(Opcode::End).unwrap();
            b.write(Opcode::End).unwrap();
        });
        validate_function_body(&module, &signature, &locals, &code).unwrap();
    }

    #[test]
    fn catch_outside_try_fails() {
        let module = empty_module();
        let signature = unary_i32_type();
        let locals = Locals::new(Vec::new_in(Global));
        let code = build(|b| {
            b.write(Opcode::Block).unwrap();
            b.write(BlockType::Empty).unwrap();
            b.write(Opcode::Catch).unwrap();
            b.write(0u32).unwrap();
            b.write(Opcode::End).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let err = validate_function_body(&module, &signature, &locals, &code).unwrap_err();
        assert!(matches!(err, Error::UnbalancedControlFlow));
    }

    #[test]
    fn else_outside_if_fails() {
        let module = empty_module();
        let signature = unary_i32_type();
        let locals = Locals::new(Vec::new_in(Global));
        let code = build(|b| {
            b.write(Opcode::Block).unwrap();
            b.write(BlockType::Empty).unwrap();
            b.write(Opcode::Else).unwrap();
            b.write(Opcode::End).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let err = validate_function_body(&module, &signature, &locals, &code).unwrap_err();
        assert!(matches!(err, Error::UnbalancedControlFlow));
    }

    #[test]
    fn disallowed_opcode_in_constant_expr_fails() {
        let module = empty_module();
        let mut validator = Validator::new(&module);
        let code = build(|b| {
            b.write(Opcode::LocalGet).unwrap();
            b.write(0u32).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let err = validate_expression(
            &mut validator,
            &code,
            ExpressionValidationContext::Constant(ValType::I32),
        )
        .unwrap_err();
        assert!(matches!(err, Error::IllegalConstantExpression));
    }

    #[test]
    fn non_imported_global_get_in_constant_expr_fails() {
        // One module-local (i.e. non-imported) global, with a trivial
        // constant initializer of its own so the module-building helper
        // below doesn't need to recurse.
        let mut module = empty_module();
        let mut typesec = Vec::new_in(Global);
        typesec.push(SubType {
            is_final: true,
            supertype: None,
            composite: CompositeType::Func(unary_i32_type()),
        });
        module.typesec = TypeSection::new(typesec);

        let init = build(|b| {
            b.write(Opcode::I32Const).unwrap();
            b.write(0i32).unwrap();
            b.write(Opcode::End).unwrap();
        });
        let mut globals = Vec::new_in(Global);
        globals.push(WasmGlobal {
            ty: GlobalType { value: ValType::I32, mutability: GlobalTypeMutability::Const },
            init,
        });
        module.globalsec = GlobalSection::new(globals);

        let mut validator = Validator::new(&module);
        let code = build(|b| {
            b.write(Opcode::GlobalGet).unwrap();
            b.write(0u32).unwrap(); // this global exists, but isn't imported
            b.write(Opcode::End).unwrap();
        });
        let err = validate_expression(
            &mut validator,
            &code,
            ExpressionValidationContext::Constant(ValType::I32),
        )
        .unwrap_err();
        assert!(matches!(err, Error::IllegalConstantExpression));
    }
}

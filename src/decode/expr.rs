// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Logic for re-encoding WebAssembly expressions. (See Expression's docstring
//! for more detail.)

use core::ptr;

use crate::Allocator;
use crate::core_compat;
use crate::core_compat::alloc::collections::TryReserveError;
use crate::core_compat::alloc::{AllocError, Layout};
use crate::core_compat::boxed::Box;
use crate::core_compat::vec::Vec;
use crate::decode::BoundedDecodable;
use crate::storage::Stream;
use crate::types::{
    AtomicMemArg, AtomicOpcode, BlockType, BrTableOperands, BulkOpcode, CallIndirectOperands,
    CatchClause, Expression, GcOpcode, HeapType, LabelIdx, MemArg, Opcode, RefType,
    SelectTOperands, StructFieldOperands, TableCopyOperands, TableInitOperands,
    TryTableOperands, ValType, VectorOpcode,
};

use super::{ContextStack, Contextual, Decodable, Decoder, Error};

// The maximum natural alignment of any of the structures we use to represent
// instruction operands.
const MAX_NATURAL_ALIGNMENT: usize = 8;

// Allocator wrapper that enables us to ensure that a vector's underlying
// allocation remains `MAX_NATURAL_ALIGNMENT`-aligned at all times.
#[derive(Clone)]
struct AlignedAllocator<A: Allocator>(A);

// Safety: Soundness is deferred to the wrapped allocator.
unsafe impl<A: Allocator> core_compat::alloc::Allocator for AlignedAllocator<A> {
    fn allocate(&self, layout: Layout) -> Result<ptr::NonNull<[u8]>, AllocError> {
        let layout = layout.align_to(MAX_NATURAL_ALIGNMENT).unwrap();
        self.0.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: ptr::NonNull<u8>, layout: Layout) {
        let layout = layout.align_to(MAX_NATURAL_ALIGNMENT).unwrap();
        // Safety: Soundness is deferred to the wrapped allocator.
        unsafe { self.0.deallocate(ptr, layout) }
    }

    unsafe fn grow(
        &self,
        ptr: ptr::NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<ptr::NonNull<[u8]>, AllocError> {
        let old_layout = old_layout.align_to(MAX_NATURAL_ALIGNMENT).unwrap();
        let new_layout = new_layout.align_to(MAX_NATURAL_ALIGNMENT).unwrap();
        // Safety: Soundness is deferred to the wrapped allocator.
        unsafe { self.0.grow(ptr, old_layout, new_layout) }
    }

    unsafe fn shrink(
        &self,
        ptr: ptr::NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<ptr::NonNull<[u8]>, AllocError> {
        let old_layout = old_layout.align_to(MAX_NATURAL_ALIGNMENT).unwrap();
        let new_layout = new_layout.align_to(MAX_NATURAL_ALIGNMENT).unwrap();
        // Safety: Soundness is deferred to the wrapped allocator.
        unsafe { self.0.shrink(ptr, old_layout, new_layout) }
    }
}

// A type that may appear within a decoded Expression, re-encoded by
// 'transcoding' directly from the decoder to the builder.
trait Transcodable<A: Allocator>: Decodable<A> + Contextual {
    fn write_to(self, builder: &mut ExpressionBuilder<A>) -> Result<(), TryReserveError>;

    fn transcode<Storage: Stream>(
        decoder: &mut Decoder<Storage>,
        context: &mut ContextStack,
        builder: &mut ExpressionBuilder<A>,
    ) -> Result<(), Error<Storage>>;
}

impl<T, A> Transcodable<A> for T
where
    T: BoundedDecodable + Contextual,
    A: Allocator,
{
    fn write_to(self, builder: &mut ExpressionBuilder<A>) -> Result<(), TryReserveError> {
        let data = &mut builder.data;

        // The alignment of `data`'s allocation ensures that the byte at
        // `aligned_pos` has T's natural alignment.
        let pos = data.len();
        let aligned_pos = pos.next_multiple_of(align_of::<Self>());
        let padding = aligned_pos - pos;
        data.try_reserve_exact(padding + size_of::<Self>())?;
        if padding > 0 {
            data.resize(pos + padding, 0);
        }

        // Safety: Per the above, the address being written to has T's natural
        // alignment, and the call to try_reserve_exact() ensures that the
        // capacity is `aligned_pos + size_of::<Self>()`.
        unsafe {
            let write_ptr = data.as_mut_ptr().add(aligned_pos);
            write_ptr.cast::<Self>().write(self);
            data.set_len(aligned_pos + size_of::<Self>());
        }
        Ok(())
    }

    fn transcode<Storage: Stream>(
        decoder: &mut Decoder<Storage>,
        context: &mut ContextStack,
        builder: &mut ExpressionBuilder<A>,
    ) -> Result<(), Error<Storage>> {
        let value: Self = decoder.read_bounded(context)?;
        Ok(value.write_to(builder)?)
    }
}

impl<T, A> Transcodable<A> for Vec<T, A>
where
    T: BoundedDecodable + Contextual,
    A: Allocator,
    Vec<T, A>: Contextual,
{
    fn write_to(self, builder: &mut ExpressionBuilder<A>) -> Result<(), TryReserveError> {
        builder.write(self.len() as u32)?;
        for elem in &self {
            builder.write(*elem)?;
        }
        Ok(())
    }

    fn transcode<Storage: Stream>(
        decoder: &mut Decoder<Storage>,
        context: &mut ContextStack,
        builder: &mut ExpressionBuilder<A>,
    ) -> Result<(), Error<Storage>> {
        let len: u32 = decoder.read_bounded(context)?;
        builder.write(len)?;
        for _ in 0..len {
            let elem: T = decoder.read_bounded(context)?;
            builder.write(elem)?;
        }
        Ok(())
    }
}

impl<A: Allocator> Transcodable<A> for BrTableOperands<A> {
    fn write_to(self, builder: &mut ExpressionBuilder<A>) -> Result<(), TryReserveError> {
        self.labels.write_to(builder)?;
        builder.write(self.default)
    }

    fn transcode<Storage: Stream>(
        decoder: &mut Decoder<Storage>,
        context: &mut ContextStack,
        builder: &mut ExpressionBuilder<A>,
    ) -> Result<(), Error<Storage>> {
        Vec::<LabelIdx, A>::transcode(decoder, context, builder)?;
        let default: LabelIdx = decoder.read_bounded(context)?;
        builder.write(default)?;
        Ok(())
    }
}

impl<A: Allocator> Transcodable<A> for SelectTOperands<A> {
    fn write_to(self, builder: &mut ExpressionBuilder<A>) -> Result<(), TryReserveError> {
        builder.write(self.types)
    }

    fn transcode<Storage: Stream>(
        decoder: &mut Decoder<Storage>,
        context: &mut ContextStack,
        builder: &mut ExpressionBuilder<A>,
    ) -> Result<(), Error<Storage>> {
        Vec::<ValType, A>::transcode(decoder, context, builder)
    }
}

impl<A: Allocator> Transcodable<A> for TryTableOperands<A> {
    fn write_to(self, builder: &mut ExpressionBuilder<A>) -> Result<(), TryReserveError> {
        builder.write(self.ty)?;
        self.catches.write_to(builder)
    }

    fn transcode<Storage: Stream>(
        decoder: &mut Decoder<Storage>,
        context: &mut ContextStack,
        builder: &mut ExpressionBuilder<A>,
    ) -> Result<(), Error<Storage>> {
        let ty: BlockType = decoder.read_bounded(context)?;
        builder.write(ty)?;
        Vec::<CatchClause, A>::transcode(decoder, context, builder)
    }
}

// A simple builder for creating expressions. `pub(crate)` so that
// `interpret::compile`'s tests can assemble bytecode the exact same way the
// real decoder does, rather than hand-computing alignment padding.
#[derive(Debug)]
pub(crate) struct ExpressionBuilder<A: Allocator> {
    data: Vec<u8, AlignedAllocator<A>>,
}

impl<A: Allocator> ExpressionBuilder<A> {
    pub(crate) fn new(alloc: A) -> Self {
        let aligned_alloc = AlignedAllocator(alloc);
        Self {
            data: Vec::new_in(aligned_alloc),
        }
    }

    pub(crate) fn finalize(self) -> Expression<A> {
        let (ptr, len, _, alloc) = self.data.into_raw_parts_with_alloc();
        let ptr: *mut [u8] = ptr::slice_from_raw_parts_mut(ptr, len);
        // Safety: The allocation is truly being managed by the wrapped
        // allocator A.
        unsafe { Expression::new(Box::from_raw_in(ptr, alloc.0)) }
    }

    pub(crate) fn write<T: Transcodable<A>>(&mut self, value: T) -> Result<(), TryReserveError> {
        value.write_to(self)
    }

    // Appends raw, unaligned bytes (e.g. a v128 constant or lane-shuffle
    // immediate) directly, with no leading alignment padding, since they're
    // read back as byte slices rather than via ptr::read::<T>().
    pub(crate) fn write_raw_bytes(&mut self, bytes: &[u8]) -> Result<(), TryReserveError> {
        self.data.try_reserve_exact(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }
}

pub(super) fn transcode_expression<A: Allocator, Storage: Stream>(
    decoder: &mut Decoder<Storage>,
    context: &mut ContextStack,
    alloc: &A,
) -> Result<Expression<A>, Error<Storage>> {
    let mut builder = ExpressionBuilder::new(alloc.clone());
    macro_rules! transcode {
        ($operand_type:ty) => {
            <$operand_type>::transcode(decoder, context, &mut builder)
        };
    }
    let mut depth = 0u32;
    loop {
        let op: Opcode = decoder.read_bounded(context)?;
        builder.write(op)?;

        match op {
            Opcode::Block | Opcode::If | Opcode::Loop => {
                transcode!(BlockType)?;
                depth += 1;
            }
            Opcode::Try => {
                transcode!(BlockType)?;
                depth += 1;
            }
            Opcode::TryTable => {
                transcode!(TryTableOperands::<A>)?;
                depth += 1;
            }
            Opcode::Br
            | Opcode::BrIf
            | Opcode::Call
            | Opcode::ReturnCall
            | Opcode::GlobalGet
            | Opcode::GlobalSet
            | Opcode::LocalGet
            | Opcode::LocalSet
            | Opcode::LocalTee
            | Opcode::RefFunc
            | Opcode::TableGet
            | Opcode::TableSet
            | Opcode::Throw
            | Opcode::Rethrow
            | Opcode::Catch => transcode!(u32)?,
            // Legacy `delegate` closes its `try` block in place of an `end`,
            // attaching the rethrow target as its operand.
            Opcode::Delegate => {
                transcode!(u32)?;
                depth = depth.saturating_sub(1);
            }
            Opcode::CatchAll | Opcode::ThrowRef => {} // No operands
            Opcode::BrTable => transcode!(BrTableOperands::<A>)?,
            Opcode::BulkPrefix => transcode_bulk_op(decoder, context, &mut builder)?,
            Opcode::AtomicPrefix => transcode_atomic_op(decoder, context, &mut builder)?,
            Opcode::GcPrefix => transcode_gc_op(decoder, context, &mut builder)?,
            Opcode::CallIndirect | Opcode::ReturnCallIndirect => transcode!(CallIndirectOperands)?,
            Opcode::End => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Opcode::F32Const => transcode!(f32)?,
            Opcode::F32Load
            | Opcode::F32Store
            | Opcode::F64Load
            | Opcode::F64Store
            | Opcode::I32Load
            | Opcode::I32Load8S
            | Opcode::I32Load8U
            | Opcode::I32Load16S
            | Opcode::I32Load16U
            | Opcode::I32Store
            | Opcode::I32Store8
            | Opcode::I32Store16
            | Opcode::I64Load
            | Opcode::I64Load8S
            | Opcode::I64Load8U
            | Opcode::I64Load16S
            | Opcode::I64Load16U
            | Opcode::I64Load32S
            | Opcode::I64Load32U
            | Opcode::I64Store
            | Opcode::I64Store8
            | Opcode::I64Store16
            | Opcode::I64Store32 => transcode!(MemArg)?,
            Opcode::F64Const => transcode!(f64)?,
            Opcode::I32Const => transcode!(i32)?,
            Opcode::I64Const => transcode!(i64)?,
            Opcode::MemoryGrow | Opcode::MemorySize => {
                decoder.read_zero_byte(context)?;
            }
            Opcode::RefNull => transcode!(RefType)?,
            Opcode::SelectT => transcode!(SelectTOperands::<A>)?,
            Opcode::VectorPrefix => transcode_vector_op(decoder, context, &mut builder)?,
            _ => {} // No operands
        }
    }

    Ok(builder.finalize())
}

fn transcode_bulk_op<A: Allocator, Storage: Stream>(
    decoder: &mut Decoder<Storage>,
    context: &mut ContextStack,
    builder: &mut ExpressionBuilder<A>,
) -> Result<(), Error<Storage>> {
    let bulk_op: BulkOpcode = decoder.read_bounded(context)?;
    builder.write(bulk_op)?;

    macro_rules! transcode {
        ($operand_type:ty) => {
            <$operand_type>::transcode(decoder, context, builder)
        };
    }
    match bulk_op {
        BulkOpcode::DataDrop
        | BulkOpcode::ElemDrop
        | BulkOpcode::TableFill
        | BulkOpcode::TableGrow
        | BulkOpcode::TableSize => transcode!(u32)?,
        BulkOpcode::MemoryCopy => {
            decoder.read_zero_byte(context)?;
            decoder.read_zero_byte(context)?;
        }
        BulkOpcode::MemoryFill => {
            decoder.read_zero_byte(context)?;
        }
        BulkOpcode::MemoryInit => {
            transcode!(u32)?;
            decoder.read_zero_byte(context)?;
        }
        BulkOpcode::TableCopy => transcode!(TableCopyOperands)?,
        BulkOpcode::TableInit => transcode!(TableInitOperands)?,
        _ => {} // No operands
    }
    Ok(())
}

fn transcode_atomic_op<A: Allocator, Storage: Stream>(
    decoder: &mut Decoder<Storage>,
    context: &mut ContextStack,
    builder: &mut ExpressionBuilder<A>,
) -> Result<(), Error<Storage>> {
    let atomic_op: AtomicOpcode = decoder.read_bounded(context)?;
    builder.write(atomic_op)?;

    macro_rules! transcode {
        ($operand_type:ty) => {
            <$operand_type>::transcode(decoder, context, builder)
        };
    }
    match atomic_op {
        // The reserved memory-index byte of `atomic.fence`, per the threads
        // proposal (always zero until a future proposal assigns it meaning).
        AtomicOpcode::Fence => decoder.read_zero_byte(context)?,
        _ => transcode!(AtomicMemArg)?,
    }
    Ok(())
}

fn transcode_gc_op<A: Allocator, Storage: Stream>(
    decoder: &mut Decoder<Storage>,
    context: &mut ContextStack,
    builder: &mut ExpressionBuilder<A>,
) -> Result<(), Error<Storage>> {
    let gc_op: GcOpcode = decoder.read_bounded(context)?;
    builder.write(gc_op)?;

    macro_rules! transcode {
        ($operand_type:ty) => {
            <$operand_type>::transcode(decoder, context, builder)
        };
    }
    use GcOpcode::{
        AnyConvertExtern, ArrayCopy, ArrayFill, ArrayGet, ArrayGetS, ArrayGetU, ArrayInitData,
        ArrayInitElem, ArrayLen, ArrayNew, ArrayNewData, ArrayNewDefault, ArrayNewElem,
        ArrayNewFixed, ArraySet, BrOnCast, BrOnCastFail, ExternConvertAny, I31GetS, I31GetU,
        RefCast, RefCastNull, RefI31, RefTest, RefTestNull, StructGet, StructGetS, StructGetU,
        StructNew, StructNewDefault, StructSet,
    };
    match gc_op {
        StructNew | StructNewDefault | ArrayNew | ArrayNewDefault | ArrayGet | ArrayGetS
        | ArrayGetU | ArraySet | ArrayFill => transcode!(u32)?,
        StructGet | StructGetS | StructGetU | StructSet => transcode!(StructFieldOperands)?,
        ArrayNewFixed | ArrayNewData | ArrayNewElem | ArrayCopy | ArrayInitData
        | ArrayInitElem => {
            transcode!(u32)?;
            transcode!(u32)?;
        }
        RefTest | RefTestNull | RefCast | RefCastNull => transcode!(HeapType)?,
        // `br_on_cast`/`br_on_cast_fail`: a nullability-flags byte, the
        // target label, and the source/target reference types.
        BrOnCast | BrOnCastFail => {
            transcode!(u8)?;
            transcode!(u32)?;
            transcode!(HeapType)?;
            transcode!(HeapType)?;
        }
        ArrayLen | AnyConvertExtern | ExternConvertAny | RefI31 | I31GetS | I31GetU => {}
    }
    Ok(())
}

fn transcode_vector_op<A: Allocator, Storage: Stream>(
    decoder: &mut Decoder<Storage>,
    context: &mut ContextStack,
    builder: &mut ExpressionBuilder<A>,
) -> Result<(), Error<Storage>> {
    let vec_op: VectorOpcode = decoder.read_bounded(context)?;
    builder.write(vec_op)?;

    macro_rules! transcode {
        ($operand_type:ty) => {
            <$operand_type>::transcode(decoder, context, builder)
        };
    }
    use VectorOpcode::{
        F32x4ExtractLane, F32x4ReplaceLane, F64x2ExtractLane, F64x2ReplaceLane, I8x16ExtractLaneS,
        I8x16ExtractLaneU, I8x16ReplaceLane, I8x16Shuffle, I16x8ExtractLaneS, I16x8ExtractLaneU,
        I16x8ReplaceLane, I32x4ExtractLane, I32x4ReplaceLane, I64x2ExtractLane, I64x2ReplaceLane,
        V128Const, V128Load, V128Load8Lane, V128Load8Splat, V128Load8x8S, V128Load8x8U,
        V128Load16Lane, V128Load16Splat, V128Load16x4S, V128Load16x4U, V128Load32Lane,
        V128Load32Splat, V128Load32Zero, V128Load32x2S, V128Load32x2U, V128Load64Lane,
        V128Load64Splat, V128Load64Zero, V128Store, V128Store8Lane, V128Store16Lane,
        V128Store32Lane, V128Store64Lane,
    };
    match vec_op {
        V128Load | V128Load8x8S | V128Load8x8U | V128Load16x4S | V128Load16x4U
        | V128Load32x2S | V128Load32x2U | V128Load8Splat | V128Load16Splat | V128Load32Splat
        | V128Load64Splat | V128Store | V128Load32Zero | V128Load64Zero => {
            transcode!(MemArg)?;
        }
        V128Load8Lane | V128Load16Lane | V128Load32Lane | V128Load64Lane | V128Store8Lane
        | V128Store16Lane | V128Store32Lane | V128Store64Lane => {
            transcode!(MemArg)?;
            transcode!(u8)?;
        }
        V128Const => {
            let mut bytes = [0u8; 16];
            decoder.read_exact(context, &mut bytes)?;
            builder.write_raw_bytes(&bytes)?;
        }
        I8x16Shuffle => {
            let mut lanes = [0u8; 16];
            decoder.read_exact(context, &mut lanes)?;
            builder.write_raw_bytes(&lanes)?;
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
        | F64x2ReplaceLane => transcode!(u8)?,
        _ => {} // Splats, arithmetic, comparisons, and conversions carry no operand.
    }
    Ok(())
}

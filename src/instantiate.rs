// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Module instantiation: resolving a [`crate::Module`]'s imports against a
//! [`Store`] and allocating its functions, tables, memories, globals,
//! element segments, data segments, and tags into that store's arenas.
//!
//! Every runtime entity is addressed by a small `Copy` index (`FuncAddr`,
//! `TableAddr`, ...) rather than by pointer or reference, exactly as
//! [`crate::types`]'s module-level indices (`FuncIdx`, `TableIdx`, ...)
//! address entries within a single module. A [`ModuleInstance`] is itself
//! just such an address, naming a slot in the store's instance arena.
//!
//! Instantiation proceeds in the usual dependency order: resolve imports,
//! allocate module-defined functions (so `ref.func` in a later global
//! initializer has something to point at), evaluate global initializers,
//! allocate tables/memories/tags, materialize element and data segment
//! instances, wire up exports, copy active segments into place, then run
//! the start function if present.

use crate::config::Proposal;
use crate::core_compat::boxed::Box;
use crate::core_compat::vec::Vec;
use crate::expr_cursor::ExprCursor;
use crate::host::HostFunction;
use crate::interpret::{Trap, Value};
use crate::store::{
    DataInstance, ElementInstance, FunctionInstance, FunctionKind, GlobalInstance, MemoryInstance,
    ModuleInstanceData, Store, TableInstance, TagInstance,
};
use crate::types::{
    DataMode, ElementInit, ElementMode, Expression, ExportDescriptor, FunctionType, ImportDescriptor,
    Limits, Local, Opcode, RefType,
};
use crate::{Allocator, Module};

macro_rules! addr {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(value: u32) -> Self {
                Self(value)
            }
        }

        impl ::core::ops::Deref for $name {
            type Target = u32;

            fn deref(&self) -> &u32 {
                &self.0
            }
        }
    };
}

addr!(
    /// The address of a function instance within a [`Store`].
    FuncAddr
);
addr!(
    /// The address of a table instance within a [`Store`].
    TableAddr
);
addr!(
    /// The address of a linear memory instance within a [`Store`].
    MemAddr
);
addr!(
    /// The address of a global instance within a [`Store`].
    GlobalAddr
);
addr!(
    /// The address of an element segment instance within a [`Store`].
    ElemAddr
);
addr!(
    /// The address of a data segment instance within a [`Store`].
    DataAddr
);
addr!(
    /// The address of a tag instance within a [`Store`].
    TagAddr
);
addr!(
    /// The address of a garbage-collected heap object within a [`Store`],
    /// per the GC proposal.
    GcAddr
);
addr!(
    /// The address of a live exception instance within a [`Store`] (the
    /// referent of an `exnref` value), per the exception-handling proposal.
    ExnAddr
);
addr!(
    /// The address of a module instance within a [`Store`]: the result of a
    /// successful [`instantiate`].
    ModuleInstance
);

/// What a module instance's export resolves to, by kind and address.
#[derive(Clone, Copy, Debug)]
pub enum ExportValue {
    Function(FuncAddr),
    Table(TableAddr),
    Memory(MemAddr),
    Global(GlobalAddr),
    Tag(TagAddr),
}

/// Errors that can arise while resolving imports and allocating a module's
/// instances.
#[derive(Debug)]
pub enum Error {
    /// No module instance or host module is registered under the imported
    /// module name.
    ImportModuleNotFound,
    /// The imported module/host module exists, but declares no export under
    /// the requested field name.
    ImportFieldNotFound,
    /// The requested field exists, but isn't of the imported kind (e.g. a
    /// function imported as a table).
    ImportKindMismatch,
    /// An imported function's signature doesn't match the exporter's.
    ImportFunctionSignatureMismatch,
    /// An imported table's element type or limits aren't compatible with
    /// the exporter's.
    ImportTableTypeMismatch,
    /// An imported memory's limits (or sharedness) aren't compatible with
    /// the exporter's.
    ImportMemoryTypeMismatch,
    /// An imported global's value type or mutability doesn't match the
    /// exporter's.
    ImportGlobalTypeMismatch,
    /// An imported tag's signature doesn't match the exporter's.
    ImportTagTypeMismatch,
    /// The module requires a currently-disabled proposal (e.g. a shared
    /// memory import while the threads proposal is disabled).
    DisabledProposal(Proposal),
    /// The module declares more memories than `multi-memory` allows while
    /// that proposal is disabled.
    TooManyMemories,
    /// An active element or data segment's offset (or the segment start
    /// function) trapped during the implicit copies instantiation performs.
    Trap(Trap),
}

fn function_type_eq<A: Allocator>(a: &FunctionType<A>, b: &FunctionType<A>) -> bool {
    a.parameters.len() == b.parameters.len()
        && a.parameters.iter().zip(b.parameters.iter()).all(|(x, y)| x == y)
        && a.results.len() == b.results.len()
        && a.results.iter().zip(b.results.iter()).all(|(x, y)| x == y)
}

fn limits_compatible(actual: Limits, expected: Limits) -> bool {
    if actual.min < expected.min {
        return false;
    }
    match (actual.max, expected.max) {
        (_, None) => true,
        (Some(actual_max), Some(expected_max)) => actual_max <= expected_max,
        (None, Some(_)) => false,
    }
}

fn null_value_for_reftype(reftype: RefType) -> Value {
    match reftype {
        RefType::Func => Value::FuncRef(None),
        RefType::Extern => Value::ExternRef(None),
    }
}

fn local_default_value(local: &Local) -> Value {
    match *local {
        Local::I32(v) => Value::I32(v),
        Local::I64(v) => Value::I64(v),
        Local::F32(v) => Value::F32(v),
        Local::F64(v) => Value::F64(v),
        Local::FuncRef(idx) => {
            Value::FuncRef(if idx == u32::MAX { None } else { Some(FuncAddr::new(idx)) })
        }
        Local::ExternRef(idx) => Value::ExternRef(if idx == u32::MAX { None } else { Some(idx) }),
        Local::Vec(v) => Value::V128(v),
    }
}

fn binop_i32(a: Value, b: Value, f: impl Fn(i32, i32) -> i32) -> Value {
    let (Value::I32(a), Value::I32(b)) = (a, b) else {
        unreachable!("non-i32 operand to an i32 extended-const op")
    };
    Value::I32(f(a, b))
}

fn binop_i64(a: Value, b: Value, f: impl Fn(i64, i64) -> i64) -> Value {
    let (Value::I64(a), Value::I64(b)) = (a, b) else {
        unreachable!("non-i64 operand to an i64 extended-const op")
    };
    Value::I64(f(a, b))
}

/// A bare-bones stack evaluator for the restricted constant-expression
/// language usable in global initializers and element/data segment offsets:
/// the `*.const` family, `ref.null`/`ref.func`, `global.get` of an
/// already-resolved (necessarily imported) global, and extended-const
/// integer arithmetic. `validate::expr::validate_expression` has already
/// rejected anything outside this set by the time this runs, so any other
/// opcode here indicates a validation bug rather than untrusted input.
fn eval_const_expr<A: Allocator + Clone>(
    store: &Store<A>,
    funcs: &[FuncAddr],
    imported_globals: &[GlobalAddr],
    expr: &Expression<A>,
) -> Value {
    let mut cursor = ExprCursor::new(&expr[..]);
    let mut stack = [Value::I32(0); 4];
    let mut top = 0usize;

    loop {
        match cursor.opcode() {
            Opcode::I32Const => {
                stack[top] = Value::I32(cursor.read());
                top += 1;
            }
            Opcode::I64Const => {
                stack[top] = Value::I64(cursor.read());
                top += 1;
            }
            Opcode::F32Const => {
                stack[top] = Value::F32(cursor.read());
                top += 1;
            }
            Opcode::F64Const => {
                stack[top] = Value::F64(cursor.read());
                top += 1;
            }
            Opcode::RefNull => {
                let reftype: RefType = cursor.read();
                stack[top] = null_value_for_reftype(reftype);
                top += 1;
            }
            Opcode::RefFunc => {
                let idx: u32 = cursor.read();
                stack[top] = Value::FuncRef(funcs.get(idx as usize).copied());
                top += 1;
            }
            Opcode::GlobalGet => {
                let idx: u32 = cursor.read();
                let addr = imported_globals[idx as usize];
                stack[top] = store.global(addr).value;
                top += 1;
            }
            Opcode::I32Add => {
                top -= 1;
                stack[top - 1] = binop_i32(stack[top - 1], stack[top], |a, b| a.wrapping_add(b));
            }
            Opcode::I32Sub => {
                top -= 1;
                stack[top - 1] = binop_i32(stack[top - 1], stack[top], |a, b| a.wrapping_sub(b));
            }
            Opcode::I32Mul => {
                top -= 1;
                stack[top - 1] = binop_i32(stack[top - 1], stack[top], |a, b| a.wrapping_mul(b));
            }
            Opcode::I64Add => {
                top -= 1;
                stack[top - 1] = binop_i64(stack[top - 1], stack[top], |a, b| a.wrapping_add(b));
            }
            Opcode::I64Sub => {
                top -= 1;
                stack[top - 1] = binop_i64(stack[top - 1], stack[top], |a, b| a.wrapping_sub(b));
            }
            Opcode::I64Mul => {
                top -= 1;
                stack[top - 1] = binop_i64(stack[top - 1], stack[top], |a, b| a.wrapping_mul(b));
            }
            Opcode::End => break,
            _ => unreachable!("non-constant opcode in constant expression"),
        }
    }

    stack[0]
}

struct ResolvedImports<A: Allocator> {
    funcs: Vec<FuncAddr, A>,
    tables: Vec<TableAddr, A>,
    memories: Vec<MemAddr, A>,
    globals: Vec<GlobalAddr, A>,
    tags: Vec<TagAddr, A>,
}

fn resolve_imports<A: Allocator + Clone>(
    store: &mut Store<A>,
    module: &Module<A>,
    alloc: A,
) -> Result<ResolvedImports<A>, Error> {
    let mut funcs = Vec::new_in(alloc.clone());
    let mut tables = Vec::new_in(alloc.clone());
    let mut memories = Vec::new_in(alloc.clone());
    let mut globals = Vec::new_in(alloc.clone());
    let mut tags = Vec::new_in(alloc.clone());

    for import in module.importsec.iter() {
        let module_name = import.module.as_ref();
        let field = import.field.as_ref();

        if let Some(instance) = store.named_module_instance(module_name) {
            let export = store.export(instance, field).ok_or(Error::ImportFieldNotFound)?;
            match (&import.descriptor, export) {
                (ImportDescriptor::Function(typeidx), ExportValue::Function(addr)) => {
                    let expected = module.typesec[**typeidx as usize]
                        .as_function_type()
                        .ok_or(Error::ImportFunctionSignatureMismatch)?;
                    if !function_type_eq(expected, &store.function(addr).ty) {
                        return Err(Error::ImportFunctionSignatureMismatch);
                    }
                    funcs.push(addr);
                }
                (ImportDescriptor::Table(expected), ExportValue::Table(addr)) => {
                    let actual = store.table(addr).ty();
                    if actual.reftype != expected.reftype || !limits_compatible(actual.limits, expected.limits) {
                        return Err(Error::ImportTableTypeMismatch);
                    }
                    tables.push(addr);
                }
                (ImportDescriptor::Memory(expected), ExportValue::Memory(addr)) => {
                    let actual = store.memory(addr).ty;
                    if !limits_compatible(*actual, **expected) {
                        return Err(Error::ImportMemoryTypeMismatch);
                    }
                    memories.push(addr);
                }
                (ImportDescriptor::Global(expected), ExportValue::Global(addr)) => {
                    let actual = store.global(addr).ty;
                    if actual.value != expected.value || actual.mutability != expected.mutability {
                        return Err(Error::ImportGlobalTypeMismatch);
                    }
                    globals.push(addr);
                }
                (ImportDescriptor::Tag(expected), ExportValue::Tag(addr)) => {
                    let expected_ty = module.typesec[*expected.ty as usize]
                        .as_function_type()
                        .ok_or(Error::ImportTagTypeMismatch)?;
                    if !function_type_eq(expected_ty, &store.tag(addr).ty) {
                        return Err(Error::ImportTagTypeMismatch);
                    }
                    tags.push(addr);
                }
                _ => return Err(Error::ImportKindMismatch),
            }
            continue;
        }

        let host = store.host_module(module_name).ok_or(Error::ImportModuleNotFound)?;

        match &import.descriptor {
            ImportDescriptor::Function(typeidx) => {
                let host_func = host.find_function(field).ok_or(Error::ImportFieldNotFound)?;
                let expected = module.typesec[**typeidx as usize]
                    .as_function_type()
                    .ok_or(Error::ImportFunctionSignatureMismatch)?;
                if !function_type_eq(expected, host_func.ty()) {
                    return Err(Error::ImportFunctionSignatureMismatch);
                }
                let cloned: HostFunction<A> = HostFunction {
                    name: Box::<str, A>::from(host_func.name()),
                    ty: host_func.ty().clone(),
                    func: host_func.func,
                    userdata: host_func.userdata,
                };
                let addr = store.push_function(FunctionInstance {
                    ty: cloned.ty().clone(),
                    kind: FunctionKind::Host(cloned),
                });
                funcs.push(addr);
            }
            ImportDescriptor::Table(expected) => {
                let host_table = host.find_table(field).ok_or(Error::ImportFieldNotFound)?;
                if host_table.ty.reftype != expected.reftype
                    || !limits_compatible(host_table.ty.limits, expected.limits)
                {
                    return Err(Error::ImportTableTypeMismatch);
                }
                let mut elements = Vec::new_in(alloc.clone());
                elements.resize(host_table.ty.min_elements() as usize, null_value_for_reftype(host_table.ty.reftype));
                let addr = store.push_table(TableInstance {
                    ty: host_table.ty,
                    elements,
                });
                tables.push(addr);
            }
            ImportDescriptor::Memory(expected) => {
                let host_memory = host.find_memory(field).ok_or(Error::ImportFieldNotFound)?;
                if !limits_compatible(*host_memory.ty, **expected) {
                    return Err(Error::ImportMemoryTypeMismatch);
                }
                let mut bytes = Vec::new_in(alloc.clone());
                bytes.resize(host_memory.ty.min_size_bytes(), 0);
                let addr = store.push_memory(MemoryInstance {
                    ty: host_memory.ty,
                    bytes,
                });
                memories.push(addr);
            }
            ImportDescriptor::Global(expected) => {
                let host_global = host.find_global(field).ok_or(Error::ImportFieldNotFound)?;
                if host_global.ty.value != expected.value || host_global.ty.mutability != expected.mutability {
                    return Err(Error::ImportGlobalTypeMismatch);
                }
                let addr = store.push_global(GlobalInstance {
                    ty: host_global.ty,
                    value: host_global.value,
                });
                globals.push(addr);
            }
            ImportDescriptor::Tag(_) => return Err(Error::ImportFieldNotFound),
        }
    }

    Ok(ResolvedImports {
        funcs,
        tables,
        memories,
        globals,
        tags,
    })
}

fn empty_instance_data<A: Allocator + Clone>(alloc: A) -> ModuleInstanceData<A> {
    ModuleInstanceData {
        funcs: Vec::new_in(alloc.clone()),
        tables: Vec::new_in(alloc.clone()),
        memories: Vec::new_in(alloc.clone()),
        globals: Vec::new_in(alloc.clone()),
        elements: Vec::new_in(alloc.clone()),
        datas: Vec::new_in(alloc.clone()),
        tags: Vec::new_in(alloc.clone()),
        exports: Vec::new_in(alloc),
    }
}

fn instantiate_elements<A: Allocator + Clone>(
    store: &mut Store<A>,
    module: &Module<A>,
    all_funcs: &[FuncAddr],
    all_globals: &[GlobalAddr],
    alloc: A,
) -> Vec<ElemAddr, A> {
    let mut result = Vec::new_in(alloc.clone());
    for segment in module.elemsec.iter() {
        let mut values = Vec::new_in(alloc.clone());
        match &segment.init {
            ElementInit::FunctionIndices(indices) => {
                for idx in indices.iter() {
                    values.push(Value::FuncRef(all_funcs.get(**idx as usize).copied()));
                }
            }
            ElementInit::Expressions(exprs) => {
                for expr in exprs.iter() {
                    values.push(eval_const_expr(store, all_funcs, all_globals, expr));
                }
            }
        }
        // Declarative segments are never copied anywhere; they exist only
        // so `ref.func` forward references in other const expressions see
        // their functions as already addressable. Drop them immediately.
        if matches!(segment.mode, ElementMode::Declarative) {
            values.clear();
        }
        result.push(store.push_element(ElementInstance { values }));
    }
    result
}

fn instantiate_datas<A: Allocator + Clone>(
    store: &mut Store<A>,
    module: &Module<A>,
    alloc: A,
) -> Vec<DataAddr, A> {
    let mut result = Vec::new_in(alloc.clone());
    for segment in module.datasec.iter() {
        let mut bytes = Vec::new_in(alloc.clone());
        bytes.extend_from_slice(&segment.init);
        result.push(store.push_data(DataInstance { bytes }));
    }
    result
}

fn resolve_exports<A: Allocator + Clone>(
    module: &Module<A>,
    all_funcs: &[FuncAddr],
    all_tables: &[TableAddr],
    all_memories: &[MemAddr],
    all_globals: &[GlobalAddr],
    all_tags: &[TagAddr],
    alloc: A,
) -> Vec<(Box<str, A>, ExportValue), A> {
    let mut result = Vec::new_in(alloc);
    for export in module.exportsec.iter() {
        let value = match export.descriptor {
            ExportDescriptor::Function(idx) => ExportValue::Function(all_funcs[*idx as usize]),
            ExportDescriptor::Table(idx) => ExportValue::Table(all_tables[*idx as usize]),
            ExportDescriptor::Memory(idx) => ExportValue::Memory(all_memories[*idx as usize]),
            ExportDescriptor::Global(idx) => ExportValue::Global(all_globals[*idx as usize]),
            ExportDescriptor::Tag(idx) => ExportValue::Tag(all_tags[*idx as usize]),
        };
        result.push((Box::<str, A>::from(export.field.as_ref()), value));
    }
    result
}

fn copy_active_elements<A: Allocator + Clone>(
    store: &mut Store<A>,
    module: &Module<A>,
    all_tables: &[TableAddr],
    elemaddrs: &[ElemAddr],
    all_funcs: &[FuncAddr],
    all_globals: &[GlobalAddr],
) -> Result<(), Error> {
    for (segment, &elemaddr) in module.elemsec.iter().zip(elemaddrs.iter()) {
        let ElementMode::Active(active) = &segment.mode else {
            continue;
        };
        let Value::I32(offset) = eval_const_expr(store, all_funcs, all_globals, &active.offset) else {
            unreachable!("validated i32 offset expression")
        };
        let offset = offset as u32 as usize;
        let tableaddr = all_tables[*active.table as usize];

        let len = store.element(elemaddr).values.len();
        let table_len = store.table(tableaddr).size() as usize;
        match offset.checked_add(len) {
            Some(end) if end <= table_len => {}
            _ => return Err(Error::Trap(Trap::TableAccessOutOfBounds)),
        }

        let values = store.element(elemaddr).values.clone();
        store.table_mut(tableaddr).elements[offset..offset + len].copy_from_slice(&values);
        store.element_mut(elemaddr).values.clear();
    }
    Ok(())
}

fn copy_active_datas<A: Allocator + Clone>(
    store: &mut Store<A>,
    module: &Module<A>,
    all_memories: &[MemAddr],
    dataaddrs: &[DataAddr],
    all_funcs: &[FuncAddr],
    all_globals: &[GlobalAddr],
) -> Result<(), Error> {
    for (segment, &dataaddr) in module.datasec.iter().zip(dataaddrs.iter()) {
        let DataMode::Active(active) = &segment.mode else {
            continue;
        };
        let Value::I32(offset) = eval_const_expr(store, all_funcs, all_globals, &active.offset) else {
            unreachable!("validated i32 offset expression")
        };
        let offset = offset as u32 as usize;
        let memaddr = all_memories[*active.memory as usize];

        let len = store.data(dataaddr).bytes.len();
        let mem_len = store.memory(memaddr).bytes().len();
        match offset.checked_add(len) {
            Some(end) if end <= mem_len => {}
            _ => return Err(Error::Trap(Trap::MemoryAccessOutOfBounds)),
        }

        let bytes = store.data(dataaddr).bytes.clone();
        store.memory_mut(memaddr).bytes_mut()[offset..offset + len].copy_from_slice(&bytes);
        store.data_mut(dataaddr).bytes.clear();
    }
    Ok(())
}

/// Instantiates `module` within `store`, resolving its imports against
/// already-registered host and module instances, and optionally registering
/// the result under `name` for later modules to import from.
///
/// `module` is assumed to have already passed [`crate::validate`]; this
/// function trusts its index bounds and constant-expression shapes rather
/// than re-checking them.
pub(crate) fn instantiate<A: Allocator + Clone>(
    store: &mut Store<A>,
    module: &Module<A>,
    alloc: A,
    name: Option<&str>,
) -> Result<ModuleInstance, Error> {
    #[cfg(feature = "std")]
    tracing::trace!(?name, "instantiating module");

    let imports = resolve_imports(store, module, alloc.clone())?;

    // Reserve the instance's slot now so defined functions can record it as
    // their owner before the instance's real contents are known; it's
    // filled in for real once every address vector below is complete.
    let instance = store.push_module_instance(empty_instance_data(alloc.clone()));

    let mut defined_funcs = Vec::new_in(alloc.clone());
    for (typeidx, function) in module.funcsec.iter().zip(module.codesec.iter()) {
        let ty = module.typesec[**typeidx as usize]
            .as_function_type()
            .expect("validated module")
            .clone();
        let mut locals = Vec::new_in(alloc.clone());
        for local in function.locals.iter() {
            locals.push(local_default_value(local));
        }
        let addr = store.push_function(FunctionInstance {
            ty,
            kind: FunctionKind::Local {
                owner: instance,
                locals,
                code: crate::interpret::compile::compile_function(function.code.clone(), alloc.clone()),
            },
        });
        defined_funcs.push(addr);
    }

    let mut all_funcs = Vec::new_in(alloc.clone());
    all_funcs.extend(imports.funcs.iter().copied());
    all_funcs.extend(defined_funcs.iter().copied());

    // Global initializers may reference function indices (ref.func) over
    // the full function index space, but may only read already-imported
    // globals (global.get), per the MVP constant-expression grammar.
    let mut defined_globals = Vec::new_in(alloc.clone());
    for global in module.globalsec.iter() {
        let value = eval_const_expr(store, &all_funcs, &imports.globals, &global.init);
        let addr = store.push_global(GlobalInstance { ty: global.ty, value });
        defined_globals.push(addr);
    }
    let mut all_globals = Vec::new_in(alloc.clone());
    all_globals.extend(imports.globals.iter().copied());
    all_globals.extend(defined_globals.iter().copied());

    if !store.config.proposal_enabled(Proposal::MultiMemory) && imports.memories.len() + module.memsec.len() > 1 {
        return Err(Error::TooManyMemories);
    }

    let mut defined_tables = Vec::new_in(alloc.clone());
    for ty in module.tablesec.iter() {
        let mut elements = Vec::new_in(alloc.clone());
        elements.resize(ty.min_elements() as usize, null_value_for_reftype(ty.reftype));
        let addr = store.push_table(TableInstance { ty: *ty, elements });
        defined_tables.push(addr);
    }
    let mut all_tables = Vec::new_in(alloc.clone());
    all_tables.extend(imports.tables.iter().copied());
    all_tables.extend(defined_tables.iter().copied());

    let mut defined_memories = Vec::new_in(alloc.clone());
    for ty in module.memsec.iter() {
        if ty.shared && !store.config.proposal_enabled(Proposal::Threads) {
            return Err(Error::DisabledProposal(Proposal::Threads));
        }
        let mut bytes = Vec::new_in(alloc.clone());
        bytes.resize(ty.min_size_bytes(), 0);
        let addr = store.push_memory(MemoryInstance { ty: *ty, bytes });
        defined_memories.push(addr);
    }
    let mut all_memories = Vec::new_in(alloc.clone());
    all_memories.extend(imports.memories.iter().copied());
    all_memories.extend(defined_memories.iter().copied());

    let mut all_tags = Vec::new_in(alloc.clone());
    all_tags.extend(imports.tags.iter().copied());
    for tag in module.tagsec.iter() {
        let ty = module.typesec[*tag.ty as usize]
            .as_function_type()
            .expect("validated module")
            .clone();
        all_tags.push(store.push_tag(TagInstance { ty }));
    }

    let elemaddrs = instantiate_elements(store, module, &all_funcs, &all_globals, alloc.clone());
    let dataaddrs = instantiate_datas(store, module, alloc.clone());

    let exports = resolve_exports(
        module,
        &all_funcs,
        &all_tables,
        &all_memories,
        &all_globals,
        &all_tags,
        alloc.clone(),
    );

    *store.instance_data_mut(instance) = ModuleInstanceData {
        funcs: all_funcs.clone(),
        tables: all_tables.clone(),
        memories: all_memories.clone(),
        globals: all_globals,
        elements: elemaddrs.clone(),
        datas: dataaddrs.clone(),
        tags: all_tags,
        exports,
    };

    copy_active_elements(store, module, &all_tables, &elemaddrs, &all_funcs, &imports.globals)?;
    copy_active_datas(store, module, &all_memories, &dataaddrs, &all_funcs, &imports.globals)?;

    if let Some(name) = name {
        store.register_module_instance(name, instance);
    }

    if let Some(startsec) = &module.startsec {
        let funcaddr = all_funcs[**startsec as usize];
        crate::interpret::invoke(store, funcaddr, &[], alloc).map_err(Error::Trap)?;
    }

    #[cfg(feature = "std")]
    tracing::trace!(?name, ?instance, "module instantiated");

    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::{function_type_eq, limits_compatible};
    use crate::core_compat::alloc::Global;
    use crate::core_compat::vec::Vec;
    use crate::types::{FunctionType, Limits, ResultType, ValType};

    #[test]
    fn limits_compatible_checks_min_and_max() {
        let a = Limits { min: 2, max: Some(4), shared: false };
        assert!(limits_compatible(a, Limits { min: 1, max: None, shared: false }));
        assert!(limits_compatible(a, Limits { min: 2, max: Some(4), shared: false }));
        assert!(!limits_compatible(a, Limits { min: 3, max: None, shared: false }));
        assert!(!limits_compatible(a, Limits { min: 2, max: Some(3), shared: false }));
    }

    #[test]
    fn function_type_eq_compares_parameters_and_results() {
        let mut params_a = Vec::new_in(Global);
        params_a.push(ValType::I32);
        let mut results_a = Vec::new_in(Global);
        results_a.push(ValType::I64);
        let a = FunctionType { parameters: params_a, results: ResultType::new(results_a) };

        let mut params_b = Vec::new_in(Global);
        params_b.push(ValType::I32);
        let mut results_b = Vec::new_in(Global);
        results_b.push(ValType::I64);
        let b = FunctionType { parameters: params_b, results: ResultType::new(results_b) };

        assert!(function_type_eq(&a, &b));

        let mut params_c = Vec::new_in(Global);
        params_c.push(ValType::F32);
        let c = FunctionType { parameters: params_c, results: ResultType::new(Vec::new_in(Global)) };
        assert!(!function_type_eq(&a, &c));
    }
}

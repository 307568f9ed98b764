// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The host-function bridge: the contract by which embedder-provided
//! functions are invoked from Wasm code.
//!
//! A host function never touches the interpreter's value/label/frame stacks
//! directly. It receives its arguments as a plain `&[Value]` slice, writes its
//! results into a `&mut [Value]` slice of the declared result arity, and may
//! reach back into the calling instance's linear memory through the
//! [`Caller`] handle it's given. This mirrors the uniform boundary a real
//! embedder draws between Wasm and native code: the bridge is the only place
//! where the two type systems meet.
//!
//! Host functions are represented as plain function pointers plus an opaque
//! `userdata` word rather than as a boxed trait object. The interpreter never
//! needs to allocate to invoke one, and a fn-pointer vtable is easier to
//! reason about soundness-wise than a hand-rolled unsized coercion would be.

use crate::core_compat::boxed::Box;
use crate::core_compat::vec::Vec;
use crate::instantiate::{MemAddr, ModuleInstance};
use crate::interpret::{Trap, Value};
use crate::store::Store;
use crate::types::{FunctionType, GlobalType, MemType, TableType};
use crate::Allocator;

/// A handle given to a host function body, granting it access back into the
/// store on whose behalf it's being called, scoped to the instance that
/// performed the call.
pub struct Caller<'a, A: Allocator> {
    store: &'a mut Store<A>,
    instance: ModuleInstance,
}

impl<'a, A: Allocator> Caller<'a, A> {
    pub(crate) fn new(store: &'a mut Store<A>, instance: ModuleInstance) -> Self {
        Self { store, instance }
    }

    /// Returns a mutable view of the calling instance's `idx`-th memory, or
    /// `None` if it declares no such memory.
    pub fn memory_mut(&mut self, idx: u32) -> Option<&mut [u8]> {
        let addr = self.store.module_memory(self.instance, idx)?;
        Some(self.store.memory_mut(addr).bytes_mut())
    }

    /// Returns the store address of the calling instance's `idx`-th memory,
    /// for embedders that want to retain it beyond the lifetime of this call.
    pub fn memory_addr(&self, idx: u32) -> Option<MemAddr> {
        self.store.module_memory(self.instance, idx)
    }

    /// Returns a reference to the store this call is executing against.
    pub fn store(&self) -> &Store<A> {
        self.store
    }

    /// Returns a mutable reference to the store this call is executing
    /// against.
    pub fn store_mut(&mut self) -> &mut Store<A> {
        self.store
    }
}

/// The result of a failed host-function call.
#[derive(Clone, Copy, Debug)]
pub enum HostError {
    /// The host body wants to trap execution, without a more specific cause.
    Trap,
    /// The host body observed an out-of-bounds memory access.
    MemoryAccessOutOfBounds,
    /// The host body ran out of its own resource budget.
    ResourceExhausted,
}

impl From<HostError> for Trap {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Trap => Trap::HostTrap,
            HostError::MemoryAccessOutOfBounds => Trap::MemoryAccessOutOfBounds,
            HostError::ResourceExhausted => Trap::CostLimitExceeded,
        }
    }
}

/// The signature every host function body implements: read `params`, write
/// `results` (already sized to the declared result arity), and use `caller`
/// to reach the calling instance's memory if needed.
pub type HostFn<A> =
    fn(caller: Caller<'_, A>, params: &[Value], results: &mut [Value], userdata: usize) -> Result<(), HostError>;

/// A single host-provided function, along with the signature it presents to
/// importing modules.
pub struct HostFunction<A: Allocator> {
    pub(crate) name: Box<str, A>,
    pub(crate) ty: FunctionType<A>,
    pub(crate) func: HostFn<A>,
    pub(crate) userdata: usize,
}

impl<A: Allocator> HostFunction<A> {
    /// Creates a new host function with the given name, signature, and body.
    /// `userdata` is an opaque word passed back to `func` on every call,
    /// letting a single fn pointer serve many logically distinct functions.
    pub fn new(name: Box<str, A>, ty: FunctionType<A>, func: HostFn<A>, userdata: usize) -> Self {
        Self {
            name,
            ty,
            func,
            userdata,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &FunctionType<A> {
        &self.ty
    }
}

/// A host-provided global, presented to importing modules under a name and
/// an initial value.
pub struct HostGlobal {
    pub(crate) name_idx: u32,
    pub(crate) ty: GlobalType,
    pub(crate) value: Value,
}

/// A host-provided table, presented to importing modules empty (all-null)
/// and sized per `ty`.
pub struct HostTable {
    pub(crate) name_idx: u32,
    pub(crate) ty: TableType,
}

/// A host-provided memory, presented to importing modules zero-initialized
/// and sized per `ty`.
pub struct HostMemory {
    pub(crate) name_idx: u32,
    pub(crate) ty: MemType,
}

/// A named collection of host-provided functions, globals, tables, and
/// memories, registered with a [`Store`] so that importing modules can
/// resolve against it by module name.
///
/// Built incrementally with the `with_*` methods, each of which records the
/// export under a name of the caller's choosing.
pub struct HostModule<A: Allocator> {
    pub(crate) name: Box<str, A>,
    pub(crate) functions: Vec<HostFunction<A>, A>,
    pub(crate) names: Vec<Box<str, A>, A>,
    pub(crate) globals: Vec<HostGlobal, A>,
    pub(crate) tables: Vec<HostTable, A>,
    pub(crate) memories: Vec<HostMemory, A>,
}

impl<A: Allocator + Clone> HostModule<A> {
    /// Creates an empty host module under the given name.
    pub fn new(name: Box<str, A>, alloc: A) -> Self {
        Self {
            name,
            functions: Vec::new_in(alloc.clone()),
            names: Vec::new_in(alloc.clone()),
            globals: Vec::new_in(alloc.clone()),
            tables: Vec::new_in(alloc.clone()),
            memories: Vec::new_in(alloc),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a function export.
    pub fn with_function(mut self, function: HostFunction<A>) -> Self {
        self.functions.push(function);
        self
    }

    /// Adds a global export under `field`, with the given type and initial
    /// value.
    pub fn with_global(mut self, field: Box<str, A>, ty: GlobalType, value: Value) -> Self {
        let name_idx = self.names.len() as u32;
        self.names.push(field);
        self.globals.push(HostGlobal { name_idx, ty, value });
        self
    }

    /// Adds a table export under `field`, with the given type. The table
    /// begins all-null, as if newly allocated.
    pub fn with_table(mut self, field: Box<str, A>, ty: TableType) -> Self {
        let name_idx = self.names.len() as u32;
        self.names.push(field);
        self.tables.push(HostTable { name_idx, ty });
        self
    }

    /// Adds a memory export under `field`, with the given type. The memory
    /// begins zero-initialized, as if newly allocated.
    pub fn with_memory(mut self, field: Box<str, A>, ty: MemType) -> Self {
        let name_idx = self.names.len() as u32;
        self.names.push(field);
        self.memories.push(HostMemory { name_idx, ty });
        self
    }

    pub(crate) fn find_function(&self, field: &str) -> Option<&HostFunction<A>> {
        self.functions.iter().find(|f| f.name() == field)
    }

    pub(crate) fn find_global(&self, field: &str) -> Option<&HostGlobal> {
        self.globals
            .iter()
            .find(|g| self.names[g.name_idx as usize].as_ref() == field)
    }

    pub(crate) fn find_table(&self, field: &str) -> Option<&HostTable> {
        self.tables
            .iter()
            .find(|t| self.names[t.name_idx as usize].as_ref() == field)
    }

    pub(crate) fn find_memory(&self, field: &str) -> Option<&HostMemory> {
        self.memories
            .iter()
            .find(|m| self.names[m.name_idx as usize].as_ref() == field)
    }
}

#[cfg(test)]
mod tests {
    use super::{Caller, HostError, HostFunction, HostModule};
    use crate::core_compat::alloc::Global;
    use crate::core_compat::boxed::Box;
    use crate::interpret::Value;
    use crate::types::{FunctionType, ResultType, ValType};

    fn add_one(
        _caller: Caller<'_, Global>,
        params: &[Value],
        results: &mut [Value],
        _userdata: usize,
    ) -> Result<(), HostError> {
        let Value::I32(n) = params[0] else {
            return Err(HostError::Trap);
        };
        results[0] = Value::I32(n + 1);
        Ok(())
    }

    #[test]
    fn builds_host_module_with_function() {
        let mut parameters = crate::core_compat::vec::Vec::new_in(Global);
        parameters.push(ValType::I32);
        let mut results = crate::core_compat::vec::Vec::new_in(Global);
        results.push(ValType::I32);
        let ty = FunctionType {
            parameters,
            results: ResultType::new(results),
        };
        let func = HostFunction::new(Box::<str, Global>::from("add_one"), ty, add_one, 0);
        let module = HostModule::new(Box::<str, Global>::from("env"), Global).with_function(func);
        assert_eq!(module.name(), "env");
        assert!(module.find_function("add_one").is_some());
        assert!(module.find_function("missing").is_none());
    }
}

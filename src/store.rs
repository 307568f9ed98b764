// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The runtime store: the owner of every piece of state that exists once a
//! module has been instantiated.
//!
//! Rather than the tree of raw pointers a native implementation might use,
//! every runtime object (function, table, memory, global, element segment,
//! data segment, tag, and module instance) lives in its own dense,
//! monotonically growing arena here, addressed by a small `Copy` index type
//! (`FuncAddr`, `TableAddr`, and so on, defined in [`crate::instantiate`]).
//! A [`ModuleInstance`] is itself just such an address, indexing into
//! `module_instances` below. This keeps every runtime value `'static` and
//! allocator-free to hold onto, at the cost of the arena never reclaiming
//! unreachable entries (matching a real embedder's store, which is normally
//! torn down as a whole rather than garbage-collected instance by instance).

use hashbrown::HashMap;

use crate::config::EngineConfig;
use crate::core_compat::boxed::Box;
use crate::core_compat::vec::Vec;
use crate::host::{HostFunction, HostModule};
use crate::instantiate::{DataAddr, ElemAddr, ExnAddr, FuncAddr, GcAddr, GlobalAddr, MemAddr, ModuleInstance, TableAddr, TagAddr};
use crate::interpret::compile::CompiledCode;
use crate::interpret::{Statistics, Value};
use crate::types::{FunctionType, GlobalType, MemType, SubType, TableType};
use crate::Allocator;

/// The body of a function instance: either defined within a Wasm module, or
/// bridged to a host function.
pub enum FunctionKind<A: Allocator> {
    /// A function defined by Wasm code, owned by `owner`.
    Local {
        /// The instance whose tables/memories/globals this function's code
        /// resolves against when it executes.
        owner: ModuleInstance,
        /// This function's declared locals (beyond its parameters), each a
        /// zero-valued placeholder of its declared type.
        locals: Vec<Value, A>,
        /// The function's body, already compiled into an executable
        /// instruction sequence with every branch target resolved.
        code: CompiledCode<A>,
    },
    /// A function bridged to the embedder.
    Host(HostFunction<A>),
}

/// A callable function, with its public signature and its (local or host)
/// implementation.
pub struct FunctionInstance<A: Allocator> {
    pub ty: FunctionType<A>,
    pub kind: FunctionKind<A>,
}

/// A table instance: a resizeable array of reference values.
pub struct TableInstance<A: Allocator> {
    pub ty: TableType,
    pub(crate) elements: Vec<Value, A>,
}

impl<A: Allocator> TableInstance<A> {
    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn ty(&self) -> TableType {
        self.ty
    }
}

/// A linear memory instance: a resizeable, byte-addressable array.
pub struct MemoryInstance<A: Allocator> {
    pub ty: MemType,
    pub(crate) bytes: Vec<u8, A>,
}

impl<A: Allocator> MemoryInstance<A> {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn size_pages(&self) -> u32 {
        (self.bytes.len() / crate::types::MemType::PAGE_SIZE) as u32
    }

    /// Grows the memory by `delta` pages, clamped by both its own declared
    /// maximum and the engine-wide `max_memory_pages` ceiling. Returns the
    /// previous size in pages, or `None` if the growth couldn't be
    /// performed (mirroring `memory.grow`'s `-1` sentinel).
    pub(crate) fn grow(&mut self, delta: u32, config: &EngineConfig) -> Option<u32> {
        let old_pages = self.size_pages();
        let new_pages = old_pages.checked_add(delta)?;
        let ceiling = self.ty.max.unwrap_or(config.max_memory_pages).min(config.max_memory_pages);
        if new_pages > ceiling {
            return None;
        }
        let new_len = (new_pages as usize).checked_mul(crate::types::MemType::PAGE_SIZE)?;
        self.bytes.try_reserve(new_len.saturating_sub(self.bytes.len())).ok()?;
        self.bytes.resize(new_len, 0);
        Some(old_pages)
    }
}

/// A global variable instance.
pub struct GlobalInstance {
    pub ty: GlobalType,
    pub(crate) value: Value,
}

/// An element segment instance. `elem.drop` (and a fully-consumed active
/// segment) empties `values`, which naturally makes any subsequent
/// `table.init` against it trap on the resulting out-of-bounds read.
pub struct ElementInstance<A: Allocator> {
    pub(crate) values: Vec<Value, A>,
}

/// A data segment instance, with the same drop discipline as
/// [`ElementInstance`].
pub struct DataInstance<A: Allocator> {
    pub(crate) bytes: Vec<u8, A>,
}

/// A tag instance (an exception signature), per the exception-handling
/// proposal.
pub struct TagInstance<A: Allocator> {
    pub ty: FunctionType<A>,
}

/// A garbage-collected heap object, per the GC proposal: either a struct or
/// an array, each a flat run of [`Value`]s.
pub enum GcObject<A: Allocator> {
    Struct(Vec<Value, A>),
    Array(Vec<Value, A>),
}

/// A live exception instance: a caught (or about-to-be-rethrown) tag
/// together with the payload values it was raised with. This is the
/// referent an `exnref` value (`Value::ExnRef`) points at, materialized by
/// `catch_ref`/`catch_all_ref` and consumed by `throw_ref`.
pub struct ExceptionInstance<A: Allocator> {
    pub(crate) tag: TagAddr,
    pub(crate) payload: Vec<Value, A>,
}

// Translates a module-relative index for one entity kind into its absolute
// store address, given the instance's per-kind address tables.
pub(crate) struct ModuleInstanceData<A: Allocator> {
    pub(crate) funcs: Vec<FuncAddr, A>,
    pub(crate) tables: Vec<TableAddr, A>,
    pub(crate) memories: Vec<MemAddr, A>,
    pub(crate) globals: Vec<GlobalAddr, A>,
    pub(crate) elements: Vec<ElemAddr, A>,
    pub(crate) datas: Vec<DataAddr, A>,
    pub(crate) tags: Vec<TagAddr, A>,
    /// A copy of the defining module's type section, kept around so that
    /// `call_indirect` signature checks and GC type lookups can resolve a
    /// type index against the instance that's actually executing, long
    /// after the originating `Module` has been dropped.
    pub(crate) types: Vec<SubType<A>, A>,
    pub(crate) exports: Vec<(Box<str, A>, crate::instantiate::ExportValue), A>,
}

/// The runtime store: owns every instance allocated across every module
/// instantiated against it, plus the host modules registered for import
/// resolution.
pub struct Store<A: Allocator> {
    alloc: A,
    pub(crate) config: EngineConfig,

    pub(crate) functions: Vec<FunctionInstance<A>, A>,
    pub(crate) tables: Vec<TableInstance<A>, A>,
    pub(crate) memories: Vec<MemoryInstance<A>, A>,
    pub(crate) globals: Vec<GlobalInstance, A>,
    pub(crate) elements: Vec<ElementInstance<A>, A>,
    pub(crate) datas: Vec<DataInstance<A>, A>,
    pub(crate) tags: Vec<TagInstance<A>, A>,
    pub(crate) gc_objects: Vec<GcObject<A>, A>,
    pub(crate) exceptions: Vec<ExceptionInstance<A>, A>,

    pub(crate) module_instances: Vec<ModuleInstanceData<A>, A>,
    module_names: HashMap<Box<str, A>, ModuleInstance>,
    host_modules: HashMap<Box<str, A>, HostModule<A>>,

    last_statistics: Statistics,
}

impl<A: Allocator + Clone> Store<A> {
    /// Creates an empty store governed by `config`, using `alloc` for every
    /// allocation performed on behalf of instances it comes to own.
    pub fn new(config: EngineConfig, alloc: A) -> Self {
        Self {
            alloc: alloc.clone(),
            functions: Vec::new_in(alloc.clone()),
            tables: Vec::new_in(alloc.clone()),
            memories: Vec::new_in(alloc.clone()),
            globals: Vec::new_in(alloc.clone()),
            elements: Vec::new_in(alloc.clone()),
            datas: Vec::new_in(alloc.clone()),
            tags: Vec::new_in(alloc.clone()),
            gc_objects: Vec::new_in(alloc.clone()),
            exceptions: Vec::new_in(alloc.clone()),
            module_instances: Vec::new_in(alloc.clone()),
            module_names: HashMap::new(),
            host_modules: HashMap::new(),
            last_statistics: Statistics::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    pub fn statistics(&self) -> &Statistics {
        &self.last_statistics
    }

    pub(crate) fn set_statistics(&mut self, stats: Statistics) {
        self.last_statistics = stats;
    }

    /// Registers a host module's exports for later import resolution,
    /// keyed by the name under which importing modules will reference it.
    pub fn register_host_module(&mut self, host: HostModule<A>) {
        let name: Box<str, A> = Box::from(host.name());
        // Re-box under the registry's own allocator-agnostic key copy: the
        // registry owns its keys independently of any particular `A`.
        let name = Box::<str, A>::from(&*name);
        self.host_modules.insert(name, host);
    }

    pub(crate) fn host_module(&self, name: &str) -> Option<&HostModule<A>> {
        self.host_modules.get(name)
    }

    /// Registers a module instance under a name so that later-instantiated
    /// modules may import from it.
    pub(crate) fn register_module_instance(&mut self, name: &str, instance: ModuleInstance) {
        let name: Box<str, A> = Box::<str, A>::from(name);
        self.module_names.insert(name, instance);
    }

    pub(crate) fn named_module_instance(&self, name: &str) -> Option<ModuleInstance> {
        self.module_names.get(name).copied()
    }

    pub(crate) fn push_function(&mut self, instance: FunctionInstance<A>) -> FuncAddr {
        let addr = FuncAddr::new(self.functions.len() as u32);
        self.functions.push(instance);
        addr
    }

    pub(crate) fn push_table(&mut self, instance: TableInstance<A>) -> TableAddr {
        let addr = TableAddr::new(self.tables.len() as u32);
        self.tables.push(instance);
        addr
    }

    pub(crate) fn push_memory(&mut self, instance: MemoryInstance<A>) -> MemAddr {
        let addr = MemAddr::new(self.memories.len() as u32);
        self.memories.push(instance);
        addr
    }

    pub(crate) fn push_global(&mut self, instance: GlobalInstance) -> GlobalAddr {
        let addr = GlobalAddr::new(self.globals.len() as u32);
        self.globals.push(instance);
        addr
    }

    pub(crate) fn push_element(&mut self, instance: ElementInstance<A>) -> ElemAddr {
        let addr = ElemAddr::new(self.elements.len() as u32);
        self.elements.push(instance);
        addr
    }

    pub(crate) fn push_data(&mut self, instance: DataInstance<A>) -> DataAddr {
        let addr = DataAddr::new(self.datas.len() as u32);
        self.datas.push(instance);
        addr
    }

    pub(crate) fn push_tag(&mut self, instance: TagInstance<A>) -> TagAddr {
        let addr = TagAddr::new(self.tags.len() as u32);
        self.tags.push(instance);
        addr
    }

    pub(crate) fn push_gc_object(&mut self, object: GcObject<A>) -> GcAddr {
        let addr = GcAddr::new(self.gc_objects.len() as u32);
        self.gc_objects.push(object);
        addr
    }

    pub(crate) fn push_exception(&mut self, instance: ExceptionInstance<A>) -> ExnAddr {
        let addr = ExnAddr::new(self.exceptions.len() as u32);
        self.exceptions.push(instance);
        addr
    }

    pub(crate) fn exception(&self, addr: ExnAddr) -> &ExceptionInstance<A> {
        &self.exceptions[*addr as usize]
    }

    pub(crate) fn push_module_instance(&mut self, data: ModuleInstanceData<A>) -> ModuleInstance {
        let instance = ModuleInstance::new(self.module_instances.len() as u32);
        self.module_instances.push(data);
        instance
    }

    pub fn function(&self, addr: FuncAddr) -> &FunctionInstance<A> {
        &self.functions[*addr as usize]
    }

    pub(crate) fn function_mut(&mut self, addr: FuncAddr) -> &mut FunctionInstance<A> {
        &mut self.functions[*addr as usize]
    }

    pub fn table(&self, addr: TableAddr) -> &TableInstance<A> {
        &self.tables[*addr as usize]
    }

    pub(crate) fn table_mut(&mut self, addr: TableAddr) -> &mut TableInstance<A> {
        &mut self.tables[*addr as usize]
    }

    pub fn memory(&self, addr: MemAddr) -> &MemoryInstance<A> {
        &self.memories[*addr as usize]
    }

    pub fn memory_mut(&mut self, addr: MemAddr) -> &mut MemoryInstance<A> {
        &mut self.memories[*addr as usize]
    }

    pub fn global(&self, addr: GlobalAddr) -> &GlobalInstance {
        &self.globals[*addr as usize]
    }

    pub(crate) fn global_mut(&mut self, addr: GlobalAddr) -> &mut GlobalInstance {
        &mut self.globals[*addr as usize]
    }

    pub(crate) fn element(&self, addr: ElemAddr) -> &ElementInstance<A> {
        &self.elements[*addr as usize]
    }

    pub(crate) fn element_mut(&mut self, addr: ElemAddr) -> &mut ElementInstance<A> {
        &mut self.elements[*addr as usize]
    }

    pub(crate) fn data(&self, addr: DataAddr) -> &DataInstance<A> {
        &self.datas[*addr as usize]
    }

    pub(crate) fn data_mut(&mut self, addr: DataAddr) -> &mut DataInstance<A> {
        &mut self.datas[*addr as usize]
    }

    pub(crate) fn tag(&self, addr: TagAddr) -> &TagInstance<A> {
        &self.tags[*addr as usize]
    }

    pub(crate) fn gc_object(&self, addr: GcAddr) -> &GcObject<A> {
        &self.gc_objects[*addr as usize]
    }

    pub(crate) fn gc_object_mut(&mut self, addr: GcAddr) -> &mut GcObject<A> {
        &mut self.gc_objects[*addr as usize]
    }

    pub(crate) fn instance_data(&self, instance: ModuleInstance) -> &ModuleInstanceData<A> {
        &self.module_instances[*instance as usize]
    }

    pub(crate) fn instance_data_mut(&mut self, instance: ModuleInstance) -> &mut ModuleInstanceData<A> {
        &mut self.module_instances[*instance as usize]
    }

    pub(crate) fn module_func(&self, instance: ModuleInstance, idx: u32) -> Option<FuncAddr> {
        self.instance_data(instance).funcs.get(idx as usize).copied()
    }

    pub(crate) fn module_table(&self, instance: ModuleInstance, idx: u32) -> Option<TableAddr> {
        self.instance_data(instance).tables.get(idx as usize).copied()
    }

    /// Returns the store address of an instance's `idx`-th memory, for use
    /// by the host-function bridge.
    pub fn module_memory(&self, instance: ModuleInstance, idx: u32) -> Option<MemAddr> {
        self.instance_data(instance).memories.get(idx as usize).copied()
    }

    pub(crate) fn module_global(&self, instance: ModuleInstance, idx: u32) -> Option<GlobalAddr> {
        self.instance_data(instance).globals.get(idx as usize).copied()
    }

    pub(crate) fn module_element(&self, instance: ModuleInstance, idx: u32) -> Option<ElemAddr> {
        self.instance_data(instance).elements.get(idx as usize).copied()
    }

    pub(crate) fn module_data(&self, instance: ModuleInstance, idx: u32) -> Option<DataAddr> {
        self.instance_data(instance).datas.get(idx as usize).copied()
    }

    pub(crate) fn module_tag(&self, instance: ModuleInstance, idx: u32) -> Option<TagAddr> {
        self.instance_data(instance).tags.get(idx as usize).copied()
    }

    /// Looks up an export by name on a module instance, for the embedder to
    /// find a function/global/table/memory to drive after instantiation.
    pub fn export(&self, instance: ModuleInstance, name: &str) -> Option<crate::instantiate::ExportValue> {
        self.instance_data(instance)
            .exports
            .iter()
            .find(|(field, _)| field.as_ref() == name)
            .map(|(_, value)| *value)
    }
}

#[cfg(test)]
mod tests {
    use super::{GlobalInstance, MemoryInstance, Store};
    use crate::config::EngineConfig;
    use crate::core_compat::alloc::Global;
    use crate::core_compat::vec::Vec;
    use crate::interpret::Value;
    use crate::types::{GlobalType, GlobalTypeMutability, MemType, ValType};

    #[test]
    fn push_and_get_memory() {
        let mut store = Store::new(EngineConfig::default(), Global);
        let mut bytes = Vec::new_in(Global);
        bytes.resize(MemType::PAGE_SIZE, 0);
        let ty = MemType::new(crate::types::Limits {
            min: 1,
            max: None,
            shared: false,
        });
        let addr = store.push_memory(MemoryInstance { ty, bytes });
        assert_eq!(store.memory(addr).size_pages(), 1);
    }

    #[test]
    fn memory_grow_respects_ceiling() {
        let mut store = Store::new(EngineConfig::default(), Global);
        let mut bytes = Vec::new_in(Global);
        bytes.resize(MemType::PAGE_SIZE, 0);
        let ty = MemType::new(crate::types::Limits {
            min: 1,
            max: Some(2),
            shared: false,
        });
        let addr = store.push_memory(MemoryInstance { ty, bytes });
        let config = store.config.clone();
        assert_eq!(store.memory_mut(addr).grow(1, &config), Some(1));
        assert_eq!(store.memory_mut(addr).grow(1, &config), None);
    }

    #[test]
    fn push_and_get_global() {
        let mut store = Store::new(EngineConfig::default(), Global);
        let ty = GlobalType {
            value: ValType::I32,
            mutability: GlobalTypeMutability::Var,
        };
        let addr = store.push_global(GlobalInstance {
            ty,
            value: Value::I32(42),
        });
        assert_eq!(store.global(addr).value, Value::I32(42));
    }
}

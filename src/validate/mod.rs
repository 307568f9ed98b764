// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Structural validation of a decoded module.
//!
//! Validation here is index- and structure-based: every section reference
//! (type, function, table, memory, global, tag, data, element index) is
//! checked against the relevant section's size, every branch and `delegate`
//! target is checked against its enclosing structured control nesting, and a
//! handful of whole-module invariants (export-name uniqueness, the
//! data-count section agreeing with the data section, and so on) are
//! checked directly. It does not track the value-type stack through a
//! function body: operand and result type mismatches are instead caught as
//! traps by the interpreter at execution time, the same way out-of-bounds
//! memory and table accesses already are. An engine that needs to reject
//! bad modules before ever executing them would need a real type-stack
//! checker in [`expr::validate_expression`]; this crate accepts the
//! narrower guarantee in exchange for a much simpler validator.

mod expr;
mod validate_impls;

use crate::types::{FuncIdx, FunctionType, ImportDescriptor, Limits, SectionId, TagIdx, TypeIdx};
use crate::{Allocator, Module};

pub(crate) use expr::{ExpressionValidationContext, validate_expression};

/// Represents errors that can arise during module validation.
#[derive(Clone, Copy, Debug)]
pub enum Error {
    DataCountMismatch {
        expected: usize,
        actual: usize,
    },
    DuplicateExportName {
        exportsec_idx: u32,
    },
    FunctionAndCodeSectionMismatch {
        funcsec_size: u32,
        codesec_size: u32,
    },
    IndexOutOfBounds {
        id: SectionId,
        index: u32,
        capacity: u32,
    },
    ExpectedFunctionType {
        typeidx: TypeIdx,
    },
    InvalidMemType(Limits),
    InvalidStartFunction(FuncIdx),
    InvalidTableLimits(Limits),
    InvalidBranchTarget {
        label: u32,
        depth: u32,
    },
    InvalidLocalIndex {
        index: u32,
        count: u32,
    },
    UnbalancedControlFlow,
    ControlDepthExceeded,
    IllegalConstantExpression,
}

// Called at the end of Module::decode() to reorder the import and export
// sections in a way convenient for validation:
// * imports are *stably* reordered by type, since logical grouping makes for
//   O(1) access by funcidx/tableidx/memidx/globalidx, easier determination of
//   the number of imports by type, and easier separaton later on.
// * exports are reordered by field name, making it easier to determine whether
//   they are all unique.
pub(crate) fn prepare_module_for_validation<A: Allocator>(module: &mut Module<A>) {
    module
        .importsec
        .0
        .sort_by_key(|import| import.descriptor.discriminant());
    module
        .exportsec
        .0
        .sort_by(|a, b| a.field.as_ref().cmp(b.field.as_ref()));
}

pub(crate) struct Validator<'module, A: Allocator> {
    module: &'module Module<A>,

    // The exclusive ending index within the import section of the functions, or
    // `import_tableidx_end` if there are none.
    import_funcidx_end: usize,

    // The exclusive ending index within the import section of the tables, or
    // `import_memidx_end` if there are none.
    import_tableidx_end: usize,

    // The exclusive ending index within the import section of the memories, or
    // `import_globalidx_end` if there are none.
    import_memidx_end: usize,

    // The exclusive ending index within the import section of the globals, or
    // the end index of the whole section if there are no tag imports.
    import_globalidx_end: usize,
}

impl<'module, A: Allocator> Validator<'module, A> {
    fn new(module: &'module Module<A>) -> Self {
        // Recall that the import section was stably sorted by kind in
        // prepare_module_for_validation(), per ImportDescriptor::discriminant()'s
        // Function < Table < Memory < Global < Tag order.
        let mut import_tableidx_start = None;
        let mut import_memidx_start = None;
        let mut import_globalidx_start = None;
        let mut import_tagidx_start = None;
        for (idx, import) in module.importsec.iter().enumerate() {
            match import.descriptor {
                ImportDescriptor::Function(_) => {}
                ImportDescriptor::Table(_) => {
                    if import_tableidx_start.is_none() {
                        import_tableidx_start = Some(idx);
                    }
                }
                ImportDescriptor::Memory(_) => {
                    if import_memidx_start.is_none() {
                        import_memidx_start = Some(idx);
                    }
                }
                ImportDescriptor::Global(_) => {
                    if import_globalidx_start.is_none() {
                        import_globalidx_start = Some(idx);
                    }
                }
                ImportDescriptor::Tag(_) => {
                    import_tagidx_start = Some(idx);
                    break;
                }
            }
        }

        let import_globalidx_end = import_tagidx_start.unwrap_or(module.importsec.len());
        let import_memidx_end = import_globalidx_start.unwrap_or(import_globalidx_end);
        let import_tableidx_end = import_memidx_start.unwrap_or(import_memidx_end);
        let import_funcidx_end = import_tableidx_start.unwrap_or(import_tableidx_end);
        Self {
            module,
            import_funcidx_end,
            import_tableidx_end,
            import_memidx_end,
            import_globalidx_end,
        }
    }

    fn data_count(&self) -> usize {
        self.module.datasec.len()
    }

    fn element_count(&self) -> usize {
        self.module.elemsec.len()
    }

    fn function_count(&self) -> usize {
        self.module.funcsec.len() + self.import_funcidx_end
    }

    fn global_count(&self) -> usize {
        self.module.globalsec.len() + (self.import_globalidx_end - self.import_memidx_end)
    }

    // The number of *imported* globals: the only ones a constant expression
    // is permitted to reference via global.get.
    fn imported_global_count(&self) -> usize {
        self.import_globalidx_end - self.import_memidx_end
    }

    fn memory_count(&self) -> usize {
        self.module.memsec.len() + (self.import_memidx_end - self.import_tableidx_end)
    }

    fn table_count(&self) -> usize {
        self.module.tablesec.len() + (self.import_tableidx_end - self.import_funcidx_end)
    }

    fn tag_count(&self) -> usize {
        self.module.tagsec.len() + (self.module.importsec.len() - self.import_globalidx_end)
    }

    fn type_count(&self) -> usize {
        self.module.typesec.len()
    }

    fn function_type(&self, typeidx: TypeIdx) -> Result<&'module FunctionType<A>, Error> {
        self.module.typesec[*typeidx as usize]
            .as_function_type()
            .ok_or(Error::ExpectedFunctionType { typeidx })
    }

    fn tag_type(&self, tagidx: TagIdx) -> Result<&'module FunctionType<A>, Error> {
        let idx = *tagidx as usize;
        let num_tag_imports = self.module.importsec.len() - self.import_globalidx_end;
        let typeidx = if idx < num_tag_imports {
            let import = &self.module.importsec[self.import_globalidx_end + idx];
            let ImportDescriptor::Tag(tag) = &import.descriptor else {
                unreachable!();
            };
            tag.ty
        } else {
            let idx = idx - num_tag_imports;
            debug_assert!(idx < self.module.tagsec.len());
            self.module.tagsec[idx].ty
        };
        self.function_type(typeidx)
    }

    fn function_signature(&self, funcidx: FuncIdx) -> Result<&'module FunctionType<A>, Error> {
        let idx = *funcidx as usize;
        let typeidx = if idx < self.import_funcidx_end {
            let import = &self.module.importsec[idx];
            let ImportDescriptor::Function(typeidx) = &import.descriptor else {
                unreachable!();
            };
            *typeidx
        } else {
            let idx = idx - self.import_funcidx_end;
            debug_assert!(idx < self.module.funcsec.len());
            self.module.funcsec[idx]
        };
        self.function_type(typeidx)
    }

    fn validate<T: Validate<A>>(&mut self, value: &T) -> Result<(), Error> {
        value.validate(self)
    }
}

trait Validate<A: Allocator> {
    fn validate(&self, validator: &mut Validator<A>) -> Result<(), Error>;
}

pub(crate) fn validate_module<A: Allocator>(module: &Module<A>) -> Result<(), Error> {
    let mut validator = Validator::new(module);

    // The type section is always valid.
    validator.validate(&module.importsec)?;
    validator.validate(&module.funcsec)?;
    validator.validate(&module.tablesec)?;
    validator.validate(&module.memsec)?;
    validator.validate(&module.globalsec)?;
    validator.validate(&module.exportsec)?;
    if let Some(startsec) = &module.startsec {
        validator.validate(startsec)?;
    }
    validator.validate(&module.elemsec)?;
    validator.validate(&module.codesec)?;
    validator.validate(&module.datasec)?;

    if let Some(count) = module.datacountsec
        && (count as usize) != module.datasec.len()
    {
        return Err(Error::DataCountMismatch {
            expected: count as usize,
            actual: module.datasec.len(),
        });
    }

    Ok(())
}

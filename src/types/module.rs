use crate::types::{cell_num_of, UntypedValue, ValueType};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// A function signature with pre-computed cell accounting.
///
/// A 64-bit value occupies two operand stack cells but one logical
/// slot, so cell counts and value counts are tracked separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
    pub param_cell_num: u32,
    pub ret_cell_num: u32,
}

impl FuncType {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        let param_cell_num = cell_num_of(&params);
        let ret_cell_num = cell_num_of(&results);
        Self {
            params,
            results,
            param_cell_num,
            ret_cell_num,
        }
    }

    pub fn param_count(&self) -> u32 {
        self.params.len() as u32
    }

    pub fn result_count(&self) -> u32 {
        self.results.len() as u32
    }
}

/// The body of a defined (bytecode) function together with the bounds
/// the loader computed for it during validation.
#[derive(Debug, Clone)]
pub struct CodeBody {
    /// Raw function body bytecode. The final opcode is the function's
    /// closing `end`.
    pub code: Arc<[u8]>,
    /// Declared locals beyond the parameters.
    pub local_types: Vec<ValueType>,
    /// Cell offset of every local (parameters first) inside the frame's
    /// locals area.
    pub local_offsets: Vec<u32>,
    /// Flattened parameter-then-local types, index-aligned with
    /// `local_offsets`.
    pub local_types_flat: Vec<ValueType>,
    /// Operand stack high-water mark in cells, computed by the loader.
    pub max_stack_cell_num: u32,
    /// Control stack high-water mark, computed by the loader.
    pub max_block_num: u32,
}

#[derive(Debug, Clone)]
pub enum FunctionKind {
    /// An imported function resolved at instantiation time.
    Import {
        module_name: alloc::string::String,
        field_name: alloc::string::String,
    },
    Bytecode(CodeBody),
}

/// One entry of the module's function index space, imports first.
#[derive(Debug, Clone)]
pub struct Function {
    pub type_idx: u32,
    pub param_cell_num: u32,
    pub local_cell_num: u32,
    pub ret_cell_num: u32,
    pub param_count: u32,
    pub local_count: u32,
    pub result_count: u32,
    pub kind: FunctionKind,
}

impl Function {
    pub fn is_import(&self) -> bool {
        matches!(self.kind, FunctionKind::Import { .. })
    }

    pub fn code_body(&self) -> Option<&CodeBody> {
        match &self.kind {
            FunctionKind::Bytecode(body) => Some(body),
            FunctionKind::Import { .. } => None,
        }
    }

    /// Total cells of the frame's locals area.
    pub fn local_area_cells(&self) -> u32 {
        self.param_cell_num + self.local_cell_num
    }
}

#[derive(Debug, Clone)]
pub struct MemoryType {
    pub initial_pages: u32,
    pub max_pages: u32,
    pub shared: bool,
}

#[derive(Debug, Clone)]
pub struct TableType {
    pub initial_size: u32,
    pub max_size: u32,
}

#[derive(Debug, Clone)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub is_mutable: bool,
    pub init: UntypedValue,
    /// `Some((module_name, field_name))` when the global is imported and
    /// resolved against an upstream instance at instantiation time.
    pub import: Option<(alloc::string::String, alloc::string::String)>,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub data: Vec<u8>,
    /// Active segments are copied into memory at instantiation; passive
    /// segments are only visible through `memory.init`.
    pub active_offset: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub func_indexes: Vec<u32>,
    pub active: Option<(u32, u32)>,
}

/// An immutable, validated module as handed over by the loader.
///
/// The loader (external to this crate) is responsible for validation
/// and for the per-function `max_stack_cell_num` / `max_block_num`
/// bounds the frame allocator relies on.
#[derive(Debug, Default)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub functions: Vec<Function>,
    pub memories: Vec<MemoryType>,
    pub tables: Vec<TableType>,
    pub globals: Vec<GlobalType>,
    pub data_segments: Vec<DataSegment>,
    pub element_segments: Vec<ElementSegment>,
}

impl Module {
    pub fn func(&self, func_idx: u32) -> Option<&Function> {
        self.functions.get(func_idx as usize)
    }

    pub fn func_type_of(&self, func_idx: u32) -> Option<&FuncType> {
        let func = self.func(func_idx)?;
        self.types.get(func.type_idx as usize)
    }
}

/// Builder used by embedders (and tests) standing in for the loader
/// handoff: it performs the same cell accounting the loader would.
#[derive(Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_type(&mut self, params: Vec<ValueType>, results: Vec<ValueType>) -> u32 {
        self.module.types.push(FuncType::new(params, results));
        (self.module.types.len() - 1) as u32
    }

    pub fn push_import_func(
        &mut self,
        type_idx: u32,
        module_name: &str,
        field_name: &str,
    ) -> u32 {
        let func = self.make_function(
            type_idx,
            &[],
            FunctionKind::Import {
                module_name: module_name.into(),
                field_name: field_name.into(),
            },
        );
        self.module.functions.push(func);
        (self.module.functions.len() - 1) as u32
    }

    /// Appends a bytecode function. `max_stack_cell_num` and
    /// `max_block_num` are the loader-computed bounds; they must be
    /// conservative for the supplied code.
    pub fn push_func(
        &mut self,
        type_idx: u32,
        local_types: Vec<ValueType>,
        code: Vec<u8>,
        max_stack_cell_num: u32,
        max_block_num: u32,
    ) -> u32 {
        let func_type = &self.module.types[type_idx as usize];
        let mut local_types_flat = func_type.params.clone();
        local_types_flat.extend_from_slice(&local_types);
        let mut local_offsets = Vec::with_capacity(local_types_flat.len());
        let mut offset = 0u32;
        for ty in &local_types_flat {
            local_offsets.push(offset);
            offset += ty.cell_num();
        }
        let body = CodeBody {
            code: code.into(),
            local_types,
            local_offsets,
            local_types_flat,
            max_stack_cell_num,
            max_block_num,
        };
        let body_local_types = body.local_types.clone();
        let func = self.make_function(type_idx, &body_local_types, FunctionKind::Bytecode(body));
        self.module.functions.push(func);
        (self.module.functions.len() - 1) as u32
    }

    pub fn push_memory(&mut self, initial_pages: u32, max_pages: u32, shared: bool) -> u32 {
        self.module.memories.push(MemoryType {
            initial_pages,
            max_pages,
            shared,
        });
        (self.module.memories.len() - 1) as u32
    }

    pub fn push_table(&mut self, initial_size: u32, max_size: u32) -> u32 {
        self.module.tables.push(TableType {
            initial_size,
            max_size,
        });
        (self.module.tables.len() - 1) as u32
    }

    pub fn push_global(&mut self, value_type: ValueType, is_mutable: bool, init: UntypedValue) -> u32 {
        self.module.globals.push(GlobalType {
            value_type,
            is_mutable,
            init,
            import: None,
        });
        (self.module.globals.len() - 1) as u32
    }

    pub fn push_data_segment(&mut self, data: Vec<u8>, active_offset: Option<u32>) -> u32 {
        self.module.data_segments.push(DataSegment {
            data,
            active_offset,
        });
        (self.module.data_segments.len() - 1) as u32
    }

    pub fn push_element_segment(
        &mut self,
        func_indexes: Vec<u32>,
        active: Option<(u32, u32)>,
    ) -> u32 {
        self.module.element_segments.push(ElementSegment {
            func_indexes,
            active,
        });
        (self.module.element_segments.len() - 1) as u32
    }

    pub fn finish(self) -> Arc<Module> {
        Arc::new(self.module)
    }

    fn make_function(
        &self,
        type_idx: u32,
        local_types: &[ValueType],
        kind: FunctionKind,
    ) -> Function {
        let func_type = &self.module.types[type_idx as usize];
        Function {
            type_idx,
            param_cell_num: func_type.param_cell_num,
            local_cell_num: cell_num_of(local_types),
            ret_cell_num: func_type.ret_cell_num,
            param_count: func_type.param_count(),
            local_count: local_types.len() as u32,
            result_count: func_type.result_count(),
            kind,
        }
    }
}

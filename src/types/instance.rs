use crate::types::{
    Module, TrapCode, UntypedValue, ValueType, N_MAX_DATA_SEGMENTS, N_MAX_ELEMENT_SEGMENTS,
};
use crate::vm::{LinearMemory, TableEntity};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitvec::prelude::BitArray;
use bitvec::{bitarr, mem::elts};
use hashbrown::HashMap;
use spin::{Mutex, RwLock};

type SegmentBits = BitArray<[usize; elts::<usize>(N_MAX_DATA_SEGMENTS)]>;
type ElementBits = BitArray<[usize; elts::<usize>(N_MAX_ELEMENT_SEGMENTS)]>;

/// A value imported from another instance, wired explicitly by the
/// embedder (the crate has no export-name resolution of its own).
#[derive(Clone)]
pub enum Extern {
    Func(Arc<ModuleInstance>, u32),
    Global(Arc<ModuleInstance>, u32),
}

/// Maps `(module_name, field_name)` import pairs to concrete externs.
#[derive(Default, Clone)]
pub struct ImportObject {
    map: HashMap<(String, String), Extern>,
}

impl ImportObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, module_name: &str, field_name: &str, value: Extern) {
        self.map
            .insert((module_name.into(), field_name.into()), value);
    }

    pub fn resolve(&self, module_name: &str, field_name: &str) -> Option<&Extern> {
        self.map
            .get(&(module_name.into(), field_name.into()))
    }
}

/// Where an imported function resolves to. Unresolved imports are
/// delegated to the executor's native handler; failure there surfaces
/// as the canonical unlinked-import trap.
#[derive(Clone)]
pub enum ImportFuncLink {
    Unresolved,
    Wasm { instance: Arc<ModuleInstance>, func_idx: u32 },
}

/// One entry of the global directory. The effective storage is either
/// the owning instance's flat buffer at `data_offset` or, for resolved
/// imports, the upstream instance's global.
pub struct GlobalEntity {
    pub value_type: ValueType,
    pub is_mutable: bool,
    pub data_offset: u32,
    pub import_link: Option<(Arc<ModuleInstance>, u32)>,
}

/// Flat global storage plus its directory.
pub struct GlobalStore {
    data: RwLock<Vec<u8>>,
    directory: Vec<GlobalEntity>,
}

impl GlobalStore {
    fn new(directory: Vec<GlobalEntity>, data_size: u32) -> Self {
        Self {
            data: RwLock::new(alloc::vec![0u8; data_size as usize]),
            directory,
        }
    }

    pub fn count(&self) -> u32 {
        self.directory.len() as u32
    }

    pub fn entity(&self, global_idx: u32) -> Option<&GlobalEntity> {
        self.directory.get(global_idx as usize)
    }

    pub fn get_32(&self, global_idx: u32) -> u32 {
        let entity = &self.directory[global_idx as usize];
        if let Some((upstream, idx)) = &entity.import_link {
            return upstream.globals.get_32(*idx);
        }
        let data = self.data.read();
        let offset = entity.data_offset as usize;
        u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
    }

    pub fn get_64(&self, global_idx: u32) -> u64 {
        let entity = &self.directory[global_idx as usize];
        if let Some((upstream, idx)) = &entity.import_link {
            return upstream.globals.get_64(*idx);
        }
        let data = self.data.read();
        let offset = entity.data_offset as usize;
        u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap())
    }

    pub fn set_32(&self, global_idx: u32, value: u32) {
        let entity = &self.directory[global_idx as usize];
        if let Some((upstream, idx)) = &entity.import_link {
            return upstream.globals.set_32(*idx, value);
        }
        let mut data = self.data.write();
        let offset = entity.data_offset as usize;
        data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_64(&self, global_idx: u32, value: u64) {
        let entity = &self.directory[global_idx as usize];
        if let Some((upstream, idx)) = &entity.import_link {
            return upstream.globals.set_64(*idx, value);
        }
        let mut data = self.data.write();
        let offset = entity.data_offset as usize;
        data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Raw value of a global as stored, 4 or 8 bytes wide by type.
    /// Used by the checkpoint engine.
    pub fn raw_value(&self, global_idx: u32) -> UntypedValue {
        let entity = &self.directory[global_idx as usize];
        if entity.value_type.is_64bit() {
            UntypedValue::from(self.get_64(global_idx))
        } else {
            UntypedValue::from(self.get_32(global_idx))
        }
    }

    pub fn restore_value(&self, global_idx: u32, value: UntypedValue) {
        let entity = &self.directory[global_idx as usize];
        if entity.value_type.is_64bit() {
            self.set_64(global_idx, value.as_u64());
        } else {
            self.set_32(global_idx, value.as_u32());
        }
    }
}

/// One instantiation of a [`Module`]: linear memories, tables, globals,
/// segment drop state and the exception buffer, shared between all
/// executors running in it.
pub struct ModuleInstance {
    pub module: Arc<Module>,
    pub memories: Vec<Arc<LinearMemory>>,
    pub tables: Vec<RwLock<TableEntity>>,
    pub globals: GlobalStore,
    pub import_func_links: Vec<ImportFuncLink>,
    dropped_data_segments: Mutex<SegmentBits>,
    dropped_element_segments: Mutex<ElementBits>,
    exception: Mutex<Option<String>>,
}

impl ModuleInstance {
    pub fn new(module: Arc<Module>) -> Result<Arc<Self>, TrapCode> {
        Self::with_imports(module, &ImportObject::default())
    }

    pub fn with_imports(
        module: Arc<Module>,
        imports: &ImportObject,
    ) -> Result<Arc<Self>, TrapCode> {
        let mut memories = Vec::with_capacity(module.memories.len());
        for mem_type in &module.memories {
            memories.push(Arc::new(LinearMemory::new(
                mem_type.initial_pages,
                mem_type.max_pages,
                mem_type.shared,
            )));
        }

        let mut tables = Vec::with_capacity(module.tables.len());
        for table_type in &module.tables {
            tables.push(RwLock::new(TableEntity::new(
                table_type.initial_size,
                table_type.max_size,
            )));
        }

        let mut directory = Vec::with_capacity(module.globals.len());
        let mut data_size = 0u32;
        for decl in &module.globals {
            let import_link = match &decl.import {
                Some((module_name, field_name)) => {
                    match imports.resolve(module_name, field_name) {
                        Some(Extern::Global(upstream, idx)) => Some((upstream.clone(), *idx)),
                        _ => return Err(TrapCode::UnlinkedImportFunction),
                    }
                }
                None => None,
            };
            let data_offset = data_size;
            if import_link.is_none() {
                data_size += if decl.value_type.is_64bit() { 8 } else { 4 };
            }
            directory.push(GlobalEntity {
                value_type: decl.value_type,
                is_mutable: decl.is_mutable,
                data_offset,
                import_link,
            });
        }
        let globals = GlobalStore::new(directory, data_size);
        for (idx, decl) in module.globals.iter().enumerate() {
            if decl.import.is_none() {
                globals.restore_value(idx as u32, decl.init);
            }
        }

        // Index-aligned with the function space; bytecode entries keep
        // the placeholder and are never consulted.
        let mut import_func_links = Vec::with_capacity(module.functions.len());
        for func in &module.functions {
            let link = match &func.kind {
                crate::types::FunctionKind::Import {
                    module_name,
                    field_name,
                } => match imports.resolve(module_name, field_name) {
                    Some(Extern::Func(upstream, idx)) => ImportFuncLink::Wasm {
                        instance: upstream.clone(),
                        func_idx: *idx,
                    },
                    _ => ImportFuncLink::Unresolved,
                },
                crate::types::FunctionKind::Bytecode(_) => ImportFuncLink::Unresolved,
            };
            import_func_links.push(link);
        }

        let instance = Self {
            module: module.clone(),
            memories,
            tables,
            globals,
            import_func_links,
            dropped_data_segments: Mutex::new(bitarr![0; N_MAX_DATA_SEGMENTS]),
            dropped_element_segments: Mutex::new(bitarr![0; N_MAX_ELEMENT_SEGMENTS]),
            exception: Mutex::new(None),
        };

        // Active segments are applied once at instantiation.
        if let Some(memory) = instance.memories.first() {
            for segment in &module.data_segments {
                if let Some(offset) = segment.active_offset {
                    memory
                        .write(offset as u64, &segment.data)
                        .map_err(|_| TrapCode::MemoryOutOfBounds)?;
                }
            }
        }
        for segment in &module.element_segments {
            if let Some((table_idx, offset)) = segment.active {
                let mut table = instance
                    .tables
                    .get(table_idx as usize)
                    .ok_or(TrapCode::TableOutOfBounds)?
                    .write();
                table.init(offset, &segment.func_indexes, 0, segment.func_indexes.len() as u32)?;
            }
        }

        Ok(Arc::new(instance))
    }

    pub fn default_memory(&self) -> Option<Arc<LinearMemory>> {
        self.memories.first().cloned()
    }

    /// Writes the canonical trap message into the exception buffer.
    pub fn set_trap(&self, trap: TrapCode) {
        self.set_exception(trap.message());
    }

    pub fn set_exception(&self, message: &str) {
        *self.exception.lock() = Some(message.into());
    }

    pub fn copy_exception(&self) -> Option<String> {
        self.exception.lock().clone()
    }

    pub fn has_exception(&self) -> bool {
        self.exception.lock().is_some()
    }

    pub fn clear_exception(&self) {
        *self.exception.lock() = None;
    }

    pub fn drop_data_segment(&self, segment_idx: u32) {
        self.dropped_data_segments
            .lock()
            .set(segment_idx as usize, true);
    }

    pub fn is_data_segment_dropped(&self, segment_idx: u32) -> bool {
        self.dropped_data_segments
            .lock()
            .get(segment_idx as usize)
            .as_deref()
            .copied()
            .unwrap_or(false)
    }

    pub fn drop_element_segment(&self, segment_idx: u32) {
        self.dropped_element_segments
            .lock()
            .set(segment_idx as usize, true);
    }

    pub fn is_element_segment_dropped(&self, segment_idx: u32) -> bool {
        self.dropped_element_segments
            .lock()
            .get(segment_idx as usize)
            .as_deref()
            .copied()
            .unwrap_or(false)
    }
}

mod atomic;
mod control;
mod memory;
mod numeric;
mod reference;
mod stack;

use crate::migration::{install_sigint_checkpoint, restore_image, write_image, MigrationContext};
use crate::types::{
    FuncType, ImportFuncLink, ModuleInstance, TrapCode, ValueType, WasmigError,
};
use crate::vm::config::{AuxStackBounds, ExecutorConfig};
use crate::vm::decoder;
use crate::vm::frame::{Frame, FrameStack};
use crate::vm::memory::LinearMemory;
use crate::vm::opcode::Opcode;
use crate::vm::scanner::BlockAddrCache;
#[cfg(feature = "thread-manager")]
use crate::vm::thread::{SuspendOutcome, SuspendState};
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt::Write as _;
use smallvec::SmallVec;

/// Handler invoked for import functions that did not resolve to
/// another module instance. Receives the raw argument cells and
/// returns the raw result cells.
pub type NativeHandler<T> =
    fn(&mut T, u32, &FuncType, &[u32]) -> Result<SmallVec<[u32; 2]>, WasmigError>;

/// Default native handler: every import call fails with the canonical
/// unlinked-import trap.
pub fn unlinked_native_handler<T>(
    _context: &mut T,
    _func_idx: u32,
    _func_type: &FuncType,
    _args: &[u32],
) -> Result<SmallVec<[u32; 2]>, WasmigError> {
    Err(WasmigError::TrapCode(TrapCode::UnlinkedImportFunction))
}

/// Dispatch outcome of a control opcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The entry function unwound into an ip-less boundary frame.
    Finished,
}

/// A single-threaded bytecode executor.
///
/// Runs functions of one [`ModuleInstance`] (temporarily switching to
/// an upstream instance for cross-module import calls), owns the frame
/// arena, and cooperates with the migration engine: the checkpoint
/// flag is polled before every opcode fetch, and the restore flag
/// reroutes the next invocation through the restore engine.
pub struct Executor<T> {
    pub(crate) instance: Arc<ModuleInstance>,
    root_instance: Arc<ModuleInstance>,
    pub(crate) config: ExecutorConfig,
    pub(crate) migration: Arc<MigrationContext>,
    pub(crate) frames: FrameStack,
    pub(crate) block_cache: BlockAddrCache,
    pub(crate) memory: Option<Arc<LinearMemory>>,
    /// Cached linear memory size; refreshed on `memory.grow`, import
    /// returns, instance switches and restore.
    pub(crate) linear_mem_size: u32,
    /// Opcode fetches since creation; one increment per dispatch.
    pub(crate) tick: u64,
    pub(crate) aux_stack: Option<AuxStackBounds>,
    pub(crate) cur_func_idx: u32,
    pub(crate) cur_code: Arc<[u8]>,
    pub(crate) context: T,
    pub(crate) native_handler: NativeHandler<T>,
    #[cfg(feature = "thread-manager")]
    suspend: Arc<SuspendState>,
}

impl<T> Executor<T> {
    pub fn new(instance: Arc<ModuleInstance>, config: ExecutorConfig, context: T) -> Self {
        Self::with_migration(instance, config, MigrationContext::new(), context)
    }

    pub fn with_migration(
        instance: Arc<ModuleInstance>,
        config: ExecutorConfig,
        migration: Arc<MigrationContext>,
        context: T,
    ) -> Self {
        if config.install_sigint {
            install_sigint_checkpoint(&migration);
        }
        let memory = instance.default_memory();
        let linear_mem_size = memory.as_ref().map(|m| m.data_size()).unwrap_or(0);
        Self {
            root_instance: instance.clone(),
            frames: FrameStack::new(config.wasm_stack_cells),
            block_cache: BlockAddrCache::default(),
            memory,
            linear_mem_size,
            tick: 0,
            aux_stack: config.aux_stack,
            cur_func_idx: 0,
            cur_code: Arc::from([0u8; 0]),
            context,
            native_handler: unlinked_native_handler,
            #[cfg(feature = "thread-manager")]
            suspend: Arc::new(SuspendState::new()),
            instance,
            config,
            migration,
        }
    }

    pub fn set_native_handler(&mut self, handler: NativeHandler<T>) {
        self.native_handler = handler;
    }

    pub fn context(&self) -> &T {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut T {
        &mut self.context
    }

    pub fn instance(&self) -> &Arc<ModuleInstance> {
        &self.instance
    }

    pub fn migration(&self) -> &Arc<MigrationContext> {
        &self.migration
    }

    /// Opcode fetches performed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    #[cfg(feature = "thread-manager")]
    pub fn suspend_state(&self) -> Arc<SuspendState> {
        self.suspend.clone()
    }

    /// Calls a function by index with raw argument cells and returns
    /// its raw result cells.
    ///
    /// When the restore flag is armed the arguments are ignored and
    /// execution resumes from the on-disk image instead.
    pub fn call(&mut self, func_idx: u32, args: &[u32]) -> Result<SmallVec<[u32; 2]>, WasmigError> {
        if self.migration.restore_requested() {
            return self.resume();
        }
        // entry calls always run against the root instance, whatever a
        // previously failed cross-module call left behind
        self.switch_instance(self.root_instance.clone());
        self.instance.clear_exception();
        self.frames.clear();

        let module = self.instance.module.clone();
        let func = module.func(func_idx).ok_or(TrapCode::UnknownFunction)?;
        if args.len() != func.param_cell_num as usize {
            self.instance.set_exception("invalid argument count");
            return Err(TrapCode::UnknownFunction.into());
        }
        let ret_cell_num = func.ret_cell_num;
        let is_import = func.is_import();
        self.frames.push(Frame::dummy(ret_cell_num))?;

        let result = if is_import {
            let args: SmallVec<[u32; 8]> = SmallVec::from_slice(args);
            self.call_import(func_idx, args)
        } else {
            self.push_bytecode_frame(func_idx, args)
                .and_then(|()| self.run_until_boundary())
        };
        match result {
            Ok(()) => self.collect_results(),
            Err(WasmigError::TrapCode(trap)) => Err(self.raise(trap)),
            Err(other) => Err(other),
        }
    }

    /// Re-enters the dispatcher from a checkpoint image.
    pub fn resume(&mut self) -> Result<SmallVec<[u32; 2]>, WasmigError> {
        self.migration.clear_restore();
        self.switch_instance(self.root_instance.clone());
        self.instance.clear_exception();
        self.frames.clear();
        restore_image(self)?;
        match self.run_until_boundary() {
            Ok(()) => self.collect_results(),
            Err(WasmigError::TrapCode(trap)) => Err(self.raise(trap)),
            Err(other) => Err(other),
        }
    }

    fn collect_results(&mut self) -> Result<SmallVec<[u32; 2]>, WasmigError> {
        let dummy = self.frames.top().expect("wasmig: missing dummy frame");
        let results = SmallVec::from_slice(&dummy.cells[..dummy.sp]);
        Ok(results)
    }

    /// Formats the current frame chain, innermost first, for
    /// diagnostics.
    pub fn dump_call_stack(&self) -> String {
        let mut out = String::new();
        for (depth, frame) in self.frames.iter_top_down().enumerate() {
            match (frame.func_idx, frame.ip) {
                (Some(func_idx), Some(ip)) => {
                    let _ = writeln!(out, "#{depth:02}: func {func_idx} @ {ip:#x}");
                }
                (Some(func_idx), None) => {
                    let _ = writeln!(out, "#{depth:02}: func {func_idx} (native)");
                }
                (None, _) => {
                    let _ = writeln!(out, "#{depth:02}: <entry>");
                }
            }
        }
        out
    }

    #[inline(always)]
    pub(crate) fn top(&mut self) -> &mut Frame {
        self.frames.top_mut().expect("wasmig: empty frame stack")
    }

    /// Effective linear memory size for bounds checks. Under the
    /// thread manager the cached copy may be stale (another executor
    /// can grow the memory), so the shared atomic is read instead.
    #[inline(always)]
    pub(crate) fn effective_mem_size(&self) -> u32 {
        #[cfg(feature = "thread-manager")]
        {
            self.memory.as_ref().map(|m| m.data_size()).unwrap_or(0)
        }
        #[cfg(not(feature = "thread-manager"))]
        {
            self.linear_mem_size
        }
    }

    pub(crate) fn refresh_mem_size(&mut self) {
        self.linear_mem_size = self.memory.as_ref().map(|m| m.data_size()).unwrap_or(0);
    }

    #[inline(always)]
    pub(crate) fn require_memory(&self) -> Result<&Arc<LinearMemory>, TrapCode> {
        self.memory.as_ref().ok_or(TrapCode::MemoryOutOfBounds)
    }

    /// The §4.4 bounds policy for a `size`-byte access at `effective`.
    #[inline(always)]
    pub(crate) fn check_memory_access(&self, effective: u64, size: u64) -> Result<(), TrapCode> {
        if self.config.bounds_checks_enabled
            && effective + size > self.effective_mem_size() as u64
        {
            return Err(TrapCode::MemoryOutOfBounds);
        }
        Ok(())
    }

    #[cfg(feature = "thread-manager")]
    #[inline(always)]
    pub(crate) fn check_suspend(&self) -> Result<(), WasmigError> {
        match self.suspend.check() {
            SuspendOutcome::Continue => Ok(()),
            SuspendOutcome::Terminated => Err(WasmigError::Terminated),
        }
    }

    #[cfg(not(feature = "thread-manager"))]
    #[inline(always)]
    pub(crate) fn check_suspend(&self) -> Result<(), WasmigError> {
        Ok(())
    }

    // --- immediate decoding against the current frame's ip ---

    #[inline(always)]
    pub(crate) fn fetch_u8(&mut self) -> Result<u8, TrapCode> {
        let frame = self.frames.top_mut().expect("wasmig: empty frame stack");
        let ip = frame.ip.as_mut().expect("wasmig: fetch in ip-less frame");
        decoder::read_u8(&self.cur_code, ip)
    }

    #[inline(always)]
    pub(crate) fn imm_leb_u32(&mut self) -> Result<u32, TrapCode> {
        let frame = self.frames.top_mut().expect("wasmig: empty frame stack");
        let ip = frame.ip.as_mut().expect("wasmig: fetch in ip-less frame");
        decoder::read_leb_u32(&self.cur_code, ip)
    }

    #[inline(always)]
    pub(crate) fn imm_leb_i32(&mut self) -> Result<i32, TrapCode> {
        let frame = self.frames.top_mut().expect("wasmig: empty frame stack");
        let ip = frame.ip.as_mut().expect("wasmig: fetch in ip-less frame");
        decoder::read_leb_i32(&self.cur_code, ip)
    }

    #[inline(always)]
    pub(crate) fn imm_leb_i64(&mut self) -> Result<i64, TrapCode> {
        let frame = self.frames.top_mut().expect("wasmig: empty frame stack");
        let ip = frame.ip.as_mut().expect("wasmig: fetch in ip-less frame");
        decoder::read_leb_i64(&self.cur_code, ip)
    }

    #[inline(always)]
    pub(crate) fn imm_f32_bits(&mut self) -> Result<u32, TrapCode> {
        let frame = self.frames.top_mut().expect("wasmig: empty frame stack");
        let ip = frame.ip.as_mut().expect("wasmig: fetch in ip-less frame");
        decoder::read_f32_bits(&self.cur_code, ip)
    }

    #[inline(always)]
    pub(crate) fn imm_f64_bits(&mut self) -> Result<u64, TrapCode> {
        let frame = self.frames.top_mut().expect("wasmig: empty frame stack");
        let ip = frame.ip.as_mut().expect("wasmig: fetch in ip-less frame");
        decoder::read_f64_bits(&self.cur_code, ip)
    }

    pub(crate) fn skip_imm_leb(&mut self) -> Result<(), TrapCode> {
        let frame = self.frames.top_mut().expect("wasmig: empty frame stack");
        let ip = frame.ip.as_mut().expect("wasmig: fetch in ip-less frame");
        decoder::skip_leb(&self.cur_code, ip)
    }

    #[cfg(feature = "debug-print")]
    fn debug_trace_opcode(&self, byte: u8) {
        if let Some(frame) = self.frames.top() {
            if let Some(ip) = frame.ip {
                println!(
                    "{}@{}:\t0x{byte:02x}\tstack({}):{:?}",
                    self.cur_func_idx,
                    ip - 1,
                    frame.stack_values(),
                    frame.top_cells(frame.stack_cells().min(10)),
                );
            }
        }
    }

    /// The central fetch/execute loop. Returns when execution unwinds
    /// into an ip-less boundary frame (the dummy sentinel, or the
    /// caller frame of a cross-module import call).
    pub(crate) fn run_until_boundary(&mut self) -> Result<(), WasmigError> {
        loop {
            self.tick += 1;
            if self.migration.checkpoint_requested() {
                // frame state is synchronized at every opcode
                // boundary, the snapshot can be taken directly
                write_image(self)?;
                return Err(WasmigError::Checkpointed);
            }

            let byte = match self.fetch_u8() {
                Ok(byte) => byte,
                Err(trap) => return Err(self.raise(trap)),
            };
            #[cfg(feature = "debug-print")]
            self.debug_trace_opcode(byte);

            let Some(opcode) = Opcode::from_byte(byte) else {
                return Err(self.raise(TrapCode::UnsupportedOpcode));
            };

            let result = if opcode.is_control_opcode() {
                match control::exec_control_opcode(self, opcode) {
                    Ok(Flow::Continue) => Ok(()),
                    Ok(Flow::Finished) => return Ok(()),
                    Err(err) => Err(err),
                }
            } else if opcode.is_numeric_opcode() {
                numeric::exec_numeric_opcode(self, opcode).map_err(WasmigError::from)
            } else if opcode.is_stack_opcode() {
                stack::exec_stack_opcode(self, opcode).map_err(WasmigError::from)
            } else if opcode.is_memory_opcode() {
                memory::exec_memory_opcode(self, opcode).map_err(WasmigError::from)
            } else if opcode.is_reference_opcode() {
                reference::exec_reference_opcode(self, opcode).map_err(WasmigError::from)
            } else if opcode == Opcode::MiscPrefix {
                memory::exec_misc_opcode(self).map_err(WasmigError::from)
            } else if opcode == Opcode::AtomicPrefix {
                atomic::exec_atomic_opcode(self).map_err(WasmigError::from)
            } else {
                Err(TrapCode::UnsupportedOpcode.into())
            };

            if let Err(err) = result {
                return Err(match err {
                    WasmigError::TrapCode(trap) => self.raise(trap),
                    other => other,
                });
            }

            // both stacks must agree at every opcode boundary
            debug_assert!(self
                .frames
                .top()
                .map(|frame| frame.tag_law_holds())
                .unwrap_or(true));
        }
    }

    /// Trap epilogue: records the canonical message (unless the
    /// faulting path already wrote a more specific one) and surfaces
    /// the trap to the embedder.
    pub(crate) fn raise(&mut self, trap: TrapCode) -> WasmigError {
        if !self.instance.has_exception() {
            self.instance.set_trap(trap);
        }
        WasmigError::TrapCode(trap)
    }

    // --- call protocol ---

    /// Allocates and enters a bytecode frame for `func_idx` with the
    /// given argument cells.
    pub(crate) fn push_bytecode_frame(
        &mut self,
        func_idx: u32,
        args: &[u32],
    ) -> Result<(), WasmigError> {
        let module = self.instance.module.clone();
        let func = module.func(func_idx).ok_or(TrapCode::UnknownFunction)?;
        let body = func.code_body().expect("wasmig: bytecode frame for import");

        let mut frame = Frame::new_bytecode(func_idx, func, body);
        frame.cells[..args.len()].copy_from_slice(args);
        // locals beyond the parameters stay zero-initialized
        frame.push_ctrl(
            0,
            body.code.len() - 1,
            0,
            0,
            func.ret_cell_num,
            func.result_count,
        )?;
        self.frames.push(frame).map_err(|trap| self.raise(trap))?;

        self.cur_func_idx = func_idx;
        self.cur_code = body.code.clone();
        Ok(())
    }

    /// Pops call arguments (cells and tags) off the current frame.
    pub(crate) fn pop_call_args(&mut self, func_idx: u32) -> Result<SmallVec<[u32; 8]>, TrapCode> {
        let module = self.instance.module.clone();
        let func = module.func(func_idx).ok_or(TrapCode::UnknownFunction)?;
        let param_cells = func.param_cell_num as usize;
        let param_count = func.param_count as usize;
        let frame = self.top();
        frame.drop_values(param_cells, param_count);
        let sp = frame.sp;
        Ok(SmallVec::from_slice(&frame.cells[sp..sp + param_cells]))
    }

    /// `call` / `call_indirect` target entry.
    pub(crate) fn call_function(&mut self, func_idx: u32) -> Result<(), WasmigError> {
        let is_import = match self.instance.module.func(func_idx) {
            Some(func) => func.is_import(),
            None => return Err(self.raise(TrapCode::UnknownFunction)),
        };
        let args = self.pop_call_args(func_idx)?;
        if is_import {
            self.call_import(func_idx, args)
        } else {
            self.push_bytecode_frame(func_idx, &args)
        }
    }

    /// `return_call` / `return_call_indirect`: the caller frame is
    /// released before the callee frame is allocated, so the callee
    /// replaces the caller in the chain.
    pub(crate) fn tail_call_function(&mut self, func_idx: u32) -> Result<(), WasmigError> {
        let is_import = match self.instance.module.func(func_idx) {
            Some(func) => func.is_import(),
            None => return Err(self.raise(TrapCode::UnknownFunction)),
        };
        let args = self.pop_call_args(func_idx)?;
        self.frames.pop().expect("wasmig: tail call without frame");
        self.recover_context();
        if is_import {
            self.call_import(func_idx, args)?;
            // an import tail call returns straight to the caller
            self.do_return_from_import()
        } else {
            self.push_bytecode_frame(func_idx, &args)
        }
    }

    fn do_return_from_import(&mut self) -> Result<(), WasmigError> {
        // nothing to unwind: the import already pushed its results
        // into what is now the top frame
        Ok(())
    }

    /// Copies the callee's results into the caller and releases the
    /// callee frame. Returns `Flow::Finished` when the caller is an
    /// ip-less boundary frame.
    pub(crate) fn do_return(&mut self) -> Result<Flow, WasmigError> {
        let (ret_cells, result_count) = {
            let func = self
                .instance
                .module
                .func(self.cur_func_idx)
                .expect("wasmig: returning from unknown function");
            (func.ret_cell_num as usize, func.result_count as usize)
        };

        {
            let (top, prev) = self
                .frames
                .top_and_prev_mut()
                .expect("wasmig: return without caller");
            let sp = top.sp;
            let tag_len = top.tags.len();
            let cells = &top.cells[sp - ret_cells..sp];
            let tags = &top.tags[tag_len - result_count..];
            prev.cells[prev.sp..prev.sp + ret_cells].copy_from_slice(cells);
            prev.sp += ret_cells;
            prev.tags.extend_from_slice(tags);
        }
        self.frames.pop();

        let top = self.frames.top().expect("wasmig: empty frame stack");
        if top.ip.is_none() {
            return Ok(Flow::Finished);
        }
        self.recover_context();
        Ok(Flow::Continue)
    }

    /// Re-reads the cached function context from the (new) top frame,
    /// the analogue of restoring saved registers after a return.
    pub(crate) fn recover_context(&mut self) {
        let Some(frame) = self.frames.top() else {
            return;
        };
        let Some(func_idx) = frame.func_idx else {
            return;
        };
        if frame.ip.is_none() {
            return;
        }
        self.cur_func_idx = func_idx;
        self.cur_code = self
            .instance
            .module
            .func(func_idx)
            .and_then(|f| f.code_body())
            .map(|b| b.code.clone())
            .expect("wasmig: bytecode frame without code");
    }

    fn switch_instance(&mut self, instance: Arc<ModuleInstance>) {
        self.memory = instance.default_memory();
        self.instance = instance;
        self.refresh_mem_size();
    }

    /// Invokes an import function: either a cross-module call into an
    /// upstream instance or a native host function.
    pub(crate) fn call_import(
        &mut self,
        func_idx: u32,
        args: SmallVec<[u32; 8]>,
    ) -> Result<(), WasmigError> {
        let link = self
            .instance
            .import_func_links
            .get(func_idx as usize)
            .cloned()
            .unwrap_or(ImportFuncLink::Unresolved);
        match link {
            ImportFuncLink::Wasm { instance, func_idx: sub_idx } => {
                self.call_import_wasm(instance, sub_idx, &args)
            }
            ImportFuncLink::Unresolved => self.call_import_native(func_idx, &args),
        }
    }

    fn call_import_native(
        &mut self,
        func_idx: u32,
        args: &[u32],
    ) -> Result<(), WasmigError> {
        let module = self.instance.module.clone();
        let func = module.func(func_idx).ok_or(TrapCode::UnknownFunction)?;
        let func_type = module
            .types
            .get(func.type_idx as usize)
            .ok_or(TrapCode::UnknownFunction)?;

        // a minimal ip-less frame keeps the chain well formed for
        // diagnostics while the native code runs
        self.frames
            .push(Frame::native(func_idx, func.param_cell_num))
            .map_err(|trap| self.raise(trap))?;
        let result = (self.native_handler)(&mut self.context, func_idx, func_type, args);
        self.frames.pop();

        let rets = result.map_err(|err| {
            if let WasmigError::TrapCode(trap) = &err {
                if !self.instance.has_exception() {
                    self.instance.set_trap(*trap);
                }
            } else if !self.instance.has_exception() {
                self.instance.set_exception("native function failed");
            }
            err
        })?;
        if rets.len() != func.ret_cell_num as usize {
            self.instance.set_exception("native function result arity mismatch");
            return Err(WasmigError::NativeFunctionFailed);
        }
        self.push_typed_results(&func_type.results, &rets);
        // the native call may have grown memory
        self.refresh_mem_size();
        Ok(())
    }

    fn call_import_wasm(
        &mut self,
        sub_instance: Arc<ModuleInstance>,
        sub_idx: u32,
        args: &[u32],
    ) -> Result<(), WasmigError> {
        // the caller frame becomes the boundary: clearing its ip makes
        // the nested dispatch loop return here once the callee unwinds
        let saved_ip = self.top().ip.take();
        let saved_instance = self.instance.clone();
        let saved_func_idx = self.cur_func_idx;
        let saved_code = self.cur_code.clone();
        // the sub-module runs with its own aux-stack configuration
        let saved_aux = self.aux_stack;

        self.switch_instance(sub_instance.clone());
        let sub_func = sub_instance
            .module
            .func(sub_idx)
            .ok_or(TrapCode::UnknownFunction)?;
        let result = if sub_func.is_import() {
            let args: SmallVec<[u32; 8]> = SmallVec::from_slice(args);
            self.call_import(sub_idx, args)
        } else {
            self.push_bytecode_frame(sub_idx, args)
                .and_then(|()| self.run_until_boundary())
        };

        // restore the caller's execution context
        self.switch_instance(saved_instance.clone());
        self.aux_stack = saved_aux;
        self.cur_func_idx = saved_func_idx;
        self.cur_code = saved_code;

        match result {
            Ok(()) => {
                // the callee unwound cleanly, the caller resumes
                self.top().ip = saved_ip;
                Ok(())
            }
            Err(err) => {
                // callee frames stay as they were for diagnostics;
                // transfer the exception into the caller's instance
                if let Some(message) = sub_instance.copy_exception() {
                    saved_instance.set_exception(&message);
                }
                Err(err)
            }
        }
    }

    /// Pushes raw result cells with tags derived from the result
    /// types.
    pub(crate) fn push_typed_results(&mut self, results: &[ValueType], cells: &[u32]) {
        let frame = self.top();
        let mut cursor = 0usize;
        for ty in results {
            if ty.is_64bit() {
                frame.cells[frame.sp] = cells[cursor];
                frame.cells[frame.sp + 1] = cells[cursor + 1];
                frame.sp += 2;
                frame.tags.push(1);
                cursor += 2;
            } else {
                frame.cells[frame.sp] = cells[cursor];
                frame.sp += 1;
                frame.tags.push(0);
                cursor += 1;
            }
        }
    }
}

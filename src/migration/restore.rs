use crate::migration::image::{
    self, for_each_page_record, module_fingerprint, stack_img_name, ProgramCounterImage,
    StackImage,
};
use crate::types::{FunctionKind, RestoreError, UntypedValue};
use crate::vm::{ControlBlock, Executor, Frame};
use alloc::vec::Vec;
use std::fs;
use std::path::Path;

fn read_file(dir: &Path, name: &str) -> Result<Vec<u8>, RestoreError> {
    Ok(fs::read(dir.join(name))?)
}

/// Rebuilds one frame from its image record. Every offset is
/// translated back against the freshly allocated frame and validated
/// against its declared range.
fn rebuild_frame<T>(vm: &Executor<T>, stack_image: &StackImage) -> Result<Frame, RestoreError> {
    let module = &vm.instance.module;
    let func = module
        .func(stack_image.entry_fidx)
        .ok_or(RestoreError::FrameMismatch("unknown entry function"))?;
    let body = match &func.kind {
        FunctionKind::Bytecode(body) => body,
        FunctionKind::Import { .. } => {
            return Err(RestoreError::FrameMismatch("import function in frame chain"))
        }
    };

    let mut frame = Frame::new_bytecode(stack_image.entry_fidx, func, body);

    // locals: the prepended tags must agree with the declared local
    // widths before the cells are distributed
    let local_value_count = (func.param_count + func.local_count) as usize;
    for (index, ty) in body.local_types_flat.iter().enumerate() {
        if stack_image.type_tags[index] != ty.tag() {
            return Err(RestoreError::FrameMismatch("local type tag mismatch"));
        }
    }
    if stack_image.locals_cells.len() != frame.sp_bottom {
        return Err(RestoreError::FrameMismatch("locals area size mismatch"));
    }
    frame.cells[..frame.sp_bottom].copy_from_slice(&stack_image.locals_cells);

    // operand stack
    let value_cells = stack_image.value_stack_cells.len();
    if value_cells > body.max_stack_cell_num as usize {
        return Err(RestoreError::MalformedOffset("operand stack overflows the frame"));
    }
    frame.cells[frame.sp_bottom..frame.sp_bottom + value_cells]
        .copy_from_slice(&stack_image.value_stack_cells);
    frame.sp = frame.sp_bottom + value_cells;

    // type-tag stack, locals stripped
    frame.tags = stack_image.type_tags[local_value_count..].to_vec();
    if !frame.tag_law_holds() {
        return Err(RestoreError::FrameMismatch("tag law violated"));
    }

    // control stack
    if stack_image.ctrl_records.len() > body.max_block_num as usize {
        return Err(RestoreError::MalformedOffset("control stack overflows the frame"));
    }
    frame.ctrl.clear();
    for record in &stack_image.ctrl_records {
        if record.begin as usize > body.code.len() || record.target as usize >= body.code.len() {
            return Err(RestoreError::MalformedOffset("control record code offset"));
        }
        if record.sp_ofs as usize > value_cells
            || record.tsp_ofs as usize > frame.tags.len()
        {
            return Err(RestoreError::MalformedOffset("control record stack offset"));
        }
        frame.ctrl.push(ControlBlock {
            begin: record.begin as usize,
            target: record.target as usize,
            frame_sp: record.sp_ofs as usize,
            frame_tsp: record.tsp_ofs as usize,
            cell_num: record.cell_num,
            count: record.count,
        });
    }

    Ok(frame)
}

/// Rebuilds the executor from the on-disk image: memory, globals, the
/// frame chain (dummy re-created, interior offsets re-translated) and
/// the saved program counter.
pub(crate) fn restore_image<T>(vm: &mut Executor<T>) -> Result<(), RestoreError> {
    let dir = vm.config.image_dir.clone();

    // the image is only valid against the very module binary (and
    // pointer width) it was taken from
    let fingerprint = read_file(&dir, image::FINGERPRINT_IMG)?;
    if fingerprint != module_fingerprint(&vm.instance.module) {
        return Err(RestoreError::FingerprintMismatch);
    }

    // linear memory: grow to the recorded page count, pre-zero, then
    // apply every page record in order (later writes win)
    let page_count_raw = read_file(&dir, image::MEM_PAGE_COUNT_IMG)?;
    if page_count_raw.len() < 4 {
        return Err(RestoreError::UnexpectedEof("memory page count"));
    }
    let target_pages = u32::from_le_bytes(page_count_raw[..4].try_into().unwrap());
    if let Some(memory) = vm.memory.clone() {
        let current = memory.current_pages();
        if target_pages < current {
            return Err(RestoreError::MalformedOffset("memory shrank across migration"));
        }
        if target_pages > current {
            memory
                .grow(target_pages - current)
                .map_err(|_| RestoreError::MalformedOffset("memory page count over limit"))?;
        }
        memory
            .fill(0, 0, memory.data_size() as u64)
            .map_err(|_| RestoreError::MalformedOffset("memory pre-zero failed"))?;
        let memory_img = read_file(&dir, image::MEMORY_IMG)?;
        for_each_page_record(&memory_img, |offset, page| {
            memory
                .restore_page(offset, page)
                .map_err(|_| RestoreError::MalformedOffset("memory page offset"))
        })?;
    }
    vm.refresh_mem_size();

    // globals, raw bytes in declaration order
    let global_img = read_file(&dir, image::GLOBAL_IMG)?;
    let globals = &vm.instance.globals;
    let mut cursor = 0usize;
    for global_idx in 0..globals.count() {
        let entity = globals
            .entity(global_idx)
            .ok_or(RestoreError::FrameMismatch("global directory hole"))?;
        let width = if entity.value_type.is_64bit() { 8 } else { 4 };
        let bytes = global_img
            .get(cursor..cursor + width)
            .ok_or(RestoreError::UnexpectedEof("global values"))?;
        let value = if width == 8 {
            UntypedValue::from(u64::from_le_bytes(bytes.try_into().unwrap()))
        } else {
            UntypedValue::from(u32::from_le_bytes(bytes.try_into().unwrap()))
        };
        globals.restore_value(global_idx, value);
        cursor += width;
    }

    // frame chain
    let frame_count_raw = read_file(&dir, image::FRAME_IMG)?;
    if frame_count_raw.len() < 4 {
        return Err(RestoreError::UnexpectedEof("frame count"));
    }
    let frame_count = u32::from_le_bytes(frame_count_raw[..4].try_into().unwrap());
    if frame_count == 0 {
        return Err(RestoreError::FrameMismatch("empty frame chain"));
    }

    let mut stack_images = Vec::with_capacity(frame_count as usize);
    for index in 1..=frame_count {
        let raw = read_file(&dir, &stack_img_name(index))?;
        stack_images.push(StackImage::decode(&raw, &vm.instance.module)?);
    }

    let pc_raw = read_file(&dir, image::PROGRAM_COUNTER_IMG)?;
    let pc = ProgramCounterImage::decode(&pc_raw)?;

    // the dummy sentinel is re-created, sized for the bottom (entry)
    // function's results
    let bottom_image = stack_images.last().expect("wasmig: empty image list");
    let bottom_func = vm
        .instance
        .module
        .func(bottom_image.entry_fidx)
        .ok_or(RestoreError::FrameMismatch("unknown entry function"))?;
    vm.frames
        .push(Frame::dummy(bottom_func.ret_cell_num))
        .map_err(|_| RestoreError::FrameMismatch("frame arena exhausted"))?;

    // bottom-up: stack<N> first; frame i's resume position comes from
    // the return address its callee (stack<i-1>) recorded, the
    // innermost frame's from the program counter
    for index in (1..=frame_count).rev() {
        let stack_image = &stack_images[index as usize - 1];
        let mut frame = rebuild_frame(vm, stack_image)?;

        let (resume_fidx, resume_offset) = if index == 1 {
            (pc.fidx, pc.offset)
        } else {
            let callee_image = &stack_images[index as usize - 2];
            (callee_image.return_fidx, callee_image.return_offset)
        };
        if resume_fidx != stack_image.entry_fidx {
            return Err(RestoreError::FrameMismatch("return address function mismatch"));
        }
        let code_len = vm
            .instance
            .module
            .func(stack_image.entry_fidx)
            .and_then(|func| func.code_body())
            .map(|body| body.code.len())
            .unwrap_or(0);
        if resume_offset as usize >= code_len {
            return Err(RestoreError::MalformedOffset("resume position out of code"));
        }
        frame.ip = Some(resume_offset as usize);

        // the bottom record carries its own position as the return
        // address by convention; cross-check it
        if index == frame_count
            && (stack_image.return_fidx != stack_image.entry_fidx
                || stack_image.return_offset != resume_offset)
        {
            return Err(RestoreError::FrameMismatch("bottom frame return convention"));
        }

        vm.frames
            .push(frame)
            .map_err(|_| RestoreError::FrameMismatch("frame arena exhausted"))?;
    }

    vm.recover_context();
    Ok(())
}

use crate::migration::image::{
    self, module_fingerprint, stack_img_name, CtrlRecord, ProgramCounterImage, StackImage,
};
use crate::types::{FunctionKind, WasmigError};
use crate::vm::{Executor, Frame};
use alloc::vec::Vec;
use std::fs;
use std::io::Write;
use std::path::Path;

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> Result<(), WasmigError> {
    let mut file = fs::File::create(dir.join(name)).map_err(WasmigError::CheckpointIo)?;
    file.write_all(contents).map_err(WasmigError::CheckpointIo)?;
    Ok(())
}

/// Serializes one live frame. `caller` is the frame below it in the
/// chain; for the bottom frame (whose caller is the dummy sentinel)
/// the record carries the frame's own position as its return address.
fn frame_image<T>(vm: &Executor<T>, frame: &Frame, caller: &Frame) -> StackImage {
    let module = &vm.instance.module;
    let entry_fidx = frame.func_idx.expect("wasmig: dumping the dummy frame");
    let own_ip = frame.ip.expect("wasmig: dumping an ip-less frame") as u32;

    let (return_fidx, return_offset) = match (caller.func_idx, caller.ip) {
        (Some(fidx), Some(ip)) => (fidx, ip as u32),
        _ => (entry_fidx, own_ip),
    };

    let func = module.func(entry_fidx).expect("wasmig: unknown dumped function");
    let body = match &func.kind {
        FunctionKind::Bytecode(body) => body,
        FunctionKind::Import { .. } => unreachable!("wasmig: dumping an import frame"),
    };

    // locals prepended so the receiving side can distribute them
    let mut type_tags: Vec<u8> = body
        .local_types_flat
        .iter()
        .map(|ty| ty.tag())
        .collect();
    type_tags.extend_from_slice(&frame.tags);

    let ctrl_records = frame
        .ctrl
        .iter()
        .map(|block| CtrlRecord {
            begin: block.begin as u32,
            target: block.target as u32,
            sp_ofs: block.frame_sp as u32,
            tsp_ofs: block.frame_tsp as u32,
            cell_num: block.cell_num,
            count: block.count,
        })
        .collect();

    StackImage {
        entry_fidx,
        return_fidx,
        return_offset,
        type_tags,
        locals_cells: frame.cells[..frame.sp_bottom].to_vec(),
        value_stack_cells: frame.cells[frame.sp_bottom..frame.sp].to_vec(),
        ctrl_records,
    }
}

/// Writes the complete execution image: dirty memory pages, page
/// count, globals, program counter, and the serialized frame chain,
/// top frame first.
pub(crate) fn write_image<T>(vm: &Executor<T>) -> Result<(), WasmigError> {
    let dir = vm.config.image_dir.clone();
    fs::create_dir_all(&dir).map_err(WasmigError::CheckpointIo)?;

    // a cross-module call boundary leaves an ip-less frame mid-chain;
    // such a chain cannot be expressed in the image
    let live: Vec<&Frame> = vm
        .frames
        .iter_top_down()
        .take_while(|frame| !frame.is_dummy())
        .collect();
    if live.iter().any(|frame| frame.ip.is_none()) {
        return Err(WasmigError::CheckpointAcrossModuleBoundary);
    }

    write_file(&dir, image::FINGERPRINT_IMG, &module_fingerprint(&vm.instance.module))?;

    // linear memory, dirty pages only
    if let Some(memory) = &vm.memory {
        let mut memory_img = fs::File::create(dir.join(image::MEMORY_IMG))
            .map_err(WasmigError::CheckpointIo)?;
        memory
            .for_each_dirty_page(|offset, page| {
                memory_img.write_all(&offset.to_le_bytes())?;
                memory_img.write_all(page)
            })
            .map_err(WasmigError::CheckpointIo)?;
        write_file(
            &dir,
            image::MEM_PAGE_COUNT_IMG,
            &memory.current_pages().to_le_bytes(),
        )?;
    } else {
        write_file(&dir, image::MEMORY_IMG, &[])?;
        write_file(&dir, image::MEM_PAGE_COUNT_IMG, &0u32.to_le_bytes())?;
    }

    // globals, raw bytes in declaration order
    let globals = &vm.instance.globals;
    let mut global_img = Vec::new();
    for global_idx in 0..globals.count() {
        let entity = globals.entity(global_idx).expect("wasmig: global directory hole");
        let value = globals.raw_value(global_idx);
        if entity.value_type.is_64bit() {
            global_img.extend_from_slice(&value.as_u64().to_le_bytes());
        } else {
            global_img.extend_from_slice(&value.as_u32().to_le_bytes());
        }
    }
    write_file(&dir, image::GLOBAL_IMG, &global_img)?;

    // innermost program counter
    let top = live.first().expect("wasmig: checkpoint without a live frame");
    let pc = ProgramCounterImage {
        fidx: top.func_idx.expect("wasmig: dummy top frame"),
        offset: top.ip.expect("wasmig: ip-less top frame") as u32,
    };
    write_file(&dir, image::PROGRAM_COUNTER_IMG, &pc.encode())?;

    // frame chain, top first, dummy excluded
    write_file(&dir, image::FRAME_IMG, &(live.len() as u32).to_le_bytes())?;
    for (index, frame) in live.iter().enumerate() {
        let caller = vm
            .frames
            .frame(vm.frames.len() - 2 - index)
            .expect("wasmig: frame chain underflow");
        let stack_image = frame_image(vm, frame, caller);
        write_file(&dir, &stack_img_name(index as u32 + 1), &stack_image.encode())?;
    }

    Ok(())
}

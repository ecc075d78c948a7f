use crate::types::{Module, RestoreError, N_BYTES_PER_IMAGE_PAGE};
use alloc::string::String;
use alloc::vec::Vec;
use bytes::{BufMut, BytesMut};
use tiny_keccak::Hasher;

pub const MEMORY_IMG: &str = "memory.img";
pub const MEM_PAGE_COUNT_IMG: &str = "mem_page_count.img";
pub const GLOBAL_IMG: &str = "global.img";
pub const PROGRAM_COUNTER_IMG: &str = "program_counter.img";
pub const FRAME_IMG: &str = "frame.img";
pub const FINGERPRINT_IMG: &str = "fingerprint.img";

/// `stack<i>.img`, `i = 1` being the innermost frame.
pub fn stack_img_name(index: u32) -> String {
    alloc::format!("stack{index}.img")
}

fn take_u32(buf: &mut &[u8], what: &'static str) -> Result<u32, RestoreError> {
    if buf.len() < 4 {
        return Err(RestoreError::UnexpectedEof(what));
    }
    let (head, tail) = buf.split_at(4);
    *buf = tail;
    Ok(u32::from_le_bytes(head.try_into().unwrap()))
}

fn take_bytes<'a>(
    buf: &mut &'a [u8],
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], RestoreError> {
    if buf.len() < len {
        return Err(RestoreError::UnexpectedEof(what));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

/// `program_counter.img`: the innermost frame's code position.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProgramCounterImage {
    pub fidx: u32,
    pub offset: u32,
}

impl ProgramCounterImage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32_le(self.fidx);
        buf.put_u32_le(self.offset);
        buf.to_vec()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, RestoreError> {
        let fidx = take_u32(&mut buf, "program counter fidx")?;
        let offset = take_u32(&mut buf, "program counter offset")?;
        Ok(Self { fidx, offset })
    }
}

/// One record of a frame's control stack, all positions relativized.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CtrlRecord {
    pub begin: u32,
    pub target: u32,
    pub sp_ofs: u32,
    pub tsp_ofs: u32,
    pub cell_num: u32,
    pub count: u32,
}

/// `stack<i>.img`: one serialized activation frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackImage {
    pub entry_fidx: u32,
    pub return_fidx: u32,
    pub return_offset: u32,
    /// One byte per logical value, local types prepended to the live
    /// operand tags.
    pub type_tags: Vec<u8>,
    pub locals_cells: Vec<u32>,
    pub value_stack_cells: Vec<u32>,
    pub ctrl_records: Vec<CtrlRecord>,
}

impl StackImage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.entry_fidx);
        buf.put_u32_le(self.return_fidx);
        buf.put_u32_le(self.return_offset);
        buf.put_u32_le(self.type_tags.len() as u32);
        buf.put_slice(&self.type_tags);
        for &cell in &self.locals_cells {
            buf.put_u32_le(cell);
        }
        for &cell in &self.value_stack_cells {
            buf.put_u32_le(cell);
        }
        buf.put_u32_le(self.ctrl_records.len() as u32);
        for record in &self.ctrl_records {
            buf.put_u32_le(record.begin);
            buf.put_u32_le(record.target);
            buf.put_u32_le(record.sp_ofs);
            buf.put_u32_le(record.tsp_ofs);
            buf.put_u32_le(record.cell_num);
            buf.put_u32_le(record.count);
        }
        buf.to_vec()
    }

    /// Decoding needs the module: the locals area width comes from the
    /// entry function and the operand cell count is derived from the
    /// tag suffix.
    pub fn decode(mut buf: &[u8], module: &Module) -> Result<Self, RestoreError> {
        let entry_fidx = take_u32(&mut buf, "stack entry fidx")?;
        let return_fidx = take_u32(&mut buf, "stack return fidx")?;
        let return_offset = take_u32(&mut buf, "stack return offset")?;

        let func = module
            .func(entry_fidx)
            .ok_or(RestoreError::FrameMismatch("unknown entry function"))?;
        let local_value_count = (func.param_count + func.local_count) as usize;
        let local_cell_count = func.local_area_cells() as usize;

        let tag_count = take_u32(&mut buf, "type stack size")? as usize;
        if tag_count < local_value_count {
            return Err(RestoreError::FrameMismatch(
                "type stack smaller than the locals area",
            ));
        }
        let type_tags = take_bytes(&mut buf, tag_count, "type tags")?.to_vec();
        if type_tags.iter().any(|&tag| tag > 1) {
            return Err(RestoreError::MalformedTypeTag);
        }

        let locals_raw = take_bytes(&mut buf, local_cell_count * 4, "locals cells")?;
        let locals_cells = locals_raw
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        let value_cell_count: usize = type_tags[local_value_count..]
            .iter()
            .map(|&tag| 1 + tag as usize)
            .sum();
        let value_raw = take_bytes(&mut buf, value_cell_count * 4, "value stack cells")?;
        let value_stack_cells = value_raw
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        let ctrl_len = take_u32(&mut buf, "ctrl stack size")? as usize;
        let mut ctrl_records = Vec::with_capacity(ctrl_len);
        for _ in 0..ctrl_len {
            ctrl_records.push(CtrlRecord {
                begin: take_u32(&mut buf, "ctrl begin")?,
                target: take_u32(&mut buf, "ctrl target")?,
                sp_ofs: take_u32(&mut buf, "ctrl sp offset")?,
                tsp_ofs: take_u32(&mut buf, "ctrl tsp offset")?,
                cell_num: take_u32(&mut buf, "ctrl cell num")?,
                count: take_u32(&mut buf, "ctrl count")?,
            });
        }

        Ok(Self {
            entry_fidx,
            return_fidx,
            return_offset,
            type_tags,
            locals_cells,
            value_stack_cells,
            ctrl_records,
        })
    }
}

/// Streams the `(page_offset, page)` records of `memory.img`.
pub fn for_each_page_record(
    mut buf: &[u8],
    mut f: impl FnMut(u32, &[u8]) -> Result<(), RestoreError>,
) -> Result<(), RestoreError> {
    let page_size = N_BYTES_PER_IMAGE_PAGE as usize;
    while !buf.is_empty() {
        let offset = take_u32(&mut buf, "memory page offset")?;
        let page = take_bytes(&mut buf, page_size, "memory page contents")?;
        f(offset, page)?;
    }
    Ok(())
}

/// Keccak-256 over the module's type and code tables plus the pointer
/// width. Images are only valid against an identical module binary on
/// the same pointer width; the digest makes that rule checkable.
pub fn module_fingerprint(module: &Module) -> [u8; 32] {
    let mut hasher = tiny_keccak::Keccak::v256();
    hasher.update(&[core::mem::size_of::<usize>() as u8]);
    for func_type in &module.types {
        hasher.update(&(func_type.params.len() as u32).to_le_bytes());
        for &param in &func_type.params {
            hasher.update(&[param as u8]);
        }
        hasher.update(&(func_type.results.len() as u32).to_le_bytes());
        for &result in &func_type.results {
            hasher.update(&[result as u8]);
        }
    }
    for func in &module.functions {
        hasher.update(&func.type_idx.to_le_bytes());
        match &func.kind {
            crate::types::FunctionKind::Import {
                module_name,
                field_name,
            } => {
                hasher.update(module_name.as_bytes());
                hasher.update(field_name.as_bytes());
            }
            crate::types::FunctionKind::Bytecode(body) => {
                for &ty in &body.local_types {
                    hasher.update(&[ty as u8]);
                }
                hasher.update(&body.code);
            }
        }
    }
    let mut digest = [0u8; 32];
    hasher.finalize(&mut digest);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModuleBuilder, ValueType};
    use hex_literal::hex;

    fn sample_module() -> alloc::sync::Arc<Module> {
        let mut builder = ModuleBuilder::new();
        let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I64]);
        builder.push_func(tidx, vec![ValueType::I64], vec![0x42, 0x07, 0x0B], 8, 2);
        builder.finish()
    }

    #[test]
    fn stack_image_round_trip() {
        let module = sample_module();
        let image = StackImage {
            entry_fidx: 0,
            return_fidx: 0,
            return_offset: 2,
            // locals: i32 param + i64 local, then one live i64
            type_tags: vec![0, 1, 1],
            locals_cells: vec![7, 1, 2],
            value_stack_cells: vec![3, 4],
            ctrl_records: vec![CtrlRecord {
                begin: 0,
                target: 2,
                sp_ofs: 0,
                tsp_ofs: 0,
                cell_num: 2,
                count: 1,
            }],
        };
        let encoded = image.encode();
        let decoded = StackImage::decode(&encoded, &module).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn bad_type_tag_is_fatal() {
        let module = sample_module();
        let mut image = StackImage {
            entry_fidx: 0,
            return_fidx: 0,
            return_offset: 0,
            type_tags: vec![0, 1, 2],
            locals_cells: vec![0, 0, 0],
            value_stack_cells: vec![0, 0, 0],
            ctrl_records: vec![],
        };
        let encoded = image.encode();
        assert!(matches!(
            StackImage::decode(&encoded, &module),
            Err(RestoreError::MalformedTypeTag)
        ));
        image.type_tags = vec![0];
        let encoded = image.encode();
        assert!(matches!(
            StackImage::decode(&encoded, &module),
            Err(RestoreError::FrameMismatch(_))
        ));
    }

    #[test]
    fn truncated_stack_image_is_fatal() {
        let module = sample_module();
        let buf = hex!("00000000 00000000");
        assert!(matches!(
            StackImage::decode(&buf, &module),
            Err(RestoreError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn page_records_stream_in_order() {
        let mut buf = Vec::new();
        for offset in [0u32, 8192] {
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&[offset as u8 + 1; N_BYTES_PER_IMAGE_PAGE as usize]);
        }
        let mut seen = Vec::new();
        for_each_page_record(&buf, |offset, page| {
            seen.push((offset, page[0]));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(0, 1), (8192, 1)]);
    }

    #[test]
    fn fingerprint_tracks_code_changes() {
        let module_a = sample_module();
        let fp_a = module_fingerprint(&module_a);
        let mut builder = ModuleBuilder::new();
        let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I64]);
        builder.push_func(tidx, vec![ValueType::I64], vec![0x42, 0x08, 0x0B], 8, 2);
        let module_b = builder.finish();
        assert_ne!(fp_a, module_fingerprint(&module_b));
        assert_eq!(fp_a, module_fingerprint(&sample_module()));
    }
}

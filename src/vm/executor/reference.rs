use crate::types::{TrapCode, NULL_REF};
use crate::vm::executor::Executor;
use crate::vm::opcode::{MiscOp, Opcode};
use crate::vm::table::TableEntity;

pub(crate) fn exec_reference_opcode<T>(
    vm: &mut Executor<T>,
    opcode: Opcode,
) -> Result<(), TrapCode> {
    use Opcode::*;
    match opcode {
        TableGet => {
            let table_idx = vm.imm_leb_u32()?;
            let elem_idx = vm.top().pop_u32();
            let instance = vm.instance.clone();
            let value = instance
                .tables
                .get(table_idx as usize)
                .ok_or(TrapCode::TableOutOfBounds)?
                .read()
                .get(elem_idx)
                .ok_or(TrapCode::TableOutOfBounds)?;
            vm.top().push_u32(value);
        }
        TableSet => {
            let table_idx = vm.imm_leb_u32()?;
            let value = vm.top().pop_u32();
            let elem_idx = vm.top().pop_u32();
            let instance = vm.instance.clone();
            instance
                .tables
                .get(table_idx as usize)
                .ok_or(TrapCode::TableOutOfBounds)?
                .write()
                .set(elem_idx, value)?;
        }
        RefNull => {
            let _ref_type = vm.imm_leb_u32()?;
            vm.top().push_u32(NULL_REF);
        }
        RefIsNull => {
            let value = vm.top().pop_u32();
            vm.top().push_u32((value == NULL_REF) as u32);
        }
        RefFunc => {
            let func_idx = vm.imm_leb_u32()?;
            vm.top().push_u32(func_idx);
        }
        _ => return Err(TrapCode::UnsupportedOpcode),
    }
    Ok(())
}

/// The table-management sub-opcodes of the misc prefix.
pub(crate) fn exec_table_misc_opcode<T>(vm: &mut Executor<T>, op: MiscOp) -> Result<(), TrapCode> {
    use MiscOp::*;
    match op {
        TableInit => {
            let segment_idx = vm.imm_leb_u32()?;
            let table_idx = vm.imm_leb_u32()?;
            let len = vm.top().pop_u32();
            let src = vm.top().pop_u32();
            let dst = vm.top().pop_u32();
            let instance = vm.instance.clone();
            let segment = instance
                .module
                .element_segments
                .get(segment_idx as usize)
                .ok_or(TrapCode::TableOutOfBounds)?;
            let elements: &[u32] = if instance.is_element_segment_dropped(segment_idx) {
                &[]
            } else {
                &segment.func_indexes
            };
            instance
                .tables
                .get(table_idx as usize)
                .ok_or(TrapCode::TableOutOfBounds)?
                .write()
                .init(dst, elements, src, len)?;
        }
        ElemDrop => {
            let segment_idx = vm.imm_leb_u32()?;
            vm.instance.drop_element_segment(segment_idx);
        }
        TableCopy => {
            let dst_table_idx = vm.imm_leb_u32()?;
            let src_table_idx = vm.imm_leb_u32()?;
            let len = vm.top().pop_u32();
            let src = vm.top().pop_u32();
            let dst = vm.top().pop_u32();
            let instance = vm.instance.clone();
            if dst_table_idx == src_table_idx {
                instance
                    .tables
                    .get(dst_table_idx as usize)
                    .ok_or(TrapCode::TableOutOfBounds)?
                    .write()
                    .copy_within(dst, src, len)?;
            } else {
                let mut dst_table = instance
                    .tables
                    .get(dst_table_idx as usize)
                    .ok_or(TrapCode::TableOutOfBounds)?
                    .write();
                let src_table = instance
                    .tables
                    .get(src_table_idx as usize)
                    .ok_or(TrapCode::TableOutOfBounds)?
                    .read();
                TableEntity::copy(&mut dst_table, dst, &src_table, src, len)?;
            }
        }
        TableGrow => {
            let table_idx = vm.imm_leb_u32()?;
            let delta = vm.top().pop_u32();
            let init = vm.top().pop_u32();
            let instance = vm.instance.clone();
            let prev = instance
                .tables
                .get(table_idx as usize)
                .ok_or(TrapCode::TableOutOfBounds)?
                .write()
                .grow(delta, init);
            vm.top().push_u32(prev);
        }
        TableSize => {
            let table_idx = vm.imm_leb_u32()?;
            let instance = vm.instance.clone();
            let size = instance
                .tables
                .get(table_idx as usize)
                .ok_or(TrapCode::TableOutOfBounds)?
                .read()
                .size();
            vm.top().push_u32(size);
        }
        TableFill => {
            let table_idx = vm.imm_leb_u32()?;
            let len = vm.top().pop_u32();
            let value = vm.top().pop_u32();
            let start = vm.top().pop_u32();
            let instance = vm.instance.clone();
            instance
                .tables
                .get(table_idx as usize)
                .ok_or(TrapCode::TableOutOfBounds)?
                .write()
                .fill(start, value, len)?;
        }
        _ => return Err(TrapCode::UnsupportedOpcode),
    }
    Ok(())
}

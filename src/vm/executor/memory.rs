use crate::types::{TrapCode, UntypedValue};
use crate::vm::executor::{numeric, reference, Executor};
use crate::vm::opcode::{MiscOp, Opcode};

impl<T> Executor<T> {
    /// Decodes the `align`/`offset` immediates, pops the base address
    /// and applies the bounds policy for a `SIZE`-byte access.
    fn memory_operand<const SIZE: usize>(&mut self) -> Result<u64, TrapCode> {
        let _align = self.imm_leb_u32()?;
        let offset = self.imm_leb_u32()?;
        let base = self.top().pop_u32();
        let effective = base as u64 + offset as u64;
        self.check_memory_access(effective, SIZE as u64)?;
        Ok(effective)
    }
}

pub(crate) fn exec_memory_opcode<T>(vm: &mut Executor<T>, opcode: Opcode) -> Result<(), TrapCode> {
    use Opcode::*;
    match opcode {
        I32Load | F32Load => {
            let effective = vm.memory_operand::<4>()?;
            let bytes = vm.require_memory()?.load_bytes::<4>(effective)?;
            vm.top().push_u32(u32::from_le_bytes(bytes));
        }
        I64Load | F64Load => {
            let effective = vm.memory_operand::<8>()?;
            let bytes = vm.require_memory()?.load_bytes::<8>(effective)?;
            vm.top().push_64(UntypedValue::from(u64::from_le_bytes(bytes)));
        }
        I32Load8S => {
            let effective = vm.memory_operand::<1>()?;
            let bytes = vm.require_memory()?.load_bytes::<1>(effective)?;
            vm.top().push_i32(bytes[0] as i8 as i32);
        }
        I32Load8U => {
            let effective = vm.memory_operand::<1>()?;
            let bytes = vm.require_memory()?.load_bytes::<1>(effective)?;
            vm.top().push_u32(bytes[0] as u32);
        }
        I32Load16S => {
            let effective = vm.memory_operand::<2>()?;
            let bytes = vm.require_memory()?.load_bytes::<2>(effective)?;
            vm.top().push_i32(i16::from_le_bytes(bytes) as i32);
        }
        I32Load16U => {
            let effective = vm.memory_operand::<2>()?;
            let bytes = vm.require_memory()?.load_bytes::<2>(effective)?;
            vm.top().push_u32(u16::from_le_bytes(bytes) as u32);
        }
        I64Load8S => {
            let effective = vm.memory_operand::<1>()?;
            let bytes = vm.require_memory()?.load_bytes::<1>(effective)?;
            vm.top().push_i64(bytes[0] as i8 as i64);
        }
        I64Load8U => {
            let effective = vm.memory_operand::<1>()?;
            let bytes = vm.require_memory()?.load_bytes::<1>(effective)?;
            vm.top().push_i64(bytes[0] as i64);
        }
        I64Load16S => {
            let effective = vm.memory_operand::<2>()?;
            let bytes = vm.require_memory()?.load_bytes::<2>(effective)?;
            vm.top().push_i64(i16::from_le_bytes(bytes) as i64);
        }
        I64Load16U => {
            let effective = vm.memory_operand::<2>()?;
            let bytes = vm.require_memory()?.load_bytes::<2>(effective)?;
            vm.top().push_i64(u16::from_le_bytes(bytes) as i64);
        }
        I64Load32S => {
            let effective = vm.memory_operand::<4>()?;
            let bytes = vm.require_memory()?.load_bytes::<4>(effective)?;
            vm.top().push_i64(i32::from_le_bytes(bytes) as i64);
        }
        I64Load32U => {
            let effective = vm.memory_operand::<4>()?;
            let bytes = vm.require_memory()?.load_bytes::<4>(effective)?;
            vm.top().push_i64(u32::from_le_bytes(bytes) as i64);
        }

        I32Store | F32Store => {
            let _align = vm.imm_leb_u32()?;
            let offset = vm.imm_leb_u32()?;
            let value = vm.top().pop_u32();
            let base = vm.top().pop_u32();
            let effective = base as u64 + offset as u64;
            vm.check_memory_access(effective, 4)?;
            vm.require_memory()?.store_bytes(effective, value.to_le_bytes())?;
        }
        I64Store | F64Store => {
            let _align = vm.imm_leb_u32()?;
            let offset = vm.imm_leb_u32()?;
            let value = vm.top().pop_u64();
            let base = vm.top().pop_u32();
            let effective = base as u64 + offset as u64;
            vm.check_memory_access(effective, 8)?;
            vm.require_memory()?.store_bytes(effective, value.to_le_bytes())?;
        }
        I32Store8 => {
            let _align = vm.imm_leb_u32()?;
            let offset = vm.imm_leb_u32()?;
            let value = vm.top().pop_u32();
            let base = vm.top().pop_u32();
            let effective = base as u64 + offset as u64;
            vm.check_memory_access(effective, 1)?;
            vm.require_memory()?.store_bytes(effective, [value as u8])?;
        }
        I32Store16 => {
            let _align = vm.imm_leb_u32()?;
            let offset = vm.imm_leb_u32()?;
            let value = vm.top().pop_u32();
            let base = vm.top().pop_u32();
            let effective = base as u64 + offset as u64;
            vm.check_memory_access(effective, 2)?;
            vm.require_memory()?
                .store_bytes(effective, (value as u16).to_le_bytes())?;
        }
        I64Store8 => {
            let _align = vm.imm_leb_u32()?;
            let offset = vm.imm_leb_u32()?;
            let value = vm.top().pop_u64();
            let base = vm.top().pop_u32();
            let effective = base as u64 + offset as u64;
            vm.check_memory_access(effective, 1)?;
            vm.require_memory()?.store_bytes(effective, [value as u8])?;
        }
        I64Store16 => {
            let _align = vm.imm_leb_u32()?;
            let offset = vm.imm_leb_u32()?;
            let value = vm.top().pop_u64();
            let base = vm.top().pop_u32();
            let effective = base as u64 + offset as u64;
            vm.check_memory_access(effective, 2)?;
            vm.require_memory()?
                .store_bytes(effective, (value as u16).to_le_bytes())?;
        }
        I64Store32 => {
            let _align = vm.imm_leb_u32()?;
            let offset = vm.imm_leb_u32()?;
            let value = vm.top().pop_u64();
            let base = vm.top().pop_u32();
            let effective = base as u64 + offset as u64;
            vm.check_memory_access(effective, 4)?;
            vm.require_memory()?
                .store_bytes(effective, (value as u32).to_le_bytes())?;
        }

        MemorySize => {
            let _reserved = vm.imm_leb_u32()?;
            let pages = vm.require_memory()?.current_pages();
            vm.top().push_u32(pages);
        }
        MemoryGrow => {
            let _reserved = vm.imm_leb_u32()?;
            let delta = vm.top().pop_u32();
            let memory = vm.require_memory()?.clone();
            match memory.grow(delta) {
                Ok(prev_pages) => {
                    vm.top().push_u32(prev_pages);
                    // the cached size is stale after a successful grow
                    vm.refresh_mem_size();
                }
                Err(_) => vm.top().push_i32(-1),
            }
        }

        _ => return Err(TrapCode::UnsupportedOpcode),
    }
    Ok(())
}

/// The `0xFC` misc prefix: saturating truncation, bulk memory and the
/// table management family.
pub(crate) fn exec_misc_opcode<T>(vm: &mut Executor<T>) -> Result<(), TrapCode> {
    let sub = vm.fetch_u8()?;
    let op = MiscOp::from_byte(sub).ok_or(TrapCode::UnsupportedOpcode)?;
    use MiscOp::*;
    match op {
        I32TruncSatF32S | I32TruncSatF32U | I32TruncSatF64S | I32TruncSatF64U
        | I64TruncSatF32S | I64TruncSatF32U | I64TruncSatF64S | I64TruncSatF64U => {
            numeric::exec_trunc_sat(vm.top(), op);
        }

        MemoryInit => {
            let segment_idx = vm.imm_leb_u32()?;
            let _mem_idx = vm.fetch_u8()?;
            let len = vm.top().pop_u32() as u64;
            let src = vm.top().pop_u32() as u64;
            let dst = vm.top().pop_u32() as u64;
            let instance = vm.instance.clone();
            let segment = instance
                .module
                .data_segments
                .get(segment_idx as usize)
                .ok_or(TrapCode::MemoryOutOfBounds)?;
            let bytes: &[u8] = if instance.is_data_segment_dropped(segment_idx) {
                &[]
            } else {
                &segment.data
            };
            vm.require_memory()?.init(dst, bytes, src, len)?;
        }
        DataDrop => {
            let segment_idx = vm.imm_leb_u32()?;
            vm.instance.drop_data_segment(segment_idx);
        }
        MemoryCopy => {
            // two reserved memory index bytes
            let _dst_mem = vm.fetch_u8()?;
            let _src_mem = vm.fetch_u8()?;
            let len = vm.top().pop_u32() as u64;
            let src = vm.top().pop_u32() as u64;
            let dst = vm.top().pop_u32() as u64;
            vm.require_memory()?.copy_within(dst, src, len)?;
        }
        MemoryFill => {
            let _mem_idx = vm.fetch_u8()?;
            let len = vm.top().pop_u32() as u64;
            let value = vm.top().pop_u32() as u8;
            let dst = vm.top().pop_u32() as u64;
            vm.require_memory()?.fill(dst, value, len)?;
        }

        TableInit | ElemDrop | TableCopy | TableGrow | TableSize | TableFill => {
            reference::exec_table_misc_opcode(vm, op)?;
        }
    }
    Ok(())
}

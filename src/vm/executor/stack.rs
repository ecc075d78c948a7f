use crate::types::{TrapCode, UntypedValue, ValueType};
use crate::vm::executor::Executor;
use crate::vm::opcode::Opcode;

impl<T> Executor<T> {
    /// Cell offset and width of a local, from the function's local
    /// directory.
    fn local_info(&self, local_idx: u32) -> Result<(usize, bool), TrapCode> {
        let body = self
            .instance
            .module
            .func(self.cur_func_idx)
            .and_then(|func| func.code_body())
            .ok_or(TrapCode::UnknownFunction)?;
        let offset = *body
            .local_offsets
            .get(local_idx as usize)
            .ok_or(TrapCode::UnsupportedOpcode)? as usize;
        let is_64 = body.local_types_flat[local_idx as usize].is_64bit();
        Ok((offset, is_64))
    }
}

pub(crate) fn exec_stack_opcode<T>(vm: &mut Executor<T>, opcode: Opcode) -> Result<(), TrapCode> {
    use Opcode::*;
    match opcode {
        Drop => {
            vm.top().drop_values(1, 1);
        }
        Drop64 => {
            vm.top().drop_values(2, 1);
        }
        Select => {
            let frame = vm.top();
            let condition = frame.pop_i32();
            let on_false = frame.pop_32();
            let on_true = frame.pop_32();
            frame.push_32(if condition != 0 { on_true } else { on_false });
        }
        Select64 => {
            let frame = vm.top();
            let condition = frame.pop_i32();
            let on_false = frame.pop_64();
            let on_true = frame.pop_64();
            frame.push_64(if condition != 0 { on_true } else { on_false });
        }
        SelectT => {
            let vec_len = vm.imm_leb_u32()?;
            let mut value_type = None;
            for index in 0..vec_len {
                let byte = vm.fetch_u8()?;
                if index == 0 {
                    value_type =
                        Some(ValueType::from_byte(byte).ok_or(TrapCode::UnsupportedOpcode)?);
                }
            }
            let value_type = value_type.ok_or(TrapCode::UnsupportedOpcode)?;
            let frame = vm.top();
            let condition = frame.pop_i32();
            if value_type.is_64bit() {
                let on_false = frame.pop_64();
                let on_true = frame.pop_64();
                frame.push_64(if condition != 0 { on_true } else { on_false });
            } else {
                let on_false = frame.pop_32();
                let on_true = frame.pop_32();
                frame.push_32(if condition != 0 { on_true } else { on_false });
            }
        }

        LocalGet => {
            let local_idx = vm.imm_leb_u32()?;
            let (offset, is_64) = vm.local_info(local_idx)?;
            let frame = vm.top();
            if is_64 {
                let value = frame.local_64(offset);
                frame.push_64(value);
            } else {
                let value = frame.local_32(offset);
                frame.push_32(value);
            }
        }
        LocalSet => {
            let local_idx = vm.imm_leb_u32()?;
            let (offset, is_64) = vm.local_info(local_idx)?;
            let frame = vm.top();
            if is_64 {
                let value = frame.pop_64();
                frame.set_local_64(offset, value);
            } else {
                let value = frame.pop_32();
                frame.set_local_32(offset, value);
            }
        }
        LocalTee => {
            let local_idx = vm.imm_leb_u32()?;
            let (offset, is_64) = vm.local_info(local_idx)?;
            let frame = vm.top();
            if is_64 {
                let value = UntypedValue::from_cells(
                    frame.cells[frame.sp - 2],
                    frame.cells[frame.sp - 1],
                );
                frame.set_local_64(offset, value);
            } else {
                let value = UntypedValue::from(frame.cells[frame.sp - 1]);
                frame.set_local_32(offset, value);
            }
        }

        GlobalGet => {
            let global_idx = vm.imm_leb_u32()?;
            let value = vm.instance.globals.get_32(global_idx);
            vm.top().push_u32(value);
        }
        GlobalGet64 => {
            let global_idx = vm.imm_leb_u32()?;
            let value = vm.instance.globals.get_64(global_idx);
            vm.top().push_64(UntypedValue::from(value));
        }
        GlobalSet => {
            let global_idx = vm.imm_leb_u32()?;
            let value = vm.top().pop_u32();
            vm.instance.globals.set_32(global_idx, value);
        }
        GlobalSet64 => {
            let global_idx = vm.imm_leb_u32()?;
            let value = vm.top().pop_u64();
            vm.instance.globals.set_64(global_idx, value);
        }
        SetGlobalAuxStack => {
            let global_idx = vm.imm_leb_u32()?;
            let bounds = vm.aux_stack;
            let frame = vm.top();
            let aux_stack_top = frame.cells[frame.sp - 1];
            if let Some(bounds) = bounds {
                if aux_stack_top <= bounds.boundary {
                    return Err(TrapCode::AuxStackOverflow);
                }
                if aux_stack_top > bounds.bottom {
                    return Err(TrapCode::AuxStackUnderflow);
                }
            }
            vm.instance.globals.set_32(global_idx, aux_stack_top);
            vm.top().drop_values(1, 1);
        }

        I32Const => {
            let value = vm.imm_leb_i32()?;
            vm.top().push_i32(value);
        }
        I64Const => {
            let value = vm.imm_leb_i64()?;
            vm.top().push_i64(value);
        }
        F32Const => {
            let bits = vm.imm_f32_bits()?;
            vm.top().push_u32(bits);
        }
        F64Const => {
            let bits = vm.imm_f64_bits()?;
            vm.top().push_64(UntypedValue::from(bits));
        }

        _ => return Err(TrapCode::UnsupportedOpcode),
    }
    Ok(())
}

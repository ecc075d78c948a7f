use crate::types::{TrapCode, ValueType, WasmigError, BLOCK_TYPE_VOID, NULL_REF};
use crate::vm::executor::{Executor, Flow};
use crate::vm::opcode::Opcode;

/// Arity of a block header in cells and logical values.
struct BlockArity {
    param_cell_num: u32,
    param_count: u32,
    cell_num: u32,
    count: u32,
}

fn inline_block_arity(value_type: u8) -> Result<BlockArity, TrapCode> {
    let (cell_num, count) = if value_type == BLOCK_TYPE_VOID {
        (0, 0)
    } else {
        let ty = ValueType::from_byte(value_type).ok_or(TrapCode::UnsupportedOpcode)?;
        (ty.cell_num(), 1)
    };
    Ok(BlockArity {
        param_cell_num: 0,
        param_count: 0,
        cell_num,
        count,
    })
}

fn exec_block<T>(
    vm: &mut Executor<T>,
    arity: BlockArity,
) -> Result<(), WasmigError> {
    let body_start = vm.top().ip.expect("wasmig: block in ip-less frame");
    let code = vm.cur_code.clone();
    let (_, end_addr) = vm
        .block_cache
        .lookup(vm.cur_func_idx, &code, body_start)
        .map_err(|_| TrapCode::FindBlockAddrFailed)?;
    vm.top().push_ctrl(
        body_start,
        end_addr,
        arity.param_cell_num,
        arity.param_count,
        arity.cell_num,
        arity.count,
    )?;
    Ok(())
}

fn exec_loop<T>(vm: &mut Executor<T>, arity: BlockArity) -> Result<(), WasmigError> {
    // a branch to a loop re-enters at its head
    let body_start = vm.top().ip.expect("wasmig: loop in ip-less frame");
    vm.top().push_ctrl(
        body_start,
        body_start,
        arity.param_cell_num,
        arity.param_count,
        arity.cell_num,
        arity.count,
    )?;
    Ok(())
}

fn exec_if<T>(vm: &mut Executor<T>, arity: BlockArity) -> Result<(), WasmigError> {
    let body_start = vm.top().ip.expect("wasmig: if in ip-less frame");
    let code = vm.cur_code.clone();
    let (else_addr, end_addr) = vm
        .block_cache
        .lookup(vm.cur_func_idx, &code, body_start)
        .map_err(|_| TrapCode::FindBlockAddrFailed)?;

    let condition = vm.top().pop_i32();
    if condition != 0 {
        vm.top().push_ctrl(
            body_start,
            end_addr,
            arity.param_cell_num,
            arity.param_count,
            arity.cell_num,
            arity.count,
        )?;
    } else {
        match else_addr {
            // no else arm: skip the whole block
            None => vm.top().ip = Some(end_addr + 1),
            Some(else_addr) => {
                vm.top().push_ctrl(
                    body_start,
                    end_addr,
                    arity.param_cell_num,
                    arity.param_count,
                    arity.cell_num,
                    arity.count,
                )?;
                vm.top().ip = Some(else_addr + 1);
            }
        }
    }
    Ok(())
}

fn type_block_arity<T>(vm: &mut Executor<T>, for_loop: bool) -> Result<BlockArity, TrapCode> {
    let type_idx = vm.imm_leb_u32()?;
    let func_type = vm
        .instance
        .module
        .types
        .get(type_idx as usize)
        .ok_or(TrapCode::UnsupportedOpcode)?;
    let (cell_num, count) = if for_loop {
        (func_type.param_cell_num, func_type.param_count())
    } else {
        (func_type.ret_cell_num, func_type.result_count())
    };
    Ok(BlockArity {
        param_cell_num: func_type.param_cell_num,
        param_count: func_type.param_count(),
        cell_num,
        count,
    })
}

pub(crate) fn exec_control_opcode<T>(
    vm: &mut Executor<T>,
    opcode: Opcode,
) -> Result<Flow, WasmigError> {
    use Opcode::*;
    match opcode {
        Unreachable => {
            return Err(TrapCode::UnreachableCodeReached.into());
        }
        Nop => {}

        Block => {
            let value_type = vm.fetch_u8()?;
            let arity = inline_block_arity(value_type)?;
            exec_block(vm, arity)?;
        }
        ExtBlock => {
            let arity = type_block_arity(vm, false)?;
            exec_block(vm, arity)?;
        }
        Loop => {
            let _value_type = vm.fetch_u8()?;
            let arity = BlockArity {
                param_cell_num: 0,
                param_count: 0,
                cell_num: 0,
                count: 0,
            };
            exec_loop(vm, arity)?;
        }
        ExtLoop => {
            let arity = type_block_arity(vm, true)?;
            exec_loop(vm, arity)?;
        }
        If => {
            let value_type = vm.fetch_u8()?;
            let arity = inline_block_arity(value_type)?;
            exec_if(vm, arity)?;
        }
        ExtIf => {
            let arity = type_block_arity(vm, false)?;
            exec_if(vm, arity)?;
        }
        Else => {
            // only reachable from the taken `if` arm: jump to `end`
            let target = vm
                .top()
                .ctrl_top()
                .expect("wasmig: else outside of a block")
                .target;
            vm.top().ip = Some(target);
        }
        End => {
            if vm.top().ctrl_depth() > 1 {
                vm.top().pop_ctrl();
            } else {
                // end of the function body behaves as `return`
                return vm.do_return();
            }
        }

        Br => {
            vm.check_suspend()?;
            let depth = vm.imm_leb_u32()?;
            let target = vm.top().branch(depth as usize)?;
            vm.top().ip = Some(target);
        }
        BrIf => {
            vm.check_suspend()?;
            let depth = vm.imm_leb_u32()?;
            let condition = vm.top().pop_i32();
            if condition != 0 {
                let target = vm.top().branch(depth as usize)?;
                vm.top().ip = Some(target);
            }
        }
        BrTable => {
            vm.check_suspend()?;
            let count = vm.imm_leb_u32()?;
            let selector = vm.top().pop_u32();
            // out-of-range selectors take the default arm
            let chosen = selector.min(count);
            for _ in 0..chosen {
                vm.skip_imm_leb()?;
            }
            let depth = vm.imm_leb_u32()?;
            let target = vm.top().branch(depth as usize)?;
            vm.top().ip = Some(target);
        }

        Return => {
            return vm.do_return();
        }

        Call => {
            vm.check_suspend()?;
            let func_idx = vm.imm_leb_u32()?;
            vm.call_function(func_idx)?;
        }
        CallIndirect => {
            vm.check_suspend()?;
            let func_idx = resolve_indirect_target(vm)?;
            vm.call_function(func_idx)?;
        }
        ReturnCall => {
            vm.check_suspend()?;
            let func_idx = vm.imm_leb_u32()?;
            vm.tail_call_function(func_idx)?;
            if vm.top().ip.is_none() {
                return Ok(Flow::Finished);
            }
        }
        ReturnCallIndirect => {
            vm.check_suspend()?;
            let func_idx = resolve_indirect_target(vm)?;
            vm.tail_call_function(func_idx)?;
            if vm.top().ip.is_none() {
                return Ok(Flow::Finished);
            }
        }

        _ => return Err(TrapCode::UnsupportedOpcode.into()),
    }
    Ok(Flow::Continue)
}

/// Decodes and checks a `call_indirect` site, returning the resolved
/// function index.
fn resolve_indirect_target<T>(vm: &mut Executor<T>) -> Result<u32, WasmigError> {
    let type_idx = vm.imm_leb_u32()?;
    let table_idx = vm.imm_leb_u32()?;
    let elem_idx = vm.top().pop_u32();

    let instance = vm.instance.clone();
    let table = instance
        .tables
        .get(table_idx as usize)
        .ok_or(TrapCode::TableOutOfBounds)?
        .read();
    let func_ref = table.get(elem_idx).ok_or(TrapCode::TableOutOfBounds)?;
    if func_ref == NULL_REF {
        return Err(TrapCode::IndirectCallToNull.into());
    }

    let module = &instance.module;
    let expected = module
        .types
        .get(type_idx as usize)
        .ok_or(TrapCode::UnsupportedOpcode)?;
    let actual = module
        .func_type_of(func_ref)
        .ok_or(TrapCode::UnknownFunction)?;
    if actual != expected {
        return Err(TrapCode::BadSignature.into());
    }
    Ok(func_ref)
}

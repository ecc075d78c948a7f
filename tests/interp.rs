mod common;

use assert_matches::assert_matches;
use common::{op, Asm};
use wasmig::{
    Executor, ExecutorConfig, ImportObject, ModuleBuilder, ModuleInstance, TrapCode, UntypedValue,
    ValueType, WasmigError, NULL_REF,
};

#[test]
fn add_mul_chain() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(
        vec![ValueType::I32, ValueType::I32, ValueType::I32],
        vec![ValueType::I32],
    );
    // (a + b) * c
    let code = Asm::new()
        .local_get(0)
        .local_get(1)
        .op(op::I32_ADD)
        .local_get(2)
        .op(op::I32_MUL)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 2);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    let results = vm.call(fidx, &[3, 4, 5]).unwrap();
    assert_eq!(results.as_slice(), &[35]);
}

#[test]
fn factorial_recursion() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    // f(n) = if n == 0 { 1 } else { n * f(n - 1) }
    let code = Asm::new()
        .local_get(0)
        .op(op::I32_EQZ)
        .block(op::IF, op::BLOCK_VOID)
        .i32_const(1)
        .op(op::RETURN)
        .end()
        .local_get(0)
        .local_get(0)
        .i32_const(1)
        .op(op::I32_SUB)
        .call(0)
        .op(op::I32_MUL)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 16, 4);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    let results = vm.call(fidx, &[10]).unwrap();
    assert_eq!(results.as_slice(), &[3628800]);
}

#[test]
fn shift_count_modulo_width() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![ValueType::I32]);
    let code = Asm::new()
        .i32_const(1)
        .i32_const(33)
        .op(op::I32_SHL)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[]).unwrap().as_slice(), &[2]);
}

#[test]
fn div_s_overflow_traps_with_message() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![ValueType::I32]);
    let code = Asm::new()
        .i32_const(i32::MIN)
        .i32_const(-1)
        .op(op::I32_DIV_S)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());
    let err = vm.call(fidx, &[]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::IntegerOverflow));
    assert_eq!(instance.copy_exception().as_deref(), Some("integer overflow"));
}

#[test]
fn unreachable_traps() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![]);
    let code = Asm::new().op(op::UNREACHABLE).end().finish();
    let fidx = builder.push_func(tidx, vec![], code, 4, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());
    let err = vm.call(fidx, &[]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::UnreachableCodeReached));
    assert_eq!(instance.copy_exception().as_deref(), Some("unreachable"));
}

#[test]
fn branch_arity_keeps_top_value() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![ValueType::I64]);
    // a block yielding i64 with scratch below the result when the
    // branch fires
    let code = Asm::new()
        .block(op::BLOCK, op::TYPE_I64)
        .i32_const(7)
        .i64_const(0x0000_0001_0000_0002)
        .br(0)
        .end()
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 16, 2);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    let results = vm.call(fidx, &[]).unwrap();
    // two cells, little-endian halves of the i64
    assert_eq!(results.as_slice(), &[2, 1]);
}

#[test]
fn loop_with_br_if_counts() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    // local1 = 0; loop { local1 += 2; local0 -= 1; br_if local0 != 0 }
    let code = Asm::new()
        .block(op::LOOP, op::BLOCK_VOID)
        .local_get(1)
        .i32_const(2)
        .op(op::I32_ADD)
        .local_set(1)
        .local_get(0)
        .i32_const(1)
        .op(op::I32_SUB)
        .op(op::LOCAL_TEE)
        .leb_u32(0)
        .br_if(0)
        .end()
        .local_get(1)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![ValueType::I32], code, 16, 2);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[100]).unwrap().as_slice(), &[200]);
}

#[test]
fn if_else_both_arms() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let code = Asm::new()
        .local_get(0)
        .block(op::IF, op::TYPE_I32)
        .i32_const(11)
        .op(op::ELSE)
        .i32_const(22)
        .end()
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 2);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[1]).unwrap().as_slice(), &[11]);
    assert_eq!(vm.call(fidx, &[0]).unwrap().as_slice(), &[22]);
}

#[test]
fn br_table_clamps_to_default() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    // br_table with arms [0 -> 10, 1 -> 20], default -> 30
    let code = Asm::new()
        .block(op::BLOCK, op::TYPE_I32)
        .block(op::BLOCK, op::BLOCK_VOID)
        .block(op::BLOCK, op::BLOCK_VOID)
        .block(op::BLOCK, op::BLOCK_VOID)
        .local_get(0)
        .op(op::BR_TABLE)
        .leb_u32(2)
        .leb_u32(0)
        .leb_u32(1)
        .leb_u32(2)
        .end()
        .i32_const(10)
        .br(2)
        .end()
        .i32_const(20)
        .br(1)
        .end()
        .i32_const(30)
        .end()
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 16, 6);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[0]).unwrap().as_slice(), &[10]);
    assert_eq!(vm.call(fidx, &[1]).unwrap().as_slice(), &[20]);
    assert_eq!(vm.call(fidx, &[2]).unwrap().as_slice(), &[30]);
    // out-of-range selector takes the default arm
    assert_eq!(vm.call(fidx, &[700]).unwrap().as_slice(), &[30]);
}

#[test]
fn call_indirect_type_mismatch() {
    let mut builder = ModuleBuilder::new();
    let t_i32 = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let t_i64 = builder.push_type(vec![ValueType::I64], vec![ValueType::I64]);
    let callee_code = Asm::new().local_get(0).end().finish();
    let callee = builder.push_func(t_i64, vec![], callee_code, 8, 1);
    let caller_code = Asm::new()
        .i32_const(5)
        .i32_const(0)
        .call_indirect(t_i32, 0)
        .end()
        .finish();
    let caller = builder.push_func(t_i32, vec![], caller_code, 8, 1);
    builder.push_table(2, 2);
    builder.push_element_segment(vec![callee], Some((0, 0)));
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());
    let err = vm.call(caller, &[0]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::BadSignature));
    assert_eq!(
        instance.copy_exception().as_deref(),
        Some("indirect call type mismatch")
    );
}

#[test]
fn call_indirect_null_and_out_of_bounds() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![ValueType::I32]);
    let callee_code = Asm::new().i32_const(9).end().finish();
    let _callee = builder.push_func(tidx, vec![], callee_code, 8, 1);
    let caller_code = Asm::new()
        .local_get(0)
        .call_indirect(tidx, 0)
        .end()
        .finish();
    let t_caller = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let caller = builder.push_func(t_caller, vec![], caller_code, 8, 1);
    builder.push_table(4, 4);
    // element 0 stays NULL_REF, nothing is active-initialized
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());

    let err = vm.call(caller, &[0]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::IndirectCallToNull));
    assert_eq!(
        instance.copy_exception().as_deref(),
        Some("uninitialized element")
    );

    let err = vm.call(caller, &[100]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::TableOutOfBounds));
}

#[test]
fn tail_call_replaces_frame() {
    let mut builder = ModuleBuilder::new();
    // sum(n, acc): if n == 0 return acc else return_call sum(n-1, acc+n)
    let tidx = builder.push_type(
        vec![ValueType::I32, ValueType::I32],
        vec![ValueType::I32],
    );
    let code = Asm::new()
        .local_get(0)
        .op(op::I32_EQZ)
        .block(op::IF, op::BLOCK_VOID)
        .local_get(1)
        .op(op::RETURN)
        .end()
        .local_get(0)
        .i32_const(1)
        .op(op::I32_SUB)
        .local_get(1)
        .local_get(0)
        .op(op::I32_ADD)
        .op(op::RETURN_CALL)
        .leb_u32(0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 16, 4);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    // a stack arena that deep non-tail recursion could never fit
    let config = ExecutorConfig::new().with_wasm_stack_cells(4096);
    let mut vm = Executor::new(instance, config, ());
    let results = vm.call(fidx, &[100_000, 0]).unwrap();
    assert_eq!(results.as_slice(), &[705_082_704]);
}

#[test]
fn deep_recursion_exhausts_operand_stack() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let code = Asm::new()
        .local_get(0)
        .i32_const(1)
        .op(op::I32_ADD)
        .call(0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(
        instance.clone(),
        ExecutorConfig::new().with_wasm_stack_cells(2048),
        (),
    );
    let err = vm.call(fidx, &[0]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::StackOverflow));
    assert_eq!(
        instance.copy_exception().as_deref(),
        Some("wasm operand stack overflow")
    );
}

#[test]
fn memcopy_pattern() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![]);
    let code = Asm::new()
        .i32_const(1024)
        .i32_const(0)
        .i32_const(4096)
        .misc(10)
        .byte(0)
        .byte(0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    builder.push_memory(1, 4, false);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let memory = instance.default_memory().unwrap();
    let pattern: Vec<u8> = (0u32..4096).map(|i| (i % 251) as u8).collect();
    memory.write(0, &pattern).unwrap();

    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    vm.call(fidx, &[]).unwrap();

    let mut copied = vec![0u8; 4096];
    memory.read(1024, &mut copied).unwrap();
    assert_eq!(copied, pattern);
}

#[test]
fn memory_grow_preserves_contents() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let code = Asm::new()
        .local_get(0)
        .op(op::MEMORY_GROW)
        .leb_u32(0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    builder.push_memory(1, 3, false);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let memory = instance.default_memory().unwrap();
    memory.write(0, &[0xAB, 0xCD]).unwrap();

    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[2]).unwrap().as_slice(), &[1]);
    assert_eq!(memory.current_pages(), 3);
    assert_eq!(memory.data_size(), 3 * 65536);
    let mut probe = [0u8; 2];
    memory.read(0, &mut probe).unwrap();
    assert_eq!(probe, [0xAB, 0xCD]);
    // over the limit: -1, state unchanged
    assert_eq!(vm.call(fidx, &[1]).unwrap().as_slice(), &[u32::MAX]);
    assert_eq!(memory.current_pages(), 3);
}

#[test]
fn out_of_bounds_load_traps() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let code = Asm::new()
        .local_get(0)
        .mem_op(op::I32_LOAD, 2, 0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    builder.push_memory(1, 1, false);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[0]).unwrap().as_slice(), &[0]);
    let err = vm.call(fidx, &[65533]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::MemoryOutOfBounds));
    assert_eq!(
        instance.copy_exception().as_deref(),
        Some("out of bounds memory access")
    );
}

#[test]
fn narrow_loads_extend_correctly() {
    let mut builder = ModuleBuilder::new();
    let t_s = builder.push_type(vec![], vec![ValueType::I32]);
    let signed_code = Asm::new()
        .i32_const(0)
        .mem_op(0x2C, 0, 0) // i32.load8_s
        .end()
        .finish();
    let signed = builder.push_func(t_s, vec![], signed_code, 8, 1);
    let unsigned_code = Asm::new()
        .i32_const(0)
        .mem_op(op::I32_LOAD8_U, 0, 0)
        .end()
        .finish();
    let unsigned = builder.push_func(t_s, vec![], unsigned_code, 8, 1);
    builder.push_memory(1, 1, false);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    instance.default_memory().unwrap().write(0, &[0xFF]).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(signed, &[]).unwrap().as_slice(), &[u32::MAX]);
    assert_eq!(vm.call(unsigned, &[]).unwrap().as_slice(), &[0xFF]);
}

#[test]
fn reinterpret_round_trip_is_identity() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let code = Asm::new()
        .local_get(0)
        .op(op::F32_REINTERPRET_I32)
        .op(op::I32_REINTERPRET_F32)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    for bits in [0, 1, 0x7FC0_0000, 0xFFFF_FFFF, 0x8000_0000] {
        assert_eq!(vm.call(fidx, &[bits]).unwrap().as_slice(), &[bits]);
    }
}

#[test]
fn float_64_arithmetic_and_select() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![ValueType::F64]);
    // select_64(1.5 + 2.25, 99.0, cond=1)
    let code = Asm::new()
        .f64_const(1.5)
        .f64_const(2.25)
        .op(op::F64_ADD)
        .f64_const(99.0)
        .i32_const(1)
        .op(op::SELECT_64)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 16, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    let results = vm.call(fidx, &[]).unwrap();
    let bits = UntypedValue::from_cells(results[0], results[1]).as_u64();
    assert_eq!(f64::from_bits(bits), 3.75);
}

#[test]
fn globals_wide_and_narrow() {
    let mut builder = ModuleBuilder::new();
    let g32 = builder.push_global(ValueType::I32, true, UntypedValue::from(5u32));
    let g64 = builder.push_global(ValueType::I64, true, UntypedValue::from(7u64));
    let tidx = builder.push_type(vec![], vec![ValueType::I64]);
    // g64 = g64 + i64(g32); return g64
    let code = Asm::new()
        .op(op::GLOBAL_GET_64)
        .leb_u32(g64)
        .global_get(g32)
        .op(op::I64_EXTEND_I32_U)
        .op(op::I64_ADD)
        .op(op::GLOBAL_SET_64)
        .leb_u32(g64)
        .op(op::GLOBAL_GET_64)
        .leb_u32(g64)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 16, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());
    let results = vm.call(fidx, &[]).unwrap();
    assert_eq!(UntypedValue::from_cells(results[0], results[1]).as_u64(), 12);
    assert_eq!(instance.globals.get_64(g64), 12);
}

#[test]
fn aux_stack_bounds_are_enforced() {
    let mut builder = ModuleBuilder::new();
    let sp_global = builder.push_global(ValueType::I32, true, UntypedValue::from(4096u32));
    let tidx = builder.push_type(vec![ValueType::I32], vec![]);
    let code = Asm::new()
        .local_get(0)
        .op(op::SET_GLOBAL_AUX_STACK)
        .leb_u32(sp_global)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let config = ExecutorConfig::new().with_aux_stack(4096, 1024);
    let mut vm = Executor::new(instance.clone(), config, ());

    vm.call(fidx, &[2048]).unwrap();
    assert_eq!(instance.globals.get_32(sp_global), 2048);

    let err = vm.call(fidx, &[512]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::AuxStackOverflow));
    assert_eq!(
        instance.copy_exception().as_deref(),
        Some("wasm auxiliary stack overflow")
    );

    let err = vm.call(fidx, &[8192]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::AuxStackUnderflow));
}

#[test]
fn unlinked_import_reports_canonical_message() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![]);
    builder.push_import_func(tidx, "env", "missing");
    let code = Asm::new().call(0).end().finish();
    let fidx = builder.push_func(tidx, vec![], code, 4, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());
    let err = vm.call(fidx, &[]).unwrap_err();
    assert_matches!(
        err,
        WasmigError::TrapCode(TrapCode::UnlinkedImportFunction)
    );
    assert_eq!(
        instance.copy_exception().as_deref(),
        Some("failed to call unlinked import function")
    );
}

#[test]
fn native_import_returns_values() {
    let mut builder = ModuleBuilder::new();
    let t_bin = builder.push_type(
        vec![ValueType::I32, ValueType::I32],
        vec![ValueType::I32],
    );
    builder.push_import_func(t_bin, "env", "host_add");
    let code = Asm::new()
        .local_get(0)
        .local_get(1)
        .call(0)
        .i32_const(100)
        .op(op::I32_ADD)
        .end()
        .finish();
    let fidx = builder.push_func(t_bin, vec![], code, 8, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    vm.set_native_handler(|_ctx, _fidx, _ty, args| {
        Ok(wasmig::SmallVec::from_slice(&[args[0].wrapping_add(args[1])]))
    });
    assert_eq!(vm.call(fidx, &[20, 3]).unwrap().as_slice(), &[123]);
}

#[test]
fn cross_module_import_call() {
    // upstream module exports a doubler
    let mut upstream_builder = ModuleBuilder::new();
    let t_un = upstream_builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let upstream_code = Asm::new()
        .local_get(0)
        .i32_const(2)
        .op(op::I32_MUL)
        .end()
        .finish();
    let double = upstream_builder.push_func(t_un, vec![], upstream_code, 8, 1);
    let upstream = ModuleInstance::new(upstream_builder.finish()).unwrap();

    let mut builder = ModuleBuilder::new();
    let t_un_local = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    builder.push_import_func(t_un_local, "upstream", "double");
    let code = Asm::new()
        .local_get(0)
        .call(0)
        .i32_const(1)
        .op(op::I32_ADD)
        .end()
        .finish();
    let fidx = builder.push_func(t_un_local, vec![], code, 8, 1);
    let mut imports = ImportObject::new();
    imports.define(
        "upstream",
        "double",
        wasmig::Extern::Func(upstream.clone(), double),
    );
    let instance = ModuleInstance::with_imports(builder.finish(), &imports).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[21]).unwrap().as_slice(), &[43]);
}

#[test]
fn table_ops_round_trip() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![ValueType::I32]);
    // table.set(1, ref.func 0); table.get(1) == 0; size == 4
    let code = Asm::new()
        .i32_const(1)
        .op(0xD2) // ref.func
        .leb_u32(0)
        .op(0x26) // table.set
        .leb_u32(0)
        .i32_const(1)
        .op(0x25) // table.get
        .leb_u32(0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    builder.push_table(4, 8);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[]).unwrap().as_slice(), &[fidx]);
    assert_eq!(instance.tables[0].read().get(0), Some(NULL_REF));
}

#[test]
fn sign_extension_opcode() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let code = Asm::new()
        .local_get(0)
        .op(op::I32_EXTEND8_S)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[0x80]).unwrap().as_slice(), &[0xFFFF_FF80]);
    assert_eq!(vm.call(fidx, &[0x7F]).unwrap().as_slice(), &[0x7F]);
}

#[test]
fn ext_block_passes_params_through() {
    let mut builder = ModuleBuilder::new();
    let t_block = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let t_main = builder.push_type(vec![], vec![ValueType::I32]);
    // the block consumes the value already on the stack as its param
    let code = Asm::new()
        .i32_const(37)
        .op(op::EXT_BLOCK)
        .leb_u32(t_block)
        .i32_const(5)
        .op(op::I32_ADD)
        .end()
        .end()
        .finish();
    let fidx = builder.push_func(t_main, vec![], code, 8, 2);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[]).unwrap().as_slice(), &[42]);
}

#[test]
fn select_picks_by_condition() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let code = Asm::new()
        .i32_const(111)
        .i32_const(222)
        .local_get(0)
        .op(op::SELECT)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[1]).unwrap().as_slice(), &[111]);
    assert_eq!(vm.call(fidx, &[0]).unwrap().as_slice(), &[222]);
}

#[test]
fn trunc_sat_saturates_and_trunc_traps() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![ValueType::I32]);
    let sat_code = Asm::new()
        .f32_const(f32::NAN)
        .misc(0) // i32.trunc_sat_f32_s
        .end()
        .finish();
    let sat = builder.push_func(tidx, vec![], sat_code, 8, 1);
    let trap_code = Asm::new()
        .f32_const(f32::NAN)
        .op(0xA8) // i32.trunc_f32_s
        .end()
        .finish();
    let trapping = builder.push_func(tidx, vec![], trap_code, 8, 1);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());
    assert_eq!(vm.call(sat, &[]).unwrap().as_slice(), &[0]);
    let err = vm.call(trapping, &[]).unwrap_err();
    assert_matches!(
        err,
        WasmigError::TrapCode(TrapCode::BadConversionToInteger)
    );
    assert_eq!(
        instance.copy_exception().as_deref(),
        Some("invalid conversion to integer")
    );
}

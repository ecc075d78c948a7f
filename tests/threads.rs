#![cfg(all(feature = "shared-memory", feature = "thread-manager"))]

mod common;

use assert_matches::assert_matches;
use common::{op, Asm};
use wasmig::{
    Executor, ExecutorConfig, ModuleBuilder, ModuleInstance, TrapCode, ValueType, WasmigError,
};

const ATOMIC_RMW_ADD_I32: u8 = 0x1E;
const ATOMIC_RMW_CMPXCHG_I32: u8 = 0x48;
const ATOMIC_WAIT32: u8 = 0x01;
const ATOMIC_NOTIFY: u8 = 0x00;

#[test]
fn atomic_rmw_add_returns_old_value() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    let code = Asm::new()
        .i32_const(0)
        .local_get(0)
        .atomic(ATOMIC_RMW_ADD_I32, 2, 0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    builder.push_memory(1, 1, true);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    assert_eq!(vm.call(fidx, &[5]).unwrap().as_slice(), &[0]);
    assert_eq!(vm.call(fidx, &[7]).unwrap().as_slice(), &[5]);
    assert_eq!(vm.call(fidx, &[0]).unwrap().as_slice(), &[12]);
}

#[test]
fn atomic_cmpxchg_swaps_only_on_match() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(
        vec![ValueType::I32, ValueType::I32],
        vec![ValueType::I32],
    );
    let code = Asm::new()
        .i32_const(0)
        .local_get(0)
        .local_get(1)
        .atomic(ATOMIC_RMW_CMPXCHG_I32, 2, 0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    builder.push_memory(1, 1, true);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let memory = instance.default_memory().unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());

    // mismatching expectation leaves the cell alone
    assert_eq!(vm.call(fidx, &[9, 42]).unwrap().as_slice(), &[0]);
    let mut probe = [0u8; 4];
    memory.read(0, &mut probe).unwrap();
    assert_eq!(u32::from_le_bytes(probe), 0);

    assert_eq!(vm.call(fidx, &[0, 42]).unwrap().as_slice(), &[0]);
    memory.read(0, &mut probe).unwrap();
    assert_eq!(u32::from_le_bytes(probe), 42);
}

#[test]
fn unaligned_atomic_traps() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![ValueType::I32]);
    let code = Asm::new()
        .i32_const(2)
        .i32_const(1)
        .atomic(ATOMIC_RMW_ADD_I32, 2, 0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    builder.push_memory(1, 1, true);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance.clone(), ExecutorConfig::new(), ());
    let err = vm.call(fidx, &[]).unwrap_err();
    assert_matches!(err, WasmigError::TrapCode(TrapCode::UnalignedAtomic));
    assert_eq!(instance.copy_exception().as_deref(), Some("unaligned atomic"));
}

#[test]
fn wait_outcomes_without_contention() {
    let mut builder = ModuleBuilder::new();
    // (addr_value_expect, timeout) -> wait result
    let tidx = builder.push_type(
        vec![ValueType::I32, ValueType::I64],
        vec![ValueType::I32],
    );
    let code = Asm::new()
        .i32_const(0)
        .local_get(0)
        .local_get(1)
        .atomic(ATOMIC_WAIT32, 2, 0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 1);
    let t_notify = builder.push_type(vec![], vec![ValueType::I32]);
    let notify_code = Asm::new()
        .i32_const(0)
        .i32_const(1)
        .atomic(ATOMIC_NOTIFY, 2, 0)
        .end()
        .finish();
    let notify = builder.push_func(t_notify, vec![], notify_code, 8, 1);
    builder.push_memory(1, 1, true);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());

    // memory holds 0: expecting 1 is a mismatch
    let timeout = 1_000_000i64; // 1ms
    assert_eq!(
        vm.call(fidx, &[1, timeout as u32, (timeout >> 32) as u32])
            .unwrap()
            .as_slice(),
        &[1]
    );
    // matching expectation times out
    assert_eq!(
        vm.call(fidx, &[0, timeout as u32, (timeout >> 32) as u32])
            .unwrap()
            .as_slice(),
        &[2]
    );
    // nobody is waiting
    assert_eq!(vm.call(notify, &[]).unwrap().as_slice(), &[0]);
}

#[test]
fn parallel_executors_share_linear_memory() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![]);
    // n atomic increments of cell 0
    let code = Asm::new()
        .block(op::LOOP, op::BLOCK_VOID)
        .i32_const(0)
        .i32_const(1)
        .atomic(ATOMIC_RMW_ADD_I32, 2, 0)
        .op(op::DROP)
        .local_get(0)
        .i32_const(1)
        .op(op::I32_SUB)
        .op(op::LOCAL_TEE)
        .leb_u32(0)
        .br_if(0)
        .end()
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 16, 2);
    builder.push_memory(1, 1, true);
    let instance = ModuleInstance::new(builder.finish()).unwrap();

    let rounds = 20_000u32;
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let instance = instance.clone();
            std::thread::spawn(move || {
                let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
                vm.call(fidx, &[rounds]).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut probe = [0u8; 4];
    instance.default_memory().unwrap().read(0, &mut probe).unwrap();
    assert_eq!(u32::from_le_bytes(probe), 2 * rounds);
}

#[test]
fn waiter_is_woken_by_notify() {
    let mut builder = ModuleBuilder::new();
    let t_wait = builder.push_type(vec![], vec![ValueType::I32]);
    let wait_code = Asm::new()
        .i32_const(0)
        .i32_const(0)
        .i64_const(10_000_000_000) // 10s guard timeout
        .atomic(ATOMIC_WAIT32, 2, 0)
        .end()
        .finish();
    let waiter = builder.push_func(t_wait, vec![], wait_code, 8, 1);
    let notify_code = Asm::new()
        .i32_const(0)
        .i32_const(1)
        .atomic(ATOMIC_NOTIFY, 2, 0)
        .end()
        .finish();
    let notifier = builder.push_func(t_wait, vec![], notify_code, 8, 1);
    builder.push_memory(1, 1, true);
    let instance = ModuleInstance::new(builder.finish()).unwrap();

    let wait_thread = {
        let instance = instance.clone();
        std::thread::spawn(move || {
            let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
            vm.call(waiter, &[]).unwrap()
        })
    };

    // keep notifying until the waiter is actually parked
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    loop {
        let woken = vm.call(notifier, &[]).unwrap();
        if woken.as_slice() != [0] {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert_eq!(wait_thread.join().unwrap().as_slice(), &[0]);
}

#[test]
fn suspend_and_resume_round_trip() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![ValueType::I32], vec![ValueType::I32]);
    // plain countdown loop; every branch is a polling point
    let code = Asm::new()
        .block(op::LOOP, op::BLOCK_VOID)
        .local_get(0)
        .i32_const(1)
        .op(op::I32_SUB)
        .op(op::LOCAL_TEE)
        .leb_u32(0)
        .br_if(0)
        .end()
        .local_get(0)
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 16, 2);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    let suspend = vm.suspend_state();

    let worker = std::thread::spawn(move || vm.call(fidx, &[5_000_000]));
    suspend.request_suspend();
    std::thread::sleep(std::time::Duration::from_millis(20));
    suspend.resume();
    assert_eq!(worker.join().unwrap().unwrap().as_slice(), &[0]);
}

#[test]
fn terminate_unwinds_cleanly() {
    let mut builder = ModuleBuilder::new();
    let tidx = builder.push_type(vec![], vec![]);
    let code = Asm::new()
        .block(op::LOOP, op::BLOCK_VOID)
        .br(0)
        .end()
        .end()
        .finish();
    let fidx = builder.push_func(tidx, vec![], code, 8, 2);
    let instance = ModuleInstance::new(builder.finish()).unwrap();
    let mut vm = Executor::new(instance, ExecutorConfig::new(), ());
    let suspend = vm.suspend_state();

    let worker = std::thread::spawn(move || vm.call(fidx, &[]));
    std::thread::sleep(std::time::Duration::from_millis(20));
    suspend.request_terminate();
    let err = worker.join().unwrap().unwrap_err();
    assert_matches!(err, WasmigError::Terminated);
}

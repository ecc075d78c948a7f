#[cfg(not(feature = "shared-memory"))]
pub(crate) fn exec_atomic_opcode<T>(
    _vm: &mut crate::vm::executor::Executor<T>,
) -> Result<(), crate::types::TrapCode> {
    Err(crate::types::TrapCode::UnsupportedOpcode)
}

#[cfg(feature = "shared-memory")]
pub(crate) use shared::exec_atomic_opcode;

#[cfg(feature = "shared-memory")]
mod shared {
    use crate::types::{TrapCode, UntypedValue};
    use crate::vm::executor::Executor;
    use crate::vm::memory::LinearMemory;
    use crate::vm::opcode::AtomicOp;

    #[inline(always)]
    fn check_alignment(effective: u64, size: u64) -> Result<(), TrapCode> {
        if effective % size != 0 {
            return Err(TrapCode::UnalignedAtomic);
        }
        Ok(())
    }

    /// Reads `width` little-endian bytes at `effective`
    /// (zero-extended), lets `f` produce a replacement, and writes it
    /// back if one is returned. The whole operation holds the
    /// shared-memory mutex.
    fn atomic_rmw(
        memory: &LinearMemory,
        effective: u64,
        width: usize,
        f: impl FnOnce(u64) -> Option<u64>,
    ) -> Result<u64, TrapCode> {
        let offset = effective as usize;
        let mut wrote = false;
        let old = memory.with_atomic(|data| {
            let slot = data
                .get_mut(offset..)
                .and_then(|tail| tail.get_mut(..width))
                .ok_or(TrapCode::MemoryOutOfBounds)?;
            let mut bytes = [0u8; 8];
            bytes[..width].copy_from_slice(slot);
            let old = u64::from_le_bytes(bytes);
            if let Some(new) = f(old) {
                slot.copy_from_slice(&new.to_le_bytes()[..width]);
                wrote = true;
            }
            Ok(old)
        })?;
        if wrote {
            memory.mark_atomic_write(effective, width);
        }
        Ok(old)
    }

    /// Stack shape shared by every non-fence atomic: decode
    /// `align`/`offset`, pop the base address later (value operands
    /// first), compute the effective address.
    struct AtomicSite {
        offset: u32,
    }

    impl AtomicSite {
        fn effective(&self, base: u32, size: u64) -> Result<u64, TrapCode> {
            let effective = base as u64 + self.offset as u64;
            check_alignment(effective, size)?;
            Ok(effective)
        }
    }

    fn rmw_op(op: AtomicOp) -> fn(u64, u64) -> u64 {
        use AtomicOp::*;
        match op {
            I32RmwAdd | I64RmwAdd | I32Rmw8AddU | I32Rmw16AddU | I64Rmw8AddU | I64Rmw16AddU
            | I64Rmw32AddU => |old, value| old.wrapping_add(value),
            I32RmwSub | I64RmwSub | I32Rmw8SubU | I32Rmw16SubU | I64Rmw8SubU | I64Rmw16SubU
            | I64Rmw32SubU => |old, value| old.wrapping_sub(value),
            I32RmwAnd | I64RmwAnd | I32Rmw8AndU | I32Rmw16AndU | I64Rmw8AndU | I64Rmw16AndU
            | I64Rmw32AndU => |old, value| old & value,
            I32RmwOr | I64RmwOr | I32Rmw8OrU | I32Rmw16OrU | I64Rmw8OrU | I64Rmw16OrU
            | I64Rmw32OrU => |old, value| old | value,
            I32RmwXor | I64RmwXor | I32Rmw8XorU | I32Rmw16XorU | I64Rmw8XorU | I64Rmw16XorU
            | I64Rmw32XorU => |old, value| old ^ value,
            I32RmwXchg | I64RmwXchg | I32Rmw8XchgU | I32Rmw16XchgU | I64Rmw8XchgU
            | I64Rmw16XchgU | I64Rmw32XchgU => |_old, value| value,
            _ => unreachable!("wasmig: not an rmw opcode"),
        }
    }

    /// Access width in bytes, and whether the logical operand is i64.
    fn op_shape(op: AtomicOp) -> (usize, bool) {
        use AtomicOp::*;
        match op {
            I32Load | I32Store | I32RmwAdd | I32RmwSub | I32RmwAnd | I32RmwOr | I32RmwXor
            | I32RmwXchg | I32RmwCmpxchg | Notify | Wait32 => (4, false),
            I64Load | I64Store | I64RmwAdd | I64RmwSub | I64RmwAnd | I64RmwOr | I64RmwXor
            | I64RmwXchg | I64RmwCmpxchg | Wait64 => (8, true),
            I32Load8U | I32Store8 | I32Rmw8AddU | I32Rmw8SubU | I32Rmw8AndU | I32Rmw8OrU
            | I32Rmw8XorU | I32Rmw8XchgU | I32Rmw8CmpxchgU => (1, false),
            I32Load16U | I32Store16 | I32Rmw16AddU | I32Rmw16SubU | I32Rmw16AndU | I32Rmw16OrU
            | I32Rmw16XorU | I32Rmw16XchgU | I32Rmw16CmpxchgU => (2, false),
            I64Load8U | I64Store8 | I64Rmw8AddU | I64Rmw8SubU | I64Rmw8AndU | I64Rmw8OrU
            | I64Rmw8XorU | I64Rmw8XchgU | I64Rmw8CmpxchgU => (1, true),
            I64Load16U | I64Store16 | I64Rmw16AddU | I64Rmw16SubU | I64Rmw16AndU | I64Rmw16OrU
            | I64Rmw16XorU | I64Rmw16XchgU | I64Rmw16CmpxchgU => (2, true),
            I64Load32U | I64Store32 | I64Rmw32AddU | I64Rmw32SubU | I64Rmw32AndU | I64Rmw32OrU
            | I64Rmw32XorU | I64Rmw32XchgU | I64Rmw32CmpxchgU => (4, true),
            Fence => (0, false),
        }
    }

    fn mask_for(width: usize) -> u64 {
        if width == 8 {
            u64::MAX
        } else {
            (1u64 << (width * 8)) - 1
        }
    }

    pub(crate) fn exec_atomic_opcode<T>(vm: &mut Executor<T>) -> Result<(), TrapCode> {
        let sub = vm.fetch_u8()?;
        let op = AtomicOp::from_byte(sub).ok_or(TrapCode::UnsupportedOpcode)?;

        if op == AtomicOp::Fence {
            let _flags = vm.fetch_u8()?;
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
            return Ok(());
        }

        let _align = vm.imm_leb_u32()?;
        let offset = vm.imm_leb_u32()?;
        let site = AtomicSite { offset };
        let (width, is_64) = op_shape(op);
        let memory = vm.require_memory()?.clone();

        use AtomicOp::*;
        match op {
            Notify => {
                let count = vm.top().pop_u32();
                let base = vm.top().pop_u32();
                let effective = site.effective(base, 4)?;
                vm.check_memory_access(effective, 4)?;
                let woken = memory.atomic_notify(effective as u32, count)?;
                vm.top().push_u32(woken);
            }
            Wait32 | Wait64 => {
                let timeout_ns = vm.top().pop_i64();
                let expect = if is_64 {
                    vm.top().pop_u64()
                } else {
                    vm.top().pop_u32() as u64
                };
                let base = vm.top().pop_u32();
                let effective = site.effective(base, width as u64)?;
                vm.check_memory_access(effective, width as u64)?;
                #[cfg(feature = "thread-manager")]
                let suspend = vm.suspend_state();
                #[cfg(feature = "thread-manager")]
                let cancelled = move || suspend.is_terminate_requested();
                #[cfg(not(feature = "thread-manager"))]
                let cancelled = || false;
                // a terminate signal unblocks the wait through
                // `cancelled`; the next polling point observes it
                let outcome =
                    memory.atomic_wait(effective as u32, expect, is_64, timeout_ns, &cancelled)?;
                vm.top().push_u32(outcome);
            }

            I32Load | I32Load8U | I32Load16U => {
                let base = vm.top().pop_u32();
                let effective = site.effective(base, width as u64)?;
                vm.check_memory_access(effective, width as u64)?;
                let value = atomic_rmw(&memory, effective, width, |_| None)?;
                vm.top().push_u32(value as u32);
            }
            I64Load | I64Load8U | I64Load16U | I64Load32U => {
                let base = vm.top().pop_u32();
                let effective = site.effective(base, width as u64)?;
                vm.check_memory_access(effective, width as u64)?;
                let value = atomic_rmw(&memory, effective, width, |_| None)?;
                vm.top().push_64(UntypedValue::from(value));
            }

            I32Store | I32Store8 | I32Store16 => {
                let value = vm.top().pop_u32() as u64;
                let base = vm.top().pop_u32();
                let effective = site.effective(base, width as u64)?;
                vm.check_memory_access(effective, width as u64)?;
                atomic_rmw(&memory, effective, width, |_| Some(value))?;
            }
            I64Store | I64Store8 | I64Store16 | I64Store32 => {
                let value = vm.top().pop_u64();
                let base = vm.top().pop_u32();
                let effective = site.effective(base, width as u64)?;
                vm.check_memory_access(effective, width as u64)?;
                atomic_rmw(&memory, effective, width, |_| Some(value))?;
            }

            I32RmwCmpxchg | I32Rmw8CmpxchgU | I32Rmw16CmpxchgU => {
                let replacement = vm.top().pop_u32() as u64;
                let expected = vm.top().pop_u32() as u64 & mask_for(width);
                let base = vm.top().pop_u32();
                let effective = site.effective(base, width as u64)?;
                vm.check_memory_access(effective, width as u64)?;
                let old = atomic_rmw(&memory, effective, width, |old| {
                    (old == expected).then_some(replacement)
                })?;
                vm.top().push_u32(old as u32);
            }
            I64RmwCmpxchg | I64Rmw8CmpxchgU | I64Rmw16CmpxchgU | I64Rmw32CmpxchgU => {
                let replacement = vm.top().pop_u64();
                let expected = vm.top().pop_u64() & mask_for(width);
                let base = vm.top().pop_u32();
                let effective = site.effective(base, width as u64)?;
                vm.check_memory_access(effective, width as u64)?;
                let old = atomic_rmw(&memory, effective, width, |old| {
                    (old == expected).then_some(replacement)
                })?;
                vm.top().push_64(UntypedValue::from(old));
            }

            _ => {
                // read-modify-write family
                let operation = rmw_op(op);
                let value = if is_64 {
                    vm.top().pop_u64()
                } else {
                    vm.top().pop_u32() as u64
                };
                let base = vm.top().pop_u32();
                let effective = site.effective(base, width as u64)?;
                vm.check_memory_access(effective, width as u64)?;
                let old = atomic_rmw(&memory, effective, width, |old| Some(operation(old, value)))?;
                if is_64 {
                    vm.top().push_64(UntypedValue::from(old));
                } else {
                    vm.top().push_u32(old as u32);
                }
            }
        }
        Ok(())
    }
}

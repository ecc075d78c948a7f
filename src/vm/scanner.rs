use crate::types::TrapCode;
use crate::vm::decoder::{read_u8, skip_leb};
use crate::vm::opcode::{MiscOp, Opcode};

/// Skips one instruction starting at `*ip` (opcode plus immediates).
/// Used by the structured scan that locates `else`/`end` targets.
pub(crate) fn skip_instruction(code: &[u8], ip: &mut usize) -> Result<Opcode, TrapCode> {
    let opcode =
        Opcode::from_byte(read_u8(code, ip)?).ok_or(TrapCode::UnsupportedOpcode)?;
    use Opcode::*;
    match opcode {
        Unreachable | Nop | Else | End | Return | Drop | Drop64 | Select | Select64 => {}

        Block | Loop | If => {
            // single value-type byte
            *ip += 1;
        }
        ExtBlock | ExtLoop | ExtIf => skip_leb(code, ip)?,

        Br | BrIf | Call | ReturnCall | LocalGet | LocalSet | LocalTee | GlobalGet
        | GlobalGet64 | GlobalSet | GlobalSet64 | SetGlobalAuxStack | TableGet | TableSet
        | RefNull | RefFunc | MemorySize | MemoryGrow => skip_leb(code, ip)?,

        CallIndirect | ReturnCallIndirect => {
            skip_leb(code, ip)?;
            skip_leb(code, ip)?;
        }

        BrTable => {
            let count = crate::vm::decoder::read_leb_u32(code, ip)?;
            for _ in 0..count + 1 {
                skip_leb(code, ip)?;
            }
        }

        SelectT => {
            let vec_len = crate::vm::decoder::read_leb_u32(code, ip)?;
            *ip += vec_len as usize;
        }

        RefIsNull => {}

        I32Const => skip_leb(code, ip)?,
        I64Const => skip_leb(code, ip)?,
        F32Const => *ip += 4,
        F64Const => *ip += 8,

        op if op.is_memory_opcode() && op != MemorySize && op != MemoryGrow => {
            // align, offset
            skip_leb(code, ip)?;
            skip_leb(code, ip)?;
        }

        MiscPrefix => {
            let misc =
                MiscOp::from_byte(read_u8(code, ip)?).ok_or(TrapCode::UnsupportedOpcode)?;
            use MiscOp::*;
            match misc {
                I32TruncSatF32S | I32TruncSatF32U | I32TruncSatF64S | I32TruncSatF64U
                | I64TruncSatF32S | I64TruncSatF32U | I64TruncSatF64S | I64TruncSatF64U => {}
                MemoryInit => {
                    skip_leb(code, ip)?;
                    *ip += 1;
                }
                DataDrop | ElemDrop | TableGrow | TableSize | TableFill => skip_leb(code, ip)?,
                MemoryCopy => *ip += 2,
                MemoryFill => *ip += 1,
                TableInit | TableCopy => {
                    skip_leb(code, ip)?;
                    skip_leb(code, ip)?;
                }
            }
        }

        AtomicPrefix => {
            let sub = read_u8(code, ip)?;
            if sub == 0x03 {
                // fence carries a single flag byte
                *ip += 1;
            } else {
                skip_leb(code, ip)?;
                skip_leb(code, ip)?;
            }
        }

        _ => {
            // remaining numeric/compare/convert opcodes have no
            // immediates
        }
    }
    Ok(opcode)
}

/// Walks the code stream from the first opcode of a block body and
/// returns the positions of its `else` opcode (if any) and its `end`
/// opcode. Failure means the module is malformed.
pub(crate) fn find_block_addr(
    code: &[u8],
    start: usize,
) -> Result<(Option<usize>, usize), TrapCode> {
    let mut ip = start;
    let mut depth = 0usize;
    let mut else_addr = None;
    loop {
        let at = ip;
        let opcode = skip_instruction(code, &mut ip).map_err(|_| TrapCode::FindBlockAddrFailed)?;
        match opcode {
            Opcode::Block | Opcode::Loop | Opcode::If
            | Opcode::ExtBlock | Opcode::ExtLoop | Opcode::ExtIf => depth += 1,
            Opcode::Else => {
                if depth == 0 && else_addr.is_none() {
                    else_addr = Some(at);
                }
            }
            Opcode::End => {
                if depth == 0 {
                    return Ok((else_addr, at));
                }
                depth -= 1;
            }
            _ => {}
        }
    }
}

const BLOCK_ADDR_CACHE_SIZE: usize = 64;
const BLOCK_ADDR_CONFLICT_SIZE: usize = 2;

#[derive(Copy, Clone)]
struct BlockAddrEntry {
    /// `(func_idx << 32) | body_offset`, so entries of different
    /// functions never alias.
    key: u64,
    else_addr: u32,
    end_addr: u32,
    valid: bool,
}

impl Default for BlockAddrEntry {
    fn default() -> Self {
        Self {
            key: 0,
            else_addr: u32::MAX,
            end_addr: 0,
            valid: false,
        }
    }
}

/// Direct-mapped cache of block target addresses, two entries per set.
///
/// Per-executor state; never persisted across migration, the restored
/// executor refills it lazily.
pub(crate) struct BlockAddrCache {
    sets: [[BlockAddrEntry; BLOCK_ADDR_CONFLICT_SIZE]; BLOCK_ADDR_CACHE_SIZE],
}

impl Default for BlockAddrCache {
    fn default() -> Self {
        Self {
            sets: [[BlockAddrEntry::default(); BLOCK_ADDR_CONFLICT_SIZE]; BLOCK_ADDR_CACHE_SIZE],
        }
    }
}

impl BlockAddrCache {
    fn key(func_idx: u32, offset: usize) -> u64 {
        ((func_idx as u64) << 32) | offset as u64
    }

    /// Resolves the `else`/`end` targets of the block whose body starts
    /// at `start` (the offset right after the block's immediates).
    pub fn lookup(
        &mut self,
        func_idx: u32,
        code: &[u8],
        start: usize,
    ) -> Result<(Option<usize>, usize), TrapCode> {
        let key = Self::key(func_idx, start);
        let set = &mut self.sets[start % BLOCK_ADDR_CACHE_SIZE];
        for entry in set.iter() {
            if entry.valid && entry.key == key {
                let else_addr = (entry.else_addr != u32::MAX).then_some(entry.else_addr as usize);
                return Ok((else_addr, entry.end_addr as usize));
            }
        }
        let (else_addr, end_addr) = find_block_addr(code, start)?;
        // keep the most recent hit in slot 0
        set[1] = set[0];
        set[0] = BlockAddrEntry {
            key,
            else_addr: else_addr.map(|a| a as u32).unwrap_or(u32::MAX),
            end_addr: end_addr as u32,
            valid: true,
        };
        Ok((else_addr, end_addr))
    }
}

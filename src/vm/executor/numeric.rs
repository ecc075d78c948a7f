use crate::types::{TrapCode, UntypedValue};
use crate::vm::executor::Executor;
use crate::vm::frame::Frame;
use crate::vm::opcode::Opcode;

type UnOp = fn(UntypedValue) -> UntypedValue;
type BinOp = fn(UntypedValue, UntypedValue) -> UntypedValue;
type TryUnOp = fn(UntypedValue) -> Result<UntypedValue, TrapCode>;
type TryBinOp = fn(UntypedValue, UntypedValue) -> Result<UntypedValue, TrapCode>;

// The helpers encode the stack effect; the opcode table below picks
// the operation. One-cell operands are "32", two-cell operands "64",
// independent of their numeric interpretation.

#[inline(always)]
fn binop_32(frame: &mut Frame, op: BinOp) {
    let rhs = frame.pop_32();
    let lhs = frame.pop_32();
    frame.push_32(op(lhs, rhs));
}

#[inline(always)]
fn binop_64(frame: &mut Frame, op: BinOp) {
    let rhs = frame.pop_64();
    let lhs = frame.pop_64();
    frame.push_64(op(lhs, rhs));
}

#[inline(always)]
fn cmp_64(frame: &mut Frame, op: BinOp) {
    let rhs = frame.pop_64();
    let lhs = frame.pop_64();
    frame.push_32(op(lhs, rhs));
}

#[inline(always)]
fn unop_32(frame: &mut Frame, op: UnOp) {
    let value = frame.pop_32();
    frame.push_32(op(value));
}

#[inline(always)]
fn unop_64(frame: &mut Frame, op: UnOp) {
    let value = frame.pop_64();
    frame.push_64(op(value));
}

#[inline(always)]
fn try_binop_32(frame: &mut Frame, op: TryBinOp) -> Result<(), TrapCode> {
    let rhs = frame.pop_32();
    let lhs = frame.pop_32();
    frame.push_32(op(lhs, rhs)?);
    Ok(())
}

#[inline(always)]
fn try_binop_64(frame: &mut Frame, op: TryBinOp) -> Result<(), TrapCode> {
    let rhs = frame.pop_64();
    let lhs = frame.pop_64();
    frame.push_64(op(lhs, rhs)?);
    Ok(())
}

#[inline(always)]
fn cvt_32_to_64(frame: &mut Frame, op: UnOp) {
    let value = frame.pop_32();
    frame.push_64(op(value));
}

#[inline(always)]
fn cvt_64_to_32(frame: &mut Frame, op: UnOp) {
    let value = frame.pop_64();
    frame.push_32(op(value));
}

#[inline(always)]
fn try_cvt_32_to_32(frame: &mut Frame, op: TryUnOp) -> Result<(), TrapCode> {
    let value = frame.pop_32();
    frame.push_32(op(value)?);
    Ok(())
}

#[inline(always)]
fn try_cvt_32_to_64(frame: &mut Frame, op: TryUnOp) -> Result<(), TrapCode> {
    let value = frame.pop_32();
    frame.push_64(op(value)?);
    Ok(())
}

#[inline(always)]
fn try_cvt_64_to_32(frame: &mut Frame, op: TryUnOp) -> Result<(), TrapCode> {
    let value = frame.pop_64();
    frame.push_32(op(value)?);
    Ok(())
}

#[inline(always)]
fn try_cvt_64_to_64(frame: &mut Frame, op: TryUnOp) -> Result<(), TrapCode> {
    let value = frame.pop_64();
    frame.push_64(op(value)?);
    Ok(())
}

#[inline(always)]
fn eqz_64(frame: &mut Frame) {
    let value = frame.pop_64();
    frame.push_32(value.i64_eqz());
}

/// The non-trapping float-to-int family living under the misc prefix.
pub(crate) fn exec_trunc_sat(frame: &mut Frame, op: crate::vm::opcode::MiscOp) {
    use crate::vm::opcode::MiscOp::*;
    match op {
        I32TruncSatF32S => unop_32(frame, UntypedValue::i32_trunc_sat_f32_s),
        I32TruncSatF32U => unop_32(frame, UntypedValue::i32_trunc_sat_f32_u),
        I32TruncSatF64S => cvt_64_to_32(frame, UntypedValue::i32_trunc_sat_f64_s),
        I32TruncSatF64U => cvt_64_to_32(frame, UntypedValue::i32_trunc_sat_f64_u),
        I64TruncSatF32S => cvt_32_to_64(frame, UntypedValue::i64_trunc_sat_f32_s),
        I64TruncSatF32U => cvt_32_to_64(frame, UntypedValue::i64_trunc_sat_f32_u),
        I64TruncSatF64S => unop_64(frame, UntypedValue::i64_trunc_sat_f64_s),
        I64TruncSatF64U => unop_64(frame, UntypedValue::i64_trunc_sat_f64_u),
        _ => unreachable!("wasmig: not a trunc_sat opcode"),
    }
}

pub(crate) fn exec_numeric_opcode<T>(vm: &mut Executor<T>, opcode: Opcode) -> Result<(), TrapCode> {
    use Opcode::*;
    let frame = vm.top();
    match opcode {
        // i32 comparisons
        I32Eqz => unop_32(frame, UntypedValue::i32_eqz),
        I32Eq => binop_32(frame, UntypedValue::i32_eq),
        I32Ne => binop_32(frame, UntypedValue::i32_ne),
        I32LtS => binop_32(frame, UntypedValue::i32_lt_s),
        I32LtU => binop_32(frame, UntypedValue::i32_lt_u),
        I32GtS => binop_32(frame, UntypedValue::i32_gt_s),
        I32GtU => binop_32(frame, UntypedValue::i32_gt_u),
        I32LeS => binop_32(frame, UntypedValue::i32_le_s),
        I32LeU => binop_32(frame, UntypedValue::i32_le_u),
        I32GeS => binop_32(frame, UntypedValue::i32_ge_s),
        I32GeU => binop_32(frame, UntypedValue::i32_ge_u),

        // i64 comparisons
        I64Eqz => eqz_64(frame),
        I64Eq => cmp_64(frame, UntypedValue::i64_eq),
        I64Ne => cmp_64(frame, UntypedValue::i64_ne),
        I64LtS => cmp_64(frame, UntypedValue::i64_lt_s),
        I64LtU => cmp_64(frame, UntypedValue::i64_lt_u),
        I64GtS => cmp_64(frame, UntypedValue::i64_gt_s),
        I64GtU => cmp_64(frame, UntypedValue::i64_gt_u),
        I64LeS => cmp_64(frame, UntypedValue::i64_le_s),
        I64LeU => cmp_64(frame, UntypedValue::i64_le_u),
        I64GeS => cmp_64(frame, UntypedValue::i64_ge_s),
        I64GeU => cmp_64(frame, UntypedValue::i64_ge_u),

        // float comparisons
        F32Eq => binop_32(frame, UntypedValue::f32_eq),
        F32Ne => binop_32(frame, UntypedValue::f32_ne),
        F32Lt => binop_32(frame, UntypedValue::f32_lt),
        F32Gt => binop_32(frame, UntypedValue::f32_gt),
        F32Le => binop_32(frame, UntypedValue::f32_le),
        F32Ge => binop_32(frame, UntypedValue::f32_ge),
        F64Eq => cmp_64(frame, UntypedValue::f64_eq),
        F64Ne => cmp_64(frame, UntypedValue::f64_ne),
        F64Lt => cmp_64(frame, UntypedValue::f64_lt),
        F64Gt => cmp_64(frame, UntypedValue::f64_gt),
        F64Le => cmp_64(frame, UntypedValue::f64_le),
        F64Ge => cmp_64(frame, UntypedValue::f64_ge),

        // i32 arithmetic
        I32Clz => unop_32(frame, UntypedValue::i32_clz),
        I32Ctz => unop_32(frame, UntypedValue::i32_ctz),
        I32Popcnt => unop_32(frame, UntypedValue::i32_popcnt),
        I32Add => binop_32(frame, UntypedValue::i32_add),
        I32Sub => binop_32(frame, UntypedValue::i32_sub),
        I32Mul => binop_32(frame, UntypedValue::i32_mul),
        I32DivS => try_binop_32(frame, UntypedValue::i32_div_s)?,
        I32DivU => try_binop_32(frame, UntypedValue::i32_div_u)?,
        I32RemS => try_binop_32(frame, UntypedValue::i32_rem_s)?,
        I32RemU => try_binop_32(frame, UntypedValue::i32_rem_u)?,
        I32And => binop_32(frame, UntypedValue::i32_and),
        I32Or => binop_32(frame, UntypedValue::i32_or),
        I32Xor => binop_32(frame, UntypedValue::i32_xor),
        I32Shl => binop_32(frame, UntypedValue::i32_shl),
        I32ShrS => binop_32(frame, UntypedValue::i32_shr_s),
        I32ShrU => binop_32(frame, UntypedValue::i32_shr_u),
        I32Rotl => binop_32(frame, UntypedValue::i32_rotl),
        I32Rotr => binop_32(frame, UntypedValue::i32_rotr),

        // i64 arithmetic
        I64Clz => unop_64(frame, UntypedValue::i64_clz),
        I64Ctz => unop_64(frame, UntypedValue::i64_ctz),
        I64Popcnt => unop_64(frame, UntypedValue::i64_popcnt),
        I64Add => binop_64(frame, UntypedValue::i64_add),
        I64Sub => binop_64(frame, UntypedValue::i64_sub),
        I64Mul => binop_64(frame, UntypedValue::i64_mul),
        I64DivS => try_binop_64(frame, UntypedValue::i64_div_s)?,
        I64DivU => try_binop_64(frame, UntypedValue::i64_div_u)?,
        I64RemS => try_binop_64(frame, UntypedValue::i64_rem_s)?,
        I64RemU => try_binop_64(frame, UntypedValue::i64_rem_u)?,
        I64And => binop_64(frame, UntypedValue::i64_and),
        I64Or => binop_64(frame, UntypedValue::i64_or),
        I64Xor => binop_64(frame, UntypedValue::i64_xor),
        I64Shl => binop_64(frame, UntypedValue::i64_shl),
        I64ShrS => binop_64(frame, UntypedValue::i64_shr_s),
        I64ShrU => binop_64(frame, UntypedValue::i64_shr_u),
        I64Rotl => binop_64(frame, UntypedValue::i64_rotl),
        I64Rotr => binop_64(frame, UntypedValue::i64_rotr),

        // f32 arithmetic
        F32Abs => unop_32(frame, UntypedValue::f32_abs),
        F32Neg => unop_32(frame, UntypedValue::f32_neg),
        F32Ceil => unop_32(frame, UntypedValue::f32_ceil),
        F32Floor => unop_32(frame, UntypedValue::f32_floor),
        F32Trunc => unop_32(frame, UntypedValue::f32_trunc),
        F32Nearest => unop_32(frame, UntypedValue::f32_nearest),
        F32Sqrt => unop_32(frame, UntypedValue::f32_sqrt),
        F32Add => binop_32(frame, UntypedValue::f32_add),
        F32Sub => binop_32(frame, UntypedValue::f32_sub),
        F32Mul => binop_32(frame, UntypedValue::f32_mul),
        F32Div => binop_32(frame, UntypedValue::f32_div),
        F32Min => binop_32(frame, UntypedValue::f32_min),
        F32Max => binop_32(frame, UntypedValue::f32_max),
        F32Copysign => binop_32(frame, UntypedValue::f32_copysign),

        // f64 arithmetic
        F64Abs => unop_64(frame, UntypedValue::f64_abs),
        F64Neg => unop_64(frame, UntypedValue::f64_neg),
        F64Ceil => unop_64(frame, UntypedValue::f64_ceil),
        F64Floor => unop_64(frame, UntypedValue::f64_floor),
        F64Trunc => unop_64(frame, UntypedValue::f64_trunc),
        F64Nearest => unop_64(frame, UntypedValue::f64_nearest),
        F64Sqrt => unop_64(frame, UntypedValue::f64_sqrt),
        F64Add => binop_64(frame, UntypedValue::f64_add),
        F64Sub => binop_64(frame, UntypedValue::f64_sub),
        F64Mul => binop_64(frame, UntypedValue::f64_mul),
        F64Div => binop_64(frame, UntypedValue::f64_div),
        F64Min => binop_64(frame, UntypedValue::f64_min),
        F64Max => binop_64(frame, UntypedValue::f64_max),
        F64Copysign => binop_64(frame, UntypedValue::f64_copysign),

        // conversions
        I32WrapI64 => cvt_64_to_32(frame, UntypedValue::i32_wrap_i64),
        I32TruncF32S => try_cvt_32_to_32(frame, UntypedValue::i32_trunc_f32_s)?,
        I32TruncF32U => try_cvt_32_to_32(frame, UntypedValue::i32_trunc_f32_u)?,
        I32TruncF64S => try_cvt_64_to_32(frame, UntypedValue::i32_trunc_f64_s)?,
        I32TruncF64U => try_cvt_64_to_32(frame, UntypedValue::i32_trunc_f64_u)?,
        I64ExtendI32S => cvt_32_to_64(frame, UntypedValue::i64_extend_i32_s),
        I64ExtendI32U => cvt_32_to_64(frame, UntypedValue::i64_extend_i32_u),
        I64TruncF32S => try_cvt_32_to_64(frame, UntypedValue::i64_trunc_f32_s)?,
        I64TruncF32U => try_cvt_32_to_64(frame, UntypedValue::i64_trunc_f32_u)?,
        I64TruncF64S => try_cvt_64_to_64(frame, UntypedValue::i64_trunc_f64_s)?,
        I64TruncF64U => try_cvt_64_to_64(frame, UntypedValue::i64_trunc_f64_u)?,
        F32ConvertI32S => unop_32(frame, UntypedValue::f32_convert_i32_s),
        F32ConvertI32U => unop_32(frame, UntypedValue::f32_convert_i32_u),
        F32ConvertI64S => cvt_64_to_32(frame, UntypedValue::f32_convert_i64_s),
        F32ConvertI64U => cvt_64_to_32(frame, UntypedValue::f32_convert_i64_u),
        F32DemoteF64 => cvt_64_to_32(frame, UntypedValue::f32_demote_f64),
        F64ConvertI32S => cvt_32_to_64(frame, UntypedValue::f64_convert_i32_s),
        F64ConvertI32U => cvt_32_to_64(frame, UntypedValue::f64_convert_i32_u),
        F64ConvertI64S => unop_64(frame, UntypedValue::f64_convert_i64_s),
        F64ConvertI64U => unop_64(frame, UntypedValue::f64_convert_i64_u),
        F64PromoteF32 => cvt_32_to_64(frame, UntypedValue::f64_promote_f32),

        // bit-identity: cells and tags are already correct
        I32ReinterpretF32 | I64ReinterpretF64 | F32ReinterpretI32 | F64ReinterpretI64 => {}

        // sign extension
        I32Extend8S => unop_32(frame, UntypedValue::i32_extend8_s),
        I32Extend16S => unop_32(frame, UntypedValue::i32_extend16_s),
        I64Extend8S => unop_64(frame, UntypedValue::i64_extend8_s),
        I64Extend16S => unop_64(frame, UntypedValue::i64_extend16_s),
        I64Extend32S => unop_64(frame, UntypedValue::i64_extend32_s),

        _ => return Err(TrapCode::UnsupportedOpcode),
    }
    Ok(())
}

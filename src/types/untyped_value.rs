use crate::types::TrapCode;
use paste::paste;

/// An untyped 64-bit value.
///
/// One-cell (32-bit) values live in the low half with the high half
/// zeroed; two-cell values occupy all 64 bits. The operand stack stores
/// raw 32-bit cells, so the executor assembles and splits
/// [`UntypedValue`]s at push/pop boundaries.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct UntypedValue {
    bits: u64,
}

impl UntypedValue {
    pub fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    pub fn to_bits(self) -> u64 {
        self.bits
    }

    /// Splits the value into (low, high) operand stack cells.
    pub fn to_cells(self) -> (u32, u32) {
        (self.bits as u32, (self.bits >> 32) as u32)
    }

    /// Assembles a two-cell value from its (low, high) cells.
    pub fn from_cells(lo: u32, hi: u32) -> Self {
        Self {
            bits: (lo as u64) | ((hi as u64) << 32),
        }
    }

    pub fn as_u32(self) -> u32 {
        self.bits as u32
    }

    pub fn as_i32(self) -> i32 {
        self.bits as u32 as i32
    }

    pub fn as_u64(self) -> u64 {
        self.bits
    }

    pub fn as_usize(self) -> usize {
        self.bits as u32 as usize
    }

    pub fn as_bool(self) -> bool {
        self.bits != 0
    }
}

macro_rules! impl_from_prim {
    ($($ty:ty as $conv:ty),* $(,)?) => {
        $(
            impl From<$ty> for UntypedValue {
                fn from(value: $ty) -> Self {
                    Self { bits: value as $conv as u64 }
                }
            }
        )*
    };
}

impl_from_prim!(i8 as u8, u8 as u8, i16 as u16, u16 as u16, i32 as u32, u32 as u32);

impl From<i64> for UntypedValue {
    fn from(value: i64) -> Self {
        Self { bits: value as u64 }
    }
}

impl From<u64> for UntypedValue {
    fn from(value: u64) -> Self {
        Self { bits: value }
    }
}

impl From<f32> for UntypedValue {
    fn from(value: f32) -> Self {
        Self {
            bits: value.to_bits() as u64,
        }
    }
}

impl From<f64> for UntypedValue {
    fn from(value: f64) -> Self {
        Self {
            bits: value.to_bits(),
        }
    }
}

impl From<bool> for UntypedValue {
    fn from(value: bool) -> Self {
        Self { bits: value as u64 }
    }
}

impl From<UntypedValue> for i32 {
    fn from(value: UntypedValue) -> Self {
        value.as_i32()
    }
}

impl From<UntypedValue> for u32 {
    fn from(value: UntypedValue) -> Self {
        value.as_u32()
    }
}

impl From<UntypedValue> for i64 {
    fn from(value: UntypedValue) -> Self {
        value.bits as i64
    }
}

impl From<UntypedValue> for u64 {
    fn from(value: UntypedValue) -> Self {
        value.bits
    }
}

impl From<UntypedValue> for f32 {
    fn from(value: UntypedValue) -> Self {
        f32::from_bits(value.bits as u32)
    }
}

impl From<UntypedValue> for f64 {
    fn from(value: UntypedValue) -> Self {
        f64::from_bits(value.bits)
    }
}

impl From<UntypedValue> for bool {
    fn from(value: UntypedValue) -> Self {
        value.bits != 0
    }
}

fn f32_min(lhs: f32, rhs: f32) -> f32 {
    if lhs.is_nan() || rhs.is_nan() {
        f32::NAN
    } else if lhs == 0.0 && lhs == rhs {
        // distinguish -0.0 from +0.0 by sign
        if lhs.is_sign_negative() {
            lhs
        } else {
            rhs
        }
    } else if lhs > rhs {
        rhs
    } else {
        lhs
    }
}

fn f32_max(lhs: f32, rhs: f32) -> f32 {
    if lhs.is_nan() || rhs.is_nan() {
        f32::NAN
    } else if lhs == 0.0 && lhs == rhs {
        if lhs.is_sign_negative() {
            rhs
        } else {
            lhs
        }
    } else if lhs > rhs {
        lhs
    } else {
        rhs
    }
}

fn f64_min(lhs: f64, rhs: f64) -> f64 {
    if lhs.is_nan() || rhs.is_nan() {
        f64::NAN
    } else if lhs == 0.0 && lhs == rhs {
        if lhs.is_sign_negative() {
            lhs
        } else {
            rhs
        }
    } else if lhs > rhs {
        rhs
    } else {
        lhs
    }
}

fn f64_max(lhs: f64, rhs: f64) -> f64 {
    if lhs.is_nan() || rhs.is_nan() {
        f64::NAN
    } else if lhs == 0.0 && lhs == rhs {
        if lhs.is_sign_negative() {
            rhs
        } else {
            lhs
        }
    } else if lhs > rhs {
        lhs
    } else {
        rhs
    }
}

fn f32_copysign(lhs: f32, rhs: f32) -> f32 {
    let magnitude = lhs.to_bits() & 0x7fff_ffff;
    let sign = rhs.to_bits() & 0x8000_0000;
    f32::from_bits(magnitude | sign)
}

fn f64_copysign(lhs: f64, rhs: f64) -> f64 {
    let magnitude = lhs.to_bits() & (u64::MAX / 2);
    let sign = rhs.to_bits() & (1u64 << 63);
    f64::from_bits(magnitude | sign)
}

// Wrapping integer arithmetic, bitwise logic and comparisons for both
// integer widths. `paste` splices the width prefix into the method name
// so the dispatcher can build per-opcode fn tables.
macro_rules! impl_int_ops {
    ($( ($ty:ty, $uty:ty) ),* $(,)?) => { paste! { $(
        impl UntypedValue {
            pub fn [<$ty _add>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self).wrapping_add(<$ty>::from(rhs)))
            }

            pub fn [<$ty _sub>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self).wrapping_sub(<$ty>::from(rhs)))
            }

            pub fn [<$ty _mul>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self).wrapping_mul(<$ty>::from(rhs)))
            }

            pub fn [<$ty _div_s>](self, rhs: Self) -> Result<Self, TrapCode> {
                let lhs = <$ty>::from(self);
                let rhs = <$ty>::from(rhs);
                if rhs == 0 {
                    return Err(TrapCode::IntegerDivisionByZero);
                }
                if lhs == <$ty>::MIN && rhs == -1 {
                    return Err(TrapCode::IntegerOverflow);
                }
                Ok(Self::from(lhs.wrapping_div(rhs)))
            }

            pub fn [<$ty _div_u>](self, rhs: Self) -> Result<Self, TrapCode> {
                let lhs = <$ty>::from(self) as $uty;
                let rhs = <$ty>::from(rhs) as $uty;
                if rhs == 0 {
                    return Err(TrapCode::IntegerDivisionByZero);
                }
                Ok(Self::from(lhs / rhs))
            }

            pub fn [<$ty _rem_s>](self, rhs: Self) -> Result<Self, TrapCode> {
                let lhs = <$ty>::from(self);
                let rhs = <$ty>::from(rhs);
                if rhs == 0 {
                    return Err(TrapCode::IntegerDivisionByZero);
                }
                Ok(Self::from(lhs.wrapping_rem(rhs)))
            }

            pub fn [<$ty _rem_u>](self, rhs: Self) -> Result<Self, TrapCode> {
                let lhs = <$ty>::from(self) as $uty;
                let rhs = <$ty>::from(rhs) as $uty;
                if rhs == 0 {
                    return Err(TrapCode::IntegerDivisionByZero);
                }
                Ok(Self::from(lhs % rhs))
            }

            pub fn [<$ty _and>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) & <$ty>::from(rhs))
            }

            pub fn [<$ty _or>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) | <$ty>::from(rhs))
            }

            pub fn [<$ty _xor>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) ^ <$ty>::from(rhs))
            }

            // shift counts are taken modulo the bit width
            pub fn [<$ty _shl>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self).wrapping_shl(<$ty>::from(rhs) as u32))
            }

            pub fn [<$ty _shr_s>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self).wrapping_shr(<$ty>::from(rhs) as u32))
            }

            pub fn [<$ty _shr_u>](self, rhs: Self) -> Self {
                Self::from(
                    (<$ty>::from(self) as $uty)
                        .wrapping_shr(<$ty>::from(rhs) as u32),
                )
            }

            pub fn [<$ty _rotl>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self).rotate_left(<$ty>::from(rhs) as u32 % <$ty>::BITS))
            }

            pub fn [<$ty _rotr>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self).rotate_right(<$ty>::from(rhs) as u32 % <$ty>::BITS))
            }

            pub fn [<$ty _clz>](self) -> Self {
                Self::from(<$ty>::from(self).leading_zeros() as $ty)
            }

            pub fn [<$ty _ctz>](self) -> Self {
                Self::from(<$ty>::from(self).trailing_zeros() as $ty)
            }

            pub fn [<$ty _popcnt>](self) -> Self {
                Self::from(<$ty>::from(self).count_ones() as $ty)
            }

            pub fn [<$ty _eqz>](self) -> Self {
                Self::from(<$ty>::from(self) == 0)
            }

            pub fn [<$ty _eq>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) == <$ty>::from(rhs))
            }

            pub fn [<$ty _ne>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) != <$ty>::from(rhs))
            }

            pub fn [<$ty _lt_s>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) < <$ty>::from(rhs))
            }

            pub fn [<$ty _lt_u>](self, rhs: Self) -> Self {
                Self::from((<$ty>::from(self) as $uty) < (<$ty>::from(rhs) as $uty))
            }

            pub fn [<$ty _gt_s>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) > <$ty>::from(rhs))
            }

            pub fn [<$ty _gt_u>](self, rhs: Self) -> Self {
                Self::from((<$ty>::from(self) as $uty) > (<$ty>::from(rhs) as $uty))
            }

            pub fn [<$ty _le_s>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) <= <$ty>::from(rhs))
            }

            pub fn [<$ty _le_u>](self, rhs: Self) -> Self {
                Self::from((<$ty>::from(self) as $uty) <= (<$ty>::from(rhs) as $uty))
            }

            pub fn [<$ty _ge_s>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) >= <$ty>::from(rhs))
            }

            pub fn [<$ty _ge_u>](self, rhs: Self) -> Self {
                Self::from((<$ty>::from(self) as $uty) >= (<$ty>::from(rhs) as $uty))
            }
        }
    )* } };
}

impl_int_ops!((i32, u32), (i64, u64));

// Float arithmetic and comparisons. Unary math goes through libm so the
// results match the C library the reference interpreter links against.
macro_rules! impl_float_ops {
    ($( ($ty:ty, $abs:path, $ceil:path, $floor:path, $trunc:path, $nearest:path, $sqrt:path,
         $min:path, $max:path, $copysign:path) ),* $(,)?) => { paste! { $(
        impl UntypedValue {
            pub fn [<$ty _abs>](self) -> Self {
                Self::from($abs(<$ty>::from(self)))
            }

            pub fn [<$ty _neg>](self) -> Self {
                Self::from(-<$ty>::from(self))
            }

            pub fn [<$ty _ceil>](self) -> Self {
                Self::from($ceil(<$ty>::from(self)))
            }

            pub fn [<$ty _floor>](self) -> Self {
                Self::from($floor(<$ty>::from(self)))
            }

            pub fn [<$ty _trunc>](self) -> Self {
                Self::from($trunc(<$ty>::from(self)))
            }

            // ties-to-even rounding
            pub fn [<$ty _nearest>](self) -> Self {
                Self::from($nearest(<$ty>::from(self)))
            }

            pub fn [<$ty _sqrt>](self) -> Self {
                Self::from($sqrt(<$ty>::from(self)))
            }

            pub fn [<$ty _add>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) + <$ty>::from(rhs))
            }

            pub fn [<$ty _sub>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) - <$ty>::from(rhs))
            }

            pub fn [<$ty _mul>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) * <$ty>::from(rhs))
            }

            pub fn [<$ty _div>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) / <$ty>::from(rhs))
            }

            pub fn [<$ty _min>](self, rhs: Self) -> Self {
                Self::from($min(<$ty>::from(self), <$ty>::from(rhs)))
            }

            pub fn [<$ty _max>](self, rhs: Self) -> Self {
                Self::from($max(<$ty>::from(self), <$ty>::from(rhs)))
            }

            pub fn [<$ty _copysign>](self, rhs: Self) -> Self {
                Self::from($copysign(<$ty>::from(self), <$ty>::from(rhs)))
            }

            pub fn [<$ty _eq>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) == <$ty>::from(rhs))
            }

            pub fn [<$ty _ne>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) != <$ty>::from(rhs))
            }

            pub fn [<$ty _lt>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) < <$ty>::from(rhs))
            }

            pub fn [<$ty _gt>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) > <$ty>::from(rhs))
            }

            pub fn [<$ty _le>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) <= <$ty>::from(rhs))
            }

            pub fn [<$ty _ge>](self, rhs: Self) -> Self {
                Self::from(<$ty>::from(self) >= <$ty>::from(rhs))
            }
        }
    )* } };
}

impl_float_ops!(
    (
        f32,
        libm::fabsf,
        libm::ceilf,
        libm::floorf,
        libm::truncf,
        libm::rintf,
        libm::sqrtf,
        f32_min,
        f32_max,
        f32_copysign
    ),
    (
        f64,
        libm::fabs,
        libm::ceil,
        libm::floor,
        libm::trunc,
        libm::rint,
        libm::sqrt,
        f64_min,
        f64_max,
        f64_copysign
    ),
);

// Trapping float-to-int truncation. The open bounds are the largest
// representable values strictly outside the destination range, matching
// the reference interpreter exactly.
macro_rules! impl_trunc_ops {
    ($( ($name:ident, $src:ty, $dst:ty, $min:expr, $max:expr) ),* $(,)?) => { $(
        impl UntypedValue {
            pub fn $name(self) -> Result<Self, TrapCode> {
                let value = <$src>::from(self);
                if value.is_nan() {
                    return Err(TrapCode::BadConversionToInteger);
                }
                if value <= $min || value >= $max {
                    return Err(TrapCode::IntegerOverflow);
                }
                Ok(Self::from(value as $dst))
            }
        }
    )* };
}

impl_trunc_ops!(
    (i32_trunc_f32_s, f32, i32, -2147483904.0_f32, 2147483648.0_f32),
    (i32_trunc_f32_u, f32, u32, -1.0_f32, 4294967296.0_f32),
    (i32_trunc_f64_s, f64, i32, -2147483649.0_f64, 2147483648.0_f64),
    (i32_trunc_f64_u, f64, u32, -1.0_f64, 4294967296.0_f64),
    (
        i64_trunc_f32_s,
        f32,
        i64,
        -9223373136366403584.0_f32,
        9223372036854775808.0_f32
    ),
    (
        i64_trunc_f32_u,
        f32,
        u64,
        -1.0_f32,
        18446744073709551616.0_f32
    ),
    (
        i64_trunc_f64_s,
        f64,
        i64,
        -9223372036854777856.0_f64,
        9223372036854775808.0_f64
    ),
    (
        i64_trunc_f64_u,
        f64,
        u64,
        -1.0_f64,
        18446744073709551616.0_f64
    ),
);

// Saturating truncation: `as` casts implement exactly the wasm
// `trunc_sat` semantics (NaN -> 0, out-of-range clamps).
macro_rules! impl_trunc_sat_ops {
    ($( ($name:ident, $src:ty, $dst:ty) ),* $(,)?) => { $(
        impl UntypedValue {
            pub fn $name(self) -> Self {
                Self::from(<$src>::from(self) as $dst)
            }
        }
    )* };
}

impl_trunc_sat_ops!(
    (i32_trunc_sat_f32_s, f32, i32),
    (i32_trunc_sat_f32_u, f32, u32),
    (i32_trunc_sat_f64_s, f64, i32),
    (i32_trunc_sat_f64_u, f64, u32),
    (i64_trunc_sat_f32_s, f32, i64),
    (i64_trunc_sat_f32_u, f32, u64),
    (i64_trunc_sat_f64_s, f64, i64),
    (i64_trunc_sat_f64_u, f64, u64),
);

macro_rules! impl_convert_ops {
    ($( ($name:ident, $src:ty, $via:ty, $dst:ty) ),* $(,)?) => { $(
        impl UntypedValue {
            pub fn $name(self) -> Self {
                Self::from(<$src>::from(self) as $via as $dst)
            }
        }
    )* };
}

impl_convert_ops!(
    (i32_wrap_i64, i64, i64, i32),
    (i64_extend_i32_s, i32, i32, i64),
    (i64_extend_i32_u, i32, u32, i64),
    (f32_convert_i32_s, i32, i32, f32),
    (f32_convert_i32_u, i32, u32, f32),
    (f32_convert_i64_s, i64, i64, f32),
    (f32_convert_i64_u, i64, u64, f32),
    (f32_demote_f64, f64, f64, f32),
    (f64_convert_i32_s, i32, i32, f64),
    (f64_convert_i32_u, i32, u32, f64),
    (f64_convert_i64_s, i64, i64, f64),
    (f64_convert_i64_u, i64, u64, f64),
    (f64_promote_f32, f32, f32, f64),
    (i32_extend8_s, i32, i8, i32),
    (i32_extend16_s, i32, i16, i32),
    (i64_extend8_s, i64, i8, i64),
    (i64_extend16_s, i64, i16, i64),
    (i64_extend32_s, i64, i32, i64),
);

use crate::types::TrapCode;

/// LEB128 reader over validated function code.
///
/// Over-long encodings (up to 5 bytes for 32-bit, 10 for 64-bit
/// immediates) are accepted; reads past the end of code only happen on
/// malformed modules and surface as a trap rather than a panic.
fn read_leb(
    code: &[u8],
    ip: &mut usize,
    max_bits: u32,
    sign: bool,
) -> Result<u64, TrapCode> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let mut byte: u64;
    loop {
        byte = *code.get(*ip).ok_or(TrapCode::UnsupportedOpcode)? as u64;
        *ip += 1;
        result |= (byte & 0x7F).wrapping_shl(shift);
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if sign && shift < max_bits && (byte & 0x40) != 0 {
        result |= (!0u64).wrapping_shl(shift);
    }
    Ok(result)
}

#[inline(always)]
pub(crate) fn read_u8(code: &[u8], ip: &mut usize) -> Result<u8, TrapCode> {
    let byte = *code.get(*ip).ok_or(TrapCode::UnsupportedOpcode)?;
    *ip += 1;
    Ok(byte)
}

#[inline(always)]
pub(crate) fn read_leb_u32(code: &[u8], ip: &mut usize) -> Result<u32, TrapCode> {
    // single-byte fast path
    if let Some(&byte) = code.get(*ip) {
        if byte & 0x80 == 0 {
            *ip += 1;
            return Ok(byte as u32);
        }
    }
    Ok(read_leb(code, ip, 32, false)? as u32)
}

#[inline(always)]
pub(crate) fn read_leb_i32(code: &[u8], ip: &mut usize) -> Result<i32, TrapCode> {
    if let Some(&byte) = code.get(*ip) {
        if byte & 0x80 == 0 {
            *ip += 1;
            let mut value = byte as i32;
            if byte & 0x40 != 0 {
                value |= -0x80;
            }
            return Ok(value);
        }
    }
    Ok(read_leb(code, ip, 32, true)? as u32 as i32)
}

#[inline(always)]
pub(crate) fn read_leb_i64(code: &[u8], ip: &mut usize) -> Result<i64, TrapCode> {
    if let Some(&byte) = code.get(*ip) {
        if byte & 0x80 == 0 {
            *ip += 1;
            let mut value = byte as i64;
            if byte & 0x40 != 0 {
                value |= -0x80;
            }
            return Ok(value);
        }
    }
    Ok(read_leb(code, ip, 64, true)? as i64)
}

pub(crate) fn read_f32_bits(code: &[u8], ip: &mut usize) -> Result<u32, TrapCode> {
    let bytes = code
        .get(*ip..*ip + 4)
        .ok_or(TrapCode::UnsupportedOpcode)?;
    *ip += 4;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

pub(crate) fn read_f64_bits(code: &[u8], ip: &mut usize) -> Result<u64, TrapCode> {
    let bytes = code
        .get(*ip..*ip + 8)
        .ok_or(TrapCode::UnsupportedOpcode)?;
    *ip += 8;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

pub(crate) fn skip_leb(code: &[u8], ip: &mut usize) -> Result<(), TrapCode> {
    loop {
        let byte = *code.get(*ip).ok_or(TrapCode::UnsupportedOpcode)?;
        *ip += 1;
        if byte & 0x80 == 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_leb() {
        let code = [0xE5, 0x8E, 0x26];
        let mut ip = 0;
        assert_eq!(read_leb_u32(&code, &mut ip).unwrap(), 624485);
        assert_eq!(ip, 3);
    }

    #[test]
    fn signed_leb_sign_extends() {
        let code = [0x7F];
        let mut ip = 0;
        assert_eq!(read_leb_i32(&code, &mut ip).unwrap(), -1);
        let code = [0xC0, 0xBB, 0x78];
        let mut ip = 0;
        assert_eq!(read_leb_i32(&code, &mut ip).unwrap(), -123456);
        let code = [0x80, 0x80, 0x80, 0x80, 0x78];
        let mut ip = 0;
        assert_eq!(read_leb_i32(&code, &mut ip).unwrap(), i32::MIN);
    }

    #[test]
    fn over_long_encodings_are_accepted() {
        // 1 encoded in five bytes
        let code = [0x81, 0x80, 0x80, 0x80, 0x00];
        let mut ip = 0;
        assert_eq!(read_leb_u32(&code, &mut ip).unwrap(), 1);
        assert_eq!(ip, 5);
    }

    #[test]
    fn truncated_leb_traps() {
        let code = [0x80, 0x80];
        let mut ip = 0;
        assert!(read_leb_u32(&code, &mut ip).is_err());
    }
}

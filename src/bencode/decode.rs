use super::error::BencodeError;
use super::value::Value;
use bytes::Bytes;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

const MAX_DEPTH: usize = 64;

/// Decodes exactly one bencode value spanning all of `data`.
///
/// # Errors
///
/// Fails on malformed input and on any bytes left after the value.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, consumed) = decode_prefix(data)?;

    if consumed != data.len() {
        return Err(BencodeError::TrailingData { offset: consumed });
    }

    Ok(value)
}

/// Decodes one bencode value from the start of `data` and returns it along
/// with the number of bytes it occupied.
///
/// Anything after the value is left untouched, which is how the raw piece
/// bytes of a `ut_metadata` data message are located.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;
    Ok((value, pos))
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep { offset: *pos });
    }

    let Some(&first) = data.get(*pos) else {
        return Err(BencodeError::UnexpectedEof { offset: *pos });
    };

    match first {
        b'i' => decode_integer(data, pos),
        b'l' => decode_list(data, pos, depth),
        b'd' => decode_dict(data, pos, depth),
        b'0'..=b'9' => decode_bytes(data, pos),
        c => Err(BencodeError::UnexpectedChar {
            offset: *pos,
            found: c as char,
        }),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    *pos += 1;

    let start = *pos;
    while *pos < data.len() && data[*pos] != b'e' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof { offset: *pos });
    }

    let invalid = |reason| BencodeError::InvalidInteger {
        offset: start,
        reason,
    };

    let digits = &data[start..*pos];
    let magnitude = digits.strip_prefix(b"-").unwrap_or(digits);

    if magnitude.is_empty() {
        return Err(invalid("no digits"));
    }
    if !magnitude.iter().all(u8::is_ascii_digit) {
        return Err(invalid("non-digit character"));
    }
    if magnitude[0] == b'0' && (magnitude.len() > 1 || magnitude.len() != digits.len()) {
        return Err(invalid("leading zero"));
    }

    let value: i64 = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("out of range"))?;

    *pos += 1;
    Ok(Value::Integer(value))
}

fn decode_bytes(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let start = *pos;
    while *pos < data.len() && data[*pos].is_ascii_digit() {
        *pos += 1;
    }

    match data.get(*pos) {
        None => return Err(BencodeError::UnexpectedEof { offset: *pos }),
        Some(b':') => {}
        Some(_) => return Err(BencodeError::InvalidStringLength { offset: start }),
    }

    let digits = &data[start..*pos];
    if digits.len() > 1 && digits[0] == b'0' {
        return Err(BencodeError::InvalidStringLength { offset: start });
    }

    let len: usize = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(BencodeError::InvalidStringLength { offset: start })?;

    *pos += 1;

    let end = pos
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or(BencodeError::UnexpectedEof { offset: data.len() })?;

    let bytes = Bytes::copy_from_slice(&data[*pos..end]);
    *pos = end;

    Ok(Value::Bytes(bytes))
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut list = Vec::new();

    while *pos < data.len() && data[*pos] != b'e' {
        list.push(decode_value(data, pos, depth + 1)?);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof { offset: *pos });
    }

    *pos += 1;
    Ok(Value::List(list))
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut dict = BTreeMap::new();

    while *pos < data.len() && data[*pos] != b'e' {
        let key_offset = *pos;
        if !data[key_offset].is_ascii_digit() {
            return Err(BencodeError::NonStringKey { offset: key_offset });
        }

        let Value::Bytes(key) = decode_bytes(data, pos)? else {
            return Err(BencodeError::NonStringKey { offset: key_offset });
        };

        let value = decode_value(data, pos, depth + 1)?;
        match dict.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(_) => {
                return Err(BencodeError::DuplicateKey { offset: key_offset });
            }
        }
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof { offset: *pos });
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}

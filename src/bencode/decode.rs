use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 32;

/// Decodes exactly one bencode value from `data`.
///
/// # Errors
///
/// Fails on truncated or syntactically invalid input, on nesting deeper
/// than 32 levels, and on trailing bytes after the value.
///
/// # Examples
///
/// ```
/// use dredge::bencode::decode;
///
/// let list = decode(b"l4:spami42ee").unwrap();
/// assert_eq!(list.as_list().map(|l| l.len()), Some(2));
/// ```
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, used) = decode_prefix(data)?;
    if used != data.len() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

/// Decodes the first complete bencode value from `data` and returns it
/// together with the number of bytes consumed.
///
/// Trailing bytes are not an error; the caller decides what they mean.
///
/// # Examples
///
/// ```
/// use dredge::bencode::decode_prefix;
///
/// let (value, used) = decode_prefix(b"d5:piecei0eeRAWDATA").unwrap();
/// assert_eq!(value.get(b"piece").and_then(|v| v.as_int()), Some(0));
/// assert_eq!(used, 12);
/// ```
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut parser = Parser { data, pos: 0 };
    let value = parser.value(0)?;
    Ok((value, parser.pos))
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }
        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            c => Err(BencodeError::UnexpectedChar(c as char)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let start = self.pos;
        while self.peek()? != b'e' {
            self.pos += 1;
        }
        let digits = &self.data[start..self.pos];
        self.pos += 1;
        let text = std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidInteger)?;
        if text.is_empty() || text == "-" {
            return Err(BencodeError::InvalidInteger);
        }
        // BEP-3 forbids leading zeros and negative zero.
        if text.starts_with("-0") || (text.len() > 1 && text.starts_with('0')) {
            return Err(BencodeError::InvalidInteger);
        }
        let n: i64 = text.parse().map_err(|_| BencodeError::InvalidInteger)?;
        Ok(Value::Int(n))
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let start = self.pos;
        while self.peek()? != b':' {
            self.pos += 1;
        }
        let len: usize = std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::InvalidLength)?;
        self.pos += 1;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(BencodeError::UnexpectedEof)?;
        let bytes = Bytes::copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut map = BTreeMap::new();
        while self.peek()? != b'e' {
            if !matches!(self.peek()?, b'0'..=b'9') {
                return Err(BencodeError::InvalidKey);
            }
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            map.insert(key, value);
        }
        self.pos += 1;
        Ok(Value::Dict(map))
    }
}

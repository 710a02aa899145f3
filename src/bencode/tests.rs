use std::collections::BTreeMap;

use bytes::Bytes;

use super::*;

#[test]
fn decode_integers() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Int(42));
    assert_eq!(decode(b"i-7e").unwrap(), Value::Int(-7));
    assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
}

#[test]
fn decode_integer_rejects_bad_forms() {
    assert_eq!(decode(b"i-0e"), Err(BencodeError::InvalidInteger));
    assert_eq!(decode(b"i03e"), Err(BencodeError::InvalidInteger));
    assert_eq!(decode(b"ie"), Err(BencodeError::InvalidInteger));
    assert_eq!(decode(b"i12"), Err(BencodeError::UnexpectedEof));
}

#[test]
fn decode_byte_strings() {
    assert_eq!(decode(b"4:spam").unwrap(), Value::bytes(b"spam"));
    assert_eq!(decode(b"0:").unwrap(), Value::bytes(b""));
    assert_eq!(decode(b"5:ab"), Err(BencodeError::UnexpectedEof));
}

#[test]
fn decode_list() {
    let value = decode(b"l4:spami42ee").unwrap();
    let items = value.as_list().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Value::bytes(b"spam"));
    assert_eq!(items[1], Value::Int(42));
}

#[test]
fn decode_dict_any_key_order() {
    // Keys out of order must still decode; only encoding is ordered.
    let value = decode(b"d4:spam4:eggs3:cow3:mooe").unwrap();
    assert_eq!(value.get(b"cow").and_then(Value::as_str), Some("moo"));
    assert_eq!(value.get(b"spam").and_then(Value::as_str), Some("eggs"));
}

#[test]
fn decode_dict_rejects_non_string_key() {
    assert_eq!(decode(b"di1e3:mooe"), Err(BencodeError::InvalidKey));
}

#[test]
fn decode_rejects_trailing_bytes() {
    assert_eq!(decode(b"i42eextra"), Err(BencodeError::TrailingData));
}

#[test]
fn decode_rejects_runaway_nesting() {
    let mut deep = vec![b'l'; 100];
    deep.extend(vec![b'e'; 100]);
    assert_eq!(decode(&deep), Err(BencodeError::NestingTooDeep));
}

#[test]
fn decode_prefix_reports_consumed_length() {
    let (value, used) = decode_prefix(b"d5:piecei1eeRAWPAYLOAD").unwrap();
    assert_eq!(value.get(b"piece").and_then(Value::as_int), Some(1));
    assert_eq!(used, 12);

    // Exact-length input consumes everything.
    let (_, used) = decode_prefix(b"le").unwrap();
    assert_eq!(used, 2);
}

#[test]
fn encode_scalars() {
    assert_eq!(encode(&Value::Int(42)), b"i42e");
    assert_eq!(encode(&Value::Int(-42)), b"i-42e");
    assert_eq!(encode(&Value::bytes(b"spam")), b"4:spam");
}

#[test]
fn encode_dict_orders_keys() {
    let mut map = BTreeMap::new();
    map.insert(Bytes::from_static(b"zz"), Value::Int(1));
    map.insert(Bytes::from_static(b"aa"), Value::Int(2));
    assert_eq!(encode(&Value::Dict(map)), b"d2:aai2e2:zzi1ee");
}

#[test]
fn round_trip_nested() {
    let raw: &[u8] = b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe";
    let value = decode(raw).unwrap();
    assert_eq!(encode(&value), raw);
}

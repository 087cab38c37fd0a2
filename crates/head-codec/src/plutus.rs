//! Structured data in the ledger's canonical form
//!
//! Encoding follows the conventional ledger encoder so that re-encoding a
//! value always yields the same bytes: constructor tags 121..=127 and
//! 1280..=1400 with tag 102 as the general form, indefinite arrays for
//! non-empty lists, definite maps, bignum tags for integers beyond 64 bits
//! and 64-byte chunking of long byte strings.

use serde_json::Value as Json;

use crate::cbor::{Header, Reader, Writer, MAJOR_BYTES};
use crate::constants::{
    BIGNUM_NEG_TAG, BIGNUM_POS_TAG, BYTES_CHUNK, CONSTR_GENERAL_TAG, CONSTR_TAG_BASE,
    CONSTR_TAG_EXT_BASE, MAX_DEPTH,
};
use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlutusData {
    Constr { tag: u64, fields: Vec<PlutusData> },
    Map(Vec<(PlutusData, PlutusData)>),
    List(Vec<PlutusData>),
    Int(i128),
    Bytes(Vec<u8>),
}

impl PlutusData {
    pub fn constr(tag: u64, fields: Vec<PlutusData>) -> Self {
        PlutusData::Constr { tag, fields }
    }

    pub fn int(value: impl Into<i128>) -> Self {
        PlutusData::Int(value.into())
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        PlutusData::Bytes(value.into())
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64);
        self.encode(&mut w);
        w.into_bytes()
    }

    pub fn encode(&self, w: &mut Writer) {
        match self {
            PlutusData::Constr { tag, fields } => {
                match *tag {
                    0..=6 => {
                        w.tag(CONSTR_TAG_BASE + tag);
                    }
                    7..=127 => {
                        w.tag(CONSTR_TAG_EXT_BASE + (tag - 7));
                    }
                    _ => {
                        w.tag(CONSTR_GENERAL_TAG).array(2).uint(*tag);
                    }
                }
                encode_list(w, fields);
            }
            PlutusData::Map(pairs) => {
                w.map(pairs.len() as u64);
                for (k, v) in pairs {
                    k.encode(w);
                    v.encode(w);
                }
            }
            PlutusData::List(items) => encode_list(w, items),
            PlutusData::Int(v) => encode_int(w, *v),
            PlutusData::Bytes(b) => encode_bytes(w, b),
        }
    }

    /// Decode exactly one value spanning all of `bytes`
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let data = Self::decode(&mut r)?;
        r.finish()?;
        Ok(data)
    }

    /// Decode one value from the reader's position
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        decode_at(r, 0)
    }

    /// Convert the coordinator's JSON datum form
    ///
    /// `{"constructor": n, "fields": [..]}`, `{"int": n}`, `{"bytes": "hex"}`,
    /// `{"list": [..]}`, `{"map": [{"k": .., "v": ..}]}`
    pub fn from_json(json: &Json) -> Result<Self, DecodeError> {
        from_json_at(json, 0)
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            PlutusData::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PlutusData::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PlutusData]> {
        match self {
            PlutusData::List(items) => Some(items),
            _ => None,
        }
    }
}

fn encode_list(w: &mut Writer, items: &[PlutusData]) {
    if items.is_empty() {
        w.array(0);
        return;
    }
    w.begin_indefinite_array();
    for item in items {
        item.encode(w);
    }
    w.end_indefinite();
}

fn encode_bytes(w: &mut Writer, bytes: &[u8]) {
    if bytes.len() <= BYTES_CHUNK {
        w.bytes(bytes);
        return;
    }
    w.begin_indefinite_bytes();
    for chunk in bytes.chunks(BYTES_CHUNK) {
        w.bytes(chunk);
    }
    w.end_indefinite();
}

fn encode_int(w: &mut Writer, v: i128) {
    if v >= 0 {
        let v = v as u128;
        match u64::try_from(v) {
            Ok(small) => {
                w.uint(small);
            }
            Err(_) => {
                w.tag(BIGNUM_POS_TAG);
                encode_bytes(w, &magnitude_bytes(v));
            }
        }
    } else {
        // -1 - v, which is the bitwise complement in two's complement
        let n = !v as u128;
        match u64::try_from(n) {
            Ok(small) => {
                w.nint(small);
            }
            Err(_) => {
                w.tag(BIGNUM_NEG_TAG);
                encode_bytes(w, &magnitude_bytes(n));
            }
        }
    }
}

fn magnitude_bytes(v: u128) -> Vec<u8> {
    let be = v.to_be_bytes();
    let first = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
    be[first..].to_vec()
}

fn magnitude_from_bytes(bytes: &[u8]) -> Result<u128, DecodeError> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    if significant.len() > 16 {
        return Err(DecodeError::IntegerOverflow);
    }
    Ok(significant
        .iter()
        .fold(0u128, |acc, b| (acc << 8) | *b as u128))
}

fn decode_at(r: &mut Reader<'_>, depth: usize) -> Result<PlutusData, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded(MAX_DEPTH));
    }
    if r.peek_u8()? >> 5 == MAJOR_BYTES {
        return r.bytes().map(PlutusData::Bytes);
    }
    match r.header()? {
        Header::Uint(v) => Ok(PlutusData::Int(v as i128)),
        Header::Nint(n) => Ok(PlutusData::Int(-1 - n as i128)),
        Header::Array(len) => Ok(PlutusData::List(decode_items(r, len, depth)?)),
        Header::Map(len) => {
            let mut pairs = Vec::new();
            let mut seen = 0;
            while r.has_next(len, seen)? {
                let k = decode_at(r, depth + 1)?;
                let v = decode_at(r, depth + 1)?;
                pairs.push((k, v));
                seen += 1;
            }
            Ok(PlutusData::Map(pairs))
        }
        Header::Tag(tag) => decode_tagged(r, tag, depth),
        other => Err(DecodeError::UnexpectedType {
            expected: "plutus data",
            found: other.major(),
        }),
    }
}

fn decode_items(
    r: &mut Reader<'_>,
    len: Option<u64>,
    depth: usize,
) -> Result<Vec<PlutusData>, DecodeError> {
    let mut items = Vec::with_capacity(len.unwrap_or(0).min(r.remaining() as u64) as usize);
    let mut seen = 0;
    while r.has_next(len, seen)? {
        items.push(decode_at(r, depth + 1)?);
        seen += 1;
    }
    Ok(items)
}

fn decode_tagged(r: &mut Reader<'_>, tag: u64, depth: usize) -> Result<PlutusData, DecodeError> {
    match tag {
        121..=127 => {
            let len = r.array()?;
            Ok(PlutusData::Constr {
                tag: tag - CONSTR_TAG_BASE,
                fields: decode_items(r, len, depth)?,
            })
        }
        1280..=1400 => {
            let len = r.array()?;
            Ok(PlutusData::Constr {
                tag: tag - CONSTR_TAG_EXT_BASE + 7,
                fields: decode_items(r, len, depth)?,
            })
        }
        CONSTR_GENERAL_TAG => {
            let len = r.array()?;
            if len != Some(2) {
                return Err(DecodeError::UnexpectedData("[alternative, fields]"));
            }
            let alt = r.uint()?;
            let fields_len = r.array()?;
            Ok(PlutusData::Constr {
                tag: alt,
                fields: decode_items(r, fields_len, depth)?,
            })
        }
        BIGNUM_POS_TAG => {
            let v = magnitude_from_bytes(&r.bytes()?)?;
            i128::try_from(v)
                .map(PlutusData::Int)
                .map_err(|_| DecodeError::IntegerOverflow)
        }
        BIGNUM_NEG_TAG => {
            let n = magnitude_from_bytes(&r.bytes()?)?;
            let n = i128::try_from(n).map_err(|_| DecodeError::IntegerOverflow)?;
            Ok(PlutusData::Int(-1 - n))
        }
        other => Err(DecodeError::UnsupportedTag(other)),
    }
}

fn from_json_at(json: &Json, depth: usize) -> Result<PlutusData, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded(MAX_DEPTH));
    }
    let obj = json
        .as_object()
        .ok_or_else(|| DecodeError::InvalidJson(format!("expected object, got {json}")))?;

    if let Some(ctor) = obj.get("constructor") {
        let tag = ctor
            .as_u64()
            .ok_or_else(|| DecodeError::InvalidJson(format!("bad constructor {ctor}")))?;
        let fields = json_array(obj.get("fields"), "fields")?
            .iter()
            .map(|f| from_json_at(f, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(PlutusData::Constr { tag, fields });
    }
    if let Some(int) = obj.get("int") {
        let v = if let Some(v) = int.as_i64() {
            v as i128
        } else if let Some(v) = int.as_u64() {
            v as i128
        } else {
            return Err(DecodeError::InvalidJson(format!("bad int {int}")));
        };
        return Ok(PlutusData::Int(v));
    }
    if let Some(bytes) = obj.get("bytes") {
        let s = bytes
            .as_str()
            .ok_or_else(|| DecodeError::InvalidJson(format!("bad bytes {bytes}")))?;
        let b = hex::decode(s).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        return Ok(PlutusData::Bytes(b));
    }
    if obj.contains_key("list") {
        let items = json_array(obj.get("list"), "list")?
            .iter()
            .map(|i| from_json_at(i, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(PlutusData::List(items));
    }
    if obj.contains_key("map") {
        let mut pairs = Vec::new();
        for entry in json_array(obj.get("map"), "map")? {
            let k = entry
                .get("k")
                .ok_or_else(|| DecodeError::InvalidJson("map entry without k".into()))?;
            let v = entry
                .get("v")
                .ok_or_else(|| DecodeError::InvalidJson("map entry without v".into()))?;
            pairs.push((from_json_at(k, depth + 1)?, from_json_at(v, depth + 1)?));
        }
        return Ok(PlutusData::Map(pairs));
    }
    Err(DecodeError::InvalidJson(format!("unknown datum shape {json}")))
}

fn json_array<'a>(value: Option<&'a Json>, field: &str) -> Result<&'a Vec<Json>, DecodeError> {
    value
        .and_then(Json::as_array)
        .ok_or_else(|| DecodeError::InvalidJson(format!("missing array {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hex_of(d: &PlutusData) -> String {
        hex::encode(d.to_cbor())
    }

    #[test]
    fn test_constructor_tags() {
        assert_eq!(hex_of(&PlutusData::constr(0, vec![])), "d87980");
        assert_eq!(hex_of(&PlutusData::constr(6, vec![])), "d87f80");
        assert_eq!(hex_of(&PlutusData::constr(7, vec![])), "d9050080");
        assert_eq!(hex_of(&PlutusData::constr(127, vec![])), "d9057880");
        assert_eq!(hex_of(&PlutusData::constr(200, vec![])), "d8668218c880");
    }

    #[test]
    fn test_non_empty_lists_are_indefinite() {
        let d = PlutusData::constr(1, vec![PlutusData::int(1), PlutusData::bytes(vec![0xaa])]);
        assert_eq!(hex_of(&d), "d87a9f0141aaff");
        let d = PlutusData::List(vec![PlutusData::int(-1)]);
        assert_eq!(hex_of(&d), "9f20ff");
    }

    #[test]
    fn test_integers_beyond_64_bits_use_bignums() {
        let two_64 = 1i128 << 64;
        assert_eq!(hex_of(&PlutusData::Int(two_64)), "c249010000000000000000");
        assert_eq!(hex_of(&PlutusData::Int(-two_64)), "3bffffffffffffffff");
        assert_eq!(hex_of(&PlutusData::Int(-two_64 - 1)), "c349010000000000000000");

        for v in [two_64, -two_64, -two_64 - 1, i128::MAX, i128::MIN, 0, -1] {
            let d = PlutusData::Int(v);
            assert_eq!(PlutusData::from_cbor(&d.to_cbor()).unwrap(), d);
        }
    }

    #[test]
    fn test_oversized_bignum_overflows() {
        let mut w = Writer::new();
        w.tag(2).bytes(&[1; 17]);
        assert_eq!(
            PlutusData::from_cbor(w.as_slice()),
            Err(DecodeError::IntegerOverflow)
        );
    }

    #[test]
    fn test_long_bytes_are_chunked() {
        let data = vec![7u8; 65];
        let encoded = PlutusData::bytes(data.clone()).to_cbor();
        assert_eq!(&encoded[..3], &[0x5f, 0x58, 0x40]);
        assert_eq!(&encoded[67..], &[0x41, 0x07, 0xff]);
        assert_eq!(
            PlutusData::from_cbor(&encoded).unwrap(),
            PlutusData::Bytes(data)
        );
    }

    #[test]
    fn test_definite_and_general_forms_decode() {
        // 121([1]) with a definite array
        assert_eq!(
            PlutusData::from_cbor(&[0xd8, 0x79, 0x81, 0x01]).unwrap(),
            PlutusData::constr(0, vec![PlutusData::int(1)])
        );
        // 102([9, []])
        assert_eq!(
            PlutusData::from_cbor(&[0xd8, 0x66, 0x82, 0x09, 0x80]).unwrap(),
            PlutusData::constr(9, vec![])
        );
    }

    #[test]
    fn test_trailing_bytes_and_text_rejected() {
        assert_eq!(
            PlutusData::from_cbor(&[0x01, 0x02]),
            Err(DecodeError::TrailingBytes(1))
        );
        assert!(matches!(
            PlutusData::from_cbor(&[0x61, b'a']),
            Err(DecodeError::UnexpectedType { found: 3, .. })
        ));
        assert_eq!(
            PlutusData::from_cbor(&[0xd8, 0x18, 0x40]),
            Err(DecodeError::UnsupportedTag(24))
        );
    }

    #[test]
    fn test_from_json() {
        let json = json!({
            "constructor": 0,
            "fields": [
                {"int": 3},
                {"bytes": "beef"},
                {"list": [{"int": -2}]},
                {"map": [{"k": {"int": 1}, "v": {"bytes": ""}}]}
            ]
        });
        let d = PlutusData::from_json(&json).unwrap();
        assert_eq!(
            d,
            PlutusData::constr(
                0,
                vec![
                    PlutusData::int(3),
                    PlutusData::bytes(vec![0xbe, 0xef]),
                    PlutusData::List(vec![PlutusData::int(-2)]),
                    PlutusData::Map(vec![(PlutusData::int(1), PlutusData::bytes(vec![]))]),
                ]
            )
        );
        assert!(PlutusData::from_json(&json!({"string": "x"})).is_err());
    }
}

//! Minimal transaction decoder
//!
//! Recovers just what a head client needs from a transaction seen on the
//! channel: its id, the inputs it consumes and the outputs it creates.
//! Everything else in the body is skipped.

use head_codec::{DecodeError, Header, Reader};
use head_types::{bytes_to_bech32, AssetBag, ChainUnit, TxId, UnitRef, Value};

use crate::hash::tx_id;

/// Set tag some encoders wrap inputs in
const SET_TAG: u64 = 258;
const ENCODED_CBOR_TAG: u64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedOutput {
    pub address: Vec<u8>,
    pub value: Value,
    /// Inline datum bytes
    pub datum: Option<Vec<u8>>,
    pub datum_hash: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTx {
    pub id: TxId,
    pub inputs: Vec<UnitRef>,
    pub outputs: Vec<DecodedOutput>,
}

impl DecodedTx {
    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        let bytes = hex::decode(s).map_err(|_| DecodeError::UnexpectedData("hex transaction"))?;
        Self::from_cbor(&bytes)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        match r.array()? {
            Some(3) | Some(4) | None => {}
            Some(_) => return Err(DecodeError::UnexpectedData("transaction array")),
        }
        let body = r.raw_item()?;
        let id = tx_id(body);

        let mut r = Reader::new(body);
        let len = r.map()?;
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut seen = 0;
        while r.has_next(len, seen)? {
            match r.uint()? {
                0 => inputs = decode_inputs(&mut r)?,
                1 => outputs = decode_outputs(&mut r)?,
                _ => r.skip()?,
            }
            seen += 1;
        }
        Ok(Self { id, inputs, outputs })
    }

    /// Outputs as chain units owned by their bech32 addresses
    pub fn chain_units(&self) -> Vec<ChainUnit> {
        self.outputs
            .iter()
            .enumerate()
            .map(|(i, o)| ChainUnit {
                unit_ref: UnitRef::new(self.id, i as u64),
                owner_address: bytes_to_bech32(&o.address),
                value: o.value.clone(),
                payload: o.datum.clone(),
                datum_hash: o.datum_hash.clone(),
            })
            .collect()
    }
}

fn decode_inputs(r: &mut Reader<'_>) -> Result<Vec<UnitRef>, DecodeError> {
    skip_tag(r, SET_TAG)?;
    let len = r.array()?;
    let mut inputs = Vec::new();
    let mut seen = 0;
    while r.has_next(len, seen)? {
        inputs.push(decode_unit_ref(r)?);
        seen += 1;
    }
    Ok(inputs)
}

fn decode_unit_ref(r: &mut Reader<'_>) -> Result<UnitRef, DecodeError> {
    if r.array()? != Some(2) {
        return Err(DecodeError::UnexpectedData("[tx_id, index]"));
    }
    let id: [u8; 32] = r
        .bytes()?
        .try_into()
        .map_err(|_| DecodeError::UnexpectedData("32-byte transaction id"))?;
    Ok(UnitRef::new(TxId(id), r.uint()?))
}

fn decode_outputs(r: &mut Reader<'_>) -> Result<Vec<DecodedOutput>, DecodeError> {
    let len = r.array()?;
    let mut outputs = Vec::new();
    let mut seen = 0;
    while r.has_next(len, seen)? {
        outputs.push(decode_output(r)?);
        seen += 1;
    }
    Ok(outputs)
}

fn decode_output(r: &mut Reader<'_>) -> Result<DecodedOutput, DecodeError> {
    let mut out = DecodedOutput {
        address: Vec::new(),
        value: Value::default(),
        datum: None,
        datum_hash: None,
    };
    match r.header()? {
        // Legacy `[address, value, datum_hash?]`
        Header::Array(len) => {
            let mut seen = 0;
            while r.has_next(len, seen)? {
                match seen {
                    0 => out.address = r.bytes()?,
                    1 => out.value = decode_value(r)?,
                    2 => out.datum_hash = Some(r.bytes()?),
                    _ => r.skip()?,
                }
                seen += 1;
            }
        }
        Header::Map(len) => {
            let mut seen = 0;
            while r.has_next(len, seen)? {
                match r.uint()? {
                    0 => out.address = r.bytes()?,
                    1 => out.value = decode_value(r)?,
                    2 => decode_datum_option(r, &mut out)?,
                    _ => r.skip()?,
                }
                seen += 1;
            }
        }
        other => {
            return Err(DecodeError::UnexpectedType {
                expected: "transaction output",
                found: other.major(),
            })
        }
    }
    Ok(out)
}

fn decode_datum_option(r: &mut Reader<'_>, out: &mut DecodedOutput) -> Result<(), DecodeError> {
    if r.array()? != Some(2) {
        return Err(DecodeError::UnexpectedData("[kind, datum]"));
    }
    match r.uint()? {
        0 => out.datum_hash = Some(r.bytes()?),
        1 => {
            if r.tag()? != ENCODED_CBOR_TAG {
                return Err(DecodeError::UnexpectedData("tag 24 inline datum"));
            }
            out.datum = Some(r.bytes()?);
        }
        _ => return Err(DecodeError::UnexpectedData("datum option")),
    }
    Ok(())
}

fn decode_value(r: &mut Reader<'_>) -> Result<Value, DecodeError> {
    if let Header::Uint(coin) = r.clone().header()? {
        r.header()?;
        return Ok(Value::coin(coin));
    }
    if r.array()? != Some(2) {
        return Err(DecodeError::UnexpectedData("[coin, multiasset]"));
    }
    let coin = r.uint()?;
    let mut assets = AssetBag::new();
    let policies = r.map()?;
    let mut seen = 0;
    while r.has_next(policies, seen)? {
        let policy = r.bytes()?;
        let names = r.map()?;
        let entry = assets.entry(policy).or_default();
        let mut n = 0;
        while r.has_next(names, n)? {
            let name = r.bytes()?;
            entry.insert(name, r.uint()?);
            n += 1;
        }
        seen += 1;
    }
    Ok(Value { coin, assets })
}

fn skip_tag(r: &mut Reader<'_>, tag: u64) -> Result<(), DecodeError> {
    let mut peek = r.clone();
    if peek.header()? == Header::Tag(tag) {
        *r = peek;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use head_codec::Writer;

    fn legacy_tx() -> Vec<u8> {
        let mut body = Writer::new();
        body.map(3);
        body.uint(0).tag(258).array(1).array(2).bytes(&[0xee; 32]).uint(3);
        body.uint(1).array(2);
        // legacy output with datum hash
        body.array(3).bytes(&[0x60; 29]).uint(5).bytes(&[0xdd; 32]);
        // map output with a plain coin value and an extra script ref field
        body.map(2).uint(0).bytes(&[0x61; 29]).uint(3).bytes(&[0x00]);
        body.uint(2).uint(170_000);
        let body = body.into_bytes();

        let mut tx = Writer::new();
        tx.array(4).raw(&body).map(0).bool(true).null();
        tx.into_bytes()
    }

    #[test]
    fn test_decodes_legacy_and_map_outputs() {
        let tx = DecodedTx::from_cbor(&legacy_tx()).unwrap();
        assert_eq!(tx.inputs, vec![UnitRef::new(TxId([0xee; 32]), 3)]);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, Value::coin(5));
        assert_eq!(tx.outputs[0].datum_hash, Some(vec![0xdd; 32]));
        assert_eq!(tx.outputs[1].address, vec![0x61; 29]);
        assert_eq!(tx.outputs[1].datum, None);

        let units = tx.chain_units();
        assert_eq!(units[1].unit_ref, UnitRef::new(tx.id, 1));
        assert!(units[0].owner_address.starts_with("addr_test1"));
        assert!(units[1].owner_address.starts_with("addr1"));
    }

    #[test]
    fn test_id_hashes_raw_body_bytes() {
        let bytes = legacy_tx();
        let tx = DecodedTx::from_cbor(&bytes).unwrap();
        // body sits between the array header and the witness map
        let body = &bytes[1..bytes.len() - 3];
        assert_eq!(tx.id, tx_id(body));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(DecodedTx::from_cbor(&[]).is_err());
        assert!(DecodedTx::from_cbor(&[0x82, 0x01, 0x02]).is_err());
        assert!(DecodedTx::from_hex("zz").is_err());
        // truncated body
        let bytes = legacy_tx();
        assert!(DecodedTx::from_cbor(&bytes[..20]).is_err());
    }
}

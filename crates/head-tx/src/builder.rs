//! Minimal transaction builder
//!
//! Every unit spends exactly one input and produces exactly one output at
//! zero fee, so the body is laid out by hand with the CBOR writer instead
//! of going through coin selection and balancing.
//!
//! Body:      `{0: [input], 1: [output], 2: 0}` plus, when spending from the
//!            validator, `{11: script_data_hash, 13: [collateral],
//!            14: [signer], 18: [reference_input]}`
//! Output:    `{0: address, 1: [coin, multiasset], 2: [1, 24(datum)]}`
//! Witnesses: `{0: [[vkey, sig]]}` plus `1: [native_script]` or
//!            `5: [[0, 0, redeemer, [mem, steps]]]` depending on the guard
//! Tx:        `[body, witnesses, true, null]`

use head_codec::Writer;
use head_types::{bytes_to_bech32, ChainUnit, TxId, UnitRef, Value};

use crate::error::BuildError;
use crate::hash::{blake2b_256, tx_id};
use crate::keys::ClientKeySet;
use crate::script::{NativeScript, ValidatorRef};

/// Channel maximum transaction size
pub const DEFAULT_MAX_TX_SIZE: usize = 16_384;

/// Datum option discriminant for inline datums
const INLINE_DATUM: u64 = 1;
/// Tag wrapping embedded CBOR
const ENCODED_CBOR_TAG: u64 = 24;
/// Redeemer tag for spending
const REDEEMER_SPEND: u64 = 0;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub max_tx_size: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_tx_size: DEFAULT_MAX_TX_SIZE,
        }
    }
}

/// Where the single output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Back to the signing key
    SelfKey,
    /// The `any-of(player, admin)` native script
    AnyOf,
    /// The game validator
    Validator,
}

/// Guard of the input being spent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Key,
    NativeScript,
    Validator,
}

/// A signed unit ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltUnit {
    pub tx_id: TxId,
    /// Complete signed transaction
    pub bytes: Vec<u8>,
    /// The input this unit consumes
    pub spent: UnitRef,
    /// The unit's own output, to be adopted as the next input
    pub successor: ChainUnit,
}

impl BuiltUnit {
    pub fn cbor_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// Address in wire form plus the bech32 form units are keyed by
#[derive(Debug, Clone)]
struct KnownAddress {
    bytes: Vec<u8>,
    bech32: String,
}

impl KnownAddress {
    fn new(address: head_types::Address) -> Self {
        let bytes = address.to_bytes();
        let bech32 = bytes_to_bech32(&bytes);
        Self { bytes, bech32 }
    }
}

pub struct TxBuilder {
    keys: ClientKeySet,
    config: BuilderConfig,
    self_address: KnownAddress,
    any_of: Option<(NativeScript, KnownAddress)>,
    validator: Option<(ValidatorRef, KnownAddress)>,
}

impl TxBuilder {
    pub fn new(keys: ClientKeySet, config: BuilderConfig) -> Self {
        let self_address = KnownAddress::new(keys.address());
        Self {
            keys,
            config,
            self_address,
            any_of: None,
            validator: None,
        }
    }

    /// Enable the lobby multisig shared with `admin`
    pub fn with_admin(mut self, admin: head_types::KeyHash) -> Self {
        let script = NativeScript::any_of_keys(self.keys.key_hash(), admin);
        let address = KnownAddress::new(script.address(self.keys.network()));
        self.any_of = Some((script, address));
        self
    }

    pub fn with_validator(mut self, validator: ValidatorRef) -> Self {
        let address = KnownAddress::new(validator.address(self.keys.network()));
        self.validator = Some((validator, address));
        self
    }

    pub fn keys(&self) -> &ClientKeySet {
        &self.keys
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Bech32 address of a destination, if configured
    pub fn address_of(&self, dest: Destination) -> Option<&str> {
        self.known(dest).map(|a| a.bech32.as_str())
    }

    fn known(&self, dest: Destination) -> Option<&KnownAddress> {
        match dest {
            Destination::SelfKey => Some(&self.self_address),
            Destination::AnyOf => self.any_of.as_ref().map(|(_, a)| a),
            Destination::Validator => self.validator.as_ref().map(|(_, a)| a),
        }
    }

    /// Which guard protects a unit, judged by its owner address
    pub fn guard_of(&self, unit: &ChainUnit) -> Option<Guard> {
        let owner = Some(unit.owner_address.as_str());
        if self.address_of(Destination::SelfKey) == owner {
            Some(Guard::Key)
        } else if self.address_of(Destination::AnyOf) == owner {
            Some(Guard::NativeScript)
        } else if self.address_of(Destination::Validator) == owner {
            Some(Guard::Validator)
        } else {
            None
        }
    }

    /// Build and sign the unit spending `input` and carrying `payload`
    ///
    /// `payload` is an already encoded datum. The output carries the
    /// input's value forward unchanged.
    pub fn build_unit(
        &self,
        input: Option<&ChainUnit>,
        payload: &[u8],
        dest: Destination,
    ) -> Result<BuiltUnit, BuildError> {
        let input = input.ok_or(BuildError::NoInput)?;
        if u32::try_from(payload.len()).is_err() {
            return Err(BuildError::PayloadTooLarge(payload.len()));
        }
        let guard = self
            .guard_of(input)
            .ok_or_else(|| BuildError::UnknownGuard(input.owner_address.clone()))?;

        let dest_address = self.known(dest).ok_or(match dest {
            Destination::Validator => BuildError::MissingValidator,
            _ => BuildError::MissingScript,
        })?;
        let validator = match guard {
            Guard::Validator => Some(&self.validator.as_ref().ok_or(BuildError::MissingValidator)?.0),
            _ => None,
        };

        let body = self.encode_body(input, &dest_address.bytes, payload, validator);
        let id = tx_id(&body);
        let signature = self.keys.sign(id.as_bytes());

        let mut w = Writer::with_capacity(body.len() + 160);
        w.array(4).raw(&body);
        self.encode_witnesses(&mut w, guard, &signature, validator);
        w.bool(true).null();
        let bytes = w.into_bytes();

        if bytes.len() > self.config.max_tx_size {
            return Err(BuildError::TxTooLarge {
                size: bytes.len(),
                max: self.config.max_tx_size,
            });
        }

        tracing::trace!("Built unit {} spending {} ({} bytes)", id, input.unit_ref, bytes.len());

        Ok(BuiltUnit {
            tx_id: id,
            bytes,
            spent: input.unit_ref,
            successor: ChainUnit {
                unit_ref: UnitRef::new(id, 0),
                owner_address: dest_address.bech32.clone(),
                value: input.value.clone(),
                payload: Some(payload.to_vec()),
                datum_hash: None,
            },
        })
    }

    fn encode_body(
        &self,
        input: &ChainUnit,
        dest_address: &[u8],
        payload: &[u8],
        validator: Option<&ValidatorRef>,
    ) -> Vec<u8> {
        let mut w = Writer::with_capacity(128 + payload.len());
        w.map(if validator.is_some() { 7 } else { 3 });

        w.uint(0).array(1);
        encode_unit_ref(&mut w, &input.unit_ref);

        w.uint(1).array(1).map(3);
        w.uint(0).bytes(dest_address);
        w.uint(1);
        encode_value(&mut w, &input.value);
        w.uint(2).array(2).uint(INLINE_DATUM).tag(ENCODED_CBOR_TAG).bytes(payload);

        w.uint(2).uint(0);

        if let Some(v) = validator {
            w.uint(11).bytes(&script_data_hash(v));
            w.uint(13).array(1);
            encode_unit_ref(&mut w, &v.collateral);
            w.uint(14).array(1).bytes(&self.keys.key_hash());
            w.uint(18).array(1);
            encode_unit_ref(&mut w, &v.reference_input);
        }
        w.into_bytes()
    }

    fn encode_witnesses(
        &self,
        w: &mut Writer,
        guard: Guard,
        signature: &[u8; 64],
        validator: Option<&ValidatorRef>,
    ) {
        let native = match guard {
            Guard::NativeScript => self.any_of.as_ref().map(|(s, _)| s),
            _ => None,
        };
        let entries = 1 + native.is_some() as u64 + validator.is_some() as u64;
        w.map(entries);

        w.uint(0).array(1).array(2);
        w.bytes(&self.keys.public_key()).bytes(signature);

        if let Some(script) = native {
            w.uint(1).array(1);
            script.encode(w);
        }
        if let Some(v) = validator {
            w.uint(5);
            w.raw(&redeemers(v));
        }
    }
}

/// Redeemer list `[[tag, index, data, [mem, steps]]]`
fn redeemers(v: &ValidatorRef) -> Vec<u8> {
    let mut w = Writer::new();
    w.array(1).array(4).uint(REDEEMER_SPEND).uint(0);
    v.redeemer.encode(&mut w);
    w.array(2).uint(v.ex_units.mem).uint(v.ex_units.steps);
    w.into_bytes()
}

/// Blake2b-256 over redeemers and language views (no witness datums)
pub fn script_data_hash(v: &ValidatorRef) -> [u8; 32] {
    let mut preimage = redeemers(v);
    preimage.extend_from_slice(&v.language_views);
    blake2b_256(&preimage)
}

fn encode_unit_ref(w: &mut Writer, r: &UnitRef) {
    w.array(2).bytes(r.tx_id.as_bytes()).uint(r.index);
}

fn encode_value(w: &mut Writer, value: &Value) {
    w.array(2).uint(value.coin).map(value.assets.len() as u64);
    for (policy, names) in &value.assets {
        w.bytes(policy).map(names.len() as u64);
        for (name, qty) in names {
            w.bytes(name).uint(*qty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedTx;
    use crate::script::ExUnits;
    use head_codec::PlutusData;
    use head_types::{Network, TxId};

    fn keys() -> ClientKeySet {
        ClientKeySet::from_bytes(&[5; 32], Network::Testnet)
    }

    fn unit_at(address: String) -> ChainUnit {
        ChainUnit {
            unit_ref: UnitRef::new(TxId([0x11; 32]), 0),
            owner_address: address,
            value: Value::coin(0),
            payload: None,
            datum_hash: None,
        }
    }

    fn validator() -> ValidatorRef {
        ValidatorRef {
            script_hash: [0xcc; 28],
            reference_input: UnitRef::new(TxId([0x22; 32]), 1),
            collateral: UnitRef::new(TxId([0x33; 32]), 2),
            redeemer: PlutusData::constr(0, vec![]),
            ex_units: ExUnits::default(),
            language_views: vec![0xa1, 0x00, 0x80],
        }
    }

    #[test]
    fn test_self_unit_layout() {
        let builder = TxBuilder::new(keys(), BuilderConfig::default());
        let input = unit_at(builder.address_of(Destination::SelfKey).unwrap().to_string());
        let built = builder.build_unit(Some(&input), &[0xd8, 0x79, 0x80], Destination::SelfKey).unwrap();

        let body = format!(
            "a30081825820{}0001\
             81a300581d60{}018200a0028201d81843d87980\
             0200",
            "11".repeat(32),
            hex::encode(builder.keys().key_hash())
        );
        let witnesses = format!(
            "a10081825820{}5840{}",
            hex::encode(builder.keys().public_key()),
            hex::encode(builder.keys().sign(built.tx_id.as_bytes()))
        );
        assert_eq!(built.cbor_hex(), format!("84{body}{witnesses}f5f6"));
        assert_eq!(built.tx_id, tx_id(&hex::decode(&body).unwrap()));
    }

    #[test]
    fn test_successor_and_signature() {
        let builder = TxBuilder::new(keys(), BuilderConfig::default());
        let input = unit_at(builder.address_of(Destination::SelfKey).unwrap().to_string());
        let built = builder.build_unit(Some(&input), &[0x01], Destination::SelfKey).unwrap();

        assert_eq!(built.spent, input.unit_ref);
        assert_eq!(built.successor.unit_ref, UnitRef::new(built.tx_id, 0));
        assert_eq!(built.successor.owner_address, input.owner_address);
        assert_eq!(built.successor.payload, Some(vec![0x01]));

        let decoded = DecodedTx::from_cbor(&built.bytes).unwrap();
        assert_eq!(decoded.id, built.tx_id);
        assert_eq!(decoded.inputs, vec![input.unit_ref]);
        assert_eq!(decoded.outputs[0].datum, Some(vec![0x01]));

        let sig: [u8; 64] = built.bytes[built.bytes.len() - 66..built.bytes.len() - 2]
            .try_into()
            .unwrap();
        assert!(builder.keys().verify(built.tx_id.as_bytes(), &sig));
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = TxBuilder::new(keys(), BuilderConfig::default()).with_admin([9; 28]);
        let input = unit_at(builder.address_of(Destination::AnyOf).unwrap().to_string());
        let a = builder.build_unit(Some(&input), &[0x05], Destination::AnyOf).unwrap();
        let b = builder.build_unit(Some(&input), &[0x05], Destination::AnyOf).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_native_script_witness() {
        let builder = TxBuilder::new(keys(), BuilderConfig::default()).with_admin([9; 28]);
        let input = unit_at(builder.address_of(Destination::AnyOf).unwrap().to_string());
        let built = builder.build_unit(Some(&input), &[0x05], Destination::AnyOf).unwrap();

        let script = NativeScript::any_of_keys(builder.keys().key_hash(), [9; 28]);
        let tail = format!("0181{}f5f6", hex::encode(script.to_cbor()));
        assert!(built.cbor_hex().ends_with(&tail));
        assert!(built.cbor_hex().contains("a20081825820"));
    }

    #[test]
    fn test_validator_spend_adds_script_fields() {
        let builder = TxBuilder::new(keys(), BuilderConfig::default()).with_validator(validator());
        let input = unit_at(builder.address_of(Destination::Validator).unwrap().to_string());
        let built = builder.build_unit(Some(&input), &[0x05], Destination::Validator).unwrap();

        let hex = built.cbor_hex();
        assert!(hex.starts_with("84a7"));
        assert!(hex.contains(&format!("0b5820{}", hex::encode(script_data_hash(&validator())))));
        assert!(hex.contains(&format!("0d8182582033{}", "33".repeat(31))));
        assert!(hex.contains(&format!("0e81581c{}", hex::encode(builder.keys().key_hash()))));
        assert!(hex.contains(&format!("1281825820{}01", "22".repeat(32))));
        // witness map carries the redeemer list under key 5
        assert!(hex.contains("a2008182"));
        assert!(hex.contains("0581840000d87980821a00d59f801b00000002540be400"));
    }

    #[test]
    fn test_rejections() {
        let builder = TxBuilder::new(keys(), BuilderConfig::default());
        let own = unit_at(builder.address_of(Destination::SelfKey).unwrap().to_string());

        assert_eq!(
            builder.build_unit(None, &[0x01], Destination::SelfKey),
            Err(BuildError::NoInput)
        );
        assert_eq!(
            builder.build_unit(Some(&own), &[0x01], Destination::Validator),
            Err(BuildError::MissingValidator)
        );
        assert_eq!(
            builder.build_unit(Some(&own), &[0x01], Destination::AnyOf),
            Err(BuildError::MissingScript)
        );

        let foreign = unit_at("addr_test1foreign".to_string());
        assert_eq!(
            builder.build_unit(Some(&foreign), &[0x01], Destination::SelfKey),
            Err(BuildError::UnknownGuard("addr_test1foreign".to_string()))
        );

        let small = TxBuilder::new(keys(), BuilderConfig { max_tx_size: 200 });
        assert!(matches!(
            small.build_unit(Some(&own), &[0u8; 300], Destination::SelfKey),
            Err(BuildError::TxTooLarge { max: 200, .. })
        ));
    }

    #[test]
    fn test_value_carried_forward() {
        let builder = TxBuilder::new(keys(), BuilderConfig::default());
        let mut input = unit_at(builder.address_of(Destination::SelfKey).unwrap().to_string());
        input.value = Value::coin(2_000_000);
        input
            .value
            .assets
            .entry(vec![0xab; 28])
            .or_default()
            .insert(b"game".to_vec(), 1);
        let built = builder.build_unit(Some(&input), &[0x01], Destination::SelfKey).unwrap();
        assert_eq!(built.successor.value, input.value);

        let decoded = DecodedTx::from_cbor(&built.bytes).unwrap();
        assert_eq!(decoded.outputs[0].value, input.value);
    }
}

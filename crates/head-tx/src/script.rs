//! Spending guards other than a plain key
//!
//! - `NativeScript`: the lobby-phase `any-of(player, admin)` multisig
//! - `ValidatorRef`: an externally supplied validator, referenced by hash
//!   and by the unit holding its reference script

use head_codec::{PlutusData, Writer};
use head_types::{Address, Credential, KeyHash, Network, UnitRef};
use serde::{Deserialize, Serialize};

use crate::hash::blake2b_224;

/// Native script language tag prepended before hashing
const NATIVE_SCRIPT_NAMESPACE: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeScript {
    Pubkey(KeyHash),
    AnyOf(Vec<NativeScript>),
}

impl NativeScript {
    /// Spendable by either the player or the admin
    pub fn any_of_keys(player: KeyHash, admin: KeyHash) -> Self {
        NativeScript::AnyOf(vec![NativeScript::Pubkey(player), NativeScript::Pubkey(admin)])
    }

    pub fn encode(&self, w: &mut Writer) {
        match self {
            NativeScript::Pubkey(hash) => {
                w.array(2).uint(0).bytes(hash);
            }
            NativeScript::AnyOf(scripts) => {
                w.array(2).uint(2).array(scripts.len() as u64);
                for s in scripts {
                    s.encode(w);
                }
            }
        }
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    pub fn hash(&self) -> KeyHash {
        let mut preimage = vec![NATIVE_SCRIPT_NAMESPACE];
        preimage.extend_from_slice(&self.to_cbor());
        blake2b_224(&preimage)
    }

    pub fn address(&self, network: Network) -> Address {
        Address::new(network, Credential::Script(self.hash()))
    }
}

/// Execution budget attached to a redeemer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExUnits {
    pub mem: u64,
    pub steps: u64,
}

impl Default for ExUnits {
    fn default() -> Self {
        Self {
            mem: 14_000_000,
            steps: 10_000_000_000,
        }
    }
}

/// Everything needed to spend from (and pay to) the game validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorRef {
    pub script_hash: KeyHash,
    /// Unit carrying the validator as a reference script
    pub reference_input: UnitRef,
    /// Unit offered as collateral
    pub collateral: UnitRef,
    pub redeemer: PlutusData,
    pub ex_units: ExUnits,
    /// Pre-encoded language views (cost model) committed to by the script data hash
    pub language_views: Vec<u8>,
}

impl ValidatorRef {
    pub fn address(&self, network: Network) -> Address {
        Address::new(network, Credential::Script(self.script_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_of_layout() {
        let script = NativeScript::any_of_keys([0xaa; 28], [0xbb; 28]);
        let expected = format!(
            "8202828200581c{}8200581c{}",
            hex::encode([0xaa; 28]),
            hex::encode([0xbb; 28])
        );
        assert_eq!(hex::encode(script.to_cbor()), expected);
    }

    #[test]
    fn test_script_hash_is_namespaced() {
        let script = NativeScript::any_of_keys([1; 28], [2; 28]);
        assert_ne!(script.hash(), blake2b_224(&script.to_cbor()));
        let addr = script.address(Network::Testnet);
        assert_eq!(addr.to_bytes()[0], 0x70);
        assert_eq!(&addr.to_bytes()[1..], &script.hash());
    }

    #[test]
    fn test_order_matters() {
        let a = NativeScript::any_of_keys([1; 28], [2; 28]);
        let b = NativeScript::any_of_keys([2; 28], [1; 28]);
        assert_ne!(a.hash(), b.hash());
    }
}

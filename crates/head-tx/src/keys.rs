//! Session keys
//!
//! A `ClientKeySet` is the Ed25519 key a participant signs every unit with,
//! plus everything derived from it. Keys load from cardano-cli text
//! envelopes, bech32 `ed25519_sk` strings or raw hex.

use std::fmt;
use std::path::Path;

use bech32::{Bech32, Hrp};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use head_types::{Address, Credential, KeyHash, Network};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::KeyError;
use crate::hash::blake2b_224;

/// Bech32 prefix of extended-less ed25519 secret keys
pub const SECRET_KEY_HRP: &str = "ed25519_sk";

const ENVELOPE_TYPE: &str = "PaymentSigningKeyShelley_ed25519";
const ENVELOPE_DESCRIPTION: &str = "Payment Signing Key";
/// CBOR header of a 32-byte byte string
const CBOR_KEY_PREFIX: &str = "5820";

/// cardano-cli key file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(rename = "cborHex")]
    pub cbor_hex: String,
}

#[derive(Clone)]
pub struct ClientKeySet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    key_hash: KeyHash,
    address: Address,
}

impl ClientKeySet {
    pub fn from_signing_key(signing_key: SigningKey, network: Network) -> Self {
        let verifying_key = signing_key.verifying_key();
        let key_hash = blake2b_224(verifying_key.as_bytes());
        Self {
            signing_key,
            verifying_key,
            key_hash,
            address: Address::new(network, Credential::Key(key_hash)),
        }
    }

    pub fn from_bytes(secret: &[u8; 32], network: Network) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret), network)
    }

    /// Fresh random key
    pub fn generate(network: Network) -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng), network)
    }

    pub fn from_bech32(s: &str, network: Network) -> Result<Self, KeyError> {
        let (hrp, data) =
            bech32::decode(s.trim()).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
        if hrp.as_str() != SECRET_KEY_HRP {
            return Err(KeyError::InvalidEncoding(format!(
                "unexpected prefix {}",
                hrp.as_str()
            )));
        }
        Ok(Self::from_bytes(&secret_bytes(&data)?, network))
    }

    pub fn from_hex(s: &str, network: Network) -> Result<Self, KeyError> {
        let data = hex::decode(s.trim()).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
        Ok(Self::from_bytes(&secret_bytes(&data)?, network))
    }

    pub fn from_text_envelope(json: &str, network: Network) -> Result<Self, KeyError> {
        let envelope: TextEnvelope = serde_json::from_str(json)?;
        let raw = envelope
            .cbor_hex
            .strip_prefix(CBOR_KEY_PREFIX)
            .ok_or_else(|| KeyError::InvalidEncoding("cborHex is not a 32-byte string".into()))?;
        Self::from_hex(raw, network)
    }

    /// Parse any supported key encoding
    pub fn parse(contents: &str, network: Network) -> Result<Self, KeyError> {
        let contents = contents.trim();
        if contents.starts_with('{') {
            Self::from_text_envelope(contents, network)
        } else if contents.starts_with(SECRET_KEY_HRP) {
            Self::from_bech32(contents, network)
        } else {
            Self::from_hex(contents, network)
        }
    }

    pub fn load(path: impl AsRef<Path>, network: Network) -> Result<Self, KeyError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let keys = Self::parse(&contents, network)?;
        tracing::debug!(
            "Loaded key {} from {}",
            hex::encode(keys.key_hash),
            path.as_ref().display()
        );
        Ok(keys)
    }

    pub fn to_text_envelope(&self) -> TextEnvelope {
        TextEnvelope {
            kind: ENVELOPE_TYPE.to_string(),
            description: ENVELOPE_DESCRIPTION.to_string(),
            cbor_hex: format!("{CBOR_KEY_PREFIX}{}", hex::encode(self.signing_key.to_bytes())),
        }
    }

    /// Write a cardano-cli style key file
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), KeyError> {
        let json = serde_json::to_string_pretty(&self.to_text_envelope())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn to_bech32(&self) -> Result<String, KeyError> {
        let hrp = Hrp::parse(SECRET_KEY_HRP).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
        bech32::encode::<Bech32>(hrp, &self.signing_key.to_bytes())
            .map_err(|e| KeyError::InvalidEncoding(e.to_string()))
    }

    /// Sign arbitrary bytes
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        let sig: Signature = self.signing_key.sign(msg);
        sig.to_bytes()
    }

    pub fn verify(&self, msg: &[u8], sig: &[u8; 64]) -> bool {
        self.verifying_key
            .verify(msg, &Signature::from_bytes(sig))
            .is_ok()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn key_hash(&self) -> KeyHash {
        self.key_hash
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn network(&self) -> Network {
        self.address.network
    }
}

impl fmt::Debug for ClientKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientKeySet")
            .field("key_hash", &hex::encode(self.key_hash))
            .field("network", &self.address.network)
            .finish_non_exhaustive()
    }
}

fn secret_bytes(data: &[u8]) -> Result<[u8; 32], KeyError> {
    data.try_into().map_err(|_| KeyError::InvalidLength {
        expected: 32,
        actual: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodings_agree() {
        let keys = ClientKeySet::from_bytes(&[7; 32], Network::Testnet);
        let bech = keys.to_bech32().unwrap();
        assert!(bech.starts_with("ed25519_sk1"));

        let from_bech = ClientKeySet::parse(&bech, Network::Testnet).unwrap();
        let from_hex = ClientKeySet::parse(&hex::encode([7u8; 32]), Network::Testnet).unwrap();
        let envelope = serde_json::to_string(&keys.to_text_envelope()).unwrap();
        let from_envelope = ClientKeySet::parse(&envelope, Network::Testnet).unwrap();

        for k in [from_bech, from_hex, from_envelope] {
            assert_eq!(k.key_hash(), keys.key_hash());
            assert_eq!(k.public_key(), keys.public_key());
        }
    }

    #[test]
    fn test_envelope_shape() {
        let keys = ClientKeySet::from_bytes(&[1; 32], Network::Testnet);
        let env = keys.to_text_envelope();
        assert_eq!(env.kind, "PaymentSigningKeyShelley_ed25519");
        assert_eq!(env.cbor_hex.len(), 4 + 64);
        assert!(env.cbor_hex.starts_with("5820"));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payment.sk");
        let keys = ClientKeySet::generate(Network::Mainnet);
        keys.write(&path).unwrap();

        let loaded = ClientKeySet::load(&path, Network::Mainnet).unwrap();
        assert_eq!(loaded.key_hash(), keys.key_hash());
        assert_eq!(loaded.address().to_bytes()[0], 0x61);
    }

    #[test]
    fn test_sign_verify() {
        let keys = ClientKeySet::from_bytes(&[3; 32], Network::Testnet);
        let sig = keys.sign(b"unit");
        assert!(keys.verify(b"unit", &sig));
        assert!(!keys.verify(b"other", &sig));
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(matches!(
            ClientKeySet::parse("abcd", Network::Testnet),
            Err(KeyError::InvalidLength {
                expected: 32,
                actual: 2
            })
        ));
        assert!(matches!(
            ClientKeySet::parse(r#"{"type":"x","description":"","cborHex":"00"}"#, Network::Testnet),
            Err(KeyError::InvalidEncoding(_))
        ));
        assert!(ClientKeySet::parse("not hex", Network::Testnet).is_err());
    }
}

//! Shelley addresses
//!
//! Only the payment part matters to head clients: chain units are owned
//! either by a key hash or by a script hash. Stake parts of base addresses
//! are ignored when decoding and never produced when encoding.

use crate::{KeyHash, Network, TypesError};
use bech32::{Bech32, Hrp};

/// Header type nibble for an enterprise address with a key payment part
const ENTERPRISE_KEY: u8 = 0b0110;
/// Header type nibble for an enterprise address with a script payment part
const ENTERPRISE_SCRIPT: u8 = 0b0111;

/// Payment credential of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Credential {
    Key(KeyHash),
    Script(KeyHash),
}

impl Credential {
    pub fn hash(&self) -> &KeyHash {
        match self {
            Credential::Key(h) | Credential::Script(h) => h,
        }
    }
}

/// Enterprise address (payment credential only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub network: Network,
    pub payment: Credential,
}

impl Address {
    pub fn new(network: Network, payment: Credential) -> Self {
        Self { network, payment }
    }

    /// 29-byte wire form: header followed by the 28-byte credential hash
    pub fn to_bytes(&self) -> Vec<u8> {
        let kind = match self.payment {
            Credential::Key(_) => ENTERPRISE_KEY,
            Credential::Script(_) => ENTERPRISE_SCRIPT,
        };
        let mut out = Vec::with_capacity(29);
        out.push((kind << 4) | self.network.id());
        out.extend_from_slice(self.payment.hash());
        out
    }

    /// Decode the payment part of any Shelley address
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        let header = *bytes.first().ok_or(TypesError::InvalidLength {
            expected: 29,
            actual: 0,
        })?;
        let kind = header >> 4;
        // Types 0..=7 carry a payment credential in bytes 1..29; odd types are scripts.
        if kind > 7 {
            return Err(TypesError::UnsupportedAddress(header));
        }
        if bytes.len() < 29 {
            return Err(TypesError::InvalidLength {
                expected: 29,
                actual: bytes.len(),
            });
        }
        let mut hash = [0u8; 28];
        hash.copy_from_slice(&bytes[1..29]);
        let payment = if kind & 1 == 1 {
            Credential::Script(hash)
        } else {
            Credential::Key(hash)
        };
        Ok(Self {
            network: Network::from_id(header & 0x0f),
            payment,
        })
    }

    pub fn to_bech32(&self) -> Result<String, TypesError> {
        encode_bech32(self.network.address_hrp(), &self.to_bytes())
    }

    pub fn from_bech32(s: &str) -> Result<Self, TypesError> {
        let (_, data) = bech32::decode(s).map_err(|e| TypesError::Bech32(e.to_string()))?;
        Self::from_bytes(&data)
    }
}

/// Render raw address bytes the way the coordinator reports them
///
/// Shelley addresses become bech32; anything else (Byron) is returned as hex.
pub fn bytes_to_bech32(bytes: &[u8]) -> String {
    match bytes.first() {
        Some(header) if header >> 4 <= 7 => {
            let hrp = Network::from_id(header & 0x0f).address_hrp();
            encode_bech32(hrp, bytes).unwrap_or_else(|_| hex::encode(bytes))
        }
        _ => hex::encode(bytes),
    }
}

pub(crate) fn encode_bech32(hrp: &str, data: &[u8]) -> Result<String, TypesError> {
    let hrp = Hrp::parse(hrp).map_err(|e| TypesError::Bech32(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| TypesError::Bech32(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enterprise_key_header() {
        let addr = Address::new(Network::Testnet, Credential::Key([7; 28]));
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), 29);
        assert_eq!(bytes[0], 0x60);

        let mainnet = Address::new(Network::Mainnet, Credential::Script([7; 28]));
        assert_eq!(mainnet.to_bytes()[0], 0x71);
    }

    #[test]
    fn test_bech32_round_trip() {
        let addr = Address::new(Network::Testnet, Credential::Script([0x42; 28]));
        let s = addr.to_bech32().unwrap();
        assert!(s.starts_with("addr_test1"));
        assert_eq!(Address::from_bech32(&s).unwrap(), addr);
        assert_eq!(bytes_to_bech32(&addr.to_bytes()), s);
    }

    #[test]
    fn test_base_address_keeps_payment_part() {
        let mut bytes = vec![0x01];
        bytes.extend_from_slice(&[9; 28]);
        bytes.extend_from_slice(&[8; 28]);
        let addr = Address::from_bytes(&bytes).unwrap();
        assert_eq!(addr.payment, Credential::Script([9; 28]));
        assert_eq!(addr.network, Network::Mainnet);
    }

    #[test]
    fn test_byron_falls_back_to_hex() {
        let bytes = vec![0x82, 0xd8, 0x18];
        assert_eq!(bytes_to_bech32(&bytes), "82d818");
        assert!(matches!(
            Address::from_bytes(&bytes),
            Err(TypesError::UnsupportedAddress(0x82))
        ));
    }
}

//! Application payload schemas
//!
//! Packet traffic and game records share one channel, so every payload is
//! sniffed through [`decode_payload`]. The two shapes differ in arity
//! (2 fields for a batch, 7 for a record) and cannot be confused.

use head_types::PeerIndex;

use crate::constants::KEY_HASH_LEN;
use crate::error::{DecodeError, EncodeError};
use crate::plutus::PlutusData;

/// One game-engine packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub to: PeerIndex,
    pub from: PeerIndex,
    /// Key hash of the sending session
    pub ephemeral_key: Vec<u8>,
    /// Kill counts as seen by the sender, indexed by peer
    pub kills: Vec<i64>,
    /// Opaque engine bytes
    pub data: Vec<u8>,
}

/// All packets submitted in one chain unit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PacketBatch {
    /// Sender's frame counter
    pub tic: u64,
    pub packets: Vec<Packet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GameState {
    #[default]
    Lobby,
    Running,
    Cheated,
    Finished,
    Aborted,
}

impl GameState {
    pub fn alternative(self) -> u64 {
        match self {
            GameState::Lobby => 0,
            GameState::Running => 1,
            GameState::Cheated => 2,
            GameState::Finished => 3,
            GameState::Aborted => 4,
        }
    }

    pub fn from_alternative(alt: u64) -> Option<Self> {
        Some(match alt {
            0 => GameState::Lobby,
            1 => GameState::Running,
            2 => GameState::Cheated,
            3 => GameState::Finished,
            4 => GameState::Aborted,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GameState::Cheated | GameState::Finished | GameState::Aborted
        )
    }
}

/// Lobby / game bookkeeping published by the referee
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameRecord {
    pub referee_key_hash: Vec<u8>,
    pub player_count: u64,
    pub bot_count: u64,
    /// Ephemeral key hashes in join order
    pub players: Vec<Vec<u8>>,
    pub state: GameState,
    pub winner: Option<Vec<u8>>,
    pub cheater: Option<Vec<u8>>,
}

/// Result of sniffing a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Packets(PacketBatch),
    Game(GameRecord),
    Unrecognized,
}

impl Packet {
    pub fn to_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![
                PlutusData::int(self.to),
                PlutusData::int(self.from),
                PlutusData::bytes(self.ephemeral_key.clone()),
                PlutusData::List(self.kills.iter().map(|k| PlutusData::int(*k)).collect()),
                PlutusData::bytes(self.data.clone()),
            ],
        )
    }

    pub fn from_data(data: &PlutusData) -> Result<Self, DecodeError> {
        let f = constr_fields(data, 0, 5)?;
        let kills = list(&f[3])?
            .iter()
            .map(|k| {
                i64::try_from(int(k)?).map_err(|_| DecodeError::OutOfRange("kill count"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            to: peer_index(&f[0])?,
            from: peer_index(&f[1])?,
            ephemeral_key: bytes(&f[2])?.to_vec(),
            kills,
            data: bytes(&f[4])?.to_vec(),
        })
    }
}

impl PacketBatch {
    pub fn to_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![
                PlutusData::int(self.tic),
                PlutusData::List(self.packets.iter().map(Packet::to_data).collect()),
            ],
        )
    }

    pub fn from_data(data: &PlutusData) -> Result<Self, DecodeError> {
        let f = constr_fields(data, 0, 2)?;
        let tic = u64::try_from(int(&f[0])?).map_err(|_| DecodeError::OutOfRange("tic"))?;
        let packets = list(&f[1])?
            .iter()
            .map(Packet::from_data)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tic, packets })
    }
}

impl GameRecord {
    pub fn to_data(&self) -> PlutusData {
        PlutusData::constr(
            0,
            vec![
                PlutusData::bytes(self.referee_key_hash.clone()),
                PlutusData::int(self.player_count),
                PlutusData::int(self.bot_count),
                PlutusData::List(
                    self.players
                        .iter()
                        .map(|p| PlutusData::bytes(p.clone()))
                        .collect(),
                ),
                PlutusData::constr(self.state.alternative(), vec![]),
                option_to_data(&self.winner),
                option_to_data(&self.cheater),
            ],
        )
    }

    pub fn from_data(data: &PlutusData) -> Result<Self, DecodeError> {
        let f = constr_fields(data, 0, 7)?;
        let state = match &f[4] {
            PlutusData::Constr { tag, fields } if fields.is_empty() => {
                GameState::from_alternative(*tag).ok_or(DecodeError::OutOfRange("game state"))?
            }
            _ => return Err(DecodeError::UnexpectedData("game state constructor")),
        };
        Ok(Self {
            referee_key_hash: bytes(&f[0])?.to_vec(),
            player_count: count(&f[1])?,
            bot_count: count(&f[2])?,
            players: list(&f[3])?
                .iter()
                .map(|p| bytes(p).map(<[u8]>::to_vec))
                .collect::<Result<Vec<_>, _>>()?,
            state,
            winner: option_from_data(&f[5])?,
            cheater: option_from_data(&f[6])?,
        })
    }
}

/// Encode a non-empty batch stamped with the sender's `tic`
pub fn encode_packet_batch(packets: &[Packet], tic: u64) -> Result<Vec<u8>, EncodeError> {
    if packets.is_empty() {
        return Err(EncodeError::EmptyBatch);
    }
    let batch = PacketBatch {
        tic,
        packets: packets.to_vec(),
    };
    Ok(batch.to_data().to_cbor())
}

pub fn decode_packet_batch(bytes: &[u8]) -> Result<PacketBatch, DecodeError> {
    PacketBatch::from_data(&PlutusData::from_cbor(bytes)?)
}

/// Encode a game record, checking key hash lengths
pub fn encode_game_record(record: &GameRecord) -> Result<Vec<u8>, EncodeError> {
    check_key_hash("referee key hash", &record.referee_key_hash)?;
    for player in &record.players {
        check_key_hash("player key hash", player)?;
    }
    Ok(record.to_data().to_cbor())
}

pub fn decode_game_record(bytes: &[u8]) -> Result<GameRecord, DecodeError> {
    GameRecord::from_data(&PlutusData::from_cbor(bytes)?)
}

/// Classify a payload; never fails
pub fn decode_payload(bytes: &[u8]) -> Payload {
    match PlutusData::from_cbor(bytes) {
        Ok(data) => payload_from_data(&data),
        Err(_) => Payload::Unrecognized,
    }
}

/// Classify an already-parsed datum
pub fn payload_from_data(data: &PlutusData) -> Payload {
    if let Ok(batch) = PacketBatch::from_data(data) {
        return Payload::Packets(batch);
    }
    if let Ok(record) = GameRecord::from_data(data) {
        return Payload::Game(record);
    }
    Payload::Unrecognized
}

fn check_key_hash(field: &'static str, value: &[u8]) -> Result<(), EncodeError> {
    if value.len() != KEY_HASH_LEN {
        return Err(EncodeError::InvalidLength {
            field,
            expected: KEY_HASH_LEN,
            actual: value.len(),
        });
    }
    Ok(())
}

fn constr_fields(
    data: &PlutusData,
    expected_tag: u64,
    arity: usize,
) -> Result<&[PlutusData], DecodeError> {
    match data {
        PlutusData::Constr { tag, fields } => {
            if *tag != expected_tag {
                return Err(DecodeError::WrongConstructor {
                    expected: expected_tag,
                    found: *tag,
                });
            }
            if fields.len() != arity {
                return Err(DecodeError::WrongArity {
                    expected: arity,
                    found: fields.len(),
                });
            }
            Ok(fields)
        }
        _ => Err(DecodeError::UnexpectedData("constructor")),
    }
}

fn int(data: &PlutusData) -> Result<i128, DecodeError> {
    data.as_int().ok_or(DecodeError::UnexpectedData("integer"))
}

fn bytes(data: &PlutusData) -> Result<&[u8], DecodeError> {
    data.as_bytes().ok_or(DecodeError::UnexpectedData("byte string"))
}

fn list(data: &PlutusData) -> Result<&[PlutusData], DecodeError> {
    data.as_list().ok_or(DecodeError::UnexpectedData("list"))
}

fn count(data: &PlutusData) -> Result<u64, DecodeError> {
    u64::try_from(int(data)?).map_err(|_| DecodeError::OutOfRange("count"))
}

fn peer_index(data: &PlutusData) -> Result<PeerIndex, DecodeError> {
    PeerIndex::try_from(int(data)?).map_err(|_| DecodeError::OutOfRange("peer index"))
}

fn option_to_data(value: &Option<Vec<u8>>) -> PlutusData {
    match value {
        Some(v) => PlutusData::constr(0, vec![PlutusData::bytes(v.clone())]),
        None => PlutusData::constr(1, vec![]),
    }
}

fn option_from_data(data: &PlutusData) -> Result<Option<Vec<u8>>, DecodeError> {
    match data {
        PlutusData::Constr { tag: 0, fields } if fields.len() == 1 => {
            Ok(Some(bytes(&fields[0])?.to_vec()))
        }
        PlutusData::Constr { tag: 1, fields } if fields.is_empty() => Ok(None),
        _ => Err(DecodeError::UnexpectedData("optional value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(kills: Vec<i64>) -> Packet {
        Packet {
            to: 2,
            from: 1,
            ephemeral_key: vec![0xaa, 0xbb],
            kills,
            data: vec![0x00],
        }
    }

    fn record() -> GameRecord {
        GameRecord {
            referee_key_hash: vec![1; 28],
            player_count: 2,
            bot_count: 1,
            players: vec![vec![2; 28]],
            state: GameState::Running,
            winner: None,
            cheater: Some(vec![3; 28]),
        }
    }

    #[test]
    fn test_packet_batch_golden_bytes() {
        let bytes = encode_packet_batch(&[packet(vec![0, 1])], 5).unwrap();
        assert_eq!(
            hex::encode(&bytes),
            "d8799f059fd8799f020142aabb9f0001ff4100ffffff"
        );
    }

    #[test]
    fn test_packet_batch_preserves_order() {
        let packets: Vec<Packet> = (0..3)
            .map(|i| Packet {
                data: vec![i],
                ..packet(vec![0, 1, 0, 0])
            })
            .collect();
        let bytes = encode_packet_batch(&packets, 40).unwrap();
        let batch = decode_packet_batch(&bytes).unwrap();
        assert_eq!(batch.tic, 40);
        assert_eq!(batch.packets, packets);
    }

    #[test]
    fn test_empty_kills_encode_as_empty_list() {
        let bytes = encode_packet_batch(&[packet(vec![])], 0).unwrap();
        assert!(hex::encode(&bytes).contains("42aabb8041"));
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert_eq!(encode_packet_batch(&[], 1), Err(EncodeError::EmptyBatch));
    }

    #[test]
    fn test_game_record_and_batch_never_confused() {
        let record_bytes = encode_game_record(&record()).unwrap();
        assert!(matches!(
            decode_packet_batch(&record_bytes),
            Err(DecodeError::WrongArity { expected: 2, found: 7 })
        ));
        assert_eq!(decode_payload(&record_bytes), Payload::Game(record()));

        let batch_bytes = encode_packet_batch(&[packet(vec![1])], 3).unwrap();
        assert!(decode_game_record(&batch_bytes).is_err());
        assert!(matches!(decode_payload(&batch_bytes), Payload::Packets(_)));
    }

    #[test]
    fn test_game_record_optional_fields() {
        let bytes = encode_game_record(&record()).unwrap();
        let hex = hex::encode(&bytes);
        // Running state, then None winner, then Some(cheater)
        assert!(hex.contains("d87a80d87a80d8799f581c"));
        assert_eq!(decode_game_record(&bytes).unwrap(), record());
    }

    #[test]
    fn test_game_record_rejects_short_key_hash() {
        let mut r = record();
        r.players.push(vec![9; 4]);
        assert_eq!(
            encode_game_record(&r),
            Err(EncodeError::InvalidLength {
                field: "player key hash",
                expected: 28,
                actual: 4
            })
        );
    }

    #[test]
    fn test_garbage_is_unrecognized() {
        assert_eq!(decode_payload(&[]), Payload::Unrecognized);
        assert_eq!(decode_payload(&[0xff, 0x00]), Payload::Unrecognized);
        assert_eq!(
            decode_payload(&PlutusData::int(4).to_cbor()),
            Payload::Unrecognized
        );
        // A batch whose peer index does not fit
        let mut p = packet(vec![]).to_data();
        if let PlutusData::Constr { fields, .. } = &mut p {
            fields[0] = PlutusData::Int(1 << 40);
        }
        let batch = PlutusData::constr(0, vec![PlutusData::int(1), PlutusData::List(vec![p])]);
        assert_eq!(
            decode_packet_batch(&batch.to_cbor()),
            Err(DecodeError::OutOfRange("peer index"))
        );
    }
}

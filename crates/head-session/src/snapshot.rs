//! Snapshot queries
//!
//! `GET {base}/snapshot/utxo` returns the coordinator's current unspent set
//! as a JSON map from `"{tx_id}#{index}"` to an output description.

use std::time::Duration;

use async_trait::async_trait;
use head_codec::PlutusData;
use head_types::{AssetBag, ChainUnit, UnitRef, Value};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{Map, Value as Json};

use crate::error::SessionError;

/// Where the unspent set is fetched from
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ChainUnit>, SessionError>;
}

/// Snapshot endpoint of a running coordinator
#[derive(Clone)]
pub struct HttpSnapshotSource {
    url: String,
    client: Client,
}

impl HttpSnapshotSource {
    pub fn new(http_base: &str, timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: format!("{}/snapshot/utxo", http_base.trim_end_matches('/')),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<Vec<ChainUnit>, SessionError> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::SnapshotStatus(status.as_u16()));
        }
        let body = resp.json::<Json>().await?;
        parse_snapshot(&body)
    }
}

/// Fixed in-memory snapshot, replaceable at any time
#[derive(Default)]
pub struct MemorySnapshot {
    units: Mutex<Vec<ChainUnit>>,
}

impl MemorySnapshot {
    pub fn new(units: Vec<ChainUnit>) -> Self {
        Self {
            units: Mutex::new(units),
        }
    }

    pub fn set(&self, units: Vec<ChainUnit>) {
        *self.units.lock() = units;
    }

    pub fn push(&self, unit: ChainUnit) {
        self.units.lock().push(unit);
    }
}

#[async_trait]
impl SnapshotSource for MemorySnapshot {
    async fn fetch(&self) -> Result<Vec<ChainUnit>, SessionError> {
        Ok(self.units.lock().clone())
    }
}

/// Parse a snapshot response body
///
/// Entries that fail to parse are skipped; only a body that is not an
/// object is an error.
pub fn parse_snapshot(body: &Json) -> Result<Vec<ChainUnit>, SessionError> {
    let entries = body.as_object().ok_or_else(|| SessionError::MalformedSnapshot {
        key: String::new(),
        reason: "expected an object".into(),
    })?;
    let mut units = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for (key, output) in entries {
        let parsed = key
            .parse::<UnitRef>()
            .map_err(SessionError::from)
            .and_then(|unit_ref| parse_output(key, unit_ref, output));
        match parsed {
            Ok(unit) => units.push(unit),
            Err(e) => {
                tracing::debug!("Skipping snapshot entry {}: {}", key, e);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        tracing::warn!("Snapshot had {} unparseable entries", skipped);
    }
    units.sort_by_key(|u| u.unit_ref);
    Ok(units)
}

fn malformed(key: &str, reason: impl Into<String>) -> SessionError {
    SessionError::MalformedSnapshot {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse_output(key: &str, unit_ref: UnitRef, output: &Json) -> Result<ChainUnit, SessionError> {
    let address = output
        .get("address")
        .and_then(Json::as_str)
        .ok_or_else(|| malformed(key, "missing address"))?;

    let value = if let Some(value) = output.get("value").and_then(Json::as_object) {
        parse_value(key, value)?
    } else if let Some(amount) = output.get("amount").and_then(Json::as_object) {
        parse_amount(key, amount)?
    } else {
        Value::default()
    };

    let payload = if let Some(raw) = output.get("inlineDatumRaw").and_then(Json::as_str) {
        Some(hex::decode(raw).map_err(|e| malformed(key, e.to_string()))?)
    } else {
        match output.get("inlineDatum") {
            Some(json) if !json.is_null() => Some(PlutusData::from_json(json)?.to_cbor()),
            _ => None,
        }
    };

    let datum_hash = ["inlineDatumhash", "inlineDatumHash", "datumhash", "datumHash"]
        .iter()
        .find_map(|k| output.get(*k).and_then(Json::as_str))
        .map(|h| hex::decode(h).map_err(|e| malformed(key, e.to_string())))
        .transpose()?;

    Ok(ChainUnit {
        unit_ref,
        owner_address: address.to_string(),
        value,
        payload,
        datum_hash,
    })
}

/// `{"lovelace": n, "<policy>": {"<name>": q}}`
fn parse_value(key: &str, value: &Map<String, Json>) -> Result<Value, SessionError> {
    let mut out = Value::default();
    for (policy, entry) in value {
        if policy == "lovelace" {
            out.coin = quantity(key, entry)?;
        } else {
            parse_policy(key, policy, entry, &mut out.assets)?;
        }
    }
    Ok(out)
}

/// `{"coin": n, "multiasset": {"<policy>": {"<name>": q}}}`
fn parse_amount(key: &str, amount: &Map<String, Json>) -> Result<Value, SessionError> {
    let mut out = Value::default();
    if let Some(coin) = amount.get("coin") {
        out.coin = quantity(key, coin)?;
    }
    if let Some(multi) = amount.get("multiasset").and_then(Json::as_object) {
        for (policy, entry) in multi {
            parse_policy(key, policy, entry, &mut out.assets)?;
        }
    }
    Ok(out)
}

fn parse_policy(
    key: &str,
    policy: &str,
    entry: &Json,
    assets: &mut AssetBag,
) -> Result<(), SessionError> {
    let names = entry
        .as_object()
        .ok_or_else(|| malformed(key, format!("policy {policy} is not an object")))?;
    let policy = hex::decode(policy).map_err(|e| malformed(key, e.to_string()))?;
    let bag = assets.entry(policy).or_default();
    for (name, qty) in names {
        let name = hex::decode(name).map_err(|e| malformed(key, e.to_string()))?;
        bag.insert(name, quantity(key, qty)?);
    }
    Ok(())
}

fn quantity(key: &str, json: &Json) -> Result<u64, SessionError> {
    match json {
        Json::Number(n) => n.as_u64(),
        Json::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| malformed(key, format!("bad quantity {json}")))
}

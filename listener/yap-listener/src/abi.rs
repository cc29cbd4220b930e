//! Runtime ABI handling: event validation, topic-filter construction, and
//! dynamic log decoding
//!
//! Job ABIs arrive as JSON documents at subscribe time, so decoding is fully
//! dynamic: events are resolved by their topic0 selector and decoded with
//! `alloy-dyn-abi`.

use alloy_dyn_abi::{DynSolValue, EventExt};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::{Address, B256, TxHash, U256};
use itertools::Itertools;
use serde_json::Value;

use crate::types::NormalizedEvent;

// ----------
// | Errors |
// ----------

/// ABI handling errors
#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    /// The ABI document failed to parse
    #[error("error parsing ABI: {0}")]
    Parse(#[from] serde_json::Error),
    /// One or more requested event names do not exist in the ABI
    #[error("events not found in contract ABI: {}", .0.join(", "))]
    UnknownEvents(Vec<String>),
    /// A log's topic0 matches no event in the ABI
    #[error("no ABI event with selector {0:#x}")]
    UnknownSelector(B256),
    /// A log failed to decode against its ABI event
    #[error("error decoding log: {0}")]
    Decode(String),
    /// An expected event parameter is absent
    #[error("missing event parameter: {0}")]
    MissingParam(String),
}

#[allow(clippy::needless_pass_by_value)]
impl AbiError {
    /// Create a new decode error
    pub fn decode<T: ToString>(msg: T) -> Self {
        Self::Decode(msg.to_string())
    }
}

// ---------
// | Types |
// ---------

/// A decoded event log: the event's name and its parameters in declaration
/// order, indexed parameters first
#[derive(Clone, Debug)]
pub struct DecodedLog {
    /// The event name
    pub name: String,
    /// The decoded parameters, paired with their declared names
    pub params: Vec<(String, DynSolValue)>,
}

impl DecodedLog {
    /// The first address parameter matching any of the given names
    pub fn address_param(&self, names: &[&str]) -> Option<Address> {
        self.find_param(names).and_then(DynSolValue::as_address)
    }

    /// The first unsigned integer parameter matching any of the given names
    pub fn uint_param(&self, names: &[&str]) -> Option<U256> {
        self.find_param(names).and_then(|v| v.as_uint().map(|(value, _)| value))
    }

    /// The first string parameter matching any of the given names
    pub fn str_param(&self, names: &[&str]) -> Option<&str> {
        self.find_param(names).and_then(DynSolValue::as_str)
    }

    /// Find the first parameter whose declared name matches any candidate
    fn find_param(&self, names: &[&str]) -> Option<&DynSolValue> {
        names
            .iter()
            .find_map(|name| self.params.iter().find(|(param, _)| param == name))
            .map(|(_, value)| value)
    }

    /// Normalize the decoded log into the shape the event router persists.
    ///
    /// `receiver` is suppressed when it names the emitting contract itself,
    /// matching the counterparty semantics of the derived-activity tables.
    pub fn normalize(
        &self,
        contract: Address,
        block_number: u64,
        transaction_hash: TxHash,
    ) -> NormalizedEvent {
        let sender = self.address_param(&["from", "sender"]).unwrap_or(Address::ZERO);
        let receiver = self
            .address_param(&["to", "receiver", "recipient"])
            .filter(|addr| *addr != contract)
            .unwrap_or(Address::ZERO);
        let value = self.uint_param(&["value", "amount"]).unwrap_or(U256::ZERO);

        NormalizedEvent {
            name: self.name.clone(),
            contract,
            sender,
            receiver,
            value,
            block_number,
            transaction_hash,
        }
    }
}

/// The decoded fields of an escrow creation event
#[derive(Clone, Debug)]
pub struct CreationFields {
    /// The job the creation belongs to
    pub job_id: String,
    /// The escrow-assigned domain ID
    pub domain_id: U256,
    /// The address that funded the escrow
    pub creator: Address,
    /// The funding asset
    pub asset: Address,
    /// The escrowed budget, in raw token units
    pub budget: U256,
    /// The protocol fee, in raw token units
    pub fee: U256,
}

impl TryFrom<&DecodedLog> for CreationFields {
    type Error = AbiError;

    fn try_from(log: &DecodedLog) -> Result<Self, Self::Error> {
        let job_id = log
            .str_param(&["jobId", "job"])
            .ok_or(AbiError::MissingParam("jobId".to_string()))?
            .to_string();
        let domain_id = log
            .uint_param(&["yapId", "domainId", "id"])
            .ok_or(AbiError::MissingParam("yapId".to_string()))?;
        let creator = log
            .address_param(&["creator", "sender", "from"])
            .ok_or(AbiError::MissingParam("creator".to_string()))?;
        let asset = log
            .address_param(&["asset", "token"])
            .ok_or(AbiError::MissingParam("asset".to_string()))?;
        let budget = log
            .uint_param(&["budget", "amount"])
            .ok_or(AbiError::MissingParam("budget".to_string()))?;
        let fee = log.uint_param(&["fee"]).ok_or(AbiError::MissingParam("fee".to_string()))?;

        Ok(Self { job_id, domain_id, creator, asset, budget, fee })
    }
}

// -----------------
// | ABI Describer |
// -----------------

/// A contract ABI wrapper resolving event names to topic selectors and
/// decoding raw logs into named parameters
#[derive(Clone, Debug)]
pub struct AbiDescriber {
    /// The parsed ABI
    abi: JsonAbi,
}

impl AbiDescriber {
    /// Parse a describer from an ABI JSON document
    pub fn from_json(abi: &Value) -> Result<Self, AbiError> {
        let abi: JsonAbi = serde_json::from_value(abi.clone())?;
        Ok(Self { abi })
    }

    /// Validate that every requested event name exists in the ABI.
    ///
    /// All-or-nothing: a single unknown name rejects the whole set.
    pub fn validate_events(&self, names: &[String]) -> Result<(), AbiError> {
        let unknown: Vec<String> = names
            .iter()
            .filter(|name| !self.abi.events.contains_key(name.as_str()))
            .cloned()
            .collect();

        if unknown.is_empty() { Ok(()) } else { Err(AbiError::UnknownEvents(unknown)) }
    }

    /// The topic0 selectors for the given event names, or for every event in
    /// the ABI when `names` is `None` (an all-events subscription)
    pub fn event_selectors(&self, names: Option<&std::collections::BTreeSet<String>>) -> Vec<B256> {
        self.abi
            .events
            .iter()
            .filter(|(name, _)| names.is_none_or(|names| names.contains(name.as_str())))
            .flat_map(|(_, overloads)| overloads.iter().map(Event::selector))
            .unique()
            .collect()
    }

    /// Decode a raw log against the ABI, resolving its event by topic0
    pub fn decode_log(&self, topics: &[B256], data: &[u8]) -> Result<DecodedLog, AbiError> {
        let topic0 = *topics.first().ok_or(AbiError::decode("log has no topics"))?;
        let event = self
            .abi
            .events
            .values()
            .flatten()
            .find(|event| event.selector() == topic0)
            .ok_or(AbiError::UnknownSelector(topic0))?;

        let decoded =
            event.decode_log_parts(topics.iter().copied(), data).map_err(AbiError::decode)?;

        // Pair decoded values with their declared parameter names, indexed
        // parameters first to match the decoder's output ordering
        let mut params = Vec::with_capacity(event.inputs.len());
        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        for input in event.inputs.iter().filter(|i| i.indexed) {
            if let Some(value) = indexed.next() {
                params.push((input.name.clone(), value));
            }
        }
        for input in event.inputs.iter().filter(|i| !i.indexed) {
            if let Some(value) = body.next() {
                params.push((input.name.clone(), value));
            }
        }

        Ok(DecodedLog { name: event.name.clone(), params })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, B256, U256, keccak256};
    use serde_json::json;

    use super::*;

    /// A minimal ERC-20 style ABI with a Transfer event
    fn transfer_abi() -> Value {
        json!([{
            "type": "event",
            "name": "Transfer",
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "value", "type": "uint256", "indexed": false}
            ],
            "anonymous": false
        }])
    }

    /// Left-pad an address into a 32-byte topic
    fn address_topic(addr: Address) -> B256 {
        let mut topic = [0u8; 32];
        topic[12..].copy_from_slice(addr.as_slice());
        B256::from(topic)
    }

    /// Known event names validate; unknown names are rejected all-or-nothing
    #[test]
    fn test_validate_events() {
        let describer = AbiDescriber::from_json(&transfer_abi()).unwrap();

        assert!(describer.validate_events(&["Transfer".to_string()]).is_ok());

        let err = describer
            .validate_events(&["Transfer".to_string(), "Mint".to_string()])
            .unwrap_err();
        assert!(matches!(err, AbiError::UnknownEvents(names) if names == vec!["Mint"]));
    }

    /// The Transfer selector matches the canonical keccak of its signature
    #[test]
    fn test_event_selectors() {
        let describer = AbiDescriber::from_json(&transfer_abi()).unwrap();
        let selectors = describer.event_selectors(None);

        let expected = keccak256("Transfer(address,address,uint256)".as_bytes());
        assert_eq!(selectors, vec![expected]);
    }

    /// A Transfer log decodes and normalizes with sender, receiver, and value
    #[test]
    fn test_decode_and_normalize_transfer() {
        let describer = AbiDescriber::from_json(&transfer_abi()).unwrap();

        let from = Address::with_last_byte(1);
        let to = Address::with_last_byte(2);
        let contract = Address::with_last_byte(3);
        let value = U256::from(1000u64);

        let topics = vec![
            keccak256("Transfer(address,address,uint256)".as_bytes()),
            address_topic(from),
            address_topic(to),
        ];
        let data = value.to_be_bytes::<32>().to_vec();

        let decoded = describer.decode_log(&topics, &data).unwrap();
        assert_eq!(decoded.name, "Transfer");

        let normalized = decoded.normalize(contract, 100, B256::with_last_byte(9));
        assert_eq!(normalized.sender, from);
        assert_eq!(normalized.receiver, to);
        assert_eq!(normalized.value, value);
        assert_eq!(normalized.block_number, 100);
    }

    /// A transfer whose receiver is the contract itself normalizes with a
    /// zero receiver
    #[test]
    fn test_normalize_suppresses_self_receiver() {
        let describer = AbiDescriber::from_json(&transfer_abi()).unwrap();

        let from = Address::with_last_byte(1);
        let contract = Address::with_last_byte(3);

        let topics = vec![
            keccak256("Transfer(address,address,uint256)".as_bytes()),
            address_topic(from),
            address_topic(contract),
        ];
        let data = U256::from(7u64).to_be_bytes::<32>().to_vec();

        let decoded = describer.decode_log(&topics, &data).unwrap();
        let normalized = decoded.normalize(contract, 1, B256::ZERO);
        assert_eq!(normalized.receiver, Address::ZERO);
    }

    /// A log with an unknown selector is rejected
    #[test]
    fn test_unknown_selector() {
        let describer = AbiDescriber::from_json(&transfer_abi()).unwrap();
        let err = describer.decode_log(&[B256::ZERO], &[]).unwrap_err();
        assert!(matches!(err, AbiError::UnknownSelector(_)));
    }
}

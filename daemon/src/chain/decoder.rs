use std::collections::HashMap;

use ethabi::{ParamType, Token};
use primitive_types::U256;
use serde_json::{json, Value};
use thiserror::Error;

use trustflow_common::{
    agreement::ArbitrationPolicy,
    crypto::{EthAddress, Hash},
    event::OnchainEventName,
};

use super::client::{topic_hash_of, RawLog};

/// Canonical signatures of the escrow contract events. The keccak-256 of
/// each string is the first topic of a matching log.
pub const EVENT_SIGNATURES: [(OnchainEventName, &str); 5] = [
    (
        OnchainEventName::AgreementCreated,
        "AgreementCreated(bytes32,address,address,uint256,uint8,address)",
    ),
    (
        OnchainEventName::PaymentFunded,
        "PaymentFunded(bytes32,address,uint256)",
    ),
    (
        OnchainEventName::DisputeOpened,
        "DisputeOpened(bytes32,address)",
    ),
    (
        OnchainEventName::PaymentReleased,
        "PaymentReleased(bytes32,address,uint256)",
    ),
    (
        OnchainEventName::PaymentRefunded,
        "PaymentRefunded(bytes32,address,uint256)",
    ),
];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{event} expects {expected} topics, got {got}")]
    TopicCount {
        event: OnchainEventName,
        expected: usize,
        got: usize,
    },
    #[error("failed to decode {event} data: {source}")]
    Abi {
        event: OnchainEventName,
        source: ethabi::Error,
    },
    #[error("{event} data blob has an unexpected shape")]
    BadData { event: OnchainEventName },
    #[error("unknown arbitration policy value {0}")]
    UnknownPolicy(u64),
}

/// A contract event with typed arguments. Indexed parameters come from the
/// log topics, the rest from the data blob.
#[derive(Clone, Debug, PartialEq)]
pub enum ContractEvent {
    AgreementCreated {
        agreement_id: Hash,
        payer: EthAddress,
        payee: EthAddress,
        amount: U256,
        policy: ArbitrationPolicy,
        arbitrator: Option<EthAddress>,
    },
    PaymentFunded {
        agreement_id: Hash,
        payer: EthAddress,
        amount: U256,
    },
    DisputeOpened {
        agreement_id: Hash,
        opened_by: EthAddress,
    },
    PaymentReleased {
        agreement_id: Hash,
        payee: EthAddress,
        amount: U256,
    },
    PaymentRefunded {
        agreement_id: Hash,
        payer: EthAddress,
        amount: U256,
    },
}

impl ContractEvent {
    pub fn name(&self) -> OnchainEventName {
        match self {
            ContractEvent::AgreementCreated { .. } => OnchainEventName::AgreementCreated,
            ContractEvent::PaymentFunded { .. } => OnchainEventName::PaymentFunded,
            ContractEvent::DisputeOpened { .. } => OnchainEventName::DisputeOpened,
            ContractEvent::PaymentReleased { .. } => OnchainEventName::PaymentReleased,
            ContractEvent::PaymentRefunded { .. } => OnchainEventName::PaymentRefunded,
        }
    }

    pub fn agreement_id(&self) -> Hash {
        match self {
            ContractEvent::AgreementCreated { agreement_id, .. }
            | ContractEvent::PaymentFunded { agreement_id, .. }
            | ContractEvent::DisputeOpened { agreement_id, .. }
            | ContractEvent::PaymentReleased { agreement_id, .. }
            | ContractEvent::PaymentRefunded { agreement_id, .. } => *agreement_id,
        }
    }

    /// Named arguments as stored in the ledger payload. Amounts are decimal
    /// strings so they survive JSON consumers that truncate large numbers.
    pub fn args_json(&self) -> Value {
        match self {
            ContractEvent::AgreementCreated {
                agreement_id,
                payer,
                payee,
                amount,
                policy,
                arbitrator,
            } => json!({
                "agreementId": agreement_id,
                "payer": payer,
                "payee": payee,
                "amount": amount.to_string(),
                "policy": policy,
                "arbitrator": arbitrator,
            }),
            ContractEvent::PaymentFunded {
                agreement_id,
                payer,
                amount,
            } => json!({
                "agreementId": agreement_id,
                "payer": payer,
                "amount": amount.to_string(),
            }),
            ContractEvent::DisputeOpened {
                agreement_id,
                opened_by,
            } => json!({
                "agreementId": agreement_id,
                "openedBy": opened_by,
            }),
            ContractEvent::PaymentReleased {
                agreement_id,
                payee,
                amount,
            } => json!({
                "agreementId": agreement_id,
                "payee": payee,
                "amount": amount.to_string(),
            }),
            ContractEvent::PaymentRefunded {
                agreement_id,
                payer,
                amount,
            } => json!({
                "agreementId": agreement_id,
                "payer": payer,
                "amount": amount.to_string(),
            }),
        }
    }
}

/// A log matched against the contract schema, with its coordinates.
#[derive(Clone, Debug)]
pub struct DecodedLog {
    pub event: ContractEvent,
    pub address: EthAddress,
    pub block_number: u64,
    pub block_hash: Hash,
    pub tx_hash: Hash,
    pub log_index: u32,
}

impl DecodedLog {
    /// Full record stored as the ledger row payload.
    pub fn ledger_payload(&self, chain_id: u64) -> Value {
        json!({
            "chainId": chain_id,
            "address": self.address,
            "transactionHash": self.tx_hash,
            "logIndex": self.log_index,
            "blockNumber": self.block_number,
            "blockHash": self.block_hash,
            "event": self.event.name().as_str(),
            "args": self.event.args_json(),
        })
    }
}

// The address occupies the low 20 bytes of an indexed address topic
fn topic_address(topic: &Hash) -> EthAddress {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&topic.as_bytes()[12..]);
    EthAddress::new(bytes)
}

fn decode_data(
    event: OnchainEventName,
    params: &[ParamType],
    data: &[u8],
) -> Result<Vec<Token>, DecodeError> {
    let tokens =
        ethabi::decode(params, data).map_err(|source| DecodeError::Abi { event, source })?;
    if tokens.len() != params.len() {
        return Err(DecodeError::BadData { event });
    }
    Ok(tokens)
}

fn extract_uint(event: OnchainEventName, token: &Token) -> Result<U256, DecodeError> {
    match token {
        Token::Uint(value) => Ok(*value),
        _ => Err(DecodeError::BadData { event }),
    }
}

fn extract_address(event: OnchainEventName, token: &Token) -> Result<EthAddress, DecodeError> {
    match token {
        Token::Address(address) => Ok(EthAddress::new(address.to_fixed_bytes())),
        _ => Err(DecodeError::BadData { event }),
    }
}

fn extract_policy(value: U256) -> Result<ArbitrationPolicy, DecodeError> {
    if value.is_zero() {
        Ok(ArbitrationPolicy::None)
    } else if value == U256::one() {
        Ok(ArbitrationPolicy::WithArbitrator)
    } else {
        Err(DecodeError::UnknownPolicy(value.low_u64()))
    }
}

/// Maps raw logs to typed contract events by their first topic.
pub struct EventDecoder {
    topics: HashMap<Hash, OnchainEventName>,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder {
    /// Precompute the topic0 table from the contract schema.
    pub fn new() -> Self {
        let mut topics = HashMap::new();
        for (name, signature) in EVENT_SIGNATURES {
            topics.insert(topic_hash_of(signature), name);
        }
        Self { topics }
    }

    pub fn event_for_topic(&self, topic: &Hash) -> Option<OnchainEventName> {
        self.topics.get(topic).copied()
    }

    /// Decode a raw log. `Ok(None)` means the log is not one of ours
    /// (no topics, or an unknown first topic) and should be skipped.
    pub fn decode(&self, log: &RawLog) -> Result<Option<DecodedLog>, DecodeError> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let Some(name) = self.event_for_topic(topic0) else {
            return Ok(None);
        };

        let expected_topics = match name {
            OnchainEventName::AgreementCreated => 4,
            _ => 3,
        };
        if log.topics.len() != expected_topics {
            return Err(DecodeError::TopicCount {
                event: name,
                expected: expected_topics,
                got: log.topics.len(),
            });
        }

        let agreement_id = log.topics[1];
        let event = match name {
            OnchainEventName::AgreementCreated => {
                let tokens = decode_data(
                    name,
                    &[
                        ParamType::Uint(256),
                        ParamType::Uint(8),
                        ParamType::Address,
                    ],
                    &log.data,
                )?;
                let arbitrator = extract_address(name, &tokens[2])?;
                ContractEvent::AgreementCreated {
                    agreement_id,
                    payer: topic_address(&log.topics[2]),
                    payee: topic_address(&log.topics[3]),
                    amount: extract_uint(name, &tokens[0])?,
                    policy: extract_policy(extract_uint(name, &tokens[1])?)?,
                    arbitrator: (!arbitrator.is_zero()).then_some(arbitrator),
                }
            }
            OnchainEventName::PaymentFunded => {
                let tokens = decode_data(name, &[ParamType::Uint(256)], &log.data)?;
                ContractEvent::PaymentFunded {
                    agreement_id,
                    payer: topic_address(&log.topics[2]),
                    amount: extract_uint(name, &tokens[0])?,
                }
            }
            OnchainEventName::DisputeOpened => ContractEvent::DisputeOpened {
                agreement_id,
                opened_by: topic_address(&log.topics[2]),
            },
            OnchainEventName::PaymentReleased => {
                let tokens = decode_data(name, &[ParamType::Uint(256)], &log.data)?;
                ContractEvent::PaymentReleased {
                    agreement_id,
                    payee: topic_address(&log.topics[2]),
                    amount: extract_uint(name, &tokens[0])?,
                }
            }
            OnchainEventName::PaymentRefunded => {
                let tokens = decode_data(name, &[ParamType::Uint(256)], &log.data)?;
                ContractEvent::PaymentRefunded {
                    agreement_id,
                    payer: topic_address(&log.topics[2]),
                    amount: extract_uint(name, &tokens[0])?,
                }
            }
        };

        Ok(Some(DecodedLog {
            event,
            address: log.address,
            block_number: log.block_number,
            block_hash: log.block_hash,
            tx_hash: log.tx_hash,
            log_index: log.log_index,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_topic(address: &EthAddress) -> Hash {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(address.as_bytes());
        Hash::new(bytes)
    }

    fn abi_address(address: &EthAddress) -> Token {
        Token::Address(ethabi::Address::from_slice(address.as_bytes()))
    }

    fn raw_log(topics: Vec<Hash>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: EthAddress::new([0xcc; 20]),
            topics,
            data,
            block_number: 100,
            block_hash: Hash::new([0x22; 32]),
            tx_hash: Hash::new([0x33; 32]),
            log_index: 0,
        }
    }

    fn signature_of(name: OnchainEventName) -> &'static str {
        EVENT_SIGNATURES
            .iter()
            .find(|(event, _)| *event == name)
            .map(|(_, signature)| *signature)
            .expect("known event")
    }

    #[test]
    fn decodes_agreement_created_with_arbitrator() {
        let decoder = EventDecoder::new();
        let agreement_id = Hash::new([0xaa; 32]);
        let payer = EthAddress::new([0x01; 20]);
        let payee = EthAddress::new([0x02; 20]);
        let arbitrator = EthAddress::new([0x03; 20]);

        let data = ethabi::encode(&[
            Token::Uint(U256::from(1_000_000u64)),
            Token::Uint(U256::one()),
            abi_address(&arbitrator),
        ]);
        let log = raw_log(
            vec![
                topic_hash_of(signature_of(OnchainEventName::AgreementCreated)),
                agreement_id,
                address_topic(&payer),
                address_topic(&payee),
            ],
            data,
        );

        let decoded = decoder.decode(&log).unwrap().expect("known event");
        assert_eq!(decoded.block_number, 100);
        assert_eq!(
            decoded.event,
            ContractEvent::AgreementCreated {
                agreement_id,
                payer,
                payee,
                amount: U256::from(1_000_000u64),
                policy: ArbitrationPolicy::WithArbitrator,
                arbitrator: Some(arbitrator),
            }
        );
    }

    #[test]
    fn zero_arbitrator_decodes_to_none() {
        let decoder = EventDecoder::new();
        let data = ethabi::encode(&[
            Token::Uint(U256::from(5u64)),
            Token::Uint(U256::zero()),
            abi_address(&EthAddress::zero()),
        ]);
        let log = raw_log(
            vec![
                topic_hash_of(signature_of(OnchainEventName::AgreementCreated)),
                Hash::new([0xaa; 32]),
                address_topic(&EthAddress::new([0x01; 20])),
                address_topic(&EthAddress::new([0x02; 20])),
            ],
            data,
        );

        let decoded = decoder.decode(&log).unwrap().expect("known event");
        match decoded.event {
            ContractEvent::AgreementCreated {
                policy, arbitrator, ..
            } => {
                assert_eq!(policy, ArbitrationPolicy::None);
                assert!(arbitrator.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decodes_dispute_opened() {
        let decoder = EventDecoder::new();
        let opened_by = EthAddress::new([0x07; 20]);
        let log = raw_log(
            vec![
                topic_hash_of(signature_of(OnchainEventName::DisputeOpened)),
                Hash::new([0xbb; 32]),
                address_topic(&opened_by),
            ],
            Vec::new(),
        );

        let decoded = decoder.decode(&log).unwrap().expect("known event");
        assert_eq!(
            decoded.event,
            ContractEvent::DisputeOpened {
                agreement_id: Hash::new([0xbb; 32]),
                opened_by,
            }
        );
    }

    #[test]
    fn unknown_topic_is_skipped() {
        let decoder = EventDecoder::new();
        let log = raw_log(vec![Hash::new([0x99; 32])], Vec::new());
        assert!(decoder.decode(&log).unwrap().is_none());
    }

    #[test]
    fn log_without_topics_is_skipped() {
        let decoder = EventDecoder::new();
        let log = raw_log(Vec::new(), Vec::new());
        assert!(decoder.decode(&log).unwrap().is_none());
    }

    #[test]
    fn wrong_topic_count_is_an_error() {
        let decoder = EventDecoder::new();
        let log = raw_log(
            vec![
                topic_hash_of(signature_of(OnchainEventName::PaymentFunded)),
                Hash::new([0xaa; 32]),
            ],
            Vec::new(),
        );
        assert!(matches!(
            decoder.decode(&log),
            Err(DecodeError::TopicCount { .. })
        ));
    }

    #[test]
    fn truncated_data_is_an_error() {
        let decoder = EventDecoder::new();
        let log = raw_log(
            vec![
                topic_hash_of(signature_of(OnchainEventName::PaymentFunded)),
                Hash::new([0xaa; 32]),
                address_topic(&EthAddress::new([0x01; 20])),
            ],
            vec![0x01, 0x02],
        );
        assert!(matches!(decoder.decode(&log), Err(DecodeError::Abi { .. })));
    }

    #[test]
    fn unknown_policy_value_is_an_error() {
        let decoder = EventDecoder::new();
        let data = ethabi::encode(&[
            Token::Uint(U256::from(5u64)),
            Token::Uint(U256::from(7u64)),
            abi_address(&EthAddress::zero()),
        ]);
        let log = raw_log(
            vec![
                topic_hash_of(signature_of(OnchainEventName::AgreementCreated)),
                Hash::new([0xaa; 32]),
                address_topic(&EthAddress::new([0x01; 20])),
                address_topic(&EthAddress::new([0x02; 20])),
            ],
            data,
        );
        assert!(matches!(
            decoder.decode(&log),
            Err(DecodeError::UnknownPolicy(7))
        ));
    }

    #[test]
    fn ledger_payload_mirrors_log_coordinates() {
        let decoder = EventDecoder::new();
        let payer = EthAddress::new([0x01; 20]);
        let data = ethabi::encode(&[Token::Uint(U256::from(42u64))]);
        let log = raw_log(
            vec![
                topic_hash_of(signature_of(OnchainEventName::PaymentFunded)),
                Hash::new([0xaa; 32]),
                address_topic(&payer),
            ],
            data,
        );

        let decoded = decoder.decode(&log).unwrap().expect("known event");
        let payload = decoded.ledger_payload(31337);
        assert_eq!(payload["chainId"], 31337);
        assert_eq!(payload["event"], "PaymentFunded");
        assert_eq!(payload["blockNumber"], 100);
        assert_eq!(payload["args"]["amount"], "42");
        assert_eq!(payload["args"]["payer"], payer.to_hex());
    }
}

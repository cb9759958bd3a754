pub mod client;
pub mod decoder;

pub use client::{topic_hash_of, ChainClient, ChainError, RawLog, RpcChainClient};
pub use decoder::{ContractEvent, DecodeError, DecodedLog, EventDecoder};

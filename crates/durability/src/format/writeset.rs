//! Writeset encoding
//!
//! The writeset is the ordered mutation list of one commit, MessagePack
//! encoded inside the WAL record payload.

use tessera_core::{Mutation, Result};

/// Encode mutations for a WAL record.
pub fn encode(mutations: &[Mutation]) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(mutations)?)
}

/// Decode the mutations of a WAL record.
pub fn decode(bytes: &[u8]) -> Result<Vec<Mutation>> {
    Ok(rmp_serde::from_slice(bytes)?)
}

//! Representative votes over contested blocks.

use serde_json::{json, Value};

use weave_primitives::account::encode_account;
use weave_primitives::crypto::{sign_message, validate_message, RawKey};
use weave_primitives::hash::hash256;
use weave_primitives::{Account, Buf32, Signature};

use crate::block::{Block, BlockType};
use crate::codec::{CodecError, Reader, Writer};

/// Outcome of ingesting a vote.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VoteCode {
    /// Vote is not signed correctly.
    Invalid,
    /// Vote does not have the highest sequence number, it's a replay.
    Replay,
    /// Vote has the highest sequence number.
    Vote,
}

/// A signed statement by `account` that `block` should win its root at
/// voting round `sequence`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub account: Account,
    pub sequence: u64,
    pub block: Block,
    pub signature: Signature,
}

impl Vote {
    pub fn new(account: Account, prv: &RawKey, sequence: u64, block: Block) -> Self {
        let mut vote = Self {
            account,
            sequence,
            block,
            signature: Signature::zero(),
        };
        vote.signature = sign_message(prv, &account, &vote.hash());
        vote
    }

    /// Digest the signature covers: block hash then the round number
    /// little-endian, so bumping the round always moves the digest.
    pub fn hash(&self) -> Buf32 {
        hash256(&[
            self.block.hash().as_bytes(),
            &self.sequence.to_le_bytes(),
        ])
    }

    pub fn validate(&self) -> bool {
        validate_message(&self.account, &self.hash(), &self.signature)
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_buf32(&self.account)
            .write_buf64(&self.signature)
            .write_u64_be(self.sequence);
        self.block.serialize(w);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.serialize(&mut w);
        w.into_bytes()
    }

    /// Decodes a vote whose block type tag arrived out of band (message
    /// header bits, or the store's record framing).
    pub fn deserialize(block_type: BlockType, r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let account = r.read_buf32()?;
        let signature = r.read_buf64()?;
        let sequence = r.read_u64_be()?;
        let block = Block::deserialize(block_type, r)?;
        Ok(Self {
            account,
            sequence,
            block,
            signature,
        })
    }

    pub fn from_bytes(block_type: BlockType, bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let vote = Self::deserialize(block_type, &mut r)?;
        r.finish()?;
        Ok(vote)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "account": encode_account(&self.account),
            "sequence": self.sequence.to_string(),
            "block": self.block.to_json(),
            "signature": self.signature.to_hex(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ChangeBlock;
    use weave_primitives::crypto::Keypair;

    fn sample_vote(sequence: u64) -> (Keypair, Vote) {
        let key = Keypair::generate();
        let block = Block::Change(ChangeBlock::new(
            Buf32::from(3u64),
            &key.raw,
            &key.public,
            0,
        ));
        let vote = Vote::new(key.public, &key.raw, sequence, block);
        (key, vote)
    }

    #[test]
    fn test_validate() {
        let (_, vote) = sample_vote(1);
        assert!(vote.validate());
        let mut forged = vote.clone();
        forged.sequence = 2;
        assert!(!forged.validate());
    }

    #[test]
    fn test_roundtrip() {
        let (_, vote) = sample_vote(9);
        let bytes = vote.to_bytes();
        let decoded = Vote::from_bytes(vote.block.block_type(), &bytes).unwrap();
        assert_eq!(decoded, vote);
        assert!(decoded.validate());
    }

    #[test]
    fn test_sequence_moves_hash() {
        let (key, vote) = sample_vote(1);
        let rebound = Vote::new(key.public, &key.raw, 2, vote.block.clone());
        assert_ne!(vote.hash(), rebound.hash());
    }
}

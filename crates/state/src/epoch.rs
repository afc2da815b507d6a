//! Epoch headers: periodic batch commitments signed by the witness
//! committee.

use serde_json::{json, Value};

use weave_primitives::hash::Hasher256;
use weave_primitives::{BlockHash, EpochHash, Signature};

use crate::codec::{json as cj, CodecError, Reader, Writer};

/// Largest committee either vote set can carry.
pub const MAX_COMMITTEE_SIGNATURES: usize = 22;
/// Smallest committee a committed epoch may have been voted by.
pub const MIN_COMMITTEE_SIGNATURES: usize = 15;
/// Sanity cap on batched tx references per header.
pub const MAX_EPOCH_TXS: usize = 1 << 16;

/// A committed epoch header.  The chain of headers is strictly linear:
/// `previous` is zero only for the genesis epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpochBlock {
    /// Seconds since the unix epoch at assembly time.
    pub timestamp: u64,
    pub previous: EpochHash,
    /// Hashes of the txs this epoch batches.
    pub txs: Vec<BlockHash>,
    /// Committee pre-round signatures over the candidate digest.
    pub pre_votes: Vec<Signature>,
    /// Committee commit-round signatures.
    pub votes: Vec<Signature>,
    /// Proposer signature over the full header digest.
    pub signature: Signature,
}

impl EpochBlock {
    pub fn new(timestamp: u64, previous: EpochHash, txs: Vec<BlockHash>) -> Self {
        Self {
            timestamp,
            previous,
            txs,
            ..Default::default()
        }
    }

    /// Digest the committee votes over, covering only the assembled content
    /// so the two vote rounds aren't self-referential.
    pub fn candidate_hash(&self) -> EpochHash {
        let mut h = Hasher256::new();
        h.update(&self.timestamp.to_be_bytes());
        h.update(self.previous.as_bytes());
        for tx in &self.txs {
            h.update(tx.as_bytes());
        }
        h.finalize()
    }

    /// Full identity of the committed header, vote sets included.
    pub fn hash(&self) -> EpochHash {
        let mut h = Hasher256::new();
        h.update(&self.timestamp.to_be_bytes());
        h.update(self.previous.as_bytes());
        for tx in &self.txs {
            h.update(tx.as_bytes());
        }
        for sig in &self.pre_votes {
            h.update(sig.as_bytes());
        }
        for sig in &self.votes {
            h.update(sig.as_bytes());
        }
        h.finalize()
    }

    pub fn valid_predecessor(&self, predecessor: &EpochBlock) -> bool {
        self.previous == predecessor.hash()
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_u64_be(self.timestamp).write_buf32(&self.previous);
        w.write_u32_be(self.txs.len() as u32);
        for tx in &self.txs {
            w.write_buf32(tx);
        }
        w.write_u32_be(self.pre_votes.len() as u32);
        for sig in &self.pre_votes {
            w.write_buf64(sig);
        }
        w.write_u32_be(self.votes.len() as u32);
        for sig in &self.votes {
            w.write_buf64(sig);
        }
        w.write_buf64(&self.signature);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.serialize(&mut w);
        w.into_bytes()
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let timestamp = r.read_u64_be()?;
        let previous = r.read_buf32()?;

        let txs_len = r.read_u32_be()? as usize;
        if txs_len > MAX_EPOCH_TXS {
            return Err(CodecError::BadLength);
        }
        let mut txs = Vec::with_capacity(txs_len.min(1024));
        for _ in 0..txs_len {
            txs.push(r.read_buf32()?);
        }

        let pre_votes_len = r.read_u32_be()? as usize;
        if pre_votes_len > MAX_COMMITTEE_SIGNATURES {
            return Err(CodecError::BadLength);
        }
        let mut pre_votes = Vec::with_capacity(pre_votes_len);
        for _ in 0..pre_votes_len {
            pre_votes.push(r.read_buf64()?);
        }

        let votes_len = r.read_u32_be()? as usize;
        if votes_len > MAX_COMMITTEE_SIGNATURES {
            return Err(CodecError::BadLength);
        }
        let mut votes = Vec::with_capacity(votes_len);
        for _ in 0..votes_len {
            votes.push(r.read_buf64()?);
        }

        let signature = r.read_buf64()?;
        Ok(Self {
            timestamp,
            previous,
            txs,
            pre_votes,
            votes,
            signature,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let epoch = Self::deserialize(&mut r)?;
        r.finish()?;
        Ok(epoch)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": "epoch",
            "timestamp": self.timestamp.to_string(),
            "previous": self.previous.to_hex(),
            "txs": self.txs.iter().map(|t| t.to_hex()).collect::<Vec<_>>(),
            "pre_votes": self.pre_votes.iter().map(|s| s.to_hex()).collect::<Vec<_>>(),
            "votes": self.votes.iter().map(|s| s.to_hex()).collect::<Vec<_>>(),
            "signature": self.signature.to_hex(),
        })
    }

    pub fn from_json(v: &Value) -> Result<Self, CodecError> {
        let txs = v
            .get("txs")
            .and_then(Value::as_array)
            .ok_or(CodecError::BadJson("txs"))?
            .iter()
            .map(|t| {
                t.as_str()
                    .and_then(|s| weave_primitives::Buf32::from_hex(s).ok())
                    .ok_or(CodecError::BadJson("txs"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let read_sigs = |key: &'static str| -> Result<Vec<Signature>, CodecError> {
            let arr = v
                .get(key)
                .and_then(Value::as_array)
                .ok_or(CodecError::BadJson(key))?;
            if arr.len() > MAX_COMMITTEE_SIGNATURES {
                return Err(CodecError::BadJson(key));
            }
            arr.iter()
                .map(|s| {
                    s.as_str()
                        .and_then(|s| Signature::from_hex(s).ok())
                        .ok_or(CodecError::BadJson(key))
                })
                .collect()
        };
        Ok(Self {
            timestamp: cj::get_u64_dec(v, "timestamp")?,
            previous: cj::get_buf32(v, "previous")?,
            txs,
            pre_votes: read_sigs("pre_votes")?,
            votes: read_sigs("votes")?,
            signature: cj::get_buf64(v, "signature")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_primitives::Buf32;

    fn sample() -> EpochBlock {
        let mut e = EpochBlock::new(
            1_700_000_000,
            Buf32::from(5u64),
            vec![Buf32::from(1u64), Buf32::from(2u64)],
        );
        e.pre_votes = vec![Signature::zero(); 15];
        e.votes = vec![Signature::zero(); 15];
        e.signature = Signature::zero();
        e
    }

    #[test]
    fn test_binary_roundtrip() {
        let e = sample();
        assert_eq!(EpochBlock::from_bytes(&e.to_bytes()).unwrap(), e);
    }

    #[test]
    fn test_json_roundtrip() {
        let e = sample();
        assert_eq!(EpochBlock::from_json(&e.to_json()).unwrap(), e);
    }

    #[test]
    fn test_vote_bound_enforced() {
        let mut e = sample();
        e.votes = vec![Signature::zero(); MAX_COMMITTEE_SIGNATURES + 1];
        assert!(EpochBlock::from_bytes(&e.to_bytes()).is_err());
    }

    #[test]
    fn test_candidate_hash_excludes_votes() {
        let mut e = sample();
        let ch = e.candidate_hash();
        let full = e.hash();
        e.votes.push(Signature::zero());
        assert_eq!(e.candidate_hash(), ch);
        assert_ne!(e.hash(), full);
    }

    #[test]
    fn test_chain_linkage() {
        let parent = sample();
        let mut child = EpochBlock::new(parent.timestamp + 30, parent.hash(), vec![]);
        assert!(child.valid_predecessor(&parent));
        child.previous = Buf32::zero();
        assert!(!child.valid_predecessor(&parent));
    }
}

//! Account-chain block variants and their binary/textual codecs.
//!
//! The legacy variants (`send`, `receive`, `open`, `change`) each express one
//! chain operation; the `state` variant expresses any of them with an
//! explicit post-state balance.  The generalized transaction envelope lives
//! in [`crate::tx`] and joins the same [`Block`] union so the ledger can
//! process either generation through one dispatch.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde_json::{json, Value};

use weave_primitives::hash::{hash256, Hasher256};
use weave_primitives::account::encode_account;
use weave_primitives::crypto::{sign_message, RawKey};
use weave_primitives::{Account, Amount, BlockHash, Buf32, PublicKey, Signature};

use crate::codec::{json as cj, CodecError, Reader, Writer};
use crate::tx::Tx;

/// On-wire type tags.  The epoch/vote tags never appear in account chains
/// but share the numbering space with blocks in message headers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BlockType {
    Invalid = 0,
    NotABlock = 1,
    Send = 2,
    Receive = 3,
    Open = 4,
    Change = 5,
    State = 6,
    Epoch = 7,
    NotAnEpoch = 8,
    Vote = 9,
}

/// Hashing preamble tag for state blocks: 32 bytes whose low 8 encode 6.
fn state_preamble() -> Buf32 {
    Buf32::from(BlockType::State as u64)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendBlock {
    pub previous: BlockHash,
    pub destination: Account,
    pub balance: Amount,
    pub signature: Signature,
    pub work: u64,
}

impl SendBlock {
    pub const SIZE: usize = 32 + 32 + 16 + 64 + 8;

    pub fn new(
        previous: BlockHash,
        destination: Account,
        balance: Amount,
        prv: &RawKey,
        public: &PublicKey,
        work: u64,
    ) -> Self {
        let mut block = Self {
            previous,
            destination,
            balance,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(prv, public, &block.hash());
        block
    }

    pub fn hash(&self) -> BlockHash {
        hash256(&[
            self.previous.as_bytes(),
            self.destination.as_bytes(),
            &self.balance.to_be_bytes(),
        ])
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_buf32(&self.previous)
            .write_buf32(&self.destination)
            .write_amount(self.balance)
            .write_buf64(&self.signature)
            .write_u64_le(self.work);
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            previous: r.read_buf32()?,
            destination: r.read_buf32()?,
            balance: r.read_amount()?,
            signature: r.read_buf64()?,
            work: r.read_u64_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveBlock {
    pub previous: BlockHash,
    pub source: BlockHash,
    pub signature: Signature,
    pub work: u64,
}

impl ReceiveBlock {
    pub const SIZE: usize = 32 + 32 + 64 + 8;

    pub fn new(
        previous: BlockHash,
        source: BlockHash,
        prv: &RawKey,
        public: &PublicKey,
        work: u64,
    ) -> Self {
        let mut block = Self {
            previous,
            source,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(prv, public, &block.hash());
        block
    }

    pub fn hash(&self) -> BlockHash {
        hash256(&[self.previous.as_bytes(), self.source.as_bytes()])
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_buf32(&self.previous)
            .write_buf32(&self.source)
            .write_buf64(&self.signature)
            .write_u64_le(self.work);
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            previous: r.read_buf32()?,
            source: r.read_buf32()?,
            signature: r.read_buf64()?,
            work: r.read_u64_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenBlock {
    pub source: BlockHash,
    pub account: Account,
    pub signature: Signature,
    pub work: u64,
}

impl OpenBlock {
    pub const SIZE: usize = 32 + 32 + 64 + 8;

    pub fn new(
        source: BlockHash,
        account: Account,
        prv: &RawKey,
        public: &PublicKey,
        work: u64,
    ) -> Self {
        let mut block = Self {
            source,
            account,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(prv, public, &block.hash());
        block
    }

    pub fn hash(&self) -> BlockHash {
        hash256(&[self.source.as_bytes(), self.account.as_bytes()])
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_buf32(&self.source)
            .write_buf32(&self.account)
            .write_buf64(&self.signature)
            .write_u64_le(self.work);
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            source: r.read_buf32()?,
            account: r.read_buf32()?,
            signature: r.read_buf64()?,
            work: r.read_u64_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeBlock {
    pub previous: BlockHash,
    pub signature: Signature,
    pub work: u64,
}

impl ChangeBlock {
    pub const SIZE: usize = 32 + 64 + 8;

    pub fn new(previous: BlockHash, prv: &RawKey, public: &PublicKey, work: u64) -> Self {
        let mut block = Self {
            previous,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(prv, public, &block.hash());
        block
    }

    pub fn hash(&self) -> BlockHash {
        hash256(&[self.previous.as_bytes()])
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_buf32(&self.previous)
            .write_buf64(&self.signature)
            .write_u64_le(self.work);
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            previous: r.read_buf32()?,
            signature: r.read_buf64()?,
            work: r.read_u64_le()?,
        })
    }
}

/// Modern block carrying the absolute post-state balance.  `link` holds the
/// destination account when sending, the source hash when receiving, and
/// zero for a no-op balance change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateBlock {
    pub account: Account,
    pub previous: BlockHash,
    pub balance: Amount,
    pub link: Buf32,
    pub signature: Signature,
    pub work: u64,
}

impl StateBlock {
    pub const SIZE: usize = 32 + 32 + 16 + 32 + 64 + 8;

    pub fn new(
        account: Account,
        previous: BlockHash,
        balance: Amount,
        link: Buf32,
        prv: &RawKey,
        public: &PublicKey,
        work: u64,
    ) -> Self {
        let mut block = Self {
            account,
            previous,
            balance,
            link,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(prv, public, &block.hash());
        block
    }

    pub fn hash(&self) -> BlockHash {
        let mut h = Hasher256::new();
        h.update(state_preamble().as_bytes());
        h.update(self.account.as_bytes());
        h.update(self.previous.as_bytes());
        h.update(&self.balance.to_be_bytes());
        h.update(self.link.as_bytes());
        h.finalize()
    }

    /// State block work rides big-endian on the wire, unlike the legacy
    /// variants.
    pub fn serialize(&self, w: &mut Writer) {
        w.write_buf32(&self.account)
            .write_buf32(&self.previous)
            .write_amount(self.balance)
            .write_buf32(&self.link)
            .write_buf64(&self.signature)
            .write_u64_be(self.work);
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            account: r.read_buf32()?,
            previous: r.read_buf32()?,
            balance: r.read_amount()?,
            link: r.read_buf32()?,
            signature: r.read_buf64()?,
            work: r.read_u64_be()?,
        })
    }
}

/// Union over everything the ledger can apply to an account chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
    Tx(Tx),
}

impl Block {
    /// Wire tag for this block.  The tx envelope is tagged by its derived
    /// kind; decoders tell the two apart by body size.
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Send(_) => BlockType::Send,
            Block::Receive(_) => BlockType::Receive,
            Block::Open(_) => BlockType::Open,
            Block::Change(_) => BlockType::Change,
            Block::State(_) => BlockType::State,
            Block::Tx(tx) => tx.table_type(),
        }
    }

    pub fn hash(&self) -> BlockHash {
        match self {
            Block::Send(b) => b.hash(),
            Block::Receive(b) => b.hash(),
            Block::Open(b) => b.hash(),
            Block::Change(b) => b.hash(),
            Block::State(b) => b.hash(),
            Block::Tx(tx) => tx.hash(),
        }
    }

    /// Previous block in the owning account's chain; zero for opens.
    pub fn previous(&self) -> BlockHash {
        match self {
            Block::Send(b) => b.previous,
            Block::Receive(b) => b.previous,
            Block::Open(_) => BlockHash::zero(),
            Block::Change(b) => b.previous,
            Block::State(b) => b.previous,
            Block::Tx(tx) => tx.previous,
        }
    }

    /// Source block for receive-like blocks, zero otherwise.
    pub fn source(&self) -> BlockHash {
        match self {
            Block::Send(_) | Block::Change(_) => BlockHash::zero(),
            Block::Receive(b) => b.source,
            Block::Open(b) => b.source,
            Block::State(b) => {
                if b.previous.is_zero() || !b.link.is_zero() {
                    // Receiving iff the link names a block we consume; the
                    // ledger distinguishes send links by balance direction.
                    b.link
                } else {
                    BlockHash::zero()
                }
            }
            Block::Tx(tx) => tx.source,
        }
    }

    /// Contested root: the previous block, or the account for first blocks.
    pub fn root(&self) -> Buf32 {
        match self {
            Block::Open(b) => b.account,
            Block::State(b) if b.previous.is_zero() => b.account,
            Block::Tx(tx) => tx.root(),
            other => other.previous(),
        }
    }

    pub fn work(&self) -> u64 {
        match self {
            Block::Send(b) => b.work,
            Block::Receive(b) => b.work,
            Block::Open(b) => b.work,
            Block::Change(b) => b.work,
            Block::State(b) => b.work,
            Block::Tx(_) => 0,
        }
    }

    pub fn signature(&self) -> Signature {
        match self {
            Block::Send(b) => b.signature,
            Block::Receive(b) => b.signature,
            Block::Open(b) => b.signature,
            Block::Change(b) => b.signature,
            Block::State(b) => b.signature,
            Block::Tx(tx) => tx.signature,
        }
    }

    pub fn set_signature(&mut self, signature: Signature) {
        match self {
            Block::Send(b) => b.signature = signature,
            Block::Receive(b) => b.signature = signature,
            Block::Open(b) => b.signature = signature,
            Block::Change(b) => b.signature = signature,
            Block::State(b) => b.signature = signature,
            Block::Tx(tx) => tx.signature = signature,
        }
    }

    /// Whether this block is allowed to directly follow `predecessor` in a
    /// chain.  Once a chain upgrades to state blocks the legacy variants
    /// may not extend it.
    pub fn valid_predecessor(&self, predecessor: &Block) -> bool {
        match self {
            Block::Send(_) | Block::Receive(_) | Block::Change(_) => {
                !matches!(predecessor, Block::State(_))
            }
            // Opens and first state/tx blocks have no predecessor at all.
            Block::Open(_) => false,
            Block::State(_) | Block::Tx(_) => true,
        }
    }

    pub fn serialize(&self, w: &mut Writer) {
        match self {
            Block::Send(b) => b.serialize(w),
            Block::Receive(b) => b.serialize(w),
            Block::Open(b) => b.serialize(w),
            Block::Change(b) => b.serialize(w),
            Block::State(b) => b.serialize(w),
            Block::Tx(tx) => tx.serialize(w),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.serialize(&mut w);
        w.into_bytes()
    }

    /// Decodes a block body whose type tag arrived out of band.  For the
    /// send/receive/open tags the remaining length decides between the
    /// fixed-size legacy layout and the variable-size tx envelope.
    pub fn deserialize(block_type: BlockType, r: &mut Reader<'_>) -> Result<Self, CodecError> {
        match block_type {
            BlockType::Send => {
                if r.remaining() == SendBlock::SIZE {
                    Ok(Block::Send(SendBlock::deserialize(r)?))
                } else {
                    Ok(Block::Tx(Tx::deserialize(r)?))
                }
            }
            BlockType::Receive => {
                if r.remaining() == ReceiveBlock::SIZE {
                    Ok(Block::Receive(ReceiveBlock::deserialize(r)?))
                } else {
                    Ok(Block::Tx(Tx::deserialize(r)?))
                }
            }
            BlockType::Open => {
                if r.remaining() == OpenBlock::SIZE {
                    Ok(Block::Open(OpenBlock::deserialize(r)?))
                } else {
                    Ok(Block::Tx(Tx::deserialize(r)?))
                }
            }
            BlockType::Change => Ok(Block::Change(ChangeBlock::deserialize(r)?)),
            BlockType::State => Ok(Block::State(StateBlock::deserialize(r)?)),
            other => Err(CodecError::BadTypeTag(other.into())),
        }
    }

    pub fn from_bytes(block_type: BlockType, bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let block = Self::deserialize(block_type, &mut r)?;
        r.finish()?;
        Ok(block)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Block::Send(_) => "send",
            Block::Receive(_) => "receive",
            Block::Open(_) => "open",
            Block::Change(_) => "change",
            Block::State(_) => "state",
            Block::Tx(_) => "transaction",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Block::Send(b) => json!({
                "type": "send",
                "previous": b.previous.to_hex(),
                "destination": encode_account(&b.destination),
                "balance": b.balance.to_string(),
                "signature": b.signature.to_hex(),
                "work": format!("{:016X}", b.work),
            }),
            Block::Receive(b) => json!({
                "type": "receive",
                "previous": b.previous.to_hex(),
                "source": b.source.to_hex(),
                "signature": b.signature.to_hex(),
                "work": format!("{:016X}", b.work),
            }),
            Block::Open(b) => json!({
                "type": "open",
                "source": b.source.to_hex(),
                "account": encode_account(&b.account),
                "signature": b.signature.to_hex(),
                "work": format!("{:016X}", b.work),
            }),
            Block::Change(b) => json!({
                "type": "change",
                "previous": b.previous.to_hex(),
                "signature": b.signature.to_hex(),
                "work": format!("{:016X}", b.work),
            }),
            Block::State(b) => json!({
                "type": "state",
                "account": encode_account(&b.account),
                "previous": b.previous.to_hex(),
                "balance": b.balance.to_string(),
                "link": b.link.to_hex(),
                "signature": b.signature.to_hex(),
                "work": format!("{:016X}", b.work),
            }),
            Block::Tx(tx) => tx.to_json(),
        }
    }

    pub fn from_json(v: &Value) -> Result<Self, CodecError> {
        match cj::get_str(v, "type")? {
            "send" => Ok(Block::Send(SendBlock {
                previous: cj::get_buf32(v, "previous")?,
                destination: cj::get_account(v, "destination")?,
                balance: cj::get_amount(v, "balance")?,
                signature: cj::get_buf64(v, "signature")?,
                work: cj::get_u64_hex(v, "work")?,
            })),
            "receive" => Ok(Block::Receive(ReceiveBlock {
                previous: cj::get_buf32(v, "previous")?,
                source: cj::get_buf32(v, "source")?,
                signature: cj::get_buf64(v, "signature")?,
                work: cj::get_u64_hex(v, "work")?,
            })),
            "open" => Ok(Block::Open(OpenBlock {
                source: cj::get_buf32(v, "source")?,
                account: cj::get_account(v, "account")?,
                signature: cj::get_buf64(v, "signature")?,
                work: cj::get_u64_hex(v, "work")?,
            })),
            "change" => Ok(Block::Change(ChangeBlock {
                previous: cj::get_buf32(v, "previous")?,
                signature: cj::get_buf64(v, "signature")?,
                work: cj::get_u64_hex(v, "work")?,
            })),
            "state" => Ok(Block::State(StateBlock {
                account: cj::get_account(v, "account")?,
                previous: cj::get_buf32(v, "previous")?,
                balance: cj::get_amount(v, "balance")?,
                link: cj::get_buf32(v, "link")?,
                signature: cj::get_buf64(v, "signature")?,
                work: cj::get_u64_hex(v, "work")?,
            })),
            "transaction" => Ok(Block::Tx(Tx::from_json(v)?)),
            _ => Err(CodecError::BadJson("type")),
        }
    }
}

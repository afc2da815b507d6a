//! The generalized transaction envelope.
//!
//! A tx expresses a send or a receive depending on which of its pointer
//! fields are set; the payload rides along opaquely and takes no part in
//! ledger validation.

use serde_json::{json, Value};

use weave_primitives::account::encode_account;
use weave_primitives::crypto::{sign_message, RawKey};
use weave_primitives::hash::Hasher256;
use weave_primitives::{Account, Amount, BlockHash, Buf32, EpochHash, PublicKey, Signature};

use crate::block::BlockType;
use crate::codec::{json as cj, CodecError, Reader, Writer};

/// Derived operation of a tx.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxKind {
    Send,
    Receive,
    NotABlock,
}

/// Opaque application payload.  Ledger validation never looks inside.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxPayload {
    pub value: u64,
    pub data: Vec<u8>,
    pub gas: u64,
    pub gas_price: u64,
}

impl TxPayload {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tx {
    /// Previous tx in this account's chain, zero for the first.
    pub previous: BlockHash,
    /// Destination account when sending, zero otherwise.
    pub destination: Account,
    /// Source block when receiving, zero otherwise.
    pub source: BlockHash,
    /// Absolute balance of the account after this tx.
    pub balance: Amount,
    /// Account that authored and signed this tx.
    pub account: Account,
    pub payload: TxPayload,
    /// Epoch header this tx considers latest; advisory only.
    pub epoch: EpochHash,
    pub signature: Signature,
}

impl Tx {
    /// Smallest possible serialization (empty payload data).  Anything at or
    /// above this length in a shared table or frame is a tx, not a legacy
    /// block.
    pub const MIN_SIZE: usize = 32 + 32 + 32 + 16 + 32 + 8 + 8 + 8 + 4 + 32 + 64;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        previous: BlockHash,
        destination: Account,
        source: BlockHash,
        balance: Amount,
        account: Account,
        payload: TxPayload,
        epoch: EpochHash,
        prv: &RawKey,
        public: &PublicKey,
    ) -> Self {
        let mut tx = Self {
            previous,
            destination,
            source,
            balance,
            account,
            payload,
            epoch,
            signature: Signature::zero(),
        };
        tx.signature = sign_message(prv, public, &tx.hash());
        tx
    }

    /// Operation this tx performs, derived from its pointer fields.
    pub fn kind(&self) -> TxKind {
        if !self.destination.is_zero() {
            TxKind::Send
        } else if !self.source.is_zero() {
            TxKind::Receive
        } else {
            TxKind::NotABlock
        }
    }

    /// Store table / wire tag this tx files under.  A receive without a
    /// previous opens its account.
    pub fn table_type(&self) -> BlockType {
        match self.kind() {
            TxKind::Send => BlockType::Send,
            TxKind::Receive => {
                if self.previous.is_zero() {
                    BlockType::Open
                } else {
                    BlockType::Receive
                }
            }
            TxKind::NotABlock => BlockType::NotABlock,
        }
    }

    pub fn root(&self) -> Buf32 {
        if self.previous.is_zero() {
            self.account
        } else {
            self.previous
        }
    }

    pub fn hash(&self) -> BlockHash {
        let mut h = Hasher256::new();
        h.update(self.previous.as_bytes());
        h.update(self.destination.as_bytes());
        h.update(self.source.as_bytes());
        h.update(&self.balance.to_be_bytes());
        h.update(self.account.as_bytes());
        h.update(&self.payload.value.to_be_bytes());
        h.update(&self.payload.data);
        h.update(&self.payload.gas.to_be_bytes());
        h.update(&self.payload.gas_price.to_be_bytes());
        h.update(self.epoch.as_bytes());
        h.finalize()
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_buf32(&self.previous)
            .write_buf32(&self.destination)
            .write_buf32(&self.source)
            .write_amount(self.balance)
            .write_buf32(&self.account)
            .write_u64_be(self.payload.value)
            .write_u64_be(self.payload.gas)
            .write_u64_be(self.payload.gas_price)
            .write_u32_be(self.payload.data.len() as u32)
            .write_bytes(&self.payload.data)
            .write_buf32(&self.epoch)
            .write_buf64(&self.signature);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::MIN_SIZE + self.payload.data.len());
        self.serialize(&mut w);
        w.into_bytes()
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let previous = r.read_buf32()?;
        let destination = r.read_buf32()?;
        let source = r.read_buf32()?;
        let balance = r.read_amount()?;
        let account = r.read_buf32()?;
        let value = r.read_u64_be()?;
        let gas = r.read_u64_be()?;
        let gas_price = r.read_u64_be()?;
        let data_len = r.read_u32_be()? as usize;
        if data_len > r.remaining() {
            return Err(CodecError::BadLength);
        }
        let data = r.read_bytes(data_len)?.to_vec();
        let epoch = r.read_buf32()?;
        let signature = r.read_buf64()?;
        Ok(Self {
            previous,
            destination,
            source,
            balance,
            account,
            payload: TxPayload {
                value,
                data,
                gas,
                gas_price,
            },
            epoch,
            signature,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let tx = Self::deserialize(&mut r)?;
        r.finish()?;
        Ok(tx)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": "transaction",
            "previous": self.previous.to_hex(),
            "destination": self.destination.to_hex(),
            "source": self.source.to_hex(),
            "balance": self.balance.to_string(),
            "account": encode_account(&self.account),
            "value": self.payload.value.to_string(),
            "data": hex::encode_upper(&self.payload.data),
            "gas": self.payload.gas.to_string(),
            "gas_price": self.payload.gas_price.to_string(),
            "epoch": self.epoch.to_hex(),
            "signature": self.signature.to_hex(),
        })
    }

    pub fn from_json(v: &Value) -> Result<Self, CodecError> {
        let data = hex::decode(cj::get_str(v, "data")?).map_err(|_| CodecError::BadJson("data"))?;
        Ok(Self {
            previous: cj::get_buf32(v, "previous")?,
            destination: cj::get_buf32(v, "destination")?,
            source: cj::get_buf32(v, "source")?,
            balance: cj::get_amount(v, "balance")?,
            account: cj::get_account(v, "account")?,
            payload: TxPayload {
                value: cj::get_u64_dec(v, "value")?,
                data,
                gas: cj::get_u64_dec(v, "gas")?,
                gas_price: cj::get_u64_dec(v, "gas_price")?,
            },
            epoch: cj::get_buf32(v, "epoch")?,
            signature: cj::get_buf64(v, "signature")?,
        })
    }
}

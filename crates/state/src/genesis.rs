//! Baked-in genesis records, one per network.
//!
//! Each network roots the lattice at a single open-style tx crediting the
//! entire supply to the genesis account.  The test network's private key is
//! public knowledge so tests and dev tooling can spend from genesis; the
//! beta/live records carry only account constants and a pre-cut signature.

use weave_primitives::crypto::Keypair;
use weave_primitives::params::Network;
use weave_primitives::{Account, Amount, BlockHash, Buf32, Buf64};

use crate::tx::{Tx, TxPayload};

/// Well-known private key of the test genesis account.
pub const TEST_GENESIS_KEY: &str =
    "34F0A37AAD20F4A260F0A5B3CB3D7FB51673212263E58A380BC10474BB039CEE";

const BETA_GENESIS_ACCOUNT: &str =
    "2F4D72B8E973C979E4D6815CB34C2F426AD997FB8BC6BD94C92541E7F35879F1";
const LIVE_GENESIS_ACCOUNT: &str =
    "991CF190094C00F0B68E2E5F75F6BEE95A2E0BD93CEAA4A6734DB9F19B728948";

/// Total supply, credited to the genesis account at initialization.
pub fn genesis_amount() -> Amount {
    Amount::max()
}

/// The all-zero account; opening it is forbidden.
pub fn burn_account() -> Account {
    Account::zero()
}

/// The genesis record for a network: the opening tx and its account.
#[derive(Clone, Debug)]
pub struct Genesis {
    pub account: Account,
    pub tx: Tx,
}

impl Genesis {
    pub fn new(network: Network) -> Self {
        match network {
            Network::Test => {
                let key = Keypair::from_hex(TEST_GENESIS_KEY).expect("test genesis key");
                let tx = Tx::new(
                    BlockHash::zero(),
                    Account::zero(),
                    // The opening tx sources from the account itself.
                    key.public,
                    genesis_amount(),
                    key.public,
                    TxPayload::empty(),
                    Buf32::zero(),
                    &key.raw,
                    &key.public,
                );
                Self {
                    account: key.public,
                    tx,
                }
            }
            Network::Beta => Self::fixed(BETA_GENESIS_ACCOUNT),
            Network::Live => Self::fixed(LIVE_GENESIS_ACCOUNT),
        }
    }

    fn fixed(account_hex: &str) -> Self {
        let account = Buf32::from_hex(account_hex).expect("genesis account constant");
        let tx = Tx {
            previous: BlockHash::zero(),
            destination: Account::zero(),
            source: account,
            balance: genesis_amount(),
            account,
            payload: TxPayload::empty(),
            epoch: Buf32::zero(),
            // The fixed-network signatures were cut offline at launch; the
            // ledger writes genesis directly and never re-validates it.
            signature: Buf64::zero(),
        };
        Self { account, tx }
    }

    pub fn hash(&self) -> BlockHash {
        self.tx.hash()
    }
}

/// Key pair for the test genesis account.
pub fn test_genesis_key() -> Keypair {
    Keypair::from_hex(TEST_GENESIS_KEY).expect("test genesis key")
}

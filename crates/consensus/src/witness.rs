//! Deposits and the witness committee.
//!
//! Accounts pledge a deposit, warm up over voting rounds, then rank into
//! the candidate pool by weight.  The top seats serve as witnesses for the
//! epoch pipeline; unpledging starts a cooldown measured in epochs.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::*;

use weave_db::DbResult;
use weave_ledger::Ledger;
use weave_primitives::params::NetworkParams;
use weave_primitives::{Account, Amount, EpochHash};
use weave_store::StoreTransaction;

/// Where a deposit currently stands in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DepositPhase {
    /// Pledged, counting voting rounds until eligible.
    Warmup,
    /// Eligible candidate (ranking decides if it serves).
    Active,
    /// Unpledge requested, counting epochs until release.
    Cooldown,
    /// Fully released; kept briefly for introspection.
    Released,
}

#[derive(Clone, Debug)]
struct Deposit {
    amount: Amount,
    phase: DepositPhase,
    /// Rounds left in warmup.
    warmup_remaining: u32,
    /// Epochs left in cooldown.
    cooldown_remaining: u32,
    /// Epoch at which the deposit first became eligible.
    first_qualified: Option<EpochHash>,
    /// Committee votes cast this round.
    votes_this_round: usize,
}

/// A ranked eligible account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessCandidate {
    pub account: Account,
    pub deposit: Amount,
    pub weight: Amount,
    pub first_qualified: Option<EpochHash>,
}

/// Deposit book and committee ranking.
pub struct WitnessSet {
    params: NetworkParams,
    deposits: Mutex<HashMap<Account, Deposit>>,
}

impl WitnessSet {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            params,
            deposits: Mutex::new(HashMap::new()),
        }
    }

    /// Pledges a deposit; the account starts its warmup.
    pub fn pay_deposit(&self, account: Account, amount: Amount) {
        let mut deposits = self.deposits.lock();
        let entry = deposits.entry(account).or_insert(Deposit {
            amount: Amount::zero(),
            phase: DepositPhase::Warmup,
            warmup_remaining: self.params.deposit_warmup_rounds,
            cooldown_remaining: 0,
            first_qualified: None,
            votes_this_round: 0,
        });
        match entry.phase {
            DepositPhase::Warmup | DepositPhase::Active => {
                entry.amount = Amount(entry.amount.number() + amount.number());
            }
            DepositPhase::Cooldown | DepositPhase::Released => {
                // Re-pledging restarts the lifecycle from scratch.
                *entry = Deposit {
                    amount,
                    phase: DepositPhase::Warmup,
                    warmup_remaining: self.params.deposit_warmup_rounds,
                    cooldown_remaining: 0,
                    first_qualified: None,
                    votes_this_round: 0,
                };
            }
        }
        debug!(%account, "deposit pledged");
    }

    /// Requests the deposit back; the account leaves the committee after
    /// the cooldown.
    pub fn cancel_deposit(&self, account: &Account) {
        let mut deposits = self.deposits.lock();
        if let Some(entry) = deposits.get_mut(account) {
            if matches!(entry.phase, DepositPhase::Warmup | DepositPhase::Active) {
                entry.phase = DepositPhase::Cooldown;
                entry.cooldown_remaining = self.params.deposit_cooldown_epochs;
                debug!(%account, "deposit cooldown started");
            }
        }
    }

    /// Whether the account currently holds an eligible deposit.
    pub fn deposited(&self, account: &Account) -> bool {
        self.deposits
            .lock()
            .get(account)
            .map(|d| d.phase == DepositPhase::Active)
            .unwrap_or(false)
    }

    pub fn phase(&self, account: &Account) -> Option<DepositPhase> {
        self.deposits.lock().get(account).map(|d| d.phase)
    }

    /// A voting round completed (one full committee rotation of epochs):
    /// advance warmups and reset vote budgets.
    pub fn on_round_completed(&self, epoch: EpochHash) {
        let mut deposits = self.deposits.lock();
        for (account, entry) in deposits.iter_mut() {
            entry.votes_this_round = 0;
            if entry.phase == DepositPhase::Warmup {
                entry.warmup_remaining = entry.warmup_remaining.saturating_sub(1);
                if entry.warmup_remaining == 0 {
                    entry.phase = DepositPhase::Active;
                    entry.first_qualified = Some(epoch);
                    info!(%account, "deposit matured");
                }
            }
        }
    }

    /// An epoch committed: advance cooldowns.
    pub fn on_epoch_committed(&self) {
        let mut deposits = self.deposits.lock();
        for (account, entry) in deposits.iter_mut() {
            if entry.phase == DepositPhase::Cooldown {
                entry.cooldown_remaining = entry.cooldown_remaining.saturating_sub(1);
                if entry.cooldown_remaining == 0 {
                    entry.phase = DepositPhase::Released;
                    info!(%account, "deposit released");
                }
            }
        }
    }

    /// Consumes one committee vote from the account's per-round budget.
    /// Returns `false` once the cap is spent.
    pub fn try_spend_vote(&self, account: &Account) -> bool {
        let mut deposits = self.deposits.lock();
        let Some(entry) = deposits.get_mut(account) else {
            return false;
        };
        if entry.phase != DepositPhase::Active
            || entry.votes_this_round >= self.params.witness_max_votes_per_round
        {
            return false;
        }
        entry.votes_this_round += 1;
        true
    }

    /// Eligible accounts ranked by ledger weight, best first, capped at the
    /// candidate pool size.
    pub fn candidates(
        &self,
        ledger: &Ledger,
        txn: &StoreTransaction<'_>,
    ) -> DbResult<Vec<WitnessCandidate>> {
        let snapshot: Vec<(Account, Deposit)> = self
            .deposits
            .lock()
            .iter()
            .filter(|(_, d)| d.phase == DepositPhase::Active)
            .map(|(a, d)| (*a, d.clone()))
            .collect();
        let mut out = Vec::with_capacity(snapshot.len());
        for (account, deposit) in snapshot {
            let weight = ledger.weight(txn, &account)?;
            out.push(WitnessCandidate {
                account,
                deposit: deposit.amount,
                weight,
                first_qualified: deposit.first_qualified,
            });
        }
        out.sort_by(|a, b| {
            b.weight
                .cmp(&a.weight)
                .then_with(|| a.account.cmp(&b.account))
        });
        out.truncate(self.params.witness_candidate_count);
        Ok(out)
    }

    /// The serving committee: the top slice of the candidate pool.
    pub fn witnesses(
        &self,
        ledger: &Ledger,
        txn: &StoreTransaction<'_>,
    ) -> DbResult<Vec<Account>> {
        let mut candidates = self.candidates(ledger, txn)?;
        candidates.truncate(self.params.witness_count);
        Ok(candidates.into_iter().map(|c| c.account).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_ledger::genesis::initialize;
    use weave_primitives::crypto::Keypair;
    use weave_primitives::params::Network;
    use weave_primitives::Buf32;
    use weave_state::genesis::Genesis;
    use weave_store::test_utils::get_test_store;

    use std::sync::Arc;

    fn params() -> NetworkParams {
        NetworkParams::new(Network::Test)
    }

    #[test]
    fn test_warmup_then_active() {
        let set = WitnessSet::new(params());
        let account = Buf32::from(1u64);
        set.pay_deposit(account, Amount(100));
        assert_eq!(set.phase(&account), Some(DepositPhase::Warmup));
        assert!(!set.deposited(&account));

        for i in 0..params().deposit_warmup_rounds {
            assert!(!set.deposited(&account), "active after {i} rounds");
            set.on_round_completed(Buf32::from(i as u64));
        }
        assert!(set.deposited(&account));
        assert_eq!(
            set.phase(&account),
            Some(DepositPhase::Active)
        );
    }

    #[test]
    fn test_cooldown_releases_after_epochs() {
        let set = WitnessSet::new(params());
        let account = Buf32::from(2u64);
        set.pay_deposit(account, Amount(5));
        for i in 0..params().deposit_warmup_rounds {
            set.on_round_completed(Buf32::from(i as u64));
        }
        set.cancel_deposit(&account);
        assert_eq!(set.phase(&account), Some(DepositPhase::Cooldown));
        for _ in 0..params().deposit_cooldown_epochs {
            assert_ne!(set.phase(&account), Some(DepositPhase::Released));
            set.on_epoch_committed();
        }
        assert_eq!(set.phase(&account), Some(DepositPhase::Released));
        assert!(!set.deposited(&account));
    }

    #[test]
    fn test_vote_budget_per_round() {
        let set = WitnessSet::new(params());
        let account = Buf32::from(3u64);
        set.pay_deposit(account, Amount(5));
        for i in 0..params().deposit_warmup_rounds {
            set.on_round_completed(Buf32::from(i as u64));
        }
        for _ in 0..params().witness_max_votes_per_round {
            assert!(set.try_spend_vote(&account));
        }
        assert!(!set.try_spend_vote(&account));
        // A new round refills the budget.
        set.on_round_completed(Buf32::from(99u64));
        assert!(set.try_spend_vote(&account));
    }

    #[test]
    fn test_ranking_by_weight() {
        let (_dir, store) = get_test_store();
        let ledger = Arc::new(Ledger::new(store));
        let genesis = Genesis::new(Network::Test);
        let txn = ledger.store().tx_begin_write();
        initialize(&ledger, &txn, &genesis).unwrap();

        let set = WitnessSet::new(params());
        // Genesis holds all the weight; a random key holds none.
        let nobody = Keypair::generate().public;
        set.pay_deposit(genesis.account, Amount(10));
        set.pay_deposit(nobody, Amount(10));
        for i in 0..params().deposit_warmup_rounds {
            set.on_round_completed(Buf32::from(i as u64));
        }

        let candidates = set.candidates(&ledger, &txn).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].account, genesis.account);
        assert!(candidates[0].first_qualified.is_some());

        let witnesses = set.witnesses(&ledger, &txn).unwrap();
        assert_eq!(witnesses[0], genesis.account);
    }
}

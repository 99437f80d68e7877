//! Energy Ledger: per-account balances, pricing, spam detection and
//! periodic rebalancing. The economic layer that turns relaying into a
//! paid service rather than an altruistic one.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use meshphone_core::{EnergyAccount, EnergyReason, EnergyTransaction, Identity, MessagePriority};
use tracing::debug;

use crate::error::{EnergyError, Result};

const BASE_SEND_COST: f64 = 100.0;
const SPAM_PENALTY: f64 = 50.0;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Holds every node's `EnergyAccount` and implements the pricing and
/// rebalancing formulas shared by the whole mesh.
pub struct EnergyLedger {
    accounts: HashMap<Identity, EnergyAccount>,
}

impl EnergyLedger {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
        }
    }

    pub fn create_account(
        &mut self,
        identity: Identity,
        initial_balance: f64,
        plugged_in: bool,
    ) -> &EnergyAccount {
        let mut account = EnergyAccount::new(identity.clone(), initial_balance);
        account.plugged_in = plugged_in;
        self.accounts.insert(identity.clone(), account);
        self.accounts.get(&identity).expect("just inserted")
    }

    pub fn account(&self, identity: &str) -> Option<&EnergyAccount> {
        self.accounts.get(identity)
    }

    pub fn set_plugged_in(&mut self, identity: &str, plugged_in: bool) {
        if let Some(account) = self.accounts.get_mut(identity) {
            account.plugged_in = plugged_in;
        }
    }

    /// `base_send_cost * (1 + 0.1*size_kb) * priority_factor * (1 + 0.2*hops)`.
    pub fn send_cost(size_kb: f64, priority: MessagePriority, num_hops: u32) -> f64 {
        let size_factor = 1.0 + size_kb * 0.1;
        let hop_factor = 1.0 + f64::from(num_hops) * 0.2;
        let cost = BASE_SEND_COST * size_factor * priority.factor() * hop_factor;
        (cost * 100.0).round() / 100.0
    }

    /// `message_cost * 0.1 * (1.5 if plugged_in else 1.0)`.
    pub fn relay_reward(message_cost: f64, plugged_in: bool) -> f64 {
        let reward = message_cost * 0.1 * if plugged_in { 1.5 } else { 1.0 };
        (reward * 100.0).round() / 100.0
    }

    fn record(
        account: &mut EnergyAccount,
        from: Identity,
        to: Identity,
        amount: f64,
        reason: EnergyReason,
        message_id: Option<String>,
    ) {
        let id = account.transactions.len() as u64 + 1;
        account.transactions.push(EnergyTransaction {
            id,
            timestamp: now_secs(),
            from,
            to,
            amount,
            reason,
            message_id,
        });
    }

    /// Deduct `amount` from `identity`'s balance for `reason`. Returns
    /// `false` without mutating anything if the balance is insufficient
    /// — callers map this to `MeshError::InsufficientEnergy`.
    pub fn charge(
        &mut self,
        identity: &str,
        amount: f64,
        reason: EnergyReason,
        message_id: Option<String>,
    ) -> Result<bool> {
        let account = self
            .accounts
            .get_mut(identity)
            .ok_or_else(|| EnergyError::NoAccount(identity.to_string()))?;
        if account.balance < amount {
            return Ok(false);
        }
        account.balance -= amount;
        account.spent += amount;
        if matches!(reason, EnergyReason::Send) {
            account.sent_count += 1;
        }
        Self::record(
            account,
            identity.to_string(),
            "network".to_string(),
            amount,
            reason,
            message_id,
        );
        Ok(true)
    }

    /// Add `amount` to `identity`'s balance for `reason`. Unlike
    /// `charge`, this never fails for a known account — rewards and
    /// rebalancing bonuses are unconditional.
    pub fn credit(
        &mut self,
        identity: &str,
        amount: f64,
        reason: EnergyReason,
        from: Identity,
        message_id: Option<String>,
    ) -> Result<()> {
        let account = self
            .accounts
            .get_mut(identity)
            .ok_or_else(|| EnergyError::NoAccount(identity.to_string()))?;
        account.balance += amount;
        account.earned += amount;
        match reason {
            EnergyReason::Relay => account.relayed_count += 1,
            EnergyReason::Receive => account.received_count += 1,
            _ => {}
        }
        Self::record(account, from, identity.to_string(), amount, reason, message_id);
        Ok(())
    }

    /// Undo the most recent charge recorded against `identity` for
    /// `message_id`, restoring the balance and removing the transaction
    /// from the log rather than appending a negative one. Used when a
    /// send is charged up front but then turns out to have no route —
    /// the ledger must end up exactly as if the charge never happened,
    /// so replaying the transaction log still reproduces the balance.
    /// A no-op if no such transaction exists.
    pub fn reverse_last_charge(&mut self, identity: &str, message_id: &str) -> Result<()> {
        let account = self
            .accounts
            .get_mut(identity)
            .ok_or_else(|| EnergyError::NoAccount(identity.to_string()))?;
        let Some(pos) = account
            .transactions
            .iter()
            .rposition(|tx| tx.message_id.as_deref() == Some(message_id) && tx.from == identity)
        else {
            return Ok(());
        };
        let tx = account.transactions.remove(pos);
        account.balance += tx.amount;
        account.spent -= tx.amount;
        if matches!(tx.reason, EnergyReason::Send) {
            account.sent_count = account.sent_count.saturating_sub(1);
        }
        debug!(identity, message_id, amount = tx.amount, "charge reversed");
        Ok(())
    }

    /// True if `identity` has sent more than `max_messages` within the
    /// trailing `window_secs` seconds.
    pub fn is_spamming(&self, identity: &str, window_secs: u64, max_messages: usize) -> bool {
        let Some(account) = self.accounts.get(identity) else {
            return false;
        };
        let now = now_secs();
        let since = now.saturating_sub(window_secs);
        let recent_sends = account
            .transactions
            .iter()
            .filter(|tx| matches!(tx.reason, EnergyReason::Send) && tx.timestamp >= since)
            .count();
        recent_sends > max_messages
    }

    /// Debit the fixed spam penalty. Left to the caller (the message
    /// core's policy, not an automatic reaction) to decide when to
    /// invoke this after `is_spamming` returns true.
    pub fn apply_spam_penalty(&mut self, identity: &str) -> Result<()> {
        self.charge(identity, SPAM_PENALTY, EnergyReason::Penalty, None)?;
        Ok(())
    }

    /// Boost accounts below half of `target_balance`, tax accounts
    /// above twice it. Intended to run on a slow periodic tick, not per
    /// message.
    pub fn rebalance(&mut self, target_balance: f64) {
        let low_water = target_balance * 0.5;
        let high_water = target_balance * 2.0;
        for account in self.accounts.values_mut() {
            if account.balance < low_water {
                let bonus = (low_water - account.balance) * 0.1;
                account.balance += bonus;
                account.earned += bonus;
                Self::record(
                    account,
                    "network".to_string(),
                    account.identity.clone(),
                    bonus,
                    EnergyReason::Rebalance,
                    None,
                );
                debug!(identity = %account.identity, bonus, "rebalance boost applied");
            } else if account.balance > high_water {
                let tax = (account.balance - high_water) * 0.05;
                account.balance -= tax;
                account.spent += tax;
                Self::record(
                    account,
                    account.identity.clone(),
                    "network".to_string(),
                    tax,
                    EnergyReason::Rebalance,
                    None,
                );
                debug!(identity = %account.identity, tax, "rebalance tax applied");
            }
        }
    }
}

impl Default for EnergyLedger {
    fn default() -> Self {
        Self::new()
    }
}

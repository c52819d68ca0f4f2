use std::sync::Arc;

use crate::factory::LedgerInstance;
use crate::ledger::{Amount, LedgerError, TokenId, TokenMetadata};

/// Single-token facade over one `(instance, token id)` pair.
///
/// Callers shaped around a classic one-token ledger talk to this adapter
/// without ever seeing a token id; every call forwards to the bound
/// instance with the bound id injected, and results and errors pass
/// through untouched. The proxy holds no balances and caches nothing.
#[derive(Clone)]
pub struct TokenProxy {
    instance: Arc<LedgerInstance>,
    token_id: TokenId,
}

impl TokenProxy {
    pub fn bind(instance: Arc<LedgerInstance>, token_id: TokenId) -> Self {
        Self { instance, token_id }
    }

    pub fn token_id(&self) -> TokenId {
        self.token_id
    }

    pub fn metadata(&self) -> Option<TokenMetadata> {
        self.instance.token_metadata(self.token_id)
    }

    pub fn icrc1_balance_of(&self, account: &str) -> Amount {
        self.instance.icrc1_balance_of(self.token_id, account)
    }

    pub fn icrc1_total_supply(&self) -> Amount {
        self.instance.icrc1_total_supply(self.token_id)
    }

    pub fn icrc1_transfer(
        &self,
        caller: &str,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.instance
            .icrc1_transfer(caller, self.token_id, from, to, amount)
    }

    pub fn icrc2_approve(
        &self,
        caller: &str,
        owner: &str,
        spender: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.instance
            .icrc2_approve(caller, self.token_id, owner, spender, amount)
    }

    pub fn icrc2_allowance(&self, owner: &str, spender: &str) -> Amount {
        self.instance
            .icrc2_allowance(self.token_id, owner, spender)
    }

    pub fn icrc2_transfer_from(
        &self,
        caller: &str,
        spender: &str,
        owner: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.instance
            .icrc2_transfer_from(caller, self.token_id, spender, owner, to, amount)
    }
}

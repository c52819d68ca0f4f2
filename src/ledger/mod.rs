use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Principal = String;
pub type TokenId = u64;
pub type Amount = u64;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("caller {caller} is not authorized to act as {required}")]
    Unauthorized {
        caller: Principal,
        required: Principal,
    },
    #[error("unknown token {token_id}")]
    UnknownToken { token_id: TokenId },
    #[error("insufficient funds in account {account} for token {token_id}")]
    InsufficientFunds {
        token_id: TokenId,
        account: Principal,
    },
    #[error("insufficient allowance for spender {spender} on account {owner}, token {token_id}")]
    InsufficientAllowance {
        token_id: TokenId,
        owner: Principal,
        spender: Principal,
    },
    #[error("snapshot digest mismatch: stored {stored}, computed {computed}")]
    DigestMismatch { stored: String, computed: String },
    #[error("ledger invariant violated: {reason}")]
    InvariantViolation { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// One fungible token inside a ledger instance. Metadata and creator are
/// fixed at creation; only balances and allowances change afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub metadata: TokenMetadata,
    pub total_supply: Amount,
    pub balances: BTreeMap<Principal, Amount>,
    /// owner -> spender -> remaining allowance. Absent keys mean 0.
    pub allowances: BTreeMap<Principal, BTreeMap<Principal, Amount>>,
    pub creator: Principal,
}

impl Token {
    fn balance_of(&self, account: &str) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &str, spender: &str) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|per_spender| per_spender.get(spender))
            .copied()
            .unwrap_or(0)
    }

    fn debit(
        &mut self,
        token_id: TokenId,
        account: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let held = self.balance_of(account);
        if held < amount {
            return Err(LedgerError::InsufficientFunds {
                token_id,
                account: account.to_string(),
            });
        }
        if held == amount {
            self.balances.remove(account);
        } else {
            self.balances.insert(account.to_string(), held - amount);
        }
        Ok(())
    }

    fn credit(&mut self, account: &str, amount: Amount) {
        if amount == 0 {
            return;
        }
        *self.balances.entry(account.to_string()).or_insert(0) += amount;
    }

    fn set_allowance(&mut self, owner: &str, spender: &str, amount: Amount) {
        if amount == 0 {
            if let Some(per_spender) = self.allowances.get_mut(owner) {
                per_spender.remove(spender);
                if per_spender.is_empty() {
                    self.allowances.remove(owner);
                }
            }
        } else {
            self.allowances
                .entry(owner.to_string())
                .or_default()
                .insert(spender.to_string(), amount);
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    TokenCreated {
        token_id: TokenId,
        creator: Principal,
        initial_supply: Amount,
    },
    Transfer {
        token_id: TokenId,
        from: Principal,
        to: Principal,
        amount: Amount,
    },
    Approval {
        token_id: TokenId,
        owner: Principal,
        spender: Principal,
        amount: Amount,
    },
    TransferFrom {
        token_id: TokenId,
        owner: Principal,
        spender: Principal,
        to: Principal,
        amount: Amount,
    },
}

/// Full serializable copy of one instance's state plus its Merkle digest.
/// `Ledger::from_snapshot` refuses a snapshot whose digest or invariants
/// do not check out.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub owner: Principal,
    pub next_token_id: TokenId,
    pub tokens: BTreeMap<TokenId, Token>,
    pub events: Vec<LedgerEvent>,
    pub state_digest: [u8; 32],
}

/// Multi-token accounting state for one ledger instance.
///
/// The engine is the sole mutator of this state. Every mutating method runs
/// its full check-then-mutate sequence before returning, and every rejection
/// leaves the state untouched. Callers that need cross-thread serialization
/// wrap the engine in an instance handle (see `factory`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    owner: Principal,
    next_token_id: TokenId,
    tokens: BTreeMap<TokenId, Token>,
    events: Vec<LedgerEvent>,
}

impl Ledger {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            next_token_id: 0,
            tokens: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Creates a new token and, when `initial_supply > 0`, mints the whole
    /// supply to the instance owner. Only the instance owner may create
    /// tokens; token ids are assigned monotonically and never reused.
    pub fn create_token(
        &mut self,
        caller: &str,
        metadata: TokenMetadata,
        initial_supply: Amount,
    ) -> Result<TokenId, LedgerError> {
        if caller != self.owner {
            return Err(LedgerError::Unauthorized {
                caller: caller.to_string(),
                required: self.owner.clone(),
            });
        }
        let token_id = self.next_token_id;
        self.next_token_id += 1;

        let mut balances = BTreeMap::new();
        if initial_supply > 0 {
            balances.insert(self.owner.clone(), initial_supply);
        }
        self.tokens.insert(
            token_id,
            Token {
                metadata,
                total_supply: initial_supply,
                balances,
                allowances: BTreeMap::new(),
                creator: caller.to_string(),
            },
        );
        self.events.push(LedgerEvent::TokenCreated {
            token_id,
            creator: caller.to_string(),
            initial_supply,
        });
        log::debug!("created token {token_id} with initial supply {initial_supply}");
        Ok(token_id)
    }

    /// Total function: unknown token or unknown account reads as 0.
    pub fn balance_of(&self, token_id: TokenId, account: &str) -> Amount {
        self.tokens
            .get(&token_id)
            .map(|token| token.balance_of(account))
            .unwrap_or(0)
    }

    pub fn total_supply(&self, token_id: TokenId) -> Amount {
        self.tokens
            .get(&token_id)
            .map(|token| token.total_supply)
            .unwrap_or(0)
    }

    pub fn allowance(&self, token_id: TokenId, owner: &str, spender: &str) -> Amount {
        self.tokens
            .get(&token_id)
            .map(|token| token.allowance(owner, spender))
            .unwrap_or(0)
    }

    pub fn metadata(&self, token_id: TokenId) -> Option<&TokenMetadata> {
        self.tokens.get(&token_id).map(|token| &token.metadata)
    }

    /// Moves `amount` from `from` to `to`. The caller must be `from`.
    /// Zero amounts and self-transfers succeed without touching state.
    pub fn transfer(
        &mut self,
        caller: &str,
        token_id: TokenId,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if caller != from {
            return Err(LedgerError::Unauthorized {
                caller: caller.to_string(),
                required: from.to_string(),
            });
        }
        let token = self
            .tokens
            .get_mut(&token_id)
            .ok_or(LedgerError::UnknownToken { token_id })?;
        if amount == 0 || from == to {
            return Ok(());
        }
        token.debit(token_id, from, amount)?;
        token.credit(to, amount);
        self.events.push(LedgerEvent::Transfer {
            token_id,
            from: from.to_string(),
            to: to.to_string(),
            amount,
        });
        log::debug!("token {token_id}: transferred {amount} from {from} to {to}");
        Ok(())
    }

    /// Sets the allowance for `(owner, spender)` to exactly `amount`,
    /// overwriting any prior value. Zero revokes.
    pub fn approve(
        &mut self,
        caller: &str,
        token_id: TokenId,
        owner: &str,
        spender: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if caller != owner {
            return Err(LedgerError::Unauthorized {
                caller: caller.to_string(),
                required: owner.to_string(),
            });
        }
        let token = self
            .tokens
            .get_mut(&token_id)
            .ok_or(LedgerError::UnknownToken { token_id })?;
        token.set_allowance(owner, spender, amount);
        self.events.push(LedgerEvent::Approval {
            token_id,
            owner: owner.to_string(),
            spender: spender.to_string(),
            amount,
        });
        log::debug!("token {token_id}: {owner} approved {spender} for {amount}");
        Ok(())
    }

    /// Delegated transfer: `spender` moves `amount` out of `owner`'s balance
    /// to `to`, consuming that much allowance. Allowance is checked before
    /// balance; a rejection at either check applies no mutation at all.
    pub fn transfer_from(
        &mut self,
        caller: &str,
        token_id: TokenId,
        spender: &str,
        owner: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if caller != spender {
            return Err(LedgerError::Unauthorized {
                caller: caller.to_string(),
                required: spender.to_string(),
            });
        }
        let token = self
            .tokens
            .get_mut(&token_id)
            .ok_or(LedgerError::UnknownToken { token_id })?;
        if amount == 0 {
            return Ok(());
        }
        let approved = token.allowance(owner, spender);
        if approved < amount {
            return Err(LedgerError::InsufficientAllowance {
                token_id,
                owner: owner.to_string(),
                spender: spender.to_string(),
            });
        }
        token.debit(token_id, owner, amount)?;
        token.credit(to, amount);
        token.set_allowance(owner, spender, approved - amount);
        self.events.push(LedgerEvent::TransferFrom {
            token_id,
            owner: owner.to_string(),
            spender: spender.to_string(),
            to: to.to_string(),
            amount,
        });
        log::debug!("token {token_id}: {spender} transferred {amount} from {owner} to {to}");
        Ok(())
    }

    /// All known token ids, ascending.
    pub fn supported_tokens(&self) -> Vec<TokenId> {
        self.tokens.keys().copied().collect()
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Verifies per-token conservation: total supply equals the sum of all
    /// balances, with no stored zero entries and no token beyond the id
    /// counter.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        for (token_id, token) in &self.tokens {
            if *token_id >= self.next_token_id {
                return Err(LedgerError::InvariantViolation {
                    reason: format!("token {token_id} is beyond the id counter"),
                });
            }
            let mut held: u128 = 0;
            for (account, amount) in &token.balances {
                if *amount == 0 {
                    return Err(LedgerError::InvariantViolation {
                        reason: format!("token {token_id}: zero balance stored for {account}"),
                    });
                }
                held += u128::from(*amount);
            }
            if held != u128::from(token.total_supply) {
                return Err(LedgerError::InvariantViolation {
                    reason: format!(
                        "token {token_id}: balances sum to {held}, supply is {}",
                        token.total_supply
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            owner: self.owner.clone(),
            next_token_id: self.next_token_id,
            tokens: self.tokens.clone(),
            events: self.events.clone(),
            state_digest: compute_state_digest(&self.tokens),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let computed = compute_state_digest(&snapshot.tokens);
        if computed != snapshot.state_digest {
            return Err(LedgerError::DigestMismatch {
                stored: hex::encode(snapshot.state_digest),
                computed: hex::encode(computed),
            });
        }
        let ledger = Self {
            owner: snapshot.owner,
            next_token_id: snapshot.next_token_id,
            tokens: snapshot.tokens,
            events: snapshot.events,
        };
        ledger.check_invariants()?;
        Ok(ledger)
    }
}

fn compute_state_digest(tokens: &BTreeMap<TokenId, Token>) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (token_id, token) in tokens {
        let mut hasher = Sha256::new();
        hasher.update(b"token");
        hasher.update(token_id.to_le_bytes());
        hasher.update(token.metadata.name.as_bytes());
        hasher.update(token.metadata.symbol.as_bytes());
        hasher.update([token.metadata.decimals]);
        hasher.update(token.total_supply.to_le_bytes());
        hasher.update(token.creator.as_bytes());
        leaves.push(hasher.finalize().into());
        for (account, amount) in &token.balances {
            let mut hasher = Sha256::new();
            hasher.update(b"bal");
            hasher.update(token_id.to_le_bytes());
            hasher.update(account.as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for (owner, per_spender) in &token.allowances {
            for (spender, amount) in per_spender {
                let mut hasher = Sha256::new();
                hasher.update(b"allow");
                hasher.update(token_id.to_le_bytes());
                hasher.update(owner.as_bytes());
                hasher.update(spender.as_bytes());
                hasher.update(amount.to_le_bytes());
                leaves.push(hasher.finalize().into());
            }
        }
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"tokenhub-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ledger::{
    Amount, Ledger, LedgerError, LedgerSnapshot, Principal, TokenId, TokenMetadata,
};

pub type InstanceId = u64;

/// One isolated ledger instance: the engine behind a per-instance lock.
///
/// Every mutator holds the write lock for its whole check-then-mutate
/// sequence, so concurrent calls against the same instance serialize at
/// operation granularity and no caller ever observes a half-applied
/// transfer. Queries take the read lock and see a consistent snapshot.
/// Distinct instances share nothing, so they never contend.
pub struct LedgerInstance {
    id: InstanceId,
    state: RwLock<Ledger>,
}

impl LedgerInstance {
    fn new(id: InstanceId, owner: &str) -> Self {
        Self {
            id,
            state: RwLock::new(Ledger::new(owner)),
        }
    }

    // Engine methods never panic mid-mutation, so state behind a poisoned
    // lock is still consistent and the guard can be recovered.
    fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Ledger> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn owner(&self) -> Principal {
        self.read().owner().to_string()
    }

    pub fn create_token(
        &self,
        caller: &str,
        metadata: TokenMetadata,
        initial_supply: Amount,
    ) -> Result<TokenId, LedgerError> {
        self.write().create_token(caller, metadata, initial_supply)
    }

    pub fn icrc1_balance_of(&self, token_id: TokenId, account: &str) -> Amount {
        self.read().balance_of(token_id, account)
    }

    pub fn icrc1_total_supply(&self, token_id: TokenId) -> Amount {
        self.read().total_supply(token_id)
    }

    pub fn icrc1_transfer(
        &self,
        caller: &str,
        token_id: TokenId,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.write().transfer(caller, token_id, from, to, amount)
    }

    pub fn icrc2_approve(
        &self,
        caller: &str,
        token_id: TokenId,
        owner: &str,
        spender: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.write().approve(caller, token_id, owner, spender, amount)
    }

    pub fn icrc2_allowance(&self, token_id: TokenId, owner: &str, spender: &str) -> Amount {
        self.read().allowance(token_id, owner, spender)
    }

    pub fn icrc2_transfer_from(
        &self,
        caller: &str,
        token_id: TokenId,
        spender: &str,
        owner: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.write()
            .transfer_from(caller, token_id, spender, owner, to, amount)
    }

    pub fn supported_tokens(&self) -> Vec<TokenId> {
        self.read().supported_tokens()
    }

    pub fn token_metadata(&self, token_id: TokenId) -> Option<TokenMetadata> {
        self.read().metadata(token_id).cloned()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.read().snapshot()
    }
}

/// Singleton registry that provisions ledger instances.
///
/// Holds no token or balance state itself; each created instance is an
/// independent arena reachable only through its `Arc` handle.
#[derive(Default)]
pub struct LedgerFactory {
    instances: RwLock<Vec<Arc<LedgerInstance>>>,
}

impl LedgerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions a fresh isolated instance owned by `owner` and registers
    /// it. Instance ids follow creation order.
    pub fn create_instance(&self, owner: &str) -> Arc<LedgerInstance> {
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = instances.len() as InstanceId;
        let instance = Arc::new(LedgerInstance::new(id, owner));
        instances.push(Arc::clone(&instance));
        log::info!("provisioned ledger instance {id} for {owner}");
        instance
    }

    /// All instances ever created, in stable ascending creation order.
    pub fn list_instances(&self) -> Vec<Arc<LedgerInstance>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn metadata(symbol: &str) -> TokenMetadata {
        TokenMetadata {
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            decimals: 8,
        }
    }

    #[test]
    fn factory_lists_instances_in_creation_order() {
        let factory = LedgerFactory::new();
        let a = factory.create_instance("u1");
        let b = factory.create_instance("u2");
        let c = factory.create_instance("u1");
        assert_eq!((a.id(), b.id(), c.id()), (0, 1, 2));

        let listed = factory.list_instances();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].owner(), "u1");
        assert_eq!(listed[1].owner(), "u2");
        assert_eq!(listed[2].owner(), "u1");
    }

    #[test]
    fn instances_are_isolated() {
        let factory = LedgerFactory::new();
        let a = factory.create_instance("u1");
        let b = factory.create_instance("u2");

        let id = a.create_token("u1", metadata("ALP"), 500).unwrap();
        assert_eq!(a.icrc1_balance_of(id, "u1"), 500);
        // Same token id in the other instance is simply unknown.
        assert_eq!(b.icrc1_balance_of(id, "u1"), 0);
        assert!(b.supported_tokens().is_empty());

        // Owner of one instance has no authority over another.
        let err = b.create_token("u1", metadata("ALP"), 1).unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));
    }

    #[test]
    fn instance_surface_matches_engine_semantics() {
        let factory = LedgerFactory::new();
        let instance = factory.create_instance("u1");
        let id = instance.create_token("u1", metadata("APE"), 1_000).unwrap();

        instance.icrc1_transfer("u1", id, "u1", "u2", 300).unwrap();
        instance.icrc2_approve("u1", id, "u1", "u3", 100).unwrap();
        instance
            .icrc2_transfer_from("u3", id, "u3", "u1", "u4", 60)
            .unwrap();

        assert_eq!(instance.icrc1_balance_of(id, "u1"), 640);
        assert_eq!(instance.icrc1_balance_of(id, "u2"), 300);
        assert_eq!(instance.icrc1_balance_of(id, "u4"), 60);
        assert_eq!(instance.icrc2_allowance(id, "u1", "u3"), 40);
        assert_eq!(instance.icrc1_total_supply(id), 1_000);
        assert_eq!(instance.supported_tokens(), vec![id]);
        assert_eq!(instance.token_metadata(id).unwrap().symbol, "APE");
    }

    #[test]
    fn concurrent_transfers_serialize_without_lost_updates() {
        let factory = LedgerFactory::new();
        let instance = factory.create_instance("u1");
        let id = instance.create_token("u1", metadata("ALP"), 10_000).unwrap();
        instance.icrc1_transfer("u1", id, "u1", "a", 5_000).unwrap();
        instance.icrc1_transfer("u1", id, "u1", "b", 5_000).unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let ledger = Arc::clone(&instance);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    ledger.icrc1_transfer("a", id, "a", "b", 1).unwrap();
                    ledger.icrc1_transfer("b", id, "b", "a", 1).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Equal traffic both ways: balances end where they started.
        assert_eq!(instance.icrc1_balance_of(id, "a"), 5_000);
        assert_eq!(instance.icrc1_balance_of(id, "b"), 5_000);
        assert_eq!(instance.icrc1_total_supply(id), 10_000);
        instance.snapshot();
    }

    #[test]
    fn concurrent_spenders_never_exceed_the_allowance() {
        let factory = LedgerFactory::new();
        let instance = factory.create_instance("owner");
        let id = instance.create_token("owner", metadata("ALP"), 1_000).unwrap();
        instance.icrc2_approve("owner", id, "owner", "spender", 100).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&instance);
            handles.push(thread::spawn(move || {
                let mut moved = 0u64;
                for _ in 0..100 {
                    if ledger
                        .icrc2_transfer_from("spender", id, "spender", "owner", "sink", 1)
                        .is_ok()
                    {
                        moved += 1;
                    }
                }
                moved
            }));
        }
        let moved: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // The allowance check and the debit are one atomic unit, so the
        // total spent can never overshoot the approved 100.
        assert_eq!(moved, 100);
        assert_eq!(instance.icrc1_balance_of(id, "sink"), 100);
        assert_eq!(instance.icrc1_balance_of(id, "owner"), 900);
        assert_eq!(instance.icrc2_allowance(id, "owner", "spender"), 0);
    }

    #[test]
    fn snapshot_restores_into_a_fresh_engine() {
        let factory = LedgerFactory::new();
        let instance = factory.create_instance("u1");
        let id = instance.create_token("u1", metadata("ALP"), 700).unwrap();
        instance.icrc1_transfer("u1", id, "u1", "u2", 250).unwrap();

        let restored = Ledger::from_snapshot(instance.snapshot()).unwrap();
        assert_eq!(restored.balance_of(id, "u2"), 250);
        assert_eq!(restored.total_supply(id), 700);
    }
}

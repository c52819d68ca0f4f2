//! Multi-token accounting ledger with per-owner instances.
//!
//! One ledger instance hosts many fungible tokens behind an
//! ICRC-1/ICRC-2 shaped surface; a singleton factory provisions one
//! isolated instance per owner, and a stateless proxy exposes any single
//! token of an instance as if it were a classic one-token ledger.

pub mod factory;
pub mod ledger;
pub mod proxy;

pub use factory::{InstanceId, LedgerFactory, LedgerInstance};
pub use ledger::{
    Amount, Ledger, LedgerError, LedgerEvent, LedgerSnapshot, Principal, Token, TokenId,
    TokenMetadata,
};
pub use proxy::TokenProxy;

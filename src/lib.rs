//! Client-side tooling for EIP-7702 delegated smart accounts.
//!
//! Covers the full setup-then-operate flow against a Kernel v3 account
//! implementation and EntryPoint v0.7: signing delegation authorizations,
//! initializing the upgraded account, encoding execution batches, computing
//! and signing the packed operation hash, and submitting operations either
//! through a bundler or straight to the entry point.

pub mod account;
pub mod authorization;
pub mod bundler;
pub mod config;
pub mod encoding;
pub mod gas;
pub mod submitter;
pub mod types;
pub mod userop;

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and constants that are used across multiple components of the quorum.
//!
//! Records that belong to a single component, e.g., wallets or blocks, live next to the component
//! that owns them ([`crate::state`], [`crate::delta`]).

pub mod basic;

pub mod crypto_primitives;

pub use basic::*;

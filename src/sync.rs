// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Re-exports the synchronization primitives used throughout the crate so that they can be
//! swapped out in one place if need be.

pub use parking_lot::{Mutex, RwLock};

// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Shared plumbing with no protocol knowledge of its own.

pub mod handle;

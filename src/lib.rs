// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Local development reverse proxy with live traffic inspection.
//!
//! Inbound requests flow through a configurable middleware chain (log,
//! delay, body replacement) into the upstream forwarder; every completed
//! exchange is captured into a bounded in-memory history and broadcast to
//! connected inspector clients.

pub mod broadcast;
pub mod capture;
pub mod config;
pub mod exchange;
pub mod forward;
pub mod gateway;
pub mod middleware;
pub mod proxy;
pub mod serde_helpers;

#[cfg(test)]
pub(crate) mod test_helpers;

// Keep library small; main.rs remains the binary entrypoint.

//! Common test infrastructure
//!
//! This module wires the acquisition stack together around a scripted
//! transfer client so end-to-end tests never touch the network.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestHarness, MOVIE_1_ID};
//!
//! #[tokio::test]
//! async fn test_download() {
//!     let harness = TestHarness::spawn().await;
//!     harness.orchestrator.request_download(MOVIE_1_ID);
//!     harness.orchestrator.wait_for_terminal(MOVIE_1_ID).await;
//! }
//! ```

mod constants;
mod harness;
mod transfer;

// Public API - this is what tests import
pub use constants::*;
pub use harness::{body_bytes, body_json, drain_events, HarnessOptions, TestHarness};
#[allow(unused_imports)]
pub use transfer::{ScriptedTransferClient, Step};

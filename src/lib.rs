//! Tidelock - Encrypted virtual file layer over untrusted storage.
//!
//! Files live on ordinary storage as self-describing containers:
//! - AES-256-CTR with a per-container nonce for seekable encryption
//! - HMAC-SHA256 chunk tags binding each chunk to its position
//! - A device-local nonce sequencer that makes nonce reuse structurally
//!   impossible, with a split-range handoff for authorizing new devices
//! - A multi-threaded transfer engine over disjoint container ranges

pub mod app;
pub mod config;
pub mod container;
pub mod error;
pub mod file;
pub mod integrity;
pub mod nonce;
pub mod secret;
pub mod sequence;
pub mod transfer;
pub mod ui;
pub mod vault;

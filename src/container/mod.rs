//! Encrypted container format: a fixed header followed by ciphertext,
//! optionally interleaved with per-chunk integrity tags.

pub mod header;
pub mod stream;

pub use header::ContainerHeader;
pub use stream::{DecryptStream, EncryptStream};

//! Message pipeline.
//!
//! Every message event from the Socket Mode adapter flows through:
//! 1. `FilterConfig`: channel, target-user and anti-loopback rules
//! 2. `Transformer`: Gen Alpha rewrite via the completion API
//! 3. `Publisher`: formatted reply back into the originating channel

pub mod filter;
pub mod processor;
pub mod types;

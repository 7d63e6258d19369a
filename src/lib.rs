//! Gen Alpha Slack bot: rewrites chosen users' messages in Gen Alpha slang.

pub mod channels;
pub mod config;
pub mod error;
pub mod health;
pub mod llm;
pub mod pipeline;

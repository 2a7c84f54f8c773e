//! Model Context Protocol
//!
//! JSON-RPC 2.0 メッセージ型、サーバーループ、ハンドラートレイト

pub mod error;
pub mod server;
pub mod types;

pub use error::*;
pub use server::*;
pub use types::*;

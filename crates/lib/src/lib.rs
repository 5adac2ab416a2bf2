//! Hesab core library: sessions, intent rules, provider chain, spreadsheet analysis,
//! message routing, and the Telegram webhook gateway used by the CLI.

pub mod channels;
pub mod config;
pub mod dataset;
pub mod gateway;
pub mod init;
pub mod intent;
pub mod llm;
pub mod router;
pub mod session;
pub mod text;

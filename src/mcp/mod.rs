//! MCP protocol bridge: wire frames, server, client, and the tool registry.

pub mod client;
pub mod protocol;
pub mod server;
pub mod tools;

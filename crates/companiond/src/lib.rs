//! Runtime core for an always-on AI companion: a multi-provider brain, an
//! MCP tool client, a heartbeat loop for autonomous behavior, a scheduled
//! task manager, and the chat front-ends that sit in front of all of it.

pub mod brain;
pub mod commands;
pub mod config;
pub mod controller;
pub mod display;
pub mod frontend;
pub mod heartbeat;
pub mod mcp;
pub mod scheduler;

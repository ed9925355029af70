//! Channel adapters: translation between transport payloads and the
//! gateway's inbound/reply types. No conversation logic lives here.

pub mod chat;
pub mod webhook;

//! Client-side synchronization engine for the campus feed and chats.
//!
//! Keeps an in-memory, deduplicated, ordered view of posts and chats in step
//! with a backend that serves paged queries and pushes realtime change
//! events, and applies likes and read receipts optimistically with rollback.
//!
//! The usual entry point is [`controller::SyncEngine`] driven by a
//! [`backend::SyncBackend`] such as [`backend::HttpBackend`].

pub mod backend;
pub mod config;
pub mod controller;
pub mod model;
pub mod mutation;
pub mod realtime;
pub mod store;
pub mod util;

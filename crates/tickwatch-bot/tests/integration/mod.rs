//! Integration tests for tickwatch-bot.
//!
//! These tests drive the real HTTP adapters against an in-process server:
//! - Token issuance, caching and stale-token recovery
//! - Webhook delivery and provider error codes
//! - A full monitoring cycle from chart fetch to alert delivery

pub mod common;

//! Client for the dashboard's public query endpoint.
//!
//! This crate provides:
//! - [`QueryTemplate`]: a JSON query payload with its topic and record-id filters rewritable
//! - [`QueryClient`]: POSTs payloads with retries and decodes the responses into tables

pub mod client;
pub mod template;

pub use client::QueryClient;
pub use template::{QueryTemplate, quote_literal};

//! # Protocol Module
//!
//! Kafka wire protocol support. Everything lives under [`kafka`]; this level
//! only exists so that the crate layout leaves room for other encodings of
//! the same messages.

pub mod kafka;

//! Tollgate - Fixed-Window Rate Limiting Engine
//!
//! This crate implements a concurrent, multi-tenant request counter. Callers
//! register limits, extract a key per limit from each request and get back an
//! admit or reject decision, the latter with the seconds left until the
//! window resets. Protocol handling stays with the caller.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod replay;

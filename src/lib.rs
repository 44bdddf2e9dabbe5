//! Resumable, rate-limit aware bulk deletion of a user's own messages.
//!
//! The [`job::JobController`] scans communities and conversations for
//! authored messages and deletes them target by target, checkpointing after
//! every message. All remote calls go through [`api::HttpClient`], which
//! paces them per endpoint bucket with [`ratelimit::RateLimiter`].

pub mod api;
pub mod commands;
pub mod config;
pub mod events;
pub mod job;
pub mod observability;
pub mod ratelimit;
pub mod store;

//! Data Transfer Objects for the orchestrator API
//!
//! This module contains the request and response payloads exchanged between the
//! orchestrator and its clients. DTOs are lightweight representations of
//! domain entities optimized for network transfer.

pub mod auth;
pub mod job;
pub mod organization;
pub mod pipeline;

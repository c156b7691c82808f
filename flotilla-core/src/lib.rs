//! Flotilla Core
//!
//! Core types and abstractions for the Flotilla batch cluster orchestrator.
//!
//! This crate contains:
//! - Domain types: persisted entities and their status transition tables
//! - DTOs: request/response payloads shared by the orchestrator and its clients
//! - Tasks: descriptors for the at-least-once callbacks that advance the state machines

pub mod domain;
pub mod dto;
pub mod task;

//! Core logic for adaptive oral examinations.
//!
//! The [`orchestrator::Orchestrator`] drives the exam loop: each student
//! response is analyzed for rubric coverage and signs of struggle
//! concurrently, then either the exam completes or a follow-up question is
//! generated. Persistence and the LLM backend sit behind traits so the
//! runtime and tests can supply their own.

pub mod coverage;
pub mod domain;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod questions;
pub mod rubric;
pub mod selector;
pub mod store;
pub mod struggle;

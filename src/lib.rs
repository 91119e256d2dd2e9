//! Stage-checkpointed state protocol and two-turn conversation orchestrator
//! for vending machine layout verification.
//!
//! Each pipeline stage is an independent invocation. Stages never hand each
//! other in-memory state; they exchange an [`state::Envelope`] whose
//! [`state::Reference`]s point at immutable artifacts in a blob store, and
//! they append status history to a [`record::RecordStore`].
//!
//! The crate is organized leaf-first:
//!
//! - [`state`]: categories, references, the `StateStore`, envelopes
//! - [`conversation`]: model request types, model service ports, thinking extraction
//! - [`parser`]: turn-2 verdict extraction
//! - [`classify`]: failure classification into retry policies
//! - [`record`]: verification records and status history
//! - [`templates`]: prompt templates, cached by [`cache`]
//! - [`orchestrator`]: the stage functions that tie the above together
//! - [`config`], [`cli`], [`commands`]: the `lvf` binary surface

pub mod cache;
pub mod classify;
pub mod cli;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod error;
pub mod ids;
pub mod layout;
pub mod orchestrator;
pub mod parser;
pub mod record;
pub mod state;
pub mod templates;

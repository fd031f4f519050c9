//! # nspc-core
//!
//! Backend engine for the N-SPC pattern editor: engine config loading,
//! the binary ARAM parser, the pattern flattener, the structural editor,
//! the undo/redo command layer, the compiler, the project-file overlay
//! persistence, the round-trip verifier, and the pattern editor UI driver —
//! independent of any host UI or audio toolkit.
//!
//! ## Module overview
//!
//! - [`config`] — loads [`nspc_types::EngineConfig`] documents (embedded
//!   defaults + user overrides) the way a host discovers which engine
//!   variant a song belongs to.
//! - [`parser`] — decodes an SPC file's ARAM payload into a [`nspc_types::Project`].
//! - [`flatten`] — expands a pattern's tracks into tick-indexed per-channel streams.
//! - [`editor`] — structural mutations on a song (row events, ticks, effects, subroutines).
//! - [`command`] / [`history`] — undoable commands wrapping editor operations.
//! - [`optimizer`] — subroutine deduplication pass used by the compiler.
//! - [`compiler`] — plans ARAM layout and emits upload chunks from a song.
//! - [`project_file`] — persists user-owned deltas as a structured document.
//! - [`verify`] — compiles, reparses, and compares a song for self-consistency.
//! - [`ui_driver`] — stateful cursor/selection/clipboard bridge to a host UI.
//! - [`playback_tracking`] — atomic indicator state shared with an audio thread.

pub mod command;
pub mod compiler;
pub mod config;
pub mod editor;
pub mod flatten;
pub mod history;
pub mod optimizer;
pub mod parser;
pub mod playback_tracking;
pub mod project_file;
pub mod ui_driver;
pub mod verify;

//! Xnix init: the boot-time service graph.
//!
//! Init loads a declarative INI configuration describing services, the
//! handles they exchange and their permission profiles; resolves endpoint
//! discovery (`provides`/`requires`/`wants`); topologically sorts the
//! dependency graph; and then runs a 50 ms state machine that spawns
//! services as their conditions come true, tracks readiness reports,
//! probes and mounts filesystem services, propagates failures and
//! respawns crashed services.
//!
//! Every effect goes through the [`sys::Sys`] trait, so the whole graph
//! logic runs and is tested off-target; the kernel-backed implementation
//! is the thin syscall veneer in `sys::kernel`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod graph;
pub mod handles;
pub mod ini;
pub mod notify;
pub mod runtime;
pub mod sys;

pub use config::{HandleDef, HandleKind, Profile, ServiceConfig, ServiceSet, StartMode};
pub use graph::{Graph, GraphError};
pub use runtime::{Manager, SvcState};
pub use sys::Sys;

//! `omnia-worker` — the Omnia eval worker.
//!
//! The worker consumes session events from a stream broker through a
//! consumer group, evaluates the affected conversations against the eval
//! definitions of the agent's prompt pack, and persists pass/fail/score
//! results to the session service.
//!
//! The core loop lives in [`worker`]; everything else here is state the
//! worker exclusively owns: deterministic sampling ([`sampler`]), rate
//! limiting ([`rate_limit`]), budget accounting ([`budget`]), session
//! completion detection ([`completion`]), pass-rate alerting
//! ([`webhook`]), and Prometheus metrics ([`metrics`], [`server`]).

pub mod broker;
pub mod budget;
pub mod cli;
pub mod completion;
pub mod metrics;
pub mod rate_limit;
pub mod sampler;
pub mod server;
pub mod webhook;
pub mod worker;

pub use worker::{EvalWorker, WorkerHandles};

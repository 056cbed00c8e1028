//! The RPL engine: a single task that owns every mutable cache (DODAGs,
//! neighbors, downward/FIB routes) and the timer wheel driving Trickle, the
//! DAO-delay timer and DAO-ACK retransmission.
//!
//! Grounded on `original_source/RPL/core.py`'s `process_loop`/`handleMessage`
//! dispatch-by-message-name shape and on `hr-dhcp`'s single-task state
//! machine (`hr-dhcp/src/state_machine.rs`, `hr-dhcp/src/server.rs`): one
//! recv loop feeding a handler, `tracing` at matching granularity. Per
//! SPEC_FULL §5 nothing outside this task ever mutates a cache; interface
//! receiver tasks and the CLI are producers only.

mod adapters;
mod cli;
mod dispatch;
mod engine;
mod parent_selection;
mod timer;

pub use adapters::{AddressAdapter, InMemoryAddressAdapter, LinkAdapter, LinkSender, NoopLinkAdapter, NoopLinkSender};
pub use engine::{CliRequest, Engine, EngineConfig, Frame};
pub use timer::{TimerEvent, TimerWheel};

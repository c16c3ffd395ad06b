//! # IMC Core Library
//!
//! Driver and supervisor for the IMC, the microcontroller that switches power to the
//! payload devices (companion computer, secondary controller, water-quality monitor,
//! ambient-light sensor) and streams their power telemetry over a serial link.
//!
//! ## Crate Structure
//!
//! Leaf to root:
//!
//! - **`transport`**: the half-duplex serial link. One port session per exchange or read;
//!   an empty read is the stall signal. `transport::mock` is a scripted link for tests.
//! - **`protocol`**: `ImcCommander`, semantic operations (set/cycle/toggle a channel,
//!   select telemetry mode, payload on/off) as ordered command sequences.
//! - **`telemetry`**: tolerant parsing of one status line into channel records plus the
//!   shared ambient reading, and dispatch to the power and ambient streams.
//! - **`session`**: the sampling state machine and its bounded restart-on-stall loop.
//! - **`payload`**: the peer instrument worker.
//! - **`supervisor`**: `CoreSupervisor`, which runs both workers concurrently and aggregates
//!   their outcomes.
//!
//! Supporting modules:
//!
//! - **`channel`**: channel ids and the channel → device table.
//! - **`config`**: construction-time configuration loaded with `figment`.
//! - **`error`**: the `ImcError` enum shared by every layer.
//! - **`logging`**: append-only log streams (file and in-memory) and the control log.
//! - **`tracing_init`**: console diagnostics via `tracing-subscriber`.
//! - **`clock`** / **`shutdown`** / **`worker`**: injectable sleeping, the cooperative
//!   shutdown signal, and the worker interface the supervisor drives.

pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod telemetry;
pub mod tracing_init;
pub mod transport;
pub mod worker;

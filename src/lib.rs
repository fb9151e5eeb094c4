//! # Mocap Console Library
//!
//! Operator console for a multi-camera motion capture rig. The console talks to a
//! sensing service that runs the cameras and the solvers; this crate owns the
//! operator side of that conversation.
//!
//! ## Crate Structure
//!
//! - **`console`**: the [`Console`](console::Console) coordinator task and its
//!   [`ConsoleHandle`](console::ConsoleHandle). All console state lives here.
//! - **`messages`**: commands accepted by the coordinator, with oneshot replies.
//! - **`mode`**: the ranked operating mode, transition table and feature gating.
//! - **`capture`**: the arm/capture/submit protocol shared by the pose, scale,
//!   floor alignment and origin procedures.
//! - **`session`**: recording detection events into an in-memory session.
//! - **`archive`**: exporting a session and a calibration snapshot as a zip archive.
//! - **`calibration`**: the calibration configuration, its durable store and the
//!   merge rules with the service.
//! - **`protocol`**: wire types exchanged with the sensing service.
//! - **`transport`**: the reconnecting newline-delimited JSON link.
//! - **`events`**: operator notices and the event hub front ends subscribe to.
//! - **`operator`**: parsing of typed operator commands.
//! - **`config`** / **`tracing_setup`**: layered configuration and logging.
//! - **`error`**: the [`ConsoleError`](error::ConsoleError) enum.

pub mod archive;
pub mod calibration;
pub mod capture;
pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod events;
pub mod messages;
pub mod mode;
pub mod operator;
pub mod protocol;
pub mod session;
pub mod tracing_setup;
pub mod transport;

pub use console::{Console, ConsoleHandle};
pub use error::{ConsoleError, ConsoleResult};

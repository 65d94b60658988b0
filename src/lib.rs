//! # Flight Controller Self-Check
//!
//! An on-board diagnostic harness for a flight-control companion computer. It runs a
//! fixed sequence of independent probes against the flight control unit (FCU), reached
//! through a MAVLink telemetry link, and against the local host, and reports a
//! pass / findings / errored outcome for every probe.
//!
//! ## Features
//!
//! - **Isolated probes**: every probe runs in its own task; errors, panics and
//!   overruns are contained and reported, never propagated
//! - **FCU shell bridge**: synchronous "run this command on the FCU console" over
//!   asynchronous SERIAL_CONTROL frames, framed by the console prompt
//! - **Parameter reads**: PARAM_REQUEST_READ / PARAM_VALUE with failure classification
//! - **Telemetry watches**: wait for the next message of a given type with a timeout
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use flightcheck::config::HarnessConfig;
//! use flightcheck::probes::{self, ProbeEnv};
//! use flightcheck::runner::ProbeRunner;
//! use flightcheck::transport::UdpTransport;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::default();
//! let transport = UdpTransport::bind(&config.link).await?;
//! let env = Arc::new(ProbeEnv::over_mavlink(config.clone(), transport));
//!
//! let runner = ProbeRunner::new(config.run.probe_deadline());
//! let reports = runner.run(env, &probes::default_probes()).await;
//! println!("{} probes ran", reports.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`frame`] - MAVLink wire framing and CRC
//! - [`messages`] - Typed payloads for the messages the probes use
//! - [`transport`] - Link abstraction, UDP and in-process loopback links
//! - [`bridge`] - FCU console command bridge
//! - [`params`] - FCU parameter reads
//! - [`watch`] - Waiting for telemetry messages
//! - [`diagnostics`] - Per-probe findings context
//! - [`runner`] - Isolated sequential probe execution
//! - [`host`] - Local host inspection helpers
//! - [`probes`] - The concrete probe set

// Not `deny(warnings)`: a new toolchain lint must not break a field build.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod frame;
pub mod host;
pub mod logging;
pub mod messages;
pub mod params;
pub mod probes;
pub mod runner;
pub mod transport;
pub mod watch;

use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future used at the trait seams that cannot name their futures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Re-export main public types for convenience
pub use bridge::CommandBridge;
pub use diagnostics::DiagnosticContext;
pub use params::{ParamValue, ParameterAccessor};
pub use runner::{Probe, ProbeOutcome, ProbeReport, ProbeRunner};
pub use transport::{Frame, TransportAdapter};

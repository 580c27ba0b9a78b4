//! `motive-runtime` – The Control Cycle
//!
//! Ties the wire, the arbiter and the event bus together into a fixed-period
//! loop that owns the controller link.
//!
//! # Modules
//!
//! - [`robot`] – [`Robot`] and [`RobotGuard`]: the single lock around all
//!   state shared between the cycle thread and foreground threads.
//! - [`cycle`] – [`ControlCycle`]: receive, arbitrate, send, publish; run
//!   inline, once, or on a background thread behind a [`CycleHandle`].
//! - [`reflector`] – [`StateReflector`][reflector::StateReflector]: sends
//!   outputs only when they change or go stale, applying limits at send
//!   time.
//! - [`telemetry`] – [`init_tracing`]: console logging plus optional OTLP
//!   span export.
//!
//! # Example
//!
//! ```rust
//! use motive_hal::SimRobot;
//! use motive_kernel::stock::ConstantVelocity;
//! use motive_protocol::HandshakeConfig;
//! use motive_runtime::{ControlCycle, CycleConfig, CycleExit};
//!
//! let mut cycle = ControlCycle::new(Box::new(SimRobot::new()), CycleConfig::default())?;
//! cycle.connect(&HandshakeConfig::default())?;
//! cycle.robot().lock().attach(Box::new(ConstantVelocity::new(250.0)), 10);
//!
//! let handle = cycle.spawn()?;
//! handle.stop();
//! assert_eq!(handle.wait_for_exit(), CycleExit::Stopped);
//! # Ok::<(), motive_types::MotiveError>(())
//! ```

pub mod cycle;
pub mod reflector;
pub mod robot;
pub mod telemetry;

pub use cycle::{ControlCycle, CycleConfig, CycleExit, CycleHandle};
pub use robot::{CycleStats, Refiner, Robot, RobotCore, RobotGuard};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};

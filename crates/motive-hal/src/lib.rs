//! `motive-hal` – Controller Links
//!
//! Concrete [`Transport`][motive_protocol::Transport] implementations that
//! carry the framed protocol to a motor controller.
//!
//! # Modules
//!
//! - [`serial`] – [`SerialTransport`]: the controller's native serial line.
//! - [`tcp`] – [`TcpTransport`]: a TCP client for serial-to-Ethernet
//!   bridges and networked simulators.
//! - [`replay`] – [`ReplayTransport`]: plays a hex log back one record per
//!   read.
//! - [`sim`] – [`SimRobot`]: an in-process controller for headless tests.
//! - [`link`] – [`TransportSpec`] and [`open_transport`], selecting one of
//!   the above from configuration.

pub mod link;
pub mod replay;
pub mod serial;
pub mod sim;
pub mod tcp;

pub use link::{TransportSpec, open_transport};
pub use replay::ReplayTransport;
pub use serial::SerialTransport;
pub use sim::SimRobot;
pub use tcp::TcpTransport;

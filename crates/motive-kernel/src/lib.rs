//! `motive-kernel` – Arbitration
//!
//! Decides what the robot should do this cycle.  It never touches the wire;
//! it turns behaviors and telemetry into one
//! [`ResolvedCommand`][motive_types::ResolvedCommand].
//!
//! # Modules
//!
//! - [`behavior`] – the [`Behavior`] trait and the [`BehaviorRegistry`]
//!   that owns priorities and activation flags.
//! - [`arbiter`] – [`PriorityArbiter`]: merges active requests in
//!   descending priority, blending directives and tightening limits.
//! - [`ranges`] – [`ChannelRanges`]: physical bounds that out-of-range
//!   proposals are clamped to.
//! - [`watchdog`] – [`ConnectionWatchdog`]: reports when the controller link
//!   goes silent and when it comes back.
//! - [`stock`] – small ready-made behaviors.

pub mod arbiter;
pub mod behavior;
pub mod ranges;
pub mod stock;
pub mod watchdog;

pub use arbiter::{Arbitration, BehaviorFault, BlendMode, PriorityArbiter};
pub use behavior::{Behavior, BehaviorId, BehaviorInfo, BehaviorRegistry};
pub use ranges::ChannelRanges;
pub use watchdog::{ConnectionWatchdog, LinkHealth, LinkTransition};

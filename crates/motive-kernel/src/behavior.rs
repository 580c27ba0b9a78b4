//! The [`Behavior`] contract and the [`BehaviorRegistry`] that owns
//! behaviors, their priorities and their activation flags.
//!
//! Priority and activation belong to the registry entry, not to the
//! behavior: a behavior only knows how to react to the world.  Entries are
//! kept in evaluation order (descending priority, then attachment order), so
//! the arbiter can walk them front to back.

use std::fmt;

use motive_types::{MotionRequest, ResolvedCommand, Telemetry};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A unit of motion logic, evaluated once per control cycle.
///
/// Behaviors never see the transport; everything they want the robot to do
/// goes through the returned [`MotionRequest`].
///
/// # Cooperative deference
///
/// `resolved` is the accumulator merged from every strictly higher-priority
/// behavior this cycle.  A behavior that only wants to act when nobody more
/// important has claimed a channel can check
/// [`ResolvedCommand::commitment`] and stay silent.  Nothing enforces this;
/// it is a convention between behaviors.
pub trait Behavior: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Runs when the behavior goes from inactive to active.
    fn on_activate(&mut self) {}

    /// Runs when the behavior goes from active to inactive, or is detached
    /// while active.
    fn on_deactivate(&mut self) {}

    /// Propose motion for this cycle, or `None` to sit this cycle out.
    fn produce_request(
        &mut self,
        resolved: &ResolvedCommand,
        telemetry: &Telemetry,
    ) -> Option<MotionRequest>;
}

/// Handle returned by [`BehaviorRegistry::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BehaviorId(u64);

impl fmt::Display for BehaviorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "behavior#{}", self.0)
    }
}

/// Read-only view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorInfo {
    pub id: BehaviorId,
    pub name: String,
    pub description: String,
    pub priority: i32,
    pub active: bool,
}

pub(crate) struct Entry {
    pub(crate) id: BehaviorId,
    pub(crate) priority: i32,
    pub(crate) active: bool,
    /// `true` while the behavior keeps faulting on consecutive cycles.
    pub(crate) faulting: bool,
    pub(crate) behavior: Box<dyn Behavior>,
}

/// Owns every attached behavior.
///
/// # Example
///
/// ```
/// use motive_kernel::behavior::BehaviorRegistry;
/// use motive_kernel::stock::{ConstantVelocity, Stop};
///
/// let mut registry = BehaviorRegistry::new(true);
/// let cruise = registry.attach(Box::new(ConstantVelocity::new(300.0)), 10);
/// let stop = registry.attach_with(Box::new(Stop::new()), 100, false);
///
/// assert_eq!(registry.is_active(cruise), Some(true));
/// assert_eq!(registry.is_active(stop), Some(false));
/// // Higher priority first.
/// assert_eq!(registry.infos()[0].id, stop);
/// ```
pub struct BehaviorRegistry {
    entries: Vec<Entry>,
    next_id: u64,
    default_active: bool,
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BehaviorRegistry {
    /// Create an empty registry.  `default_active` is the activation state
    /// given to behaviors attached with [`attach`][Self::attach].
    pub fn new(default_active: bool) -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
            default_active,
        }
    }

    pub fn default_active(&self) -> bool {
        self.default_active
    }

    pub fn set_default_active(&mut self, active: bool) {
        self.default_active = active;
    }

    /// Attach with the registry's default activation state.
    pub fn attach(&mut self, behavior: Box<dyn Behavior>, priority: i32) -> BehaviorId {
        let active = self.default_active;
        self.attach_with(behavior, priority, active)
    }

    /// Attach with an explicit activation state.  Attaching active counts as
    /// an activation and runs [`Behavior::on_activate`].
    pub fn attach_with(
        &mut self,
        mut behavior: Box<dyn Behavior>,
        priority: i32,
        active: bool,
    ) -> BehaviorId {
        let id = BehaviorId(self.next_id);
        self.next_id += 1;
        if active {
            behavior.on_activate();
        }
        debug!(%id, name = behavior.name(), priority, active, "behavior attached");
        let entry = Entry {
            id,
            priority,
            active,
            faulting: false,
            behavior,
        };
        // After every entry of equal or higher priority: ties keep
        // attachment order.
        let at = self.entries.partition_point(|e| e.priority >= priority);
        self.entries.insert(at, entry);
        id
    }

    /// Remove a behavior and hand it back.  An active behavior is
    /// deactivated first.
    pub fn detach(&mut self, id: BehaviorId) -> Option<Box<dyn Behavior>> {
        let pos = self.position(id)?;
        let mut entry = self.entries.remove(pos);
        if entry.active {
            entry.behavior.on_deactivate();
        }
        debug!(%id, name = entry.behavior.name(), "behavior detached");
        Some(entry.behavior)
    }

    /// Activate `id`.  Returns `true` if this changed its state; activating
    /// an active (or unknown) behavior does nothing.
    pub fn activate(&mut self, id: BehaviorId) -> bool {
        self.set_active(id, true)
    }

    /// Deactivate `id`.  Returns `true` if this changed its state.
    pub fn deactivate(&mut self, id: BehaviorId) -> bool {
        self.set_active(id, false)
    }

    fn set_active(&mut self, id: BehaviorId, active: bool) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        if entry.active == active {
            return false;
        }
        entry.active = active;
        entry.faulting = false;
        if active {
            entry.behavior.on_activate();
        } else {
            entry.behavior.on_deactivate();
        }
        debug!(%id, name = entry.behavior.name(), active, "behavior activation changed");
        true
    }

    /// Move `id` to a new priority.  It goes behind existing entries of the
    /// same priority.
    pub fn set_priority(&mut self, id: BehaviorId, priority: i32) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        let mut entry = self.entries.remove(pos);
        entry.priority = priority;
        let at = self.entries.partition_point(|e| e.priority >= priority);
        self.entries.insert(at, entry);
        true
    }

    pub fn is_active(&self, id: BehaviorId) -> Option<bool> {
        self.entry(id).map(|e| e.active)
    }

    pub fn priority(&self, id: BehaviorId) -> Option<i32> {
        self.entry(id).map(|e| e.priority)
    }

    /// First behavior attached under `name`, in evaluation order.
    pub fn find(&self, name: &str) -> Option<BehaviorId> {
        self.entries
            .iter()
            .find(|e| e.behavior.name() == name)
            .map(|e| e.id)
    }

    /// Entries in evaluation order.
    pub fn infos(&self) -> Vec<BehaviorInfo> {
        self.entries
            .iter()
            .map(|e| BehaviorInfo {
                id: e.id,
                name: e.behavior.name().to_string(),
                description: e.behavior.description().to_string(),
                priority: e.priority,
                active: e.active,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.active).count()
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    fn entry(&self, id: BehaviorId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn position(&self, id: BehaviorId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("entries", &self.infos())
            .field("default_active", &self.default_active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts hook invocations.
    struct Hooked {
        name: &'static str,
        activations: Arc<AtomicUsize>,
        deactivations: Arc<AtomicUsize>,
    }

    impl Hooked {
        fn boxed(name: &'static str) -> (Box<Self>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let on = Arc::new(AtomicUsize::new(0));
            let off = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    name,
                    activations: on.clone(),
                    deactivations: off.clone(),
                }),
                on,
                off,
            )
        }
    }

    impl Behavior for Hooked {
        fn name(&self) -> &str {
            self.name
        }
        fn on_activate(&mut self) {
            self.activations.fetch_add(1, Ordering::SeqCst);
        }
        fn on_deactivate(&mut self) {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
        }
        fn produce_request(&mut self, _: &ResolvedCommand, _: &Telemetry) -> Option<MotionRequest> {
            None
        }
    }

    #[test]
    fn entries_are_ordered_by_priority_then_attachment() {
        let mut reg = BehaviorRegistry::new(true);
        let low = reg.attach(Hooked::boxed("low").0, 1);
        let high = reg.attach(Hooked::boxed("high").0, 50);
        let tie_a = reg.attach(Hooked::boxed("tie_a").0, 10);
        let tie_b = reg.attach(Hooked::boxed("tie_b").0, 10);
        let order: Vec<BehaviorId> = reg.infos().iter().map(|i| i.id).collect();
        assert_eq!(order, vec![high, tie_a, tie_b, low]);
    }

    #[test]
    fn activation_hooks_run_only_on_transitions() {
        let mut reg = BehaviorRegistry::new(false);
        let (b, on, off) = Hooked::boxed("hooked");
        let id = reg.attach(b, 5);
        assert_eq!(reg.is_active(id), Some(false));
        assert_eq!(on.load(Ordering::SeqCst), 0);

        assert!(reg.activate(id));
        assert!(!reg.activate(id));
        assert_eq!(on.load(Ordering::SeqCst), 1);

        assert!(reg.deactivate(id));
        assert!(!reg.deactivate(id));
        assert_eq!(off.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attaching_active_runs_on_activate() {
        let mut reg = BehaviorRegistry::new(true);
        let (b, on, _) = Hooked::boxed("hooked");
        reg.attach(b, 0);
        assert_eq!(on.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detach_returns_ownership_and_deactivates() {
        let mut reg = BehaviorRegistry::new(true);
        let (b, _, off) = Hooked::boxed("hooked");
        let id = reg.attach(b, 0);
        let back = reg.detach(id).expect("attached behavior");
        assert_eq!(back.name(), "hooked");
        assert_eq!(off.load(Ordering::SeqCst), 1);
        assert!(reg.is_empty());
        assert!(reg.detach(id).is_none());
        assert!(!reg.activate(id));
    }

    #[test]
    fn set_priority_reorders() {
        let mut reg = BehaviorRegistry::new(true);
        let a = reg.attach(Hooked::boxed("a").0, 10);
        let b = reg.attach(Hooked::boxed("b").0, 5);
        assert!(reg.set_priority(b, 20));
        assert_eq!(reg.infos()[0].id, b);
        assert_eq!(reg.priority(a), Some(10));
        assert_eq!(reg.find("a"), Some(a));
        assert_eq!(reg.active_count(), 2);
    }
}

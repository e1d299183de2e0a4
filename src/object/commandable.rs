//! Commandable Point Engine
//!
//! One generic engine implements the BACnet commandable-value model for every
//! commandable numeric object type: the 16-slot priority array, the derived
//! present value, relinquish default, change-of-value detection, resolution
//! quantization and the out-of-service decoupling semantics. Concrete object
//! types (Analog Output, Analog Value) are thin [`PointKind`] configurations
//! of this engine; see the `analog` module.
//!
//! The engine is single-threaded by design: all mutation happens on the
//! thread that processes incoming protocol requests, and callers serialize
//! access externally if multiple threads service requests.

use std::collections::BTreeMap;

use crate::object::event::IntrinsicReporting;
use crate::object::{
    DatabaseHooks, EngineeringUnits, EventState, NullHooks, ObjectError, ObjectIdentifier,
    ObjectType, Reliability, Result, StatusFlags, MAX_INSTANCE,
};

/// BACnet priority level reserved for minimum on/off; external writes at
/// this level are rejected.
pub const PRIORITY_MINIMUM_ON_OFF: u8 = 6;

/// Default priority used when a write carries no priority of its own.
pub const PRIORITY_DEFAULT: u8 = 16;

/// Type descriptor configuring the engine for a concrete object type.
#[derive(Debug, Clone, Copy)]
pub struct PointKind {
    /// BACnet object type of the points in the store
    pub object_type: ObjectType,
    /// Default object-name prefix ("AO", "AV")
    pub name_prefix: &'static str,
    /// Default minimum present value accepted on writes
    pub default_min: f32,
    /// Default maximum present value accepted on writes
    pub default_max: f32,
    /// Default engineering units
    pub default_units: EngineeringUnits,
    /// True when writes drive a physical output through the write-notify hook
    pub physical_output: bool,
}

/// Injected capability invoked after a successful present-value write.
///
/// This is the hook to the physical or simulated output. It runs inline
/// with protocol-response generation and must not block indefinitely.
/// It is deliberately skipped while the object is out of service.
pub trait WriteNotify {
    fn present_value_written(&self, instance: u32, old_value: f32, new_value: f32);
}

/// Quantize `value` to the nearest multiple of `resolution`.
///
/// Works for fractional resolutions as well (0.5 snaps to halves).
/// A zero, negative or non-finite resolution leaves the value untouched.
/// Quantization happens before range checks and before COV comparison so
/// that two writes quantizing to the same value cannot trigger spurious
/// change notifications.
pub fn limit_value_by_resolution(value: f32, resolution: f32) -> f32 {
    if resolution <= 0.0 || !resolution.is_finite() || !value.is_finite() {
        return value;
    }
    (value / resolution).round() * resolution
}

/// A single commandable point: priority array plus derived state.
///
/// The present value is never stored; it is always derived from the
/// priority array and the relinquish default, so there is exactly one
/// source of truth.
#[derive(Debug, Clone)]
pub struct CommandablePoint {
    instance: u32,
    object_name: String,
    /// Free-form description seeded from configuration
    pub description: String,
    priority_array: [Option<f32>; 16],
    /// Fallback value used when all 16 slots are relinquished
    pub relinquish_default: f32,
    pub min_pres_value: f32,
    pub max_pres_value: f32,
    /// Write quantization step; 0.0 disables quantization
    pub resolution: f32,
    pub cov_increment: f32,
    prior_value: f32,
    changed: bool,
    pub out_of_service: bool,
    pub overridden: bool,
    pub reliability: Reliability,
    pub event_state: EventState,
    pub units: EngineeringUnits,
    /// Intrinsic-reporting capability, present when the point is alarmed
    pub event: Option<IntrinsicReporting>,
}

impl CommandablePoint {
    fn new(kind: &PointKind, instance: u32) -> Self {
        Self {
            instance,
            object_name: format!("{} {}", kind.name_prefix, instance),
            description: String::new(),
            priority_array: [None; 16],
            relinquish_default: 0.0,
            min_pres_value: kind.default_min,
            max_pres_value: kind.default_max,
            resolution: 0.0,
            cov_increment: 1.0,
            prior_value: 0.0,
            changed: false,
            out_of_service: false,
            overridden: false,
            reliability: Reliability::NoFaultDetected,
            event_state: EventState::Normal,
            units: kind.default_units,
            event: None,
        }
    }

    /// Instance number (immutable after creation)
    pub fn instance(&self) -> u32 {
        self.instance
    }

    /// Object name
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Derived present value: the value at the lowest-indexed
    /// non-relinquished slot, else the relinquish default. O(16) per read;
    /// deliberately uncached.
    pub fn present_value(&self) -> f32 {
        self.priority_array
            .iter()
            .flatten()
            .next()
            .copied()
            .unwrap_or(self.relinquish_default)
    }

    /// Active command priority (1-16), or `None` when all slots are
    /// relinquished.
    pub fn current_command_priority(&self) -> Option<u8> {
        self.priority_array
            .iter()
            .position(|slot| slot.is_some())
            .map(|i| (i + 1) as u8)
    }

    /// Raw slot access for the priority-array property encoding.
    pub fn priority_slot(&self, priority: u8) -> Option<f32> {
        debug_assert!((1..=16).contains(&priority));
        self.priority_array[(priority - 1) as usize]
    }

    fn set_slot(&mut self, priority: u8, value: Option<f32>) {
        self.priority_array[(priority - 1) as usize] = value;
    }

    /// COV detection against the derived present value. The `changed` flag
    /// is sticky until the subscription layer clears it.
    fn detect_cov(&mut self) {
        let value = self.present_value();
        if (value - self.prior_value).abs() >= self.cov_increment {
            self.prior_value = value;
            self.changed = true;
        }
    }

    /// Sticky change-of-value flag
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Cleared by the COV-subscription layer once subscribers are notified.
    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    /// Status flags in protocol order.
    pub fn status_flags(&self) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        if self.event_state != EventState::Normal {
            flags |= StatusFlags::IN_ALARM;
        }
        if self.reliability != Reliability::NoFaultDetected {
            flags |= StatusFlags::FAULT;
        }
        if self.overridden {
            flags |= StatusFlags::OVERRIDDEN;
        }
        if self.out_of_service {
            flags |= StatusFlags::OUT_OF_SERVICE;
        }
        flags
    }
}

/// Per-object-type table of commandable points keyed by instance number.
pub struct CommandableStore {
    kind: &'static PointKind,
    points: BTreeMap<u32, CommandablePoint>,
    write_notify: Option<Box<dyn WriteNotify>>,
    hooks: Box<dyn DatabaseHooks>,
}

impl CommandableStore {
    /// Create an empty store for the given object type.
    pub fn new(kind: &'static PointKind) -> Self {
        Self {
            kind,
            points: BTreeMap::new(),
            write_notify: None,
            hooks: Box::new(NullHooks),
        }
    }

    /// Install the device-wide database hooks (revision counter, name
    /// registry).
    pub fn set_hooks(&mut self, hooks: Box<dyn DatabaseHooks>) {
        self.hooks = hooks;
    }

    /// Register the present-value-write callback.
    pub fn set_write_notify(&mut self, notify: Box<dyn WriteNotify>) {
        self.write_notify = Some(notify);
    }

    /// Object type served by this store
    pub fn object_type(&self) -> ObjectType {
        self.kind.object_type
    }

    /// Object identifier for an instance of this store's type.
    pub fn object_id(&self, instance: u32) -> ObjectIdentifier {
        ObjectIdentifier::new(self.kind.object_type, instance)
    }

    /// Create a new point with all priorities relinquished.
    pub fn create(&mut self, instance: u32) -> Result<()> {
        if instance > MAX_INSTANCE {
            return Err(ObjectError::UnknownObject);
        }
        if self.points.contains_key(&instance) {
            return Err(ObjectError::DuplicateObjectId);
        }
        self.points
            .insert(instance, CommandablePoint::new(self.kind, instance));
        self.hooks.increment_revision();
        Ok(())
    }

    /// Create a point at the lowest unused instance number and return it.
    pub fn create_next(&mut self) -> Result<u32> {
        let mut instance = 0;
        for &used in self.points.keys() {
            if used != instance {
                break;
            }
            instance += 1;
        }
        self.create(instance)?;
        Ok(instance)
    }

    /// Delete a point; fails if the instance does not exist.
    pub fn delete(&mut self, instance: u32) -> Result<()> {
        if self.points.remove(&instance).is_none() {
            return Err(ObjectError::UnknownObject);
        }
        self.hooks.increment_revision();
        Ok(())
    }

    /// Drain and deallocate every point of this type.
    pub fn cleanup(&mut self) {
        if !self.points.is_empty() {
            self.points.clear();
            self.hooks.increment_revision();
        }
    }

    /// Number of points in the store
    pub fn count(&self) -> usize {
        self.points.len()
    }

    /// Instance number at iteration position `index`
    pub fn index_to_instance(&self, index: usize) -> Option<u32> {
        self.points.keys().nth(index).copied()
    }

    /// Iteration position of `instance`
    pub fn instance_to_index(&self, instance: u32) -> Option<usize> {
        self.points.keys().position(|&i| i == instance)
    }

    /// True if the instance exists
    pub fn valid_instance(&self, instance: u32) -> bool {
        self.points.contains_key(&instance)
    }

    /// Borrow a point
    pub fn point(&self, instance: u32) -> Option<&CommandablePoint> {
        self.points.get(&instance)
    }

    /// Mutably borrow a point
    pub fn point_mut(&mut self, instance: u32) -> Option<&mut CommandablePoint> {
        self.points.get_mut(&instance)
    }

    /// Derived present value for an instance
    pub fn present_value(&self, instance: u32) -> Option<f32> {
        self.points.get(&instance).map(|p| p.present_value())
    }

    /// Active command priority for an instance
    pub fn current_command_priority(&self, instance: u32) -> Option<u8> {
        self.points
            .get(&instance)
            .and_then(|p| p.current_command_priority())
    }

    /// Internal priority-slot write. COV detection runs against the newly
    /// derived present value, not the raw written value, so multi-slot
    /// interactions are reflected correctly.
    pub fn present_value_set(&mut self, instance: u32, value: f32, priority: u8) -> Result<()> {
        if !(1..=16).contains(&priority) {
            return Err(ObjectError::ValueOutOfRange);
        }
        let point = self
            .points
            .get_mut(&instance)
            .ok_or(ObjectError::UnknownObject)?;
        point.set_slot(priority, Some(value));
        point.detect_cov();
        Ok(())
    }

    /// Internal relinquish of a priority slot.
    pub fn present_value_relinquish(&mut self, instance: u32, priority: u8) -> Result<()> {
        if !(1..=16).contains(&priority) {
            return Err(ObjectError::ValueOutOfRange);
        }
        let point = self
            .points
            .get_mut(&instance)
            .ok_or(ObjectError::UnknownObject)?;
        point.set_slot(priority, None);
        point.detect_cov();
        Ok(())
    }

    /// Externally-facing present-value write.
    ///
    /// Quantizes to the point's resolution, enforces the value range and
    /// the priority-6 protection. For physical-output kinds the write-notify
    /// hook is invoked with the old and new derived values unless the point
    /// is out of service; software points never touch the hook.
    pub fn write_present_value(&mut self, instance: u32, value: f32, priority: u8) -> Result<()> {
        if !(1..=16).contains(&priority) {
            return Err(ObjectError::ValueOutOfRange);
        }
        if priority == PRIORITY_MINIMUM_ON_OFF {
            return Err(ObjectError::WriteAccessDenied);
        }
        let point = self
            .points
            .get_mut(&instance)
            .ok_or(ObjectError::UnknownObject)?;
        let value = limit_value_by_resolution(value, point.resolution);
        if value < point.min_pres_value || value > point.max_pres_value {
            return Err(ObjectError::ValueOutOfRange);
        }
        let old_value = point.present_value();
        point.set_slot(priority, Some(value));
        point.detect_cov();
        let new_value = point.present_value();
        let out_of_service = point.out_of_service;
        if self.kind.physical_output && !out_of_service {
            if let Some(notify) = &self.write_notify {
                notify.present_value_written(instance, old_value, new_value);
            }
        }
        Ok(())
    }

    /// Externally-facing relinquish (a NULL write at `priority`).
    pub fn write_present_value_relinquish(&mut self, instance: u32, priority: u8) -> Result<()> {
        if !(1..=16).contains(&priority) {
            return Err(ObjectError::ValueOutOfRange);
        }
        if priority == PRIORITY_MINIMUM_ON_OFF {
            return Err(ObjectError::WriteAccessDenied);
        }
        let point = self
            .points
            .get_mut(&instance)
            .ok_or(ObjectError::UnknownObject)?;
        let old_value = point.present_value();
        point.set_slot(priority, None);
        point.detect_cov();
        let new_value = point.present_value();
        let out_of_service = point.out_of_service;
        if self.kind.physical_output && !out_of_service && old_value != new_value {
            if let Some(notify) = &self.write_notify {
                notify.present_value_written(instance, old_value, new_value);
            }
        }
        Ok(())
    }

    /// Rename a point, enforcing device-wide name uniqueness.
    pub fn set_object_name(&mut self, instance: u32, name: String) -> Result<()> {
        if name.is_empty() {
            return Err(ObjectError::ValueOutOfRange);
        }
        let in_use = self.hooks.name_in_use(&name)
            || self
                .points
                .values()
                .any(|p| p.instance != instance && p.object_name == name);
        if in_use {
            return Err(ObjectError::DuplicateName);
        }
        let point = self
            .points
            .get_mut(&instance)
            .ok_or(ObjectError::UnknownObject)?;
        point.object_name = name;
        self.hooks.increment_revision();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::analog::{AnalogOutputStore, AnalogValueStore};
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_priority_precedence() {
        let mut store = AnalogOutputStore::new();
        store.create(1).unwrap();

        store.present_value_set(1, 75.0, 8).unwrap();
        assert_eq!(store.present_value(1), Some(75.0));
        assert_eq!(store.current_command_priority(1), Some(8));

        store.present_value_set(1, 50.0, 3).unwrap();
        assert_eq!(store.present_value(1), Some(50.0));
        assert_eq!(store.current_command_priority(1), Some(3));

        store.present_value_relinquish(1, 3).unwrap();
        assert_eq!(store.present_value(1), Some(75.0));
        assert_eq!(store.current_command_priority(1), Some(8));

        store.present_value_relinquish(1, 8).unwrap();
        assert_eq!(store.present_value(1), Some(0.0));
        assert_eq!(store.current_command_priority(1), None);
    }

    #[test]
    fn test_relinquish_round_trip() {
        let mut store = AnalogValueStore::new();
        store.create(3).unwrap();
        store.present_value_set(3, 21.0, 12).unwrap();
        let before = store.present_value(3).unwrap();

        store.present_value_set(3, 99.0, 5).unwrap();
        store.present_value_relinquish(3, 5).unwrap();
        assert_eq!(store.present_value(3), Some(before));
    }

    #[test]
    fn test_priority_6_write_protected() {
        let mut store = AnalogOutputStore::new();
        store.create(1).unwrap();
        assert_eq!(
            store.write_present_value(1, 10.0, 6),
            Err(ObjectError::WriteAccessDenied)
        );
        assert_eq!(store.point(1).unwrap().priority_slot(6), None);
        // internal set at 6 remains possible (minimum on/off logic)
        store.present_value_set(1, 10.0, 6).unwrap();
        assert_eq!(store.present_value(1), Some(10.0));
    }

    #[test]
    fn test_write_range_check() {
        let mut store = AnalogOutputStore::new();
        store.create(1).unwrap();
        assert_eq!(
            store.write_present_value(1, 250.0, 8),
            Err(ObjectError::ValueOutOfRange)
        );
        assert_eq!(
            store.write_present_value(9, 50.0, 8),
            Err(ObjectError::UnknownObject)
        );
    }

    #[test]
    fn test_cov_trigger_is_sticky() {
        let mut store = AnalogValueStore::new();
        store.create(1).unwrap();
        {
            let point = store.point_mut(1).unwrap();
            point.cov_increment = 2.0;
        }

        store.present_value_set(1, 1.0, 8).unwrap();
        assert!(!store.point(1).unwrap().changed());

        store.present_value_set(1, 2.5, 8).unwrap();
        assert!(store.point(1).unwrap().changed());

        // repeated writes of the same value do not clear or re-trigger
        store.point_mut(1).unwrap().clear_changed();
        store.present_value_set(1, 2.5, 8).unwrap();
        assert!(!store.point(1).unwrap().changed());

        store.present_value_set(1, 5.0, 8).unwrap();
        assert!(store.point(1).unwrap().changed());
    }

    #[test]
    fn test_quantization_before_cov() {
        let mut store = AnalogValueStore::new();
        store.create(1).unwrap();
        {
            let point = store.point_mut(1).unwrap();
            point.resolution = 0.5;
            point.cov_increment = 0.1;
            point.max_pres_value = 100.0;
            point.min_pres_value = -100.0;
        }
        store.write_present_value(1, 10.2, 8).unwrap();
        assert_eq!(store.present_value(1), Some(10.0));
        store.point_mut(1).unwrap().clear_changed();

        // quantizes to the same 10.0, so no spurious change
        store.write_present_value(1, 9.8, 8).unwrap();
        assert_eq!(store.present_value(1), Some(10.0));
        assert!(!store.point(1).unwrap().changed());
    }

    struct Recorder(Rc<RefCell<Vec<(u32, f32, f32)>>>);

    impl WriteNotify for Recorder {
        fn present_value_written(&self, instance: u32, old_value: f32, new_value: f32) {
            self.0.borrow_mut().push((instance, old_value, new_value));
        }
    }

    #[test]
    fn test_write_notify_skipped_out_of_service() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut store = AnalogOutputStore::new();
        store.set_write_notify(Box::new(Recorder(Rc::clone(&calls))));
        store.create(1).unwrap();

        store.write_present_value(1, 42.5, 8).unwrap();
        assert_eq!(calls.borrow().as_slice(), &[(1, 0.0, 42.5)]);

        store.point_mut(1).unwrap().out_of_service = true;
        store.write_present_value(1, 60.0, 8).unwrap();
        // array updated, hook skipped
        assert_eq!(store.present_value(1), Some(60.0));
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_write_notify_only_for_physical_outputs() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut store = AnalogValueStore::new();
        store.set_write_notify(Box::new(Recorder(Rc::clone(&calls))));
        store.create(1).unwrap();

        store.write_present_value(1, 5.0, 8).unwrap();
        store.write_present_value_relinquish(1, 8).unwrap();
        // software points update normally but never drive the output hook
        assert_eq!(store.present_value(1), Some(0.0));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_create_next_and_index_maps() {
        let mut store = AnalogValueStore::new();
        store.create(0).unwrap();
        store.create(1).unwrap();
        store.create(5).unwrap();
        assert_eq!(store.create_next().unwrap(), 2);
        assert_eq!(store.count(), 4);
        assert_eq!(store.index_to_instance(3), Some(5));
        assert_eq!(store.instance_to_index(5), Some(3));
        assert!(store.valid_instance(2));
        assert!(!store.valid_instance(9));

        store.delete(2).unwrap();
        assert_eq!(store.count(), 3);
        store.cleanup();
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_duplicate_and_missing_instances() {
        let mut store = AnalogOutputStore::new();
        store.create(7).unwrap();
        assert_eq!(store.create(7), Err(ObjectError::DuplicateObjectId));
        assert_eq!(store.delete(8), Err(ObjectError::UnknownObject));
    }

    #[test]
    fn test_object_name_uniqueness() {
        let mut store = AnalogValueStore::new();
        store.create(1).unwrap();
        store.create(2).unwrap();
        store.set_object_name(1, "Setpoint".to_string()).unwrap();
        assert_eq!(
            store.set_object_name(2, "Setpoint".to_string()),
            Err(ObjectError::DuplicateName)
        );
    }

    proptest! {
        #[test]
        fn prop_quantization_idempotent(
            value in -1.0e4f32..1.0e4,
            resolution in 1.0e-2f32..1.0e2,
        ) {
            let once = limit_value_by_resolution(value, resolution);
            let twice = limit_value_by_resolution(once, resolution);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_present_value_is_lowest_active_slot(
            slots in proptest::collection::vec(proptest::option::of(-100.0f32..100.0), 16),
            relinquish_default in -100.0f32..100.0,
        ) {
            let mut store = AnalogValueStore::new();
            store.create(1).unwrap();
            store.point_mut(1).unwrap().relinquish_default = relinquish_default;
            for (i, slot) in slots.iter().enumerate() {
                if let Some(v) = slot {
                    store.present_value_set(1, *v, (i + 1) as u8).unwrap();
                }
            }
            let expected = slots
                .iter()
                .flatten()
                .next()
                .copied()
                .unwrap_or(relinquish_default);
            prop_assert_eq!(store.present_value(1), Some(expected));
        }
    }
}

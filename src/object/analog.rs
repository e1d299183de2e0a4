//! Analog Output and Analog Value objects
//!
//! Both types are thin configurations of the generic commandable-point
//! engine in [`commandable`](crate::object::commandable): an Analog Output
//! drives a physical output through the write-notify seam, an Analog Value
//! is a software point with a wide default range. All operations
//! (create/delete, index maps, prioritized writes, COV, intrinsic
//! reporting) come from [`CommandableStore`].

use std::ops::{Deref, DerefMut};

use crate::object::commandable::{CommandableStore, PointKind};
use crate::object::{EngineeringUnits, ObjectType};

static ANALOG_OUTPUT: PointKind = PointKind {
    object_type: ObjectType::AnalogOutput,
    name_prefix: "AO",
    default_min: 0.0,
    default_max: 100.0,
    default_units: EngineeringUnits::Percent,
    physical_output: true,
};

static ANALOG_VALUE: PointKind = PointKind {
    object_type: ObjectType::AnalogValue,
    name_prefix: "AV",
    default_min: -3.4e38,
    default_max: 3.4e38,
    default_units: EngineeringUnits::NoUnits,
    physical_output: false,
};

/// Store of Analog Output objects
pub struct AnalogOutputStore(CommandableStore);

impl AnalogOutputStore {
    pub fn new() -> Self {
        Self(CommandableStore::new(&ANALOG_OUTPUT))
    }
}

impl Default for AnalogOutputStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for AnalogOutputStore {
    type Target = CommandableStore;

    fn deref(&self) -> &CommandableStore {
        &self.0
    }
}

impl DerefMut for AnalogOutputStore {
    fn deref_mut(&mut self) -> &mut CommandableStore {
        &mut self.0
    }
}

/// Store of Analog Value objects
pub struct AnalogValueStore(CommandableStore);

impl AnalogValueStore {
    pub fn new() -> Self {
        Self(CommandableStore::new(&ANALOG_VALUE))
    }
}

impl Default for AnalogValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for AnalogValueStore {
    type Target = CommandableStore;

    fn deref(&self) -> &CommandableStore {
        &self.0
    }
}

impl DerefMut for AnalogValueStore {
    fn deref_mut(&mut self) -> &mut CommandableStore {
        &mut self.0
    }
}

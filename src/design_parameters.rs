//! Compile-time capacities and timing limits of the conversion scheduler.

/// Maximum number of ADC hardware units.
pub const MAX_UNITS: usize = 2;

/// Maximum number of configured conversion groups across all units.
pub const MAX_GROUPS: usize = 16;

/// Maximum number of entries in a unit's channel map.
pub const MAX_UNIT_CHANNELS: usize = 32;

/// Maximum number of channels in one group.
pub const MAX_GROUP_CHANNELS: usize = 32;

/// Conversion slots behind one PDB channel (an ADC sub-unit).
pub const SLOTS_PER_SUB_UNIT: usize = pdb::PRETRIGGERS;

/// Conversion slots (result registers) of one ADC unit.
///
/// A group with more channels than the unit's wired slot count is converted in
/// several batches.
pub const MAX_SLOTS: usize = pdb::CHANNELS * SLOTS_PER_SUB_UNIT;

/// Capacity of each of a unit's conversion queues. The configured depth may be
/// smaller.
pub const QUEUE_CAPACITY: usize = 8;

/// Number of polls of the DMA engine when aborting an in-flight transfer before
/// giving up.
pub const DMA_ABORT_TIMEOUT: u32 = 10_000;

/// Number of polls of the calibration status before giving up.
pub const CALIBRATION_TIMEOUT: u32 = 100_000;

/// Highest ADC input selection value. Input `0x3f` disables a slot.
pub const MAX_INPUT: u8 = 0x3e;

//! Static configuration tables.
//!
//! A [Config] is built (or deserialized) once before the driver is constructed
//! and is never modified afterwards. [Config::validate] rejects every
//! combination the scheduler cannot execute, so the completion paths never have
//! to handle a malformed group.
use fugit::NanosDurationU32;
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::design_parameters::{
    MAX_GROUPS, MAX_GROUP_CHANNELS, MAX_INPUT, MAX_SLOTS, MAX_UNITS,
    MAX_UNIT_CHANNELS, QUEUE_CAPACITY,
};
use crate::limit::Limit;

/// Index of a hardware unit in [Config::units].
pub type UnitId = usize;

/// Index of a conversion group in [Config::groups].
pub type GroupId = usize;

/// Group completion callback.
pub type Notification = fn(GroupId);

/// Unit error callback.
pub type UnitNotification = fn(UnitId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionMode {
    /// Results are read from the slot registers in the conversion-complete
    /// interrupt.
    Interrupt,
    /// Results are moved by the DMA engine, completion is signalled per block
    /// transfer.
    Dma,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionMode {
    OneShot,
    Continuous,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    Single,
    Streaming,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferMode {
    Linear,
    Circular,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    Software,
    Hardware,
}

/// An entry of a unit's channel map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// ADC input selection.
    pub input: u8,
    /// Threshold applied when the group has limit checking enabled.
    pub limit: Option<Limit>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Number of wired conversion slots used per batch.
    pub slots: usize,
    pub completion: CompletionMode,
    pub channels: Vec<ChannelConfig, MAX_UNIT_CHANNELS>,
    pub clock: pdb::ClockConfig,
    /// Hardware triggered groups get their own queue, served before software
    /// groups.
    pub hardware_priority: bool,
    /// Usable depth of each conversion queue.
    pub queue_depth: usize,
    /// DMA channel moving the results, required in [CompletionMode::Dma].
    pub dma_channel: Option<u8>,
    /// Hardware one-shot groups bypass the queues and stay armed after each
    /// conversion.
    pub optimize_oneshot_hw_trigger: bool,
    /// Called after recovery from a trigger sequence error.
    #[serde(skip)]
    pub error_notification: Option<UnitNotification>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupConfig {
    pub unit: UnitId,
    /// Indices into the unit's channel map, in conversion order.
    pub channels: Vec<u8, MAX_GROUP_CHANNELS>,
    pub mode: ConversionMode,
    pub access: AccessMode,
    pub buffer: BufferMode,
    pub trigger: TriggerKind,
    /// Trigger input selected for hardware triggered groups.
    pub hardware_source: pdb::TriggerSource,
    /// Samples per channel collected before the stream is complete.
    pub samples: usize,
    pub limit_check: bool,
    /// Delay of the first conversion of a batch in ns, later slots are chained
    /// back-to-back.
    pub base_delay: u32,
    /// Per-channel delays in ns. When non-empty, every slot fires on its own
    /// delay.
    pub distributed_delays: Vec<u32, MAX_GROUP_CHANNELS>,
    /// DMA destination alternates between two halves of the result buffer per
    /// stream.
    pub double_buffered: bool,
    #[serde(skip)]
    pub notification: Option<Notification>,
    /// Called after the last batch of a sample is converted, before the result
    /// index advances.
    #[serde(skip)]
    pub extra_notification: Option<Notification>,
}

impl GroupConfig {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of result words the group's buffer must hold.
    pub fn buffer_len(&self) -> usize {
        let len = self.channels.len() * self.samples;
        if self.double_buffered {
            2 * len
        } else {
            len
        }
    }

    /// Whether the group stops at the end of its stream.
    pub fn stops_on_stream_end(&self) -> bool {
        self.access == AccessMode::Streaming
            && self.buffer == BufferMode::Linear
            || self.mode == ConversionMode::OneShot
    }

    pub fn arm(&self) -> pdb::Arm {
        match self.trigger {
            TriggerKind::Software => pdb::Arm::Software,
            TriggerKind::Hardware => pdb::Arm::Hardware(self.hardware_source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("No conversion unit")]
    NoUnits,
    #[error("Unit {0}: {1}")]
    Unit(UnitId, &'static str),
    #[error("Group {0}: {1}")]
    Group(GroupId, &'static str),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub units: Vec<UnitConfig, MAX_UNITS>,
    pub groups: Vec<GroupConfig, MAX_GROUPS>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.units.is_empty() {
            return Err(ConfigError::NoUnits);
        }
        for (id, unit) in self.units.iter().enumerate() {
            validate_unit(id, unit)?;
        }
        for (id, group) in self.groups.iter().enumerate() {
            let unit = self
                .units
                .get(group.unit)
                .ok_or(ConfigError::Group(id, "Unknown unit"))?;
            validate_group(id, group, unit)?;
        }
        Ok(())
    }
}

fn validate_unit(id: UnitId, unit: &UnitConfig) -> Result<(), ConfigError> {
    let err = |reason| Err(ConfigError::Unit(id, reason));
    if unit.slots == 0 || unit.slots > MAX_SLOTS {
        return err("Slot count out of range");
    }
    if unit.queue_depth == 0 || unit.queue_depth > QUEUE_CAPACITY {
        return err("Queue depth out of range");
    }
    match (unit.completion, unit.dma_channel) {
        (CompletionMode::Dma, None) => {
            return err("DMA completion without DMA channel")
        }
        (CompletionMode::Interrupt, Some(_)) => {
            return err("DMA channel without DMA completion")
        }
        _ => {}
    }
    if unit.channels.iter().any(|ch| ch.input > MAX_INPUT) {
        return err("Input selection out of range");
    }
    if unit
        .channels
        .iter()
        .filter_map(|ch| ch.limit)
        .any(|limit| limit.low > limit.high)
    {
        return err("Limit low above high");
    }
    Ok(())
}

fn validate_group(
    id: GroupId,
    group: &GroupConfig,
    unit: &UnitConfig,
) -> Result<(), ConfigError> {
    let err = |reason| Err(ConfigError::Group(id, reason));
    let count = group.channels.len();
    if count == 0 {
        return err("No channels");
    }
    for (i, channel) in group.channels.iter().enumerate() {
        if *channel as usize >= unit.channels.len() {
            return err("Channel not in unit channel map");
        }
        if group.channels[..i].contains(channel) {
            return err("Duplicate channel");
        }
    }
    if group.samples == 0 {
        return err("Zero samples per channel");
    }
    if group.access == AccessMode::Single && group.samples != 1 {
        return err("Single access with more than one sample");
    }
    if !group.distributed_delays.is_empty()
        && group.distributed_delays.len() != count
    {
        return err("Distributed delay count differs from channel count");
    }
    if core::iter::once(&group.base_delay)
        .chain(group.distributed_delays.iter())
        .map(|delay| NanosDurationU32::from_ticks(*delay))
        .any(|delay| unit.clock.ticks(delay).is_err())
    {
        return err("Delay out of counter range");
    }
    if group.limit_check
        && !group
            .channels
            .iter()
            .any(|ch| unit.channels[*ch as usize].limit.is_some())
    {
        return err("Limit check without any channel limit");
    }
    if group.double_buffered
        && (unit.completion != CompletionMode::Dma
            || group.mode != ConversionMode::Continuous
            || group.access != AccessMode::Streaming
            || group.buffer != BufferMode::Circular
            || group.limit_check)
    {
        return err("Double buffering needs circular DMA streaming");
    }
    if group.trigger == TriggerKind::Hardware
        && group.hardware_source == pdb::TriggerSource::SOFTWARE
    {
        return err("Hardware trigger selects the software input");
    }
    if unit.optimize_oneshot_hw_trigger
        && group.trigger == TriggerKind::Hardware
        && (group.mode != ConversionMode::OneShot
            || group.access != AccessMode::Single
            || group.limit_check
            || count > unit.slots)
    {
        return err("Optimized hardware group not single-batch one-shot");
    }
    Ok(())
}

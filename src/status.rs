//! Mutable per-unit and per-group state.
use core::{marker::PhantomData, ptr::NonNull};

use heapless::Deque;
use serde::Serialize;

use crate::{
    config::{GroupConfig, GroupId},
    design_parameters::{MAX_SLOTS, QUEUE_CAPACITY},
};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, strum::IntoStaticStr,
)]
pub enum ConversionState {
    #[default]
    Idle,
    /// Conversion requested, no new sample set available.
    Busy,
    /// At least one new sample set available.
    Completed,
    /// A sample set for every sample of the stream is available.
    StreamCompleted,
}

/// A result buffer registered by the application.
///
/// The buffer is written both by the CPU and by the DMA engine behind the
/// compiler's back, so all accesses are volatile.
pub(crate) struct ResultBuffer<'a> {
    data: NonNull<u16>,
    len: usize,
    _buffer: PhantomData<&'a mut [u16]>,
}

// The buffer is exclusively borrowed for `'a`.
unsafe impl Send for ResultBuffer<'_> {}

impl<'a> ResultBuffer<'a> {
    pub fn new(buffer: &'a mut [u16]) -> Self {
        Self {
            len: buffer.len(),
            data: NonNull::from(buffer).cast(),
            _buffer: PhantomData,
        }
    }

    pub fn read(&self, index: usize) -> u16 {
        assert!(index < self.len);
        unsafe { self.data.as_ptr().add(index).read_volatile() }
    }

    pub fn write(&mut self, index: usize, value: u16) {
        assert!(index < self.len);
        unsafe { self.data.as_ptr().add(index).write_volatile(value) }
    }

    /// Bus address of a buffer element, a DMA destination.
    pub fn address(&self, index: usize) -> usize {
        assert!(index < self.len);
        self.data.as_ptr() as usize + index * core::mem::size_of::<u16>()
    }
}

#[derive(Default)]
pub(crate) struct GroupStatus<'a> {
    /// Offset of the first channel not yet converted in the current sample.
    pub current_channel: usize,
    /// Sample written next.
    pub result_index: usize,
    /// Samples per channel available to the application.
    pub valid_samples: usize,
    pub state: ConversionState,
    pub already_converted_once: bool,
    pub limit_check_failed: bool,
    pub notification_armed: bool,
    pub hw_trigger_enabled: bool,
    /// Half of a double-buffered result buffer written by the current stream.
    pub half: usize,
    pub buffer: Option<ResultBuffer<'a>>,
    /// Start requests accepted so far.
    pub generation: u32,
}

impl GroupStatus<'_> {
    /// Reset conversion progress for a new start request.
    pub fn restart(&mut self) {
        self.current_channel = 0;
        self.result_index = 0;
        self.valid_samples = 0;
        self.half = 0;
        self.state = ConversionState::Busy;
        self.already_converted_once = false;
        self.limit_check_failed = false;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn stop(&mut self) {
        self.current_channel = 0;
        self.result_index = 0;
        self.state = ConversionState::Idle;
        self.notification_armed = false;
    }

    /// Buffer index of a sample of the channel at `offset` in the current
    /// stream.
    pub fn result_offset(
        &self,
        group: &GroupConfig,
        offset: usize,
        sample: usize,
    ) -> usize {
        self.half * group.channel_count() * group.samples
            + offset * group.samples
            + sample
    }

    /// Half and sample index holding the most recent sample set.
    pub fn latest(&self, group: &GroupConfig) -> (usize, usize) {
        if self.result_index == 0 {
            let half = if group.double_buffered {
                self.half ^ 1
            } else {
                self.half
            };
            (half, group.samples - 1)
        } else {
            (self.half, self.result_index - 1)
        }
    }

    pub fn diagnostics(&self) -> GroupDiagnostics {
        GroupDiagnostics {
            state: self.state,
            current_channel: self.current_channel,
            result_index: self.result_index,
            valid_samples: self.valid_samples,
            already_converted_once: self.already_converted_once,
            limit_check_failed: self.limit_check_failed,
            notification_armed: self.notification_armed,
            hw_trigger_enabled: self.hw_trigger_enabled,
        }
    }
}

/// Snapshot of a group's conversion status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GroupDiagnostics {
    pub state: ConversionState,
    pub current_channel: usize,
    pub result_index: usize,
    pub valid_samples: usize,
    pub already_converted_once: bool,
    pub limit_check_failed: bool,
    pub notification_armed: bool,
    pub hw_trigger_enabled: bool,
}

pub(crate) type Queue = Deque<GroupId, QUEUE_CAPACITY>;

pub(crate) struct UnitStatus {
    /// Software triggered groups, and hardware triggered groups without
    /// priority.
    pub software: Queue,
    /// Hardware triggered groups when hardware priority is configured.
    pub hardware: Queue,
    /// Hardware one-shot group armed outside the queues.
    pub armed: Option<GroupId>,
    pub hardware_priority: bool,
    pub depth: usize,
    /// Trigger registers of the last programmed batch.
    pub snapshot: Option<pdb::Snapshot>,
    /// The trigger runs continuously without restarts.
    pub free_running: bool,
    /// DMA destination of limit-checked batches.
    pub staging: [u16; MAX_SLOTS],
}

impl UnitStatus {
    pub fn new(depth: usize, hardware_priority: bool) -> Self {
        Self {
            software: Queue::new(),
            hardware: Queue::new(),
            armed: None,
            hardware_priority,
            depth,
            snapshot: None,
            free_running: false,
            staging: [0; MAX_SLOTS],
        }
    }

    /// The group whose conversion is in flight.
    pub fn active(&self) -> Option<GroupId> {
        self.armed
            .or_else(|| self.hardware.front().copied())
            .or_else(|| self.software.front().copied())
    }

    pub fn is_queued(&self, group: GroupId) -> bool {
        self.armed == Some(group)
            || self.software.iter().any(|g| *g == group)
            || self.hardware.iter().any(|g| *g == group)
    }

    pub fn is_idle(&self) -> bool {
        self.active().is_none()
    }

    pub fn staging(&self, index: usize) -> u16 {
        unsafe { core::ptr::read_volatile(&self.staging[index]) }
    }

    pub fn staging_address(&mut self) -> usize {
        self.staging.as_mut_ptr() as usize
    }
}

/// Remove a group from anywhere in a queue, keeping the order of the others.
pub(crate) fn remove(queue: &mut Queue, group: GroupId) -> bool {
    let mut found = false;
    for _ in 0..queue.len() {
        if let Some(entry) = queue.pop_front() {
            if entry == group {
                found = true;
            } else {
                queue.push_back(entry).ok();
            }
        }
    }
    found
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::test::group;

    #[test]
    fn active_prefers_hardware_queue() {
        let mut unit = UnitStatus::new(4, true);
        assert!(unit.is_idle());
        unit.software.push_back(1).unwrap();
        assert_eq!(unit.active(), Some(1));
        unit.hardware.push_back(2).unwrap();
        assert_eq!(unit.active(), Some(2));
        unit.armed = Some(3);
        assert_eq!(unit.active(), Some(3));
        assert!(unit.is_queued(1) && unit.is_queued(2) && unit.is_queued(3));
    }

    #[test]
    fn remove_keeps_order() {
        let mut queue = Queue::new();
        for g in [4, 7, 2, 9] {
            queue.push_back(g).unwrap();
        }
        assert!(remove(&mut queue, 2));
        assert!(!remove(&mut queue, 2));
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), [4, 7, 9]);
    }

    #[test]
    fn result_offsets() {
        let mut config = group(0, &[0, 1, 2], 4);
        config.double_buffered = true;
        let mut status = GroupStatus {
            result_index: 2,
            ..Default::default()
        };
        assert_eq!(status.result_offset(&config, 1, 2), 6);
        assert_eq!(status.latest(&config), (0, 1));
        status.half = 1;
        assert_eq!(status.result_offset(&config, 2, 3), 12 + 11);
        status.result_index = 0;
        assert_eq!(status.latest(&config), (0, 3));
    }

    #[test]
    fn volatile_buffer() {
        let mut data = [0u16; 4];
        let mut buffer = ResultBuffer::new(&mut data);
        buffer.write(3, 0xabc);
        assert_eq!(buffer.read(3), 0xabc);
        assert_eq!(buffer.address(2) - buffer.address(0), 4);
    }
}

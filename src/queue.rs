//! Per-unit conversion queues.
//!
//! The head of the applicable queue is the only group with a conversion in
//! flight. With hardware priority configured, hardware triggered groups are
//! queued separately and served first.
use crate::{
    adc::Inner,
    config::{GroupId, TriggerKind, UnitId},
    design_parameters::DMA_ABORT_TIMEOUT,
    error::{Error, ErrorId},
    peripheral::{AdcRegisters, DmaManager, ErrorSink},
    status,
};

impl<A, P, D, E> Inner<'_, A, P, D, E>
where
    A: AdcRegisters,
    P: pdb::Registers,
    D: DmaManager,
    E: ErrorSink,
{
    /// Queue a group and start it if the unit is idle.
    ///
    /// The group status is reset only once the request is accepted.
    pub(crate) fn enqueue(
        &mut self,
        unit_id: UnitId,
        group_id: GroupId,
    ) -> Result<(), Error> {
        let config = self.config;
        let unit_config = &config.units[unit_id];
        let hardware = config.groups[group_id].trigger == TriggerKind::Hardware;
        let status = &mut self.units[unit_id].status;

        if status.is_queued(group_id) {
            return Err(Error::Busy);
        }

        if hardware && unit_config.optimize_oneshot_hw_trigger {
            if status.armed.is_some() {
                return Err(Error::Busy);
            }
            let active = status.active();
            status.armed = Some(group_id);
            self.groups[group_id].restart();
            if let Some(preempted) = active {
                self.suspend(unit_id, preempted);
            }
            self.start_group(unit_id, group_id);
            return Ok(());
        }

        let priority = hardware && status.hardware_priority;
        let was_active = status.active();
        let depth = status.depth;
        let queue = if priority {
            &mut status.hardware
        } else {
            &mut status.software
        };
        if queue.len() >= depth {
            log::warn!("Unit {unit_id}: queue full, group {group_id} rejected");
            self.sink.report_error(ErrorId::QueueOverflow, unit_id);
            return Err(Error::QueueFull);
        }
        queue.push_back(group_id).map_err(|_| Error::QueueFull)?;
        self.groups[group_id].restart();

        match was_active {
            None => self.start_group(unit_id, group_id),
            Some(active)
                if priority && self.units[unit_id].status.hardware.len() == 1
                    && self.units[unit_id].status.armed.is_none() =>
            {
                self.suspend(unit_id, active);
                self.start_group(unit_id, group_id);
            }
            Some(active) => {
                log::debug!(
                    "Unit {unit_id}: group {group_id} queued behind {active}"
                );
            }
        }
        Ok(())
    }

    /// Stop the conversion of a software group preempted by a hardware group.
    ///
    /// The group stays at the head of its queue and converts from its first
    /// channel once the hardware queue drains.
    fn suspend(&mut self, unit_id: UnitId, group_id: GroupId) {
        self.abort(unit_id);
        self.groups[group_id].current_channel = 0;
        log::debug!("Unit {unit_id}: group {group_id} suspended");
    }

    /// Remove the active group and start the next one, or stop the unit.
    pub(crate) fn dequeue_head(&mut self, unit_id: UnitId) -> Option<GroupId> {
        let status = &mut self.units[unit_id].status;
        let head = if status.armed.is_some() {
            status.armed.take()
        } else if !status.hardware.is_empty() {
            status.hardware.pop_front()
        } else {
            status.software.pop_front()
        };

        match status.active() {
            Some(next) => self.start_group(unit_id, next),
            None => {
                self.units[unit_id].pdb.stop();
                self.units[unit_id].status.free_running = false;
                log::debug!("Unit {unit_id}: idle");
            }
        }
        head
    }

    /// Take a group out of the unit queues. An active group's conversion is
    /// aborted first.
    pub(crate) fn remove(
        &mut self,
        unit_id: UnitId,
        group_id: GroupId,
    ) -> bool {
        let status = &mut self.units[unit_id].status;
        if status.active() == Some(group_id) {
            self.abort(unit_id);
            self.dequeue_head(unit_id);
            true
        } else {
            status::remove(&mut status.software, group_id)
                || status::remove(&mut status.hardware, group_id)
        }
    }

    /// Stop the trigger, discard pending results and stop the unit's transfer.
    ///
    /// A transfer still running after the abort bound is reported and left
    /// behind.
    pub(crate) fn abort(&mut self, unit_id: UnitId) {
        let unit_config = &self.config.units[unit_id];
        let unit = &mut self.units[unit_id];
        unit.pdb.stop();
        unit.status.free_running = false;
        for slot in 0..unit_config.slots {
            unit.adc.read_result(slot);
        }

        if let Some(channel) = unit_config.dma_channel {
            self.dma.disable_request(channel);
            let stopped = (0..DMA_ABORT_TIMEOUT)
                .any(|_| !self.dma.is_transfer_active(channel));
            if !stopped {
                log::warn!(
                    "Unit {unit_id}: DMA channel {channel} abort timed out"
                );
                self.sink.report_error(ErrorId::DmaAbortTimeout, unit_id);
            }
        }
    }
}

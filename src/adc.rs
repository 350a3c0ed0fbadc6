//! Driver context and application interface.
//!
//! [Adc] owns the register files of all units and the status of all groups.
//! Every status update runs in a critical section. Interrupt handlers forward
//! an [Event] to [Adc::handle]; user callbacks are invoked after the critical
//! section is left, so they may call back into the driver.
use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;

use crate::{
    config::{CompletionMode, Config, GroupConfig, GroupId, TriggerKind, UnitId},
    design_parameters::{CALIBRATION_TIMEOUT, MAX_GROUPS, MAX_UNITS},
    error::{Error, ErrorId},
    interrupt::Completion,
    peripheral::{AdcRegisters, DmaManager, ErrorSink, SlotControl},
    status::{
        ConversionState, GroupDiagnostics, GroupStatus, ResultBuffer,
        UnitStatus,
    },
};

/// Interrupt sources of a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    ConversionComplete(UnitId),
    DmaComplete(UnitId),
    SequenceError(UnitId),
}

pub(crate) struct Unit<A, P> {
    pub adc: A,
    pub pdb: pdb::Pdb<P>,
    pub status: UnitStatus,
}

pub(crate) struct Inner<'a, A, P, D, E> {
    pub config: &'a Config,
    pub units: Vec<Unit<A, P>, MAX_UNITS>,
    pub groups: Vec<GroupStatus<'a>, MAX_GROUPS>,
    pub dma: D,
    pub sink: E,
}

/// Hardware returned by [Adc::deinit].
pub struct Parts<A, P, D, E> {
    pub units: Vec<(A, P), MAX_UNITS>,
    pub dma: D,
    pub sink: E,
}

/// ADC conversion scheduler.
///
/// The driver keeps the staging area of limit-checked DMA transfers inline. It
/// must stay in place (usually in a `static`) while DMA conversions run.
pub struct Adc<'a, A, P, D, E> {
    config: &'a Config,
    inner: Mutex<RefCell<Inner<'a, A, P, D, E>>>,
}

impl<'a, A, P, D, E> Adc<'a, A, P, D, E>
where
    A: AdcRegisters,
    P: pdb::Registers,
    D: DmaManager,
    E: ErrorSink,
{
    /// Validate the configuration and initialize every unit.
    ///
    /// # Args
    /// * `config` - The static configuration tables.
    /// * `hardware` - ADC and PDB register files, one pair per configured unit.
    /// * `dma` - The DMA channel manager.
    /// * `sink` - Device error sink.
    pub fn new(
        config: &'a Config,
        hardware: impl IntoIterator<Item = (A, P)>,
        dma: D,
        sink: E,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mut units = Vec::new();
        for (id, (mut adc, registers)) in hardware.into_iter().enumerate() {
            let unit_config =
                config.units.get(id).ok_or(Error::Hardware(id + 1))?;
            let mut pdb = pdb::Pdb::new(registers);
            pdb.init(unit_config.clock);
            for slot in 0..unit_config.slots {
                adc.write_slot(slot, SlotControl::disabled());
            }
            adc.set_hardware_trigger(true);
            adc.set_dma(unit_config.completion == CompletionMode::Dma);
            units
                .push(Unit {
                    adc,
                    pdb,
                    status: UnitStatus::new(
                        unit_config.queue_depth,
                        unit_config.hardware_priority,
                    ),
                })
                .map_err(|_| Error::Hardware(id + 1))?;
        }
        if units.len() != config.units.len() {
            return Err(Error::Hardware(units.len()));
        }

        let groups = config
            .groups
            .iter()
            .map(|_| GroupStatus::default())
            .collect();
        log::info!(
            "ADC initialized: {} units, {} groups",
            config.units.len(),
            config.groups.len()
        );

        Ok(Self {
            config,
            inner: Mutex::new(RefCell::new(Inner {
                config,
                units,
                groups,
                dma,
                sink,
            })),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<'a, A, P, D, E>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    fn group(&self, group: GroupId) -> Result<&'a GroupConfig, Error> {
        self.config.groups.get(group).ok_or(Error::InvalidGroup)
    }

    /// Register the result buffer of a group.
    ///
    /// The buffer holds `samples` results per channel, channel after channel,
    /// twice over for double-buffered groups.
    pub fn setup_result_buffer(
        &self,
        group: GroupId,
        buffer: &'a mut [u16],
    ) -> Result<(), Error> {
        let config = self.group(group)?;
        if buffer.len() < config.buffer_len() {
            return Err(Error::BufferTooSmall);
        }
        self.with(|inner| {
            if inner.units[config.unit].status.is_queued(group) {
                return Err(Error::Busy);
            }
            inner.groups[group].buffer = Some(ResultBuffer::new(buffer));
            Ok(())
        })
    }

    /// Request conversion of a software triggered group.
    pub fn start_group_conversion(&self, group: GroupId) -> Result<(), Error> {
        let config = self.group(group)?;
        if config.trigger != TriggerKind::Software {
            return Err(Error::WrongTrigger);
        }
        self.with(|inner| {
            if inner.groups[group].buffer.is_none() {
                return Err(Error::NoBuffer);
            }
            inner.enqueue(config.unit, group)
        })
    }

    /// Stop a software triggered group. Stopping an idle group has no effect.
    pub fn stop_group_conversion(&self, group: GroupId) -> Result<(), Error> {
        let config = self.group(group)?;
        if config.trigger != TriggerKind::Software {
            return Err(Error::WrongTrigger);
        }
        self.with(|inner| {
            let queued = inner.units[config.unit].status.is_queued(group);
            if !queued && inner.groups[group].state == ConversionState::Idle {
                return Ok(());
            }
            inner.remove(config.unit, group);
            inner.groups[group].stop();
            log::debug!("Group {group} stopped");
            Ok(())
        })
    }

    /// Copy the latest sample of every channel into `values`.
    ///
    /// Returns the state before the read. A completed stream becomes idle once
    /// read unless the group keeps converting.
    pub fn read_group(
        &self,
        group: GroupId,
        values: &mut [u16],
    ) -> Result<ConversionState, Error> {
        let config = self.group(group)?;
        if values.len() < config.channel_count() {
            return Err(Error::BufferTooSmall);
        }
        self.with(|inner| {
            let queued = inner.units[config.unit].status.is_queued(group);
            let status = &mut inner.groups[group];
            let state = status.state;
            if state == ConversionState::Idle {
                return Err(Error::Idle);
            }
            if status.valid_samples == 0 {
                return Err(Error::NoResult);
            }
            let buffer = status.buffer.as_ref().ok_or(Error::NoBuffer)?;

            let (half, sample) = status.latest(config);
            let base = half * config.channel_count() * config.samples + sample;
            let values = &mut values[..config.channel_count()];
            for (channel, value) in values.iter_mut().enumerate() {
                *value = buffer.read(base + channel * config.samples);
            }

            status.state = match state {
                ConversionState::Completed => ConversionState::Busy,
                ConversionState::StreamCompleted if !queued => {
                    ConversionState::Idle
                }
                ConversionState::StreamCompleted => ConversionState::Busy,
                other => other,
            };
            Ok(state)
        })
    }

    /// Arm the hardware trigger of a hardware triggered group.
    pub fn enable_hardware_trigger(&self, group: GroupId) -> Result<(), Error> {
        let config = self.group(group)?;
        if config.trigger != TriggerKind::Hardware {
            return Err(Error::WrongTrigger);
        }
        self.with(|inner| {
            let status = &inner.groups[group];
            if status.buffer.is_none() {
                return Err(Error::NoBuffer);
            }
            if status.hw_trigger_enabled {
                return Err(Error::Busy);
            }
            inner.enqueue(config.unit, group)?;
            inner.groups[group].hw_trigger_enabled = true;
            Ok(())
        })
    }

    pub fn disable_hardware_trigger(
        &self,
        group: GroupId,
    ) -> Result<(), Error> {
        let config = self.group(group)?;
        if config.trigger != TriggerKind::Hardware {
            return Err(Error::WrongTrigger);
        }
        self.with(|inner| {
            if !inner.groups[group].hw_trigger_enabled {
                return Err(Error::Idle);
            }
            inner.remove(config.unit, group);
            let status = &mut inner.groups[group];
            status.stop();
            status.hw_trigger_enabled = false;
            Ok(())
        })
    }

    pub fn enable_group_notification(
        &self,
        group: GroupId,
    ) -> Result<(), Error> {
        self.set_notification(group, true)
    }

    pub fn disable_group_notification(
        &self,
        group: GroupId,
    ) -> Result<(), Error> {
        self.set_notification(group, false)
    }

    fn set_notification(
        &self,
        group: GroupId,
        armed: bool,
    ) -> Result<(), Error> {
        if self.group(group)?.notification.is_none() {
            return Err(Error::NoNotification);
        }
        self.with(|inner| inner.groups[group].notification_armed = armed);
        Ok(())
    }

    pub fn group_status(
        &self,
        group: GroupId,
    ) -> Result<ConversionState, Error> {
        self.group(group)?;
        Ok(self.with(|inner| inner.groups[group].state))
    }

    pub fn group_diagnostics(
        &self,
        group: GroupId,
    ) -> Result<GroupDiagnostics, Error> {
        self.group(group)?;
        Ok(self.with(|inner| inner.groups[group].diagnostics()))
    }

    /// Buffer index of the first channel's latest sample and the number of
    /// valid samples per channel.
    pub fn stream_last_index(
        &self,
        group: GroupId,
    ) -> Result<(usize, usize), Error> {
        let config = self.group(group)?;
        self.with(|inner| {
            let status = &inner.groups[group];
            if status.valid_samples == 0 {
                return Err(Error::NoResult);
            }
            let (half, sample) = status.latest(config);
            Ok((
                half * config.channel_count() * config.samples + sample,
                status.valid_samples,
            ))
        })
    }

    /// Run the unit self-calibration. The unit must be idle.
    pub fn calibrate(&self, unit: UnitId) -> Result<(), Error> {
        if unit >= self.config.units.len() {
            return Err(Error::InvalidUnit);
        }
        self.with(|inner| {
            if !inner.units[unit].status.is_idle() {
                return Err(Error::Busy);
            }
            let adc = &mut inner.units[unit].adc;
            adc.start_calibration();
            let done =
                (0..CALIBRATION_TIMEOUT).find_map(|_| adc.calibration_done());
            match done {
                Some(true) => {
                    log::info!("Unit {unit}: calibrated");
                    Ok(())
                }
                Some(false) => Err(Error::Calibration),
                None => {
                    log::warn!("Unit {unit}: calibration timed out");
                    inner.sink.report_error(ErrorId::CalibrationTimeout, unit);
                    Err(Error::Timeout)
                }
            }
        })
    }

    /// Release the hardware. Fails, returning the driver, while any group is
    /// converting or armed.
    pub fn deinit(self) -> Result<Parts<A, P, D, E>, Self> {
        let busy = self.with(|inner| {
            inner.units.iter().any(|unit| !unit.status.is_idle())
                || inner.groups.iter().any(|g| g.hw_trigger_enabled)
        });
        if busy {
            return Err(self);
        }

        let inner = self.inner.into_inner().into_inner();
        let mut units = Vec::new();
        let configs = inner.config.units.iter();
        for (unit, config) in inner.units.into_iter().zip(configs) {
            let Unit { mut adc, mut pdb, .. } = unit;
            pdb.stop();
            for slot in 0..config.slots {
                adc.write_slot(slot, SlotControl::disabled());
            }
            adc.set_hardware_trigger(false);
            adc.set_dma(false);
            units.push((adc, pdb.free())).ok();
        }
        log::info!("ADC deinitialized");
        Ok(Parts {
            units,
            dma: inner.dma,
            sink: inner.sink,
        })
    }

    /// Process an interrupt event.
    pub fn handle(&self, event: Event) {
        let unit = match event {
            Event::ConversionComplete(unit)
            | Event::DmaComplete(unit)
            | Event::SequenceError(unit) => unit,
        };
        if unit >= self.config.units.len() {
            return;
        }

        let completion = self.with(|inner| match event {
            Event::ConversionComplete(unit) => inner.conversion_complete(unit),
            Event::DmaComplete(unit) => inner.dma_complete(unit),
            Event::SequenceError(unit) => inner.sequence_error(unit),
        });

        match completion {
            Completion::None => {}
            Completion::UnitError(unit, notify) => notify(unit),
            Completion::SampleDone(unit, group, generation) => {
                let config = &self.config.groups[group];
                if let Some(extra) = config.extra_notification {
                    extra(group);
                }
                if let Some(notify) = self.with(|inner| {
                    inner.finish_sample(unit, group, generation)
                }) {
                    notify(group);
                }
            }
        }
    }
}

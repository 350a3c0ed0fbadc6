//! Register file and collaborator mocks shared by the unit tests.
//!
//! Each mock shares its state with the test through an `Rc<RefCell<_>>` so
//! conversions can be injected while the driver owns the mock.
use std::{cell::RefCell, rc::Rc, vec::Vec};

use pdb::{ChannelControl, ChannelStatus, Sc, CHANNELS, PRETRIGGERS};

use crate::{
    config::{Config, GroupConfig, GroupId, UnitConfig, UnitId},
    design_parameters::MAX_SLOTS,
    error::ErrorId,
    peripheral::{
        AdcRegisters, DmaManager, ErrorSink, SlotControl, TransferDescriptor,
    },
    Adc, Event,
};

#[derive(Default)]
pub struct AdcState {
    pub slots: [SlotControl; MAX_SLOTS],
    pub results: [u16; MAX_SLOTS],
    pub complete: [bool; MAX_SLOTS],
    pub hardware_trigger: bool,
    pub dma: bool,
    pub calibration: Option<bool>,
    pub calibrations: usize,
}

impl AdcState {
    /// Latch results and complete flags on the first slots.
    pub fn convert(&mut self, values: &[u16]) {
        for (slot, value) in values.iter().enumerate() {
            self.results[slot] = *value;
            self.complete[slot] = true;
        }
    }

    pub fn inputs(&self, count: usize) -> Vec<u8> {
        self.slots[..count]
            .iter()
            .map(|slot| slot.input().value())
            .collect()
    }
}

pub struct MockAdc(pub Rc<RefCell<AdcState>>);

impl AdcRegisters for MockAdc {
    fn write_slot(&mut self, slot: usize, control: SlotControl) {
        let mut state = self.0.borrow_mut();
        state.slots[slot] = control;
        state.complete[slot] = false;
    }

    fn conversion_complete(&self, slot: usize) -> bool {
        self.0.borrow().complete[slot]
    }

    fn read_result(&mut self, slot: usize) -> u16 {
        let mut state = self.0.borrow_mut();
        state.complete[slot] = false;
        state.results[slot]
    }

    fn result_address(&self, slot: usize) -> usize {
        let state = self.0.as_ptr();
        unsafe { core::ptr::addr_of!((*state).results[slot]) as usize }
    }

    fn set_hardware_trigger(&mut self, enable: bool) {
        self.0.borrow_mut().hardware_trigger = enable;
    }

    fn set_dma(&mut self, enable: bool) {
        self.0.borrow_mut().dma = enable;
    }

    fn start_calibration(&mut self) {
        self.0.borrow_mut().calibrations += 1;
    }

    fn calibration_done(&self) -> Option<bool> {
        self.0.borrow().calibration
    }
}

/// PDB registers that load immediately while enabled.
#[derive(Default)]
pub struct PdbState {
    pub sc: Sc,
    pub modulus: u16,
    pub control: [ChannelControl; CHANNELS],
    pub status: [ChannelStatus; CHANNELS],
    pub delays: [[u16; PRETRIGGERS]; CHANNELS],
    /// Number of load requests.
    pub loads: usize,
    pub software_triggers: usize,
}

pub struct MockPdb(pub Rc<RefCell<PdbState>>);

impl pdb::Registers for MockPdb {
    fn sc(&self) -> Sc {
        self.0.borrow().sc
    }

    fn write_sc(&mut self, sc: Sc) {
        let mut state = self.0.borrow_mut();
        let mut sc = sc;
        if sc.ldok() {
            state.loads += 1;
        }
        if sc.pdben() {
            sc = sc.with_ldok(false);
        }
        if sc.swtrig() {
            state.software_triggers += 1;
            sc = sc.with_swtrig(false);
        }
        state.sc = sc;
    }

    fn modulus(&self) -> u16 {
        self.0.borrow().modulus
    }

    fn write_modulus(&mut self, ticks: u16) {
        self.0.borrow_mut().modulus = ticks;
    }

    fn channel_control(&self, channel: usize) -> ChannelControl {
        self.0.borrow().control[channel]
    }

    fn write_channel_control(
        &mut self,
        channel: usize,
        control: ChannelControl,
    ) {
        self.0.borrow_mut().control[channel] = control;
    }

    fn channel_status(&self, channel: usize) -> ChannelStatus {
        self.0.borrow().status[channel]
    }

    fn write_channel_status(&mut self, channel: usize, status: ChannelStatus) {
        let mut state = self.0.borrow_mut();
        let current = state.status[channel];
        state.status[channel] = ChannelStatus::default()
            .with_error(current.error() & !status.error())
            .with_flags(current.flags() & !status.flags());
    }

    fn delay(&self, channel: usize, pretrigger: usize) -> u16 {
        self.0.borrow().delays[channel][pretrigger]
    }

    fn write_delay(&mut self, channel: usize, pretrigger: usize, ticks: u16) {
        self.0.borrow_mut().delays[channel][pretrigger] = ticks;
    }
}

#[derive(Default)]
pub struct DmaState {
    pub descriptor: Option<TransferDescriptor>,
    pub enabled: bool,
    pub outstanding: u16,
    /// The transfer never reports inactive.
    pub stuck: bool,
    pub configured: usize,
}

impl DmaState {
    /// Move one block if the request line is enabled.
    pub fn run(&mut self) -> bool {
        let Some(descriptor) = self.descriptor.filter(|_| self.enabled) else {
            return false;
        };
        for i in 0..descriptor.iterations as isize {
            let source = descriptor.source as isize
                + i * descriptor.source_offset as isize;
            let destination = descriptor.destination as isize
                + i * descriptor.destination_offset as isize;
            unsafe {
                (destination as *mut u16)
                    .write_volatile((source as *const u16).read_volatile());
            }
        }
        self.outstanding = 0;
        self.enabled = false;
        true
    }
}

pub struct MockDma(pub Rc<RefCell<DmaState>>);

impl DmaManager for MockDma {
    fn configure_transfer(
        &mut self,
        _unit: UnitId,
        _channel: u8,
        descriptor: &TransferDescriptor,
    ) {
        let mut state = self.0.borrow_mut();
        state.descriptor = Some(*descriptor);
        state.outstanding = descriptor.iterations;
        state.configured += 1;
    }

    fn enable_request(&mut self, _channel: u8) {
        let mut state = self.0.borrow_mut();
        state.enabled = true;
        state.outstanding = state.descriptor.map_or(0, |d| d.iterations);
    }

    fn disable_request(&mut self, _channel: u8) {
        self.0.borrow_mut().enabled = false;
    }

    fn is_transfer_active(&self, _channel: u8) -> bool {
        self.0.borrow().stuck
    }

    fn set_destination_address(&mut self, _channel: u8, address: usize) {
        if let Some(descriptor) = self.0.borrow_mut().descriptor.as_mut() {
            descriptor.destination = address;
        }
    }

    fn iteration_count(&self, _channel: u8) -> u16 {
        self.0.borrow().outstanding
    }
}

pub struct RecordingSink(pub Rc<RefCell<Vec<(ErrorId, UnitId)>>>);

impl ErrorSink for RecordingSink {
    fn report_error(&mut self, error: ErrorId, unit: UnitId) {
        self.0.borrow_mut().push((error, unit));
    }
}

pub type TestAdc<'a> = Adc<'a, MockAdc, MockPdb, MockDma, RecordingSink>;

/// Test side handles of the mocks owned by a [TestAdc].
pub struct Mocks {
    pub adc: Vec<Rc<RefCell<AdcState>>>,
    pub pdb: Vec<Rc<RefCell<PdbState>>>,
    pub dma: Rc<RefCell<DmaState>>,
    pub errors: Rc<RefCell<Vec<(ErrorId, UnitId)>>>,
}

impl Mocks {
    /// Complete the conversion of the first slots of a unit and run the
    /// interrupt handler.
    pub fn convert(&self, adc: &TestAdc, unit: UnitId, values: &[u16]) {
        self.adc[unit].borrow_mut().convert(values);
        adc.handle(Event::ConversionComplete(unit));
    }

    /// Convert, move the results by DMA and run the transfer completion
    /// handler.
    pub fn transfer(&self, adc: &TestAdc, unit: UnitId, values: &[u16]) {
        self.adc[unit].borrow_mut().convert(values);
        assert!(self.dma.borrow_mut().run(), "DMA request not enabled");
        adc.handle(Event::DmaComplete(unit));
    }

    pub fn loads(&self, unit: UnitId) -> usize {
        self.pdb[unit].borrow().loads
    }

    pub fn software_triggers(&self, unit: UnitId) -> usize {
        self.pdb[unit].borrow().software_triggers
    }

    pub fn errors(&self) -> Vec<(ErrorId, UnitId)> {
        self.errors.borrow().clone()
    }
}

/// A single unit configuration.
pub fn config(
    unit: UnitConfig,
    groups: impl IntoIterator<Item = GroupConfig>,
) -> Config {
    let mut config = Config::default();
    config.units.push(unit).unwrap();
    for group in groups {
        config.groups.push(group).unwrap();
    }
    config
}

pub fn adc(config: &Config) -> (TestAdc<'_>, Mocks) {
    let mocks = Mocks {
        adc: config.units.iter().map(|_| Default::default()).collect(),
        pdb: config.units.iter().map(|_| Default::default()).collect(),
        dma: Default::default(),
        errors: Default::default(),
    };
    let hardware: Vec<_> = mocks
        .adc
        .iter()
        .zip(mocks.pdb.iter())
        .map(|(adc, pdb)| (MockAdc(adc.clone()), MockPdb(pdb.clone())))
        .collect();
    let adc = Adc::new(
        config,
        hardware,
        MockDma(mocks.dma.clone()),
        RecordingSink(mocks.errors.clone()),
    )
    .unwrap();
    (adc, mocks)
}

std::thread_local! {
    static NOTIFIED: RefCell<Vec<(&'static str, usize)>> =
        const { RefCell::new(Vec::new()) };
}

pub fn notify(group: GroupId) {
    NOTIFIED.with(|n| n.borrow_mut().push(("done", group)));
}

pub fn extra(group: GroupId) {
    NOTIFIED.with(|n| n.borrow_mut().push(("extra", group)));
}

pub fn unit_error(unit: UnitId) {
    NOTIFIED.with(|n| n.borrow_mut().push(("unit", unit)));
}

/// Take the notifications recorded on this thread.
pub fn notified() -> Vec<(&'static str, usize)> {
    NOTIFIED.with(|n| n.take())
}

//! Hardware backends for the STM32G431
//!
//! Clock tree, the timer-triggered ADC sequencer, the Hall inputs, the angle
//! sensor SPI link and the CRC unit.
//!
//! ## Acquisition wiring
//! - TIM1 TRGO  = OC4REF -> ADC1 (offset/auxiliary sequence)
//! - TIM1 TRGO2 = OC6REF -> ADC2 (current sequence)
//! - PC0/PC1/PC2: phase A/B/C (ADC12_IN6..IN8)
//! - PC3: zero reference (ADC12_IN9)
//! - ADC1_IN16: internal temperature sensor

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use embassy_stm32::{
    adc::{Adc, SampleTime},
    crc::{Config as CrcConfig, ConfigError as CrcConfigError, Crc, InputReverseConfig, PolySize},
    gpio::{Input, Output},
    mode::Blocking,
    pac, peripherals,
    spi::{self, Spi},
    Config,
};

use g4_acquisition::acquisition::{AdcSequencer, Channel, Sequence, SequenceId, TriggerEdge};
use g4_acquisition::config::params::trigger::RESULT_SLOTS;
use g4_acquisition::config::Crc32;
use g4_acquisition::hall::{write_frame, SectorInput, SensorLink};
use g4_acquisition::temperature::FactoryReference;

/// RCC clock configuration
///
/// HSI → PLL (÷4 × 85 ÷ 2) = 170MHz, ADC12 clocked from SYSCLK
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}

// === Acquisition ===

/// Latest raw result per slot, written by the ADC interrupt
static RESULTS: [AtomicU16; RESULT_SLOTS] = [const { AtomicU16::new(0) }; RESULT_SLOTS];

/// Next conversion index within the running sequence, per converter
static CURSOR: [AtomicU8; 2] = [const { AtomicU8::new(0) }; 2];

/// First slot of the sequence armed on each converter
static FIRST_SLOT: [AtomicU8; 2] = [const { AtomicU8::new(0) }; 2];

/// Current sequence finished and not yet consumed
static COMPLETE: AtomicBool = AtomicBool::new(false);

/// ADC12 regular trigger selections
const EXTSEL_TIM1_TRGO: u8 = 9;
const EXTSEL_TIM1_TRGO2: u8 = 10;

/// Sample time of the external analog inputs
const SAMPLE_TIME: SampleTime = SampleTime::CYCLES24_5;

/// The internal temperature sensor needs at least 5us of sampling
const TEMPERATURE_SAMPLE_TIME: SampleTime = SampleTime::CYCLES247_5;

/// Analog pins on GPIOC (PC0..PC3)
const ANALOG_PINS: [usize; 4] = [0, 1, 2, 3];

fn converter(sequence: SequenceId) -> (pac::adc::Adc, usize) {
    match sequence {
        SequenceId::OffsetAux => (pac::ADC1, 0),
        SequenceId::Current => (pac::ADC2, 1),
    }
}

fn input(channel: Channel) -> u8 {
    match channel {
        Channel::PhaseA => 6,
        Channel::PhaseB => 7,
        Channel::PhaseC => 8,
        Channel::ZeroReference => 9,
        Channel::Temperature => 16,
    }
}

fn sample_time(channel: Channel) -> SampleTime {
    match channel {
        Channel::Temperature => TEMPERATURE_SAMPLE_TIME,
        _ => SAMPLE_TIME,
    }
}

fn set_sample_time(adc: pac::adc::Adc, ch: u8, time: SampleTime) {
    if ch <= 9 {
        adc.smpr().modify(|w| w.set_smp(ch as usize, time));
    } else {
        adc.smpr2().modify(|w| w.set_smp((ch - 10) as usize, time));
    }
}

/// ADC1/ADC2 sequencer triggered by TIM1
///
/// The embassy drivers power up and calibrate both converters; sequencing is
/// programmed through the PAC.
pub struct G4Sequencer {
    _adc1: Adc<'static, peripherals::ADC1>,
    _adc2: Adc<'static, peripherals::ADC2>,
}

impl G4Sequencer {
    pub fn new(
        adc1: Adc<'static, peripherals::ADC1>,
        adc2: Adc<'static, peripherals::ADC2>,
    ) -> Self {
        let rcc = pac::RCC;
        let gpioc = pac::GPIOC;

        rcc.ahb2enr().modify(|w| w.set_gpiocen(true));
        for pin in ANALOG_PINS {
            gpioc
                .moder()
                .modify(|w| w.set_moder(pin, pac::gpio::vals::Moder::ANALOG));
            gpioc
                .pupdr()
                .modify(|w| w.set_pupdr(pin, pac::gpio::vals::Pupdr::FLOATING));
        }

        Self {
            _adc1: adc1,
            _adc2: adc2,
        }
    }
}

impl AdcSequencer for G4Sequencer {
    fn configure_trigger(&mut self, sequence: SequenceId, count: u32, edge: TriggerEdge) {
        let tim1 = pac::TIM1;
        let compare = count as u16;

        // PWM mode 2: OCxREF rises when the counter reaches the compare value
        match sequence {
            SequenceId::OffsetAux => {
                tim1.ccr(3).modify(|w| w.set_ccr(compare));
                tim1.ccmr_output(1)
                    .modify(|w| w.set_ocm(1, pac::timer::vals::Ocm::PWM_MODE2));
                tim1.cr2()
                    .modify(|w| w.set_mms(pac::timer::vals::Mms::COMPARE_OC4));
            }
            SequenceId::Current => {
                tim1.ccr6().modify(|w| w.set_ccr(compare));
                tim1.ccmr3_output()
                    .modify(|w| w.set_ocm(1, pac::timer::vals::Ocm::PWM_MODE2));
                tim1.cr2()
                    .modify(|w| w.set_mms2(pac::timer::vals::Mms2::COMPARE_OC6));
            }
        }

        let (adc, _) = converter(sequence);
        let exten = match edge {
            TriggerEdge::Rising => pac::adc::vals::Exten::RISING_EDGE,
            TriggerEdge::Falling => pac::adc::vals::Exten::FALLING_EDGE,
        };
        let extsel = match sequence {
            SequenceId::OffsetAux => EXTSEL_TIM1_TRGO,
            SequenceId::Current => EXTSEL_TIM1_TRGO2,
        };
        adc.cfgr().modify(|w| {
            w.set_cont(false);
            w.set_exten(exten);
            w.set_extsel(extsel);
        });
    }

    fn arm_sequence(&mut self, sequence: &Sequence) {
        let (adc, index) = converter(sequence.id);

        let mut length = 0u8;
        for (rank, entry) in sequence.entries().enumerate() {
            // The terminating entry has no conversion of its own
            let Some(channel) = entry.channel else {
                break;
            };
            let ch = input(channel);
            match rank {
                0..=3 => adc.sqr1().modify(|w| w.set_sq(rank, ch)),
                4..=8 => adc.sqr2().modify(|w| w.set_sq(rank - 4, ch)),
                9..=13 => adc.sqr3().modify(|w| w.set_sq(rank - 9, ch)),
                _ => adc.sqr4().modify(|w| w.set_sq(rank - 14, ch)),
            }
            set_sample_time(adc, ch, sample_time(channel));
            length += 1;
        }
        adc.sqr1().modify(|w| w.set_l(length - 1));

        FIRST_SLOT[index].store(sequence.first_slot, Ordering::Relaxed);
        CURSOR[index].store(0, Ordering::Relaxed);

        let irq_on_end = sequence.entries().any(|entry| entry.irq);
        adc.ier().modify(|w| {
            w.set_eocie(true);
            w.set_eosie(irq_on_end);
        });

        debug!(
            "ADC{} armed: {} conversions from slot {}",
            index + 1,
            length,
            sequence.first_slot
        );
    }

    fn start(&mut self) {
        // Temperature sensor on ADC1_IN16
        pac::ADC12_COMMON.ccr().modify(|w| w.set_vsenseen(true));

        COMPLETE.store(false, Ordering::Relaxed);
        for adc in [pac::ADC1, pac::ADC2] {
            adc.isr().write(|w| {
                w.set_eoc(true);
                w.set_eos(true);
                w.set_ovr(true);
            });
        }

        // Priority 2 (0x20), above the executor
        unsafe {
            cortex_m::peripheral::NVIC::unmask(pac::Interrupt::ADC1_2);
            let mut cp = cortex_m::Peripherals::steal();
            cp.NVIC.set_priority(pac::Interrupt::ADC1_2, 0x20);
        }

        for adc in [pac::ADC1, pac::ADC2] {
            adc.cr().modify(|w| w.set_adstart(true));
        }
        info!("ADC1/ADC2 waiting for TIM1 triggers");
    }

    fn read_result(&self, slot: u8) -> u16 {
        RESULTS
            .get(slot as usize)
            .map(|result| result.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn take_completion(&mut self) -> bool {
        COMPLETE.swap(false, Ordering::Acquire)
    }
}

/// Move a finished conversion of one converter into the slot table
///
/// Conversion `k` lands one slot after the entry that selected it. Returns
/// `true` at the end of the sequence.
fn drain(adc: pac::adc::Adc, index: usize) -> bool {
    let isr = adc.isr().read();

    if isr.eoc() {
        // Reading DR clears EOC
        let value = adc.dr().read().rdata();
        let k = CURSOR[index].fetch_add(1, Ordering::Relaxed);
        let slot = FIRST_SLOT[index].load(Ordering::Relaxed) as usize + k as usize + 1;
        if let Some(result) = RESULTS.get(slot) {
            result.store(value, Ordering::Relaxed);
        }
    }

    if isr.eos() {
        adc.isr().write(|w| w.set_eos(true));
        CURSOR[index].store(0, Ordering::Relaxed);
        return true;
    }
    false
}

/// ADC1_2 interrupt body
///
/// Returns `true` when the current sequence has completed.
#[inline(always)]
pub fn on_adc_interrupt() -> bool {
    drain(pac::ADC1, 0);
    if drain(pac::ADC2, 1) {
        COMPLETE.store(true, Ordering::Release);
        return true;
    }
    false
}

// === Temperature ===

/// TS_CAL1: sensor reading at 30°C, VDDA = 3.0V
const TS_CAL1: *const u16 = 0x1FFF_75A8 as *const u16;
const TS_CAL1_TEMP_C: i32 = 30;

/// Factory calibration point, rescaled to the 3.3V analog supply
pub fn factory_temperature_reference() -> FactoryReference {
    let raw = unsafe { core::ptr::read_volatile(TS_CAL1) } as u32;
    FactoryReference::new((raw * 30 / 33) as u16, TS_CAL1_TEMP_C)
}

// === Hall sensor ===

/// PB6 = H1, PB7 = H2, PB8 = H3
pub struct HallInputs {
    h1: Input<'static>,
    h2: Input<'static>,
    h3: Input<'static>,
}

impl HallInputs {
    pub fn new(h1: Input<'static>, h2: Input<'static>, h3: Input<'static>) -> Self {
        Self { h1, h2, h3 }
    }
}

impl SectorInput for HallInputs {
    fn read_sector(&mut self) -> u8 {
        let h1 = self.h1.is_high() as u8;
        let h2 = self.h2.is_high() as u8;
        let h3 = self.h3.is_high() as u8;
        (h3 << 2) | (h2 << 1) | h1
    }
}

/// SPI1 link to the angle sensor, chip select driven by software
pub struct SensorSpi {
    spi: Spi<'static, Blocking>,
    cs: Output<'static>,
}

impl SensorSpi {
    pub fn new(spi: Spi<'static, Blocking>, cs: Output<'static>) -> Self {
        Self { spi, cs }
    }
}

impl SensorLink for SensorSpi {
    type Error = spi::Error;

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), spi::Error> {
        self.cs.set_low();
        let result = self.spi.blocking_write(&write_frame(reg, value));
        self.cs.set_high();
        result
    }
}

// === CRC ===

/// STM32 default CRC-32 (poly 0x04C11DB7, init 0xFFFFFFFF)
pub fn crc_config() -> Result<CrcConfig, CrcConfigError> {
    CrcConfig::new(
        InputReverseConfig::None,
        false, // reverse_out
        PolySize::Width32,
        0xFFFF_FFFF,
        0x04C1_1DB7,
    )
}

/// CRC unit used to protect the stored configuration
pub struct CrcUnit(Crc<'static>);

impl CrcUnit {
    pub fn new(crc: Crc<'static>) -> Self {
        Self(crc)
    }
}

impl Crc32 for CrcUnit {
    fn checksum(&mut self, words: &[u32]) -> u32 {
        self.0.reset();
        self.0.feed_words(words)
    }
}

#![no_std]
#![no_main]

// This mod MUST go first, so that the others see its macros.
mod fmt;

mod eeprom;
mod hardware;
mod measurement;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;
use embassy_stm32::{
    adc::Adc,
    crc::Crc,
    flash::Flash,
    gpio::{Input, Level, Output, Pull, Speed},
    spi::{self, Spi},
    time::Hertz,
    timer::{
        complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
        low_level::CountingMode,
        simple_pwm::PwmPin,
        Channel,
    },
};
use embassy_time::{Duration, Timer};

use g4_acquisition::acquisition::{Sequencer, TriggerTiming};
use g4_acquisition::config::params::{
    hall::STARTUP_DELAY_MS, PWM_FREQ_HZ, PWM_PERIOD_S, TIMER_FREQ_HZ,
};
use g4_acquisition::current_sense::{ControlMode, CurrentSense};
use g4_acquisition::hall::HallDecoder;

use hardware::{CrcUnit, G4Sequencer, HallInputs, SensorSpi};
use measurement::MeasurementContext;
use tasks::{offset_calibration_task, telemetry_task};

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let config = hardware::create_clock_config();
    let p = embassy_stm32::init(config);

    info!("Phase current acquisition • STM32G431VB @ 170MHz");

    // Stored configuration (offsets, current limit, sector map)
    let mut flash = Flash::new_blocking(p.FLASH);
    let mut crc = CrcUnit::new(Crc::new(p.CRC, hardware::crc_config().unwrap()));
    let stored = eeprom::load_or_initialize_config(&mut flash, &mut crc);
    info!(
        "Config: version={}, current limit={}A, offset tau={}s",
        stored.version,
        stored.acquisition.current_limit,
        stored.acquisition.offset_tau()
    );

    // PWM timer (TIM1), outputs stay off; it only paces the conversions
    let mut uvw_pwm = ComplementaryPwm::new(
        p.TIM1,
        Some(PwmPin::new(
            p.PE9,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(ComplementaryPwmPin::new(
            p.PE8,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(PwmPin::new(
            p.PE11,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(ComplementaryPwmPin::new(
            p.PE10,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(PwmPin::new(
            p.PE13,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(ComplementaryPwmPin::new(
            p.PE12,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        None,
        None,
        Hertz(PWM_FREQ_HZ),
        CountingMode::EdgeAlignedUp,
    );
    uvw_pwm.disable(Channel::Ch1);
    uvw_pwm.disable(Channel::Ch2);
    uvw_pwm.disable(Channel::Ch3);

    // Angle sensor: pole pairs can only be programmed after its start-up time
    Timer::after_millis(STARTUP_DELAY_MS).await;
    let mut spi_config = spi::Config::default();
    spi_config.mode = spi::MODE_3;
    spi_config.frequency = Hertz(1_000_000);
    let mut link = SensorSpi::new(
        Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, spi_config),
        Output::new(p.PA4, Level::High, Speed::VeryHigh),
    );
    if let Err(e) = HallDecoder::<HallInputs>::program_pole_pairs(&mut link) {
        error!("Pole pair programming failed: {:?}", e);
    }

    let hall = HallDecoder::new(
        HallInputs::new(
            Input::new(p.PB6, Pull::None),
            Input::new(p.PB7, Pull::None),
            Input::new(p.PB8, Pull::None),
        ),
        stored.hall,
    );
    if !hall.is_sector_map_calibrated() {
        warn!("Sector map not calibrated, angle readings are meaningless");
    }

    let current = CurrentSense::new(
        stored.acquisition,
        hardware::factory_temperature_reference(),
        PWM_PERIOD_S,
    );

    let sequencer = Sequencer::new(
        G4Sequencer::new(Adc::new(p.ADC1), Adc::new(p.ADC2)),
        TriggerTiming::new(TIMER_FREQ_HZ, PWM_FREQ_HZ),
    );

    measurement::MODE.publish(ControlMode::Calibration);
    measurement::install(MeasurementContext {
        sequencer,
        current,
        hall,
    });
    measurement::with_context(|ctx| ctx.sequencer.init());

    spawner.spawn(offset_calibration_task(flash, crc)).unwrap();
    spawner.spawn(telemetry_task()).unwrap();

    // Keep the PWM timer alive
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

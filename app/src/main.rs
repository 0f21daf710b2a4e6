#![no_main]
#![no_std]

use defmt_rtt as _;
use panic_probe as _;

use core::fmt::Display;

use hal::{self, clocks::Clocks, pac};

use rotorsense_algo::{
    report::render, AngleReport, EncoderConfig, FrameLayout, OutputMode, Polarity,
    QuadratureAccumulator, RpmReport, SensorConfig,
};

// Incremental encoder: 1023 PPR, RPM printed at 10 Hz
const ENCODER: EncoderConfig = EncoderConfig {
    pulses_per_revolution: 1023,
    update_hz: 10,
    deadband_rpm: 0.5,
    polarity: Polarity::Normal,
};

// MA730 on SPI1, angle every 50 ms
const SENSOR: SensorConfig = SensorConfig {
    layout: FrameLayout::MA730,
    mode: OutputMode::Angle,
    filter_enabled: false,
    alpha: 0.2,
    deadband_rpm: 0.5,
    poll_interval_ms: 50,
};

// Current shaft position reads as 0 deg after reset
const ZERO_AT_STARTUP: bool = true;

static QUADRATURE: QuadratureAccumulator = QuadratureAccumulator::new(ENCODER.polarity);

/// Prints one report line over RTT.
fn emit<R: Display>(report: &R) {
    match render(report) {
        Ok(line) => defmt::println!("{=str}", line.as_str()),
        Err(_) => defmt::warn!("OUTPUT: report line does not fit"),
    }
}

#[rtic::app(device = pac, peripherals = true, dispatchers = [TIM7])]
mod app {
    use super::*;

    use rotorsense_algo::{AbsoluteMonitor, AbsoluteReader, RateSampler};
    use rotorsense_algo::timing::MonotonicClock;
    use rotorsense_drivers::*;

    type Monitor =
        AbsoluteMonitor<encoder_spi::SensorSpi, encoder_spi::SensorCs, timer::MicrosClock>;

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        edges: encoder_abz::EdgeInput,
        sample_timer: timer::SampleTimer,
        sampler: RateSampler,
        sampler_clock: timer::MicrosClock,
        monitor: Monitor,
        poll_cycles: u32,
    }

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local) {
        let dp = ctx.device;
        let clock_cfg = Clocks::default();
        clock_cfg.setup().unwrap();

        let sysclk_freq = clock_cfg.sysclk(); // System clock frequency in Hz
        defmt::debug!("SYSTEM: Clock frequency is {} MHz", sysclk_freq / 1000000);

        // Configuration errors are fatal at startup
        ENCODER.validate().unwrap();
        SENSOR.validate().unwrap();

        let mut clock = timer::MicrosClock::start(dp.TIM2, &clock_cfg);

        // Absolute path
        let reader = AbsoluteReader::new(
            encoder_spi::SensorSpi::new(dp.SPI1),
            encoder_spi::SensorCs::new(),
            SENSOR.layout,
        );
        let mut monitor = AbsoluteMonitor::new(reader, clock, &SENSOR).unwrap();
        if ZERO_AT_STARTUP {
            match monitor.set_zero() {
                Ok(raw) => defmt::info!("SENSOR: zero captured at raw count {}", raw),
                Err(err) => defmt::warn!("SENSOR: zero capture failed: {}", err),
            }
        }

        // Incremental path
        let sampler = RateSampler::new(&ENCODER, clock.now_us()).unwrap();
        let edges = encoder_abz::EdgeInput::new();
        let sample_timer = timer::SampleTimer::new(dp.TIM3, &clock_cfg, ENCODER.update_hz);

        defmt::debug!(
            "SENSOR: {} counts/rev, tracks up to {} RPM",
            monitor.modulus(),
            SENSOR.max_trackable_rpm()
        );

        (
            Shared {},
            Local {
                edges,
                sample_timer,
                sampler,
                sampler_clock: clock,
                monitor,
                poll_cycles: sysclk_freq / 1000 * SENSOR.poll_interval_ms,
            },
        )
    }

    #[task(binds = EXTI0, local = [edges], priority = 3)]
    fn abz_edge(cx: abz_edge::Context) {
        QUADRATURE.on_edge(cx.local.edges.b_high());
        cx.local.edges.clear_pending();
    }

    #[task(binds = TIM3, local = [sample_timer, sampler, sampler_clock], priority = 2)]
    fn rate_sample(cx: rate_sample::Context) {
        // Clear the update interrupt flag
        cx.local.sample_timer.clear();

        if let Some(rpm) = cx.local.sampler.sample(cx.local.sampler_clock, &QUADRATURE) {
            emit(&RpmReport(rpm));
        }
    }

    #[idle(local = [monitor, poll_cycles])]
    fn idle(cx: idle::Context) -> ! {
        let monitor = cx.local.monitor;
        loop {
            match monitor.poll() {
                Ok(reading) => {
                    if let Some(angle) = reading.angle_deg {
                        emit(&AngleReport(angle));
                    }
                    if let Some(rpm) = reading.rpm {
                        emit(&RpmReport(rpm));
                    }
                }
                Err(err) => defmt::warn!("SENSOR: read failed: {}", err),
            }
            cortex_m::asm::delay(*cx.local.poll_cycles);
        }
    }
}

#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}

use defmt::{error, info, warn};
use detonator_core::config::TICK_PERIOD_MS;
use detonator_core::context::DeviceContext;
use detonator_core::detonation::DetonationStateMachine;
use detonator_core::fifo::FifoSyncReader;
use detonator_core::orientation::OrientationEstimator;
use detonator_core::telemetry::{FaultSite, TelemetryEventKind, TelemetryPayload};
use embassy_stm32::gpio::Output;
use embassy_time::{Delay, Timer};

use crate::hw::{DeviceHandle, EmbassyClock, Mpu6050, PulseIgnition, Ssd1306Display};
use crate::telemetry::{TelemetryCursor, log_orientation, log_record};

/// Control loop: one state-machine tick and one sensor read per period.
#[embassy_executor::task]
pub async fn run(
    ctx: &'static DeviceContext,
    ignition: Output<'static>,
    sensor: DeviceHandle,
    display: DeviceHandle,
) -> ! {
    let mut display = Ssd1306Display::new(display);
    if let Err(err) = display.init() {
        warn!("display init failed: {}", err);
    }

    let mut sensor = Mpu6050::new(sensor);
    if let Err(err) = sensor.verify_identity().and_then(|()| sensor.enable_fifo()) {
        error!("motion sensor unavailable: {}", err);
        loop {
            core::future::pending::<()>().await;
        }
    }
    info!("motion sensor ready");

    let mut machine = DetonationStateMachine::new(ctx, PulseIgnition::new(ignition), display, Delay);
    let mut reader = FifoSyncReader::new(sensor, EmbassyClock, Delay);
    let mut estimator = OrientationEstimator::new();
    let mut cursor = TelemetryCursor::new();

    machine.boot();

    loop {
        // A fixed sleep rather than a ticker: a tick that ran a countdown must
        // not be followed by a burst of catch-up ticks.
        Timer::after_millis(u64::from(TICK_PERIOD_MS)).await;

        if let Err(err) = machine.tick(TICK_PERIOD_MS).await {
            error!("{}", defmt::Display2Format(&err));
        }

        let now_ms = machine.uptime_ms();
        let result = reader.read_packet().await;
        let report = reader.last_report();
        if report.resets > 0 {
            estimator.reset();
        }
        match result {
            Ok(Some(packet)) => log_orientation(&estimator.update(&packet)),
            Ok(None) => {}
            Err(err) => {
                warn!("fifo read failed: {}", err);
                machine.telemetry_mut().record(
                    TelemetryEventKind::Fault(FaultSite::MotionSensor),
                    TelemetryPayload::None,
                    now_ms,
                );
            }
        }
        report.record_into(machine.telemetry_mut(), now_ms);

        cursor.drain(machine.telemetry(), log_record);
    }
}

use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use detonator_core::context::DeviceContext;
use detonator_core::input::InputLine;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::time::Hertz;
use static_cell::StaticCell;

use crate::board;
use crate::hw::{DeviceHandle, SharedBus};

mod control_task;
mod input_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// State and edge mailbox shared by the input tasks and the control loop.
pub(super) static CONTEXT: DeviceContext = DeviceContext::new();

static I2C_BUS: StaticCell<SharedBus> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA5,
        PA6,
        PB8,
        PB9,
        EXTI0,
        EXTI1,
        EXTI6,
        I2C1,
        ..
    } = hal::init(config);

    let ignition = Output::new(PA5, Level::Low, Speed::Low);

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz(board::I2C_FREQUENCY_HZ);
    let bus: &'static SharedBus =
        I2C_BUS.init(RefCell::new(I2c::new_blocking(I2C1, PB8, PB9, i2c_config)));
    let sensor = DeviceHandle::new(bus, board::MPU6050_ADDRESS);
    let display = DeviceHandle::new(bus, board::SSD1306_ADDRESS);

    let inputs = [
        (ExtiInput::new(PA0, EXTI0, Pull::Down), InputLine::Mode),
        (ExtiInput::new(PA1, EXTI1, Pull::Down), InputLine::Primary),
        (ExtiInput::new(PA6, EXTI6, Pull::Down), InputLine::Motion),
    ];
    for (pin, line) in inputs {
        spawner
            .spawn(input_task::run(pin, line, &CONTEXT))
            .expect("failed to spawn input task");
    }

    spawner
        .spawn(control_task::run(&CONTEXT, ignition, sensor, display))
        .expect("failed to spawn control task");

    core::future::pending::<()>().await;
}

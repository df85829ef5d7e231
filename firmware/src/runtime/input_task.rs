use detonator_core::context::DeviceContext;
use detonator_core::input::{EdgeKind, InputLine, input_by_id};
use embassy_stm32::exti::ExtiInput;

/// Forwards the catalogued trigger edge of one line into the shared mailbox.
///
/// Bounce is left in: the control loop's debouncer collapses it.
#[embassy_executor::task(pool_size = 3)]
pub async fn run(mut pin: ExtiInput<'static>, line: InputLine, ctx: &'static DeviceContext) -> ! {
    let edge = input_by_id(line).edge;
    loop {
        match edge {
            EdgeKind::Rising => pin.wait_for_rising_edge().await,
            EdgeKind::Falling => pin.wait_for_falling_edge().await,
        }
        ctx.signal(line);
    }
}

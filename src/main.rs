//! # TickOS Example Firmware
//!
//! Exercises every kernel service on an STM32F103 ("Blue Pill"):
//!
//! | Task | Behavior |
//! |------|----------|
//! | `count1`, `count10` | Add to a shared counter under a mutex, then sleep |
//! | `rx` | Drains a ring buffer filled from a timer callback |
//! | `boot` | Yields a few times and returns, exercising task exit |
//!
//! A 250 ms auto-restart software timer plays the part of a byte-arrival
//! interrupt: its callback pushes into `RX`, and the `rx` task consumes.
//!
//! Build with `cargo build --release --target thumbv7m-none-eabi --features firmware`.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::{entry, exception};
use panic_halt as _;

use tickos::arch::cortex_m3::{configure_system_clock, timer_source_isr, TIMER_SOURCE_IRQ};
use tickos::kernel;
use tickos::mutex::Mutex;
use tickos::ringbuf::IrqRingBuffer;
use tickos::timer;

static SHARED: Mutex = Mutex::new();
static COUNTER: AtomicU32 = AtomicU32::new(0);
static RX: IrqRingBuffer = IrqRingBuffer::new();
static RX_BYTES: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// Adds `step` to the shared counter every 20 ms.
fn counter_task(step: usize) -> i32 {
    loop {
        SHARED.lock().expect("shared mutex invalidated");
        // Read-modify-write is only safe while the mutex is held
        let value = COUNTER.load(Ordering::Relaxed);
        COUNTER.store(value.wrapping_add(step as u32), Ordering::Relaxed);
        SHARED.unlock().expect("count task does not own the mutex");
        kernel::msleep(20);
    }
}

/// Consumes whatever the timer callback produced.
fn rx_task(_: usize) -> i32 {
    let mut buf = [0u8; 8];
    loop {
        let n = RX.get(&mut buf);
        if n == 0 {
            kernel::delay(1);
            continue;
        }
        RX_BYTES.fetch_add(n as u32, Ordering::Relaxed);
    }
}

/// Short-lived task: yields `rounds` times, then exits with its id.
fn boot_task(rounds: usize) -> i32 {
    for _ in 0..rounds {
        kernel::yield_now();
    }
    kernel::current_task_id() as i32
}

/// Timer callback, in interrupt context.
fn heartbeat(byte: usize) {
    RX.put(&[byte as u8], true);
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

/// Every device interrupt lands here; only TIM4 is enabled.
#[exception]
unsafe fn DefaultHandler(irqn: i16) {
    if irqn == TIMER_SOURCE_IRQ as i16 {
        timer_source_isr();
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    // SysTick and TIM4 dividers assume the 72 MHz PLL clock
    configure_system_clock().expect("HSE/PLL failed to start");

    let cp = cortex_m::Peripherals::take().expect("core peripherals already taken");

    let rx_storage = cortex_m::singleton!(: [u8; 32] = [0; 32]).expect("rx storage taken");
    RX.attach(rx_storage).expect("rx storage is empty");

    kernel::init();

    kernel::create_task(counter_task, 1, 512, Some("count1")).expect("Failed to create count1");
    kernel::create_task(counter_task, 10, 512, Some("count10"))
        .expect("Failed to create count10");
    kernel::create_task(rx_task, 0, 512, Some("rx")).expect("Failed to create rx");
    kernel::create_task(boot_task, 3, 256, Some("boot")).expect("Failed to create boot");

    timer::init().expect("Failed to start the timer service");
    timer::create(250, true, heartbeat, 0xA5).expect("Failed to create heartbeat timer");

    // Start the scheduler — does not return
    kernel::start(cp)
}

//! # Architecture Abstraction Layer
//!
//! Everything that knows about registers lives below this module. The
//! rest of the kernel talks to the processor only through `port`, which
//! exposes the same small surface on every platform:
//!
//! - `request_context_switch()` — raise the context-switch trap
//! - `arm_timer_source()` / `disarm_timer_source()` — the software timer
//!   service's periodic interrupt
//!
//! On bare-metal ARM `port` is the Cortex-M3 port; everywhere else it is
//! the host port, which performs the trap's bookkeeping synchronously so
//! the scheduler can be exercised in unit tests.
//!
//! [`frame`] holds the initial register image layout and is shared by
//! both.

pub mod frame;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m3;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m3 as port;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod host;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use host as port;

use crate::error::{KernelError, Result};

/// SysTick counts down from its 24-bit reload register.
const SYSTICK_MAX_RELOAD: u32 = 0x00FF_FFFF;

/// SysTick reload value for `tick_hz` interrupts per second from a
/// `clock_hz` core clock.
///
/// # Returns
/// `Err(HardwareInit)` for 0 Hz, more than 1000 Hz, or a period that does
/// not fit the 24-bit counter.
pub fn systick_reload(clock_hz: u32, tick_hz: u32) -> Result<u32> {
    if tick_hz == 0 || tick_hz > 1000 {
        return Err(KernelError::HardwareInit);
    }
    let cycles = clock_hz / tick_hz;
    if cycles == 0 || cycles - 1 > SYSTICK_MAX_RELOAD {
        return Err(KernelError::HardwareInit);
    }
    Ok(cycles - 1)
}

/// Prescaler and auto-reload register values for a 16-bit general-purpose
/// timer that should overflow every `period_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerDivider {
    /// Value for PSC (the clock is divided by `psc + 1`).
    pub psc: u16,
    /// Value for ARR (the counter wraps after `arr + 1` counts).
    pub arr: u16,
}

/// Split `timer_clock_hz * period_ms` into a prescaler and a reload that
/// both fit in 16 bits.
pub fn timer_divider(timer_clock_hz: u32, period_ms: u32) -> Result<TimerDivider> {
    let counts = timer_clock_hz as u64 * period_ms as u64 / 1000;
    if counts == 0 {
        return Err(KernelError::HardwareInit);
    }
    let div = counts.div_ceil(1 << 16);
    if div > 1 << 16 {
        return Err(KernelError::HardwareInit);
    }
    let reload = counts / div;
    Ok(TimerDivider {
        psc: (div - 1) as u16,
        arr: (reload - 1) as u16,
    })
}

/// Highest core clock the STM32F103 is rated for.
const MAX_CORE_CLOCK_HZ: u32 = 72_000_000;

const CFGR_PLLSRC_HSE: u32 = 1 << 16;
const CFGR_PLLMUL_SHIFT: u32 = 18;
const CFGR_PPRE1_DIV2: u32 = 0b100 << 8;

/// RCC_CFGR value (before the clock switch) for SYSCLK = HSE × `pll_mul`:
/// AHB undivided, APB1 halved to stay within 36 MHz, APB2 undivided.
///
/// # Returns
/// `Err(HardwareInit)` for a multiplier outside 2..=16 or a core clock above
/// 72 MHz.
pub fn pll_cfgr(hse_hz: u32, pll_mul: u32) -> Result<u32> {
    if !(2..=16).contains(&pll_mul) {
        return Err(KernelError::HardwareInit);
    }
    match hse_hz.checked_mul(pll_mul) {
        Some(hz) if hz <= MAX_CORE_CLOCK_HZ => {}
        _ => return Err(KernelError::HardwareInit),
    }
    Ok(CFGR_PLLSRC_HSE | ((pll_mul - 2) << CFGR_PLLMUL_SHIFT) | CFGR_PPRE1_DIV2)
}

/// Flash wait states needed at `sysclk_hz`.
pub fn flash_latency(sysclk_hz: u32) -> Result<u32> {
    match sysclk_hz {
        0..=24_000_000 => Ok(0),
        24_000_001..=48_000_000 => Ok(1),
        48_000_001..=MAX_CORE_CLOCK_HZ => Ok(2),
        _ => Err(KernelError::HardwareInit),
    }
}

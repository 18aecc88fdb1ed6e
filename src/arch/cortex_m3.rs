//! # Cortex-M3 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M3 (STM32F103). Implements
//! the HSE/PLL clock bring-up, context switching via PendSV, SysTick
//! configuration, first-task launch and the TIM4 interrupt that drives the
//! software timer service.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M3 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry, the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the process stack. The PendSV handler pushes R4–R11 below that frame,
//! hands the resulting PSP to the scheduler, and restores R4–R11 from
//! whatever stack the scheduler returns. Exception return unstacks the
//! rest.
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV both run at the lowest priority (0xFF), so a
//! context switch never preempts a device interrupt handler.

use core::arch::{asm, naked_asm};

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{NVIC, SCB, SYST};

use crate::arch::{flash_latency, pll_cfgr, timer_divider};
use crate::config::{HSE_HZ, PLL_MUL, SYSTEM_CLOCK_HZ, TICK_HZ, TIMER_PERIOD_MS};
use crate::error::{KernelError, Result};
use crate::kernel;

// ---------------------------------------------------------------------------
// System clock
// ---------------------------------------------------------------------------

const RCC_CR: *mut u32 = 0x4002_1000 as *mut u32;
const RCC_CFGR: *mut u32 = 0x4002_1004 as *mut u32;
const FLASH_ACR: *mut u32 = 0x4002_2000 as *mut u32;

const RCC_CR_HSEON: u32 = 1 << 16;
const RCC_CR_HSERDY: u32 = 1 << 17;
const RCC_CR_PLLON: u32 = 1 << 24;
const RCC_CR_PLLRDY: u32 = 1 << 25;
const RCC_CFGR_SW_MASK: u32 = 0b11;
const RCC_CFGR_SW_PLL: u32 = 0b10;
const RCC_CFGR_SWS_MASK: u32 = 0b11 << 2;
const RCC_CFGR_SWS_PLL: u32 = 0b10 << 2;
const FLASH_ACR_LATENCY_MASK: u32 = 0b111;
const FLASH_ACR_PRFTBE: u32 = 1 << 4;

/// Polls before a clock is declared dead.
const CLOCK_READY_SPINS: u32 = 0x1_0000;

fn wait_for(reg: *mut u32, mask: u32, value: u32) -> Result<()> {
    for _ in 0..CLOCK_READY_SPINS {
        if unsafe { core::ptr::read_volatile(reg) } & mask == value {
            return Ok(());
        }
    }
    Err(KernelError::HardwareInit)
}

/// Switch SYSCLK from the reset HSI (8 MHz) to HSE × `PLL_MUL`, i.e.
/// `SYSTEM_CLOCK_HZ`, with APB1 at half speed.
///
/// Must run before [`configure_systick`] and `arm_timer_source()`, whose
/// dividers assume `SYSTEM_CLOCK_HZ`.
///
/// # Returns
/// `Err(HardwareInit)` if the crystal or the PLL does not lock; the core
/// is then still on the HSI.
pub fn configure_system_clock() -> Result<()> {
    let cfgr = pll_cfgr(HSE_HZ, PLL_MUL)?;
    let latency = flash_latency(SYSTEM_CLOCK_HZ)?;

    unsafe {
        let cr = core::ptr::read_volatile(RCC_CR);
        core::ptr::write_volatile(RCC_CR, cr | RCC_CR_HSEON);
    }
    wait_for(RCC_CR, RCC_CR_HSERDY, RCC_CR_HSERDY)?;

    unsafe {
        // Wait states go up before the clock does
        let acr = core::ptr::read_volatile(FLASH_ACR) & !FLASH_ACR_LATENCY_MASK;
        core::ptr::write_volatile(FLASH_ACR, acr | latency | FLASH_ACR_PRFTBE);
        core::ptr::write_volatile(RCC_CFGR, cfgr);

        let cr = core::ptr::read_volatile(RCC_CR);
        core::ptr::write_volatile(RCC_CR, cr | RCC_CR_PLLON);
    }
    wait_for(RCC_CR, RCC_CR_PLLRDY, RCC_CR_PLLRDY)?;

    unsafe {
        let cfgr = core::ptr::read_volatile(RCC_CFGR) & !RCC_CFGR_SW_MASK;
        core::ptr::write_volatile(RCC_CFGR, cfgr | RCC_CFGR_SW_PLL);
    }
    wait_for(RCC_CFGR, RCC_CFGR_SWS_MASK, RCC_CFGR_SWS_PLL)
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Program SysTick to fire at `TICK_HZ` from the processor clock.
///
/// # Returns
/// `Err(HardwareInit)` if the tick period does not fit the counter; SysTick
/// is left untouched in that case.
pub fn configure_systick(syst: &mut SYST) -> Result<()> {
    let reload = super::systick_reload(SYSTEM_CLOCK_HZ, TICK_HZ)?;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
    Ok(())
}

/// Set PendSV and SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Pend the context-switch trap. It is taken as soon as no other exception
/// is active and interrupts are enabled.
#[inline]
pub fn request_context_switch() {
    SCB::set_pendsv();
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Switch Thread mode to the PSP and jump into the first task.
///
/// `psp` points at the saved R4 of a fabricated frame. The software half
/// is skipped, the hardware half is popped by hand since there is no
/// exception to return from, and execution continues at the frame's PC
/// with R0 (the task id) and LR loaded.
///
/// # Safety
/// Must only be called once, with interrupts disabled, with a frame built
/// by `arch::frame::InitialFrame`.
pub unsafe fn start_first_task(psp: *mut u32) -> ! {
    asm!(
        "adds r0, #32",         // Skip R4-R11 (8 × 4 bytes)
        "msr psp, r0",

        // Thread mode uses PSP from now on (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        "pop {{r0-r3, r12}}",   // R0 = task id
        "pop {{r4, r5}}",       // LR, PC
        "pop {{r6}}",           // xPSR, discarded
        "mov lr, r4",
        "orr r5, r5, #1",       // bx needs the Thumb bit

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the actual context switch.
///
/// ## Sequence
/// 1. Push R4–R11 onto the outgoing task's stack (PSP)
/// 2. Hand the updated PSP to the scheduler, get the incoming PSP back
/// 3. Pop R4–R11 from the incoming task's stack
/// 4. Return from exception (hardware restores R0–R3, R12, LR, PC, xPSR)
///
/// # Safety
/// Naked: entered directly from the vector table and must follow the
/// exception entry/exit convention exactly.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        // Keep EXC_RETURN; r3 pads the push to 8 bytes for the call
        "push {{r3, lr}}",
        "bl {switch}",
        "pop {{r3, lr}}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "isb",
        "bx lr",

        switch = sym pendsv_switch,
    );
}

/// Called from PendSV with the outgoing PSP; returns the incoming PSP.
unsafe extern "C" fn pendsv_switch(saved_sp: *mut u32) -> *mut u32 {
    kernel::switch_context(saved_sp)
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — scheduler tick entry point.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    kernel::on_hardware_tick();
}

// ---------------------------------------------------------------------------
// Software timer source (TIM4)
// ---------------------------------------------------------------------------

const RCC_APB1RSTR: *mut u32 = 0x4002_1010 as *mut u32;
const RCC_APB1ENR: *mut u32 = 0x4002_101C as *mut u32;
const RCC_TIM4: u32 = 1 << 2;

const TIM4_BASE: usize = 0x4000_0800;
const TIM_CR1: *mut u32 = TIM4_BASE as *mut u32;
const TIM_DIER: *mut u32 = (TIM4_BASE + 0x0C) as *mut u32;
const TIM_SR: *mut u32 = (TIM4_BASE + 0x10) as *mut u32;
const TIM_EGR: *mut u32 = (TIM4_BASE + 0x14) as *mut u32;
const TIM_PSC: *mut u32 = (TIM4_BASE + 0x28) as *mut u32;
const TIM_ARR: *mut u32 = (TIM4_BASE + 0x2C) as *mut u32;

const TIM_CR1_CEN: u32 = 1 << 0;
const TIM_DIER_UIE: u32 = 1 << 0;
const TIM_SR_UIF: u32 = 1 << 0;
const TIM_EGR_UG: u32 = 1 << 0;

/// TIM4 global interrupt.
#[derive(Debug, Clone, Copy)]
pub struct TimerSourceIrq;

/// Position of TIM4 in the STM32F103 vector table.
pub const TIMER_SOURCE_IRQ: u16 = 30;

unsafe impl InterruptNumber for TimerSourceIrq {
    fn number(self) -> u16 {
        TIMER_SOURCE_IRQ
    }
}

/// Start TIM4 with an update interrupt every `TIMER_PERIOD_MS`.
///
/// TIM4 sits on APB1, whose timers are clocked at twice the bus clock,
/// i.e. at `SYSTEM_CLOCK_HZ` with the default 72 MHz tree.
pub fn arm_timer_source() -> Result<()> {
    let div = timer_divider(SYSTEM_CLOCK_HZ, TIMER_PERIOD_MS)?;

    cortex_m::interrupt::free(|_| unsafe {
        let en = core::ptr::read_volatile(RCC_APB1ENR);
        core::ptr::write_volatile(RCC_APB1ENR, en | RCC_TIM4);
        let rst = core::ptr::read_volatile(RCC_APB1RSTR);
        core::ptr::write_volatile(RCC_APB1RSTR, rst | RCC_TIM4);
        core::ptr::write_volatile(RCC_APB1RSTR, rst & !RCC_TIM4);

        core::ptr::write_volatile(TIM_PSC, div.psc as u32);
        core::ptr::write_volatile(TIM_ARR, div.arr as u32);
        // Latch PSC now; UG also raises UIF, which must not count as a period
        core::ptr::write_volatile(TIM_EGR, TIM_EGR_UG);
        core::ptr::write_volatile(TIM_SR, 0);

        core::ptr::write_volatile(TIM_DIER, TIM_DIER_UIE);
        core::ptr::write_volatile(TIM_CR1, TIM_CR1_CEN);
        NVIC::unmask(TimerSourceIrq);
    });
    Ok(())
}

/// Stop TIM4 and its interrupt, and gate its clock.
pub fn disarm_timer_source() {
    cortex_m::interrupt::free(|_| unsafe {
        NVIC::mask(TimerSourceIrq);
        core::ptr::write_volatile(TIM_DIER, 0);
        core::ptr::write_volatile(TIM_CR1, 0);
        let en = core::ptr::read_volatile(RCC_APB1ENR);
        core::ptr::write_volatile(RCC_APB1ENR, en & !RCC_TIM4);
    });
}

/// Body of the TIM4 interrupt handler: acknowledge the update flag and run
/// one period of the timer service.
pub fn timer_source_isr() {
    let sr = unsafe { core::ptr::read_volatile(TIM_SR) };
    if sr & TIM_SR_UIF == 0 {
        return;
    }
    // rc_w0: writing 0 clears, writing 1 leaves untouched
    unsafe { core::ptr::write_volatile(TIM_SR, !TIM_SR_UIF) };
    crate::timer::service_period();
}

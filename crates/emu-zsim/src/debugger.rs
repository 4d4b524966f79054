//! Debug control loop.
//!
//! Execution runs in batches of [`BATCH_TSTATES`] so the host can handle
//! commands between them. After every instruction, in this order:
//!
//! 1. a CPU error (rejected bank switch) stops;
//! 2. persistent breakpoints at the new PC stop or emit log output;
//! 3. a watchpoint hit stops;
//! 4. the transient breakpoints of `continue`/step-over stop, unless the
//!    CPU is halted;
//! 5. step-out stops after a RET-class instruction that unwound past the
//!    starting stack pointer;
//! 6. an accepted interrupt stops if break-on-interrupt is set;
//! 7. the pause flag stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};
use zilog_z80::Registers;

use crate::breakpoint::{BreakpointOutcome, Breakpoints};
use crate::config::{ConfigError, ZSimConfig};
use crate::coverage::Coverage;
use crate::event::{BreakEvent, BreakReason, Notification};
use crate::history::{History, HistoryEntry};
use crate::memory::{Access, MemoryError, WatchAccess};
use crate::zsim::{MachineView, ZSim};

/// T-states executed before control returns to the host.
pub const BATCH_TSTATES: u64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    SteppingOut,
}

/// Sets the pause flag from another thread.
#[derive(Debug, Clone)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn pause(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// A watched address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watchpoint {
    pub start: u16,
    pub len: usize,
    pub access: WatchAccess,
}

/// Whether `op` leaves a subroutine: RET, RET cc, RETI or RETN.
fn is_return(opcode: [u8; 4]) -> bool {
    match opcode[0] {
        0xC9 => true,
        op if op & 0xC7 == 0xC0 => true,
        0xED => matches!(opcode[1], 0x4D | 0x45),
        _ => false,
    }
}

/// Where step-over should stop for the instruction at `pc`, if it is one
/// that returns to the following instruction later (CALL, RST, repeating
/// block instructions, HALT).
fn step_over_target(pc: u16, opcode: [u8; 4]) -> Option<u16> {
    let len = match opcode[0] {
        0xCD => 3,
        op if op & 0xC7 == 0xC4 => 3,
        op if op & 0xC7 == 0xC7 => 1,
        0x76 => 1,
        0xED if matches!(opcode[1], 0xB0..=0xB3 | 0xB8..=0xBB) => 2,
        _ => return None,
    };
    Some(pc.wrapping_add(len))
}

pub struct Debugger {
    zsim: ZSim,
    breakpoints: Breakpoints,
    watchpoints: Vec<Watchpoint>,
    history: History,
    history_spot_count: usize,
    coverage: Option<Coverage>,
    break_on_interrupt: bool,
    pause: Arc<AtomicBool>,
    state: RunState,
    transient: [Option<u16>; 2],
    step_out_sp: u16,
    logs: Vec<String>,
}

impl Debugger {
    /// Build the machine described by `config` and attach a debugger.
    pub fn from_config(config: &ZSimConfig) -> Result<Self, ConfigError> {
        let zsim = ZSim::new(config)?;
        Ok(Self::new(zsim, config))
    }

    #[must_use]
    pub fn new(zsim: ZSim, config: &ZSimConfig) -> Self {
        Self {
            zsim,
            breakpoints: Breakpoints::new(),
            watchpoints: Vec::new(),
            history: History::new(config.history_size),
            history_spot_count: config.history_spot_count,
            coverage: config.code_coverage.then(Coverage::new),
            break_on_interrupt: config.break_on_interrupt,
            pause: Arc::new(AtomicBool::new(false)),
            state: RunState::Idle,
            transient: [None; 2],
            step_out_sp: 0,
            logs: Vec::new(),
        }
    }

    // === Access ===

    #[must_use]
    pub fn zsim(&self) -> &ZSim {
        &self.zsim
    }

    pub fn zsim_mut(&mut self) -> &mut ZSim {
        &mut self.zsim
    }

    #[must_use]
    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state != RunState::Idle
    }

    #[must_use]
    pub fn pause_handle(&self) -> PauseHandle {
        PauseHandle(Arc::clone(&self.pause))
    }

    /// Ask a running machine to stop at the next instruction boundary.
    pub fn pause(&self) {
        self.pause.store(true, Ordering::Relaxed);
    }

    pub fn set_break_on_interrupt(&mut self, enabled: bool) {
        self.break_on_interrupt = enabled;
    }

    #[must_use]
    pub fn break_on_interrupt(&self) -> bool {
        self.break_on_interrupt
    }

    /// Addresses executed since the last continue or step.
    #[must_use]
    pub fn coverage(&self) -> Option<&Coverage> {
        self.coverage.as_ref()
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Registers at the history cursor, or the live ones.
    #[must_use]
    pub fn registers(&self) -> Registers {
        self.history
            .current()
            .map_or_else(|| self.zsim.registers(), |entry| entry.registers)
    }

    /// Recently executed addresses around the history cursor.
    #[must_use]
    pub fn history_spots(&self) -> Vec<u16> {
        self.history.spots(self.history_spot_count)
    }

    // === Watchpoints ===

    pub fn add_watchpoint(&mut self, start: u16, len: usize, access: WatchAccess) -> Result<(), MemoryError> {
        self.zsim.memory_mut().set_watchpoint(start, len, access)?;
        self.watchpoints.push(Watchpoint { start, len, access });
        Ok(())
    }

    /// Remove a watchpoint added with the same arguments. Returns false if
    /// there was none.
    pub fn remove_watchpoint(&mut self, start: u16, len: usize, access: WatchAccess) -> Result<bool, MemoryError> {
        let wp = Watchpoint { start, len, access };
        let Some(index) = self.watchpoints.iter().position(|w| *w == wp) else {
            return Ok(false);
        };
        self.zsim.memory_mut().remove_watchpoint(start, len, access)?;
        self.watchpoints.remove(index);
        Ok(true)
    }

    #[must_use]
    pub fn watchpoints(&self) -> &[Watchpoint] {
        &self.watchpoints
    }

    // === Running ===

    fn begin(&mut self, state: RunState) {
        self.history.go_live();
        if let Some(coverage) = &mut self.coverage {
            coverage.clear();
        }
        self.pause.store(false, Ordering::Relaxed);
        self.zsim.cpu_mut().take_interrupt_occurred();
        self.state = state;
    }

    /// Start running until a stop condition or one of the given addresses.
    pub fn start_continue(&mut self, bp1: Option<u16>, bp2: Option<u16>) {
        self.transient = [bp1, bp2];
        self.begin(RunState::Running);
    }

    /// Step over the instruction at PC. Instructions that do not return to
    /// the next address are single-stepped and the stop is returned at
    /// once; otherwise the machine is left running.
    pub fn start_step_over(&mut self) -> Option<BreakEvent> {
        let pc = self.zsim.pc();
        match step_over_target(pc, self.opcode_at(pc)) {
            Some(target) => {
                self.start_continue(Some(target), None);
                None
            }
            None => Some(self.step_into()),
        }
    }

    /// Run until the current subroutine returns.
    pub fn start_step_out(&mut self) {
        self.step_out_sp = self.zsim.registers().sp;
        self.transient = [None; 2];
        self.begin(RunState::SteppingOut);
    }

    /// Execute exactly one instruction.
    pub fn step_into(&mut self) -> BreakEvent {
        self.transient = [None; 2];
        self.begin(RunState::Running);
        let reason = match self.execute(false) {
            Some(reason) => reason,
            None => BreakReason::StepComplete,
        };
        self.stop(reason)
    }

    /// Run one batch. Returns the stop if one happened; `None` means the
    /// machine is still running and wants another batch.
    pub fn run_batch(&mut self) -> Option<BreakEvent> {
        if self.state == RunState::Idle {
            return None;
        }
        let leave_at = self.zsim.total_tstates() + BATCH_TSTATES;
        while self.zsim.total_tstates() < leave_at {
            if let Some(reason) = self.execute(true) {
                return Some(self.stop(reason));
            }
        }
        None
    }

    /// Run batches until something stops the machine.
    pub fn run_until_stop(&mut self) -> BreakEvent {
        loop {
            if let Some(event) = self.run_batch() {
                return event;
            }
            if self.state == RunState::Idle {
                return self.stop(BreakReason::ManualBreak);
            }
        }
    }

    pub fn run(&mut self, bp1: Option<u16>, bp2: Option<u16>) -> BreakEvent {
        self.start_continue(bp1, bp2);
        self.run_until_stop()
    }

    pub fn step_over(&mut self) -> BreakEvent {
        match self.start_step_over() {
            Some(event) => event,
            None => self.run_until_stop(),
        }
    }

    pub fn step_out(&mut self) -> BreakEvent {
        self.start_step_out();
        self.run_until_stop()
    }

    // === Reverse ===

    /// Move the history cursor one instruction back.
    pub fn step_back(&mut self) -> Option<HistoryEntry> {
        self.history.step_back().copied()
    }

    /// Move the history cursor one instruction forward. `None` once the
    /// live state is reached.
    pub fn step_forward(&mut self) -> Option<HistoryEntry> {
        self.history.step_forward().copied()
    }

    /// Reset the machine. History and coverage refer to the old run and
    /// are dropped.
    pub fn reset(&mut self) {
        self.zsim.reset();
        self.history.clear();
        if let Some(coverage) = &mut self.coverage {
            coverage.clear();
        }
        self.state = RunState::Idle;
        self.transient = [None; 2];
    }

    // === Save state ===

    #[must_use]
    pub fn save_state(&self) -> Vec<u8> {
        self.zsim.save_state()
    }

    /// Restore a state. History no longer matches the machine and is
    /// dropped.
    pub fn restore_state(&mut self, data: &[u8]) -> Result<(), emu_core::StateError> {
        self.zsim.restore_state(data)?;
        self.history.clear();
        Ok(())
    }

    // === Internals ===

    fn opcode_at(&self, pc: u16) -> [u8; 4] {
        let memory = self.zsim.memory();
        [0, 1, 2, 3].map(|i| memory.peek(pc.wrapping_add(i)))
    }

    fn stop(&mut self, reason: BreakReason) -> BreakEvent {
        self.state = RunState::Idle;
        self.transient = [None; 2];
        let event = BreakEvent {
            reason,
            pc: self.zsim.pc(),
            tstates: self.zsim.tstates(),
        };
        debug!(reason = %event.reason, pc = event.pc, "stopped");
        self.zsim.notify(&Notification::Paused(event.clone()));
        event
    }

    fn flush_logs(&mut self) {
        for text in self.logs.drain(..) {
            info!(target: "emu_zsim::logpoint", "{text}");
            self.zsim.notify(&Notification::Log(text));
        }
    }

    /// Execute one instruction and check the stop conditions.
    fn execute(&mut self, check_breakpoints: bool) -> Option<BreakReason> {
        let before = self.zsim.registers();
        let opcode = self.opcode_at(before.pc);
        if self.history.is_enabled() {
            let stack_top = self.zsim.memory().peek16(before.sp);
            self.history.push(HistoryEntry {
                registers: before,
                opcode,
                stack_top,
            });
        }

        self.zsim.memory_mut().clear_hit();
        self.zsim.step();
        self.zsim.memory_mut().mark_prog(before.pc);
        if let Some(coverage) = &mut self.coverage {
            coverage.store(before.pc);
        }

        if let Some(err) = self.zsim.take_error() {
            return Some(BreakReason::CpuError {
                message: err.to_string(),
            });
        }

        let now = self.zsim.registers();
        let pc = now.pc;
        if check_breakpoints && !self.breakpoints.is_empty() {
            let view = MachineView {
                registers: &now,
                memory: self.zsim.memory(),
            };
            let outcome = self.breakpoints.check(pc, &view, &mut self.logs);
            self.flush_logs();
            match outcome {
                BreakpointOutcome::Continue => {}
                BreakpointOutcome::Stop { id } => {
                    return Some(BreakReason::Breakpoint { id, address: pc });
                }
                BreakpointOutcome::ConditionError { id, error } => {
                    warn!(id, %error, "breakpoint condition failed");
                    return Some(BreakReason::Breakpoint { id, address: pc });
                }
                BreakpointOutcome::LogError { id, error } => {
                    return Some(BreakReason::Unknown {
                        message: format!("log point {id}: {error}"),
                    });
                }
            }
        }

        if let Some(hit) = self.zsim.memory().hit() {
            return Some(match hit.access {
                Access::Read => BreakReason::WatchpointRead {
                    address: hit.address,
                },
                Access::Write => BreakReason::WatchpointWrite {
                    address: hit.address,
                },
            });
        }

        if !now.halted && self.transient.contains(&Some(pc)) {
            return Some(BreakReason::StepComplete);
        }

        if self.state == RunState::SteppingOut
            && is_return(opcode)
            && now.sp > self.step_out_sp
            && now.sp > before.sp
        {
            return Some(BreakReason::StepComplete);
        }

        if self.zsim.cpu_mut().take_interrupt_occurred() && self.break_on_interrupt {
            return Some(BreakReason::Interrupt);
        }

        if self.pause.load(Ordering::Relaxed) {
            return Some(BreakReason::ManualBreak);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;

    use tracing_test::traced_test;
    use zilog_z80::Reg;

    use super::*;
    use crate::bankswitch::{BankSwitchRule, PortMatch};
    use crate::memory_model::PredefinedModel;

    fn make_debugger(program: &[u8]) -> Debugger {
        make_debugger_with(ZSimConfig::for_model(PredefinedModel::AllRam), program)
    }

    fn make_debugger_with(config: ZSimConfig, program: &[u8]) -> Debugger {
        let mut dbg = Debugger::from_config(&config).unwrap();
        let zsim = dbg.zsim_mut();
        zsim.memory_mut().write_block(0x8000, program, false).unwrap();
        zsim.set_register(Reg::Pc, 0x8000);
        zsim.set_register(Reg::Sp, 0xFF00);
        dbg
    }

    fn drain(rx: &Receiver<Notification>) -> Vec<Notification> {
        rx.try_iter().collect()
    }

    #[test]
    fn opcode_classes() {
        assert!(is_return([0xC9, 0, 0, 0]));
        assert!(is_return([0xD8, 0, 0, 0]));
        assert!(is_return([0xED, 0x4D, 0, 0]));
        assert!(!is_return([0xED, 0x44, 0, 0]));
        assert!(!is_return([0xC3, 0, 0, 0]));

        assert_eq!(step_over_target(0x100, [0xCD, 0, 0, 0]), Some(0x103));
        assert_eq!(step_over_target(0x100, [0xDC, 0, 0, 0]), Some(0x103));
        assert_eq!(step_over_target(0x100, [0xFF, 0, 0, 0]), Some(0x101));
        assert_eq!(step_over_target(0x100, [0x76, 0, 0, 0]), Some(0x101));
        assert_eq!(step_over_target(0x100, [0xED, 0xB0, 0, 0]), Some(0x102));
        assert_eq!(step_over_target(0x100, [0xED, 0xA0, 0, 0]), None);
        assert_eq!(step_over_target(0x100, [0x00, 0, 0, 0]), None);
    }

    #[test]
    fn breakpoint_in_loop_stops_before_watchpoint() {
        // LD B,3 ; loop: NOP ; DJNZ loop ; LD ($9000),A ; HALT
        let mut dbg = make_debugger(&[0x06, 0x03, 0x00, 0x10, 0xFD, 0x32, 0x00, 0x90, 0x76]);
        let id = dbg.breakpoints_mut().add(0x8002, None, None).unwrap();
        dbg.add_watchpoint(0x9000, 1, WatchAccess::WRITE).unwrap();

        let event = dbg.run(None, None);
        assert_eq!(event.reason, BreakReason::Breakpoint { id, address: 0x8002 });
        assert_eq!(dbg.registers().b, 3);

        dbg.breakpoints_mut().clear();
        let event = dbg.run(None, None);
        assert_eq!(event.reason, BreakReason::WatchpointWrite { address: 0x9000 });
        assert_eq!(event.pc, 0x8008);
    }

    #[test]
    fn conditional_breakpoint() {
        let mut dbg = make_debugger(&[0x06, 0x03, 0x00, 0x10, 0xFD, 0x76]);
        dbg.breakpoints_mut().add(0x8002, Some("b == 1"), None).unwrap();
        let event = dbg.run(None, None);
        assert!(matches!(event.reason, BreakReason::Breakpoint { .. }));
        assert_eq!(dbg.registers().b, 1);
    }

    #[traced_test]
    #[test]
    fn log_point_reports_without_stopping() {
        let mut dbg = make_debugger(&[0x00, 0x00, 0x00, 0x76]);
        let rx = dbg.zsim_mut().subscribe();
        dbg.breakpoints_mut()
            .add(0x8001, None, Some("a=${a}"))
            .unwrap();
        let event = dbg.run(Some(0x8002), None);
        assert_eq!(event.reason, BreakReason::StepComplete);
        assert_eq!(event.pc, 0x8002);
        let notes = drain(&rx);
        assert!(notes.contains(&Notification::Log("a=255".to_string())));
        assert!(matches!(notes.last(), Some(Notification::Paused(_))));
        assert!(logs_contain("a=255"));
    }

    #[test]
    fn step_over_call_and_step_out() {
        // CALL $8010 ; NOP ... $8010: LD A,5 ; RET
        let mut program = vec![0xCD, 0x10, 0x80, 0x00];
        program.resize(0x10, 0x00);
        program.extend_from_slice(&[0x3E, 0x05, 0xC9]);
        let mut dbg = make_debugger(&program);

        let event = dbg.step_over();
        assert_eq!(event.reason, BreakReason::StepComplete);
        assert_eq!(event.pc, 0x8003);
        assert_eq!(dbg.registers().a, 5);

        dbg.zsim_mut().set_register(Reg::Pc, 0x8000);
        let event = dbg.step_into();
        assert_eq!(event.pc, 0x8010);
        assert_eq!(dbg.registers().sp, 0xFEFE);

        let event = dbg.step_out();
        assert_eq!(event.reason, BreakReason::StepComplete);
        assert_eq!(event.pc, 0x8003);
        assert_eq!(dbg.registers().sp, 0xFF00);
    }

    #[test]
    fn step_over_plain_instruction_is_single_step() {
        let mut dbg = make_debugger(&[0x3C, 0x3C]);
        let event = dbg.step_over();
        assert_eq!(event.pc, 0x8001);
        assert_eq!(dbg.state(), RunState::Idle);
    }

    #[test]
    fn pause_stops_at_next_instruction() {
        // JR $
        let mut dbg = make_debugger(&[0x18, 0xFE]);
        dbg.start_continue(None, None);
        assert!(dbg.run_batch().is_none());
        assert!(dbg.zsim().tstates() >= BATCH_TSTATES);
        dbg.pause_handle().pause();
        let event = dbg.run_batch().unwrap();
        assert_eq!(event.reason, BreakReason::ManualBreak);
        assert!(!dbg.is_running());
    }

    #[test]
    fn break_on_interrupt() {
        // IM 1 ; EI ; JR $
        let mut dbg = make_debugger(&[0xED, 0x56, 0xFB, 0x18, 0xFE]);
        dbg.set_break_on_interrupt(true);
        let event = dbg.run(None, None);
        assert_eq!(event.reason, BreakReason::Interrupt);
        assert_eq!(event.pc, 0x0038);
    }

    #[test]
    fn rejected_bank_switch_is_cpu_error() {
        let mut config = ZSimConfig::for_model(PredefinedModel::AllRam);
        config.bank_switch_rules = Some(vec![BankSwitchRule::MaskCompare {
            port: PortMatch {
                mask: 0x00FF,
                value: 0x00FE,
            },
            slot: 0,
            value_mask: 0x80,
            compare: 0x80,
            bank: 1,
        }]);
        // LD A,$80 ; OUT ($FE),A
        let mut dbg = make_debugger_with(config, &[0x3E, 0x80, 0xD3, 0xFE, 0x76]);
        let event = dbg.run(None, None);
        assert!(matches!(event.reason, BreakReason::CpuError { .. }));
        assert_eq!(event.pc, 0x8004);
    }

    #[test]
    fn coverage_is_per_run() {
        let mut dbg = make_debugger(&[0x00, 0x00, 0x00]);
        dbg.step_into();
        dbg.step_into();
        assert_eq!(dbg.coverage().map(Coverage::addresses), Some(&[0x8001][..]));
    }

    #[test]
    fn reverse_stepping_shows_history() {
        // INC A ; INC A ; INC A
        let mut dbg = make_debugger(&[0x3C, 0x3C, 0x3C]);
        dbg.zsim_mut().set_register(Reg::A, 0);
        for _ in 0..3 {
            dbg.step_into();
        }
        assert_eq!(dbg.registers().a, 3);
        let entry = dbg.step_back().unwrap();
        assert_eq!(entry.pc(), 0x8002);
        assert_eq!(dbg.registers().a, 2);
        dbg.step_back();
        assert_eq!(dbg.history_spots(), [0x8000, 0x8001, 0x8002]);
        dbg.step_forward();
        assert!(dbg.step_forward().is_none());
        assert_eq!(dbg.registers().a, 3);
    }

    #[test]
    fn failing_condition_stops() {
        let mut dbg = make_debugger(&[0x00, 0x00, 0x76]);
        let id = dbg.breakpoints_mut().add(0x8001, Some("1 / (a - a)"), None).unwrap();
        let event = dbg.run(None, None);
        assert_eq!(event.reason, BreakReason::Breakpoint { id, address: 0x8001 });
    }

    #[test]
    fn removing_watchpoints() {
        let mut dbg = make_debugger(&[]);
        dbg.add_watchpoint(0x4000, 4, WatchAccess::READ_WRITE).unwrap();
        assert!(!dbg.remove_watchpoint(0x4000, 4, WatchAccess::READ).unwrap());
        assert!(dbg.remove_watchpoint(0x4000, 4, WatchAccess::READ_WRITE).unwrap());
        assert!(dbg.watchpoints().is_empty());
        assert!(!dbg.zsim().memory().watched(0x4001).write);
    }
}

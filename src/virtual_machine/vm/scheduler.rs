//! Event delivery and the time-sliced run loop.

use super::ScriptVm;
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::events::{EventType, ScriptEvent, first_event};
use crate::virtual_machine::layout::Layout;
use crate::virtual_machine::registers::{EventRegister, Register};
use crate::virtual_machine::value::LslValue;
use crate::{debug, error, warn};
use std::time::{Duration, Instant};

impl ScriptVm {
    /// Advances the script by one tick: one opcode if a handler is running,
    /// otherwise at most one handler entry.
    ///
    /// Returns the latched fault once the script has faulted.
    pub fn run_instructions(&mut self) -> Result<(), Fault> {
        if Layout::from_version(self.mem.register(Register::Vn)).is_none() {
            self.mem.set_fault(Fault::VersionMismatch);
        }
        if let Some(fault) = self.mem.fault() {
            return Err(fault);
        }

        if self.mem.register(Register::Ip) != 0 {
            self.step();
        } else {
            self.schedule();
        }

        match self.mem.fault() {
            Some(fault) => {
                error!("script {} faulted: {}", self.ctx.script_id, fault);
                Err(fault)
            }
            None => Ok(()),
        }
    }

    /// Runs ticks until the script yields, faults or uses up its quantum.
    ///
    /// The clock is read only every `timer_check_skip` ticks. Returns the time spent.
    pub fn run_quanta(&mut self) -> Result<Duration, Fault> {
        let start = Instant::now();
        let mut timer_checks = 0u32;
        loop {
            self.run_instructions()?;
            if self.should_yield() {
                break;
            }
            let due = timer_checks >= self.config.timer_check_skip;
            timer_checks += 1;
            if due {
                if start.elapsed() > self.config.quantum {
                    break;
                }
                timer_checks = 0;
            }
        }
        Ok(start.elapsed())
    }

    fn should_yield(&self) -> bool {
        self.reset_pending
            || self.sleep() > 0.0
            || self.is_finished()
            || self.is_state_change_pending()
    }

    /// Picks the next handler to enter, completing a pending state change first.
    fn schedule(&mut self) {
        let layout = self.layout;
        layout.set_event_register(&mut self.mem, EventRegister::InHandler, 0);

        let next_state = self.mem.register(Register::Ns);
        if next_state != self.mem.register(Register::Cs) {
            self.queue.clear();
            let exit = EventType::StateExit.bit();
            let events = layout.event_register(&self.mem, EventRegister::Current);
            if events & exit != 0 {
                layout.set_event_register(&mut self.mem, EventRegister::InHandler, exit);
                layout.set_event_register(&mut self.mem, EventRegister::Current, events & !exit);
                if layout.event_register(&self.mem, EventRegister::Handled) & exit != 0 {
                    self.deliver(ScriptEvent::new(EventType::StateExit, Vec::new()));
                    return;
                }
            }
            layout.set_event_register(
                &mut self.mem,
                EventRegister::Current,
                EventType::StateEntry.bit(),
            );
            self.mem.set_register(Register::Cs, next_state);
            let handled = layout.handled_events(&self.mem, next_state);
            layout.set_event_register(&mut self.mem, EventRegister::Handled, handled);
        }

        let events = layout.event_register(&self.mem, EventRegister::Current);
        let handled = layout.event_register(&self.mem, EventRegister::Handled);

        if events & handled & EventType::StateEntry.bit() != 0 {
            self.deliver(ScriptEvent::new(EventType::StateEntry, Vec::new()));
            return;
        }

        let rez = EventType::Rez.bit();
        if events & handled & rez != 0 {
            if let Some(event) = self.queue.take_first_of(EventType::Rez) {
                self.deliver(event);
                return;
            }
            layout.set_event_register(&mut self.mem, EventRegister::Current, events & !rez);
        }

        if let Some(event) = self.queue.pop_front() {
            if handled & event.event_type.bit() != 0 {
                self.deliver(event);
            } else {
                warn!(
                    "script {} dropped unhandled {} event",
                    self.ctx.script_id,
                    event.event_type.handler_name()
                );
            }
            return;
        }

        let events = layout.event_register(&self.mem, EventRegister::Current);
        if let Some(event_type) = first_event(events & handled) {
            self.deliver(ScriptEvent::new(event_type, Vec::new()));
        }
    }

    /// Builds the handler frame for `event` and points IP at its first opcode.
    ///
    /// ```text
    /// [0: return IP][saved SP][args...][zeroed locals]   <- SP
    ///               ^ BP
    /// ```
    fn deliver(&mut self, event: ScriptEvent) {
        let layout = self.layout;
        let event_type = event.event_type;
        debug!("entering {} handler", event_type.handler_name());

        self.mem.push_i32(0);
        let sp = self.mem.register(Register::Sp);
        self.mem.push_i32(sp);

        let bit = event_type.bit();
        layout.set_event_register(&mut self.mem, EventRegister::InHandler, bit);
        let events = layout.event_register(&self.mem, EventRegister::Current);
        layout.set_event_register(&mut self.mem, EventRegister::Current, events & !bit);

        let size: i32 = event.args.iter().map(|arg| self.push_value(arg)).sum();

        let state = self.mem.register(Register::Cs);
        let (Some(stack_size), Some(start)) = (
            layout.event_stack_size(&self.mem, state, event_type),
            layout.opcode_start(&self.mem, state, event_type),
        ) else {
            self.mem.set_fault(Fault::BoundCheck);
            return;
        };

        let additional = stack_size - size;
        self.mem.pusharge(additional);
        let sp = self.mem.register(Register::Sp);
        self.mem.set_bp(sp + additional + size);
        self.mem.set_ip(start);
    }

    /// Pushes a handler argument and returns its stack width.
    fn push_value(&mut self, value: &LslValue) -> i32 {
        match value {
            LslValue::Integer(i) => self.mem.push_i32(*i),
            LslValue::Float(f) => self.mem.push_f32(*f),
            LslValue::Vector(v) => self.mem.push_vector(*v),
            LslValue::Quaternion(q) => self.mem.push_quaternion(*q),
            other => {
                let record = self.mem.allocate(other);
                self.mem.push_ref(record);
            }
        }
        value.lsl_type().data_size()
    }
}

//! Script events and the pending-event queue.

use crate::virtual_machine::value::LslValue;
use crate::warn;
use std::collections::VecDeque;

macro_rules! define_events {
    ($($(#[$doc:meta])* $name:ident = $code:literal, $handler:literal;)*) => {
        /// Events a script state can handle. The discriminant is the event number
        /// used by the state table; bit `code - 1` of an event register marks it.
        #[repr(u8)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum EventType {
            $($(#[$doc])* $name = $code,)*
        }

        impl EventType {
            pub const ALL: &'static [EventType] = &[$(EventType::$name,)*];

            pub fn from_code(code: u8) -> Option<EventType> {
                match code {
                    $($code => Some(EventType::$name),)*
                    _ => None,
                }
            }

            /// Handler name as written in script source.
            pub const fn handler_name(self) -> &'static str {
                match self {
                    $(EventType::$name => $handler,)*
                }
            }

            pub fn from_handler_name(name: &str) -> Option<EventType> {
                match name {
                    $($handler => Some(EventType::$name),)*
                    _ => None,
                }
            }
        }
    };
}

define_events! {
    StateEntry = 1, "state_entry";
    StateExit = 2, "state_exit";
    TouchStart = 3, "touch_start";
    Touch = 4, "touch";
    TouchEnd = 5, "touch_end";
    CollisionStart = 6, "collision_start";
    Collision = 7, "collision";
    CollisionEnd = 8, "collision_end";
    LandCollisionStart = 9, "land_collision_start";
    LandCollision = 10, "land_collision";
    LandCollisionEnd = 11, "land_collision_end";
    Timer = 12, "timer";
    /// Delivered to `listen` handlers.
    Chat = 13, "listen";
    /// Delivered to `on_rez` handlers.
    Rez = 14, "on_rez";
    Sensor = 15, "sensor";
    NoSensor = 16, "no_sensor";
    Control = 17, "control";
    Money = 18, "money";
    Email = 19, "email";
    AtTarget = 20, "at_target";
    NotAtTarget = 21, "not_at_target";
    AtRotTarget = 22, "at_rot_target";
    NotAtRotTarget = 23, "not_at_rot_target";
    RtPermissions = 24, "run_time_permissions";
    /// Delivered to `changed` handlers.
    Inventory = 25, "changed";
    Attach = 26, "attach";
    Dataserver = 27, "dataserver";
    LinkMessage = 28, "link_message";
    MovingStart = 29, "moving_start";
    MovingEnd = 30, "moving_end";
    ObjectRez = 31, "object_rez";
    RemoteData = 32, "remote_data";
    HttpResponse = 33, "http_response";
    HttpRequest = 34, "http_request";
}

/// One past the last event number.
pub const EVENT_EOF: u8 = 35;

impl EventType {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Bit of this event in the event registers.
    pub const fn bit(self) -> u64 {
        1u64 << (self as u8 - 1)
    }
}

/// Lowest-numbered event whose bit is set in `bits`.
pub fn first_event(bits: u64) -> Option<EventType> {
    if bits == 0 {
        return None;
    }
    let code = bits.trailing_zeros() + 1;
    if code >= EVENT_EOF as u32 {
        return None;
    }
    EventType::from_code(code as u8)
}

/// A queued event together with the arguments its handler receives.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptEvent {
    pub event_type: EventType,
    pub args: Vec<LslValue>,
}

impl ScriptEvent {
    pub fn new(event_type: EventType, args: Vec<LslValue>) -> Self {
        Self { event_type, args }
    }
}

/// FIFO of events waiting for their handler.
///
/// The queue is bounded. Once full, newly added events are dropped and the
/// events already waiting keep their places.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<ScriptEvent>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
        }
    }

    /// Appends an event. Returns false if the queue was full and the event was dropped.
    pub fn push(&mut self, event: ScriptEvent) -> bool {
        if self.events.len() >= self.capacity {
            warn!(
                "event queue full ({} events), dropping {}",
                self.capacity,
                event.event_type.handler_name()
            );
            return false;
        }
        self.events.push_back(event);
        true
    }

    pub fn pop_front(&mut self) -> Option<ScriptEvent> {
        self.events.pop_front()
    }

    /// Removes and returns the oldest event of the given type.
    pub fn take_first_of(&mut self, event_type: EventType) -> Option<ScriptEvent> {
        let index = self
            .events
            .iter()
            .position(|e| e.event_type == event_type)?;
        self.events.remove(index)
    }

    pub fn remove_type(&mut self, event_type: EventType) {
        self.events.retain(|e| e.event_type != event_type);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptEvent> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(n: i32) -> ScriptEvent {
        ScriptEvent::new(EventType::TouchStart, vec![LslValue::Integer(n)])
    }

    #[test]
    fn event_bits() {
        assert_eq!(EventType::StateEntry.bit(), 1);
        assert_eq!(EventType::StateExit.bit(), 2);
        assert_eq!(EventType::HttpRequest.bit(), 1 << 33);
    }

    #[test]
    fn codes_are_contiguous() {
        assert_eq!(EventType::ALL.len(), 34);
        for (i, event) in EventType::ALL.iter().enumerate() {
            assert_eq!(event.code() as usize, i + 1);
            assert_eq!(EventType::from_code(event.code()), Some(*event));
        }
        assert_eq!(EventType::from_code(0), None);
        assert_eq!(EventType::from_code(EVENT_EOF), None);
    }

    #[test]
    fn handler_names() {
        assert_eq!(EventType::from_handler_name("listen"), Some(EventType::Chat));
        assert_eq!(EventType::from_handler_name("on_rez"), Some(EventType::Rez));
        assert_eq!(EventType::Timer.handler_name(), "timer");
        assert_eq!(EventType::from_handler_name("nope"), None);
    }

    #[test]
    fn first_event_picks_lowest_bit() {
        assert_eq!(first_event(0), None);
        assert_eq!(first_event(0b1100), Some(EventType::TouchStart));
        assert_eq!(
            first_event(EventType::HttpRequest.bit() | EventType::Timer.bit()),
            Some(EventType::Timer)
        );
        assert_eq!(first_event(EventType::HttpResponse.bit()), Some(EventType::HttpResponse));
        assert_eq!(first_event(1 << 40), None);
    }

    #[test]
    fn queue_is_fifo() {
        let mut queue = EventQueue::new(8);
        queue.push(touch(1));
        queue.push(touch(2));
        assert_eq!(queue.pop_front(), Some(touch(1)));
        assert_eq!(queue.pop_front(), Some(touch(2)));
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_drops_new_events() {
        let mut queue = EventQueue::new(2);
        assert!(queue.push(touch(1)));
        assert!(queue.push(touch(2)));
        assert!(!queue.push(touch(3)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front(), Some(touch(1)));
    }

    #[test]
    fn take_and_remove_by_type() {
        let mut queue = EventQueue::new(8);
        queue.push(touch(1));
        queue.push(ScriptEvent::new(EventType::Rez, vec![LslValue::Integer(5)]));
        queue.push(touch(2));

        let rez = queue.take_first_of(EventType::Rez).unwrap();
        assert_eq!(rez.args, vec![LslValue::Integer(5)]);
        assert_eq!(queue.len(), 2);

        queue.remove_type(EventType::TouchStart);
        assert!(queue.is_empty());
        assert_eq!(queue.take_first_of(EventType::Rez), None);
    }
}

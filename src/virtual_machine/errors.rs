use crate::types::encoding::DecodeError;
use thiserror::Error;

/// Runtime faults latched in the fault register of a script image.
///
/// The discriminants are the values stored in the register and are part of the
/// image format. Display strings are the messages reported to the script owner.
#[repr(i32)]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Hash)]
pub enum Fault {
    /// NaN or infinite float, or integer division/modulo by zero.
    #[error("Math Error")]
    Math = 1,
    /// Stack and heap pointers have met or crossed.
    #[error("Stack-Heap Collision")]
    StackHeapCollision = 2,
    /// An address failed validation against its region.
    #[error("Bounds Check Error")]
    BoundCheck = 3,
    /// A heap record violated a structural invariant.
    #[error("Heap Error")]
    Heap = 4,
    /// The version register holds an unknown bytecode version.
    #[error("Version Mismatch")]
    VersionMismatch = 5,
    /// A library call referenced missing inventory.
    #[error("Missing Inventory")]
    MissingInventory = 6,
    /// A library call hit a sandbox limit.
    #[error("Hit Sandbox Limit")]
    Sandbox = 7,
    /// Too much chat output in a short time.
    #[error("Chat Overrun")]
    ChatOverrun = 8,
    /// Too many active listeners.
    #[error("Too Many Listens")]
    TooManyListens = 9,
    /// A list was built with another list as a direct element.
    #[error("Lists may not contain lists")]
    NestingLists = 10,
    /// A host-side library call failed.
    #[error("CLI Exception")]
    CliException = 11,
}

impl Fault {
    /// All faults in register order.
    pub const ALL: [Fault; 11] = [
        Fault::Math,
        Fault::StackHeapCollision,
        Fault::BoundCheck,
        Fault::Heap,
        Fault::VersionMismatch,
        Fault::MissingInventory,
        Fault::Sandbox,
        Fault::ChatOverrun,
        Fault::TooManyListens,
        Fault::NestingLists,
        Fault::CliException,
    ];

    /// Value stored in the fault register.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Decodes a fault register value. Zero and out-of-range values are not faults.
    pub fn from_code(code: i32) -> Option<Fault> {
        Fault::ALL.iter().copied().find(|f| f.code() == code)
    }

    /// Faults that leave the heap pointer untrustworthy.
    pub(crate) const fn corrupts_heap(self) -> bool {
        matches!(
            self,
            Fault::Heap | Fault::StackHeapCollision | Fault::BoundCheck
        )
    }
}

/// Host-level errors raised while loading, restoring or driving a script.
///
/// These never originate from script behavior; script failures are [`Fault`]s.
#[derive(Debug, Error)]
pub enum VMError {
    /// The bytecode image does not fit in script memory.
    #[error("image of {size} bytes exceeds script memory of {capacity} bytes")]
    ImageTooLarge { size: usize, capacity: usize },
    /// The bytecode image is too short to hold the register block.
    #[error("image of {size} bytes is shorter than the {required} byte register block")]
    ImageTooSmall { size: usize, required: usize },
    /// A snapshot segment could not be decoded.
    #[error("malformed script state: {0}")]
    Snapshot(#[from] DecodeError),
    /// The restored top-of-memory register does not match this build.
    #[error("top of memory register is {found}, expected {expected}")]
    TopOfMemoryMismatch { found: i32, expected: i32 },
    /// A snapshot segment would be written outside script memory.
    #[error("{segment} segment of {size} bytes at offset {offset} exceeds script memory")]
    SegmentOutOfBounds {
        segment: &'static str,
        offset: i32,
        size: usize,
    },
    /// The script latched a fault and cannot run until it is reset.
    #[error("script faulted: {0}")]
    Faulted(#[from] Fault),
    /// File access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_codes_round_trip() {
        for fault in Fault::ALL {
            assert_eq!(Fault::from_code(fault.code()), Some(fault));
        }
        assert_eq!(Fault::from_code(0), None);
        assert_eq!(Fault::from_code(12), None);
        assert_eq!(Fault::from_code(-1), None);
    }

    #[test]
    fn fault_strings() {
        assert_eq!(Fault::Math.to_string(), "Math Error");
        assert_eq!(Fault::BoundCheck.to_string(), "Bounds Check Error");
        assert_eq!(
            Fault::NestingLists.to_string(),
            "Lists may not contain lists"
        );
    }

    #[test]
    fn only_memory_faults_reset_heap() {
        assert!(Fault::Heap.corrupts_heap());
        assert!(Fault::StackHeapCollision.corrupts_heap());
        assert!(Fault::BoundCheck.corrupts_heap());
        assert!(!Fault::Math.corrupts_heap());
        assert!(!Fault::NestingLists.corrupts_heap());
    }

    #[test]
    fn vm_error_wraps_fault() {
        let err: VMError = Fault::Heap.into();
        assert_eq!(err.to_string(), "script faulted: Heap Error");
    }
}

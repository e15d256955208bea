use uuid::Uuid;

/// Execution context passed to the VM while a script runs.
///
/// Identifies the script to library functions and in log lines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecContext {
    /// Id of the running script. Nil when the host did not assign one.
    pub script_id: Uuid,
}

impl ExecContext {
    pub fn new(script_id: Uuid) -> Self {
        Self { script_id }
    }
}

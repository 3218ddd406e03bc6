use std::fmt;

/// Reliable-connected queue pair state.
///
/// Legal transitions are `Created -> Rtr -> Rts` and any state to `Error`.
/// `Error` is terminal: the queue pair must be destroyed and recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpState {
    /// Created and initialized, not yet bound to a peer.
    Created,

    /// Ready To Receive.
    Rtr,

    /// Ready To Send.
    Rts,

    /// Error.
    Error,
}

impl fmt::Display for QpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QpState::Created => "CREATED",
            QpState::Rtr => "READY_TO_RECEIVE",
            QpState::Rts => "READY_TO_SEND",
            QpState::Error => "ERROR",
        })
    }
}

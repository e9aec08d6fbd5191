//! Error types for the connection registry.

/// Errors reported by connect, disconnect and emit.
///
/// Dispatch-time discovery that a receiver has gone away is not an error: the
/// edge is skipped and counted in [`EmitReport::skipped`](crate::EmitReport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The signal index does not name a signal of the emitter's class.
    #[error("Invalid signal index {index}: the class declares {count} signal(s)")]
    InvalidSignalIndex {
        /// The index that was requested.
        index: usize,
        /// Number of signals the emitter's class declares.
        count: usize,
    },

    /// The method index does not name an invokable method of the receiver's class.
    #[error("Invalid method index {index}: the class declares {count} method(s)")]
    InvalidMethodIndex {
        /// The index that was requested.
        index: usize,
        /// Number of methods the receiver's class declares.
        count: usize,
    },

    /// A method slot was requested on an object that registered no method handler.
    #[error("Receiver has no method handler to invoke method slots")]
    NoMethodHandler,

    /// The signal's and the slot's argument lists are incompatible.
    #[error("Argument type mismatch: signal takes {signal}, slot takes {slot}")]
    TypeMismatch {
        /// Rendered argument list of the signal.
        signal: String,
        /// Rendered argument list of the slot or payload.
        slot: String,
    },

    /// The delivery mode requires a receiver but none was given.
    #[error("Connection requires a receiver object for this delivery mode")]
    NullReceiver,

    /// A blocking queued delivery would wait on the thread that is emitting.
    #[error("Blocking queued delivery to a receiver owned by the emitting thread would deadlock")]
    SameThreadBlockingDeadlock,

    /// The connection has already been fully released.
    #[error("Connection has already been disconnected")]
    DoubleDisconnect,

    /// The object's teardown hook has already run.
    #[error("Object has been destroyed")]
    UseAfterObjectDestroyed,

    /// A unique connection with the same emitter, signal, receiver and slot exists.
    #[error("An identical unique connection already exists")]
    DuplicateConnection,

    /// A blocking queued delivery did not complete within the configured timeout.
    #[error("Blocking queued delivery timed out")]
    BlockingTimeout,
}

/// A specialized Result type for connection registry operations.
pub type ConnectResult<T> = std::result::Result<T, ConnectError>;

use trackable::error::{ErrorKind as TrackableErrorKind, TrackableError};

/// This crate specific `Error` type.
#[derive(Debug, Clone, trackable::TrackableError)]
pub struct Error(TrackableError<ErrorKind>);

/// Possible error kinds.
///
/// Each kind corresponds to one multiplexor status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Generic failure, including an interrupted (poisoned) lock wait.
    Error,

    /// A declared parameter range was violated.
    InvalidParameter,

    /// The program or stream slot is already occupied.
    IdInUse,

    /// The identifier is outside of its valid range.
    InvalidId,

    /// The identifier does not refer to a registered entity.
    UnrecognisedId,

    /// Every buffer structure is currently handed out.
    AllBuffersInUse,

    /// Every scatter page structure is currently handed out.
    AllPagesInUse,

    /// The stream type cannot be multiplexed.
    UnsupportedStreamType,

    /// More data was queued than can be scheduled.
    InputOverflow,

    /// Not enough data is queued to schedule the coming PCR period.
    InputUnderflow,

    /// The caller's output buffer cannot hold the scheduled packets.
    OutputOverflow,

    /// A single buffer cannot fit in the stream's decoder bit buffer.
    BitBufferViolation,

    /// A buffer was scheduled later than its decode deadline.
    DeliveryFailure,

    /// A buffer's DTS falls outside the stream's continuity window.
    DtsIntegrityFailure,

    /// No stream of the program carries the PCR.
    NoPcrChannelForProgram,

    /// Failure of the output sink.
    Other,
}
impl TrackableErrorKind for ErrorKind {}

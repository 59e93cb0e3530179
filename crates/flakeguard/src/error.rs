use core::time::Duration;

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `flakeguard` can emit.
///
/// Variants fall into two groups. Startup errors ([`Error::ConfigInvalid`],
/// [`Error::ClockRegressedPersisted`], [`Error::CorruptWatermark`], and
/// [`Error::CoordinationUnavailable`] during the startup check) mean the
/// process must not serve IDs. Everything else is reported per request and
/// the generator keeps running; see [`Error::is_retryable`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A machine or node ID does not fit its bit field.
    #[error("{field} {value} is out of range (max {max})")]
    ConfigInvalid {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// The clock at startup reads earlier than the durable watermark for this
    /// machine ID.
    #[error("Bad datetime: ts {now} < last {watermark}")]
    ClockRegressedPersisted { now: u64, watermark: u64 },

    /// The clock reads earlier than the last second this process used.
    #[error("Please wait for {wait_secs} s")]
    ClockRegressed { wait_secs: u64 },

    /// Every sequence value of the current second has been issued.
    #[error("Please wait for 1s")]
    SequenceExhausted,

    /// The coordination store failed or timed out.
    #[error("coordination store unavailable for `{key}`: {source}")]
    CoordinationUnavailable { key: String, source: StoreError },

    /// The stored watermark is not a decimal timestamp.
    #[error("watermark `{key}` holds a non-numeric value {value:?}")]
    CorruptWatermark { key: String, value: String },

    /// The clock reads earlier than [`crate::EPOCH`].
    #[error("clock reads {now}, which is before the 2016-01-01 epoch")]
    ClockBeforeEpoch { now: u64 },

    /// The seconds since [`crate::EPOCH`] no longer fit the timestamp field.
    #[error("timestamp offset {offset} exceeds the 29-bit timestamp field")]
    TimestampOverflow { offset: u64 },
}

impl Error {
    /// Returns `true` when the same request may succeed if retried later.
    ///
    /// [`Error::ClockBeforeEpoch`] and [`Error::TimestampOverflow`] count as
    /// retryable: the generator is fine and only needs a corrected clock.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ClockRegressed { .. }
                | Self::SequenceExhausted
                | Self::CoordinationUnavailable { .. }
                | Self::ClockBeforeEpoch { .. }
                | Self::TimestampOverflow { .. }
        )
    }

    /// Suggested back-off before retrying, when the error carries one.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ClockRegressed { wait_secs } => Some(Duration::from_secs(*wait_secs)),
            Self::SequenceExhausted => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Errors reported by a [`crate::CoordinationStore`] implementation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The call did not complete within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The request never produced a response (connect, DNS, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with a status the client does not accept.
    #[error("unexpected response status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The store rejected or could not apply the operation.
    #[error("{0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::SequenceExhausted.is_retryable());
        assert!(Error::ClockRegressed { wait_secs: 2 }.is_retryable());
        assert!(
            Error::CoordinationUnavailable {
                key: "machine_1/ts".into(),
                source: StoreError::Timeout(Duration::from_secs(3)),
            }
            .is_retryable()
        );
        assert!(
            !Error::ConfigInvalid {
                field: "machine_id",
                value: 64,
                max: 63
            }
            .is_retryable()
        );
        assert!(
            !Error::ClockRegressedPersisted {
                now: 1,
                watermark: 2
            }
            .is_retryable()
        );
        assert!(
            !Error::CorruptWatermark {
                key: "machine_1/ts".into(),
                value: "x".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn clock_range_errors_are_retryable() {
        assert!(Error::ClockBeforeEpoch { now: 0 }.is_retryable());
        assert!(Error::TimestampOverflow { offset: 1 << 29 }.is_retryable());
        assert_eq!(Error::TimestampOverflow { offset: 1 << 29 }.retry_after(), None);
    }

    #[test]
    fn retry_after_hints() {
        assert_eq!(
            Error::ClockRegressed { wait_secs: 4 }.retry_after(),
            Some(Duration::from_secs(4))
        );
        assert_eq!(
            Error::SequenceExhausted.retry_after(),
            Some(Duration::from_secs(1))
        );
        assert_eq!(Error::ClockBeforeEpoch { now: 0 }.retry_after(), None);
    }

    #[test]
    fn messages_match_wire_format() {
        assert_eq!(
            Error::ClockRegressed { wait_secs: 3 }.to_string(),
            "Please wait for 3 s"
        );
        assert_eq!(Error::SequenceExhausted.to_string(), "Please wait for 1s");
        assert_eq!(
            Error::ClockRegressedPersisted {
                now: 95,
                watermark: 100
            }
            .to_string(),
            "Bad datetime: ts 95 < last 100"
        );
    }

    #[test]
    fn coordination_error_exposes_source() {
        use core::error::Error as _;

        let err = Error::CoordinationUnavailable {
            key: "machine_3/ts".into(),
            source: StoreError::Transport("connection refused".into()),
        };
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "transport error: connection refused");
    }
}

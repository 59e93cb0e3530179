use core::cmp::Ordering;

use crate::{Error, FlakeId, Result, time::EPOCH_SECS};

/// The `(second, sequence)` pair most recently handed out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick {
    /// Unix seconds.
    pub second: u64,
    pub sequence: u64,
}

/// Per-process sequence state.
///
/// A generator starts [`GenerationState::Idle`] and moves to
/// [`GenerationState::Active`] on its first successful step. The state only
/// lives in memory; the durable side of clock safety is the watermark kept by
/// [`crate::ClockGuard`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GenerationState {
    #[default]
    Idle,
    Active(Tick),
}

impl GenerationState {
    /// Packed form of [`GenerationState::Idle`]. No valid tick packs to this
    /// value because seconds are bounded by the timestamp field.
    const IDLE: u64 = u64::MAX;
    const SEQUENCE_BITS: u32 = FlakeId::SEQUENCE_MASK.count_ones();

    /// Computes the tick that follows this state at wall-clock `now`.
    ///
    /// - Idle, or a later second: sequence restarts at zero.
    /// - Same second: sequence increments, or [`Error::SequenceExhausted`]
    ///   once [`FlakeId::max_sequence`] has been issued.
    /// - Earlier second: [`Error::ClockRegressed`] with the seconds to wait.
    ///
    /// # Errors
    ///
    /// See above. The caller keeps its current state on error.
    pub fn advance(self, now: u64) -> Result<Tick> {
        let Self::Active(last) = self else {
            return Ok(Tick {
                second: now,
                sequence: 0,
            });
        };

        match now.cmp(&last.second) {
            Ordering::Equal => {
                if last.sequence < FlakeId::max_sequence() {
                    Ok(Tick {
                        second: now,
                        sequence: last.sequence + 1,
                    })
                } else {
                    Err(Error::SequenceExhausted)
                }
            }
            Ordering::Greater => Ok(Tick {
                second: now,
                sequence: 0,
            }),
            Ordering::Less => Err(Self::cold_clock_behind(now, last.second)),
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(now: u64, last_second: u64) -> Error {
        let wait_secs = last_second - now;
        #[cfg(feature = "tracing")]
        tracing::warn!(now, last_second, wait_secs, "clock moved backwards");
        Error::ClockRegressed { wait_secs }
    }

    pub(crate) const fn to_packed(self) -> u64 {
        match self {
            Self::Idle => Self::IDLE,
            Self::Active(tick) => (tick.second << Self::SEQUENCE_BITS) | tick.sequence,
        }
    }

    pub(crate) const fn from_packed(raw: u64) -> Self {
        if raw == Self::IDLE {
            return Self::Idle;
        }
        Self::Active(Tick {
            second: raw >> Self::SEQUENCE_BITS,
            sequence: raw & FlakeId::SEQUENCE_MASK,
        })
    }
}

/// Converts Unix seconds to the offset stored in the timestamp field.
///
/// # Errors
///
/// [`Error::ClockBeforeEpoch`] or [`Error::TimestampOverflow`].
pub(crate) fn epoch_offset(now: u64) -> Result<u64> {
    let offset = now
        .checked_sub(EPOCH_SECS)
        .ok_or(Error::ClockBeforeEpoch { now })?;
    if offset > FlakeId::max_timestamp() {
        return Err(Error::TimestampOverflow { offset });
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = EPOCH_SECS + 1_000;

    fn active(second: u64, sequence: u64) -> GenerationState {
        GenerationState::Active(Tick { second, sequence })
    }

    #[test]
    fn idle_starts_at_zero() {
        let tick = GenerationState::Idle.advance(NOW).unwrap();
        assert_eq!(
            tick,
            Tick {
                second: NOW,
                sequence: 0
            }
        );
    }

    #[test]
    fn same_second_increments() {
        let tick = active(NOW, 41).advance(NOW).unwrap();
        assert_eq!(tick.sequence, 42);
        assert_eq!(tick.second, NOW);
    }

    #[test]
    fn later_second_resets() {
        let tick = active(NOW, 500).advance(NOW + 3).unwrap();
        assert_eq!(
            tick,
            Tick {
                second: NOW + 3,
                sequence: 0
            }
        );
    }

    #[test]
    fn last_sequence_value_is_issued_then_exhausted() {
        let max = FlakeId::max_sequence();
        assert_eq!(max, 131_071);
        let tick = active(NOW, max - 1).advance(NOW).unwrap();
        assert_eq!(tick.sequence, max);
        assert_eq!(active(NOW, max).advance(NOW), Err(Error::SequenceExhausted));
    }

    #[test]
    fn earlier_second_reports_wait() {
        assert_eq!(
            active(NOW, 0).advance(NOW - 5),
            Err(Error::ClockRegressed { wait_secs: 5 })
        );
    }

    #[test]
    fn packing_roundtrips() {
        for state in [
            GenerationState::Idle,
            active(NOW, 0),
            active(NOW, FlakeId::max_sequence()),
            active(EPOCH_SECS + FlakeId::max_timestamp(), 7),
        ] {
            assert_eq!(GenerationState::from_packed(state.to_packed()), state);
        }
    }

    #[test]
    fn epoch_offset_bounds() {
        assert_eq!(epoch_offset(EPOCH_SECS), Ok(0));
        assert_eq!(
            epoch_offset(EPOCH_SECS - 1),
            Err(Error::ClockBeforeEpoch {
                now: EPOCH_SECS - 1
            })
        );
        let last = EPOCH_SECS + FlakeId::max_timestamp();
        assert_eq!(epoch_offset(last), Ok(FlakeId::max_timestamp()));
        assert_eq!(
            epoch_offset(last + 1),
            Err(Error::TimestampOverflow {
                offset: FlakeId::max_timestamp() + 1
            })
        );
    }
}

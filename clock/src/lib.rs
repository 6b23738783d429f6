//! A [`Stream`]-based timer for the beacon chain.
//!
//! # Implementation
//!
//! This is implemented using [`Interval`]. Some subtleties to keep in mind:
//!
//! - The API of [`Interval`] (as well as other timer utilities in [`tokio::time`]) uses
//!   [`Instant`]s. [`Instant`]s are opaque. There is no way to directly convert a timestamp
//!   (of any kind, not just Unix time) to an [`Instant`]. The hack in [`ticks`] may result in
//!   unexpected behavior in extreme conditions.
//!
//! - An [`Interval`] may produce items late, but the delays do not accumulate by default.
//!   The interval of time between consecutive items produced by [`Interval`] may be shorter than
//!   the [`Duration`] passed to [`interval_at`].
//!
//! - It is unclear how [`Interval`] behaves around leap seconds.
//!
//! Each slot is divided into [`TickKind::CARDINALITY`] ticks. The kinds
//! `Start`, `Attest` and `Aggregate` open the three intervals of a slot at 0,
//! 1/3 and 2/3 of its duration. The remaining kinds exist so that the fork
//! choice store can observe time at second granularity with 12-second slots.
//!
//! [`tokio::time`]:  tokio::time
//! [`Instant`]:      tokio::time::Instant
//! [`Interval`]:     tokio::time::Interval
//! [`interval_at`]:  tokio::time::interval_at

use core::{error::Error, time::Duration};
use std::time::{Instant, SystemTime, SystemTimeError};

use anyhow::Result;
use enum_iterator::Sequence;
use futures::stream::{Stream, StreamExt as _};
use serde::Deserialize;
use strum::AsRefStr;
use thiserror::Error;
use tokio_stream::wrappers::IntervalStream;
use types::{
    config::ChainSpec,
    consts::GENESIS_SLOT,
    primitives::{Epoch, Slot, UnixSeconds},
};

#[cfg(test)]
mod fake_time;

pub trait InstantLike: Sized {
    fn checked_add(self, duration: Duration) -> Option<Self>;
}

pub trait SystemTimeLike: Copy {
    type Error: Error + Send + Sync + 'static;

    const UNIX_EPOCH: Self;

    fn duration_since(self, earlier: Self) -> Result<Duration, Self::Error>;
}

impl InstantLike for Instant {
    fn checked_add(self, duration: Duration) -> Option<Self> {
        Self::checked_add(&self, duration)
    }
}

impl SystemTimeLike for SystemTime {
    type Error = SystemTimeError;

    const UNIX_EPOCH: Self = Self::UNIX_EPOCH;

    fn duration_since(self, earlier: Self) -> Result<Duration, Self::Error> {
        Self::duration_since(&self, earlier)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Deserialize)]
pub struct Tick {
    pub slot: Slot,
    pub kind: TickKind,
}

impl Tick {
    #[must_use]
    pub const fn start_of_slot(slot: Slot) -> Self {
        Self::new(slot, TickKind::Start)
    }

    pub fn at_time(spec: &ChainSpec, time: UnixSeconds, genesis_time: UnixSeconds) -> Result<Self> {
        let duration_since_unix_epoch = Duration::from_secs(time);
        Self::from_duration(spec, duration_since_unix_epoch, genesis_time)
    }

    pub fn current(spec: &ChainSpec, genesis_time: UnixSeconds) -> Result<Self> {
        let duration_since_unix_epoch = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;
        Self::from_duration(spec, duration_since_unix_epoch, genesis_time)
    }

    #[must_use]
    pub fn epoch(self, spec: &ChainSpec) -> Epoch {
        spec.epoch_at_slot(self.slot)
    }

    /// Wall-clock seconds this tick corresponds to, rounded down.
    #[must_use]
    pub fn time(self, spec: &ChainSpec, genesis_time: UnixSeconds) -> UnixSeconds {
        let duration = Duration::from_secs((self.slot - GENESIS_SLOT) * spec.seconds_per_slot.get())
            + tick_duration(spec).saturating_mul(self.kind as u32);

        genesis_time + duration.as_secs()
    }

    #[must_use]
    pub const fn is_start_of_slot(self) -> bool {
        matches!(self.kind, TickKind::Start)
    }

    #[must_use]
    pub fn is_start_of_epoch(self, spec: &ChainSpec) -> bool {
        spec.is_epoch_start(self.slot) && self.is_start_of_slot()
    }

    #[must_use]
    pub const fn is_start_of_interval(self) -> bool {
        matches!(
            self.kind,
            TickKind::Start | TickKind::Attest | TickKind::Aggregate,
        )
    }

    const fn new(slot: Slot, kind: TickKind) -> Self {
        Self { slot, kind }
    }

    fn from_duration(
        spec: &ChainSpec,
        duration_since_unix_epoch: Duration,
        genesis_time: UnixSeconds,
    ) -> Result<Self> {
        let unix_epoch_to_genesis = Duration::from_secs(genesis_time);

        // `Duration` does not implement `Div<Duration>` or `Rem<Duration>`,
        // so we have to do arithmetic on nanoseconds.
        let nanos_since_genesis = duration_since_unix_epoch
            .saturating_sub(unix_epoch_to_genesis)
            .as_nanos();

        let nanos_per_tick = tick_duration(spec).as_nanos();
        let ticks_per_slot = u128::try_from(TickKind::CARDINALITY)?;
        let ticks_since_genesis = nanos_since_genesis / nanos_per_tick;
        let slots_since_genesis = u64::try_from(ticks_since_genesis / ticks_per_slot)?;
        let ticks_since_slot = usize::try_from(ticks_since_genesis % ticks_per_slot)?;
        let slot = GENESIS_SLOT + slots_since_genesis;

        let kind = enum_iterator::all::<TickKind>()
            .nth(ticks_since_slot)
            .expect("more ticks would add up to additional slots");

        Ok(Self::new(slot, kind))
    }

    fn next(self) -> Result<Self> {
        let Self { slot, kind } = self;

        let next_slot = match kind.next() {
            Some(_) => slot,
            None => slot.checked_add(1).ok_or(ClockError::RanOutOfSlots)?,
        };

        let next_kind = enum_iterator::next_cycle(&kind);

        Ok(Self::new(next_slot, next_kind))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Sequence, AsRefStr, Deserialize)]
pub enum TickKind {
    Start,
    StartSecond,
    StartThird,
    StartFourth,
    Attest,
    AttestSecond,
    AttestThird,
    AttestFourth,
    Aggregate,
    AggregateSecond,
    AggregateThird,
    AggregateFourth,
}

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum ClockError {
    #[error("time of next tick overflowed")]
    NextInstantOverflow,
    #[error("ran out of slots")]
    RanOutOfSlots,
}

pub fn ticks(
    spec: &ChainSpec,
    genesis_time: UnixSeconds,
) -> Result<impl Stream<Item = Result<Tick>>> {
    // We assume the `Instant` and `SystemTime` obtained here correspond to the same point in time.
    // This is slightly inaccurate but the error will probably be negligible compared to clock
    // differences between different nodes in the network.
    let now_instant = Instant::now();
    let now_system_time = SystemTime::now();

    let (mut next_tick, next_instant) =
        next_tick_with_instant(spec, now_instant, now_system_time, genesis_time)?;

    let tick_duration = tick_duration(spec);
    let interval = tokio::time::interval_at(next_instant.into(), tick_duration);

    Ok(IntervalStream::new(interval).map(move |_| {
        let current_tick = next_tick;
        next_tick = current_tick.next()?;
        Ok(current_tick)
    }))
}

fn next_tick_with_instant<I: InstantLike, S: SystemTimeLike>(
    spec: &ChainSpec,
    now_instant: I,
    now_system_time: S,
    genesis_time: UnixSeconds,
) -> Result<(Tick, I)> {
    let unix_epoch_to_now = now_system_time.duration_since(S::UNIX_EPOCH)?;
    let unix_epoch_to_genesis = Duration::from_secs(genesis_time);

    // Some platforms do not support negative `Instant`s. Operations that would produce an
    // `Instant` corresponding to time before the epoch will panic on those platforms. The epoch in
    // question is not the Unix epoch but a platform dependent value, typically the system boot
    // time. This means we are not allowed to subtract `Duration`s from `Instant`s. The
    // `InstantLike` trait conveniently prevents us from doing so.

    let mut next_tick;
    let mut now_to_next_tick;

    if unix_epoch_to_now <= unix_epoch_to_genesis {
        next_tick = Tick::start_of_slot(GENESIS_SLOT);
        now_to_next_tick = unix_epoch_to_genesis - unix_epoch_to_now;
    } else {
        let tick_duration = tick_duration(spec);
        let genesis_to_now = unix_epoch_to_now - unix_epoch_to_genesis;
        let slots_since_genesis = genesis_to_now.as_secs() / spec.seconds_per_slot.get();
        let genesis_to_current_slot =
            Duration::from_secs(slots_since_genesis * spec.seconds_per_slot.get());
        let current_slot_to_now = genesis_to_now - genesis_to_current_slot;

        next_tick = Tick::start_of_slot(GENESIS_SLOT + slots_since_genesis);
        now_to_next_tick = Duration::ZERO;

        while now_to_next_tick < current_slot_to_now {
            next_tick = next_tick.next()?;
            now_to_next_tick += tick_duration;
        }

        now_to_next_tick -= current_slot_to_now;
    }

    let next_instant = now_instant
        .checked_add(now_to_next_tick)
        .ok_or(ClockError::NextInstantOverflow)?;

    Ok((next_tick, next_instant))
}

fn tick_duration(spec: &ChainSpec) -> Duration {
    let ticks_per_slot =
        u32::try_from(TickKind::CARDINALITY).expect("number of ticks per slot fits in u32");

    spec.slot_duration() / ticks_per_slot
}

#[cfg(test)]
mod tests {
    use core::ops::Add as _;

    use futures::future::FutureExt as _;
    use test_case::test_case;
    use types::consts::INTERVALS_PER_SLOT;

    use crate::fake_time::{FakeInstant, FakeSystemTime, Timespec};

    use super::*;

    #[test]
    fn tick_count_is_a_multiple_of_interval_count() {
        assert_eq!(TickKind::CARDINALITY % usize::try_from(INTERVALS_PER_SLOT).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_with_mainnet_spec_produces_a_tick_every_second() -> Result<()> {
        let genesis_time = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs()
            .add(1);

        let mut ticks = ticks(&ChainSpec::mainnet(), genesis_time)?;
        let mut next_tick = || ticks.next().now_or_never().flatten().transpose();

        assert_eq!(next_tick()?, None);

        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(next_tick()?, Some(Tick::new(0, TickKind::Start)));
        assert_eq!(next_tick()?, None);

        for expected_kind in enum_iterator::all::<TickKind>().skip(1) {
            tokio::time::advance(Duration::from_secs(1)).await;

            assert_eq!(next_tick()?, Some(Tick::new(0, expected_kind)));
            assert_eq!(next_tick()?, None);
        }

        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(next_tick()?, Some(Tick::new(1, TickKind::Start)));
        assert_eq!(next_tick()?, None);

        Ok(())
    }

    #[test_case(-24 => Tick::new(0, TickKind::Start);           "24 seconds before genesis")]
    #[test_case( -1 => Tick::new(0, TickKind::Start);           "1 second before genesis")]
    #[test_case(  0 => Tick::new(0, TickKind::Start);           "at genesis")]
    #[test_case(  1 => Tick::new(0, TickKind::StartSecond);     "1 second after genesis")]
    #[test_case(  3 => Tick::new(0, TickKind::StartFourth);     "3 seconds after genesis")]
    #[test_case(  4 => Tick::new(0, TickKind::Attest);          "4 seconds after genesis")]
    #[test_case(  7 => Tick::new(0, TickKind::AttestFourth);    "7 seconds after genesis")]
    #[test_case(  8 => Tick::new(0, TickKind::Aggregate);       "8 seconds after genesis")]
    #[test_case( 11 => Tick::new(0, TickKind::AggregateFourth); "11 seconds after genesis")]
    #[test_case( 12 => Tick::new(1, TickKind::Start);           "12 seconds after genesis")]
    #[test_case( 24 => Tick::new(2, TickKind::Start);           "24 seconds after genesis")]
    fn tick_at_time_relative_to_genesis_with_mainnet_spec(offset: i64) -> Tick {
        tick_at_time_relative_to_genesis(&ChainSpec::mainnet(), offset)
    }

    #[test_case(-6 => Tick::new(0, TickKind::Start);     "before genesis")]
    #[test_case( 0 => Tick::new(0, TickKind::Start);     "at genesis")]
    #[test_case( 1 => Tick::new(0, TickKind::StartThird); "1 second after genesis")]
    #[test_case( 2 => Tick::new(0, TickKind::Attest);    "2 seconds after genesis")]
    #[test_case( 4 => Tick::new(0, TickKind::Aggregate); "4 seconds after genesis")]
    #[test_case( 6 => Tick::new(1, TickKind::Start);     "6 seconds after genesis")]
    fn tick_at_time_relative_to_genesis_with_minimal_spec(offset: i64) -> Tick {
        tick_at_time_relative_to_genesis(&ChainSpec::minimal(), offset)
    }

    #[test_case(100 => (777, Tick::new(0, TickKind::Start));         "long before genesis")]
    #[test_case(777 => (777, Tick::new(0, TickKind::Start));         "at genesis")]
    #[test_case(778 => (778, Tick::new(0, TickKind::StartSecond));   "1 second after genesis")]
    #[test_case(781 => (781, Tick::new(0, TickKind::Attest));        "4 seconds after genesis")]
    #[test_case(785 => (785, Tick::new(0, TickKind::Aggregate));     "8 seconds after genesis")]
    #[test_case(788 => (788, Tick::new(0, TickKind::AggregateFourth)); "11 seconds after genesis")]
    #[test_case(789 => (789, Tick::new(1, TickKind::Start));         "12 seconds after genesis")]
    fn next_tick_with_instant_with_mainnet_spec(time: UnixSeconds) -> (UnixSeconds, Tick) {
        let genesis_time = 777;
        let timespec = Timespec::from_secs(time);

        let (actual_tick, actual_instant) = super::next_tick_with_instant(
            &ChainSpec::mainnet(),
            FakeInstant(timespec),
            FakeSystemTime(timespec),
            genesis_time,
        )
        .expect("FakeSystemTime cannot represent times before the Unix epoch");

        assert_eq!(actual_instant.0.subsec_nanos(), 0);

        (actual_instant.0.as_secs(), actual_tick)
    }

    #[test]
    fn tick_time_inverts_at_time() -> Result<()> {
        let spec = ChainSpec::mainnet();
        let genesis_time = 1000;

        for time in 1000..1100 {
            let tick = Tick::at_time(&spec, time, genesis_time)?;
            assert_eq!(tick.time(&spec, genesis_time), time);
        }

        Ok(())
    }

    fn tick_at_time_relative_to_genesis(spec: &ChainSpec, offset: i64) -> Tick {
        let genesis_time = spec.min_genesis_time;

        let time = genesis_time
            .checked_add_signed(offset)
            .expect("offset should be small enough to make the resulting time fit in UnixSeconds");

        Tick::at_time(spec, time, genesis_time)
            .expect("spec should have a valid value of seconds_per_slot")
    }
}

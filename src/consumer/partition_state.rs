//! Per-partition consumption state.
//!
//! A [`TopicPartitionState`] exists exactly as long as its partition is
//! assigned. It holds no I/O and only records transitions:
//!
//! ```text
//! unpositioned ──await_reset──► awaiting_reset ──seek──► positioned
//!      │                                                 │     ▲
//!      └────────────────────── seek ─────────────────────┘     │
//!                                                   pause ─┴─ resume
//! ```
//!
//! `is_fetchable()` holds only for a positioned partition that is not paused.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::types::OffsetAndMetadata;

/// What to do when a partition has no valid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffsetResetStrategy {
    /// Start from the log start offset.
    Earliest,
    /// Start from the log end offset.
    Latest,
    /// Fail instead of resetting.
    None,
}

impl OffsetResetStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetResetStrategy::Earliest => "earliest",
            OffsetResetStrategy::Latest => "latest",
            OffsetResetStrategy::None => "none",
        }
    }

    /// ListOffsets timestamp to ask for, or `None` when resetting is not allowed.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            OffsetResetStrategy::Earliest => Some(crate::constants::EARLIEST_TIMESTAMP),
            OffsetResetStrategy::Latest => Some(crate::constants::LATEST_TIMESTAMP),
            OffsetResetStrategy::None => None,
        }
    }
}

impl fmt::Display for OffsetResetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetResetStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "earliest" | "smallest" => Ok(OffsetResetStrategy::Earliest),
            "latest" | "largest" => Ok(OffsetResetStrategy::Latest),
            "none" => Ok(OffsetResetStrategy::None),
            other => Err(Error::Config(format!(
                "Invalid auto.offset.reset '{}': expected earliest, latest or none",
                other
            ))),
        }
    }
}

/// Consumption cursor and flags for one assigned partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicPartitionState {
    position: Option<i64>,
    committed: Option<OffsetAndMetadata>,
    highwater: Option<i64>,
    paused: bool,
    awaiting_reset: bool,
    reset_strategy: Option<OffsetResetStrategy>,
    has_valid_position: bool,
}

impl TopicPartitionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate the position until an offset lookup with `strategy` completes.
    pub fn await_reset(&mut self, strategy: OffsetResetStrategy) {
        self.awaiting_reset = true;
        self.reset_strategy = Some(strategy);
        self.position = None;
        self.has_valid_position = false;
    }

    /// Set the next offset to fetch. Clears any pending reset.
    pub fn seek(&mut self, offset: i64) {
        self.position = Some(offset);
        self.awaiting_reset = false;
        self.reset_strategy = None;
        self.has_valid_position = true;
    }

    /// Advance after records were consumed. Only valid once positioned.
    pub fn set_position(&mut self, offset: i64) -> crate::error::Result<()> {
        if !self.has_valid_position {
            return Err(Error::IllegalState(
                "cannot set the position of a partition without a valid position".to_string(),
            ));
        }
        self.position = Some(offset);
        Ok(())
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_fetchable(&self) -> bool {
        !self.paused && self.has_valid_position
    }

    pub fn position(&self) -> Option<i64> {
        self.position
    }

    pub fn committed(&self) -> Option<&OffsetAndMetadata> {
        self.committed.as_ref()
    }

    pub fn set_committed(&mut self, committed: OffsetAndMetadata) {
        self.committed = Some(committed);
    }

    pub fn highwater(&self) -> Option<i64> {
        self.highwater
    }

    pub fn set_highwater(&mut self, highwater: i64) {
        self.highwater = Some(highwater);
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn awaiting_reset(&self) -> bool {
        self.awaiting_reset
    }

    pub fn reset_strategy(&self) -> Option<OffsetResetStrategy> {
        self.reset_strategy
    }

    pub fn has_valid_position(&self) -> bool {
        self.has_valid_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_unpositioned() {
        let state = TopicPartitionState::new();
        assert_eq!(state.position(), None);
        assert!(!state.has_valid_position());
        assert!(!state.awaiting_reset());
        assert!(!state.is_fetchable());
    }

    #[test]
    fn test_await_reset_then_seek() {
        let mut state = TopicPartitionState::new();
        state.await_reset(OffsetResetStrategy::Earliest);
        assert!(state.awaiting_reset());
        assert_eq!(state.reset_strategy(), Some(OffsetResetStrategy::Earliest));
        assert!(!state.has_valid_position());

        state.seek(100);
        assert!(state.has_valid_position());
        assert!(!state.awaiting_reset());
        assert_eq!(state.position(), Some(100));
        assert_eq!(state.reset_strategy(), None);
    }

    #[test]
    fn test_await_reset_invalidates_position() {
        let mut state = TopicPartitionState::new();
        state.seek(5);
        state.await_reset(OffsetResetStrategy::Latest);
        assert_eq!(state.position(), None);
        assert!(!state.is_fetchable());
    }

    #[test]
    fn test_pause_keeps_position() {
        let mut state = TopicPartitionState::new();
        state.seek(10);
        state.set_committed(OffsetAndMetadata::new(9, ""));
        state.pause();
        assert!(!state.is_fetchable());
        assert_eq!(state.position(), Some(10));
        assert_eq!(state.committed().map(|c| c.offset), Some(9));

        state.resume();
        assert!(state.is_fetchable());
    }

    #[test]
    fn test_set_position_requires_valid_position() {
        let mut state = TopicPartitionState::new();
        assert!(state.set_position(3).is_err());
        state.seek(1);
        state.set_position(3).unwrap();
        assert_eq!(state.position(), Some(3));
    }

    #[test]
    fn test_reset_strategy_from_str() {
        assert_eq!(
            "EARLIEST".parse::<OffsetResetStrategy>().unwrap(),
            OffsetResetStrategy::Earliest
        );
        assert_eq!(
            "largest".parse::<OffsetResetStrategy>().unwrap(),
            OffsetResetStrategy::Latest
        );
        assert_eq!("none".parse::<OffsetResetStrategy>().unwrap(), OffsetResetStrategy::None);
        assert!("later".parse::<OffsetResetStrategy>().is_err());
        assert_eq!(OffsetResetStrategy::None.timestamp(), None);
        assert_eq!(OffsetResetStrategy::Latest.to_string(), "latest");
    }
}

//! Per-channel edge debouncer.
//!
//! Turns a stream of raw level samples into settled transitions.  A new
//! level is accepted only after it has held continuously for the channel's
//! window; any sample back at the settled level cancels the pending change.
//! The first sample becomes the baseline and never produces a transition.
//!
//! ```text
//!  raw     ‾‾‾‾|_|‾‾‾‾‾‾‾‾|________________|‾‾‾‾‾‾
//!  settled ‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|___________‾‾‾‾‾‾‾‾‾|‾‾
//!               ^ glitch        ^ window elapsed
//! ```
//!
//! O(1) per sample, no cross-channel state, never blocks.

use crate::config::ChannelId;

/// A settled level change on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncedTransition {
    pub channel: ChannelId,
    /// Sample time at which the new level was confirmed.
    pub timestamp_ms: u64,
    /// Raw level, `true` = high.
    pub new_level: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebounceState {
    /// No sample seen yet.
    Unset,
    Settled { level: bool },
    /// Settled at `level`, opposite level seen continuously since `since_ms`.
    Pending { level: bool, since_ms: u64 },
}

pub struct EdgeDebouncer {
    channel: ChannelId,
    window_ms: u32,
    state: DebounceState,
}

impl EdgeDebouncer {
    pub fn new(channel: ChannelId, window_ms: u32) -> Self {
        Self {
            channel,
            window_ms,
            state: DebounceState::Unset,
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Last settled level, `None` before the first sample.
    pub fn settled(&self) -> Option<bool> {
        match self.state {
            DebounceState::Unset => None,
            DebounceState::Settled { level } | DebounceState::Pending { level, .. } => Some(level),
        }
    }

    /// Feed one raw sample taken at `now_ms`.
    pub fn sample(&mut self, now_ms: u64, level: bool) -> Option<DebouncedTransition> {
        match self.state {
            DebounceState::Unset => {
                self.state = DebounceState::Settled { level };
                None
            }

            DebounceState::Settled { level: settled } => {
                if level == settled {
                    return None;
                }
                self.state = DebounceState::Pending {
                    level: settled,
                    since_ms: now_ms,
                };
                // A zero window accepts on the first differing sample.
                self.confirm(now_ms, level)
            }

            DebounceState::Pending { level: settled, .. } => {
                if level == settled {
                    // Bounced back before the window elapsed.
                    self.state = DebounceState::Settled { level: settled };
                    return None;
                }
                self.confirm(now_ms, level)
            }
        }
    }

    fn confirm(&mut self, now_ms: u64, level: bool) -> Option<DebouncedTransition> {
        let DebounceState::Pending { since_ms, .. } = self.state else {
            return None;
        };
        if now_ms.saturating_sub(since_ms) < self.window_ms as u64 {
            return None;
        }
        self.state = DebounceState::Settled { level };
        Some(DebouncedTransition {
            channel: self.channel,
            timestamp_ms: now_ms,
            new_level: level,
        })
    }
}

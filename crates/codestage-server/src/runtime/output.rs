//! Capacity-bounded call output.

use std::fmt;
use std::str::FromStr;

use codestage_common::protocol::error::{CodestageError, Result};
use serde::{Deserialize, Serialize};

/// What to do when a call produces more bytes than the caller's capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Deliver the first `capacity` bytes and report success.
    #[default]
    Truncate,
    /// Discard the output and report an `overflow` error.
    Reject,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Truncate => f.write_str("truncate"),
            OverflowPolicy::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "truncate" => Ok(OverflowPolicy::Truncate),
            "reject" => Ok(OverflowPolicy::Reject),
            other => Err(format!(
                "unknown overflow policy '{}' (expected 'truncate' or 'reject')",
                other
            )),
        }
    }
}

/// Result of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Bytes delivered to the caller, never longer than the capacity.
    pub payload: Vec<u8>,
    /// Bytes encoded before output stopped. Once the capacity is exceeded
    /// encoding stops, so for truncated calls this is a lower bound.
    pub produced: usize,
    pub truncated: bool,
}

/// Output sink that keeps at most `capacity` bytes.
///
/// Writers must check [`is_full`](Self::is_full) and stop producing once it
/// returns true; under [`OverflowPolicy::Reject`] the overflowing write
/// itself fails.
#[derive(Debug)]
pub struct OutputBuffer {
    capacity: usize,
    policy: OverflowPolicy,
    bytes: Vec<u8>,
    produced: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            capacity,
            policy,
            bytes: Vec::new(),
            produced: 0,
        }
    }

    /// Appends `data`, keeping only what fits.
    ///
    /// # Errors
    ///
    /// `OutputOverflow` if the output no longer fits and the policy is
    /// [`OverflowPolicy::Reject`].
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let kept = data.len().min(self.remaining());
        self.bytes.extend_from_slice(&data[..kept]);
        self.produced = self.produced.saturating_add(data.len());

        if self.is_full() && self.policy == OverflowPolicy::Reject {
            return Err(CodestageError::OutputOverflow {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can still be stored.
    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    /// Whether more output was produced than fits. Nothing written after
    /// this point can reach the caller.
    pub fn is_full(&self) -> bool {
        self.produced > self.capacity
    }

    /// Closes the buffer, applying the overflow policy once more for writers
    /// that ignored a failed write.
    pub fn finish(self) -> Result<CallOutcome> {
        let truncated = self.is_full();
        if truncated && self.policy == OverflowPolicy::Reject {
            return Err(CodestageError::OutputOverflow {
                capacity: self.capacity,
            });
        }

        Ok(CallOutcome {
            payload: self.bytes,
            produced: self.produced,
            truncated,
        })
    }
}

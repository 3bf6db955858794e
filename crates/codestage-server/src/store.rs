//! Per-connection program slots.
//!
//! A connection owns two slots. PARSE fills the pending slot, COMMIT moves
//! the pending image into the active slot, and CALL only ever reads the
//! active one:
//!
//! ```text
//!            PARSE ok             COMMIT
//!   Empty ───────────▶ Parsed ───────────▶ Committed
//!                                   ▲          │ PARSE ok / PARSE failed
//!                                   └──────────┘ (active image unchanged)
//! ```

use std::sync::Arc;

use codestage_common::protocol::error::{CodestageError, Result};

use crate::runtime::ProgramImage;

/// Observable state of a [`ProgramStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Nothing staged, nothing committed.
    Empty,
    /// An image is staged but none has been committed yet.
    Parsed,
    /// An image is active; another may be staged behind it.
    Committed { pending: bool },
}

#[derive(Debug, Default)]
pub struct ProgramStore {
    pending: Option<Arc<ProgramImage>>,
    active: Option<Arc<ProgramImage>>,
}

impl ProgramStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a PARSE.
    ///
    /// A successful compile replaces the pending image. A failed one clears
    /// it, so a later COMMIT cannot activate an older program by accident.
    /// The active image is never touched.
    pub fn stage(&mut self, compiled: Result<ProgramImage>) -> Result<Arc<ProgramImage>> {
        match compiled {
            Ok(image) => {
                let image = Arc::new(image);
                self.pending = Some(image.clone());
                Ok(image)
            }
            Err(e) => {
                self.pending = None;
                Err(e)
            }
        }
    }

    /// Makes the pending image active and empties the pending slot.
    ///
    /// Calls already running keep the `Arc` of the image they started with.
    pub fn commit(&mut self) -> Result<Arc<ProgramImage>> {
        let image = self.pending.take().ok_or(CodestageError::NothingStaged)?;
        self.active = Some(image.clone());
        Ok(image)
    }

    pub fn pending(&self) -> Option<&Arc<ProgramImage>> {
        self.pending.as_ref()
    }

    pub fn active(&self) -> Option<&Arc<ProgramImage>> {
        self.active.as_ref()
    }

    /// Active image, or `NoActiveImage` if nothing was ever committed.
    pub fn require_active(&self) -> Result<Arc<ProgramImage>> {
        self.active.clone().ok_or(CodestageError::NoActiveImage)
    }

    pub fn state(&self) -> StoreState {
        match (&self.active, &self.pending) {
            (Some(_), pending) => StoreState::Committed {
                pending: pending.is_some(),
            },
            (None, Some(_)) => StoreState::Parsed,
            (None, None) => StoreState::Empty,
        }
    }
}

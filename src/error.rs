use thiserror::Error;

use crate::commitlog::SegmentError;
use crate::db::StoreError;
use crate::replay::ReplayError;

/// Crate-level convenience error.
///
/// Not a "god error": a thin wrapper over the subsystem errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

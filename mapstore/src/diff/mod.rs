//! Binary diff support: availability bookkeeping, free space checks and the
//! applier collaborator.

mod applier;
mod manager;
mod space;

pub use applier::{DiffApplier, DiffApplyParams, DiffApplyResult, DiffReporter};
pub use manager::{DiffInfo, DiffManager, DiffStatus, UpdateInfo};
pub use space::{
    fits_with_slack, FixedFreeSpace, FreeSpaceSource, StatvfsFreeSpace, DOWNLOAD_SLACK_BYTES,
};

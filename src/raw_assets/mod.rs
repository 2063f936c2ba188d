mod queue;

pub use queue::{derive_raw_filename, DownloadReport, PendingRawAsset, RawAssetQueue, RAW_EXTENSION};

use std::fmt;

use crate::{config::DetectorConfig, messaging::types::MediaKind, utils::format_file_size};

/// Why a buffer was not considered real media.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    BelowAbsoluteFloor {
        len: usize,
        floor: usize,
    },
    BelowKindFloor {
        kind: MediaKind,
        len: usize,
        floor: usize,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Rejection::BelowAbsoluteFloor { len, floor } => write!(
                f,
                "{} is below the {} sanity floor",
                format_file_size(len),
                format_file_size(floor)
            ),
            Rejection::BelowKindFloor { kind, len, floor } => write!(
                f,
                "{} {} is below the {} thumbnail floor",
                kind.as_str(),
                format_file_size(len),
                format_file_size(floor)
            ),
        }
    }
}

impl std::error::Error for Rejection {}

/// Size floors that separate real media from protocol stubs and preview thumbnails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizePolicy {
    pub absolute_floor: usize,
    pub image_floor: usize,
    pub video_floor: usize,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self::from(&DetectorConfig::default())
    }
}

impl From<&DetectorConfig> for SizePolicy {
    fn from(cfg: &DetectorConfig) -> Self {
        Self {
            absolute_floor: cfg.min_media_bytes,
            image_floor: cfg.min_image_bytes,
            video_floor: cfg.min_video_bytes,
        }
    }
}

impl SizePolicy {
    pub fn kind_floor(&self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Image => self.image_floor,
            MediaKind::Video => self.video_floor,
        }
    }

    /// Floors are inclusive: a buffer exactly at a floor passes.
    pub fn check(&self, len: usize, kind: MediaKind) -> Result<(), Rejection> {
        if len < self.absolute_floor {
            return Err(Rejection::BelowAbsoluteFloor {
                len,
                floor: self.absolute_floor,
            });
        }
        let floor = self.kind_floor(kind);
        if len < floor {
            return Err(Rejection::BelowKindFloor { kind, len, floor });
        }
        Ok(())
    }
}

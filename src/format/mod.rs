//! On-disk formats
//!
//! [`kdb`] reads and writes KeePass 1.x files, [`kdbx`] KeePass 2.x version 4
//! files. [`sniff`] tells them apart from the first eight bytes.

pub mod kdb;
pub mod kdbx;

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::database::FormatVersion;
use crate::error::{DatabaseError, Result};
use crate::{DBSIG_2_V3, DBSIG_2_V4, PWM_DBSIG_1};

/// Load and save stages reported to a [`ProgressSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    HeaderSniff,
    HeaderParse,
    KeyDerivation,
    BodyDecrypt,
    BodyParse,
    TreeConstruct,
    BodySerialize,
    BodyEncrypt,
    Write,
}

/// Receiver for load/save progress
///
/// Cancellation is polled at stage boundaries and between records.
pub trait ProgressSink {
    fn update_stage(&mut self, stage: Stage);

    fn update_progress(&mut self, _percent: u8) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Sink that ignores every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update_stage(&mut self, _stage: Stage) {}
}

/// Report a stage and fail with `Cancelled` if the sink asks to stop
pub(crate) fn enter_stage(progress: &mut dyn ProgressSink, stage: Stage) -> Result<()> {
    debug!("Stage {:?}", stage);
    progress.update_stage(stage);
    check_cancelled(progress)
}

pub(crate) fn check_cancelled(progress: &dyn ProgressSink) -> Result<()> {
    if progress.is_cancelled() {
        return Err(DatabaseError::Cancelled);
    }
    Ok(())
}

/// Percentage of `done` out of `total`, for record loops
pub(crate) fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Identify the format from the two signature words, then rewind
pub fn sniff<R: Read + Seek>(reader: &mut R) -> Result<FormatVersion> {
    let start = reader.stream_position()?;
    let sig1 = reader.read_u32::<LittleEndian>().map_err(|_| DatabaseError::InvalidSignature)?;
    let sig2 = reader.read_u32::<LittleEndian>().map_err(|_| DatabaseError::InvalidSignature)?;
    reader.seek(SeekFrom::Start(start))?;

    match (sig1, sig2) {
        (PWM_DBSIG_1, DBSIG_2_V3) => Ok(FormatVersion::V3),
        (PWM_DBSIG_1, DBSIG_2_V4) => Ok(FormatVersion::V4),
        _ => Err(DatabaseError::InvalidSignature),
    }
}

/// Collect the whole body of a stream
pub(crate) fn read_to_end<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(data)
}

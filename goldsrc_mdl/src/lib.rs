//! Parser for GoldSrc studio models (`IDST`, version 10) and a skeletal pose
//! evaluator that turns their animation curves into per-bone transforms.
//!
//! ```no_run
//! use goldsrc_mdl::{Model, PoseRequest};
//!
//! # fn main() -> goldsrc_mdl::Result<()> {
//! let bytes = std::fs::read("scientist.mdl").unwrap();
//! let model = Model::from_bytes(&bytes)?;
//!
//! let mut request = PoseRequest::new(0);
//! request.frame = 3.5;
//! let transforms = model.evaluate_pose(&request)?;
//! assert_eq!(transforms.len(), model.bones.len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::cast_precision_loss, clippy::module_name_repetitions)]

mod animation;
mod binary_utils;
mod mdl;
mod mesh;
mod model;
mod pose;
mod texture;

use std::{io, result};

use thiserror::Error;

pub use animation::{advance_frame, decompress_curve, FrameAdvance};
pub use binary_utils::Cursor;
pub use mdl::{HeaderFlags, MotionType, SequenceFlags, TextureFlags, STUDIO_VERSION};
pub use mesh::{Mesh, TriVertex, TriangleCommand, TriangleKind};
pub use model::{
    Attachment, BodyPart, Bone, BoneAxis, BoneController, ControllerSlot, HitGroup, Hitbox,
    Model, Sequence, SequenceBlend, SequenceEvent, SequenceGroup, SkinFamily, SubModel,
};
pub use pose::{euler_to_quat, quat_slerp, ControllerInput, PoseRequest};
pub use texture::{decode_rgba, Texture, PALETTE_SIZE, TRANSPARENT_INDEX};

#[derive(Debug, Clone, Error, Hash, PartialEq, Eq)]
pub enum Error {
    #[error("io error reading studio model: {error}")]
    Io { error: String },
    #[error("not a studio model: invalid signature `{signature}`")]
    InvalidSignature { signature: String },
    #[error("unsupported studio model version {version}")]
    UnsupportedVersion { version: i32 },
    #[error("studio model truncated: {len} bytes at offset {offset} exceed buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("studio model corrupted: {error}")]
    Corrupted { error: &'static str },
    #[error("sequence {index} out of range, model has {count} sequences")]
    SequenceOutOfRange { index: usize, count: usize },
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    fn from_io(err: &io::Error) -> Self {
        Self::Io {
            error: err.to_string(),
        }
    }

    /// Returns `true` if the error was caused by reading past the end of the buffer,
    /// as opposed to the buffer not being a valid studio model.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::OutOfBounds { .. })
    }
}

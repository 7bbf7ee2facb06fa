use glam::{Mat4, Quat, Vec3};
use itertools::Itertools;

use crate::mdl::{MotionType, AXIS_COUNT, MAX_CONTROLLER_SLOTS};
use crate::model::{Bone, BoneAxis, BoneController, ControllerSlot, Model, Sequence};
use crate::Result;

/// Raw bone controller inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ControllerInput {
    /// User controllers 0..=3, each in `0..=255`.
    pub user: [f32; 4],
    /// Mouth controller, in `0..=64`.
    pub mouth: f32,
}

impl Default for ControllerInput {
    fn default() -> Self {
        Self {
            user: [128.0; 4],
            mouth: 0.0,
        }
    }
}

impl ControllerInput {
    #[must_use]
    pub fn get(&self, slot: ControllerSlot) -> f32 {
        match slot {
            ControllerSlot::User(index) => {
                self.user.get(usize::from(index)).copied().unwrap_or(0.0)
            }
            ControllerSlot::Mouth => self.mouth,
        }
    }
}

/// Everything [`Model::evaluate_pose`] needs besides the model.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoseRequest {
    pub sequence: usize,
    /// Fractional frame, clamped into the sequence's frame range.
    pub frame: f32,
    /// Blend inputs in `0..=255`. Only the first one is used.
    pub blend: [u8; 2],
    pub controllers: ControllerInput,
    /// Uniform scale applied to root bones.
    pub scale: f32,
}

impl PoseRequest {
    #[must_use]
    pub fn new(sequence: usize) -> Self {
        Self {
            sequence,
            frame: 0.0,
            blend: [0, 0],
            controllers: ControllerInput::default(),
            scale: 1.0,
        }
    }
}

impl BoneController {
    /// Offset this controller adds to its bone axis for the given input.
    ///
    /// Rotational controllers return radians; `start` and `end` are in degrees.
    #[must_use]
    pub fn adjustment(&self, input: &ControllerInput) -> f32 {
        let Some(slot) = self.slot else {
            return 0.0;
        };

        let t = (input.get(slot) / slot.input_range()).clamp(0.0, 1.0);
        let value = (1.0 - t) * self.start + t * self.end;

        if self.motion.intersects(MotionType::ROTATION) {
            value.to_radians()
        } else {
            value
        }
    }
}

/// Converts engine euler angles (radians, X roll, Y pitch, Z yaw) to a quaternion.
#[must_use]
pub fn euler_to_quat(angles: Vec3) -> Quat {
    let (sr, cr) = (angles.x * 0.5).sin_cos();
    let (sp, cp) = (angles.y * 0.5).sin_cos();
    let (sy, cy) = (angles.z * 0.5).sin_cos();

    Quat::from_xyzw(
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
        cr * cp * cy + sr * sp * sy,
    )
}

/// Spherical interpolation along the shorter arc.
///
/// Falls back to linear interpolation when the quaternions are nearly equal.
/// The result is not renormalized.
#[must_use]
pub fn quat_slerp(from: Quat, to: Quat, t: f32) -> Quat {
    let mut cos_omega = from.dot(to);
    let mut to = to;
    if cos_omega < 0.0 {
        cos_omega = -cos_omega;
        to = -to;
    }

    let (from_scale, to_scale) = if 1.0 - cos_omega > 1e-6 {
        let omega = cos_omega.acos();
        let sin_omega = omega.sin();
        (
            ((1.0 - t) * omega).sin() / sin_omega,
            (t * omega).sin() / sin_omega,
        )
    } else {
        (1.0 - t, t)
    };

    from * from_scale + to * to_scale
}

#[derive(Debug, Clone, Copy)]
struct BonePose {
    rotation: Quat,
    position: Vec3,
}

type Adjustments = [f32; MAX_CONTROLLER_SLOTS];
type BoneCurves = [Option<Vec<i16>>; AXIS_COUNT];

/// Frame position split into a sample index and the fraction towards the next one.
#[derive(Debug, Clone, Copy)]
struct FrameSample {
    index: usize,
    fraction: f32,
}

impl FrameSample {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn new(sequence: &Sequence, frame: f32) -> Self {
        let last_frame = sequence.frame_count as f32 - 1.0;
        let frame = if frame >= last_frame { last_frame } else { frame };
        // also maps NaN to 0
        let frame = frame.max(0.0);

        let floor = frame.floor();
        Self {
            index: floor as usize,
            fraction: frame - floor,
        }
    }
}

fn curve<'a>(curves: Option<&'a BoneCurves>, axis: BoneAxis) -> Option<&'a [i16]> {
    curves
        .and_then(|curves| curves[axis.index()].as_deref())
        .filter(|values| !values.is_empty())
}

fn adjustment(bone: &Bone, axis: BoneAxis, adjustments: &Adjustments) -> f32 {
    bone.controller(axis)
        .and_then(|slot| adjustments.get(slot))
        .copied()
        .unwrap_or(0.0)
}

fn bone_position(
    bone: &Bone,
    curves: Option<&BoneCurves>,
    sample: FrameSample,
    adjustments: &Adjustments,
) -> Vec3 {
    let mut position = [0.0; 3];

    for (value, axis) in position.iter_mut().zip(BoneAxis::TRANSLATION) {
        let base = bone.value[axis.index()];
        let scale = bone.scale[axis.index()];

        *value = match curve(curves, axis) {
            None => base,
            Some(values) => {
                let current = f32::from(values.get(sample.index).copied().unwrap_or(0));
                let mut value = base + current * scale;

                if sample.fraction > 0.0 {
                    if let Some(&next) = values.get(sample.index + 1) {
                        value += (f32::from(next) - current) * scale * sample.fraction;
                    }
                }

                value
            }
        } + adjustment(bone, axis, adjustments);
    }

    Vec3::from(position)
}

fn bone_rotation(
    bone: &Bone,
    curves: Option<&BoneCurves>,
    sample: FrameSample,
    adjustments: &Adjustments,
) -> Quat {
    let mut current = [0.0; 3];
    let mut next = [0.0; 3];

    for ((current, next), axis) in current
        .iter_mut()
        .zip(next.iter_mut())
        .zip(BoneAxis::ROTATION)
    {
        let base = bone.value[axis.index()];
        let scale = bone.scale[axis.index()];

        (*current, *next) = match curve(curves, axis) {
            None => (base, base),
            Some(values) => {
                let angle =
                    base + f32::from(values.get(sample.index).copied().unwrap_or(0)) * scale;
                let next_angle = values
                    .get(sample.index + 1)
                    .map_or(angle, |&next| base + f32::from(next) * scale);
                (angle, next_angle)
            }
        };

        let adjustment = adjustment(bone, axis, adjustments);
        *current += adjustment;
        *next += adjustment;
    }

    let rotation = euler_to_quat(Vec3::from(current));
    if sample.fraction > 0.0 {
        quat_slerp(rotation, euler_to_quat(Vec3::from(next)), sample.fraction)
    } else {
        rotation
    }
}

impl Model {
    /// Controller adjustments indexed by controller slot. When several
    /// controllers share a slot the last one wins.
    fn controller_adjustments(&self, input: &ControllerInput) -> Adjustments {
        let mut adjustments = [0.0; MAX_CONTROLLER_SLOTS];

        for controller in &self.bone_controllers {
            if let Some(slot) = controller.slot {
                adjustments[slot.index()] = controller.adjustment(input);
            }
        }

        adjustments
    }

    fn blend_pose(
        &self,
        curves: Option<&[BoneCurves]>,
        sample: FrameSample,
        adjustments: &Adjustments,
    ) -> Vec<BonePose> {
        self.bones
            .iter()
            .enumerate()
            .map(|(i, bone)| {
                let curves = curves.and_then(|curves| curves.get(i));

                BonePose {
                    rotation: bone_rotation(bone, curves, sample, adjustments),
                    position: bone_position(bone, curves, sample, adjustments),
                }
            })
            .collect_vec()
    }

    /// Computes the model-space transform of every bone, index-aligned with
    /// [`Model::bones`].
    ///
    /// # Errors
    ///
    /// Returns `Err` if the requested sequence doesn't exist.
    pub fn evaluate_pose(&self, request: &PoseRequest) -> Result<Vec<Mat4>> {
        let sequence = self.sequence(request.sequence)?;
        if self.bones.is_empty() {
            return Ok(Vec::new());
        }

        let sample = FrameSample::new(sequence, request.frame);
        let adjustments = self.controller_adjustments(&request.controllers);

        let mut blends = sequence.blends.iter();
        let mut pose = self.blend_pose(
            blends.next().map(|blend| blend.curves.as_slice()),
            sample,
            &adjustments,
        );

        if let Some(second) = blends.next() {
            let weight = f32::from(request.blend[0]) / 255.0;
            let second = self.blend_pose(Some(second.curves.as_slice()), sample, &adjustments);

            for (first, second) in pose.iter_mut().zip(second) {
                first.rotation = quat_slerp(first.rotation, second.rotation, weight);
                first.position = first.position * (1.0 - weight) + second.position * weight;
            }
        }

        let root_scale = Mat4::from_scale(Vec3::splat(request.scale));
        let mut transforms: Vec<Mat4> = Vec::with_capacity(self.bones.len());

        for (bone, pose) in self.bones.iter().zip(pose) {
            let local = Mat4::from_rotation_translation(pose.rotation, pose.position);

            let transform = match bone.parent {
                None => root_scale * local,
                Some(parent) => transforms
                    .get(parent)
                    .map_or(local, |&parent| parent * local),
            };
            transforms.push(transform);
        }

        Ok(transforms)
    }
}

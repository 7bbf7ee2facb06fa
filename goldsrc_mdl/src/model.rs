use std::io::Read;

use glam::{Mat4, Vec3};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::animation::decompress_curve;
use crate::mdl::{
    self, BodyPartRef, HeaderFlags, HeaderRef, Mdl, ModelRef, MotionType, SequenceFlags,
    SequenceRef, AXIS_COUNT,
};
use crate::mesh::{read_triangle_commands, Mesh};
use crate::texture::Texture;
use crate::{Error, Result};

fn index(value: i32, error: &'static str) -> Result<usize> {
    value.try_into().map_err(|_| Error::Corrupted { error })
}

/// Negative references are kept as `None` rather than failing the parse.
fn reference(value: i32, what: &str) -> Option<usize> {
    let index = usize::try_from(value).ok();
    if index.is_none() {
        warn!("{} {} is negative, ignoring", what, value);
    }
    index
}

/// One of the six animated channels of a bone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BoneAxis {
    X,
    Y,
    Z,
    XR,
    YR,
    ZR,
}

impl BoneAxis {
    pub const ALL: [Self; AXIS_COUNT] = [Self::X, Self::Y, Self::Z, Self::XR, Self::YR, Self::ZR];
    pub const TRANSLATION: [Self; 3] = [Self::X, Self::Y, Self::Z];
    pub const ROTATION: [Self; 3] = [Self::XR, Self::YR, Self::ZR];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn is_rotation(self) -> bool {
        matches!(self, Self::XR | Self::YR | Self::ZR)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Bone {
    pub name: String,
    /// Always an earlier bone in the model's bone list.
    pub parent: Option<usize>,
    pub flags: i32,
    /// Controller slot driving each axis, indexed by [`BoneAxis::index`].
    pub controllers: [Option<usize>; AXIS_COUNT],
    pub value: [f32; AXIS_COUNT],
    pub scale: [f32; AXIS_COUNT],
}

impl Bone {
    fn from_raw(bone_index: usize, bone: &mdl::Bone) -> Result<Self> {
        let parent = match bone.parent_bone_index.get() {
            -1 => None,
            parent => Some(
                usize::try_from(parent)
                    .ok()
                    .filter(|&parent| parent < bone_index)
                    .ok_or(Error::Corrupted {
                        error: "bone parent does not precede bone",
                    })?,
            ),
        };

        Ok(Self {
            name: mdl::string(&bone.name),
            parent,
            flags: bone.flags.get(),
            controllers: bone
                .bone_controller_indexes
                .map(|controller| usize::try_from(controller.get()).ok()),
            value: bone.value.map(|v| v.get()),
            scale: bone.scale.map(|v| v.get()),
        })
    }

    #[must_use]
    pub fn controller(&self, axis: BoneAxis) -> Option<usize> {
        self.controllers[axis.index()]
    }

    /// Rest translation.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.value[0], self.value[1], self.value[2])
    }

    /// Rest rotation as euler angles in radians.
    #[must_use]
    pub fn rotation(&self) -> Vec3 {
        Vec3::new(self.value[3], self.value[4], self.value[5])
    }
}

/// Input a bone controller reads: one of the four user controllers or the mouth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ControllerSlot {
    User(u8),
    Mouth,
}

impl ControllerSlot {
    #[must_use]
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0..=3 => u8::try_from(index).ok().map(Self::User),
            4 => Some(Self::Mouth),
            _ => None,
        }
    }

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::User(index) => usize::from(index),
            Self::Mouth => 4,
        }
    }

    /// Raw input value that maps to the controller's `end`.
    #[must_use]
    pub fn input_range(self) -> f32 {
        match self {
            Self::User(_) => 255.0,
            Self::Mouth => 64.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoneController {
    /// `None` if the file stores a negative bone index.
    pub bone: Option<usize>,
    pub motion: MotionType,
    pub start: f32,
    pub end: f32,
    pub rest: i32,
    /// `None` when the file names a slot outside 0..=4; such a controller has no effect.
    pub slot: Option<ControllerSlot>,
}

impl BoneController {
    fn from_raw(controller: &mdl::BoneController) -> Self {
        let slot = ControllerSlot::from_index(controller.input_field.get());
        if slot.is_none() {
            warn!(
                "bone controller has unknown input slot {}, ignoring",
                controller.input_field.get()
            );
        }

        Self {
            bone: reference(controller.bone_index.get(), "bone controller bone index"),
            motion: MotionType::from_bits_retain(controller.kind.get()),
            start: controller.start.get(),
            end: controller.end.get(),
            rest: controller.rest.get(),
            slot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum HitGroup {
    Generic,
    Head,
    Chest,
    Stomach,
    LeftArm,
    RightArm,
    LeftLeg,
    RightLeg,
    Other(i32),
}

impl HitGroup {
    #[must_use]
    pub fn from_id(id: i32) -> Self {
        match id {
            0 => Self::Generic,
            1 => Self::Head,
            2 => Self::Chest,
            3 => Self::Stomach,
            4 => Self::LeftArm,
            5 => Self::RightArm,
            6 => Self::LeftLeg,
            7 => Self::RightLeg,
            id => Self::Other(id),
        }
    }

    #[must_use]
    pub fn id(self) -> i32 {
        match self {
            Self::Generic => 0,
            Self::Head => 1,
            Self::Chest => 2,
            Self::Stomach => 3,
            Self::LeftArm => 4,
            Self::RightArm => 5,
            Self::LeftLeg => 6,
            Self::RightLeg => 7,
            Self::Other(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Hitbox {
    pub bone: Option<usize>,
    pub group: HitGroup,
    /// Bone-local bounds.
    pub min: Vec3,
    pub max: Vec3,
}

impl Hitbox {
    fn from_raw(hitbox: &mdl::HitBox) -> Self {
        Self {
            bone: reference(hitbox.bone_index.get(), "hitbox bone index"),
            group: HitGroup::from_id(hitbox.group_index.get()),
            min: mdl::vec3(&hitbox.bounding_box_min),
            max: mdl::vec3(&hitbox.bounding_box_max),
        }
    }

    /// The eight box corners in model space, or `None` if the hitbox has no bone
    /// or `transforms` has no entry for it.
    #[must_use]
    pub fn world_corners(&self, transforms: &[Mat4]) -> Option<[Vec3; 8]> {
        let transform = transforms.get(self.bone?)?;

        Some(std::array::from_fn(|i| {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            transform.transform_point3(corner)
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SequenceEvent {
    pub frame: i32,
    pub event: i32,
    pub kind: i32,
    pub options: String,
}

/// One full set of animation curves for a sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SequenceBlend {
    /// Per bone, per axis. `None` means the axis holds its base value.
    pub curves: Vec<[Option<Vec<i16>>; AXIS_COUNT]>,
}

impl SequenceBlend {
    pub(crate) fn empty(bone_count: usize) -> Self {
        Self {
            curves: vec![Default::default(); bone_count],
        }
    }

    #[must_use]
    pub fn curve(&self, bone: usize, axis: BoneAxis) -> Option<&[i16]> {
        self.curves.get(bone)?[axis.index()].as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Sequence {
    pub label: String,
    pub fps: f32,
    pub flags: SequenceFlags,
    pub activity: i32,
    pub activity_weight: i32,
    pub events: Vec<SequenceEvent>,
    pub frame_count: usize,
    pub blends: Vec<SequenceBlend>,
    pub blend_type: [MotionType; 2],
    pub blend_start: [f32; 2],
    pub blend_end: [f32; 2],
    pub motion_type: MotionType,
    pub motion_bone: i32,
    pub linear_movement: Vec3,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
    /// Nonzero if the animation lives in an external sequence group file.
    pub sequence_group: i32,
    pub entry_node: i32,
    pub exit_node: i32,
    pub node_flags: i32,
}

impl Sequence {
    fn from_ref(header: &HeaderRef, sequence: SequenceRef, bone_count: usize) -> Result<Self> {
        let desc = sequence.desc();
        let label = mdl::string(&desc.label);
        let frame_count = sequence.frame_count()?;

        let events = sequence
            .events()?
            .iter()
            .map(|event| SequenceEvent {
                frame: event.frame.get(),
                event: event.event.get(),
                kind: event.kind.get(),
                options: mdl::string(&event.options),
            })
            .collect_vec();

        let blends = if desc.sequence_group.get() == 0 {
            read_blends(header, &sequence, bone_count, frame_count)?
        } else {
            warn!(
                "sequence `{}` is stored in external sequence group {}, using rest pose",
                label,
                desc.sequence_group.get()
            );
            (0..sequence.blend_count()?)
                .map(|_| SequenceBlend::empty(bone_count))
                .collect()
        };

        Ok(Self {
            label,
            fps: desc.fps.get(),
            flags: SequenceFlags::from_bits_retain(desc.flags.get()),
            activity: desc.activity.get(),
            activity_weight: desc.activity_weight.get(),
            events,
            frame_count,
            blends,
            blend_type: desc
                .blend_type
                .map(|kind| MotionType::from_bits_retain(kind.get())),
            blend_start: desc.blend_start.map(|v| v.get()),
            blend_end: desc.blend_end.map(|v| v.get()),
            motion_type: MotionType::from_bits_retain(desc.motion_type.get()),
            motion_bone: desc.motion_bone.get(),
            linear_movement: mdl::vec3(&desc.linear_movement),
            bounds_min: mdl::vec3(&desc.bb_min),
            bounds_max: mdl::vec3(&desc.bb_max),
            sequence_group: desc.sequence_group.get(),
            entry_node: desc.entry_node.get(),
            exit_node: desc.exit_node.get(),
            node_flags: desc.node_flags.get(),
        })
    }

    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.flags.contains(SequenceFlags::LOOPING)
    }

    /// Playback length in seconds at the sequence's own fps.
    #[must_use]
    pub fn duration(&self) -> f32 {
        if self.fps <= 0.0 || self.frame_count <= 1 {
            return 0.0;
        }

        (self.frame_count - 1) as f32 / self.fps
    }
}

/// Reads every blend's curves. Blends are laid out back to back from the
/// sequence's animation offset, each holding one record of six `u16` curve
/// offsets per bone. Curve offsets are relative to their bone's record.
fn read_blends(
    header: &HeaderRef,
    sequence: &SequenceRef,
    bone_count: usize,
    frame_count: usize,
) -> Result<Vec<SequenceBlend>> {
    let blend_count = sequence.blend_count()?;
    let anim_offset = sequence.anim_offset()?;

    let record_size = AXIS_COUNT * 2;
    let blend_size = bone_count * record_size;

    let mut table = header.cursor();
    table.seek(anim_offset);
    table.read_bytes(blend_size * blend_count)?;

    (0..blend_count)
        .map(|blend| {
            let curves = (0..bone_count)
                .map(|bone| {
                    let record_offset = anim_offset + blend * blend_size + bone * record_size;

                    let mut cursor = header.cursor();
                    cursor.seek(record_offset);
                    let mut curve_offsets = [0_u16; AXIS_COUNT];
                    for curve_offset in &mut curve_offsets {
                        *curve_offset = cursor.read_u16()?;
                    }

                    let mut curves: [Option<Vec<i16>>; AXIS_COUNT] = Default::default();
                    for (curve, curve_offset) in curves.iter_mut().zip(curve_offsets) {
                        if curve_offset == 0 {
                            continue;
                        }

                        cursor.seek(record_offset + usize::from(curve_offset));
                        *curve = Some(decompress_curve(&mut cursor, frame_count)?);
                    }

                    Ok(curves)
                })
                .collect::<Result<_>>()?;

            Ok(SequenceBlend { curves })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SequenceGroup {
    pub label: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Attachment {
    pub name: String,
    pub kind: i32,
    pub bone: Option<usize>,
    pub origin: Vec3,
    pub vectors: [Vec3; 3],
}

impl Attachment {
    fn from_raw(attachment: &mdl::Attachment) -> Self {
        Self {
            name: mdl::string(&attachment.name),
            kind: attachment.kind.get(),
            bone: reference(attachment.bone_index.get(), "attachment bone index"),
            origin: mdl::vec3(&attachment.origin),
            vectors: [
                mdl::vec3(&attachment.vectors[0]),
                mdl::vec3(&attachment.vectors[1]),
                mdl::vec3(&attachment.vectors[2]),
            ],
        }
    }

    /// Attachment origin in model space, or `None` if the attachment has no bone
    /// or `transforms` has no entry for it.
    #[must_use]
    pub fn world_origin(&self, transforms: &[Mat4]) -> Option<Vec3> {
        transforms
            .get(self.bone?)
            .map(|transform| transform.transform_point3(self.origin))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SubModel {
    pub name: String,
    pub kind: i32,
    pub bounding_radius: f32,
    pub vertices: Vec<Vec3>,
    pub vertex_bones: Vec<u8>,
    pub normals: Vec<Vec3>,
    pub normal_bones: Vec<u8>,
    pub meshes: Vec<Mesh>,
}

impl SubModel {
    fn from_ref(model: ModelRef) -> Result<Self> {
        let raw = model.model();

        let meshes = model
            .meshes()?
            .iter()
            .map(|mesh| {
                let mut cursor = model.triangle_commands(mesh)?;

                Ok(Mesh {
                    skin_reference: reference(
                        mesh.skin_reference.get(),
                        "mesh skin reference",
                    ),
                    commands: read_triangle_commands(&mut cursor)?,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            name: mdl::string(&raw.name),
            kind: raw.kind.get(),
            bounding_radius: raw.bounding_radius.get(),
            vertices: model.vertices()?,
            vertex_bones: model.vertex_bones()?.to_vec(),
            normals: model.normals()?,
            normal_bones: model.normal_bones()?.to_vec(),
            meshes,
        })
    }

    #[must_use]
    pub fn vertex(&self, index: i16) -> Option<Vec3> {
        self.vertices.get(usize::try_from(index).ok()?).copied()
    }

    #[must_use]
    pub fn normal(&self, index: i16) -> Option<Vec3> {
        self.normals.get(usize::try_from(index).ok()?).copied()
    }

    #[must_use]
    pub fn vertex_bone(&self, index: i16) -> Option<usize> {
        self.vertex_bones
            .get(usize::try_from(index).ok()?)
            .map(|&bone| usize::from(bone))
    }

    #[must_use]
    pub fn normal_bone(&self, index: i16) -> Option<usize> {
        self.normal_bones
            .get(usize::try_from(index).ok()?)
            .map(|&bone| usize::from(bone))
    }

    /// Vertex moved by its bone's transform.
    ///
    /// A vertex whose bone has no transform is returned untransformed.
    #[must_use]
    pub fn world_vertex(&self, index: i16, transforms: &[Mat4]) -> Option<Vec3> {
        let vertex = self.vertex(index)?;

        Some(
            self.vertex_bone(index)
                .and_then(|bone| transforms.get(bone))
                .map_or(vertex, |transform| transform.transform_point3(vertex)),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BodyPart {
    pub name: String,
    /// Divisor applied to the body value before selecting a sub-model.
    pub base: i32,
    pub models: Vec<SubModel>,
}

impl BodyPart {
    fn from_ref(body_part: BodyPartRef) -> Result<Self> {
        let raw = body_part.body_part();

        Ok(Self {
            name: mdl::string(&raw.name),
            base: raw.base.get(),
            models: body_part
                .iter_models()?
                .map(SubModel::from_ref)
                .collect::<Result<_>>()?,
        })
    }

    /// Index of the sub-model selected by `body`: `(body / base) mod count`.
    ///
    /// Always 0 with fewer than two sub-models or a non-positive base.
    #[must_use]
    pub fn active_model_index(&self, body: i32) -> usize {
        let Ok(count) = i32::try_from(self.models.len()) else {
            return 0;
        };
        if count <= 1 || self.base <= 0 {
            return 0;
        }

        usize::try_from(body.div_euclid(self.base).rem_euclid(count)).unwrap_or(0)
    }

    #[must_use]
    pub fn active_model(&self, body: i32) -> Option<&SubModel> {
        self.models.get(self.active_model_index(body))
    }
}

/// Maps each mesh skin reference slot to a texture index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SkinFamily {
    pub textures: Vec<i16>,
}

/// A fully decoded studio model.
///
/// Produced in one pass by [`Model::from_bytes`] and never modified afterwards.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Model {
    pub name: String,
    /// File length declared in the header.
    pub length: i32,
    pub flags: HeaderFlags,
    pub eye_position: Vec3,
    /// Movement hull.
    pub hull_min: Vec3,
    pub hull_max: Vec3,
    /// Clipping bounds.
    pub view_min: Vec3,
    pub view_max: Vec3,
    pub bones: Vec<Bone>,
    pub bone_controllers: Vec<BoneController>,
    pub hitboxes: Vec<Hitbox>,
    pub sequences: Vec<Sequence>,
    pub sequence_groups: Vec<SequenceGroup>,
    pub attachments: Vec<Attachment>,
    pub body_parts: Vec<BodyPart>,
    pub textures: Vec<Texture>,
    /// Family 0 is the default skin.
    pub skin_families: Vec<SkinFamily>,
    pub transition_count: usize,
    /// Row-major `transition_count * transition_count` matrix.
    pub transitions: Vec<u8>,
}

impl Model {
    /// Decodes a complete studio model file.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the signature or version don't match, if any table
    /// points past the end of `bytes`, or if the bone hierarchy is malformed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Mdl::new(bytes).header()?;
        let raw = header.header();

        let bones: Vec<Bone> = header
            .bones()?
            .iter()
            .enumerate()
            .map(|(i, bone)| Bone::from_raw(i, bone))
            .collect::<Result<_>>()?;

        let bone_controllers = header
            .bone_controllers()?
            .iter()
            .map(BoneController::from_raw)
            .collect();

        let hitboxes = header
            .hit_boxes()?
            .iter()
            .map(Hitbox::from_raw)
            .collect();

        let sequences = header
            .iter_sequences()?
            .map(|sequence| Sequence::from_ref(&header, sequence, bones.len()))
            .collect::<Result<_>>()?;

        let sequence_groups = header
            .sequence_groups()?
            .iter()
            .map(|group| SequenceGroup {
                label: mdl::string(&group.label),
                name: mdl::string(&group.name),
            })
            .collect();

        let attachments = header
            .attachments()?
            .iter()
            .map(Attachment::from_raw)
            .collect();

        let body_parts = header
            .iter_body_parts()?
            .map(BodyPart::from_ref)
            .collect::<Result<_>>()?;

        let textures: Vec<Texture> = header
            .iter_textures()?
            .map(Texture::from_ref)
            .collect::<Result<_>>()?;

        let skin_families = header
            .skin_families()?
            .into_iter()
            .map(|textures| SkinFamily { textures })
            .collect_vec();

        if skin_families
            .iter()
            .flat_map(|family| &family.textures)
            .any(|&texture| usize::try_from(texture).map_or(true, |t| t >= textures.len()))
        {
            warn!("skin family references a missing texture");
        }

        let transitions = header.transitions()?;
        let transition_count = index(
            raw.transition_count.get(),
            "transition count is negative",
        )?;

        let model = Self {
            name: mdl::string(&raw.name),
            length: raw.length.get(),
            flags: HeaderFlags::from_bits_retain(raw.flags.get()),
            eye_position: mdl::vec3(&raw.eye_position),
            hull_min: mdl::vec3(&raw.hull_min),
            hull_max: mdl::vec3(&raw.hull_max),
            view_min: mdl::vec3(&raw.view_bb_min),
            view_max: mdl::vec3(&raw.view_bb_max),
            bones,
            bone_controllers,
            hitboxes,
            sequences,
            sequence_groups,
            attachments,
            body_parts,
            textures,
            skin_families,
            transition_count,
            transitions,
        };

        debug!("studio model `{}` assembled", model.name);

        Ok(model)
    }

    /// Reads the whole stream and decodes it.
    ///
    /// # Errors
    ///
    /// Returns `Err` if reading fails or the data is not a valid studio model.
    pub fn read(mut reader: impl Read) -> Result<Self> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|err| Error::from_io(&err))?;

        Self::from_bytes(&bytes)
    }

    #[must_use]
    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    /// # Errors
    ///
    /// Returns `Err` if `index` is not a sequence of this model.
    pub fn sequence(&self, index: usize) -> Result<&Sequence> {
        self.sequences.get(index).ok_or(Error::SequenceOutOfRange {
            index,
            count: self.sequences.len(),
        })
    }

    /// Resolves a mesh skin reference through a skin family.
    ///
    /// A missing family or slot falls back to using `skin_reference` as the
    /// texture index directly.
    #[must_use]
    pub fn skin_texture_index(&self, family: usize, skin_reference: usize) -> Option<usize> {
        match self
            .skin_families
            .get(family)
            .and_then(|family| family.textures.get(skin_reference))
        {
            Some(&texture) => usize::try_from(texture).ok(),
            None => Some(skin_reference),
        }
    }

    #[must_use]
    pub fn skin_texture(&self, family: usize, skin_reference: usize) -> Option<&Texture> {
        self.textures
            .get(self.skin_texture_index(family, skin_reference)?)
    }

    /// Transition flag from node `from` to node `to`.
    #[must_use]
    pub fn transition(&self, from: usize, to: usize) -> Option<u8> {
        if from >= self.transition_count || to >= self.transition_count {
            return None;
        }

        self.transitions
            .get(from * self.transition_count + to)
            .copied()
    }
}

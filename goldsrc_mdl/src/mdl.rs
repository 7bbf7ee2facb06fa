use bitflags::bitflags;
use byteorder::LittleEndian;
use glam::Vec3;
use tracing::debug;
use zerocopy::{FromBytes, Unaligned};

use crate::binary_utils::{null_terminated_prefix, Cursor};
use crate::{Error, Result};


type I32 = zerocopy::byteorder::I32<LittleEndian>;
type F32 = zerocopy::byteorder::F32<LittleEndian>;
type Vector = [F32; 3];

pub const STUDIO_SIGNATURE: &[u8; 4] = b"IDST";
pub const STUDIO_VERSION: i32 = 10;

/// Translation X/Y/Z followed by rotation X/Y/Z.
pub const AXIS_COUNT: usize = 6;
pub const MAX_CONTROLLER_SLOTS: usize = 5;
/// Engine limit on animation blends per sequence.
pub const MAX_BLEND_COUNT: usize = 4;
/// Upper bound on frames per sequence. Curves are expanded to this many values
/// even when their stream is short, so larger counts are treated as corrupt.
pub const MAX_FRAME_COUNT: usize = 1 << 16;

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct Header {
    pub id: [u8; 4],
    pub version: I32,
    pub name: [u8; 64],
    pub length: I32,

    pub eye_position: Vector,
    pub hull_min: Vector,
    pub hull_max: Vector,
    pub view_bb_min: Vector,
    pub view_bb_max: Vector,

    pub flags: I32,

    pub bone_count: I32,
    pub bone_offset: I32,

    pub bone_controller_count: I32,
    pub bone_controller_offset: I32,

    pub hit_box_count: I32,
    pub hit_box_offset: I32,

    pub sequence_count: I32,
    pub sequence_offset: I32,

    pub sequence_group_count: I32,
    pub sequence_group_offset: I32,

    pub texture_count: I32,
    pub texture_offset: I32,
    pub texture_data_offset: I32,

    pub skin_reference_count: I32,
    pub skin_family_count: I32,
    pub skin_family_offset: I32,

    pub body_part_count: I32,
    pub body_part_offset: I32,

    pub attachment_count: I32,
    pub attachment_offset: I32,

    sound_table: I32,
    sound_offset: I32,
    sound_groups: I32,
    sound_group_offset: I32,

    pub transition_count: I32,
    pub transition_offset: I32,
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct Bone {
    pub name: [u8; 32],
    pub parent_bone_index: I32,
    pub flags: I32,
    pub bone_controller_indexes: [I32; AXIS_COUNT],
    pub value: [F32; AXIS_COUNT],
    pub scale: [F32; AXIS_COUNT],
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct BoneController {
    pub bone_index: I32,
    pub kind: I32,
    pub start: F32,
    pub end: F32,
    pub rest: I32,
    pub input_field: I32,
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct HitBox {
    pub bone_index: I32,
    pub group_index: I32,
    pub bounding_box_min: Vector,
    pub bounding_box_max: Vector,
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct SequenceDesc {
    pub label: [u8; 32],
    pub fps: F32,
    pub flags: I32,

    pub activity: I32,
    pub activity_weight: I32,

    pub event_count: I32,
    pub event_offset: I32,

    pub frame_count: I32,

    pivot_count: I32,
    pivot_offset: I32,

    pub motion_type: I32,
    pub motion_bone: I32,
    pub linear_movement: Vector,
    auto_move_position_offset: I32,
    auto_move_angle_offset: I32,

    pub bb_min: Vector,
    pub bb_max: Vector,

    pub blend_count: I32,
    pub anim_offset: I32,

    pub blend_type: [I32; 2],
    pub blend_start: [F32; 2],
    pub blend_end: [F32; 2],
    blend_parent: I32,

    pub sequence_group: I32,

    pub entry_node: I32,
    pub exit_node: I32,
    pub node_flags: I32,

    next_sequence: I32,
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct Event {
    pub frame: I32,
    pub event: I32,
    pub kind: I32,
    pub options: [u8; 64],
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct SequenceGroup {
    pub label: [u8; 32],
    pub name: [u8; 64],
    cache: I32,
    data: I32,
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct Attachment {
    pub name: [u8; 32],
    pub kind: I32,
    pub bone_index: I32,
    pub origin: Vector,
    pub vectors: [Vector; 3],
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct BodyPart {
    pub name: [u8; 64],
    pub model_count: I32,
    pub base: I32,
    pub model_offset: I32,
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct Model {
    pub name: [u8; 64],
    pub kind: I32,
    pub bounding_radius: F32,

    pub mesh_count: I32,
    pub mesh_offset: I32,

    pub vertex_count: I32,
    pub vertex_info_offset: I32,
    pub vertex_offset: I32,

    pub normal_count: I32,
    pub normal_info_offset: I32,
    pub normal_offset: I32,

    group_count: I32,
    group_offset: I32,
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct Mesh {
    pub triangle_count: I32,
    pub triangle_offset: I32,
    pub skin_reference: I32,
    normal_count: I32,
    normal_offset: I32,
}

#[derive(Debug, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct Texture {
    pub name: [u8; 64],
    pub flags: I32,
    pub width: I32,
    pub height: I32,
    pub data_offset: I32,
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize))]
    pub struct HeaderFlags: i32 {
        const ROCKET = 1 << 0;
        const GRENADE = 1 << 1;
        const GIB = 1 << 2;
        const ROTATE = 1 << 3;
        const TRACER = 1 << 4;
        const ZOMBIE_GIB = 1 << 5;
        const TRACER_2 = 1 << 6;
        const TRACER_3 = 1 << 7;
        const NO_SHADE_LIGHT = 1 << 8;
        const HITBOX_COLLISIONS = 1 << 9;
        const FORCE_SKY_LIGHT = 1 << 10;
    }
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize))]
    pub struct TextureFlags: i32 {
        const FLAT_SHADE = 0x0001;
        const CHROME = 0x0002;
        const FULL_BRIGHT = 0x0004;
        const MIPMAPS = 0x0008;
        const ADDITIVE = 0x0020;
        const MASKED = 0x0040;
    }
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize))]
    pub struct SequenceFlags: i32 {
        const LOOPING = 0x0001;
    }
}

bitflags! {
    /// Axes a bone controller drives, also used for sequence motion types.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize))]
    pub struct MotionType: i32 {
        const X = 0x0001;
        const Y = 0x0002;
        const Z = 0x0004;
        const XR = 0x0008;
        const YR = 0x0010;
        const ZR = 0x0020;
        const LX = 0x0040;
        const LY = 0x0080;
        const LZ = 0x0100;
        const AX = 0x0200;
        const AY = 0x0400;
        const AZ = 0x0800;
        const AXR = 0x1000;
        const AYR = 0x2000;
        const AZR = 0x4000;

        const ROTATION = Self::XR.bits() | Self::YR.bits() | Self::ZR.bits();
    }
}

pub(crate) fn vec3(vector: &Vector) -> Vec3 {
    Vec3::new(vector[0].get(), vector[1].get(), vector[2].get())
}

pub(crate) fn string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(null_terminated_prefix(bytes)).into_owned()
}

fn count(value: I32, error: &'static str) -> Result<usize> {
    value.get().try_into().map_err(|_| Error::Corrupted { error })
}

fn bounded_count(value: I32, max: usize, error: &'static str) -> Result<usize> {
    let count = count(value, error)?;
    if count > max {
        return Err(Error::Corrupted { error });
    }
    Ok(count)
}

fn offset(value: I32, error: &'static str) -> Result<usize> {
    value.get().try_into().map_err(|_| Error::Corrupted { error })
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Mdl<'a> {
    bytes: &'a [u8],
}

impl<'a> Mdl<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn cursor(&self) -> Cursor<'a> {
        Cursor::new(self.bytes)
    }

    pub fn check_signature(&self) -> Result<()> {
        let signature = self.cursor().read_bytes(4)?;

        if signature == STUDIO_SIGNATURE {
            Ok(())
        } else {
            Err(Error::InvalidSignature {
                signature: String::from_utf8_lossy(signature).into_owned(),
            })
        }
    }

    pub fn version(&self) -> Result<i32> {
        let mut cursor = self.cursor();
        cursor.seek(4);
        cursor.read_i32()
    }

    pub fn check_version(&self) -> Result<i32> {
        let version = self.version()?;

        if version == STUDIO_VERSION {
            Ok(version)
        } else {
            Err(Error::UnsupportedVersion { version })
        }
    }

    /// Validates the signature and version and returns a view of the header.
    pub fn header(&self) -> Result<HeaderRef<'a>> {
        self.check_signature()?;
        self.check_version()?;

        let header: &Header = self.cursor().read_record()?;
        debug!(
            "studio model `{}`: {} bones, {} sequences, {} body parts, {} textures",
            string(&header.name),
            header.bone_count.get(),
            header.sequence_count.get(),
            header.body_part_count.get(),
            header.texture_count.get(),
        );

        Ok(HeaderRef {
            header,
            bytes: self.bytes,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderRef<'a> {
    header: &'a Header,
    bytes: &'a [u8],
}

impl<'a> HeaderRef<'a> {
    pub fn header(&self) -> &'a Header {
        self.header
    }

    pub fn cursor(&self) -> Cursor<'a> {
        Cursor::new(self.bytes)
    }

    fn records<T: FromBytes + Unaligned>(
        &self,
        offset_field: I32,
        count_field: I32,
        offset_error: &'static str,
        count_error: &'static str,
    ) -> Result<&'a [T]> {
        let count = count(count_field, count_error)?;
        if count == 0 {
            return Ok(&[]);
        }

        let mut cursor = self.cursor();
        cursor.seek(offset(offset_field, offset_error)?);
        cursor.read_records(count)
    }

    pub fn bones(&self) -> Result<&'a [Bone]> {
        self.records(
            self.header.bone_offset,
            self.header.bone_count,
            "bone offset is negative",
            "bone count is negative",
        )
    }

    pub fn bone_controllers(&self) -> Result<&'a [BoneController]> {
        self.records(
            self.header.bone_controller_offset,
            self.header.bone_controller_count,
            "bone controller offset is negative",
            "bone controller count is negative",
        )
    }

    pub fn hit_boxes(&self) -> Result<&'a [HitBox]> {
        self.records(
            self.header.hit_box_offset,
            self.header.hit_box_count,
            "hitbox offset is negative",
            "hitbox count is negative",
        )
    }

    pub fn sequence_groups(&self) -> Result<&'a [SequenceGroup]> {
        self.records(
            self.header.sequence_group_offset,
            self.header.sequence_group_count,
            "sequence group offset is negative",
            "sequence group count is negative",
        )
    }

    pub fn attachments(&self) -> Result<&'a [Attachment]> {
        self.records(
            self.header.attachment_offset,
            self.header.attachment_count,
            "attachment offset is negative",
            "attachment count is negative",
        )
    }

    pub fn iter_sequences(&self) -> Result<impl Iterator<Item = SequenceRef<'a>> + 'a> {
        let sequences: &[SequenceDesc] = self.records(
            self.header.sequence_offset,
            self.header.sequence_count,
            "sequence offset is negative",
            "sequence count is negative",
        )?;
        let bytes = self.bytes;

        Ok(sequences
            .iter()
            .map(move |sequence| SequenceRef { sequence, bytes }))
    }

    pub fn iter_body_parts(&self) -> Result<impl Iterator<Item = BodyPartRef<'a>> + 'a> {
        let body_parts: &[BodyPart] = self.records(
            self.header.body_part_offset,
            self.header.body_part_count,
            "body part offset is negative",
            "body part count is negative",
        )?;
        let bytes = self.bytes;

        Ok(body_parts
            .iter()
            .map(move |body_part| BodyPartRef { body_part, bytes }))
    }

    pub fn iter_textures(&self) -> Result<impl Iterator<Item = TextureRef<'a>> + 'a> {
        let textures: &[Texture] = self.records(
            self.header.texture_offset,
            self.header.texture_count,
            "texture offset is negative",
            "texture count is negative",
        )?;
        let bytes = self.bytes;

        Ok(textures
            .iter()
            .map(move |texture| TextureRef { texture, bytes }))
    }

    /// Skin families, each mapping a skin reference slot to a texture index.
    pub fn skin_families(&self) -> Result<Vec<Vec<i16>>> {
        let reference_count = count(
            self.header.skin_reference_count,
            "skin reference count is negative",
        )?;
        let family_count = count(
            self.header.skin_family_count,
            "skin family count is negative",
        )?;
        if reference_count == 0 || family_count == 0 {
            return Ok(Vec::new());
        }

        let mut cursor = self.cursor();
        cursor.seek(offset(
            self.header.skin_family_offset,
            "skin family offset is negative",
        )?);

        (0..family_count)
            .map(|_| (0..reference_count).map(|_| cursor.read_i16()).collect())
            .collect()
    }

    /// Row-major `transition_count²` node transition matrix.
    pub fn transitions(&self) -> Result<Vec<u8>> {
        let transition_count = count(
            self.header.transition_count,
            "transition count is negative",
        )?;
        if transition_count == 0 {
            return Ok(Vec::new());
        }

        let mut cursor = self.cursor();
        cursor.seek(offset(
            self.header.transition_offset,
            "transition offset is negative",
        )?);

        let len = transition_count
            .checked_mul(transition_count)
            .ok_or(Error::Corrupted {
                error: "transition count too large",
            })?;
        Ok(cursor.read_bytes(len)?.to_vec())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SequenceRef<'a> {
    sequence: &'a SequenceDesc,
    bytes: &'a [u8],
}

impl<'a> SequenceRef<'a> {
    pub fn desc(&self) -> &'a SequenceDesc {
        self.sequence
    }

    pub fn frame_count(&self) -> Result<usize> {
        bounded_count(
            self.sequence.frame_count,
            MAX_FRAME_COUNT,
            "sequence frame count is negative or too large",
        )
    }

    pub fn blend_count(&self) -> Result<usize> {
        bounded_count(
            self.sequence.blend_count,
            MAX_BLEND_COUNT,
            "sequence blend count is negative or too large",
        )
    }

    /// Absolute offset of the first blend's per-bone curve offset table.
    pub fn anim_offset(&self) -> Result<usize> {
        offset(
            self.sequence.anim_offset,
            "sequence animation offset is negative",
        )
    }

    pub fn events(&self) -> Result<&'a [Event]> {
        let count = count(self.sequence.event_count, "sequence event count is negative")?;
        if count == 0 {
            return Ok(&[]);
        }

        let mut cursor = Cursor::new(self.bytes);
        cursor.seek(offset(
            self.sequence.event_offset,
            "sequence event offset is negative",
        )?);
        cursor.read_records(count)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BodyPartRef<'a> {
    body_part: &'a BodyPart,
    bytes: &'a [u8],
}

impl<'a> BodyPartRef<'a> {
    pub fn body_part(&self) -> &'a BodyPart {
        self.body_part
    }

    pub fn iter_models(&self) -> Result<impl Iterator<Item = ModelRef<'a>> + 'a> {
        let count = count(
            self.body_part.model_count,
            "body part model count is negative",
        )?;

        let models: &[Model] = if count == 0 {
            &[]
        } else {
            let mut cursor = Cursor::new(self.bytes);
            cursor.seek(offset(
                self.body_part.model_offset,
                "body part model offset is negative",
            )?);
            cursor.read_records(count)?
        };
        let bytes = self.bytes;

        Ok(models.iter().map(move |model| ModelRef { model, bytes }))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ModelRef<'a> {
    model: &'a Model,
    bytes: &'a [u8],
}

impl<'a> ModelRef<'a> {
    pub fn model(&self) -> &'a Model {
        self.model
    }

    fn read_vectors(&self, offset_field: I32, count_field: I32) -> Result<Vec<Vec3>> {
        let count = count(count_field, "model vector count is negative")?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut cursor = Cursor::new(self.bytes);
        cursor.seek(offset(offset_field, "model vector offset is negative")?);
        (0..count).map(|_| cursor.read_vec3()).collect()
    }

    fn read_bone_indices(&self, offset_field: I32, count_field: I32) -> Result<&'a [u8]> {
        let count = count(count_field, "model bone index count is negative")?;
        if count == 0 {
            return Ok(&[]);
        }

        let mut cursor = Cursor::new(self.bytes);
        cursor.seek(offset(offset_field, "model bone index offset is negative")?);
        cursor.read_bytes(count)
    }

    pub fn vertices(&self) -> Result<Vec<Vec3>> {
        self.read_vectors(self.model.vertex_offset, self.model.vertex_count)
    }

    pub fn vertex_bones(&self) -> Result<&'a [u8]> {
        self.read_bone_indices(self.model.vertex_info_offset, self.model.vertex_count)
    }

    pub fn normals(&self) -> Result<Vec<Vec3>> {
        self.read_vectors(self.model.normal_offset, self.model.normal_count)
    }

    pub fn normal_bones(&self) -> Result<&'a [u8]> {
        self.read_bone_indices(self.model.normal_info_offset, self.model.normal_count)
    }

    pub fn meshes(&self) -> Result<&'a [Mesh]> {
        let count = count(self.model.mesh_count, "model mesh count is negative")?;
        if count == 0 {
            return Ok(&[]);
        }

        let mut cursor = Cursor::new(self.bytes);
        cursor.seek(offset(
            self.model.mesh_offset,
            "model mesh offset is negative",
        )?);
        cursor.read_records(count)
    }

    /// Cursor positioned at the start of a mesh's triangle command stream.
    pub fn triangle_commands(&self, mesh: &Mesh) -> Result<Cursor<'a>> {
        let mut cursor = Cursor::new(self.bytes);
        cursor.seek(offset(
            mesh.triangle_offset,
            "mesh triangle offset is negative",
        )?);
        Ok(cursor)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TextureRef<'a> {
    texture: &'a Texture,
    bytes: &'a [u8],
}

impl<'a> TextureRef<'a> {
    pub fn texture(&self) -> &'a Texture {
        self.texture
    }

    pub fn width(&self) -> Result<u32> {
        self.texture
            .width
            .get()
            .try_into()
            .map_err(|_| Error::Corrupted {
                error: "texture width is negative",
            })
    }

    pub fn height(&self) -> Result<u32> {
        self.texture
            .height
            .get()
            .try_into()
            .map_err(|_| Error::Corrupted {
                error: "texture height is negative",
            })
    }

    /// Palette indices (`width * height` bytes) followed by the 256 entry RGB palette.
    pub fn pixels_and_palette(&self) -> Result<(&'a [u8], &'a [u8])> {
        let pixel_count = (self.width()? as usize)
            .checked_mul(self.height()? as usize)
            .ok_or(Error::Corrupted {
                error: "texture dimensions too large",
            })?;

        let mut cursor = Cursor::new(self.bytes);
        cursor.seek(offset(
            self.texture.data_offset,
            "texture data offset is negative",
        )?);

        let pixels = cursor.read_bytes(pixel_count)?;
        let palette = cursor.read_bytes(crate::texture::PALETTE_SIZE * 3)?;
        Ok((pixels, palette))
    }
}

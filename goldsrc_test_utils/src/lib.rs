//! Lays out synthetic studio model files for tests.
//!
//! Every table is written at an absolute offset after the 244 byte header, the
//! same way compiled models are, so the decoder sees real offset tables.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

pub const HEADER_SIZE: usize = 244;

#[derive(Debug, Clone)]
pub struct BoneSpec {
    pub name: String,
    pub parent: i32,
    pub flags: i32,
    pub controllers: [i32; 6],
    pub value: [f32; 6],
    pub scale: [f32; 6],
}

impl BoneSpec {
    pub fn new(name: &str, parent: i32) -> Self {
        Self {
            name: name.to_owned(),
            parent,
            flags: 0,
            controllers: [-1; 6],
            value: [0.0; 6],
            scale: [1.0; 6],
        }
    }

    pub fn position(mut self, position: [f32; 3]) -> Self {
        self.value[..3].copy_from_slice(&position);
        self
    }

    pub fn rotation(mut self, rotation: [f32; 3]) -> Self {
        self.value[3..].copy_from_slice(&rotation);
        self
    }

    pub fn scale(mut self, scale: [f32; 6]) -> Self {
        self.scale = scale;
        self
    }

    pub fn controller(mut self, axis: usize, slot: i32) -> Self {
        self.controllers[axis] = slot;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControllerSpec {
    pub bone: i32,
    pub kind: i32,
    pub start: f32,
    pub end: f32,
    pub rest: i32,
    pub slot: i32,
}

#[derive(Debug, Clone, Default)]
pub struct HitboxSpec {
    pub bone: i32,
    pub group: i32,
    pub min: [f32; 3],
    pub max: [f32; 3],
}

#[derive(Debug, Clone, Default)]
pub struct EventSpec {
    pub frame: i32,
    pub event: i32,
    pub kind: i32,
    pub options: String,
}

/// One compressed animation curve.
#[derive(Debug, Clone)]
pub enum Curve {
    /// Every value stored explicitly.
    Values(Vec<i16>),
    /// Pre-encoded run-length stream, written verbatim.
    Raw(Vec<u8>),
}

impl Curve {
    fn encode(&self) -> Vec<u8> {
        match self {
            Self::Raw(bytes) => bytes.clone(),
            Self::Values(values) => {
                let mut bytes = Vec::new();
                for chunk in values.chunks(255) {
                    let len = u8::try_from(chunk.len()).unwrap();
                    bytes.push(len);
                    bytes.push(len);
                    for &value in chunk {
                        bytes.write_i16::<LittleEndian>(value).unwrap();
                    }
                }
                bytes.extend_from_slice(&[0, 0]);
                bytes
            }
        }
    }
}

/// Curves for one bone in one blend, indexed by axis.
pub type BoneCurves = [Option<Curve>; 6];

#[derive(Debug, Clone, Default)]
pub struct SequenceSpec {
    pub label: String,
    pub fps: f32,
    pub flags: i32,
    pub activity: i32,
    pub activity_weight: i32,
    pub frame_count: i32,
    pub events: Vec<EventSpec>,
    pub motion_type: i32,
    pub motion_bone: i32,
    pub linear_movement: [f32; 3],
    pub bb_min: [f32; 3],
    pub bb_max: [f32; 3],
    /// One entry per blend, each holding one curve set per bone.
    pub blends: Vec<Vec<BoneCurves>>,
    pub blend_type: [i32; 2],
    pub blend_start: [f32; 2],
    pub blend_end: [f32; 2],
    pub sequence_group: i32,
    pub entry_node: i32,
    pub exit_node: i32,
    pub node_flags: i32,
}

impl SequenceSpec {
    pub fn new(label: &str, frame_count: i32) -> Self {
        Self {
            label: label.to_owned(),
            fps: 30.0,
            frame_count,
            ..Self::default()
        }
    }

    pub fn blend(mut self, curves: Vec<BoneCurves>) -> Self {
        self.blends.push(curves);
        self
    }

    pub fn event(mut self, event: EventSpec) -> Self {
        self.events.push(event);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttachmentSpec {
    pub name: String,
    pub kind: i32,
    pub bone: i32,
    pub origin: [f32; 3],
    pub vectors: [[f32; 3]; 3],
}

#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub fan: bool,
    /// `(vertex, normal, s, t)` per corner.
    pub vertices: Vec<[i16; 4]>,
}

#[derive(Debug, Clone, Default)]
pub struct MeshSpec {
    pub skin_reference: i32,
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSpec {
    pub name: String,
    pub kind: i32,
    pub bounding_radius: f32,
    pub vertices: Vec<[f32; 3]>,
    pub vertex_bones: Vec<u8>,
    pub normals: Vec<[f32; 3]>,
    pub normal_bones: Vec<u8>,
    pub meshes: Vec<MeshSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct BodyPartSpec {
    pub name: String,
    pub base: i32,
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct TextureSpec {
    pub name: String,
    pub flags: i32,
    pub width: i32,
    pub height: i32,
    pub pixels: Vec<u8>,
    /// Padded with black up to 256 entries.
    pub palette: Vec<[u8; 3]>,
}

#[derive(Debug, Clone)]
pub struct MdlBuilder {
    pub signature: [u8; 4],
    pub version: i32,
    pub name: String,
    pub flags: i32,
    pub eye_position: [f32; 3],
    pub hull_min: [f32; 3],
    pub hull_max: [f32; 3],
    pub view_min: [f32; 3],
    pub view_max: [f32; 3],
    pub bones: Vec<BoneSpec>,
    pub controllers: Vec<ControllerSpec>,
    pub hitboxes: Vec<HitboxSpec>,
    pub sequences: Vec<SequenceSpec>,
    /// `(label, name)` pairs.
    pub sequence_groups: Vec<(String, String)>,
    pub attachments: Vec<AttachmentSpec>,
    pub body_parts: Vec<BodyPartSpec>,
    pub textures: Vec<TextureSpec>,
    /// All families must have the same length.
    pub skin_families: Vec<Vec<i16>>,
    pub transition_count: i32,
    pub transitions: Vec<u8>,
    /// Cuts the finished file down to this many bytes.
    pub truncate: Option<usize>,
}

impl MdlBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            signature: *b"IDST",
            version: 10,
            name: name.to_owned(),
            flags: 0,
            eye_position: [0.0; 3],
            hull_min: [0.0; 3],
            hull_max: [0.0; 3],
            view_min: [0.0; 3],
            view_max: [0.0; 3],
            bones: Vec::new(),
            controllers: Vec::new(),
            hitboxes: Vec::new(),
            sequences: Vec::new(),
            sequence_groups: Vec::new(),
            attachments: Vec::new(),
            body_parts: Vec::new(),
            textures: Vec::new(),
            skin_families: Vec::new(),
            transition_count: 0,
            transitions: Vec::new(),
            truncate: None,
        }
    }

    pub fn bone(mut self, bone: BoneSpec) -> Self {
        self.bones.push(bone);
        self
    }

    pub fn controller(mut self, controller: ControllerSpec) -> Self {
        self.controllers.push(controller);
        self
    }

    pub fn hitbox(mut self, hitbox: HitboxSpec) -> Self {
        self.hitboxes.push(hitbox);
        self
    }

    pub fn sequence(mut self, sequence: SequenceSpec) -> Self {
        self.sequences.push(sequence);
        self
    }

    pub fn sequence_group(mut self, label: &str, name: &str) -> Self {
        self.sequence_groups
            .push((label.to_owned(), name.to_owned()));
        self
    }

    pub fn attachment(mut self, attachment: AttachmentSpec) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn body_part(mut self, body_part: BodyPartSpec) -> Self {
        self.body_parts.push(body_part);
        self
    }

    pub fn texture(mut self, texture: TextureSpec) -> Self {
        self.textures.push(texture);
        self
    }

    pub fn skin_family(mut self, family: Vec<i16>) -> Self {
        self.skin_families.push(family);
        self
    }

    pub fn transitions(mut self, count: i32, transitions: Vec<u8>) -> Self {
        self.transition_count = count;
        self.transitions = transitions;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Writer {
            bytes: vec![0; HEADER_SIZE],
        };

        let bone_offset = out.position();
        for bone in &self.bones {
            out.string(&bone.name, 32);
            out.i32(bone.parent);
            out.i32(bone.flags);
            bone.controllers.iter().for_each(|&c| out.i32(c));
            bone.value.iter().for_each(|&v| out.f32(v));
            bone.scale.iter().for_each(|&v| out.f32(v));
        }

        let controller_offset = out.position();
        for controller in &self.controllers {
            out.i32(controller.bone);
            out.i32(controller.kind);
            out.f32(controller.start);
            out.f32(controller.end);
            out.i32(controller.rest);
            out.i32(controller.slot);
        }

        let hitbox_offset = out.position();
        for hitbox in &self.hitboxes {
            out.i32(hitbox.bone);
            out.i32(hitbox.group);
            out.vec3(hitbox.min);
            out.vec3(hitbox.max);
        }

        let sequence_group_offset = out.position();
        for (label, name) in &self.sequence_groups {
            out.string(label, 32);
            out.string(name, 64);
            out.i32(0);
            out.i32(0);
        }

        let sequence_blocks = self
            .sequences
            .iter()
            .map(|sequence| {
                let event_offset = out.position();
                for event in &sequence.events {
                    out.i32(event.frame);
                    out.i32(event.event);
                    out.i32(event.kind);
                    out.string(&event.options, 64);
                }

                let anim_offset = out.position();
                out.animation(&sequence.blends, self.bones.len());

                (event_offset, anim_offset)
            })
            .collect::<Vec<_>>();

        let sequence_offset = out.position();
        for (sequence, (event_offset, anim_offset)) in self.sequences.iter().zip(sequence_blocks) {
            out.string(&sequence.label, 32);
            out.f32(sequence.fps);
            out.i32(sequence.flags);
            out.i32(sequence.activity);
            out.i32(sequence.activity_weight);
            out.count(sequence.events.len());
            out.offset(event_offset);
            out.i32(sequence.frame_count);
            out.i32(0);
            out.i32(0);
            out.i32(sequence.motion_type);
            out.i32(sequence.motion_bone);
            out.vec3(sequence.linear_movement);
            out.i32(0);
            out.i32(0);
            out.vec3(sequence.bb_min);
            out.vec3(sequence.bb_max);
            out.count(sequence.blends.len());
            out.offset(anim_offset);
            sequence.blend_type.iter().for_each(|&v| out.i32(v));
            sequence.blend_start.iter().for_each(|&v| out.f32(v));
            sequence.blend_end.iter().for_each(|&v| out.f32(v));
            out.i32(0);
            out.i32(sequence.sequence_group);
            out.i32(sequence.entry_node);
            out.i32(sequence.exit_node);
            out.i32(sequence.node_flags);
            out.i32(0);
        }

        let attachment_offset = out.position();
        for attachment in &self.attachments {
            out.string(&attachment.name, 32);
            out.i32(attachment.kind);
            out.i32(attachment.bone);
            out.vec3(attachment.origin);
            attachment.vectors.iter().for_each(|&v| out.vec3(v));
        }

        let model_tables = self
            .body_parts
            .iter()
            .map(|body_part| out.models(&body_part.models))
            .collect::<Vec<_>>();

        let body_part_offset = out.position();
        for (body_part, model_offset) in self.body_parts.iter().zip(model_tables) {
            out.string(&body_part.name, 64);
            out.count(body_part.models.len());
            out.i32(body_part.base);
            out.offset(model_offset);
        }

        let texture_data_offset = out.position();
        let texture_data = self
            .textures
            .iter()
            .map(|texture| {
                let offset = out.position();
                out.bytes.extend_from_slice(&texture.pixels);
                for i in 0..256 {
                    let color = texture.palette.get(i).copied().unwrap_or_default();
                    out.bytes.extend_from_slice(&color);
                }
                offset
            })
            .collect::<Vec<_>>();

        let texture_offset = out.position();
        for (texture, data_offset) in self.textures.iter().zip(texture_data) {
            out.string(&texture.name, 64);
            out.i32(texture.flags);
            out.i32(texture.width);
            out.i32(texture.height);
            out.offset(data_offset);
        }

        let skin_offset = out.position();
        for &texture in self.skin_families.iter().flatten() {
            out.bytes.write_i16::<LittleEndian>(texture).unwrap();
        }

        let transition_offset = out.position();
        out.bytes.extend_from_slice(&self.transitions);

        let length = out.position();

        let mut header = Writer {
            bytes: Vec::with_capacity(HEADER_SIZE),
        };
        header.bytes.extend_from_slice(&self.signature);
        header.i32(self.version);
        header.string(&self.name, 64);
        header.offset(length);
        header.vec3(self.eye_position);
        header.vec3(self.hull_min);
        header.vec3(self.hull_max);
        header.vec3(self.view_min);
        header.vec3(self.view_max);
        header.i32(self.flags);
        header.count(self.bones.len());
        header.offset(bone_offset);
        header.count(self.controllers.len());
        header.offset(controller_offset);
        header.count(self.hitboxes.len());
        header.offset(hitbox_offset);
        header.count(self.sequences.len());
        header.offset(sequence_offset);
        header.count(self.sequence_groups.len());
        header.offset(sequence_group_offset);
        header.count(self.textures.len());
        header.offset(texture_offset);
        header.offset(texture_data_offset);
        header.count(self.skin_families.first().map_or(0, Vec::len));
        header.count(self.skin_families.len());
        header.offset(skin_offset);
        header.count(self.body_parts.len());
        header.offset(body_part_offset);
        header.count(self.attachments.len());
        header.offset(attachment_offset);
        for _ in 0..4 {
            header.i32(0);
        }
        header.i32(self.transition_count);
        header.offset(transition_offset);
        assert_eq!(header.bytes.len(), HEADER_SIZE);

        let mut bytes = out.bytes;
        bytes[..HEADER_SIZE].copy_from_slice(&header.bytes);

        if let Some(len) = self.truncate {
            bytes.truncate(len);
        }

        bytes
    }
}

struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn position(&self) -> usize {
        self.bytes.len()
    }

    fn i32(&mut self, value: i32) {
        self.bytes.write_i32::<LittleEndian>(value).unwrap();
    }

    fn f32(&mut self, value: f32) {
        self.bytes.write_f32::<LittleEndian>(value).unwrap();
    }

    fn count(&mut self, count: usize) {
        self.i32(i32::try_from(count).unwrap());
    }

    fn offset(&mut self, offset: usize) {
        self.i32(i32::try_from(offset).unwrap());
    }

    fn vec3(&mut self, vector: [f32; 3]) {
        vector.iter().for_each(|&v| self.f32(v));
    }

    fn string(&mut self, value: &str, len: usize) {
        let mut field = vec![0; len];
        let bytes = value.as_bytes();
        let copied = bytes.len().min(len - 1);
        field[..copied].copy_from_slice(&bytes[..copied]);
        self.bytes.extend_from_slice(&field);
    }

    /// Writes the per-bone curve offset records for every blend, then the
    /// curve streams they point at.
    fn animation(&mut self, blends: &[Vec<BoneCurves>], bone_count: usize) {
        let table_offset = self.position();
        let record_size = 12;
        self.bytes
            .resize(table_offset + blends.len() * bone_count * record_size, 0);

        for (blend_index, blend) in blends.iter().enumerate() {
            for (bone_index, curves) in blend.iter().enumerate().take(bone_count) {
                let record_offset =
                    table_offset + (blend_index * bone_count + bone_index) * record_size;

                for (axis, curve) in curves.iter().enumerate() {
                    let Some(curve) = curve else {
                        continue;
                    };

                    let relative = u16::try_from(self.position() - record_offset)
                        .expect("curve too far from its bone record");
                    let slot = record_offset + axis * 2;
                    LittleEndian::write_u16(&mut self.bytes[slot..slot + 2], relative);

                    self.bytes.extend_from_slice(&curve.encode());
                }
            }
        }
    }

    /// Writes vertex data, meshes and the model table, returning the table offset.
    fn models(&mut self, models: &[ModelSpec]) -> usize {
        struct Offsets {
            vertex: usize,
            vertex_info: usize,
            normal: usize,
            normal_info: usize,
            mesh: usize,
        }

        let offsets = models
            .iter()
            .map(|model| {
                let vertex = self.position();
                model.vertices.iter().for_each(|&v| self.vec3(v));
                let vertex_info = self.position();
                self.bytes.extend_from_slice(&model.vertex_bones);
                let normal = self.position();
                model.normals.iter().for_each(|&v| self.vec3(v));
                let normal_info = self.position();
                self.bytes.extend_from_slice(&model.normal_bones);

                let triangle_offsets = model
                    .meshes
                    .iter()
                    .map(|mesh| {
                        let offset = self.position();
                        for command in &mesh.commands {
                            let len = i16::try_from(command.vertices.len()).unwrap();
                            let len = if command.fan { -len } else { len };
                            self.bytes.write_i16::<LittleEndian>(len).unwrap();
                            for &field in command.vertices.iter().flatten() {
                                self.bytes.write_i16::<LittleEndian>(field).unwrap();
                            }
                        }
                        self.bytes.write_i16::<LittleEndian>(0).unwrap();
                        offset
                    })
                    .collect::<Vec<_>>();

                let mesh = self.position();
                for (spec, triangle_offset) in model.meshes.iter().zip(triangle_offsets) {
                    let triangles: usize = spec
                        .commands
                        .iter()
                        .map(|c| c.vertices.len().saturating_sub(2))
                        .sum();
                    self.count(triangles);
                    self.offset(triangle_offset);
                    self.i32(spec.skin_reference);
                    self.i32(0);
                    self.i32(0);
                }

                Offsets {
                    vertex,
                    vertex_info,
                    normal,
                    normal_info,
                    mesh,
                }
            })
            .collect::<Vec<_>>();

        let table_offset = self.position();
        for (model, offsets) in models.iter().zip(offsets) {
            self.string(&model.name, 64);
            self.i32(model.kind);
            self.f32(model.bounding_radius);
            self.count(model.meshes.len());
            self.offset(offsets.mesh);
            self.count(model.vertices.len());
            self.offset(offsets.vertex_info);
            self.offset(offsets.vertex);
            self.count(model.normals.len());
            self.offset(offsets.normal_info);
            self.offset(offsets.normal);
            self.i32(0);
            self.i32(0);
        }

        table_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_model_is_just_a_header() {
        let bytes = MdlBuilder::new("empty").build();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..4], b"IDST");
        assert_eq!(LittleEndian::read_i32(&bytes[4..8]), 10);
        assert_eq!(LittleEndian::read_i32(&bytes[72..76]), HEADER_SIZE as i32);
    }

    #[test]
    fn value_curve_encodes_explicit_run() {
        assert_eq!(
            Curve::Values(vec![1, -1]).encode(),
            [2, 2, 1, 0, 0xff, 0xff, 0, 0]
        );
    }
}

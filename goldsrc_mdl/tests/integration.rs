use std::f32::consts::FRAC_PI_2;

use approx::assert_relative_eq;
use glam::{Mat4, Quat, Vec3};
use itertools::Itertools;

use goldsrc_mdl::{
    advance_frame, BoneAxis, ControllerSlot, Error, HitGroup, Model, MotionType, PoseRequest,
    SequenceFlags, TextureFlags, TriangleKind,
};
use goldsrc_test_utils::{
    AttachmentSpec, BodyPartSpec, BoneSpec, CommandSpec, ControllerSpec, Curve, EventSpec,
    HitboxSpec, MdlBuilder, MeshSpec, ModelSpec, SequenceSpec, TextureSpec,
};

fn sub_model(name: &str) -> ModelSpec {
    ModelSpec {
        name: name.to_owned(),
        vertices: vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ],
        vertex_bones: vec![0, 0, 1, 1],
        normals: vec![[0.0, 0.0, 1.0]],
        normal_bones: vec![0],
        meshes: vec![MeshSpec {
            skin_reference: 1,
            commands: vec![
                CommandSpec {
                    fan: false,
                    vertices: vec![[0, 0, 0, 0], [1, 0, 16, 0], [3, 0, 0, 16], [2, 0, 16, 16]],
                },
                CommandSpec {
                    fan: true,
                    vertices: vec![[0, 0, 0, 0], [1, 0, 1, 0], [2, 0, 1, 1]],
                },
            ],
        }],
        ..ModelSpec::default()
    }
}

fn texture(name: &str, flags: i32) -> TextureSpec {
    TextureSpec {
        name: name.to_owned(),
        flags,
        width: 2,
        height: 2,
        pixels: vec![0, 1, 255, 1],
        palette: (0..=255).map(|i| [i, i, i]).collect(),
    }
}

/// A two bone character with one looping walk cycle blended across two tracks.
fn scientist() -> MdlBuilder {
    let mut builder = MdlBuilder::new("scientist.mdl")
        .bone(BoneSpec::new("Bip01", -1).position([1.0, 0.0, 0.0]))
        .bone(
            BoneSpec::new("Bip01 Head", 0)
                .position([0.0, 1.0, 0.0])
                .controller(BoneAxis::X.index(), 4)
                .controller(BoneAxis::ZR.index(), 0),
        )
        .controller(ControllerSpec {
            bone: 1,
            kind: MotionType::ZR.bits(),
            start: -90.0,
            end: 90.0,
            rest: 0,
            slot: 0,
        })
        .controller(ControllerSpec {
            bone: 1,
            kind: MotionType::X.bits(),
            start: 0.0,
            end: 1.0,
            rest: 0,
            slot: 4,
        })
        .hitbox(HitboxSpec {
            bone: 1,
            group: 1,
            min: [-4.0, -4.0, -4.0],
            max: [4.0, 4.0, 4.0],
        })
        .hitbox(HitboxSpec {
            bone: 0,
            group: 10,
            ..HitboxSpec::default()
        })
        .sequence(
            SequenceSpec {
                flags: SequenceFlags::LOOPING.bits(),
                fps: 10.0,
                bb_min: [-16.0, -16.0, 0.0],
                bb_max: [16.0, 16.0, 72.0],
                ..SequenceSpec::new("walk", 3)
            }
            .event(EventSpec {
                frame: 1,
                event: 2001,
                kind: 0,
                options: "step".to_owned(),
            })
            .blend(vec![
                [
                    Some(Curve::Values(vec![0, 10, 20])),
                    None,
                    None,
                    None,
                    None,
                    None,
                ],
                Default::default(),
            ])
            .blend(vec![
                [
                    Some(Curve::Raw(vec![1, 3, 100, 0])),
                    None,
                    None,
                    None,
                    None,
                    None,
                ],
                Default::default(),
            ]),
        )
        .sequence(SequenceSpec::new("idle", 1).blend(vec![Default::default(); 2]))
        .sequence_group("default", "")
        .attachment(AttachmentSpec {
            name: "mouth".to_owned(),
            bone: 1,
            origin: [0.0, 0.0, 2.0],
            ..AttachmentSpec::default()
        })
        .body_part(BodyPartSpec {
            name: "body".to_owned(),
            base: 1,
            models: vec![sub_model("body_ref")],
        })
        .body_part(BodyPartSpec {
            name: "heads".to_owned(),
            base: 1,
            models: vec![sub_model("einstein"), sub_model("luther"), sub_model("slick")],
        })
        .texture(texture("body.bmp", 0))
        .texture(texture("glasses.bmp", TextureFlags::MASKED.bits()))
        .skin_family(vec![0, 1])
        .skin_family(vec![0, 0])
        .transitions(2, vec![0, 1, 2, 0]);

    builder.eye_position = [0.0, 0.0, 64.0];
    builder.hull_min = [-16.0, -16.0, 0.0];
    builder.hull_max = [16.0, 16.0, 72.0];
    builder.view_min = [-20.0, -20.0, 0.0];
    builder.view_max = [20.0, 20.0, 80.0];
    builder
}

#[test]
fn decoded_counts_and_bounds_match_header() {
    let model = Model::from_bytes(&scientist().build()).unwrap();

    assert_eq!(model.name, "scientist.mdl");
    assert_eq!(model.bones.len(), 2);
    assert_eq!(model.bone_controllers.len(), 2);
    assert_eq!(model.hitboxes.len(), 2);
    assert_eq!(model.sequences.len(), 2);
    assert_eq!(model.sequence_groups.len(), 1);
    assert_eq!(model.attachments.len(), 1);
    assert_eq!(model.body_parts.len(), 2);
    assert_eq!(model.textures.len(), 2);
    assert_eq!(model.skin_families.len(), 2);

    assert_eq!(model.eye_position, Vec3::new(0.0, 0.0, 64.0));
    assert_eq!(model.hull_min, Vec3::new(-16.0, -16.0, 0.0));
    assert_eq!(model.hull_max, Vec3::new(16.0, 16.0, 72.0));
    assert_eq!(model.view_min, Vec3::new(-20.0, -20.0, 0.0));
    assert_eq!(model.view_max, Vec3::new(20.0, 20.0, 80.0));

    let walk = &model.sequences[0];
    assert_eq!(walk.label, "walk");
    assert_eq!(walk.frame_count, 3);
    assert!(walk.is_looping());
    assert_relative_eq!(walk.duration(), 0.2);
    assert_eq!(walk.bounds_max, Vec3::new(16.0, 16.0, 72.0));
    assert_eq!(walk.events.len(), 1);
    assert_eq!(walk.events[0].options, "step");
}

#[test]
fn decodes_bones_and_controllers() {
    let model = Model::from_bytes(&scientist().build()).unwrap();

    let head = model.bone(1).unwrap();
    assert_eq!(head.name, "Bip01 Head");
    assert_eq!(head.parent, Some(0));
    assert_eq!(head.controller(BoneAxis::ZR), Some(0));
    assert_eq!(head.controller(BoneAxis::X), Some(4));
    assert_eq!(head.controller(BoneAxis::Y), None);
    assert!(model.bone(2).is_none());

    let mouth = &model.bone_controllers[1];
    assert_eq!(mouth.slot, Some(ControllerSlot::Mouth));
    assert_eq!(mouth.motion, MotionType::X);

    assert_eq!(model.hitboxes[0].group, HitGroup::Head);
    assert_eq!(model.hitboxes[1].group, HitGroup::Other(10));
}

#[test]
fn decodes_curves_per_blend() {
    let model = Model::from_bytes(&scientist().build()).unwrap();
    let walk = &model.sequences[0];

    assert_eq!(walk.blends.len(), 2);
    assert_eq!(walk.blends[0].curve(0, BoneAxis::X), Some(&[0, 10, 20][..]));
    assert_eq!(walk.blends[1].curve(0, BoneAxis::X), Some(&[100, 100, 100][..]));
    assert_eq!(walk.blends[0].curve(0, BoneAxis::Y), None);
    assert_eq!(walk.blends[1].curve(1, BoneAxis::X), None);
}

#[test]
fn decodes_geometry_and_triangulates() {
    let model = Model::from_bytes(&scientist().build()).unwrap();

    let heads = &model.body_parts[1];
    assert_eq!(heads.active_model_index(5), 2);
    assert_eq!(heads.active_model(5).unwrap().name, "slick");

    let body = heads.active_model(0).unwrap();
    assert_eq!(body.vertices.len(), 4);
    assert_eq!(body.vertex_bone(2), Some(1));

    let mesh = &body.meshes[0];
    assert_eq!(mesh.skin_reference, Some(1));
    assert_eq!(mesh.commands[0].kind, TriangleKind::Strip);
    assert_eq!(mesh.commands[1].kind, TriangleKind::Fan);

    let triangles = mesh
        .triangles()
        .map(|triangle| triangle.map(|corner| corner.vertex_index))
        .collect_vec();
    assert_eq!(triangles, [[0, 1, 3], [3, 1, 2], [0, 1, 2]]);
}

#[test]
fn decodes_textures_and_resolves_skins() {
    let model = Model::from_bytes(&scientist().build()).unwrap();

    let glasses = &model.textures[1];
    assert!(glasses.is_masked());
    assert_eq!((glasses.width, glasses.height), (2, 2));
    assert_eq!(glasses.rgba.get_pixel(0, 1).0, [255, 255, 255, 0]);
    assert_eq!(glasses.rgba.get_pixel(1, 0).0, [1, 1, 1, 255]);
    assert_eq!(model.textures[0].rgba.get_pixel(0, 1).0, [255, 255, 255, 255]);
    assert_eq!(glasses.palette_color(7).map(|c| c.r), Some(7));

    assert_eq!(model.skin_texture(0, 1).unwrap().name, "glasses.bmp");
    assert_eq!(model.skin_texture(1, 1).unwrap().name, "body.bmp");
    // unknown family falls back to the skin reference itself
    assert_eq!(model.skin_texture(9, 1).unwrap().name, "glasses.bmp");
    assert!(model.skin_texture(9, 5).is_none());

    assert_eq!(model.transition(1, 0), Some(2));
    assert_eq!(model.transition(2, 0), None);
}

#[test]
fn evaluates_full_pose() {
    let model = Model::from_bytes(&scientist().build()).unwrap();

    let mut request = PoseRequest::new(0);
    request.frame = 1.5;
    request.controllers.user[0] = 255.0;
    request.controllers.mouth = 64.0;
    let transforms = model.evaluate_pose(&request).unwrap();

    assert_eq!(transforms.len(), 2);

    // root follows blend 0 only: 1 + 15
    assert_relative_eq!(
        transforms[0].transform_point3(Vec3::ZERO),
        Vec3::new(16.0, 0.0, 0.0),
        epsilon = 1e-4
    );

    // head: mouth controller moves it 1 unit on x, user controller 0 turns it 90 degrees
    assert_relative_eq!(
        transforms[1].transform_point3(Vec3::ZERO),
        Vec3::new(17.0, 1.0, 0.0),
        epsilon = 1e-4
    );
    assert_relative_eq!(
        transforms[1].transform_vector3(Vec3::X),
        Quat::from_rotation_z(FRAC_PI_2) * Vec3::X,
        epsilon = 1e-4
    );

    let mouth = model.attachments[0].world_origin(&transforms).unwrap();
    assert_relative_eq!(mouth, Vec3::new(17.0, 1.0, 2.0), epsilon = 1e-4);

    let corners = model.hitboxes[0].world_corners(&transforms).unwrap();
    assert_relative_eq!(corners[0].z, -4.0, epsilon = 1e-4);
}

#[test]
fn blend_weight_mixes_tracks() {
    let model = Model::from_bytes(&scientist().build()).unwrap();

    let mut request = PoseRequest::new(0);
    request.blend = [255, 0];
    let transforms = model.evaluate_pose(&request).unwrap();
    assert_relative_eq!(transforms[0].w_axis.x, 101.0, epsilon = 1e-4);

    request.blend = [102, 0];
    let transforms = model.evaluate_pose(&request).unwrap();
    assert_relative_eq!(transforms[0].w_axis.x, 41.0, epsilon = 1e-3);
}

#[test]
fn advancing_frames_follows_sequence_rate() {
    let model = Model::from_bytes(&scientist().build()).unwrap();
    let walk = &model.sequences[0];

    let advance = advance_frame(walk, 2.5, 0.1, 1.0, None);
    assert_relative_eq!(advance.frame, 0.5, epsilon = 1e-5);
    assert!(!advance.ended);

    let idle = &model.sequences[1];
    assert!(advance_frame(idle, 0.0, 1.0, 1.0, None).ended);
}

#[test]
fn external_sequence_group_uses_rest_pose() {
    let mut builder = scientist();
    builder.sequences[0].sequence_group = 1;
    let model = Model::from_bytes(&builder.build()).unwrap();

    let walk = &model.sequences[0];
    assert_eq!(walk.blends.len(), 2);
    assert_eq!(walk.blends[0].curve(0, BoneAxis::X), None);

    let mut request = PoseRequest::new(0);
    request.frame = 2.0;
    let transforms = model.evaluate_pose(&request).unwrap();
    assert_relative_eq!(transforms[0].w_axis.x, 1.0);
}

#[test]
fn rejects_child_before_parent() {
    let bytes = MdlBuilder::new("broken")
        .bone(BoneSpec::new("child", 1))
        .bone(BoneSpec::new("root", -1))
        .build();

    assert_eq!(
        Model::from_bytes(&bytes).unwrap_err(),
        Error::Corrupted {
            error: "bone parent does not precede bone"
        }
    );
}

#[test]
fn truncated_file_fails_atomically() {
    let mut builder = scientist();
    let full_length = builder.build().len();
    builder.truncate = Some(full_length - 10);

    assert!(Model::from_bytes(&builder.build())
        .unwrap_err()
        .is_truncated());
}

const SEQUENCE_FRAME_COUNT: usize = 56;
const SEQUENCE_BLEND_COUNT: usize = 120;
const SEQUENCE_ANIM_OFFSET: usize = 124;

/// Overwrites an `i32` field of the first sequence record.
fn patch_first_sequence(bytes: &mut [u8], field: usize, value: i32) {
    let table = u32::from_le_bytes(bytes[168..172].try_into().unwrap()) as usize;
    bytes[table + field..table + field + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn huge_blend_count_is_corrupted() {
    let mut builder = scientist();
    builder.sequences[0].sequence_group = 1;
    let mut bytes = builder.build();
    patch_first_sequence(&mut bytes, SEQUENCE_BLEND_COUNT, i32::MAX);

    assert_eq!(
        Model::from_bytes(&bytes).unwrap_err(),
        Error::Corrupted {
            error: "sequence blend count is negative or too large"
        }
    );
}

#[test]
fn huge_blend_count_without_bones_is_corrupted() {
    let mut bytes = MdlBuilder::new("boneless")
        .sequence(SequenceSpec::new("idle", 1).blend(Vec::new()))
        .build();
    patch_first_sequence(&mut bytes, SEQUENCE_BLEND_COUNT, i32::MAX);

    assert!(matches!(
        Model::from_bytes(&bytes).unwrap_err(),
        Error::Corrupted { .. }
    ));
}

#[test]
fn huge_frame_count_is_corrupted() {
    let mut bytes = MdlBuilder::new("long")
        .bone(BoneSpec::new("root", -1))
        .sequence(SequenceSpec::new("idle", 1).blend(vec![[
            Some(Curve::Values(vec![1])),
            None,
            None,
            None,
            None,
            None,
        ]]))
        .build();
    patch_first_sequence(&mut bytes, SEQUENCE_FRAME_COUNT, i32::MAX);

    assert_eq!(
        Model::from_bytes(&bytes).unwrap_err(),
        Error::Corrupted {
            error: "sequence frame count is negative or too large"
        }
    );
}

#[test]
fn animation_table_past_end_is_truncated() {
    let mut bytes = scientist().build();
    let near_end = i32::try_from(bytes.len() - 4).unwrap();
    patch_first_sequence(&mut bytes, SEQUENCE_ANIM_OFFSET, near_end);

    assert!(Model::from_bytes(&bytes).unwrap_err().is_truncated());
}

#[test]
fn negative_references_are_tolerated() {
    let mut mesh_model = sub_model("body");
    mesh_model.meshes[0].skin_reference = -1;

    let bytes = MdlBuilder::new("loose")
        .bone(BoneSpec::new("root", -1))
        .controller(ControllerSpec {
            bone: -1,
            kind: MotionType::X.bits(),
            end: 1.0,
            ..ControllerSpec::default()
        })
        .hitbox(HitboxSpec {
            bone: -1,
            ..HitboxSpec::default()
        })
        .attachment(AttachmentSpec {
            name: "loose".to_owned(),
            bone: -1,
            ..AttachmentSpec::default()
        })
        .body_part(BodyPartSpec {
            name: "body".to_owned(),
            base: 1,
            models: vec![mesh_model],
        })
        .build();

    let model = Model::from_bytes(&bytes).unwrap();
    let transforms = [Mat4::IDENTITY];

    assert_eq!(model.bone_controllers[0].bone, None);
    assert_eq!(model.hitboxes[0].bone, None);
    assert_eq!(model.hitboxes[0].world_corners(&transforms), None);
    assert_eq!(model.attachments[0].bone, None);
    assert_eq!(model.attachments[0].world_origin(&transforms), None);
    assert_eq!(model.body_parts[0].models[0].meshes[0].skin_reference, None);
}

#[test]
fn under_running_curve_is_padded() {
    let bytes = MdlBuilder::new("short_curve")
        .bone(BoneSpec::new("root", -1))
        .sequence(SequenceSpec::new("twitch", 4).blend(vec![[
            None,
            Some(Curve::Raw(vec![1, 2, 7, 0, 0, 0])),
            None,
            None,
            None,
            None,
        ]]))
        .build();

    let model = Model::from_bytes(&bytes).unwrap();
    assert_eq!(
        model.sequences[0].blends[0].curve(0, BoneAxis::Y),
        Some(&[7, 7, 0, 0][..])
    );
}

#[test]
fn reads_from_io() {
    let bytes = scientist().build();
    let model = Model::read(std::io::Cursor::new(bytes)).unwrap();

    assert_eq!(model.sequences[1].label, "idle");
}

#[test]
fn missing_sequence_is_reported() {
    let model = Model::from_bytes(&scientist().build()).unwrap();

    assert_eq!(
        model.evaluate_pose(&PoseRequest::new(7)).unwrap_err(),
        Error::SequenceOutOfRange { index: 7, count: 2 }
    );
}

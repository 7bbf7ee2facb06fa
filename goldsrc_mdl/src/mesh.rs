use crate::binary_utils::Cursor;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TriangleKind {
    Fan,
    Strip,
}

/// One corner of a triangle command: indices into the owning sub-model's vertex
/// and normal arrays plus texel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TriVertex {
    pub vertex_index: i16,
    pub normal_index: i16,
    pub s: i16,
    pub t: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TriangleCommand {
    pub kind: TriangleKind,
    pub vertices: Vec<TriVertex>,
}

impl TriangleCommand {
    /// Indices into [`Self::vertices`] for each triangle of the fan or strip.
    ///
    /// Strips alternate winding so every triangle faces the same way.
    pub fn triangles(&self) -> impl Iterator<Item = [usize; 3]> {
        let kind = self.kind;

        (2..self.vertices.len()).map(move |i| match kind {
            TriangleKind::Fan => [0, i - 1, i],
            TriangleKind::Strip if i % 2 == 0 => [i - 2, i - 1, i],
            TriangleKind::Strip => [i - 1, i - 2, i],
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Mesh {
    /// Skin slot, resolved to a texture through a skin family. `None` if the
    /// file stores a negative slot.
    pub skin_reference: Option<usize>,
    pub commands: Vec<TriangleCommand>,
}

impl Mesh {
    pub fn triangles(&self) -> impl Iterator<Item = [TriVertex; 3]> + '_ {
        self.commands.iter().flat_map(|command| {
            command
                .triangles()
                .map(move |[a, b, c]| {
                    [command.vertices[a], command.vertices[b], command.vertices[c]]
                })
        })
    }
}

/// Reads a zero-terminated triangle command stream.
///
/// Each command starts with a signed vertex count: negative for a fan,
/// positive for a strip.
pub(crate) fn read_triangle_commands(cursor: &mut Cursor<'_>) -> Result<Vec<TriangleCommand>> {
    let mut commands = Vec::new();

    loop {
        let length = cursor.read_i16()?;
        if length == 0 {
            break;
        }

        let kind = if length < 0 {
            TriangleKind::Fan
        } else {
            TriangleKind::Strip
        };

        let vertices = (0..length.unsigned_abs())
            .map(|_| {
                Ok(TriVertex {
                    vertex_index: cursor.read_i16()?,
                    normal_index: cursor.read_i16()?,
                    s: cursor.read_i16()?,
                    t: cursor.read_i16()?,
                })
            })
            .collect::<Result<_>>()?;

        commands.push(TriangleCommand { kind, vertices });
    }

    Ok(commands)
}

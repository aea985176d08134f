//! Vertex layout transform: packs decoded per-attribute streams into one
//! interleaved buffer or one planar buffer per attribute.

use std::collections::BTreeSet;

use crate::mesh::{Attribute, EMPTY_BONE_SLOT, encode_bone_index};
use crate::model::ModelLoadSettings;

/// Per-attribute source arrays for one primitive, as handed over by the
/// importer. Bone ids are already remapped to global table ids.
#[derive(Clone, Debug, Default)]
pub struct VertexStreams {
    pub vertex_count: usize,
    pub positions: Option<Vec<[f32; 3]>>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub texcoords: Option<Vec<[f32; 2]>>,
    /// xyz tangent direction, w handedness sign.
    pub tangents: Option<Vec<[f32; 4]>>,
    pub bone_ids: Option<Vec<[i32; 4]>>,
    pub bone_weights: Option<Vec<[f32; 4]>>,
}

impl VertexStreams {
    /// Attributes that actually carry data. Tangents only count when normals
    /// are present (the bitangent is derived from both); bone ids and
    /// weights only count as a pair.
    pub fn present_attributes(&self) -> BTreeSet<Attribute> {
        let mut attributes = BTreeSet::new();
        if self.positions.is_some() {
            attributes.insert(Attribute::Position);
        }
        if self.normals.is_some() {
            attributes.insert(Attribute::Normal);
        }
        if self.texcoords.is_some() {
            attributes.insert(Attribute::TexCoord);
        }
        if self.tangents.is_some() && self.normals.is_some() {
            attributes.insert(Attribute::TangentBitangent);
        }
        if self.bone_ids.is_some() && self.bone_weights.is_some() {
            attributes.insert(Attribute::BoneIndices);
            attributes.insert(Attribute::BoneWeights);
        }
        attributes
    }
}

/// Pack one primitive's streams into flat buffers.
///
/// The emitted attribute set is the present set unioned with the settings'
/// forced attributes; forced-but-absent attributes zero-fill (bone index
/// slots get the empty-slot sentinel). Positions, normals, tangents and
/// bitangents come out with their Y and Z components swapped.
pub fn pack_streams(
    streams: &VertexStreams,
    settings: &ModelLoadSettings,
) -> (BTreeSet<Attribute>, Vec<Vec<f32>>) {
    let mut attributes = streams.present_attributes();
    attributes.extend(settings.force_attributes.iter().copied());

    let max_bones = settings.max_influence_bones;
    let vertex_len: usize = attributes
        .iter()
        .map(|attribute| attribute.components(max_bones))
        .sum();

    let mut buffers: Vec<Vec<f32>> = if settings.interleave_attributes {
        vec![Vec::with_capacity(vertex_len * streams.vertex_count)]
    } else {
        attributes
            .iter()
            .map(|attribute| {
                Vec::with_capacity(attribute.components(max_bones) * streams.vertex_count)
            })
            .collect()
    };

    for vertex in 0..streams.vertex_count {
        for (slot, &attribute) in attributes.iter().enumerate() {
            let target = if settings.interleave_attributes {
                &mut buffers[0]
            } else {
                &mut buffers[slot]
            };
            emit_attribute(streams, vertex, attribute, max_bones, target);
        }
    }

    (attributes, buffers)
}

fn emit_attribute(
    streams: &VertexStreams,
    vertex: usize,
    attribute: Attribute,
    max_bones: usize,
    target: &mut Vec<f32>,
) {
    match attribute {
        Attribute::Position => emit_swapped3(streams.positions.as_deref(), vertex, target),
        Attribute::Normal => emit_swapped3(streams.normals.as_deref(), vertex, target),
        Attribute::TexCoord => match streams.texcoords.as_deref() {
            Some(texcoords) => target.extend_from_slice(&texcoords[vertex]),
            None => target.extend_from_slice(&[0.0; 2]),
        },
        Attribute::TangentBitangent => emit_tangent_bitangent(streams, vertex, target),
        Attribute::BoneIndices => {
            let (ids, _) = bone_slots(streams, vertex, max_bones);
            target.extend(ids);
        }
        Attribute::BoneWeights => {
            let (_, weights) = bone_slots(streams, vertex, max_bones);
            target.extend(weights);
        }
    }
}

/// Emit (x, z, y), or three zeros when the stream is absent.
fn emit_swapped3(source: Option<&[[f32; 3]]>, vertex: usize, target: &mut Vec<f32>) {
    match source {
        Some(values) => {
            let [x, y, z] = values[vertex];
            target.extend_from_slice(&[x, z, y]);
        }
        None => target.extend_from_slice(&[0.0; 3]),
    }
}

/// Six floats: axis-swapped tangent, then the bitangent derived as
/// `cross(normal, tangent) * handedness`, also axis-swapped.
fn emit_tangent_bitangent(streams: &VertexStreams, vertex: usize, target: &mut Vec<f32>) {
    let (Some(tangents), Some(normals)) = (streams.tangents.as_deref(), streams.normals.as_deref())
    else {
        target.extend_from_slice(&[0.0; 6]);
        return;
    };
    let [tx, ty, tz, w] = tangents[vertex];
    let [nx, ny, nz] = normals[vertex];
    let bx = (ny * tz - nz * ty) * w;
    let by = (nz * tx - nx * tz) * w;
    let bz = (nx * ty - ny * tx) * w;
    target.extend_from_slice(&[tx, tz, ty, bx, bz, by]);
}

/// Fill the vertex's influence slots in order, leaving the sentinel in any
/// slot without a weighted influence.
fn bone_slots(streams: &VertexStreams, vertex: usize, max_bones: usize) -> (Vec<f32>, Vec<f32>) {
    let mut ids = vec![encode_bone_index(EMPTY_BONE_SLOT); max_bones];
    let mut weights = vec![0.0f32; max_bones];

    if let (Some(bone_ids), Some(bone_weights)) =
        (streams.bone_ids.as_deref(), streams.bone_weights.as_deref())
    {
        let mut slot = 0;
        for (&id, &weight) in bone_ids[vertex].iter().zip(bone_weights[vertex].iter()) {
            if weight > 0.0 && slot < max_bones {
                ids[slot] = encode_bone_index(id);
                weights[slot] = weight;
                slot += 1;
            }
        }
    }

    (ids, weights)
}

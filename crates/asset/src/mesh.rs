//! CPU-side model data produced by the loaders.

use std::collections::{BTreeSet, HashMap};

/// Vertex attribute kinds.
///
/// The `Ord` given by declaration order decides both the buffer order in
/// planar layout and the attribute order inside an interleaved vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    Position,
    Normal,
    TexCoord,
    TangentBitangent,
    BoneIndices,
    BoneWeights,
}

impl Attribute {
    /// Floats this attribute occupies per vertex.
    pub fn components(self, max_influence_bones: usize) -> usize {
        match self {
            Attribute::Position | Attribute::Normal => 3,
            Attribute::TexCoord => 2,
            Attribute::TangentBitangent => 6,
            Attribute::BoneIndices | Attribute::BoneWeights => max_influence_bones,
        }
    }
}

/// Id stored in a bone-index slot that has no influence assigned.
pub const EMPTY_BONE_SLOT: i32 = -1;

/// Bit-cast a bone id into the float that carries it inside a vertex buffer.
pub fn encode_bone_index(id: i32) -> f32 {
    f32::from_bits(id as u32)
}

/// Recover a bone id from its float carrier.
pub fn decode_bone_index(value: f32) -> i32 {
    value.to_bits() as i32
}

/// One mesh worth of flat vertex data.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    /// Attributes present in `buffers`.
    pub attributes: BTreeSet<Attribute>,
    /// A single interleaved buffer, or one buffer per attribute in
    /// [`Attribute`] order.
    pub buffers: Vec<Vec<f32>>,
    /// Triangle indices into this mesh's own vertex sequence.
    pub indices: Vec<u32>,
    /// Material index from the source file, -1 when the primitive had none.
    pub material_id: i32,
    pub vertex_count: usize,
}

impl MeshData {
    /// Floats per interleaved vertex for this mesh's attribute set.
    pub fn vertex_len(&self, max_influence_bones: usize) -> usize {
        self.attributes
            .iter()
            .map(|attribute| attribute.components(max_influence_bones))
            .sum()
    }

    /// Returns `true` if the mesh carries vertices and indices.
    pub fn is_valid(&self) -> bool {
        self.vertex_count > 0
            && !self.indices.is_empty()
            && self.buffers.iter().all(|buffer| !buffer.is_empty())
    }
}

/// A bone entry in the model's global table.
#[derive(Clone, Debug, PartialEq)]
pub struct BoneInfo {
    /// Assignment order, unique within a model.
    pub id: i32,
    /// Mesh-space to bone-space transform, one row per inner array.
    pub offset_matrix: [[f32; 4]; 4],
}

/// A loaded model: the global bone table plus its meshes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelData {
    pub bones: HashMap<String, BoneInfo>,
    pub meshes: Vec<MeshData>,
}

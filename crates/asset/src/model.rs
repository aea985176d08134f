//! Model loading: import glTF/GLB via the `gltf` crate, walk the scene
//! graph, and pack every triangle primitive into flat buffers.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use gltf::Document;

use crate::mesh::{Attribute, BoneInfo, MeshData, ModelData};
use crate::pack::{VertexStreams, pack_streams};

/// Import options.
#[derive(Clone, Debug)]
pub struct ModelLoadSettings {
    /// One interleaved buffer per mesh, or one buffer per attribute.
    pub interleave_attributes: bool,
    /// Bone influence slots reserved per vertex.
    pub max_influence_bones: usize,
    /// Attributes emitted even when the file carries no data for them.
    pub force_attributes: BTreeSet<Attribute>,
}

impl Default for ModelLoadSettings {
    fn default() -> Self {
        Self {
            interleave_attributes: true,
            max_influence_bones: 4,
            force_attributes: BTreeSet::new(),
        }
    }
}

/// Load a model from a glTF/GLB file on disk.
pub fn load_model(path: impl AsRef<Path>, settings: &ModelLoadSettings) -> Result<ModelData> {
    let path = path.as_ref();
    let (document, buffers, _images) = gltf::import(path)
        .with_context(|| format!("Failed to import model: {}", path.display()))?;
    build_model(&document, &buffers, settings)
}

/// Load a model from glTF/GLB bytes already in memory.
pub fn load_model_from_slice(bytes: &[u8], settings: &ModelLoadSettings) -> Result<ModelData> {
    let (document, buffers, _images) =
        gltf::import_slice(bytes).context("Failed to import model from memory")?;
    build_model(&document, &buffers, settings)
}

fn build_model(
    document: &Document,
    buffers: &[gltf::buffer::Data],
    settings: &ModelLoadSettings,
) -> Result<ModelData> {
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .context("Model file contains no scene")?;

    let mut builder = ModelBuilder {
        model: ModelData::default(),
        buffers,
        settings,
    };
    for node in scene.nodes() {
        builder.process_node(&node)?;
    }

    log::info!(
        "Loaded model: {} meshes, {} bones",
        builder.model.meshes.len(),
        builder.model.bones.len()
    );
    Ok(builder.model)
}

struct ModelBuilder<'a> {
    model: ModelData,
    buffers: &'a [gltf::buffer::Data],
    settings: &'a ModelLoadSettings,
}

impl ModelBuilder<'_> {
    fn process_node(&mut self, node: &gltf::Node<'_>) -> Result<()> {
        if let Some(mesh) = node.mesh() {
            let joint_map = match node.skin() {
                Some(skin) => self.register_skin(&skin)?,
                None => Vec::new(),
            };
            for primitive in mesh.primitives() {
                self.process_primitive(&primitive, &joint_map)?;
            }
        }
        for child in node.children() {
            self.process_node(&child)?;
        }
        Ok(())
    }

    /// Add the skin's joints to the global bone table and return the map
    /// from local joint index to global bone id. Bones deduplicate by name;
    /// ids follow first-seen order.
    fn register_skin(&mut self, skin: &gltf::Skin<'_>) -> Result<Vec<i32>> {
        let joints: Vec<_> = skin.joints().collect();
        let reader = skin.reader(|buffer| Some(&self.buffers[buffer.index()]));
        let matrices: Vec<[[f32; 4]; 4]> = match reader.read_inverse_bind_matrices() {
            Some(iter) => iter.map(columns_to_rows).collect(),
            None => vec![IDENTITY_MATRIX; joints.len()],
        };
        if matrices.len() != joints.len() {
            bail!(
                "Skin has {} joints but {} inverse bind matrices",
                joints.len(),
                matrices.len()
            );
        }

        let mut joint_map = Vec::with_capacity(joints.len());
        for (joint, offset_matrix) in joints.iter().zip(matrices) {
            let name = joint
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("joint_{}", joint.index()));
            let next_id = self.model.bones.len() as i32;
            let info = self.model.bones.entry(name).or_insert(BoneInfo {
                id: next_id,
                offset_matrix,
            });
            joint_map.push(info.id);
        }
        Ok(joint_map)
    }

    fn process_primitive(
        &mut self,
        primitive: &gltf::Primitive<'_>,
        joint_map: &[i32],
    ) -> Result<()> {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            log::warn!(
                "Skipping non-triangle primitive (mode {:?})",
                primitive.mode()
            );
            return Ok(());
        }

        let reader = primitive.reader(|buffer| Some(&self.buffers[buffer.index()]));

        let positions: Option<Vec<[f32; 3]>> = reader.read_positions().map(Iterator::collect);
        let vertex_count = positions.as_ref().map_or(0, Vec::len);
        if vertex_count == 0 {
            log::warn!("Skipping primitive without positions");
            return Ok(());
        }

        let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(Iterator::collect);
        let normals = expect_vertex_count(normals, vertex_count, "NORMAL")?;
        // glTF texcoords have a top-left origin; emit bottom-left ones
        let texcoords: Option<Vec<[f32; 2]>> = reader
            .read_tex_coords(0)
            .map(|iter| iter.into_f32().map(|[u, v]| [u, 1.0 - v]).collect());
        let texcoords = expect_vertex_count(texcoords, vertex_count, "TEXCOORD_0")?;
        let tangents: Option<Vec<[f32; 4]>> = reader.read_tangents().map(Iterator::collect);
        let tangents = expect_vertex_count(tangents, vertex_count, "TANGENT")?;

        let joints: Option<Vec<[u16; 4]>> =
            reader.read_joints(0).map(|iter| iter.into_u16().collect());
        let joints = expect_vertex_count(joints, vertex_count, "JOINTS_0")?;
        let weights: Option<Vec<[f32; 4]>> =
            reader.read_weights(0).map(|iter| iter.into_f32().collect());
        let weights = expect_vertex_count(weights, vertex_count, "WEIGHTS_0")?;
        let (bone_ids, bone_weights) = match (joints, weights) {
            (Some(joints), Some(weights)) if !joint_map.is_empty() => {
                (Some(remap_joints(&joints, joint_map)?), Some(weights))
            }
            (None, None) => (None, None),
            _ => {
                log::warn!(
                    "Skipping partial skinning data (joints, weights and a skin must all be present)"
                );
                (None, None)
            }
        };

        let streams = VertexStreams {
            vertex_count,
            positions,
            normals,
            texcoords,
            tangents,
            bone_ids,
            bone_weights,
        };
        let (attributes, buffers) = pack_streams(&streams, self.settings);

        let indices: Vec<u32> = match reader.read_indices() {
            Some(iter) => iter.into_u32().collect(),
            None => (0..vertex_count as u32).collect(),
        };
        let material_id = primitive.material().index().map_or(-1, |index| index as i32);

        self.merge_primitive(attributes, buffers, indices, material_id, vertex_count);
        Ok(())
    }

    /// Append to an existing mesh with the same material and attribute set,
    /// or start a new one. Appended indices are rebased onto the end of the
    /// mesh's existing vertex range.
    fn merge_primitive(
        &mut self,
        attributes: BTreeSet<Attribute>,
        buffers: Vec<Vec<f32>>,
        indices: Vec<u32>,
        material_id: i32,
        vertex_count: usize,
    ) {
        if let Some(mesh) = self
            .model
            .meshes
            .iter_mut()
            .find(|mesh| mesh.material_id == material_id && mesh.attributes == attributes)
        {
            let base = mesh.vertex_count as u32;
            for (target, source) in mesh.buffers.iter_mut().zip(buffers) {
                target.extend(source);
            }
            mesh.indices.extend(indices.into_iter().map(|i| i + base));
            mesh.vertex_count += vertex_count;
            return;
        }

        self.model.meshes.push(MeshData {
            attributes,
            buffers,
            indices,
            material_id,
            vertex_count,
        });
    }
}

const IDENTITY_MATRIX: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// glTF matrices arrive column-major; bone offsets store rows.
fn columns_to_rows(columns: [[f32; 4]; 4]) -> [[f32; 4]; 4] {
    let mut rows = [[0.0f32; 4]; 4];
    for (c, column) in columns.iter().enumerate() {
        for (r, &value) in column.iter().enumerate() {
            rows[r][c] = value;
        }
    }
    rows
}

/// Streams read alongside positions are indexed by vertex; a short one
/// would make the packer read out of bounds.
fn expect_vertex_count<T>(
    stream: Option<Vec<T>>,
    vertex_count: usize,
    name: &str,
) -> Result<Option<Vec<T>>> {
    match stream {
        Some(values) if values.len() != vertex_count => bail!(
            "{name} stream has {} elements but the primitive has {} vertices",
            values.len(),
            vertex_count
        ),
        other => Ok(other),
    }
}

fn remap_joints(joints: &[[u16; 4]], joint_map: &[i32]) -> Result<Vec<[i32; 4]>> {
    let mut remapped = Vec::with_capacity(joints.len());
    for set in joints {
        let mut ids = [0i32; 4];
        for (slot, &joint) in set.iter().enumerate() {
            ids[slot] = *joint_map
                .get(usize::from(joint))
                .with_context(|| format!("Joint index {joint} out of range for skin"))?;
        }
        remapped.push(ids);
    }
    Ok(remapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{EMPTY_BONE_SLOT, decode_bone_index};

    // One triangle with positions, normals and texcoords, one material:
    //   positions (0,0,0) (1,0,0) (0,1,0), normals all (0,0,1),
    //   texcoords (0,0) (1,0) (0,1), indices 0 1 2.
    const TRIANGLE_GLTF: &str = r#"{
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0}],
        "materials": [{"name": "default"}],
        "meshes": [{"primitives": [
            {"attributes": {"POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2}, "indices": 3, "material": 0}
        ]}],
        "buffers": [{"byteLength": 102, "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAABAAIA"}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 36},
            {"buffer": 0, "byteOffset": 72, "byteLength": 24},
            {"buffer": 0, "byteOffset": 96, "byteLength": 6}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]},
            {"bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3"},
            {"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC2"},
            {"bufferView": 3, "componentType": 5123, "count": 3, "type": "SCALAR"}
        ]
    }"#;

    // Same triangle data referenced by two primitives under one material.
    const TWO_PRIMITIVES_GLTF: &str = r#"{
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0}],
        "materials": [{"name": "default"}],
        "meshes": [{"primitives": [
            {"attributes": {"POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2}, "indices": 3, "material": 0},
            {"attributes": {"POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2}, "indices": 3, "material": 0}
        ]}],
        "buffers": [{"byteLength": 102, "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAABAAIA"}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 36},
            {"buffer": 0, "byteOffset": 72, "byteLength": 24},
            {"buffer": 0, "byteOffset": 96, "byteLength": 6}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]},
            {"bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3"},
            {"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC2"},
            {"bufferView": 3, "componentType": 5123, "count": 3, "type": "SCALAR"}
        ]
    }"#;

    // Skinned triangle, no indices, no material. Two joints named "hip"
    // (identity inverse bind) and "knee" (translation (1, 2, 3)).
    // Influences: v0 hip 1.0, v1 hip 0.5 + knee 0.5, v2 knee 1.0.
    const SKINNED_GLTF: &str = r#"{
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0, 1]}],
        "nodes": [
            {"mesh": 0, "skin": 0},
            {"name": "hip", "children": [2]},
            {"name": "knee"}
        ],
        "skins": [{"joints": [1, 2], "inverseBindMatrices": 3}],
        "meshes": [{"primitives": [
            {"attributes": {"POSITION": 0, "JOINTS_0": 1, "WEIGHTS_0": 2}}
        ]}],
        "buffers": [{"byteLength": 224, "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAACAPwAAAAAAAAAAAAAAAAAAAD8AAAA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAAAAAAIA/AAAAAAAAAAAAAAAAAAAAAAAAgD8AAAAAAAAAAAAAAAAAAAAAAACAPwAAgD8AAAAAAAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAAAAAAIA/AAAAAAAAgD8AAABAAABAQAAAgD8AAAAAAAEAAAEAAAA="}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 212, "byteLength": 12},
            {"buffer": 0, "byteOffset": 36, "byteLength": 48},
            {"buffer": 0, "byteOffset": 84, "byteLength": 128}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]},
            {"bufferView": 1, "componentType": 5121, "count": 3, "type": "VEC4"},
            {"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC4"},
            {"bufferView": 3, "componentType": 5126, "count": 2, "type": "MAT4"}
        ]
    }"#;

    // Same buffer as TRIANGLE_GLTF, but the NORMAL accessor claims only
    // two elements for a three-vertex primitive.
    const SHORT_NORMALS_GLTF: &str = r#"{
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0}],
        "materials": [{"name": "default"}],
        "meshes": [{"primitives": [
            {"attributes": {"POSITION": 0, "NORMAL": 1}, "indices": 3, "material": 0}
        ]}],
        "buffers": [{"byteLength": 102, "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAABAAIA"}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 36},
            {"buffer": 0, "byteOffset": 72, "byteLength": 24},
            {"buffer": 0, "byteOffset": 96, "byteLength": 6}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]},
            {"bufferView": 1, "componentType": 5126, "count": 2, "type": "VEC3"},
            {"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC2"},
            {"bufferView": 3, "componentType": 5123, "count": 3, "type": "SCALAR"}
        ]
    }"#;

    #[test]
    fn loads_a_triangle_interleaved() {
        let settings = ModelLoadSettings::default();
        let model = load_model_from_slice(TRIANGLE_GLTF.as_bytes(), &settings).expect("import");

        assert!(model.bones.is_empty());
        assert_eq!(model.meshes.len(), 1);

        let mesh = &model.meshes[0];
        assert!(mesh.is_valid());
        assert_eq!(mesh.material_id, 0);
        assert_eq!(mesh.vertex_count, 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.attributes.len(), 3);
        assert_eq!(mesh.buffers.len(), 1);
        assert_eq!(mesh.buffers[0].len(), mesh.vertex_len(4) * 3);

        // Vertex 1: position (1,0,0) -> (1,0,0), normal (0,0,1) -> (0,1,0),
        // texcoord (1,0) -> flipped v -> (1,1)
        let vertex1 = &mesh.buffers[0][8..16];
        assert_eq!(vertex1, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn loads_a_triangle_planar() {
        let settings = ModelLoadSettings {
            interleave_attributes: false,
            ..ModelLoadSettings::default()
        };
        let model = load_model_from_slice(TRIANGLE_GLTF.as_bytes(), &settings).expect("import");

        let mesh = &model.meshes[0];
        assert_eq!(mesh.buffers.len(), 3);
        assert_eq!(mesh.buffers[0].len(), 9);
        assert_eq!(mesh.buffers[1].len(), 9);
        assert_eq!(mesh.buffers[2].len(), 6);
        // texcoord (0,1) of vertex 2 flips to (0,0)
        assert_eq!(&mesh.buffers[2][4..6], &[0.0, 0.0]);
    }

    #[test]
    fn merges_primitives_with_same_material_and_attributes() {
        let settings = ModelLoadSettings::default();
        let model =
            load_model_from_slice(TWO_PRIMITIVES_GLTF.as_bytes(), &settings).expect("import");

        assert_eq!(model.meshes.len(), 1);
        let mesh = &model.meshes[0];
        assert_eq!(mesh.vertex_count, 6);
        assert_eq!(mesh.buffers[0].len(), mesh.vertex_len(4) * 6);
        // the second primitive's indices are rebased past the first's vertices
        assert_eq!(mesh.indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn skinned_triangle_builds_bone_table_and_slots() {
        let settings = ModelLoadSettings::default();
        let model = load_model_from_slice(SKINNED_GLTF.as_bytes(), &settings).expect("import");

        assert_eq!(model.bones.len(), 2);
        let hip = &model.bones["hip"];
        let knee = &model.bones["knee"];
        assert_eq!(hip.id, 0);
        assert_eq!(knee.id, 1);
        assert_eq!(hip.offset_matrix, IDENTITY_MATRIX);
        // column-major translation (1,2,3) transposes into the last column
        // of each row
        assert_eq!(knee.offset_matrix[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(knee.offset_matrix[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(knee.offset_matrix[2], [0.0, 0.0, 1.0, 3.0]);
        assert_eq!(knee.offset_matrix[3], [0.0, 0.0, 0.0, 1.0]);

        let mesh = &model.meshes[0];
        assert_eq!(mesh.material_id, -1);
        // no indices in the file, so they are synthesized
        assert_eq!(mesh.indices, vec![0, 1, 2]);

        // layout per vertex: position (3), bone indices (4), bone weights (4)
        let stride = mesh.vertex_len(4);
        assert_eq!(stride, 11);
        let buffer = &mesh.buffers[0];

        // v0: hip only
        assert_eq!(decode_bone_index(buffer[3]), 0);
        assert_eq!(decode_bone_index(buffer[4]), EMPTY_BONE_SLOT);
        assert_eq!(buffer[7], 1.0);

        // v1: hip 0.5, knee 0.5
        assert_eq!(decode_bone_index(buffer[stride + 3]), 0);
        assert_eq!(decode_bone_index(buffer[stride + 4]), 1);
        assert_eq!(&buffer[stride + 7..stride + 9], &[0.5, 0.5]);

        // v2: knee only
        assert_eq!(decode_bone_index(buffer[2 * stride + 3]), 1);
        assert_eq!(buffer[2 * stride + 7], 1.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_model("does/not/exist.gltf", &ModelLoadSettings::default());
        assert!(err.is_err());
    }

    #[test]
    fn short_attribute_stream_is_an_error() {
        let result = load_model_from_slice(SHORT_NORMALS_GLTF.as_bytes(), &ModelLoadSettings::default());
        let err = result.expect_err("a short NORMAL stream must not load");
        assert!(err.to_string().contains("NORMAL"), "unexpected error: {err:#}");
    }

    #[test]
    fn garbage_bytes_are_an_error() {
        let err = load_model_from_slice(b"not a gltf", &ModelLoadSettings::default());
        assert!(err.is_err());
    }
}

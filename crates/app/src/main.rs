//! Asset inspector for Veles3D: load images/models and log what came out.

use anyhow::{Result, bail};
use asset::image::{ImageLoadSettings, load_image};
use asset::mesh::Attribute;
use asset::model::{ModelLoadSettings, load_model};

struct Options {
    image: ImageLoadSettings,
    model: ModelLoadSettings,
    files: Vec<String>,
}

fn parse_args() -> Options {
    // Accept: [--no-flip] [--planar] [--max-bones=N] [--force-bones] <files...>
    let mut options = Options {
        image: ImageLoadSettings::default(),
        model: ModelLoadSettings::default(),
        files: Vec::new(),
    };

    for arg in std::env::args().skip(1) {
        if arg == "--no-flip" {
            options.image.flip_vertically = false;
        } else if arg == "--planar" {
            options.model.interleave_attributes = false;
        } else if arg == "--force-bones" {
            options.model.force_attributes.insert(Attribute::BoneIndices);
            options.model.force_attributes.insert(Attribute::BoneWeights);
        } else if let Some(val) = arg.strip_prefix("--max-bones=") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => options.model.max_influence_bones = n,
                _ => eprintln!("[warn] Invalid --max-bones value '{}', keeping default.", val),
            }
        } else if arg.starts_with("--") {
            eprintln!("[warn] Unknown flag '{}', ignoring.", arg);
        } else {
            options.files.push(arg);
        }
    }

    options
}

fn is_model_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".gltf") || lower.ends_with(".glb")
}

fn inspect(path: &str, options: &Options) -> Result<()> {
    if is_model_path(path) {
        let model = load_model(path, &options.model)?;
        log::info!("{}: {} meshes, {} bones", path, model.meshes.len(), model.bones.len());
        for (i, mesh) in model.meshes.iter().enumerate() {
            log::info!(
                "  mesh {}: material {}, {} vertices, {} indices, {} attributes in {} buffer(s)",
                i,
                mesh.material_id,
                mesh.vertex_count,
                mesh.indices.len(),
                mesh.attributes.len(),
                mesh.buffers.len()
            );
        }
        for (name, bone) in &model.bones {
            log::debug!("  bone {} -> id {}", name, bone.id);
        }
    } else {
        let img = load_image(path, &options.image)?;
        log::info!(
            "{}: {}x{}, {} channels, {} bytes",
            path,
            img.width,
            img.height,
            img.color_channels,
            img.byte_len()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_args();
    if options.files.is_empty() {
        bail!("Usage: app [--no-flip] [--planar] [--max-bones=N] [--force-bones] <files...>");
    }

    for path in &options.files {
        inspect(path, &options)?;
    }
    Ok(())
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use glam::{Mat4, Vec3};
use log::*;
use serde::Deserialize;

use lockstep::{
    Engine, EngineConfig, Extent, Hooks, Propagation, SceneAssets, ShaderSet, TextureData, Vertex,
};

#[derive(Debug, Parser)]
#[command(version, about = "Draws a textured test scene with the lockstep engine")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "viewer.toml")]
    config: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ViewerSettings {
    width: u32,
    height: u32,
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    /// Fragment stage without a sampler binding.
    flat_fragment_shader: PathBuf,
    texture: Option<PathBuf>,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
            flat_fragment_shader: PathBuf::from("shaders/flat_frag.spv"),
            texture: None,
        }
    }
}

impl ViewerSettings {
    fn fragment_shader(&self, texture_sampling: bool) -> &Path {
        if texture_sampling {
            &self.fragment_shader
        } else {
            &self.flat_fragment_shader
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ViewerFile {
    #[serde(flatten)]
    engine: EngineConfig,
    #[serde(default)]
    viewer: ViewerSettings,
}

fn read_config(path: &Path) -> Result<Option<ViewerFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(file))
}

fn init_logger(fallback_filter: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| fallback_filter.to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filter)
        .init();
}

fn scene_geometry() -> (Vec<Vertex>, Vec<u32>) {
    let vertices = vec![
        Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0]),
        Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
        Vertex::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        Vertex::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
        Vertex::new([-0.5, -0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
        Vertex::new([0.5, -0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
        Vertex::new([0.5, 0.5, -0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
        Vertex::new([-0.5, 0.5, -0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
    ];
    let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];
    (vertices, indices)
}

fn load_texture(path: Option<&Path>) -> Result<TextureData> {
    let Some(path) = path else {
        return Ok(checkerboard(256, 32));
    };

    let image = image::open(path)
        .with_context(|| format!("Failed to load texture {}", path.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    info!("Loaded texture {} ({}x{}).", path.display(), width, height);

    Ok(TextureData {
        pixels: image.into_raw(),
        width,
        height,
    })
}

fn checkerboard(size: u32, cell: u32) -> TextureData {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let value = if (x / cell + y / cell) % 2 == 0 { 230 } else { 40 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    TextureData {
        pixels,
        width: size,
        height: size,
    }
}

fn read_shader(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read shader {}", path.display()))
}

/// Model spins about Z; the projection is flipped for Vulkan's downward Y.
fn spinning_camera(extent: Extent, elapsed: f32) -> (Mat4, Mat4, Mat4) {
    let model = Mat4::from_rotation_z(elapsed * 90f32.to_radians());
    let view = Mat4::look_at_rh(Vec3::new(2.0, 2.0, 2.0), Vec3::ZERO, Vec3::Z);

    let aspect = extent.width as f32 / extent.height.max(1) as f32;
    let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
    proj.y_axis.y *= -1.0;

    (model, view, proj)
}

/// The shaders read the uniform block as row-major.
fn row_major(matrix: Mat4) -> [[f32; 4]; 4] {
    matrix.transpose().to_cols_array_2d()
}

fn build_hooks() -> Hooks {
    let mut hooks = Hooks::new();

    hooks
        .on_after_init(|context| {
            info!(
                "Viewer running at {}x{}.",
                context.extent.width, context.extent.height
            );
            Propagation::Continue
        })
        .on_build_uniforms(|frame, ubo| {
            let (model, view, proj) = spinning_camera(frame.extent, frame.elapsed);
            ubo.model = row_major(model);
            ubo.view = row_major(view);
            ubo.proj = row_major(proj);
            Propagation::Continue
        })
        .on_resize(|old, new| {
            debug!(
                "Viewer resized from {}x{} to {}x{}.",
                old.width, old.height, new.width, new.height
            );
        })
        .on_cleanup(|| info!("Viewer closed."));

    hooks
}

fn main() -> Result<()> {
    let args = Args::parse();

    let file = read_config(&args.config)?;
    let missing = file.is_none();
    let ViewerFile { engine, viewer } = file.unwrap_or_default();

    init_logger(&engine.log_filter);
    if missing {
        warn!(
            "Config file {} not found; using defaults.",
            args.config.display()
        );
    }

    let (vertices, indices) = scene_geometry();
    let texture = if engine.texture_sampling {
        Some(load_texture(viewer.texture.as_deref())?)
    } else {
        None
    };
    let assets = SceneAssets {
        vertices,
        indices,
        texture,
        shaders: ShaderSet {
            vertex: read_shader(&viewer.vertex_shader)?,
            fragment: read_shader(viewer.fragment_shader(engine.texture_sampling))?,
        },
    };

    let mut engine = Engine::new(engine, build_hooks())?;
    engine.run(Extent::new(viewer.width, viewer.height), assets)
}

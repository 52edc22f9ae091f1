//! Progressive Cornell box render.
//!
//! Renders the classic box with the technique given on the command line
//! (pt, lt, bpt, sppm, vcm) and saves the result to PPM format.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use ember_core::{Image, MaterialDesc, PerspectiveCamera, Scene, TriMesh};
use ember_math::Vec3;
use ember_render::{RenderSettings, Renderer, Technique, VcmSettings};

fn main() {
    env_logger::init();

    let technique = match std::env::args().nth(1).as_deref() {
        Some("lt") => Technique::LightTracing,
        Some("bpt") => Technique::Bidirectional,
        Some("sppm") => Technique::Sppm,
        Some("vcm") => Technique::Vcm,
        _ => Technique::PathTracing,
    };
    let iterations: u32 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(64);

    let start = std::time::Instant::now();
    let scene = build_cornell();
    println!("Scene built in {:?}", start.elapsed());

    let camera = PerspectiveCamera::new(
        512,
        512,
        Vec3::new(0.0, 1.0, 0.9),
        Vec3::new(0.0, 1.0, -1.0),
        Vec3::Y,
        70.0,
    );

    let settings = RenderSettings {
        technique,
        vcm: VcmSettings {
            radius_scale: 0.01,
            ..VcmSettings::default()
        },
    };
    let mut renderer = Renderer::new(scene, camera, settings).expect("invalid configuration");

    println!("Rendering 512x512, {} iterations of {:?}...", iterations, technique);
    let start = std::time::Instant::now();
    for i in 0..iterations {
        renderer.render_iteration();
        if (i + 1) % 16 == 0 {
            println!("  iteration {}/{} ({:?})", i + 1, iterations, start.elapsed());
        }
    }
    println!("Rendered in {:?}", start.elapsed());

    let filename = "cornell.ppm";
    save_ppm(renderer.image(), renderer.iterations(), filename).expect("failed to save image");
    println!("Saved to {}", filename);
}

fn quad(
    positions: &mut Vec<Vec3>,
    indices: &mut Vec<u32>,
    material_ids: &mut Vec<u32>,
    corners: [Vec3; 4],
    material: u32,
) {
    let base = positions.len() as u32;
    positions.extend(corners);
    indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    material_ids.extend([material, material]);
}

fn build_cornell() -> Arc<Scene> {
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    let mut ids = Vec::new();

    // Floor, ceiling, back and front walls: white.
    quad(
        &mut positions,
        &mut indices,
        &mut ids,
        [
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(-1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, -1.0),
        ],
        0,
    );
    quad(
        &mut positions,
        &mut indices,
        &mut ids,
        [
            Vec3::new(-1.0, 2.0, -1.0),
            Vec3::new(1.0, 2.0, -1.0),
            Vec3::new(1.0, 2.0, 1.0),
            Vec3::new(-1.0, 2.0, 1.0),
        ],
        0,
    );
    quad(
        &mut positions,
        &mut indices,
        &mut ids,
        [
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 2.0, -1.0),
            Vec3::new(-1.0, 2.0, -1.0),
        ],
        0,
    );
    quad(
        &mut positions,
        &mut indices,
        &mut ids,
        [
            Vec3::new(-1.0, 0.0, 1.0),
            Vec3::new(-1.0, 2.0, 1.0),
            Vec3::new(1.0, 2.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
        ],
        0,
    );
    // Red left wall, green right wall.
    quad(
        &mut positions,
        &mut indices,
        &mut ids,
        [
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(-1.0, 2.0, -1.0),
            Vec3::new(-1.0, 2.0, 1.0),
            Vec3::new(-1.0, 0.0, 1.0),
        ],
        1,
    );
    quad(
        &mut positions,
        &mut indices,
        &mut ids,
        [
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 2.0, 1.0),
            Vec3::new(1.0, 2.0, -1.0),
        ],
        2,
    );
    // Mirror panel on the back wall and the ceiling light.
    quad(
        &mut positions,
        &mut indices,
        &mut ids,
        [
            Vec3::new(-0.6, 0.4, -0.99),
            Vec3::new(0.6, 0.4, -0.99),
            Vec3::new(0.6, 1.6, -0.99),
            Vec3::new(-0.6, 1.6, -0.99),
        ],
        4,
    );
    quad(
        &mut positions,
        &mut indices,
        &mut ids,
        [
            Vec3::new(-0.4, 1.98, -0.4),
            Vec3::new(0.4, 1.98, -0.4),
            Vec3::new(0.4, 1.98, 0.4),
            Vec3::new(-0.4, 1.98, 0.4),
        ],
        3,
    );

    Arc::new(Scene::new(
        vec![TriMesh::new(positions, indices, ids)],
        vec![
            MaterialDesc::diffuse("white", Vec3::splat(0.75)),
            MaterialDesc::diffuse("red", Vec3::new(0.75, 0.15, 0.15)),
            MaterialDesc::diffuse("green", Vec3::new(0.15, 0.75, 0.15)),
            MaterialDesc::emissive("lamp", Vec3::splat(15.0)),
            MaterialDesc::mirror("mirror", Vec3::splat(0.95), 0.2, 3.9),
        ],
        Vec::new(),
    ))
}

fn save_ppm(image: &Image, iterations: u32, path: &str) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "P3\n{} {}\n255", image.width(), image.height())?;
    let scale = 1.0 / iterations.max(1) as f32;
    for pixel in image.pixels() {
        let p = *pixel * scale;
        let to_byte = |c: f32| (c.max(0.0).powf(1.0 / 2.2).min(1.0) * 255.0) as u8;
        writeln!(out, "{} {} {}", to_byte(p.x), to_byte(p.y), to_byte(p.z))?;
    }
    Ok(())
}

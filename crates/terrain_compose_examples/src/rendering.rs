//! PNG rendering of committed regions and tracing setup shared by the example binaries.
use std::path::Path;

use anyhow::Context;
use image::{Rgb, RgbImage};
use terrain_compose::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber honoring `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// How committed regions are turned into pixels.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    /// Pixels per height cell along each axis.
    pub pixels_per_cell: u32,
    /// Heights mapped to black and white.
    pub height_range: (f32, f32),
    pub background: [u8; 3],
    /// Color per material id; ids past the end render gray.
    pub palette: Vec<[u8; 3]>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            pixels_per_cell: 4,
            height_range: (-8.0, 8.0),
            background: [20, 20, 24],
            palette: vec![
                [110, 110, 110],
                [86, 140, 64],
                [150, 130, 100],
                [210, 190, 140],
                [60, 90, 160],
                [230, 230, 235],
            ],
        }
    }
}

impl RenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pixels_per_cell(mut self, pixels: u32) -> Self {
        self.pixels_per_cell = pixels.max(1);
        self
    }

    pub fn with_height_range(mut self, min: f32, max: f32) -> Self {
        self.height_range = (min, max);
        self
    }

    pub fn with_background(mut self, rgb: [u8; 3]) -> Self {
        self.background = rgb;
        self
    }

    fn material_color(&self, id: u8) -> [f32; 3] {
        let rgb = self.palette.get(id as usize).copied().unwrap_or([128, 128, 128]);
        rgb.map(f32::from)
    }

    /// Material tint shaded by normalized height.
    fn shade(&self, height: f32, control: MaterialControl) -> Rgb<u8> {
        let (lo, hi) = self.height_range;
        let t = ((height - lo) / (hi - lo).max(f32::EPSILON)).clamp(0.0, 1.0);
        let light = 0.35 + 0.65 * t;
        let base = self.material_color(control.base());
        let overlay = self.material_color(control.overlay());
        let w = f32::from(control.weight()) / 255.0;
        Rgb(std::array::from_fn(|i| {
            ((base[i] + (overlay[i] - base[i]) * w) * light).round() as u8
        }))
    }
}

/// Renders every active region of `terrain` into one PNG at `path`.
pub fn render_terrain_to_png<B: ComputeBackend>(
    terrain: &Terrain<B>,
    config: &RenderConfig,
    path: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let regions = terrain.active_regions();
    let Some(first) = regions.first().copied() else {
        anyhow::bail!("no active regions to render");
    };
    let (min, max) = regions.iter().fold((first, first), |(lo, hi), r| {
        (
            RegionCoord(lo.0.min(r.0), lo.1.min(r.1)),
            RegionCoord(hi.0.max(r.0), hi.1.max(r.1)),
        )
    });

    let resolution = terrain.grid().resolution;
    let region_px = resolution * config.pixels_per_cell;
    let width = (max.0 - min.0 + 1) as u32 * region_px;
    let height = (max.1 - min.1 + 1) as u32 * region_px;
    let mut img = RgbImage::from_pixel(width, height, Rgb(config.background));

    for coord in regions {
        let snapshot = terrain
            .region_snapshot(coord)
            .with_context(|| format!("reading region {coord}"))?;
        let heights = snapshot.heights();
        let materials = snapshot.materials();
        let ox = (coord.0 - min.0) as u32 * region_px;
        // Image rows grow downward, world y grows upward.
        let oy = (max.1 - coord.1) as u32 * region_px;
        for iy in 0..resolution {
            for ix in 0..resolution {
                let cell = (iy * resolution + ix) as usize;
                let color = config.shade(heights[cell], materials[cell]);
                let py = oy + (resolution - 1 - iy) * config.pixels_per_cell;
                let px = ox + ix * config.pixels_per_cell;
                for dy in 0..config.pixels_per_cell {
                    for dx in 0..config.pixels_per_cell {
                        img.put_pixel(px + dx, py + dy, color);
                    }
                }
            }
        }
    }

    img.save(path.as_ref())
        .with_context(|| format!("writing {}", path.as_ref().display()))?;
    Ok(())
}

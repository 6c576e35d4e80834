use anyhow::bail;
use image::{Rgba, RgbaImage};
use std::collections::{BTreeMap, BTreeSet};

/// Logical pixels per canvas chunk edge.
pub const CHUNK_SIZE: i64 = 1000;

/// Template tiles store each logical pixel in the centre of a 3×3 cell.
pub const STRIDE: u32 = 3;

/// Template tile address. Field order is the sort order of a diff pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey {
    pub chunk_x: i32,
    pub chunk_y: i32,
    pub offset_x: u32,
    pub offset_y: u32,
}

/// One sampled, opaque template pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateSample {
    pub global_x: i64,
    pub global_y: i64,
    pub rgba: [u8; 4],
}

/// Immutable chunk-aligned template.
#[derive(Debug, Clone, Default)]
pub struct Template {
    chunked: BTreeMap<TileKey, RgbaImage>,
}

impl Template {
    pub fn from_tiles(tiles: impl IntoIterator<Item = (TileKey, RgbaImage)>) -> Self {
        Self {
            chunked: tiles.into_iter().collect(),
        }
    }

    /// Build a template from a plain image whose top-left lands on
    /// (`global_x`, `global_y`), split at chunk boundaries.
    pub fn from_image(img: &RgbaImage, global_x: i64, global_y: i64) -> anyhow::Result<Self> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            bail!("template image is empty");
        }
        if global_x < 0 || global_y < 0 {
            bail!("template origin must be non-negative, got {global_x},{global_y}");
        }

        let x_end = global_x + i64::from(w);
        let y_end = global_y + i64::from(h);
        let mut tiles = BTreeMap::new();

        for cy in global_y.div_euclid(CHUNK_SIZE)..=(y_end - 1).div_euclid(CHUNK_SIZE) {
            for cx in global_x.div_euclid(CHUNK_SIZE)..=(x_end - 1).div_euclid(CHUNK_SIZE) {
                let x0 = global_x.max(cx * CHUNK_SIZE);
                let x1 = x_end.min((cx + 1) * CHUNK_SIZE);
                let y0 = global_y.max(cy * CHUNK_SIZE);
                let y1 = y_end.min((cy + 1) * CHUNK_SIZE);
                let tw = (x1 - x0) as u32;
                let th = (y1 - y0) as u32;

                let mut tile = RgbaImage::new(tw * STRIDE, th * STRIDE);
                for j in 0..th {
                    for i in 0..tw {
                        let src_x = (x0 - global_x) as u32 + i;
                        let src_y = (y0 - global_y) as u32 + j;
                        let px = *img.get_pixel(src_x, src_y);
                        tile.put_pixel(i * STRIDE + 1, j * STRIDE + 1, px);
                    }
                }

                let key = TileKey {
                    chunk_x: cx as i32,
                    chunk_y: cy as i32,
                    offset_x: (x0 - cx * CHUNK_SIZE) as u32,
                    offset_y: (y0 - cy * CHUNK_SIZE) as u32,
                };
                tiles.insert(key, tile);
            }
        }

        Ok(Self { chunked: tiles })
    }

    pub fn chunked(&self) -> &BTreeMap<TileKey, RgbaImage> {
        &self.chunked
    }

    /// Distinct chunks touched by any tile, sorted.
    pub fn referenced_chunks(&self) -> Vec<(i32, i32)> {
        self.chunked
            .keys()
            .map(|k| (k.chunk_x, k.chunk_y))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of opaque logical pixels across all tiles.
    pub fn pixel_count(&self) -> usize {
        self.chunked
            .iter()
            .map(|(key, bitmap)| tile_samples(key, bitmap).count())
            .sum()
    }
}

/// Opaque logical pixels of one tile in row-major order. Cells whose centre
/// sample has alpha 0 are not part of the template.
pub fn tile_samples<'a>(
    key: &'a TileKey,
    bitmap: &'a RgbaImage,
) -> impl Iterator<Item = TemplateSample> + 'a {
    let cols = bitmap.width() / STRIDE;
    let rows = bitmap.height() / STRIDE;
    let base_x = i64::from(key.chunk_x) * CHUNK_SIZE + i64::from(key.offset_x);
    let base_y = i64::from(key.chunk_y) * CHUNK_SIZE + i64::from(key.offset_y);

    (0..rows).flat_map(move |j| {
        (0..cols).filter_map(move |i| {
            let Rgba(rgba) = *bitmap.get_pixel(i * STRIDE + 1, j * STRIDE + 1);
            if rgba[3] == 0 {
                return None;
            }
            Some(TemplateSample {
                global_x: base_x + i64::from(i),
                global_y: base_y + i64::from(j),
                rgba,
            })
        })
    })
}

/// Split a global coordinate into (chunk, local).
pub fn split_global(global: i64) -> (i32, u32) {
    (
        global.div_euclid(CHUNK_SIZE) as i32,
        global.rem_euclid(CHUNK_SIZE) as u32,
    )
}

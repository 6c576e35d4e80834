use crate::ledger::{PixelKey, PlacedLedger};
use crate::palette::{ColorCache, ColorId, TRANSPARENT};
use crate::template::{split_global, tile_samples, Template};
use image::RgbaImage;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;
use wplacer_protocol::FillMode;

/// Live chunk bitmaps for one diff pass. `None` means the chunk could not be
/// fetched and reads as fully transparent.
pub type ChunkCache = HashMap<(i32, i32), Option<RgbaImage>>;

/// A template pixel whose live color differs from the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrongPixel {
    pub chunk_x: i32,
    pub chunk_y: i32,
    pub local_x: u32,
    pub local_y: u32,
    pub color: ColorId,
    pub global_x: i64,
    pub global_y: i64,
}

impl WrongPixel {
    pub fn key(&self) -> PixelKey {
        (self.global_x, self.global_y)
    }

    pub fn chunk(&self) -> (i32, i32) {
        (self.chunk_x, self.chunk_y)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    pub mode: FillMode,
    /// Random mode only: once this many wrong pixels are found, later tiles
    /// contribute coverage but are not compared.
    pub soft_target: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub all_template_pixels: HashSet<PixelKey>,
    pub wrong_pixels: Vec<WrongPixel>,
    /// Compared pixels the account could place (owned, not transparent).
    pub placeable: usize,
    /// Compared pixels skipped because their color is not owned.
    pub unowned: usize,
    /// True when the soft target cut the comparison short.
    pub truncated: bool,
}

impl DiffResult {
    /// The template has paintable pixels but none in a color the account owns.
    pub fn nothing_owned(&self) -> bool {
        self.placeable == 0 && self.unowned > 0
    }
}

pub struct DiffEngine<'a> {
    template: &'a Template,
    chunks: &'a ChunkCache,
    owned: &'a BTreeSet<ColorId>,
    placed: Option<(&'a PlacedLedger, Instant)>,
}

impl<'a> DiffEngine<'a> {
    pub fn new(
        template: &'a Template,
        chunks: &'a ChunkCache,
        owned: &'a BTreeSet<ColorId>,
    ) -> Self {
        Self {
            template,
            chunks,
            owned,
            placed: None,
        }
    }

    /// Skip pixels the ledger says were submitted recently.
    pub fn excluding(mut self, placed: &'a PlacedLedger, now: Instant) -> Self {
        self.placed = Some((placed, now));
        self
    }

    pub fn run(&self, opts: DiffOptions) -> DiffResult {
        let mut colors = ColorCache::new();
        let mut out = DiffResult::default();
        let soft_target = match opts.mode {
            FillMode::Random => opts.soft_target,
            FillMode::Scan => None,
        };

        for (key, bitmap) in self.template.chunked() {
            let compare = match soft_target {
                Some(target) if out.wrong_pixels.len() >= target => {
                    out.truncated = true;
                    false
                }
                _ => true,
            };

            for sample in tile_samples(key, bitmap) {
                let pixel_key = (sample.global_x, sample.global_y);
                out.all_template_pixels.insert(pixel_key);
                if !compare {
                    continue;
                }

                let color = colors.classify(sample.rgba);
                if color == TRANSPARENT {
                    continue;
                }
                if !self.owned.contains(&color) {
                    out.unowned += 1;
                    continue;
                }
                out.placeable += 1;
                if let Some((ledger, now)) = self.placed {
                    if ledger.contains(pixel_key, now) {
                        continue;
                    }
                }

                let (chunk_x, local_x) = split_global(sample.global_x);
                let (chunk_y, local_y) = split_global(sample.global_y);
                let live = self.live_color(&mut colors, (chunk_x, chunk_y), local_x, local_y);
                if live == Some(color) {
                    continue;
                }

                out.wrong_pixels.push(WrongPixel {
                    chunk_x,
                    chunk_y,
                    local_x,
                    local_y,
                    color,
                    global_x: sample.global_x,
                    global_y: sample.global_y,
                });
            }
        }

        out
    }

    /// `None` when the chunk is missing or the pixel lies outside its bitmap.
    fn live_color(
        &self,
        colors: &mut ColorCache,
        chunk: (i32, i32),
        x: u32,
        y: u32,
    ) -> Option<ColorId> {
        let bitmap = self.chunks.get(&chunk)?.as_ref()?;
        if x >= bitmap.width() || y >= bitmap.height() {
            return None;
        }
        Some(colors.classify(bitmap.get_pixel(x, y).0))
    }
}

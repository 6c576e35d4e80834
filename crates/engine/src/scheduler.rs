use crate::diff::{DiffResult, WrongPixel};
use crate::ledger::PixelKey;
use crate::palette::ColorId;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use wplacer_protocol::FillMode;

const CARDINAL: [(i64, i64); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];
const DIAGONAL: [(i64, i64); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

/// Inclusive bounding box of a template's footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

impl Bounds {
    pub fn of<'a>(pixels: impl IntoIterator<Item = &'a PixelKey>) -> Option<Self> {
        pixels.into_iter().fold(None, |acc, &(x, y)| {
            Some(match acc {
                None => Bounds {
                    min_x: x,
                    max_x: x,
                    min_y: y,
                    max_y: y,
                },
                Some(b) => Bounds {
                    min_x: b.min_x.min(x),
                    max_x: b.max_x.max(x),
                    min_y: b.min_y.min(y),
                    max_y: b.max_y.max(y),
                },
            })
        })
    }

    fn on_border(&self, (x, y): PixelKey) -> bool {
        x == self.min_x || x == self.max_x || y == self.min_y || y == self.max_y
    }
}

/// Pixels that belong to the template's silhouette: on the bounding box, or
/// missing any of their eight neighbours.
pub fn is_edge(key: PixelKey, covered: &HashSet<PixelKey>, bounds: &Bounds) -> bool {
    if bounds.on_border(key) {
        return true;
    }
    let (x, y) = key;
    CARDINAL
        .iter()
        .chain(DIAGONAL.iter())
        .any(|(dx, dy)| !covered.contains(&(x + dx, y + dy)))
}

/// Pixels to place on one chunk, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBatch {
    pub chunk_x: i32,
    pub chunk_y: i32,
    pub pixels: Vec<WrongPixel>,
}

impl ChunkBatch {
    pub fn colors(&self) -> Vec<ColorId> {
        self.pixels.iter().map(|p| p.color).collect()
    }

    /// Flattened local coordinates `[x0, y0, x1, y1, ...]`.
    pub fn coords(&self) -> Vec<u32> {
        self.pixels
            .iter()
            .flat_map(|p| [p.local_x, p.local_y])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub batches: Vec<ChunkBatch>,
    /// All wrong pixels found, scheduled or not.
    pub total_wrong: usize,
}

impl Schedule {
    pub fn scheduled(&self) -> usize {
        self.batches.iter().map(ChunkBatch::len).sum()
    }
}

/// Edge pixels first, then interior; each group row-major (Scan) or shuffled
/// (Random).
pub fn order<R: Rng + ?Sized>(
    wrong: &[WrongPixel],
    covered: &HashSet<PixelKey>,
    mode: FillMode,
    rng: &mut R,
) -> Vec<WrongPixel> {
    let Some(bounds) = Bounds::of(covered) else {
        return Vec::new();
    };
    let (mut edges, mut interior): (Vec<WrongPixel>, Vec<WrongPixel>) = wrong
        .iter()
        .partition(|p| is_edge(p.key(), covered, &bounds));

    match mode {
        FillMode::Scan => {
            edges.sort_by_key(|p| (p.global_y, p.global_x));
            interior.sort_by_key(|p| (p.global_y, p.global_x));
        }
        FillMode::Random => {
            edges.shuffle(rng);
            interior.shuffle(rng);
        }
    }

    edges.extend(interior);
    edges
}

/// Order `diff.wrong_pixels` and pack at most `budget` of them into per-chunk
/// batches. Chunks appear in order of their first scheduled pixel.
pub fn schedule<R: Rng + ?Sized>(
    diff: &DiffResult,
    mode: FillMode,
    budget: usize,
    rng: &mut R,
) -> Schedule {
    let total_wrong = diff.wrong_pixels.len();
    if budget == 0 || total_wrong == 0 {
        return Schedule {
            batches: Vec::new(),
            total_wrong,
        };
    }

    let ordered = order(&diff.wrong_pixels, &diff.all_template_pixels, mode, rng);
    let mut batches: Vec<ChunkBatch> = Vec::new();
    for pixel in ordered.into_iter().take(budget) {
        match batches
            .iter_mut()
            .find(|b| (b.chunk_x, b.chunk_y) == pixel.chunk())
        {
            Some(batch) => batch.pixels.push(pixel),
            None => batches.push(ChunkBatch {
                chunk_x: pixel.chunk_x,
                chunk_y: pixel.chunk_y,
                pixels: vec![pixel],
            }),
        }
    }

    Schedule {
        batches,
        total_wrong,
    }
}

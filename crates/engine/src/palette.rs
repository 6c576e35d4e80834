use std::collections::{BTreeSet, HashMap};

/// Palette id. `0` is transparent and never placed.
pub type ColorId = u8;

pub const TRANSPARENT: ColorId = 0;

/// Ids below this are free for every account; the rest are unlocked per user.
pub const FIRST_EXTRA_COLOR: ColorId = 32;

pub const PALETTE_LEN: usize = 64;

/// Templates paint "intentionally blank" cells with this RGB.
pub const SENTINEL_RGB: [u8; 3] = [0xDE, 0xFA, 0xCE];

/// Canonical RGBA per palette id.
pub const PALETTE: [[u8; 4]; PALETTE_LEN] = [
    [0, 0, 0, 0],         // 0 transparent
    [0, 0, 0, 255],       // 1 black
    [60, 60, 60, 255],    // 2 dark gray
    [120, 120, 120, 255], // 3 gray
    [210, 210, 210, 255], // 4 light gray
    [255, 255, 255, 255], // 5 white
    [96, 0, 24, 255],     // 6 deep red
    [237, 28, 36, 255],   // 7 red
    [255, 127, 39, 255],  // 8 orange
    [246, 170, 9, 255],   // 9 gold
    [249, 221, 59, 255],  // 10 yellow
    [255, 250, 188, 255], // 11 light yellow
    [14, 185, 104, 255],  // 12 dark green
    [19, 230, 123, 255],  // 13 green
    [135, 255, 94, 255],  // 14 light green
    [12, 129, 110, 255],  // 15 dark teal
    [16, 174, 166, 255],  // 16 teal
    [19, 225, 190, 255],  // 17 light teal
    [40, 80, 158, 255],   // 18 dark blue
    [64, 147, 228, 255],  // 19 blue
    [96, 247, 242, 255],  // 20 cyan
    [107, 80, 246, 255],  // 21 indigo
    [153, 177, 251, 255], // 22 light indigo
    [120, 12, 153, 255],  // 23 dark purple
    [170, 56, 185, 255],  // 24 purple
    [224, 159, 249, 255], // 25 light purple
    [203, 0, 122, 255],   // 26 dark pink
    [236, 31, 128, 255],  // 27 pink
    [243, 141, 169, 255], // 28 light pink
    [104, 70, 52, 255],   // 29 dark brown
    [149, 104, 42, 255],  // 30 brown
    [248, 178, 119, 255], // 31 beige
    [170, 170, 170, 255], // 32 medium gray
    [165, 14, 30, 255],   // 33 dark red
    [250, 128, 114, 255], // 34 light red
    [228, 92, 26, 255],   // 35 dark orange
    [214, 181, 148, 255], // 36 light tan
    [156, 132, 49, 255],  // 37 dark goldenrod
    [197, 173, 49, 255],  // 38 goldenrod
    [232, 212, 95, 255],  // 39 light goldenrod
    [74, 107, 58, 255],   // 40 dark olive
    [90, 148, 74, 255],   // 41 olive
    [132, 197, 115, 255], // 42 light olive
    [15, 121, 159, 255],  // 43 dark cyan
    [187, 250, 242, 255], // 44 light cyan
    [125, 199, 255, 255], // 45 light blue
    [77, 49, 184, 255],   // 46 dark indigo
    [74, 66, 132, 255],   // 47 dark slate blue
    [122, 113, 196, 255], // 48 slate blue
    [181, 174, 241, 255], // 49 light slate blue
    [219, 164, 99, 255],  // 50 light brown
    [209, 128, 81, 255],  // 51 dark beige
    [255, 197, 165, 255], // 52 light beige
    [155, 82, 73, 255],   // 53 dark peach
    [209, 128, 120, 255], // 54 peach
    [250, 182, 164, 255], // 55 light peach
    [123, 99, 82, 255],   // 56 dark tan
    [156, 132, 107, 255], // 57 tan
    [51, 57, 65, 255],    // 58 dark slate
    [109, 117, 141, 255], // 59 slate
    [179, 185, 209, 255], // 60 light slate
    [109, 100, 63, 255],  // 61 dark stone
    [148, 140, 107, 255], // 62 stone
    [205, 197, 158, 255], // 63 light stone
];

pub fn rgba(id: ColorId) -> [u8; 4] {
    PALETTE[usize::from(id) % PALETTE_LEN]
}

/// Nearest palette id for an RGBA sample (squared RGB distance, first id wins
/// ties). Alpha 0 and the sentinel RGB both map to [`TRANSPARENT`].
pub fn classify(r: u8, g: u8, b: u8, a: u8) -> ColorId {
    if a == 0 || [r, g, b] == SENTINEL_RGB {
        return TRANSPARENT;
    }
    nearest(r, g, b)
}

fn nearest(r: u8, g: u8, b: u8) -> ColorId {
    let mut best = 1;
    let mut best_dist = u32::MAX;
    for (id, c) in PALETTE.iter().enumerate().skip(1) {
        let dr = i32::from(r) - i32::from(c[0]);
        let dg = i32::from(g) - i32::from(c[1]);
        let db = i32::from(b) - i32::from(c[2]);
        let dist = (dr * dr + dg * dg + db * db) as u32;
        if dist < best_dist {
            best_dist = dist;
            best = id as ColorId;
            if dist == 0 {
                break;
            }
        }
    }
    best
}

/// Memoising front for [`classify`], scoped to one diff pass.
#[derive(Debug, Default)]
pub struct ColorCache {
    memo: HashMap<u32, ColorId>,
}

impl ColorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, px: [u8; 4]) -> ColorId {
        let [r, g, b, a] = px;
        if a == 0 {
            return TRANSPARENT;
        }
        let key = (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b);
        *self.memo.entry(key).or_insert_with(|| classify(r, g, b, a))
    }
}

/// Colors the account may place: all base colors plus each extra color whose
/// bit is set in `extra_bitmask` (read as unsigned 32-bit).
pub fn owned_colors(extra_bitmask: i64) -> BTreeSet<ColorId> {
    let mask = extra_bitmask as u32;
    let mut owned: BTreeSet<ColorId> = (0..FIRST_EXTRA_COLOR).collect();
    for bit in 0..32u8 {
        if mask & (1 << bit) != 0 {
            owned.insert(FIRST_EXTRA_COLOR + bit);
        }
    }
    owned
}

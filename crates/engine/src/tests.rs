use super::*;
use crate::palette::{rgba, PALETTE_LEN, SENTINEL_RGB};
use crate::scheduler::{is_edge, order, Bounds};
use image::{Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};
use wplacer_protocol::{ChargeSnapshot, FillMode};

fn block(w: u32, h: u32, color: ColorId) -> RgbaImage {
    RgbaImage::from_pixel(w, h, Rgba(rgba(color)))
}

fn template_at(img: &RgbaImage, x: i64, y: i64) -> Template {
    Template::from_image(img, x, y).expect("template")
}

fn empty_chunks(template: &Template) -> ChunkCache {
    template
        .referenced_chunks()
        .into_iter()
        .map(|c| (c, None))
        .collect()
}

fn base_colors() -> BTreeSet<ColorId> {
    owned_colors(0)
}

fn charges(count: f64, max: u32, recharge_time_ms: u64) -> ChargeSnapshot {
    ChargeSnapshot {
        count,
        max,
        recharge_time_ms,
    }
}

#[test]
fn palette_ids_round_trip() {
    for id in 0..PALETTE_LEN as u8 {
        let [r, g, b, a] = rgba(id);
        assert_eq!(classify(r, g, b, a), id, "palette id {id}");
    }
}

#[test]
fn zero_alpha_is_transparent() {
    for (r, g, b) in [(0, 0, 0), (255, 255, 255), (237, 28, 36), (12, 200, 7)] {
        assert_eq!(classify(r, g, b, 0), 0);
    }
}

#[test]
fn sentinel_is_transparent() {
    let [r, g, b] = SENTINEL_RGB;
    assert_eq!(classify(r, g, b, 255), 0);
    assert_eq!(classify(r, g, b, 10), 0);
}

#[test]
fn near_colors_snap_to_nearest_id() {
    assert_eq!(classify(3, 2, 1, 255), 1);
    assert_eq!(classify(250, 250, 250, 255), 5);
    assert_eq!(classify(236, 30, 38, 200), 7);
}

#[test]
fn color_cache_memoises_by_rgb() {
    let mut cache = ColorCache::new();
    assert_eq!(cache.classify([237, 28, 36, 255]), 7);
    assert_eq!(cache.classify([237, 28, 36, 128]), 7);
    assert_eq!(cache.classify([1, 2, 3, 0]), 0);
    assert_eq!(cache.classify([250, 250, 250, 255]), 5);
}

#[test]
fn owned_colors_follow_bitmask() {
    let base: BTreeSet<ColorId> = (0..32).collect();
    assert_eq!(owned_colors(0), base);

    let mut with_first = base.clone();
    with_first.insert(32);
    assert_eq!(owned_colors(0b1), with_first);

    let all: BTreeSet<ColorId> = (0..64).collect();
    assert_eq!(owned_colors(-1), all);

    let only_last = owned_colors(1 << 31);
    assert!(only_last.contains(&63));
    assert!(!only_last.contains(&62));
}

#[test]
fn template_splits_at_chunk_boundary() {
    let t = template_at(&block(4, 1, 7), 998, 5);
    let keys: Vec<TileKey> = t.chunked().keys().copied().collect();
    assert_eq!(
        keys,
        vec![
            TileKey {
                chunk_x: 0,
                chunk_y: 0,
                offset_x: 998,
                offset_y: 5
            },
            TileKey {
                chunk_x: 1,
                chunk_y: 0,
                offset_x: 0,
                offset_y: 5
            },
        ]
    );
    assert_eq!(t.chunked()[&keys[0]].dimensions(), (6, 3));
    assert_eq!(t.referenced_chunks(), vec![(0, 0), (1, 0)]);
    assert_eq!(t.pixel_count(), 4);
}

#[test]
fn transparent_template_has_no_pixels() {
    let key = TileKey {
        chunk_x: 0,
        chunk_y: 0,
        offset_x: 10,
        offset_y: 10,
    };
    let t = Template::from_tiles([(key, RgbaImage::new(9, 9))]);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let result = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    assert!(result.wrong_pixels.is_empty());
    assert!(result.all_template_pixels.is_empty());
}

#[test]
fn empty_chunk_makes_every_pixel_wrong() {
    let t = template_at(&block(3, 2, 7), 100, 200);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let result = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    assert_eq!(result.wrong_pixels.len(), 6);
    assert_eq!(result.all_template_pixels.len(), 6);
    let first = result.wrong_pixels[0];
    assert_eq!(
        (first.chunk_x, first.local_x, first.local_y, first.color),
        (0, 100, 200, 7)
    );

    // A chunk absent from the cache reads the same way.
    let none = ChunkCache::new();
    let again = DiffEngine::new(&t, &none, &owned).run(DiffOptions::default());
    assert_eq!(again.wrong_pixels, result.wrong_pixels);
}

#[test]
fn matching_live_pixels_are_skipped() {
    let t = template_at(&block(2, 2, 7), 1, 1);
    let mut live = RgbaImage::new(3, 3);
    live.put_pixel(1, 1, Rgba(rgba(7)));
    live.put_pixel(2, 1, Rgba(rgba(7)));
    live.put_pixel(1, 2, Rgba(rgba(5)));
    let chunks: ChunkCache = [((0, 0), Some(live))].into_iter().collect();
    let owned = base_colors();

    let result = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    let wrong: Vec<(i64, i64)> = result.wrong_pixels.iter().map(|p| p.key()).collect();
    assert_eq!(wrong, vec![(1, 2), (2, 2)]);
}

#[test]
fn pixels_outside_live_bitmap_need_placement() {
    let t = template_at(&block(1, 1, 7), 50, 50);
    let live = RgbaImage::from_pixel(10, 10, Rgba(rgba(7)));
    let chunks: ChunkCache = [((0, 0), Some(live))].into_iter().collect();
    let owned = base_colors();
    let result = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    assert_eq!(result.wrong_pixels.len(), 1);
}

#[test]
fn unowned_colors_count_as_coverage_only() {
    let t = template_at(&block(2, 1, 40), 0, 0);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let result = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    assert!(result.wrong_pixels.is_empty());
    assert_eq!(result.all_template_pixels.len(), 2);
    assert!(result.nothing_owned());

    let owned = owned_colors(1 << (40 - 32));
    let result = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    assert_eq!(result.wrong_pixels.len(), 2);
}

#[test]
fn sentinel_pixels_are_never_placed() {
    let [r, g, b] = SENTINEL_RGB;
    let img = RgbaImage::from_pixel(2, 2, Rgba([r, g, b, 255]));
    let t = template_at(&img, 0, 0);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let result = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    assert!(result.wrong_pixels.is_empty());
    assert_eq!(result.all_template_pixels.len(), 4);
}

#[test]
fn diff_is_idempotent() {
    let mut img = block(4, 4, 7);
    img.put_pixel(2, 2, Rgba([0, 0, 0, 0]));
    let t = template_at(&img, 995, 3);
    let mut live = RgbaImage::new(1000, 10);
    live.put_pixel(996, 3, Rgba(rgba(7)));
    let chunks: ChunkCache = [((0, 0), Some(live)), ((1, 0), None)].into_iter().collect();
    let owned = base_colors();

    let engine = DiffEngine::new(&t, &chunks, &owned);
    let a = engine.run(DiffOptions::default());
    let b = engine.run(DiffOptions::default());
    assert_eq!(a.wrong_pixels, b.wrong_pixels);
    assert_eq!(a.all_template_pixels, b.all_template_pixels);
    assert_eq!(a.wrong_pixels.len(), 14);
}

#[test]
fn ledger_excludes_recently_placed() {
    let t = template_at(&block(2, 1, 7), 0, 0);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let now = Instant::now();
    let mut ledger = PlacedLedger::default();
    ledger.record((0, 0), now);

    let result = DiffEngine::new(&t, &chunks, &owned)
        .excluding(&ledger, now)
        .run(DiffOptions::default());
    let wrong: Vec<(i64, i64)> = result.wrong_pixels.iter().map(|p| p.key()).collect();
    assert_eq!(wrong, vec![(1, 0)]);
    assert_eq!(result.all_template_pixels.len(), 2);
}

#[test]
fn soft_target_only_applies_in_random_mode() {
    // Two tiles: (0,0) holds x=999, (1,0) holds x=1000.
    let t = template_at(&block(2, 1, 7), 999, 0);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let engine = DiffEngine::new(&t, &chunks, &owned);

    let random = engine.run(DiffOptions {
        mode: FillMode::Random,
        soft_target: Some(1),
    });
    assert!(random.truncated);
    assert_eq!(random.wrong_pixels.len(), 1);
    assert_eq!(random.all_template_pixels.len(), 2);

    let scan = engine.run(DiffOptions {
        mode: FillMode::Scan,
        soft_target: Some(1),
    });
    assert!(!scan.truncated);
    assert_eq!(scan.wrong_pixels.len(), 2);
}

#[test]
fn single_pixel_is_an_edge() {
    let covered: HashSet<PixelKey> = [(5, 5)].into_iter().collect();
    let bounds = Bounds::of(&covered).unwrap();
    assert!(is_edge((5, 5), &covered, &bounds));
}

#[test]
fn three_by_three_block_has_one_interior_pixel() {
    let t = template_at(&block(3, 3, 7), 10, 10);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let diff = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    let bounds = Bounds::of(&diff.all_template_pixels).unwrap();

    let edges: Vec<PixelKey> = diff
        .wrong_pixels
        .iter()
        .map(|p| p.key())
        .filter(|k| is_edge(*k, &diff.all_template_pixels, &bounds))
        .collect();
    assert_eq!(edges.len(), 8);
    assert!(!edges.contains(&(11, 11)));

    let ordered = order(
        &diff.wrong_pixels,
        &diff.all_template_pixels,
        FillMode::Scan,
        &mut StdRng::seed_from_u64(1),
    );
    assert_eq!(ordered.last().map(|p| p.key()), Some((11, 11)));
}

#[test]
fn hole_neighbours_are_edges() {
    let mut img = block(5, 5, 7);
    img.put_pixel(2, 2, Rgba([0, 0, 0, 0]));
    let t = template_at(&img, 0, 0);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let diff = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    let bounds = Bounds::of(&diff.all_template_pixels).unwrap();
    for key in [(1, 1), (2, 1), (3, 3)] {
        assert!(is_edge(key, &diff.all_template_pixels, &bounds), "{key:?}");
    }
    assert_eq!(diff.wrong_pixels.len(), 24);
    let interior = diff
        .wrong_pixels
        .iter()
        .filter(|p| !is_edge(p.key(), &diff.all_template_pixels, &bounds))
        .count();
    assert_eq!(interior, 0);
}

#[test]
fn scan_schedule_is_sorted_and_stable() {
    let t = template_at(&block(5, 5, 7), 20, 30);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let diff = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());

    let a = schedule(&diff, FillMode::Scan, 100, &mut StdRng::seed_from_u64(1));
    let b = schedule(&diff, FillMode::Scan, 100, &mut StdRng::seed_from_u64(99));
    assert_eq!(a, b);
    assert_eq!(a.total_wrong, 25);
    assert_eq!(a.batches.len(), 1);

    let pixels = &a.batches[0].pixels;
    let (edges, interior) = pixels.split_at(16);
    for group in [edges, interior] {
        let keys: Vec<(i64, i64)> = group.iter().map(|p| (p.global_y, p.global_x)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
    assert!(interior.iter().all(|p| (21..=23).contains(&p.global_x)));
}

#[test]
fn random_schedule_is_edge_first_permutation() {
    let t = template_at(&block(5, 5, 7), 20, 30);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let diff = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());
    let bounds = Bounds::of(&diff.all_template_pixels).unwrap();

    let s = schedule(&diff, FillMode::Random, 100, &mut StdRng::seed_from_u64(7));
    let pixels = &s.batches[0].pixels;
    assert_eq!(pixels.len(), 25);

    let flags: Vec<bool> = pixels
        .iter()
        .map(|p| is_edge(p.key(), &diff.all_template_pixels, &bounds))
        .collect();
    assert!(flags[..16].iter().all(|e| *e));
    assert!(flags[16..].iter().all(|e| !*e));

    let got: HashSet<PixelKey> = pixels.iter().map(|p| p.key()).collect();
    let want: HashSet<PixelKey> = diff.wrong_pixels.iter().map(|p| p.key()).collect();
    assert_eq!(got, want);
}

#[test]
fn budget_bounds_scheduled_not_total() {
    let t = template_at(&block(3, 1, 7), 998, 0);
    let chunks = empty_chunks(&t);
    let owned = base_colors();
    let diff = DiffEngine::new(&t, &chunks, &owned).run(DiffOptions::default());

    let s = schedule(&diff, FillMode::Scan, 2, &mut StdRng::seed_from_u64(1));
    assert_eq!(s.total_wrong, 3);
    assert_eq!(s.scheduled(), 2);

    let full = schedule(&diff, FillMode::Scan, 10, &mut StdRng::seed_from_u64(1));
    let chunks: Vec<(i32, i32)> = full.batches.iter().map(|b| (b.chunk_x, b.chunk_y)).collect();
    assert_eq!(chunks, vec![(0, 0), (1, 0)]);
    assert_eq!(full.batches[0].coords(), vec![998, 0, 999, 0]);
    assert_eq!(full.batches[1].coords(), vec![0, 0]);
    assert_eq!(full.batches[1].colors(), vec![7]);

    let none = schedule(&diff, FillMode::Scan, 0, &mut StdRng::seed_from_u64(1));
    assert!(none.batches.is_empty());
    assert_eq!(none.total_wrong, 3);
}

#[test]
fn no_wait_once_limit_met() {
    let c = charges(5.0, 10, 30_000);
    assert!(!charges::should_wait(&c, 5, 3));
    assert!(!charges::should_wait(&c, 5, 500));
    assert!(!charges::should_wait(&c, 10, 4));
    assert!(charges::should_wait(&c, 10, 6));
}

#[test]
fn wait_time_counts_partial_and_full_charges() {
    let c = charges(2.5, 20, 30_000);
    // min(5, 10) = 5 wanted, 2 on hand: 0.5 of the current charge + 2 more.
    assert_eq!(
        charges::wait_time(&c, 10, 5),
        Duration::from_millis(15_000 + 2 * 30_000)
    );

    let c = charges(4.25, 20, 30_000);
    assert_eq!(charges::wait_time(&c, 10, 5), Duration::from_millis(22_500));
    assert_eq!(charges::wait_time(&c, 10, 3), Duration::ZERO);
}

#[test]
fn wait_time_is_capped_by_limit() {
    let c = charges(0.0, 50, 1_000);
    assert_eq!(charges::wait_time(&c, 3, 100), Duration::from_millis(3_000));
    assert_eq!(charges::budget(&charges(7.9, 50, 1_000), 3), 3);
    assert_eq!(charges::budget(&charges(7.9, 50, 1_000), 30), 7);
}

#[test]
fn ledger_expires_and_evicts() {
    let start = Instant::now();
    let mut ledger = PlacedLedger::new(Duration::from_secs(10), 2);
    ledger.record((0, 0), start);
    ledger.record((1, 0), start);
    ledger.record((2, 0), start + Duration::from_secs(1));
    assert_eq!(ledger.len(), 2);
    assert!(!ledger.contains((0, 0), start));
    assert!(ledger.contains((1, 0), start + Duration::from_secs(9)));
    assert!(!ledger.contains((1, 0), start + Duration::from_secs(10)));

    ledger.purge(start + Duration::from_secs(10));
    assert_eq!(ledger.len(), 1);
    ledger.clear();
    assert!(ledger.is_empty());
}

#[test]
fn ledger_stays_bounded_when_one_pixel_is_recorded_repeatedly() {
    let start = Instant::now();
    let mut ledger = PlacedLedger::new(Duration::from_secs(1), 10);
    for i in 0..10_000u64 {
        ledger.record((3, 4), start + Duration::from_secs(2 * i));
    }
    assert_eq!(ledger.len(), 1);
    assert!(ledger.queued() <= 10);

    let mut ledger = PlacedLedger::new(Duration::from_secs(600), 4);
    for i in 0..50u64 {
        ledger.record((0, 0), start + Duration::from_millis(i));
    }
    ledger.record((1, 0), start + Duration::from_millis(50));
    assert!(ledger.queued() <= 4);
    assert!(ledger.contains((0, 0), start + Duration::from_secs(1)));
    assert!(ledger.contains((1, 0), start + Duration::from_secs(1)));
}

#[test]
fn eta_counts_every_missing_charge() {
    let c = charges(2.25, 10, 30_000);
    assert_eq!(charges::eta(&c, 2), Duration::ZERO);
    assert_eq!(charges::eta(&c, 3), Duration::from_millis(22_500));
    assert_eq!(charges::eta(&c, 40), Duration::from_millis(22_500 + 37 * 30_000));
    assert_eq!(charges::time_to_accrue(&c, 0), Duration::ZERO);
}

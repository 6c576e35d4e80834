//! The supervisory loop: each cycle decides whether to place pixels, wait for
//! charges, protect a finished template, or stop.

use crate::fetcher::{fetch_all, ChunkSource};
use crate::host::HostPage;
use crate::intercept::Dispatch;
use crate::placer::{PixelPlacer, PlacerTimings};
use crate::status::Reporter;
use crate::transport::Transport;
use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use wplacer_engine::charges;
use wplacer_engine::{
    owned_colors, schedule, DiffEngine, DiffOptions, PlacedLedger, Schedule, Template,
};
use wplacer_protocol::{ChargeSnapshot, FillMode, FillState, Settings, UserSnapshot};

#[derive(Debug, Clone, Copy)]
pub struct AutoFillTimings {
    pub cycle_error_delay: Duration,
    pub missing_charges_retry: Duration,
    pub protect_interval: Duration,
    pub protect_delay_unit: Duration,
    pub repair_settle: Duration,
    pub wait_tick: Duration,
    pub wait_refresh: Duration,
    pub placer: PlacerTimings,
}

impl Default for AutoFillTimings {
    fn default() -> Self {
        Self {
            cycle_error_delay: Duration::from_secs(10),
            missing_charges_retry: Duration::from_secs(5),
            protect_interval: Duration::from_secs(10),
            protect_delay_unit: Duration::from_secs(10),
            repair_settle: Duration::from_secs(5),
            wait_tick: Duration::from_secs(1),
            wait_refresh: Duration::from_secs(5),
            placer: PlacerTimings::default(),
        }
    }
}

/// What one cycle should do.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    PlacePixels(Schedule),
    /// `pixels_needed` is `None` when there was no charge data to go on.
    WaitForCharges {
        wait: Duration,
        pixels_needed: Option<usize>,
    },
    Protect,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Placed(usize),
    Waited,
    Protecting,
    Complete,
    /// A later start or stop took over while this cycle was deciding.
    Superseded,
}

/// Random mode stops diffing early once this many wrong pixels are known.
pub fn soft_target(mode: FillMode, budget: usize) -> Option<usize> {
    match mode {
        FillMode::Random if budget > 0 => Some((budget * 4).max(1000)),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct Flags {
    /// Bumped on every start and stop; a loop only runs while it holds the
    /// current value.
    generation: AtomicU64,
    running: AtomicBool,
    protecting: AtomicBool,
    repairing: AtomicBool,
    checking: AtomicBool,
}

/// Clears a flag when dropped.
struct Raised<'a>(&'a AtomicBool);

impl Drop for Raised<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Inner<H, T, C> {
    host: Arc<H>,
    chunks: Arc<C>,
    template: RwLock<Option<Arc<Template>>>,
    settings: watch::Receiver<Settings>,
    reporter: Arc<dyn Reporter>,
    placer: tokio::sync::Mutex<PixelPlacer<H, T>>,
    ledger: Mutex<PlacedLedger>,
    rng: Mutex<StdRng>,
    state: Mutex<FillState>,
    flags: Flags,
    protect_task: Mutex<Option<JoinHandle<()>>>,
    timings: AutoFillTimings,
}

pub struct AutoFill<H, T, C> {
    inner: Arc<Inner<H, T, C>>,
}

impl<H, T, C> Clone for AutoFill<H, T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<X>(m: &Mutex<X>) -> MutexGuard<'_, X> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn now_std() -> std::time::Instant {
    Instant::now().into_std()
}

impl<H: HostPage, T: Transport, C: ChunkSource> AutoFill<H, T, C> {
    pub fn new(
        host: Arc<H>,
        dispatch: Arc<Dispatch<T>>,
        chunks: Arc<C>,
        settings: watch::Receiver<Settings>,
        reporter: Arc<dyn Reporter>,
        timings: AutoFillTimings,
    ) -> Self {
        let placer = PixelPlacer::new(
            Arc::clone(&host),
            dispatch,
            Arc::clone(&reporter),
            timings.placer,
        );
        Self {
            inner: Arc::new(Inner {
                host,
                chunks,
                template: RwLock::new(None),
                settings,
                reporter,
                placer: tokio::sync::Mutex::new(placer),
                ledger: Mutex::new(PlacedLedger::default()),
                rng: Mutex::new(StdRng::from_entropy()),
                state: Mutex::new(FillState::Idle),
                flags: Flags::default(),
                protect_task: Mutex::new(None),
                timings,
            }),
        }
    }

    /// Fix the Random-mode shuffle.
    pub fn seed(&self, seed: u64) {
        *lock(&self.inner.rng) = StdRng::seed_from_u64(seed);
    }

    pub fn set_template(&self, template: Option<Template>) {
        let mut slot = self
            .inner
            .template
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *slot = template.map(Arc::new);
    }

    pub fn template(&self) -> Option<Arc<Template>> {
        let slot = self
            .inner
            .template
            .read()
            .unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }

    pub fn state(&self) -> FillState {
        *lock(&self.inner.state)
    }

    pub fn is_running(&self) -> bool {
        self.inner.flags.running.load(Ordering::SeqCst)
    }

    pub fn is_protecting(&self) -> bool {
        self.inner.flags.protecting.load(Ordering::SeqCst)
    }

    pub fn placed_count(&self) -> usize {
        lock(&self.inner.ledger).len()
    }

    fn generation(&self) -> u64 {
        self.inner.flags.generation.load(Ordering::SeqCst)
    }

    /// Running, and not superseded by a later start or stop.
    fn live(&self, generation: u64) -> bool {
        self.is_running() && self.generation() == generation
    }

    fn set_state(&self, state: FillState) {
        let mut current = lock(&self.inner.state);
        if *current != state {
            log::debug!("auto-fill state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    fn output(&self, message: &str) {
        self.inner.reporter.output(message);
    }

    /// Start when idle, stop when running.
    pub async fn toggle(&self) -> FillState {
        if self.is_running() {
            self.stop().await;
        } else {
            self.start();
        }
        self.state()
    }

    /// Spawn the loop. False if it was already running.
    pub fn start(&self) -> bool {
        if self.inner.flags.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let generation = self.inner.flags.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(FillState::Filling);
        self.output("auto-fill started");
        tokio::spawn(self.clone().run_loop(generation));
        true
    }

    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.flags.generation.fetch_add(1, Ordering::SeqCst);
        inner.flags.running.store(false, Ordering::SeqCst);
        inner.flags.protecting.store(false, Ordering::SeqCst);
        let task = lock(&inner.protect_task).take();
        if let Some(task) = task {
            task.abort();
        }
        self.set_state(FillState::Idle);
        self.output("auto-fill stopped");

        if let Err(e) = inner.host.close_paint_menu().await {
            log::warn!("could not close paint menu: {e:#}");
        }
    }

    async fn run_loop(self, generation: u64) {
        while self.live(generation) {
            if self.inner.flags.repairing.load(Ordering::SeqCst) {
                tokio::time::sleep(self.inner.timings.wait_tick).await;
                continue;
            }
            match self.cycle(generation).await {
                Ok(CycleOutcome::Protecting | CycleOutcome::Complete | CycleOutcome::Superseded) => {
                    break
                }
                Ok(_) => {}
                Err(e) => {
                    let delay = self.inner.timings.cycle_error_delay;
                    log::warn!("auto-fill cycle failed: {e:#}");
                    self.output(&format!("error: {e:#}; retrying in {}s", delay.as_secs()));
                    self.sleep_while_live(delay, generation).await;
                }
            }
        }
        if self.generation() == generation && !self.is_running() && !self.is_protecting() {
            self.set_state(FillState::Idle);
        }
        log::debug!("auto-fill loop {generation} exited");
    }

    /// One full decision-and-act cycle.
    pub async fn step(&self) -> anyhow::Result<CycleOutcome> {
        self.cycle(self.generation()).await
    }

    async fn cycle(&self, generation: u64) -> anyhow::Result<CycleOutcome> {
        let decision = self.analyze_situation().await?;
        if self.generation() != generation {
            return Ok(CycleOutcome::Superseded);
        }
        match decision {
            Decision::PlacePixels(schedule) => {
                self.set_state(FillState::Filling);
                let placed = self.place_schedule(&schedule).await?;
                Ok(CycleOutcome::Placed(placed))
            }
            Decision::WaitForCharges {
                wait,
                pixels_needed,
            } => {
                self.set_state(FillState::WaitingCharges);
                match pixels_needed {
                    Some(n) => self.output(&format!(
                        "{n} pixels left, waiting {}s for charges",
                        wait.as_secs()
                    )),
                    None => self.output("no charge data yet, retrying shortly"),
                }
                self.wait_for_charges(wait, pixels_needed, generation).await;
                Ok(CycleOutcome::Waited)
            }
            Decision::Protect => {
                self.begin_protection();
                Ok(CycleOutcome::Protecting)
            }
            Decision::Complete => {
                self.output("template complete");
                self.inner.flags.running.store(false, Ordering::SeqCst);
                self.set_state(FillState::Idle);
                Ok(CycleOutcome::Complete)
            }
        }
    }

    pub async fn analyze_situation(&self) -> anyhow::Result<Decision> {
        let inner = &self.inner;
        let missing = Decision::WaitForCharges {
            wait: inner.timings.missing_charges_retry,
            pixels_needed: None,
        };
        let Some(user) = inner.host.refresh_user().await else {
            return Ok(missing);
        };
        let Some(charges) = user.charges else {
            return Ok(missing);
        };

        let settings = inner.settings.borrow().clone();
        let budget = charges::budget(&charges, settings.charge_limit);
        let schedule = self.survey(&user, &settings, budget).await?;
        let total = schedule.total_wrong;
        self.report_progress(total, &charges);

        if total == 0 {
            lock(&inner.ledger).clear();
            return Ok(if settings.protect {
                Decision::Protect
            } else {
                Decision::Complete
            });
        }

        let limit = inner.settings.borrow().charge_limit;
        if charges::should_wait(&charges, limit, total) {
            return Ok(Decision::WaitForCharges {
                wait: charges::wait_time(&charges, limit, total),
                pixels_needed: Some(total),
            });
        }
        Ok(Decision::PlacePixels(schedule))
    }

    /// Diff the template against freshly fetched chunks and schedule up to
    /// `budget` pixels.
    async fn survey(
        &self,
        user: &UserSnapshot,
        settings: &Settings,
        budget: usize,
    ) -> anyhow::Result<Schedule> {
        let inner = &self.inner;
        if !settings.templates_should_be_drawn {
            bail!("templates are hidden; enable template drawing to auto-fill");
        }
        let template = self.template().context("no template loaded")?;
        let owned = owned_colors(user.extra_colors_bitmap);
        let cache = fetch_all(&inner.chunks, &template.referenced_chunks()).await;

        let opts = DiffOptions {
            mode: settings.mode,
            soft_target: soft_target(settings.mode, budget),
        };
        let diff = {
            let now = now_std();
            let mut ledger = lock(&inner.ledger);
            ledger.purge(now);
            DiffEngine::new(&template, &cache, &owned)
                .excluding(&ledger, now)
                .run(opts)
        };
        if diff.nothing_owned() {
            bail!(
                "none of the template's {} colored pixels use an owned color",
                diff.unowned
            );
        }
        if diff.truncated {
            log::debug!("diff stopped early at {} wrong pixels", diff.wrong_pixels.len());
        }

        let mut rng = lock(&inner.rng);
        Ok(schedule(&diff, settings.mode, budget, &mut *rng))
    }

    async fn place_schedule(&self, schedule: &Schedule) -> anyhow::Result<usize> {
        let inner = &self.inner;
        let mut placer = inner.placer.lock().await;
        let mut placed = 0;
        for batch in &schedule.batches {
            placer.place(batch).await.with_context(|| {
                format!(
                    "placing {} pixels on chunk {},{}",
                    batch.len(),
                    batch.chunk_x,
                    batch.chunk_y
                )
            })?;
            {
                let now = now_std();
                let mut ledger = lock(&inner.ledger);
                for pixel in &batch.pixels {
                    ledger.record(pixel.key(), now);
                }
            }
            placed += batch.len();
            self.output(&format!(
                "placed {} pixels on chunk {},{}",
                batch.len(),
                batch.chunk_x,
                batch.chunk_y
            ));
        }
        Ok(placed)
    }

    fn report_progress(&self, remaining: usize, charges: &ChargeSnapshot) {
        self.inner
            .reporter
            .progress(remaining, charges::eta(charges, remaining));
    }

    /// Sleep up to `wait`, re-evaluating on limit changes and periodically
    /// against fresh charge data. Returns early when stopped or when enough
    /// charges have accrued.
    async fn wait_for_charges(
        &self,
        wait: Duration,
        pixels_needed: Option<usize>,
        generation: u64,
    ) {
        let inner = &self.inner;
        let timings = inner.timings;
        let mut settings = inner.settings.clone();
        let mut limit = settings.borrow_and_update().charge_limit;
        let mut watching = true;
        let mut deadline = Instant::now() + wait;
        let mut last_refresh = Instant::now();

        while self.live(generation) {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let tick = (deadline - now).min(timings.wait_tick);
            if watching {
                tokio::select! {
                    _ = tokio::time::sleep(tick) => {}
                    changed = settings.changed() => {
                        watching = changed.is_ok();
                    }
                }
            } else {
                tokio::time::sleep(tick).await;
            }

            let previous_limit = limit;
            limit = settings.borrow_and_update().charge_limit;
            let limit_changed = limit != previous_limit;
            if limit_changed {
                self.output(&format!("charge limit now {limit}"));
            }

            let Some(needed) = pixels_needed else {
                continue;
            };
            if !limit_changed && last_refresh.elapsed() < timings.wait_refresh {
                continue;
            }
            last_refresh = Instant::now();

            let Some(charges) = inner.host.refresh_user().await.and_then(|u| u.charges) else {
                continue;
            };
            if !charges::should_wait(&charges, limit, needed) {
                log::debug!("charges ready ({:.2}/{limit})", charges.count);
                return;
            }
            let remaining = charges::wait_time(&charges, limit, needed);
            let previous = deadline.saturating_duration_since(Instant::now());
            deadline = Instant::now() + remaining;
            self.report_progress(needed, &charges);
            if remaining.abs_diff(previous) >= timings.wait_tick {
                log::debug!(
                    "charge wait adjusted {}s -> {}s",
                    previous.as_secs(),
                    remaining.as_secs()
                );
            }
        }
    }

    /// Sleep in ticks; false if stopped or restarted before `total` elapsed.
    async fn sleep_while_live(&self, total: Duration, generation: u64) -> bool {
        let deadline = Instant::now() + total;
        while self.live(generation) {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(self.inner.timings.wait_tick)).await;
        }
        false
    }

    fn begin_protection(&self) {
        let inner = &self.inner;
        inner.flags.protecting.store(true, Ordering::SeqCst);
        self.set_state(FillState::Protecting);

        let mut task = lock(&inner.protect_task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.output(&format!(
            "template complete, checking for damage every {}s",
            inner.timings.protect_interval.as_secs()
        ));
        *task = Some(tokio::spawn(self.clone().protect_loop()));
    }

    async fn protect_loop(self) {
        let mut ticker = tokio::time::interval(self.inner.timings.protect_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !self.is_running() || !self.is_protecting() {
                break;
            }
            if !self.inner.settings.borrow().protect {
                self.leave_protection();
                break;
            }
            let this = self.clone();
            tokio::spawn(async move { this.run_protection_check().await });
        }
    }

    fn leave_protection(&self) {
        let flags = &self.inner.flags;
        flags.generation.fetch_add(1, Ordering::SeqCst);
        flags.protecting.store(false, Ordering::SeqCst);
        flags.running.store(false, Ordering::SeqCst);
        self.set_state(FillState::Idle);
        self.output("protection disabled, auto-fill stopped");
    }

    async fn run_protection_check(&self) {
        let checking = &self.inner.flags.checking;
        if checking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("previous protection check still running");
            return;
        }
        let _checking = Raised(checking);
        if let Err(e) = self.check_for_damage().await {
            log::warn!("protection check failed: {e:#}");
            self.output(&format!("protection check failed: {e:#}"));
        }
    }

    /// Wrong pixels right now, without scheduling any.
    pub async fn damage_count(&self) -> anyhow::Result<usize> {
        let user = self
            .inner
            .host
            .refresh_user()
            .await
            .context("no user data")?;
        let settings = self.inner.settings.borrow().clone();
        Ok(self.survey(&user, &settings, 0).await?.total_wrong)
    }

    /// One protection pass. Returns how many pixels were repaired.
    pub async fn check_for_damage(&self) -> anyhow::Result<usize> {
        let inner = &self.inner;
        let generation = self.generation();
        if inner.flags.repairing.load(Ordering::SeqCst) || !inner.settings.borrow().protect {
            return Ok(0);
        }
        let damaged = self.damage_count().await?;
        if damaged == 0 {
            return Ok(0);
        }
        self.output(&format!("damage detected: {damaged} pixels"));

        let units = inner.settings.borrow().protection_delay_units;
        if units > 0 {
            let delay = inner.timings.protect_delay_unit * units;
            self.output(&format!("waiting {}s before repairing", delay.as_secs()));
            if !self.sleep_while_live(delay, generation).await
                || !self.is_protecting()
                || !inner.settings.borrow().protect
            {
                return Ok(0);
            }
            let still = self.damage_count().await?;
            if still == 0 {
                self.output("damage was fixed by someone else");
                return Ok(0);
            } else if still < damaged {
                self.output(&format!("damage partially fixed: {damaged} -> {still} pixels"));
            } else {
                self.output(&format!("damage still present: {still} pixels"));
            }
        }

        inner.flags.repairing.store(true, Ordering::SeqCst);
        let _repairing = Raised(&inner.flags.repairing);
        let placed = self.repair().await?;
        if placed > 0 {
            self.output(&format!("repaired {placed} pixels"));
            tokio::time::sleep(inner.timings.repair_settle).await;
        }
        Ok(placed)
    }

    async fn repair(&self) -> anyhow::Result<usize> {
        let inner = &self.inner;
        let Some(user) = inner.host.refresh_user().await else {
            self.output("no user data, repair skipped");
            return Ok(0);
        };
        let Some(charges) = user.charges else {
            self.output("no charge data, repair skipped");
            return Ok(0);
        };
        let settings = inner.settings.borrow().clone();
        let budget = charges::budget(&charges, settings.charge_limit);
        if budget == 0 {
            self.output("no charges available for repair");
            return Ok(0);
        }
        let schedule = self.survey(&user, &settings, budget).await?;
        self.place_schedule(&schedule).await
    }
}

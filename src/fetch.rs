use std::{
    collections::{HashMap, HashSet},
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
};

use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use log::{error, info, warn};

use crate::{
    backfill,
    domain::{Account, Activity, Host, RepoRef},
    github::{self, FetchError, RawEvent, SearchItem},
    pipeline,
};

/// Selects the report's time window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamedRange {
    Today,
    Yesterday,
    Last7Days,
}

impl NamedRange {
    pub fn label(&self) -> &'static str {
        match self {
            NamedRange::Today => "Today",
            NamedRange::Yesterday => "Yesterday",
            NamedRange::Last7Days => "Last 7 days",
        }
    }

    /// Report window computed in the machine's local timezone, normalized to
    /// UTC for comparisons against event timestamps.
    pub fn window(&self, now: DateTime<Local>) -> (DateTime<Utc>, DateTime<Utc>) {
        let today_start = local_midnight(now);
        let (since, until) = match self {
            NamedRange::Today => (today_start, now),
            NamedRange::Yesterday => (today_start - Duration::days(1), today_start),
            NamedRange::Last7Days => (today_start - Duration::days(7), today_start),
        };
        (since.with_timezone(&Utc), until.with_timezone(&Utc))
    }

    pub fn store_kind(&self) -> StoreKind {
        match self {
            NamedRange::Today => StoreKind::Today,
            NamedRange::Yesterday | NamedRange::Last7Days => StoreKind::Past,
        }
    }
}

fn local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        // Midnight may not exist on DST transition days.
        .unwrap_or(now)
}

/// The "today" and "past" activity collections are tracked independently so
/// switching ranges does not refetch data already loaded for the other one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Today,
    Past,
}

#[derive(Default)]
struct ReportStore {
    activities: Vec<Activity>,
    loaded: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    FetchingPrimary,
    Backfilling,
    Ready,
    Failed,
}

/// Messages for the presentation boundary, drained once per UI frame.
#[derive(Clone, Debug)]
pub enum StoreEvent {
    /// A backfill group merged its resolved titles into the store.
    TitlesMerged { repo: RepoRef, updated: usize },
    /// Every request launched for the cycle has completed.
    CycleReady { store: StoreKind },
    /// The primary fetch failed and the cycle terminated.
    CycleFailed { message: String, rate_limited: bool },
    /// Surfaced at most once per cycle, however many requests hit the limit.
    RateLimited { message: String },
    /// No account or no repositories; informational, not an error.
    NotConfigured { message: String },
}

type FetchResult<T> = Result<T, FetchError>;

struct PendingFetch<T> {
    receiver: Receiver<FetchResult<T>>,
}

impl<T: Send + 'static> PendingFetch<T> {
    fn spawn(task: impl FnOnce() -> FetchResult<T> + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(task());
        });
        Self { receiver: rx }
    }

    fn try_take(&self) -> Option<FetchResult<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(FetchError::BackgroundWorkerGone)),
        }
    }
}

struct BackfillRequest {
    repo: RepoRef,
    pending: PendingFetch<HashMap<u64, String>>,
}

struct ActiveCycle {
    store: StoreKind,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    phase: CyclePhase,
    primary: Option<PendingFetch<Vec<RawEvent>>>,
    search: Option<PendingFetch<Vec<SearchItem>>>,
    backfill: Vec<BackfillRequest>,
    allowlist: HashSet<String>,
    token: Option<String>,
    error: Option<String>,
    rate_limited: bool,
    rate_limit_reported: bool,
}

impl ActiveCycle {
    fn outstanding(&self) -> bool {
        self.primary.is_some() || self.search.is_some() || !self.backfill.is_empty()
    }
}

/// Owns the two activity stores and drives one fetch cycle at a time:
/// primary fetch, then classification and filtering, then per-repository
/// title backfill, then ready. All completions are polled from the UI
/// thread, so no store is ever touched from two threads.
pub struct FetchCoordinator {
    today: ReportStore,
    past: ReportStore,
    cycle: Option<ActiveCycle>,
    events: Vec<StoreEvent>,
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self {
            today: ReportStore::default(),
            past: ReportStore::default(),
            cycle: None,
            events: Vec::new(),
        }
    }

    pub fn activities(&self, kind: StoreKind) -> &[Activity] {
        match kind {
            StoreKind::Today => &self.today.activities,
            StoreKind::Past => &self.past.activities,
        }
    }

    pub fn is_loaded(&self, kind: StoreKind) -> bool {
        match kind {
            StoreKind::Today => self.today.loaded,
            StoreKind::Past => self.past.loaded,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.cycle.as_ref().map_or(CyclePhase::Idle, |c| c.phase)
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.phase(),
            CyclePhase::FetchingPrimary | CyclePhase::Backfilling
        )
    }

    pub fn take_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.events)
    }

    /// Starts a fetch cycle for `range` against a snapshot of the current
    /// configuration. A non-forced refresh reuses an already-populated store
    /// and fetches nothing; a forced refresh clears the target store first.
    /// Starting a new cycle drops a superseded one along with its channels,
    /// so stale completions are discarded rather than merged.
    pub fn refresh(&mut self, range: NamedRange, forced: bool, accounts: &[Account], repos: &[RepoRef]) {
        let kind = range.store_kind();
        if !forced && self.is_loaded(kind) {
            return;
        }

        let Some(account) = accounts.iter().find(|a| a.host == Host::Github) else {
            info!("no GitHub account configured; skipping fetch");
            self.events.push(StoreEvent::NotConfigured {
                message: "Add a GitHub account before generating a report.".to_owned(),
            });
            return;
        };
        if repos.is_empty() {
            info!("no repositories configured; skipping fetch");
            self.events.push(StoreEvent::NotConfigured {
                message: "Add at least one repository to report on.".to_owned(),
            });
            return;
        }

        if forced {
            let store = self.store_slot(kind);
            store.activities.clear();
            store.loaded = false;
        }

        let (since, until) = range.window(Local::now());
        let allowlist: HashSet<String> = repos.iter().map(RepoRef::long_name).collect();

        let username = account.username.clone();
        let token = account.token.clone();
        let primary = PendingFetch::spawn(move || {
            let client = github::build_client()?;
            github::fetch_user_events(&client, &username, token.as_deref())
        });

        // The events feed misses PRs opened in the past and still open with
        // no qualifying event in the window; a search fills today's plans.
        let search = (kind == StoreKind::Today).then(|| {
            let username = account.username.clone();
            let token = account.token.clone();
            let repos = repos.to_vec();
            PendingFetch::spawn(move || {
                let client = github::build_client()?;
                github::search_authored_prs(&client, token.as_deref(), &username, &repos)
            })
        });

        info!(
            "starting fetch cycle for {} [{since} .. {until})",
            range.label()
        );
        self.cycle = Some(ActiveCycle {
            store: kind,
            since,
            until,
            phase: CyclePhase::FetchingPrimary,
            primary: Some(primary),
            search,
            backfill: Vec::new(),
            allowlist,
            token: account.token.clone(),
            error: None,
            rate_limited: false,
            rate_limit_reported: false,
        });
    }

    /// Polls every outstanding request of the active cycle. Call once per
    /// frame from the UI loop.
    pub fn poll(&mut self) {
        let Some(mut cycle) = self.cycle.take() else {
            return;
        };
        // A terminal cycle stays around so its phase remains observable, but
        // it has nothing left to poll and must not notify again.
        let was_terminal = !cycle.outstanding();

        self.poll_primary(&mut cycle);
        self.poll_search(&mut cycle);
        self.poll_backfill(&mut cycle);

        if !cycle.outstanding() && !was_terminal {
            if cycle.phase == CyclePhase::Failed {
                self.events.push(StoreEvent::CycleFailed {
                    message: cycle
                        .error
                        .clone()
                        .unwrap_or_else(|| "activity fetch failed".to_owned()),
                    rate_limited: cycle.rate_limited,
                });
            } else {
                cycle.phase = CyclePhase::Ready;
                info!("fetch cycle ready ({:?} store)", cycle.store);
                self.events.push(StoreEvent::CycleReady { store: cycle.store });
            }
        }

        self.cycle = Some(cycle);
    }

    fn poll_primary(&mut self, cycle: &mut ActiveCycle) {
        let Some(pending) = &cycle.primary else {
            return;
        };
        let Some(result) = pending.try_take() else {
            return;
        };
        cycle.primary = None;
        match result {
            Ok(events) => {
                let store = self.store_slot(cycle.store);
                let added = pipeline::reconcile_events(
                    events,
                    cycle.since,
                    cycle.until,
                    &cycle.allowlist,
                    &mut store.activities,
                );
                store.loaded = true;
                info!("primary fetch added {added} activities");
                self.schedule_backfill(cycle);
                cycle.phase = CyclePhase::Backfilling;
            }
            Err(err) => {
                // The store keeps whatever it held before the cycle started.
                error!("activity fetch failed: {err}");
                cycle.rate_limited = err.is_rate_limit();
                cycle.error = Some(err.to_string());
                cycle.phase = CyclePhase::Failed;
            }
        }
    }

    fn poll_search(&mut self, cycle: &mut ActiveCycle) {
        let Some(pending) = &cycle.search else {
            return;
        };
        let Some(result) = pending.try_take() else {
            return;
        };
        cycle.search = None;
        match result {
            Ok(items) => {
                let store = self.store_slot(cycle.store);
                let added = merge_authored_prs(items, &cycle.allowlist, &mut store.activities);
                info!("authored-PR search added {added} activities");
            }
            Err(err) => {
                error!("authored-PR search failed: {err}");
                if err.is_rate_limit() {
                    self.report_rate_limit(cycle);
                }
            }
        }
    }

    fn poll_backfill(&mut self, cycle: &mut ActiveCycle) {
        let mut completed = Vec::new();
        cycle.backfill.retain(|request| match request.pending.try_take() {
            None => true,
            Some(result) => {
                completed.push((request.repo.clone(), result));
                false
            }
        });

        for (repo, result) in completed {
            match result {
                Ok(titles) => {
                    let store = self.store_slot(cycle.store);
                    let updated = backfill::apply_titles(&mut store.activities, &repo, &titles);
                    info!(
                        "merged {updated} titles for {} ({} resolved upstream)",
                        repo.long_name(),
                        titles.len()
                    );
                    self.events.push(StoreEvent::TitlesMerged { repo, updated });
                }
                Err(err) => {
                    // The group's items keep their empty titles this cycle.
                    warn!("title backfill failed for {}: {err}", repo.long_name());
                    if err.is_rate_limit() {
                        self.report_rate_limit(cycle);
                    }
                }
            }
        }
    }

    fn schedule_backfill(&mut self, cycle: &mut ActiveCycle) {
        let store = self.store_slot(cycle.store);
        for group in backfill::plan_groups(&store.activities) {
            info!(
                "fetching {} missing titles for {} since {}",
                group.ids.len(),
                group.repo.long_name(),
                group.since
            );
            let token = cycle.token.clone();
            let repo = group.repo.clone();
            let since = group.since;
            let pending = PendingFetch::spawn(move || {
                let client = github::build_client()?;
                github::fetch_repo_titles(&client, token.as_deref(), &repo, since)
            });
            cycle.backfill.push(BackfillRequest {
                repo: group.repo,
                pending,
            });
        }
    }

    fn report_rate_limit(&mut self, cycle: &mut ActiveCycle) {
        if cycle.rate_limit_reported {
            return;
        }
        cycle.rate_limit_reported = true;
        cycle.rate_limited = true;
        self.events.push(StoreEvent::RateLimited {
            message: FetchError::RateLimited.to_string(),
        });
    }

    fn store_slot(&mut self, kind: StoreKind) -> &mut ReportStore {
        match kind {
            StoreKind::Today => &mut self.today,
            StoreKind::Past => &mut self.past,
        }
    }
}

fn merge_authored_prs(
    items: Vec<SearchItem>,
    allowlist: &HashSet<String>,
    store: &mut Vec<Activity>,
) -> usize {
    let mut added = 0;
    for item in items {
        let Some(activity) = pipeline::classify_search_item(item) else {
            continue;
        };
        // The query budget may have dropped some repo filters; enforce the
        // allowlist client-side. No window check: still-open PRs from before
        // the window are exactly what this search is for.
        if !allowlist.contains(&activity.repo.long_name()) {
            continue;
        }
        if pipeline::admit(store, &activity) {
            store.push(activity);
            added += 1;
        }
    }
    added
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------

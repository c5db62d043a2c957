//! Request coalescing for polling endpoints.
//!
//! Many tasks poll the same listing endpoints (`/tasks`, `/compute/jobs`,
//! `/compute/acct`) with different identifiers. Concurrent callers for the
//! same [`CoalescingKey`] are folded into rounds:
//!
//! - the first caller to find no round in flight starts one;
//! - the round waits for the category throttle deadline, then snapshots
//!   and clears the pending identifier set and makes one physical call;
//! - callers arriving while a round is in flight add their identifiers to
//!   the pending set and wait for the round's outcome.
//!
//! A caller whose identifiers were merged after the snapshot waits for the
//! next round instead, whose snapshot always includes them. The physical
//! call runs on its own task, so dropping a waiting future never aborts it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::category::ServiceCategory;
use crate::error::{SchedError, SchedResult};
use crate::http::{HttpRequest, HttpResponse, Method};
use crate::stage::Dispatch;
use crate::throttle::RateLimiter;

/// Set of wanted identifiers. `All` is the wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdSet {
    All,
    Ids(BTreeSet<String>),
}

impl IdSet {
    /// The set of nothing.
    pub fn empty() -> Self {
        Self::Ids(BTreeSet::new())
    }

    /// Identifiers a caller wants; no identifiers means all of them.
    pub fn wanted<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() { Self::All } else { Self::Ids(ids) }
    }

    /// Parse a comma-separated id parameter. A missing parameter means all.
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            None => Self::All,
            Some(value) => Self::wanted(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty()),
            ),
        }
    }

    /// Union in place. The wildcard absorbs everything.
    pub fn merge(&mut self, other: &IdSet) {
        match other {
            Self::All => *self = Self::All,
            Self::Ids(theirs) => {
                if let Self::Ids(mine) = self {
                    mine.extend(theirs.iter().cloned());
                }
            }
        }
    }

    /// Whether every identifier of `other` is in this set.
    pub fn covers(&self, other: &IdSet) -> bool {
        match (self, other) {
            (Self::All, _) => true,
            (Self::Ids(_), Self::All) => false,
            (Self::Ids(mine), Self::Ids(theirs)) => theirs.is_subset(mine),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(id),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Ids(ids) if ids.is_empty())
    }

    /// Move the contents out, leaving an empty set.
    pub fn take(&mut self) -> IdSet {
        std::mem::replace(self, Self::empty())
    }

    /// Query parameter value: sorted comma-joined ids, or `None` for all.
    pub fn to_param(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Ids(ids) => Some(ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")),
        }
    }
}

/// A listing endpoint whose calls can be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollingEndpoint {
    /// `GET /tasks`, filtered by `tasks`.
    Tasks,
    /// `GET /compute/jobs`, filtered by `jobs`.
    ActiveJobs,
    /// `GET /compute/acct`, filtered by `jobs`.
    Accounting,
}

impl PollingEndpoint {
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "/tasks" => Some(Self::Tasks),
            "/compute/jobs" => Some(Self::ActiveJobs),
            "/compute/acct" => Some(Self::Accounting),
            _ => None,
        }
    }

    /// Query parameter carrying the identifiers.
    pub fn id_param(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::ActiveJobs | Self::Accounting => "jobs",
        }
    }

    pub fn category(&self) -> ServiceCategory {
        match self {
            Self::Tasks => ServiceCategory::Tasks,
            Self::ActiveJobs | Self::Accounting => ServiceCategory::Compute,
        }
    }

    /// Whether a request to this endpoint can share a round with others.
    ///
    /// Paged or time-windowed listings depend on parameters a merged call
    /// cannot honour for everyone. Accounting without explicit jobs only
    /// reports recent jobs, so it never absorbs explicit job requests.
    fn accepts(&self, request: &HttpRequest) -> bool {
        const PAGING: [&str; 2] = ["pageSize", "pageNumber"];
        const WINDOW: [&str; 2] = ["starttime", "endtime"];
        match self {
            Self::Tasks => true,
            Self::ActiveJobs => !PAGING.iter().any(|p| request.has_query(p)),
            Self::Accounting => {
                request.has_query(self.id_param())
                    && !PAGING.iter().chain(WINDOW.iter()).any(|p| request.has_query(p))
            }
        }
    }
}

/// Identifies the rounds a request can join.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoalescingKey {
    pub endpoint: PollingEndpoint,
    /// Target system, for compute listings.
    pub machine: Option<String>,
}

impl CoalescingKey {
    /// Key of a mergeable request, or `None` when it must go out on its own.
    pub fn for_request(request: &HttpRequest) -> Option<Self> {
        if request.method != Method::Get {
            return None;
        }
        let endpoint = PollingEndpoint::from_path(&request.path)?;
        if !endpoint.accepts(request) {
            return None;
        }
        Some(Self {
            endpoint,
            machine: request.machine().map(str::to_string),
        })
    }
}

/// Result of one round, shared by every caller that waited on it.
#[derive(Debug)]
pub struct RoundOutcome {
    /// Identifiers the physical call asked for.
    pub covered: IdSet,
    pub result: SchedResult<HttpResponse>,
}

impl RoundOutcome {
    /// Whether a caller wanting `wanted` can use this outcome.
    ///
    /// Failures are shared with everyone; a successful listing only with
    /// callers whose identifiers it asked for.
    fn serves(&self, wanted: &IdSet) -> bool {
        match &self.result {
            Ok(response) if response.is_success() => self.covered.covers(wanted),
            _ => true,
        }
    }
}

type OutcomeReceiver = watch::Receiver<Option<Arc<RoundOutcome>>>;

#[derive(Default)]
struct KeyState {
    pending: IdSet,
    in_flight: Option<OutcomeReceiver>,
}

impl Default for IdSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Folds concurrent listing calls into shared rounds.
pub struct RequestCoalescer {
    pipeline: Arc<dyn Dispatch>,
    limiter: Arc<RateLimiter>,
    keys: Mutex<FxHashMap<CoalescingKey, Arc<Mutex<KeyState>>>>,
    rounds: Arc<AtomicU64>,
}

impl RequestCoalescer {
    pub fn new(pipeline: Arc<dyn Dispatch>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            pipeline,
            limiter,
            keys: Mutex::new(FxHashMap::default()),
            rounds: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of physical calls made so far.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Get an outcome covering `wanted` for requests shaped like `template`.
    ///
    /// The identifier parameter of `template` is rewritten for each round.
    pub async fn request(
        &self,
        key: CoalescingKey,
        wanted: IdSet,
        template: &HttpRequest,
    ) -> SchedResult<Arc<RoundOutcome>> {
        let slot = self.slot(&key);
        loop {
            let mut rx = {
                let mut state = slot.lock().expect("coalescing state lock poisoned");
                state.pending.merge(&wanted);
                match &state.in_flight {
                    Some(rx) => {
                        debug!("Joining in-flight {:?} request", key.endpoint);
                        rx.clone()
                    }
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.in_flight = Some(rx.clone());
                        self.spawn_round(key.clone(), Arc::clone(&slot), template.clone(), tx);
                        rx
                    }
                }
            };

            let outcome = match rx.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            };
            let Some(outcome) = outcome else {
                let mut state = slot.lock().expect("coalescing state lock poisoned");
                if state.in_flight.as_ref().is_some_and(|r| r.same_channel(&rx)) {
                    state.in_flight = None;
                }
                return Err(SchedError::Internal(
                    "coalesced request ended without a result".into(),
                ));
            };

            if outcome.serves(&wanted) {
                return Ok(outcome);
            }
            debug!(
                "{:?} round did not include the requested ids, waiting for the next one",
                key.endpoint
            );
        }
    }

    fn slot(&self, key: &CoalescingKey) -> Arc<Mutex<KeyState>> {
        let mut keys = self.keys.lock().expect("coalescing key lock poisoned");
        Arc::clone(keys.entry(key.clone()).or_default())
    }

    fn spawn_round(
        &self,
        key: CoalescingKey,
        slot: Arc<Mutex<KeyState>>,
        mut request: HttpRequest,
        tx: watch::Sender<Option<Arc<RoundOutcome>>>,
    ) {
        let pipeline = Arc::clone(&self.pipeline);
        let limiter = Arc::clone(&self.limiter);
        let rounds = Arc::clone(&self.rounds);

        tokio::spawn(async move {
            limiter.wait(key.endpoint.category()).await;

            let covered = slot
                .lock()
                .expect("coalescing state lock poisoned")
                .pending
                .take();
            request.set_query(key.endpoint.id_param(), covered.to_param());
            info!(
                "Making merged request to {} for {}",
                request.path,
                covered.to_param().unwrap_or_else(|| "all ids".into())
            );

            let result = pipeline.dispatch(&request).await;
            rounds.fetch_add(1, Ordering::Relaxed);

            slot.lock()
                .expect("coalescing state lock poisoned")
                .in_flight = None;
            tx.send_replace(Some(Arc::new(RoundOutcome { covered, result })));
        });
    }
}

impl std::fmt::Debug for RequestCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("rounds", &self.rounds())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(values: &[&str]) -> IdSet {
        IdSet::wanted(values.iter().copied())
    }

    #[test]
    fn test_wanted_and_param() {
        assert_eq!(IdSet::wanted(Vec::<String>::new()), IdSet::All);
        assert_eq!(ids(&["b", "a"]).to_param(), Some("a,b".into()));
        assert_eq!(IdSet::All.to_param(), None);
        assert_eq!(IdSet::from_param(Some("x, y,,")), ids(&["x", "y"]));
        assert_eq!(IdSet::from_param(Some("")), IdSet::All);
        assert_eq!(IdSet::from_param(None), IdSet::All);
    }

    #[test]
    fn test_wildcard_is_never_narrowed() {
        let mut pending = ids(&["a"]);
        pending.merge(&IdSet::All);
        assert!(pending.is_all());
        pending.merge(&ids(&["b"]));
        assert!(pending.is_all());
    }

    #[test]
    fn test_take_leaves_empty() {
        let mut pending = ids(&["a", "b"]);
        let snapshot = pending.take();
        assert_eq!(snapshot, ids(&["a", "b"]));
        assert!(pending.is_empty());
        assert!(!pending.contains("a"));
    }

    #[test]
    fn test_key_for_request() {
        let request = HttpRequest::get("/tasks").with_query("tasks", "a");
        let key = CoalescingKey::for_request(&request).unwrap();
        assert_eq!(key.endpoint, PollingEndpoint::Tasks);
        assert_eq!(key.machine, None);

        let request = HttpRequest::get("/compute/jobs").with_machine("daint");
        let key = CoalescingKey::for_request(&request).unwrap();
        assert_eq!(key.machine.as_deref(), Some("daint"));

        let paged = HttpRequest::get("/compute/jobs").with_query("pageSize", "25");
        assert!(CoalescingKey::for_request(&paged).is_none());

        let acct_all = HttpRequest::get("/compute/acct");
        assert!(CoalescingKey::for_request(&acct_all).is_none());
        let acct_window = HttpRequest::get("/compute/acct")
            .with_query("jobs", "1")
            .with_query("starttime", "2024-01-01");
        assert!(CoalescingKey::for_request(&acct_window).is_none());
        let acct = HttpRequest::get("/compute/acct").with_query("jobs", "1,2");
        assert!(CoalescingKey::for_request(&acct).is_some());

        assert!(CoalescingKey::for_request(&HttpRequest::post("/compute/jobs")).is_none());
        assert!(CoalescingKey::for_request(&HttpRequest::get("/tasks/abc")).is_none());
    }

    fn id_set() -> impl Strategy<Value = IdSet> {
        prop_oneof![
            1 => Just(IdSet::All),
            4 => prop::collection::btree_set("[a-e]", 0..4).prop_map(IdSet::Ids),
        ]
    }

    proptest! {
        #[test]
        fn test_merge_covers_both(a in id_set(), b in id_set()) {
            let mut merged = a.clone();
            merged.merge(&b);
            prop_assert!(merged.covers(&a));
            prop_assert!(merged.covers(&b));
        }

        #[test]
        fn test_merge_commutes(a in id_set(), b in id_set()) {
            let mut ab = a.clone();
            ab.merge(&b);
            let mut ba = b.clone();
            ba.merge(&a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn test_merge_idempotent(a in id_set()) {
            let mut merged = a.clone();
            merged.merge(&a);
            prop_assert_eq!(merged, a);
        }

        #[test]
        fn test_wildcard_absorbs(a in id_set()) {
            let mut merged = IdSet::All;
            merged.merge(&a);
            prop_assert!(merged.is_all());
        }
    }
}

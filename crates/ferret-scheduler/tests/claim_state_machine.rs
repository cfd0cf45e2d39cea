//! Stateful property testing for the claim engine.
//!
//! Drives random sequences of schedule/claim/complete/requeue/sweep/advance
//! operations against both store implementations and checks them against a
//! simple in-test model of the item lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use tokio::runtime::Runtime;

use ferret_scheduler::{
    ClaimEngine, Clock, DueItemStore, ItemId, ItemState, ManualClock, MemoryStore, NewItem,
    ScheduledItem, SchedulerError, SqliteStore,
};

/// Seconds after which a processing claim is swept.
const STALE_AFTER_SECS: i64 = 15 * 60;

/// Operations performed against the engine.
#[derive(Debug, Clone)]
pub enum ClaimOperation {
    Schedule { slot: usize, offset_secs: i64 },
    Claim { window_secs: i64, limit: usize },
    CompleteOldest,
    FailOldest,
    RequeueOldest { delay_secs: i64 },
    Advance { secs: i64 },
    Sweep,
}

#[derive(Clone, Debug)]
pub struct ModelItem {
    due: i64,
    state: ItemState,
    attempts: u32,
    claimed_at: Option<i64>,
}

/// Reference model: times are seconds since the harness base time.
#[derive(Clone, Debug, Default)]
pub struct ClaimModel {
    now: i64,
    items: BTreeMap<String, ModelItem>,
    /// Claims handed out and not yet resolved, as (id, attempt number).
    in_flight: Vec<(String, u32)>,
}

fn slot_id(slot: usize) -> String {
    format!("item-{}", slot)
}

impl ClaimModel {
    /// Whether the oldest in-flight claim is still the item's current claim.
    fn oldest_claim_current(&self) -> Option<String> {
        let (id, attempt) = self.in_flight.first()?;
        let item = self.items.get(id)?;
        (item.state == ItemState::Processing && item.attempts == *attempt).then(|| id.clone())
    }
}

impl ReferenceStateMachine for ClaimModel {
    type State = Self;
    type Transition = ClaimOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        prop_oneof![
            3 => (0usize..8, -600i64..3600)
                .prop_map(|(slot, offset_secs)| ClaimOperation::Schedule { slot, offset_secs }),
            3 => (1i64..3600, 1usize..4)
                .prop_map(|(window_secs, limit)| ClaimOperation::Claim { window_secs, limit }),
            2 => Just(ClaimOperation::CompleteOldest),
            1 => Just(ClaimOperation::FailOldest),
            1 => (0i64..1200).prop_map(|delay_secs| ClaimOperation::RequeueOldest { delay_secs }),
            2 => (1i64..1200).prop_map(|secs| ClaimOperation::Advance { secs }),
            1 => Just(ClaimOperation::Sweep),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            ClaimOperation::Schedule { slot, offset_secs } => {
                state.items.insert(
                    slot_id(*slot),
                    ModelItem {
                        due: state.now + offset_secs,
                        state: ItemState::Scheduled,
                        attempts: 0,
                        claimed_at: None,
                    },
                );
            }
            ClaimOperation::Claim { window_secs, limit } => {
                let horizon = state.now + window_secs;
                let mut eligible: Vec<(i64, String)> = state
                    .items
                    .iter()
                    .filter(|(_, it)| it.state == ItemState::Scheduled && it.due <= horizon)
                    .map(|(id, it)| (it.due, id.clone()))
                    .collect();
                eligible.sort();
                eligible.truncate(*limit);

                for (_, id) in eligible {
                    if let Some(it) = state.items.get_mut(&id) {
                        it.state = ItemState::Processing;
                        it.attempts += 1;
                        it.claimed_at = Some(state.now);
                        state.in_flight.push((id, it.attempts));
                    }
                }
            }
            ClaimOperation::CompleteOldest
            | ClaimOperation::FailOldest
            | ClaimOperation::RequeueOldest { .. } => {
                if let Some(id) = state.oldest_claim_current() {
                    let now = state.now;
                    if let Some(it) = state.items.get_mut(&id) {
                        match transition {
                            ClaimOperation::CompleteOldest => it.state = ItemState::Done,
                            ClaimOperation::FailOldest => it.state = ItemState::Failed,
                            ClaimOperation::RequeueOldest { delay_secs } => {
                                it.state = ItemState::Scheduled;
                                it.due = now + delay_secs;
                                it.claimed_at = None;
                            }
                            _ => {}
                        }
                    }
                }
                state.in_flight.remove(0);
            }
            ClaimOperation::Advance { secs } => {
                state.now += secs;
            }
            ClaimOperation::Sweep => {
                let cutoff = state.now - STALE_AFTER_SECS;
                for it in state.items.values_mut() {
                    if it.state == ItemState::Processing && it.claimed_at.is_some_and(|at| at < cutoff)
                    {
                        it.state = ItemState::Scheduled;
                        it.claimed_at = None;
                    }
                }
            }
        }
        state
    }

    fn preconditions(state: &Self::State, transition: &Self::Transition) -> bool {
        match transition {
            ClaimOperation::Schedule { slot, .. } => !state.items.contains_key(&slot_id(*slot)),
            ClaimOperation::CompleteOldest
            | ClaimOperation::FailOldest
            | ClaimOperation::RequeueOldest { .. } => !state.in_flight.is_empty(),
            _ => true,
        }
    }
}

/// Stores the harness can open fresh.
pub trait FreshStore: DueItemStore + Sized + 'static {
    fn fresh() -> Self;
}

impl FreshStore for MemoryStore {
    fn fresh() -> Self {
        MemoryStore::new()
    }
}

impl FreshStore for SqliteStore {
    fn fresh() -> Self {
        SqliteStore::open_in_memory().expect("Failed to open in-memory sqlite")
    }
}

/// Test harness wrapping a claim engine over a fresh store.
pub struct ClaimHarness<S: FreshStore> {
    runtime: Runtime,
    base: DateTime<Utc>,
    clock: Arc<ManualClock>,
    engine: ClaimEngine<S>,
    in_flight: Vec<ScheduledItem>,
}

type MemoryHarness = ClaimHarness<MemoryStore>;
type SqliteHarness = ClaimHarness<SqliteStore>;

impl<S: FreshStore> ClaimHarness<S> {
    fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        let base = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        let clock = Arc::new(ManualClock::new(base));
        let engine = ClaimEngine::new(Arc::new(S::fresh()))
            .with_clock(clock.clone())
            .with_stale_after(Duration::seconds(STALE_AFTER_SECS));
        Self {
            runtime,
            base,
            clock,
            engine,
            in_flight: Vec::new(),
        }
    }

    fn apply_operation(&mut self, op: &ClaimOperation) {
        let engine = &self.engine;
        let clock = &self.clock;
        let in_flight = &mut self.in_flight;

        self.runtime.block_on(async {
            match op {
                ClaimOperation::Schedule { slot, offset_secs } => {
                    let due_at = clock.now() + Duration::seconds(*offset_secs);
                    engine
                        .schedule(
                            NewItem::new(due_at, serde_json::json!({ "slot": slot }))
                                .with_id(slot_id(*slot)),
                        )
                        .await
                        .expect("schedule");
                }
                ClaimOperation::Claim { window_secs, limit } => {
                    let claimed = engine
                        .claim(Duration::seconds(*window_secs), *limit)
                        .await
                        .expect("claim");
                    assert!(claimed.len() <= *limit);
                    in_flight.extend(claimed);
                }
                ClaimOperation::CompleteOldest => {
                    let item = in_flight.remove(0);
                    accept_outcome(engine.complete(&item).await);
                }
                ClaimOperation::FailOldest => {
                    let item = in_flight.remove(0);
                    accept_outcome(engine.fail(&item, "boom").await);
                }
                ClaimOperation::RequeueOldest { delay_secs } => {
                    let item = in_flight.remove(0);
                    accept_outcome(
                        engine
                            .requeue(&item, Duration::seconds(*delay_secs), "retry")
                            .await
                            .map(|_| ()),
                    );
                }
                ClaimOperation::Advance { secs } => {
                    clock.advance(Duration::seconds(*secs));
                }
                ClaimOperation::Sweep => {
                    engine.sweep_stale().await.expect("sweep");
                }
            }
        });
    }
}

/// Resolving a claim either succeeds or reports that the claim was lost.
fn accept_outcome(result: Result<(), SchedulerError>) {
    match result {
        Ok(()) | Err(SchedulerError::ClaimLost(_)) => {}
        Err(e) => panic!("unexpected error resolving claim: {}", e),
    }
}

impl<S: FreshStore> StateMachineTest for ClaimHarness<S> {
    type SystemUnderTest = Self;
    type Reference = ClaimModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        // Claims were handed out in the same order as the model predicts.
        let actual: Vec<(String, u32)> = state
            .in_flight
            .iter()
            .map(|it| (it.id.to_string(), it.attempts))
            .collect();
        assert_eq!(actual, ref_state.in_flight);

        state.runtime.block_on(async {
            for (id, expected) in &ref_state.items {
                let item = state
                    .engine
                    .store()
                    .get(&ItemId::from(id.as_str()))
                    .await
                    .expect("get")
                    .expect("item exists");

                assert_eq!(item.state, expected.state, "state of {}", id);
                assert_eq!(item.attempts, expected.attempts, "attempts of {}", id);
                assert_eq!(
                    item.due_at,
                    state.base + Duration::seconds(expected.due),
                    "due_at of {}",
                    id
                );
                // Only processing items carry a claim token.
                assert_eq!(
                    item.claim_token.is_some(),
                    item.state == ItemState::Processing,
                    "claim token of {}",
                    id
                );
            }
        });
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 2000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn memory_store_claim_lifecycle(sequential 1..40 => MemoryHarness);

    #[test]
    fn sqlite_store_claim_lifecycle(sequential 1..40 => SqliteHarness);
}

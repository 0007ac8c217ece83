//! Serialized chunk transitions.
//!
//! At most one render pass runs at a time. Requests that arrive while a pass is
//! in flight overwrite a single pending slot, so only the most recent one is
//! rendered once the current pass settles. Passes are never cancelled; a failed
//! pass still commits its key.

use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    future::Future,
    rc::Rc,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;

use crate::{assets::AssetSlot, chunk::ChunkKey, observer::EngineObserver};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("assets for {0:?} are still loading")]
    AssetsPending(AssetSlot),
    #[error("assets for {0:?} failed to load")]
    AssetsFailed(AssetSlot),
    #[error("render of chunk {0} was interrupted by a map reset")]
    Interrupted(ChunkKey),
}

/// Work performed for one chunk transition.
pub trait ChunkRenderPass {
    fn render_chunk(&self, key: ChunkKey) -> impl Future<Output = Result<(), StreamError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Switching { target: ChunkKey },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SwitchRequest {
    key: ChunkKey,
    force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Already showing this key.
    Unchanged,
    /// Parked in the pending slot; the in-flight caller will pick it up.
    Queued,
    /// This caller drove `passes` render passes and settled on `key`.
    Committed { key: ChunkKey, passes: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Committed { key: ChunkKey, ok: bool },
    PrefetchRequested { center: ChunkKey, keys: Vec<ChunkKey> },
    Reset,
}

pub struct ChunkStreamCoordinator {
    state: Cell<SwitchState>,
    current: Cell<Option<ChunkKey>>,
    pending: Cell<Option<SwitchRequest>>,
    in_flight: Cell<u32>,
    peak_in_flight: Cell<u32>,
    subscribers: RefCell<Vec<Sender<StreamEvent>>>,
    observer: Rc<dyn EngineObserver>,
}

impl ChunkStreamCoordinator {
    pub fn new(observer: Rc<dyn EngineObserver>) -> Self {
        Self {
            state: Cell::new(SwitchState::Idle),
            current: Cell::new(None),
            pending: Cell::new(None),
            in_flight: Cell::new(0),
            peak_in_flight: Cell::new(0),
            subscribers: RefCell::new(Vec::new()),
            observer,
        }
    }

    pub fn state(&self) -> SwitchState {
        self.state.get()
    }

    pub fn current(&self) -> Option<ChunkKey> {
        self.current.get()
    }

    pub fn pending(&self) -> Option<ChunkKey> {
        self.pending.get().map(|request| request.key)
    }

    /// Highest number of render passes ever observed running at once.
    pub fn peak_in_flight(&self) -> u32 {
        self.peak_in_flight.get()
    }

    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    pub fn publish(&self, event: StreamEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Forgets the committed key so the next request always renders.
    pub fn reset(&self) {
        self.current.set(None);
        if let Some(mut request) = self.pending.get() {
            request.force = true;
            self.pending.set(Some(request));
        }
        self.publish(StreamEvent::Reset);
    }

    pub async fn request_switch<P: ChunkRenderPass>(
        &self,
        pass: &P,
        key: ChunkKey,
    ) -> SwitchOutcome {
        self.request(pass, key, false).await
    }

    /// Like [`Self::request_switch`], but `force` renders even when `key` is already committed.
    pub async fn request<P: ChunkRenderPass>(
        &self,
        pass: &P,
        key: ChunkKey,
        force: bool,
    ) -> SwitchOutcome {
        self.submit(pass, SwitchRequest { key, force }).await
    }

    /// Re-renders the most recently requested key even if it is already committed.
    pub async fn request_refresh<P: ChunkRenderPass>(&self, pass: &P) -> SwitchOutcome {
        let latest = self
            .pending
            .get()
            .map(|request| request.key)
            .or(match self.state.get() {
                SwitchState::Switching { target } => Some(target),
                SwitchState::Idle => None,
            })
            .or(self.current.get());
        match latest {
            Some(key) => self.submit(pass, SwitchRequest { key, force: true }).await,
            None => SwitchOutcome::Unchanged,
        }
    }

    async fn submit<P: ChunkRenderPass>(
        &self,
        pass: &P,
        request: SwitchRequest,
    ) -> SwitchOutcome {
        if let SwitchState::Switching { .. } = self.state.get() {
            let merged = match self.pending.take() {
                Some(previous) if previous.key == request.key => SwitchRequest {
                    key: request.key,
                    force: previous.force || request.force,
                },
                _ => request,
            };
            self.pending.set(Some(merged));
            self.observer.chunk_switch_queued(request.key);
            return SwitchOutcome::Queued;
        }

        if !request.force && self.current.get() == Some(request.key) {
            return SwitchOutcome::Unchanged;
        }

        let _idle = IdleOnDrop(self);
        let mut request = request;
        let mut passes = 0;
        loop {
            self.state.set(SwitchState::Switching {
                target: request.key,
            });
            let result = {
                let _slot = InFlight::enter(self);
                pass.render_chunk(request.key).await
            };
            passes += 1;

            if let Err(err) = &result {
                self.observer.chunk_render_failed(request.key, err);
            }
            self.current.set(Some(request.key));
            self.observer
                .chunk_switch_committed(request.key, result.is_ok());
            self.publish(StreamEvent::Committed {
                key: request.key,
                ok: result.is_ok(),
            });

            match self.pending.take() {
                Some(next) if next.force || self.current.get() != Some(next.key) => request = next,
                _ => break,
            }
        }

        SwitchOutcome::Committed {
            key: request.key,
            passes,
        }
    }
}

/// Returns the coordinator to `Idle` when a switch ends or its future is dropped.
/// A request parked behind an abandoned switch is discarded with it.
struct IdleOnDrop<'a>(&'a ChunkStreamCoordinator);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.pending.set(None);
        self.0.state.set(SwitchState::Idle);
    }
}

struct InFlight<'a>(&'a Cell<u32>);

impl<'a> InFlight<'a> {
    fn enter(coordinator: &'a ChunkStreamCoordinator) -> Self {
        let count = coordinator.in_flight.get() + 1;
        coordinator.in_flight.set(count);
        if count > coordinator.peak_in_flight.get() {
            coordinator.peak_in_flight.set(count);
        }
        Self(&coordinator.in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Which neighbouring chunks have been requested from the data source.
///
/// Keys move `planned -> pending -> fetched`; a failed fetch goes back to unknown
/// so the next plan retries it.
#[derive(Debug, Default, Clone)]
pub struct PrefetchTracker {
    fetched: HashSet<ChunkKey>,
    pending: HashSet<ChunkKey>,
}

impl PrefetchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the keys that still need fetching and marks them pending.
    pub fn plan(&mut self, keys: impl IntoIterator<Item = ChunkKey>) -> Vec<ChunkKey> {
        let mut planned = Vec::new();
        for key in keys {
            if self.fetched.contains(&key) || !self.pending.insert(key) {
                continue;
            }
            planned.push(key);
        }
        planned
    }

    pub fn complete(&mut self, key: ChunkKey, ok: bool) {
        self.pending.remove(&key);
        if ok {
            self.fetched.insert(key);
        }
    }

    pub fn is_fetched(&self, key: ChunkKey) -> bool {
        self.fetched.contains(&key)
    }

    pub fn is_pending(&self, key: ChunkKey) -> bool {
        self.pending.contains(&key)
    }

    pub fn reset(&mut self) {
        self.fetched.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{NoopObserver, RecordingObserver};
    use futures_lite::future::{block_on, poll_once, yield_now, zip};

    #[derive(Default)]
    struct FakePass {
        rendered: RefCell<Vec<ChunkKey>>,
        fail: Cell<Option<ChunkKey>>,
    }

    impl ChunkRenderPass for FakePass {
        async fn render_chunk(&self, key: ChunkKey) -> Result<(), StreamError> {
            yield_now().await;
            yield_now().await;
            self.rendered.borrow_mut().push(key);
            if self.fail.get() == Some(key) {
                return Err(StreamError::AssetsPending(AssetSlot::Tiles(
                    crate::cache::RenderCategory::Outline,
                )));
            }
            Ok(())
        }
    }

    fn coordinator() -> ChunkStreamCoordinator {
        ChunkStreamCoordinator::new(Rc::new(NoopObserver))
    }

    const A: ChunkKey = ChunkKey::new(0, 0);
    const B: ChunkKey = ChunkKey::new(0, 8);
    const C: ChunkKey = ChunkKey::new(8, 8);

    #[test]
    fn latest_request_wins_while_switching() {
        let stream = coordinator();
        let pass = FakePass::default();
        let (a, (b, c)) = block_on(zip(
            stream.request_switch(&pass, A),
            zip(stream.request_switch(&pass, B), stream.request_switch(&pass, C)),
        ));
        assert_eq!(a, SwitchOutcome::Committed { key: C, passes: 2 });
        assert_eq!(b, SwitchOutcome::Queued);
        assert_eq!(c, SwitchOutcome::Queued);
        assert_eq!(*pass.rendered.borrow(), vec![A, C]);
        assert_eq!(stream.current(), Some(C));
        assert_eq!(stream.peak_in_flight(), 1);
        assert_eq!(stream.state(), SwitchState::Idle);
    }

    #[test]
    fn same_key_is_a_no_op() {
        let stream = coordinator();
        let pass = FakePass::default();
        block_on(stream.request_switch(&pass, A));
        assert_eq!(block_on(stream.request_switch(&pass, A)), SwitchOutcome::Unchanged);
        assert_eq!(pass.rendered.borrow().len(), 1);
    }

    #[test]
    fn queued_request_for_in_flight_key_is_dropped() {
        let stream = coordinator();
        let pass = FakePass::default();
        let (a, (_, _)) = block_on(zip(
            stream.request_switch(&pass, A),
            zip(stream.request_switch(&pass, B), stream.request_switch(&pass, A)),
        ));
        assert_eq!(a, SwitchOutcome::Committed { key: A, passes: 1 });
        assert_eq!(*pass.rendered.borrow(), vec![A]);
    }

    #[test]
    fn refresh_rerenders_current_key() {
        let stream = coordinator();
        let pass = FakePass::default();
        assert_eq!(block_on(stream.request_refresh(&pass)), SwitchOutcome::Unchanged);
        block_on(stream.request_switch(&pass, B));
        assert_eq!(
            block_on(stream.request_refresh(&pass)),
            SwitchOutcome::Committed { key: B, passes: 1 }
        );
        assert_eq!(*pass.rendered.borrow(), vec![B, B]);
    }

    #[test]
    fn refresh_during_switch_forces_a_second_pass() {
        let stream = coordinator();
        let pass = FakePass::default();
        let (a, r) = block_on(zip(
            stream.request_switch(&pass, A),
            stream.request_refresh(&pass),
        ));
        assert_eq!(r, SwitchOutcome::Queued);
        assert_eq!(a, SwitchOutcome::Committed { key: A, passes: 2 });
        assert_eq!(*pass.rendered.borrow(), vec![A, A]);
    }

    #[test]
    fn failed_pass_still_commits() {
        let observer = Rc::new(RecordingObserver::new());
        let stream = ChunkStreamCoordinator::new(observer.clone());
        let events = stream.subscribe();
        let pass = FakePass::default();
        pass.fail.set(Some(A));
        block_on(stream.request_switch(&pass, A));
        assert_eq!(stream.current(), Some(A));
        assert_eq!(observer.count("chunk_switch.render_failed"), 1);
        assert_eq!(
            events.try_recv().unwrap(),
            StreamEvent::Committed { key: A, ok: false }
        );
    }

    #[test]
    fn dropped_switch_returns_to_idle() {
        let stream = coordinator();
        let pass = FakePass::default();
        {
            let mut fut = Box::pin(stream.request_switch(&pass, A));
            assert!(block_on(poll_once(&mut fut)).is_none());
            assert_eq!(stream.state(), SwitchState::Switching { target: A });
        }
        assert_eq!(stream.state(), SwitchState::Idle);
        assert_eq!(stream.current(), None);
        assert_eq!(
            block_on(stream.request_switch(&pass, B)),
            SwitchOutcome::Committed { key: B, passes: 1 }
        );
    }

    #[test]
    fn dropped_switch_discards_its_queued_request() {
        let stream = coordinator();
        let pass = FakePass::default();
        {
            let mut fut = Box::pin(stream.request_switch(&pass, A));
            assert!(block_on(poll_once(&mut fut)).is_none());
            assert_eq!(block_on(stream.request_switch(&pass, B)), SwitchOutcome::Queued);
            assert_eq!(stream.pending(), Some(B));
        }
        assert_eq!(stream.state(), SwitchState::Idle);
        assert_eq!(stream.pending(), None);
        assert_eq!(
            block_on(stream.request_switch(&pass, C)),
            SwitchOutcome::Committed { key: C, passes: 1 }
        );
        assert_eq!(*pass.rendered.borrow(), vec![C]);
        assert_eq!(stream.current(), Some(C));
    }

    #[test]
    fn prefetch_skips_known_keys_and_retries_failures() {
        let mut tracker = PrefetchTracker::new();
        assert_eq!(tracker.plan([A, B, A]), vec![A, B]);
        assert!(tracker.plan([A, B]).is_empty());
        tracker.complete(A, true);
        tracker.complete(B, false);
        assert!(tracker.is_fetched(A));
        assert!(!tracker.is_pending(B));
        assert_eq!(tracker.plan([A, B, C]), vec![B, C]);
        tracker.reset();
        assert_eq!(tracker.plan([A]), vec![A]);
    }
}

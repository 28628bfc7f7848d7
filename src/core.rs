use std::{
    cell::{Cell, RefCell},
    future::{poll_fn, Future},
    mem::{replace, swap, take},
    pin::Pin,
    rc::{Rc, Weak},
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll, Wake, Waker},
    thread::AccessError,
};

use derive_ex::derive_ex;
use slabmap::SlabMap;


thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
}

struct Globals {
    is_runtime_exists: bool,
    actions: Vec<Action>,
    reactions: Vec<Reaction>,
    need_wake: bool,
    wakes: WakeTable,
}
impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            actions: Vec::new(),
            reactions: Vec::new(),
            need_wake: false,
            wakes: WakeTable::default(),
        }
    }
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut()))
    }
    fn assert_exists(&self) {
        if !self.is_runtime_exists {
            panic!("`Runtime` is not created.");
        }
    }
    fn get_actions(actions: &mut Vec<Action>) -> bool {
        Self::with(|g| {
            g.apply_wake();
            swap(actions, &mut g.actions);
        });
        !actions.is_empty()
    }
    fn get_reactions(reactions: &mut Vec<Reaction>) -> bool {
        Self::with(|g| swap(reactions, &mut g.reactions));
        !reactions.is_empty()
    }
    fn push_action(&mut self, action: Action) {
        self.assert_exists();
        self.actions.push(action);
        self.wake();
    }
    fn push_reaction(&mut self, reaction: Reaction) {
        self.reactions.push(reaction);
        self.wake();
    }
    fn apply_wake(&mut self) {
        let mut requests = self.wakes.requests.lock();
        for key in requests.drops.drain(..) {
            self.wakes.actions.remove(key);
        }
        for key in requests.wakes.drain(..) {
            if let Some(action) = self.wakes.actions.get(key) {
                self.actions.push(Action::Poll(action.clone()));
            }
        }
    }
    fn wait_for_ready(&mut self, cx: &Context) -> Poll<()> {
        self.need_wake = false;
        if !self.actions.is_empty() || !self.reactions.is_empty() {
            return Poll::Ready(());
        }
        let mut requests = self.wakes.requests.lock();
        if !requests.wakes.is_empty() {
            return Poll::Ready(());
        }
        requests.waker = Some(cx.waker().clone());
        self.need_wake = true;
        Poll::Pending
    }
    fn wake(&mut self) {
        if !self.need_wake {
            return;
        }
        self.need_wake = false;
        self.wakes.requests.lock().wake();
    }
}

/// Reactive runtime.
///
/// Only one `Runtime` can exist per thread at a time.
/// Dropping the runtime drops every asynchronous action that has not finished yet.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime {
    ac: ActionContext,
    actions_buffer: Vec<Action>,
    reactions_buffer: Vec<Reaction>,
}
impl Runtime {
    pub fn new() -> Self {
        if Globals::with(|g| replace(&mut g.is_runtime_exists, true)) {
            panic!("Only one `Runtime` can exist in the same thread at the same time.");
        }
        Self {
            ac: ActionContext(()),
            actions_buffer: Vec::new(),
            reactions_buffer: Vec::new(),
        }
    }

    pub fn ac(&mut self) -> &mut ActionContext {
        &mut self.ac
    }
    pub fn sc(&mut self) -> SignalContext<'_> {
        SignalContext::new()
    }

    /// Perform scheduled actions, including asynchronous actions that have been woken.
    ///
    /// Returns `true` if any action was performed.
    pub fn run_actions(&mut self) -> bool {
        let mut handled = false;
        let mut actions = take(&mut self.actions_buffer);
        while Globals::get_actions(&mut actions) {
            for action in actions.drain(..) {
                action.call(&mut self.ac);
                handled = true;
            }
        }
        self.actions_buffer = actions;
        handled
    }

    /// Perform scheduled reactions.
    ///
    /// Returns `true` if any reaction was performed.
    pub fn run_reactions(&mut self) -> bool {
        let mut handled = false;
        let mut reactions = take(&mut self.reactions_buffer);
        while Globals::get_reactions(&mut reactions) {
            for reaction in reactions.drain(..) {
                reaction.run();
                handled = true;
            }
        }
        self.reactions_buffer = reactions;
        handled
    }

    /// Repeat [`run_actions`](Self::run_actions) and [`run_reactions`](Self::run_reactions)
    /// until there is nothing left to do.
    pub fn update(&mut self) {
        loop {
            if self.run_actions() {
                continue;
            }
            if self.run_reactions() {
                continue;
            }
            break;
        }
    }

    /// Wait while there is no process to be executed by [`update`](Self::update).
    pub async fn wait_for_ready(&mut self) {
        poll_fn(|cx| Globals::with(|g| g.wait_for_ready(cx))).await
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let wakes = Globals::with(|g| take(&mut g.wakes));
        for (_, action) in wakes.actions {
            action.cancel();
        }
        let rest = Globals::with(|g| {
            g.is_runtime_exists = false;
            g.need_wake = false;
            (take(&mut g.actions), take(&mut g.reactions))
        });
        drop(rest);
    }
}

/// Context for changing state.
pub struct ActionContext(());

impl ActionContext {
    pub fn sc(&mut self) -> SignalContext<'_> {
        SignalContext::new()
    }
}

/// Context for retrieving state and tracking dependencies.
pub struct SignalContext<'s> {
    sink: Option<&'s mut Sink>,
}

impl<'s> SignalContext<'s> {
    fn new() -> Self {
        Self { sink: None }
    }
}

pub trait BindSink: 'static {
    fn notify(self: Rc<Self>);
}

pub trait BindSource: 'static {
    fn unbind(self: Rc<Self>, key: BindKey);
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BindKey(usize);

struct SourceBinding {
    source: Rc<dyn BindSource>,
    key: BindKey,
}
impl SourceBinding {
    fn is_same(&self, source: &Rc<dyn BindSource>) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.source), Rc::as_ptr(source))
    }
    fn unbind(self) {
        self.source.unbind(self.key);
    }
}

struct Sink {
    sink: Weak<dyn BindSink>,
    sources: Vec<SourceBinding>,
}

/// The sources a sink read during its last evaluation.
#[derive(Default)]
pub struct SourceBindings(Vec<SourceBinding>);

impl SourceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the previous dependencies and calls `f`, recording every source it reads.
    pub fn update<T>(
        &mut self,
        sink: Weak<dyn BindSink>,
        f: impl FnOnce(&mut SignalContext) -> T,
    ) -> T {
        self.clear();
        let mut sink = Sink {
            sink,
            sources: Vec::new(),
        };
        let ret = f(&mut SignalContext {
            sink: Some(&mut sink),
        });
        self.0 = sink.sources;
        ret
    }
    pub fn clear(&mut self) {
        for b in self.0.drain(..) {
            b.unbind();
        }
    }
}
impl Drop for SourceBindings {
    fn drop(&mut self) {
        self.clear();
    }
}

/// The sinks that depend on a source.
#[derive(Default)]
pub struct SinkBindings(SlabMap<Weak<dyn BindSink>>);

impl SinkBindings {
    pub fn new() -> Self {
        Self(SlabMap::new())
    }
    pub fn bind(&mut self, this: Rc<dyn BindSource>, sc: &mut SignalContext) {
        let Some(sink) = &mut sc.sink else {
            return;
        };
        if sink.sources.iter().any(|b| b.is_same(&this)) {
            return;
        }
        let key = BindKey(self.0.insert(sink.sink.clone()));
        sink.sources.push(SourceBinding { source: this, key });
    }

    /// Unbinds the dependency identified by the given `key`.
    pub fn unbind(&mut self, key: BindKey) {
        self.0.remove(key.0);
    }

    /// Notifies every live sink.
    ///
    /// The sinks are collected before notifying, so a sink may bind or unbind while being notified.
    pub fn notify(this: &RefCell<Self>, _ac: &mut ActionContext) {
        let sinks: Vec<_> = this.borrow().0.values().filter_map(Weak::upgrade).collect();
        for sink in sinks {
            sink.notify();
        }
    }
}

/// A task that runs after the actions of the current update have finished.
pub struct Reaction(Box<dyn FnOnce()>);

impl Reaction {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }
    pub fn from_weak_fn<T: 'static>(this: Weak<T>, f: impl FnOnce(Rc<T>) + 'static) -> Self {
        Self::new(move || {
            if let Some(this) = this.upgrade() {
                f(this)
            }
        })
    }
    pub fn schedule(self) {
        let _ = Globals::try_with(|g| g.push_reaction(self));
    }
    fn run(self) {
        (self.0)()
    }
}

enum Action {
    Box(Box<dyn FnOnce(&mut ActionContext)>),
    Poll(Rc<AsyncAction>),
}

impl Action {
    fn call(self, ac: &mut ActionContext) {
        match self {
            Action::Box(f) => f(ac),
            Action::Poll(action) => action.poll(),
        }
    }
    fn schedule(self) {
        let _ = Globals::try_with(|g| g.push_action(self));
    }
}

/// Spawns a new action.
pub fn spawn_action(f: impl FnOnce(&mut ActionContext) + 'static) {
    Action::Box(Box::new(f)).schedule()
}

/// Spawns a new asynchronous action.
///
/// The future is first polled when the action runs, and again each time it is woken.
/// If the [`Runtime`] is dropped first, the future is dropped without completing.
pub fn spawn_action_async<Fut>(f: impl FnOnce(AsyncActionContext) -> Fut + 'static)
where
    Fut: Future<Output = ()> + 'static,
{
    spawn_action(|_ac| AsyncAction::start(f))
}

struct AsyncAction {
    is_running: Rc<Cell<bool>>,
    data: RefCell<Option<AsyncActionData>>,
}

struct AsyncActionData {
    future: Pin<Box<dyn Future<Output = ()>>>,
    waker: Waker,
}

impl AsyncAction {
    fn start<Fut>(f: impl FnOnce(AsyncActionContext) -> Fut)
    where
        Fut: Future<Output = ()> + 'static,
    {
        let is_running = Rc::new(Cell::new(false));
        let future = Box::pin(f(AsyncActionContext(is_running.clone())));
        let action = Rc::new(Self {
            is_running,
            data: RefCell::new(None),
        });
        let waker = Globals::with(|g| g.wakes.insert(action.clone()));
        *action.data.borrow_mut() = Some(AsyncActionData { future, waker });
        action.poll();
    }
    fn poll(&self) {
        let mut data = self.data.borrow_mut();
        let Some(d) = &mut *data else {
            return;
        };
        self.is_running.set(true);
        let poll = d.future.as_mut().poll(&mut Context::from_waker(&d.waker));
        self.is_running.set(false);
        if poll.is_ready() {
            let finished = data.take();
            drop(data);
            drop(finished);
        }
    }
    fn cancel(&self) {
        let data = self.data.borrow_mut().take();
        drop(data);
    }
}

/// Context for changing state from an asynchronous action.
pub struct AsyncActionContext(Rc<Cell<bool>>);

impl AsyncActionContext {
    /// Calls `f` with an [`ActionContext`].
    ///
    /// Panics if called while the owning action is not being polled.
    pub fn call<T>(&self, f: impl FnOnce(&mut ActionContext) -> T) -> T {
        assert!(
            self.0.get(),
            "`AsyncActionContext` can only be used while its action is running."
        );
        f(&mut ActionContext(()))
    }
}

#[derive(Default)]
struct WakeTable {
    actions: SlabMap<Rc<AsyncAction>>,
    requests: WakeRequests,
}

impl WakeTable {
    fn insert(&mut self, action: Rc<AsyncAction>) -> Waker {
        let key = self.actions.insert(action);
        Waker::from(Arc::new(RawWake {
            requests: self.requests.clone(),
            key,
        }))
    }
}

#[derive(Clone, Default)]
struct WakeRequests(Arc<Mutex<RawWakeRequests>>);

impl WakeRequests {
    fn lock(&self) -> MutexGuard<'_, RawWakeRequests> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Default)]
struct RawWakeRequests {
    wakes: Vec<usize>,
    drops: Vec<usize>,
    waker: Option<Waker>,
}
impl RawWakeRequests {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

struct RawWake {
    requests: WakeRequests,
    key: usize,
}

impl Wake for RawWake {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref()
    }
    fn wake_by_ref(self: &Arc<Self>) {
        let mut requests = self.requests.lock();
        requests.wakes.push(self.key);
        requests.wake();
    }
}
impl Drop for RawWake {
    fn drop(&mut self) {
        self.requests.lock().drops.push(self.key);
    }
}

use std::{
    cell::{Cell, Ref, RefCell},
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use futures::{channel::oneshot, FutureExt};
use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    core::{spawn_action_async, ActionContext, SignalContext},
    effect,
    store::{load_stored_data, remove_stored_data, save_stored_data},
    Error, KvStore, Result, State, StoreOptions, Subscription,
};


/// Options for [`Persisted::with_options`].
#[derive(Default)]
pub struct PersistOptions {
    store: StoreOptions,
    on_loaded: Option<Box<dyn FnOnce(&mut ActionContext)>>,
    on_stored: Option<Box<dyn FnMut(&mut ActionContext)>>,
}

impl PersistOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn database_name(mut self, database_name: impl Into<String>) -> Self {
        self.store = self.store.database_name(database_name);
        self
    }
    pub fn collection_name(mut self, collection_name: impl Into<String>) -> Self {
        self.store = self.store.collection_name(collection_name);
        self
    }

    /// Called once, when the first load finishes without error.
    pub fn on_loaded(mut self, f: impl FnOnce(&mut ActionContext) + 'static) -> Self {
        self.on_loaded = Some(Box::new(f));
        self
    }

    /// Called after each save that completed successfully.
    pub fn on_stored(mut self, f: impl FnMut(&mut ActionContext) + 'static) -> Self {
        self.on_stored = Some(Box::new(f));
        self
    }
}

/// A value that is mirrored to a [`KvStore`].
///
/// The value starts as `default_value` and is replaced by the stored value once it has been loaded.
/// After loading, every change is written back to the store,
/// unless the value equals what is already known to be stored.
///
/// Writes made before loading finishes are visible immediately but are not saved until then.
/// If loading finds a stored value, that value replaces them.
///
/// If the first load fails, [`is_loaded`](Self::is_loaded) stays `false` and nothing is saved.
///
/// Two `Persisted` with the same key do not see each other's writes.
pub struct Persisted<T: 'static> {
    binding: Rc<Binding<T>>,
    _effect: Subscription,
}

impl<T> Persisted<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
{
    /// Creates a binding in the default database and collection.
    ///
    /// Panics if no [`Runtime`](crate::Runtime) exists.
    pub fn new(store: Rc<dyn KvStore>, key: impl Into<String>, default_value: T) -> Self {
        Self::with_options(store, key, default_value, PersistOptions::default())
    }

    pub fn with_options(
        store: Rc<dyn KvStore>,
        key: impl Into<String>,
        default_value: T,
        options: PersistOptions,
    ) -> Self {
        let binding = Rc::new(Binding {
            key: key.into(),
            store,
            options: options.store,
            value: State::new(default_value.clone()),
            default_value,
            is_loaded: State::new(false),
            loaded: Cell::new(false),
            marker: RefCell::new(Marker::Unknown),
            revision: Cell::new(0),
            on_loaded: RefCell::new(options.on_loaded),
            on_stored: RefCell::new(options.on_stored),
        });
        Binding::load(&binding);
        let weak = Rc::downgrade(&binding);
        let effect = effect(move |sc| {
            if let Some(binding) = weak.upgrade() {
                let value = binding.value.get(sc);
                Binding::persist(&binding, &value);
            }
        });
        Self {
            binding,
            _effect: effect,
        }
    }

    pub fn key(&self) -> &str {
        &self.binding.key
    }
    pub fn options(&self) -> &StoreOptions {
        &self.binding.options
    }

    pub fn borrow<'a>(&'a self, sc: &mut SignalContext) -> Ref<'a, T> {
        self.binding.value.borrow(sc)
    }
    pub fn get(&self, sc: &mut SignalContext) -> T {
        self.binding.value.get(sc)
    }

    /// Returns `true` once the first load has finished. Never becomes `false` again.
    pub fn is_loaded(&self, sc: &mut SignalContext) -> bool {
        self.binding.is_loaded.get(sc)
    }

    pub fn set(&self, value: T, ac: &mut ActionContext) {
        self.binding.value.set_dedup(value, ac);
    }
    pub fn set_with(&self, f: impl FnOnce(&T) -> T, ac: &mut ActionContext) {
        self.binding.value.set_with(f, ac);
    }

    /// Resets the value to the default and removes it from the store.
    ///
    /// The removal proceeds even if the returned [`Deletion`] is dropped.
    pub fn delete(&self, ac: &mut ActionContext) -> Deletion {
        Binding::delete(&self.binding, ac)
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for Persisted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persisted")
            .field("key", &self.binding.key)
            .field("value", &self.binding.value)
            .field("loaded", &self.binding.loaded.get())
            .finish()
    }
}

/// Completion of [`Persisted::delete`].
///
/// Resolves to [`Error::Canceled`] if the [`Runtime`](crate::Runtime) is dropped first.
#[must_use = "dropping `Deletion` does not cancel the removal, but its result is lost"]
pub struct Deletion(oneshot::Receiver<Result<()>>);

impl Future for Deletion {
    type Output = Result<()>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.0.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// What is known about the stored value.
enum Marker<T> {
    Unknown,
    Absent,
    Stored(T),
}

impl<T: PartialEq> Marker<T> {
    /// An absent entry reads back as the default value.
    fn matches(&self, value: &T, default_value: &T) -> bool {
        match self {
            Marker::Unknown => false,
            Marker::Absent => value == default_value,
            Marker::Stored(stored) => value == stored,
        }
    }
}

struct Binding<T: 'static> {
    key: String,
    store: Rc<dyn KvStore>,
    options: StoreOptions,
    default_value: T,
    value: State<T>,
    is_loaded: State<bool>,
    loaded: Cell<bool>,
    marker: RefCell<Marker<T>>,
    // Bumped by every issued save and every delete.
    revision: Cell<u64>,
    on_loaded: RefCell<Option<Box<dyn FnOnce(&mut ActionContext)>>>,
    on_stored: RefCell<Option<Box<dyn FnMut(&mut ActionContext)>>>,
}

impl<T> Binding<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
{
    fn bump(&self) -> u64 {
        let revision = self.revision.get() + 1;
        self.revision.set(revision);
        revision
    }

    fn load(this: &Rc<Self>) {
        let weak = Rc::downgrade(this);
        let store = this.store.clone();
        let key = this.key.clone();
        let options = this.options.clone();
        spawn_action_async(move |aac| async move {
            let result = load_stored_data::<T>(&*store, &key, &options).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(found) => aac.call(|ac| Self::finish_load(&this, found, ac)),
                Err(e) => warn!("failed to load `{key}`: {e}"),
            }
        });
    }

    fn finish_load(this: &Rc<Self>, found: Option<T>, ac: &mut ActionContext) {
        // A delete issued while loading makes the loaded value stale.
        let found = if this.revision.get() == 0 { found } else { None };
        match found {
            Some(value) => {
                debug!("loaded `{}`", this.key);
                *this.marker.borrow_mut() = Marker::Stored(value.clone());
                this.value.set_dedup(value, ac);
            }
            None => {
                debug!("`{}` is not stored", this.key);
                *this.marker.borrow_mut() = Marker::Absent;
            }
        }
        this.loaded.set(true);
        this.is_loaded.set(true, ac);

        // Writes made before loading were skipped.
        let value = this.value.get(&mut ac.sc());
        Self::persist(this, &value);

        let on_loaded = this.on_loaded.borrow_mut().take();
        if let Some(f) = on_loaded {
            f(ac);
        }
    }

    fn persist(this: &Rc<Self>, value: &T) {
        if !this.loaded.get() {
            return;
        }
        if this.marker.borrow().matches(value, &this.default_value) {
            debug!("`{}` is unchanged", this.key);
            return;
        }
        let previous = this.marker.replace(Marker::Stored(value.clone()));
        let revision = this.bump();
        debug!("saving `{}`", this.key);

        let weak = Rc::downgrade(this);
        let store = this.store.clone();
        let key = this.key.clone();
        let options = this.options.clone();
        let value = value.clone();
        spawn_action_async(move |aac| async move {
            let result = save_stored_data(&*store, &key, &value, &options).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(()) => aac.call(|ac| this.stored(ac)),
                Err(e) => {
                    warn!("failed to save `{key}`: {e}");
                    if this.revision.get() == revision {
                        *this.marker.borrow_mut() = previous;
                    }
                }
            }
        });
    }

    fn stored(&self, ac: &mut ActionContext) {
        let f = self.on_stored.borrow_mut().take();
        if let Some(mut f) = f {
            f(ac);
            let mut on_stored = self.on_stored.borrow_mut();
            if on_stored.is_none() {
                *on_stored = Some(f);
            }
        }
    }

    fn delete(this: &Rc<Self>, ac: &mut ActionContext) -> Deletion {
        this.bump();
        *this.marker.borrow_mut() = Marker::Absent;
        this.value.set_dedup(this.default_value.clone(), ac);

        let (tx, rx) = oneshot::channel();
        let store = this.store.clone();
        let key = this.key.clone();
        let options = this.options.clone();
        spawn_action_async(move |_aac| async move {
            let result = remove_stored_data(&*store, &key, &options).await;
            if let Err(e) = &result {
                warn!("failed to remove `{key}`: {e}");
            }
            let _ = tx.send(result);
        });
        Deletion(rx)
    }
}

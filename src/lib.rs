//! Reactive state that is durably mirrored to a local key-value store.
//!
//! [`Persisted`] holds one value bound to one key.
//! It starts as a default value, is replaced by the stored value once loading finishes,
//! and writes every later change back to the store.
//!
//! ```no_run
//! use std::rc::Rc;
//! use sticky_state::{effect, Persisted, RedbStore, Runtime};
//!
//! let mut rt = Runtime::new();
//! let store = Rc::new(RedbStore::open("data").unwrap());
//! let counter = Persisted::new(store, "counter", 0);
//! let _e = effect({
//!     let counter = Rc::new(counter);
//!     move |sc| println!("{} (loaded: {})", counter.get(sc), counter.is_loaded(sc))
//! });
//! rt.update();
//! ```
pub mod core;
mod effect_fn;
mod error;
mod persisted;
mod state;
mod store;
mod subscription;
mod utils;

pub use crate::core::{
    spawn_action, spawn_action_async, ActionContext, AsyncActionContext, Runtime, SignalContext,
};
pub use effect_fn::*;
pub use error::*;
pub use persisted::*;
pub use state::*;
pub use store::*;
pub use subscription::*;

use std::{
    cell::{Ref, RefCell},
    rc::Rc,
};

use derive_ex::derive_ex;

use crate::{
    core::{BindKey, BindSource, SinkBindings},
    ActionContext, SignalContext,
};


/// Similar to `Rc<RefCell<T>>`, but with added functionality to observe changes.
///
/// Writes are visible to the next read immediately.
/// Effects that read the state run again on the next [`Runtime::update`](crate::Runtime::update).
#[derive(Default)]
#[derive_ex(Clone, bound())]
pub struct State<T: 'static>(Rc<StateNode<T>>);

impl<T: 'static> State<T> {
    /// Create a new `State` with the given initial value.
    pub fn new(value: T) -> Self {
        Self(Rc::new(StateNode {
            sinks: RefCell::new(SinkBindings::new()),
            value: RefCell::new(value),
        }))
    }

    /// Obtains a reference to the current value and adds a dependency on this `State` to the specified `SignalContext`.
    pub fn borrow<'a>(&'a self, sc: &mut SignalContext) -> Ref<'a, T> {
        self.0.bind(sc);
        self.0.value.borrow()
    }

    /// Gets the current value and adds a dependency on this `State` to the specified `SignalContext`.
    pub fn get(&self, sc: &mut SignalContext) -> T
    where
        T: Clone,
    {
        self.borrow(sc).clone()
    }

    /// Sets the value of the state and notifies the dependencies.
    pub fn set(&self, value: T, ac: &mut ActionContext) {
        *self.0.value.borrow_mut() = value;
        self.0.notify(ac);
    }

    /// Sets the value of the state and notifies the dependencies only if the current state is different from the specified value.
    ///
    /// Returns `true` if the value was changed.
    pub fn set_dedup(&self, value: T, ac: &mut ActionContext) -> bool
    where
        T: PartialEq,
    {
        {
            let mut this_value = self.0.value.borrow_mut();
            if *this_value == value {
                return false;
            }
            *this_value = value;
        }
        self.0.notify(ac);
        true
    }

    /// Computes a new value from the current one and stores it with [`set_dedup`](Self::set_dedup).
    pub fn set_with(&self, f: impl FnOnce(&T) -> T, ac: &mut ActionContext) -> bool
    where
        T: PartialEq,
    {
        let value = f(&self.0.value.borrow());
        self.set_dedup(value, ac)
    }
}
impl<T: std::fmt::Debug + 'static> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.value.try_borrow() {
            Ok(value) => std::fmt::Debug::fmt(&*value, f),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}
#[derive(Default)]
struct StateNode<T: 'static> {
    sinks: RefCell<SinkBindings>,
    value: RefCell<T>,
}
impl<T: 'static> StateNode<T> {
    fn bind(self: &Rc<Self>, sc: &mut SignalContext) {
        self.sinks.borrow_mut().bind(self.clone(), sc);
    }
    fn notify(&self, ac: &mut ActionContext) {
        SinkBindings::notify(&self.sinks, ac);
    }
}

impl<T: 'static> BindSource for StateNode<T> {
    fn unbind(self: Rc<Self>, key: BindKey) {
        self.sinks.borrow_mut().unbind(key);
    }
}

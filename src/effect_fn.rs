use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{
    core::{BindSink, Reaction, SourceBindings},
    SignalContext, Subscription,
};


/// Call a function each time a dependency changes.
///
/// The function is first called on the next [`Runtime::update`](crate::core::Runtime::update),
/// then once per update after any [`State`](crate::State) it read during its previous call has been written.
/// Several writes during the same update result in a single call that sees the last value.
///
/// If the [`Subscription`] returned from this function is dropped, the function will not be called again.
pub fn effect(f: impl FnMut(&mut SignalContext) + 'static) -> Subscription {
    let node = EffectNode::new(f);
    node.schedule();
    Subscription::from_rc(node)
}

struct EffectData<F> {
    f: F,
    sources: SourceBindings,
}

struct EffectNode<F> {
    data: RefCell<EffectData<F>>,
    is_scheduled: Cell<bool>,
}
impl<F> EffectNode<F>
where
    F: FnMut(&mut SignalContext) + 'static,
{
    fn new(f: F) -> Rc<Self> {
        Rc::new(Self {
            data: RefCell::new(EffectData {
                f,
                sources: SourceBindings::new(),
            }),
            is_scheduled: Cell::new(false),
        })
    }

    fn schedule(self: &Rc<Self>) {
        self.is_scheduled.set(true);
        Reaction::from_weak_fn(Rc::downgrade(self), Self::call).schedule()
    }
    fn call(self: Rc<Self>) {
        self.is_scheduled.set(false);
        let sink: Weak<dyn BindSink> = Rc::downgrade(&self) as Weak<Self>;
        let d = &mut *self.data.borrow_mut();
        let f = &mut d.f;
        d.sources.update(sink, |sc| f(sc));
    }
}

impl<F> BindSink for EffectNode<F>
where
    F: FnMut(&mut SignalContext) + 'static,
{
    fn notify(self: Rc<Self>) {
        if !self.is_scheduled.get() {
            self.schedule();
        }
    }
}

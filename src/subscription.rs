use std::{any::Any, rc::Rc};


/// Keeps an effect alive.
///
/// Dropping the `Subscription` ends it.
#[must_use]
pub struct Subscription(#[allow(unused)] Rc<dyn Any>);

impl Subscription {
    pub fn from_rc(rc: Rc<dyn Any>) -> Self {
        Subscription(rc)
    }
}

use std::{any::Any, cell::RefCell, rc::Rc};

use assert_call::call;
use futures::{
    channel::oneshot,
    future::{FutureExt, LocalBoxFuture},
};
use serde_json::Value;

use crate::{Connection, Error, Handle, KvStore, MemoryStore, Result};

pub fn call_on_drop(s: &'static str) -> impl Any {
    struct OnDrop(&'static str);
    impl Drop for OnDrop {
        fn drop(&mut self) {
            call!("{}", self.0);
        }
    }
    OnDrop(s)
}

/// A [`KvStore`] over [`MemoryStore`] that records every operation with `call!`.
///
/// Operations can be made to fail, or held until [`TestStore::release`] is called.
#[derive(Clone, Default)]
pub struct TestStore {
    memory: MemoryStore,
    control: Rc<RefCell<Control>>,
}

#[derive(Default)]
struct Control {
    fail_connect: bool,
    fail_put: bool,
    fail_delete: bool,
    hold: bool,
    held: Vec<oneshot::Sender<()>>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }
    pub fn fail_connect(&self, value: bool) {
        self.control.borrow_mut().fail_connect = value;
    }
    pub fn fail_put(&self, value: bool) {
        self.control.borrow_mut().fail_put = value;
    }
    pub fn fail_delete(&self, value: bool) {
        self.control.borrow_mut().fail_delete = value;
    }

    /// Operations started while holding wait until released.
    pub fn hold(&self, value: bool) {
        self.control.borrow_mut().hold = value;
    }

    /// Lets every held operation continue.
    pub fn release(&self) {
        let held = std::mem::take(&mut self.control.borrow_mut().held);
        for tx in held {
            let _ = tx.send(());
        }
    }
}

fn gate(control: &Rc<RefCell<Control>>) -> Option<oneshot::Receiver<()>> {
    let mut control = control.borrow_mut();
    if !control.hold {
        return None;
    }
    let (tx, rx) = oneshot::channel();
    control.held.push(tx);
    Some(rx)
}

fn failure(op: &str) -> Error {
    Error::backend(std::io::Error::other(format!("{op} failed")))
}

impl KvStore for TestStore {
    fn connect(
        &self,
        database_name: &str,
        collection_name: &str,
    ) -> LocalBoxFuture<'static, Result<Handle>> {
        call!("connect {database_name} {collection_name}");
        let control = self.control.clone();
        let inner = self.memory.connect(database_name, collection_name);
        async move {
            if control.borrow().fail_connect {
                return Err(failure("connect"));
            }
            let inner = inner.await?;
            Ok(Rc::new(TestConnection { inner, control }) as Handle)
        }
        .boxed_local()
    }
}

struct TestConnection {
    inner: Handle,
    control: Rc<RefCell<Control>>,
}

impl Connection for TestConnection {
    fn get(
        &self,
        collection_name: &str,
        key: &str,
    ) -> LocalBoxFuture<'static, Result<Option<Value>>> {
        call!("get {key}");
        let gate = gate(&self.control);
        let inner = self.inner.get(collection_name, key);
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            inner.await
        }
        .boxed_local()
    }

    fn put(
        &self,
        collection_name: &str,
        key: &str,
        value: Value,
    ) -> LocalBoxFuture<'static, Result<()>> {
        call!("put {key} {value}");
        let gate = gate(&self.control);
        let fail = self.control.borrow().fail_put;
        let inner = self.inner.put(collection_name, key, value);
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if fail {
                return Err(failure("put"));
            }
            inner.await
        }
        .boxed_local()
    }

    fn delete(&self, collection_name: &str, key: &str) -> LocalBoxFuture<'static, Result<()>> {
        call!("delete {key}");
        let gate = gate(&self.control);
        let fail = self.control.borrow().fail_delete;
        let inner = self.inner.delete(collection_name, key);
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if fail {
                return Err(failure("delete"));
            }
            inner.await
        }
        .boxed_local()
    }
}

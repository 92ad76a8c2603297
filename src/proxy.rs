use crate::*;
use futures::channel::oneshot;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The eventual result of a promise-style native call. Resolves with the
/// first positional result of a successful call, or with the reconstructed
/// error of a failed one.
#[derive(Debug)]
pub struct Promise {
    receiver: oneshot::Receiver<Result<Value, ErrorData>>
}

impl Promise {
    /// Creates a promise along with the failure and success handles that settle it.
    /// Whichever handle runs first settles the promise; later invocations are ignored.
    pub(crate) fn deferred() -> (Self, Callback, Callback) {
        let (sender, receiver) = oneshot::channel();
        let sender = Rc::new(Cell::new(Some(sender)));

        let fail_sender = sender.clone();
        let on_fail = Callback::new(move |args| {
            if let Some(sender) = fail_sender.take() {
                let descriptor = args.into_iter().next().unwrap_or_default();
                let _ = sender.send(Err(ErrorData::from_value(descriptor)));
            }
        });

        let on_success = Callback::new(move |args| {
            if let Some(sender) = sender.take() {
                let _ = sender.send(Ok(args.into_iter().next().unwrap_or_default()));
            }
        });

        (Self { receiver }, on_fail, on_success)
    }

    /// Takes the result if the promise has already settled, without waiting.
    pub fn try_take(&mut self) -> Option<Result<Value, BridgeError>> {
        match self.receiver.try_recv() {
            Ok(Some(result)) => Some(result.map_err(BridgeError::Remote)),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(Err(BridgeError::Abandoned()))
        }
    }
}

impl Future for Promise {
    type Output = Result<Value, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(BridgeError::Remote(error)),
            Err(oneshot::Canceled) => Err(BridgeError::Abandoned())
        })
    }
}

/// What happened when a method proxy was invoked.
#[derive(Debug)]
pub enum Invocation {
    /// A callback-style call was added to the queue.
    Queued,
    /// A promise-style call was added to the queue.
    Pending(Promise),
    /// A synchronous call completed immediately.
    Returned(Value)
}

/// A callable handle to one native method.
#[derive(Clone)]
pub struct MethodProxy {
    bridge: Weak<BridgeInner>,
    descriptor: MethodDescriptor
}

impl MethodProxy {
    pub(crate) fn new(bridge: &Bridge, descriptor: MethodDescriptor) -> Self {
        Self {
            bridge: Rc::downgrade(&bridge.0),
            descriptor
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> MethodKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Invokes the method according to its kind. Callback methods strip up
    /// to two trailing handles and enqueue; promise methods enqueue and hand
    /// back a [`Promise`]; sync methods go straight through the host's hook.
    pub fn invoke(&self, args: Vec<Arg>) -> Result<Invocation, BridgeError> {
        let bridge = self.bridge()?;
        let MethodDescriptor { module_id, method_id, kind, .. } = self.descriptor;

        match kind {
            MethodKind::Callback => {
                let SplitArgs { args, on_fail, on_success } = split_handles(args)?;
                bridge.enqueue(module_id, method_id, args, on_fail, on_success)?;
                Ok(Invocation::Queued)
            },
            MethodKind::Promise => {
                let args = data_only(args, kind)?;
                let (promise, on_fail, on_success) = Promise::deferred();
                bridge.enqueue(module_id, method_id, args, Some(on_fail), Some(on_success))?;
                Ok(Invocation::Pending(promise))
            },
            MethodKind::Sync => {
                let args = data_only(args, kind)?;
                bridge.call_sync(module_id, method_id, args).map(Invocation::Returned)
            }
        }
    }

    /// Invokes a callback-style method.
    pub fn call(&self, args: Vec<Arg>) -> Result<(), BridgeError> {
        self.expect_kind(MethodKind::Callback)?;
        self.invoke(args).map(|_| ())
    }

    /// Invokes a promise-style method.
    pub fn promise(&self, args: Vec<Value>) -> Result<Promise, BridgeError> {
        self.expect_kind(MethodKind::Promise)?;
        match self.invoke(args.into_iter().map(Arg::Data).collect())? {
            Invocation::Pending(promise) => Ok(promise),
            other => Err(BridgeError::from_invariant(format!("Promise method {} produced {other:?}", self.name())))
        }
    }

    /// Invokes a synchronous method, blocking until the host returns.
    pub fn call_sync(&self, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.expect_kind(MethodKind::Sync)?;
        match self.invoke(args.into_iter().map(Arg::Data).collect())? {
            Invocation::Returned(value) => Ok(value),
            other => Err(BridgeError::from_invariant(format!("Sync method {} produced {other:?}", self.name())))
        }
    }

    fn expect_kind(&self, kind: MethodKind) -> Result<(), BridgeError> {
        if self.descriptor.kind == kind {
            Ok(())
        }
        else {
            Err(BridgeError::from_invariant(format!("Method {} is a {:?} method, not a {kind:?} method", self.name(), self.descriptor.kind)))
        }
    }

    fn bridge(&self) -> Result<Bridge, BridgeError> {
        self.bridge.upgrade().map(Bridge).ok_or(BridgeError::BridgeDropped())
    }
}

impl std::fmt::Debug for MethodProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MethodProxy").field(&self.descriptor).finish()
    }
}

/// The script-side view of a native module: its constants plus one proxy per method.
#[derive(Clone, Debug)]
pub struct ModuleProxy {
    descriptor: Rc<ModuleDescriptor>,
    methods: Vec<MethodProxy>
}

impl ModuleProxy {
    pub(crate) fn new(bridge: &Bridge, descriptor: Rc<ModuleDescriptor>) -> Self {
        let methods = descriptor.methods.iter()
            .map(|x| MethodProxy::new(bridge, x.clone()))
            .collect();

        Self {
            descriptor,
            methods
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn id(&self) -> u32 {
        self.descriptor.id
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.descriptor.constants.get(name)
    }

    pub fn constants(&self) -> &BTreeMap<String, Value> {
        &self.descriptor.constants
    }

    pub fn method(&self, name: &str) -> Option<&MethodProxy> {
        self.methods.iter().find(|x| x.name() == name)
    }

    /// The method proxies, ordered by method ID.
    pub fn methods(&self) -> &[MethodProxy] {
        &self.methods
    }

    pub fn descriptor(&self) -> &Rc<ModuleDescriptor> {
        &self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promise_settles_once() {
        let (mut promise, on_fail, on_success) = Promise::deferred();
        assert!(promise.try_take().is_none());
        on_success.invoke(vec![Value::from("first"), Value::from("ignored")]);
        on_fail.invoke(vec![Value::from("late")]);
        assert_eq!(promise.try_take().unwrap().unwrap(), Value::from("first"));
    }

    #[test]
    fn promise_rejects_with_descriptor() {
        let (promise, on_fail, _on_success) = Promise::deferred();
        on_fail.invoke(vec![ErrorData::new("boom").with_field("code", 7).to_value()]);
        match futures::executor::block_on(promise) {
            Err(BridgeError::Remote(error)) => {
                assert_eq!(error.message, "boom");
                assert_eq!(error.field("code"), Some(&Value::from(7)));
            },
            other => panic!("unexpected result {other:?}")
        }
    }

    #[test]
    fn dropped_handles_abandon_promise() {
        let (promise, on_fail, on_success) = Promise::deferred();
        drop((on_fail, on_success));
        assert!(matches!(futures::executor::block_on(promise), Err(BridgeError::Abandoned())));
    }

    #[test]
    fn empty_success_resolves_null() {
        let (promise, _on_fail, on_success) = Promise::deferred();
        on_success.invoke(Vec::new());
        assert_eq!(futures::executor::block_on(promise).unwrap(), Value::Null);
    }

    #[test]
    fn proxy_reports_dropped_bridge() {
        let bridge = Bridge::new();
        bridge.register_module(ModuleConfig::new("M").with_method("a", MethodKind::Callback)).unwrap();
        let proxy = bridge.module("M").unwrap();
        drop(bridge);
        let result = proxy.method("a").unwrap().call(vec![Arg::data(1)]);
        assert!(matches!(result, Err(BridgeError::BridgeDropped())));
    }

    #[test]
    fn typed_helpers_check_kind() {
        let bridge = Bridge::new();
        bridge.register_module(ModuleConfig::new("M")
            .with_method("a", MethodKind::Callback)
            .with_method("b", MethodKind::Promise)).unwrap();
        let module = bridge.module("M").unwrap();

        assert!(matches!(module.method("a").unwrap().promise(Vec::new()), Err(BridgeError::InvariantViolation(_))));
        assert!(matches!(module.method("b").unwrap().call(Vec::new()), Err(BridgeError::InvariantViolation(_))));
        assert_eq!(bridge.status().queued_calls, 0);
    }

    #[test]
    fn promise_methods_reject_handles() {
        let bridge = Bridge::new();
        bridge.register_module(ModuleConfig::new("M").with_method("b", MethodKind::Promise)).unwrap();
        let method = bridge.module("M").unwrap().method("b").unwrap().clone();
        let result = method.invoke(vec![Arg::data(1), Arg::handle(|_| {})]);
        assert!(matches!(result, Err(BridgeError::InvariantViolation(_))));
        assert!(bridge.drain_pending().is_empty());
    }
}

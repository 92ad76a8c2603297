use crate::*;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, trace, warn};

/// Performs an immediate, blocking call into the host for sync methods.
pub trait SyncHook {
    fn call_sync(&self, module_id: u32, method_id: u32, args: Vec<Value>) -> Result<Value, ErrorData>;
}

impl<F: Fn(u32, u32, Vec<Value>) -> Result<Value, ErrorData>> SyncHook for F {
    fn call_sync(&self, module_id: u32, method_id: u32, args: Vec<Value>) -> Result<Value, ErrorData> {
        self(module_id, method_id, args)
    }
}

/// Told whenever the call queue goes from empty to non-empty. Hosts may
/// ignore it and poll [`Bridge::drain_pending`] on their own cadence.
pub trait FlushNotifier {
    fn on_pending(&self);
}

impl<F: Fn()> FlushNotifier for F {
    fn on_pending(&self) {
        self()
    }
}

/// Supplies the definition of a lazily registered module on first use.
pub trait ModuleConfigSource {
    fn require_module_config(&self, name: &str) -> Option<ModuleConfig>;
}

impl<F: Fn(&str) -> Option<ModuleConfig>> ModuleConfigSource for F {
    fn require_module_config(&self, name: &str) -> Option<ModuleConfig> {
        self(name)
    }
}

/// Assembles a [`Bridge`] from options and optional host hooks.
#[derive(Default)]
pub struct BridgeBuilder {
    options: BridgeOptions,
    sync_hook: Option<Box<dyn SyncHook>>,
    flush_notifier: Option<Box<dyn FlushNotifier>>,
    config_source: Option<Box<dyn ModuleConfigSource>>
}

impl BridgeBuilder {
    pub fn with_options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sync_hook(mut self, hook: impl SyncHook + 'static) -> Self {
        self.sync_hook = Some(Box::new(hook));
        self
    }

    pub fn with_flush_notifier(mut self, notifier: impl FlushNotifier + 'static) -> Self {
        self.flush_notifier = Some(Box::new(notifier));
        self
    }

    pub fn with_config_source(mut self, source: impl ModuleConfigSource + 'static) -> Self {
        self.config_source = Some(Box::new(source));
        self
    }

    pub fn build(self) -> Bridge {
        Bridge(Rc::new(BridgeInner {
            registry: RefCell::new(ModuleRegistry::new(&self.options)),
            options: self.options,
            queue: RefCell::default(),
            callbacks: RefCell::new(CallbackTable::new()),
            callables: RefCell::default(),
            proxies: RefCell::default(),
            sync_hook: self.sync_hook,
            flush_notifier: self.flush_notifier,
            config_source: self.config_source,
            callback_depth: Cell::new(0)
        }))
    }
}

/// A snapshot of the bridge's bookkeeping.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeStatus {
    /// Calls waiting for the next drain.
    pub queued_calls: usize,
    /// Callback entries which have not been dispatched yet.
    pub pending_callbacks: usize,
    /// Successfully registered native modules.
    pub modules: usize,
    /// Callable modules which exist.
    pub callable_modules: usize,
    /// Callable modules whose factory has not run yet.
    pub lazy_callable_modules: usize,
    /// Whether a handler or exported function is running right now.
    pub in_callback: bool
}

pub(crate) struct BridgeInner {
    options: BridgeOptions,
    registry: RefCell<ModuleRegistry>,
    queue: RefCell<CallQueue>,
    callbacks: RefCell<CallbackTable>,
    callables: RefCell<CallableModules>,
    proxies: RefCell<FxHashMap<String, ModuleProxy>>,
    sync_hook: Option<Box<dyn SyncHook>>,
    flush_notifier: Option<Box<dyn FlushNotifier>>,
    config_source: Option<Box<dyn ModuleConfigSource>>,
    callback_depth: Cell<u32>
}

/// The script side of the bridge: owns the module registry, the call queue
/// and the callback table, and exposes the entry points the host drives.
///
/// Clones share the same state. No internal borrow is held while user code
/// runs, so handlers may freely call back into the bridge.
#[derive(Clone)]
pub struct Bridge(pub(crate) Rc<BridgeInner>);

impl Bridge {
    /// Creates a bridge with default options and no host hooks.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.0.options
    }

    /// Registers a native module under the next module ID.
    pub fn register_module(&self, config: ModuleConfig) -> Result<Rc<ModuleDescriptor>, BridgeError> {
        let name = config.name.clone();
        let result = self.0.registry.borrow_mut().register(config);
        match &result {
            Ok(descriptor) => debug!(module = %descriptor.name, module_id = descriptor.id, lazy = descriptor.lazy, "Registered native module"),
            Err(error) => error!(module = %name, %error, "Failed to register native module")
        }
        result
    }

    /// Registers the host's module list in order. Each entry's module ID is
    /// its index in the list, including entries which are null or rejected.
    pub fn register_modules(&self, configs: Vec<Option<ModuleConfig>>) -> Vec<Result<Rc<ModuleDescriptor>, BridgeError>> {
        let results = self.0.registry.borrow_mut().register_all(configs);
        for result in &results {
            match result {
                Ok(descriptor) => debug!(module = %descriptor.name, module_id = descriptor.id, lazy = descriptor.lazy, "Registered native module"),
                Err(error) => error!(%error, "Failed to register native module")
            }
        }
        results
    }

    pub fn descriptor(&self, name: &str) -> Option<Rc<ModuleDescriptor>> {
        self.0.registry.borrow().by_name(name)
    }

    /// Gets the proxy for a native module, creating it on first access.
    /// Lazy modules are resolved through the host's module config source.
    pub fn module(&self, name: &str) -> Option<ModuleProxy> {
        let cached = self.0.proxies.borrow().get(name).cloned();
        if cached.is_some() {
            return cached;
        }

        let mut descriptor = self.descriptor(name)?;
        if descriptor.lazy {
            descriptor = self.resolve_lazy(name)?;
        }

        let proxy = ModuleProxy::new(self, descriptor);
        self.0.proxies.borrow_mut().insert(name.to_string(), proxy.clone());
        Some(proxy)
    }

    /// Invokes a native method by name.
    pub fn call(&self, module: &str, method: &str, args: Vec<Arg>) -> Result<Invocation, BridgeError> {
        let proxy = self.module(module)
            .ok_or_else(|| BridgeError::from_invariant(format!("Native module {module} is not available")))?;
        let method_proxy = proxy.method(method)
            .ok_or_else(|| BridgeError::from_invariant(format!("Native module {module} has no method {method}")))?;
        method_proxy.invoke(args)
    }

    /// Appends a call to the queue. If either handle is given, a callback
    /// entry is created and its ID travels with the call. IDs that do not
    /// name a registered method fail the call through its failure handle.
    pub fn enqueue(&self, module_id: u32, method_id: u32, args: Vec<Value>, on_fail: Option<Callback>, on_success: Option<Callback>) -> Result<(), BridgeError> {
        let validation = self.0.registry.borrow().validate_call(module_id, method_id);
        if let Err(error) = validation {
            error!(module_id, method_id, %error, "Rejecting native call");
            if let Some(on_fail) = on_fail {
                on_fail.invoke(vec![ErrorData::new(error.to_string()).to_value()]);
            }
            return Err(error);
        }

        let callback_id = if on_fail.is_some() || on_success.is_some() {
            Some(self.0.callbacks.borrow_mut().insert(CallbackEntry { on_fail, on_success }))
        }
        else {
            None
        };

        let was_empty = self.0.queue.borrow_mut().push(PendingCall { module_id, method_id, args, callback_id });
        trace!(module_id, method_id, ?callback_id, "Enqueued native call");

        if was_empty {
            if let Some(notifier) = &self.0.flush_notifier {
                notifier.on_pending();
            }
        }

        Ok(())
    }

    /// Performs a blocking call through the host's synchronous hook.
    pub(crate) fn call_sync(&self, module_id: u32, method_id: u32, args: Vec<Value>) -> Result<Value, BridgeError> {
        let hook = self.0.sync_hook.as_ref()
            .ok_or_else(|| BridgeError::from_capability(format!("No synchronous hook is installed to call method {method_id} of module {module_id}")))?;
        self.0.registry.borrow().validate_call(module_id, method_id)?;
        trace!(module_id, method_id, "Calling native method synchronously");
        hook.call_sync(module_id, method_id, args).map_err(BridgeError::Remote)
    }

    /// Makes a script-defined module available to [`Bridge::invoke_exported`].
    pub fn register_callable_module(&self, name: impl Into<String>, module: CallableModule) {
        self.0.callables.borrow_mut().register(name.into(), module);
    }

    /// Registers a callable module which is created the first time it is needed.
    pub fn register_lazy_callable_module(&self, name: impl Into<String>, factory: impl FnOnce() -> CallableModule + 'static) {
        self.0.callables.borrow_mut().register_lazy(name.into(), Box::new(factory));
    }

    /// Gets a callable module, running its factory if it has not been created yet.
    pub fn callable_module(&self, name: &str) -> Option<Rc<CallableModule>> {
        let existing = self.0.callables.borrow().get(name);
        if existing.is_some() {
            return existing;
        }

        let factory = self.0.callables.borrow_mut().take_factory(name)?;
        let module = factory();
        Some(self.0.callables.borrow_mut().materialize(name, module))
    }

    /// Hands the host every call enqueued since the previous drain.
    pub fn drain_pending(&self) -> QueueSnapshot {
        let snapshot = self.0.queue.borrow_mut().drain();
        if !snapshot.is_empty() {
            trace!(calls = snapshot.len(), "Drained call queue");
        }
        snapshot
    }

    /// Delivers a call's result to its handles, then drains. The entry is
    /// removed before its handle runs, so each ID fires at most once.
    pub fn dispatch_callback(&self, callback_id: CallbackId, args: Vec<Value>) -> QueueSnapshot {
        let entry = self.0.callbacks.borrow_mut().take(callback_id);
        match entry {
            Some(entry) => {
                trace!(%callback_id, "Dispatching callback");
                if let Err(panic) = self.run_guarded(|| entry.invoke(args)) {
                    error!(%callback_id, %panic, "Callback handler panicked");
                }
            },
            None => warn!(%callback_id, "No callback is waiting on this ID; it was already dispatched or never existed")
        }

        self.drain_pending()
    }

    /// Runs a function of a callable module, then drains. A missing module
    /// or method is logged and skipped.
    pub fn invoke_exported(&self, module: &str, method: &str, args: Vec<Value>) -> QueueSnapshot {
        match self.callable_module(module) {
            Some(callable) => match callable.method(method) {
                Some(function) => {
                    trace!(module, method, "Invoking exported function");
                    if let Err(panic) = self.run_guarded(|| function(args)) {
                        error!(module, method, %panic, "Exported function panicked");
                    }
                },
                None => warn!(module, method, "Callable module has no such method")
            },
            None => warn!(module, method, "No callable module is registered under this name")
        }

        self.drain_pending()
    }

    pub fn status(&self) -> BridgeStatus {
        let callables = self.0.callables.borrow();
        BridgeStatus {
            queued_calls: self.0.queue.borrow().len(),
            pending_callbacks: self.0.callbacks.borrow().len(),
            modules: self.0.registry.borrow().len(),
            callable_modules: callables.len(),
            lazy_callable_modules: callables.lazy_len(),
            in_callback: self.is_in_callback()
        }
    }

    /// Whether a callback handler or exported function is currently running.
    pub fn is_in_callback(&self) -> bool {
        self.0.callback_depth.get() > 0
    }

    fn resolve_lazy(&self, name: &str) -> Option<Rc<ModuleDescriptor>> {
        let Some(source) = &self.0.config_source else {
            warn!(module = %name, "Lazy module requested, but no module config source is installed");
            return None;
        };

        let Some(config) = source.require_module_config(name) else {
            warn!(module = %name, "Host did not supply a definition for lazy module");
            return None;
        };

        let resolved = self.0.registry.borrow_mut().resolve_lazy(name, config);
        match resolved {
            Ok(descriptor) => {
                debug!(module = %name, methods = descriptor.methods.len(), "Resolved lazy native module");
                Some(descriptor)
            },
            Err(error) => {
                error!(module = %name, %error, "Failed to resolve lazy native module");
                None
            }
        }
    }

    /// Runs user code, absorbing any panic it raises.
    fn run_guarded(&self, f: impl FnOnce()) -> Result<(), String> {
        let depth = &self.0.callback_depth;
        depth.set(depth.get() + 1);
        let result = catch_unwind(AssertUnwindSafe(f));
        depth.set(depth.get() - 1);
        result.map_err(panic_message)
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Bridge").field(&self.status()).finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    }
    else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    }
    else {
        "unknown panic payload".to_string()
    }
}

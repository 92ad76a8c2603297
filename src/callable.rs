use crate::*;
use tracing::{debug, warn};

/// A script-defined function that the host may call by name.
pub type ExportedFn = Rc<dyn Fn(Vec<Value>)>;

/// A named set of script-side functions exposed to the host, such as an
/// event emitter.
#[derive(Clone, Default)]
pub struct CallableModule {
    methods: FxHashMap<String, ExportedFn>
}

impl CallableModule {
    /// Creates a new, empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the given function, returning the modified module.
    pub fn with(mut self, name: impl Into<String>, f: impl Fn(Vec<Value>) + 'static) -> Self {
        self.insert(name, f);
        self
    }

    /// Adds or replaces a function.
    pub fn insert(&mut self, name: impl Into<String>, f: impl Fn(Vec<Value>) + 'static) {
        self.methods.insert(name.into(), Rc::new(f));
    }

    pub fn method(&self, name: &str) -> Option<ExportedFn> {
        self.methods.get(name).cloned()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CallableModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.methods.keys()).finish()
    }
}

/// Creates a callable module the first time it is requested.
pub type CallableFactory = Box<dyn FnOnce() -> CallableModule>;

/// The namespace searched when the host invokes an exported function.
#[derive(Default)]
pub(crate) struct CallableModules {
    modules: FxHashMap<String, Rc<CallableModule>>,
    factories: FxHashMap<String, CallableFactory>
}

impl CallableModules {
    pub fn register(&mut self, name: String, module: CallableModule) {
        self.factories.remove(&name);
        if self.modules.insert(name.clone(), Rc::new(module)).is_some() {
            warn!(module = %name, "Replacing an existing callable module");
        }
    }

    pub fn register_lazy(&mut self, name: String, factory: CallableFactory) {
        if self.modules.remove(&name).is_some() {
            warn!(module = %name, "Replacing an existing callable module with a lazy one");
        }
        self.factories.insert(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<Rc<CallableModule>> {
        self.modules.get(name).cloned()
    }

    /// Removes the factory for a module which has not been created yet.
    pub fn take_factory(&mut self, name: &str) -> Option<CallableFactory> {
        self.factories.remove(name)
    }

    /// Stores a module produced by its factory.
    pub fn materialize(&mut self, name: &str, module: CallableModule) -> Rc<CallableModule> {
        debug!(module = %name, "Created lazy callable module");
        self.modules.entry(name.to_string()).or_insert_with(|| Rc::new(module)).clone()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn lazy_len(&self) -> usize {
        self.factories.len()
    }
}

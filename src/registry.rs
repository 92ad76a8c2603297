use crate::*;
use tracing::{debug, warn};

/// Identifies a native method and how it is invoked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// The name of the method within its module.
    pub name: String,
    /// The module that owns the method.
    pub module_id: u32,
    /// The index of the method within its module's method list.
    pub method_id: u32,
    /// How the method is invoked.
    pub kind: MethodKind
}

/// A registered native module.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDescriptor {
    /// The unique name of the module.
    pub name: String,
    /// The module's position in the registration order.
    pub id: u32,
    /// Read-only values exposed on the module proxy.
    pub constants: BTreeMap<String, Value>,
    /// The methods of the module, ordered by method ID.
    pub methods: Vec<MethodDescriptor>,
    /// Whether the module definition is still to be requested from the host.
    pub lazy: bool
}

impl ModuleDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|x| x.name == name)
    }

    pub fn method_by_id(&self, method_id: u32) -> Option<&MethodDescriptor> {
        self.methods.get(method_id as usize)
    }
}

/// Assigns module and method IDs. The ID space is append-only: modules are
/// never unregistered, and their IDs are stable for the life of the bridge.
pub(crate) struct ModuleRegistry {
    reserved_prefixes: Vec<String>,
    modules: Vec<Option<Rc<ModuleDescriptor>>>,
    by_name: FxHashMap<String, u32>
}

impl ModuleRegistry {
    pub fn new(options: &BridgeOptions) -> Self {
        Self {
            reserved_prefixes: options.reserved_prefixes.clone(),
            modules: Vec::new(),
            by_name: FxHashMap::default()
        }
    }

    /// Registers a module under the next sequential ID. A rejected
    /// configuration leaves the registry untouched.
    pub fn register(&mut self, config: ModuleConfig) -> Result<Rc<ModuleDescriptor>, BridgeError> {
        self.check_unique(&config.name)?;
        let descriptor = Rc::new(self.describe(self.modules.len() as u32, config)?);
        self.insert(descriptor.clone());
        Ok(descriptor)
    }

    /// Registers the host's module list in order. Null and rejected entries
    /// still occupy their ID, so that IDs match the host's table indices.
    pub fn register_all(&mut self, configs: impl IntoIterator<Item = Option<ModuleConfig>>) -> Vec<Result<Rc<ModuleDescriptor>, BridgeError>> {
        let mut results = Vec::new();
        for config in configs {
            let id = self.modules.len() as u32;
            let Some(config) = config else {
                debug!(module_id = id, "Reserving module ID for null module config");
                self.modules.push(None);
                continue;
            };

            match self.check_unique(&config.name).and_then(|_| self.describe(id, config)) {
                Ok(descriptor) => {
                    let descriptor = Rc::new(descriptor);
                    self.insert(descriptor.clone());
                    results.push(Ok(descriptor));
                },
                Err(error) => {
                    self.modules.push(None);
                    results.push(Err(error));
                }
            }
        }
        results
    }

    /// Replaces a lazy module's placeholder with its full definition, keeping its ID.
    pub fn resolve_lazy(&mut self, name: &str, config: ModuleConfig) -> Result<Rc<ModuleDescriptor>, BridgeError> {
        let current = self.by_name(name).ok_or_else(|| BridgeError::from_naming(format!("Module {name} is not registered")))?;
        if !current.lazy {
            return Ok(current);
        }
        else if config.name != name {
            return Err(BridgeError::from_invariant(format!("Lazy module {name} was resolved with the config for {}", config.name)));
        }

        let descriptor = Rc::new(self.describe(current.id, config)?);
        self.modules[current.id as usize] = Some(descriptor.clone());
        Ok(descriptor)
    }

    pub fn by_name(&self, name: &str) -> Option<Rc<ModuleDescriptor>> {
        self.by_name.get(name).and_then(|&id| self.by_id(id))
    }

    pub fn by_id(&self, id: u32) -> Option<Rc<ModuleDescriptor>> {
        self.modules.get(id as usize).and_then(Clone::clone)
    }

    /// Ensures that the IDs name a registered method.
    pub fn validate_call(&self, module_id: u32, method_id: u32) -> Result<(), BridgeError> {
        let module = self.by_id(module_id)
            .ok_or_else(|| BridgeError::from_validation(format!("Module ID {module_id} is not registered")))?;
        if module.method_by_id(method_id).is_some() {
            Ok(())
        }
        else {
            Err(BridgeError::from_validation(format!("Module {} has no method with ID {method_id}", module.name)))
        }
    }

    /// The number of modules which were successfully registered.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    fn insert(&mut self, descriptor: Rc<ModuleDescriptor>) {
        self.by_name.insert(descriptor.name.clone(), descriptor.id);
        self.modules.push(Some(descriptor));
    }

    fn describe(&self, id: u32, config: ModuleConfig) -> Result<ModuleDescriptor, BridgeError> {
        self.check_name(&config.name)?;

        let lazy = config.is_lazy();
        let ModuleConfig { name, constants, methods, promise_method_ids, sync_method_ids } = config;
        let methods = methods.unwrap_or_default();
        let promise_method_ids = promise_method_ids.unwrap_or_default();
        let sync_method_ids = sync_method_ids.unwrap_or_default();

        for method_id in promise_method_ids.iter().chain(&sync_method_ids) {
            if *method_id as usize >= methods.len() {
                warn!(module = %name, method_id, "Ignoring method kind for a method ID outside the method list");
            }
        }

        let mut descriptors = Vec::with_capacity(methods.len());
        for (index, method_name) in methods.into_iter().enumerate() {
            let method_id = index as u32;
            let is_promise = promise_method_ids.contains(&method_id);
            let is_sync = sync_method_ids.contains(&method_id);

            let kind = match (is_promise, is_sync) {
                (true, true) => return Err(BridgeError::from_invariant(format!("Method {name}.{method_name} cannot be both a promise method and a sync hook"))),
                (true, false) => MethodKind::Promise,
                (false, true) => MethodKind::Sync,
                (false, false) => MethodKind::Callback
            };

            if descriptors.iter().any(|x: &MethodDescriptor| x.name == method_name) {
                return Err(BridgeError::from_invariant(format!("Method {name}.{method_name} is declared more than once")));
            }

            descriptors.push(MethodDescriptor {
                name: method_name,
                module_id: id,
                method_id,
                kind
            });
        }

        Ok(ModuleDescriptor {
            name,
            id,
            constants: constants.unwrap_or_default(),
            methods: descriptors,
            lazy
        })
    }

    fn check_name(&self, name: &str) -> Result<(), BridgeError> {
        if name.is_empty() {
            Err(BridgeError::from_naming("Module names must not be empty"))
        }
        else if let Some(prefix) = self.reserved_prefixes.iter().find(|x| name.starts_with(x.as_str())) {
            Err(BridgeError::from_naming(format!("Module prefix {prefix} should have been stripped by the native side for {name}")))
        }
        else {
            Ok(())
        }
    }

    fn check_unique(&self, name: &str) -> Result<(), BridgeError> {
        if self.by_name.contains_key(name) {
            Err(BridgeError::from_naming(format!("Module {name} is already registered")))
        }
        else {
            Ok(())
        }
    }
}

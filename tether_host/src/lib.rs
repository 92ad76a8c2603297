use std::cell::*;
use std::collections::*;
use std::rc::*;
pub use tether::*;
pub use tether_macro::native_module;
use tracing::{debug, trace, warn};

/// Announces one method of a native module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: String,
    pub kind: MethodKind
}

impl MethodSpec {
    pub fn new(name: impl Into<String>, kind: MethodKind) -> Self {
        Self {
            name: name.into(),
            kind
        }
    }
}

/// A module implemented on the native side. Method IDs are indices into
/// the list returned by [`NativeModule::methods`].
pub trait NativeModule {
    /// The name of the module. Reserved prefixes are stripped before the
    /// name is announced to the script side.
    fn name(&self) -> &str;

    /// Values exposed as constants on the module proxy.
    fn constants(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// The methods of this module, ordered by method ID.
    fn methods(&self) -> Vec<MethodSpec>;

    /// Runs a method, producing its positional results or a failure descriptor.
    fn invoke(&mut self, method_id: u32, args: Vec<Value>) -> Result<Vec<Value>, ErrorData>;
}

struct ModuleEntry {
    module: Box<dyn NativeModule>,
    lazy: bool
}

/// The native side's append-only list of modules. A module's ID is its
/// index in this table.
#[derive(Default)]
pub struct ModuleTable {
    options: BridgeOptions,
    modules: Vec<ModuleEntry>
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BridgeOptions) -> Self {
        Self {
            options,
            modules: Vec::new()
        }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Adds a module whose definition is announced up front, returning its ID.
    pub fn add(&mut self, module: impl NativeModule + 'static) -> u32 {
        self.push(Box::new(module), false)
    }

    /// Adds a module which is announced by name only; the script side asks
    /// for its definition the first time it is used.
    pub fn add_lazy(&mut self, module: impl NativeModule + 'static) -> u32 {
        self.push(Box::new(module), true)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// The module list as it is announced to the script side, in ID order.
    pub fn configs(&self) -> Vec<ModuleConfig> {
        self.modules.iter().map(|entry| if entry.lazy {
            ModuleConfig::new(self.exported_name(&*entry.module))
        }
        else {
            self.full_config(&*entry.module)
        }).collect()
    }

    /// The full definition of the module announced under the given name.
    pub fn config_for(&self, name: &str) -> Option<ModuleConfig> {
        self.modules.iter()
            .find(|entry| self.exported_name(&*entry.module) == name)
            .map(|entry| self.full_config(&*entry.module))
    }

    /// Runs a method. Unknown IDs are answered with a failure descriptor.
    pub fn call(&mut self, module_id: u32, method_id: u32, args: Vec<Value>) -> Result<Vec<Value>, ErrorData> {
        let entry = self.modules.get_mut(module_id as usize)
            .ok_or_else(|| ErrorData::new(format!("No native module has ID {module_id}")).with_field("code", "E_UNKNOWN_MODULE"))?;

        let method_count = entry.module.methods().len();
        if method_id as usize >= method_count {
            return Err(ErrorData::new(format!("Native module {} has no method with ID {method_id}", entry.module.name()))
                .with_field("code", "E_UNKNOWN_METHOD"));
        }

        entry.module.invoke(method_id, args)
    }

    fn push(&mut self, module: Box<dyn NativeModule>, lazy: bool) -> u32 {
        let id = self.modules.len() as u32;
        debug!(module = %module.name(), module_id = id, lazy, "Added native module");
        self.modules.push(ModuleEntry { module, lazy });
        id
    }

    fn exported_name<'a>(&self, module: &'a dyn NativeModule) -> &'a str {
        self.options.strip_reserved_prefix(module.name())
    }

    fn full_config(&self, module: &dyn NativeModule) -> ModuleConfig {
        let mut names = Vec::new();
        let mut promise_method_ids = Vec::new();
        let mut sync_method_ids = Vec::new();

        for (index, spec) in module.methods().into_iter().enumerate() {
            match spec.kind {
                MethodKind::Callback => {},
                MethodKind::Promise => promise_method_ids.push(index as u32),
                MethodKind::Sync => sync_method_ids.push(index as u32)
            }
            names.push(spec.name);
        }

        ModuleConfig {
            name: self.exported_name(module).to_string(),
            constants: Some(module.constants()),
            methods: Some(names),
            promise_method_ids: Some(promise_method_ids),
            sync_method_ids: Some(sync_method_ids)
        }
    }
}

/// Drives a [`Bridge`] from the native side: executes queued calls against
/// a [`ModuleTable`] and delivers their results back to the script side.
pub struct NativeHost {
    bridge: Bridge,
    table: Rc<RefCell<ModuleTable>>,
    flush_requested: Rc<Cell<bool>>
}

impl NativeHost {
    /// Creates a bridge wired to the table's modules and registers every
    /// module with it.
    pub fn new(table: ModuleTable) -> Result<Self, BridgeError> {
        let options = table.options().clone();
        let configs = table.configs();
        let table = Rc::new(RefCell::new(table));
        let flush_requested = Rc::new(Cell::new(false));

        let sync_table = table.clone();
        let source_table = table.clone();
        let requested = flush_requested.clone();

        let bridge = Bridge::builder()
            .with_options(options)
            .with_sync_hook(move |module_id: u32, method_id: u32, args: Vec<Value>| -> Result<Value, ErrorData> {
                let mut table = sync_table.try_borrow_mut()
                    .map_err(|_| ErrorData::new("Synchronous calls cannot run while another native method is executing"))?;
                let results = table.call(module_id, method_id, args)?;
                Ok(results.into_iter().next().unwrap_or_default())
            })
            .with_flush_notifier(move || requested.set(true))
            .with_config_source(move |name: &str| source_table.borrow().config_for(name))
            .build();

        for result in bridge.register_modules(configs.into_iter().map(Some).collect()) {
            result?;
        }

        Ok(Self {
            bridge,
            table,
            flush_requested
        })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Whether the script side has enqueued calls since the last flush.
    pub fn flush_requested(&self) -> bool {
        self.flush_requested.get()
    }

    /// Executes queued calls and delivers their results until the script
    /// side stops producing work. Returns the number of calls executed.
    pub fn flush(&self) -> Result<usize, BridgeError> {
        self.pump(self.bridge.drain_pending())
    }

    /// Invokes a function of a script-side callable module, then runs any
    /// calls it produced.
    pub fn emit(&self, module: &str, method: &str, args: Vec<Value>) -> Result<usize, BridgeError> {
        self.pump(self.bridge.invoke_exported(module, method, args))
    }

    fn pump(&self, mut snapshot: QueueSnapshot) -> Result<usize, BridgeError> {
        let mut executed = 0;
        self.flush_requested.set(false);

        while !snapshot.is_empty() {
            let mut next = QueueSnapshot::new();
            for call in Self::transport(&snapshot)?.into_calls() {
                executed += 1;
                let PendingCall { module_id, method_id, args, callback_id } = call;
                let outcome = self.execute(module_id, method_id, args);

                match callback_id {
                    Some(callback_id) => {
                        let result_args = match outcome {
                            Ok(results) => std::iter::once(Value::Null).chain(results).collect(),
                            Err(error) => vec![error.to_value()]
                        };
                        for follow_up in self.bridge.dispatch_callback(callback_id, result_args).into_calls() {
                            next.push(follow_up);
                        }
                    },
                    None => if let Err(error) = outcome {
                        warn!(module_id, method_id, %error, "Native call without a callback failed");
                    }
                }
            }

            for late in self.bridge.drain_pending().into_calls() {
                next.push(late);
            }

            self.flush_requested.set(false);
            snapshot = next;
        }

        Ok(executed)
    }

    /// Moves a batch across the byte boundary between the two runtimes.
    fn transport(snapshot: &QueueSnapshot) -> Result<QueueSnapshot, BridgeError> {
        let bytes = snapshot.encode()?;
        trace!(calls = snapshot.len(), bytes = bytes.len(), "Transferring call batch");
        QueueSnapshot::decode(&bytes)
    }

    fn execute(&self, module_id: u32, method_id: u32, args: Vec<Value>) -> Result<Vec<Value>, ErrorData> {
        let mut table = self.table.try_borrow_mut()
            .map_err(|_| ErrorData::new("Native modules are already executing a call"))?;
        trace!(module_id, method_id, "Executing native call");
        table.call(module_id, method_id, args)
    }
}

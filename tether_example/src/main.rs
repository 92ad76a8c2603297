use std::collections::*;
use tether_host::*;
use tracing::info;

pub struct DeviceInfo {
    model: String
}

#[native_module("RCTDeviceInfo")]
impl DeviceInfo {
    #[constants]
    fn device_constants(&self) -> BTreeMap<String, Value> {
        let mut constants = BTreeMap::new();
        constants.insert("model".to_string(), Value::from(self.model.as_str()));
        constants.insert("screenWidth".to_string(), Value::from(1080));
        constants
    }

    #[sync]
    fn battery_level(&self) -> f64 {
        0.87
    }
}

pub struct Storage {
    items: BTreeMap<String, String>
}

#[native_module("RKStorage")]
impl Storage {
    fn set_item(&mut self, key: String, value: String) {
        println!("Host stores {key} = {value}");
        self.items.insert(key, value);
    }

    #[promise]
    fn get_item(&self, key: String) -> Result<String, ErrorData> {
        self.items.get(&key).cloned()
            .ok_or_else(|| ErrorData::new(format!("No item stored under {key}")).with_field("key", key))
    }
}

fn main() -> Result<(), BridgeError> {
    // Log everything the bridge absorbs, filtered by RUST_LOG
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    // Announce the native modules
    let mut table = ModuleTable::new();
    table.add(DeviceInfo { model: "simulator".to_string() });
    table.add_lazy(Storage { items: BTreeMap::new() });
    let host = NativeHost::new(table)?;
    let bridge = host.bridge().clone();

    // Read constants and make a synchronous call
    let device = bridge.module("DeviceInfo")
        .ok_or_else(|| BridgeError::from_invariant("DeviceInfo is not available"))?;
    println!("Running on {}", device.constant("model").cloned().unwrap_or_default());
    let battery = device.method("battery_level")
        .ok_or_else(|| BridgeError::from_invariant("DeviceInfo has no battery_level method"))?
        .call_sync(Vec::new())?;
    println!("Battery level is {battery}");

    // Storage is announced lazily; this resolves its definition
    let get_item = bridge.module("Storage")
        .and_then(|storage| storage.method("get_item").cloned())
        .ok_or_else(|| BridgeError::from_invariant("Storage has no get_item method"))?;

    // Register an event emitter the host can call into
    bridge.register_callable_module("Events", CallableModule::new().with("settingsChanged", move |args| {
        println!("Script received settingsChanged{args:?}");
        if let Err(error) = get_item.promise(args.into_iter().take(1).collect()) {
            println!("Failed to request item: {error}");
        }
    }));

    // Queue calls with callbacks and promises, then let the host run them
    bridge.call("Storage", "set_item", vec![
        Arg::data("theme"),
        Arg::data("dark"),
        Arg::handle(|error| println!("Failed to store theme: {error:?}")),
        Arg::handle(|_| println!("Theme stored"))
    ])?;

    let theme = match bridge.call("Storage", "get_item", vec![Arg::data("theme")])? {
        Invocation::Pending(promise) => promise,
        other => return Err(BridgeError::from_invariant(format!("Unexpected invocation {other:?}")))
    };
    let missing = match bridge.call("Storage", "get_item", vec![Arg::data("language")])? {
        Invocation::Pending(promise) => promise,
        other => return Err(BridgeError::from_invariant(format!("Unexpected invocation {other:?}")))
    };

    let executed = host.flush()?;
    info!(executed, "Flushed pending calls");

    println!("Theme is {}", futures::executor::block_on(theme)?);
    match futures::executor::block_on(missing) {
        Ok(value) => println!("Language is {value}"),
        Err(error) => println!("Language lookup failed: {error}")
    }

    // Call into the script side and run whatever it queued
    host.emit("Events", "settingsChanged", vec![Value::from("theme")])?;
    println!("Bridge status: {:?}", bridge.status());

    Ok(())
}

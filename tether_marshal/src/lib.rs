pub use bincode;
pub use serde;
pub use crate::value::*;
use serde::*;
use std::collections::*;
use std::mem::*;
use thiserror::*;

mod value;

/// Identifies one enqueued call whose result the script side is waiting on.
/// Identifiers are handed out in increasing order and never reused.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Creates a callback ID from the given integer.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Gets the ID that follows this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for CallbackId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<CallbackId> for u64 {
    fn from(value: CallbackId) -> Self {
        value.0
    }
}

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Determines how a native method is invoked from the script side.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodKind {
    /// Queued; results are delivered through optional failure and success handles.
    #[default]
    Callback,
    /// Queued; results are delivered through a future.
    Promise,
    /// Executed immediately through the host's synchronous hook.
    Sync
}

/// The order-significant wire form of a module configuration.
pub type ModuleConfigTuple = (String, Option<BTreeMap<String, Value>>, Option<Vec<String>>, Option<Vec<u32>>, Option<Vec<u32>>);

/// Describes a native module as the host announces it:
/// `[name, constants, methods, promiseMethodIds, syncMethodIds]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ModuleConfigTuple", into = "ModuleConfigTuple")]
pub struct ModuleConfig {
    /// The unique name of the module.
    pub name: String,
    /// Constant values exposed on the module proxy.
    pub constants: Option<BTreeMap<String, Value>>,
    /// The method names, ordered by method ID.
    pub methods: Option<Vec<String>>,
    /// The IDs of methods which return promises.
    pub promise_method_ids: Option<Vec<u32>>,
    /// The IDs of methods which are called synchronously.
    pub sync_method_ids: Option<Vec<u32>>
}

impl ModuleConfig {
    /// Creates a configuration with no constants and no methods. Until either
    /// is added, the module is loaded lazily.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a constant to the configuration, returning the modified configuration.
    pub fn with_constant(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.get_or_insert_with(BTreeMap::new).insert(name.into(), value.into());
        self
    }

    /// Appends a method of the given kind, returning the modified configuration.
    pub fn with_method(mut self, name: impl Into<String>, kind: MethodKind) -> Self {
        let methods = self.methods.get_or_insert_with(Vec::new);
        let id = methods.len() as u32;
        methods.push(name.into());

        match kind {
            MethodKind::Callback => {},
            MethodKind::Promise => self.promise_method_ids.get_or_insert_with(Vec::new).push(id),
            MethodKind::Sync => self.sync_method_ids.get_or_insert_with(Vec::new).push(id)
        }

        self
    }

    /// Whether this configuration defers its definition until first use.
    pub fn is_lazy(&self) -> bool {
        self.constants.is_none() && self.methods.is_none()
    }
}

impl From<ModuleConfigTuple> for ModuleConfig {
    fn from((name, constants, methods, promise_method_ids, sync_method_ids): ModuleConfigTuple) -> Self {
        Self {
            name,
            constants,
            methods,
            promise_method_ids,
            sync_method_ids
        }
    }
}

impl From<ModuleConfig> for ModuleConfigTuple {
    fn from(value: ModuleConfig) -> Self {
        (value.name, value.constants, value.methods, value.promise_method_ids, value.sync_method_ids)
    }
}

/// One row of a queue snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingCall {
    /// The module that owns the method.
    pub module_id: u32,
    /// The index of the method within its module.
    pub method_id: u32,
    /// The data arguments of the call.
    pub args: Vec<Value>,
    /// The callback awaiting the result, if any.
    pub callback_id: Option<CallbackId>
}

/// The order-significant wire form of a queue snapshot.
pub type SnapshotColumns = (Vec<u32>, Vec<u32>, Vec<Vec<Value>>, Vec<Option<CallbackId>>);

/// A columnar batch of calls: `[moduleIds, methodIds, args, callbackIds]`.
/// All four columns always have the same length.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotColumns", into = "SnapshotColumns")]
pub struct QueueSnapshot {
    module_ids: Vec<u32>,
    method_ids: Vec<u32>,
    args: Vec<Vec<Value>>,
    callback_ids: Vec<Option<CallbackId>>
}

impl QueueSnapshot {
    /// Creates a new, empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call to every column.
    pub fn push(&mut self, call: PendingCall) {
        self.module_ids.push(call.module_id);
        self.method_ids.push(call.method_id);
        self.args.push(call.args);
        self.callback_ids.push(call.callback_id);
    }

    /// The number of calls in the batch.
    pub fn len(&self) -> usize {
        self.module_ids.len()
    }

    /// Whether the batch holds no calls.
    pub fn is_empty(&self) -> bool {
        self.module_ids.is_empty()
    }

    pub fn module_ids(&self) -> &[u32] {
        &self.module_ids
    }

    pub fn method_ids(&self) -> &[u32] {
        &self.method_ids
    }

    pub fn args(&self) -> &[Vec<Value>] {
        &self.args
    }

    pub fn callback_ids(&self) -> &[Option<CallbackId>] {
        &self.callback_ids
    }

    /// Gets the call at the given row.
    pub fn get(&self, index: usize) -> Option<PendingCall> {
        (index < self.len()).then(|| PendingCall {
            module_id: self.module_ids[index],
            method_id: self.method_ids[index],
            args: self.args[index].clone(),
            callback_id: self.callback_ids[index]
        })
    }

    /// Consumes the snapshot, yielding its calls in insertion order.
    pub fn into_calls(self) -> impl Iterator<Item = PendingCall> {
        self.module_ids.into_iter()
            .zip(self.method_ids)
            .zip(self.args)
            .zip(self.callback_ids)
            .map(|(((module_id, method_id), args), callback_id)| PendingCall { module_id, method_id, args, callback_id })
    }

    /// Writes the snapshot as four sections, one per column.
    pub fn encode(&self) -> Result<Vec<u8>, BridgeError> {
        let mut buffer = Vec::new();
        let mut section_writer = SectionedBufferWriter::new(&mut buffer);
        bincode::serialize_into(section_writer.section(), &self.module_ids).map_err(BridgeError::Serialization)?;
        bincode::serialize_into(section_writer.section(), &self.method_ids).map_err(BridgeError::Serialization)?;
        bincode::serialize_into(section_writer.section(), &self.args).map_err(BridgeError::Serialization)?;
        bincode::serialize_into(section_writer.section(), &self.callback_ids).map_err(BridgeError::Serialization)?;
        Ok(buffer)
    }

    /// Reads a snapshot previously written by [`QueueSnapshot::encode`].
    pub fn decode(buffer: &[u8]) -> Result<Self, BridgeError> {
        let mut section_reader = SectionedBufferReader::new(buffer);
        let module_ids = bincode::deserialize(section_reader.section()?).map_err(BridgeError::Serialization)?;
        let method_ids = bincode::deserialize(section_reader.section()?).map_err(BridgeError::Serialization)?;
        let args = bincode::deserialize(section_reader.section()?).map_err(BridgeError::Serialization)?;
        let callback_ids = bincode::deserialize(section_reader.section()?).map_err(BridgeError::Serialization)?;
        Self::try_from((module_ids, method_ids, args, callback_ids))
    }
}

impl TryFrom<SnapshotColumns> for QueueSnapshot {
    type Error = BridgeError;

    fn try_from((module_ids, method_ids, args, callback_ids): SnapshotColumns) -> Result<Self, Self::Error> {
        let len = module_ids.len();
        if method_ids.len() == len && args.len() == len && callback_ids.len() == len {
            Ok(Self {
                module_ids,
                method_ids,
                args,
                callback_ids
            })
        }
        else {
            Err(BridgeError::from_serialization(format!("Snapshot columns had mismatched lengths ({}, {}, {}, {})",
                len, method_ids.len(), args.len(), callback_ids.len())))
        }
    }
}

impl From<QueueSnapshot> for SnapshotColumns {
    fn from(value: QueueSnapshot) -> Self {
        (value.module_ids, value.method_ids, value.args, value.callback_ids)
    }
}

/// Writes a sequence of length-prefixed sections into a byte buffer.
pub struct SectionedBufferWriter<'a> {
    buffer: &'a mut Vec<u8>
}

impl<'a> SectionedBufferWriter<'a> {
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        buffer.clear();
        Self {
            buffer
        }
    }

    /// Starts a new section. Its length prefix is filled in when the section is dropped.
    pub fn section(&mut self) -> SectionedBufferWrite {
        SectionedBufferWrite::new(self.buffer)
    }

    pub fn into_inner(self) -> &'a mut Vec<u8> {
        self.buffer
    }
}

pub struct SectionedBufferWrite<'a> {
    buffer: &'a mut Vec<u8>,
    start_position: usize
}

impl<'a> SectionedBufferWrite<'a> {
    fn new(buffer: &'a mut Vec<u8>) -> Self {
        let start_position = buffer.len();
        buffer.extend_from_slice(&0u32.to_le_bytes());

        Self {
            buffer,
            start_position
        }
    }
}

impl<'a> Drop for SectionedBufferWrite<'a> {
    fn drop(&mut self) {
        let data_begin = self.start_position + size_of::<u32>();
        let data_len = (self.buffer.len() - data_begin) as u32;
        self.buffer[self.start_position..data_begin].copy_from_slice(&data_len.to_le_bytes());
    }
}

impl<'a> std::io::Write for SectionedBufferWrite<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::Write::write(self.buffer, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(self.buffer)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        std::io::Write::write_all(self.buffer, buf)
    }
}

/// Reads the sections produced by a [`SectionedBufferWriter`].
pub struct SectionedBufferReader<'a> {
    buffer: &'a [u8]
}

impl<'a> SectionedBufferReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer
        }
    }

    pub fn section(&mut self) -> Result<&'a [u8], BridgeError> {
        let buffer = self.buffer;
        if buffer.len() < size_of::<u32>() {
            Err(BridgeError::from_serialization("Sectioned buffer incomplete"))
        }
        else {
            let mut len_bytes = [0; size_of::<u32>()];
            len_bytes.copy_from_slice(&buffer[0..size_of::<u32>()]);
            let len = u32::from_le_bytes(len_bytes) as usize;
            if buffer.len() < size_of::<u32>() + len {
                Err(BridgeError::from_serialization("Sectioned buffer incomplete"))
            }
            else {
                let (beginning, rest) = buffer[size_of::<u32>()..].split_at(len);
                self.buffer = rest;
                Ok(beginning)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid call: {0}")]
    Validation(String),
    #[error("Invalid module name: {0}")]
    Naming(String),
    #[error("Invariant Violation: {0}")]
    InvariantViolation(String),
    #[error("Capability unavailable: {0}")]
    Capability(String),
    #[error("{0}")]
    Remote(ErrorData),
    #[error("The call was abandoned before a result was delivered")]
    Abandoned(),
    #[error("The bridge that created this proxy no longer exists")]
    BridgeDropped(),
    #[error("Expected a value of type {expected}, found {found}")]
    Conversion {
        expected: &'static str,
        found: &'static str
    },
    #[error("{0}")]
    Serialization(bincode::Error)
}

impl BridgeError {
    pub fn from_validation(x: impl std::fmt::Display) -> Self {
        Self::Validation(x.to_string())
    }

    pub fn from_naming(x: impl std::fmt::Display) -> Self {
        Self::Naming(x.to_string())
    }

    pub fn from_invariant(x: impl std::fmt::Display) -> Self {
        Self::InvariantViolation(x.to_string())
    }

    pub fn from_capability(x: impl std::fmt::Display) -> Self {
        Self::Capability(x.to_string())
    }

    pub fn from_serialization(x: impl std::fmt::Display) -> Self {
        Self::Serialization(bincode::Error::new(bincode::ErrorKind::Custom(x.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> QueueSnapshot {
        let mut snapshot = QueueSnapshot::new();
        snapshot.push(PendingCall { module_id: 0, method_id: 2, args: vec![Value::from("key")], callback_id: Some(CallbackId::new(7)) });
        snapshot.push(PendingCall { module_id: 1, method_id: 0, args: vec![], callback_id: None });
        snapshot
    }

    #[test]
    fn snapshot_columns_stay_aligned() {
        let snapshot = sample_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.module_ids(), &[0, 1]);
        assert_eq!(snapshot.method_ids(), &[2, 0]);
        assert_eq!(snapshot.args().len(), 2);
        assert_eq!(snapshot.callback_ids(), &[Some(CallbackId::new(7)), None]);
    }

    #[test]
    fn snapshot_survives_sectioned_encoding() {
        let snapshot = sample_snapshot();
        let bytes = snapshot.encode().unwrap();
        assert_eq!(QueueSnapshot::decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let bytes = sample_snapshot().encode().unwrap();
        let result = QueueSnapshot::decode(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(BridgeError::Serialization(_))));
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let columns: SnapshotColumns = (vec![0, 1], vec![0], vec![vec![], vec![]], vec![None, None]);
        assert!(QueueSnapshot::try_from(columns).is_err());

        let bytes = bincode::serialize(&(vec![0u32], Vec::<u32>::new(), vec![Vec::<Value>::new()], vec![None::<CallbackId>])).unwrap();
        assert!(bincode::deserialize::<QueueSnapshot>(&bytes).is_err());
    }

    #[test]
    fn into_calls_preserves_order() {
        let calls = sample_snapshot().into_calls().collect::<Vec<_>>();
        assert_eq!(calls[0].method_id, 2);
        assert_eq!(calls[0].callback_id, Some(CallbackId::new(7)));
        assert_eq!(calls[1].module_id, 1);
        assert_eq!(calls[1].callback_id, None);
    }

    #[test]
    fn module_config_builder_tracks_kinds() {
        let config = ModuleConfig::new("Storage")
            .with_constant("VERSION", 3)
            .with_method("getItem", MethodKind::Promise)
            .with_method("setItem", MethodKind::Callback)
            .with_method("size", MethodKind::Sync);

        assert!(!config.is_lazy());
        assert_eq!(config.methods.as_deref(), Some(&["getItem".to_string(), "setItem".to_string(), "size".to_string()][..]));
        assert_eq!(config.promise_method_ids, Some(vec![0]));
        assert_eq!(config.sync_method_ids, Some(vec![2]));
        assert!(ModuleConfig::new("Later").is_lazy());
    }

    #[test]
    fn module_config_uses_tuple_wire_form() {
        let config = ModuleConfig::new("M").with_constant("K", 1).with_method("a", MethodKind::Callback);
        let as_tuple: ModuleConfigTuple = config.clone().into();
        let bytes = bincode::serialize(&as_tuple).unwrap();
        assert_eq!(bincode::deserialize::<ModuleConfig>(&bytes).unwrap(), config);
    }
}

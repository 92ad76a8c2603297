use crate::*;

/// The handles waiting on one enqueued call.
pub(crate) struct CallbackEntry {
    pub on_fail: Option<Callback>,
    pub on_success: Option<Callback>
}

impl CallbackEntry {
    /// Routes a result to the matching handle. A non-null first element is
    /// an error descriptor for the failure handle; otherwise the remaining
    /// elements are positional results for the success handle.
    pub fn invoke(self, args: Vec<Value>) {
        let mut args = args.into_iter();
        match args.next() {
            Some(error) if !error.is_null() => {
                if let Some(on_fail) = self.on_fail {
                    on_fail.invoke(vec![error]);
                }
            },
            _ => {
                if let Some(on_success) = self.on_success {
                    on_success.invoke(args.collect());
                }
            }
        }
    }
}

/// Maps callback IDs to their pending handles.
pub(crate) struct CallbackTable {
    next_id: CallbackId,
    entries: FxHashMap<CallbackId, CallbackEntry>
}

impl CallbackTable {
    pub fn new() -> Self {
        Self {
            next_id: CallbackId::default(),
            entries: FxHashMap::default()
        }
    }

    /// Stores the handles under a fresh ID.
    pub fn insert(&mut self, entry: CallbackEntry) -> CallbackId {
        let id = self.next_id;
        self.next_id = id.next();
        self.entries.insert(id, entry);
        id
    }

    /// Removes the entry for the given ID, so that it can be invoked exactly once.
    pub fn take(&mut self, id: CallbackId) -> Option<CallbackEntry> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(log: &Rc<RefCell<Vec<(&'static str, Vec<Value>)>>>, tag: &'static str) -> Option<Callback> {
        let log = log.clone();
        Some(Callback::new(move |args| log.borrow_mut().push((tag, args))))
    }

    #[test]
    fn ids_increase_and_are_not_reused() {
        let mut table = CallbackTable::new();
        let first = table.insert(CallbackEntry { on_fail: None, on_success: None });
        assert!(table.take(first).is_some());
        let second = table.insert(CallbackEntry { on_fail: None, on_success: None });
        assert!(second > first);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn take_removes_entry() {
        let mut table = CallbackTable::new();
        let id = table.insert(CallbackEntry { on_fail: None, on_success: None });
        assert!(table.take(id).is_some());
        assert!(table.take(id).is_none());
    }

    #[test]
    fn null_first_element_routes_to_success() {
        let log = Rc::new(RefCell::new(Vec::new()));
        CallbackEntry { on_fail: recording(&log, "fail"), on_success: recording(&log, "success") }
            .invoke(vec![Value::Null, Value::from(42), Value::from("b")]);
        assert_eq!(*log.borrow(), vec![("success", vec![Value::from(42), Value::from("b")])]);
    }

    #[test]
    fn empty_result_routes_to_success() {
        let log = Rc::new(RefCell::new(Vec::new()));
        CallbackEntry { on_fail: recording(&log, "fail"), on_success: recording(&log, "success") }.invoke(Vec::new());
        assert_eq!(*log.borrow(), vec![("success", Vec::new())]);
    }

    #[test]
    fn error_descriptor_routes_to_failure() {
        let log = Rc::new(RefCell::new(Vec::new()));
        CallbackEntry { on_fail: recording(&log, "fail"), on_success: recording(&log, "success") }
            .invoke(vec![Value::from("boom"), Value::from(1)]);
        assert_eq!(*log.borrow(), vec![("fail", vec![Value::from("boom")])]);
    }
}

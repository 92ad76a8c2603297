use crate::*;

/// A script-side function that receives the outcome of a native call.
/// A callback runs at most once.
pub struct Callback(Box<dyn FnOnce(Vec<Value>)>);

impl Callback {
    /// Wraps the given closure as a callback.
    pub fn new(f: impl FnOnce(Vec<Value>) + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Consumes the callback, running it with the given arguments.
    pub fn invoke(self, args: Vec<Value>) {
        (self.0)(args)
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Callback")
    }
}

/// An argument passed to a method proxy: either plain data or a handle
/// that will receive the call's outcome.
#[derive(Debug)]
pub enum Arg {
    Data(Value),
    Handle(Callback)
}

impl Arg {
    /// Creates a data argument.
    pub fn data(value: impl Into<Value>) -> Self {
        Self::Data(value.into())
    }

    /// Creates a handle argument from the given closure.
    pub fn handle(f: impl FnOnce(Vec<Value>) + 'static) -> Self {
        Self::Handle(Callback::new(f))
    }

    pub fn is_handle(&self) -> bool {
        matches!(self, Self::Handle(_))
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Data(value)
    }
}

impl From<Callback> for Arg {
    fn from(value: Callback) -> Self {
        Self::Handle(value)
    }
}

/// Data arguments separated from the trailing handles of a call.
#[derive(Debug, Default)]
pub struct SplitArgs {
    /// The arguments to send across the bridge.
    pub args: Vec<Value>,
    /// Receives the error descriptor when the call fails.
    pub on_fail: Option<Callback>,
    /// Receives the positional results when the call succeeds.
    pub on_success: Option<Callback>
}

/// Separates trailing handles from data. A single trailing handle is the
/// success handle; two trailing handles are the failure handle followed by
/// the success handle. Handles anywhere else are rejected.
pub fn split_handles(args: Vec<Arg>) -> Result<SplitArgs, BridgeError> {
    let trailing = args.iter().rev().take_while(|x| x.is_handle()).count();
    if trailing > 2 {
        return Err(BridgeError::from_invariant(format!("A call may end in at most two handles, but {trailing} were given")));
    }

    let data_len = args.len() - trailing;
    if let Some(position) = args[..data_len].iter().position(Arg::is_handle) {
        return Err(BridgeError::from_invariant(format!("Handle at argument {position} must be followed only by a success handle")));
    }

    let mut result = SplitArgs {
        args: Vec::with_capacity(data_len),
        ..Default::default()
    };
    let mut handles = Vec::with_capacity(trailing);

    for arg in args {
        match arg {
            Arg::Data(value) => result.args.push(value),
            Arg::Handle(handle) => handles.push(handle)
        }
    }

    result.on_success = handles.pop();
    result.on_fail = handles.pop();
    Ok(result)
}

/// Unwraps data arguments for a method that does not accept handles.
pub(crate) fn data_only(args: Vec<Arg>, kind: MethodKind) -> Result<Vec<Value>, BridgeError> {
    args.into_iter().enumerate().map(|(position, arg)| match arg {
        Arg::Data(value) => Ok(value),
        Arg::Handle(_) => Err(BridgeError::from_invariant(format!("{kind:?} methods do not accept handles (argument {position})")))
    }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arg {
        Arg::handle(|_| {})
    }

    #[test]
    fn two_trailing_handles_are_fail_then_success() {
        let split = split_handles(vec![Arg::data(1), Arg::data(2), noop(), noop()]).unwrap();
        assert_eq!(split.args, vec![Value::from(1), Value::from(2)]);
        assert!(split.on_fail.is_some());
        assert!(split.on_success.is_some());
    }

    #[test]
    fn single_trailing_handle_is_success() {
        let split = split_handles(vec![Arg::data("x"), noop()]).unwrap();
        assert_eq!(split.args, vec![Value::from("x")]);
        assert!(split.on_fail.is_none());
        assert!(split.on_success.is_some());
    }

    #[test]
    fn no_handles_keeps_all_data() {
        let split = split_handles(vec![Arg::data(true)]).unwrap();
        assert_eq!(split.args.len(), 1);
        assert!(split.on_fail.is_none() && split.on_success.is_none());
        assert!(split_handles(Vec::new()).unwrap().args.is_empty());
    }

    #[test]
    fn data_after_handle_is_rejected() {
        let result = split_handles(vec![Arg::data(1), noop(), Arg::data(2)]);
        assert!(matches!(result, Err(BridgeError::InvariantViolation(_))));
    }

    #[test]
    fn three_trailing_handles_are_rejected() {
        let result = split_handles(vec![noop(), noop(), noop()]);
        assert!(matches!(result, Err(BridgeError::InvariantViolation(_))));
    }

    #[test]
    fn data_only_rejects_handles() {
        assert_eq!(data_only(vec![Arg::data(5)], MethodKind::Promise).unwrap(), vec![Value::from(5)]);
        assert!(data_only(vec![Arg::data(5), noop()], MethodKind::Sync).is_err());
    }
}

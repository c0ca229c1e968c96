//! Function signatures and argument binding.

use crate::error::ArgumentBindingError;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source location plus qualified name of a wrapped function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    location: String,
    qualname: String,
}

impl FunctionIdentity {
    pub fn new(location: impl Into<String>, qualname: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            qualname: qualname.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn qualname(&self) -> &str {
        &self.qualname
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location, self.qualname)
    }
}

/// Builds a [`FunctionIdentity`] for `name` at the call site.
///
/// ```rust
/// let id = memo_cache::function_identity!("Claims::lookup");
/// assert!(id.to_string().ends_with("::Claims::lookup"));
/// ```
#[macro_export]
macro_rules! function_identity {
    ($name:expr) => {
        $crate::key::FunctionIdentity::new(
            file!(),
            format!("{}::{}", module_path!(), $name),
        )
    };
}

/// Process-unique token for an owning instance.
///
/// Owners allocate one with [`InstanceId::next`] and keep it for their
/// lifetime; two live instances never share a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

impl InstanceId {
    pub fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Accepts a value positionally or by name.
    Named,
    /// Collects keyword arguments no other parameter claims. Never part of a key.
    KeywordCollector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
    pub kind: ParamKind,
}

/// Declared parameters of a wrapped function.
#[derive(Debug, Clone)]
pub struct Signature {
    identity: FunctionIdentity,
    receiver: bool,
    params: Vec<Param>,
}

impl Signature {
    pub fn new(identity: FunctionIdentity) -> Self {
        Self {
            identity,
            receiver: false,
            params: Vec::new(),
        }
    }

    /// Marks the function as a method: calls must carry a receiver, which is
    /// excluded from the bound arguments.
    pub fn method(mut self) -> Self {
        self.receiver = true;
        self
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
            kind: ParamKind::Named,
        });
        self
    }

    pub fn param_with_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default.into()),
            kind: ParamKind::Named,
        });
        self
    }

    pub fn collect_keywords(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
            kind: ParamKind::KeywordCollector,
        });
        self
    }

    pub fn identity(&self) -> &FunctionIdentity {
        &self.identity
    }

    pub fn is_method(&self) -> bool {
        self.receiver
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    fn named(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| p.kind == ParamKind::Named)
    }

    fn has_collector(&self) -> bool {
        self.params
            .iter()
            .any(|p| p.kind == ParamKind::KeywordCollector)
    }

    /// Binds a call to the declared parameters and applies defaults.
    ///
    /// The receiver and anything routed to a keyword collector are dropped.
    pub fn bind(&self, args: &CallArgs) -> Result<BoundArgs, ArgumentBindingError> {
        let function = self.identity.to_string();
        if self.receiver && args.receiver.is_none() {
            return Err(ArgumentBindingError::MissingReceiver { function });
        }

        let named: Vec<&Param> = self.named().collect();
        if args.positional.len() > named.len() {
            return Err(ArgumentBindingError::TooManyPositional {
                function,
                expected: named.len(),
                given: args.positional.len(),
            });
        }

        let mut slots: Vec<Option<Value>> = vec![None; named.len()];
        for (slot, value) in slots.iter_mut().zip(&args.positional) {
            *slot = Some(value.clone());
        }

        let collects = self.has_collector();
        for (name, value) in &args.keyword {
            match named.iter().position(|p| &p.name == name) {
                Some(idx) if slots[idx].is_some() => {
                    return Err(ArgumentBindingError::MultipleValues {
                        function,
                        name: name.clone(),
                    });
                }
                Some(idx) => slots[idx] = Some(value.clone()),
                None if collects => {}
                None => {
                    return Err(ArgumentBindingError::UnexpectedKeyword {
                        function,
                        name: name.clone(),
                    });
                }
            }
        }

        let mut bound = Map::new();
        for (param, slot) in named.iter().zip(slots) {
            let value = match (slot, &param.default) {
                (Some(v), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(ArgumentBindingError::MissingArgument {
                        function,
                        name: param.name.clone(),
                    });
                }
            };
            bound.insert(param.name.clone(), value);
        }
        Ok(BoundArgs(bound))
    }
}

/// Arguments of one call, as key material.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    receiver: Option<InstanceId>,
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments for a method call on the instance identified by `receiver`.
    pub fn method(receiver: InstanceId) -> Self {
        Self {
            receiver: Some(receiver),
            ..Self::default()
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kw(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    pub fn receiver(&self) -> Option<InstanceId> {
        self.receiver
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &[(String, Value)] {
        &self.keyword
    }
}

/// Parameter name to value, after binding and defaults. Iterates in name order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArgs(Map<String, Value>);

impl BoundArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.0.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup_sig() -> Signature {
        Signature::new(FunctionIdentity::new("claims.rs", "Claims::lookup"))
            .method()
            .param("a")
            .param("b")
            .param_with_default("dos", Value::Null)
            .param_with_default("quiet", Value::Null)
            .collect_keywords("kwargs")
    }

    #[test]
    fn test_binds_positional_and_keyword() {
        let args = CallArgs::method(InstanceId::next())
            .arg(json!({"1": 2}))
            .kw("b", json!([1, 2]))
            .kw("dos", "2024-05-17");
        let bound = lookup_sig().bind(&args).unwrap();
        assert_eq!(bound.get("a"), Some(&json!({"1": 2})));
        assert_eq!(bound.get("b"), Some(&json!([1, 2])));
        assert_eq!(bound.get("dos"), Some(&json!("2024-05-17")));
        assert_eq!(bound.get("quiet"), Some(&Value::Null));
        assert_eq!(bound.len(), 4);
    }

    #[test]
    fn test_explicit_default_equals_omitted() {
        let sig = lookup_sig();
        let id = InstanceId::next();
        let implicit = sig.bind(&CallArgs::method(id).arg(1).arg(2)).unwrap();
        let explicit = sig
            .bind(&CallArgs::method(id).arg(1).arg(2).kw("dos", Value::Null))
            .unwrap();
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn test_collector_and_receiver_are_dropped() {
        let sig = lookup_sig();
        let bound = sig
            .bind(&CallArgs::method(InstanceId::next()).arg(1).arg(2).kw("zipcode", 29220))
            .unwrap();
        assert!(bound.get("zipcode").is_none());
        assert!(bound.get("kwargs").is_none());
        assert!(bound.get("self").is_none());
    }

    #[test]
    fn test_binding_errors() {
        let sig = lookup_sig();
        let id = InstanceId::next();

        let err = sig.bind(&CallArgs::new().arg(1).arg(2)).unwrap_err();
        assert!(matches!(err, ArgumentBindingError::MissingReceiver { .. }));

        let err = sig.bind(&CallArgs::method(id).arg(1)).unwrap_err();
        assert!(matches!(err, ArgumentBindingError::MissingArgument { ref name, .. } if name == "b"));

        let err = sig
            .bind(&CallArgs::method(id).arg(1).arg(2).arg(3).arg(4).arg(5))
            .unwrap_err();
        assert!(matches!(
            err,
            ArgumentBindingError::TooManyPositional { expected: 4, given: 5, .. }
        ));

        let err = sig
            .bind(&CallArgs::method(id).arg(1).arg(2).kw("a", 3))
            .unwrap_err();
        assert!(matches!(err, ArgumentBindingError::MultipleValues { ref name, .. } if name == "a"));
    }

    #[test]
    fn test_unexpected_keyword_without_collector() {
        let sig = Signature::new(FunctionIdentity::new("f.rs", "f")).param("x");
        let err = sig.bind(&CallArgs::new().arg(1).kw("y", 2)).unwrap_err();
        assert_eq!(
            err,
            ArgumentBindingError::UnexpectedKeyword {
                function: "f.rs:f".into(),
                name: "y".into()
            }
        );
    }

    #[test]
    fn test_instance_ids_are_unique() {
        let a = InstanceId::next();
        let b = InstanceId::next();
        assert_ne!(a, b);
    }
}

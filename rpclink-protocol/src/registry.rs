//! Method registry used to service inbound calls.
//!
//! Functions and service objects are registered under an optional namespace.
//! A namespaced method is exposed as `namespace_method`.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of a registered method: a value, or an error message for the peer.
pub type MethodResult = Result<Value, String>;

/// Reserved method name that lists the registered methods.
pub const FUNCTION_LIST_METHOD: &str = "#";

type Method = Arc<dyn Fn(Vec<Value>) -> MethodResult + Send + Sync>;

/// An object exposing several methods at once.
pub trait RpcService: Send + Sync + 'static {
    /// Names of the methods this service answers.
    fn methods(&self) -> Vec<&'static str>;

    /// Invokes one of the names returned by [`RpcService::methods`].
    fn call(&self, method: &str, args: Vec<Value>) -> MethodResult;
}

/// Table of callable methods keyed by their exposed name.
pub struct MethodRegistry {
    methods: RwLock<BTreeMap<String, Method>>,
    /// Answer the function-list method with the real table.
    expose_listing: bool,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(BTreeMap::new()),
            expose_listing: false,
        }
    }

    /// Lets peers read the method table through the function-list method.
    pub fn with_method_listing(mut self, expose: bool) -> Self {
        self.expose_listing = expose;
        self
    }

    /// Registers a single function, replacing any method with the same name.
    pub fn add_function<F>(&self, name: &str, function: F, namespace: Option<&str>)
    where
        F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        let name = qualified_name(name, namespace);
        tracing::debug!("Registering method {}", name);
        self.methods.write().insert(name, Arc::new(function));
    }

    /// Registers every method of `service`.
    pub fn add_instance_methods<S: RpcService>(&self, service: Arc<S>, namespace: Option<&str>) {
        let mut methods = self.methods.write();
        for method in service.methods() {
            let service = service.clone();
            let name = qualified_name(method, namespace);
            tracing::debug!("Registering method {}", name);
            methods.insert(
                name,
                Arc::new(move |args: Vec<Value>| service.call(method, args)),
            );
        }
    }

    /// Returns the exposed names of all registered methods, sorted.
    pub fn method_names(&self) -> Vec<String> {
        self.methods.read().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    /// Invokes a method by exposed name.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> MethodResult {
        if name == FUNCTION_LIST_METHOD {
            let names = if self.expose_listing {
                self.method_names().into_iter().map(Value::String).collect()
            } else {
                Vec::new()
            };
            return Ok(Value::Array(names));
        }

        // Release the lock before invoking.
        let method = self.methods.read().get(name).cloned();
        match method {
            Some(method) => (*method)(args),
            None => Err(format!("Can't find this method {}", name)),
        }
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn qualified_name(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}_{}", ns, name),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Calculator;

    impl RpcService for Calculator {
        fn methods(&self) -> Vec<&'static str> {
            vec!["double", "negate"]
        }

        fn call(&self, method: &str, args: Vec<Value>) -> MethodResult {
            let n = args
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| "expected an integer".to_string())?;
            match method {
                "double" => Ok(json!(n * 2)),
                "negate" => Ok(json!(-n)),
                other => Err(format!("unknown method {}", other)),
            }
        }
    }

    #[test]
    fn test_add_function_with_namespace() {
        let registry = MethodRegistry::new();
        registry.add_function("ping", |_| Ok(json!("pong")), None);
        registry.add_function("hello", |_| Ok(json!("hi")), Some("greet"));
        registry.add_function("plain", |_| Ok(Value::Null), Some(""));

        assert_eq!(
            registry.method_names(),
            vec!["greet_hello", "ping", "plain"]
        );
        assert!(registry.contains("greet_hello"));
        assert!(!registry.contains("hello"));
        assert_eq!(registry.invoke("ping", vec![]).unwrap(), json!("pong"));
    }

    #[test]
    fn test_add_instance_methods() {
        let registry = MethodRegistry::new();
        registry.add_instance_methods(Arc::new(Calculator), Some("calc"));

        assert_eq!(registry.method_names(), vec!["calc_double", "calc_negate"]);
        assert_eq!(
            registry.invoke("calc_double", vec![json!(21)]).unwrap(),
            json!(42)
        );
        assert_eq!(
            registry.invoke("calc_negate", vec![json!(5)]).unwrap(),
            json!(-5)
        );
        assert!(registry.invoke("calc_double", vec![json!("x")]).is_err());
    }

    #[test]
    fn test_unknown_method() {
        let registry = MethodRegistry::new();
        let err = registry.invoke("nope", vec![]).unwrap_err();
        assert!(err.contains("nope"));
    }

    #[test]
    fn test_function_list_hidden_by_default() {
        let registry = MethodRegistry::new();
        registry.add_function("ping", |_| Ok(json!("pong")), None);

        assert_eq!(
            registry.invoke(FUNCTION_LIST_METHOD, vec![]).unwrap(),
            json!([])
        );

        let registry = MethodRegistry::new().with_method_listing(true);
        registry.add_function("ping", |_| Ok(json!("pong")), None);
        assert_eq!(
            registry.invoke(FUNCTION_LIST_METHOD, vec![]).unwrap(),
            json!(["ping"])
        );
    }

    #[test]
    fn test_reregistration_replaces_method() {
        let registry = MethodRegistry::new();
        registry.add_function("v", |_| Ok(json!(1)), None);
        registry.add_function("v", |_| Ok(json!(2)), None);
        assert_eq!(registry.method_names().len(), 1);
        assert_eq!(registry.invoke("v", vec![]).unwrap(), json!(2));
    }
}

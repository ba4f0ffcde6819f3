//! Variable resolution chain.
//!
//! Names are looked up through an ordered list of resolvers; the first hit
//! wins. Writes go to the first resolver that accepts them.

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::eval::EvalError;
use crate::value::Value;

/// Where an expression is being evaluated: current file and zero-based line
#[derive(Debug, Clone, Copy)]
pub struct Site<'a> {
    pub file: &'a Path,
    pub line_index: usize,
}

impl<'a> Site<'a> {
    pub fn new(file: &'a Path, line_index: usize) -> Self {
        Site { file, line_index }
    }
}

/// One named source of variable values
pub trait Resolver {
    fn name(&self) -> &str;

    fn lookup(&self, name: &str, site: &Site) -> Option<Value>;

    fn is_writable(&self) -> bool {
        false
    }

    fn assign(&mut self, name: &str, _value: Value) -> Result<(), EvalError> {
        Err(EvalError::ReadOnly {
            resolver: self.name().to_string(),
            name: name.to_string(),
        })
    }

    fn remove(&mut self, name: &str) -> Result<Option<Value>, EvalError> {
        Err(EvalError::ReadOnly {
            resolver: self.name().to_string(),
            name: name.to_string(),
        })
    }

    /// Stored variables, for resolvers backed by a plain map
    fn variables(&self) -> Option<&BTreeMap<String, Value>> {
        None
    }
}

/// Writable map-backed store (local block scope, or globals while loading)
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    name: String,
    vars: BTreeMap<String, Value>,
}

impl VariableStore {
    pub fn new(name: &str) -> Self {
        VariableStore {
            name: name.to_string(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_variables(name: &str, vars: BTreeMap<String, Value>) -> Self {
        VariableStore {
            name: name.to_string(),
            vars,
        }
    }
}

impl Resolver for VariableStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, name: &str, _site: &Site) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        self.vars.insert(name.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<Option<Value>, EvalError> {
        Ok(self.vars.remove(name))
    }

    fn variables(&self) -> Option<&BTreeMap<String, Value>> {
        Some(&self.vars)
    }
}

/// Read-only snapshot shared between files (globals, build-tool properties)
#[derive(Debug, Clone)]
pub struct FrozenStore {
    name: String,
    vars: Arc<BTreeMap<String, Value>>,
}

impl FrozenStore {
    pub fn new(name: &str, vars: Arc<BTreeMap<String, Value>>) -> Self {
        FrozenStore {
            name: name.to_string(),
            vars,
        }
    }
}

impl Resolver for FrozenStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, name: &str, _site: &Site) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn variables(&self) -> Option<&BTreeMap<String, Value>> {
        Some(&self.vars)
    }
}

/// `env.NAME` process environment variables plus `sys.os`, `sys.arch`, `sys.family`
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn name(&self) -> &str {
        "system"
    }

    fn lookup(&self, name: &str, _site: &Site) -> Option<Value> {
        if let Some(var) = name.strip_prefix("env.") {
            return std::env::var(var).ok().map(Value::Str);
        }
        match name {
            "sys.os" => Some(Value::from(std::env::consts::OS)),
            "sys.arch" => Some(Value::from(std::env::consts::ARCH)),
            "sys.family" => Some(Value::from(std::env::consts::FAMILY)),
            _ => None,
        }
    }
}

/// Engine-provided variables that depend on the evaluation site
#[derive(Debug, Clone)]
pub struct BuiltinResolver {
    started: DateTime<Local>,
}

impl BuiltinResolver {
    pub fn new(started: DateTime<Local>) -> Self {
        BuiltinResolver { started }
    }
}

impl Resolver for BuiltinResolver {
    fn name(&self) -> &str {
        "builtin"
    }

    fn lookup(&self, name: &str, site: &Site) -> Option<Value> {
        let value = match name {
            "__FILE__" => Value::Str(site.file.display().to_string()),
            "__FILENAME__" => Value::Str(
                site.file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            "__DIR__" => Value::Str(
                site.file
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            "__LINE__" => Value::Int(site.line_index as i64 + 1),
            "__DATE__" => Value::Str(self.started.format("%b %d %Y").to_string()),
            "__TIME__" => Value::Str(self.started.format("%H:%M:%S").to_string()),
            "__TIMESTAMP__" => Value::Str(self.started.to_rfc3339()),
            "cpre.version" => Value::from(env!("CARGO_PKG_VERSION")),
            _ => return None,
        };
        Some(value)
    }
}

/// Ordered resolver chain plus the unknown-variable policy
pub struct Environment {
    resolvers: Vec<Box<dyn Resolver>>,
    unknown_as_false: bool,
}

impl Environment {
    pub fn new(unknown_as_false: bool) -> Self {
        Environment {
            resolvers: Vec::new(),
            unknown_as_false,
        }
    }

    /// Append a resolver with lower priority than every resolver already present
    pub fn with(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// Chain used while processing a source file:
    /// local, global, property, system, builtin
    pub fn for_file(
        globals: Arc<BTreeMap<String, Value>>,
        properties: Arc<BTreeMap<String, Value>>,
        started: DateTime<Local>,
        unknown_as_false: bool,
    ) -> Self {
        Environment::new(unknown_as_false)
            .with(VariableStore::new("local"))
            .with(FrozenStore::new("global", globals))
            .with(FrozenStore::new("property", properties))
            .with(SystemResolver)
            .with(BuiltinResolver::new(started))
    }

    /// Chain used while loading global-variable files; globals are the writable head
    pub fn for_globals(
        initial: BTreeMap<String, Value>,
        properties: Arc<BTreeMap<String, Value>>,
        started: DateTime<Local>,
        unknown_as_false: bool,
    ) -> Self {
        Environment::new(unknown_as_false)
            .with(VariableStore::with_variables("global", initial))
            .with(FrozenStore::new("property", properties))
            .with(SystemResolver)
            .with(BuiltinResolver::new(started))
    }

    pub fn resolver_names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn unknown_as_false(&self) -> bool {
        self.unknown_as_false
    }

    /// First hit in priority order, without applying the unknown-variable policy
    pub fn lookup(&self, name: &str, site: &Site) -> Option<Value> {
        self.resolvers.iter().find_map(|r| r.lookup(name, site))
    }

    pub fn is_defined(&self, name: &str, site: &Site) -> bool {
        self.lookup(name, site).is_some()
    }

    /// Lookup applying the unknown-variable policy
    pub fn resolve(&self, name: &str, site: &Site) -> Result<Value, EvalError> {
        match self.lookup(name, site) {
            Some(value) => Ok(value),
            None if self.unknown_as_false => Ok(Value::Bool(false)),
            None => Err(EvalError::UnknownVariable(name.to_string())),
        }
    }

    fn writable(&mut self, name: &str) -> Result<&mut Box<dyn Resolver>, EvalError> {
        let first = self
            .resolvers
            .first()
            .map(|r| r.name().to_string())
            .unwrap_or_else(|| "none".to_string());
        self.resolvers
            .iter_mut()
            .find(|r| r.is_writable())
            .ok_or_else(|| EvalError::ReadOnly {
                resolver: first,
                name: name.to_string(),
            })
    }

    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        self.writable(name)?.assign(name, value)
    }

    pub fn remove(&mut self, name: &str) -> Result<Option<Value>, EvalError> {
        self.writable(name)?.remove(name)
    }

    /// Copy of the variables held by the writable head
    pub fn writable_variables(&self) -> BTreeMap<String, Value> {
        self.resolvers
            .iter()
            .find(|r| r.is_writable())
            .and_then(|r| r.variables().cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn site_path() -> PathBuf {
        PathBuf::from("/src/app/Main.java")
    }

    fn map(pairs: &[(&str, Value)]) -> Arc<BTreeMap<String, Value>> {
        Arc::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_priority_order() {
        let path = site_path();
        let site = Site::new(&path, 0);
        let mut env = Environment::for_file(
            map(&[("mode", Value::from("global")), ("debug", Value::Bool(true))]),
            map(&[("mode", Value::from("property")), ("project.name", Value::from("demo"))]),
            Local::now(),
            false,
        );
        assert_eq!(
            env.resolver_names(),
            vec!["local", "global", "property", "system", "builtin"]
        );
        assert_eq!(env.resolve("mode", &site).unwrap(), Value::from("global"));
        assert_eq!(env.resolve("project.name", &site).unwrap(), Value::from("demo"));

        env.assign("mode", Value::from("local")).unwrap();
        assert_eq!(env.resolve("mode", &site).unwrap(), Value::from("local"));

        env.remove("mode").unwrap();
        assert_eq!(env.resolve("mode", &site).unwrap(), Value::from("global"));
    }

    #[test]
    fn test_unknown_variable_policy() {
        let path = site_path();
        let site = Site::new(&path, 0);
        let strict = Environment::for_file(map(&[]), map(&[]), Local::now(), false);
        assert_eq!(
            strict.resolve("missing", &site),
            Err(EvalError::UnknownVariable("missing".to_string()))
        );

        let lenient = Environment::for_file(map(&[]), map(&[]), Local::now(), true);
        assert_eq!(lenient.resolve("missing", &site).unwrap(), Value::Bool(false));
        assert!(!lenient.is_defined("missing", &site));
    }

    #[test]
    fn test_read_only_chain_rejects_assignment() {
        let mut env = Environment::new(false)
            .with(FrozenStore::new("global", map(&[])))
            .with(SystemResolver);
        assert_eq!(
            env.assign("x", Value::Int(1)),
            Err(EvalError::ReadOnly {
                resolver: "global".to_string(),
                name: "x".to_string(),
            })
        );
        let mut system = SystemResolver;
        assert!(system.assign("sys.os", Value::from("none")).is_err());
    }

    #[test]
    fn test_builtins() {
        let path = site_path();
        let site = Site::new(&path, 9);
        let env = Environment::for_file(map(&[]), map(&[]), Local::now(), false);
        assert_eq!(env.resolve("__LINE__", &site).unwrap(), Value::Int(10));
        assert_eq!(
            env.resolve("__FILENAME__", &site).unwrap(),
            Value::from("Main.java")
        );
        assert_eq!(
            env.resolve("cpre.version", &site).unwrap(),
            Value::from(env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(
            env.resolve("sys.os", &site).unwrap(),
            Value::from(std::env::consts::OS)
        );
    }

    #[test]
    fn test_environment_variables() {
        let path = site_path();
        let site = Site::new(&path, 0);
        let env = Environment::for_file(map(&[]), map(&[]), Local::now(), false);
        let path_var = std::env::var("PATH").ok().map(Value::Str);
        assert_eq!(env.lookup("env.PATH", &site), path_var);
    }

    #[test]
    fn test_writable_variables_for_globals() {
        let mut env = Environment::for_globals(BTreeMap::new(), map(&[]), Local::now(), false);
        env.assign("LEVEL", Value::Int(3)).unwrap();
        let vars = env.writable_variables();
        assert_eq!(vars.get("LEVEL"), Some(&Value::Int(3)));
    }
}

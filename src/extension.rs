use crate::env::Site;
use crate::eval::EvalError;
use crate::value::Value;

/// User-pluggable hook for `action` directives and functions the engine
/// does not know itself.
///
/// The engine only calls into the extension for names it cannot resolve
/// internally, and always asks `has_*` before `process_*`.
pub trait Extension {
    fn has_action(&self, arity: usize) -> bool;

    fn has_user_function(&self, name: &str, arity: usize) -> bool;

    /// Returning `false` aborts processing of the current file
    fn process_action(&mut self, site: &Site, args: &[Value]) -> bool;

    fn process_user_function(
        &mut self,
        site: &Site,
        name: &str,
        args: &[Value],
    ) -> Result<Value, EvalError>;
}

/// Extension that declines everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExtension;

impl Extension for NoExtension {
    fn has_action(&self, _arity: usize) -> bool {
        false
    }

    fn has_user_function(&self, _name: &str, _arity: usize) -> bool {
        false
    }

    fn process_action(&mut self, _site: &Site, _args: &[Value]) -> bool {
        false
    }

    fn process_user_function(
        &mut self,
        _site: &Site,
        name: &str,
        args: &[Value],
    ) -> Result<Value, EvalError> {
        Err(EvalError::UnknownFunction {
            name: name.to_string(),
            arity: args.len(),
        })
    }
}

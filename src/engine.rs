//! Conditional-state machine and per-line directive execution.

use crate::directive::{classify_line, is_plain_directive, substitute_inline, Directive, LineKind};
use crate::env::{Environment, Site};
use crate::error::{ErrorKind, PreprocessorError};
use crate::eval::{evaluate, Evaluator};
use crate::expr::parse_expression_list;
use crate::extension::Extension;
use crate::logger::Logger;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Active,
    SuppressedByCondition,
    SuppressedByExclusion,
}

/// One open `if` block
#[derive(Debug, Clone)]
struct Frame {
    /// The current branch is live (already includes the parent's state)
    active: bool,
    /// Some branch of this block has already been selected
    taken: bool,
    parent_active: bool,
    else_seen: bool,
    opened_at: usize,
}

fn unbalanced(message: impl Into<String>) -> PreprocessorError {
    PreprocessorError::new(ErrorKind::UnbalancedDirective, message)
}

/// Stack of open conditional blocks for one file
#[derive(Debug, Clone, Default)]
pub struct ConditionStack {
    frames: Vec<Frame>,
    excluded: bool,
}

impl ConditionStack {
    pub fn new() -> Self {
        ConditionStack::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_active(&self) -> bool {
        !self.excluded && self.frames.last().map(|f| f.active).unwrap_or(true)
    }

    pub fn state(&self) -> LineState {
        if self.excluded {
            LineState::SuppressedByExclusion
        } else if self.is_active() {
            LineState::Active
        } else {
            LineState::SuppressedByCondition
        }
    }

    /// Open a block. `condition` is only called when the enclosing region is active.
    pub fn push_if<F>(&mut self, line_index: usize, condition: F) -> Result<(), PreprocessorError>
    where
        F: FnOnce() -> Result<bool, PreprocessorError>,
    {
        let parent_active = self.is_active();
        let taken = if parent_active { condition()? } else { false };
        self.frames.push(Frame {
            active: parent_active && taken,
            taken,
            parent_active,
            else_seen: false,
            opened_at: line_index,
        });
        Ok(())
    }

    /// `condition` is only called when no earlier branch was taken and the parent is active.
    pub fn elif<F>(&mut self, condition: F) -> Result<(), PreprocessorError>
    where
        F: FnOnce() -> Result<bool, PreprocessorError>,
    {
        let top = self
            .frames
            .last_mut()
            .ok_or_else(|| unbalanced("'elif' without matching 'if'"))?;
        if top.else_seen {
            return Err(unbalanced("'elif' after 'else'"));
        }
        if !top.parent_active || top.taken {
            top.active = false;
            return Ok(());
        }
        let result = condition()?;
        top.active = result;
        top.taken = result;
        Ok(())
    }

    pub fn else_branch(&mut self) -> Result<(), PreprocessorError> {
        let top = self
            .frames
            .last_mut()
            .ok_or_else(|| unbalanced("'else' without matching 'if'"))?;
        if top.else_seen {
            return Err(unbalanced("duplicate 'else'"));
        }
        top.else_seen = true;
        top.active = top.parent_active && !top.taken;
        top.taken = true;
        Ok(())
    }

    pub fn endif(&mut self) -> Result<(), PreprocessorError> {
        self.frames
            .pop()
            .map(|_| ())
            .ok_or_else(|| unbalanced("'endif' without matching 'if'"))
    }

    pub fn exclude(&mut self) {
        self.excluded = true;
    }

    /// Zero-based line of the innermost unclosed `if`, if any
    pub fn innermost_open(&self) -> Option<usize> {
        self.frames.last().map(|f| f.opened_at)
    }
}

/// Per-file state: conditional stack and output switches
#[derive(Debug, Clone)]
pub struct FileScope {
    pub conditions: ConditionStack,
    output_enabled: bool,
    comment_next: bool,
    emitted: usize,
}

impl Default for FileScope {
    fn default() -> Self {
        FileScope {
            conditions: ConditionStack::new(),
            output_enabled: true,
            comment_next: false,
            emitted: 0,
        }
    }
}

impl FileScope {
    pub fn new() -> Self {
        FileScope::default()
    }

    /// Number of source lines that produced output so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

/// What the caller should do with a processed line
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Write this text followed by the line's terminator
    Emit(String),
    /// Write nothing (or a blank line when numbering is kept)
    Skip,
    /// Process the file named by this path in place
    Include(String),
    /// Stop processing the current file
    Exclude,
}

/// Shared directive-execution state for one root file and everything it includes
pub struct Engine<'a> {
    pub env: Environment,
    extension: &'a mut dyn Extension,
    logger: &'a dyn Logger,
    outname: Option<String>,
}

impl<'a> Engine<'a> {
    pub fn new(env: Environment, extension: &'a mut dyn Extension, logger: &'a dyn Logger) -> Self {
        Engine {
            env,
            extension,
            logger,
            outname: None,
        }
    }

    /// Destination name set by the last `outname` directive
    pub fn outname(&self) -> Option<&str> {
        self.outname.as_deref()
    }

    pub fn eval(&mut self, text: &str, site: Site) -> Result<Value, PreprocessorError> {
        evaluate(text, &self.env, site, &mut *self.extension).map_err(PreprocessorError::from)
    }

    fn eval_string(&mut self, keyword: &str, text: &str, site: Site) -> Result<String, PreprocessorError> {
        match self.eval(text, site)? {
            Value::Str(s) => Ok(s),
            other => Err(PreprocessorError::new(
                ErrorKind::TypeMismatch,
                format!("'{}' expects a string, found {} '{}'", keyword, other.value_type(), other),
            )),
        }
    }

    pub fn condition(&mut self, text: &str, site: Site) -> Result<bool, PreprocessorError> {
        match self.eval(text, site)? {
            Value::Bool(b) => Ok(b),
            other => Err(PreprocessorError::new(
                ErrorKind::TypeMismatch,
                format!("condition must be bool, found {} '{}'", other.value_type(), other),
            )),
        }
    }

    fn substitute(&mut self, text: &str, site: Site) -> Result<String, PreprocessorError> {
        substitute_inline(text, |expr| self.eval(expr, site).map(|v| v.to_text()))
    }

    /// Process one line of the current file.
    pub fn process_line(
        &mut self,
        scope: &mut FileScope,
        content: &str,
        site: Site,
    ) -> Result<Step, PreprocessorError> {
        if scope.conditions.state() != LineState::Active && is_plain_directive(content) {
            return Ok(Step::Skip);
        }
        match classify_line(content)? {
            LineKind::Directive(directive) if directive.is_conditional() => {
                self.conditional(scope, directive, site)
            }
            LineKind::Directive(directive) => match scope.conditions.state() {
                LineState::Active => self.directive(scope, directive, site),
                LineState::SuppressedByCondition | LineState::SuppressedByExclusion => {
                    Ok(Step::Skip)
                }
            },
            LineKind::Text => {
                if !scope.conditions.is_active() || !scope.output_enabled {
                    return Ok(Step::Skip);
                }
                let text = self.substitute(content, site)?;
                Ok(self.emit(scope, text))
            }
            LineKind::Toggle { indent, body, raw } => {
                if !scope.conditions.is_active() || !scope.output_enabled {
                    return Ok(Step::Skip);
                }
                let body = if raw {
                    body.to_string()
                } else {
                    self.substitute(body, site)?
                };
                Ok(self.emit(scope, format!("{}{}", indent, body)))
            }
        }
    }

    fn emit(&mut self, scope: &mut FileScope, text: String) -> Step {
        scope.emitted += 1;
        if scope.comment_next {
            scope.comment_next = false;
            Step::Emit(format!("//{}", text))
        } else {
            Step::Emit(text)
        }
    }

    /// Directives that shape the condition stack; interpreted in every state
    fn conditional(
        &mut self,
        scope: &mut FileScope,
        directive: Directive,
        site: Site,
    ) -> Result<Step, PreprocessorError> {
        let line_index = site.line_index;
        let conditions = &mut scope.conditions;
        match directive {
            Directive::If(expr) => conditions.push_if(line_index, || self.condition(expr, site))?,
            Directive::IfDef(name) => {
                conditions.push_if(line_index, || Ok(self.env.is_defined(name, &site)))?
            }
            Directive::IfNDef(name) => {
                conditions.push_if(line_index, || Ok(!self.env.is_defined(name, &site)))?
            }
            Directive::Elif(expr) => conditions.elif(|| self.condition(expr, site))?,
            Directive::Else => conditions.else_branch()?,
            Directive::EndIf => conditions.endif()?,
            _ => {}
        }
        Ok(Step::Skip)
    }

    fn directive(
        &mut self,
        scope: &mut FileScope,
        directive: Directive,
        site: Site,
    ) -> Result<Step, PreprocessorError> {
        let line_index = site.line_index;
        match directive {
            Directive::ExcludeIf(expr) => {
                if self.condition(expr, site)? {
                    scope.conditions.exclude();
                    return Ok(Step::Exclude);
                }
            }
            Directive::Define { name, expr } => {
                let value = match expr {
                    Some(expr) => self.eval(expr, site)?,
                    None => Value::Bool(true),
                };
                self.env.assign(name, value)?;
            }
            Directive::Undef(name) => {
                self.env.remove(name)?;
            }
            Directive::Global { name, .. } => {
                return Err(PreprocessorError::new(
                    ErrorKind::Syntax,
                    format!(
                        "global variable '{}' can only be defined in a global definition file",
                        name
                    ),
                ));
            }
            Directive::Include(expr) => {
                let path = self.eval_string("include", expr, site)?;
                return Ok(Step::Include(path));
            }
            Directive::Action(args) => self.action(args, site)?,
            Directive::OutName(expr) => {
                let name = self.eval_string("outname", expr, site)?;
                if name.trim().is_empty() {
                    return Err(PreprocessorError::new(
                        ErrorKind::Syntax,
                        "'outname' requires a non-empty name",
                    ));
                }
                self.outname = Some(name);
            }
            Directive::Error(expr) => {
                let message = self.eval(expr, site)?.to_text();
                return Err(PreprocessorError::new(ErrorKind::UserError, message));
            }
            Directive::Warning(expr) => {
                let message = self.eval(expr, site)?.to_text();
                self.logger
                    .warn(&format!("{}:{}: {}", site.file.display(), line_index + 1, message));
            }
            Directive::Echo(expr) => {
                let message = self.eval(expr, site)?.to_text();
                self.logger.info(&message);
            }
            Directive::OutputOff => scope.output_enabled = false,
            Directive::OutputOn => scope.output_enabled = true,
            Directive::CommentNext => scope.comment_next = true,
            Directive::Unknown(text) => {
                return Err(PreprocessorError::new(
                    ErrorKind::Syntax,
                    format!("unknown directive '{}'", text),
                ));
            }
            Directive::If(_)
            | Directive::IfDef(_)
            | Directive::IfNDef(_)
            | Directive::Elif(_)
            | Directive::Else
            | Directive::EndIf => {}
        }
        Ok(Step::Skip)
    }

    fn action(&mut self, args: &str, site: Site) -> Result<(), PreprocessorError> {
        let exprs = parse_expression_list(args)?;
        let mut values = Vec::with_capacity(exprs.len());
        {
            let mut evaluator = Evaluator::new(&self.env, site, &mut *self.extension);
            for expr in &exprs {
                values.push(evaluator.eval(expr)?);
            }
        }
        if !self.extension.has_action(values.len()) {
            return Err(PreprocessorError::new(
                ErrorKind::ActionRejected,
                format!("no action handler accepts {} argument(s)", values.len()),
            ));
        }
        if !self.extension.process_action(&site, &values) {
            return Err(PreprocessorError::new(
                ErrorKind::ActionRejected,
                "action rejected by extension",
            ));
        }
        Ok(())
    }
}

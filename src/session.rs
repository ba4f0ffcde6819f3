//! Top-level orchestration: global files first, then every source file.

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{Config, ErrorPolicy};
use crate::encoding::Encoding;
use crate::engine::Engine;
use crate::env::Environment;
use crate::error::{FilePosition, PreprocessorError};
use crate::extension::Extension;
use crate::globals::load_global_files;
use crate::include::{preprocess_file, FileOutcome, ProcessOptions};
use crate::logger::Logger;
use crate::model::{FileRecord, FileStatus, Summary};
use crate::output::{commit, Commit};
use crate::sources::SourceFile;
use crate::value::Value;

/// Called with every diagnostic that fails a file or the session
pub type ErrorListener<'a> = Box<dyn FnMut(&PreprocessorError) + 'a>;

/// Shared flag checked between files; raising it stops the run after the current file
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Session<'a> {
    config: Config,
    logger: &'a dyn Logger,
    extension: &'a mut dyn Extension,
    listeners: Vec<ErrorListener<'a>>,
    /// Definitions supplied outside the config file; they override `[globals]`
    definitions: BTreeMap<String, Value>,
    /// Build-tool properties; they override `[properties]`
    properties: BTreeMap<String, Value>,
    options: ProcessOptions,
    cancel: CancelFlag,
}

impl<'a> Session<'a> {
    pub fn new(
        config: Config,
        logger: &'a dyn Logger,
        extension: &'a mut dyn Extension,
        listeners: Vec<ErrorListener<'a>>,
    ) -> Self {
        let options = config.process_options();
        Session {
            config,
            logger,
            extension,
            listeners,
            definitions: BTreeMap::new(),
            properties: BTreeMap::new(),
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_definitions(mut self, definitions: BTreeMap<String, Value>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, Value>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle that can stop this session from another thread
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Process `sources` into the configured destination.
    pub fn run(&mut self, sources: &[SourceFile]) -> Result<Summary, PreprocessorError> {
        let started = Local::now();
        let mut summary = Summary::new(started);

        if self.config.clear_destination && !self.config.dry_run {
            self.clear_destination().map_err(|e| self.notify(e))?;
        }

        let properties = self.property_values().map_err(|e| self.notify(e))?;
        let globals = self
            .load_globals(properties.clone(), started)
            .map_err(|e| self.notify(e))?;
        self.logger.debug(&format!(
            "Loaded {} global variable(s) and {} property value(s)",
            globals.len(),
            properties.len()
        ));

        for source in sources {
            if self.cancel.is_cancelled() {
                self.logger.warn("Preprocessing cancelled");
                summary.cancelled = true;
                break;
            }

            let destination = self.config.destination.join(&source.relative);
            let mut record = FileRecord::new(
                source.path.clone(),
                source.relative.clone(),
                destination,
                self.config.target_encoding,
            );
            self.logger.debug(&format!("Preprocessing {}", source.relative.display()));

            match self.process_file(&mut record, &globals, &properties, started) {
                Ok(status) => {
                    record.status = status;
                    self.logger.info(&format!(
                        "{} -> {} ({})",
                        record.relative.display(),
                        record.destination.display(),
                        status
                    ));
                    summary.push(record);
                }
                Err(err) => {
                    let err = self.notify(err);
                    self.logger.error(&err.to_string());
                    record.status = FileStatus::Failed;
                    summary.push(record);
                    match self.config.error_policy {
                        ErrorPolicy::StopOnFirst => return Err(err),
                        ErrorPolicy::BestEffort => summary.errors.push(err.to_string()),
                    }
                }
            }
        }

        summary.finish();
        let counts = &summary.counts;
        self.logger.info(&format!(
            "Processed {} file(s): {} written, {} unchanged, {} excluded, {} failed",
            counts.processed, counts.written, counts.unchanged, counts.excluded, counts.failed
        ));
        Ok(summary)
    }

    fn notify(&mut self, err: PreprocessorError) -> PreprocessorError {
        for listener in self.listeners.iter_mut() {
            listener(&err);
        }
        err
    }

    fn property_values(&self) -> Result<Arc<BTreeMap<String, Value>>, PreprocessorError> {
        let mut properties = self.config.property_values()?;
        properties.extend(self.properties.clone());
        Ok(Arc::new(properties))
    }

    /// Seed globals, apply global files, then freeze the result
    fn load_globals(
        &mut self,
        properties: Arc<BTreeMap<String, Value>>,
        started: DateTime<Local>,
    ) -> Result<Arc<BTreeMap<String, Value>>, PreprocessorError> {
        let mut initial = self.config.global_values()?;
        initial.extend(self.definitions.clone());

        let mut env = Environment::for_globals(
            initial,
            properties,
            started,
            self.config.unknown_as_false,
        );
        load_global_files(
            &self.config.global_files,
            &mut env,
            self.config.source_encoding,
            &mut *self.extension,
            self.logger,
        )?;
        Ok(Arc::new(env.writable_variables()))
    }

    fn process_file(
        &mut self,
        record: &mut FileRecord,
        globals: &Arc<BTreeMap<String, Value>>,
        properties: &Arc<BTreeMap<String, Value>>,
        started: DateTime<Local>,
    ) -> Result<FileStatus, PreprocessorError> {
        let env = Environment::for_file(
            Arc::clone(globals),
            Arc::clone(properties),
            started,
            self.config.unknown_as_false,
        );
        let outcome = {
            let mut engine = Engine::new(env, &mut *self.extension, self.logger);
            preprocess_file(&record.source, &mut engine, &self.options)?
        };

        let (text, had_bom, outname) = match outcome {
            FileOutcome::Excluded => return Ok(FileStatus::Excluded),
            FileOutcome::Text {
                text,
                had_bom,
                outname,
            } => (text, had_bom, outname),
        };
        if let Some(name) = outname {
            record.destination = renamed(&record.destination, &name);
        }

        let bom = had_bom && self.config.target_encoding == Encoding::Utf8;
        let bytes = self
            .config
            .target_encoding
            .encode(&text, bom)
            .map_err(|e| {
                PreprocessorError::io(format!("cannot encode output ({})", e), &record.destination)
                    .with_frames(vec![FilePosition::new(&record.source, 0)])
            })?;

        let status = match commit(&record.destination, &bytes, self.config.commit_options())? {
            Commit::Written => FileStatus::Written,
            Commit::Unchanged => FileStatus::Unchanged,
            Commit::DryRun => FileStatus::DryRun,
        };
        Ok(status)
    }

    /// Remove everything below the destination, refusing when a source root lives there
    fn clear_destination(&self) -> Result<(), PreprocessorError> {
        let destination = &self.config.destination;
        if !destination.exists() {
            return Ok(());
        }
        let dest = canonical(destination);
        for root in &self.config.sources {
            if canonical(root).starts_with(&dest) {
                return Err(PreprocessorError::io(
                    format!(
                        "refusing to clear destination containing source root {}",
                        root.display()
                    ),
                    destination,
                ));
            }
        }

        self.logger
            .info(&format!("Clearing {}", destination.display()));
        let entries = fs::read_dir(destination).map_err(|e| {
            PreprocessorError::io(format!("cannot list destination ({})", e), destination)
        })?;
        for entry in entries {
            let path = entry
                .map_err(|e| PreprocessorError::io(format!("cannot list destination ({})", e), destination))?
                .path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| PreprocessorError::io(format!("cannot remove ({})", e), &path))?;
        }
        Ok(())
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Destination after an `outname` directive: absolute names are used as is,
/// relative ones replace the file name next to the original destination.
fn renamed(destination: &Path, name: &str) -> PathBuf {
    let name = Path::new(name);
    if name.is_absolute() {
        name.to_path_buf()
    } else {
        destination.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommentMode;
    use crate::error::ErrorKind;
    use crate::eval::EvalError;
    use crate::extension::NoExtension;
    use crate::logger::{CaptureLogger, Level};
    use crate::env::Site;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("src")).unwrap();
            Fixture { dir }
        }

        fn src(&self, name: &str, content: &str) -> SourceFile {
            let path = self.dir.path().join("src").join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
            SourceFile {
                path,
                relative: PathBuf::from(name),
            }
        }

        fn out(&self) -> PathBuf {
            self.dir.path().join("out")
        }

        fn config(&self) -> Config {
            Config {
                sources: vec![self.dir.path().join("src")],
                destination: self.out(),
                ..Config::default()
            }
        }
    }

    #[test]
    fn test_run_writes_outputs() {
        let fx = Fixture::new();
        let sources = vec![
            fx.src("A.java", "//#if DEBUG\nlog();\n//#endif\nrun();\n"),
            fx.src("pkg/B.java", "//#excludeif true\nnever();\n"),
        ];
        let mut config = fx.config();
        config.globals.insert("DEBUG".to_string(), toml::Value::Boolean(true));

        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut session = Session::new(config, &logger, &mut ext, Vec::new());
        let summary = session.run(&sources).unwrap();

        assert_eq!(fs::read_to_string(fx.out().join("A.java")).unwrap(), "log();\nrun();\n");
        assert!(!fx.out().join("pkg/B.java").exists());
        assert_eq!(summary.counts.written, 1);
        assert_eq!(summary.counts.excluded, 1);
        assert!(summary.is_success());
        assert!(logger.messages(Level::Info).iter().any(|m| m.starts_with("Processed 2 file(s)")));
    }

    #[test]
    fn test_definitions_override_config_globals() {
        let fx = Fixture::new();
        let sources = vec![fx.src("A.java", "v = /*$LEVEL$*/0/*-*/;\n")];
        let mut config = fx.config();
        config.globals.insert("LEVEL".to_string(), toml::Value::Integer(1));

        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut definitions = BTreeMap::new();
        definitions.insert("LEVEL".to_string(), Value::Int(7));
        let mut session = Session::new(config, &logger, &mut ext, Vec::new())
            .with_definitions(definitions);
        session.run(&sources).unwrap();
        assert_eq!(fs::read_to_string(fx.out().join("A.java")).unwrap(), "v = 7;\n");
    }

    #[test]
    fn test_global_file_and_properties() {
        let fx = Fixture::new();
        let globals = fx.dir.path().join("globals.txt");
        fs::write(&globals, "//#global NAME = \"app-\" + project.version\n").unwrap();
        let sources = vec![fx.src("A.java", "name = \"/*$NAME$*/x/*-*/\";\n")];
        let mut config = fx.config();
        config.global_files = vec![globals];

        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut properties = BTreeMap::new();
        properties.insert("project.version".to_string(), Value::from("2.1"));
        let mut session =
            Session::new(config, &logger, &mut ext, Vec::new()).with_properties(properties);
        session.run(&sources).unwrap();
        assert_eq!(
            fs::read_to_string(fx.out().join("A.java")).unwrap(),
            "name = \"app-2.1\";\n"
        );
    }

    #[test]
    fn test_global_file_error_fails_session() {
        let fx = Fixture::new();
        let globals = fx.dir.path().join("globals.txt");
        fs::write(&globals, "//#global A = 1\n//#include \"x\"\n").unwrap();
        let sources = vec![fx.src("A.java", "a\n")];
        let mut config = fx.config();
        config.global_files = vec![globals.clone()];

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let listeners: Vec<ErrorListener> = vec![Box::new(move |e: &PreprocessorError| {
            sink.borrow_mut().push(e.kind())
        })];

        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut session = Session::new(config, &logger, &mut ext, listeners);
        let err = session.run(&sources).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert_eq!(err.frames(), &[FilePosition::new(&globals, 1)]);
        assert_eq!(*seen.borrow(), vec![ErrorKind::Syntax]);
        assert!(!fx.out().exists());
    }

    #[test]
    fn test_stop_on_first_error() {
        let fx = Fixture::new();
        let sources = vec![
            fx.src("A.java", "//#error \"broken\"\n"),
            fx.src("B.java", "fine\n"),
        ];
        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut session = Session::new(fx.config(), &logger, &mut ext, Vec::new());
        let err = session.run(&sources).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserError);
        assert!(!fx.out().join("A.java").exists());
        assert!(!fx.out().join("B.java").exists());
    }

    #[test]
    fn test_best_effort_collects_errors() {
        let fx = Fixture::new();
        let sources = vec![
            fx.src("A.java", "//#error \"broken\"\n"),
            fx.src("B.java", "//#endif\n"),
            fx.src("C.java", "fine\n"),
        ];
        let mut config = fx.config();
        config.error_policy = ErrorPolicy::BestEffort;

        let count = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&count);
        let listeners: Vec<ErrorListener> =
            vec![Box::new(move |_: &PreprocessorError| *counter.borrow_mut() += 1)];

        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut session = Session::new(config, &logger, &mut ext, listeners);
        let summary = session.run(&sources).unwrap();

        assert_eq!(summary.counts.failed, 2);
        assert_eq!(summary.counts.written, 1);
        assert_eq!(summary.errors.len(), 2);
        assert!(summary.errors[0].contains("broken"));
        assert_eq!(*count.borrow(), 2);
        assert_eq!(logger.messages(Level::Error).len(), 2);
        assert!(fx.out().join("C.java").exists());
        assert!(!summary.is_success());
    }

    #[test]
    fn test_outname_and_dry_run() {
        let fx = Fixture::new();
        let sources = vec![fx.src("pkg/A.java", "//#outname \"Renamed.java\"\nbody\n")];

        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut session = Session::new(fx.config(), &logger, &mut ext, Vec::new());
        let summary = session.run(&sources).unwrap();
        assert_eq!(summary.records[0].destination, fx.out().join("pkg/Renamed.java"));
        assert_eq!(fs::read_to_string(fx.out().join("pkg/Renamed.java")).unwrap(), "body\n");

        let mut config = fx.config();
        config.dry_run = true;
        config.destination = fx.dir.path().join("dry");
        let mut ext = NoExtension;
        let mut session = Session::new(config, &logger, &mut ext, Vec::new());
        let summary = session.run(&sources).unwrap();
        assert_eq!(summary.counts.dry_run, 1);
        assert!(!fx.dir.path().join("dry").exists());
    }

    #[test]
    fn test_skip_unchanged_on_second_run() {
        let fx = Fixture::new();
        let sources = vec![fx.src("A.java", "same\n")];
        let mut config = fx.config();
        config.skip_unchanged = true;

        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut session = Session::new(config, &logger, &mut ext, Vec::new());
        assert_eq!(session.run(&sources).unwrap().counts.written, 1);
        assert_eq!(session.run(&sources).unwrap().counts.unchanged, 1);
    }

    #[test]
    fn test_clear_destination() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.out().join("old")).unwrap();
        fs::write(fx.out().join("old/Stale.java"), "x").unwrap();
        fs::write(fx.out().join("stale.txt"), "x").unwrap();
        let sources = vec![fx.src("A.java", "a\n")];
        let mut config = fx.config();
        config.clear_destination = true;

        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut session = Session::new(config, &logger, &mut ext, Vec::new());
        session.run(&sources).unwrap();
        assert!(!fx.out().join("old").exists());
        assert!(!fx.out().join("stale.txt").exists());
        assert!(fx.out().join("A.java").exists());
    }

    #[test]
    fn test_clear_destination_refuses_source_root() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.destination = fx.dir.path().to_path_buf();
        config.clear_destination = true;

        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut session = Session::new(config, &logger, &mut ext, Vec::new());
        let err = session.run(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(fx.dir.path().join("src").exists());
    }

    #[test]
    fn test_cancel_before_run() {
        let fx = Fixture::new();
        let sources = vec![fx.src("A.java", "a\n")];
        let logger = CaptureLogger::new();
        let mut ext = NoExtension;
        let mut session = Session::new(fx.config(), &logger, &mut ext, Vec::new());
        session.cancel_flag().cancel();
        let summary = session.run(&sources).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.counts.processed, 0);
    }

    #[test]
    fn test_bom_and_latin1_target() {
        let fx = Fixture::new();
        let sources = vec![fx.src("A.java", "\u{FEFF}s = \"é\";\n")];
        let logger = CaptureLogger::new();

        let mut ext = NoExtension;
        let mut session = Session::new(fx.config(), &logger, &mut ext, Vec::new());
        session.run(&sources).unwrap();
        assert_eq!(
            fs::read(fx.out().join("A.java")).unwrap(),
            "\u{FEFF}s = \"é\";\n".as_bytes()
        );

        let mut config = fx.config();
        config.target_encoding = Encoding::Latin1;
        config.comments = CommentMode::Keep;
        let mut ext = NoExtension;
        let mut session = Session::new(config, &logger, &mut ext, Vec::new());
        session.run(&sources).unwrap();
        assert_eq!(fs::read(fx.out().join("A.java")).unwrap(), b"s = \"\xE9\";\n");
    }

    /// Records user-function calls so evaluation side effects are observable
    struct Tracer {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Extension for Tracer {
        fn has_action(&self, _arity: usize) -> bool {
            false
        }

        fn has_user_function(&self, name: &str, arity: usize) -> bool {
            name == "trace" && arity == 1
        }

        fn process_action(&mut self, _site: &Site, _args: &[Value]) -> bool {
            false
        }

        fn process_user_function(
            &mut self,
            site: &Site,
            _name: &str,
            args: &[Value],
        ) -> Result<Value, EvalError> {
            self.calls
                .borrow_mut()
                .push(format!("{}@{}", args[0], site.line_index + 1));
            Ok(Value::Bool(true))
        }
    }

    #[test]
    fn test_extension_shared_across_files() {
        let fx = Fixture::new();
        let sources = vec![
            fx.src("A.java", "//#if trace(\"a\")\nx\n//#endif\n"),
            fx.src("B.java", "\n//#if trace(\"b\")\ny\n//#endif\n"),
        ];
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut ext = Tracer {
            calls: Rc::clone(&calls),
        };
        let logger = CaptureLogger::new();
        let mut session = Session::new(fx.config(), &logger, &mut ext, Vec::new());
        session.run(&sources).unwrap();
        assert_eq!(*calls.borrow(), vec!["a@1".to_string(), "b@2".to_string()]);
    }
}

use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use chrono::Local;
use cpre::{
    evaluate, preprocess_file, replace_string_prefix, strip_comments, CaptureLogger, Config,
    Engine, Environment, ErrorKind, EvalError, Extension, FileOutcome, NoExtension, NullLogger,
    PreprocessorError, ProcessOptions, Session, Site, SourceFile, Strictness, Value,
};

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn empty_env(unknown_as_false: bool) -> Environment {
    Environment::for_file(
        Arc::new(BTreeMap::new()),
        Arc::new(BTreeMap::new()),
        Local::now(),
        unknown_as_false,
    )
}

fn process_with(
    path: &Path,
    extension: &mut dyn Extension,
) -> Result<FileOutcome, PreprocessorError> {
    let logger = NullLogger;
    let mut engine = Engine::new(empty_env(false), extension, &logger);
    preprocess_file(path, &mut engine, &ProcessOptions::default())
}

fn output_text(outcome: FileOutcome) -> String {
    match outcome {
        FileOutcome::Text { text, .. } => text,
        FileOutcome::Excluded => panic!("unexpected exclusion"),
    }
}

#[test]
fn test_false_outer_condition_suppresses_every_nested_line() {
    let dir = tempfile::tempdir().unwrap();
    let inner_conditions = ["true", "false", "1 == 1", "!false"];
    for inner in inner_conditions {
        let path = dir.path().join("Nested.java");
        let source = format!(
            "before\n//#if false\nouter\n//#if {inner}\ninner\n//#elif true\nelif\n//#else\nelse\n//#endif\n//#ifdef X\ndef\n//#endif\ntail\n//#else\nalternative\n//#endif\nafter\n"
        );
        fs::write(&path, source).unwrap();
        let out = output_text(process_with(&path, &mut NoExtension).unwrap());
        assert_eq!(out, "before\nalternative\nafter\n", "inner condition {}", inner);
    }
}

#[test]
fn test_file_without_directives_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Plain.java");
    let source = "/* header */\r\nclass A {\n\tString s = \"// not a comment\";\r\n  int b; // trailing\n\n}";
    fs::write(&path, source).unwrap();
    assert_eq!(output_text(process_with(&path, &mut NoExtension).unwrap()), source);

    let with_marker = "int x = /*$1 + 1$*/0/*-*/;\nint y;\n";
    fs::write(&path, with_marker).unwrap();
    assert_eq!(
        output_text(process_with(&path, &mut NoExtension).unwrap()),
        "int x = 2;\nint y;\n"
    );
}

#[test]
fn test_excludeif_on_first_line_creates_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("Gone.java"), "//#excludeif true\nclass Gone {}\n").unwrap();
    fs::write(
        src.join("Cut.java"),
        "class Cut {}\n//#excludeif true\nclass Dropped {}\n",
    )
    .unwrap();

    let config = Config {
        sources: vec![src.clone()],
        destination: dir.path().join("out"),
        keep_lines: true,
        ..Config::default()
    };
    let sources = vec![
        SourceFile {
            path: src.join("Cut.java"),
            relative: PathBuf::from("Cut.java"),
        },
        SourceFile {
            path: src.join("Gone.java"),
            relative: PathBuf::from("Gone.java"),
        },
    ];
    let logger = CaptureLogger::new();
    let mut ext = NoExtension;
    let mut session = Session::new(config, &logger, &mut ext, Vec::new());
    let summary = session.run(&sources).unwrap();

    assert!(!dir.path().join("out/Gone.java").exists());
    assert_eq!(
        fs::read_to_string(dir.path().join("out/Cut.java")).unwrap(),
        "class Cut {}\n"
    );
    assert_eq!(summary.counts.excluded, 1);
    assert_eq!(summary.counts.written, 1);
}

#[test]
fn test_fault_in_included_file_reports_include_chain() {
    let root = fixtures().join("include_chain/Root.java");
    let err = process_with(&root, &mut NoExtension).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnbalancedDirective);
    let frames = err.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].path, fixtures().join("include_chain/broken.inc"));
    assert_eq!(frames[0].line_number(), 4);
    assert_eq!(frames[1].path, root);
    assert_eq!(frames[1].line_number(), 26);
    assert_eq!(err.line_text(), Some("//#endif"));

    let rendered = err.to_string();
    assert!(rendered.contains("broken.inc:4: unbalanced directive"));
    assert!(rendered.ends_with("Root.java:26"));
}

#[test]
fn test_replace_string_prefix_prefers_longest_prefix() {
    assert_eq!(
        replace_string_prefix(
            &["-", "--"],
            "/",
            &["--ae:123", "-homa-", "-hbd", "---Some", "-", "--"]
        ),
        vec!["/ae:123", "/homa-", "/hbd", "/-Some", "/", "/"]
    );
}

#[test]
fn test_strip_comments_keeps_string_literals() {
    let source = fs::read_to_string(fixtures().join("strip.java")).unwrap();
    assert_eq!(
        strip_comments(&source, Strictness::Lenient).unwrap(),
        "class m(){\n\nprint(\"a // b\");\n}"
    );
}

#[test]
fn test_unknown_variable_policy() {
    let file = PathBuf::from("Test.java");
    let site = Site::new(&file, 0);

    let strict = empty_env(false);
    assert_eq!(
        evaluate("NOT_DEFINED", &strict, site, &mut NoExtension),
        Err(EvalError::UnknownVariable("NOT_DEFINED".to_string()))
    );

    let lenient = empty_env(true);
    assert_eq!(
        evaluate("NOT_DEFINED", &lenient, site, &mut NoExtension),
        Ok(Value::Bool(false))
    );
    assert_eq!(
        evaluate("!NOT_DEFINED && true", &lenient, site, &mut NoExtension),
        Ok(Value::Bool(true))
    );
}

/// Counts calls to `mark(...)` so evaluation side effects can be observed
struct Marker {
    calls: Rc<RefCell<Vec<String>>>,
}

impl Extension for Marker {
    fn has_action(&self, _arity: usize) -> bool {
        true
    }

    fn has_user_function(&self, name: &str, arity: usize) -> bool {
        name == "mark" && arity == 1
    }

    fn process_action(&mut self, _site: &Site, args: &[Value]) -> bool {
        self.calls
            .borrow_mut()
            .push(format!("action {}", args[0]));
        true
    }

    fn process_user_function(
        &mut self,
        _site: &Site,
        _name: &str,
        args: &[Value],
    ) -> Result<Value, EvalError> {
        self.calls.borrow_mut().push(args[0].to_text());
        Ok(Value::Bool(true))
    }
}

#[test]
fn test_elif_after_taken_branch_is_never_evaluated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Elif.java");
    fs::write(
        &path,
        "//#if mark(\"if\")\nfirst\n//#elif mark(\"elif\")\nsecond\n//#else\n//#action \"else\"\nthird\n//#endif\n",
    )
    .unwrap();

    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut marker = Marker {
        calls: Rc::clone(&calls),
    };
    let out = output_text(process_with(&path, &mut marker).unwrap());

    assert_eq!(out, "first\n");
    assert_eq!(*calls.borrow(), vec!["if".to_string()]);
}

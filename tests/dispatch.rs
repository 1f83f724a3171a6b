// tests/dispatch.rs

//! Integration tests for the runtime side of a merged binary.
//!
//! These wire up a registry the same way generated glue does (one
//! registration function per program) and drive the dispatcher with
//! synthetic argument vectors.

use bbmerge::registry::{self, Deferred, Dispatcher, FrozenRegistry, Registry};
use std::collections::HashMap;
use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::{Mutex, MutexGuard};

/// The dispatcher publishes argv process-wide, so tests take turns
static SERIAL: Mutex<()> = Mutex::new(());

static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static STDIN: Mutex<String> = Mutex::new(String::new());
static STDOUT: Mutex<String> = Mutex::new(String::new());

static GREETINGS: Deferred<HashMap<&'static str, &'static str>> = Deferred::new();

fn lock() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    EVENTS.lock().unwrap().clear();
    STDOUT.lock().unwrap().clear();
    guard
}

fn event(text: &str) {
    EVENTS.lock().unwrap().push(text.to_string());
}

fn events() -> Vec<String> {
    EVENTS.lock().unwrap().clone()
}

fn argv(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

// echo

fn echo_entry() -> ExitCode {
    event("echo:entry");
    let words: Vec<String> = registry::args().skip(1).collect();
    STDOUT.lock().unwrap().push_str(&format!("{}\n", words.join(" ")));
    ExitCode::SUCCESS
}

fn register_echo(registry: &mut Registry) {
    registry.register_entry("echo", echo_entry);
}

// cat

fn cat_init() {
    event("cat:init");
}

fn cat_entry() -> ExitCode {
    event("cat:entry");
    let input = STDIN.lock().unwrap().clone();
    STDOUT.lock().unwrap().push_str(&input);
    ExitCode::SUCCESS
}

fn register_cat(registry: &mut Registry) {
    registry.register_init("cat", cat_init);
    registry.register_entry("cat", cat_entry);
}

// hello: a deferred static read by its entry

fn hello_var_init() {
    event("hello:var-init");
    Deferred::set(&GREETINGS, HashMap::from([("en", "hello"), ("fr", "bonjour")]));
}

fn hello_init() {
    event("hello:init");
}

fn hello_entry() -> ExitCode {
    event("hello:entry");
    let lang = registry::args().nth(1).unwrap_or_else(|| "en".to_string());
    match GREETINGS.get(lang.as_str()) {
        Some(greeting) => {
            STDOUT.lock().unwrap().push_str(greeting);
            ExitCode::SUCCESS
        }
        None => ExitCode::from(2),
    }
}

fn register_hello(registry: &mut Registry) {
    registry.register_init("hello", hello_init);
    registry.register_var_init("hello", hello_var_init);
    registry.register_entry("hello", hello_entry);
}

fn merged() -> FrozenRegistry {
    let mut registry = Registry::new();
    register_echo(&mut registry);
    register_cat(&mut registry);
    register_hello(&mut registry);
    registry.freeze()
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(merged(), "bb", "bbinstall")
}

#[test]
fn test_dispatch_by_invocation_name() {
    let _guard = lock();
    let mut stderr = Vec::new();

    let code = dispatcher().run(argv(&["/bin/echo", "hi", "there"]), &mut stderr);
    assert_eq!(code, ExitCode::SUCCESS);
    assert_eq!(*STDOUT.lock().unwrap(), "hi there\n");
    // Only the dispatched program's procedures ran
    assert_eq!(events(), vec!["echo:entry"]);
    assert!(stderr.is_empty());
}

#[test]
fn test_dispatch_through_binary_name() {
    let _guard = lock();
    *STDIN.lock().unwrap() = "line one\nline two\n".to_string();
    let mut stderr = Vec::new();

    let code = dispatcher().run(argv(&["./bb", "cat"]), &mut stderr);
    assert_eq!(code, ExitCode::SUCCESS);
    assert_eq!(*STDOUT.lock().unwrap(), "line one\nline two\n");
    assert_eq!(events(), vec!["cat:init", "cat:entry"]);
}

#[test]
fn test_unknown_name_lists_valid_programs() {
    let _guard = lock();
    let mut stderr = Vec::new();

    let code = dispatcher().run(argv(&["foo"]), &mut stderr);
    assert_eq!(code, ExitCode::FAILURE);
    assert!(events().is_empty());

    let message = String::from_utf8(stderr).unwrap();
    assert!(message.contains("foo: program not found"));
    assert!(message.contains(r#"["cat", "echo", "hello"]"#));
}

#[test]
fn test_lifecycle_runs_var_init_then_init_then_entry() {
    let _guard = lock();
    let mut stderr = Vec::new();

    let code = dispatcher().run(argv(&["hello", "fr"]), &mut stderr);
    assert_eq!(code, ExitCode::SUCCESS);
    assert_eq!(*STDOUT.lock().unwrap(), "bonjour");
    assert_eq!(
        events(),
        vec!["hello:var-init", "hello:init", "hello:entry"]
    );

    // Entry exit status is passed through
    let code = dispatcher().run(argv(&["hello", "de"]), &mut stderr);
    assert_eq!(code, ExitCode::from(2));
}

#[test]
fn test_usage_without_program() {
    let _guard = lock();
    let mut stderr = Vec::new();

    let code = dispatcher().run(argv(&["bb"]), &mut stderr);
    assert_eq!(code, ExitCode::FAILURE);
    assert!(events().is_empty());
    assert!(String::from_utf8(stderr).unwrap().contains("usage: bb"));
}

#[test]
fn test_self_install_creates_one_alias_per_name() {
    let _guard = lock();
    let temp_dir = tempfile::tempdir().unwrap();
    let dir = temp_dir.path().to_str().unwrap();
    let mut stderr = Vec::new();

    let code = dispatcher().run(argv(&["bbinstall", dir]), &mut stderr);
    assert_eq!(code, ExitCode::SUCCESS, "{}", String::from_utf8_lossy(&stderr));
    for name in ["cat", "echo", "hello"] {
        assert!(temp_dir.path().join(name).symlink_metadata().is_ok());
    }
    assert!(!temp_dir.path().join("bbinstall").exists());
    // Installing never runs a lifecycle procedure
    assert!(events().is_empty());

    // A second install leaves the existing aliases alone
    let code = dispatcher().run(argv(&["bb", "install", dir]), &mut stderr);
    assert_eq!(code, ExitCode::SUCCESS);
}

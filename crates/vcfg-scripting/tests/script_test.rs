//! Integration tests for script objects
//!
//! Pool bounds, failure recovery, result marshalling, reload visibility,
//! collection pacing and backpressure, exercised through the public
//! `init` / `push` / `execute` surface.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use http::HeaderMap;
use parking_lot::Mutex;
use vcfg_scripting::prelude::*;
use vcfg_scripting::{function_name, MAX_RESULT_VALUES};

fn run(script: &Script, code: &str, args: &[&str]) -> TaskState {
    let mut task = TaskState::new();
    script.init(&mut task, Some(code));
    for arg in args {
        script.push(&mut task, Some(arg));
    }
    script.execute(&mut task, None, false, false);
    task
}

/// Provider whose content can be swapped by the test
#[derive(Debug, Default)]
struct SwappableSource {
    contents: Mutex<String>,
}

impl SwappableSource {
    fn new(contents: &str) -> Arc<Self> {
        Arc::new(Self {
            contents: Mutex::new(contents.to_string()),
        })
    }

    fn replace(&self, contents: &str) {
        *self.contents.lock() = contents.to_string();
    }
}

#[derive(Debug)]
struct SharedSource(Arc<SwappableSource>);

impl ContentProvider for SharedSource {
    fn location(&self) -> &str {
        "memory"
    }

    fn check(&self, force: bool, accept: &mut dyn FnMut(&str, bool) -> bool) -> bool {
        if !force {
            return true;
        }
        let contents = self.0.contents.lock().clone();
        accept(&contents, false)
    }
}

#[test]
fn test_type_mapping() {
    let script = Script::new("types", ScriptConfig::default()).unwrap();

    let task = run(&script, "return true", &[]);
    assert!(task.result_is_boolean());
    assert!(task.get_boolean_result());

    let task = run(&script, "return 3.5", &[]);
    assert!(task.result_is_number());
    assert_eq!(task.get_decimal_result(), 3.5);
    assert_eq!(task.get_result().as_deref(), Some("3.5"));

    let task = run(&script, "return nil", &[]);
    assert!(task.result_is_nil());

    let task = run(&script, "return { 1, 'two', false }", &[]);
    assert!(task.result_is_table());
    assert_eq!(task.get_table_result_length(), 3);
    assert!(task.table_result_is_number(0));
    assert!(task.table_result_is_string(1));
    assert!(task.table_result_is_boolean(2));
    assert_eq!(task.get_table_result_value(1).as_deref(), Some("two"));
}

#[test]
fn test_table_truncation() {
    let script = Script::new("truncation", ScriptConfig::default()).unwrap();
    let code = "local t = {} for i = 1, 200 do t[i] = i end return t";

    let task = run(&script, code, &[]);
    assert!(task.result_is_table());
    assert_eq!(task.get_table_result_length(), MAX_RESULT_VALUES);
    assert_eq!(task.get_table_result_value(127).as_deref(), Some("128"));
}

#[test]
fn test_failures_keep_pool_consistent() {
    let script = Script::new("failures", ScriptConfig::default().with_max_engines(2)).unwrap();
    run(&script, "return 1", &[]);
    let engines = script.counter("engines.current");

    for _ in 0..10 {
        assert!(run(&script, "return (", &[]).result_is_error());
        assert!(run(&script, "error('boom')", &[]).result_is_error());
    }

    assert_eq!(script.counter("engines.current"), engines);
    assert_eq!(script.counter("executions.failed"), 20);
    assert!(run(&script, "return 'still fine'", &[]).result_is_string());
}

#[test]
fn test_same_code_compiled_once() {
    let script = Script::new("idempotent", ScriptConfig::default().with_max_engines(1)).unwrap();

    for _ in 0..5 {
        run(&script, "return 42", &[]);
    }

    assert_eq!(script.counter("executions.unknown"), 1);
    assert_eq!(script.counter("executions.total"), 5);
    assert_eq!(function_name("return 42"), function_name("return 42"));
}

#[test]
fn test_engine_retirement() {
    let config = ScriptConfig::default().with_max_engines(1).with_max_cycles(2);
    let script = Script::new("retire", config).unwrap();

    run(&script, "return 1", &[]);
    run(&script, "return 1", &[]);
    assert_eq!(script.counter("engines.dropped.cycles"), 0);

    run(&script, "return 1", &[]);
    assert_eq!(script.counter("engines.dropped.cycles"), 1);
    assert_eq!(script.counter("engines.total"), 2);
    assert_eq!(script.counter("engines.current"), 1);
    // A fresh engine has to compile the function again
    assert_eq!(script.counter("executions.unknown"), 2);
}

#[test]
fn test_gc_pacing() {
    let config = ScriptConfig::default().with_max_engines(1).with_min_gc_cycles(5);
    let script = Script::new("gc", config).unwrap();

    for _ in 0..5 {
        run(&script, "return 1", &[]);
    }
    assert_eq!(script.counter("executions.gc"), 1);

    for _ in 0..4 {
        run(&script, "return 1", &[]);
    }
    assert_eq!(script.counter("executions.gc"), 1);

    let mut task = TaskState::new();
    script.init(&mut task, Some("return 1"));
    script.execute(&mut task, None, true, false);
    assert_eq!(script.counter("executions.gc"), 2);
}

#[test]
fn test_backpressure() {
    let script = Script::new("backpressure", ScriptConfig::default().with_max_engines(1)).unwrap();
    let spin = "while varnish.shared.get('go', 'global') == nil do end return 'first'";

    thread::scope(|s| {
        let first = s.spawn(|| run(&script, spin, &[]).get_string_result().map(str::to_string));
        while script.counter("executions.unknown") == 0 {
            thread::yield_now();
        }

        let second = s.spawn(|| run(&script, "return 'second'", &[]).get_string_result().map(str::to_string));
        while script.counter("workers.blocked") == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(script.counter("executions.total"), 0);

        script.store().set("go", "1");
        assert_eq!(first.join().unwrap().as_deref(), Some("first"));
        assert_eq!(second.join().unwrap().as_deref(), Some("second"));
    });

    assert_eq!(script.counter("workers.blocked"), 1);
    assert_eq!(script.counter("engines.total"), 1);
}

#[test]
fn test_pool_bound_under_load() {
    let script = Script::new("load", ScriptConfig::default().with_max_engines(3)).unwrap();

    thread::scope(|s| {
        for i in 0..8 {
            let script = &script;
            s.spawn(move || {
                for j in 0..25 {
                    let task = run(script, "return ARGV[0] .. ARGV[1]", &[&i.to_string(), &j.to_string()]);
                    assert_eq!(task.get_string_result(), Some(format!("{}{}", i, j).as_str()));
                    assert!(script.counter("engines.current") <= 3);
                }
            });
        }
    });

    assert!(script.counter("engines.total") <= 3);
    assert_eq!(script.counter("executions.total"), 200);
    assert_eq!(script.counter("executions.failed"), 0);
}

#[test]
fn test_reload_swaps_function() {
    let source = SwappableSource::new("return 'v1'");
    let script =
        Script::with_provider("reload", ScriptConfig::default(), SharedSource(source.clone())).unwrap();

    let mut task = TaskState::new();
    script.init(&mut task, None);
    script.execute(&mut task, None, false, false);
    assert_eq!(task.get_string_result(), Some("v1"));

    source.replace("return (");
    assert!(!script.reload());
    assert_eq!(script.inspect().as_deref(), Some("return 'v1'"));

    source.replace("return 'v2'");
    assert!(script.reload());
    script.init(&mut task, Some(""));
    script.execute(&mut task, None, false, false);
    assert_eq!(task.get_string_result(), Some("v2"));
}

#[test]
fn test_reload_is_atomic_for_readers() {
    let source = SwappableSource::new("return 'v1'");
    let script = Script::with_provider(
        "atomic",
        ScriptConfig::default().with_max_engines(4),
        SharedSource(source.clone()),
    )
    .unwrap();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..50 {
                    let mut task = TaskState::new();
                    script.init(&mut task, None);
                    assert!(script.execute(&mut task, None, false, false));
                    let value = task.get_string_result().map(str::to_string);
                    assert!(matches!(value.as_deref(), Some("v1") | Some("v2")));
                }
            });
        }

        for i in 0..20 {
            source.replace(if i % 2 == 0 { "return 'v2'" } else { "return 'v1'" });
            assert!(script.reload());
        }
    });
}

#[test]
fn test_shared_scopes() {
    let script = Script::new("scopes", ScriptConfig::default()).unwrap();

    let mut task = TaskState::new();
    script.init(&mut task, Some("varnish.shared.set('k', 'task-value') return varnish.shared.get('k')"));
    script.execute(&mut task, None, false, false);
    assert_eq!(task.get_string_result(), Some("task-value"));

    script.init(&mut task, Some("return varnish.shared.get('k', 'task')"));
    script.execute(&mut task, None, false, false);
    assert_eq!(task.get_string_result(), Some("task-value"));
    assert_eq!(task.variables().get("k"), Some("task-value"));

    let other = run(&script, "return varnish.shared.get('k')", &[]);
    assert!(other.result_is_nil());

    run(&script, "varnish.shared.set('g', 'global-value', 'global')", &[]);
    assert_eq!(script.store().get("g").as_deref(), Some("global-value"));
    assert_eq!(script.counter("variables.current"), 1);

    let other = run(&script, "return varnish.shared.get('g', 'global')", &[]);
    assert_eq!(other.get_string_result(), Some("global-value"));
}

#[test]
fn test_concurrent_incr() {
    let script = Script::new("incr", ScriptConfig::default().with_max_engines(4)).unwrap();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..50 {
                    run(&script, "return varnish.shared.incr('hits', 1, 'global')", &[]);
                }
            });
        }
    });

    assert_eq!(script.store().get("hits").as_deref(), Some("200"));
}

#[test]
fn test_headers_and_log() {
    let script = Script::new("headers", ScriptConfig::default()).unwrap();
    let mut req = HeaderMap::new();
    req.insert("x-country", "es".parse().unwrap());
    let ctx = RequestContext::new()
        .with_slot(HttpSlot::Req, req)
        .with_slot(HttpSlot::Resp, HeaderMap::new());

    let mut task = TaskState::new();
    script.init(
        &mut task,
        Some(
            "local country = varnish.get_header('X-Country')\n\
             varnish.set_header('X-Greeting', 'hola-' .. country, 'resp')\n\
             varnish.log('greeted ' .. country)\n\
             return country",
        ),
    );
    assert!(script.execute(&mut task, Some(&ctx), false, false));
    assert_eq!(task.get_string_result(), Some("es"));
    assert_eq!(
        ctx.header(HttpSlot::Resp, "x-greeting").unwrap().as_deref(),
        Some("hola-es")
    );
    assert_eq!(ctx.log_lines(), vec!["greeted es".to_string()]);

    script.init(&mut task, Some("return varnish.get_header('X-Anything', 'bereq')"));
    assert!(!script.execute(&mut task, Some(&ctx), false, false));
    assert!(task.result_is_error());
}

#[test]
fn test_stats_document() {
    let script = Script::new("stats", ScriptConfig::default()).unwrap();
    run(&script, "return varnish.regmatch('abc', '^a')", &[]);
    run(&script, "error('boom')", &[]);

    let stats: serde_json::Value = serde_json::from_str(&script.stats()).unwrap();
    assert_eq!(stats["engines"]["current"], 1);
    assert_eq!(stats["engines"]["total"], 1);
    assert!(stats["engines"]["memory"].as_u64().unwrap() > 0);
    assert_eq!(stats["engines"]["dropped"]["cycles"], 0);
    assert_eq!(stats["regexps"]["current"], 1);
    assert_eq!(stats["variables"]["current"], 0);
    assert_eq!(stats["workers"]["blocked"], 0);
    assert_eq!(stats["executions"]["total"], 2);
    assert_eq!(stats["executions"]["unknown"], 2);
    assert_eq!(stats["executions"]["failed"], 1);
    assert_eq!(stats["executions"]["gc"], 0);
}

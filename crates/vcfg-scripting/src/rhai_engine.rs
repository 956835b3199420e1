//! Rhai script engine implementation
//!
//! Engines are raw `rhai::Engine`s sharing the standard package held by the
//! [`Library`](crate::library::Library). Each defined function is kept as
//! its own compiled AST; the host commands live in the static `varnish`
//! module (`varnish::log`, `varnish::shared::get`, ...).
//!
//! A script body runs as top-level statements with `ARGV` in scope, so it
//! may declare helper `fn`s next to them. Helpers see only their own
//! parameters, as usual in Rhai.

use std::collections::HashMap;

use rhai::{
    Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, Module, NativeCallContext, Scope, Shared,
    AST, FLOAT, INT,
};
use tracing::{debug, error, info};

use crate::bridge::{number_to_text, Bridge, CommandResult};
use crate::config::RhaiOptions;
use crate::error::{Result, ScriptError};
use crate::result::{ExecutionResult, ResultValue, MAX_RESULT_VALUES};

type RhaiResult<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Creates Rhai engines for one script
#[derive(Debug)]
pub struct RhaiRuntime {
    options: RhaiOptions,
    sandboxed: bool,
    bridge: Bridge,
    packages: Shared<Module>,
}

impl RhaiRuntime {
    pub(crate) fn new(
        options: RhaiOptions,
        sandboxed: bool,
        bridge: Bridge,
        packages: Shared<Module>,
    ) -> Self {
        Self {
            options,
            sandboxed,
            bridge,
            packages,
        }
    }

    pub(crate) fn create(&self) -> Result<RhaiInterpreter> {
        let mut engine = Engine::new_raw();
        engine.register_global_module(self.packages.clone());

        // Configure engine limits
        engine.set_max_operations(self.options.max_operations);
        engine.set_max_call_levels(self.options.max_call_levels);
        engine.set_max_expr_depths(self.options.max_expr_depth, self.options.max_expr_depth);
        engine.set_max_string_size(self.options.max_string_size);
        engine.set_max_array_size(self.options.max_array_size);
        engine.set_max_map_size(self.options.max_map_size);

        if self.sandboxed {
            engine.set_strict_variables(true);
            engine.register_fn("eval", |_script: &str| -> RhaiResult<()> {
                Err("eval is disabled in sandboxed scripts".into())
            });
        }

        let script = self.bridge.script().to_string();
        engine.on_print(move |text| info!(script = %script, "{}", text));
        let script = self.bridge.script().to_string();
        engine.on_debug(move |text, _source, position| {
            debug!(script = %script, position = %position, "{}", text)
        });

        engine.register_static_module("varnish", bridge_module(&self.bridge).into());

        Ok(RhaiInterpreter {
            engine,
            functions: HashMap::new(),
            source_bytes: 0,
        })
    }
}

fn raise(message: String) -> Box<EvalAltResult> {
    message.into()
}

fn lift<T>(result: CommandResult<T>) -> RhaiResult<T> {
    result.map_err(raise)
}

fn optional_text(value: Option<String>) -> Dynamic {
    value.map_or(Dynamic::UNIT, Dynamic::from)
}

/// String form of a value passed to `shared::set`
fn value_text(value: Dynamic) -> RhaiResult<String> {
    if value.is_string() {
        return value.into_string().map_err(|t| raise(format!("unexpected {}", t)));
    }
    if let Ok(i) = value.as_int() {
        return Ok(i.to_string());
    }
    if let Ok(f) = value.as_float() {
        return Ok(number_to_text(f));
    }
    if let Ok(b) = value.as_bool() {
        return Ok(b.to_string());
    }
    Err(raise(format!(
        "bad argument (string expected, got {})",
        value.type_name()
    )))
}

/// Numeric form of an `incr` step; anything non-numeric counts as 0
fn value_number(value: &Dynamic) -> f64 {
    if let Ok(i) = value.as_int() {
        return i as f64;
    }
    if let Ok(f) = value.as_float() {
        return f;
    }
    if value.is_string() {
        return value.to_string().trim().parse().unwrap_or(0.0);
    }
    0.0
}

fn number_value(value: f64) -> Dynamic {
    if value.fract() == 0.0 && value.abs() < INT::MAX as f64 {
        Dynamic::from_int(value as INT)
    } else {
        Dynamic::from_float(value as FLOAT)
    }
}

fn bridge_module(bridge: &Bridge) -> Module {
    let mut varnish = Module::new();

    let b = bridge.clone();
    varnish.set_native_fn("log", move |message: &str| lift(b.log(message)));

    let b = bridge.clone();
    varnish.set_native_fn("get_header", move |name: &str| {
        lift(b.get_header(name, None)).map(optional_text)
    });
    let b = bridge.clone();
    varnish.set_native_fn("get_header", move |name: &str, location: &str| {
        lift(b.get_header(name, Some(location))).map(optional_text)
    });

    let b = bridge.clone();
    varnish.set_native_fn("set_header", move |name: &str, value: &str| {
        lift(b.set_header(name, value, None))
    });
    let b = bridge.clone();
    varnish.set_native_fn(
        "set_header",
        move |name: &str, value: &str, location: &str| lift(b.set_header(name, value, Some(location))),
    );

    let b = bridge.clone();
    varnish.set_native_fn("regmatch", move |subject: &str, pattern: &str| {
        lift(b.regmatch(subject, pattern, true))
    });
    let b = bridge.clone();
    varnish.set_native_fn(
        "regmatch",
        move |subject: &str, pattern: &str, cache: bool| lift(b.regmatch(subject, pattern, cache)),
    );

    for (command, all) in [("regsub", false), ("regsuball", true)] {
        let b = bridge.clone();
        varnish.set_native_fn(command, move |subject: &str, pattern: &str, sub: &str| {
            lift(b.regsub(subject, pattern, sub, true, all))
        });
        let b = bridge.clone();
        varnish.set_native_fn(
            command,
            move |subject: &str, pattern: &str, sub: &str, cache: bool| {
                lift(b.regsub(subject, pattern, sub, cache, all))
            },
        );
    }

    varnish.set_sub_module("shared", shared_module(bridge));
    varnish
}

fn shared_module(bridge: &Bridge) -> Module {
    let mut shared = Module::new();

    let b = bridge.clone();
    shared.set_native_fn("get", move |key: &str| {
        lift(b.shared_get(key, None)).map(optional_text)
    });
    let b = bridge.clone();
    shared.set_native_fn("get", move |key: &str, scope: &str| {
        lift(b.shared_get(key, Some(scope))).map(optional_text)
    });

    let b = bridge.clone();
    shared.set_native_fn("set", move |key: &str, value: Dynamic| {
        lift(b.shared_set(key, &value_text(value)?, None))
    });
    let b = bridge.clone();
    shared.set_native_fn("set", move |key: &str, value: Dynamic, scope: &str| {
        lift(b.shared_set(key, &value_text(value)?, Some(scope)))
    });

    let b = bridge.clone();
    shared.set_native_fn("unset", move |key: &str| lift(b.shared_unset(key, None)));
    let b = bridge.clone();
    shared.set_native_fn("unset", move |key: &str, scope: &str| {
        lift(b.shared_unset(key, Some(scope)))
    });

    let b = bridge.clone();
    shared.set_native_fn("eval", move |ctx: NativeCallContext<'_>, function: FnPtr| {
        lift(b.shared_eval(|| function.call_within_context::<Dynamic>(&ctx, ())))?
    });

    let b = bridge.clone();
    shared.set_native_fn("incr", move |key: &str| {
        lift(b.shared_incr(key, 0.0, None)).map(number_value)
    });
    let b = bridge.clone();
    shared.set_native_fn("incr", move |key: &str, increment: Dynamic| {
        lift(b.shared_incr(key, value_number(&increment), None)).map(number_value)
    });
    let b = bridge.clone();
    shared.set_native_fn(
        "incr",
        move |key: &str, increment: Dynamic, scope: &str| {
            lift(b.shared_incr(key, value_number(&increment), Some(scope))).map(number_value)
        },
    );

    shared
}

/// Scope holding the `ARGV` array seen by a script body
fn argv_scope(argv: Array) -> Scope<'static> {
    let mut scope = Scope::new();
    scope.push("ARGV", argv);
    scope
}

/// A Rhai engine with its compiled functions
#[derive(Debug)]
pub struct RhaiInterpreter {
    engine: Engine,
    /// Compiled AST cache (function name -> AST)
    functions: HashMap<String, AST>,
    source_bytes: u64,
}

impl RhaiInterpreter {
    pub(crate) fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub(crate) fn define_function(&mut self, name: &str, code: &str) -> Result<()> {
        let ast = self.engine.compile_with_scope(&argv_scope(Array::new()), code)?;
        self.source_bytes += code.len() as u64;
        self.functions.insert(name.to_string(), ast);
        Ok(())
    }

    pub(crate) fn call_function(&mut self, name: &str, argv: &[String]) -> Result<ExecutionResult> {
        let ast = self
            .functions
            .get(name)
            .ok_or_else(|| ScriptError::runtime(format!("Function not found: {}", name)))?;

        let args: Array = argv.iter().cloned().map(Dynamic::from).collect();
        let value: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut argv_scope(args), ast)?;
        marshal(value)
    }

    pub(crate) fn used_memory(&self) -> u64 {
        self.source_bytes
    }

    pub(crate) fn stack_depth(&self) -> usize {
        0
    }

    pub(crate) fn collect_garbage(&mut self, _full: bool) -> Result<()> {
        Ok(())
    }
}

fn marshal(value: Dynamic) -> Result<ExecutionResult> {
    if value.is::<Array>() {
        let items = value
            .into_array()
            .map_err(ScriptError::marshal)?;
        if items.len() > MAX_RESULT_VALUES {
            error!(limit = MAX_RESULT_VALUES, "Failed to store Rhai array value");
        }
        let values = items
            .into_iter()
            .take(MAX_RESULT_VALUES)
            .map(|item| {
                if item.is::<Array>() || item.is::<Map>() {
                    return ResultValue::Table;
                }
                scalar(&item).unwrap_or_else(|| {
                    error!(value_type = item.type_name(), "Got invalid Rhai script result value");
                    ResultValue::Error
                })
            })
            .collect();
        return Ok(ExecutionResult::Table(values));
    }

    if value.is::<Map>() {
        return Ok(ExecutionResult::Table(Vec::new()));
    }

    scalar(&value)
        .map(ExecutionResult::Single)
        .ok_or_else(|| ScriptError::marshal(value.type_name()))
}

fn scalar(value: &Dynamic) -> Option<ResultValue> {
    if value.is_unit() {
        return Some(ResultValue::Nil);
    }
    if let Ok(b) = value.as_bool() {
        return Some(ResultValue::Boolean(b));
    }
    if let Ok(i) = value.as_int() {
        return Some(ResultValue::Number(i as f64));
    }
    if let Ok(f) = value.as_float() {
        return Some(ResultValue::Number(f as f64));
    }
    if value.is_string() || value.is::<char>() {
        return Some(ResultValue::String(value.to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Library;
    use vcfg_state::Variables;

    fn interpreter(sandboxed: bool) -> (Bridge, RhaiInterpreter) {
        let library = Library::acquire();
        let bridge = Bridge::new("test");
        let runtime = RhaiRuntime::new(
            RhaiOptions::default(),
            sandboxed,
            bridge.clone(),
            library.rhai_packages(),
        );
        (bridge, runtime.create().unwrap())
    }

    fn run(bridge: &Bridge, rhai: &mut RhaiInterpreter, code: &str, argv: &[String]) -> Result<ExecutionResult> {
        let mut task = Variables::new();
        let _guard = bridge.enter(None, &mut task);
        rhai.define_function("f_test", code)?;
        rhai.call_function("f_test", argv)
    }

    #[test]
    fn test_rhai_engine_basic() {
        let (bridge, mut rhai) = interpreter(true);
        assert_eq!(
            run(&bridge, &mut rhai, "let x = 1 + 1; x", &[]).unwrap(),
            ExecutionResult::Single(ResultValue::Number(2.0))
        );
        assert!(rhai.has_function("f_test"));
        assert!(rhai.used_memory() > 0);
    }

    #[test]
    fn test_argv_and_strings() {
        let (bridge, mut rhai) = interpreter(true);
        let result = run(&bridge, &mut rhai, "ARGV[0] + \"!\"", &["hi".into()]).unwrap();
        assert_eq!(result, ExecutionResult::Single(ResultValue::String("hi!".into())));
    }

    #[test]
    fn test_helper_functions() {
        let (bridge, mut rhai) = interpreter(true);
        let result = run(
            &bridge,
            &mut rhai,
            "fn shout(s) { s.to_upper() + \"!\" }\nfn twice(s) { s + s }\nreturn twice(shout(ARGV[0]));",
            &["hi".into()],
        )
        .unwrap();
        assert_eq!(result, ExecutionResult::Single(ResultValue::String("HI!HI!".into())));
    }

    #[test]
    fn test_collections() {
        let (bridge, mut rhai) = interpreter(true);
        let result = run(&bridge, &mut rhai, "[true, 2.5, \"x\", [1], #{a: 1}, ()]", &[]).unwrap();
        assert_eq!(
            result,
            ExecutionResult::Table(vec![
                ResultValue::Boolean(true),
                ResultValue::Number(2.5),
                ResultValue::String("x".into()),
                ResultValue::Table,
                ResultValue::Table,
                ResultValue::Nil,
            ])
        );

        let result = run(&bridge, &mut rhai, "#{a: 1}", &[]).unwrap();
        assert_eq!(result, ExecutionResult::Table(Vec::new()));

        let result = run(&bridge, &mut rhai, "let a = []; for i in 0..200 { a.push(i); } a", &[]).unwrap();
        assert_eq!(result.len(), MAX_RESULT_VALUES);
    }

    #[test]
    fn test_unsupported_result() {
        let (bridge, mut rhai) = interpreter(true);
        let err = run(&bridge, &mut rhai, "Fn(\"print\")", &[]).unwrap_err();
        assert!(matches!(err, ScriptError::MarshalError { .. }));
    }

    #[test]
    fn test_sandbox() {
        let (bridge, mut rhai) = interpreter(true);

        let err = run(&bridge, &mut rhai, "undefined_thing", &[]).unwrap_err();
        assert!(matches!(err, ScriptError::CompilationError { .. }));

        let err = run(&bridge, &mut rhai, "eval(\"40 + 2\")", &[]).unwrap_err();
        assert!(err.to_string().contains("eval is disabled"));
    }

    #[test]
    fn test_operation_limit() {
        let library = Library::acquire();
        let bridge = Bridge::new("test");
        let options = RhaiOptions {
            max_operations: 1_000,
            ..RhaiOptions::default()
        };
        let mut rhai = RhaiRuntime::new(options, true, bridge.clone(), library.rhai_packages())
            .create()
            .unwrap();

        let err = run(&bridge, &mut rhai, "loop { }", &[]).unwrap_err();
        assert!(matches!(err, ScriptError::RuntimeError { .. }));
    }

    #[test]
    fn test_shared_commands() {
        let (bridge, mut rhai) = interpreter(true);
        let result = run(
            &bridge,
            &mut rhai,
            r#"
                varnish::shared::set("k", 42, "global");
                varnish::shared::incr("k", 1, "global");
                varnish::shared::eval(|| varnish::shared::incr("k", 0.5, "global"))
            "#,
            &[],
        )
        .unwrap();
        assert_eq!(result, ExecutionResult::Single(ResultValue::Number(43.5)));
        assert_eq!(bridge.store().get("k").as_deref(), Some("43.5"));

        let result = run(&bridge, &mut rhai, "varnish::shared::get(\"missing\")", &[]).unwrap();
        assert_eq!(result, ExecutionResult::Single(ResultValue::Nil));
    }

    #[test]
    fn test_regexps() {
        let (bridge, mut rhai) = interpreter(true);
        let result = run(
            &bridge,
            &mut rhai,
            r#"[varnish::regmatch("abc", "^a"), varnish::regsuball("a.b.c", "\\.", "-")]"#,
            &[],
        )
        .unwrap();
        assert_eq!(
            result,
            ExecutionResult::Table(vec![
                ResultValue::Boolean(true),
                ResultValue::String("a-b-c".into()),
            ])
        );

        let err = run(&bridge, &mut rhai, "varnish::regmatch(\"x\", \"(\")", &[]).unwrap_err();
        assert!(err.to_string().contains("Failed to instantiate '(' regexp."));
    }
}

//! Lua 5.4 runtime
//!
//! Every engine is an independent `mlua::Lua` state with the `varnish`
//! bridge table installed. With sandboxing enabled only the base, table,
//! string and math libraries are loaded (package/io/os on request), the
//! file loaders are removed, globals are strict and the bridge tables are
//! read-only proxies.

use mlua::{Function, Lua, MultiValue, StdLib, Table, Value};
use tracing::error;

use crate::bridge::{Bridge, CommandResult};
use crate::config::LuaOptions;
use crate::error::{Result, ScriptError};
use crate::result::{ExecutionResult, ResultValue, MAX_RESULT_VALUES};

const SCRIPT_CHUNK: &str = "@varnish_script";

const INCR_SOURCE: &str = r#"
function varnish.shared.incr(key, increment, scope)
  local step = tonumber(increment) or 0
  return varnish.shared.eval(function()
    local total = (tonumber(varnish.shared.get(key, scope)) or 0) + step
    varnish.shared.set(key, total, scope)
    return total
  end)
end
"#;

const FREEZE_SOURCE: &str = r#"
local function freeze(target)
  return setmetatable({}, {
    __index = target,
    __newindex = function()
      error('Script attempted to modify read-only table', 2)
    end,
    __metatable = false,
  })
end

varnish.shared = freeze(varnish.shared)
varnish = freeze(varnish)
"#;

const STRICT_SOURCE: &str = r#"
local index, newindex = ...
setmetatable(_G, { __index = index, __newindex = newindex })
"#;

/// Creates Lua interpreters for one script
#[derive(Debug)]
pub struct LuaRuntime {
    options: LuaOptions,
    sandboxed: bool,
    bridge: Bridge,
}

impl LuaRuntime {
    pub(crate) fn new(options: LuaOptions, sandboxed: bool, bridge: Bridge) -> Self {
        Self {
            options,
            sandboxed,
            bridge,
        }
    }

    pub(crate) fn create(&self) -> Result<LuaInterpreter> {
        self.build().map_err(|e| ScriptError::engine_creation(describe_lua_error(&e)))
    }

    fn build(&self) -> mlua::Result<LuaInterpreter> {
        let lua = if self.sandboxed {
            Lua::new_with(self.libraries(), mlua::LuaOptions::default())?
        } else {
            Lua::new()
        };

        if self.sandboxed {
            let globals = lua.globals();
            if !self.options.enable_loadfile {
                globals.raw_set("loadfile", Value::Nil)?;
            }
            if !self.options.enable_dofile {
                globals.raw_set("dofile", Value::Nil)?;
            }
        }

        install_bridge(&lua, &self.bridge)?;

        if self.sandboxed {
            lua.load(FREEZE_SOURCE).set_name("=varnish_freeze").exec()?;
            install_strict_globals(&lua)?;
        }

        let xpcall: Function = lua.globals().raw_get("xpcall")?;
        let handler = lua.create_function(|lua, message: Value| {
            let message = describe_value(&message);
            Ok(match caller_location(lua) {
                Some(location) => format!("{}: {}", location, message),
                None => message,
            })
        })?;

        Ok(LuaInterpreter {
            lua,
            xpcall,
            handler,
            gc_step_size: self.options.gc_step_size,
        })
    }

    fn libraries(&self) -> StdLib {
        let mut libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH;
        if self.options.enable_package_lib {
            libs = libs | StdLib::PACKAGE;
        }
        if self.options.enable_io_lib {
            libs = libs | StdLib::IO;
        }
        if self.options.enable_os_lib {
            libs = libs | StdLib::OS;
        }
        libs
    }
}

fn raise(message: String) -> mlua::Error {
    mlua::Error::RuntimeError(message)
}

fn lift<T>(result: CommandResult<T>) -> mlua::Result<T> {
    result.map_err(raise)
}

fn install_bridge(lua: &Lua, bridge: &Bridge) -> mlua::Result<()> {
    let varnish = lua.create_table()?;
    let shared = lua.create_table()?;

    let b = bridge.clone();
    varnish.raw_set(
        "log",
        lua.create_function(move |_, message: String| lift(b.log(&message)))?,
    )?;

    let b = bridge.clone();
    varnish.raw_set(
        "get_header",
        lua.create_function(move |_, (name, location): (String, Option<String>)| {
            lift(b.get_header(&name, location.as_deref()))
        })?,
    )?;

    let b = bridge.clone();
    varnish.raw_set(
        "set_header",
        lua.create_function(
            move |_, (name, value, location): (String, String, Option<String>)| {
                lift(b.set_header(&name, &value, location.as_deref()))
            },
        )?,
    )?;

    let b = bridge.clone();
    varnish.raw_set(
        "regmatch",
        lua.create_function(
            move |_, (subject, pattern, cache): (String, String, Option<bool>)| {
                lift(b.regmatch(&subject, &pattern, cache.unwrap_or(true)))
            },
        )?,
    )?;

    for (command, all) in [("regsub", false), ("regsuball", true)] {
        let b = bridge.clone();
        varnish.raw_set(
            command,
            lua.create_function(
                move |_, (subject, pattern, sub, cache): (String, String, String, Option<bool>)| {
                    lift(b.regsub(&subject, &pattern, &sub, cache.unwrap_or(true), all))
                },
            )?,
        )?;
    }

    let b = bridge.clone();
    shared.raw_set(
        "get",
        lua.create_function(move |lua, (key, scope): (Option<Value>, Option<String>)| {
            match text_arg(lua, key) {
                Some(key) => lift(b.shared_get(&key, scope.as_deref())),
                None => Ok(None),
            }
        })?,
    )?;

    let b = bridge.clone();
    shared.raw_set(
        "set",
        lua.create_function(
            move |lua, (key, value, scope): (Option<Value>, Option<Value>, Option<String>)| {
                match (text_arg(lua, key), text_arg(lua, value)) {
                    (Some(key), Some(value)) => lift(b.shared_set(&key, &value, scope.as_deref())),
                    _ => Ok(()),
                }
            },
        )?,
    )?;

    let b = bridge.clone();
    shared.raw_set(
        "unset",
        lua.create_function(move |lua, (key, scope): (Option<Value>, Option<String>)| {
            match text_arg(lua, key) {
                Some(key) => lift(b.shared_unset(&key, scope.as_deref())),
                None => Ok(()),
            }
        })?,
    )?;

    let b = bridge.clone();
    shared.raw_set(
        "eval",
        lua.create_function(move |_, function: Function| {
            lift(b.shared_eval(|| -> mlua::Result<MultiValue> { function.call(()) }))?
        })?,
    )?;

    varnish.raw_set("shared", shared)?;
    varnish.raw_set("engine", lua.create_table()?)?;
    lua.globals().raw_set("varnish", varnish)?;

    lua.load(INCR_SOURCE).set_name("=varnish_shared_incr").exec()
}

/// Non-empty string form of a string or number argument
fn text_arg(lua: &Lua, value: Option<Value>) -> Option<String> {
    let text = lua.coerce_string(value?).ok()??;
    let text = String::from(text.to_string_lossy());
    (!text.is_empty()).then_some(text)
}

fn frame_kind(lua: &Lua) -> Option<&'static str> {
    lua.inspect_stack(1).map(|frame| frame.source().what)
}

fn install_strict_globals(lua: &Lua) -> mlua::Result<()> {
    let index = lua.create_function(|lua, (_, key): (Table, Value)| {
        match frame_kind(lua) {
            Some(what) if what != "C" => Err(raise(format!(
                "Script attempted to access nonexistent global variable '{}'",
                describe_value(&key)
            ))),
            _ => Ok(Value::Nil),
        }
    })?;

    let newindex = lua.create_function(|lua, (globals, key, value): (Table, Value, Value)| {
        match frame_kind(lua) {
            Some(what) if what != "main" && what != "C" => Err(raise(format!(
                "Script attempted to create global variable '{}'",
                describe_value(&key)
            ))),
            _ => globals.raw_set(key, value),
        }
    })?;

    lua.load(STRICT_SOURCE)
        .set_name("=varnish_strict")
        .call::<()>((index, newindex))
}

/// `<source>:<line>` of the script frame that raised, skipping native frames
fn caller_location(lua: &Lua) -> Option<String> {
    let mut frame = lua.inspect_stack(1)?;
    if frame.source().what == "C" {
        frame = lua.inspect_stack(2)?;
    }
    let source = frame.source().source?.into_owned();
    Some(format!("{}:{}", source, frame.curr_line()))
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::String(s) => String::from(s.to_string_lossy()),
        Value::Error(e) => describe_lua_error(e),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.type_name().to_string(),
    }
}

/// Interpreter message without mlua's callback wrapping and traceback
fn describe_lua_error(err: &mlua::Error) -> String {
    let message = match err {
        mlua::Error::CallbackError { cause, .. } => return describe_lua_error(cause),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    };
    match message.split_once("\nstack traceback:") {
        Some((head, _)) => head.to_string(),
        None => message,
    }
}

/// A sandboxed Lua state
#[derive(Debug)]
pub struct LuaInterpreter {
    lua: Lua,
    xpcall: Function,
    handler: Function,
    gc_step_size: u32,
}

impl LuaInterpreter {
    pub(crate) fn has_function(&self, name: &str) -> bool {
        let value: mlua::Result<Value> = self.lua.globals().raw_get(name);
        matches!(value, Ok(Value::Function(_)))
    }

    pub(crate) fn define_function(&mut self, name: &str, code: &str) -> Result<()> {
        let source = format!("function {}()\n{}\nend", name, code);
        self.lua
            .load(source)
            .set_name(SCRIPT_CHUNK)
            .exec()
            .map_err(|e| ScriptError::compilation(describe_lua_error(&e)))
    }

    pub(crate) fn call_function(&mut self, name: &str, argv: &[String]) -> Result<ExecutionResult> {
        let globals = self.lua.globals();

        let args = self.lua.create_table()?;
        for (index, arg) in argv.iter().enumerate() {
            args.raw_set(index as i64, arg.as_str())?;
        }
        globals.raw_set("ARGV", args)?;

        let function: Function = globals.raw_get(name)?;
        let (ok, value): (bool, Value) = self.xpcall.call((function, self.handler.clone()))?;
        if !ok {
            return Err(ScriptError::runtime(describe_value(&value)));
        }
        marshal(value)
    }

    pub(crate) fn used_memory(&self) -> u64 {
        self.lua.used_memory() as u64
    }

    pub(crate) fn stack_depth(&self) -> usize {
        0
    }

    pub(crate) fn collect_garbage(&mut self, full: bool) -> Result<()> {
        if full {
            self.lua.gc_collect()?;
        } else {
            let step = i32::try_from(self.gc_step_size).unwrap_or(i32::MAX);
            self.lua.gc_step_kbytes(step)?;
        }
        Ok(())
    }
}

fn marshal(value: Value) -> Result<ExecutionResult> {
    let table = match value {
        Value::Table(table) => table,
        other => {
            return scalar(&other)
                .map(ExecutionResult::Single)
                .ok_or_else(|| ScriptError::marshal(other.type_name()));
        }
    };

    let mut values = Vec::new();
    for index in 1_i64.. {
        let item: Value = table.raw_get(index)?;
        if matches!(item, Value::Nil) {
            break;
        }
        if values.len() >= MAX_RESULT_VALUES {
            error!(limit = MAX_RESULT_VALUES, "Failed to store Lua table value");
            break;
        }
        values.push(match item {
            Value::Table(_) => ResultValue::Table,
            other => scalar(&other).unwrap_or_else(|| {
                error!(value_type = other.type_name(), "Got invalid Lua script result value");
                ResultValue::Error
            }),
        });
    }
    Ok(ExecutionResult::Table(values))
}

fn scalar(value: &Value) -> Option<ResultValue> {
    match value {
        Value::Nil => Some(ResultValue::Nil),
        Value::Boolean(b) => Some(ResultValue::Boolean(*b)),
        Value::Integer(i) => Some(ResultValue::Number(*i as f64)),
        Value::Number(n) => Some(ResultValue::Number(*n)),
        Value::String(s) => Some(ResultValue::String(String::from(s.to_string_lossy()))),
        _ => None,
    }
}

//! Per-task scratch state for the init / push / execute protocol

use crate::result::{ExecutionResult, ResultValue};
use vcfg_state::Variables;

/// Maximum number of arguments pushed before an execution
pub const MAX_EXECUTION_ARGS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Uninitialized,
    Initialized,
    Executed,
}

/// Request-scoped state of one script invocation
///
/// Created on first use by a task, reset by every `init` and by
/// `free_result`, dropped with the task. Result accessors return neutral
/// defaults (false, 0, `None`) until an execution has completed.
/// Task-scoped shared variables live here too and survive `init` so several
/// executions in a task can share them.
#[derive(Debug, Default)]
pub struct TaskState {
    phase: Phase,
    code: Option<String>,
    argv: Vec<String>,
    result: ExecutionResult,
    variables: Variables,
}

impl TaskState {
    /// Create an uninitialized task state
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reset(&mut self, code: Option<&str>) {
        self.phase = Phase::Initialized;
        self.code = code.filter(|c| !c.is_empty()).map(str::to_string);
        self.argv.clear();
        self.result = ExecutionResult::default();
    }

    /// Append an argument; `false` when past the cap or before `init`
    pub(crate) fn push_arg(&mut self, arg: &str) -> bool {
        if self.phase == Phase::Uninitialized || self.argv.len() >= MAX_EXECUTION_ARGS {
            return false;
        }
        self.argv.push(arg.to_string());
        true
    }

    pub(crate) fn set_result(&mut self, result: ExecutionResult) {
        self.result = result;
        self.phase = Phase::Executed;
    }

    pub(crate) fn clear(&mut self) {
        self.phase = Phase::Uninitialized;
        self.code = None;
        self.argv.clear();
        self.result = ExecutionResult::default();
    }

    pub(crate) fn args_and_variables(&mut self) -> (&[String], &mut Variables) {
        (&self.argv, &mut self.variables)
    }

    /// Whether `init` has been called
    pub fn is_initialized(&self) -> bool {
        self.phase != Phase::Uninitialized
    }

    /// Whether an execution has completed since the last `init`
    pub fn is_executed(&self) -> bool {
        self.phase == Phase::Executed
    }

    /// Ad-hoc code given to `init`, if any
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Arguments pushed so far
    pub fn args(&self) -> &[String] {
        &self.argv
    }

    /// Task-scoped shared variables
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// The raw result, once executed
    pub fn result(&self) -> Option<&ExecutionResult> {
        self.executed()
    }

    fn executed(&self) -> Option<&ExecutionResult> {
        (self.phase == Phase::Executed).then_some(&self.result)
    }

    fn scalar(&self) -> Option<&ResultValue> {
        self.executed().and_then(ExecutionResult::value)
    }

    fn element(&self, index: i64) -> Option<&ResultValue> {
        let index = usize::try_from(index).ok()?;
        self.executed().and_then(|r| r.get(index))
    }

    /// Whether the result is an error
    pub fn result_is_error(&self) -> bool {
        self.scalar().map_or(false, ResultValue::is_error)
    }

    /// Whether the result is nil
    pub fn result_is_nil(&self) -> bool {
        self.scalar().map_or(false, ResultValue::is_nil)
    }

    /// Whether the result is a boolean
    pub fn result_is_boolean(&self) -> bool {
        self.scalar().map_or(false, ResultValue::is_boolean)
    }

    /// Whether the result is a number
    pub fn result_is_number(&self) -> bool {
        self.scalar().map_or(false, ResultValue::is_number)
    }

    /// Whether the result is a string
    pub fn result_is_string(&self) -> bool {
        self.scalar().map_or(false, ResultValue::is_string)
    }

    /// Whether the result is a table
    pub fn result_is_table(&self) -> bool {
        self.executed().map_or(false, ExecutionResult::is_table)
    }

    /// String rendering of a scalar result
    pub fn get_result(&self) -> Option<String> {
        self.scalar().and_then(ResultValue::to_text)
    }

    /// Boolean result, false otherwise
    pub fn get_boolean_result(&self) -> bool {
        matches!(self.scalar(), Some(ResultValue::Boolean(true)))
    }

    /// Numeric result, 0.0 otherwise
    pub fn get_decimal_result(&self) -> f64 {
        match self.scalar() {
            Some(ResultValue::Number(n)) => *n,
            _ => 0.0,
        }
    }

    /// Numeric result truncated toward zero, 0 otherwise
    pub fn get_integer_result(&self) -> i64 {
        self.get_decimal_result() as i64
    }

    /// String result, `None` otherwise
    pub fn get_string_result(&self) -> Option<&str> {
        match self.scalar() {
            Some(ResultValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Number of values in a table result, 0 otherwise
    pub fn get_table_result_length(&self) -> usize {
        self.executed().map_or(0, ExecutionResult::len)
    }

    /// Whether table value `index` is an error
    pub fn table_result_is_error(&self, index: i64) -> bool {
        self.element(index).map_or(false, ResultValue::is_error)
    }

    /// Whether table value `index` is nil
    pub fn table_result_is_nil(&self, index: i64) -> bool {
        self.element(index).map_or(false, ResultValue::is_nil)
    }

    /// Whether table value `index` is a boolean
    pub fn table_result_is_boolean(&self, index: i64) -> bool {
        self.element(index).map_or(false, ResultValue::is_boolean)
    }

    /// Whether table value `index` is a number
    pub fn table_result_is_number(&self, index: i64) -> bool {
        self.element(index).map_or(false, ResultValue::is_number)
    }

    /// Whether table value `index` is a string
    pub fn table_result_is_string(&self, index: i64) -> bool {
        self.element(index).map_or(false, ResultValue::is_string)
    }

    /// Whether table value `index` is a nested table
    pub fn table_result_is_table(&self, index: i64) -> bool {
        self.element(index).map_or(false, ResultValue::is_table)
    }

    /// String rendering of table value `index`
    pub fn get_table_result_value(&self, index: i64) -> Option<String> {
        self.element(index).and_then(ResultValue::to_text)
    }
}

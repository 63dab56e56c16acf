// ============================================================================
// Commands and Parameters
// ============================================================================

use crate::connection::IsolationLevel;
use crate::core::{DbError, DbType, FromValue, Result, Value};
use serde::{Deserialize, Serialize};

/// How the command text is interpreted by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Plain SQL text
    #[default]
    Text,
    /// Name of a stored procedure
    StoredProcedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterDirection {
    Input,
    Output,
    InputOutput,
}

impl ParameterDirection {
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output | Self::InputOutput)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub db_type: DbType,
    pub direction: ParameterDirection,
    pub value: Value,
    pub size: Option<usize>,
}

/// Marks a command as created inside a transaction scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionBinding {
    isolation_level: IsolationLevel,
}

impl TransactionBinding {
    pub(crate) fn new(isolation_level: IsolationLevel) -> Self {
        Self { isolation_level }
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }
}

/// A database command: text, kind and an ordered parameter list
///
/// Commands are plain values. Executing one needs a connection or a
/// transaction; the command itself never holds either.
///
/// # Examples
///
/// ```ignore
/// let mut cmd = Command::text("INSERT INTO users (id, name) VALUES (@id, @name)");
/// cmd.add_in_param("@id", DbType::Integer, 1)?;
/// cmd.add_in_param("@name", DbType::Text, "Alice")?;
/// let rows = conn.execute_non_query(&cmd)?.rows_affected;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    text: String,
    kind: CommandKind,
    parameters: Vec<Parameter>,
    transaction: Option<TransactionBinding>,
}

impl Command {
    pub fn new(text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            kind,
            parameters: Vec::new(),
            transaction: None,
        }
    }

    pub fn text(sql: impl Into<String>) -> Self {
        Self::new(sql, CommandKind::Text)
    }

    pub fn stored_procedure(name: impl Into<String>) -> Self {
        Self::new(name, CommandKind::StoredProcedure)
    }

    pub fn command_text(&self) -> &str {
        &self.text
    }

    pub fn set_command_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: CommandKind) {
        self.kind = kind;
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// The transaction this command was created in, if any
    pub fn transaction(&self) -> Option<TransactionBinding> {
        self.transaction
    }

    pub fn is_bound(&self) -> bool {
        self.transaction.is_some()
    }

    pub(crate) fn bind(mut self, binding: TransactionBinding) -> Self {
        self.transaction = Some(binding);
        self
    }

    /// Build a validated parameter without adding it
    pub fn create_param(
        &self,
        name: &str,
        db_type: DbType,
        direction: ParameterDirection,
        value: impl Into<Value>,
    ) -> Result<Parameter> {
        if name.is_empty() {
            return Err(DbError::InvalidOperation("Parameter name cannot be empty".into()));
        }

        let value = value.into();
        if !db_type.is_compatible(&value) {
            return Err(DbError::TypeMismatch(format!(
                "Parameter '{}' expects type {}, got {}",
                name,
                db_type,
                value.type_name()
            )));
        }

        Ok(Parameter {
            name: name.to_string(),
            db_type,
            direction,
            value,
            size: None,
        })
    }

    /// Append a parameter, rejecting duplicate names
    pub fn add_parameter(&mut self, parameter: Parameter) -> Result<()> {
        if self.parameter(&parameter.name).is_some() {
            return Err(DbError::InvalidOperation(format!(
                "Parameter '{}' already added",
                parameter.name
            )));
        }
        self.parameters.push(parameter);
        Ok(())
    }

    pub fn add_in_param(&mut self, name: &str, db_type: DbType, value: impl Into<Value>) -> Result<()> {
        let param = self.create_param(name, db_type, ParameterDirection::Input, value)?;
        self.add_parameter(param)
    }

    /// Input parameter bound to NULL
    pub fn add_null_in_param(&mut self, name: &str, db_type: DbType) -> Result<()> {
        self.add_in_param(name, db_type, Value::Null)
    }

    pub fn add_in_param_sized(
        &mut self,
        name: &str,
        db_type: DbType,
        value: impl Into<Value>,
        size: usize,
    ) -> Result<()> {
        let mut param = self.create_param(name, db_type, ParameterDirection::Input, value)?;
        param.size = Some(size);
        self.add_parameter(param)
    }

    pub fn add_out_param(&mut self, name: &str, db_type: DbType) -> Result<()> {
        let param = self.create_param(name, db_type, ParameterDirection::Output, Value::Null)?;
        self.add_parameter(param)
    }

    pub fn add_out_param_sized(&mut self, name: &str, db_type: DbType, size: usize) -> Result<()> {
        let mut param = self.create_param(name, db_type, ParameterDirection::Output, Value::Null)?;
        param.size = Some(size);
        self.add_parameter(param)
    }
}

/// Values the driver reported for output parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputValues {
    values: Vec<(String, Value)>,
}

impl OutputValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .value(name)
            .ok_or_else(|| DbError::ParameterNotFound(name.to_string()))?;
        T::from_value(value.clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Outcome of a non-query execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub rows_affected: u64,
    pub outputs: OutputValues,
}

impl Execution {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            outputs: OutputValues::new(),
        }
    }
}

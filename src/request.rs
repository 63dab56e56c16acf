use crate::command::{Command, CommandKind, TransactionBinding};
use crate::core::Result;

type Setup<'a> = Box<dyn FnOnce(&mut Command) -> Result<()> + 'a>;

/// Everything a helper needs to build one command
///
/// Text and setup are both optional: a request may carry only SQL, only a
/// setup callback that fills in text and parameters, or both.
///
/// # Examples
///
/// ```ignore
/// let count: i64 = conn.scalar(
///     CommandRequest::text("SELECT COUNT(*) FROM users WHERE age > @age")
///         .with_setup(|cmd| cmd.add_in_param("@age", DbType::Integer, 30)),
/// )?;
/// ```
#[derive(Default)]
pub struct CommandRequest<'a> {
    text: Option<String>,
    kind: CommandKind,
    setup: Option<Setup<'a>>,
}

impl<'a> CommandRequest<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            text: Some(sql.into()),
            kind: CommandKind::Text,
            setup: None,
        }
    }

    pub fn stored_procedure(name: impl Into<String>) -> Self {
        Self {
            text: Some(name.into()),
            kind: CommandKind::StoredProcedure,
            setup: None,
        }
    }

    pub fn with_setup<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut Command) -> Result<()> + 'a,
    {
        self.setup = Some(Box::new(setup));
        self
    }

    pub(crate) fn build(self, binding: Option<TransactionBinding>) -> Result<Command> {
        let mut command = Command::new(self.text.unwrap_or_default(), self.kind);
        if let Some(setup) = self.setup {
            setup(&mut command)?;
        }
        Ok(match binding {
            Some(binding) => command.bind(binding),
            None => command,
        })
    }
}

impl From<&str> for CommandRequest<'_> {
    fn from(sql: &str) -> Self {
        Self::text(sql)
    }
}

impl From<String> for CommandRequest<'_> {
    fn from(sql: String) -> Self {
        Self::text(sql)
    }
}

impl std::fmt::Debug for CommandRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRequest")
            .field("text", &self.text)
            .field("kind", &self.kind)
            .field("setup", &self.setup.is_some())
            .finish()
    }
}

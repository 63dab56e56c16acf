// ============================================================================
// Record Readers
// ============================================================================
//
// A `Reader` is a lazy, forward-only, single-pass sequence of records over
// a driver cursor. The cursor is released exactly once, on whichever comes
// first: exhaustion, the first error, an explicit `close`, or drop.
//
// ============================================================================

use crate::core::{DbError, FromValue, Result, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Forward-only row source provided by a driver
pub trait RowCursor {
    fn columns(&self) -> &[String];

    /// Next row, or `None` once the result set is exhausted
    fn next_row(&mut self) -> Result<Option<Vec<Value>>>;

    fn close(&mut self) -> Result<()>;
}

/// Cursor over rows that were already fetched
#[derive(Debug, Default)]
pub struct BufferedCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    closed: bool,
}

impl BufferedCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
            closed: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowCursor for BufferedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if self.closed {
            return Err(DbError::InvalidOperation("Cursor is closed".into()));
        }
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}

/// One row of a result set with named, typed field access
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn field_count(&self) -> usize {
        self.values.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Position of a column; exact match first, then case-insensitive
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    pub fn value(&self, name: &str) -> Result<&Value> {
        self.ordinal(name)
            .and_then(|idx| self.values.get(idx))
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string()))
    }

    pub fn value_at(&self, index: usize) -> Result<&Value> {
        self.values
            .get(index)
            .ok_or_else(|| DbError::ColumnNotFound(format!("#{}", index)))
    }

    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(self.value(name)?.clone())
    }

    pub fn get_at<T: FromValue>(&self, index: usize) -> Result<T> {
        T::from_value(self.value_at(index)?.clone())
    }

    pub fn is_null(&self, name: &str) -> Result<bool> {
        Ok(self.value(name)?.is_null())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Lazy sequence of records
///
/// # Examples
///
/// ```ignore
/// let names: Vec<String> = conn
///     .select("SELECT name FROM users")?
///     .map_records(|r| r.get("name"))
///     .collect::<Result<_>>()?;
/// ```
pub struct Reader<'c> {
    cursor: Box<dyn RowCursor + 'c>,
    columns: Arc<[String]>,
    closed: bool,
}

impl<'c> Reader<'c> {
    pub fn new(cursor: Box<dyn RowCursor + 'c>) -> Self {
        let columns: Arc<[String]> = cursor.columns().into();
        Self {
            cursor,
            columns,
            closed: false,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the cursor now, reporting a failed close
    pub fn close(mut self) -> Result<()> {
        self.close_cursor()
    }

    pub(crate) fn close_cursor(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.cursor.close()
    }

    /// Apply a selector to every record, lazily
    pub fn map_records<T, F>(self, mut selector: F) -> impl Iterator<Item = Result<T>> + 'c
    where
        F: FnMut(&Record) -> Result<T> + 'c,
        T: 'c,
    {
        self.map(move |record| record.and_then(|r| selector(&r)))
    }

    /// Run an action for each record, stopping at the first error
    pub fn for_each_record<F>(self, mut action: F) -> Result<()>
    where
        F: FnMut(&Record) -> Result<()>,
    {
        for record in self {
            action(&record?)?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.close_cursor() {
            warn!(error = %e, "failed to close record cursor");
        }
    }
}

impl Iterator for Reader<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }

        match self.cursor.next_row() {
            Ok(Some(values)) => Some(Ok(Record::new(Arc::clone(&self.columns), values))),
            Ok(None) => {
                self.release();
                None
            }
            Err(e) => {
                self.release();
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Reader<'_> {}

impl Drop for Reader<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

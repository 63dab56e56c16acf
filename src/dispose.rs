//! Scoped release of connections and readers

use crate::connection::Connection;
use crate::core::Result;
use crate::reader::Reader;
use std::ops::{Deref, DerefMut};
use tracing::warn;

/// A resource that must be released when its owner is done with it
///
/// Disposing twice is a no-op.
pub trait Dispose {
    fn dispose(&mut self) -> Result<()>;
}

impl<C: Connection + ?Sized> Dispose for C {
    fn dispose(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.close()
    }
}

impl Dispose for Reader<'_> {
    fn dispose(&mut self) -> Result<()> {
        self.close_cursor()
    }
}

/// Owns a resource and disposes it exactly once
///
/// # Examples
///
/// ```ignore
/// let mut conn = Scoped::new(db.create_and_open_connection()?);
/// conn.non_query("DELETE FROM sessions WHERE expired = 1")?;
/// conn.close()?; // or let it drop
/// ```
pub struct Scoped<T: Dispose> {
    inner: T,
    disposed: bool,
}

impl<T: Dispose> Scoped<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            disposed: false,
        }
    }

    /// Dispose now and report the outcome
    pub fn close(mut self) -> Result<()> {
        self.disposed = true;
        self.inner.dispose()
    }
}

impl<T: Dispose> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Dispose> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Dispose> Drop for Scoped<T> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Err(e) = self.inner.dispose() {
            warn!(error = %e, "failed to dispose scoped resource");
        }
    }
}

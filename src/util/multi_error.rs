//! Aggregation of errors from parallel workers.

use std::fmt;

/// Collects any number of errors from a fan-out phase into one value.
///
/// The user-visible message shows the first error and how many others
/// were collected; the full list stays available for logging.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<anyhow::Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, err: anyhow::Error) {
        self.errors.push(err);
    }

    pub fn extend(&mut self, errs: impl IntoIterator<Item = anyhow::Error>) {
        self.errors.extend(errs);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    /// Consume the collector: `Ok(())` when nothing was pushed, the
    /// aggregate otherwise.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "{}", self.errors[0]),
            n => write!(f, "{} (and {} other errors)", self.errors[0], n - 1),
        }
    }
}

impl std::error::Error for MultiError {}

impl From<anyhow::Error> for MultiError {
    fn from(err: anyhow::Error) -> Self {
        Self { errors: vec![err] }
    }
}

impl FromIterator<anyhow::Error> for MultiError {
    fn from_iter<I: IntoIterator<Item = anyhow::Error>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

//! Values produced by reads that may have partially failed

/// A value together with the warnings collected while producing it.
///
/// Read paths that tolerate partial upstream failure return this instead of
/// silently substituting empty data, so callers can tell "no data" apart
/// from "fetch failed".
#[derive(Debug, Clone, PartialEq)]
pub struct Degraded<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

impl<T> Degraded<T> {
    /// A value produced without any failures
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    /// Record a partial failure
    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

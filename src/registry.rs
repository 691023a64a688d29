//! Converter contract and the priority-ordered converter registry.
//!
//! Converters declare a numeric priority (lower = tried earlier) and two
//! operations: a cheap `accepts` probe and the real `convert`. The registry
//! keeps registrations sorted ascending by priority at all times; within one
//! priority tier, insertion order is preserved (it matters for sequential
//! dispatch and is irrelevant for parallel racing).

use crate::cancel::CancelToken;
use crate::descriptor::StreamDescriptor;
use crate::error::ConvertError;
use crate::model::DocumentConverterResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::fs::File;

/// Priority for converters matched to a specific format (tried first).
pub const PRIORITY_SPECIFIC_FORMAT: i32 = 0;
/// Priority for generic fallback converters (plain text, octet dumps).
pub const PRIORITY_GENERIC_FORMAT: i32 = 10;

/// A format-specific converter.
///
/// Implementations must not mutate shared state from `accepts`, must
/// tolerate streams positioned at 0, and must not assume exclusive access to
/// the underlying file — dispatch opens an independent reader per call and
/// may probe several converters concurrently over the same backing file.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Stable human-readable name, used in logs and attempt failures.
    fn name(&self) -> &str;

    /// Registry ordering; lower values are tried earlier.
    fn priority(&self) -> i32 {
        PRIORITY_SPECIFIC_FORMAT
    }

    /// Cheap probe: can this converter plausibly handle the stream?
    async fn accepts(
        &self,
        stream: &mut File,
        descriptor: &StreamDescriptor,
        cancel: &CancelToken,
    ) -> Result<bool, ConvertError>;

    /// Perform the conversion. The stream is a fresh reader at position 0,
    /// independent of the one passed to `accepts`.
    async fn convert(
        &self,
        stream: File,
        descriptor: &StreamDescriptor,
        cancel: &CancelToken,
    ) -> Result<DocumentConverterResult, ConvertError>;
}

/// One registered converter plus its effective priority.
#[derive(Clone)]
pub struct ConverterRegistration {
    pub converter: Arc<dyn DocumentConverter>,
    pub priority: i32,
}

impl std::fmt::Debug for ConverterRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistration")
            .field("name", &self.converter.name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Ordered collection of converters.
///
/// Invariant: entries are sorted ascending by priority; equal-priority
/// entries keep their relative registration order.
#[derive(Default, Clone)]
pub struct ConverterRegistry {
    entries: Vec<ConverterRegistration>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a converter at its declared priority.
    pub fn register(&mut self, converter: Arc<dyn DocumentConverter>) {
        let priority = converter.priority();
        self.register_with_priority(converter, priority);
    }

    /// Register a converter at an explicit priority, overriding its own.
    pub fn register_with_priority(&mut self, converter: Arc<dyn DocumentConverter>, priority: i32) {
        // Upper-bound insertion keeps the sort stable for equal priorities.
        let pos = self
            .entries
            .partition_point(|e| e.priority <= priority);
        self.entries
            .insert(pos, ConverterRegistration { converter, priority });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registrations in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &ConverterRegistration> {
        self.entries.iter()
    }

    /// Registrations grouped into priority tiers, lowest priority first.
    pub fn tiers(&self) -> Vec<&[ConverterRegistration]> {
        let mut tiers = Vec::new();
        let mut start = 0;
        while start < self.entries.len() {
            let p = self.entries[start].priority;
            let end = self.entries[start..]
                .iter()
                .position(|e| e.priority != p)
                .map(|off| start + off)
                .unwrap_or(self.entries.len());
            tiers.push(&self.entries[start..end]);
            start = end;
        }
        tiers
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentConverterResult;

    struct Named(&'static str, i32);

    #[async_trait]
    impl DocumentConverter for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn priority(&self) -> i32 {
            self.1
        }

        async fn accepts(
            &self,
            _stream: &mut File,
            _descriptor: &StreamDescriptor,
            _cancel: &CancelToken,
        ) -> Result<bool, ConvertError> {
            Ok(true)
        }

        async fn convert(
            &self,
            _stream: File,
            _descriptor: &StreamDescriptor,
            _cancel: &CancelToken,
        ) -> Result<DocumentConverterResult, ConvertError> {
            Ok(DocumentConverterResult::from_markdown(self.0))
        }
    }

    fn names(registry: &ConverterRegistry) -> Vec<&str> {
        registry.iter().map(|e| e.converter.name()).collect()
    }

    #[test]
    fn kept_sorted_ascending_by_priority() {
        let mut r = ConverterRegistry::new();
        r.register(Arc::new(Named("generic", PRIORITY_GENERIC_FORMAT)));
        r.register(Arc::new(Named("pdf", PRIORITY_SPECIFIC_FORMAT)));
        r.register(Arc::new(Named("middle", 5)));
        assert_eq!(names(&r), vec!["pdf", "middle", "generic"]);
    }

    #[test]
    fn equal_priority_preserves_insertion_order() {
        let mut r = ConverterRegistry::new();
        r.register(Arc::new(Named("first", 0)));
        r.register(Arc::new(Named("second", 0)));
        r.register(Arc::new(Named("third", 0)));
        assert_eq!(names(&r), vec!["first", "second", "third"]);
    }

    #[test]
    fn explicit_priority_overrides_declared() {
        let mut r = ConverterRegistry::new();
        r.register(Arc::new(Named("a", 0)));
        r.register_with_priority(Arc::new(Named("demoted", 0)), 99);
        assert_eq!(names(&r), vec!["a", "demoted"]);
        assert_eq!(r.iter().last().unwrap().priority, 99);
    }

    #[test]
    fn tiers_group_by_priority() {
        let mut r = ConverterRegistry::new();
        r.register(Arc::new(Named("a", 0)));
        r.register(Arc::new(Named("b", 0)));
        r.register(Arc::new(Named("c", 10)));
        let tiers = r.tiers();
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0].len(), 2);
        assert_eq!(tiers[1].len(), 1);
        assert_eq!(tiers[1][0].converter.name(), "c");
    }

    #[test]
    fn empty_registry_has_no_tiers() {
        let r = ConverterRegistry::new();
        assert!(r.is_empty());
        assert!(r.tiers().is_empty());
    }
}

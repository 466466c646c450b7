//! Span context propagation across process boundaries.
//!
//! A [`SpanContext`] travels through an opaque carrier (HTTP headers, a
//! message envelope, any string key/value container). Carriers expose
//! themselves through the [`Injector`] and [`Extractor`] traits; codecs turn
//! a context into carrier entries and back. The [`PropagationRegistry`] maps
//! a carrier [`Format`] to the codec registered for it.

mod text_map;

pub use text_map::{TextMapCodec, TextMapCodecBuilder};

use crate::errors::PropagationError;
use crate::span_context::SpanContext;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Identifier of a carrier format.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// Opaque string key/value container; keys and values travel verbatim.
    TextMap,
    /// HTTP headers; keys are case-insensitive and values URL-encoded.
    HttpHeaders,
    /// An application-registered format.
    Custom(&'static str),
}

/// Write access to a carrier.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Read access to a carrier.
pub trait Extractor {
    /// Get a value for a key from the underlying data.
    fn get(&self, key: &str) -> Option<&str>;

    /// Collect all keys from the underlying data.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(|value| value.as_str())
    }

    /// Collect all keys from the HashMap.
    fn keys(&self) -> Vec<&str> {
        self.keys().map(|key| key.as_str()).collect()
    }
}

/// Serializes a span context into a carrier.
pub trait ContextInjector: Send + Sync {
    /// Write `context` into `carrier`.
    fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector);
}

/// Deserializes a span context from a carrier.
pub trait ContextExtractor: Send + Sync {
    /// Read a context from `carrier`. `Ok(None)` means the carrier held no
    /// context at all; a present but unreadable context is an error.
    fn extract(&self, carrier: &dyn Extractor) -> Result<Option<SpanContext>, PropagationError>;
}

/// Per-format codec registry.
///
/// Read-mostly: lookups happen on every inject/extract, registrations only
/// during tracer assembly.
#[derive(Default)]
pub struct PropagationRegistry {
    injectors: RwLock<HashMap<Format, Arc<dyn ContextInjector>>>,
    extractors: RwLock<HashMap<Format, Arc<dyn ContextExtractor>>>,
}

impl PropagationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        PropagationRegistry::default()
    }

    /// Register `injector` for `format`, replacing any previous registration.
    pub fn register_injector(&self, format: Format, injector: Arc<dyn ContextInjector>) {
        self.injectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(format, injector);
    }

    /// Register `extractor` for `format`, replacing any previous
    /// registration.
    pub fn register_extractor(&self, format: Format, extractor: Arc<dyn ContextExtractor>) {
        self.extractors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(format, extractor);
    }

    pub(crate) fn injector(&self, format: &Format) -> Option<Arc<dyn ContextInjector>> {
        self.injectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(format)
            .cloned()
    }

    pub(crate) fn extractor(&self, format: &Format) -> Option<Arc<dyn ContextExtractor>> {
        self.extractors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(format)
            .cloned()
    }
}

impl std::fmt::Debug for PropagationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationRegistry").finish()
    }
}

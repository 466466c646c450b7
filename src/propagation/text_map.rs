//! Codec for string key/value carriers.

use super::{ContextExtractor, ContextInjector, Extractor, Injector};
use crate::constants::DEBUG_ID_HEADER_KEY;
use crate::errors::PropagationError;
use crate::span_context::SpanContext;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::HashMap;

const DEFAULT_SPAN_CONTEXT_KEY: &str = "uber-trace-id";
const DEFAULT_BAGGAGE_KEY_PREFIX: &str = "uberctx-";

// Characters escaped in URL-encoded carrier values. Covers the reserved
// characters of header values plus the `:` separators of the context string.
const ENCODED: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@');

/// Codec for carriers that are opaque string key/value containers.
///
/// One entry carries the trace state under the span context key
/// (`uber-trace-id` by default); each baggage item becomes its own entry
/// under the baggage prefix (`uberctx-` by default). With URL-encoding
/// enabled the same codec serves HTTP header carriers: values are
/// percent-encoded on write and decoded on read, and keys are compared
/// case-insensitively on read in both flavors.
#[derive(Clone, Debug)]
pub struct TextMapCodec {
    url_encoding: bool,
    span_context_key: String,
    baggage_key_prefix: String,
    debug_id_key: String,
}

impl TextMapCodec {
    /// Create a codec with the default keys; `url_encoding` selects the HTTP
    /// headers flavor.
    pub fn new(url_encoding: bool) -> Self {
        TextMapCodec::builder().with_url_encoding(url_encoding).build()
    }

    /// Start building a codec with custom keys.
    pub fn builder() -> TextMapCodecBuilder {
        TextMapCodecBuilder::default()
    }

    fn encoded_value(&self, value: &str) -> String {
        if self.url_encoding {
            utf8_percent_encode(value, ENCODED).to_string()
        } else {
            value.to_string()
        }
    }

    fn decoded_value(&self, value: &str) -> String {
        if self.url_encoding {
            percent_decode_str(value)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                // not our encoding; pass it through unchanged
                .unwrap_or_else(|_| value.to_string())
        } else {
            value.to_string()
        }
    }

    fn prefixed_baggage_key(&self, key: &str) -> String {
        format!(
            "{}{}",
            self.baggage_key_prefix,
            key.to_lowercase().replace('_', "-")
        )
    }
}

impl Default for TextMapCodec {
    fn default() -> Self {
        TextMapCodec::new(false)
    }
}

impl ContextInjector for TextMapCodec {
    fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector) {
        carrier.set(
            &self.span_context_key,
            self.encoded_value(&context.context_as_string()),
        );
        for (key, value) in context.baggage() {
            carrier.set(&self.prefixed_baggage_key(key), self.encoded_value(value));
        }
    }
}

impl ContextExtractor for TextMapCodec {
    fn extract(&self, carrier: &dyn Extractor) -> Result<Option<SpanContext>, PropagationError> {
        let mut context: Option<SpanContext> = None;
        let mut baggage: HashMap<String, String> = HashMap::new();
        let mut debug_id: Option<String> = None;

        for key in carrier.keys() {
            let lowercase_key = key.to_lowercase();
            if lowercase_key == self.span_context_key {
                let value = carrier.get(key).unwrap_or("");
                context = Some(self.decoded_value(value).parse()?);
            } else if lowercase_key == self.debug_id_key {
                if let Some(value) = carrier.get(key) {
                    debug_id = Some(self.decoded_value(value));
                }
            } else if let Some(suffix) = lowercase_key.strip_prefix(&self.baggage_key_prefix) {
                if let Some(value) = carrier.get(key) {
                    baggage.insert(suffix.to_string(), self.decoded_value(value));
                }
            }
        }

        match context {
            Some(context) if baggage.is_empty() => Ok(Some(context)),
            Some(context) => Ok(Some(context.with_baggage(baggage))),
            None => Ok(debug_id.map(SpanContext::with_debug_id)),
        }
    }
}

/// Builder for [`TextMapCodec`].
#[derive(Clone, Debug)]
pub struct TextMapCodecBuilder {
    url_encoding: bool,
    span_context_key: String,
    baggage_key_prefix: String,
    debug_id_key: String,
}

impl Default for TextMapCodecBuilder {
    fn default() -> Self {
        TextMapCodecBuilder {
            url_encoding: false,
            span_context_key: DEFAULT_SPAN_CONTEXT_KEY.to_string(),
            baggage_key_prefix: DEFAULT_BAGGAGE_KEY_PREFIX.to_string(),
            debug_id_key: DEBUG_ID_HEADER_KEY.to_string(),
        }
    }
}

impl TextMapCodecBuilder {
    /// Percent-encode values on write and decode them on read.
    pub fn with_url_encoding(mut self, url_encoding: bool) -> Self {
        self.url_encoding = url_encoding;
        self
    }

    /// Carrier key holding the trace state.
    pub fn with_span_context_key(mut self, key: impl Into<String>) -> Self {
        self.span_context_key = key.into().to_lowercase();
        self
    }

    /// Prefix marking baggage entries.
    pub fn with_baggage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.baggage_key_prefix = prefix.into().to_lowercase();
        self
    }

    /// Carrier key holding the debug correlation id.
    pub fn with_debug_id_key(mut self, key: impl Into<String>) -> Self {
        self.debug_id_key = key.into().to_lowercase();
        self
    }

    /// Build the codec.
    pub fn build(self) -> TextMapCodec {
        TextMapCodec {
            url_encoding: self.url_encoding,
            span_context_key: self.span_context_key,
            baggage_key_prefix: self.baggage_key_prefix,
            debug_id_key: self.debug_id_key,
        }
    }
}

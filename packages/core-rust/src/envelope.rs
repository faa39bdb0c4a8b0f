//! The `(Data, Headers)` pair handed from a broker adapter to the pipeline.

use crate::headers::Headers;

/// One inbound message: a typed payload plus its header metadata.
///
/// Immutable once built by the adapter. Decorators and the business handler
/// only ever see it by shared reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    data: T,
    headers: Headers,
}

impl<T> Envelope<T> {
    #[must_use]
    pub fn new(data: T, headers: Headers) -> Self {
        Self { data, headers }
    }

    /// The deserialized payload.
    #[must_use]
    pub fn data(&self) -> &T {
        &self.data
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Splits the envelope back into its parts.
    #[must_use]
    pub fn into_parts(self) -> (T, Headers) {
        (self.data, self.headers)
    }
}

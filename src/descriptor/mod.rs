//! Request descriptors — the caller-facing value describing one HTTP request.
//!
//! A [`RequestDescriptor`] carries everything the injected transport needs to
//! perform a network call: the [`Method`], the target URL, and optional query
//! parameters and body payload as arbitrary JSON trees. The coalescing client
//! derives the canonical cache key from a descriptor but always hands the
//! original, unmodified descriptor to the transport.

use serde::Serialize;
use serde_json::Value;

/// An HTTP request method.
///
/// Standard methods are represented as unit variants for zero-cost comparison.
/// Non-standard methods are captured in the `Custom` variant.
///
/// # Examples
///
/// ```
/// use reqflight::descriptor::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET — retrieve a representation of the target resource.
    Get,
    /// POST — perform resource-specific processing on the request payload.
    Post,
    /// PUT — replace the target resource's current representation.
    Put,
    /// DELETE — remove the association between the target resource and its functionality.
    Delete,
    /// HEAD — identical to GET but without a response body.
    Head,
    /// OPTIONS — describe the communication options for the target resource.
    Options,
    /// PATCH — apply partial modifications to a resource.
    Patch,
    /// A non-standard extension method.
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            other => Self::Custom(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// A description of one HTTP request: method, URL, query parameters, body.
///
/// Parameters and body are held as [`serde_json::Value`] trees, so any
/// composition of mappings, sequences, and scalars is accepted. Two
/// descriptors that are deep-equal up to mapping-key order are treated as
/// the same request by the coalescing client.
///
/// # Examples
///
/// ```
/// use reqflight::descriptor::{Method, RequestDescriptor};
/// use serde_json::json;
///
/// let descriptor = RequestDescriptor::new(Method::Get, "/users")
///     .params(json!({ "page": 2, "per_page": 50 }));
///
/// assert_eq!(descriptor.method(), &Method::Get);
/// assert_eq!(descriptor.url(), "/users");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    params: Option<Value>,
    body: Option<Value>,
}

impl RequestDescriptor {
    /// Creates a descriptor with the given method and URL and no parameters or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: None,
            body: None,
        }
    }

    /// Shorthand for [`RequestDescriptor::new`] with [`Method::Get`].
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Shorthand for [`RequestDescriptor::new`] with [`Method::Post`].
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Sets the query parameters from a JSON value (e.g. a `serde_json::json!` literal).
    #[must_use]
    pub fn params(mut self, params: impl Into<Value>) -> Self {
        self.params = Some(params.into());
        self
    }

    /// Sets the query parameters from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] when `params` cannot be
    /// represented as JSON (e.g. a map with non-string keys). This is the
    /// input-error boundary: a descriptor that fails here never reaches the
    /// cache or the in-flight registry.
    pub fn try_params<P: Serialize>(self, params: P) -> Result<Self, serde_json::Error> {
        Ok(self.params(serde_json::to_value(params)?))
    }

    /// Sets the request body from a JSON value.
    #[must_use]
    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the request body from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] when `body` cannot be
    /// represented as JSON.
    pub fn try_body<B: Serialize>(self, body: B) -> Result<Self, serde_json::Error> {
        Ok(self.body(serde_json::to_value(body)?))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the query parameters, if set.
    pub fn query_params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    /// Returns the body payload, if set.
    pub fn body_payload(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

//! Domain newtype for type safety
//!
//! Wraps domain strings to prevent accidentally passing email addresses
//! or other strings where domains are expected. Provides a zero-cost
//! abstraction with compile-time type safety.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// A domain name string wrapper for type safety
///
/// This newtype prevents accidentally passing email addresses or other
/// strings where domain names are expected. The `#[repr(transparent)]`
/// attribute ensures this is a zero-cost abstraction at runtime.
///
/// # Examples
///
/// ```
/// use empath_common::Domain;
///
/// let domain = Domain::new("example.com");
/// assert_eq!(domain.as_str(), "example.com");
///
/// // Zero-cost conversion from String
/// let domain: Domain = "mail.example.com".into();
/// assert_eq!(domain.as_str(), "mail.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)] // Zero-cost abstraction guarantee
pub struct Domain(Arc<str>);

impl Domain {
    /// Create a new `Domain` from any type that can be converted to `Arc<str>`
    ///
    /// # Examples
    ///
    /// ```
    /// use empath_common::Domain;
    ///
    /// let domain = Domain::new("example.com");
    /// let domain = Domain::new(String::from("example.com"));
    /// let domain = Domain::new(Arc::from("example.com"));
    /// ```
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    /// Get the domain as a string slice
    ///
    /// # Examples
    ///
    /// ```
    /// use empath_common::Domain;
    ///
    /// let domain = Domain::new("example.com");
    /// assert_eq!(domain.as_str(), "example.com");
    /// ```
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the domain into the inner `Arc<str>`
    ///
    /// # Examples
    ///
    /// ```
    /// use empath_common::Domain;
    ///
    /// let domain = Domain::new("example.com");
    /// let arc_str = domain.into_inner();
    /// ```
    #[must_use]
    pub fn into_inner(self) -> Arc<str> {
        self.0
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<Arc<str>> for Domain {
    fn from(s: Arc<str>) -> Self {
        Self(s)
    }
}

impl From<Domain> for Arc<str> {
    fn from(domain: Domain) -> Self {
        domain.0
    }
}

impl From<&Domain> for Arc<str> {
    fn from(domain: &Domain) -> Self {
        domain.0.clone()
    }
}

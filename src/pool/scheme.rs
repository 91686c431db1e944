//! Transport schemes supported by a connection pool
//!
//! A [`SchemeRegistry`] is the shape of a pool: the set of schemes it can
//! reach and the socket factory bound to each of them. Rebuilding a pool
//! from the same registry reproduces the same transport capabilities.

use std::collections::BTreeMap;
use std::time::Duration;

/// TCP socket options applied by a socket factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOptions {
    /// Connect timeout (None = wait for the OS)
    pub connect_timeout: Option<Duration>,

    /// TCP keep-alive interval (None = disabled)
    pub keepalive: Option<Duration>,

    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            keepalive: Some(Duration::from_secs(90)),
            nodelay: true,
        }
    }
}

/// How connections for a scheme are opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFactory {
    /// Plain TCP
    Plain(TcpOptions),

    /// TCP wrapped in TLS (native-tls)
    Tls {
        tcp: TcpOptions,
        /// Skip certificate and hostname verification
        accept_invalid_certs: bool,
    },
}

impl SocketFactory {
    pub fn tcp_options(&self) -> &TcpOptions {
        match self {
            SocketFactory::Plain(tcp) => tcp,
            SocketFactory::Tls { tcp, .. } => tcp,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, SocketFactory::Tls { .. })
    }
}

/// A single transport scheme (e.g. "http") and its handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheme {
    name: String,
    default_port: u16,
    socket_factory: SocketFactory,
}

impl Scheme {
    /// Scheme names are case-insensitive and stored lowercase.
    pub fn new(name: impl Into<String>, default_port: u16, socket_factory: SocketFactory) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            default_port,
            socket_factory,
        }
    }

    pub fn plain(name: impl Into<String>, default_port: u16) -> Self {
        Self::new(name, default_port, SocketFactory::Plain(TcpOptions::default()))
    }

    pub fn tls(name: impl Into<String>, default_port: u16) -> Self {
        Self::new(
            name,
            default_port,
            SocketFactory::Tls {
                tcp: TcpOptions::default(),
                accept_invalid_certs: false,
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    pub fn socket_factory(&self) -> &SocketFactory {
        &self.socket_factory
    }

    /// Resolve an explicit port, falling back to the scheme default
    pub fn resolve_port(&self, port: Option<u16>) -> u16 {
        port.unwrap_or(self.default_port)
    }
}

/// Registry of supported schemes, keyed by lowercase name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemeRegistry {
    schemes: BTreeMap<String, Scheme>,
}

impl SchemeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `http` on port 80 and `https` on port 443
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Scheme::plain("http", 80));
        registry.register(Scheme::tls("https", 443));
        registry
    }

    /// Register a scheme, returning the one it replaced
    pub fn register(&mut self, scheme: Scheme) -> Option<Scheme> {
        self.schemes.insert(scheme.name.clone(), scheme)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Scheme> {
        self.schemes.remove(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&Scheme> {
        // Fast path for names that are already lowercase
        match self.schemes.get(name) {
            Some(scheme) => Some(scheme),
            None => self.schemes.get(&name.to_ascii_lowercase()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Scheme names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.schemes.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scheme> {
        self.schemes.values()
    }

    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }
}

impl FromIterator<Scheme> for SchemeRegistry {
    fn from_iter<I: IntoIterator<Item = Scheme>>(iter: I) -> Self {
        let mut registry = Self::new();
        for scheme in iter {
            registry.register(scheme);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = SchemeRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["http", "https"]);
        assert_eq!(registry.get("http").unwrap().default_port(), 80);
        assert!(registry.get("https").unwrap().socket_factory().is_tls());
    }

    #[test]
    fn test_scheme_lookup_is_case_insensitive() {
        let mut registry = SchemeRegistry::new();
        registry.register(Scheme::plain("HTTP", 8080));

        assert!(registry.contains("http"));
        assert!(registry.contains("Http"));
        assert_eq!(registry.get("HTTP").unwrap().name(), "http");
        assert!(registry.unregister("HtTp").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = SchemeRegistry::new();
        assert!(registry.register(Scheme::plain("http", 80)).is_none());

        let replaced = registry.register(Scheme::plain("http", 8080)).unwrap();
        assert_eq!(replaced.default_port(), 80);
        assert_eq!(registry.get("http").unwrap().default_port(), 8080);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_shape_equality_includes_handlers() {
        let a: SchemeRegistry = vec![Scheme::plain("http", 80)].into_iter().collect();
        let mut b = a.clone();
        assert_eq!(a, b);

        b.register(Scheme::new(
            "http",
            80,
            SocketFactory::Plain(TcpOptions {
                nodelay: false,
                ..TcpOptions::default()
            }),
        ));
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_port() {
        let scheme = Scheme::tls("https", 443);
        assert_eq!(scheme.resolve_port(None), 443);
        assert_eq!(scheme.resolve_port(Some(8443)), 8443);
    }
}

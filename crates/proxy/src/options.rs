use serde::Deserialize;

/// How the engine establishes upstream connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStrategy {
    /// Connect upstream as soon as the client connects.
    #[default]
    Eager,
    /// Connect upstream only once a request needs it.
    Lazy,
}

/// Options handed to the proxy engine at start.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyOptions {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Proxy modes (e.g. `regular`, `transparent`, `upstream:...`).
    #[serde(default = "default_modes")]
    pub modes: Vec<String>,
    /// Certificate/configuration directory.
    #[serde(default = "default_confdir")]
    pub confdir: String,
    #[serde(default = "default_true")]
    pub http2: bool,
    #[serde(default)]
    pub http3: bool,
    /// Do not verify upstream server certificates.
    #[serde(default)]
    pub ssl_insecure: bool,
    /// PEM file with the interception certificate, when not generated under
    /// `confdir`.
    #[serde(default)]
    pub certificate: Option<String>,
    /// Hosts to pass through without interception.
    #[serde(default)]
    pub ignore_hosts: Vec<String>,
    /// When non-empty, intercept only these hosts.
    #[serde(default)]
    pub allow_hosts: Vec<String>,
    #[serde(default)]
    pub connection_strategy: ConnectionStrategy,
}

fn default_listen_host() -> String {
    String::from("0.0.0.0")
}

fn default_listen_port() -> u16 {
    8080
}

fn default_modes() -> Vec<String> {
    vec![String::from("regular")]
}

fn default_confdir() -> String {
    String::from("~/.fluxgate")
}

fn default_true() -> bool {
    true
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            modes: default_modes(),
            confdir: default_confdir(),
            http2: true,
            http3: false,
            ssl_insecure: false,
            certificate: None,
            ignore_hosts: Vec::new(),
            allow_hosts: Vec::new(),
            connection_strategy: ConnectionStrategy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = ProxyOptions::default();
        assert_eq!(opts.listen_port, 8080);
        assert_eq!(opts.modes, vec!["regular"]);
        assert!(opts.http2);
        assert!(!opts.ssl_insecure);
        assert_eq!(opts.connection_strategy, ConnectionStrategy::Eager);
    }

    #[test]
    fn deserializes_from_toml_fragment() {
        let opts: ProxyOptions = toml::from_str(
            r#"
            listen_host = "127.0.0.1"
            listen_port = 9090
            modes = ["transparent"]
            ssl_insecure = true
            ignore_hosts = ["*.apple.com"]
            connection_strategy = "lazy"
            "#,
        )
        .unwrap();
        assert_eq!(opts.listen_host, "127.0.0.1");
        assert_eq!(opts.listen_port, 9090);
        assert!(opts.ssl_insecure);
        assert_eq!(opts.connection_strategy, ConnectionStrategy::Lazy);
        // Unset fields keep their defaults.
        assert!(opts.http2);
    }
}

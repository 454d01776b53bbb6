use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the gateway.
    #[serde(default = "d_bind")]
    pub bind: String,
    /// When true, unknown protocol message types abort the turn instead of
    /// being ignored.
    #[serde(default)]
    pub strict_protocol: bool,
    /// Optional ICE server URLs advertised to clients in `ready`.
    #[serde(default)]
    pub ice_servers: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: d_bind(),
            strict_protocol: false,
            ice_servers: Vec::new(),
        }
    }
}

fn d_bind() -> String {
    "127.0.0.1:8787".into()
}

// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Configuration loading and validation.

use hyper::Uri;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Listen address, e.g. 127.0.0.1:3000
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Address advertised to the upstream in the outbound Host header.
    /// Defaults to the listen address.
    pub advertised: Option<String>,
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            advertised: None,
        }
    }
}

impl ProxyConfig {
    pub fn advertised_host(&self) -> &str {
        self.advertised.as_deref().unwrap_or(&self.listen)
    }
}

/// Upstream target. Deliberately has no default section: a config file
/// without `[target]` fails to load, and serving never starts.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagesConfig {
    /// Log each request as it enters the chain.
    #[serde(default = "default_log")]
    pub log: bool,

    /// Artificial delay applied before forwarding, in milliseconds.
    pub delay_ms: Option<u64>,

    /// Fixed payload substituted for the inbound request body.
    pub replace_body: Option<String>,
}

fn default_log() -> bool {
    true
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            log: default_log(),
            delay_ms: None,
            replace_body: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Maximum number of exchange records kept in memory.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Per-body byte cap for stored request/response bodies.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_capacity() -> usize {
    100
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InspectorConfig {
    /// Per-subscriber delivery channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// Upper bound for one upstream round trip, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,

    pub target: TargetConfig,

    #[serde(default)]
    pub stages: StagesConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub inspector: InspectorConfig,

    #[serde(default)]
    pub forward: ForwardConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            target: TargetConfig {
                addr: "localhost".to_string(),
                port: 3030,
            },
            stages: StagesConfig::default(),
            capture: CaptureConfig::default(),
            inspector: InspectorConfig::default(),
            forward: ForwardConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A file without a `[target]` section, or with invalid values, is a
    /// fatal error: the process must not begin serving.
    pub async fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let s = tokio::fs::read_to_string(path.as_ref()).await?;
        let cfg: Self = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.target.addr.trim().is_empty() {
            anyhow::bail!("target.addr must be completed");
        }
        if self.target.port == 0 {
            anyhow::bail!("target.port must be completed");
        }
        if self.forward.timeout_ms == 0 {
            anyhow::bail!("forward.timeout_ms must be greater than zero");
        }
        if self.capture.capacity == 0 {
            anyhow::bail!("capture.capacity must be greater than zero");
        }
        if self.inspector.channel_capacity == 0 {
            anyhow::bail!("inspector.channel_capacity must be greater than zero");
        }
        Ok(())
    }

    /// Base URI of the upstream target, e.g. `http://localhost:3030`.
    pub fn target_uri(&self) -> anyhow::Result<Uri> {
        let uri = format!("http://{}:{}", self.target.addr, self.target.port)
            .parse::<Uri>()?;
        Ok(uri)
    }
}

//! Configuration loading from disk.
//!
//! Two formats produce the same [`ProxyConfig`]: TOML (`.toml` files) and the
//! line-oriented block format used by everything else:
//!
//! ```text
//! [server]
//! port=8080
//! [location]
//! type=1
//! root=/
//! upstream=web
//! [end]
//! [end]
//!
//! [upstream]
//! name=web
//! schema=http
//! replicas=2
//! 127.0.0.1:9000
//! 127.0.0.1:9001
//! [proxy_set_header]
//! key=X-Served-By
//! value=edge
//! [end]
//! [end]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::{
    LocationConfig, LocationKindConfig, ProxyConfig, ProxyHeader, ServiceConfig, UpstreamConfig,
};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a file. The extension picks the format.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content)?,
        _ => parse_block_config(&content)?,
    };

    normalize_config(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    if let Ok(json) = serde_json::to_string(&config) {
        tracing::debug!(path = %path.display(), config = %json, "Configuration loaded");
    }
    Ok(config)
}

/// Trim the values that end up as socket addresses and reconcile keys.
///
/// Runs before validation so the port that is checked is the port that gets bound.
pub fn normalize_config(config: &mut ProxyConfig) {
    for service in &mut config.services {
        service.port = service.port.trim().to_string();
    }
    for upstream in config.upstreams.values_mut() {
        for address in &mut upstream.addresses {
            *address = address.trim().to_string();
        }
    }
    config.listener.bind_host = config.listener.bind_host.trim().to_string();
}

const BLOCK_SERVER: &str = "[server]";
const BLOCK_UPSTREAM: &str = "[upstream]";
const BLOCK_LOCATION: &str = "[location]";
const BLOCK_PROXY_SET_HEADER: &str = "[proxy_set_header]";
const BLOCK_END: &str = "[end]";

/// Partially-read location. `type` is mandatory, so it stays optional until `[end]`.
#[derive(Default)]
struct LocationDraft {
    kind: Option<LocationKindConfig>,
    root: Option<String>,
    upstream: Option<String>,
    file_root: Option<String>,
}

enum Block {
    Server(ServiceConfig),
    Location(LocationDraft),
    Upstream {
        name: Option<String>,
        upstream: UpstreamConfig,
    },
    ProxyHeader(ProxyHeader),
}

struct BlockParser {
    config: ProxyConfig,
    stack: Vec<Block>,
    line: usize,
}

/// Parse the block format. Blank lines and lines starting with `#` are skipped.
pub fn parse_block_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let mut parser = BlockParser {
        config: ProxyConfig::default(),
        stack: Vec::new(),
        line: 0,
    };

    for (index, raw) in content.lines().enumerate() {
        parser.line = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        parser.feed(line)?;
    }

    if let Some(open) = parser.stack.last() {
        let name = match open {
            Block::Server(_) => BLOCK_SERVER,
            Block::Location(_) => BLOCK_LOCATION,
            Block::Upstream { .. } => BLOCK_UPSTREAM,
            Block::ProxyHeader(_) => BLOCK_PROXY_SET_HEADER,
        };
        return Err(parser.error(format!("unterminated {} block", name)));
    }
    Ok(parser.config)
}

impl BlockParser {
    fn error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn feed(&mut self, line: &str) -> Result<(), ConfigError> {
        match line {
            BLOCK_SERVER => self.open(Block::Server(ServiceConfig::default())),
            BLOCK_LOCATION => self.open(Block::Location(LocationDraft::default())),
            BLOCK_UPSTREAM => self.open(Block::Upstream {
                name: None,
                upstream: UpstreamConfig::default(),
            }),
            BLOCK_PROXY_SET_HEADER => self.open(Block::ProxyHeader(ProxyHeader::default())),
            BLOCK_END => self.close(),
            _ => self.attribute(line),
        }
    }

    fn open(&mut self, block: Block) -> Result<(), ConfigError> {
        let allowed = match (&block, self.stack.last()) {
            (Block::Server(_) | Block::Upstream { .. }, None) => true,
            (Block::Location(_), Some(Block::Server(_))) => true,
            (Block::ProxyHeader(_), Some(Block::Upstream { .. })) => true,
            _ => false,
        };
        if !allowed {
            return Err(self.error("block opened in the wrong place"));
        }
        self.stack.push(block);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConfigError> {
        let block = self
            .stack
            .pop()
            .ok_or_else(|| self.error("[end] without an open block"))?;

        match block {
            Block::Server(service) => {
                if service.port.is_empty() {
                    return Err(self.error("[server] block without a port"));
                }
                self.config.services.push(service);
            }
            Block::Location(draft) => {
                let kind = draft
                    .kind
                    .ok_or_else(|| self.error("[location] block without a type"))?;
                let location = LocationConfig {
                    kind,
                    root: draft.root,
                    upstream: draft.upstream,
                    file_root: draft.file_root,
                };
                if let Some(Block::Server(service)) = self.stack.last_mut() {
                    service.locations.push(location);
                }
            }
            Block::Upstream { name, upstream } => {
                let name = name.ok_or_else(|| self.error("[upstream] block without a name"))?;
                if self.config.upstreams.contains_key(&name) {
                    return Err(self.error(format!("upstream `{}` declared twice", name)));
                }
                self.config.upstreams.insert(name, upstream);
            }
            Block::ProxyHeader(header) => {
                if header.key.is_empty() {
                    return Err(self.error("[proxy_set_header] block without a key"));
                }
                if let Some(Block::Upstream { upstream, .. }) = self.stack.last_mut() {
                    upstream.proxy_set_header.push(header);
                }
            }
        }
        Ok(())
    }

    fn attribute(&mut self, line: &str) -> Result<(), ConfigError> {
        let pair = line
            .split_once('=')
            .map(|(key, value)| (key.trim(), value.trim()));
        let line_no = self.line;
        let err = |message: String| ConfigError::Parse {
            line: line_no,
            message,
        };

        match (self.stack.last_mut(), pair) {
            (None, _) => Err(err(format!("`{}` outside of any block", line))),
            (Some(Block::Server(service)), Some(("port", value))) => {
                service.port = value.to_string();
                Ok(())
            }
            (Some(Block::Location(draft)), Some((key, value))) => {
                match key {
                    "type" => draft.kind = Some(value.parse().map_err(err)?),
                    "root" => draft.root = Some(value.to_string()),
                    "upstream" => draft.upstream = Some(value.to_string()),
                    "file_root" => draft.file_root = Some(value.to_string()),
                    other => return Err(err(format!("unknown location key `{}`", other))),
                }
                Ok(())
            }
            (Some(Block::Upstream { name, upstream }), Some((key, value))) => {
                match key {
                    "name" => *name = Some(value.to_string()),
                    "schema" | "scheme" => upstream.scheme = value.parse().map_err(err)?,
                    "replicas" => {
                        upstream.replicas = value
                            .parse()
                            .map_err(|_| err(format!("replicas must be a number, got `{}`", value)))?
                    }
                    other => return Err(err(format!("unknown upstream key `{}`", other))),
                }
                Ok(())
            }
            (Some(Block::Upstream { upstream, .. }), None) => {
                upstream.addresses.push(line.to_string());
                Ok(())
            }
            (Some(Block::ProxyHeader(header)), Some((key, value))) => {
                match key {
                    "key" => header.key = value.to_string(),
                    "value" => header.value = value.to_string(),
                    other => return Err(err(format!("unknown proxy_set_header key `{}`", other))),
                }
                Ok(())
            }
            (Some(_), _) => Err(err(format!("unexpected line `{}`", line))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Scheme;
    use std::io::Write;

    const SAMPLE: &str = "\
# edge proxy
[server]
port=8080
[location]
type=1
upstream=web
[end]
[location]
type=2
root=/static/
file_root=./public
[end]
[end]

[upstream]
name=web
schema=https
replicas=2
10.0.0.1:80
10.0.0.2:80
[proxy_set_header]
key=X-Served-By
value=edge
[end]
[end]
";

    #[test]
    fn parses_full_block_config() {
        let config = parse_block_config(SAMPLE).unwrap();

        assert_eq!(config.services.len(), 1);
        let service = &config.services[0];
        assert_eq!(service.port, "8080");
        assert_eq!(service.locations.len(), 2);
        assert_eq!(service.locations[0].kind, LocationKindConfig::LoadBalance);
        assert_eq!(service.locations[0].path_prefix(), "/");
        assert_eq!(service.locations[1].file_root.as_deref(), Some("./public"));

        let web = &config.upstreams["web"];
        assert_eq!(web.scheme, Scheme::Https);
        assert_eq!(web.replicas, 2);
        assert_eq!(web.addresses, vec!["10.0.0.1:80", "10.0.0.2:80"]);
        assert_eq!(web.proxy_set_header[0].key, "X-Served-By");
        assert_eq!(web.proxy_set_header[0].value, "edge");
    }

    #[test]
    fn reports_line_numbers() {
        let err = parse_block_config("[server]\nport=80\n[upstream]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 3, .. }), "{err}");

        let err = parse_block_config("[upstream]\nname=a\nreplicas=two\n[end]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 3, .. }), "{err}");

        let err = parse_block_config("port=80\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }), "{err}");
    }

    #[test]
    fn rejects_unterminated_and_untyped_blocks() {
        assert!(parse_block_config("[server]\nport=80\n").is_err());
        assert!(parse_block_config("[server]\nport=80\n[location]\nroot=/\n[end]\n[end]\n").is_err());
        assert!(parse_block_config("[end]\n").is_err());
    }

    #[test]
    fn load_config_validates() {
        let mut file = tempfile::Builder::new().suffix(".cfg").tempfile().unwrap();
        write!(file, "[server]\nport=8080\n[location]\ntype=1\nupstream=nope\n[end]\n[end]\n").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "{err}");
    }

    #[test]
    fn load_config_reads_toml_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            "[[services]]\nport = \"8080\"\n[[services.locations]]\ntype = \"load_balance\"\nupstream = \"web\"\n\n[upstreams.web]\naddresses = [\"127.0.0.1:9000\"]\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.services[0].port, "8080");
        assert_eq!(config.upstreams["web"].replicas, 1);
    }

    #[test]
    fn padded_ports_are_trimmed_before_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            "[[services]]\nport = \" 8080 \"\n[[services.locations]]\ntype = \"load_balance\"\nupstream = \"web\"\n\n[upstreams.web]\naddresses = [\" 127.0.0.1:9000\"]\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.services[0].port, "8080");
        assert_eq!(config.upstreams["web"].addresses, vec!["127.0.0.1:9000".to_string()]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/edge-proxy.cfg")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn shipped_configs_agree() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs");
        let block = load_config(&dir.join("config.cfg")).unwrap();
        let toml = load_config(&dir.join("proxy.toml")).unwrap();
        assert_eq!(block.services, toml.services);
        assert_eq!(block.upstreams, toml.upstreams);
    }
}

//! Configuration references and how they resolve to a tunnel configuration.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::config::TunnelConfig as TunnelSettings;
use crate::config::VpnConfiguration;
use crate::config::wireguard::is_valid_interface_name;
use crate::tunnel::error::{TunnelError, TunnelResult};

const DATA_URI_PREFIX: &str = "data:text/plain;base64,";

/// What the caller passed to identify a tunnel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigReference {
    /// A configuration file; its stem names the interface
    Path(PathBuf),
    /// A bare interface name, looked up as `<name>.conf` on the search path
    Name(String),
    /// Configuration text passed directly
    Inline(String),
}

impl ConfigReference {
    /// Interpret a reference string.
    ///
    /// `data:text/plain;base64,...` and text starting with `[` are inline
    /// configuration. An existing path is a file. A bare name that could be
    /// an interface is a name. Anything else is treated as a (possibly
    /// missing) file path.
    pub fn parse(reference: &str) -> TunnelResult<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(TunnelError::InvalidArgument(
                "empty configuration reference".to_string(),
            ));
        }

        if let Some(encoded) = trimmed.strip_prefix(DATA_URI_PREFIX) {
            let bytes = STANDARD.decode(encoded).map_err(|e| {
                TunnelError::InvalidArgument(format!("bad base64 in data URI: {}", e))
            })?;
            let text = String::from_utf8(bytes).map_err(|_| {
                TunnelError::InvalidArgument("data URI is not valid UTF-8".to_string())
            })?;
            return Ok(ConfigReference::Inline(text));
        }

        if trimmed.starts_with('[') {
            return Ok(ConfigReference::Inline(trimmed.to_string()));
        }

        let path = Path::new(trimmed);
        if path.exists() {
            return Ok(ConfigReference::Path(path.to_path_buf()));
        }

        let looks_like_path = trimmed.contains(std::path::MAIN_SEPARATOR)
            || trimmed.contains('/')
            || trimmed.ends_with(".conf");
        if !looks_like_path && is_valid_interface_name(trimmed) {
            return Ok(ConfigReference::Name(trimmed.to_string()));
        }

        Ok(ConfigReference::Path(path.to_path_buf()))
    }

    /// Interface name this reference maps to, without touching the disk.
    pub fn interface_name(&self, settings: &TunnelSettings) -> TunnelResult<String> {
        let name = match self {
            ConfigReference::Path(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    TunnelError::InvalidArgument(format!(
                        "cannot derive an interface name from {}",
                        path.display()
                    ))
                })?,
            ConfigReference::Name(name) => name.clone(),
            ConfigReference::Inline(_) => settings.default_interface_name.clone(),
        };
        if is_valid_interface_name(&name) {
            Ok(name)
        } else {
            Err(TunnelError::InvalidArgument(format!(
                "'{}' is not a valid interface name",
                name
            )))
        }
    }

    /// Locate the configuration file, if the reference has one.
    pub fn locate(&self, settings: &TunnelSettings) -> Option<PathBuf> {
        match self {
            ConfigReference::Path(path) => path.exists().then(|| path.clone()),
            ConfigReference::Name(name) => settings
                .search_path
                .iter()
                .map(|dir| dir.join(format!("{}.conf", name)))
                .find(|candidate| candidate.is_file()),
            ConfigReference::Inline(_) => None,
        }
    }
}

impl FromStr for ConfigReference {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConfigReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigReference::Path(path) => write!(f, "{}", path.display()),
            ConfigReference::Name(name) => write!(f, "{}", name),
            ConfigReference::Inline(_) => write!(f, "<inline>"),
        }
    }
}

/// A reference resolved to an interface and, when available, its configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub interface: String,
    pub source: Option<PathBuf>,
    pub configuration: Option<VpnConfiguration>,
}

/// Resolve a reference for bringing a tunnel up; the configuration must exist.
pub async fn resolve_for_up(
    reference: &ConfigReference,
    settings: &TunnelSettings,
) -> TunnelResult<ResolvedConfig> {
    let interface = reference.interface_name(settings)?;
    let (text, source) = match reference {
        ConfigReference::Inline(text) => (text.clone(), None),
        _ => {
            let path = reference
                .locate(settings)
                .ok_or_else(|| TunnelError::ConfigNotFound(reference.to_string()))?;
            (read_config(&path).await?, Some(path))
        }
    };
    let configuration = parse_config(&interface, &text)?;
    Ok(ResolvedConfig {
        interface,
        source,
        configuration: Some(configuration),
    })
}

/// Resolve a reference for taking a tunnel down.
///
/// A missing file is not an error: the interface can still be removed, only
/// the configuration's hooks and DNS cleanup are skipped.
pub async fn resolve_for_down(
    reference: &ConfigReference,
    settings: &TunnelSettings,
) -> TunnelResult<ResolvedConfig> {
    let interface = reference.interface_name(settings)?;
    let (configuration, source) = match reference {
        ConfigReference::Inline(text) => (Some(parse_config(&interface, text)?), None),
        _ => match reference.locate(settings) {
            Some(path) => {
                let text = read_config(&path).await?;
                (Some(parse_config(&interface, &text)?), Some(path))
            }
            None => {
                debug!(interface = %interface, reference = %reference, "No configuration file, taking interface down by name");
                (None, None)
            }
        },
    };
    Ok(ResolvedConfig {
        interface,
        source,
        configuration,
    })
}

async fn read_config(path: &Path) -> TunnelResult<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(TunnelError::ConfigNotFound(path.display().to_string()))
        }
        Err(e) => Err(TunnelError::Io(e)),
    }
}

fn parse_config(interface: &str, text: &str) -> TunnelResult<VpnConfiguration> {
    VpnConfiguration::parse(text).map_err(|source| TunnelError::InvalidConfig {
        name: interface.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const PRIVATE: &str = "OMX3U47NyJYiSdkIHAv/J3H46ERMhRaAOozcbfMjRZE=";

    fn settings(dir: &Path) -> TunnelSettings {
        TunnelSettings {
            search_path: vec![dir.to_path_buf()],
            ..TunnelSettings::default()
        }
    }

    #[test]
    fn parses_reference_kinds() {
        assert!(matches!(
            ConfigReference::parse("[Interface]\nPrivateKey = x").unwrap(),
            ConfigReference::Inline(_)
        ));
        assert_eq!(
            ConfigReference::parse("office").unwrap(),
            ConfigReference::Name("office".to_string())
        );
        assert_eq!(
            ConfigReference::parse("/nowhere/office.conf").unwrap(),
            ConfigReference::Path(PathBuf::from("/nowhere/office.conf"))
        );
        assert_eq!(
            ConfigReference::parse("missing.conf").unwrap(),
            ConfigReference::Path(PathBuf::from("missing.conf"))
        );
        assert!(ConfigReference::parse("  ").is_err());
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(
            ConfigReference::parse(" wg0\n").unwrap(),
            ConfigReference::Name("wg0".to_string())
        );
        assert_eq!(
            ConfigReference::parse("\t/nowhere/office.conf ").unwrap(),
            ConfigReference::Path(PathBuf::from("/nowhere/office.conf"))
        );
    }

    #[test]
    fn decodes_data_uri() {
        let text = format!("[Interface]\nPrivateKey = {PRIVATE}\n");
        let uri = format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(&text));
        assert_eq!(
            ConfigReference::parse(&uri).unwrap(),
            ConfigReference::Inline(text)
        );
        assert!(ConfigReference::parse("data:text/plain;base64,!!!").is_err());
    }

    #[test]
    fn interface_name_comes_from_file_stem() {
        let s = TunnelSettings::default();
        let r = ConfigReference::Path(PathBuf::from("/etc/wireguard/office.conf"));
        assert_eq!(r.interface_name(&s).unwrap(), "office");
        let r = ConfigReference::Inline(String::new());
        assert_eq!(r.interface_name(&s).unwrap(), "wg0");
        let r = ConfigReference::Path(PathBuf::from("/tmp/a-very-long-interface-name.conf"));
        assert!(matches!(
            r.interface_name(&s),
            Err(TunnelError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn resolves_names_through_search_path() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("home.conf"),
            format!("[Interface]\nPrivateKey = {PRIVATE}\n"),
        )
        .unwrap();

        let s = settings(dir.path());
        let resolved = resolve_for_up(&ConfigReference::Name("home".into()), &s)
            .await
            .unwrap();
        assert_eq!(resolved.interface, "home");
        assert_eq!(resolved.source, Some(dir.path().join("home.conf")));
        assert!(resolved.configuration.is_some());
    }

    #[tokio::test]
    async fn missing_configuration_fails_up_but_not_down() {
        let dir = tempdir().unwrap();
        let s = settings(dir.path());
        let reference = ConfigReference::Path(dir.path().join("missing.conf"));

        let err = resolve_for_up(&reference, &s).await.unwrap_err();
        assert!(matches!(err, TunnelError::ConfigNotFound(_)));

        let resolved = resolve_for_down(&reference, &s).await.unwrap();
        assert_eq!(resolved.interface, "missing");
        assert!(resolved.configuration.is_none());
    }

    #[tokio::test]
    async fn invalid_configuration_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "[Interface]\nMTU = 1400\n").unwrap();

        let err = resolve_for_up(&ConfigReference::Path(path), &settings(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::InvalidConfig { ref name, .. } if name == "broken"));
    }
}

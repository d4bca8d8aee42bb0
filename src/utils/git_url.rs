use crate::constants::network::SSH_DEFAULT_PORT;
use crate::errors::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Ssh,
    Https,
    Http,
    Git,
    Local,
}

impl Transport {
    pub fn is_ssh(self) -> bool {
        self == Transport::Ssh
    }

    pub fn is_http(self) -> bool {
        matches!(self, Transport::Https | Transport::Http)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    pub transport: Transport,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    raw: String,
}

impl RemoteUrl {
    pub fn parse(raw: &str) -> Result<Self, ToolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ToolError::invalid_params("Remote URL must not be empty"));
        }
        if trimmed.contains("://") {
            return Self::parse_with_scheme(trimmed);
        }
        if let Some(parsed) = Self::parse_scp_like(trimmed) {
            return Ok(parsed);
        }
        Ok(Self {
            transport: Transport::Local,
            host: None,
            port: None,
            user: None,
            raw: trimmed.to_string(),
        })
    }

    fn parse_with_scheme(raw: &str) -> Result<Self, ToolError> {
        let parsed = url::Url::parse(raw)
            .map_err(|err| ToolError::invalid_params(format!("Invalid remote URL: {}", err)))?;
        let transport = match parsed.scheme() {
            "ssh" | "git+ssh" | "ssh+git" => Transport::Ssh,
            "https" => Transport::Https,
            "http" => Transport::Http,
            "git" => Transport::Git,
            "file" => Transport::Local,
            other => {
                return Err(ToolError::invalid_params(format!(
                    "Unsupported remote URL scheme: {}",
                    other
                )))
            }
        };
        let user = Some(parsed.username())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string());
        Ok(Self {
            transport,
            host: parsed.host_str().map(|h| h.to_lowercase()),
            port: parsed.port(),
            user,
            raw: raw.to_string(),
        })
    }

    /// `[user@]host:path`, the scp-style form git accepts for ssh remotes.
    fn parse_scp_like(raw: &str) -> Option<Self> {
        let colon = raw.find(':')?;
        if let Some(slash) = raw.find('/') {
            if slash < colon {
                return None;
            }
        }
        let authority = &raw[..colon];
        // C:\repo on windows
        if authority.len() == 1 {
            return None;
        }
        let (user, host) = match authority.rsplit_once('@') {
            Some((user, host)) => (Some(user.to_string()), host),
            None => (None, authority),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self {
            transport: Transport::Ssh,
            host: Some(host.trim_matches(|c| c == '[' || c == ']').to_lowercase()),
            port: None,
            user,
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Port only when it differs from the ssh default.
    pub fn non_default_ssh_port(&self) -> Option<u16> {
        self.port.filter(|port| *port != SSH_DEFAULT_PORT)
    }

    /// Host name as it appears in a known_hosts file.
    pub fn known_hosts_name(&self) -> Option<String> {
        let host = self.host.as_ref()?;
        Some(match self.non_default_ssh_port() {
            Some(port) => format!("[{}]:{}", host, port),
            None => host.clone(),
        })
    }

    /// Origin (`scheme://host[:port]/`) used to scope http config overrides.
    pub fn http_origin(&self) -> Option<String> {
        if !self.transport.is_http() {
            return None;
        }
        let scheme = if self.transport == Transport::Https {
            "https"
        } else {
            "http"
        };
        let host = self.host.as_ref()?;
        Some(match self.port {
            Some(port) => format!("{}://{}:{}/", scheme, host, port),
            None => format!("{}://{}/", scheme, host),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scp_like_remote() {
        let url = RemoteUrl::parse("git@github.com:acme/app.git").expect("parse");
        assert_eq!(url.transport, Transport::Ssh);
        assert_eq!(url.host.as_deref(), Some("github.com"));
        assert_eq!(url.user.as_deref(), Some("git"));
        assert_eq!(url.known_hosts_name().as_deref(), Some("github.com"));
    }

    #[test]
    fn parses_ssh_scheme_with_port() {
        let url = RemoteUrl::parse("ssh://git@Git.Example.com:2222/acme/app.git").expect("parse");
        assert_eq!(url.transport, Transport::Ssh);
        assert_eq!(url.host.as_deref(), Some("git.example.com"));
        assert_eq!(url.non_default_ssh_port(), Some(2222));
        assert_eq!(
            url.known_hosts_name().as_deref(),
            Some("[git.example.com]:2222")
        );
    }

    #[test]
    fn default_ssh_port_is_not_reported() {
        let url = RemoteUrl::parse("ssh://git@example.com:22/a.git").expect("parse");
        assert_eq!(url.non_default_ssh_port(), None);
    }

    #[test]
    fn parses_https_origin() {
        let url = RemoteUrl::parse("https://gitlab.example.com/group/app.git").expect("parse");
        assert_eq!(url.transport, Transport::Https);
        assert_eq!(
            url.http_origin().as_deref(),
            Some("https://gitlab.example.com/")
        );
    }

    #[test]
    fn local_paths_have_no_host() {
        for raw in ["/srv/repos/app.git", "../app", "file:///srv/app.git"] {
            let url = RemoteUrl::parse(raw).expect("parse");
            assert_eq!(url.transport, Transport::Local, "{}", raw);
            assert!(url.host.is_none() || raw.starts_with("file:"));
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(RemoteUrl::parse("ftp://example.com/a.git").is_err());
    }
}

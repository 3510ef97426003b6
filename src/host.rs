//! Hostname validation and extraction from Git remote URLs.

use std::net::Ipv6Addr;

/// Checks a hostname against RFC 1123, or accepts an IPv6 literal.
///
/// - At most 255 characters
/// - Labels are 1-63 characters of ASCII letters, digits and hyphens
/// - Labels never start or end with a hyphen
/// - IPv6 addresses are accepted with or without brackets
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() {
        return false;
    }

    if hostname.contains(':') {
        let bare = hostname
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(hostname);
        return bare.parse::<Ipv6Addr>().is_ok();
    }

    if hostname.len() > 255 {
        return false;
    }

    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Extracts the host part of an SSH remote URL.
///
/// Accepts SCP-style `git@github.com:owner/repo.git` and
/// `ssh://[user@]host[:port]/path`. Returns `None` for anything else.
pub fn extract_hostname(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    if let Some(rest) = url.strip_prefix("ssh://") {
        let (authority, path) = rest.split_once('/')?;
        if path.trim_matches('/').is_empty() {
            return None;
        }
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let host = if let Some(bracketed) = host_port.strip_prefix('[') {
            bracketed.split_once(']')?.0
        } else {
            host_port.split(':').next()?
        };
        return is_valid_hostname(host).then(|| host.to_string());
    }

    let (user_host, path) = url.split_once(':')?;
    if path.trim_matches('/').is_empty() {
        return None;
    }
    let (user, host) = user_host.split_once('@')?;
    if user.is_empty() || host.is_empty() || host.contains('@') {
        return None;
    }
    if host.starts_with('.') || host.ends_with('.') {
        return None;
    }
    is_valid_hostname(host).then(|| host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_hostnames() {
        assert!(is_valid_hostname("github.com"));
        assert!(is_valid_hostname("a-b.example.co"));
        assert!(is_valid_hostname("localhost"));
        assert!(is_valid_hostname("192.168.1.10"));
    }

    #[test]
    fn test_invalid_hostnames() {
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("-bad.com"));
        assert!(!is_valid_hostname("bad-.com"));
        assert!(!is_valid_hostname("a..b"));
        assert!(!is_valid_hostname("under_score.com"));
        assert!(!is_valid_hostname(&"a".repeat(64)));
        assert!(!is_valid_hostname(&format!("{}.com", "a.".repeat(130))));
    }

    #[test]
    fn test_ipv6_literals() {
        assert!(is_valid_hostname("::1"));
        assert!(is_valid_hostname("[2001:db8::1]"));
        assert!(!is_valid_hostname("[2001:db8::zz]"));
    }

    #[test]
    fn test_extract_scp_style() {
        assert_eq!(
            extract_hostname("git@github.com:user/repo.git").as_deref(),
            Some("github.com")
        );
        assert_eq!(
            extract_hostname("git@host.example.com:group/sub/repo.git").as_deref(),
            Some("host.example.com")
        );
    }

    #[test]
    fn test_extract_ssh_scheme() {
        assert_eq!(
            extract_hostname("ssh://git@gitlab.example.com:2222/team/repo.git").as_deref(),
            Some("gitlab.example.com")
        );
        assert_eq!(
            extract_hostname("ssh://[::1]:22/repo").as_deref(),
            Some("::1")
        );
    }

    #[test]
    fn test_extract_rejects_malformed() {
        assert!(extract_hostname("").is_none());
        assert!(extract_hostname("github.com:user/repo").is_none());
        assert!(extract_hostname("git@github.com:").is_none());
        assert!(extract_hostname("@github.com:repo").is_none());
        assert!(extract_hostname("git@.github.com:repo").is_none());
        assert!(extract_hostname("https://github.com/user/repo").is_none());
    }
}

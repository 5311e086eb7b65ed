use std::net::IpAddr;
use std::str::FromStr;
use std::sync::OnceLock;

use derive_more::Display;
use regex::Regex;

fn label_regex() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("host label regex is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HostSpec {
    /// This list is reversed as it's easier to start matching from the end of the list.
    labels: Vec<String>,
    wildcard: bool,
}

#[derive(Debug, Clone, PartialEq, Display)]
pub(crate) enum HostSpecParseError {
    #[display(fmt = "hostname is empty")]
    EmptyStr,
    #[display(fmt = "hostname contains an empty label")]
    EmptyLabel,
    #[display(fmt = "hostname contains an invalid label")]
    InvalidLabel,
    #[display(fmt = "wildcard must be the first label on its own")]
    InvalidWildcard,
    #[display(fmt = "expected a hostname, got an IP address")]
    UnexpectedIp,
}

impl FromStr for HostSpec {
    type Err = HostSpecParseError;

    /// Parses an RFC 1123 hostname, optionally prefixed with a single wildcard label (`*.`).
    ///
    /// IPs are rejected; labels must be lower case alphanumerics or `-` and must start and
    /// end with an alphanumeric character.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if IpAddr::from_str(value).is_ok() {
            return Err(HostSpecParseError::UnexpectedIp);
        }

        if value.is_empty() {
            return Err(HostSpecParseError::EmptyStr);
        }

        let mut labels = vec![];
        let mut wildcard = false;

        for label in value.split('.').rev() {
            if label.is_empty() {
                return Err(HostSpecParseError::EmptyLabel);
            }

            // If we still iterate after we found a wildcard, it's an invalid hostname
            if wildcard {
                return Err(HostSpecParseError::InvalidWildcard);
            }

            if label == "*" {
                wildcard = true;
            } else {
                if !label_regex().is_match(label) {
                    return Err(HostSpecParseError::InvalidLabel);
                }

                labels.push(label.to_string());
            }
        }

        Ok(Self { labels, wildcard })
    }
}

impl HostSpec {
    pub(crate) fn matches(&self, hostname: &Hostname) -> bool {
        let wildcard_addition = usize::from(self.wildcard);

        if self.labels.len() + wildcard_addition != hostname.labels.len() {
            return false;
        }

        self.labels
            .iter()
            .zip(hostname.labels.iter())
            .all(|(label, hostname_label)| label == hostname_label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Hostname {
    labels: Vec<String>,
}

impl FromStr for Hostname {
    type Err = HostSpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = HostSpec::from_str(s)?;

        if spec.wildcard {
            Err(HostSpecParseError::InvalidWildcard)
        } else {
            Ok(Self {
                labels: spec.labels,
            })
        }
    }
}

/// A `Host(...)` pattern: either a hostname spec or a literal IP address.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HostPattern {
    Name(HostSpec),
    Ip(IpAddr),
}

impl FromStr for HostPattern {
    type Err = HostSpecParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.to_ascii_lowercase();

        match IpAddr::from_str(strip_brackets(&value)) {
            Ok(ip) => Ok(Self::Ip(ip)),
            Err(_) => HostSpec::from_str(&value).map(Self::Name),
        }
    }
}

impl HostPattern {
    pub(crate) fn matches(&self, host: &RequestHost) -> bool {
        match (self, host) {
            (Self::Name(spec), RequestHost::Name(hostname)) => spec.matches(hostname),
            (Self::Ip(ip), RequestHost::Ip(request_ip)) => ip == request_ip,
            _ => false,
        }
    }
}

/// The host a request was addressed to, with any port removed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RequestHost {
    Name(Hostname),
    Ip(IpAddr),
    /// Present but not a valid hostname; only regexp predicates can match it.
    Other,
}

impl RequestHost {
    pub(crate) fn parse(raw: &str) -> Self {
        let host = strip_port(raw).to_ascii_lowercase();

        if let Ok(ip) = IpAddr::from_str(strip_brackets(&host)) {
            return Self::Ip(ip);
        }

        Hostname::from_str(host.trim_end_matches('.'))
            .map(Self::Name)
            .unwrap_or(Self::Other)
    }
}

/// Removes a trailing `:port`, keeping bracketed IPv6 literals intact.
pub(crate) fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        // A bare IPv6 address has more than one colon and no port.
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_spec_empty_str() {
        let result = HostSpec::from_str("");

        assert_eq!(result.unwrap_err(), HostSpecParseError::EmptyStr);
    }

    #[test]
    fn host_spec_empty_label_in_the_middle() {
        let result = HostSpec::from_str("test..com");

        assert_eq!(result.unwrap_err(), HostSpecParseError::EmptyLabel);
    }

    #[test]
    fn host_spec_invalid_label_hypens() {
        assert_eq!(
            HostSpec::from_str("-invalid.com").unwrap_err(),
            HostSpecParseError::InvalidLabel
        );
        assert_eq!(
            HostSpec::from_str("invalid-.com").unwrap_err(),
            HostSpecParseError::InvalidLabel
        );
    }

    #[test]
    fn host_spec_unexpected_ip() {
        assert_eq!(
            HostSpec::from_str("12.12.12.12").unwrap_err(),
            HostSpecParseError::UnexpectedIp
        );
        assert_eq!(
            HostSpec::from_str("2001:db8::8a2e:370:7334").unwrap_err(),
            HostSpecParseError::UnexpectedIp
        );
    }

    #[test]
    fn valid_precise_hostname() {
        let result = HostSpec::from_str("subdomain.test.com").unwrap();

        assert_eq!(result.labels, vec!["com", "test", "subdomain"]);
        assert!(!result.wildcard);
    }

    #[test]
    fn invalid_wildcard_positions() {
        assert_eq!(
            HostSpec::from_str("test.*.com").unwrap_err(),
            HostSpecParseError::InvalidWildcard
        );
        assert_eq!(
            HostSpec::from_str("*.*.com").unwrap_err(),
            HostSpecParseError::InvalidWildcard
        );
    }

    #[test]
    fn unexpected_wildcard_hostname() {
        assert!(Hostname::from_str("*.com").is_err());
    }

    #[test]
    fn host_spec_match_exact_and_wildcard() {
        let exact = HostSpec::from_str("test.com").unwrap();
        let wildcard = HostSpec::from_str("*.test.com").unwrap();

        assert!(exact.matches(&Hostname::from_str("test.com").unwrap()));
        assert!(!exact.matches(&Hostname::from_str("not-test.com").unwrap()));
        assert!(wildcard.matches(&Hostname::from_str("other-sub.test.com").unwrap()));
        assert!(!wildcard.matches(&Hostname::from_str("test.com").unwrap()));
        assert!(!wildcard.matches(&Hostname::from_str("sub2.sub1.test.com").unwrap()));
    }

    #[test]
    fn request_host_ignores_port_and_case() {
        let pattern = HostPattern::from_str("A.test").unwrap();

        assert!(pattern.matches(&RequestHost::parse("a.TEST:8080")));
        assert!(pattern.matches(&RequestHost::parse("a.test")));
        assert!(!pattern.matches(&RequestHost::parse("b.test")));
    }

    #[test]
    fn ip_patterns_match_ip_hosts() {
        let v4 = HostPattern::from_str("10.0.0.1").unwrap();
        let v6 = HostPattern::from_str("[::1]").unwrap();

        assert!(v4.matches(&RequestHost::parse("10.0.0.1:80")));
        assert!(v6.matches(&RequestHost::parse("[::1]:443")));
        assert!(!v4.matches(&RequestHost::parse("a.test")));
    }

    #[test]
    fn strip_port_handles_ipv6() {
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("::1"), "::1");
        assert_eq!(strip_port("a.test:80"), "a.test");
        assert_eq!(strip_port("a.test"), "a.test");
    }
}

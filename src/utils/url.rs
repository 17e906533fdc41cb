// mapache is an incremental backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::str::FromStr;

use anyhow::{Result, anyhow};

/// A minimal `scheme://[user@]host[:port]/path` URL parser, just enough to
/// recognize the backend schemes mapache understands (`file`, `sftp`)
/// without pulling in a full URL crate.
///
/// `path` is split on `/` rather than kept as a single string so callers can
/// tell apart a trailing slash, a doubled slash or a path that resolved to
/// nothing (all of which `path.join("/")` reconstructs faithfully).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Url {
    pub scheme: String,
    pub username: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Vec<String>,
}

/// Splits `path_raw` on `/` and, only if it contains a `.` or `..`
/// component, resolves those against a stack. A path with no dot
/// components is returned verbatim so that literal empty components
/// (leading, trailing or doubled slashes) survive untouched.
fn normalize_path(path_raw: &str) -> Vec<String> {
    let components: Vec<&str> = path_raw.split('/').collect();

    let has_dots = components.iter().any(|c| *c == "." || *c == "..");
    if !has_dots {
        return components.into_iter().map(String::from).collect();
    }

    let mut stack: Vec<String> = Vec::new();
    for component in components {
        match component {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            other => stack.push(other.to_string()),
        }
    }
    stack
}

impl FromStr for Url {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| anyhow!("URL '{}' is missing a scheme", s))?;

        // Separate `user@host:port` from the path. An authority is only
        // present when whatever precedes the first `/` (or the whole
        // remainder, if there's no `/` at all) contains an `@`; otherwise
        // the entire remainder is path.
        let (authority, path_raw): (Option<&str>, &str) = match rest.split_once('/') {
            Some((candidate, after)) => {
                if candidate.contains('@') {
                    (Some(candidate), after)
                } else {
                    (None, rest)
                }
            }
            None => {
                if rest.contains('@') {
                    (Some(rest), "")
                } else {
                    (None, rest)
                }
            }
        };

        let (username, host, port) = match authority {
            Some(authority) => {
                let (username, host_port) = match authority.split_once('@') {
                    Some((user, host_port)) => (user.to_string(), host_port),
                    None => (String::new(), authority),
                };

                let (host, port) = match host_port.split_once(':') {
                    Some((host, port_str)) => {
                        let port: u16 = port_str
                            .parse()
                            .map_err(|_| anyhow!("Invalid port '{port_str}' in URL '{s}'"))?;
                        (Some(host.to_string()), Some(port))
                    }
                    None if host_port.is_empty() => (None, None),
                    None => (Some(host_port.to_string()), None),
                };

                (username, host, port)
            }
            None => (String::new(), None, None),
        };

        Ok(Url {
            scheme: scheme.to_string(),
            username,
            host,
            port,
            path: normalize_path(path_raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_scheme() {
        let url = Url::from_str("file:///tmp/repo").unwrap();
        assert_eq!(url.scheme, "file");
        assert_eq!(url.path.join("/"), "/tmp/repo");
    }

    #[test]
    fn test_parse_sftp_scheme() {
        let url = Url::from_str("sftp://user@example.com:2222/backups/repo").unwrap();
        assert_eq!(url.scheme, "sftp");
        assert_eq!(url.username, "user");
        assert_eq!(url.host.as_deref(), Some("example.com"));
        assert_eq!(url.port, Some(2222));
        assert_eq!(url.path.join("/"), "backups/repo");
    }

    #[test]
    fn test_parse_sftp_scheme_without_port() {
        let url = Url::from_str("sftp://user@example.com/repo").unwrap();
        assert_eq!(url.host.as_deref(), Some("example.com"));
        assert_eq!(url.port, None);
        assert_eq!(url.path.join("/"), "repo");
    }

    #[test]
    fn test_dot_segments_are_normalized() {
        let url = Url::from_str("file://./dir/a/..").unwrap();
        assert_eq!(url.path.join("/"), "dir");
    }

    #[test]
    fn test_empty_path_segments_are_preserved_without_dots() {
        let url = Url::from_str("file://dir/").unwrap();
        assert_eq!(url.path.join("/"), "dir/");
    }

    #[test]
    fn test_missing_scheme_is_an_error() {
        assert!(Url::from_str("/tmp/repo").is_err());
    }
}

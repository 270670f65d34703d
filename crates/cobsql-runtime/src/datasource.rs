//! Datasource descriptions and connection options.

use std::collections::HashMap;

use thiserror::Error;

/// Autocommit behaviour requested for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoCommitMode {
    #[default]
    On,
    Off,
}

/// Options applied when a connection is opened.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub autocommit: AutoCommitMode,
    pub client_encoding: String,
    /// Rewrite `?` and `:name` markers to `$n` before PREPARE.
    pub fixup_parameters: bool,
}

#[derive(Error, Debug, PartialEq)]
pub enum DataSourceError {
    #[error("malformed datasource string: {0}")]
    Malformed(String),
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),
}

/// A parsed datasource string:
/// `backend://[user[.password]@]host[:port][/dbname][?opt=val&...]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSourceInfo {
    pub backend: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub username: String,
    pub password: String,
    pub options: HashMap<String, String>,
}

impl DataSourceInfo {
    pub fn parse(s: &str) -> Result<Self, DataSourceError> {
        let (backend, rest) = s
            .split_once("://")
            .ok_or_else(|| DataSourceError::Malformed(s.to_string()))?;
        if backend.is_empty() {
            return Err(DataSourceError::Malformed(s.to_string()));
        }

        let mut info = DataSourceInfo {
            backend: backend.to_string(),
            ..Default::default()
        };

        let (body, query) = match rest.split_once('?') {
            Some((b, q)) => (b, Some(q)),
            None => (rest, None),
        };

        let (userinfo, hostpart) = match body.rsplit_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, body),
        };

        if let Some(u) = userinfo {
            // `user.password` with `user:password` accepted as well
            let (user, pass) = u
                .split_once('.')
                .or_else(|| u.split_once(':'))
                .unwrap_or((u, ""));
            info.username = user.to_string();
            info.password = pass.to_string();
        }

        let (hostport, dbname) = match hostpart.split_once('/') {
            Some((hp, db)) => (hp, db),
            None => (hostpart, ""),
        };
        info.dbname = dbname.to_string();

        match hostport.split_once(':') {
            Some((h, p)) => {
                info.host = h.to_string();
                info.port = p
                    .parse()
                    .map_err(|_| DataSourceError::Malformed(s.to_string()))?;
            }
            None => info.host = hostport.to_string(),
        }

        if let Some(q) = query {
            for pair in q.split('&') {
                if pair.is_empty() {
                    continue;
                }
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                info.options.insert(k.to_string(), v.to_string());
            }
        }

        Ok(info)
    }

    /// Key/value connection string for libpq-style backends. Recognised
    /// pass-through options are forwarded verbatim.
    pub fn conninfo(&self) -> String {
        const PASSTHROUGH: &[&str] = &[
            "connect_timeout",
            "application_name",
            "keepalives",
            "keepalives_idle",
            "keepalives_interval",
            "keepalives_count",
            "sslmode",
            "sslcert",
            "sslkey",
            "sslrootcert",
            "service",
        ];

        let mut parts = Vec::new();
        if !self.host.is_empty() {
            parts.push(format!("host={}", self.host));
        }
        if self.port != 0 {
            parts.push(format!("port={}", self.port));
        }
        if !self.dbname.is_empty() {
            parts.push(format!("dbname={}", self.dbname));
        }
        if !self.username.is_empty() {
            parts.push(format!("user={}", self.username));
        }
        if !self.password.is_empty() {
            parts.push(format!("password={}", self.password));
        }
        for key in PASSTHROUGH {
            if let Some(v) = self.options.get(*key) {
                parts.push(format!("{key}={v}"));
            }
        }
        parts.join(" ")
    }

    /// An option value, interpreted as a boolean switch.
    pub fn option_flag(&self, key: &str) -> Option<bool> {
        match self.options.get(key).map(String::as_str) {
            Some("on") | Some("1") | Some("true") => Some(true),
            Some("off") | Some("0") | Some("false") => Some(false),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_datasource_string() {
        let info =
            DataSourceInfo::parse("pgsql://scott.tiger@dbhost:5433/orders?sslmode=require")
                .unwrap();
        assert_eq!(info.backend, "pgsql");
        assert_eq!(info.username, "scott");
        assert_eq!(info.password, "tiger");
        assert_eq!(info.host, "dbhost");
        assert_eq!(info.port, 5433);
        assert_eq!(info.dbname, "orders");
        assert_eq!(info.options.get("sslmode").unwrap(), "require");
    }

    #[test]
    fn minimal_datasource_string() {
        let info = DataSourceInfo::parse("pgsql://localhost/db").unwrap();
        assert_eq!(info.host, "localhost");
        assert_eq!(info.port, 0);
        assert_eq!(info.dbname, "db");
        assert!(info.username.is_empty());
    }

    #[test]
    fn colon_userinfo_separator() {
        let info = DataSourceInfo::parse("pgsql://u:p@h/db").unwrap();
        assert_eq!(info.username, "u");
        assert_eq!(info.password, "p");
    }

    #[test]
    fn missing_scheme_is_malformed() {
        assert!(DataSourceInfo::parse("localhost/db").is_err());
    }

    #[test]
    fn conninfo_includes_passthrough_options() {
        let info =
            DataSourceInfo::parse("pgsql://u.p@h:5432/d?connect_timeout=10&decode_binary=on")
                .unwrap();
        let ci = info.conninfo();
        assert!(ci.contains("host=h"));
        assert!(ci.contains("port=5432"));
        assert!(ci.contains("dbname=d"));
        assert!(ci.contains("user=u"));
        assert!(ci.contains("password=p"));
        assert!(ci.contains("connect_timeout=10"));
        // driver-level option is consumed, not forwarded
        assert!(!ci.contains("decode_binary"));
    }

    #[test]
    fn option_flags() {
        let info = DataSourceInfo::parse("pgsql://h/d?decode_binary=on&native_cursors=0")
            .unwrap();
        assert_eq!(info.option_flag("decode_binary"), Some(true));
        assert_eq!(info.option_flag("native_cursors"), Some(false));
        assert_eq!(info.option_flag("absent"), None);
    }
}

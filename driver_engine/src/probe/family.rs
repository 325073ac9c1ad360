use crate::config::{FamilyDriverConfig, RecoveryConfig};
use crate::connectivity::ConnectProperties;
use crate::error::DriverError;
use crate::security::Credentials;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const ORACLE_ROLES: [&str; 3] = ["sysdba", "sysoper", "sysasm"];

/// Database families the engine knows how to recover a driver for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseFamily {
    Oracle,
    MySql,
    PostgreSql,
}

impl DatabaseFamily {
    pub const ALL: [DatabaseFamily; 3] = [Self::Oracle, Self::MySql, Self::PostgreSql];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Oracle => "Oracle",
            Self::MySql => "MySQL",
            Self::PostgreSql => "PostgreSQL",
        }
    }

    pub fn driver<'a>(&self, config: &'a RecoveryConfig) -> &'a FamilyDriverConfig {
        match self {
            Self::Oracle => &config.oracle,
            Self::MySql => &config.mysql,
            Self::PostgreSql => &config.postgresql,
        }
    }

    /// Connection properties for `credentials`. Oracle user names of the
    /// form `name as sysdba` log in as `name` with `internal_logon` set to
    /// the role.
    pub fn connect_properties(&self, credentials: &Credentials) -> ConnectProperties {
        let mut properties = credentials.to_properties();
        if *self != Self::Oracle {
            return properties;
        }
        if let Some((user, role)) = credentials.username.as_deref().and_then(split_oracle_role) {
            properties.set("user", user);
            properties.set("internal_logon", role);
        }
        properties
    }
}

impl std::fmt::Display for DatabaseFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatabaseFamily {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oracle" => Ok(Self::Oracle),
            "mysql" => Ok(Self::MySql),
            "postgresql" | "postgres" => Ok(Self::PostgreSql),
            other => Err(DriverError::ConfigError(format!(
                "Unknown database family: {}",
                other
            ))),
        }
    }
}

/// Splits `"<user> as <role>"` into the user and the upper-cased role.
pub(crate) fn split_oracle_role(username: &str) -> Option<(&str, String)> {
    let (rest, role) = username.rsplit_once(char::is_whitespace)?;
    if !ORACLE_ROLES.iter().any(|r| r.eq_ignore_ascii_case(role)) {
        return None;
    }
    let (user, keyword) = rest.trim_end().rsplit_once(char::is_whitespace)?;
    if !keyword.eq_ignore_ascii_case("as") {
        return None;
    }
    let user = user.trim_end();
    if user.is_empty() {
        return None;
    }
    Some((user, role.to_ascii_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_oracle_role() {
        assert_eq!(split_oracle_role("sys as sysdba"), Some(("sys", "SYSDBA".to_string())));
        assert_eq!(split_oracle_role("ops  AS  SysOper"), Some(("ops", "SYSOPER".to_string())));
        assert_eq!(split_oracle_role("asm as sysasm"), Some(("asm", "SYSASM".to_string())));
        assert_eq!(split_oracle_role("scott"), None);
        assert_eq!(split_oracle_role("sys as dba"), None);
        assert_eq!(split_oracle_role("sys sysdba"), None);
        assert_eq!(split_oracle_role("as sysdba"), None);
        assert_eq!(split_oracle_role("sys as sysdba "), None);
    }

    #[test]
    fn test_oracle_properties_carry_internal_logon() {
        let creds = Credentials::new("sys as sysdba", "pw");
        let props = DatabaseFamily::Oracle.connect_properties(&creds);
        assert_eq!(props.get("user"), Some("sys"));
        assert_eq!(props.get("internal_logon"), Some("SYSDBA"));
        assert_eq!(props.get("password"), Some("pw"));
    }

    #[test]
    fn test_other_families_keep_user_verbatim() {
        let creds = Credentials::new("sys as sysdba", "pw");
        let props = DatabaseFamily::MySql.connect_properties(&creds);
        assert_eq!(props.get("user"), Some("sys as sysdba"));
        assert!(!props.contains("internal_logon"));
    }

    #[test]
    fn test_family_parse_and_driver_lookup() {
        let family: DatabaseFamily = "Postgres".parse().unwrap();
        assert_eq!(family, DatabaseFamily::PostgreSql);
        assert!("db2".parse::<DatabaseFamily>().is_err());

        let config = RecoveryConfig::default();
        assert_eq!(
            DatabaseFamily::MySql.driver(&config).implementation_id,
            "com.mysql.cj.jdbc.Driver"
        );
        assert_eq!(DatabaseFamily::ALL.len(), 3);
    }
}

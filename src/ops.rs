//! Database management conveniences.
//!
//! Thin wrappers that compose administrative Cypher through the session
//! layer: database lifecycle, constraint and index teardown, entity counts,
//! and server version introspection. Management commands run against the
//! `system` database; data-level operations run against the client's
//! default database.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::driver::{AccessMode, Connector};
use crate::query::Query;
use crate::record::RecordSet;
use crate::session::SessionConfig;
use crate::{Client, Error, Result};

const SYSTEM_DATABASE: &str = "system";

/// Database names end up spliced into management commands (they cannot be
/// parameterized), so only plain identifiers are accepted.
fn validate_database_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let head_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if head_ok && tail_ok && name.len() <= 63 {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("invalid database name `{name}`")))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{name}`")
}

impl<C: Connector> Client<C> {
    /// Open a session, run one query, close the session.
    async fn run_on(
        &self,
        database: &str,
        mode: AccessMode,
        query: Query,
    ) -> Result<RecordSet> {
        let config = match mode {
            AccessMode::Read => SessionConfig::new(database).read(),
            AccessMode::Write => SessionConfig::new(database).write(),
        };
        let mut session = self.session(config).await?;
        let result = session.run(query).await;
        let closed = session.close().await;
        let records = result?;
        closed?;
        Ok(records)
    }

    // ========================================================================
    // Database lifecycle
    // ========================================================================

    /// Current status of a database (`"online"`, `"offline"`), or `None`
    /// if the server does not know it.
    pub async fn database_status(&self, name: &str) -> Result<Option<String>> {
        let records = self
            .run_on(
                SYSTEM_DATABASE,
                AccessMode::Read,
                Query::new("SHOW DATABASES WHERE name = $name").param("name", name),
            )
            .await?;
        records
            .first()
            .map(|record| record.get::<String>("currentStatus"))
            .transpose()
    }

    /// Whether a database exists in the server's storage.
    pub async fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.database_status(name).await?.is_some())
    }

    /// Whether a database is currently online.
    pub async fn database_online(&self, name: &str) -> Result<bool> {
        Ok(self.database_status(name).await?.as_deref() == Some("online"))
    }

    /// Create a database if it does not already exist.
    pub async fn create_database(&self, name: &str) -> Result<()> {
        self.manage_database("CREATE", name, Some("IF NOT EXISTS")).await
    }

    /// Bring a database online if it is offline.
    pub async fn start_database(&self, name: &str) -> Result<()> {
        self.manage_database("START", name, None).await
    }

    /// Take a database offline.
    pub async fn stop_database(&self, name: &str) -> Result<()> {
        self.manage_database("STOP", name, None).await
    }

    /// Delete a database if it exists.
    pub async fn drop_database(&self, name: &str) -> Result<()> {
        self.manage_database("DROP", name, Some("IF EXISTS")).await
    }

    /// Make sure the given database exists and is online, creating and
    /// starting it as needed. Requires admin privileges when it has work
    /// to do.
    pub async fn ensure_database(&self, name: &str) -> Result<()> {
        if !self.database_exists(name).await? {
            self.create_database(name).await?;
        }
        if !self.database_online(name).await? {
            self.start_database(name).await?;
        }
        Ok(())
    }

    async fn manage_database(&self, verb: &str, name: &str, options: Option<&str>) -> Result<()> {
        validate_database_name(name)?;
        let mut text = format!("{verb} DATABASE {}", quote_identifier(name));
        if let Some(options) = options {
            text.push(' ');
            text.push_str(options);
        }
        info!(database = name, "{verb} database");
        self.run_on(SYSTEM_DATABASE, AccessMode::Write, Query::new(text))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Data-level teardown
    // ========================================================================

    /// Delete every node and relationship in the default database, then
    /// drop all constraints. Leaves an empty database behind.
    pub async fn wipe_database(&self) -> Result<()> {
        self.run_on(
            &self.default_database(),
            AccessMode::Write,
            Query::new("MATCH (n) DETACH DELETE n"),
        )
        .await?;
        self.drop_constraints().await?;
        Ok(())
    }

    /// Drop all constraints in the default database. Returns how many went.
    pub async fn drop_constraints(&self) -> Result<usize> {
        self.drop_schema_entries("CONSTRAINT", "SHOW CONSTRAINTS YIELD name").await
    }

    /// Drop all indexes in the default database. Returns how many went.
    pub async fn drop_indexes(&self) -> Result<usize> {
        self.drop_schema_entries("INDEX", "SHOW INDEXES YIELD name").await
    }

    async fn drop_schema_entries(&self, kind: &str, show: &str) -> Result<usize> {
        let database = self.default_database();
        let entries = self
            .run_on(&database, AccessMode::Read, Query::new(show))
            .await?;
        let mut names = Vec::with_capacity(entries.len());
        for record in &entries {
            names.push(record.get::<String>("name")?);
        }
        for name in &names {
            self.run_on(
                &database,
                AccessMode::Write,
                Query::new(format!("DROP {kind} {}", quote_identifier(name))),
            )
            .await?;
        }
        info!(count = names.len(), kind, "dropped schema entries");
        Ok(names.len())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of nodes in the default database.
    pub async fn node_count(&self) -> Result<i64> {
        self.count("MATCH (n) RETURN count(n) AS count").await
    }

    /// Number of relationships in the default database.
    pub async fn relationship_count(&self) -> Result<i64> {
        self.count("MATCH ()-[r]->() RETURN count(r) AS count").await
    }

    async fn count(&self, query: &str) -> Result<i64> {
        let records = self
            .run_on(&self.default_database(), AccessMode::Read, Query::new(query))
            .await?;
        records
            .first()
            .ok_or_else(|| Error::InvalidArgument("count query returned no rows".into()))?
            .get("count")
    }

    /// The server's reported version, from `dbms.components()`.
    pub async fn server_version(&self) -> Result<ServerVersion> {
        let records = self
            .run_on(
                &self.default_database(),
                AccessMode::Read,
                Query::new("CALL dbms.components() YIELD name, versions, edition"),
            )
            .await?;
        let record = records
            .first()
            .ok_or_else(|| Error::InvalidArgument("server reported no components".into()))?;
        let versions: Vec<String> = record.get("versions")?;
        versions
            .first()
            .ok_or_else(|| Error::InvalidArgument("server reported no version".into()))?
            .parse()
    }
}

// ============================================================================
// ServerVersion
// ============================================================================

/// A parsed server version, e.g. `5.13.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FromStr for ServerVersion {
    type Err = Error;

    /// Accepts `5.13.0`, `5.13`, and suffixed forms like `5.13.0-SNAPSHOT`.
    fn from_str(s: &str) -> Result<Self> {
        let bare = s
            .split(|c| c == '-' || c == '+')
            .next()
            .unwrap_or_default();
        let mut parts = bare.split('.');
        let mut next_number = |required: bool| -> Result<u32> {
            match parts.next() {
                Some(part) => part
                    .parse()
                    .map_err(|_| Error::InvalidArgument(format!("unparseable server version `{s}`"))),
                None if required => {
                    Err(Error::InvalidArgument(format!("unparseable server version `{s}`")))
                }
                None => Ok(0),
            }
        };
        Ok(Self {
            major: next_number(true)?,
            minor: next_number(false)?,
            patch: next_number(false)?,
        })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let version: ServerVersion = "5.13.0".parse().unwrap();
        assert_eq!(version, ServerVersion { major: 5, minor: 13, patch: 0 });
    }

    #[test]
    fn test_version_parse_with_suffix() {
        let version: ServerVersion = "5.26.1-SNAPSHOT".parse().unwrap();
        assert_eq!(version, ServerVersion { major: 5, minor: 26, patch: 1 });
    }

    #[test]
    fn test_version_parse_short() {
        let version: ServerVersion = "4.4".parse().unwrap();
        assert_eq!(version, ServerVersion { major: 4, minor: 4, patch: 0 });
    }

    #[test]
    fn test_version_parse_garbage() {
        assert!("not-a-version".parse::<ServerVersion>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        let old: ServerVersion = "4.4.0".parse().unwrap();
        let new: ServerVersion = "5.13.0".parse().unwrap();
        assert!(old < new);
    }

    #[test]
    fn test_database_name_validation() {
        assert!(validate_database_name("movies").is_ok());
        assert!(validate_database_name("movies-2024.archive").is_ok());
        assert!(validate_database_name("").is_err());
        assert!(validate_database_name("9lives").is_err());
        assert!(validate_database_name("drop db; --").is_err());
    }
}

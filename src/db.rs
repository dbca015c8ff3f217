use std::path::Path;
use chrono::Utc;
use include_dir::{include_dir, Dir};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use rusqlite_migration::Migrations;
use tracing::{debug, trace};
use crate::crl::RevokedEntry;
use crate::data::enums::EntityKind;
use crate::data::error::{PkiError, Result};
use crate::data::objects::{CertificateAuthority, CertificateMaterial, ClientCertificate, ServerCertificate, Transition, User};
use crate::settings::Settings;

static MIGRATIONS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/migrations");

macro_rules! db_do {
    ($pool:expr, $operation:expr) => {
        {
            let pool = $pool.clone();
            tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                $operation(&conn)
            }).await?
        }
    };
}

/// Like `db_do!`, but inside a `BEGIN IMMEDIATE` transaction committed on success.
macro_rules! db_transaction {
    ($pool:expr, $operation:expr) => {
        {
            let pool = $pool.clone();
            tokio::task::spawn_blocking(move || {
                let mut conn = pool.get()?;
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let result: Result<_, PkiError> = $operation(&*tx);
                let result = result?;
                tx.commit()?;
                Ok::<_, PkiError>(result)
            }).await?
        }
    };
}

const CA_COLUMNS: &str = "id, certificate_pem, encrypted_private_key, common_name, fingerprint, key_size, \
    not_valid_before, not_valid_after, is_active, created_at";
const SERVER_COLUMNS: &str = "id, issuing_ca_id, certificate_pem, encrypted_private_key, common_name, fingerprint, \
    key_size, san_entries, not_valid_before, not_valid_after, is_active, created_at";
const CLIENT_COLUMNS: &str = "id, user_id, issuing_ca_id, certificate_pem, encrypted_private_key, common_name, \
    fingerprint, key_size, serial_number, not_valid_before, not_valid_after, is_active, revoked, revoked_at, created_at";

#[derive(Debug, Clone)]
pub(crate) struct PkiDB {
    pool: Pool<SqliteConnectionManager>,
}

impl PkiDB {
    pub(crate) fn new(settings: &Settings) -> Result<Self> {
        let (manager, max_size) = match &settings.database_path {
            Some(path) => {
                debug!("Opening database at {}", path.display());
                let manager = SqliteConnectionManager::file(path).with_init(|conn| {
                    conn.pragma_update(None, "foreign_keys", "ON")?;
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
                    Ok(())
                });
                (manager, settings.pool_size.max(1))
            }
            None => {
                debug!("Opening in-memory database");
                let manager = SqliteConnectionManager::memory().with_init(|conn| {
                    conn.pragma_update(None, "foreign_keys", "ON")?;
                    Ok(())
                });
                // Every in-memory connection is its own database.
                (manager, 1)
            }
        };

        let pool = Pool::builder().max_size(max_size).build(manager)?;
        let mut connection = pool.get()?;
        Self::migrate_database(&mut connection)?;
        drop(connection);

        if let Some(path) = &settings.database_path {
            Self::restrict_permissions(path)?;
        }

        Ok(Self { pool })
    }

    fn migrate_database(conn: &mut Connection) -> Result<()> {
        let migrations = Migrations::from_directory(&MIGRATIONS_DIR)
            .map_err(|e| PkiError::Internal(format!("failed to load migrations: {e}")))?;
        migrations
            .to_latest(conn)
            .map_err(|e| PkiError::Internal(format!("failed to migrate database: {e}")))?;
        debug!("Database migrated to latest version");

        Ok(())
    }

    #[cfg(unix)]
    fn restrict_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = std::fs::metadata(path)
            .map_err(|e| PkiError::Internal(e.to_string()))?
            .permissions();
        if perms.mode() & 0o077 != 0 {
            debug!("Setting database file permissions to 0600");
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms).map_err(|e| PkiError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn restrict_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    // ----- users -----

    pub(crate) async fn insert_user(&self, username: String) -> Result<User> {
        db_transaction!(self.pool, |conn: &Connection| {
            let taken: Option<i64> = conn
                .query_row("SELECT id FROM users WHERE username = ?1", params![username], |row| row.get(0))
                .optional()?;
            if taken.is_some() {
                return Err(PkiError::conflict(format!("user {username} already exists")));
            }

            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
                params![username, created_at],
            )?;

            Ok(User { id: conn.last_insert_rowid(), username, created_at })
        })
    }

    pub(crate) async fn get_user(&self, id: i64) -> Result<User> {
        db_do!(self.pool, |conn: &Connection| {
            query_user(conn, id)
        })
    }

    // ----- certificate authorities -----

    /// Insert a CA as the active one, demoting the previous active CA in the same transaction.
    pub(crate) async fn insert_active_ca(&self, material: CertificateMaterial) -> Result<CertificateAuthority> {
        db_transaction!(self.pool, |conn: &Connection| {
            let demoted = conn.execute("UPDATE certificate_authorities SET is_active = 0 WHERE is_active = 1", [])?;
            trace!("Demoted {demoted} certificate authorities");

            conn.execute(
                "INSERT INTO certificate_authorities (certificate_pem, encrypted_private_key, common_name, fingerprint, key_size, not_valid_before, not_valid_after, is_active, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
                params![
                    material.certificate_pem,
                    material.encrypted_private_key,
                    material.common_name,
                    material.fingerprint,
                    material.key_size,
                    material.not_valid_before,
                    material.not_valid_after,
                    Utc::now()
                ],
            )?;

            query_ca(conn, conn.last_insert_rowid())
        })
    }

    pub(crate) async fn get_active_ca(&self) -> Result<Option<CertificateAuthority>> {
        db_do!(self.pool, |conn: &Connection| {
            Ok(conn
                .query_row(
                    &format!("SELECT {CA_COLUMNS} FROM certificate_authorities WHERE is_active = 1"),
                    [],
                    ca_from_row,
                )
                .optional()?)
        })
    }

    pub(crate) async fn get_ca(&self, id: i64) -> Result<CertificateAuthority> {
        db_do!(self.pool, |conn: &Connection| {
            query_ca(conn, id)
        })
    }

    /// All CAs, newest first.
    pub(crate) async fn list_cas(&self) -> Result<Vec<CertificateAuthority>> {
        db_do!(self.pool, |conn: &Connection| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CA_COLUMNS} FROM certificate_authorities ORDER BY created_at DESC, id DESC"
            ))?;
            let cas = stmt.query_map([], ca_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(cas)
        })
    }

    pub(crate) async fn deactivate_ca(&self, id: i64) -> Result<CertificateAuthority> {
        db_transaction!(self.pool, |conn: &Connection| {
            let ca = query_ca(conn, id)?;
            ca.state().check(EntityKind::CertificateAuthority, Transition::Deactivate, id)?;

            conn.execute("UPDATE certificate_authorities SET is_active = 0 WHERE id = ?1", params![id])?;
            Ok(CertificateAuthority { is_active: false, ..ca })
        })
    }

    /// Deletes an inactive CA together with every certificate it issued.
    pub(crate) async fn delete_ca(&self, id: i64) -> Result<()> {
        db_transaction!(self.pool, |conn: &Connection| {
            let ca = query_ca(conn, id)?;
            ca.state().check(EntityKind::CertificateAuthority, Transition::Expunge, id)?;

            conn.execute("DELETE FROM certificate_authorities WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    // ----- server certificates -----

    /// Insert a server certificate as the active one.
    ///
    /// Fails when `issuing_ca_id` is no longer the active CA at commit time.
    pub(crate) async fn insert_active_server_cert(&self, material: CertificateMaterial, issuing_ca_id: i64) -> Result<ServerCertificate> {
        db_transaction!(self.pool, |conn: &Connection| {
            ensure_signing_ca_active(conn, issuing_ca_id)?;

            let demoted = conn.execute("UPDATE server_certificates SET is_active = 0 WHERE is_active = 1", [])?;
            trace!("Demoted {demoted} server certificates");

            conn.execute(
                "INSERT INTO server_certificates (issuing_ca_id, certificate_pem, encrypted_private_key, common_name, fingerprint, key_size, san_entries, not_valid_before, not_valid_after, is_active, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)",
                params![
                    issuing_ca_id,
                    material.certificate_pem,
                    material.encrypted_private_key,
                    material.common_name,
                    material.fingerprint,
                    material.key_size,
                    serde_json::to_string(&material.san_entries)?,
                    material.not_valid_before,
                    material.not_valid_after,
                    Utc::now()
                ],
            )?;

            query_server_cert(conn, conn.last_insert_rowid())
        })
    }

    pub(crate) async fn get_active_server_cert(&self) -> Result<Option<ServerCertificate>> {
        db_do!(self.pool, |conn: &Connection| {
            Ok(conn
                .query_row(
                    &format!("SELECT {SERVER_COLUMNS} FROM server_certificates WHERE is_active = 1"),
                    [],
                    server_cert_from_row,
                )
                .optional()?)
        })
    }

    pub(crate) async fn get_server_cert(&self, id: i64) -> Result<ServerCertificate> {
        db_do!(self.pool, |conn: &Connection| {
            query_server_cert(conn, id)
        })
    }

    pub(crate) async fn list_server_certs(&self) -> Result<Vec<ServerCertificate>> {
        db_do!(self.pool, |conn: &Connection| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SERVER_COLUMNS} FROM server_certificates ORDER BY created_at DESC, id DESC"
            ))?;
            let certs = stmt.query_map([], server_cert_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(certs)
        })
    }

    pub(crate) async fn deactivate_server_cert(&self, id: i64) -> Result<ServerCertificate> {
        db_transaction!(self.pool, |conn: &Connection| {
            let cert = query_server_cert(conn, id)?;
            cert.state().check(EntityKind::Server, Transition::Deactivate, id)?;

            conn.execute("UPDATE server_certificates SET is_active = 0 WHERE id = ?1", params![id])?;
            Ok(ServerCertificate { is_active: false, ..cert })
        })
    }

    pub(crate) async fn delete_server_cert(&self, id: i64) -> Result<()> {
        db_transaction!(self.pool, |conn: &Connection| {
            let cert = query_server_cert(conn, id)?;
            cert.state().check(EntityKind::Server, Transition::Expunge, id)?;

            conn.execute("DELETE FROM server_certificates WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    // ----- client certificates -----

    /// Insert a client certificate as the user's active one; the previous one is deactivated, not revoked.
    pub(crate) async fn insert_active_client_cert(
        &self,
        material: CertificateMaterial,
        user_id: i64,
        issuing_ca_id: i64,
    ) -> Result<ClientCertificate> {
        db_transaction!(self.pool, |conn: &Connection| {
            query_user(conn, user_id)?;
            ensure_signing_ca_active(conn, issuing_ca_id)?;

            let demoted = conn.execute(
                "UPDATE client_certificates SET is_active = 0 WHERE user_id = ?1 AND is_active = 1",
                params![user_id],
            )?;
            trace!("Demoted {demoted} client certificates of user {user_id}");

            conn.execute(
                "INSERT INTO client_certificates (user_id, issuing_ca_id, certificate_pem, encrypted_private_key, common_name, fingerprint, key_size, serial_number, not_valid_before, not_valid_after, is_active, revoked, revoked_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, 0, NULL, ?11)",
                params![
                    user_id,
                    issuing_ca_id,
                    material.certificate_pem,
                    material.encrypted_private_key,
                    material.common_name,
                    material.fingerprint,
                    material.key_size,
                    material.serial_number,
                    material.not_valid_before,
                    material.not_valid_after,
                    Utc::now()
                ],
            )?;

            query_client_cert(conn, conn.last_insert_rowid())
        })
    }

    pub(crate) async fn get_client_cert(&self, id: i64) -> Result<ClientCertificate> {
        db_do!(self.pool, |conn: &Connection| {
            query_client_cert(conn, id)
        })
    }

    pub(crate) async fn get_active_client_cert(&self, user_id: i64) -> Result<Option<ClientCertificate>> {
        db_do!(self.pool, |conn: &Connection| {
            Ok(conn
                .query_row(
                    &format!("SELECT {CLIENT_COLUMNS} FROM client_certificates WHERE user_id = ?1 AND is_active = 1"),
                    params![user_id],
                    client_cert_from_row,
                )
                .optional()?)
        })
    }

    /// Client certificates, newest first.
    /// If user_id is Some, only certificates for that user are returned
    pub(crate) async fn list_client_certs(&self, user_id: Option<i64>) -> Result<Vec<ClientCertificate>> {
        db_do!(self.pool, |conn: &Connection| {
            let certs = match user_id {
                Some(user_id) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CLIENT_COLUMNS} FROM client_certificates WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
                    ))?;
                    let rows = stmt.query_map(params![user_id], client_cert_from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CLIENT_COLUMNS} FROM client_certificates ORDER BY created_at DESC, id DESC"
                    ))?;
                    let rows = stmt.query_map([], client_cert_from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(certs)
        })
    }

    pub(crate) async fn revoke_client_cert(&self, id: i64) -> Result<ClientCertificate> {
        db_transaction!(self.pool, |conn: &Connection| {
            let cert = query_client_cert(conn, id)?;
            cert.state().check(EntityKind::Client, Transition::Revoke, id)?;

            let revoked_at = Utc::now();
            conn.execute(
                "UPDATE client_certificates SET revoked = 1, is_active = 0, revoked_at = ?1 WHERE id = ?2",
                params![revoked_at, id],
            )?;
            Ok(ClientCertificate { revoked: true, is_active: false, revoked_at: Some(revoked_at), ..cert })
        })
    }

    pub(crate) async fn delete_client_cert(&self, id: i64) -> Result<()> {
        db_transaction!(self.pool, |conn: &Connection| {
            let cert = query_client_cert(conn, id)?;
            cert.state().check(EntityKind::Client, Transition::Expunge, id)?;

            conn.execute("DELETE FROM client_certificates WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Serial and revocation time of every revoked certificate issued by `ca_id`.
    pub(crate) async fn revoked_entries(&self, ca_id: i64) -> Result<Vec<RevokedEntry>> {
        db_do!(self.pool, |conn: &Connection| {
            let mut stmt = conn.prepare(
                "SELECT serial_number, revoked_at, created_at FROM client_certificates \
                 WHERE issuing_ca_id = ?1 AND revoked = 1 ORDER BY revoked_at, id",
            )?;
            let entries = stmt
                .query_map(params![ca_id], |row| {
                    let revoked_at: Option<chrono::DateTime<Utc>> = row.get("revoked_at")?;
                    Ok(RevokedEntry {
                        serial_number: row.get("serial_number")?,
                        revoked_at: match revoked_at {
                            Some(at) => at,
                            None => row.get("created_at")?,
                        },
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    // ----- any certificate kind -----

    pub(crate) async fn get_certificate_pem(&self, kind: EntityKind, id: i64) -> Result<String> {
        db_do!(self.pool, |conn: &Connection| {
            conn.query_row(
                &format!("SELECT certificate_pem FROM {} WHERE id = ?1", kind.table()),
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| PkiError::not_found(kind.label(), id))
        })
    }

    pub(crate) async fn get_sealed_private_key(&self, kind: EntityKind, id: i64) -> Result<Vec<u8>> {
        db_do!(self.pool, |conn: &Connection| {
            conn.query_row(
                &format!("SELECT encrypted_private_key FROM {} WHERE id = ?1", kind.table()),
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| PkiError::not_found(kind.label(), id))
        })
    }
}

/// The CA a leaf was signed with must still be the active one when the leaf is stored.
fn ensure_signing_ca_active(conn: &Connection, signing_ca_id: i64) -> Result<()> {
    let active: Option<i64> = conn
        .query_row("SELECT id FROM certificate_authorities WHERE is_active = 1", [], |row| row.get(0))
        .optional()?;
    match active {
        None => Err(PkiError::NoActiveCa),
        Some(id) if id == signing_ca_id => Ok(()),
        Some(id) => Err(PkiError::conflict(format!(
            "active certificate authority changed from {signing_ca_id} to {id} during issuance"
        ))),
    }
}

fn query_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        "SELECT id, username, created_at FROM users WHERE id = ?1",
        params![id],
        |row| {
            Ok(User {
                id: row.get("id")?,
                username: row.get("username")?,
                created_at: row.get("created_at")?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| PkiError::not_found("user", id))
}

fn query_ca(conn: &Connection, id: i64) -> Result<CertificateAuthority> {
    conn.query_row(
        &format!("SELECT {CA_COLUMNS} FROM certificate_authorities WHERE id = ?1"),
        params![id],
        ca_from_row,
    )
    .optional()?
    .ok_or_else(|| PkiError::not_found(EntityKind::CertificateAuthority.label(), id))
}

fn query_server_cert(conn: &Connection, id: i64) -> Result<ServerCertificate> {
    conn.query_row(
        &format!("SELECT {SERVER_COLUMNS} FROM server_certificates WHERE id = ?1"),
        params![id],
        server_cert_from_row,
    )
    .optional()?
    .ok_or_else(|| PkiError::not_found(EntityKind::Server.label(), id))
}

fn query_client_cert(conn: &Connection, id: i64) -> Result<ClientCertificate> {
    conn.query_row(
        &format!("SELECT {CLIENT_COLUMNS} FROM client_certificates WHERE id = ?1"),
        params![id],
        client_cert_from_row,
    )
    .optional()?
    .ok_or_else(|| PkiError::not_found(EntityKind::Client.label(), id))
}

fn ca_from_row(row: &Row) -> rusqlite::Result<CertificateAuthority> {
    Ok(CertificateAuthority {
        id: row.get("id")?,
        certificate_pem: row.get("certificate_pem")?,
        encrypted_private_key: row.get("encrypted_private_key")?,
        common_name: row.get("common_name")?,
        fingerprint: row.get("fingerprint")?,
        key_size: row.get("key_size")?,
        not_valid_before: row.get("not_valid_before")?,
        not_valid_after: row.get("not_valid_after")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

fn server_cert_from_row(row: &Row) -> rusqlite::Result<ServerCertificate> {
    let san_entries: String = row.get("san_entries")?;
    let san_entries = serde_json::from_str(&san_entries)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(ServerCertificate {
        id: row.get("id")?,
        issuing_ca_id: row.get("issuing_ca_id")?,
        certificate_pem: row.get("certificate_pem")?,
        encrypted_private_key: row.get("encrypted_private_key")?,
        common_name: row.get("common_name")?,
        fingerprint: row.get("fingerprint")?,
        key_size: row.get("key_size")?,
        san_entries,
        not_valid_before: row.get("not_valid_before")?,
        not_valid_after: row.get("not_valid_after")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

fn client_cert_from_row(row: &Row) -> rusqlite::Result<ClientCertificate> {
    Ok(ClientCertificate {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        issuing_ca_id: row.get("issuing_ca_id")?,
        certificate_pem: row.get("certificate_pem")?,
        encrypted_private_key: row.get("encrypted_private_key")?,
        common_name: row.get("common_name")?,
        fingerprint: row.get("fingerprint")?,
        key_size: row.get("key_size")?,
        serial_number: row.get("serial_number")?,
        not_valid_before: row.get("not_valid_before")?,
        not_valid_after: row.get("not_valid_after")?,
        is_active: row.get("is_active")?,
        revoked: row.get("revoked")?,
        revoked_at: row.get("revoked_at")?,
        created_at: row.get("created_at")?,
    })
}

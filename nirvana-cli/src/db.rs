//! `packages.db` schema (spec.md §6): a SQLite file recording installed
//! packages, modules, and the binaries/objects they export. Schema
//! creation runs in a single transaction with `PRAGMA user_version = 1`.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_PATH: &str = "/var/lib/packages.db";
const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("module {0:?} is not registered")]
    ModuleNotFound(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub struct PackageDb {
    conn: Connection,
}

impl PackageDb {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<(), DbError> {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS packages (
                id   INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS modules (
                id    INTEGER PRIMARY KEY,
                name  TEXT NOT NULL UNIQUE,
                flags INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS mod2pack (
                package INTEGER NOT NULL REFERENCES packages(id),
                module  INTEGER NOT NULL REFERENCES modules(id)
            );
            CREATE TABLE IF NOT EXISTS binaries (
                module   INTEGER NOT NULL REFERENCES modules(id),
                platform TEXT NOT NULL,
                path     TEXT NOT NULL UNIQUE,
                UNIQUE (module, platform)
            );
            CREATE TABLE IF NOT EXISTS objects (
                name    TEXT NOT NULL,
                version TEXT NOT NULL,
                module  INTEGER NOT NULL REFERENCES modules(id),
                flags   INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (name, version)
            );",
        )?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;
        Ok(())
    }

    fn module_id(&self, name: &str) -> Result<Option<i64>, DbError> {
        Ok(self
            .conn
            .query_row("SELECT id FROM modules WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?)
    }

    /// Registers `binary_path` as the module `name`'s binary for the host
    /// platform, creating the module row if it does not already exist.
    /// Mirrors `regmod`'s single-module, no-package registration path
    /// (spec.md §6 names only the table layout; `g_module.cpp`/
    /// `ModuleInfo.h` supply the module-identity model this builds on).
    pub fn register_module(&self, binary_path: &str, module_name: &str, platform: &str) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let module_id: i64 = match tx
            .query_row("SELECT id FROM modules WHERE name = ?1", params![module_name], |row| row.get(0))
            .optional()?
        {
            Some(id) => id,
            None => {
                tx.execute("INSERT INTO modules (name, flags) VALUES (?1, 0)", params![module_name])?;
                tx.last_insert_rowid()
            }
        };
        tx.execute(
            "INSERT INTO binaries (module, platform, path) VALUES (?1, ?2, ?3)
             ON CONFLICT (module, platform) DO UPDATE SET path = excluded.path",
            params![module_id, platform, binary_path],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn unregister_module(&self, module_name: &str) -> Result<(), DbError> {
        let module_id = self.module_id(module_name)?.ok_or_else(|| DbError::ModuleNotFound(module_name.to_string()))?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM objects WHERE module = ?1", params![module_id])?;
        tx.execute("DELETE FROM binaries WHERE module = ?1", params![module_id])?;
        tx.execute("DELETE FROM mod2pack WHERE module = ?1", params![module_id])?;
        tx.execute("DELETE FROM modules WHERE id = ?1", params![module_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_modules(&self) -> Result<Vec<ModuleRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT modules.name, binaries.platform, binaries.path
             FROM modules LEFT JOIN binaries ON binaries.module = modules.id
             ORDER BY modules.name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ModuleRow { name: row.get(0)?, platform: row.get(1)?, path: row.get(2)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRow {
    pub name: String,
    pub platform: Option<String>,
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_list_shows_module_and_binary() {
        let db = PackageDb::open_in_memory().unwrap();
        db.register_module("/usr/lib/nirvana/mymodule.so", "mymodule", "linux-x86_64").unwrap();
        let rows = db.list_modules().unwrap();
        assert_eq!(rows, vec![ModuleRow {
            name: "mymodule".into(),
            platform: Some("linux-x86_64".into()),
            path: Some("/usr/lib/nirvana/mymodule.so".into()),
        }]);
    }

    #[test]
    fn reregistering_same_platform_updates_path() {
        let db = PackageDb::open_in_memory().unwrap();
        db.register_module("/old/path.so", "m", "linux-x86_64").unwrap();
        db.register_module("/new/path.so", "m", "linux-x86_64").unwrap();
        let rows = db.list_modules().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].path.as_deref(), Some("/new/path.so"));
    }

    #[test]
    fn unregister_removes_module_and_binaries() {
        let db = PackageDb::open_in_memory().unwrap();
        db.register_module("/a.so", "m", "linux-x86_64").unwrap();
        db.unregister_module("m").unwrap();
        assert!(db.list_modules().unwrap().is_empty());
    }

    #[test]
    fn unregister_unknown_module_fails() {
        let db = PackageDb::open_in_memory().unwrap();
        assert!(matches!(db.unregister_module("missing"), Err(DbError::ModuleNotFound(_))));
    }

    #[test]
    fn schema_creation_is_idempotent_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.db");
        {
            let db = PackageDb::open(&path).unwrap();
            db.register_module("/a.so", "m", "linux-x86_64").unwrap();
        }
        let db = PackageDb::open(&path).unwrap();
        assert_eq!(db.list_modules().unwrap().len(), 1);
    }
}

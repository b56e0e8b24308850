//! Connection pool (spec.md §4.16-equivalent ambient DB layer), grounded
//! on `original_source/dbc/ConnectionPoolImpl.h`, `Pool.h` and
//! `PoolableConnection.h`.
//!
//! The original gates new-connection creation on an `Event` that blocks
//! once `cur_created_ >= max_create_` and is reset/signalled as slots
//! free up; here that becomes a `Condvar` wait on the same state lock
//! that tracks `cur_created`/`cur_size`, per the supplemented-features
//! note carried into the expanded specification.

use crate::error::{DbcError, SqlException};
use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

bitflags! {
    /// Mirrors `Manager`'s pool option bits in the original.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PoolOptions: u16 {
        const DO_NOT_SHARE_PREPARED = 0x0001;
    }
}

/// Driver-agnostic raw connection. Implemented by a concrete driver crate;
/// `nirvana-dbc` only knows how to pool and clean these up.
pub trait Connection: Send {
    fn auto_commit(&self) -> bool;
    fn set_auto_commit(&mut self, on: bool) -> Result<(), SqlException>;
    fn commit(&mut self) -> Result<(), SqlException>;
    fn rollback(&mut self, savepoint: Option<&str>) -> Result<(), SqlException>;
    fn set_savepoint(&mut self, name: &str) -> Result<(), SqlException>;
    fn release_savepoint(&mut self, name: &str) -> Result<(), SqlException>;
    fn catalog(&self) -> String;
    fn set_catalog(&mut self, catalog: &str) -> Result<(), SqlException>;
    fn schema(&self) -> String;
    fn set_schema(&mut self, schema: &str) -> Result<(), SqlException>;
    fn read_only(&self) -> bool;
    fn set_read_only(&mut self, ro: bool) -> Result<(), SqlException>;
    fn transaction_isolation(&self) -> u32;
    fn set_transaction_isolation(&mut self, level: u32) -> Result<(), SqlException>;
    fn create_statement(&mut self, result_set_type: u8) -> Result<Box<dyn Any + Send>, SqlException>;
    fn prepare_statement(&mut self, sql: &str, result_set_type: u8) -> Result<Box<dyn Any + Send>, SqlException>;
}

pub trait Driver: Send + Sync {
    fn connect(&self, url: &str, user: &str, password: &str) -> Result<Box<dyn Connection>, SqlException>;
}

#[derive(Default)]
struct StatementCache {
    /// Plain statements keyed by result-set type (stack per type, like the
    /// original's `StatementPool::types` array of `std::stack`).
    statements: HashMap<u8, Vec<Box<dyn Any + Send>>>,
    /// Prepared statements keyed by `(sql, result_set_type)`.
    prepared: HashMap<(String, u8), Vec<Box<dyn Any + Send>>>,
}

struct ConnectionData {
    conn: Box<dyn Connection>,
    savepoints: Vec<String>,
    cache: StatementCache,
    catalog: String,
    schema: String,
    read_only: bool,
    isolation: u32,
}

impl ConnectionData {
    fn new(conn: Box<dyn Connection>) -> Self {
        let catalog = conn.catalog();
        let schema = conn.schema();
        let read_only = conn.read_only();
        let isolation = conn.transaction_isolation();
        Self { conn, savepoints: Vec::new(), cache: StatementCache::default(), catalog, schema, read_only, isolation }
    }

    /// `PoolableConnection::cleanup`: clears cached prepared statements
    /// when `DO_NOT_SHARE_PREPARED` is set, releases any open savepoints,
    /// rolls back an in-progress transaction, and restores the session
    /// properties captured at checkout.
    fn cleanup(&mut self, options: PoolOptions) {
        if options.contains(PoolOptions::DO_NOT_SHARE_PREPARED) {
            self.cache.prepared.clear();
        }
        for sp in self.savepoints.drain(..) {
            if let Err(e) = self.conn.release_savepoint(&sp) {
                tracing::warn!(?e, "failed to release savepoint on cleanup");
            }
        }
        if !self.conn.auto_commit() {
            let _ = self.conn.rollback(None);
            let _ = self.conn.set_auto_commit(true);
        }
        let _ = self.conn.set_transaction_isolation(self.isolation);
        let _ = self.conn.set_catalog(&self.catalog);
        let _ = self.conn.set_schema(&self.schema);
        let _ = self.conn.set_read_only(self.read_only);
    }
}

struct PoolState {
    idle: Vec<ConnectionData>,
    cur_size: u32,
    cur_created: u32,
}

/// Pools connections for a single `(url, user, password)` triple. Mirrors
/// `ConnectionPoolImpl`'s `max_size`/`max_create`/`creation_timeout`
/// tunables and its pre-flight connect-once-to-validate-parameters step.
pub struct ConnectionPool {
    driver: Arc<dyn Driver>,
    url: String,
    user: String,
    password: String,
    max_size: Mutex<u32>,
    max_create: Mutex<u32>,
    creation_timeout: Mutex<Duration>,
    options: PoolOptions,
    state: Mutex<PoolState>,
    may_create: Condvar,
}

impl ConnectionPool {
    pub fn new(
        driver: Arc<dyn Driver>,
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        max_size: u32,
        max_create: u32,
        options: PoolOptions,
    ) -> Result<Arc<Self>, DbcError> {
        if max_create == 0 || max_create < max_size {
            return Err(DbcError::BadPoolConfig);
        }
        let url = url.into();
        let user = user.into();
        let password = password.into();
        let conn = driver.connect(&url, &user, &password).map_err(DbcError::Sql)?;
        let data = ConnectionData::new(conn);
        Ok(Arc::new(Self {
            driver,
            url,
            user,
            password,
            max_size: Mutex::new(max_size),
            max_create: Mutex::new(max_create),
            creation_timeout: Mutex::new(Duration::from_secs(u64::MAX / 2)),
            options,
            state: Mutex::new(PoolState { idle: vec![data], cur_size: 1, cur_created: 1 }),
            may_create: Condvar::new(),
        }))
    }

    pub fn max_size(&self) -> u32 {
        *self.max_size.lock()
    }

    /// Shrinking drops idle connections down to the new limit immediately
    /// (matches `maxSize(limit)` popping the idle stack).
    pub fn set_max_size(&self, limit: u32) {
        *self.max_size.lock() = limit;
        let mut state = self.state.lock();
        while state.cur_size > limit {
            state.cur_size -= 1;
            state.idle.pop();
        }
    }

    pub fn max_create(&self) -> u32 {
        *self.max_create.lock()
    }

    pub fn set_max_create(&self, limit: u32) -> Result<(), DbcError> {
        if limit == 0 {
            return Err(DbcError::BadPoolConfig);
        }
        let mut max_create = self.max_create.lock();
        let state = self.state.lock();
        if limit > *max_create && *max_create <= state.cur_created {
            self.may_create.notify_one();
        }
        *max_create = limit;
        Ok(())
    }

    pub fn creation_timeout(&self) -> Duration {
        *self.creation_timeout.lock()
    }

    pub fn set_creation_timeout(&self, timeout: Duration) {
        *self.creation_timeout.lock() = timeout;
    }

    pub fn connection_count(&self) -> u32 {
        self.state.lock().cur_created
    }

    /// `getConnection()`: reuse an idle connection, or create a new one
    /// gated by `max_create`, waiting on the slot-freed condvar when the
    /// creation cap is already reached.
    pub fn get_connection(self: &Arc<Self>) -> Result<PooledConnection, DbcError> {
        {
            let mut state = self.state.lock();
            if let Some(data) = state.idle.pop() {
                state.cur_size -= 1;
                return Ok(PooledConnection { pool: self.clone(), data: Some(data) });
            }
        }
        loop {
            let max_create = self.max_create();
            {
                let mut state = self.state.lock();
                if state.cur_created >= max_create {
                    let timeout = self.creation_timeout();
                    let result = self.may_create.wait_for(&mut state, timeout);
                    if result.timed_out() {
                        return Err(DbcError::CreateTimeout);
                    }
                    continue;
                }
            }
            let conn = self.driver.connect(&self.url, &self.user, &self.password).map_err(DbcError::Sql)?;
            let mut state = self.state.lock();
            state.cur_created += 1;
            if state.cur_created > max_create {
                state.cur_created -= 1;
                drop(state);
                drop(conn);
                continue;
            }
            let data = ConnectionData::new(conn);
            return Ok(PooledConnection { pool: self.clone(), data: Some(data) });
        }
    }

    fn release(&self, mut data: ConnectionData) {
        data.cleanup(self.options);
        let mut state = self.state.lock();
        if state.cur_size < self.max_size() {
            state.cur_size += 1;
            state.idle.push(data);
        } else {
            drop(data);
            let was_at_cap = state.cur_created == self.max_create();
            state.cur_created -= 1;
            if was_at_cap {
                self.may_create.notify_one();
            }
        }
    }
}

/// A checked-out connection. Returned to the pool (after cleanup) on
/// drop, mirroring `PoolableConnection::release_to_pool`.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    data: Option<ConnectionData>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("is_closed", &self.data.is_none())
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    fn data(&self) -> &ConnectionData {
        self.data.as_ref().expect("connection used after close")
    }

    fn data_mut(&mut self) -> &mut ConnectionData {
        self.data.as_mut().expect("connection used after close")
    }

    pub fn is_closed(&self) -> bool {
        self.data.is_none()
    }

    /// Returns the connection to the pool early instead of waiting for
    /// `Drop`.
    pub fn close(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }

    pub fn auto_commit(&self) -> bool {
        self.data().conn.auto_commit()
    }

    pub fn set_auto_commit(&mut self, on: bool) -> Result<(), DbcError> {
        self.data_mut().conn.set_auto_commit(on).map_err(DbcError::Sql)
    }

    pub fn commit(&mut self) -> Result<(), DbcError> {
        self.data_mut().conn.commit().map_err(DbcError::Sql)
    }

    pub fn catalog(&self) -> String {
        self.data().conn.catalog()
    }

    pub fn set_catalog(&mut self, catalog: &str) -> Result<(), DbcError> {
        self.data_mut().conn.set_catalog(catalog).map_err(DbcError::Sql)
    }

    pub fn schema(&self) -> String {
        self.data().conn.schema()
    }

    pub fn set_schema(&mut self, schema: &str) -> Result<(), DbcError> {
        self.data_mut().conn.set_schema(schema).map_err(DbcError::Sql)
    }

    pub fn is_read_only(&self) -> bool {
        self.data().conn.read_only()
    }

    pub fn set_read_only(&mut self, ro: bool) -> Result<(), DbcError> {
        self.data_mut().conn.set_read_only(ro).map_err(DbcError::Sql)
    }

    pub fn transaction_isolation(&self) -> u32 {
        self.data().conn.transaction_isolation()
    }

    pub fn set_transaction_isolation(&mut self, level: u32) -> Result<(), DbcError> {
        self.data_mut().conn.set_transaction_isolation(level).map_err(DbcError::Sql)
    }

    /// `setSavepoint`: on failure to track it locally, releases the
    /// savepoint it just created rather than leaking it (mirrors the
    /// original's catch-and-release-then-rethrow).
    pub fn set_savepoint(&mut self, name: &str) -> Result<(), DbcError> {
        let data = self.data_mut();
        data.conn.set_savepoint(name).map_err(DbcError::Sql)?;
        data.savepoints.push(name.to_string());
        Ok(())
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<(), DbcError> {
        let data = self.data_mut();
        data.conn.release_savepoint(name).map_err(DbcError::Sql)?;
        data.savepoints.retain(|s| s != name);
        Ok(())
    }

    pub fn rollback(&mut self, savepoint: Option<&str>) -> Result<(), DbcError> {
        self.data_mut().conn.rollback(savepoint).map_err(DbcError::Sql)
    }

    /// Reuses a cached statement handle for `result_set_type` if one is
    /// idle, else asks the driver for a fresh one.
    pub fn create_statement(&mut self, result_set_type: u8) -> Result<Box<dyn Any + Send>, DbcError> {
        let data = self.data_mut();
        if let Some(stmt) = data.cache.statements.get_mut(&result_set_type).and_then(Vec::pop) {
            return Ok(stmt);
        }
        data.conn.create_statement(result_set_type).map_err(DbcError::Sql)
    }

    /// Reuses a cached prepared-statement handle keyed by `(sql,
    /// result_set_type)` if one is idle, else prepares a fresh one.
    pub fn prepare_statement(&mut self, sql: &str, result_set_type: u8) -> Result<Box<dyn Any + Send>, DbcError> {
        let data = self.data_mut();
        let key = (sql.to_string(), result_set_type);
        if let Some(stmt) = data.cache.prepared.get_mut(&key).and_then(Vec::pop) {
            return Ok(stmt);
        }
        data.conn.prepare_statement(sql, result_set_type).map_err(DbcError::Sql)
    }

    /// Returns a statement handle to this connection's cache instead of
    /// letting the driver drop it (the pooling half of `RefPool`).
    pub fn return_statement(&mut self, result_set_type: u8, stmt: Box<dyn Any + Send>) {
        self.data_mut().cache.statements.entry(result_set_type).or_default().push(stmt);
    }

    pub fn return_prepared_statement(&mut self, sql: &str, result_set_type: u8, stmt: Box<dyn Any + Send>) {
        self.data_mut().cache.prepared.entry((sql.to_string(), result_set_type)).or_default().push(stmt);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeConnection {
        auto_commit: bool,
        catalog: String,
        schema: String,
        read_only: bool,
        isolation: u32,
    }

    impl Connection for FakeConnection {
        fn auto_commit(&self) -> bool {
            self.auto_commit
        }
        fn set_auto_commit(&mut self, on: bool) -> Result<(), SqlException> {
            self.auto_commit = on;
            Ok(())
        }
        fn commit(&mut self) -> Result<(), SqlException> {
            Ok(())
        }
        fn rollback(&mut self, _savepoint: Option<&str>) -> Result<(), SqlException> {
            Ok(())
        }
        fn set_savepoint(&mut self, _name: &str) -> Result<(), SqlException> {
            Ok(())
        }
        fn release_savepoint(&mut self, _name: &str) -> Result<(), SqlException> {
            Ok(())
        }
        fn catalog(&self) -> String {
            self.catalog.clone()
        }
        fn set_catalog(&mut self, catalog: &str) -> Result<(), SqlException> {
            self.catalog = catalog.to_string();
            Ok(())
        }
        fn schema(&self) -> String {
            self.schema.clone()
        }
        fn set_schema(&mut self, schema: &str) -> Result<(), SqlException> {
            self.schema = schema.to_string();
            Ok(())
        }
        fn read_only(&self) -> bool {
            self.read_only
        }
        fn set_read_only(&mut self, ro: bool) -> Result<(), SqlException> {
            self.read_only = ro;
            Ok(())
        }
        fn transaction_isolation(&self) -> u32 {
            self.isolation
        }
        fn set_transaction_isolation(&mut self, level: u32) -> Result<(), SqlException> {
            self.isolation = level;
            Ok(())
        }
        fn create_statement(&mut self, _result_set_type: u8) -> Result<Box<dyn Any + Send>, SqlException> {
            Ok(Box::new(()))
        }
        fn prepare_statement(&mut self, _sql: &str, _result_set_type: u8) -> Result<Box<dyn Any + Send>, SqlException> {
            Ok(Box::new(()))
        }
    }

    struct FakeDriver {
        created: AtomicU32,
    }

    impl Driver for FakeDriver {
        fn connect(&self, _url: &str, _user: &str, _password: &str) -> Result<Box<dyn Connection>, SqlException> {
            self.created.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(FakeConnection {
                auto_commit: true,
                catalog: "c".into(),
                schema: "s".into(),
                read_only: false,
                isolation: 0,
            }))
        }
    }

    fn pool(max_size: u32, max_create: u32) -> Arc<ConnectionPool> {
        let driver = Arc::new(FakeDriver { created: AtomicU32::new(0) });
        ConnectionPool::new(driver, "url", "user", "pw", max_size, max_create, PoolOptions::empty()).unwrap()
    }

    #[test]
    fn rejects_bad_pool_config() {
        let driver = Arc::new(FakeDriver { created: AtomicU32::new(0) });
        assert!(matches!(
            ConnectionPool::new(driver.clone(), "u", "a", "b", 5, 0, PoolOptions::empty()),
            Err(DbcError::BadPoolConfig)
        ));
        assert!(matches!(
            ConnectionPool::new(driver, "u", "a", "b", 5, 3, PoolOptions::empty()),
            Err(DbcError::BadPoolConfig)
        ));
    }

    #[test]
    fn reuses_released_connection_instead_of_creating_another() {
        let p = pool(2, 2);
        assert_eq!(p.connection_count(), 1);
        {
            let _c = p.get_connection().unwrap();
            assert_eq!(p.connection_count(), 1);
        }
        let _c2 = p.get_connection().unwrap();
        assert_eq!(p.connection_count(), 1);
    }

    #[test]
    fn creation_times_out_once_cap_reached_and_none_idle() {
        let p = pool(1, 1);
        p.set_creation_timeout(Duration::from_millis(20));
        let _held = p.get_connection().unwrap();
        let err = p.get_connection().unwrap_err();
        assert!(matches!(err, DbcError::CreateTimeout));
    }

    #[test]
    fn releasing_a_connection_wakes_a_waiter() {
        let p = pool(1, 1);
        p.set_creation_timeout(Duration::from_secs(5));
        let held = p.get_connection().unwrap();
        let p2 = p.clone();
        let waiter = std::thread::spawn(move || p2.get_connection().map(|_| ()));
        std::thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn shrinking_max_size_drops_idle_connections() {
        let p = pool(2, 2);
        {
            let _a = p.get_connection().unwrap();
            let _b = p.get_connection().unwrap();
        }
        assert_eq!(p.connection_count(), 2);
        p.set_max_size(0);
        assert_eq!(p.state.lock().idle.len(), 0);
    }

    #[test]
    fn statement_cache_reuses_handles_per_connection() {
        let p = pool(1, 1);
        let mut c = p.get_connection().unwrap();
        let stmt = c.create_statement(0).unwrap();
        c.return_statement(0, stmt);
        assert_eq!(c.data().cache.statements.get(&0).map(Vec::len), Some(1));
        let _reused = c.create_statement(0).unwrap();
        assert_eq!(c.data().cache.statements.get(&0).map(Vec::len), Some(0));
    }
}

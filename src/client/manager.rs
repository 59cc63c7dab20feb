//! Managed connection to a single server endpoint
//!
//! Owns the resolved dial target (including a runtime redirect override,
//! as used by cluster topologies), a pool of live connections keyed by
//! connection string, and the retry-wrapped command dispatch path.
//!
//! One manager serves one logical owner: every operation takes `&mut self`
//! and blocks the calling thread. Callers that need concurrency provision
//! one manager per user.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::utils::{resp, ClientError, CommandError, ConnectionError, RespValue, Result};

use super::raw_connection::ValkeyConnector;
use super::transport::{Connector, DialTarget, Transport};

type AfterOpenHook = Box<dyn FnMut()>;

/// Managed connection to one Valkey/Redis endpoint.
pub struct ConnectionManager<C: Connector = ValkeyConnector> {
    config: ConnectionConfig,
    connector: C,
    /// Runtime override of the dial target (`"host:port"`), e.g. after a
    /// cluster redirect. Persists until changed.
    redirect: Option<String>,
    /// Live connections keyed by connection string. At most one entry per
    /// resolved target; pre-redirect entries linger until [`close`].
    ///
    /// [`close`]: ConnectionManager::close
    pool: HashMap<String, C::Conn>,
    after_open: Option<AfterOpenHook>,
}

impl ConnectionManager<ValkeyConnector> {
    /// Manager backed by the built-in TCP/Unix/TLS driver.
    pub fn new(config: ConnectionConfig) -> Self {
        let connector = ValkeyConnector::from_config(&config);
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Manager backed by a caller-supplied driver.
    pub fn with_connector(config: ConnectionConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            redirect: None,
            pool: HashMap::new(),
            after_open: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Mutable access to the configuration. Changes to the endpoint fields
    /// affect the next resolution; an open connection to the previous
    /// target stays pooled until [`close`](Self::close).
    pub fn config_mut(&mut self) -> &mut ConnectionConfig {
        &mut self.config
    }

    /// Register the callback invoked once per successful open, e.g. to
    /// re-subscribe per-connection state after a reconnect.
    pub fn on_after_open(&mut self, hook: impl FnMut() + 'static) {
        self.after_open = Some(Box::new(hook));
    }

    // ----- address resolution -----

    /// Canonical string identifying the endpoint currently in effect.
    ///
    /// `unix://<path>` when a unix socket is configured, else
    /// `tcp://<redirect or hostname:port>`. Recomputed on every call so a
    /// redirect takes effect immediately.
    pub fn connection_string(&self) -> String {
        if let Some(ref path) = self.config.unix_socket {
            return format!("unix://{}", path.display());
        }
        match self.redirect {
            Some(ref target) => format!("tcp://{}", target),
            None => format!("tcp://{}:{}", self.config.hostname, self.config.port),
        }
    }

    fn dial_target(&self) -> std::result::Result<DialTarget, ConnectionError> {
        if let Some(ref path) = self.config.unix_socket {
            return Ok(DialTarget::Unix { path: path.clone() });
        }
        match self.redirect {
            Some(ref target) => parse_redirect_target(target),
            None => Ok(DialTarget::Tcp {
                host: self.config.hostname.clone(),
                port: self.config.port,
            }),
        }
    }

    // ----- redirect interface -----

    /// Override the dial target. Takes effect on the next resolution; the
    /// caller triggers a close/reopen to migrate an open connection.
    pub fn set_redirect(&mut self, target: Option<String>) {
        self.redirect = target;
    }

    pub fn redirect(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    /// Recognize a MOVED/ASK error and install its target as the redirect.
    ///
    /// Returns true when a redirect was installed. The caller decides when
    /// to re-dispatch; the stale pool entry remains until
    /// [`close`](Self::close).
    pub fn follow_redirect(&mut self, error: &ClientError) -> bool {
        let ClientError::Command(CommandError::Server(message)) = error else {
            return false;
        };
        match resp::parse_redirect(message) {
            Some((host, port)) => {
                debug!(host = %host, port, "following cluster redirect");
                self.redirect = Some(format!("{}:{}", host, port));
                true
            }
            None => false,
        }
    }

    // ----- pool & lifecycle -----

    /// Whether a live handle exists for the current resolved target. A
    /// stale entry under a pre-redirect key does not count.
    pub fn is_active(&self) -> bool {
        self.pool.contains_key(&self.connection_string())
    }

    /// Number of pooled handles, current and stale.
    pub fn pooled_connections(&self) -> usize {
        self.pool.len()
    }

    /// Pool keys, for inspection.
    pub fn pooled_targets(&self) -> impl Iterator<Item = &str> {
        self.pool.keys().map(String::as_str)
    }

    /// Establish the connection if it is not already established.
    ///
    /// Dial, then AUTH when a password is configured, then SELECT when a
    /// database is configured. The handle is pooled only after all three
    /// steps succeed, and the after-open callback runs exactly once per
    /// successful open. Never retries; retry policy lives in
    /// [`execute`](Self::execute).
    pub fn open(&mut self) -> std::result::Result<(), ConnectionError> {
        if self.is_active() {
            return Ok(());
        }

        let key = self.connection_string();
        let target = self.dial_target()?;
        debug!(target = %key, database = ?self.config.database, "opening connection");

        let mut conn = self.connector.dial(&target)?;
        if let Some(ref password) = self.config.password {
            conn.authenticate(password)?;
        }
        if let Some(database) = self.config.database {
            conn.select_db(database)?;
        }
        self.pool.insert(key, conn);

        if let Some(hook) = self.after_open.as_mut() {
            hook();
        }
        Ok(())
    }

    /// Close every pooled handle and empty the pool.
    ///
    /// Teardown is best effort: a handle that fails to shut down cleanly
    /// is still discarded. Safe to call on an empty pool.
    pub fn close(&mut self) {
        for (key, mut conn) in self.pool.drain() {
            debug!(target = %key, "closing connection");
            conn.shutdown();
        }
    }

    /// Explicit teardown before the manager crosses a process or
    /// persistence boundary.
    pub fn prepare_for_handoff(&mut self) {
        self.close();
    }

    // ----- dispatch -----

    /// Execute one command through the managed connection.
    ///
    /// The uniform entry point for any store command by name; see
    /// [`execute_binary`](Self::execute_binary) for the retry semantics.
    pub fn execute(&mut self, command: &str, args: &[&str]) -> Result<RespValue> {
        let mut raw: Vec<&[u8]> = Vec::with_capacity(args.len() + 1);
        raw.push(command.as_bytes());
        raw.extend(args.iter().map(|a| a.as_bytes()));
        self.execute_binary(&raw)
    }

    /// Execute one command with binary arguments.
    ///
    /// Opens the connection if needed. With a nonzero retry budget, each
    /// transiently failed attempt tears the pool down, sleeps for the
    /// retry interval, reopens, and tries again, for up to `retries`
    /// guarded attempts followed by one final attempt whose outcome is
    /// returned untouched. Server-reported errors propagate immediately
    /// and never consume a retry.
    pub fn execute_binary(&mut self, args: &[&[u8]]) -> Result<RespValue> {
        self.open()?;

        if self.config.retries > 0 {
            let mut tries = self.config.retries;
            while tries > 0 {
                tries -= 1;
                match self.invoke_current(args) {
                    Err(CommandError::Transient(err)) => {
                        warn!(error = %err, "command failed on established connection, reconnecting");
                        self.cycle_connection()?;
                    }
                    other => return other.map_err(ClientError::from),
                }
            }
        }

        self.invoke_current(args).map_err(ClientError::from)
    }

    /// Tear down and reopen between retry attempts. The retry budget is
    /// zeroed for the duration so the cycle itself is never retried, and
    /// restored before any error propagates.
    fn cycle_connection(&mut self) -> std::result::Result<(), ConnectionError> {
        let saved = mem::replace(&mut self.config.retries, 0);
        self.close();
        if self.config.retry_interval > Duration::ZERO {
            thread::sleep(self.config.retry_interval);
        }
        let reopened = self.open();
        self.config.retries = saved;
        reopened
    }

    /// Forward one command to the pooled handle for the current target.
    fn invoke_current(
        &mut self,
        args: &[&[u8]],
    ) -> std::result::Result<RespValue, CommandError> {
        let key = self.connection_string();
        let conn = self.pool.get_mut(&key).ok_or_else(|| {
            CommandError::Transient(io::Error::new(
                io::ErrorKind::NotConnected,
                "no pooled connection for target",
            ))
        })?;

        match conn.invoke(args) {
            Ok(RespValue::Error(message)) => Err(CommandError::Server(message)),
            Ok(value) => Ok(value),
            Err(err) => Err(CommandError::Transient(err)),
        }
    }
}

fn parse_redirect_target(target: &str) -> std::result::Result<DialTarget, ConnectionError> {
    let parsed = target.rsplit_once(':').and_then(|(host, port)| {
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        Some(DialTarget::Tcp {
            host: host.to_string(),
            port,
        })
    });

    parsed.ok_or_else(|| ConnectionError::ConnectFailed {
        target: format!("tcp://{}", target),
        source: io::Error::new(io::ErrorKind::InvalidInput, "redirect target is not host:port"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Instant;

    /// Scripted outcome for one invoke attempt.
    enum Step {
        Reply(RespValue),
        TransportError,
        ServerError(&'static str),
    }

    #[derive(Default)]
    struct Log {
        dials: usize,
        dialed_targets: Vec<String>,
        invokes: usize,
        shutdowns: usize,
        auths: usize,
        selects: Vec<u32>,
    }

    struct MockConn {
        log: Rc<RefCell<Log>>,
        script: Rc<RefCell<VecDeque<Step>>>,
        fail_auth: bool,
        fail_select: bool,
    }

    impl Transport for MockConn {
        fn invoke(&mut self, _args: &[&[u8]]) -> io::Result<RespValue> {
            self.log.borrow_mut().invokes += 1;
            match self.script.borrow_mut().pop_front() {
                Some(Step::Reply(value)) => Ok(value),
                Some(Step::TransportError) => Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "peer reset connection",
                )),
                Some(Step::ServerError(message)) => Ok(RespValue::Error(message.to_string())),
                None => Ok(RespValue::SimpleString("OK".to_string())),
            }
        }

        fn shutdown(&mut self) {
            self.log.borrow_mut().shutdowns += 1;
        }

        fn authenticate(&mut self, _password: &str) -> std::result::Result<(), ConnectionError> {
            self.log.borrow_mut().auths += 1;
            if self.fail_auth {
                return Err(ConnectionError::AuthFailed("invalid password".to_string()));
            }
            Ok(())
        }

        fn select_db(&mut self, database: u32) -> std::result::Result<(), ConnectionError> {
            self.log.borrow_mut().selects.push(database);
            if self.fail_select {
                return Err(ConnectionError::SelectFailed {
                    database,
                    reason: "out of range".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockConnector {
        log: Rc<RefCell<Log>>,
        script: Rc<RefCell<VecDeque<Step>>>,
        /// Dials beyond this count fail; `None` means always succeed.
        dials_allowed: Option<usize>,
        fail_auth: bool,
        fail_select: bool,
    }

    impl MockConnector {
        fn scripted(steps: Vec<Step>) -> Self {
            Self {
                script: Rc::new(RefCell::new(steps.into())),
                ..Self::default()
            }
        }

        fn log(&self) -> Rc<RefCell<Log>> {
            self.log.clone()
        }
    }

    impl Connector for MockConnector {
        type Conn = MockConn;

        fn dial(&self, target: &DialTarget) -> std::result::Result<MockConn, ConnectionError> {
            let mut log = self.log.borrow_mut();
            if let Some(allowed) = self.dials_allowed {
                if log.dials >= allowed {
                    return Err(ConnectionError::ConnectFailed {
                        target: target.connection_string(),
                        source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
                    });
                }
            }
            log.dials += 1;
            log.dialed_targets.push(target.connection_string());
            Ok(MockConn {
                log: self.log.clone(),
                script: self.script.clone(),
                fail_auth: self.fail_auth,
                fail_select: self.fail_select,
            })
        }
    }

    fn manager_with(
        config: ConnectionConfig,
        connector: MockConnector,
    ) -> (ConnectionManager<MockConnector>, Rc<RefCell<Log>>) {
        let log = connector.log();
        (ConnectionManager::with_connector(config, connector), log)
    }

    fn default_config() -> ConnectionConfig {
        // database: None keeps the mock free of SELECT traffic unless a
        // test opts in
        ConnectionConfig {
            database: None,
            ..ConnectionConfig::default()
        }
    }

    #[test]
    fn open_is_idempotent() {
        let (mut manager, log) = manager_with(default_config(), MockConnector::default());

        assert!(!manager.is_active());
        manager.open().unwrap();
        assert!(manager.is_active());
        manager.open().unwrap();

        assert_eq!(log.borrow().dials, 1);
    }

    #[test]
    fn open_runs_auth_and_select_once() {
        let config = ConnectionConfig {
            password: Some("hunter2".to_string()),
            database: Some(3),
            ..ConnectionConfig::default()
        };
        let (mut manager, log) = manager_with(config, MockConnector::default());

        manager.open().unwrap();
        manager.open().unwrap();

        let log = log.borrow();
        assert_eq!(log.dials, 1);
        assert_eq!(log.auths, 1);
        assert_eq!(log.selects, vec![3]);
    }

    #[test]
    fn failed_auth_leaves_pool_empty() {
        let config = ConnectionConfig {
            password: Some("wrong".to_string()),
            ..default_config()
        };
        let connector = MockConnector {
            fail_auth: true,
            ..MockConnector::default()
        };
        let (mut manager, _log) = manager_with(config, connector);

        let opened = Rc::new(Cell::new(0));
        let counter = opened.clone();
        manager.on_after_open(move || counter.set(counter.get() + 1));

        match manager.open() {
            Err(ConnectionError::AuthFailed(_)) => {}
            other => panic!("expected AuthFailed, got {:?}", other),
        }
        assert!(!manager.is_active());
        assert_eq!(manager.pooled_connections(), 0);
        assert_eq!(opened.get(), 0);
    }

    #[test]
    fn failed_select_leaves_pool_empty() {
        let config = ConnectionConfig {
            database: Some(99),
            ..ConnectionConfig::default()
        };
        let connector = MockConnector {
            fail_select: true,
            ..MockConnector::default()
        };
        let (mut manager, _log) = manager_with(config, connector);

        match manager.open() {
            Err(ConnectionError::SelectFailed { database: 99, .. }) => {}
            other => panic!("expected SelectFailed, got {:?}", other),
        }
        assert_eq!(manager.pooled_connections(), 0);
    }

    #[test]
    fn close_on_empty_pool_is_a_noop() {
        let (mut manager, log) = manager_with(default_config(), MockConnector::default());

        manager.close();
        manager.close();

        assert_eq!(manager.pooled_connections(), 0);
        assert_eq!(log.borrow().shutdowns, 0);
    }

    #[test]
    fn close_drains_every_entry_once() {
        let (mut manager, log) = manager_with(default_config(), MockConnector::default());

        manager.open().unwrap();
        manager.set_redirect(Some("10.0.0.9:6380".to_string()));
        manager.open().unwrap();
        assert_eq!(manager.pooled_connections(), 2);

        manager.close();
        assert_eq!(manager.pooled_connections(), 0);
        assert_eq!(log.borrow().shutdowns, 2);

        manager.close();
        assert_eq!(log.borrow().shutdowns, 2);
    }

    #[test]
    fn redirect_creates_second_pool_entry() {
        let (mut manager, log) = manager_with(default_config(), MockConnector::default());

        manager.open().unwrap();
        assert!(manager
            .pooled_targets()
            .any(|t| t == "tcp://localhost:6379"));

        manager.set_redirect(Some("10.0.0.9:6380".to_string()));
        assert!(!manager.is_active());

        manager.open().unwrap();
        assert!(manager.is_active());
        assert_eq!(manager.pooled_connections(), 2);
        assert!(manager.pooled_targets().any(|t| t == "tcp://10.0.0.9:6380"));
        assert!(manager
            .pooled_targets()
            .any(|t| t == "tcp://localhost:6379"));

        let log = log.borrow();
        assert_eq!(log.dials, 2);
        assert_eq!(
            log.dialed_targets,
            vec!["tcp://localhost:6379", "tcp://10.0.0.9:6380"]
        );
    }

    #[test]
    fn unix_socket_takes_precedence() {
        let config = ConnectionConfig {
            unix_socket: Some("/var/run/valkey.sock".into()),
            ..default_config()
        };
        let (mut manager, _log) = manager_with(config, MockConnector::default());

        manager.set_redirect(Some("10.0.0.9:6380".to_string()));
        assert_eq!(manager.connection_string(), "unix:///var/run/valkey.sock");
    }

    #[test]
    fn malformed_redirect_fails_at_dial_time() {
        let (mut manager, _log) = manager_with(default_config(), MockConnector::default());

        manager.set_redirect(Some("not-an-address".to_string()));
        match manager.open() {
            Err(ConnectionError::ConnectFailed { target, .. }) => {
                assert_eq!(target, "tcp://not-an-address");
            }
            other => panic!("expected ConnectFailed, got {:?}", other),
        }
    }

    #[test]
    fn retry_exhaustion_makes_retries_plus_one_attempts() {
        let config = ConnectionConfig {
            retries: 2,
            ..default_config()
        };
        let connector = MockConnector::scripted(vec![
            Step::TransportError,
            Step::TransportError,
            Step::TransportError,
        ]);
        let (mut manager, log) = manager_with(config, connector);

        let err = manager.execute("GET", &["a"]).unwrap_err();
        assert!(err.is_transient());

        let log = log.borrow();
        assert_eq!(log.invokes, 3, "retries + 1 total attempts");
        assert_eq!(log.shutdowns, 2, "one teardown per guarded retry");
        assert_eq!(log.dials, 3, "initial open plus one reopen per retry");
        assert_eq!(manager.config().retries, 2, "budget restored after the loop");
    }

    #[test]
    fn retry_recovers_after_transient_failures() {
        let config = ConnectionConfig {
            retries: 3,
            ..default_config()
        };
        let connector = MockConnector::scripted(vec![
            Step::TransportError,
            Step::TransportError,
            Step::Reply(RespValue::Integer(7)),
        ]);
        let (mut manager, log) = manager_with(config, connector);

        let value = manager.execute("INCR", &["counter"]).unwrap();
        assert_eq!(value, RespValue::Integer(7));

        let log = log.borrow();
        assert_eq!(log.invokes, 3);
        assert_eq!(log.shutdowns, 2, "exactly one reopen cycle per failure");
        assert_eq!(log.dials, 3);
    }

    #[test]
    fn zero_retries_propagates_first_failure() {
        let connector = MockConnector::scripted(vec![Step::TransportError]);
        let (mut manager, log) = manager_with(default_config(), connector);

        let err = manager.execute("GET", &["a"]).unwrap_err();
        assert!(err.is_transient());

        let log = log.borrow();
        assert_eq!(log.invokes, 1);
        assert_eq!(log.shutdowns, 0, "no reopen cycles without a retry budget");
        assert_eq!(log.dials, 1);
    }

    #[test]
    fn server_errors_never_consume_a_retry() {
        let config = ConnectionConfig {
            retries: 3,
            ..default_config()
        };
        let connector =
            MockConnector::scripted(vec![Step::ServerError("ERR wrong number of arguments")]);
        let (mut manager, log) = manager_with(config, connector);

        match manager.execute("SET", &["a"]) {
            Err(ClientError::Command(CommandError::Server(message))) => {
                assert!(message.contains("wrong number of arguments"));
            }
            other => panic!("expected server error, got {:?}", other),
        }

        let log = log.borrow();
        assert_eq!(log.invokes, 1);
        assert_eq!(log.shutdowns, 0);
        assert_eq!(log.dials, 1);
    }

    #[test]
    fn retry_sleeps_for_the_configured_interval() {
        let interval = Duration::from_millis(5);
        let config = ConnectionConfig {
            retries: 2,
            retry_interval: interval,
            ..default_config()
        };
        let connector = MockConnector::scripted(vec![
            Step::TransportError,
            Step::TransportError,
            Step::Reply(RespValue::Null),
        ]);
        let (mut manager, _log) = manager_with(config, connector);

        let started = Instant::now();
        manager.execute("GET", &["a"]).unwrap();
        assert!(started.elapsed() >= interval * 2);
    }

    #[test]
    fn reopen_failure_mid_retry_propagates_and_restores_budget() {
        let config = ConnectionConfig {
            retries: 2,
            ..default_config()
        };
        let connector = MockConnector {
            script: Rc::new(RefCell::new(VecDeque::from([Step::TransportError]))),
            dials_allowed: Some(1),
            ..MockConnector::default()
        };
        let (mut manager, log) = manager_with(config, connector);

        match manager.execute("GET", &["a"]) {
            Err(ClientError::Connection(ConnectionError::ConnectFailed { .. })) => {}
            other => panic!("expected ConnectFailed, got {:?}", other),
        }
        assert_eq!(manager.config().retries, 2, "budget restored on the error path");
        assert_eq!(log.borrow().invokes, 1);
    }

    #[test]
    fn after_open_hook_fires_once_per_open() {
        let config = ConnectionConfig {
            retries: 1,
            ..default_config()
        };
        let connector = MockConnector::scripted(vec![
            Step::TransportError,
            Step::Reply(RespValue::SimpleString("OK".to_string())),
        ]);
        let (mut manager, _log) = manager_with(config, connector);

        let opened = Rc::new(Cell::new(0));
        let counter = opened.clone();
        manager.on_after_open(move || counter.set(counter.get() + 1));

        manager.open().unwrap();
        manager.open().unwrap();
        assert_eq!(opened.get(), 1);

        // the guarded retry reopens exactly once more
        manager.execute("SET", &["a", "1"]).unwrap();
        assert_eq!(opened.get(), 2);
    }

    #[test]
    fn follow_redirect_parses_moved_errors() {
        let (mut manager, _log) = manager_with(default_config(), MockConnector::default());

        let moved = ClientError::Command(CommandError::Server(
            "MOVED 3999 127.0.0.1:7001".to_string(),
        ));
        assert!(manager.follow_redirect(&moved));
        assert_eq!(manager.redirect(), Some("127.0.0.1:7001"));
        assert_eq!(manager.connection_string(), "tcp://127.0.0.1:7001");

        let plain = ClientError::Command(CommandError::Server("ERR unknown command".to_string()));
        assert!(!manager.follow_redirect(&plain));
        assert_eq!(manager.redirect(), Some("127.0.0.1:7001"));
    }

    #[test]
    fn handoff_closes_the_pool() {
        let (mut manager, log) = manager_with(default_config(), MockConnector::default());

        manager.open().unwrap();
        manager.prepare_for_handoff();

        assert!(!manager.is_active());
        assert_eq!(log.borrow().shutdowns, 1);
    }
}

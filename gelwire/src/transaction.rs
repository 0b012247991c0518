//! The [`TransactionCoordinator`] type.
use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use crate::{
    Error, Result,
    codec::Value,
    common::verbose,
    connection::{Config, Connection},
    protocol::{Capabilities, Cardinality, IoFormat},
};

/// Isolation level of a transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    Serializable,
    RepeatableRead,
}

/// Options used to start every attempt of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionSettings {
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub deferrable: bool,
    /// How many times a retryable failure re-runs the whole transaction.
    pub retry_attempts: u32,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            read_only: false,
            deferrable: false,
            retry_attempts: 3,
        }
    }
}

impl TransactionSettings {
    /// The `start transaction` statement.
    pub fn statement(&self) -> String {
        let isolation = match self.isolation {
            IsolationLevel::Serializable => "serializable",
            IsolationLevel::RepeatableRead => "repeatable read",
        };
        let access = if self.read_only { "read only" } else { "read write" };
        let deferrable = if self.deferrable { "deferrable" } else { "not deferrable" };
        format!("start transaction isolation {isolation}, {access}, {deferrable}")
    }
}

impl From<&Config> for TransactionSettings {
    fn from(config: &Config) -> Self {
        Self { retry_attempts: config.retry_attempts(), ..Default::default() }
    }
}

/// A client which can run transaction control statements.
pub trait Transactable {
    fn start(&mut self, settings: &TransactionSettings) -> impl Future<Output = Result<()>>;

    fn commit(&mut self) -> impl Future<Output = Result<()>>;

    fn rollback(&mut self) -> impl Future<Output = Result<()>>;
}

impl Connection {
    async fn control(&mut self, statement: &str) -> Result<()> {
        self.execute_query(
            statement,
            &Value::Nothing,
            Capabilities::TRANSACTION,
            Cardinality::NoResult,
            IoFormat::None,
        )
        .await?;
        Ok(())
    }
}

impl Transactable for Connection {
    async fn start(&mut self, settings: &TransactionSettings) -> Result<()> {
        self.control(&settings.statement()).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.control("commit").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.control("rollback").await
    }
}

/// Handle to the client inside one transaction attempt.
pub struct Transaction<'a, C> {
    client: &'a mut C,
    attempt: u32,
}

impl<C> Transaction<'_, C> {
    /// Attempt number, starting from 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl<C> Deref for Transaction<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.client
    }
}

impl<C> DerefMut for Transaction<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.client
    }
}

/// Error from [`TransactionCoordinator::run`].
pub enum TransactionError {
    /// Retryable failures exceeded the configured attempts.
    Exhausted {
        attempts: u32,
        last: Box<Error>,
    },
}

impl std::error::Error for TransactionError { }

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Exhausted { attempts, last } => {
                write!(f, "Transaction failed after {attempts} attempt(s): {}", last.kind())
            }
        }
    }
}

impl fmt::Debug for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Runs transactions on a client, one at a time.
///
/// The client is held for the whole run, including retries.
///
/// # Example
///
/// ```no_run
/// # use gelwire::{Value, Connection, transaction::TransactionCoordinator};
/// # use gelwire::protocol::{Capabilities, Cardinality, IoFormat};
/// # async fn test(conn: Connection) -> gelwire::Result<()> {
/// let coordinator = TransactionCoordinator::new(conn);
///
/// coordinator.run(async |tx| {
///     tx.execute_query(
///         "insert Post { title := 'foo' }",
///         &Value::Nothing,
///         Capabilities::MODIFICATIONS,
///         Cardinality::Many,
///         IoFormat::Binary,
///     ).await?;
///     Ok(())
/// }).await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "tokio")]
#[derive(Debug)]
pub struct TransactionCoordinator<C> {
    client: tokio::sync::Mutex<C>,
    settings: TransactionSettings,
}

#[cfg(feature = "tokio")]
impl<C: Transactable> TransactionCoordinator<C> {
    pub fn new(client: C) -> Self {
        Self::with_settings(client, TransactionSettings::default())
    }

    pub fn with_settings(client: C, settings: TransactionSettings) -> Self {
        Self { client: tokio::sync::Mutex::new(client), settings }
    }

    pub fn settings(&self) -> &TransactionSettings {
        &self.settings
    }

    pub fn into_inner(self) -> C {
        self.client.into_inner()
    }

    /// Run `body` in a transaction.
    ///
    /// Commit when `body` succeed, rollback otherwise. When the failure is
    /// retryable, the whole transaction runs again, up to
    /// [`TransactionSettings::retry_attempts`] more times.
    pub async fn run<T, F>(&self, mut body: F) -> Result<T>
    where
        F: AsyncFnMut(&mut Transaction<'_, C>) -> Result<T>,
    {
        let mut client = self.client.lock().await;
        let mut attempt = 0;

        loop {
            attempt += 1;
            verbose!(attempt, "transaction attempt");

            let err = match client.start(&self.settings).await {
                Ok(()) => {
                    let mut tx = Transaction { client: &mut *client, attempt };
                    let err = match body(&mut tx).await {
                        Ok(value) => match client.commit().await {
                            Ok(()) => return Ok(value),
                            Err(err) => err,
                        },
                        Err(err) => err,
                    };

                    if let Err(_rollback) = client.rollback().await {
                        #[cfg(feature = "log")]
                        log::error!("failed to rollback transaction: {_rollback}");
                    }
                    err
                }
                // nothing to rollback
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt > self.settings.retry_attempts {
                return Err(TransactionError::Exhausted { attempts: attempt, last: Box::new(err) }.into());
            }

            #[cfg(feature = "log")]
            log::debug!("retrying transaction after attempt {attempt}: {err}");
        }
    }
}

#[cfg(all(test, feature = "tokio"))]
mod test {
    use super::*;
    use crate::{
        ErrorKind,
        protocol::{DatabaseError, ErrorCode, ErrorSeverity},
    };

    #[derive(Default)]
    struct Mock {
        calls: Vec<&'static str>,
        failing_starts: Vec<ErrorCode>,
    }

    impl Transactable for Mock {
        async fn start(&mut self, _: &TransactionSettings) -> Result<()> {
            self.calls.push("start");
            match self.failing_starts.pop() {
                Some(code) => Err(server_error(code)),
                None => Ok(()),
            }
        }

        async fn commit(&mut self) -> Result<()> {
            self.calls.push("commit");
            Ok(())
        }

        async fn rollback(&mut self) -> Result<()> {
            self.calls.push("rollback");
            Ok(())
        }
    }

    fn server_error(code: ErrorCode) -> Error {
        DatabaseError::new(ErrorSeverity::Error, code, "could not serialize access", vec![]).into()
    }

    #[test]
    fn start_statement() {
        let settings = TransactionSettings::default();
        assert_eq!(
            settings.statement(),
            "start transaction isolation serializable, read write, not deferrable"
        );

        let settings = TransactionSettings {
            isolation: IsolationLevel::RepeatableRead,
            read_only: true,
            deferrable: true,
            ..Default::default()
        };
        assert_eq!(
            settings.statement(),
            "start transaction isolation repeatable read, read only, deferrable"
        );

        let config = Config::default().with_retry_attempts(7);
        assert_eq!(TransactionSettings::from(&config).retry_attempts, 7);
    }

    #[tokio::test]
    async fn commit_on_success() {
        let coordinator = TransactionCoordinator::new(Mock::default());
        let value = coordinator
            .run(async |tx| {
                tx.calls.push("body");
                Ok(420)
            })
            .await
            .unwrap();
        assert_eq!(value, 420);
        assert_eq!(coordinator.into_inner().calls, ["start", "body", "commit"]);
    }

    #[tokio::test]
    async fn retry_bound() {
        let settings = TransactionSettings { retry_attempts: 2, ..Default::default() };
        let coordinator = TransactionCoordinator::with_settings(Mock::default(), settings);

        let mut runs = 0;
        let err = coordinator
            .run(async |tx| -> Result<()> {
                runs += 1;
                assert_eq!(tx.attempt(), runs);
                Err(server_error(ErrorCode::TRANSACTION_SERIALIZATION_ERROR))
            })
            .await
            .unwrap_err();

        assert_eq!(runs, 3);
        assert!(!err.is_retryable());
        assert!(matches!(
            err.kind(),
            ErrorKind::Transaction(TransactionError::Exhausted { attempts: 3, .. })
        ));
        assert!(err.to_string().starts_with("Transaction failed after 3 attempt(s)"));
        assert_eq!(coordinator.into_inner().calls, ["start", "rollback"].repeat(3));
    }

    #[tokio::test]
    async fn retry_then_succeed() {
        let coordinator = TransactionCoordinator::new(Mock::default());
        let value = coordinator
            .run(async |tx| {
                match tx.attempt() {
                    1 => Err(server_error(ErrorCode::TRANSACTION_CONFLICT_ERROR)),
                    n => Ok(n),
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(
            coordinator.into_inner().calls,
            ["start", "rollback", "start", "commit"]
        );
    }

    #[tokio::test]
    async fn retryable_start_failure_is_retried() {
        let mock = Mock {
            failing_starts: vec![ErrorCode::TRANSACTION_SERIALIZATION_ERROR],
            ..Default::default()
        };
        let coordinator = TransactionCoordinator::new(mock);
        let value = coordinator
            .run(async |tx| {
                tx.calls.push("body");
                Ok(tx.attempt())
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(coordinator.into_inner().calls, ["start", "start", "body", "commit"]);
    }

    #[tokio::test]
    async fn fatal_start_failure_skips_body() {
        let mock = Mock {
            failing_starts: vec![ErrorCode::INVALID_SYNTAX_ERROR],
            ..Default::default()
        };
        let coordinator = TransactionCoordinator::new(mock);
        let err = coordinator
            .run(async |tx| -> Result<()> {
                tx.calls.push("body");
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.as_database_error().map(|e| e.code()),
            Some(ErrorCode::INVALID_SYNTAX_ERROR)
        );
        assert_eq!(coordinator.into_inner().calls, ["start"]);
    }

    #[tokio::test]
    async fn non_retryable_runs_once() {
        let coordinator = TransactionCoordinator::new(Mock::default());

        let mut runs = 0;
        let err = coordinator
            .run(async |_| -> Result<()> {
                runs += 1;
                Err(server_error(ErrorCode::CONSTRAINT_VIOLATION_ERROR))
            })
            .await
            .unwrap_err();

        assert_eq!(runs, 1);
        assert_eq!(
            err.as_database_error().map(|e| e.code()),
            Some(ErrorCode::CONSTRAINT_VIOLATION_ERROR)
        );
        assert_eq!(coordinator.into_inner().calls, ["start", "rollback"]);
    }
}

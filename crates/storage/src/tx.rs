//! Transaction manager and unit-of-work scoping.
//!
//! Every repository method takes a [`Scope`]. `Scope::Within` runs the call
//! inside a transaction owned by the caller; `Scope::Auto` makes the
//! repository open, and commit, a transaction of its own. Nothing nests: a
//! call that receives an open transaction always joins it.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::{Result, StorageError};

/// A transaction handle of a storage backend.
#[async_trait]
pub trait TxHandle: Send + Sized {
    /// Makes the changes of the transaction visible to others.
    async fn commit(self) -> Result<()>;

    /// Discards the changes of the transaction.
    async fn rollback(self) -> Result<()>;
}

/// Starts transactions for a storage backend.
///
/// Transactions run at read-committed isolation.
#[async_trait]
pub trait TxManager: Send + Sync {
    type Tx: TxHandle + 'static;

    /// Begins a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// Transaction context of a repository call.
#[derive(Debug)]
pub enum Scope<'a, T> {
    /// Run inside the caller's open transaction.
    Within(&'a mut T),
    /// No transaction in progress; the callee wraps itself in one.
    Auto,
}

impl<T> Scope<'_, T> {
    /// Returns true if the scope carries an open transaction.
    pub fn in_transaction(&self) -> bool {
        matches!(self, Scope::Within(_))
    }

    /// Borrows the scope again for a shorter call.
    pub fn reborrow(&mut self) -> Scope<'_, T> {
        match self {
            Scope::Within(tx) => Scope::Within(&mut **tx),
            Scope::Auto => Scope::Auto,
        }
    }
}

impl<'a, T> From<&'a mut T> for Scope<'a, T> {
    fn from(tx: &'a mut T) -> Self {
        Scope::Within(tx)
    }
}

/// An ad-hoc transaction: either the caller's transaction or a fresh one.
///
/// `commit` and `rollback` only act on a transaction the guard opened itself;
/// for a joined transaction they are no-ops and the owner decides. Dropping
/// an owned guard without committing rolls it back.
pub enum TxGuard<'a, T> {
    Joined(&'a mut T),
    Owned(T),
}

impl<'a, T: TxHandle> TxGuard<'a, T> {
    /// Joins the transaction carried by `scope`, or begins one on `manager`.
    pub async fn open<M>(manager: &M, scope: Scope<'a, T>) -> Result<Self>
    where
        M: TxManager<Tx = T> + ?Sized,
    {
        match scope {
            Scope::Within(tx) => Ok(TxGuard::Joined(tx)),
            Scope::Auto => Ok(TxGuard::Owned(manager.begin().await?)),
        }
    }

    /// Returns true if the guard reuses a caller's transaction.
    pub fn is_joined(&self) -> bool {
        matches!(self, TxGuard::Joined(_))
    }

    /// The underlying transaction.
    pub fn tx(&mut self) -> &mut T {
        match self {
            TxGuard::Joined(tx) => &mut **tx,
            TxGuard::Owned(tx) => tx,
        }
    }

    /// A scope that makes nested repository calls join this transaction.
    pub fn scope(&mut self) -> Scope<'_, T> {
        Scope::Within(self.tx())
    }

    pub async fn commit(self) -> Result<()> {
        match self {
            TxGuard::Joined(_) => Ok(()),
            TxGuard::Owned(tx) => tx.commit().await,
        }
    }

    pub async fn rollback(self) -> Result<()> {
        match self {
            TxGuard::Joined(_) => Ok(()),
            TxGuard::Owned(tx) => tx.rollback().await,
        }
    }
}

/// Runs `f` inside a read-committed transaction.
///
/// If `scope` already carries a transaction, `f` runs inside it and the
/// outer owner commits or rolls back. Otherwise a transaction is begun and:
/// - `f` returning `Ok` commits it,
/// - `f` returning `Err` rolls it back and propagates the error,
/// - `f` panicking rolls it back and surfaces
///   [`StorageError::TransactionPanicked`].
///
/// ```ignore
/// let id = run_in_transaction(&store, Scope::Auto, |tx| {
///     Box::pin(async move {
///         let id = orders.create(Scope::Within(&mut *tx), new_order).await?;
///         outbox
///             .create_order_status_changed_event(Scope::Within(tx), id, OrderStatus::New)
///             .await?;
///         Ok::<_, StorageError>(id)
///     })
/// })
/// .await?;
/// ```
pub async fn run_in_transaction<M, F, R, E>(
    manager: &M,
    scope: Scope<'_, M::Tx>,
    f: F,
) -> std::result::Result<R, E>
where
    M: TxManager + ?Sized,
    F: for<'t> FnOnce(&'t mut M::Tx) -> BoxFuture<'t, std::result::Result<R, E>> + Send,
    R: Send,
    E: From<StorageError> + Send,
{
    let mut guard = TxGuard::open(manager, scope).await?;
    let outcome = AssertUnwindSafe(f(guard.tx())).catch_unwind().await;

    match outcome {
        Ok(Ok(value)) => {
            guard.commit().await?;
            Ok(value)
        }
        Ok(Err(err)) => {
            rollback_quietly(guard).await;
            Err(err)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "panic inside transaction, rolling back");
            rollback_quietly(guard).await;
            Err(StorageError::TransactionPanicked(message).into())
        }
    }
}

/// Rolls back, logging instead of returning a rollback failure so the
/// original error reaches the caller.
async fn rollback_quietly<T: TxHandle>(guard: TxGuard<'_, T>) {
    if let Err(e) = guard.rollback().await {
        tracing::warn!(error = %e, "transaction rollback failed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

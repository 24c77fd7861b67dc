//! Transaction propagation: who opens, joins, isolates and finishes the
//! transaction a nested unit of work runs in.
//!
//! The ambient transaction is passed explicitly as `Option<&Tx<_>>`. Whichever
//! call opens a transaction (or a savepoint) is the only one that finishes it, on
//! every exit path including panics.

mod tx;

pub use tx::Tx;

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

use restsql_core::{Error, ExecContext, Result};

use crate::store::{Connection, Store};

/// How a nested call relates to the ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Propagation {
    /// Join the ambient transaction, or open (and finish) a new one.
    #[default]
    Current,
    /// Join the ambient transaction; its absence is an error.
    Mandatory,
    /// Always open an independent transaction and finish it on return.
    RequiredNew,
    /// Like `Current`, but isolate the call behind a savepoint. A failure is rolled
    /// back to the savepoint and absorbed.
    Savepoint,
}

/// Result of a propagated call that did not fail the enclosing unit of work.
#[derive(Debug)]
#[must_use]
pub enum Outcome<R> {
    Done(R),
    /// The call failed inside a savepoint; its work was rolled back and the
    /// enclosing transaction continues.
    Absorbed(Error),
}

impl<R> Outcome<R> {
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    #[inline]
    pub fn is_absorbed(&self) -> bool {
        matches!(self, Outcome::Absorbed(_))
    }

    pub fn done(self) -> Option<R> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Absorbed(_) => None,
        }
    }

    pub fn absorbed(&self) -> Option<&Error> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Absorbed(err) => Some(err),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(R) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::Absorbed(err) => Outcome::Absorbed(err),
        }
    }

    /// Turns an absorbed failure back into an error.
    pub fn into_result(self) -> Result<R> {
        match self {
            Outcome::Done(value) => Ok(value),
            Outcome::Absorbed(err) => Err(err),
        }
    }
}

/// Transaction propagation manager over a store.
#[derive(Debug, Clone)]
pub struct Transactional<S: Store> {
    store: S,
}

impl<S: Store> Transactional<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opens a fresh transaction the caller owns.
    pub fn begin(&self, ctx: &ExecContext) -> Result<Tx<S::Conn>> {
        ctx.check()?;
        Tx::begin(self.store.connect(ctx)?)
    }

    /// Runs `f` under `propagation`.
    ///
    /// Only `Savepoint` can yield [`Outcome::Absorbed`]; every other mode returns
    /// the failure of `f` as an error.
    pub fn execute<R, F>(
        &self,
        ctx: &ExecContext,
        ambient: Option<&Tx<S::Conn>>,
        propagation: Propagation,
        f: F,
    ) -> Result<Outcome<R>>
    where
        F: FnOnce(&Tx<S::Conn>) -> Result<R>,
    {
        match propagation {
            Propagation::Current => self.current(ctx, ambient, f).map(Outcome::Done),
            Propagation::Mandatory => self.mandatory(ctx, ambient, f).map(Outcome::Done),
            Propagation::RequiredNew => self.required_new(ctx, f).map(Outcome::Done),
            Propagation::Savepoint => self.savepoint(ctx, ambient, f),
        }
    }

    /// Joins `ambient` if present, otherwise opens a transaction and commits or
    /// rolls it back depending on `f`.
    pub fn current<R, F>(&self, ctx: &ExecContext, ambient: Option<&Tx<S::Conn>>, f: F) -> Result<R>
    where
        F: FnOnce(&Tx<S::Conn>) -> Result<R>,
    {
        match ambient {
            Some(tx) => join(ctx, tx, f),
            None => self.run_owned(ctx, f),
        }
    }

    /// Joins `ambient`; never opens or finishes a transaction.
    pub fn mandatory<R, F>(
        &self,
        ctx: &ExecContext,
        ambient: Option<&Tx<S::Conn>>,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(&Tx<S::Conn>) -> Result<R>,
    {
        match ambient {
            Some(tx) => join(ctx, tx, f),
            None => Err(Error::internal(
                "mandatory propagation requires an ambient transaction",
            )),
        }
    }

    /// Runs `f` in a brand-new transaction, finished before returning regardless
    /// of what later happens to any enclosing one.
    pub fn required_new<R, F>(&self, ctx: &ExecContext, f: F) -> Result<R>
    where
        F: FnOnce(&Tx<S::Conn>) -> Result<R>,
    {
        self.run_owned(ctx, f)
    }

    /// Runs `f` behind a savepoint on `ambient` (or on a transaction opened and
    /// committed here).
    ///
    /// A failure of `f`, or of the `SAVEPOINT` / `RELEASE` / `ROLLBACK TO`
    /// statements around it, is returned as [`Outcome::Absorbed`] and the
    /// enclosing transaction carries on. Only opening or committing a locally
    /// opened transaction fails the call.
    pub fn savepoint<R, F>(
        &self,
        ctx: &ExecContext,
        ambient: Option<&Tx<S::Conn>>,
        f: F,
    ) -> Result<Outcome<R>>
    where
        F: FnOnce(&Tx<S::Conn>) -> Result<R>,
    {
        if let Some(tx) = ambient {
            return join(ctx, tx, |tx| Ok(savepoint_on(tx, f)));
        }

        let tx = self.begin(ctx)?;
        let outcome = match catch_unwind(AssertUnwindSafe(|| savepoint_on(&tx, f))) {
            Ok(outcome) => outcome,
            Err(panic_payload) => {
                let _ = tx.rollback();
                resume_unwind(panic_payload);
            }
        };
        finish(ctx, tx)?;
        Ok(outcome)
    }

    fn run_owned<R, F>(&self, ctx: &ExecContext, f: F) -> Result<R>
    where
        F: FnOnce(&Tx<S::Conn>) -> Result<R>,
    {
        let tx = self.begin(ctx)?;

        let result = catch_unwind(AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                finish(ctx, tx)?;
                Ok(value)
            }
            Ok(Err(e)) => {
                rollback_quietly(tx);
                Err(e)
            }
            Err(panic_payload) => {
                let _ = tx.rollback();
                resume_unwind(panic_payload);
            }
        }
    }
}

/// Runs `f` on a transaction owned by someone else, with `ctx` watching its
/// statements for the duration.
fn join<C, R, F>(ctx: &ExecContext, tx: &Tx<C>, f: F) -> Result<R>
where
    C: Connection,
    F: FnOnce(&Tx<C>) -> Result<R>,
{
    ctx.check()?;
    let previous = tx.conn().bind_context(Some(ctx.clone()));
    let result = catch_unwind(AssertUnwindSafe(|| f(tx)));
    tx.conn().bind_context(previous);
    match result {
        Ok(result) => result,
        Err(panic_payload) => resume_unwind(panic_payload),
    }
}

fn savepoint_on<C, R, F>(tx: &Tx<C>, f: F) -> Outcome<R>
where
    C: Connection,
    F: FnOnce(&Tx<C>) -> Result<R>,
{
    let name = tx::savepoint_name();
    if let Err(e) = tx.savepoint(&name) {
        return absorb(e);
    }

    match catch_unwind(AssertUnwindSafe(|| f(tx))) {
        Ok(Ok(value)) => match tx.release(&name) {
            Ok(()) => Outcome::Done(value),
            Err(e) => {
                rollback_to_quietly(tx, &name);
                absorb(e)
            }
        },
        Ok(Err(e)) => {
            rollback_to_quietly(tx, &name);
            absorb(e)
        }
        Err(panic_payload) => {
            let _ = tx.rollback_to(&name);
            resume_unwind(panic_payload);
        }
    }
}

fn absorb<R>(err: Error) -> Outcome<R> {
    #[cfg(feature = "tracing")]
    tracing::warn!(error = %err, "restsql.savepoint.absorbed");
    Outcome::Absorbed(err)
}

/// Commits unless the context finished while the work ran.
fn finish<C: Connection>(ctx: &ExecContext, tx: Tx<C>) -> Result<()> {
    if let Err(e) = ctx.check() {
        rollback_quietly(tx);
        return Err(e);
    }
    tx.commit()
}

/// The nested failure is what gets absorbed; a failed rollback-to is only logged.
fn rollback_to_quietly<C: Connection>(tx: &Tx<C>, name: &str) {
    if let Err(_e) = tx.rollback_to(name) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %_e, savepoint = name, "restsql.rollback_to.failed");
    }
}

/// Rolls back on a failure path; the original failure is what gets reported.
fn rollback_quietly<C: Connection>(tx: Tx<C>) {
    if let Err(_e) = tx.rollback() {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %_e, "restsql.rollback.failed");
    }
}

//! Lifecycle orchestration for long-running actors.
//!
//! An [`ActorGroup`] runs a fixed set of [`Actor`]s concurrently under one
//! cancellation domain. The first actor to finish, whether it succeeded or
//! failed, interrupts every other actor exactly once. The group then drains
//! all actors before it returns, so no task outlives [`ActorGroup::run`].
//!
//! Panics inside an actor are not contained: they are resumed on the caller
//! of [`ActorGroup::run`]. Request-level panics are the HTTP layer's concern.
use std::{collections::HashMap, future::Future};

use futures_util::future::BoxFuture;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Future driving an actor until completion or interruption.
pub type RunFuture = BoxFuture<'static, eyre::Result<()>>;

/// Callback that asks a running actor to stop.
pub type InterruptFn = Box<dyn FnOnce(&ActorError) + Send + 'static>;

/// Terminal cause reported by an actor group.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ActorError {
    /// The actor returned an error.
    #[error("actor '{actor}' failed: {error:#}")]
    Failed { actor: String, error: eyre::Report },

    /// The actor returned without error while its siblings were still running.
    #[error("actor '{actor}' stopped")]
    Stopped { actor: String },
}

impl ActorError {
    /// Name of the actor that produced this outcome.
    pub fn actor(&self) -> &str {
        match self {
            Self::Failed { actor, .. } | Self::Stopped { actor } => actor,
        }
    }

    /// The underlying error report, if the actor failed.
    pub fn report(&self) -> Option<&eyre::Report> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Stopped { .. } => None,
        }
    }
}

/// A named unit of long-running work plus the means to interrupt it.
pub struct Actor {
    name: String,
    run: RunFuture,
    interrupt: InterruptFn,
}

impl Actor {
    pub fn new<F, I>(name: impl Into<String>, run: F, interrupt: I) -> Self
    where
        F: Future<Output = eyre::Result<()>> + Send + 'static,
        I: FnOnce(&ActorError) + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::pin(run),
            interrupt: Box::new(interrupt),
        }
    }

    /// Build an actor whose interrupt cancels `token`.
    ///
    /// The run future is expected to observe the same token (or a clone of
    /// it) and return once it is cancelled.
    pub fn with_token<F>(name: impl Into<String>, token: CancellationToken, run: F) -> Self
    where
        F: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let label = name.clone();
        Self::new(name, run, move |cause: &ActorError| {
            tracing::info!(actor = %label, cause = %cause, "interrupting actor");
            token.cancel();
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor").field("name", &self.name).finish()
    }
}

/// A set of actors sharing one lifetime.
#[derive(Debug, Default)]
pub struct ActorGroup {
    actors: Vec<Actor>,
}

impl ActorGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actor. Actors must be added before [`ActorGroup::run`].
    pub fn add(&mut self, actor: Actor) -> &mut Self {
        self.actors.push(actor);
        self
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Run every actor until the first one returns, interrupt the rest, and
    /// wait for all of them.
    ///
    /// Returns the first actor's error. When the first actor stopped cleanly
    /// the first error seen while draining the others is returned instead,
    /// and `Ok(())` only if every actor returned `Ok`.
    pub async fn run(self) -> Result<(), ActorError> {
        if self.actors.is_empty() {
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        let mut slots: HashMap<Id, usize> = HashMap::with_capacity(self.actors.len());
        let mut names = Vec::with_capacity(self.actors.len());
        let mut interrupts: Vec<Option<InterruptFn>> = Vec::with_capacity(self.actors.len());

        for (index, actor) in self.actors.into_iter().enumerate() {
            tracing::info!(actor = %actor.name, "starting actor");
            names.push(actor.name);
            interrupts.push(Some(actor.interrupt));
            let handle = tasks.spawn(actor.run);
            slots.insert(handle.id(), index);
        }

        let Some(first) = tasks.join_next_with_id().await else {
            return Ok(());
        };
        let (first_index, first_result) = settle(first, &slots);
        let cause = match first_result {
            Ok(()) => ActorError::Stopped {
                actor: names[first_index].clone(),
            },
            Err(error) => ActorError::Failed {
                actor: names[first_index].clone(),
                error,
            },
        };
        tracing::info!(actor = %names[first_index], cause = %cause, "first actor terminated, interrupting siblings");

        for (index, slot) in interrupts.iter_mut().enumerate() {
            if index == first_index {
                continue;
            }
            if let Some(interrupt) = slot.take() {
                interrupt(&cause);
            }
        }

        let mut outcome = match cause {
            ActorError::Stopped { .. } => Ok(()),
            failed => Err(failed),
        };

        while let Some(joined) = tasks.join_next_with_id().await {
            let (index, result) = settle(joined, &slots);
            match result {
                Ok(()) => tracing::debug!(actor = %names[index], "actor exited"),
                Err(error) => {
                    tracing::warn!(actor = %names[index], error = %error, "actor exited with error");
                    if outcome.is_ok() {
                        outcome = Err(ActorError::Failed {
                            actor: names[index].clone(),
                            error,
                        });
                    }
                }
            }
        }

        outcome
    }
}

/// Map a finished task back to its actor slot, resuming panics.
fn settle(
    joined: Result<(Id, eyre::Result<()>), JoinError>,
    slots: &HashMap<Id, usize>,
) -> (usize, eyre::Result<()>) {
    match joined {
        Ok((id, result)) => (slots.get(&id).copied().unwrap_or_default(), result),
        Err(error) => {
            let index = slots.get(&error.id()).copied().unwrap_or_default();
            if error.is_panic() {
                std::panic::resume_unwind(error.into_panic());
            }
            (index, Err(eyre::eyre!("actor task was cancelled: {error}")))
        }
    }
}

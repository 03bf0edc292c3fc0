//! Event hooks and the `try_run` control-flow primitive.
//!
//! Every orchestration object (script, server, directory, method) carries a
//! [`Controller`]. Configuration code registers handlers for the four lifecycle
//! [`Event`]s and the orchestrator runs each unit of work through
//! [`Controller::try_run`], which fires the events around it:
//!
//! ```text
//! idle -> prepare -> block -> success -> finish
//!                       \--> failure --/
//! ```
//!
//! A handler may cut the current `try_run` short by returning the error produced by
//! [`Trigger::abort`]. The abort is only recognized by the `try_run` of the controller
//! that produced it, every other `try_run` treats it like any other error.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle events fired by [`Controller::try_run`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    enum_map::Enum,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Event {
    /// Fired before the block runs, may abort it.
    Prepare,
    /// Fired after the block completed without error.
    Success,
    /// Fired with the error when the block (or `prepare`/`success`) failed.
    Failure,
    /// Always fired last.
    Finish,
}

/// Sentinel error returned by [`Trigger::abort`] and [`Controller::abort`].
#[derive(Debug, thiserror::Error)]
#[error("aborted (controller {controller}, persistent: {persistent})")]
pub struct Aborted {
    controller: u64,
    persistent: bool,
}

impl Aborted {
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

/// What a handler receives when its event fires.
pub struct Trigger<'a, S: ?Sized> {
    pub event: Event,
    pub scope: &'a S,
    /// The error that caused a `failure` event, `None` for every other event.
    pub error: Option<&'a anyhow::Error>,
    controller: &'a Controller<S>,
}

impl<S: ?Sized> Clone for Trigger<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized> Copy for Trigger<'_, S> {}

impl<S: ?Sized> Trigger<'_, S> {
    /// Abort the `try_run` that fired this event, see [`Controller::abort`].
    ///
    /// Return the result from the handler: `return Err(trigger.abort(false));`
    #[must_use]
    pub fn abort(&self, persistent: bool) -> anyhow::Error {
        self.controller.abort(persistent)
    }
}

pub type Handler<S> =
    Arc<dyn for<'a> Fn(Trigger<'a, S>) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync>;

/// Named-event registry with abort support, generic over the scope type handlers see.
pub struct Controller<S: ?Sized> {
    id: u64,
    events: enum_map::EnumMap<Event, Vec<Handler<S>>>,
    aborted: AtomicBool,
}

impl<S: ?Sized> Default for Controller<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> std::fmt::Debug for Controller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers: Vec<(Event, usize)> = self
            .events
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(event, handlers)| (event, handlers.len()))
            .collect();
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("handlers", &handlers)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl<S: ?Sized> Controller<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            events: enum_map::EnumMap::default(),
            aborted: AtomicBool::new(false),
        }
    }

    /// Register a handler for `event`. Handlers accumulate and run in registration order.
    pub fn on<F>(&mut self, event: Event, handler: F)
    where
        F: for<'a> Fn(Trigger<'a, S>) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.events[event].push(Arc::new(handler));
    }

    #[must_use]
    pub fn handles(&self, event: Event) -> bool {
        !self.events[event].is_empty()
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Produce the sentinel that unwinds this controller's current `try_run`.
    ///
    /// With `persistent` set, every later `try_run` on this controller returns
    /// immediately without firing anything.
    #[must_use]
    pub fn abort(&self, persistent: bool) -> anyhow::Error {
        if persistent {
            self.aborted.store(true, Ordering::SeqCst);
        }
        Aborted {
            controller: self.id,
            persistent,
        }
        .into()
    }

    fn owns(&self, error: &anyhow::Error) -> bool {
        error
            .downcast_ref::<Aborted>()
            .is_some_and(|aborted| aborted.controller == self.id)
    }
}

impl<S: ?Sized + Sync> Controller<S> {
    /// Run all handlers of `event` in order. Returns whether any handler ran.
    ///
    /// The first handler error stops the remaining handlers and is returned.
    pub async fn fire(
        &self,
        event: Event,
        scope: &S,
        error: Option<&anyhow::Error>,
    ) -> anyhow::Result<bool> {
        let handlers = &self.events[event];
        if handlers.is_empty() {
            return Ok(false);
        }
        tracing::debug!("firing {} ({} handler(s))", event, handlers.len());
        for handler in handlers {
            handler(Trigger {
                event,
                scope,
                error,
                controller: self,
            })
            .await?;
        }
        Ok(true)
    }

    /// Run `block` between the lifecycle events.
    ///
    /// Without a `failure` handler an error from the block is returned to the caller,
    /// with one the error counts as handled. `finish` fires in every case except a
    /// persistent abort.
    pub async fn try_run<F>(&self, scope: &S, block: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = anyhow::Result<()>>,
    {
        if self.is_aborted() {
            tracing::debug!("controller {} was aborted persistently, skipping", self.id);
            return Ok(());
        }
        let outcome = async {
            self.fire(Event::Prepare, scope, None).await?;
            block.await?;
            self.fire(Event::Success, scope, None).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        let result = match outcome {
            Ok(()) => Ok(()),
            Err(error) if self.owns(&error) => {
                tracing::debug!("{:#}", &error);
                Ok(())
            }
            Err(error) => match self.fire(Event::Failure, scope, Some(&error)).await {
                Ok(true) => {
                    tracing::debug!("failure handled: {:#}", &error);
                    Ok(())
                }
                Ok(false) => Err(error),
                Err(failure) if self.owns(&failure) => Ok(()),
                Err(failure) => Err(failure),
            },
        };
        let finished = match self.fire(Event::Finish, scope, None).await {
            Ok(_) => Ok(()),
            Err(error) if self.owns(&error) => Ok(()),
            Err(error) => Err(error),
        };
        result.and(finished)
    }
}

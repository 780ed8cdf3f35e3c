//! Actor Runtime
//!
//! Minimal mailbox-per-actor runtime on tokio tasks:
//! - Unbounded mailbox, one message handled at a time
//! - Cloneable handles for fire-and-forget `tell`
//! - Supervision: a failed handler is reported to the parent, the actor keeps running

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::ChildErrorMsg;

/// Messages that belong to a request
pub trait Correlated {
    fn correlation_id(&self) -> Option<&str>;

    fn task_id(&self) -> Option<&str> {
        None
    }
}

#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Correlated + Send + 'static;

    fn name(&self) -> &str;

    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Handle one message. Errors go to the supervisor, never stop the actor.
    async fn handle(&mut self, message: Self::Message) -> Result<()>;

    async fn on_stop(&mut self) {}
}

/// Receives child handler failures
pub type Supervisor = Arc<dyn Fn(ChildErrorMsg) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("actor '{0}' mailbox is closed")]
    MailboxClosed(String),
}

/// Sending side of an actor's mailbox
pub struct ActorHandle<M> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M> fmt::Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("name", &self.name)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<M> ActorHandle<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tell(&self, message: M) -> Result<(), ActorError> {
        self.tx
            .send(message)
            .map_err(|_| ActorError::MailboxClosed(self.name.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of an actor's mailbox
pub struct Mailbox<M> {
    rx: mpsc::UnboundedReceiver<M>,
}

impl<M> Mailbox<M> {
    /// Next message, for callers draining a mailbox without an actor
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }
}

/// Create a mailbox before its actor exists, so handles can be wired in cycles
pub fn mailbox<M>(name: &str) -> (ActorHandle<M>, Mailbox<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ActorHandle {
            name: Arc::from(name),
            tx,
        },
        Mailbox { rx },
    )
}

/// Run `actor` on its own task, draining `mailbox`
pub fn spawn<A: Actor>(
    actor: A,
    mailbox: Mailbox<A::Message>,
    supervisor: Option<Supervisor>,
) -> JoinHandle<()> {
    tokio::spawn(run(actor, mailbox, supervisor))
}

/// Create a mailbox and spawn `actor` on it
pub fn spawn_actor<A: Actor>(
    actor: A,
    supervisor: Option<Supervisor>,
) -> (ActorHandle<A::Message>, JoinHandle<()>) {
    let (handle, mailbox) = mailbox(actor.name());
    let task = spawn(actor, mailbox, supervisor);
    (handle, task)
}

async fn run<A: Actor>(mut actor: A, mut mailbox: Mailbox<A::Message>, supervisor: Option<Supervisor>) {
    let name = actor.name().to_string();

    if let Err(e) = actor.on_start().await {
        warn!(actor = %name, "Actor failed to start: {:#}", e);
        if let Some(supervisor) = &supervisor {
            supervisor(ChildErrorMsg {
                child: name.clone(),
                correlation_id: None,
                task_id: None,
                error: e.to_string(),
            });
        }
        return;
    }
    info!(actor = %name, "Actor started");

    while let Some(message) = mailbox.rx.recv().await {
        let correlation_id = message.correlation_id().map(str::to_string);
        let task_id = message.task_id().map(str::to_string);

        if let Err(e) = actor.handle(message).await {
            warn!(
                actor = %name,
                correlation_id = correlation_id.as_deref().unwrap_or("-"),
                "Handler failed: {:#}", e
            );
            match &supervisor {
                Some(supervisor) => supervisor(ChildErrorMsg {
                    child: name.clone(),
                    correlation_id,
                    task_id,
                    error: format!("{:#}", e),
                }),
                None => debug!(actor = %name, "No supervisor, error dropped"),
            }
        }
    }

    actor.on_stop().await;
    info!(actor = %name, "Actor stopped");
}

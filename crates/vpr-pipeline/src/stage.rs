use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, SendError, Sender};
use vpr_core::{Failure, Session, Window};

use crate::message::{Message, Payload, Response, Step};
use crate::PipelineError;

/// One step of the query pipeline.
///
/// A stage transforms the payload it receives into the next stage's payload,
/// or finishes the session. It never sees the reply route, so it cannot
/// answer a session on its own.
pub trait Stage: Send + Sync {
    /// Stage name, used for thread names, logs and faults.
    fn name(&self) -> &'static str;

    /// Timing window stamped around [`Stage::process`], `None` when the
    /// stage stamps remotely.
    fn window(&self) -> Option<Window>;

    /// Process one payload.
    fn process(&self, session: &mut Session, payload: Payload) -> Result<Step, Failure>;
}

/// Run a stage on one payload, stamping its window and turning a panic into
/// a [`Failure::StageFault`].
pub fn execute(stage: &dyn Stage, session: &mut Session, payload: Payload) -> Result<Step, Failure> {
    let window = stage.window();
    if let Some(w) = window {
        session.stamp_start(w);
    }
    let result = catch_unwind(AssertUnwindSafe(|| stage.process(session, payload)));
    if let Some(w) = window {
        session.stamp_end(w);
    }

    match result {
        Ok(step) => step,
        Err(panic) => {
            let reason = panic_reason(panic.as_ref());
            log::error!("stage {} panicked on session {}: {reason}", stage.name(), session.id);
            Err(Failure::stage_fault(stage.name(), reason))
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Start the worker thread of a stage.
///
/// The worker drains `inbound` until every sender is gone, then drops `next`,
/// which lets the downstream worker wind down in turn.
pub(crate) fn spawn_worker(
    stage: Box<dyn Stage>,
    inbound: Receiver<Message>,
    next: Option<Sender<Message>>,
) -> Result<JoinHandle<()>, PipelineError> {
    let name = stage.name();
    std::thread::Builder::new()
        .name(format!("vpr-{name}"))
        .spawn(move || {
            log::debug!("stage {name} started");
            for message in inbound.iter() {
                handle(stage.as_ref(), message, next.as_ref());
            }
            log::debug!("stage {name} stopped");
        })
        .map_err(|e| PipelineError::Spawn(name, e))
}

fn handle(stage: &dyn Stage, message: Message, next: Option<&Sender<Message>>) {
    let Message {
        mut session,
        payload,
        reply,
    } = message;
    log::debug!(
        "stage {} picked up session {} ({})",
        stage.name(),
        session.id,
        payload.name()
    );

    match execute(stage, &mut session, payload) {
        Ok(Step::Next(payload)) => {
            let Some(next) = next else {
                let fault = Failure::stage_fault(stage.name(), "no downstream stage");
                reply.deliver(Response::failed(session, fault));
                return;
            };
            if let Err(SendError(message)) = next.send(Message {
                session,
                payload,
                reply,
            }) {
                let fault = Failure::stage_fault(stage.name(), "downstream stage is gone");
                message.reply.deliver(Response::failed(message.session, fault));
            }
        }
        Ok(Step::Done(localization)) => reply.deliver(Response::located(session, localization)),
        Err(failure) => reply.deliver(Response::failed(session, failure)),
    }
}

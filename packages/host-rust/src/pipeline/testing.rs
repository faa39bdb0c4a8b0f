//! Test doubles shared by the pipeline layer tests.

use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::anyhow;
use conduit_core::{ExecutionContext, PipelineError};
use parking_lot::Mutex;
use tower::Service;

use super::logging::{current_scope, LoggingScope};
use super::request::{MessageRequest, PipelineFuture, Processed};

#[derive(Debug, Default)]
struct CapturedState {
    calls: u32,
    scope: Option<LoggingScope>,
    context: Option<ExecutionContext>,
}

/// Shared record of what the innermost service saw.
#[derive(Debug, Clone, Default)]
pub(crate) struct Captured {
    state: Arc<Mutex<CapturedState>>,
    fail: bool,
}

impl Captured {
    /// A capture whose service fails every call with a processing error.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.state.lock().calls
    }

    pub(crate) fn last_scope(&self) -> Option<LoggingScope> {
        self.state.lock().scope.clone()
    }

    pub(crate) fn last_context(&self) -> Option<ExecutionContext> {
        self.state.lock().context.clone()
    }
}

/// Innermost stand-in for the handler service.
pub(crate) struct CaptureService {
    captured: Captured,
}

impl CaptureService {
    pub(crate) fn new(captured: Captured) -> Self {
        Self { captured }
    }
}

impl<T: Send + Sync + 'static> Service<MessageRequest<T>> for CaptureService {
    type Response = Processed;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: MessageRequest<T>) -> Self::Future {
        let captured = self.captured.clone();
        Box::pin(async move {
            {
                let mut state = captured.state.lock();
                state.calls += 1;
                state.scope = current_scope();
                state.context = Some(req.context.clone());
            }
            if captured.fail {
                Err(PipelineError::consumer(anyhow!("capture failure")))
            } else {
                Ok(Processed {
                    context: req.context,
                })
            }
        })
    }
}

use std::sync::Arc;

use signaling_core::{ConnectionState, PublishError, RetryDecision, RetryPolicy, Update};
use signaling_session::{OutboundRequest, PendingResponse, Session};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) type PublishWaiter = oneshot::Sender<Result<(), PublishError>>;

/// Resolves with the delivery outcome of one accepted `publish`.
#[derive(Debug)]
pub struct PublishReceipt {
    rx: oneshot::Receiver<Result<(), PublishError>>,
}

impl PublishReceipt {
    pub(crate) fn channel() -> (PublishWaiter, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait for delivery. A receipt whose publish was abandoned with the
    /// transport reports `Disconnected`.
    pub async fn outcome(self) -> Result<(), PublishError> {
        self.rx.await.unwrap_or(Err(PublishError::Disconnected))
    }
}

pub(crate) fn notify(waiters: Vec<PublishWaiter>, outcome: Result<(), PublishError>) {
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

/// Best-effort update delivery with jittered exponential backoff on 5xx.
///
/// The first send happens synchronously in `publish`; retries run on a
/// spawned task that stops as soon as the transport disconnects.
pub(crate) struct PublishRetrier<S> {
    session: Arc<S>,
    policy: RetryPolicy,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
}

impl<S> Clone for PublishRetrier<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            policy: self.policy,
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: Session> PublishRetrier<S> {
    pub(crate) fn new(
        session: Arc<S>,
        policy: RetryPolicy,
        state: watch::Receiver<ConnectionState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            policy,
            state,
            shutdown,
        }
    }

    pub(crate) fn publish(&self, update: Update) -> PublishReceipt {
        let (waiter, receipt) = PublishReceipt::channel();
        self.publish_to(update, vec![waiter]);
        receipt
    }

    /// Send `update` and report its outcome to every waiter.
    pub(crate) fn publish_to(&self, update: Update, waiters: Vec<PublishWaiter>) {
        let body = match update.to_body() {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to encode update");
                notify(waiters, Err(PublishError::Session(err.to_string())));
                return;
            }
        };

        if self.is_disconnected() {
            notify(waiters, Err(PublishError::Disconnected));
            return;
        }

        let first = self.session.send_request(OutboundRequest::info(body.clone()));
        let retrier = self.clone();
        tokio::spawn(async move {
            let outcome = retrier.drive(body, first).await;
            if let Err(err) = &outcome {
                debug!(error = %err, "publish failed");
            }
            notify(waiters, outcome);
        });
    }

    fn is_disconnected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Disconnected
    }

    async fn drive(self, body: String, mut pending: PendingResponse) -> Result<(), PublishError> {
        let mut attempts = 0;

        loop {
            let response = tokio::select! {
                biased;
                response = pending.wait() => {
                    response.map_err(|err| PublishError::Session(err.to_string()))?
                }
                _ = self.shutdown.cancelled() => return Err(PublishError::Disconnected),
            };

            match self.policy.decide(response.status_code, attempts) {
                RetryDecision::Delivered => return Ok(()),
                RetryDecision::Rejected => {
                    return Err(PublishError::Rejected {
                        status_code: response.status_code,
                    });
                }
                RetryDecision::Exhausted => {
                    warn!(attempts, "publish retries exhausted");
                    return Err(PublishError::AttemptsExhausted {
                        attempts: self.policy.max_attempts(),
                    });
                }
                RetryDecision::Retry { attempt } => {
                    attempts = attempt;
                    let delay = self.policy.delay_for_attempt(attempt, &mut rand::thread_rng());
                    debug!(
                        attempt,
                        status_code = response.status_code,
                        delay_ms = delay.as_millis() as u64,
                        "retrying publish"
                    );

                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(PublishError::Disconnected),
                        _ = tokio::time::sleep(delay) => {}
                    }

                    if self.is_disconnected() {
                        return Err(PublishError::Disconnected);
                    }
                    pending = self.session.send_request(OutboundRequest::info(body.clone()));
                }
            }
        }
    }
}

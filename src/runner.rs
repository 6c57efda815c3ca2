use std::future::Future;

use futures::future::try_join_all;
use kube_client::Client;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, RestartPolicy},
    controller::{EventController, FeedFailure, Termination},
    counter::CounterRegistry,
    kind::ResourceKind,
    Error,
};

/// Counts the events of every kind in `config` until `cancel` is triggered.
///
/// All controllers are constructed before any event is reconciled;
/// a kind whose feed cannot be opened fails the whole call with [`RunError::Start`].
pub async fn run(
    client: Client,
    config: &Config,
    counters: &dyn CounterRegistry,
    cancel: CancellationToken,
) -> Result<(), RunError> {
    run_with(config, cancel, |kind: &ResourceKind| {
        EventController::new(client.clone(), kind.clone(), counters)
    })
    .await
}

/// Like [`run`], but constructs each controller with `open`.
///
/// `open` is called once per kind at startup,
/// and again on every restart under [`RestartPolicy::FreshEpoch`].
pub async fn run_with<OpenFn, OpenFut>(
    config: &Config,
    cancel: CancellationToken,
    open: OpenFn,
) -> Result<(), RunError>
where
    OpenFn: Fn(&ResourceKind) -> OpenFut,
    OpenFut: Future<Output = Result<EventController, Error>>,
{
    let mut controllers = Vec::with_capacity(config.kinds().len());
    for kind in config.kinds() {
        controllers.push(open(kind).await.map_err(RunError::Start)?);
    }

    let cancel = cancel.child_token();
    let result = try_join_all(controllers.into_iter().map(|controller| {
        supervise(
            controller,
            config.restart_policy(),
            cancel.clone(),
            &open,
        )
    }))
    .await;

    // stops the remaining controllers if one of them failed
    cancel.cancel();
    result.map(|_| ())
}

async fn supervise<OpenFn, OpenFut>(
    mut controller: EventController,
    policy: RestartPolicy,
    cancel: CancellationToken,
    open: &OpenFn,
) -> Result<(), RunError>
where
    OpenFn: Fn(&ResourceKind) -> OpenFut,
    OpenFut: Future<Output = Result<EventController, Error>>,
{
    loop {
        let result = controller.run(cancel.clone()).await;
        let backoff = match (result, policy) {
            (Ok(Termination::Cancelled(_)), _) => return Ok(()),
            (Ok(Termination::FeedClosed(_)), RestartPolicy::Never) => return Ok(()),
            (Err(failure), RestartPolicy::Never) => return Err(RunError::Feed(failure)),
            (Ok(Termination::FeedClosed(_)), RestartPolicy::FreshEpoch { backoff }) => {
                log::info!(
                    "{} feed closed, restarting with a fresh epoch in {backoff:?}",
                    controller.kind().controller_name()
                );
                backoff
            }
            (Err(failure), RestartPolicy::FreshEpoch { backoff }) => {
                log::warn!("{failure}, restarting in {backoff:?}");
                backoff
            }
        };

        controller = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(backoff) => {}
            }

            match open(controller.kind()).await {
                Ok(next) => break next,
                Err(err) => log::error!(
                    "Failed to restart {}: {err}",
                    controller.kind().controller_name()
                ),
            }
        };
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A controller could not be constructed at startup.
    #[error("failed to start event controller: {0}")]
    Start(#[source] Error),
    /// The feed of a kind failed under [`RestartPolicy::Never`].
    #[error(transparent)]
    Feed(#[from] FeedFailure),
}

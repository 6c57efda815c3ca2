//! The change-feed of events concerning one resource kind.

use std::future::Future;

use futures::{stream, stream::BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Event;
use kube_client::{Api, Client};
use kube_core::{params::WatchParams, ErrorResponse, WatchEvent};

use crate::{kind::ResourceKind, Error};

/// An effectively infinite sequence of events for one resource kind.
///
/// Orderly closure of the underlying watch by the apiserver is not visible here;
/// the feed only ends after an `Err` item, which is always its last item.
pub type EventFeed = BoxStream<'static, Result<Event, FeedError>>;

/// One watch connection as returned by [`Api::watch`].
pub type WatchStream = BoxStream<'static, Result<WatchEvent<Event>, kube_client::Error>>;

/// Opens a cluster-wide watch on events whose involved object is of the type `kind`.
///
/// Filtering happens on the apiserver through a field selector,
/// so events of other kinds are never delivered.
/// Failure to open the watch is returned as [`Error::Subscribe`] without retry.
/// When the apiserver closes the watch after its request timeout,
/// the watch is reopened from the last seen resource version.
pub async fn watch(client: Client, kind: &ResourceKind) -> Result<EventFeed, Error> {
    let api = Api::<Event>::all(client);
    let params = WatchParams::default().fields(&kind.field_selector());

    let first = api
        .watch(&params, "0")
        .await
        .map_err(|source| Error::Subscribe {
            kind: kind.clone(),
            source,
        })?
        .boxed();

    Ok(resume(first, move |version: String| {
        let api = api.clone();
        let params = params.clone();
        async move { api.watch(&params, &version).await.map(StreamExt::boxed) }
    }))
}

/// Turns consecutive watch connections into one feed.
///
/// `first` is consumed until it closes, then `rewatch` is called with the resource version of
/// the last delivered event or bookmark, and so on. Added, modified and deleted deliveries all
/// yield the event. The feed ends after the first error, be it a failed `rewatch`,
/// a transport error or an error reported inside the watch.
pub fn resume<RewatchFn, RewatchFut>(first: WatchStream, rewatch: RewatchFn) -> EventFeed
where
    RewatchFn: FnMut(String) -> RewatchFut + Send + 'static,
    RewatchFut: Future<Output = Result<WatchStream, kube_client::Error>> + Send + 'static,
{
    let state = Resume {
        current: Some(first),
        version: "0".to_owned(),
        rewatch,
        failed: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.failed {
                return None;
            }

            let Some(current) = state.current.as_mut() else {
                match (state.rewatch)(state.version.clone()).await {
                    Ok(next) => state.current = Some(next),
                    Err(err) => {
                        state.failed = true;
                        return Some((Err(FeedError::Transport(err)), state));
                    }
                }
                continue;
            };

            match current.next().await {
                Some(Ok(
                    WatchEvent::Added(event)
                    | WatchEvent::Modified(event)
                    | WatchEvent::Deleted(event),
                )) => {
                    if let Some(version) = &event.metadata.resource_version {
                        state.version.clone_from(version);
                    }
                    return Some((Ok(event), state));
                }
                Some(Ok(WatchEvent::Bookmark(bookmark))) => {
                    state.version = bookmark.metadata.resource_version;
                }
                Some(Ok(WatchEvent::Error(err))) => {
                    state.failed = true;
                    return Some((Err(FeedError::Api(err)), state));
                }
                Some(Err(err)) => {
                    state.failed = true;
                    return Some((Err(FeedError::Transport(err)), state));
                }
                None => {
                    log::debug!("Event watch closed, resuming from version {}", state.version);
                    state.current = None;
                }
            }
        }
    })
    .boxed()
}

struct Resume<RewatchFn> {
    current: Option<WatchStream>,
    version: String,
    rewatch: RewatchFn,
    failed: bool,
}

/// A finite feed delivering `events` in order, then closing.
pub fn from_events<I>(events: I) -> EventFeed
where
    I: IntoIterator<Item = Event>,
    I::IntoIter: Send + 'static,
{
    stream::iter(events).map(Ok).boxed()
}

/// A finite feed delivering `items` in order, then closing.
pub fn from_results<I>(items: I) -> EventFeed
where
    I: IntoIterator<Item = Result<Event, FeedError>>,
    I::IntoIter: Send + 'static,
{
    stream::iter(items).boxed()
}

/// Termination of an open feed other than orderly closure.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The watch connection failed.
    #[error("watch connection failed: {0}")]
    Transport(#[source] kube_client::Error),
    /// The apiserver reported an error inside the watch stream, e.g. an expired resource version.
    #[error("apiserver reported watch error: {0}")]
    Api(#[source] ErrorResponse),
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, future::ready, sync::Arc};

    use futures::{stream, StreamExt};
    use k8s_openapi::{api::core::v1::Event, apimachinery::pkg::apis::meta::v1::ObjectMeta};
    use kube_core::{
        watch::{Bookmark, BookmarkMeta},
        ErrorResponse, TypeMeta, WatchEvent,
    };
    use parking_lot::Mutex;

    use super::{from_events, from_results, resume, FeedError, WatchStream};

    fn event(reason: &str) -> Event {
        Event {
            reason: Some(reason.to_owned()),
            ..Event::default()
        }
    }

    fn versioned(reason: &str, version: &str) -> Event {
        Event {
            metadata: ObjectMeta {
                resource_version: Some(version.to_owned()),
                ..ObjectMeta::default()
            },
            ..event(reason)
        }
    }

    fn expired() -> ErrorResponse {
        ErrorResponse {
            status: "Failure".into(),
            message: "too old resource version".into(),
            reason: "Expired".into(),
            code: 410,
        }
    }

    fn bookmark(version: &str) -> WatchEvent<Event> {
        WatchEvent::Bookmark(Bookmark {
            types: TypeMeta {
                api_version: "v1".into(),
                kind: "Event".into(),
            },
            metadata: BookmarkMeta {
                resource_version: version.to_owned(),
                annotations: Default::default(),
            },
        })
    }

    fn connection(items: Vec<Result<WatchEvent<Event>, kube_client::Error>>) -> WatchStream {
        stream::iter(items).boxed()
    }

    /// Reopens watches from `queued`; records the version of each reopen.
    #[derive(Clone, Default)]
    struct Rewatches {
        queued: Arc<Mutex<VecDeque<WatchStream>>>,
        versions: Arc<Mutex<Vec<String>>>,
    }

    type Reopen = std::future::Ready<Result<WatchStream, kube_client::Error>>;

    impl Rewatches {
        fn rewatch(&self) -> impl FnMut(String) -> Reopen + Send + 'static {
            let this = self.clone();
            move |version| {
                this.versions.lock().push(version);
                let next = this.queued.lock().pop_front();
                ready(next.ok_or_else(|| kube_client::Error::Api(expired())))
            }
        }
    }

    async fn reasons_until_error(feed: super::EventFeed) -> (Vec<String>, Option<FeedError>) {
        let items: Vec<_> = feed.collect().await;
        let mut reasons = Vec::new();
        let mut error = None;
        for item in items {
            match item {
                Ok(event) => reasons.push(event.reason.unwrap_or_default()),
                Err(err) => {
                    assert!(error.is_none(), "feed continued after an error");
                    error = Some(err);
                }
            }
        }
        (reasons, error)
    }

    #[tokio::test]
    async fn watch_events_are_mapped_uniformly() {
        let rewatches = Rewatches::default();
        let feed = resume(
            connection(vec![
                Ok(WatchEvent::Added(event("added"))),
                Ok(bookmark("3")),
                Ok(WatchEvent::Modified(event("modified"))),
                Ok(WatchEvent::Deleted(event("deleted"))),
                Ok(WatchEvent::Error(expired())),
                Ok(WatchEvent::Added(event("after error"))),
            ]),
            rewatches.rewatch(),
        );

        let (reasons, error) = reasons_until_error(feed).await;
        assert_eq!(reasons, ["added", "modified", "deleted"]);
        assert!(matches!(error, Some(FeedError::Api(err)) if err.code == 410));
        assert!(rewatches.versions.lock().is_empty());
    }

    #[tokio::test]
    async fn transport_error_ends_feed() {
        let rewatches = Rewatches::default();
        let feed = resume(
            connection(vec![
                Ok(WatchEvent::Added(event("a"))),
                Err(kube_client::Error::Api(expired())),
                Ok(WatchEvent::Added(event("b"))),
            ]),
            rewatches.rewatch(),
        );

        let (reasons, error) = reasons_until_error(feed).await;
        assert_eq!(reasons, ["a"]);
        assert!(matches!(error, Some(FeedError::Transport(_))));
        assert!(rewatches.versions.lock().is_empty());
    }

    #[tokio::test]
    async fn closed_watch_resumes_from_last_version() {
        let rewatches = Rewatches::default();
        rewatches.queued.lock().extend([
            connection(vec![Ok(WatchEvent::Added(versioned("b", "7"))), Ok(bookmark("9"))]),
            connection(vec![]),
            connection(vec![Ok(WatchEvent::Modified(versioned("c", "12")))]),
        ]);
        let feed = resume(
            connection(vec![Ok(WatchEvent::Added(versioned("a", "5")))]),
            rewatches.rewatch(),
        );

        let (reasons, error) = reasons_until_error(feed).await;
        assert_eq!(reasons, ["a", "b", "c"]);
        assert_eq!(*rewatches.versions.lock(), ["5", "9", "9", "12"]);
        // the fourth reopen finds nothing queued and fails
        assert!(matches!(error, Some(FeedError::Transport(_))));
    }

    #[tokio::test]
    async fn synthetic_feed_preserves_order_and_closes() {
        let reasons: Vec<_> = from_events(vec![event("a"), event("b"), event("c")])
            .map(|item| item.unwrap().reason.unwrap())
            .collect()
            .await;
        assert_eq!(reasons, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn synthetic_feed_delivers_errors() {
        let mut feed = from_results(vec![Ok(event("a")), Err(FeedError::Api(expired()))]);
        assert!(feed.next().await.unwrap().is_ok());
        assert!(matches!(feed.next().await, Some(Err(FeedError::Api(_)))));
        assert!(feed.next().await.is_none());
    }
}

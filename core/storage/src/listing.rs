//! Lazily paginated remote listing.

use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use bucketsync_common::Result;
use crate::provider::ObjectStore;

/// Stream of listed keys.
pub type KeyStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

enum Cursor {
    Start,
    Next(String),
    Exhausted,
}

struct ListingState {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    buffered: VecDeque<String>,
    cursor: Cursor,
    pages: usize,
}

/// List every key under `prefix`, following continuation tokens to the end.
///
/// Pages are fetched on demand. A page error ends the stream after yielding
/// the error, so a consumer never mistakes a partial listing for a complete one.
pub fn list_keys(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> KeyStream {
    let state = ListingState {
        store,
        prefix: prefix.into(),
        buffered: VecDeque::new(),
        cursor: Cursor::Start,
        pages: 0,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(key) = state.buffered.pop_front() {
                return Some((Ok(key), state));
            }

            let token = match &state.cursor {
                Cursor::Exhausted => return None,
                Cursor::Start => None,
                Cursor::Next(token) => Some(token.clone()),
            };

            match state.store.list_page(&state.prefix, token.as_deref()).await {
                Ok(page) => {
                    state.pages += 1;
                    debug!(
                        "Listed page {} under '{}': {} keys",
                        state.pages,
                        state.prefix,
                        page.keys.len()
                    );
                    state.buffered.extend(page.keys);
                    state.cursor = match page.next_token {
                        Some(next) => Cursor::Next(next),
                        None => Cursor::Exhausted,
                    };
                }
                Err(e) => {
                    state.cursor = Cursor::Exhausted;
                    state.buffered.clear();
                    return Some((Err(e), state));
                }
            }
        }
    }))
}

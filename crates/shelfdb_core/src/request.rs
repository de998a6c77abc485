//! Pending results of queued operations.

use crate::cursor::Cursor;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use shelfdb_codec::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// The untyped result of a drained operation.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub enum Response {
    /// No value.
    Empty,
    /// A record value, if found.
    Value(Option<Value>),
    /// A key, if found.
    Key(Option<Key>),
    /// Record values.
    Values(Vec<Value>),
    /// Keys.
    Keys(Vec<Key>),
    /// A record count.
    Count(u64),
    /// A positioned cursor, or `None` once exhausted.
    Cursor(Option<Cursor>),
}

/// Conversion from a [`Response`] into the type a request resolves to.
pub trait FromResponse: Sized {
    #[doc(hidden)]
    fn from_response(response: Response) -> CoreResult<Self>;
}

fn mismatch(response: &Response) -> CoreError {
    CoreError::invalid_state(format!("unexpected response {response:?}"))
}

macro_rules! from_response {
    ($ty:ty, $variant:ident) => {
        impl FromResponse for $ty {
            fn from_response(response: Response) -> CoreResult<Self> {
                match response {
                    Response::$variant(v) => Ok(v),
                    other => Err(mismatch(&other)),
                }
            }
        }
    };
}

from_response!(Option<Value>, Value);
from_response!(Option<Key>, Key);
from_response!(Vec<Value>, Values);
from_response!(Vec<Key>, Keys);
from_response!(u64, Count);
from_response!(Option<Cursor>, Cursor);

impl FromResponse for () {
    fn from_response(response: Response) -> CoreResult<Self> {
        match response {
            Response::Empty => Ok(()),
            other => Err(mismatch(&other)),
        }
    }
}

impl FromResponse for Key {
    fn from_response(response: Response) -> CoreResult<Self> {
        match response {
            Response::Key(Some(key)) => Ok(key),
            other => Err(mismatch(&other)),
        }
    }
}

/// A handle to the result of a queued operation.
///
/// Awaiting it yields the operation's value once the transaction has drained
/// up to it. If the operation fails the transaction aborts unless
/// [`Request::prevent_abort`] was called beforehand. Requests cancelled by
/// an abort resolve to `AbortError`.
#[must_use = "requests do nothing observable unless awaited"]
pub struct Request<T> {
    receiver: oneshot::Receiver<CoreResult<Response>>,
    prevent_abort: Arc<AtomicBool>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("prevent_abort", &self.prevent_abort.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T> Request<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<CoreResult<Response>>, prevent_abort: Arc<AtomicBool>) -> Self {
        Self {
            receiver,
            prevent_abort,
            _marker: PhantomData,
        }
    }

    /// Marks a failure of this request as handled: the transaction keeps
    /// running instead of aborting.
    pub fn prevent_abort(self) -> Self {
        self.prevent_abort.store(true, Ordering::SeqCst);
        self
    }
}

impl<T: FromResponse> Future for Request<T> {
    type Output = CoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(Ok(response))) => Poll::Ready(T::from_response(response)),
            Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(err)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CoreError::abort("the transaction was aborted"))),
            Poll::Pending => Poll::Pending,
        }
    }
}

//! The handoff between a remote renderer and the render thread.
//!
//! A transport thread takes the latest requested view and publishes the
//! latest received image. The render thread never blocks on either.

pub use crate::render::View;

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, TryLockError},
};

/// A latest-value slot shared by the render thread and a transport thread.
#[derive(Clone, Default)]
pub struct RemoteHandoff {
    state: Arc<Mutex<RemoteState>>,
}

/// A view requested by the render thread.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RemoteRequest {
    /// It increases with each request.
    pub timestamp: u64,
    pub view: View,
}

/// An image received for a request.
#[derive(Clone, PartialEq)]
pub struct RemoteFrame {
    /// `[H * W]`
    pub colors_rgb: Vec<[u8; 3]>,
    pub height: u32,
    /// The timestamp of the request it answers.
    pub request_timestamp: u64,
    pub width: u32,
}

#[derive(Default)]
struct RemoteState {
    frame: Option<RemoteFrame>,
    /// The latest request which has not been taken by the transport.
    request_pending: Option<RemoteRequest>,
    /// The timestamp of the latest request, `0` if none.
    request_timestamp_latest: u64,
}

/// Render thread
impl RemoteHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requesting `view` without blocking.
    ///
    /// It replaces the pending request, and returns `None` if the slot is busy.
    pub fn try_request(
        &self,
        view: View,
    ) -> Option<RemoteRequest> {
        let mut state = self.try_lock()?;
        let request = RemoteRequest {
            timestamp: state.request_timestamp_latest + 1,
            view,
        };
        state.request_pending = Some(request);
        state.request_timestamp_latest = request.timestamp;
        Some(request)
    }

    /// Reading the latest frame without blocking.
    ///
    /// It returns `None` if no frame is received yet or the slot is busy.
    pub fn try_frame(&self) -> Option<RemoteFrame> {
        self.try_lock()?.frame.to_owned()
    }

    /// Whether `frame` answers the latest request.
    ///
    /// An older frame is a preview. It returns `None` if the slot is busy.
    pub fn try_is_current(
        &self,
        frame: &RemoteFrame,
    ) -> Option<bool> {
        let state = self.try_lock()?;
        Some(state.request_timestamp_latest == frame.request_timestamp)
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, RemoteState>> {
        match self.state.try_lock() {
            Ok(state) => Some(state),
            // NOTE: The state stays consistent since every write is a whole value.
            Err(TryLockError::Poisoned(error)) => Some(error.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// Transport thread
impl RemoteHandoff {
    /// Taking the pending request.
    pub fn take_request(&self) -> Option<RemoteRequest> {
        self.lock().request_pending.take()
    }

    /// Publishing `frame` as the latest frame.
    pub fn publish_frame(
        &self,
        frame: RemoteFrame,
    ) {
        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::viewer::remote",
            "publish_frame > {frame:?}",
        );

        self.lock().frame = Some(frame);
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state
            .lock()
            .unwrap_or_else(|error| error.into_inner())
    }
}

impl fmt::Debug for RemoteHandoff {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("RemoteHandoff")
            .field("strong_count", &Arc::strong_count(&self.state))
            .finish()
    }
}

impl fmt::Debug for RemoteFrame {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("RemoteFrame")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("request_timestamp", &self.request_timestamp)
            .finish()
    }
}

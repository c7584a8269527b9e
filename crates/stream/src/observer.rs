// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Observer interface implemented by the stream's owner.

use tether_core::Status;

/// Receives stream lifecycle notifications.
///
/// The stream holds its observer weakly; notifications to an observer that
/// has been dropped are skipped. Callbacks run on the stream's executor with
/// no stream lock held, so they may call back into the stream.
pub trait StreamObserver: Send + Sync {
    /// The stream is open and accepts writes.
    fn on_open(&self);

    /// A message arrived. Returning an error closes the stream with that
    /// status (`Internal` if the status is `Ok`).
    fn on_response(&self, message: &[u8]) -> Result<(), Status>;

    /// The stream closed. `Ok` means a graceful close.
    fn on_close(&self, status: &Status);
}

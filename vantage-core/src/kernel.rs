//! Abstraction over the kernel-resident packet tracer.
//!
//! The real implementation (loading a precompiled object, attaching it via
//! the traffic-control classifier/action mechanism, and reading a shared
//! memory ring) requires a Linux host with elevated privileges and lives in
//! the `vantage-agent` binary crate. This trait lets the rest of the flow
//! pipeline be exercised without one.

use async_trait::async_trait;

use crate::error::TracerError;

/// A raw, variable-length frame as read off the kernel ring, prefixed with
/// the 6-byte `[ifindex: u32 LE][skb_len: u16 LE]` metadata header.
pub type RawFrame = Vec<u8>;

/// Open/read/close contract for the kernel event ring.
#[async_trait]
pub trait KernelRing: Send + Sync {
    /// Attach to all interfaces matching `iface_regex`; returns an error
    /// only if attachment failed on *every* matching link.
    async fn open(&self, iface_regex: &str) -> Result<(), TracerError>;

    /// Block until the next frame is available, or `None` once closed.
    async fn read(&self) -> Option<RawFrame>;

    /// Detach the program from every link it was attached to and release
    /// kernel resources. Best-effort: errors are collected, not fatal.
    async fn close(&self) -> Result<(), TracerError>;
}

/// Deterministic in-memory [`KernelRing`] driven by tests.
pub struct FakeKernelRing {
    rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<RawFrame>>,
}

impl FakeKernelRing {
    /// Build a fake ring plus the sending half tests use to inject frames.
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedSender<RawFrame>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            FakeKernelRing {
                rx: tokio::sync::Mutex::new(rx),
            },
            tx,
        )
    }
}

#[async_trait]
impl KernelRing for FakeKernelRing {
    async fn open(&self, _iface_regex: &str) -> Result<(), TracerError> {
        Ok(())
    }

    async fn read(&self) -> Option<RawFrame> {
        self.rx.lock().await.recv().await
    }

    async fn close(&self) -> Result<(), TracerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_ring_delivers_injected_frames_in_order() {
        let (ring, tx) = FakeKernelRing::new();
        tx.send(vec![1, 2, 3]).unwrap();
        tx.send(vec![4, 5, 6]).unwrap();
        assert_eq!(ring.read().await, Some(vec![1, 2, 3]));
        assert_eq!(ring.read().await, Some(vec![4, 5, 6]));
    }

    #[tokio::test]
    async fn fake_ring_closes_when_sender_drops() {
        let (ring, tx) = FakeKernelRing::new();
        drop(tx);
        assert_eq!(ring.read().await, None);
    }
}

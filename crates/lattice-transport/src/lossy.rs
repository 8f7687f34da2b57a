//! Fault injection for outbound datagrams

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::channel::Channel;
use crate::error::TransportResult;

/// Wraps a channel and silently loses some of what it sends.
///
/// Loss is either scripted (`drop_next`) or random with a fixed
/// probability. A dropped datagram reports success to the caller, the same
/// way a real network loss would go unnoticed.
pub struct LossyChannel<C> {
    inner: C,
    drop_next: AtomicUsize,
    drop_rate: f64,
    rng: Mutex<StdRng>,
    dropped: AtomicU64,
}

impl<C: Channel> LossyChannel<C> {
    /// Lossless until told otherwise
    pub fn new(inner: C) -> Self {
        Self::with_drop_rate(inner, 0.0, 0)
    }

    /// Drop each datagram with probability `drop_rate`, reproducibly
    pub fn with_drop_rate(inner: C, drop_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            drop_next: AtomicUsize::new(0),
            drop_rate: drop_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Lose the next `n` outbound datagrams
    pub fn drop_next(&self, n: usize) {
        self.drop_next.fetch_add(n, Ordering::SeqCst);
    }

    /// Total datagrams lost so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn should_drop(&self) -> bool {
        let scripted = self
            .drop_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        scripted || (self.drop_rate > 0.0 && self.rng.lock().gen_bool(self.drop_rate))
    }
}

#[async_trait]
impl<C: Channel> Channel for LossyChannel<C> {
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> TransportResult<usize> {
        if self.should_drop() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(target = %target, bytes = data.len(), "datagram dropped");
            return Ok(data.len());
        }
        self.inner.send_to(data, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::UdpChannel;
    use std::time::Duration;

    async fn pair() -> (LossyChannel<UdpChannel>, UdpChannel) {
        let a = UdpChannel::bind("127.0.0.1:0").await.unwrap();
        let b = UdpChannel::bind("127.0.0.1:0").await.unwrap();
        (LossyChannel::new(a), b)
    }

    #[tokio::test]
    async fn test_scripted_drop() {
        let (lossy, b) = pair().await;
        let target = b.local_addr().unwrap();
        lossy.drop_next(1);

        lossy.send_to(b"first", target).await.unwrap();
        lossy.send_to(b"second", target).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"second");
        assert_eq!(lossy.dropped(), 1);
    }

    #[tokio::test]
    async fn test_full_loss() {
        let a = UdpChannel::bind("127.0.0.1:0").await.unwrap();
        let b = UdpChannel::bind("127.0.0.1:0").await.unwrap();
        let lossy = LossyChannel::with_drop_rate(a, 1.0, 7);

        for _ in 0..5 {
            lossy.send_to(b"gone", b.local_addr().unwrap()).await.unwrap();
        }
        assert_eq!(lossy.dropped(), 5);

        let mut buf = [0u8; 16];
        let received = tokio::time::timeout(Duration::from_millis(100), b.recv_from(&mut buf)).await;
        assert!(received.is_err());
    }
}

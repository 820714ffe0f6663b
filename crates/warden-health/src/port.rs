//! TCP reachability probe.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::probe::ProbeOutcome;

/// Attempt a single TCP connection within `timeout`.
pub async fn tcp_connect(address: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(%address, error = %e, "port probe connection failed");
            false
        }
        Err(_) => {
            debug!(%address, "port probe timed out");
            false
        }
    }
}

/// Probe `address`, retrying once after `retry_delay` before declaring
/// failure so a service that is still starting is not flagged.
pub async fn port_probe(address: &str, connect_timeout: Duration, retry_delay: Duration) -> ProbeOutcome {
    if tcp_connect(address, connect_timeout).await {
        return ProbeOutcome::healthy(format!("{address} reachable"));
    }

    tokio::time::sleep(retry_delay).await;

    if tcp_connect(address, connect_timeout).await {
        ProbeOutcome::healthy(format!("{address} reachable on retry"))
    } else {
        ProbeOutcome::failed(format!("{address} unreachable after retry"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use warden_core::ProbeStatus;

    const T: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn listening_port_is_healthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let outcome = port_probe(&addr, T, Duration::from_millis(10)).await;
        assert_eq!(outcome.status, ProbeStatus::Healthy);
    }

    #[tokio::test]
    async fn closed_port_fails_after_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let started = std::time::Instant::now();
        let outcome = port_probe(&addr, T, Duration::from_millis(50)).await;
        assert_eq!(outcome.status, ProbeStatus::Failed);
        assert!(outcome.reason.contains("after retry"));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn slow_starter_recovers_on_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let rebind = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            TcpListener::bind(addr).await.unwrap()
        });

        let outcome = port_probe(&addr.to_string(), T, Duration::from_millis(200)).await;
        let _listener = rebind.await.unwrap();
        assert_eq!(outcome.status, ProbeStatus::Healthy);
        assert!(outcome.reason.contains("on retry"));
    }
}

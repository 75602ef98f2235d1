//! Dials one or more agents and consumes their `get_traces` stream with
//! retry/backoff, re-subscribing whenever a stream terminates.

use std::time::Duration;

use tokio::net::lookup_host;
use tokio_stream::StreamExt;
use tonic::transport::{Channel, Endpoint};
use tracing::{info, warn};
use vantage_model::FlowRecord;
use vantage_proto::TracerClient;

/// Fixed retry interval between dial and re-subscribe attempts, matching the
/// gateway's linear backoff policy.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Failures from the collector's gateway client.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to resolve target {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no endpoints resolved for target {0}")]
    NoEndpoints(String),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("grpc call failed: {0}")]
    Status(#[from] tonic::Status),
}

/// Resolve `target` into one or more dialable endpoints.
///
/// Supports a `dns:///host:port` discovery scheme (every A/AAAA record
/// behind `host` becomes its own endpoint, load-balanced round-robin) and a
/// plain `host:port` address (a single endpoint).
async fn resolve(target: &str) -> Result<Vec<Endpoint>, GatewayError> {
    let authority = target.strip_prefix("dns:///").unwrap_or(target);
    let addrs = lookup_host(authority)
        .await
        .map_err(|source| GatewayError::Resolve {
            target: target.to_string(),
            source,
        })?;

    let endpoints: Vec<Endpoint> = addrs
        .map(|addr| format!("http://{addr}"))
        .filter_map(|uri| Endpoint::from_shared(uri).ok())
        .collect();

    if endpoints.is_empty() {
        return Err(GatewayError::NoEndpoints(target.to_string()));
    }
    Ok(endpoints)
}

/// Resolve and connect once; round-robin balanced when `target` resolves to
/// more than one address.
async fn try_connect(target: &str) -> Result<Channel, GatewayError> {
    let endpoints = resolve(target).await?;
    if endpoints.len() == 1 {
        Ok(endpoints.into_iter().next().unwrap().connect().await?)
    } else {
        Ok(Channel::balance_list(endpoints.into_iter()))
    }
}

/// Dial `target`, retrying at a fixed interval until the first connection
/// succeeds. Never returns `Err`: connection options disable the usual
/// fail-fast behavior in favor of blocking the caller until a channel is up.
pub async fn dial(target: &str) -> Channel {
    loop {
        match try_connect(target).await {
            Ok(channel) => {
                info!(%target, "gateway connected");
                return channel;
            }
            Err(e) => {
                warn!(%target, error = %e, "gateway dial failed, retrying");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

/// Runs the gateway's fetch loop forever: holds one `get_traces`
/// subscription at a time, re-subscribing (after the same fixed retry
/// interval) whenever the stream ends.
pub async fn run(target: String, on_trace: impl Fn(FlowRecord) + Send + Sync + 'static) {
    let channel = dial(&target).await;
    let mut client = TracerClient::new(channel);

    loop {
        let stream = match client
            .get_traces(vantage_proto::GetTracesRequest {})
            .await
        {
            Ok(response) => response.into_inner(),
            Err(e) => {
                warn!(error = %e, "get_traces call failed, retrying");
                tokio::time::sleep(RETRY_INTERVAL).await;
                continue;
            }
        };

        info!("subscribed to get_traces");
        let mut stream = stream;
        loop {
            match stream.next().await {
                Some(Ok(resp)) => {
                    let Some(trace) = resp.trace else { continue };
                    match FlowRecord::try_from(trace) {
                        Ok(record) => on_trace(record),
                        Err(e) => warn!(error = %e, "dropping unconvertible trace"),
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "get_traces stream error, re-subscribing");
                    break;
                }
                None => {
                    warn!("get_traces stream ended, re-subscribing");
                    break;
                }
            }
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_rejects_unresolvable_host() {
        let err = resolve("this-host-does-not-exist.invalid:3001")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Resolve { .. }));
    }

    #[tokio::test]
    async fn resolve_strips_dns_scheme() {
        let endpoints = resolve("dns:///localhost:3001").await.unwrap();
        assert!(!endpoints.is_empty());
    }
}

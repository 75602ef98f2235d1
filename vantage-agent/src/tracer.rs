//! Production [`KernelRing`]: attaches the bundled kernel tracer program to
//! every local interface matching a regular expression via the traffic
//! control classifier/action mechanism, and forwards the raw event ring to
//! the pipeline's poller.
//!
//! Requires a Linux host with `CAP_NET_ADMIN` and the `kernel` feature; the
//! rest of the workspace (and this crate's tests) exercise the pipeline
//! against [`vantage_core::kernel::FakeKernelRing`] instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vantage_core::ifindex::IfindexMap;
use vantage_core::kernel::{KernelRing, RawFrame};
use vantage_core::error::TracerError;

/// How often the `ifindex -> ifname` map is rebuilt from the live interface
/// list (link names and indexes can change out from under a long-running
/// agent).
const IFACE_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Discover every local interface whose name matches `iface_regex`.
fn matching_interfaces(iface_regex: &Regex) -> Vec<(u32, String)> {
    netdev::get_interfaces()
        .into_iter()
        .filter(|iface| iface_regex.is_match(&iface.name))
        .map(|iface| (iface.index, iface.name))
        .collect()
}

struct Handles {
    #[cfg(feature = "kernel")]
    ebpf: aya::Ebpf,
    attached_ifaces: Vec<String>,
}

/// TC-attached kernel tracer. One process attaches to all matching links;
/// `read()` drains a single merged channel fed by a background poller task.
pub struct LiveKernelRing {
    ifindex_map: Arc<IfindexMap>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    handles: Mutex<Option<Handles>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    ifindex_refresher: Mutex<Option<JoinHandle<()>>>,
    rx: Mutex<Option<mpsc::Receiver<RawFrame>>>,
}

impl LiveKernelRing {
    pub fn new(ifindex_map: Arc<IfindexMap>, poll_interval: Duration) -> Self {
        LiveKernelRing {
            ifindex_map,
            poll_interval,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(None),
            poller: Mutex::new(None),
            ifindex_refresher: Mutex::new(None),
            rx: Mutex::new(None),
        }
    }

    fn spawn_ifindex_refresher(&self, iface_regex: Regex) -> JoinHandle<()> {
        let map = Arc::clone(&self.ifindex_map);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(IFACE_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        map.rebuild(matching_interfaces(&iface_regex));
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(feature = "kernel")]
mod kernel_impl {
    use super::*;
    use aya::maps::RingBuf;
    use aya::programs::{tc, SchedClassifier, TcAttachType};
    use aya::Ebpf;

    /// Bytes of the compiled kernel tracer program, built out-of-tree by the
    /// workspace's eBPF build step and placed alongside this crate.
    static TRACER_OBJECT: &[u8] = aya::include_bytes_aligned!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/bpf/tracer.o"
    ));

    pub(super) fn load_and_attach(
        iface_regex: &Regex,
    ) -> Result<(Ebpf, Vec<String>), TracerError> {
        let mut ebpf =
            Ebpf::load(TRACER_OBJECT).map_err(|e| TracerError::LoadFailed(e.to_string()))?;

        let mut attached = Vec::new();
        for (_ifindex, name) in matching_interfaces(iface_regex) {
            if let Err(e) = tc::qdisc_add_clsact(&name) {
                if e.raw_os_error() != Some(17) {
                    warn!(iface = %name, error = %e, "failed to install clsact qdisc");
                    continue;
                }
                debug!(iface = %name, "clsact qdisc already present, reusing");
            }

            let program: &mut SchedClassifier = match ebpf
                .program_mut("vantage_tracer")
                .and_then(|p| p.try_into().ok())
            {
                Some(p) => p,
                None => {
                    warn!("tracer object has no vantage_tracer classifier program");
                    continue;
                }
            };
            if let Err(e) = program.load() {
                warn!(iface = %name, error = %e, "failed to load classifier program");
                continue;
            }
            if let Err(e) = program.attach(&name, TcAttachType::Ingress) {
                warn!(iface = %name, error = %e, "failed to attach classifier program");
                continue;
            }
            info!(iface = %name, "kernel tracer attached (ingress)");
            attached.push(name);
        }

        if attached.is_empty() {
            return Err(TracerError::NoInterfaceAttached);
        }
        Ok((ebpf, attached))
    }

    pub(super) fn take_ring_buf(ebpf: &mut Ebpf) -> Result<RingBuf<aya::maps::MapData>, TracerError> {
        let map = ebpf
            .take_map("EVENTS")
            .ok_or_else(|| TracerError::LoadFailed("tracer object has no EVENTS map".into()))?;
        RingBuf::try_from(map).map_err(|e| TracerError::LoadFailed(e.to_string()))
    }

    pub(super) fn detach_all(iface_names: &[String]) -> Result<(), TracerError> {
        let mut first_err = None;
        for name in iface_names {
            if let Err(e) = tc::qdisc_detach_program(name, TcAttachType::Ingress, 0) {
                warn!(iface = %name, error = %e, "failed to detach classifier program");
                first_err.get_or_insert(anyhow::anyhow!("{name}: {e}"));
            }
        }
        match first_err {
            None => Ok(()),
            Some(source) => Err(TracerError::QdiscReplace {
                iface: iface_names.join(","),
                source,
            }),
        }
    }
}

#[async_trait]
impl KernelRing for LiveKernelRing {
    #[cfg(feature = "kernel")]
    async fn open(&self, iface_regex: &str) -> Result<(), TracerError> {
        let regex = Regex::new(iface_regex).map_err(|e| TracerError::LoadFailed(e.to_string()))?;

        let (mut ebpf, attached_ifaces) =
            tokio::task::block_in_place(|| kernel_impl::load_and_attach(&regex))?;
        let mut ring = tokio::task::block_in_place(|| kernel_impl::take_ring_buf(&mut ebpf))?;

        self.ifindex_map.rebuild(matching_interfaces(&regex));
        *self.ifindex_refresher.lock().await = Some(self.spawn_ifindex_refresher(regex));

        let (tx, rx) = mpsc::channel(4096);
        *self.rx.lock().await = Some(rx);

        let shutdown = self.shutdown.clone();
        let poll_interval = self.poll_interval;
        let poller = tokio::task::spawn_blocking(move || loop {
            if shutdown.is_cancelled() {
                break;
            }
            while let Some(item) = ring.next() {
                if tx.blocking_send(item.to_vec()).is_err() {
                    return;
                }
            }
            std::thread::sleep(poll_interval);
        });
        *self.poller.lock().await = Some(poller);

        *self.handles.lock().await = Some(Handles {
            ebpf,
            attached_ifaces,
        });
        Ok(())
    }

    #[cfg(not(feature = "kernel"))]
    async fn open(&self, _iface_regex: &str) -> Result<(), TracerError> {
        Err(TracerError::LoadFailed(
            "built without the `kernel` feature; rebuild vantage-agent with --features kernel \
             on a Linux host with CAP_NET_ADMIN"
                .to_string(),
        ))
    }

    async fn read(&self) -> Option<RawFrame> {
        let mut guard = self.rx.lock().await;
        match guard.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    #[cfg(feature = "kernel")]
    async fn close(&self) -> Result<(), TracerError> {
        self.shutdown.cancel();
        if let Some(handle) = self.poller.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.ifindex_refresher.lock().await.take() {
            let _ = handle.await;
        }
        self.rx.lock().await.take();

        let Some(handles) = self.handles.lock().await.take() else {
            return Ok(());
        };
        let result = kernel_impl::detach_all(&handles.attached_ifaces);
        drop(handles.ebpf);
        result
    }

    #[cfg(not(feature = "kernel"))]
    async fn close(&self) -> Result<(), TracerError> {
        self.shutdown.cancel();
        Ok(())
    }
}

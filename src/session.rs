//! Per-head UDP session: one sender thread, one receiver thread.
//!
//! The receive socket is bound to an ephemeral port with a large kernel
//! buffer; the send socket keeps its own ephemeral source port so datagram
//! ordering stays deterministic per head. The sender couples an outgoing
//! queue with a periodic scan-request slot: it wakes on queued traffic or
//! after half a second, and re-sends the scan request on every wake-up. The
//! receiver classifies datagrams by magic, demultiplexes profile fragments,
//! and ingests status.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use socket2::{Domain, Socket, Type};

use crate::alignment::TransformCoeffs;
use crate::assembler::ProfileAssembler;
use crate::fragment::FragmentSet;
use crate::iface::usable_ipv4_addresses;
use crate::packet::{
    self, build_broadcast_connect, magic_of, parse_status, PacketType, API_VERSION, BROADCAST_ADDR,
    DATA_PORT, MAGIC_CONTROL, MAGIC_DATA,
};
use crate::profile::ProfileQueue;
use crate::types::{Camera, ConnectionKind, ScanHeadStatus};
use crate::Result;

/// A head counts as connected while packets arrived this recently.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(500);

/// Periodic scan-request retransmission interval.
pub const SCAN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

/// An open fragment set is closed as incomplete after this long without
/// completing.
const FRAGMENT_SET_TIMEOUT: Duration = Duration::from_secs(1);

const RECV_POLL: Duration = Duration::from_millis(100);
const RECV_BUFFER_BYTES: usize = 1024 * 1024;

/// Receive-path counters. Bad packets are counted here and never surfaced.
#[derive(Debug, Default)]
pub struct SessionStats {
    bad_packets: AtomicU64,
    complete_profiles: AtomicU64,
    incomplete_profiles: AtomicU64,
}

impl SessionStats {
    pub fn bad_packets(&self) -> u64 {
        self.bad_packets.load(Ordering::Relaxed)
    }

    pub fn complete_profiles(&self) -> u64 {
        self.complete_profiles.load(Ordering::Relaxed)
    }

    pub fn incomplete_profiles(&self) -> u64 {
        self.incomplete_profiles.load(Ordering::Relaxed)
    }

    fn count_bad(&self) {
        self.bad_packets.fetch_add(1, Ordering::Relaxed);
    }

    fn count_set(&self, complete: bool) {
        if complete {
            self.complete_profiles.fetch_add(1, Ordering::Relaxed);
        } else {
            self.incomplete_profiles.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Everything the session needs from its head, snapshotted at connect time.
/// The session writes status and profiles back through this context; the
/// head never hands the session a pointer to itself.
pub(crate) struct HeadContext {
    pub serial: u32,
    pub head_id: u8,
    pub status: Mutex<Option<ScanHeadStatus>>,
    pub version_mismatch: Mutex<Option<String>>,
    pub queue: ProfileQueue,
    pub coeffs: [TransformCoeffs; Camera::ALL.len()],
    pub stats: SessionStats,
}

impl HeadContext {
    pub fn status_snapshot(&self) -> Option<ScanHeadStatus> {
        self.status.lock().ok().and_then(|s| s.clone())
    }

    pub fn mismatch_reason(&self) -> Option<String> {
        self.version_mismatch.lock().ok().and_then(|m| m.clone())
    }
}

/// An open session to one scan head.
pub(crate) struct ScanHeadSession {
    session_id: u8,
    context: Arc<HeadContext>,
    recv_port: u16,
    endpoint: Arc<Mutex<Option<SocketAddr>>>,
    last_seen: Arc<Mutex<Option<Instant>>>,
    outgoing_tx: Sender<Vec<u8>>,
    scan_request: Arc<Mutex<Option<Vec<u8>>>>,
    stop_flag: Arc<AtomicBool>,
    sender_thread: Option<std::thread::JoinHandle<()>>,
    receiver_thread: Option<std::thread::JoinHandle<()>>,
}

impl ScanHeadSession {
    /// Bind both sockets, start both threads, and broadcast the connect
    /// request on every usable interface.
    pub fn open(
        session_id: u8,
        kind: ConnectionKind,
        context: Arc<HeadContext>,
    ) -> Result<ScanHeadSession> {
        let recv_socket = {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
            socket.set_recv_buffer_size(RECV_BUFFER_BYTES)?;
            let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, 0).into();
            socket.bind(&bind_addr.into())?;
            let socket: UdpSocket = socket.into();
            socket.set_read_timeout(Some(RECV_POLL))?;
            socket
        };
        let recv_port = recv_socket.local_addr()?.port();
        let send_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;

        let endpoint = Arc::new(Mutex::new(None));
        let last_seen = Arc::new(Mutex::new(None));
        let scan_request = Arc::new(Mutex::new(None));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (outgoing_tx, outgoing_rx) = unbounded::<Vec<u8>>();

        let sender_thread = std::thread::Builder::new()
            .name(format!("head-{}-tx", context.serial))
            .spawn({
                let endpoint = Arc::clone(&endpoint);
                let scan_request = Arc::clone(&scan_request);
                let stop_flag = Arc::clone(&stop_flag);
                move || sender_loop(send_socket, outgoing_rx, scan_request, endpoint, stop_flag)
            })?;

        let receiver_thread = std::thread::Builder::new()
            .name(format!("head-{}-rx", context.serial))
            .spawn({
                let context = Arc::clone(&context);
                let endpoint = Arc::clone(&endpoint);
                let last_seen = Arc::clone(&last_seen);
                let scan_request = Arc::clone(&scan_request);
                let outgoing_tx = outgoing_tx.clone();
                let stop_flag = Arc::clone(&stop_flag);
                move || {
                    receiver_loop(
                        recv_socket,
                        context,
                        endpoint,
                        last_seen,
                        scan_request,
                        outgoing_tx,
                        stop_flag,
                    )
                }
            })?;

        let session = ScanHeadSession {
            session_id,
            context,
            recv_port,
            endpoint,
            last_seen,
            outgoing_tx,
            scan_request,
            stop_flag,
            sender_thread: Some(sender_thread),
            receiver_thread: Some(receiver_thread),
        };
        session.broadcast_connect(kind);
        Ok(session)
    }

    /// Send the connect request out of every usable interface. Per-interface
    /// failures are logged and skipped; the head only has to hear one.
    fn broadcast_connect(&self, kind: ConnectionKind) {
        let addresses = usable_ipv4_addresses();
        if addresses.is_empty() {
            log::warn!(
                "head {}: no usable interface for broadcast connect",
                self.context.serial
            );
        }
        for local_ip in addresses {
            let request = build_broadcast_connect(
                local_ip,
                self.recv_port,
                self.session_id,
                0,
                kind,
                self.context.serial,
            );
            let attempt = || -> std::io::Result<()> {
                let socket = UdpSocket::bind((local_ip, 0))?;
                socket.set_broadcast(true)?;
                socket.send_to(&request, (BROADCAST_ADDR, DATA_PORT))?;
                Ok(())
            };
            match attempt() {
                Ok(()) => log::debug!(
                    "head {}: connect broadcast from {local_ip}",
                    self.context.serial
                ),
                Err(e) => log::warn!(
                    "head {}: connect broadcast from {local_ip} failed: {e}",
                    self.context.serial
                ),
            }
        }
    }

    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    pub fn receive_port(&self) -> u16 {
        self.recv_port
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint.lock().ok().and_then(|e| *e)
    }

    /// Liveness: a packet arrived within the last half second and no fatal
    /// version mismatch has been latched.
    pub fn is_connected(&self) -> bool {
        if self.context.mismatch_reason().is_some() {
            return false;
        }
        self.last_seen
            .lock()
            .ok()
            .and_then(|t| *t)
            .map(|t| t.elapsed() < LIVENESS_TIMEOUT)
            .unwrap_or(false)
    }

    /// Queue a packet for immediate transmission.
    pub fn send_packet(&self, packet: Vec<u8>) {
        let _ = self.outgoing_tx.send(packet);
    }

    /// Install the periodic scan request; it is re-sent on every sender
    /// wake-up until cleared.
    pub fn set_scan_request(&self, request: Vec<u8>) {
        if let Ok(mut slot) = self.scan_request.lock() {
            *slot = Some(request);
        }
    }

    pub fn clear_scan_request(&self) {
        if let Ok(mut slot) = self.scan_request.lock() {
            *slot = None;
        }
    }

    pub fn is_scan_request_set(&self) -> bool {
        self.scan_request
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.sender_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.receiver_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ScanHeadSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn send_to_endpoint(socket: &UdpSocket, endpoint: &Mutex<Option<SocketAddr>>, packet: &[u8]) {
    let target = match endpoint.lock() {
        Ok(guard) => *guard,
        Err(_) => None,
    };
    match target {
        Some(addr) => {
            if let Err(e) = socket.send_to(packet, addr) {
                log::warn!("send to {addr} failed: {e}");
            }
        }
        None => log::debug!("dropping outgoing packet, endpoint not yet known"),
    }
}

/// Sender loop: drains the outgoing queue when signaled, and re-sends the
/// periodic scan request on every wake-up, signaled or not.
fn sender_loop(
    socket: UdpSocket,
    outgoing_rx: Receiver<Vec<u8>>,
    scan_request: Arc<Mutex<Option<Vec<u8>>>>,
    endpoint: Arc<Mutex<Option<SocketAddr>>>,
    stop_flag: Arc<AtomicBool>,
) {
    log::info!("sender started");
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }
        match outgoing_rx.recv_timeout(SCAN_REQUEST_INTERVAL) {
            Ok(packet) => {
                send_to_endpoint(&socket, &endpoint, &packet);
                while let Ok(packet) = outgoing_rx.try_recv() {
                    send_to_endpoint(&socket, &endpoint, &packet);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        let request = match scan_request.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(request) = request {
            send_to_endpoint(&socket, &endpoint, &request);
        }
    }
    log::info!("sender stopped");
}

/// Receiver loop: classify by magic, route fragments through the demux and
/// assembler, ingest status, maintain liveness.
fn receiver_loop(
    socket: UdpSocket,
    context: Arc<HeadContext>,
    endpoint: Arc<Mutex<Option<SocketAddr>>>,
    last_seen: Arc<Mutex<Option<Instant>>>,
    scan_request: Arc<Mutex<Option<Vec<u8>>>>,
    outgoing_tx: Sender<Vec<u8>>,
    stop_flag: Arc<AtomicBool>,
) {
    log::info!(
        "receiver started for head {} (id {})",
        context.serial,
        context.head_id
    );
    let mut assembler = ProfileAssembler::new(context.queue.clone(), context.coeffs);
    let mut current: Option<FragmentSet> = None;
    let mut buf = vec![0u8; 65536];

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }

        let received = match socket.recv_from(&mut buf) {
            Ok(r) => Some(r),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                None
            }
            Err(e) => {
                log::warn!("head {}: receive error: {e}", context.serial);
                None
            }
        };

        // Sweep: a set that sat incomplete too long is closed out so its
        // columns are not lost forever.
        if let Some(set) = current.as_ref() {
            if set.created().elapsed() > FRAGMENT_SET_TIMEOUT {
                context.stats.count_set(set.is_complete());
                assembler.assemble(set);
                current = None;
            }
        }

        let (len, peer) = match received {
            Some(r) => r,
            None => continue,
        };
        let datagram = &buf[..len];

        match magic_of(datagram) {
            Some(MAGIC_DATA) => {
                stamp(&last_seen);
                let fragment = match packet::DataFragment::parse(datagram) {
                    Ok(f) => f,
                    Err(e) => {
                        context.stats.count_bad();
                        log::debug!("head {}: bad data packet: {e}", context.serial);
                        continue;
                    }
                };

                // A fragment from a different source or timestamp closes the
                // open set; stragglers of the old profile are dropped later
                // as bad packets.
                if let Some(set) = current.as_ref() {
                    if !set.accepts(&fragment) {
                        context.stats.count_set(set.is_complete());
                        assembler.assemble(set);
                        current = None;
                    }
                }
                match current.as_mut() {
                    None => current = Some(FragmentSet::new(fragment, Instant::now())),
                    Some(set) => {
                        set.add(fragment);
                    }
                }
                if current.as_ref().is_some_and(|s| s.is_complete()) {
                    if let Some(set) = current.take() {
                        context.stats.count_set(true);
                        assembler.assemble(&set);
                    }
                }
            }
            Some(MAGIC_CONTROL) if packet::control_type_of(datagram) == Some(PacketType::Status) => {
                let status = match parse_status(datagram) {
                    Ok(s) => s,
                    Err(e) => {
                        context.stats.count_bad();
                        log::debug!("head {}: bad status packet: {e}", context.serial);
                        continue;
                    }
                };
                if status.serial != context.serial {
                    context.stats.count_bad();
                    continue;
                }
                stamp(&last_seen);

                if status.firmware.major != API_VERSION.major {
                    let reason = format!(
                        "head {} runs firmware {}, client speaks {}",
                        context.serial, status.firmware, API_VERSION
                    );
                    log::warn!("{reason}; disconnecting");
                    if let Ok(mut mismatch) = context.version_mismatch.lock() {
                        *mismatch = Some(reason);
                    }
                    if let Ok(mut slot) = scan_request.lock() {
                        *slot = None;
                    }
                    // Best-effort disconnect, then stop ingesting.
                    if let Ok(mut guard) = endpoint.lock() {
                        guard.get_or_insert(peer);
                    }
                    let _ = outgoing_tx.send(packet::build_disconnect());
                    break;
                }

                // The head replies from its data socket; the reply source is
                // the control endpoint from here on.
                if let Ok(mut guard) = endpoint.lock() {
                    if guard.is_none() {
                        log::info!("head {}: endpoint bound to {peer}", context.serial);
                        *guard = Some(peer);
                    }
                }
                if let Ok(mut slot) = context.status.lock() {
                    *slot = Some(status);
                }
            }
            _ => {
                context.stats.count_bad();
                log::debug!(
                    "head {}: unclassifiable {len}-byte datagram from {peer}",
                    context.serial
                );
            }
        }
    }

    // Close out whatever was in flight when the session stopped.
    if let Some(set) = current.take() {
        context.stats.count_set(set.is_complete());
        assembler.assemble(&set);
    }
    log::info!("receiver stopped for head {}", context.serial);
}

fn stamp(last_seen: &Mutex<Option<Instant>>) {
    if let Ok(mut guard) = last_seen.lock() {
        *guard = Some(Instant::now());
    }
}

//! Single-writer send channel for one device.
//!
//! # Busy-drop
//!
//! At most one transfer is in flight. `submit_async()` claims the slot or
//! drops the frame; it never queues and never blocks on I/O. The transfer
//! itself runs on a `Workers` thread and releases the slot when it ends,
//! whether it succeeded or failed.
//!
//! # Stuck transfers
//!
//! Every accepted transfer gets a new epoch. A submission that finds the
//! slot held for longer than the transfer timeout reclaims it: the stuck
//! transfer keeps its transport and is abandoned, a fresh transport is
//! connected for the new one, and a late completion of the old epoch no
//! longer touches the slot. The worker thread left blocked by it is
//! replaced so later transfers still run.
//!
//! # Shared slots
//!
//! The slot belongs to the device, not to the channel. A channel reopened on
//! the same device with `DeviceChannel::with_slot` shares it, so a transfer
//! started through the old channel still blocks the new one.
//!
//! # Direct send
//!
//! `send_now()` is the operator path (solid color, one-shot image). It waits
//! for the slot instead of dropping and performs the write on the caller.

use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{DeviceError, DeviceInfo, Transport};
use crate::core::event_bus::EventEmitter;
use crate::core::events::{ErrorEvent, SendFinishedEvent, SendStartedEvent};
use crate::core::workers::Workers;

/// Opens a transport for a device
pub type Connector =
    Arc<dyn Fn(&DeviceInfo) -> Result<Box<dyn Transport>, DeviceError> + Send + Sync>;

#[derive(Default)]
struct SlotState {
    epoch: u64,
    since: Option<Instant>,
    transport: Option<Box<dyn Transport>>,
}

/// In-flight state of one device, shared by every channel opened on it
#[derive(Default)]
pub struct DeviceSlot {
    busy: AtomicBool,
    state: Mutex<SlotState>,
    idle: Condvar,
}

impl DeviceSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the slot for a new epoch. Caller holds the state lock.
    fn claim(&self, st: &mut SlotState) -> (u64, Option<Box<dyn Transport>>) {
        st.epoch += 1;
        st.since = Some(Instant::now());
        self.busy.store(true, Ordering::Release);
        (st.epoch, st.transport.take())
    }

    /// Release the slot if `epoch` still owns it. Stale epochs are ignored.
    fn release(&self, epoch: u64, transport: Option<Box<dyn Transport>>) {
        let mut st = self.lock();
        if st.epoch != epoch {
            debug!("Ignoring completion of stale transfer epoch {}", epoch);
            return;
        }
        st.transport = transport;
        st.since = None;
        self.busy.store(false, Ordering::Release);
        self.idle.notify_all();
    }
}

#[derive(Default)]
struct ChannelStats {
    completed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

pub struct DeviceChannel {
    device: DeviceInfo,
    connector: Connector,
    slot: Arc<DeviceSlot>,
    stats: Arc<ChannelStats>,
    workers: Arc<Workers>,
    emitter: EventEmitter,
    timeout: Duration,
}

impl DeviceChannel {
    pub fn new(
        device: DeviceInfo,
        connector: Connector,
        workers: Arc<Workers>,
        emitter: EventEmitter,
        timeout: Duration,
    ) -> Self {
        Self::with_slot(
            device,
            connector,
            workers,
            emitter,
            timeout,
            Arc::new(DeviceSlot::default()),
        )
    }

    /// Channel on an existing device slot
    pub fn with_slot(
        device: DeviceInfo,
        connector: Connector,
        workers: Arc<Workers>,
        emitter: EventEmitter,
        timeout: Duration,
        slot: Arc<DeviceSlot>,
    ) -> Self {
        Self {
            device,
            connector,
            slot,
            stats: Arc::new(ChannelStats::default()),
            workers,
            emitter,
            timeout,
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn slot(&self) -> &Arc<DeviceSlot> {
        &self.slot
    }

    pub fn is_busy(&self) -> bool {
        self.slot.busy.load(Ordering::Acquire)
    }

    pub fn sends_completed(&self) -> u64 {
        self.stats.completed.load(Ordering::Relaxed)
    }

    pub fn sends_dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    pub fn sends_failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Hand a payload to the background worker.
    ///
    /// Returns false when the frame was dropped because a transfer is in flight.
    pub fn submit_async(&self, payload: Vec<u8>, width: u32, height: u32) -> bool {
        let (epoch, transport, reclaimed) = {
            let mut st = self.slot.lock();
            let reclaimed = self.is_busy() && self.reclaim_if_stuck(&mut st);
            if self.is_busy() && !reclaimed {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Device busy, dropping {}x{} frame", width, height);
                return false;
            }
            let (epoch, transport) = self.slot.claim(&mut st);
            (epoch, transport, reclaimed)
        };

        if reclaimed {
            self.after_reclaim();
        }
        self.emitter.emit(SendStartedEvent { width, height });

        let device = self.device.clone();
        let connector = Arc::clone(&self.connector);
        let slot = Arc::clone(&self.slot);
        let stats = Arc::clone(&self.stats);
        let emitter = self.emitter.clone();

        let accepted = self.workers.execute(move || {
            let started = Instant::now();
            let (transport, result) =
                transfer(&device, &connector, transport, &payload, width, height);
            let _ = report(&emitter, &stats, &device, result, width, height, started);
            slot.release(epoch, transport);
        });

        if !accepted {
            self.slot.release(epoch, None);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            error!("No transfer worker available for {}", self.device.path.display());
            self.emitter
                .emit(ErrorEvent("No transfer worker available".to_string()));
        }
        accepted
    }

    /// Blocking one-shot send on the caller thread. Waits for an in-flight
    /// transfer to finish (up to the transfer timeout) instead of dropping.
    pub fn send_now(&self, payload: &[u8], width: u32, height: u32) -> Result<(), DeviceError> {
        let (epoch, transport, reclaimed) = {
            let mut st = self.slot.lock();
            let mut reclaimed = false;
            // Wait until idle, or until the in-flight transfer counts as stuck
            while self.is_busy() {
                if self.reclaim_if_stuck(&mut st) {
                    reclaimed = true;
                    break;
                }
                let wait = st
                    .since
                    .map(|since| (since + self.timeout).saturating_duration_since(Instant::now()))
                    .unwrap_or_default()
                    .max(Duration::from_millis(1));
                st = self
                    .slot
                    .idle
                    .wait_timeout(st, wait)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
            }
            let (epoch, transport) = self.slot.claim(&mut st);
            (epoch, transport, reclaimed)
        };

        if reclaimed {
            self.after_reclaim();
        }
        self.emitter.emit(SendStartedEvent { width, height });

        let started = Instant::now();
        let (transport, result) =
            transfer(&self.device, &self.connector, transport, payload, width, height);
        let outcome =
            report(&self.emitter, &self.stats, &self.device, result, width, height, started);
        self.slot.release(epoch, transport);
        outcome
    }

    /// Block until no transfer is in flight or `timeout` passes. True when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.slot.lock();
        while self.is_busy() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            st = self
                .slot
                .idle
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        true
    }

    /// Caller holds the slot lock. Returns true if the slot was taken over;
    /// the caller then runs `after_reclaim` once the lock is released.
    fn reclaim_if_stuck(&self, st: &mut SlotState) -> bool {
        match st.since {
            Some(since) if since.elapsed() >= self.timeout => {
                warn!(
                    "Transfer to {} stuck for {} ms, reclaiming",
                    self.device.path.display(),
                    since.elapsed().as_millis()
                );
                // The abandoned transfer still owns the old transport
                st.transport = None;
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Subscribers may call back into the channel, so this runs unlocked
    fn after_reclaim(&self) {
        self.workers.replace_stuck();
        self.emitter.emit(ErrorEvent(DeviceError::Timeout.to_string()));
    }
}

/// Connect if needed and write. Keeps the transport only on success so a
/// failed device gets reopened next time.
fn transfer(
    device: &DeviceInfo,
    connector: &Connector,
    transport: Option<Box<dyn Transport>>,
    payload: &[u8],
    width: u32,
    height: u32,
) -> (Option<Box<dyn Transport>>, Result<(), DeviceError>) {
    let transport = match transport {
        Some(t) => Ok(t),
        None => connector(device),
    };
    match transport {
        Ok(mut t) => match t.send(payload, width, height) {
            Ok(()) => (Some(t), Ok(())),
            Err(e) => (None, Err(e)),
        },
        Err(e) => (None, Err(e)),
    }
}

fn report(
    emitter: &EventEmitter,
    stats: &ChannelStats,
    device: &DeviceInfo,
    result: Result<(), DeviceError>,
    width: u32,
    height: u32,
    started: Instant,
) -> Result<(), DeviceError> {
    match result {
        Ok(()) => {
            stats.completed.fetch_add(1, Ordering::Relaxed);
            emitter.emit(SendFinishedEvent {
                width,
                height,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
            Ok(())
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            error!("Send to {} failed: {}", device.path.display(), e);
            emitter.emit(ErrorEvent(format!("Send failed: {}", e)));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::EventBus;
    use crossbeam_channel::{Receiver, Sender, bounded};
    use std::sync::atomic::AtomicUsize;

    /// Transport that blocks each send until the test releases it
    struct GatedTransport {
        gate: Receiver<()>,
        written: Sender<usize>,
    }

    impl Transport for GatedTransport {
        fn send(&mut self, payload: &[u8], _w: u32, _h: u32) -> Result<(), DeviceError> {
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
            let _ = self.written.send(payload.len());
            Ok(())
        }
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn send(&mut self, _payload: &[u8], _w: u32, _h: u32) -> Result<(), DeviceError> {
            Err(DeviceError::Write("unplugged".to_string()))
        }
    }

    fn counter<E: crate::core::event_bus::Event>(bus: &EventBus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe::<E, _>(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    fn gated_channel(
        bus: &EventBus,
        timeout: Duration,
    ) -> (DeviceChannel, Sender<()>, Receiver<usize>) {
        let (gate_tx, gate_rx) = bounded::<()>(16);
        let (written_tx, written_rx) = bounded::<usize>(16);
        let connector: Connector = Arc::new(move |_dev: &DeviceInfo| {
            Ok(Box::new(GatedTransport {
                gate: gate_rx.clone(),
                written: written_tx.clone(),
            }) as Box<dyn Transport>)
        });
        let channel = DeviceChannel::new(
            DeviceInfo::new("/dev/sg0", "LCD"),
            connector,
            Arc::new(Workers::new(2)),
            bus.emitter(),
            timeout,
        );
        (channel, gate_tx, written_rx)
    }

    fn wait_idle(channel: &DeviceChannel) {
        assert!(channel.wait_idle(Duration::from_secs(5)), "transfer never finished");
    }

    #[test]
    fn test_submit_while_busy_drops() {
        let bus = EventBus::new();
        let started = counter::<SendStartedEvent>(&bus);
        let (channel, gate, written) = gated_channel(&bus, Duration::from_secs(30));

        assert!(channel.submit_async(vec![0; 8], 2, 2));
        assert!(!channel.submit_async(vec![0; 8], 2, 2));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(channel.sends_dropped(), 1);

        gate.send(()).unwrap();
        assert_eq!(written.recv_timeout(Duration::from_secs(5)).unwrap(), 8);
        wait_idle(&channel);
        assert!(!channel.is_busy());
    }

    #[test]
    fn test_submit_returns_before_transfer() {
        let bus = EventBus::new();
        let (channel, gate, written) = gated_channel(&bus, Duration::from_secs(30));

        let t0 = Instant::now();
        assert!(channel.submit_async(vec![0; 4], 1, 1));
        assert!(t0.elapsed() < Duration::from_secs(1));
        assert!(written.try_recv().is_err());

        gate.send(()).unwrap();
        written.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_failure_clears_busy() {
        let bus = EventBus::new();
        let errors = counter::<ErrorEvent>(&bus);
        let connector: Connector =
            Arc::new(|_dev: &DeviceInfo| Ok(Box::new(FailingTransport) as Box<dyn Transport>));
        let channel = DeviceChannel::new(
            DeviceInfo::new("/dev/sg0", "LCD"),
            connector,
            Arc::new(Workers::new(1)),
            bus.emitter(),
            Duration::from_secs(5),
        );

        assert!(channel.submit_async(vec![1; 4], 1, 1));
        wait_idle(&channel);
        assert!(!channel.is_busy());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(channel.sends_failed(), 1);

        // Next frame is accepted again
        assert!(channel.submit_async(vec![1; 4], 1, 1));
        wait_idle(&channel);
    }

    #[test]
    fn test_missing_device_reports_error() {
        let bus = EventBus::new();
        let errors = counter::<ErrorEvent>(&bus);
        let connector: Connector = Arc::new(|dev: &DeviceInfo| {
            Err(DeviceError::Open {
                path: dev.path.clone(),
                reason: "not found".to_string(),
            })
        });
        let channel = DeviceChannel::new(
            DeviceInfo::new("/dev/none", "LCD"),
            connector,
            Arc::new(Workers::new(1)),
            bus.emitter(),
            Duration::from_secs(5),
        );

        assert!(channel.send_now(&[0; 2], 1, 1).is_err());
        assert!(!channel.is_busy());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_now_waits_for_inflight() {
        let bus = EventBus::new();
        let finished = counter::<SendFinishedEvent>(&bus);
        let (channel, gate, written) = gated_channel(&bus, Duration::from_secs(30));

        assert!(channel.submit_async(vec![0; 4], 1, 1));
        // Release both the async transfer and the manual one
        gate.send(()).unwrap();
        gate.send(()).unwrap();
        channel.send_now(&[0; 6], 1, 1).unwrap();

        let mut sizes = vec![
            written.recv_timeout(Duration::from_secs(5)).unwrap(),
            written.recv_timeout(Duration::from_secs(5)).unwrap(),
        ];
        sizes.sort();
        assert_eq!(sizes, vec![4, 6]);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stuck_transfer_is_reclaimed() {
        let bus = EventBus::new();
        let errors = counter::<ErrorEvent>(&bus);
        let started = counter::<SendStartedEvent>(&bus);
        let (channel, gate, written) = gated_channel(&bus, Duration::from_millis(20));

        assert!(channel.submit_async(vec![0; 4], 1, 1));
        std::thread::sleep(Duration::from_millis(40));

        // Slot held past the timeout: the new frame takes it over
        assert!(channel.submit_async(vec![0; 6], 1, 1));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(started.load(Ordering::SeqCst), 2);

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        written.recv_timeout(Duration::from_secs(5)).unwrap();
        written.recv_timeout(Duration::from_secs(5)).unwrap();
        wait_idle(&channel);
        assert!(!channel.is_busy());
    }

    #[test]
    fn test_timeout_subscriber_can_use_channel() {
        let bus = EventBus::new();
        let (channel, gate, written) = gated_channel(&bus, Duration::from_millis(20));
        let channel = Arc::new(channel);

        let seen_busy = Arc::new(AtomicUsize::new(0));
        let (c, seen) = (Arc::clone(&channel), Arc::clone(&seen_busy));
        bus.subscribe::<ErrorEvent, _>(move |_| {
            // Would hang if the slot lock were still held
            if !c.wait_idle(Duration::from_millis(1)) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(channel.submit_async(vec![0; 4], 1, 1));
        std::thread::sleep(Duration::from_millis(40));
        assert!(channel.submit_async(vec![0; 6], 1, 1));
        assert_eq!(seen_busy.load(Ordering::SeqCst), 1);

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        written.recv_timeout(Duration::from_secs(5)).unwrap();
        written.recv_timeout(Duration::from_secs(5)).unwrap();
        wait_idle(&channel);
    }

    #[test]
    fn test_reclaim_keeps_transfers_running_on_one_worker() {
        let bus = EventBus::new();
        let (gate_tx, gate_rx) = bounded::<()>(16);
        let (written_tx, _written_rx) = bounded::<usize>(16);
        let (connected_tx, connected_rx) = bounded::<()>(16);
        let connector: Connector = Arc::new(move |_dev: &DeviceInfo| {
            let _ = connected_tx.send(());
            Ok(Box::new(GatedTransport {
                gate: gate_rx.clone(),
                written: written_tx.clone(),
            }) as Box<dyn Transport>)
        });
        let channel = DeviceChannel::new(
            DeviceInfo::new("/dev/sg0", "LCD"),
            connector,
            Arc::new(Workers::new(1)),
            bus.emitter(),
            Duration::from_millis(20),
        );

        assert!(channel.submit_async(vec![0; 4], 1, 1));
        connected_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(channel.submit_async(vec![0; 6], 1, 1));

        // The first transfer is still parked on the gate; the second one
        // must start on another thread instead of queueing behind it
        assert!(connected_rx.recv_timeout(Duration::from_secs(5)).is_ok());

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        wait_idle(&channel);
    }

    #[test]
    fn test_shared_slot_blocks_reopened_channel() {
        let bus = EventBus::new();
        let (first, gate, written) = gated_channel(&bus, Duration::from_secs(30));
        let second = DeviceChannel::with_slot(
            first.device().clone(),
            Arc::new(|_dev: &DeviceInfo| Ok(Box::new(FailingTransport) as Box<dyn Transport>)),
            Arc::new(Workers::new(1)),
            bus.emitter(),
            Duration::from_secs(30),
            Arc::clone(first.slot()),
        );

        assert!(first.submit_async(vec![0; 4], 1, 1));
        assert!(second.is_busy());
        assert!(!second.submit_async(vec![0; 4], 1, 1));
        assert_eq!(second.sends_dropped(), 1);

        gate.send(()).unwrap();
        written.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(second.wait_idle(Duration::from_secs(5)));
    }
}

//! Per-category data receivers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use mesak_frame::{Category, FrameError, PacketReader, TypedPacket};
use mesak_transport::Connector;
use serde::Serialize;

use crate::archive::Archive;
use crate::error::{DriverError, Result};
use crate::flag::{DeadlockFlag, WorkerThread};
use crate::queue::CategoryQueue;

/// Counters for one category since the driver was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    /// Packets that decoded successfully.
    pub received: u64,
    /// Malformed packets dropped.
    pub malformed: u64,
    /// Packets written to the archive.
    pub saved: u64,
    /// Packets handed to the buffer.
    pub buffered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    malformed: AtomicU64,
    saved: AtomicU64,
    buffered: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CategoryStats {
        CategoryStats {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
        }
    }
}

/// Buffers, flags and archive shared by the driver and its receivers.
pub(crate) struct DataPlane {
    queues: Vec<CategoryQueue<TypedPacket>>,
    save: [AtomicBool; Category::COUNT],
    collect: [AtomicBool; Category::COUNT],
    counters: [Counters; Category::COUNT],
    archive: Mutex<Option<Arc<dyn Archive>>>,
}

impl DataPlane {
    pub(crate) fn new(buffer_length: usize, collect: bool, save: bool) -> Result<Self> {
        let queues = Category::ALL
            .into_iter()
            .map(|category| CategoryQueue::new(category, buffer_length))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            queues,
            save: std::array::from_fn(|_| AtomicBool::new(save)),
            collect: std::array::from_fn(|_| AtomicBool::new(collect)),
            counters: Default::default(),
            archive: Mutex::new(None),
        })
    }

    pub(crate) fn queue(&self, category: Category) -> &CategoryQueue<TypedPacket> {
        &self.queues[category.index()]
    }

    pub(crate) fn queues(&self) -> impl Iterator<Item = &CategoryQueue<TypedPacket>> {
        self.queues.iter()
    }

    pub(crate) fn save(&self, category: Category) -> bool {
        self.save[category.index()].load(Ordering::Relaxed)
    }

    pub(crate) fn set_save(&self, category: Category, on: bool) {
        self.save[category.index()].store(on, Ordering::Relaxed);
    }

    pub(crate) fn collect(&self, category: Category) -> bool {
        self.collect[category.index()].load(Ordering::Relaxed)
    }

    pub(crate) fn set_collect(&self, category: Category, on: bool) {
        self.collect[category.index()].store(on, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self, category: Category) -> CategoryStats {
        self.counters[category.index()].snapshot()
    }

    pub(crate) fn set_archive(&self, archive: Option<Arc<dyn Archive>>) {
        *self.archive.lock().unwrap_or_else(PoisonError::into_inner) = archive;
    }

    fn archive(&self) -> Option<Arc<dyn Archive>> {
        self.archive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Route one decoded packet according to the category's flags.
    pub(crate) fn accept(&self, packet: TypedPacket) {
        let category = packet.category();
        let counters = &self.counters[category.index()];
        counters.received.fetch_add(1, Ordering::Relaxed);

        if self.save(category) {
            match self.archive() {
                Some(archive) => match archive.write_frame(category, packet.as_bytes()) {
                    Ok(()) => {
                        counters.saved.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        tracing::warn!(category = %category, error = %err, "archive write failed");
                    }
                },
                None => tracing::debug!(category = %category, "save requested without an archive"),
            }
        }

        if self.collect(category) {
            match self.queue(category).enqueue(packet) {
                Ok(()) => {
                    counters.buffered.fetch_add(1, Ordering::Relaxed);
                }
                Err(DriverError::QueueClosed(_)) => {
                    tracing::debug!(category = %category, "buffer closed or flushed, packet dropped");
                }
                Err(err) => tracing::warn!(category = %category, error = %err, "enqueue failed"),
            }
        }
    }

    fn note_malformed(&self, category: Category) {
        self.counters[category.index()]
            .malformed
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Receiver timing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReceiverTiming {
    pub connect_timeout: Duration,
    pub poll: Duration,
    pub backoff: Duration,
    pub deadlock_timeout: Duration,
}

/// A running data receiver for one category.
#[derive(Debug)]
pub(crate) struct Receiver {
    category: Category,
    worker: WorkerThread,
}

impl Receiver {
    pub(crate) fn start<C: Connector>(
        category: Category,
        addr: String,
        connector: Arc<C>,
        data: Arc<DataPlane>,
        timing: ReceiverTiming,
    ) -> Result<Self> {
        let name = format!("mesak-{}", category.prefix());
        let worker = WorkerThread::start(name, timing.deadlock_timeout, move |quit| {
            run(category, &addr, &*connector, &data, timing, &quit);
        })?;
        Ok(Self { category, worker })
    }

    pub(crate) fn category(&self) -> Category {
        self.category
    }

    pub(crate) fn request_quit(&self) -> Result<()> {
        self.worker.set_quit()
    }

    pub(crate) fn join(&mut self) {
        self.worker.join();
    }
}

fn quit_requested(quit: &DeadlockFlag) -> bool {
    match quit.get() {
        Ok(quit) => quit,
        Err(err) => {
            tracing::error!(error = %err, "receiver quit flag unavailable, stopping");
            true
        }
    }
}

/// Sleep up to `total`, waking early on quit. Returns true if quit was requested.
fn pause(quit: &DeadlockFlag, total: Duration, slice: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if quit_requested(quit) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(slice));
    }
}

fn run<C: Connector>(
    category: Category,
    addr: &str,
    connector: &C,
    data: &DataPlane,
    timing: ReceiverTiming,
    quit: &DeadlockFlag,
) {
    tracing::debug!(category = %category, addr = %addr, "receiver started");
    while !quit_requested(quit) {
        let stream = match connector.connect(addr, timing.connect_timeout) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::debug!(category = %category, addr = %addr, error = %err, "data port unavailable");
                if pause(quit, timing.backoff, timing.poll) {
                    break;
                }
                continue;
            }
        };

        let mut reader = match PacketReader::with_read_timeout(stream, category, Some(timing.poll)) {
            Ok(reader) => reader,
            Err(err) => {
                tracing::warn!(category = %category, error = %err, "could not configure data port");
                if pause(quit, timing.backoff, timing.poll) {
                    break;
                }
                continue;
            }
        };
        tracing::info!(category = %category, addr = %addr, "data port connected");

        loop {
            if quit_requested(quit) {
                tracing::debug!(category = %category, "receiver stopping");
                return;
            }
            match reader.read_packet() {
                Ok(packet) => data.accept(packet),
                Err(err) if err.is_timeout() => {}
                Err(err) if err.is_recoverable() => {
                    data.note_malformed(category);
                    tracing::warn!(category = %category, error = %err, "dropping malformed packet");
                }
                Err(FrameError::ConnectionClosed) => {
                    tracing::info!(category = %category, "data port closed by radar");
                    break;
                }
                Err(err) => {
                    tracing::warn!(category = %category, error = %err, "data port failed");
                    break;
                }
            }
        }

        if pause(quit, timing.backoff, timing.poll) {
            break;
        }
    }
    tracing::debug!(category = %category, "receiver stopped");
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;

    use mesak_frame::{encode, StatusData, StatusHeader, StatusPacket};
    use mesak_transport::TcpConnector;

    use super::*;

    fn status_bytes(sys_state: u32) -> Vec<u8> {
        let packet = StatusPacket::new(
            StatusHeader::default(),
            vec![StatusData {
                sys_state,
                ..StatusData::default()
            }],
        );
        encode(&packet).unwrap().to_vec()
    }

    fn timing() -> ReceiverTiming {
        ReceiverTiming {
            connect_timeout: Duration::from_millis(500),
            poll: Duration::from_millis(20),
            backoff: Duration::from_millis(50),
            deadlock_timeout: Duration::from_secs(2),
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn receiver_buffers_good_packets_and_counts_bad_ones() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let radar = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut bad = status_bytes(0);
            bad[12..16].copy_from_slice(&100u32.to_le_bytes());
            stream.write_all(&bad[..100]).unwrap();
            stream.write_all(&status_bytes(1)).unwrap();
            stream.write_all(&status_bytes(2)).unwrap();
            // Keep the port open until the receiver quits.
            let mut sink = [0u8; 1];
            let _ = std::io::Read::read(&mut stream, &mut sink);
        });

        let data = Arc::new(DataPlane::new(8, true, false).unwrap());
        let mut receiver = Receiver::start(
            Category::Status,
            addr,
            Arc::new(TcpConnector::new()),
            data.clone(),
            timing(),
        )
        .unwrap();
        assert_eq!(receiver.category(), Category::Status);

        wait_for(|| data.queue(Category::Status).occupied_count() == 2);
        let stats = data.stats(Category::Status);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.buffered, 2);
        assert_eq!(stats.malformed, 1);

        receiver.request_quit().unwrap();
        receiver.join();
        radar.join().unwrap();
    }

    #[test]
    fn collect_off_skips_buffer() {
        let data = DataPlane::new(4, false, false).unwrap();
        let bytes = status_bytes(3);
        let packet = mesak_frame::decode(
            mesak_frame::CompleteFrame::from_bytes(bytes),
            Category::Status,
        )
        .unwrap();
        data.accept(packet);
        assert_eq!(data.queue(Category::Status).occupied_count(), 0);
        assert_eq!(data.stats(Category::Status).received, 1);
    }

    #[test]
    fn receiver_retries_until_quit() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let data = Arc::new(DataPlane::new(4, true, false).unwrap());
        let mut receiver = Receiver::start(
            Category::Track,
            addr,
            Arc::new(TcpConnector::new()),
            data,
            timing(),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(120));
        receiver.request_quit().unwrap();
        receiver.join();
    }
}

//! End-to-end driver scenarios against a simulated radar on localhost.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use mesak_driver::{
    Archive, DirArchive, Driver, DriverConfig, MemoryEventLog, PortMap, SessionConfig,
    SessionState,
};
use mesak_frame::{encode, Category, StatusData, StatusHeader, StatusPacket};
use mesak_transport::TcpConnector;

const IDENTITY: &str = "ECHODYNE,MESA-K,SN0042,v11";

fn status_frame(sys_state: u32) -> Vec<u8> {
    let packet = StatusPacket::new(
        StatusHeader::default(),
        vec![StatusData {
            sys_state,
            ..StatusData::default()
        }],
    );
    encode(&packet).unwrap().to_vec()
}

/// Command port plus a status data port.
///
/// The command port serves clients one after another. `STATUS?` pushes
/// one status packet on the data port. `initial` packets are pushed as
/// soon as the data port is opened.
struct SimRadar {
    command_port: u16,
    status_port: u16,
}

impl SimRadar {
    fn spawn(initial: usize) -> Self {
        let command = TcpListener::bind("127.0.0.1:0").unwrap();
        let data = TcpListener::bind("127.0.0.1:0").unwrap();
        let command_port = command.local_addr().unwrap().port();
        let status_port = data.local_addr().unwrap().port();
        let (trigger, triggered) = mpsc::channel::<()>();

        thread::spawn(move || {
            for stream in command.incoming() {
                let Ok(stream) = stream else { return };
                serve_commands(stream, trigger.clone());
            }
        });

        thread::spawn(move || {
            let Ok((mut stream, _)) = data.accept() else {
                return;
            };
            for n in 0..initial {
                if stream.write_all(&status_frame(n as u32)).is_err() {
                    return;
                }
            }
            while triggered.recv().is_ok() {
                if stream.write_all(&status_frame(7)).is_err() {
                    return;
                }
            }
        });

        Self {
            command_port,
            status_port,
        }
    }

    fn config(&self, connect_timeout: Duration) -> DriverConfig {
        let mut ports = PortMap::command_only(self.command_port);
        ports.set_data_port(Category::Status, Some(self.status_port));
        DriverConfig {
            session: SessionConfig {
                connect_timeout,
                command_timeout: Duration::from_millis(500),
                ..SessionConfig::default()
            },
            ports,
            data_poll: Duration::from_millis(20),
            reconnect_backoff: Duration::from_millis(50),
            ..DriverConfig::default()
        }
    }
}

fn serve_commands(stream: TcpStream, trigger: mpsc::Sender<()>) {
    let mut writer = stream.try_clone().unwrap();
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { return };
        let reply = match line.trim_end_matches('\r') {
            "*IDN?" => format!("{IDENTITY}\r\nOK\r\n"),
            "STATUS?" => {
                let _ = trigger.send(());
                "OK\r\n".to_string()
            }
            _ => "IC\r\n".to_string(),
        };
        if writer.write_all(reply.as_bytes()).is_err() {
            return;
        }
    }
}

fn driver(config: DriverConfig) -> Driver {
    Driver::with_connector(TcpConnector::new(), config, Arc::new(MemoryEventLog::new())).unwrap()
}

fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while !cond() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

fn temp_dir(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "mesak-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

#[test]
fn connect_command_buffer_and_disconnect() {
    let radar = SimRadar::spawn(0);
    let driver = driver(radar.config(Duration::from_millis(200)));
    let fired = Arc::new(AtomicUsize::new(0));

    let (tx, rx) = mpsc::channel();
    let counter = fired.clone();
    driver
        .connect_async("127.0.0.1", move |ok| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(ok).unwrap();
        })
        .unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    assert_eq!(driver.state(), SessionState::ConnectedIdle);
    assert_eq!(driver.device_identity().as_deref(), Some(IDENTITY));

    let (tx, rx) = mpsc::channel();
    let counter = fired.clone();
    driver
        .send_command_async("STATUS?", move |response| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(response).unwrap();
        })
        .unwrap();
    let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(response.ok);

    assert!(wait_until(Duration::from_secs(3), || {
        driver.get_n_buffered(Category::Status) == 1
    }));
    let packet = driver.get_data(Category::Status).unwrap();
    let expected = (Category::Status.header_size() + Category::Status.record_size()) as u32;
    assert_eq!(packet.header().packet_size(), expected);
    assert_eq!(expected, 352);

    driver.disconnect().unwrap();
    assert_eq!(driver.state(), SessionState::Disconnected);
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[test]
fn silent_radar_fails_connect_within_timeout() {
    // Accepts TCP (kernel backlog) but never answers the identity query.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = DriverConfig {
        session: SessionConfig {
            connect_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        },
        ports: PortMap::command_only(port),
        ..DriverConfig::default()
    };
    let driver = driver(config);

    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    driver
        .connect_async("127.0.0.1", move |ok| tx.send(ok).unwrap())
        .unwrap();
    assert!(!rx.recv_timeout(Duration::from_secs(2)).unwrap());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(driver.state(), SessionState::Disconnected);
    drop(listener);
}

#[test]
fn disconnect_releases_receiver_blocked_on_full_buffer() {
    let radar = SimRadar::spawn(3);
    let mut config = radar.config(Duration::from_millis(500));
    config.buffer_length = 1;
    let driver = driver(config);

    driver.connect("127.0.0.1").unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        driver.get_n_buffered(Category::Status) == 1
    }));

    let started = Instant::now();
    driver.disconnect().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    // Buffered data survives the disconnect.
    assert_eq!(driver.get_n_buffered(Category::Status), 1);
    let status = driver.get_status().unwrap();
    assert_eq!(status.records[0].sys_state, 0);
}

#[test]
fn save_writes_frames_to_archive() {
    let radar = SimRadar::spawn(2);
    let driver = driver(radar.config(Duration::from_millis(500)));
    let dir = temp_dir("save");
    let archive = Arc::new(DirArchive::create(&dir).unwrap());
    driver.set_archive(Some(archive.clone() as Arc<dyn Archive>));
    driver.set_save(Category::Status, true);
    driver.set_collect(Category::Status, false);

    driver.connect("127.0.0.1").unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        driver.stats(Category::Status).saved == 2
    }));
    driver.disconnect().unwrap();

    assert_eq!(driver.get_n_buffered(Category::Status), 0);
    let stored = std::fs::read(archive.path_for(Category::Status)).unwrap();
    assert_eq!(stored.len(), 2 * 352);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn reconnect_restores_session() {
    let radar = SimRadar::spawn(0);
    let driver = driver(radar.config(Duration::from_millis(500)));
    driver.connect("127.0.0.1").unwrap();
    assert!(driver.send_command("BOGUS").is_ok_and(|r| !r.ok));
    assert!(driver.connect("127.0.0.1").is_err());

    driver.reconnect().unwrap();
    assert_eq!(driver.state(), SessionState::ConnectedIdle);
    assert!(driver.send_command("STATUS?").unwrap().ok);

    driver.disconnect().unwrap();
    driver.disconnect().unwrap();
    assert_eq!(driver.state(), SessionState::Disconnected);
}

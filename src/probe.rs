//! Background free-space probe.
//!
//! A worker thread owns the probing; the handle talks to it over an mpsc
//! channel. Readings are published into a mutex-guarded map that the worker
//! only locks for the insert, never across a capacity query.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::config::VolumeConfig;
use crate::platform::{Device, lower_thread_priority};

/// Latest published figures for one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceReading {
    pub free: u64,
    pub total: u64,
    /// Last query succeeded
    pub ok: bool,
    /// Time since the reading was published; `None` if never probed
    pub age: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Probing,
}

enum Command {
    Refresh,
    SetPresence(Vec<String>),
    Pause(Sender<()>),
    Resume,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct Published {
    free: u64,
    total: u64,
    ok: bool,
    at: Instant,
}

type Readings = Arc<Mutex<HashMap<String, Published>>>;

fn lock(r: &Readings) -> MutexGuard<'_, HashMap<String, Published>> {
    r.lock().unwrap_or_else(|p| p.into_inner())
}

pub struct FreeSpaceProbe {
    tx: Sender<Command>,
    readings: Readings,
    probing: Arc<AtomicU8>,
    paused: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct Worker {
    volumes: Vec<VolumeConfig>,
    present: Vec<String>,
    device: Arc<dyn Device>,
    readings: Readings,
    probing: Arc<AtomicU8>,
    paused: Arc<AtomicBool>,
    interval: Duration,
}

impl Worker {
    fn probe_all(&self) {
        self.probing.store(1, Ordering::SeqCst);
        for v in self.volumes.iter().filter(|v| self.present.iter().any(|p| p.eq_ignore_ascii_case(&v.id))) {
            let (free, total, ok) = match self.device.capacity(v) {
                Ok((f, t)) => (f, t, true),
                Err(e) => {
                    trace!(volume = %v.id, error = %e, "capacity query failed");
                    // Keep the last good figures, flag them stale.
                    let prev = lock(&self.readings).get(&v.id).copied();
                    prev.map(|p| (p.free, p.total, false)).unwrap_or((0, 0, false))
                }
            };
            lock(&self.readings).insert(
                v.id.clone(),
                Published {
                    free,
                    total,
                    ok,
                    at: Instant::now(),
                },
            );
        }
        self.probing.store(0, Ordering::SeqCst);
    }

    fn run(mut self, rx: mpsc::Receiver<Command>) {
        lower_thread_priority();
        debug!(volumes = self.volumes.len(), "free-space probe started");
        self.probe_all();
        loop {
            match rx.recv_timeout(self.interval) {
                Ok(Command::Refresh) | Err(RecvTimeoutError::Timeout) => {}
                Ok(Command::SetPresence(p)) => self.present = p,
                Ok(Command::Pause(ack)) => {
                    self.paused.store(true, Ordering::SeqCst);
                    let _ = ack.send(());
                    continue;
                }
                Ok(Command::Resume) => self.paused.store(false, Ordering::SeqCst),
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.paused.load(Ordering::SeqCst) {
                self.probe_all();
            }
        }
        debug!("free-space probe stopped");
    }
}

impl FreeSpaceProbe {
    /// Start the worker; every volume is considered present initially.
    pub fn spawn(volumes: Vec<VolumeConfig>, device: Arc<dyn Device>, interval: Duration) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let readings: Readings = Arc::default();
        let probing = Arc::new(AtomicU8::new(0));
        let paused = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            present: volumes.iter().map(|v| v.id.clone()).collect(),
            volumes,
            device,
            readings: readings.clone(),
            probing: probing.clone(),
            paused: paused.clone(),
            interval,
        };
        let handle = thread::Builder::new()
            .name("pkgshelf-probe".into())
            .spawn(move || worker.run(rx))?;
        Ok(Self {
            tx,
            readings,
            probing,
            paused,
            handle: Some(handle),
        })
    }

    fn send(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            warn!("free-space probe is not running");
        }
    }

    /// Latest reading for `volume`; stale or zero when none is available.
    pub fn get(&self, volume: &str) -> SpaceReading {
        let map = lock(&self.readings);
        let hit = map.iter().find(|(k, _)| k.eq_ignore_ascii_case(volume)).map(|(_, p)| *p);
        match hit {
            Some(p) => SpaceReading {
                free: p.free,
                total: p.total,
                ok: p.ok,
                age: Some(p.at.elapsed()),
            },
            None => SpaceReading {
                free: 0,
                total: 0,
                ok: false,
                age: None,
            },
        }
    }

    /// Wake the worker; never blocks.
    pub fn request_refresh(&self) {
        self.send(Command::Refresh);
    }

    /// Declare which volumes are mounted; triggers a probe.
    pub fn set_presence(&self, present: &[&str]) {
        self.send(Command::SetPresence(present.iter().map(|s| s.to_string()).collect()));
    }

    /// Stop probing. Waits up to `timeout` for the worker to acknowledge;
    /// returns whether it did.
    pub fn pause(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(Command::Pause(ack_tx));
        let acked = ack_rx.recv_timeout(timeout).is_ok();
        if !acked {
            warn!(?timeout, "free-space probe did not acknowledge pause");
        }
        acked
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Pause until the returned guard is dropped.
    pub fn pause_guard(&self, timeout: Duration) -> PauseGuard<'_> {
        self.pause(timeout);
        PauseGuard { probe: self }
    }

    pub fn state(&self) -> ProbeState {
        if self.probing.load(Ordering::SeqCst) == 1 {
            ProbeState::Probing
        } else {
            ProbeState::Idle
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl Drop for FreeSpaceProbe {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(h) = self.handle.take()
            && h.join().is_err()
        {
            warn!("free-space probe panicked");
        }
    }
}

/// Resumes the probe on drop.
pub struct PauseGuard<'a> {
    probe: &'a FreeSpaceProbe,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.probe.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct Fake {
        free: AtomicU64,
        calls: AtomicU64,
    }

    impl Device for Fake {
        fn relocate(&self, _v: &VolumeConfig, _s: &std::path::Path, _d: &std::path::Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "n/a"))
        }
        fn capacity(&self, v: &VolumeConfig) -> io::Result<(u64, u64)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if v.id == "bad" {
                return Err(io::Error::other("unmounted"));
            }
            Ok((self.free.load(Ordering::SeqCst), 1000))
        }
    }

    fn wait_for(mut f: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn fake(free: u64) -> Arc<Fake> {
        Arc::new(Fake {
            free: AtomicU64::new(free),
            calls: AtomicU64::new(0),
        })
    }

    #[test]
    fn publishes_and_refreshes() {
        let dev = fake(500);
        let vols = vec![VolumeConfig::new("ms0", "/a"), VolumeConfig::new("bad", "/b")];
        let probe = FreeSpaceProbe::spawn(vols, dev.clone(), Duration::from_secs(60)).unwrap();
        assert!(wait_for(|| probe.get("ms0").ok));
        assert_eq!(probe.get("MS0").free, 500);
        assert!(!probe.get("bad").ok);
        assert_eq!(probe.get("nope").age, None);

        dev.free.store(700, Ordering::SeqCst);
        probe.request_refresh();
        assert!(wait_for(|| probe.get("ms0").free == 700));
    }

    #[test]
    fn pause_blocks_probing_until_resume() {
        let dev = fake(1);
        let probe = FreeSpaceProbe::spawn(vec![VolumeConfig::new("ms0", "/a")], dev.clone(), Duration::from_secs(60))
            .unwrap();
        assert!(wait_for(|| probe.get("ms0").ok));
        {
            let _g = probe.pause_guard(Duration::from_secs(2));
            assert!(probe.is_paused());
            let before = dev.calls.load(Ordering::SeqCst);
            probe.request_refresh();
            thread::sleep(Duration::from_millis(50));
            assert_eq!(dev.calls.load(Ordering::SeqCst), before);
        }
        probe.request_refresh();
        assert!(wait_for(|| !probe.is_paused()));
    }

    #[test]
    fn presence_limits_probed_volumes() {
        let dev = fake(9);
        let vols = vec![VolumeConfig::new("ms0", "/a"), VolumeConfig::new("bad", "/b")];
        let probe = FreeSpaceProbe::spawn(vols, dev.clone(), Duration::from_secs(60)).unwrap();
        assert!(wait_for(|| probe.get("bad").age.is_some()));
        assert!(wait_for(|| probe.state() == ProbeState::Idle));

        let before = dev.calls.load(Ordering::SeqCst);
        probe.set_presence(&["ms0"]);
        probe.request_refresh();
        // Two probes of ms0 alone: one per command.
        assert!(wait_for(|| dev.calls.load(Ordering::SeqCst) == before + 2));
        let stale = probe.get("bad");
        thread::sleep(Duration::from_millis(30));
        assert!(probe.get("bad").age > stale.age);
    }
}

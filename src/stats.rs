//! Stats collection.
//!
//! A [`Collector`] drains inbound-request events from the event channel and
//! persists them through a [`StatsSink`] selected by driver name.

use crate::error::StatsError;
use crate::event::{EventReceiver, InboundRequest};
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tracing::{debug, info, warn};

/// Driver name of the file append-log sink.
pub const FS_DRIVER: &str = "fs";

/// Driver name of the stdout sink.
pub const STDOUT_DRIVER: &str = "stdout";

/// Persistence backend for stats events.
#[async_trait]
pub trait StatsSink: Send {
    /// Persist one event.
    async fn persist(&mut self, event: &InboundRequest) -> Result<(), StatsError>;

    /// Make persisted events durable. Called once when collection stops.
    async fn close(&mut self) -> Result<(), StatsError> {
        Ok(())
    }
}

/// Writes one JSON object per line to any async writer.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    async fn write_line(&mut self, event: &InboundRequest) -> Result<(), StatsError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl StatsSink for JsonLinesSink<File> {
    async fn persist(&mut self, event: &InboundRequest) -> Result<(), StatsError> {
        self.write_line(event).await
    }

    async fn close(&mut self) -> Result<(), StatsError> {
        self.writer.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl StatsSink for JsonLinesSink<Stdout> {
    async fn persist(&mut self, event: &InboundRequest) -> Result<(), StatsError> {
        self.write_line(event).await
    }
}

/// Supported stats backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Driver {
    /// Append to a file
    Fs(PathBuf),
    /// Write to standard output
    Stdout,
}

impl Driver {
    /// Resolve a driver name and destination.
    pub fn from_name(name: &str, destination: &str) -> Result<Self, StatsError> {
        match name {
            FS_DRIVER => Ok(Driver::Fs(PathBuf::from(destination))),
            STDOUT_DRIVER => Ok(Driver::Stdout),
            other => Err(StatsError::UnsupportedDriver(other.to_string())),
        }
    }

    async fn open(&self) -> Result<Box<dyn StatsSink>, StatsError> {
        match self {
            Driver::Fs(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                Ok(Box::new(JsonLinesSink::new(file)))
            }
            Driver::Stdout => Ok(Box::new(JsonLinesSink::new(tokio::io::stdout()))),
        }
    }
}

/// Background consumer of inbound-request events.
#[derive(Debug)]
pub struct Collector {
    driver: Driver,
}

impl Collector {
    /// Create a collector for the named driver.
    pub fn new(driver: &str, destination: &str) -> Result<Self, StatsError> {
        let driver = Driver::from_name(driver, destination)?;
        Ok(Self { driver })
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Consume events until shutdown or until every sender is dropped.
    ///
    /// Events are persisted one at a time in arrival order. On shutdown no
    /// further events are drained; when the channel closes, everything
    /// already queued is persisted first. Returns the number of events
    /// persisted.
    pub async fn collect(
        self,
        shutdown: ShutdownSignal,
        events: EventReceiver,
    ) -> Result<u64, StatsError> {
        let sink = self.open_sink().await?;
        self.collect_into(sink, shutdown, events).await
    }

    /// Open the sink of the configured driver.
    pub async fn open_sink(&self) -> Result<Box<dyn StatsSink>, StatsError> {
        let sink = self.driver.open().await?;
        info!(driver = ?self.driver, "Stats sink opened");
        Ok(sink)
    }

    /// Like [`Collector::collect`], with an explicit sink.
    pub async fn collect_into(
        &self,
        mut sink: Box<dyn StatsSink>,
        shutdown: ShutdownSignal,
        mut events: EventReceiver,
    ) -> Result<u64, StatsError> {
        let cancelled = shutdown.cancelled();
        tokio::pin!(cancelled);

        let mut persisted = 0u64;
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut cancelled => {
                    debug!("Stats collection cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Stats channel closed");
                        break;
                    }
                },
            };

            match sink.persist(&event).await {
                Ok(()) => persisted += 1,
                Err(e) => warn!(
                    method = %event.method,
                    path = %event.path,
                    error = %e,
                    "Failed to persist stats event"
                ),
            }
        }

        sink.close().await?;
        info!(persisted, "Stats collection stopped");
        Ok(persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;
    use crate::event;
    use crate::shutdown::Shutdown;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct MemorySink {
        events: Arc<Mutex<Vec<InboundRequest>>>,
    }

    #[async_trait]
    impl StatsSink for MemorySink {
        async fn persist(&mut self, event: &InboundRequest) -> Result<(), StatsError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn request(path: &str) -> InboundRequest {
        InboundRequest {
            method: "GET".to_string(),
            path: path.to_string(),
            route: path.to_string(),
            status_code: 200,
            timestamp: Utc::now(),
            params: HashMap::new(),
            query: HashMap::new(),
        }
    }

    #[test]
    fn test_unsupported_driver() {
        let err = Collector::new("postgres", "db://").unwrap_err();
        assert!(matches!(err, StatsError::UnsupportedDriver(name) if name == "postgres"));
    }

    #[test]
    fn test_known_drivers() {
        let fs = Collector::new("fs", "./stats.log").unwrap();
        assert_eq!(fs.driver(), &Driver::Fs(PathBuf::from("./stats.log")));

        let stdout = Collector::new("stdout", "").unwrap();
        assert_eq!(stdout.driver(), &Driver::Stdout);
    }

    #[tokio::test]
    async fn test_fs_sink_records_every_event() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stats.log");
        let collector = Collector::new("fs", dest.to_str().unwrap()).unwrap();

        let shutdown = Shutdown::new();
        let (tx, rx) = event::channel(16, OverflowPolicy::Block);
        let handle = tokio::spawn(collector.collect(shutdown.subscribe(), rx));

        for i in 0..5 {
            tx.emit(request(&format!("/r/{}", i))).await;
        }
        drop(tx);

        let persisted = handle.await.unwrap().unwrap();
        assert_eq!(persisted, 5);

        let content = std::fs::read_to_string(&dest).unwrap();
        let lines: Vec<InboundRequest> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].path, "/r/0");
        assert_eq!(lines[4].path, "/r/4");
    }

    #[tokio::test]
    async fn test_fs_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stats.log");
        std::fs::write(&dest, "{\"existing\":true}\n").unwrap();

        let collector = Collector::new("fs", dest.to_str().unwrap()).unwrap();
        let (tx, rx) = event::channel(4, OverflowPolicy::Block);
        tx.emit(request("/new")).await;
        drop(tx);

        collector
            .collect(Shutdown::new().subscribe(), rx)
            .await
            .unwrap();

        let content = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_fs_sink_unwritable_destination() {
        let collector = Collector::new("fs", "/nonexistent/dir/stats.log").unwrap();
        let (_tx, rx) = event::channel(1, OverflowPolicy::Block);

        let err = collector
            .collect(Shutdown::new().subscribe(), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::Io(_)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_collection() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(MemorySink {
            events: Arc::clone(&events),
        });
        let collector = Collector::new("stdout", "").unwrap();

        let shutdown = Shutdown::new();
        let (tx, rx) = event::channel(16, OverflowPolicy::Block);
        let signal = shutdown.subscribe();
        let handle =
            tokio::spawn(async move { collector.collect_into(sink, signal, rx).await });

        tx.emit(request("/before")).await;
        for _ in 0..50 {
            if !events.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.trigger();
        let persisted = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(persisted, 1);

        // Sender still alive, but nothing is consumed any more
        tx.emit(request("/after")).await;
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_drains_nothing() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(MemorySink {
            events: Arc::clone(&events),
        });
        let collector = Collector::new("stdout", "").unwrap();

        let shutdown = Shutdown::new();
        shutdown.trigger();
        let (tx, rx) = event::channel(4, OverflowPolicy::Block);
        tx.emit(request("/queued")).await;

        let persisted = collector
            .collect_into(sink, shutdown.subscribe(), rx)
            .await
            .unwrap();
        assert_eq!(persisted, 0);
        assert!(events.lock().unwrap().is_empty());
    }
}

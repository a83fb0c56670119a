//! Camera fed by a raw rgb24 byte stream (a FIFO or file written by an
//! external grabber such as `ffmpeg -f rawvideo -pix_fmt rgb24`).
//!
//! A reader thread owns the stream and keeps only the newest frame, so a
//! slow control loop always sees the latest image rather than a backlog.
use avbot_traits::{BoxError, Camera, Frame};
use crossbeam_channel as xch;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{HwError, Result};

pub struct PipeCamera {
    rx: xch::Receiver<Frame>,
    shutdown: Arc<AtomicBool>,
    width: u32,
    height: u32,
}

impl PipeCamera {
    pub fn open(path: impl AsRef<Path>, width: u32, height: u32) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::from_reader(file, width, height))
    }

    /// Spawn the reader thread over any byte source.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, width: u32, height: u32) -> Self {
        let (tx, rx) = xch::bounded::<Frame>(1);
        let drain = rx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let frame_len = Frame::byte_len(width, height);

        std::thread::spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = vec![0u8; frame_len];
            loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                match reader.read_exact(&mut buf) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                        tracing::debug!("camera stream reached end");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "camera stream read failed");
                        break;
                    }
                }
                let Ok(frame) = Frame::from_rgb(width, height, buf.clone()) else {
                    break;
                };
                // Replace any unread frame with the newer one.
                let _ = drain.try_recv();
                if tx.try_send(frame).is_err() {
                    tracing::trace!("camera frame dropped");
                }
            }
            tracing::trace!("camera reader exiting");
        });

        Self {
            rx,
            shutdown,
            width,
            height,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Camera for PipeCamera {
    fn read(&mut self, timeout: Duration) -> std::result::Result<Frame, BoxError> {
        match self.rx.recv_timeout(timeout) {
            Ok(f) => Ok(f),
            Err(xch::RecvTimeoutError::Timeout) => Err(Box::new(HwError::Timeout)),
            Err(xch::RecvTimeoutError::Disconnected) => Err(Box::new(HwError::CameraClosed)),
        }
    }
}

impl Drop for PipeCamera {
    fn drop(&mut self) {
        // The reader may be blocked inside read_exact on a FIFO; it exits on
        // its next wakeup instead of being joined here.
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

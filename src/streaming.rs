use crate::frame::Frame;
use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use tokio::sync::watch;

/// Content type of the MJPEG endpoint. The boundary name is part of the
/// wire contract and must match [`multipart_chunk`].
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Debug, Clone)]
enum Slot {
    /// No frame written yet (or stream restarted and none arrived)
    Idle,
    Live(Frame),
    /// Encoder stopped; readers must wake up and finish
    Stopped,
}

/// Single-slot frame mailbox bridging the encoder callback to HTTP readers.
///
/// `write` replaces the slot and wakes every waiting reader; only the
/// latest frame is kept, so a slow reader skips intermediate frames
/// rather than queueing them. `close` wakes all readers and ends their
/// streams so nobody hangs on a stopped encoder.
pub struct StreamingOutput {
    tx: watch::Sender<Slot>,
}

impl StreamingOutput {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot::Idle);
        Self { tx }
    }

    /// Called from the encoder for every produced frame.
    pub fn write(&self, frame: Frame) {
        self.tx.send_replace(Slot::Live(frame));
    }

    /// End all active subscriptions. A later `write` starts serving new
    /// subscribers again.
    pub fn close(&self) {
        self.tx.send_replace(Slot::Stopped);
    }

    pub fn subscribe(&self) -> FrameStream {
        FrameStream {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StreamingOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// One reader's view of the frame slot.
pub struct FrameStream {
    rx: watch::Receiver<Slot>,
}

impl FrameStream {
    /// Wait for the next frame written after this call. Returns None once
    /// the output is closed or dropped; the subscription cannot be
    /// restarted, subscribe again instead.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            self.rx.changed().await.ok()?;
            let slot = self.rx.borrow_and_update().clone();
            match slot {
                Slot::Live(frame) => return Some(frame),
                Slot::Stopped => return None,
                Slot::Idle => continue,
            }
        }
    }

    /// Infinite multipart body for the MJPEG endpoint; ends when the
    /// encoder stops or the client disconnects.
    pub fn into_mjpeg_body(
        mut self,
    ) -> impl Stream<Item = std::result::Result<Bytes, std::convert::Infallible>> {
        async_stream::stream! {
            while let Some(frame) = self.next_frame().await {
                yield Ok(multipart_chunk(&frame));
            }
        }
    }
}

/// One multipart unit:
/// `--frame\r\nContent-Type: image/jpeg\r\nContent-Length: <n>\r\n\r\n<bytes>\r\n`
pub fn multipart_chunk(frame: &Frame) -> Bytes {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.data.len()
    );
    let mut buf = BytesMut::with_capacity(header.len() + frame.data.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(&frame.data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

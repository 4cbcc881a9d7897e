//! In-process test doubles for the codec and transport ports.
//!
//! The codec here is a real, tiny byte format (tag, length, body) rather
//! than a pass-through, so the decode limits and buffering paths are
//! genuinely exercised. The endpoint is channel-backed with a gated write
//! path, which lets tests hold the preface flush open and observe what the
//! engine does (and refuses to do) in the meantime.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, mpsc};

use weft::ports::{Endpoint, FrameDecoder, FrameEncoder, FrameSink, SessionListener};
use weft::{
    DecodeError, EncodeError, ErrorCode, Frame, SessionError, Session, Settings, TransportError,
};

/// Opt-in log output while debugging a test (`RUST_LOG=weft=trace`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const TAG_PREFACE: u8 = 0;
const TAG_SETTINGS: u8 = 1;
const TAG_WINDOW_UPDATE: u8 = 2;
const TAG_DATA: u8 = 3;
const TAG_GO_AWAY: u8 = 4;

const PREFACE_MAGIC: &[u8] = b"WEFT * CONNECT/1\r\n";

/// Wire format: `tag:u8, len:u32be, body[len]`.
pub struct TestEncoder;

impl FrameEncoder for TestEncoder {
    fn encode(&self, frame: &Frame) -> Result<Bytes, EncodeError> {
        let (tag, body) = match frame {
            Frame::Preface => (TAG_PREFACE, Bytes::from_static(PREFACE_MAGIC)),
            Frame::Settings(settings) => {
                let mut body = BytesMut::new();
                body.put_u16(settings.len() as u16);
                for (key, value) in settings.iter() {
                    body.put_u16(key);
                    body.put_u32(value);
                }
                (TAG_SETTINGS, body.freeze())
            }
            Frame::WindowUpdate { stream_id, delta } => {
                let mut body = BytesMut::new();
                body.put_u32(*stream_id);
                body.put_u32(*delta);
                (TAG_WINDOW_UPDATE, body.freeze())
            }
            Frame::Data {
                stream_id,
                payload,
                end_stream,
            } => {
                let mut body = BytesMut::new();
                body.put_u32(*stream_id);
                body.put_u8(u8::from(*end_stream));
                body.extend_from_slice(payload);
                (TAG_DATA, body.freeze())
            }
            Frame::GoAway { code, reason } => {
                let mut body = BytesMut::new();
                body.put_u32(*code as u32);
                body.extend_from_slice(reason.as_bytes());
                (TAG_GO_AWAY, body.freeze())
            }
        };
        let mut out = BytesMut::with_capacity(5 + body.len());
        out.put_u8(tag);
        out.put_u32(body.len() as u32);
        out.extend_from_slice(&body);
        Ok(out.freeze())
    }
}

/// Buffering decoder for the same format, with enforced inbound limits.
pub struct TestDecoder {
    buffer: BytesMut,
    max_frame_length: u32,
    max_settings_keys: usize,
}

impl TestDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_length: u32::MAX,
            max_settings_keys: usize::MAX,
        }
    }

    fn parse_body(tag: u8, mut body: Bytes, max_settings_keys: usize) -> Result<Frame, DecodeError> {
        match tag {
            TAG_PREFACE => {
                if body != PREFACE_MAGIC {
                    return Err(DecodeError::Malformed("bad preface magic".into()));
                }
                Ok(Frame::Preface)
            }
            TAG_SETTINGS => {
                if body.len() < 2 {
                    return Err(DecodeError::UnexpectedEof);
                }
                let count = body.get_u16() as usize;
                if count > max_settings_keys {
                    return Err(DecodeError::TooManySettings {
                        count,
                        max: max_settings_keys,
                    });
                }
                if body.len() != count * 6 {
                    return Err(DecodeError::Malformed("settings length mismatch".into()));
                }
                let mut settings = Settings::new();
                for _ in 0..count {
                    let key = body.get_u16();
                    let value = body.get_u32();
                    settings.set(key, value);
                }
                Ok(Frame::Settings(settings))
            }
            TAG_WINDOW_UPDATE => {
                if body.len() != 8 {
                    return Err(DecodeError::Malformed("window update length".into()));
                }
                Ok(Frame::WindowUpdate {
                    stream_id: body.get_u32(),
                    delta: body.get_u32(),
                })
            }
            TAG_DATA => {
                if body.len() < 5 {
                    return Err(DecodeError::UnexpectedEof);
                }
                let stream_id = body.get_u32();
                let end_stream = body.get_u8() != 0;
                Ok(Frame::Data {
                    stream_id,
                    payload: body,
                    end_stream,
                })
            }
            TAG_GO_AWAY => {
                if body.len() < 4 {
                    return Err(DecodeError::UnexpectedEof);
                }
                let code = body.get_u32();
                let code = ErrorCode::from_u32(code)
                    .ok_or_else(|| DecodeError::Malformed(format!("bad close code {code}")))?;
                let reason = String::from_utf8(body.to_vec())
                    .map_err(|_| DecodeError::Malformed("close reason not utf8".into()))?;
                Ok(Frame::GoAway { code, reason })
            }
            other => Err(DecodeError::Malformed(format!("unknown tag {other}"))),
        }
    }
}

impl FrameDecoder for TestDecoder {
    fn feed(&mut self, bytes: &[u8], sink: &mut dyn FrameSink) -> Result<(), DecodeError> {
        self.buffer.extend_from_slice(bytes);
        loop {
            if self.buffer.len() < 5 {
                return Ok(());
            }
            let tag = self.buffer[0];
            let len = u32::from_be_bytes([
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
                self.buffer[4],
            ]);
            if len > self.max_frame_length {
                return Err(DecodeError::FrameTooLarge {
                    len,
                    max: self.max_frame_length,
                });
            }
            if self.buffer.len() < 5 + len as usize {
                return Ok(());
            }
            self.buffer.advance(5);
            let body = self.buffer.split_to(len as usize).freeze();
            let frame = Self::parse_body(tag, body, self.max_settings_keys)?;
            if sink.on_frame(frame).is_err() {
                // The sink latched the error; stop dispatching.
                return Ok(());
            }
        }
    }

    fn set_max_frame_length(&mut self, len: u32) {
        self.max_frame_length = len;
    }

    fn max_frame_length(&self) -> u32 {
        self.max_frame_length
    }

    fn set_max_settings_keys(&mut self, max: usize) {
        self.max_settings_keys = max;
    }
}

/// Decode a byte stream offline into frames, for asserting on what the
/// engine wrote.
pub fn decode_written(bytes: &[u8]) -> Vec<Frame> {
    struct VecSink(Vec<Frame>);
    impl FrameSink for VecSink {
        fn on_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
            self.0.push(frame);
            Ok(())
        }
    }
    let mut sink = VecSink(Vec::new());
    let mut decoder = TestDecoder::new();
    decoder.feed(bytes, &mut sink).expect("written bytes decode");
    sink.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A write call completed (the flush point).
    Flush(usize),
    /// A read call delivered bytes to the engine.
    Read(usize),
    Closed,
}

/// Channel-backed endpoint with a gateable write path and scripted inbound.
pub struct TestEndpoint {
    log: Mutex<Vec<Event>>,
    writes: Mutex<Vec<Bytes>>,
    write_permits: Semaphore,
    fail_writes: Mutex<Option<TransportError>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Bytes, TransportError>>>,
    closed: AtomicBool,
    closed_notify: Notify,
    close_calls: AtomicUsize,
}

/// Test-side controls for a [`TestEndpoint`].
pub struct EndpointHandle {
    endpoint: Arc<TestEndpoint>,
    inbound: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
}

impl TestEndpoint {
    /// Writes complete immediately.
    pub fn open() -> (Arc<Self>, EndpointHandle) {
        // Leave headroom below tokio's permit cap so `close`/`release_write`
        // can still `add_permits` without overflowing.
        Self::build(Semaphore::MAX_PERMITS / 2)
    }

    /// Writes block until [`EndpointHandle::release_write`].
    pub fn gated() -> (Arc<Self>, EndpointHandle) {
        Self::build(0)
    }

    fn build(permits: usize) -> (Arc<Self>, EndpointHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Arc::new(Self {
            log: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            write_permits: Semaphore::new(permits),
            fail_writes: Mutex::new(None),
            inbound: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            close_calls: AtomicUsize::new(0),
        });
        let handle = EndpointHandle {
            endpoint: Arc::clone(&endpoint),
            inbound: tx,
        };
        (endpoint, handle)
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }

    pub fn written(&self) -> Vec<Bytes> {
        self.writes.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn reads_delivered(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Read(_)))
            .count()
    }
}

impl Endpoint for TestEndpoint {
    fn write(&self, bytes: Bytes) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            match self.write_permits.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(TransportError::Closed),
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            if let Some(err) = self.fail_writes.lock().clone() {
                return Err(err);
            }
            self.log.lock().push(Event::Flush(bytes.len()));
            self.writes.lock().push(bytes);
            Ok(())
        }
        .boxed()
    }

    fn read(&self) -> BoxFuture<'_, Result<Bytes, TransportError>> {
        async {
            let mut inbound = self.inbound.lock().await;
            loop {
                // Bytes already in flight when the transport dropped are
                // still delivered, like a real socket's receive buffer.
                if let Ok(next) = inbound.try_recv() {
                    return match next {
                        Ok(bytes) => {
                            self.log.lock().push(Event::Read(bytes.len()));
                            Ok(bytes)
                        }
                        Err(e) => Err(e),
                    };
                }
                if self.closed.load(Ordering::SeqCst) {
                    return Err(TransportError::Closed);
                }
                tokio::select! {
                    next = inbound.recv() => {
                        return match next {
                            Some(Ok(bytes)) => {
                                self.log.lock().push(Event::Read(bytes.len()));
                                Ok(bytes)
                            }
                            Some(Err(e)) => Err(e),
                            None => Err(TransportError::Closed),
                        };
                    }
                    _ = self.closed_notify.notified() => {}
                }
            }
        }
        .boxed()
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.lock().push(Event::Closed);
        }
        self.closed_notify.notify_waiters();
        // Unblock any write stuck behind the gate.
        self.write_permits.add_permits(1);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl EndpointHandle {
    /// Let one pending (or future) write complete.
    pub fn release_write(&self) {
        self.endpoint.write_permits.add_permits(1);
    }

    /// Make subsequent writes fail with the given error.
    pub fn fail_writes(&self, err: TransportError) {
        *self.endpoint.fail_writes.lock() = Some(err);
    }

    /// Script inbound bytes as delivered by the transport.
    pub fn push_inbound(&self, bytes: Bytes) {
        let _ = self.inbound.send(Ok(bytes));
    }

    /// Script an encoded frame as inbound traffic.
    pub fn push_frame(&self, frame: &Frame) {
        let bytes = TestEncoder.encode(frame).expect("test frame encodes");
        self.push_inbound(bytes);
    }

    /// Script a transport error on the next read.
    pub fn push_read_error(&self, err: TransportError) {
        let _ = self.inbound.send(Err(err));
    }

    /// Drop the inbound script; the next read observes an orderly close.
    pub fn finish_inbound(self) -> Arc<TestEndpoint> {
        self.endpoint
    }
}

/// Listener recording lifecycle callbacks, with optional misbehavior.
#[derive(Default)]
pub struct RecordingListener {
    pub overrides: Mutex<Option<Settings>>,
    pub panic_on_preface: AtomicBool,
    pub preface_calls: AtomicUsize,
    pub closes: Mutex<Vec<(u64, ErrorCode, String)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_overrides(settings: Settings) -> Arc<Self> {
        let listener = Self::default();
        *listener.overrides.lock() = Some(settings);
        Arc::new(listener)
    }

    pub fn panicking() -> Arc<Self> {
        let listener = Self::default();
        listener.panic_on_preface.store(true, Ordering::SeqCst);
        Arc::new(listener)
    }

    pub fn closes(&self) -> Vec<(u64, ErrorCode, String)> {
        self.closes.lock().clone()
    }
}

impl SessionListener for RecordingListener {
    fn on_preface(&self, _session: &Session) -> Option<Settings> {
        self.preface_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_preface.load(Ordering::SeqCst) {
            panic!("listener failure injected by test");
        }
        self.overrides.lock().clone()
    }

    fn on_close(&self, session: &Session, code: ErrorCode, reason: &str) {
        self.closes
            .lock()
            .push((session.id(), code, reason.to_string()));
    }
}

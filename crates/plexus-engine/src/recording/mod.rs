//! Execution recorder
//!
//! An [`ExecutionRecorder`] attaches to a processor's event bus and appends
//! every event, timestamped in milliseconds, to a [`Recording`]. Recordings
//! serialize to
//!
//! ```text
//! {"version": 1,
//!  "assets": {"<sha256>": "<base64>"},
//!  "strings": {"<fnv1a>": "<long string>"},
//!  "recording": {"recordingId": ..., "startTs": ..., "finishTs": ...,
//!                "events": [{"type", "data", "ts"}, ...]}}
//! ```
//!
//! with binary payloads and long strings replaced by `$ASSET:` / `$STRING:`
//! references into the two tables. The tables come first so a reader can
//! resolve each event as it is decoded. Files with the tables after the
//! events are still accepted; their events are buffered until the tables
//! arrive.

mod dedup;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::{DeserializeSeed, Error as _, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::watch;

use crate::config::RecorderOptions;
use crate::constants::recording::VERSION;
use crate::error::{EngineError, Result};
use crate::events::{EventBus, EventError, EventSink, ListenerId, ProcessEvent};
use crate::processor::GraphProcessor;

use dedup::Interner;

/// One event of a recording with its timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Milliseconds since the Unix epoch
    pub ts: i64,
    pub event: ProcessEvent,
}

impl Serialize for RecordedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut value = serde_json::to_value(&self.event).map_err(<S::Error as serde::ser::Error>::custom)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("ts".to_string(), self.ts.into());
        }
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RecordedEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut value = serde_json::Value::deserialize(deserializer)?;
        let ts = value
            .as_object_mut()
            .and_then(|map| map.remove("ts"))
            .and_then(|ts| ts.as_i64())
            .ok_or_else(|| D::Error::custom("recorded event without a numeric 'ts'"))?;
        let event = serde_json::from_value(value).map_err(D::Error::custom)?;
        Ok(Self { ts, event })
    }
}

/// The ordered event log of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub recording_id: String,
    pub events: Vec<RecordedEvent>,
    pub start_ts: i64,
    #[serde(default)]
    pub finish_ts: Option<i64>,
}

impl Recording {
    pub fn new() -> Self {
        Self {
            recording_id: uuid::Uuid::new_v4().to_string(),
            events: Vec::new(),
            start_ts: now_ms(),
            finish_ts: None,
        }
    }

    /// Events without their timestamps
    pub fn process_events(&self) -> impl Iterator<Item = &ProcessEvent> {
        self.events.iter().map(|e| &e.event)
    }

    /// Serialize to `writer` one event at a time
    ///
    /// A first pass over the events fills the asset and string tables, which
    /// are written ahead of the events; only the tables are held in memory.
    pub fn write_to<W: Write>(&self, mut writer: W, options: &RecorderOptions) -> Result<()> {
        let mut interner = Interner::new(options.string_dedup_threshold);
        for event in &self.events {
            interner.intern(&mut serde_json::to_value(event)?);
        }

        write!(writer, "{{\"version\":{},\"assets\":", VERSION)?;
        serde_json::to_writer(&mut writer, &interner.assets)?;
        writer.write_all(b",\"strings\":")?;
        serde_json::to_writer(&mut writer, &interner.strings)?;
        writer.write_all(b",\"recording\":{\"recordingId\":")?;
        serde_json::to_writer(&mut writer, &self.recording_id)?;
        write!(writer, ",\"startTs\":{},\"finishTs\":", self.start_ts)?;
        serde_json::to_writer(&mut writer, &self.finish_ts)?;
        writer.write_all(b",\"events\":[")?;
        for (i, event) in self.events.iter().enumerate() {
            if i > 0 {
                writer.write_all(b",")?;
            }
            // Every entry is already in the tables, so this only substitutes
            let mut value = serde_json::to_value(event)?;
            interner.intern(&mut value);
            serde_json::to_writer(&mut writer, &value)?;
        }
        writer.write_all(b"]}}")?;
        writer.flush()?;
        Ok(())
    }

    pub fn to_json_string(&self, options: &RecorderOptions) -> Result<String> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer, options)?;
        String::from_utf8(buffer).map_err(|e| EngineError::Recording(e.to_string()))
    }

    /// Read a serialized recording, resolving references event by event
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        let recording = deserializer
            .deserialize_map(RecordingFileVisitor)
            .map_err(decode_error)?;
        deserializer.end().map_err(decode_error)?;
        Ok(recording)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        let recording = deserializer
            .deserialize_map(RecordingFileVisitor)
            .map_err(decode_error)?;
        deserializer.end().map_err(decode_error)?;
        Ok(recording)
    }

    /// zstd-compressed serialization, streamed through the encoder
    pub fn to_compressed(&self, options: &RecorderOptions) -> Result<Vec<u8>> {
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), options.compression_level)
            .map_err(|e| EngineError::Compression(e.to_string()))?;
        self.write_to(&mut encoder, options)?;
        encoder
            .finish()
            .map_err(|e| EngineError::Compression(e.to_string()))
    }

    pub fn from_compressed(bytes: &[u8]) -> Result<Self> {
        let decoder =
            zstd::stream::Decoder::new(bytes).map_err(|e| EngineError::Compression(e.to_string()))?;
        Self::read_from(decoder)
    }
}

impl Default for Recording {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_error(error: serde_json::Error) -> EngineError {
    if error.is_io() {
        EngineError::Io(error.into())
    } else {
        EngineError::Recording(error.to_string())
    }
}

#[derive(Default)]
struct Tables {
    assets: BTreeMap<String, String>,
    strings: BTreeMap<String, String>,
}

impl Tables {
    fn decode_event(&self, mut value: serde_json::Value) -> Result<RecordedEvent> {
        dedup::resolve(&mut value, &self.assets, &self.strings)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Events of a recording, resolved on arrival or held until the tables are known
enum DecodedEvents {
    Resolved(Vec<RecordedEvent>),
    Pending(Vec<serde_json::Value>),
}

#[derive(Default)]
struct RecordingHeader {
    recording_id: Option<String>,
    start_ts: Option<i64>,
    finish_ts: Option<i64>,
}

struct RecordingFileVisitor;

impl<'de> Visitor<'de> for RecordingFileVisitor {
    type Value = Recording;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a serialized recording")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Recording, A::Error> {
        let mut version = None;
        let mut tables = Tables::default();
        let (mut has_assets, mut has_strings) = (false, false);
        let mut body = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "version" => {
                    let found: u32 = map.next_value()?;
                    if found != VERSION {
                        return Err(A::Error::custom(format!("unsupported recording version {}", found)));
                    }
                    version = Some(found);
                }
                "assets" => {
                    tables.assets = map.next_value()?;
                    has_assets = true;
                }
                "strings" => {
                    tables.strings = map.next_value()?;
                    has_strings = true;
                }
                "recording" => {
                    let tables = (has_assets && has_strings).then_some(&tables);
                    body = Some(map.next_value_seed(RecordingSeed { tables })?);
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        version.ok_or_else(|| A::Error::missing_field("version"))?;
        let (header, events) = body.ok_or_else(|| A::Error::missing_field("recording"))?;
        let events = match events {
            DecodedEvents::Resolved(events) => events,
            DecodedEvents::Pending(values) => values
                .into_iter()
                .map(|value| tables.decode_event(value))
                .collect::<Result<Vec<_>>>()
                .map_err(A::Error::custom)?,
        };
        Ok(Recording {
            recording_id: header
                .recording_id
                .ok_or_else(|| A::Error::missing_field("recordingId"))?,
            events,
            start_ts: header.start_ts.ok_or_else(|| A::Error::missing_field("startTs"))?,
            finish_ts: header.finish_ts,
        })
    }
}

struct RecordingSeed<'a> {
    tables: Option<&'a Tables>,
}

impl<'de> DeserializeSeed<'de> for RecordingSeed<'_> {
    type Value = (RecordingHeader, DecodedEvents);

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for RecordingSeed<'_> {
    type Value = (RecordingHeader, DecodedEvents);

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a recording body")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut header = RecordingHeader::default();
        let mut events = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "recordingId" => header.recording_id = Some(map.next_value()?),
                "startTs" => header.start_ts = Some(map.next_value()?),
                "finishTs" => header.finish_ts = map.next_value()?,
                "events" => events = Some(map.next_value_seed(EventsSeed { tables: self.tables })?),
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        let events = events.unwrap_or(DecodedEvents::Resolved(Vec::new()));
        Ok((header, events))
    }
}

struct EventsSeed<'a> {
    tables: Option<&'a Tables>,
}

impl<'de> DeserializeSeed<'de> for EventsSeed<'_> {
    type Value = DecodedEvents;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for EventsSeed<'_> {
    type Value = DecodedEvents;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of recorded events")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let capacity = seq.size_hint().unwrap_or(0);
        match self.tables {
            Some(tables) => {
                let mut events = Vec::with_capacity(capacity);
                while let Some(value) = seq.next_element::<serde_json::Value>()? {
                    events.push(tables.decode_event(value).map_err(A::Error::custom)?);
                }
                Ok(DecodedEvents::Resolved(events))
            }
            None => {
                log::debug!("Recording tables follow the events; buffering events");
                let mut values = Vec::with_capacity(capacity);
                while let Some(value) = seq.next_element::<serde_json::Value>()? {
                    values.push(value);
                }
                Ok(DecodedEvents::Pending(values))
            }
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

type FinishCallback = Box<dyn Fn(&Recording) + Send + Sync>;

struct RecorderInner {
    options: RecorderOptions,
    recording: Mutex<Recording>,
    finished: watch::Sender<bool>,
    on_finish: Mutex<Vec<FinishCallback>>,
    /// The bus and sink of the current `record` call
    attached: Mutex<Option<(EventBus, ListenerId)>>,
}

impl RecorderInner {
    fn wants(&self, event: &ProcessEvent) -> bool {
        match event {
            ProcessEvent::PartialOutput { .. } => self.options.include_partial_outputs,
            ProcessEvent::Trace(_) => self.options.include_trace,
            _ => true,
        }
    }
}

struct RecorderSink {
    inner: Arc<RecorderInner>,
}

impl EventSink for RecorderSink {
    fn send(&self, event: &ProcessEvent) -> std::result::Result<(), EventError> {
        let inner = &self.inner;
        if *inner.finished.borrow() || !inner.wants(event) {
            return Ok(());
        }
        let ts = now_ms();
        let snapshot = {
            let mut recording = inner.recording.lock();
            if let ProcessEvent::Start { run_id, .. } = event {
                recording.recording_id = run_id.clone();
            }
            recording.events.push(RecordedEvent {
                ts,
                event: event.clone(),
            });
            if !event.is_terminal() {
                return Ok(());
            }
            recording.finish_ts = Some(ts);
            recording.clone()
        };
        log::debug!(
            "Recording {} finished with {} events",
            snapshot.recording_id,
            snapshot.events.len()
        );
        inner.finished.send_replace(true);
        for callback in inner.on_finish.lock().iter() {
            callback(&snapshot);
        }
        Ok(())
    }
}

/// Records the events of a processor's next run
///
/// # Example
///
/// ```ignore
/// let recorder = ExecutionRecorder::new(RecorderOptions::default());
/// recorder.record(&processor);
/// processor.process_graph(context, inputs, PortValues::new()).await?;
/// let json = recorder.serialize()?;
/// ```
#[derive(Clone)]
pub struct ExecutionRecorder {
    inner: Arc<RecorderInner>,
}

impl ExecutionRecorder {
    pub fn new(options: RecorderOptions) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            inner: Arc::new(RecorderInner {
                options,
                recording: Mutex::new(Recording::new()),
                finished,
                on_finish: Mutex::new(Vec::new()),
                attached: Mutex::new(None),
            }),
        }
    }

    /// Start recording `processor`'s bus until its run ends
    ///
    /// Detaches from the bus of any earlier `record` call and starts a fresh
    /// recording, which takes the run id once the run starts.
    pub fn record(&self, processor: &GraphProcessor) -> ListenerId {
        let mut attached = self.inner.attached.lock();
        if let Some((bus, id)) = attached.take() {
            bus.off(id);
        }
        *self.inner.recording.lock() = Recording::new();
        self.inner.finished.send_replace(false);
        let id = processor.add_sink(Arc::new(RecorderSink {
            inner: self.inner.clone(),
        }));
        *attached = Some((processor.bus().clone(), id));
        id
    }

    /// Stop receiving events; the recording so far is kept
    pub fn detach(&self) {
        if let Some((bus, id)) = self.inner.attached.lock().take() {
            bus.off(id);
        }
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.inner.options
    }

    /// Snapshot of the recording so far
    pub fn recording(&self) -> Recording {
        self.inner.recording.lock().clone()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.inner.recording.lock().events.clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.inner.finished.borrow()
    }

    /// Call `callback` with the complete recording when the run ends
    pub fn on_finish<F>(&self, callback: F)
    where
        F: Fn(&Recording) + Send + Sync + 'static,
    {
        self.inner.on_finish.lock().push(Box::new(callback));
    }

    /// Resolve with the complete recording once the run ends
    pub async fn finished(&self) -> Recording {
        let mut rx = self.inner.finished.subscribe();
        // The sender lives as long as self, so wait_for cannot fail here
        let _ = rx.wait_for(|finished| *finished).await;
        self.recording()
    }

    // The serializers hold the recording lock while writing, so events
    // arriving meanwhile wait for them.

    pub fn serialize(&self) -> Result<String> {
        self.inner.recording.lock().to_json_string(&self.inner.options)
    }

    pub fn serialize_to_writer<W: Write>(&self, writer: W) -> Result<()> {
        self.inner.recording.lock().write_to(writer, &self.inner.options)
    }

    pub fn serialize_compressed(&self) -> Result<Vec<u8>> {
        self.inner.recording.lock().to_compressed(&self.inner.options)
    }

    /// Load a serialized recording into a recorder
    pub fn deserialize_from_str(json: &str, options: RecorderOptions) -> Result<Self> {
        Self::from_recording(Recording::from_json_str(json)?, options)
    }

    pub fn deserialize_from_reader<R: Read>(reader: R, options: RecorderOptions) -> Result<Self> {
        Self::from_recording(Recording::read_from(reader)?, options)
    }

    pub fn deserialize_compressed(bytes: &[u8], options: RecorderOptions) -> Result<Self> {
        Self::from_recording(Recording::from_compressed(bytes)?, options)
    }

    fn from_recording(recording: Recording, options: RecorderOptions) -> Result<Self> {
        let finished = recording.finish_ts.is_some();
        let recorder = Self::new(options);
        *recorder.inner.recording.lock() = recording;
        recorder.inner.finished.send_replace(finished);
        Ok(recorder)
    }
}

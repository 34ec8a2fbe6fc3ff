//! Flat per-step metric records and where they go.

use crate::utils::serialization::SerializationError;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Named scalar metrics for one batch or epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, f64>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Record(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Destination for metric records.
pub trait MetricsSink: Send {
    fn emit(&mut self, record: &Record) -> Result<(), SerializationError>;

    fn flush(&mut self) -> Result<(), SerializationError> {
        Ok(())
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn emit(&mut self, record: &Record) -> Result<(), SerializationError> {
        (**self).emit(record)
    }

    fn flush(&mut self) -> Result<(), SerializationError> {
        (**self).flush()
    }
}

/// Writes each record to the `log` facade at info level.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    prefix: String,
}

impl LogSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        LogSink {
            prefix: prefix.into(),
        }
    }
}

impl MetricsSink for LogSink {
    fn emit(&mut self, record: &Record) -> Result<(), SerializationError> {
        let fields: Vec<String> = record.iter().map(|(k, v)| format!("{k}={v:.6}")).collect();
        info!("{}{}", self.prefix, fields.join(" "));
        Ok(())
    }
}

/// One JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SerializationError> {
        Ok(JsonLinesSink::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> MetricsSink for JsonLinesSink<W> {
    fn emit(&mut self, record: &Record) -> Result<(), SerializationError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SerializationError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<Record>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values of one metric across all records that contain it.
    pub fn series(&self, name: &str) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.get(name)).collect()
    }
}

impl MetricsSink for MemorySink {
    fn emit(&mut self, record: &Record) -> Result<(), SerializationError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Sends every record to several sinks.
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn MetricsSink>) {
        self.sinks.push(sink);
    }
}

impl MetricsSink for Fanout {
    fn emit(&mut self, record: &Record) -> Result<(), SerializationError> {
        self.sinks.iter_mut().try_for_each(|sink| sink.emit(record))
    }

    fn flush(&mut self) -> Result<(), SerializationError> {
        self.sinks.iter_mut().try_for_each(|sink| sink.flush())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_are_sorted_objects() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(&Record::from_iter([("b", 2.0), ("a", 0.5)])).unwrap();
        sink.emit(&Record::from_iter([("c", -1.0)])).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "{\"a\":0.5,\"b\":2.0}\n{\"c\":-1.0}\n");
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let mut fanout = Fanout::new();
        fanout.push(Box::new(LogSink::new("test: ")));
        fanout.push(Box::new(MemorySink::new()));
        fanout.emit(&Record::from_iter([("x", 1.0)])).unwrap();
        fanout.flush().unwrap();
    }

    #[test]
    fn memory_sink_series() {
        let mut sink = MemorySink::new();
        for i in 0..3 {
            let mut record = Record::new();
            record.insert("step", i as f64);
            sink.emit(&record).unwrap();
        }
        sink.emit(&Record::new()).unwrap();
        assert_eq!(sink.series("step"), [0.0, 1.0, 2.0]);
    }
}

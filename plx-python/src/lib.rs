//! Python bindings for the .plx decoder with numpy column support.
//!
//! Decoded columns are handed to Python as dictionaries of numpy arrays,
//! one array per column. Word reconstruction is exposed both as a one-shot
//! function and as a stateful class for polling loops.

use numpy::IntoPyArray;
use plx_core::scanner::{ProgressCallback, ProgressError};
use plx_core::{
    words, AdColumns, DecodeError, EventColumns, PlxFile, Progress, RecordType,
    ReconstructionState, ScanOptions, WordEvent,
};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

/// Converts a decode error into a Python exception.
///
/// An exception raised by the progress callback is passed through as is.
fn to_py_err(err: DecodeError) -> PyErr {
    match err {
        DecodeError::Io(e) => PyIOError::new_err(format!("Failed to read file: {}", e)),
        DecodeError::Progress(source) => match source.downcast::<PyErr>() {
            Ok(py_err) => *py_err,
            Err(other) => PyValueError::new_err(format!("Progress callback failed: {}", other)),
        },
        other => PyValueError::new_err(other.to_string()),
    }
}

/// Wraps a Python callable as a progress callback.
///
/// The callable receives `(fraction_done, done_mb, total_mb, elapsed, eta)`.
fn progress_callback<'py>(py: Python<'py>, callback: &'py PyObject) -> ProgressCallback<'py> {
    Box::new(move |p: &Progress| -> Result<(), ProgressError> {
        callback.call1(
            py,
            (
                p.fraction_done,
                p.done_mb,
                p.total_mb,
                p.elapsed_secs,
                p.eta_secs,
            ),
        )?;
        Ok(())
    })
}

fn events_dict(py: Python<'_>, columns: EventColumns) -> PyResult<PyObject> {
    let dict = PyDict::new(py);
    dict.set_item("type", columns.types.into_pyarray(py))?;
    dict.set_item("channel", columns.channels.into_pyarray(py))?;
    dict.set_item("unit", columns.units.into_pyarray(py))?;
    dict.set_item("timestamp", columns.timestamps.into_pyarray(py))?;
    Ok(dict.into())
}

fn ad_dict(py: Python<'_>, columns: AdColumns) -> PyResult<PyObject> {
    let dict = PyDict::new(py);
    dict.set_item("channel", columns.channels.into_pyarray(py))?;
    dict.set_item("value", columns.values.into_pyarray(py))?;
    dict.set_item("timestamp", columns.timestamps.into_pyarray(py))?;
    Ok(dict.into())
}

fn words_dict(py: Python<'_>, words: &[WordEvent]) -> PyResult<PyObject> {
    let word: Vec<u32> = words.iter().map(|w| w.word).collect();
    let timestamp: Vec<f64> = words.iter().map(|w| w.timestamp).collect();
    let dict = PyDict::new(py);
    dict.set_item("word", word.into_pyarray(py))?;
    dict.set_item("timestamp", timestamp.into_pyarray(py))?;
    Ok(dict.into())
}

fn columns_from_vecs(
    types: Vec<u8>,
    channels: Vec<u16>,
    units: Vec<u16>,
    timestamps: Vec<f64>,
) -> PyResult<EventColumns> {
    let len = timestamps.len();
    if types.len() != len || channels.len() != len || units.len() != len {
        return Err(PyValueError::new_err(format!(
            "column lengths differ: type {}, channel {}, unit {}, timestamp {}",
            types.len(),
            channels.len(),
            units.len(),
            len
        )));
    }
    Ok(EventColumns {
        types,
        channels,
        units,
        timestamps,
    })
}

/// Reads spike and external event timestamps from a .plx file.
///
/// Args:
///     path: Path to the .plx file
///     progress: Optional callable receiving
///         (fraction_done, done_mb, total_mb, elapsed, eta)
///
/// Returns:
///     dict: numpy arrays "type", "channel", "unit" and "timestamp"
///     (seconds)
///
/// Example:
///     >>> import plx
///     >>> ts = plx.read_timestamps("session.plx")
///     >>> spikes = ts["timestamp"][ts["type"] == 1]
#[pyfunction]
#[pyo3(signature = (path, progress=None))]
fn read_timestamps(py: Python<'_>, path: &str, progress: Option<PyObject>) -> PyResult<PyObject> {
    let file = PlxFile::open(path).map_err(to_py_err)?;
    let columns = file
        .event_columns(progress.as_ref().map(|cb| progress_callback(py, cb)))
        .map_err(to_py_err)?;
    events_dict(py, columns)
}

/// Reads continuous samples from a .plx file.
///
/// Args:
///     path: Path to the .plx file
///     progress: Optional progress callable, as for read_timestamps
///
/// Returns:
///     dict: numpy arrays "channel", "value" (volts) and "timestamp"
///     (seconds)
#[pyfunction]
#[pyo3(signature = (path, progress=None))]
fn read_ad_data(py: Python<'_>, path: &str, progress: Option<PyObject>) -> PyResult<PyObject> {
    let file = PlxFile::open(path).map_err(to_py_err)?;
    let columns = file
        .ad_columns(progress.as_ref().map(|cb| progress_callback(py, cb)))
        .map_err(to_py_err)?;
    ad_dict(py, columns)
}

/// Decodes a complete .plx image held in memory.
///
/// Returns:
///     tuple: (events dict, A/D dict), shaped as read_timestamps and
///     read_ad_data return them
#[pyfunction]
fn decode_bytes(py: Python<'_>, data: &[u8]) -> PyResult<(PyObject, PyObject)> {
    let result =
        plx_core::decode_bytes(data, ScanOptions::default(), None).map_err(to_py_err)?;
    Ok((events_dict(py, result.events)?, ad_dict(py, result.ad)?))
}

/// Reconstructs unstrobed words from external event channels and times.
///
/// Channels 1 to 32 carry bits 0 to 31; every other channel is ignored.
///
/// Returns:
///     dict: numpy arrays "word" (uint32) and "timestamp"
#[pyfunction]
fn reconstruct_words(
    py: Python<'_>,
    channel: Vec<u16>,
    timestamp: Vec<f64>,
) -> PyResult<PyObject> {
    let len = channel.len();
    let columns = columns_from_vecs(
        vec![RecordType::ExternalEvent as u8; len],
        channel,
        vec![0; len],
        timestamp,
    )?;
    words_dict(py, &words::reconstruct_columns(&columns))
}

/// Online word reconstruction across polled batches.
///
/// Example:
///     >>> r = plx.WordReconstructor()
///     >>> for batch in client.poll():
///     ...     words = r.push(batch.type, batch.channel, batch.unit, batch.timestamp)
///     >>> last = r.finish()
#[pyclass]
#[derive(Default)]
pub struct WordReconstructor {
    state: ReconstructionState,
}

#[pymethods]
impl WordReconstructor {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    /// Feeds one polled batch and returns the words it completes.
    fn push(
        &mut self,
        py: Python<'_>,
        r#type: Vec<u8>,
        channel: Vec<u16>,
        unit: Vec<u16>,
        timestamp: Vec<f64>,
    ) -> PyResult<PyObject> {
        let columns = columns_from_vecs(r#type, channel, unit, timestamp)?;
        let completed = self.state.push_columns(&columns);
        words_dict(py, &completed)
    }

    /// Releases the held-back word at the end of the stream, as
    /// `(word, timestamp)`, or None.
    fn finish(&mut self) -> Option<(u32, f64)> {
        self.state.finish().map(|w| (w.word, w.timestamp))
    }

    /// The word currently held back, if any.
    #[getter]
    fn pending(&self) -> Option<(u32, f64)> {
        self.state.pending().map(|w| (w.word, w.timestamp))
    }

    fn __repr__(&self) -> String {
        match self.state.pending() {
            Some(w) => format!("WordReconstructor(pending={:#x} @ {})", w.word, w.timestamp),
            None => "WordReconstructor(pending=None)".to_string(),
        }
    }
}

/// Plexon .plx decoder module for Python.
#[pymodule]
fn plx(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(read_timestamps, m)?)?;
    m.add_function(wrap_pyfunction!(read_ad_data, m)?)?;
    m.add_function(wrap_pyfunction!(decode_bytes, m)?)?;
    m.add_function(wrap_pyfunction!(reconstruct_words, m)?)?;
    m.add_class::<WordReconstructor>()?;
    Ok(())
}

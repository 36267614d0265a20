use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyType;

use ::ulpiwhisperer as uw;
use uw::{FilterConfig, PacketEvent, RawSample, RxCmdMagic};

#[pyclass]
struct RxCmdFilter {
    inner: uw::RxCmdFilter,
}

#[pymethods]
impl RxCmdFilter {
    #[new]
    fn new() -> PyResult<Self> {
        uw::RxCmdFilter::new(FilterConfig::default())
            .map(|inner| Self { inner })
            .map_err(|err| PyRuntimeError::new_err(err.to_string()))
    }

    /// Build a filter around a custom marker set.
    #[classmethod]
    fn with_markers(
        _cls: &Bound<'_, PyType>,
        sop: u8,
        eop: u8,
        ovf: u8,
        nop: u8,
    ) -> PyResult<Self> {
        let config = FilterConfig {
            magic: RxCmdMagic { sop, eop, ovf, nop },
            ..FilterConfig::default()
        };
        uw::RxCmdFilter::new(config)
            .map(|inner| Self { inner })
            .map_err(|err| PyValueError::new_err(err.to_string()))
    }

    /// Feed one raw sample; returns the emitted event, or None when the
    /// sample was filtered out.
    fn process(&mut self, rxcmd: bool, data: u8) -> Option<Event> {
        self.inner.process(RawSample { rxcmd, data }).map(Event::from)
    }

    /// Feed a list of (rxcmd, data) samples and collect the emitted events.
    fn feed(&mut self, samples: Vec<(bool, u8)>) -> Vec<Event> {
        samples
            .into_iter()
            .filter_map(|(rxcmd, data)| self.inner.process(RawSample { rxcmd, data }))
            .map(Event::from)
            .collect()
    }
}

#[pyclass]
struct Event {
    #[pyo3(get)]
    timestamp: u64,
    #[pyo3(get)]
    data: u8,
    #[pyo3(get)]
    kind: Option<String>,
}

impl From<PacketEvent> for Event {
    fn from(event: PacketEvent) -> Event {
        Event {
            timestamp: event.timestamp,
            data: event.data,
            kind: event.kind().map(|kind| kind.to_string()),
        }
    }
}

#[pymodule]
fn ulpiwhisperer(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<RxCmdFilter>()?;
    m.add_class::<Event>()?;
    Ok(())
}

use serde::Serialize;
use std::fmt::Display;

/// A domoticz `udevice` update as published on `domoticz/in`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterUpdate {
    pub idx: u32,
    pub nvalue: u8,
    pub svalue: String,
}

impl MeterUpdate {
    /// Electricity meter update: `svalue` is `"<instant W>;<cumulative Wh>"`.
    pub fn new(idx: u32, instant: impl Display, cumulative: impl Display) -> Self {
        Self {
            idx,
            nvalue: 0,
            svalue: format!("{instant};{cumulative}"),
        }
    }
}

/// Everything one live reading turns into on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedReadings {
    pub import: MeterUpdate,
    pub export: MeterUpdate,
    pub simple_power: i64,
}

/// Splits a signed grid power into `(import, export)`. Export stays negative
/// so that `import + export == watts`.
pub fn split_power(watts: i64) -> (i64, i64) {
    (watts.max(0), watts.min(0))
}

/// Grid power for load-balancing consumers. A negative offset is emitted as-is,
/// pinning the figure to a fixed export; otherwise the offset is subtracted,
/// saturating at the `i64` range.
pub fn simple_grid_power(watts: i64, offset: i64) -> i64 {
    if offset < 0 {
        offset
    } else {
        watts.saturating_sub(offset)
    }
}

/// Builds the import/export meter updates and simple grid power for one reading.
/// Export cumulative is not provided upstream and is always 0.
pub fn derive_readings(
    watts: i64,
    total_import_wh: f64,
    idx_import: u32,
    idx_export: u32,
    offset: i64,
) -> DerivedReadings {
    let (import_watts, export_watts) = split_power(watts);
    DerivedReadings {
        import: MeterUpdate::new(idx_import, import_watts, total_import_wh),
        export: MeterUpdate::new(idx_export, export_watts, 0),
        simple_power: simple_grid_power(watts, offset),
    }
}

//! Probe report and probe diagnostics, formatted without heap allocation.
//!
//! ```text
//! {"prb":{"e":1,"x":10.000,"z":-3.250}}
//! {"er":{"msg":"Probing error - invalid probe destination"}}
//! ```
//!
//! `e` is 1 when the probe triggered. One field per participating axis,
//! three decimals, in axis order.

use core::fmt::{self, Write};

use cnc_common::axis::AxisFlags;
use cnc_common::consts::AXES;

use crate::error::ProbeError;

pub const PROBE_REPORT_CAPACITY: usize = 160;
pub const DIAGNOSTIC_CAPACITY: usize = 96;

pub type ProbeReport = heapless::String<PROBE_REPORT_CAPACITY>;
pub type Diagnostic = heapless::String<DIAGNOSTIC_CAPACITY>;

/// Format the `prb` report.
///
/// Fails only if the values do not fit the fixed capacity.
pub fn probe_report(
    succeeded: bool,
    results: &[f64; AXES],
    flags: AxisFlags,
) -> Result<ProbeReport, fmt::Error> {
    let mut out = ProbeReport::new();
    write!(out, "{{\"prb\":{{\"e\":{}", u8::from(succeeded))?;
    for axis in flags.axes() {
        write!(out, ",\"{}\":{:.3}", axis.as_char(), results[axis.index()])?;
    }
    write!(out, "}}}}")?;
    Ok(out)
}

/// Format the diagnostic emitted by the probing error exit.
pub fn probe_diagnostic(error: &ProbeError) -> Result<Diagnostic, fmt::Error> {
    let mut out = Diagnostic::new();
    write!(out, "{{\"er\":{{\"msg\":\"{error}\"}}}}")?;
    Ok(out)
}

//! # Report Output
//!
//! Only the initiator writes a report. The text layout is two comment lines
//! followed by one `bytes time_us bw_Gbps` line per message size:
//!
//! ```text
//! # HtoD
//! # bytes time_us bw_Gbps
//! 1 3.100 0.002581
//! 2 3.050 0.005246
//! ```
//!
//! The JSON layout carries the same content as JSON Lines. Every line is
//! flushed as soon as it is written so that a consumer tailing the output
//! sees each size as soon as it has been measured.

use crate::benchmark::Sample;
use crate::cli::OutputFormat;
use crate::placement::TransferMode;
use serde::Serialize;
use std::io::{self, Write};

/// Names of the per-sample fields, in output order
pub const FIELDS: [&str; 3] = ["bytes", "time_us", "bw_Gbps"];

#[derive(Serialize)]
struct Header<'a> {
    mode: TransferMode,
    fields: &'a [&'a str],
}

/// Writes the report header and one line per sample
pub struct ReportWriter<W: Write> {
    out: W,
    format: OutputFormat,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    /// Write the header naming the mode and the fields
    pub fn header(&mut self, mode: TransferMode) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => {
                writeln!(self.out, "# {}", mode)?;
                writeln!(self.out, "# {}", FIELDS.join(" "))?;
            }
            OutputFormat::Json => {
                let header = Header {
                    mode,
                    fields: &FIELDS,
                };
                serde_json::to_writer(&mut self.out, &header)?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()
    }

    /// Write one measurement line
    pub fn sample(&mut self, sample: &Sample) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(
                self.out,
                "{} {:.3} {:.6}",
                sample.bytes, sample.time_us, sample.bandwidth_gbps
            )?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, sample)?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

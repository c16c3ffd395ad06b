//! Telemetry line parsing.
//!
//! While streaming, the IMC emits one status line per sample:
//!
//! ```text
//! <ch>,<state>,<voltage>,<current>[;<ch>,<state>,<voltage>,<current>]*;<ambient>
//! ```
//!
//! The last `;`-separated field is the ambient-light reading shared by the whole line.
//! Parsing is tolerant: a record whose leading channel id does not decode, or whose channel
//! is not wired to a device, is dropped without affecting its siblings or the ambient value.
//! The rest of a surviving record is logged as received.

use crate::channel::{ChannelId, ChannelTable};
use crate::error::{AppResult, ImcError};
use crate::logging::LogStream;

/// One decoded channel record.
///
/// Only the channel id is decoded. Everything after it is kept exactly as received
/// (trimmed) so the power log reproduces the device's own formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    /// Device wired to the channel
    pub device: String,
    /// Channel id
    pub channel: ChannelId,
    /// Remaining tokens after the channel id, normally `state,voltage,current`
    pub values: String,
}

impl ChannelRecord {
    /// `device,channel,state,voltage,current`
    pub fn to_log_line(&self) -> String {
        if self.values.is_empty() {
            format!("{},{}", self.device, self.channel)
        } else {
            format!("{},{},{}", self.device, self.channel, self.values)
        }
    }
}

/// One parsed telemetry line.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    /// Records that survived parsing, in line order
    pub records: Vec<ChannelRecord>,
    /// Ambient reading (trimmed), shared by all records
    pub ambient: String,
    /// Number of records that were dropped
    pub dropped: usize,
}

impl TelemetryFrame {
    /// Append one power line and one ambient line per record.
    ///
    /// The ambient value is repeated once per record so the two streams stay row-aligned.
    /// Returns the number of records written.
    ///
    /// # Errors
    /// A failed power append writes nothing for that record. A failed ambient append after
    /// its power line landed is reported as [`ImcError::StreamsOutOfStep`].
    pub fn dispatch(&self, power: &dyn LogStream, ambient: &dyn LogStream) -> AppResult<usize> {
        let lines: Vec<String> = self.records.iter().map(ChannelRecord::to_log_line).collect();
        for line in &lines {
            power.append(line)?;
            if let Err(e) = ambient.append(&self.ambient) {
                tracing::error!(stream = ambient.name(), error = %e, "ambient log out of step");
                return Err(ImcError::StreamsOutOfStep(Box::new(e)));
            }
        }
        Ok(lines.len())
    }
}

/// Parse one raw telemetry line against the channel table.
pub fn parse_frame(raw: &str, channels: &ChannelTable) -> TelemetryFrame {
    let mut fields: Vec<&str> = raw.split(';').collect();
    // split always yields at least one element
    let ambient = fields.pop().unwrap_or_default().trim().to_string();

    let mut records = Vec::with_capacity(fields.len());
    let mut dropped = 0;
    for field in fields {
        match parse_record(field, channels) {
            Some(record) => records.push(record),
            None => {
                dropped += 1;
                tracing::debug!(record = field, "dropping unparsable telemetry record");
            }
        }
    }

    TelemetryFrame {
        records,
        ambient,
        dropped,
    }
}

fn parse_record(field: &str, channels: &ChannelTable) -> Option<ChannelRecord> {
    let field = field.trim();
    let (id, values) = field.split_once(',').unwrap_or((field, ""));
    let (channel, device) = channels.resolve(id)?;

    let values = values.trim();
    if values.split(',').count() != 3 {
        tracing::debug!(record = field, "telemetry record has an unexpected field count");
    }

    Some(ChannelRecord {
        device: device.to_string(),
        channel,
        values: values.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::default_channel_entries;
    use crate::logging::MemoryLogStream;

    struct BrokenStream;

    impl LogStream for BrokenStream {
        fn name(&self) -> &str {
            "par"
        }

        fn append(&self, _line: &str) -> AppResult<()> {
            Err(ImcError::LogStream {
                stream: "par".into(),
                source: std::io::Error::other("disk full"),
            })
        }
    }

    fn table() -> ChannelTable {
        ChannelTable::from_entries(&default_channel_entries()).unwrap()
    }

    #[test]
    fn parses_every_record_of_a_well_formed_line() {
        let frame = parse_frame(
            "1,1,12.10,310;2,0,0.00,0;3,1,12.05,250;4,1,5.01,40;301.7\r\n",
            &table(),
        );

        assert_eq!(frame.records.len(), 4);
        assert_eq!(frame.dropped, 0);
        assert_eq!(frame.ambient, "301.7");
        assert_eq!(frame.records[2].to_log_line(), "wqm,3,1,12.05,250");
        assert_eq!(frame.records[1].values, "0,0.00,0");
    }

    #[test]
    fn invalid_channel_does_not_abort_the_frame() {
        let frame = parse_frame("9,1,5.0,100;1,1,5.0,50;300.5", &table());

        assert_eq!(frame.records.len(), 1);
        assert_eq!(frame.dropped, 1);
        assert_eq!(frame.records[0].device, "companion");
        assert_eq!(frame.ambient, "300.5");
    }

    #[test]
    fn records_without_a_mapped_channel_are_dropped_individually() {
        let frame = parse_frame("x,1,5.0,1;;0,1,5.0,2;4,1,5.0,40; 7 ;299", &table());

        assert_eq!(frame.records.len(), 1);
        assert_eq!(frame.records[0].channel.get(), 4);
        assert_eq!(frame.dropped, 4);
        assert_eq!(frame.ambient, "299");
    }

    #[test]
    fn mapped_records_keep_their_values_as_received() {
        let frame = parse_frame(
            "1,ON,5.0,50;1,1,5.0,50,OK;1,1,5.0,;2;300.5",
            &table(),
        );

        assert_eq!(frame.dropped, 0);
        let lines: Vec<String> = frame.records.iter().map(ChannelRecord::to_log_line).collect();
        assert_eq!(
            lines,
            vec![
                "companion,1,ON,5.0,50",
                "companion,1,1,5.0,50,OK",
                "companion,1,1,5.0,",
                "secondary,2",
            ]
        );
    }

    #[test]
    fn ambient_only_line_has_no_records() {
        let frame = parse_frame("300.5\n", &table());
        assert!(frame.records.is_empty());
        assert_eq!(frame.ambient, "300.5");

        let blank = parse_frame("\r\n", &table());
        assert!(blank.records.is_empty());
        assert_eq!(blank.ambient, "");
    }

    #[test]
    fn dispatch_replicates_ambient_per_record() {
        let power = MemoryLogStream::new("imc_power");
        let ambient = MemoryLogStream::new("par");
        let frame = parse_frame("3,1,12.0,200;4,1,5.0,40;288.0", &table());

        let written = frame.dispatch(&power, &ambient).unwrap();

        assert_eq!(written, 2);
        assert_eq!(power.lines(), vec!["wqm,3,1,12.0,200", "par,4,1,5.0,40"]);
        assert_eq!(ambient.lines(), vec!["288.0", "288.0"]);
    }

    #[test]
    fn dispatch_counts_match_for_any_record_count() {
        for k in 0..=4u8 {
            let mut line: Vec<String> = (1..=k).map(|id| format!("{},1,5.0,10", id)).collect();
            line.push("123.4".into());
            let frame = parse_frame(&line.join(";"), &table());

            let power = MemoryLogStream::new("imc_power");
            let ambient = MemoryLogStream::new("par");
            frame.dispatch(&power, &ambient).unwrap();

            assert_eq!(power.lines().len(), k as usize);
            assert_eq!(ambient.lines().len(), k as usize);
        }
    }

    #[test]
    fn failed_ambient_append_reports_the_broken_alignment() {
        let power = MemoryLogStream::new("imc_power");
        let frame = parse_frame("3,1,12.0,200;4,1,5.0,40;288.0", &table());

        let err = frame.dispatch(&power, &BrokenStream).unwrap_err();

        assert!(matches!(err, ImcError::StreamsOutOfStep(_)));
        assert!(err.to_string().contains("disk full"));
        assert_eq!(power.lines(), vec!["wqm,3,1,12.0,200"]);
    }
}

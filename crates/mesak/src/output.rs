use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mesak_driver::{CategoryStats, CommandResponse, CommandStatus};
use mesak_frame::{layout, Category, Header, OwnedPacket, TypedPacket};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    command: &'a str,
    ok: bool,
    status: CommandStatus,
    text: &'a str,
    timestamp: String,
}

pub fn print_response(command: &str, response: &CommandResponse, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                command,
                ok: response.ok,
                status: response.status,
                text: &response.text,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "STATUS", "RESPONSE"])
                .add_row(vec![
                    command.to_string(),
                    response.status.to_string(),
                    response.text.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("> {command}");
            if !response.text.is_empty() {
                println!("{}", response.text);
            }
            println!("[{}]", response.status);
        }
    }
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    category: Category,
    packet_size: u32,
    records: usize,
    summary: String,
    header: &'a Header,
    #[serde(skip_serializing_if = "Option::is_none")]
    packet: Option<OwnedPacket>,
    timestamp: String,
}

fn packet_output(packet: &TypedPacket, with_records: bool) -> PacketOutput<'_> {
    PacketOutput {
        category: packet.category(),
        packet_size: packet.header().packet_size(),
        records: packet.count(),
        summary: summary(packet),
        header: packet.header(),
        packet: with_records.then(|| packet.materialize()),
        timestamp: now_unix_seconds(),
    }
}

pub fn print_packet(packet: &TypedPacket, with_records: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = packet_output(packet, with_records);
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CATEGORY", "SIZE", "RECORDS", "SUMMARY"])
                .add_row(vec![
                    packet.category().to_string(),
                    packet.header().packet_size().to_string(),
                    packet.count().to_string(),
                    summary(packet),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} size={} records={} {}",
                packet.category(),
                packet.header().packet_size(),
                packet.count(),
                summary(packet)
            );
        }
    }
}

#[derive(Serialize)]
struct StatsOutput {
    category: Category,
    #[serde(flatten)]
    stats: CategoryStats,
}

pub fn print_stats(rows: &[(Category, CategoryStats)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for (category, stats) in rows {
                let out = StatsOutput {
                    category: *category,
                    stats: *stats,
                };
                println!(
                    "{}",
                    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CATEGORY", "RECEIVED", "MALFORMED", "SAVED", "BUFFERED"]);
            for (category, stats) in rows {
                table.add_row(vec![
                    category.to_string(),
                    stats.received.to_string(),
                    stats.malformed.to_string(),
                    stats.saved.to_string(),
                    stats.buffered.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (category, stats) in rows {
                println!(
                    "{category}: received={} malformed={} saved={} buffered={}",
                    stats.received, stats.malformed, stats.saved, stats.buffered
                );
            }
        }
    }
}

/// One-line description of a packet's content.
pub fn summary(packet: &TypedPacket) -> String {
    match packet.header() {
        Header::Status(header) => {
            let state = packet
                .records::<layout::Status>()
                .ok()
                .and_then(|mut records| records.next())
                .map_or_else(|| "?".to_string(), |data| data.sys_state.to_string());
            format!("serial={} sys_state={state}", header.serial_number)
        }
        Header::Rvmap(header) => format!(
            "{}x{} cells beam_az={:.1} beam_el={:.1}",
            header.n_ranges, header.n_velocities, header.beam_az, header.beam_el
        ),
        Header::Detection(header) => format!(
            "{} detections az={:.1} el={:.1}",
            header.n_detections, header.az, header.el
        ),
        Header::Track(header) => format!("{} tracks", header.n_tracks),
        Header::Measurement(header) => format!("{} measurements", header.n_measurements),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use mesak_frame::{decode, encode, CompleteFrame, Track, TrackHeader, TrackPacket};

    use super::*;

    fn tracks(n: usize) -> TypedPacket {
        let packet = TrackPacket::new(TrackHeader::default(), vec![Track::default(); n]);
        let bytes = encode(&packet).unwrap();
        decode(CompleteFrame::from_bytes(bytes), Category::Track).unwrap()
    }

    #[test]
    fn summary_counts_records() {
        assert_eq!(summary(&tracks(3)), "3 tracks");
    }

    #[test]
    fn packet_json_includes_records_only_on_request() {
        let packet = tracks(2);
        let brief = serde_json::to_value(packet_output(&packet, false)).unwrap();
        assert_eq!(brief["category"], "track");
        assert_eq!(brief["records"], 2);
        assert_eq!(brief["packet_size"], 40 + 2 * 128);
        assert!(brief.get("packet").is_none());

        let full = serde_json::to_value(packet_output(&packet, true)).unwrap();
        assert_eq!(full["packet"]["track"]["records"].as_array().unwrap().len(), 2);
    }
}

//! `blockwatch query`: one-off status check against a game server.

use std::time::Duration;

use blockwatch_api::MinecraftQuery;
use blockwatch_core::QueryClient;
use blockwatch_core::validate::parse_target;
use serde::Serialize;

use crate::cli::{GlobalOpts, QueryArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
struct QueryReport {
    address: String,
    port: u16,
    motd: String,
    online: u32,
    capacity: u32,
    players: Vec<String>,
}

fn detail(report: &QueryReport) -> String {
    let players = if report.players.is_empty() {
        "-".to_owned()
    } else {
        report.players.join(", ")
    };
    format!(
        "Address:  {}:{}\nMOTD:     {}\nPlayers:  {}/{}\nOnline:   {players}",
        report.address, report.port, report.motd, report.online, report.capacity
    )
}

pub async fn handle(args: QueryArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_config(global)?;
    let monitor = cfg.monitor.to_monitor_config()?;

    let target = parse_target(&args.address, args.port.as_deref(), monitor.default_port).map_err(|e| {
        CliError::Validation {
            field: "address".into(),
            reason: e.to_string(),
        }
    })?;
    let timeout = match args.timeout_ms {
        Some(0) => {
            return Err(CliError::Validation {
                field: "timeout-ms".into(),
                reason: "must be at least 1".into(),
            });
        }
        Some(ms) => Duration::from_millis(ms),
        None => monitor.query_timeout,
    };

    tracing::debug!(host = %target.host, port = target.port, ?timeout, "querying");
    let client = MinecraftQuery::new();
    let observed = QueryClient::query(&client, &target.host, target.port, timeout)
        .await
        .map_err(|e| CliError::from_query(&target.host, e))?;

    let report = QueryReport {
        address: target.host,
        port: target.port,
        motd: observed.motd,
        online: observed.online,
        capacity: observed.capacity,
        players: observed.roster.into_iter().collect(),
    };
    let out = output::render_single(&global.output, &report, detail, |r| format!("{}/{}", r.online, r.capacity))?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_lists_players_or_dash() {
        let mut report = QueryReport {
            address: "mc.example.net".into(),
            port: 25565,
            motd: "A Minecraft Server".into(),
            online: 0,
            capacity: 20,
            players: Vec::new(),
        };
        assert!(detail(&report).ends_with("Online:   -"));

        report.online = 2;
        report.players = vec!["Alex".into(), "Steve".into()];
        let text = detail(&report);
        assert!(text.contains("Players:  2/20"));
        assert!(text.ends_with("Online:   Alex, Steve"));
    }
}

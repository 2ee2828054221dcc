use bluegreen_switch::{StatusReport, Switcher};

use crate::Format;

pub async fn status(switcher: &Switcher, format: Format) -> anyhow::Result<()> {
    let report = switcher.status().await?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print!("{}", format_report(&report)),
    }
    Ok(())
}

pub fn format_report(report: &StatusReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Backend:  {}\n", report.backend));
    let note = if report.selector_set { "" } else { ", selector unset" };
    out.push_str(&format!(
        "Active:   {} (revision {}{note})\n",
        report.active, report.revision
    ));
    for env in &report.environments {
        let marker = if env.active { "*" } else { " " };
        match &env.deployment {
            Some(d) => out.push_str(&format!(
                "{marker} {:<6} {}  {}/{} ready  generation {}\n",
                env.environment.as_str(),
                d.image,
                d.ready_replicas,
                d.replicas,
                d.generation
            )),
            None => out.push_str(&format!(
                "{marker} {:<6} not deployed\n",
                env.environment.as_str()
            )),
        }
    }
    if !report.recent_switches.is_empty() {
        out.push_str("Recent switches:\n");
        for switch in &report.recent_switches {
            let from = switch.from.map(|env| env.as_str()).unwrap_or("unset");
            let at = chrono::DateTime::from_timestamp(switch.switched_at as i64, 0)
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| switch.switched_at.to_string());
            out.push_str(&format!(
                "  {at}  {from} -> {}  revision {}\n",
                switch.to, switch.revision
            ));
        }
    }
    out
}

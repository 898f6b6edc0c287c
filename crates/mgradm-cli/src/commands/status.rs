use mgradm_backend::Backend;
use mgradm_upgrade::{exit_code, status, StatusReport};

use super::OutputFormat;

pub fn run(backend: &Backend, format: OutputFormat) -> anyhow::Result<u8> {
    let report = status(backend)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", format_report(&report)),
    }
    Ok(exit_code::SUCCESS)
}

fn format_report(report: &StatusReport) -> String {
    let mut out = format!("Backend: {}\n", report.backend);
    for status in &report.components {
        let image = status.image.as_deref().unwrap_or("-");
        out.push_str(&format!(
            "  {:<12} {:>2} replica(s)  {image}\n",
            status.component.name(),
            status.replicas
        ));
    }
    match &report.services {
        Some(services) => {
            out.push_str("\nServices:\n");
            for line in services.lines() {
                out.push_str(&format!("  {line}\n"));
            }
        }
        None if !report.server_running() => out.push_str("\nThe server is not running.\n"),
        None => {}
    }
    out
}

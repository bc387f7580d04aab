//! `sesam audit`: display the audit log.
//!
//! Usage:
//!   sesam audit               # show last 50 entries
//!   sesam audit --last 20     # show last 20

use crate::audit::{AuditEntry, AuditLog};
use crate::cli::output;
use crate::cli::{Cli, Context};
use crate::errors::Result;

/// Execute the `audit` command.
pub fn execute(cli: &Cli, last: usize) -> Result<()> {
    let ctx = Context::load(cli)?;

    if !AuditLog::db_path(&ctx.data_dir).exists() {
        output::info("No audit entries found.");
        return Ok(());
    }
    let audit = AuditLog::open(&ctx.data_dir)?;

    let entries = audit.query(last)?;
    if entries.is_empty() {
        output::info("No audit entries found.");
        return Ok(());
    }

    print_audit_table(&entries);
    Ok(())
}

/// Print audit entries in a formatted table.
pub fn print_audit_table(entries: &[AuditEntry]) {
    use comfy_table::{ContentArrangement, Table};
    use console::style;

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Time", "Operation", "Domain", "Details"]);

    for entry in entries {
        let time = entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        let domain = entry.domain.as_deref().unwrap_or("-");
        let details = entry.details.as_deref().unwrap_or("-");

        table.add_row(vec![
            time,
            colorize_operation(&entry.operation),
            domain.to_string(),
            details.to_string(),
        ]);
    }

    println!(
        "{}",
        style(format!("{} audit entries:", entries.len())).bold()
    );
    println!("{table}");
}

fn colorize_operation(op: &str) -> String {
    use console::style;

    match op {
        "init" => style(op).green().to_string(),
        "sync" => style(op).blue().to_string(),
        "migrate" => style(op).red().to_string(),
        "rotate-key" => style(op).yellow().to_string(),
        "trust" => style(op).cyan().to_string(),
        _ => op.to_string(),
    }
}

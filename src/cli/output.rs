//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::vault::DomainSetting;

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

/// Print the derived password on its own line so it can be piped.
pub fn password(value: &str) {
    println!("{value}");
}

/// Print a table of domain settings. Pinned passwords are never shown.
pub fn print_domains_table(settings: &[DomainSetting]) {
    if settings.is_empty() {
        info("No domains in this vault yet.");
        tip("Run `sesam generate <domain>` to add your first site.");
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Domain",
        "User",
        "Length",
        "Complexity",
        "Iterations",
        "Pinned",
        "Modified",
    ]);

    for s in settings {
        let pinned = if s.legacy_password.is_some() { "yes" } else { "-" };
        let user = if s.username.is_empty() {
            "-"
        } else {
            s.username.as_str()
        };
        table.add_row(vec![
            s.domain.clone(),
            user.to_string(),
            s.length.to_string(),
            s.complexity.to_string(),
            s.iterations.to_string(),
            pinned.to_string(),
            s.modified_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }

    println!("{table}");
}

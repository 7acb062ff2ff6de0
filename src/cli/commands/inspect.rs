//! Inspect command - show how cache keys are handled

use crate::cache::{content_type_for, staged_file_name};
use crate::cli::args::{InspectArgs, OutputFormat};
use crate::config::Config;
use crate::error::ModCacheResult;
use crate::redirect::{cache_name, is_auto_redirectable};
use console::style;
use serde::Serialize;

/// How one cache key is staged, typed and routed
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyReport {
    pub name: String,
    pub staged_file: String,
    pub content_type: Option<&'static str>,
    pub redirectable: bool,
}

impl KeyReport {
    pub fn new(raw: &str) -> Self {
        let name = cache_name(raw);
        Self {
            staged_file: staged_file_name(&name),
            content_type: content_type_for(&name),
            redirectable: is_auto_redirectable(&name),
            name,
        }
    }
}

/// Execute the inspect command
pub async fn execute(args: InspectArgs, config: &Config) -> ModCacheResult<()> {
    let reports: Vec<KeyReport> = args.names.iter().map(|n| KeyReport::new(n)).collect();

    match args.format {
        OutputFormat::Table => print_table(&reports, config),
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Plain => print_plain(&reports),
    }

    Ok(())
}

fn print_table(reports: &[KeyReport], config: &Config) {
    println!(
        "{:<48} {:<34} {:<10} {}",
        style("NAME").bold(),
        style("CONTENT TYPE").bold(),
        style("REDIRECT").bold(),
        style("STAGED FILE").bold()
    );
    println!("{}", "-".repeat(160));

    for report in reports {
        let redirect = if !report.redirectable {
            style("no").dim()
        } else if config.redirect.auto_redirect {
            style("yes").green()
        } else {
            style("disabled").yellow()
        };

        println!(
            "{:<48} {:<34} {:<10} {}",
            report.name,
            report.content_type.unwrap_or("-"),
            redirect,
            report.staged_file
        );
    }
}

fn print_json(reports: &[KeyReport]) -> ModCacheResult<()> {
    let json = serde_json::to_string_pretty(reports)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(reports: &[KeyReport]) {
    for report in reports {
        println!("{} {}", report.staged_file, report.name);
    }
}

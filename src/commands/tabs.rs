use colored::Colorize;

use nodemark::config::Config;
use nodemark::Result;

use super::connect;
use crate::cli::Cli;

pub async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load()?;
    let connection = connect(cli, &config).await?;
    let tabs = connection.list_tabs().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&tabs)?);
        return Ok(());
    }

    if tabs.is_empty() {
        println!("{}", "No open tabs".dimmed());
        return Ok(());
    }

    for tab in &tabs {
        let marker = if tab.attached { "*".yellow() } else { " ".normal() };
        println!("{} {}  {}", marker, tab.target_id.as_str().cyan(), tab.title);
        println!("    {}", tab.url.dimmed());
    }

    Ok(())
}

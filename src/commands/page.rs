use colored::Colorize;
use serde_json::json;

use nodemark::{BackendNodeId, NodemarkError, Result};

use super::AttachedTab;
use crate::cli::{Cli, TargetArgs};

pub async fn tree(cli: &Cli, tab: &str, all: bool) -> Result<()> {
    let page = AttachedTab::open(cli, tab).await?;
    let result = page
        .guard(page.controller.get_accessibility_tree(&page.tab))
        .await;
    page.close().await;

    let tree = result?;
    let tree = if all { tree } else { tree.interactive() };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else if tree.is_empty() {
        println!("{}", "(no interactive nodes)".dimmed());
    } else {
        println!("{}", tree.render());
    }
    Ok(())
}

pub async fn resolve(cli: &Cli, tab: &str, backend_node_ids: &[i64]) -> Result<()> {
    let page = AttachedTab::open(cli, tab).await?;
    let result = page
        .guard(async {
            let mut resolved = Vec::with_capacity(backend_node_ids.len());
            for id in backend_node_ids {
                let selector = page
                    .controller
                    .resolve_selector(&page.tab, BackendNodeId(*id))
                    .await?;
                resolved.push((*id, selector));
            }
            Ok::<_, NodemarkError>(resolved)
        })
        .await;
    page.close().await;

    let resolved = result?;
    if cli.json {
        let items: Vec<_> = resolved
            .iter()
            .map(|(id, selector)| json!({"backend_node_id": id, "selector": selector}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for (id, selector) in &resolved {
            println!("{} {}", format!("[{}]", id).cyan(), selector);
        }
    }
    Ok(())
}

pub async fn click(cli: &Cli, tab: &str, target: &TargetArgs) -> Result<()> {
    let page = AttachedTab::open(cli, tab).await?;
    let result = page
        .guard(async {
            let selector = target_selector(&page, target).await?;
            page.controller.click(&page.tab, &selector).await?;
            Ok::<_, NodemarkError>(selector)
        })
        .await;
    page.close().await;

    let selector = result?;
    if cli.json {
        println!("{}", json!({"success": true, "action": "click", "selector": selector}));
    } else {
        println!("{} Clicked {}", "✓".green(), selector.dimmed());
    }
    Ok(())
}

pub async fn fill(cli: &Cli, tab: &str, target: &TargetArgs, text: &str) -> Result<()> {
    let page = AttachedTab::open(cli, tab).await?;
    let result = page
        .guard(async {
            let selector = target_selector(&page, target).await?;
            page.controller.fill(&page.tab, &selector, text).await?;
            Ok::<_, NodemarkError>(selector)
        })
        .await;
    page.close().await;

    let selector = result?;
    if cli.json {
        println!("{}", json!({"success": true, "action": "fill", "selector": selector}));
    } else {
        println!("{} Filled {}", "✓".green(), selector.dimmed());
    }
    Ok(())
}

pub async fn eval(cli: &Cli, tab: &str, script: &str) -> Result<()> {
    let page = AttachedTab::open(cli, tab).await?;
    let result = page
        .guard(page.controller.evaluate(&page.tab, script))
        .await;
    page.close().await;

    result?;
    if cli.json {
        println!("{}", json!({"success": true, "action": "eval"}));
    } else {
        println!("{} Script evaluated", "✓".green());
    }
    Ok(())
}

async fn target_selector(page: &AttachedTab, target: &TargetArgs) -> Result<String> {
    match (&target.selector, target.node) {
        (Some(selector), _) => Ok(selector.clone()),
        (None, Some(id)) => Ok(page
            .controller
            .resolve_selector(&page.tab, BackendNodeId(id))
            .await?
            .into()),
        (None, None) => Err(NodemarkError::Other(
            "Either --node or --selector is required".to_string(),
        )),
    }
}

//! `vigil discover`: enumerate the chat entities the session can see.
//!
//! Three modes: a plain aligned listing, a diff against the configured
//! channel keys, and a generated config skeleton. Shares only the config
//! loader with the pipeline.

use std::path::Path;

use anyhow::Context;

use vigil_core::config::load_route_table;
use vigil_core::route::channel_matches;
use vigil_telegram::{ChatClient, ChatRef};

use crate::session::connect_chat;

const GENERATED_CONFIG: &str = "vigil.generated.json";

pub async fn run(config_path: &Path, diff: bool, generate: bool) -> anyhow::Result<()> {
    let client = connect_chat().await?;
    let mut dialogs = client.dialogs().await.context("listing dialogs")?;
    dialogs.sort_by(|a, b| a.display_name.cmp(&b.display_name));

    if generate {
        generate_skeleton(&dialogs)?;
    } else if diff {
        diff_against_config(config_path, &dialogs)?;
    } else {
        list(&dialogs);
    }
    Ok(())
}

fn list(dialogs: &[ChatRef]) {
    println!("{:<40} {:<16} {}", "NAME", "ID", "HANDLE");
    for dialog in dialogs {
        println!(
            "{:<40} {:<16} {}",
            truncate(&dialog.display_name, 40),
            dialog.marked_id,
            dialog.handle.as_deref().unwrap_or("-")
        );
    }
    println!("\n{} accessible entities", dialogs.len());
}

fn diff_against_config(config_path: &Path, dialogs: &[ChatRef]) -> anyhow::Result<()> {
    let table = load_route_table(config_path).context("loading configuration for diff")?;
    let keys = table.channel_keys();

    println!("Configured channels:");
    for key in &keys {
        let found = dialogs.iter().any(|d| dialog_matches(d, key));
        let marker = if found { "found  " } else { "MISSING" };
        println!("  [{marker}] {key}");
    }

    println!("\nAccessible but not configured:");
    let mut unconfigured = 0usize;
    for dialog in dialogs {
        // Only group-like entities are worth monitoring.
        if !dialog.marked_id.starts_with('-') {
            continue;
        }
        if keys.iter().any(|key| dialog_matches(dialog, key)) {
            continue;
        }
        unconfigured += 1;
        println!(
            "  {:<40} {:<16} {}",
            truncate(&dialog.display_name, 40),
            dialog.marked_id,
            dialog.handle.as_deref().unwrap_or("-")
        );
    }
    if unconfigured == 0 {
        println!("  (none)");
    }
    Ok(())
}

fn generate_skeleton(dialogs: &[ChatRef]) -> anyhow::Result<()> {
    let channels: Vec<serde_json::Value> = dialogs
        .iter()
        .filter(|d| d.marked_id.starts_with('-'))
        .map(|d| {
            serde_json::json!({
                "id": d.handle.clone().unwrap_or_else(|| d.marked_id.clone()),
                "keywords": null,
            })
        })
        .collect();
    let count = channels.len();

    let skeleton = serde_json::json!({
        "destinations": [ {
            "name": "generated",
            "type": "webhook",
            "env_key": "DISCORD_WEBHOOK_URL",
            "channels": channels,
        } ]
    });

    std::fs::write(
        GENERATED_CONFIG,
        serde_json::to_string_pretty(&skeleton)?,
    )
    .with_context(|| format!("writing {GENERATED_CONFIG}"))?;
    println!("wrote {GENERATED_CONFIG} with {count} channels");
    Ok(())
}

fn dialog_matches(dialog: &ChatRef, key: &str) -> bool {
    dialog.handle.as_deref() == Some(key) || channel_matches(key, &dialog.marked_id)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog(name: &str, marked_id: &str, handle: Option<&str>) -> ChatRef {
        ChatRef {
            marked_id: marked_id.to_string(),
            handle: handle.map(str::to_string),
            display_name: name.to_string(),
        }
    }

    #[test]
    fn dialog_matches_by_handle_or_numeric_id() {
        let public = dialog("Intel", "-1001234", Some("@intel"));
        assert!(dialog_matches(&public, "@intel"));
        assert!(dialog_matches(&public, "-1001234"));
        assert!(dialog_matches(&public, "1234"));
        assert!(!dialog_matches(&public, "@other"));
    }

    #[test]
    fn truncate_keeps_short_names() {
        assert_eq!(truncate("short", 40), "short");
        assert_eq!(truncate(&"x".repeat(50), 10).chars().count(), 10);
    }
}

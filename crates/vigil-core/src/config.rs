//! Configuration document loading and the derived route table.
//!
//! The JSON document is read once at startup (figment `Json` provider) and
//! collapsed into an immutable [`RouteTable`]: endpoints resolved from the
//! environment, keyword files inlined, parser specs validated, defaults
//! fixed. Routing never sees a partially-populated rule. There is no hot
//! reload.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use figment::providers::{Format, Json};
use figment::Figment;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::parse::ParserSpec;

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    destinations: Vec<RawDestination>,
}

#[derive(Debug, Deserialize)]
struct RawDestination {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    env_key: String,
    #[serde(default)]
    channels: Vec<RawChannelRule>,
    #[serde(default)]
    rss: Vec<RawFeedRule>,
}

#[derive(Debug, Deserialize)]
struct RawChannelRule {
    id: String,
    #[serde(default)]
    keywords: Option<RawKeywords>,
    #[serde(default)]
    restricted_mode: bool,
    #[serde(default)]
    ocr: bool,
    #[serde(default = "default_true")]
    check_attachments: bool,
    #[serde(default)]
    parser: Option<RawParser>,
}

#[derive(Debug, Deserialize)]
struct RawFeedRule {
    url: String,
    name: String,
    #[serde(default)]
    keywords: Option<RawKeywords>,
    #[serde(default)]
    parser: Option<RawParser>,
}

#[derive(Debug, Default, Deserialize)]
struct RawKeywords {
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    inline: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawParser {
    trim_front: Option<Value>,
    trim_back: Option<Value>,
    keep_first: Option<Value>,
}

fn default_true() -> bool {
    true
}

/// Destination transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Webhook,
    Chat,
}

impl DestinationKind {
    pub fn label(self) -> &'static str {
        match self {
            DestinationKind::Webhook => "webhook",
            DestinationKind::Chat => "chat",
        }
    }
}

/// A delivery target with its endpoint already resolved from the
/// environment. Shared (`Arc`) between every route entry that points at it.
#[derive(Debug)]
pub struct Destination {
    pub name: String,
    pub kind: DestinationKind,
    /// Webhook URL or chat id; never stored in the plaintext config.
    pub endpoint: String,
}

/// Fully-defaulted filtering and transformation contract for one
/// (channel-or-feed, destination) pair.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    /// Empty means match-all.
    pub keywords: Vec<String>,
    pub parser: ParserSpec,
    pub ocr: bool,
    pub restricted: bool,
    pub check_attachments: bool,
}

/// One route table entry.
#[derive(Debug, Clone)]
pub struct Route {
    pub destination: Arc<Destination>,
    pub rule: Rule,
}

/// A unique feed to poll. Many routes may point at the same feed.
#[derive(Debug, Clone)]
pub struct FeedSpec {
    pub url: String,
    pub name: String,
}

/// Immutable routing state derived from the config document.
#[derive(Debug, Default)]
pub struct RouteTable {
    /// (configured channel key, route) pairs, in document order.
    pub(crate) channel_routes: Vec<(String, Route)>,
    /// (feed URL, route) pairs, in document order.
    pub(crate) feed_routes: Vec<(String, Route)>,
    /// Feeds deduplicated by URL; one poller each.
    feeds: Vec<FeedSpec>,
}

impl RouteTable {
    /// Unique configured chat channel keys, in first-seen order.
    pub fn channel_keys(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.channel_routes
            .iter()
            .map(|(key, _)| key.as_str())
            .filter(|key| seen.insert(*key))
            .collect()
    }

    /// Feeds to poll, one entry per unique URL.
    pub fn feeds(&self) -> &[FeedSpec] {
        &self.feeds
    }

    /// Unique destinations, in first-seen order.
    pub fn destinations(&self) -> Vec<Arc<Destination>> {
        let mut out: Vec<Arc<Destination>> = Vec::new();
        for (_, route) in self.channel_routes.iter().chain(&self.feed_routes) {
            if !out.iter().any(|d| Arc::ptr_eq(d, &route.destination)) {
                out.push(Arc::clone(&route.destination));
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.channel_routes.is_empty() && self.feed_routes.is_empty()
    }
}

/// Load and validate the config document at `path`.
///
/// Fatal errors (unparseable document, invalid destination type, a parser
/// rule using both shapes, or no usable destination at all) return
/// `CoreError::Config`. Recoverable problems (missing endpoint env var,
/// unreadable keyword file) are logged and skipped.
pub fn load_route_table(path: &Path) -> Result<RouteTable> {
    let raw: RawDocument = Figment::new()
        .merge(Json::file(path))
        .extract()
        .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut table = RouteTable::default();
    let mut names_seen: HashSet<String> = HashSet::new();

    for dest in raw.destinations {
        if !names_seen.insert(dest.name.clone()) {
            warn!(name = %dest.name, "duplicate destination name");
        }

        let kind = match dest.kind.to_ascii_lowercase().as_str() {
            "webhook" => DestinationKind::Webhook,
            "chat" => DestinationKind::Chat,
            other => {
                return Err(CoreError::Config(format!(
                    "destination {}: unknown type {other:?}",
                    dest.name
                )));
            }
        };

        let endpoint = match std::env::var(&dest.env_key) {
            Ok(value) if !value.is_empty() => value,
            _ => {
                warn!(
                    name = %dest.name,
                    env_key = %dest.env_key,
                    "endpoint env var missing, skipping destination"
                );
                continue;
            }
        };

        let destination = Arc::new(Destination {
            name: dest.name.clone(),
            kind,
            endpoint,
        });

        for channel in dest.channels {
            if channel.restricted_mode {
                info!(channel = %channel.id, destination = %dest.name, "restricted mode enabled");
            }
            let rule = Rule {
                keywords: resolve_keywords(channel.keywords, base_dir),
                parser: parser_spec(channel.parser.as_ref(), &dest.name)?,
                ocr: channel.ocr,
                restricted: channel.restricted_mode,
                check_attachments: channel.check_attachments,
            };
            table.channel_routes.push((
                channel.id,
                Route {
                    destination: Arc::clone(&destination),
                    rule,
                },
            ));
        }

        for feed in dest.rss {
            if feed.url.is_empty() {
                warn!(destination = %dest.name, "feed with empty URL, skipping");
                continue;
            }
            let rule = Rule {
                keywords: resolve_keywords(feed.keywords, base_dir),
                parser: parser_spec(feed.parser.as_ref(), &dest.name)?,
                // Feeds have no media: the chat-only options stay off.
                ocr: false,
                restricted: false,
                check_attachments: false,
            };
            match table.feeds.iter().find(|f| f.url == feed.url) {
                Some(existing) => {
                    if existing.name != feed.name {
                        warn!(
                            url = %feed.url,
                            kept = %existing.name,
                            ignored = %feed.name,
                            "conflicting names for shared feed"
                        );
                    }
                }
                None => table.feeds.push(FeedSpec {
                    url: feed.url.clone(),
                    name: feed.name,
                }),
            }
            table.feed_routes.push((
                feed.url,
                Route {
                    destination: Arc::clone(&destination),
                    rule,
                },
            ));
        }
    }

    if table.is_empty() {
        return Err(CoreError::Config(
            "no usable destinations configured".to_string(),
        ));
    }

    info!(
        destinations = table.destinations().len(),
        channels = table.channel_keys().len(),
        feeds = table.feeds.len(),
        "configuration loaded"
    );
    Ok(table)
}

/// Merge inline keywords with the contents of referenced keyword files
/// (one keyword per line, `#` comments and blanks ignored, resolved
/// relative to the config file).
fn resolve_keywords(raw: Option<RawKeywords>, base_dir: &Path) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let mut keywords: Vec<String> = Vec::new();
    for file in &raw.files {
        let path = base_dir.join(file);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                keywords.extend(
                    content
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty() && !line.starts_with('#'))
                        .map(str::to_string),
                );
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "keyword file unreadable, skipping");
            }
        }
    }
    keywords.extend(raw.inline.iter().map(|kw| kw.trim().to_string()));
    keywords.retain(|kw| !kw.is_empty());
    keywords
}

/// Validate a raw parser object into a [`ParserSpec`].
///
/// Using both the trim shape and `keep_first` is a configuration error.
/// Negative or non-numeric values degrade to `ParserSpec::None` with a
/// warning.
fn parser_spec(raw: Option<&RawParser>, destination: &str) -> Result<ParserSpec> {
    let Some(raw) = raw else {
        return Ok(ParserSpec::None);
    };

    let has_trim = raw.trim_front.is_some() || raw.trim_back.is_some();
    if has_trim && raw.keep_first.is_some() {
        return Err(CoreError::Config(format!(
            "destination {destination}: parser uses both trim and keep_first"
        )));
    }

    if let Some(value) = &raw.keep_first {
        return Ok(match value.as_i64() {
            Some(count) if count > 0 => ParserSpec::KeepFirst {
                count: count as usize,
            },
            _ => {
                warn!(%destination, ?value, "invalid keep_first, parser disabled");
                ParserSpec::None
            }
        });
    }

    if has_trim {
        let front = non_negative(raw.trim_front.as_ref(), "trim_front", destination);
        let back = non_negative(raw.trim_back.as_ref(), "trim_back", destination);
        return Ok(match (front, back) {
            (Some(front), Some(back)) => ParserSpec::Trim { front, back },
            _ => ParserSpec::None,
        });
    }

    Ok(ParserSpec::None)
}

/// An absent field counts as 0; a present but negative or non-numeric one
/// invalidates the whole parser.
fn non_negative(value: Option<&Value>, field: &str, destination: &str) -> Option<usize> {
    let Some(value) = value else {
        return Some(0);
    };
    match value.as_i64() {
        Some(n) if n >= 0 => Some(n as usize),
        _ => {
            warn!(%destination, %field, ?value, "invalid parser field, parser disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("vigil.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_minimal_webhook_destination() {
        std::env::set_var("VIGIL_TEST_HOOK_A", "https://discord.test/hook");
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{ "destinations": [ {
                "name": "cti",
                "type": "webhook",
                "env_key": "VIGIL_TEST_HOOK_A",
                "channels": [ { "id": "@feedchan", "keywords": { "inline": ["CVE"] } } ]
            } ] }"#,
        );

        let table = load_route_table(&path).unwrap();
        assert_eq!(table.channel_keys(), vec!["@feedchan"]);
        let (_, route) = &table.channel_routes[0];
        assert_eq!(route.destination.endpoint, "https://discord.test/hook");
        assert_eq!(route.rule.keywords, vec!["CVE"]);
        assert!(route.rule.check_attachments, "default must be on");
        assert!(!route.rule.ocr);
        assert!(!route.rule.restricted);
    }

    #[test]
    fn missing_env_skips_destination_but_config_with_none_left_fails() {
        std::env::remove_var("VIGIL_TEST_HOOK_MISSING");
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{ "destinations": [ {
                "name": "ghost", "type": "webhook", "env_key": "VIGIL_TEST_HOOK_MISSING",
                "channels": [ { "id": "@x" } ]
            } ] }"#,
        );
        assert!(matches!(
            load_route_table(&path),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn keyword_files_are_merged_with_inline() {
        std::env::set_var("VIGIL_TEST_HOOK_B", "https://discord.test/hook");
        let dir = tempfile::tempdir().unwrap();
        let mut kw = std::fs::File::create(dir.path().join("kw.txt")).unwrap();
        writeln!(kw, "# comment").unwrap();
        writeln!(kw, "ransomware").unwrap();
        writeln!(kw).unwrap();
        writeln!(kw, "  stealer  ").unwrap();

        let path = write_config(
            dir.path(),
            r#"{ "destinations": [ {
                "name": "cti", "type": "webhook", "env_key": "VIGIL_TEST_HOOK_B",
                "channels": [ { "id": "@c",
                    "keywords": { "files": ["kw.txt"], "inline": ["CVE"] } } ]
            } ] }"#,
        );

        let table = load_route_table(&path).unwrap();
        let (_, route) = &table.channel_routes[0];
        assert_eq!(route.rule.keywords, vec!["ransomware", "stealer", "CVE"]);
    }

    #[test]
    fn shared_feed_url_is_deduplicated() {
        std::env::set_var("VIGIL_TEST_HOOK_C", "https://discord.test/1");
        std::env::set_var("VIGIL_TEST_HOOK_D", "https://discord.test/2");
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{ "destinations": [
                { "name": "a", "type": "webhook", "env_key": "VIGIL_TEST_HOOK_C",
                  "rss": [ { "url": "https://feeds.test/x.xml", "name": "X",
                             "keywords": { "inline": ["CVE"] } } ] },
                { "name": "b", "type": "webhook", "env_key": "VIGIL_TEST_HOOK_D",
                  "rss": [ { "url": "https://feeds.test/x.xml", "name": "X" } ] }
            ] }"#,
        );

        let table = load_route_table(&path).unwrap();
        assert_eq!(table.feeds().len(), 1, "one poller per unique URL");
        assert_eq!(table.feed_routes.len(), 2, "both routes kept");
    }

    #[test]
    fn parser_with_both_shapes_is_a_config_error() {
        std::env::set_var("VIGIL_TEST_HOOK_E", "https://discord.test/hook");
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{ "destinations": [ {
                "name": "cti", "type": "webhook", "env_key": "VIGIL_TEST_HOOK_E",
                "channels": [ { "id": "@c",
                    "parser": { "trim_front": 1, "keep_first": 3 } } ]
            } ] }"#,
        );
        assert!(matches!(load_route_table(&path), Err(CoreError::Config(_))));
    }

    #[test]
    fn negative_parser_values_degrade_to_none() {
        std::env::set_var("VIGIL_TEST_HOOK_F", "https://discord.test/hook");
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{ "destinations": [ {
                "name": "cti", "type": "webhook", "env_key": "VIGIL_TEST_HOOK_F",
                "channels": [ { "id": "@c", "parser": { "trim_front": -2 } } ]
            } ] }"#,
        );
        let table = load_route_table(&path).unwrap();
        assert_eq!(table.channel_routes[0].1.rule.parser, ParserSpec::None);
    }

    #[test]
    fn non_numeric_parser_values_degrade_to_none() {
        std::env::set_var("VIGIL_TEST_HOOK_G", "https://discord.test/hook");
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{ "destinations": [ {
                "name": "cti", "type": "webhook", "env_key": "VIGIL_TEST_HOOK_G",
                "channels": [ { "id": "@c", "parser": { "keep_first": "three" } } ]
            } ] }"#,
        );
        let table = load_route_table(&path).unwrap();
        assert_eq!(table.channel_routes[0].1.rule.parser, ParserSpec::None);
    }

    #[test]
    fn unknown_destination_type_is_fatal() {
        std::env::set_var("VIGIL_TEST_HOOK_H", "https://discord.test/hook");
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{ "destinations": [ {
                "name": "cti", "type": "carrier-pigeon", "env_key": "VIGIL_TEST_HOOK_H",
                "channels": [ { "id": "@c" } ]
            } ] }"#,
        );
        assert!(matches!(load_route_table(&path), Err(CoreError::Config(_))));
    }
}

//! Per-envelope destination selection.

use std::sync::Arc;

use tracing::debug;

use crate::config::{Destination, Route, RouteTable, Rule};
use crate::envelope::{MessageEnvelope, SourceKind};

/// A destination selected for one envelope, with the keywords that matched
/// (empty for a match-all rule).
#[derive(Debug, Clone)]
pub struct Matched {
    pub destination: Arc<Destination>,
    pub rule: Rule,
    pub matched_keywords: Vec<String>,
}

/// Channel + keyword matching over the immutable route table.
#[derive(Debug, Clone)]
pub struct Router {
    table: Arc<RouteTable>,
}

impl Router {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }

    /// Select the destinations for `envelope`.
    ///
    /// `attachment_text` is the pre-extracted text of a safe attachment, if
    /// the orchestrator produced one; it only participates in the search
    /// text for rules with `check_attachments` enabled. Duplicate selections
    /// of one destination are suppressed (first matching rule wins).
    pub fn destinations(
        &self,
        envelope: &MessageEnvelope,
        attachment_text: Option<&str>,
    ) -> Vec<Matched> {
        let mut selected: Vec<Matched> = Vec::new();

        for (key, route) in self.routes_for(envelope.source_kind) {
            if !channel_matches(&envelope.channel_id, key) {
                continue;
            }
            if selected
                .iter()
                .any(|m| Arc::ptr_eq(&m.destination, &route.destination))
            {
                continue;
            }

            let Some(matched_keywords) =
                keyword_match(&route.rule, envelope, attachment_text)
            else {
                continue;
            };

            selected.push(Matched {
                destination: Arc::clone(&route.destination),
                rule: route.rule.clone(),
                matched_keywords,
            });
        }

        if selected.is_empty() {
            debug!(
                channel = %envelope.channel_name,
                id = %envelope.channel_id,
                "no destinations for envelope"
            );
        }
        selected
    }

    /// Whether any rule for this channel wants OCR.
    pub fn needs_ocr(&self, channel_id: &str) -> bool {
        self.channel_rules(channel_id).any(|rule| rule.ocr)
    }

    /// Whether any rule for this channel scans attachments for keywords.
    pub fn needs_attachment_scan(&self, channel_id: &str) -> bool {
        self.channel_rules(channel_id)
            .any(|rule| rule.check_attachments && !rule.keywords.is_empty())
    }

    /// Whether any destination restricts this channel's media.
    pub fn is_restricted(&self, channel_id: &str) -> bool {
        self.channel_rules(channel_id).any(|rule| rule.restricted)
    }

    fn routes_for(&self, kind: SourceKind) -> impl Iterator<Item = &(String, Route)> {
        match kind {
            SourceKind::Chat => self.table.channel_routes.iter(),
            SourceKind::Feed => self.table.feed_routes.iter(),
        }
    }

    fn channel_rules<'a>(&'a self, channel_id: &'a str) -> impl Iterator<Item = &'a Rule> {
        self.table
            .channel_routes
            .iter()
            .filter(move |(key, _)| channel_matches(channel_id, key))
            .map(|(_, route)| &route.rule)
    }
}

/// Channel match per the routing contract: exact string equality, or both
/// sides parse as integers and compare equal after stripping an optional
/// leading `-100` supergroup prefix from either side. (Feed envelopes carry
/// the feed URL as `channel_id`, so exact equality covers them.)
pub fn channel_matches(channel_id: &str, rule_key: &str) -> bool {
    if channel_id == rule_key {
        return true;
    }
    match (numeric_id(channel_id), numeric_id(rule_key)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn numeric_id(s: &str) -> Option<i64> {
    let stripped = s
        .strip_prefix("-100")
        .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(s);
    stripped.parse().ok()
}

/// `None` when the rule rejects the envelope; otherwise the matched keyword
/// list (empty for match-all).
fn keyword_match(
    rule: &Rule,
    envelope: &MessageEnvelope,
    attachment_text: Option<&str>,
) -> Option<Vec<String>> {
    if rule.keywords.is_empty() {
        return Some(Vec::new());
    }

    let mut search = envelope.text.to_lowercase();
    if rule.ocr {
        if let Some(ocr) = &envelope.ocr_text {
            search.push('\n');
            search.push_str(&ocr.to_lowercase());
        }
    }
    if rule.check_attachments {
        if let Some(attachment) = attachment_text {
            search.push('\n');
            search.push_str(&attachment.to_lowercase());
        }
    }

    let matched: Vec<String> = rule
        .keywords
        .iter()
        .filter(|kw| search.contains(&kw.to_lowercase()))
        .cloned()
        .collect();
    if matched.is_empty() {
        None
    } else {
        Some(matched)
    }
}

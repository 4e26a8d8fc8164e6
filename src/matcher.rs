//! Matching detected ads and free text against the client list.

use crate::models::DetectedAd;
use regex::RegexBuilder;
use serde::Serialize;

/// Keep ads whose advertiser contains a client name, or is contained in one, ignoring case.
///
/// An empty client list keeps every ad.
pub fn filter_client_ads(ads: Vec<DetectedAd>, clients: &[String]) -> Vec<DetectedAd> {
    if clients.is_empty() {
        return ads;
    }
    let clients: Vec<String> = clients.iter().map(|c| c.to_lowercase()).collect();
    ads.into_iter()
        .filter(|ad| {
            let advertiser = ad.advertiser.to_lowercase();
            clients
                .iter()
                .any(|client| advertiser.contains(client.as_str()) || client.contains(&advertiser))
        })
        .collect()
}

/// One occurrence of a client name in a body of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientMatch {
    pub client: String,
    /// The text as it appears, in its original case.
    pub matched_text: String,
    /// Up to `context_chars` characters either side, newlines flattened.
    pub context: String,
}

/// Find every case-insensitive occurrence of each client name in `text`.
pub fn find_matches(text: &str, clients: &[String], context_chars: usize) -> Vec<ClientMatch> {
    let mut matches = Vec::new();

    for client in clients.iter().filter(|c| !c.is_empty()) {
        let Ok(pattern) = RegexBuilder::new(&regex::escape(client))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };

        for m in pattern.find_iter(text) {
            let start = floor_char_boundary(text, m.start().saturating_sub(context_chars));
            let end = ceil_char_boundary(text, (m.end() + context_chars).min(text.len()));
            matches.push(ClientMatch {
                client: client.clone(),
                matched_text: m.as_str().to_string(),
                context: text[start..end].replace('\n', " ").trim().to_string(),
            });
        }
    }
    matches
}

fn floor_char_boundary(text: &str, mut i: usize) -> usize {
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(text: &str, mut i: usize) -> usize {
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

use std::collections::BTreeMap;

use serde::Serialize;
use url::Url;

use crate::markup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Attack,
    Skill,
    QueueJoin,
    ArenaEnter,
    Cancel,
    FightAgain,
    LeaveParty,
}

/// Which arena queue the driver joins. Each mode has its own join link and
/// its own button label, which is what a disabled button is recognised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaMode {
    Duel,
    Group,
}

impl ArenaMode {
    pub fn join_signature(self) -> &'static str {
        match self {
            ArenaMode::Duel => markup::JOIN_DUEL_SIG,
            ArenaMode::Group => markup::JOIN_GROUP_SIG,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ArenaMode::Duel => "Дуэли",
            ArenaMode::Group => "Групповые бои",
        }
    }
}

impl std::str::FromStr for ArenaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duel" | "1x1" => Ok(ArenaMode::Duel),
            "group" | "3x3" => Ok(ArenaMode::Group),
            other => Err(format!("unknown arena mode {other:?}")),
        }
    }
}

/// A concrete, invocable action found on one page fetch. Links embed one-shot
/// tokens, so an affordance must not outlive the page it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Affordance {
    pub kind: ActionKind,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u8>,
}

/// Undo HTML-entity and JS-string escaping of a URL taken from markup.
pub fn unescape_url(raw: &str) -> String {
    raw.trim()
        .replace("&amp;", "&")
        .replace("&#38;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("\\/", "/")
}

/// Turn a matched URL into an absolute, directly fetchable one.
/// Returns `None` when the value cannot be made into a URL at all.
pub fn normalize(base: &Url, raw: &str) -> Option<String> {
    let cleaned = unescape_url(raw);
    if cleaned.is_empty() || cleaned.starts_with("javascript:") || cleaned == "#" {
        return None;
    }
    // Wicket-style "./arena?..." and "?1-1.ILinkListener..." are relative to the page.
    base.join(&cleaned).ok().map(String::from)
}

/// Resolves action affordances on pages of one site.
#[derive(Debug, Clone)]
pub struct Resolver {
    base: Url,
}

impl Resolver {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve relative to the page URL rather than the site origin.
    pub fn for_page(&self, page_url: &str) -> Self {
        match Url::parse(page_url) {
            Ok(url) if url.origin() == self.base.origin() => Self { base: url },
            _ => self.clone(),
        }
    }

    fn find(&self, markup: &str, kind: ActionKind, signature: &str) -> Option<Affordance> {
        let raw = markup::find_action_url(markup, signature)?;
        let url = normalize(&self.base, raw)?;
        Some(Affordance { kind, url, position: None })
    }

    pub fn queue_join(&self, markup: &str, mode: ArenaMode) -> Option<Affordance> {
        self.find(markup, ActionKind::QueueJoin, mode.join_signature())
    }

    pub fn arena_enter(&self, markup: &str) -> Option<Affordance> {
        self.find(markup, ActionKind::ArenaEnter, markup::ENTER_ARENA_SIG)
    }

    pub fn cancel(&self, markup: &str) -> Option<Affordance> {
        self.find(markup, ActionKind::Cancel, markup::CANCEL_QUEUE_SIG)
    }

    pub fn fight_again(&self, markup: &str) -> Option<Affordance> {
        self.find(markup, ActionKind::FightAgain, markup::FIGHT_AGAIN_SIG)
    }

    pub fn attack(&self, markup: &str) -> Option<Affordance> {
        self.find(markup, ActionKind::Attack, markup::ATTACK_SIG)
    }

    pub fn leave_party(&self, markup: &str) -> Option<Affordance> {
        self.find(markup, ActionKind::LeaveParty, markup::LEAVE_PARTY_SIG)
    }

    /// Skill affordances by slot. The first link seen for a slot wins.
    pub fn skills(&self, markup: &str) -> BTreeMap<u8, Affordance> {
        let mut out = BTreeMap::new();
        for (slot, raw) in markup::skill_urls(markup) {
            if out.contains_key(&slot) {
                continue;
            }
            if let Some(url) = normalize(&self.base, raw) {
                out.insert(slot, Affordance { kind: ActionKind::Skill, url, position: Some(slot) });
            }
        }
        out
    }

    /// Claim URL for one loot item, built from the prefix announced in the same poll.
    pub fn loot_claim(&self, prefix: &str, item: u64) -> Option<String> {
        normalize(&self.base, &format!("{}{item}", unescape_url(prefix)))
    }
}

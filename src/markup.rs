//! Pattern readers over server-rendered markup.
//!
//! Every function here is pure and total: malformed or empty input yields the
//! documented absence value (`None`, `0`, an empty `Vec`), never a panic. The
//! site is not a stable API, so a missing match is an ordinary outcome.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::stats::FightResult;

/// Link signatures carried in the query of action URLs.
pub const JOIN_DUEL_SIG: &str = "-joinDuelLink";
pub const JOIN_GROUP_SIG: &str = "-joinGroupLink";
pub const ENTER_ARENA_SIG: &str = "-enterArenaLink";
pub const CANCEL_QUEUE_SIG: &str = "-cancelQueueLink";
pub const FIGHT_AGAIN_SIG: &str = "-fightAgainLink";
pub const ATTACK_SIG: &str = "-attackLink";
pub const LEAVE_PARTY_SIG: &str = "-leavePartyLink";

const RESULT_MARKERS: &[&str] = &["battle-result", "Бой окончен"];
const COMBAT_MARKERS: &[&str] = &["combat-panel", ATTACK_SIG];
const QUEUE_MARKERS: &[&str] = &["queue-wait", "Поиск соперника", CANCEL_QUEUE_SIG];
const DEFEATED_ICON: &str = "icons/defeated.png";

static ATTEMPTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)за(?:\s|&nbsp;)+(\d+)(?:\s|&nbsp;)+бо(?:й|я|ёв|ев)").expect("attempts regex")
});
static ATTEMPTS_LOOSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)осталось(?:\s|&nbsp;|:)*(\d+)|(\d+)(?:\s|&nbsp;)+бо(?:й|я|ёв|ев)")
        .expect("loose attempts regex")
});
static PAGE_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"pageId["']?\s*[:=]\s*["']?(\d+)"#).expect("page id regex")
});
static ANCHOR_HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["']"#).expect("anchor regex")
});
static SCRIPT_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""u"\s*:\s*"([^"]+)""#).expect("script url regex"));
static SKILL_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-skills-(\d+)-skillLink").expect("skill link regex"));
static SLOT_ELEMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<(\w+)\b([^>]*\bdata-slot\s*=\s*["'](\d+)["'][^>]*)>"#)
        .expect("slot element regex")
});
static SLOT_TIMER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"data-cd\s*=\s*["'](\d+)["']"#).expect("slot timer regex"));
static SLOT_COOLING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"class\s*=\s*["'][^"']*\bcooldown\b"#).expect("slot cooling regex")
});
static LOOT_DROP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lootDrop\(\s*(\d+)\s*\)").expect("loot drop regex"));
static LOOT_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"lootUrl\s*=\s*["']([^"']+)["']"#).expect("loot url regex")
});
static POINTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)очки:?(?:\s|&nbsp;)*\+?(\d+)").expect("points regex"));
static RATING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)рейтинг:?(?:\s|&nbsp;)*([+-]?\d+)").expect("rating regex"));

/// Where a remaining-attempts count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountSource {
    /// The localized "за N боёв" phrase.
    Primary,
    /// The looser pattern, which may pick up unrelated numbers.
    Fallback,
    /// Nothing matched; the count is the sentinel 0.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Attempts {
    pub count: u32,
    pub source: CountSource,
}

/// Remaining arena attempts. Falls back to the loose pattern only when the
/// primary phrase is absent, and to `0` when neither matches.
pub fn remaining_attempts(markup: &str) -> Attempts {
    if let Some(count) = ATTEMPTS_RE
        .captures(markup)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Attempts { count, source: CountSource::Primary };
    }

    let loose = ATTEMPTS_LOOSE_RE
        .captures(markup)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .and_then(|m| m.as_str().parse().ok());

    match loose {
        Some(count) => Attempts { count, source: CountSource::Fallback },
        None => Attempts { count: 0, source: CountSource::Missing },
    }
}

/// Numeric page identifier from inline script, used to address AJAX endpoints.
pub fn page_id(markup: &str) -> Option<u64> {
    PAGE_ID_RE
        .captures(markup)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Every candidate action URL on the page, still in escaped form: anchor
/// hrefs first, then URLs embedded in AJAX attribute scripts.
pub fn action_urls(markup: &str) -> Vec<&str> {
    ANCHOR_HREF_RE
        .captures_iter(markup)
        .chain(SCRIPT_URL_RE.captures_iter(markup))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// First action URL whose query carries `signature`.
pub fn find_action_url<'a>(markup: &'a str, signature: &str) -> Option<&'a str> {
    action_urls(markup).into_iter().find(|url| url.contains(signature))
}

/// Skill links keyed by slot, in document order. Slot 0 is not a valid slot and is skipped.
pub fn skill_urls(markup: &str) -> Vec<(u8, &str)> {
    action_urls(markup)
        .into_iter()
        .filter_map(|url| {
            let slot: u8 = SKILL_LINK_RE.captures(url)?.get(1)?.as_str().parse().ok()?;
            (slot > 0).then_some((slot, url))
        })
        .collect()
}

/// A skill slot element (`data-slot="N"`) as rendered on the combat page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillMarker {
    pub slot: u8,
    /// Rendered as a clickable anchor.
    pub anchor: bool,
    /// Carries the `cooldown` class.
    pub cooling: bool,
    /// Seconds left on the cooldown, if the markup renders a timer.
    pub timer_secs: Option<u32>,
}

pub fn skill_markers(markup: &str) -> Vec<SkillMarker> {
    SLOT_ELEMENT_RE
        .captures_iter(markup)
        .filter_map(|c| {
            let slot: u8 = c[3].parse().ok()?;
            let attrs = &c[2];
            let timer_secs = SLOT_TIMER_RE
                .captures(attrs)
                .and_then(|t| t[1].parse().ok());
            Some(SkillMarker {
                slot,
                anchor: c[1].eq_ignore_ascii_case("a"),
                cooling: SLOT_COOLING_RE.is_match(attrs),
                timer_secs,
            })
        })
        .collect()
}

fn contains_any(markup: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| markup.contains(m))
}

pub fn has_result_evidence(markup: &str) -> bool {
    contains_any(markup, RESULT_MARKERS)
}

pub fn has_combat_evidence(markup: &str) -> bool {
    contains_any(markup, COMBAT_MARKERS)
}

pub fn has_queue_evidence(markup: &str) -> bool {
    contains_any(markup, QUEUE_MARKERS)
}

pub fn opponent_defeated(markup: &str) -> bool {
    markup.contains(DEFEATED_ICON)
}

/// True when the control labelled `label` is rendered as non-anchor markup and
/// no anchor carries `signature`: the action exists but is on cooldown.
pub fn is_buttons_disabled(markup: &str, label: &str, signature: &str) -> bool {
    if find_action_url(markup, signature).is_some() {
        return false;
    }
    let pattern = format!(
        r"(?is)<(?:span|div|button|p|td)\b[^>]*>\s*(?:<(?:[^a/>][^>]*)?>\s*)*{}",
        regex::escape(label)
    );
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(markup),
        Err(e) => {
            tracing::warn!("disabled-button pattern for {label:?} failed to compile: {e}");
            false
        }
    }
}

/// Loot item identifiers announced by drop events, deduplicated, in order of appearance.
pub fn loot_drops(markup: &str) -> Vec<u64> {
    let mut ids: Vec<u64> = Vec::new();
    for id in LOOT_DROP_RE
        .captures_iter(markup)
        .filter_map(|c| c[1].parse().ok())
    {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Claim-URL prefix announced alongside drop events; the item id is appended to it.
pub fn loot_claim_prefix(markup: &str) -> Option<&str> {
    LOOT_URL_RE
        .captures(markup)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Parse a result page. `None` when the page carries no result evidence.
pub fn fight_result(markup: &str) -> Option<FightResult> {
    if !has_result_evidence(markup) {
        return None;
    }
    let won = markup.contains("Победа") || markup.contains(r#"class="result win""#);
    let points = POINTS_RE
        .captures(markup)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let rating_change = RATING_RE
        .captures(markup)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    Some(FightResult { won, points, rating_change })
}

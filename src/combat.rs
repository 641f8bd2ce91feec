use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tokio::time::{Duration, Instant, sleep};

use crate::affordance::{ActionKind, Affordance, Resolver};
use crate::diagnostics::DiagnosticSink;
use crate::markup;
use crate::retry::{Abort, ensure_ok};
use crate::session::{HttpSession, Page, RequestKind};
use crate::stats::FightResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombatConfig {
    /// Hard cap on ticks per fight.
    pub max_attacks: u32,
    /// Collect loot every N ticks; 0 disables loot collection.
    pub loot_every: u32,
    /// Delay between ticks.
    pub pacing: Duration,
    /// Result polls after the opponent-defeated icon shows up.
    pub result_polls: u32,
    pub result_poll_interval: Duration,
    /// Refresher endpoint path; `{page}` is replaced with the page identifier.
    pub refresher_path: String,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            max_attacks: 300,
            loot_every: 5,
            pacing: Duration::from_millis(1500),
            result_polls: 5,
            result_poll_interval: Duration::from_secs(1),
            refresher_path: "/arena/combat?{page}-1.IBehaviorListener.0-refresher".into(),
        }
    }
}

/// Static cooldown per skill slot, used only when the markup shows a slot as
/// cooling without saying for how long.
pub fn default_cooldown(slot: u8) -> Duration {
    match slot {
        1 => Duration::from_secs(15),
        2 => Duration::from_secs(30),
        3 => Duration::from_secs(45),
        4 => Duration::from_secs(60),
        _ => Duration::from_secs(90),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Ready,
    Cooling,
    /// Marked as cooling but without a timer.
    Unknown,
}

/// Per-slot readiness, rebuilt from markup on every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CooldownTable {
    slots: BTreeMap<u8, SlotState>,
}

impl CooldownTable {
    pub fn from_markup(markup: &str) -> Self {
        let mut slots = BTreeMap::new();
        for (slot, _) in markup::skill_urls(markup) {
            slots.insert(slot, SlotState::Ready);
        }
        for m in markup::skill_markers(markup) {
            let state = if !m.anchor || m.timer_secs.is_some_and(|t| t > 0) {
                SlotState::Cooling
            } else if m.cooling {
                SlotState::Unknown
            } else {
                SlotState::Ready
            };
            slots.insert(m.slot, state);
        }
        Self { slots }
    }

    pub fn state(&self, slot: u8) -> Option<SlotState> {
        self.slots.get(&slot).copied()
    }

    /// Readiness with the static fallback applied to `Unknown` slots only.
    pub fn is_ready(&self, slot: u8, clock: &SkillClock) -> bool {
        match self.state(slot) {
            Some(SlotState::Ready) => true,
            Some(SlotState::Cooling) | None => false,
            Some(SlotState::Unknown) => clock.fallback_ready(slot),
        }
    }
}

/// Local record of when each skill was last used in this fight.
#[derive(Debug, Default)]
pub struct SkillClock {
    last_used: HashMap<u8, Instant>,
}

impl SkillClock {
    pub fn record_use(&mut self, slot: u8) {
        self.last_used.insert(slot, Instant::now());
    }

    pub fn fallback_ready(&self, slot: u8) -> bool {
        self.last_used
            .get(&slot)
            .is_none_or(|used| used.elapsed() >= default_cooldown(slot))
    }
}

/// Loot already claimed in the current combat instance.
#[derive(Debug, Default)]
pub struct LootLedger {
    context: Option<u64>,
    claimed: HashSet<u64>,
}

impl LootLedger {
    /// Note the page identifier of the latest poll. A new identifier means a
    /// new combat context, which starts with an empty ledger.
    pub fn enter(&mut self, page_id: Option<u64>) {
        if page_id.is_some() && page_id != self.context {
            if !self.claimed.is_empty() {
                tracing::debug!("combat context {:?} -> {page_id:?}, clearing loot ledger", self.context);
            }
            self.claimed.clear();
            self.context = page_id;
        }
    }

    /// Returns true the first time `item` is seen in this context.
    pub fn claim(&mut self, item: u64) -> bool {
        self.claimed.insert(item)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Everything one combat poll tells us.
#[derive(Debug, Clone)]
pub struct CombatView {
    attack: Option<Affordance>,
    skills: BTreeMap<u8, Affordance>,
    cooldowns: CooldownTable,
    pub page_id: Option<u64>,
    pub defeated: bool,
    pub result: Option<FightResult>,
}

impl CombatView {
    pub fn parse(markup: &str, resolver: &Resolver) -> Self {
        Self {
            attack: resolver.attack(markup),
            skills: resolver.skills(markup),
            cooldowns: CooldownTable::from_markup(markup),
            page_id: markup::page_id(markup),
            defeated: markup::opponent_defeated(markup),
            result: markup::fight_result(markup),
        }
    }

    pub fn attack_affordance(&self) -> Option<&Affordance> {
        self.attack.as_ref()
    }

    pub fn skill_affordances(&self) -> &BTreeMap<u8, Affordance> {
        &self.skills
    }

    /// Markup-only view: anything not confirmed ready counts as cooling.
    pub fn is_skill_on_cooldown(&self, slot: u8) -> bool {
        self.cooldowns.state(slot) != Some(SlotState::Ready)
    }

    /// Lowest ready skill slot, else a plain attack. `None` without an attack link.
    pub fn choose_action(&self, clock: &SkillClock) -> Option<Affordance> {
        let attack = self.attack.as_ref()?;
        let skill = self
            .skills
            .iter()
            .find(|&(&slot, _)| self.cooldowns.is_ready(slot, clock))
            .map(|(_, a)| a);
        Some(skill.unwrap_or(attack).clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatEnd {
    /// Result evidence appeared on the combat page.
    Finished,
    /// The opponent-defeated icon appeared; the result was polled best-effort.
    OpponentDefeated,
    /// No attack link left on the page.
    NoAttack,
    /// The tick budget ran out without result evidence.
    BudgetExhausted,
}

#[derive(Debug, Clone)]
pub struct CombatOutcome {
    pub end: CombatEnd,
    pub ticks: u32,
    pub attacks: u32,
    pub skills_used: u32,
    pub loot_claimed: u32,
    pub result: Option<FightResult>,
    /// The last page seen, for follow-up links such as "fight again".
    pub last_page: Page,
}

/// Runs the decision loop for one combat instance. Loot ledger and skill
/// clock live exactly as long as this value.
pub struct Fighter<'a, S: HttpSession + ?Sized> {
    session: &'a S,
    resolver: &'a Resolver,
    config: &'a CombatConfig,
    sink: &'a dyn DiagnosticSink,
    ledger: LootLedger,
    clock: SkillClock,
}

impl<'a, S: HttpSession + ?Sized> Fighter<'a, S> {
    pub fn new(
        session: &'a S,
        resolver: &'a Resolver,
        config: &'a CombatConfig,
        sink: &'a dyn DiagnosticSink,
    ) -> Self {
        Self {
            session,
            resolver,
            config,
            sink,
            ledger: LootLedger::default(),
            clock: SkillClock::default(),
        }
    }

    /// Fight from `entry`, the first combat page, re-reading state from
    /// `combat_url` after every action. Returns once the fight is over or the
    /// tick budget is spent; a transport failure aborts.
    pub async fn fight(mut self, combat_url: &str, entry: Page) -> Result<CombatOutcome, Abort> {
        let resolver = self.resolver.for_page(combat_url);
        let mut page = entry;
        let mut outcome = CombatOutcome {
            end: CombatEnd::BudgetExhausted,
            ticks: 0,
            attacks: 0,
            skills_used: 0,
            loot_claimed: 0,
            result: None,
            last_page: page.clone(),
        };

        while outcome.ticks < self.config.max_attacks {
            let view = CombatView::parse(&page.body, &resolver);
            self.ledger.enter(view.page_id);

            if let Some(result) = view.result {
                tracing::info!("fight finished after {} ticks (won: {})", outcome.ticks, result.won);
                outcome.end = CombatEnd::Finished;
                outcome.result = Some(result);
                outcome.last_page = page;
                return Ok(outcome);
            }

            if view.defeated {
                tracing::info!("opponent defeated after {} ticks, polling result", outcome.ticks);
                let (result, last) = self
                    .poll_result(combat_url, self.config.result_polls, self.config.result_poll_interval, page)
                    .await;
                outcome.end = CombatEnd::OpponentDefeated;
                outcome.result = result;
                outcome.last_page = last;
                return Ok(outcome);
            }

            let Some(action) = view.choose_action(&self.clock) else {
                tracing::info!("no attack link after {} ticks, fight over", outcome.ticks);
                let (result, last) = self.poll_result(combat_url, 1, Duration::ZERO, page).await;
                outcome.end = CombatEnd::NoAttack;
                outcome.result = result;
                outcome.last_page = last;
                return Ok(outcome);
            };

            self.act(&action).await?;
            outcome.ticks += 1;
            match (action.kind, action.position) {
                (ActionKind::Skill, Some(slot)) => {
                    self.clock.record_use(slot);
                    outcome.skills_used += 1;
                }
                _ => outcome.attacks += 1,
            }

            if self.config.loot_every > 0 && outcome.ticks % self.config.loot_every == 0 {
                outcome.loot_claimed += self.collect_loot(view.page_id, &resolver).await;
            }

            sleep(self.config.pacing).await;
            page = ensure_ok(
                self.session.get(combat_url, RequestKind::Document).await?,
                combat_url,
            )?;
        }

        if let Some(result) = markup::fight_result(&page.body) {
            outcome.end = CombatEnd::Finished;
            outcome.result = Some(result);
        } else {
            tracing::warn!("attack budget of {} ticks exhausted without a result", self.config.max_attacks);
            self.sink.dump("combat-budget", &page.body);
        }
        outcome.last_page = page;
        Ok(outcome)
    }

    async fn act(&self, action: &Affordance) -> Result<(), Abort> {
        tracing::debug!("{:?} {:?} -> {}", action.kind, action.position, action.url);
        let page = self.session.get(&action.url, RequestKind::Document).await?;
        ensure_ok(page, &action.url)?;
        Ok(())
    }

    /// Best effort: up to `polls` fetches of the combat page looking for result
    /// evidence. Transport trouble here is logged, not propagated.
    async fn poll_result(
        &self,
        combat_url: &str,
        polls: u32,
        interval: Duration,
        mut last: Page,
    ) -> (Option<FightResult>, Page) {
        for attempt in 1..=polls {
            sleep(interval).await;
            match self.session.get(combat_url, RequestKind::Document).await {
                Ok(page) if page.is_ok() => {
                    if let Some(result) = markup::fight_result(&page.body) {
                        return (Some(result), page);
                    }
                    last = page;
                }
                Ok(page) => tracing::warn!("result poll {attempt}/{polls}: http {}", page.status),
                Err(e) => tracing::warn!("result poll {attempt}/{polls} failed: {e}"),
            }
        }
        tracing::warn!("no result evidence after {polls} poll(s)");
        self.sink.dump("result-page", &last.body);
        (None, last)
    }

    /// Poll the refresher and claim every drop not yet claimed in this
    /// combat instance. Returns the number of claims issued.
    async fn collect_loot(&mut self, page_id: Option<u64>, resolver: &Resolver) -> u32 {
        let Some(page_id) = page_id else {
            tracing::debug!("no page id on combat page, skipping loot");
            return 0;
        };
        let path = self.config.refresher_path.replace("{page}", &page_id.to_string());
        let Some(refresher_url) = crate::affordance::normalize(resolver.base(), &path) else {
            tracing::warn!("bad refresher path {path:?}");
            return 0;
        };

        let body = match self.session.get(&refresher_url, RequestKind::Ajax).await {
            Ok(page) if page.is_ok() => page.body,
            Ok(page) => {
                tracing::warn!("refresher returned http {}", page.status);
                return 0;
            }
            Err(e) => {
                tracing::warn!("refresher poll failed: {e}");
                return 0;
            }
        };

        let drops = markup::loot_drops(&body);
        if drops.is_empty() {
            return 0;
        }
        let Some(prefix) = markup::loot_claim_prefix(&body) else {
            tracing::warn!("{} loot drop(s) without a claim url", drops.len());
            self.sink.dump("refresher", &body);
            return 0;
        };

        let mut claimed = 0;
        for item in drops {
            // Marked before the request: a failed claim is not retried.
            if !self.ledger.claim(item) {
                continue;
            }
            let Some(url) = resolver.loot_claim(prefix, item) else {
                continue;
            };
            match self.session.get(&url, RequestKind::Ajax).await {
                Ok(page) if page.is_ok() => {
                    tracing::info!("claimed loot item {item}");
                    claimed += 1;
                }
                Ok(page) => tracing::warn!("loot claim {item} returned http {}", page.status),
                Err(e) => tracing::warn!("loot claim {item} failed: {e}"),
            }
        }
        claimed
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Duration, sleep};
use url::Url;

use crate::affordance::{self, ArenaMode, Resolver};
use crate::combat::{CombatConfig, CombatEnd, Fighter};
use crate::diagnostics::DiagnosticSink;
use crate::markup::{self, CountSource};
use crate::phase::{Phase, PhaseTracker};
use crate::retry::{Abort, Deadline, Decision, JoinFailure, RetryPolicy, ensure_ok};
use crate::session::{HttpSession, Page, RequestKind};
use crate::stats::{FightResult, SessionStats};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaConfig {
    pub arena_path: String,
    pub combat_path: String,
    pub mode: ArenaMode,
    /// Fights per run.
    pub fights: u32,
    /// Joining is refused when remaining attempts are at or below this.
    pub min_attempts: u32,
    pub opponent_timeout: Duration,
    pub queue_poll: Duration,
    /// Delay after pairing before the first combat poll.
    pub settle: Duration,
    pub retry: RetryPolicy,
    pub combat: CombatConfig,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            arena_path: "/arena".into(),
            combat_path: "/arena/combat".into(),
            mode: ArenaMode::Duel,
            fights: 10,
            min_attempts: 0,
            opponent_timeout: Duration::from_secs(300),
            queue_poll: Duration::from_secs(5),
            settle: Duration::from_secs(3),
            retry: RetryPolicy::default(),
            combat: CombatConfig::default(),
        }
    }
}

/// One completed fight, as logged and reported.
#[derive(Debug, Clone, Serialize)]
pub struct FightRecord {
    pub finished_at: DateTime<Utc>,
    pub fight: u32,
    #[serde(flatten)]
    pub result: FightResult,
    pub end: CombatEnd,
    pub ticks: u32,
    pub skills_used: u32,
    pub loot_claimed: u32,
}

/// Progress notifications for whoever owns the run.
#[derive(Debug, Clone)]
pub enum ArenaEvent {
    Phase(Phase),
    Fight(FightRecord),
}

/// Drives the queue → combat → result cycle for one profile, strictly
/// sequentially over one session.
pub struct Arena<'a, S: HttpSession + ?Sized> {
    session: &'a S,
    resolver: Resolver,
    config: &'a ArenaConfig,
    sink: &'a dyn DiagnosticSink,
    tracker: PhaseTracker,
    events: Option<UnboundedSender<ArenaEvent>>,
    arena_url: String,
    combat_url: String,
}

impl<'a, S: HttpSession + ?Sized> Arena<'a, S> {
    pub fn new(
        session: &'a S,
        base_url: Url,
        config: &'a ArenaConfig,
        sink: &'a dyn DiagnosticSink,
    ) -> Self {
        let arena_url = affordance::normalize(&base_url, &config.arena_path)
            .unwrap_or_else(|| base_url.to_string());
        let combat_url = affordance::normalize(&base_url, &config.combat_path)
            .unwrap_or_else(|| arena_url.clone());
        Self {
            session,
            resolver: Resolver::new(base_url),
            config,
            sink,
            tracker: PhaseTracker::new(),
            events: None,
            arena_url,
            combat_url,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<ArenaEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: ArenaEvent) {
        if let Some(tx) = &self.events {
            // The receiver going away only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    fn observe(&mut self, page: &Page) -> Phase {
        let before = self.tracker.current();
        let phase = self.tracker.observe(&page.body);
        if phase != before {
            self.emit(ArenaEvent::Phase(phase));
        }
        phase
    }

    async fn fetch(&self, url: &str) -> Result<Page, Abort> {
        let page = self.session.get(url, RequestKind::Document).await?;
        ensure_ok(page, url)
    }

    /// Run up to `config.fights` fights, recording each completed one into
    /// `stats`. On abort, whatever was recorded so far stays in `stats`.
    pub async fn run(&mut self, stats: &mut SessionStats) -> Result<(), Abort> {
        let mut requeued: Option<Page> = None;

        for fight in 1..=self.config.fights {
            tracing::info!("arena fight {fight}/{}", self.config.fights);
            self.tracker.reset();

            let combat_page = self.reach_combat(requeued.take()).await?;

            let outcome = Fighter::new(self.session, &self.resolver, &self.config.combat, self.sink)
                .fight(&self.combat_url, combat_page)
                .await?;
            self.observe(&outcome.last_page);

            match outcome.result {
                Some(result) => {
                    stats.record(&result);
                    tracing::info!(
                        "fight {fight}: won={} points={} rating={:+} ticks={} (total {}/{} won)",
                        result.won, result.points, result.rating_change, outcome.ticks, stats.wins, stats.fights
                    );
                    self.emit(ArenaEvent::Fight(FightRecord {
                        finished_at: Utc::now(),
                        fight,
                        result,
                        end: outcome.end,
                        ticks: outcome.ticks,
                        skills_used: outcome.skills_used,
                        loot_claimed: outcome.loot_claimed,
                    }));
                }
                None if outcome.end == CombatEnd::BudgetExhausted => {
                    return Err(Abort::BudgetExhausted(self.config.combat.max_attacks));
                }
                None => {
                    let polls = match outcome.end {
                        CombatEnd::NoAttack => 1,
                        _ => self.config.combat.result_polls,
                    };
                    tracing::warn!("fight {fight} ended ({:?}) without a readable result", outcome.end);
                    return Err(Abort::ResultTimeout { polls });
                }
            }

            if fight < self.config.fights {
                requeued = self.fight_again(&outcome.last_page).await;
            }
        }
        Ok(())
    }

    /// Queue (or continue from `requeued`) and wait until a combat page shows
    /// up. Falling out of the queue sends us back through the join path, up
    /// to the retry ceiling.
    async fn reach_combat(&mut self, mut requeued: Option<Page>) -> Result<Page, Abort> {
        let mut ejections = 0;
        loop {
            let queued = match requeued.take() {
                Some(page) => page,
                None => self.join_queue().await?,
            };
            match self.wait_for_opponent(queued).await {
                Err(Abort::EjectedFromQueue) => {
                    match self.config.retry.decide(JoinFailure::Ejected, ejections) {
                        Decision::RetryAfter(wait) => {
                            ejections += 1;
                            tracing::warn!(
                                "dropped from the queue, rejoining ({ejections}/{})",
                                self.config.retry.cooldown_retries
                            );
                            sleep(wait).await;
                        }
                        Decision::Abort(abort) => return Err(abort),
                    }
                }
                other => return other,
            }
        }
    }

    /// Fetch the arena page, leaving a party first if the server insists.
    async fn arena_page(&mut self) -> Result<Page, Abort> {
        let page = self.fetch(&self.arena_url).await?;
        let Some(leave) = self.resolver.for_page(&page.final_url).leave_party(&page.body) else {
            return Ok(page);
        };
        tracing::info!("party popup on arena page, leaving group");
        self.fetch(&leave.url).await?;
        self.fetch(&self.arena_url).await
    }

    /// Remaining attempts on the arena page; 0 when the counter is unreadable.
    fn read_attempts(&self, page: &Page) -> u32 {
        let attempts = markup::remaining_attempts(&page.body);
        match attempts.source {
            CountSource::Primary => {}
            CountSource::Fallback => {
                tracing::warn!("remaining attempts {} read by the loose pattern", attempts.count);
            }
            CountSource::Missing => {
                tracing::warn!("remaining attempts not found on arena page");
                self.sink.dump("arena-page", &page.body);
            }
        }
        attempts.count
    }

    /// Get into the queue. Returns the page to start waiting from, which may
    /// already be past the queue if the server put us there on its own.
    pub async fn join_queue(&mut self) -> Result<Page, Abort> {
        let mode = self.config.mode;
        let mut retries = 0;
        loop {
            let page = self.arena_page().await?;
            let phase = self.observe(&page);
            if matches!(phase, Phase::Queued | Phase::Paired | Phase::PreFight | Phase::InCombat) {
                tracing::info!("arena page already {phase}, resuming");
                return Ok(page);
            }

            let remaining = self.read_attempts(&page);
            let floor = self.config.min_attempts;
            let resolver = self.resolver.for_page(&page.final_url);

            let failure = if remaining == 0 {
                JoinFailure::AttemptsExhausted
            } else if remaining <= floor {
                return Err(Abort::InsufficientAttempts { remaining, floor });
            } else {
                match resolver.queue_join(&page.body, mode) {
                    Some(join) => {
                        tracing::info!("joining {mode:?} queue ({remaining} attempts left)");
                        let joined = self.session.get(&join.url, RequestKind::Document).await?;
                        if joined.is_ok() {
                            return Ok(joined);
                        }
                        JoinFailure::Http { status: joined.status, url: join.url }
                    }
                    None if markup::is_buttons_disabled(&page.body, mode.label(), mode.join_signature()) => {
                        JoinFailure::OnCooldown
                    }
                    None => {
                        self.sink.dump("arena-page", &page.body);
                        JoinFailure::NoAffordance
                    }
                }
            };

            match self.config.retry.decide(failure, retries) {
                Decision::RetryAfter(wait) => {
                    retries += 1;
                    tracing::info!(
                        "arena on cooldown, retry {retries}/{} in {wait:?}",
                        self.config.retry.cooldown_retries
                    );
                    sleep(wait).await;
                }
                Decision::Abort(abort) => return Err(abort),
            }
        }
    }

    /// Poll from the queue until a combat page shows up. Enters the arena when
    /// paired. Bounded by the opponent timeout. A result page only ends the
    /// wait once the arena was entered; before that it belongs to an earlier
    /// fight.
    pub async fn wait_for_opponent(&mut self, mut page: Page) -> Result<Page, Abort> {
        let deadline = Deadline::after(self.config.opponent_timeout);
        let mut entered = false;
        loop {
            let phase = self.observe(&page);
            match phase {
                Phase::InCombat => return Ok(page),
                Phase::Result if entered => return Ok(page),
                _ if deadline.expired() => {
                    self.cancel_queue(&page).await;
                    return Err(Abort::OpponentTimeout(deadline.budget()));
                }
                Phase::Paired => {
                    let resolver = self.resolver.for_page(&page.final_url);
                    let Some(enter) = resolver.arena_enter(&page.body) else {
                        self.sink.dump("paired-page", &page.body);
                        return Err(Abort::NoAffordance { what: "arena entry link", context: "queue page" });
                    };
                    tracing::info!("opponent found, entering arena");
                    self.fetch(&enter.url).await?;
                    entered = true;
                    sleep(self.config.settle).await;
                    page = self.fetch(&self.combat_url).await?;
                }
                Phase::PreFight => {
                    entered = true;
                    sleep(self.config.settle).await;
                    page = self.fetch(&self.combat_url).await?;
                }
                Phase::Result => {
                    tracing::debug!("stale result page while queued, polling on");
                    sleep(self.config.queue_poll.min(deadline.remaining())).await;
                    page = self.fetch(&self.arena_url).await?;
                }
                Phase::Queued => {
                    sleep(self.config.queue_poll.min(deadline.remaining())).await;
                    page = self.fetch(&self.arena_url).await?;
                }
                Phase::Idle => {
                    self.sink.dump("queue-page", &page.body);
                    return Err(Abort::EjectedFromQueue);
                }
            }
        }
    }

    async fn cancel_queue(&self, page: &Page) {
        let Some(cancel) = self.resolver.for_page(&page.final_url).cancel(&page.body) else {
            return;
        };
        match self.session.get(&cancel.url, RequestKind::Document).await {
            Ok(p) if p.is_ok() => tracing::info!("left the queue after opponent timeout"),
            Ok(p) => tracing::warn!("queue cancel returned http {}", p.status),
            Err(e) => tracing::warn!("queue cancel failed: {e}"),
        }
    }

    /// Follow the result page's "again" link straight back into the queue.
    /// Only taken when the result page shows attempts above the floor.
    /// `None` sends the next fight through the regular join path.
    async fn fight_again(&self, result_page: &Page) -> Option<Page> {
        let again = self
            .resolver
            .for_page(&result_page.final_url)
            .fight_again(&result_page.body)?;

        let attempts = markup::remaining_attempts(&result_page.body);
        if attempts.source == CountSource::Missing || attempts.count <= self.config.min_attempts {
            return None;
        }

        match self.session.get(&again.url, RequestKind::Document).await {
            Ok(page)
                if page.is_ok()
                    && matches!(
                        Phase::detect(&page.body),
                        Phase::Queued | Phase::Paired | Phase::PreFight | Phase::InCombat
                    ) =>
            {
                tracing::info!("requeued via fight-again link");
                Some(page)
            }
            Ok(page) => {
                tracing::debug!("fight-again gave http {} / non-queue page, joining normally", page.status);
                None
            }
            Err(e) => {
                tracing::warn!("fight-again link failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemorySink, ScriptedSession};

    const JOINABLE: &str = r#"<div class="arena">Доступно за 44 боя
        <a class="btn" href="?1-1.ILinkListener-arena-joinDuelLink">Дуэли</a></div>"#;
    const LOW_ATTEMPTS: &str = r#"<div class="arena">Доступно за 1 бой
        <a class="btn" href="?1-1.ILinkListener-arena-joinDuelLink">Дуэли</a></div>"#;
    const DISABLED: &str = r#"<div class="arena">Доступно за 44 боя
        <div class="btn disabled"><span>Дуэли</span></div></div>"#;
    const NO_BUTTON: &str = r#"<div class="arena">Доступно за 44 боя</div>"#;
    const PARTY: &str = r#"<div class="popup">Вы состоите в группе
        <a href="?2-1.ILinkListener-popup-leavePartyLink">Покинуть группу</a></div>"#;
    const QUEUED: &str = r#"<div class="queue-wait">Поиск соперника...
        <a href="?3-1.ILinkListener-cancelQueueLink">Отмена</a></div>"#;
    const PAIRED: &str = r#"<div>Соперник найден <a href="?4-1.ILinkListener-enterArenaLink">В бой</a></div>"#;
    const ATTACK: &str = r#"<div class="combat-panel"><script>var pageId = 7;</script>
        <a href="?7-1.ILinkListener-attackLink">Атака</a></div>"#;
    const DEFEATED: &str = r#"<div class="combat-panel"><img src="/img/icons/defeated.png">
        <a href="?7-1.ILinkListener-attackLink">Атака</a></div>"#;
    const PREFIGHT: &str = r#"<div class="prefight-timer">До начала боя: 3</div>"#;
    const RESULT: &str = r#"<div class="battle-result"><p class="result win">Победа!</p>
        Очки: +15 Рейтинг: +4 Доступно за 43 боя
        <a href="/arena?8-1.ILinkListener-fightAgainLink">Ещё</a></div>"#;
    const RESULT_NO_COUNTER: &str = r#"<div class="battle-result"><p class="result win">Победа!</p>
        Очки: +15 Рейтинг: +4 <a href="/arena?8-1.ILinkListener-fightAgainLink">Ещё</a></div>"#;
    const AT_FLOOR: &str = r#"<div class="arena">Доступно за 40 боёв
        <a class="btn" href="?1-1.ILinkListener-arena-joinDuelLink">Дуэли</a></div>"#;

    fn config(fights: u32) -> ArenaConfig {
        ArenaConfig {
            fights,
            min_attempts: 0,
            opponent_timeout: Duration::from_secs(60),
            queue_poll: Duration::ZERO,
            settle: Duration::ZERO,
            retry: RetryPolicy { cooldown_retries: 2, cooldown_wait: Duration::ZERO },
            combat: CombatConfig {
                loot_every: 0,
                pacing: Duration::ZERO,
                result_poll_interval: Duration::ZERO,
                ..CombatConfig::default()
            },
            ..ArenaConfig::default()
        }
    }

    fn base() -> Url {
        Url::parse("https://game.example/").unwrap()
    }

    async fn run(session: &ScriptedSession, config: &ArenaConfig, sink: &MemorySink) -> (SessionStats, Result<(), Abort>) {
        let mut stats = SessionStats::default();
        let result = Arena::new(session, base(), config, sink).run(&mut stats).await;
        (stats, result)
    }

    #[tokio::test]
    async fn test_two_fights_with_fight_again() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[QUEUED])
            .route("-fightAgainLink", &[QUEUED])
            .route("-enterArenaLink", &["ok"])
            .route("-attackLink", &["ok"])
            .route("/arena/combat", &[ATTACK, RESULT, ATTACK, RESULT])
            .route("example/arena", &[JOINABLE, PAIRED]);
        let sink = MemorySink::default();
        let config = config(2);

        let (stats, result) = run(&session, &config, &sink).await;

        assert_eq!(result, Ok(()));
        assert_eq!(stats, SessionStats { fights: 2, wins: 2, points: 30, rating_change: 8 });
        assert_eq!(session.count("-joinDuelLink"), 1);
        assert_eq!(session.count("-fightAgainLink"), 1);
        assert_eq!(session.count("-enterArenaLink"), 2);
        assert_eq!(session.count("-attackLink"), 2);
    }

    #[tokio::test]
    async fn test_join_refused_below_floor() {
        let session = ScriptedSession::new().route("example/arena", &[LOW_ATTEMPTS]);
        let sink = MemorySink::default();
        let config = ArenaConfig { min_attempts: 5, ..config(1) };

        let (stats, result) = run(&session, &config, &sink).await;

        let abort = result.unwrap_err();
        assert_eq!(abort, Abort::InsufficientAttempts { remaining: 1, floor: 5 });
        assert!(abort.to_string().contains("insufficient attempts"));
        assert_eq!(session.count("-joinDuelLink"), 0);
        assert_eq!(stats, SessionStats::default());
    }

    #[tokio::test]
    async fn test_missing_counter_is_exhausted_and_dumped() {
        let session = ScriptedSession::new()
            .route("example/arena", &[r#"<a href="?1-1.ILinkListener-joinDuelLink">Дуэли</a>"#]);
        let sink = MemorySink::default();
        let (_, result) = run(&session, &config(1), &sink).await;
        assert_eq!(result, Err(Abort::AttemptsExhausted));
        assert_eq!(sink.contexts(), vec!["arena-page".to_string()]);
        assert_eq!(session.count("-joinDuelLink"), 0);
    }

    #[tokio::test]
    async fn test_disabled_button_waits_out_cooldown() {
        let session = ScriptedSession::new().route("example/arena", &[DISABLED]);
        let sink = MemorySink::default();

        let (_, result) = run(&session, &config(1), &sink).await;

        assert_eq!(result, Err(Abort::CooldownCeiling { retries: 2 }));
        // One initial look plus two retries, and no "not found" snapshot.
        assert_eq!(session.count("example/arena"), 3);
        assert!(sink.contexts().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_clears_then_joins() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[QUEUED])
            .route("example/arena", &[DISABLED, JOINABLE, QUEUED]);
        let sink = MemorySink::default();
        let config = ArenaConfig { opponent_timeout: Duration::ZERO, ..config(1) };

        let (_, result) = run(&session, &config, &sink).await;

        // Joined after one cooldown retry, then nobody showed up.
        assert_eq!(session.count("-joinDuelLink"), 1);
        assert_eq!(result, Err(Abort::OpponentTimeout(Duration::ZERO)));
        assert_eq!(session.count("-cancelQueueLink"), 1);
    }

    #[tokio::test]
    async fn test_missing_button_aborts_with_snapshot() {
        let session = ScriptedSession::new().route("example/arena", &[NO_BUTTON]);
        let sink = MemorySink::default();
        let (_, result) = run(&session, &config(1), &sink).await;
        assert!(matches!(result, Err(Abort::NoAffordance { .. })));
        assert_eq!(sink.contexts(), vec!["arena-page".to_string()]);
        assert_eq!(session.count("example/arena"), 1);
    }

    #[tokio::test]
    async fn test_party_popup_left_before_join() {
        let session = ScriptedSession::new()
            .route("-leavePartyLink", &["ok"])
            .route("example/arena", &[PARTY, LOW_ATTEMPTS]);
        let sink = MemorySink::default();
        let config = ArenaConfig { min_attempts: 5, ..config(1) };

        let (_, result) = run(&session, &config, &sink).await;

        assert_eq!(session.count("-leavePartyLink"), 1);
        assert!(matches!(result, Err(Abort::InsufficientAttempts { .. })));
    }

    #[tokio::test]
    async fn test_http_failure_surfaces_status() {
        let session = ScriptedSession::new().route_status("example/arena", 503, "");
        let sink = MemorySink::default();
        let (_, result) = run(&session, &config(1), &sink).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "http 503 from https://game.example/arena"
        );
    }

    #[tokio::test]
    async fn test_resumes_fight_in_progress() {
        let session = ScriptedSession::new()
            .route("-attackLink", &["ok"])
            .route("example/arena", &[ATTACK, RESULT]);
        let sink = MemorySink::default();

        let (stats, result) = run(&session, &config(1), &sink).await;

        assert_eq!(result, Ok(()));
        assert_eq!(stats.wins, 1);
        assert_eq!(session.count("-joinDuelLink"), 0);
    }

    #[tokio::test]
    async fn test_ejected_from_queue_rejoins() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[QUEUED])
            .route("-enterArenaLink", &["ok"])
            .route("-attackLink", &["ok"])
            .route("/arena/combat", &[ATTACK, RESULT])
            .route("example/arena", &[JOINABLE, NO_BUTTON, JOINABLE, PAIRED]);
        let sink = MemorySink::default();

        let (stats, result) = run(&session, &config(1), &sink).await;

        assert_eq!(result, Ok(()));
        assert_eq!(stats.fights, 1);
        assert_eq!(session.count("-joinDuelLink"), 2);
        assert_eq!(sink.contexts(), vec!["queue-page".to_string()]);
    }

    #[tokio::test]
    async fn test_repeated_ejection_hits_retry_ceiling() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[QUEUED])
            .route("example/arena", &[JOINABLE]);
        let sink = MemorySink::default();

        let (_, result) = run(&session, &config(1), &sink).await;

        assert_eq!(result, Err(Abort::EjectedFromQueue));
        // The first join plus two rejoins.
        assert_eq!(session.count("-joinDuelLink"), 3);
        assert_eq!(sink.contexts(), vec!["queue-page".to_string(); 3]);
    }

    #[tokio::test]
    async fn test_result_page_from_fight_again_is_not_recounted() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[QUEUED])
            .route("-fightAgainLink", &[RESULT])
            .route("-enterArenaLink", &["ok"])
            .route("-attackLink", &["ok"])
            .route("/arena/combat", &[ATTACK, RESULT, ATTACK, RESULT, ATTACK, RESULT])
            .route("example/arena", &[JOINABLE, PAIRED, JOINABLE, PAIRED, JOINABLE, PAIRED]);
        let sink = MemorySink::default();

        let (stats, result) = run(&session, &config(3), &sink).await;

        assert_eq!(result, Ok(()));
        assert_eq!(stats, SessionStats { fights: 3, wins: 3, points: 45, rating_change: 12 });
        // Every counted fight was actually fought.
        assert_eq!(session.count("-attackLink"), 3);
        assert_eq!(session.count("-fightAgainLink"), 2);
        assert_eq!(session.count("-joinDuelLink"), 3);
    }

    #[tokio::test]
    async fn test_stale_result_while_queued_is_not_a_fight() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[QUEUED])
            .route("-enterArenaLink", &["ok"])
            .route("-attackLink", &["ok"])
            .route("/arena/combat", &[ATTACK, RESULT])
            .route("example/arena", &[JOINABLE, RESULT, PAIRED]);
        let sink = MemorySink::default();

        let (stats, result) = run(&session, &config(1), &sink).await;

        assert_eq!(result, Ok(()));
        assert_eq!(stats.fights, 1);
        assert_eq!(session.count("-enterArenaLink"), 1);
        assert_eq!(session.count("-attackLink"), 1);
    }

    #[tokio::test]
    async fn test_missing_result_aborts_with_partial_stats() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[QUEUED])
            .route("-enterArenaLink", &["ok"])
            .route("-attackLink", &["ok"])
            .route("/arena/combat", &[ATTACK, DEFEATED])
            .route("example/arena", &[JOINABLE, PAIRED]);
        let sink = MemorySink::default();

        let (stats, result) = run(&session, &config(2), &sink).await;

        let polls = CombatConfig::default().result_polls;
        assert_eq!(result, Err(Abort::ResultTimeout { polls }));
        assert_eq!(stats, SessionStats::default());
        assert_eq!(session.count("-joinDuelLink"), 1);
        assert_eq!(sink.contexts(), vec!["result-page".to_string()]);
    }

    #[tokio::test]
    async fn test_result_without_counter_rejoins_through_floor_check() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[QUEUED])
            .route("-fightAgainLink", &[QUEUED])
            .route("-enterArenaLink", &["ok"])
            .route("-attackLink", &["ok"])
            .route("/arena/combat", &[ATTACK, RESULT_NO_COUNTER])
            .route("example/arena", &[JOINABLE, PAIRED, AT_FLOOR]);
        let sink = MemorySink::default();
        let config = ArenaConfig { min_attempts: 40, ..config(2) };

        let (stats, result) = run(&session, &config, &sink).await;

        assert_eq!(result, Err(Abort::InsufficientAttempts { remaining: 40, floor: 40 }));
        assert_eq!(stats.fights, 1);
        assert_eq!(session.count("-fightAgainLink"), 0);
        assert_eq!(session.count("-joinDuelLink"), 1);
    }

    #[tokio::test]
    async fn test_prefight_settles_then_reads_combat() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[PREFIGHT])
            .route("-attackLink", &["ok"])
            .route("/arena/combat", &[ATTACK, RESULT])
            .route("example/arena", &[JOINABLE]);
        let sink = MemorySink::default();
        let settle = Duration::from_millis(30);
        let config = ArenaConfig { settle, ..config(1) };

        let started = std::time::Instant::now();
        let (stats, result) = run(&session, &config, &sink).await;

        assert_eq!(result, Ok(()));
        assert!(started.elapsed() >= settle);
        assert_eq!(stats.fights, 1);
        assert_eq!(session.count("-enterArenaLink"), 0);
        assert_eq!(session.count("-attackLink"), 1);
    }

    #[tokio::test]
    async fn test_paired_entry_settles_before_combat() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[PAIRED])
            .route("-enterArenaLink", &["ok"])
            .route("-attackLink", &["ok"])
            .route("/arena/combat", &[ATTACK, RESULT])
            .route("example/arena", &[JOINABLE]);
        let sink = MemorySink::default();
        let settle = Duration::from_millis(30);
        let config = ArenaConfig { settle, ..config(1) };

        let started = std::time::Instant::now();
        let (stats, result) = run(&session, &config, &sink).await;

        assert_eq!(result, Ok(()));
        assert!(started.elapsed() >= settle);
        assert_eq!(stats.fights, 1);
        assert_eq!(session.count("-enterArenaLink"), 1);
    }

    #[tokio::test]
    async fn test_events_reported() {
        let session = ScriptedSession::new()
            .route("-joinDuelLink", &[QUEUED])
            .route("-enterArenaLink", &["ok"])
            .route("-attackLink", &["ok"])
            .route("/arena/combat", &[ATTACK, RESULT])
            .route("example/arena", &[JOINABLE, PAIRED]);
        let sink = MemorySink::default();
        let config = config(1);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut stats = SessionStats::default();

        Arena::new(&session, base(), &config, &sink)
            .with_events(tx)
            .run(&mut stats)
            .await
            .unwrap();

        let mut phases = Vec::new();
        let mut fights = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                ArenaEvent::Phase(p) => phases.push(p),
                ArenaEvent::Fight(f) => fights.push(f),
            }
        }
        assert_eq!(phases, vec![Phase::Queued, Phase::Paired, Phase::InCombat, Phase::Result]);
        assert_eq!(fights.len(), 1);
        assert_eq!(fights[0].ticks, 1);
        assert!(fights[0].result.won);
    }
}

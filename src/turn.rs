//! End-to-end chat turn.
//!
//! One [`TurnEngine::handle`] call runs, in order: signal extraction, persona
//! load, the message nudge and observed-trait blend, safety handling (a `Halt` answers with the canned
//! direction and skips generation), reply generation with self-reference
//! constraints, the concurrent reflection and meta-reflection branches,
//! reflection-based evolution, persistence, and compaction when the session has
//! grown past the threshold.
//!
//! The last self-reference reading is kept per session so a continuation like
//! "じゃあ、もっと聞かせて" resolves against the previous turn even when the
//! caller does not pass it back.
//!
//! Turns for the same user are serialized by a per-user async lock, dropped
//! again once idle. Every
//! collaborator failure degrades to a fixed fallback; the caller always gets a
//! reply.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

use crate::config::SigmarisConfig;
use crate::evolution::{self, Jitter};
use crate::llm::{LanguageModel, LlmError};
use crate::persona::compaction::{self, FlushOptions, FlushReport};
use crate::persona::store::{self, SharedConnection};
use crate::persona::types::{MetaReport, PersonaRecord, Role, TraitVector};
use crate::reflection;
use crate::signals::safety::{self, SafetyAction, SafetyIntent};
use crate::signals::self_ref::{apply_self_constraints, SelfReferentInfo};
use crate::signals::{self, SignalReport};

/// Sent when reply generation fails.
pub const FALLBACK_REPLY: &str =
    "ごめんなさい、いまうまく言葉にできませんでした。もう少しだけ、お話を聞かせてもらえますか？";

/// Substituted when the reflection branch fails or returns nothing.
pub const FALLBACK_REFLECTION: &str =
    "今回の対話では、相手の言葉を落ち着いて受け止めることを意識した。";

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub session_id: String,
    pub message: String,
    /// The previous turn's self-referent result in this session.
    pub previous_self_ref: Option<SelfReferentInfo>,
}

impl TurnRequest {
    pub fn new(user_id: &str, session_id: &str, message: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            message: message.to_string(),
            previous_self_ref: None,
        }
    }

    pub fn with_previous(mut self, previous: SelfReferentInfo) -> Self {
        self.previous_self_ref = Some(previous);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub signals: SignalReport,
    pub traits: TraitVector,
    /// Distance between the traits before and after this turn.
    pub drift: f64,
    /// The safety layer answered with its canned direction.
    pub halted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush: Option<FlushReport>,
}

pub struct TurnEngine {
    db: Arc<Mutex<Connection>>,
    llm: Arc<dyn LanguageModel>,
    config: Arc<SigmarisConfig>,
    jitter: Mutex<Jitter>,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnEngine {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        llm: Arc<dyn LanguageModel>,
        config: Arc<SigmarisConfig>,
    ) -> Self {
        let jitter = Jitter::from_config(&config.evolution);
        Self {
            db,
            llm,
            config,
            jitter: Mutex::new(jitter),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the drift source, e.g. with a seeded one.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Mutex::new(jitter);
        self
    }

    pub async fn handle(&self, request: TurnRequest) -> Result<TurnOutcome> {
        let user_id = request.user_id.clone();
        let user_lock = self.user_lock(&user_id)?;
        let outcome = {
            let _turn = user_lock.lock().await;
            self.run_turn(request).await
        };
        self.release_user_lock(&user_id, user_lock);
        outcome
    }

    async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome> {
        let TurnRequest {
            user_id,
            session_id,
            message,
            previous_self_ref,
        } = request;

        let previous_self_ref = match previous_self_ref {
            Some(previous) => Some(previous),
            None => self.load_session_self_ref(&user_id, &session_id).await,
        };
        let signals = signals::extract(&message, previous_self_ref.as_ref());
        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            intent = %signals.intent.intent,
            safety = %signals.safety.intent,
            referent = ?signals.self_ref.referent,
            "turn started"
        );
        self.save_session_self_ref(&user_id, &session_id, &signals.self_ref)
            .await;

        let mut persona = self.load_persona(&user_id).await;
        let before = persona.traits;
        let nudged = evolution::blend_observed(
            &evolution::nudge_from_message(&before, &message),
            &signals.emotion,
            self.config.evolution.observed_weight,
            self.config.evolution.max_observed_step,
        );

        self.record_message(&user_id, &session_id, Role::User, &message).await;
        if signals.safety.intent.is_flagged() {
            self.record_safety(&user_id, signals.safety.intent, &message).await;
        }

        let halted = signals.safety.action == SafetyAction::Halt;
        let reply = if halted {
            signals
                .safety
                .note
                .clone()
                .unwrap_or_else(|| FALLBACK_REPLY.to_string())
        } else {
            let direction = match signals.safety.action {
                SafetyAction::RewriteSoft => safety::response_direction(signals.safety.intent),
                _ => None,
            };
            let system = reply_system_prompt(&nudged, &persona.meta_summary, direction);
            match self.generate(system, message.clone()).await {
                Ok(text) => apply_self_constraints(&text, &signals.self_ref),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "reply generation failed");
                    FALLBACK_REPLY.to_string()
                }
            }
        };
        self.record_message(&user_id, &session_id, Role::Ai, &reply).await;

        persona.turn_count += 1;
        let (traits, reflection_text, meta) = if halted {
            (nudged, None, None)
        } else {
            let meta_due = self.meta_due(persona.turn_count);
            let (reflection_text, meta) = self
                .run_reflection_branches(&message, &reply, &nudged, &persona, meta_due)
                .await;
            let traits = self.evolve_and_log(&user_id, &nudged, &reflection_text).await;
            (traits, Some(reflection_text), meta)
        };

        persona.traits = traits;
        if let Some(text) = &reflection_text {
            persona.reflection = text.clone();
        }
        if let Some(report) = &meta {
            persona.meta_summary = report.summary.clone();
            persona.growth = report.growth_adjustment;
        }
        self.save_persona(persona).await;

        let flush = self.maybe_flush(&user_id, &session_id).await;
        let drift = before.distance_to(&traits);
        tracing::info!(user_id = %user_id, halted, drift, "turn finished");

        Ok(TurnOutcome {
            reply,
            signals,
            traits,
            drift,
            halted,
            reflection: reflection_text,
            meta,
            flush,
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn user_lock(&self, user_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .user_locks
            .lock()
            .map_err(|e| anyhow::anyhow!("user lock table poisoned: {e}"))?;
        Ok(Arc::clone(locks.entry(user_id.to_string()).or_default()))
    }

    /// Drop the user's lock entry once no other turn holds or awaits it.
    fn release_user_lock(&self, user_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let Ok(mut locks) = self.user_locks.lock() else {
            return;
        };
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
    }

    fn meta_due(&self, turn_count: u64) -> bool {
        let every = self.config.reflection.meta_every_turns as u64;
        every > 0 && turn_count % every == 0
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| anyhow::anyhow!("db task failed: {e}"))?
    }

    async fn generate(&self, system: String, user: String) -> Result<String, LlmError> {
        let llm = Arc::clone(&self.llm);
        tokio::task::spawn_blocking(move || llm.generate(&system, &user))
            .await
            .unwrap_or_else(|e| Err(LlmError::Unavailable(format!("generation task failed: {e}"))))
    }

    async fn load_persona(&self, user_id: &str) -> PersonaRecord {
        let uid = user_id.to_string();
        match self
            .with_db(move |conn| store::load_or_default_persona(conn, &uid))
            .await
        {
            Ok(persona) => persona,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "persona load failed, starting from neutral");
                PersonaRecord::new(user_id)
            }
        }
    }

    async fn save_persona(&self, persona: PersonaRecord) {
        let user_id = persona.user_id.clone();
        if let Err(e) = self
            .with_db(move |conn| store::save_persona(conn, &persona))
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "persona not saved");
        }
    }

    async fn load_session_self_ref(&self, user_id: &str, session_id: &str) -> Option<SelfReferentInfo> {
        let (uid, sid) = (user_id.to_string(), session_id.to_string());
        self.with_db(move |conn| store::load_session_self_ref(conn, &uid, &sid))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(user_id, session_id, error = %e, "session context unavailable");
                None
            })
    }

    async fn save_session_self_ref(&self, user_id: &str, session_id: &str, info: &SelfReferentInfo) {
        let (uid, sid, info) = (user_id.to_string(), session_id.to_string(), info.clone());
        let result = self
            .with_db(move |conn| store::save_session_self_ref(conn, &uid, &sid, &info))
            .await;
        if let Err(e) = result {
            tracing::warn!(user_id, session_id, error = %e, "session context not written");
        }
    }

    async fn record_message(&self, user_id: &str, session_id: &str, role: Role, content: &str) {
        let (uid, sid, text) = (user_id.to_string(), session_id.to_string(), content.to_string());
        let result = self
            .with_db(move |conn| store::insert_message(conn, &uid, &sid, role, &text).map(|_| ()))
            .await;
        if let Err(e) = result {
            tracing::warn!(user_id, session_id, role = %role, error = %e, "message not persisted");
        }
    }

    async fn record_safety(&self, user_id: &str, intent: SafetyIntent, message: &str) {
        let (uid, text) = (user_id.to_string(), message.to_string());
        let result = self
            .with_db(move |conn| store::write_safety_log(conn, &uid, intent, &text))
            .await;
        if let Err(e) = result {
            tracing::warn!(user_id, level = %intent, error = %e, "safety audit not written");
        }
    }

    /// Reflection and (when due) meta-reflection, run concurrently. A failed
    /// branch is replaced by its fixed fallback.
    async fn run_reflection_branches(
        &self,
        message: &str,
        reply: &str,
        traits: &TraitVector,
        persona: &PersonaRecord,
        meta_due: bool,
    ) -> (String, Option<MetaReport>) {
        let reflect_task = {
            let llm = Arc::clone(&self.llm);
            let (message, reply, traits) = (message.to_string(), reply.to_string(), *traits);
            tokio::task::spawn_blocking(move || reflection::reflect(llm.as_ref(), &message, &reply, &traits))
        };

        let meta_task = meta_due.then(|| {
            let llm = Arc::clone(&self.llm);
            let source = if persona.reflection.trim().is_empty() {
                message.to_string()
            } else {
                persona.reflection.clone()
            };
            let prior = Some(persona.meta_summary.clone()).filter(|s| !s.trim().is_empty());
            let traits = *traits;
            tokio::task::spawn_blocking(move || {
                reflection::analyze(llm.as_ref(), &source, &traits, prior.as_deref())
            })
        });

        let (reflected, meta) = tokio::join!(reflect_task, async move {
            match meta_task {
                Some(task) => Some(task.await),
                None => None,
            }
        });

        let reflection_text = match reflected {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "reflection failed, using fallback");
                FALLBACK_REFLECTION.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "reflection task failed, using fallback");
                FALLBACK_REFLECTION.to_string()
            }
        };

        let meta = meta.map(|joined| {
            joined.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "meta task failed");
                reflection::error_report()
            })
        });

        (reflection_text, meta)
    }

    /// Evolve from the reflection and append the growth-log entry.
    async fn evolve_and_log(&self, user_id: &str, traits: &TraitVector, reflection_text: &str) -> TraitVector {
        let retention = self.config.storage.growth_log_retention;
        let uid = user_id.to_string();
        let growth_log = self
            .with_db(move |conn| store::load_growth_log(conn, &uid, retention))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(user_id, error = %e, "growth log unavailable, evolving without history");
                Vec::new()
            });

        let evolved = {
            let mut jitter = self.jitter.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            evolution::evolve(traits, reflection_text, &growth_log, &mut jitter, retention)
        };

        if let Some(entry) = evolved.latest().cloned() {
            let uid = user_id.to_string();
            let result = self
                .with_db(move |conn| store::append_growth_log(conn, &uid, &entry, retention))
                .await;
            if let Err(e) = result {
                tracing::warn!(user_id, error = %e, "growth log entry not written");
            }
        }
        evolved.traits
    }

    async fn maybe_flush(&self, user_id: &str, session_id: &str) -> Option<FlushReport> {
        let opts = FlushOptions::from(&self.config.compaction);
        let (uid, sid) = (user_id.to_string(), session_id.to_string());
        let count = self
            .with_db(move |conn| store::count_session_messages(conn, &uid, &sid))
            .await;
        match count {
            Ok(n) if n > opts.threshold => {}
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(user_id, session_id, error = %e, "message count failed, skipping compaction");
                return None;
            }
        }

        let mut shared = SharedConnection(Arc::clone(&self.db));
        let llm = Arc::clone(&self.llm);
        let (uid, sid) = (user_id.to_string(), session_id.to_string());
        let joined = tokio::task::spawn_blocking(move || {
            compaction::flush(&mut shared, llm.as_ref(), &uid, &sid, &opts)
        })
        .await;
        match joined {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(user_id, session_id, error = %e, "compaction task failed");
                None
            }
        }
    }
}

fn reply_system_prompt(traits: &TraitVector, meta_summary: &str, direction: Option<&str>) -> String {
    let mut prompt = format!(
        "あなたはAIコンパニオン「シグマリス」です。一人称は「私」。\
         現在の性格パラメータ: 落ち着き {:.2} / 共感 {:.2} / 好奇心 {:.2}。\
         この値に沿った口調で、短く自然に返答してください。",
        traits.calm, traits.empathy, traits.curiosity
    );
    if !meta_summary.trim().is_empty() {
        prompt.push_str(&format!("\n最近の自己分析: {meta_summary}"));
    }
    if let Some(direction) = direction {
        prompt.push_str(&format!("\n応答方針: {direction}"));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_includes_direction_only_when_given() {
        let traits = TraitVector::neutral();
        let plain = reply_system_prompt(&traits, "", None);
        assert!(!plain.contains("応答方針"));
        assert!(!plain.contains("最近の自己分析"));

        let steered = reply_system_prompt(&traits, "安定", Some("ゆっくり聞く"));
        assert!(steered.contains("応答方針: ゆっくり聞く"));
        assert!(steered.contains("最近の自己分析: 安定"));
    }

    #[tokio::test]
    async fn idle_user_locks_are_dropped() {
        let db = Arc::new(Mutex::new(crate::db::open_memory_database().unwrap()));
        let engine = TurnEngine::new(
            db,
            Arc::new(crate::llm::OfflineModel),
            Arc::new(SigmarisConfig::default()),
        );

        for user in ["u1", "u2", "u3"] {
            engine.handle(TurnRequest::new(user, "s1", "こんにちは")).await.unwrap();
        }
        assert!(engine.user_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn held_lock_survives_release() {
        let db = Arc::new(Mutex::new(crate::db::open_memory_database().unwrap()));
        let engine = TurnEngine::new(
            db,
            Arc::new(crate::llm::OfflineModel),
            Arc::new(SigmarisConfig::default()),
        );

        let first = engine.user_lock("u1").unwrap();
        let waiting = engine.user_lock("u1").unwrap();
        engine.release_user_lock("u1", first);
        assert!(engine.user_locks.lock().unwrap().contains_key("u1"));
        engine.release_user_lock("u1", waiting);
        assert!(engine.user_locks.lock().unwrap().is_empty());
    }
}

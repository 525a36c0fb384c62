//! Spoken attendance feedback.
//!
//! [`AttendanceTracker`] is the per-person state machine deciding *what* to
//! say. [`Announcer`] wraps it with a playback thread that says it, one line
//! at a time, with a global pause between lines.

use crate::speaker::Speaker;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonState {
    /// Seen for the first time this session.
    New,
    /// Recognized, waiting for the ledger to confirm.
    Marking,
    Marked,
    /// Already greeted; only the reminder is ever said, once.
    Ignored,
}

impl PersonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonState::New => "NEW",
            PersonState::Marking => "MARKING",
            PersonState::Marked => "MARKED",
            PersonState::Ignored => "IGNORED",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Pause between two playbacks.
    pub global_cooldown: Duration,
    /// After an announcement, the person triggers nothing for this long.
    pub per_person_lock: Duration,
    /// Unseen for longer than this counts as leaving and coming back.
    pub reappear_after: Duration,
    /// People unseen for this long are forgotten by [`AttendanceTracker::prune_inactive`].
    pub idle_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            global_cooldown: Duration::from_secs(2),
            per_person_lock: Duration::from_secs(5),
            reappear_after: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

struct PersonRecord {
    name: String,
    state: PersonState,
    last_seen: Instant,
    audio_lock_until: Option<Instant>,
    reminder_said: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_active: bool,
    pub people: usize,
    pub states: BTreeMap<String, &'static str>,
}

pub struct AttendanceTracker {
    timings: Timings,
    session_active: bool,
    people: HashMap<String, PersonRecord>,
}

impl AttendanceTracker {
    pub fn new(timings: Timings) -> Self {
        Self {
            timings,
            session_active: false,
            people: HashMap::new(),
        }
    }

    pub fn start_session(&mut self) {
        self.session_active = true;
        self.people.clear();
    }

    pub fn end_session(&mut self) {
        self.session_active = false;
        self.people.clear();
    }

    /// Feed one recognition of `id`. Returns the line to say, if any.
    pub fn observe(&mut self, id: &str, name: &str, attendance_marked: bool, now: Instant) -> Option<String> {
        if !self.session_active {
            return None;
        }

        let timings = self.timings;
        let person = self.people.entry(id.to_string()).or_insert_with(|| PersonRecord {
            name: name.to_string(),
            state: PersonState::New,
            last_seen: now,
            audio_lock_until: None,
            reminder_said: false,
        });

        let reappeared = now.saturating_duration_since(person.last_seen) > timings.reappear_after;
        person.last_seen = now;

        if person.audio_lock_until.is_some_and(|until| now < until) {
            return None;
        }

        let next = match person.state {
            PersonState::New => PersonState::Marking,
            PersonState::Marking if attendance_marked => PersonState::Marked,
            PersonState::Marked if reappeared => PersonState::Ignored,
            state => state,
        };
        if next == person.state {
            return None;
        }
        let previous = std::mem::replace(&mut person.state, next);
        tracing::debug!(student_id = id, from = previous.as_str(), to = next.as_str(), "announcer transition");

        let text = match next {
            PersonState::Marking => "Marking attendance".to_string(),
            PersonState::Marked => format!("Greetings {}", person.name),
            PersonState::Ignored => {
                if person.reminder_said {
                    return None;
                }
                person.reminder_said = true;
                format!("{}, your attendance is already marked. Only once per session.", person.name)
            }
            PersonState::New => return None,
        };
        person.audio_lock_until = Some(now + timings.per_person_lock);
        Some(text)
    }

    /// Forget people not seen for the idle timeout. Returns how many were removed.
    pub fn prune_inactive(&mut self, now: Instant) -> usize {
        if !self.session_active {
            return 0;
        }
        let timeout = self.timings.idle_timeout;
        let before = self.people.len();
        self.people
            .retain(|_, p| now.saturating_duration_since(p.last_seen) <= timeout);
        before - self.people.len()
    }

    #[cfg(test)]
    fn state_of(&self, id: &str) -> Option<PersonState> {
        self.people.get(id).map(|p| p.state)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_active: self.session_active,
            people: self.people.len(),
            states: self
                .people
                .iter()
                .map(|(id, p)| (id.clone(), p.state.as_str()))
                .collect(),
        }
    }
}

struct Utterance {
    text: String,
    session: u64,
}

/// State machine plus a playback thread.
///
/// Lines queued in one session are dropped if a new session starts (or the
/// current one ends) before they are played.
pub struct Announcer {
    tracker: AttendanceTracker,
    tx: Option<mpsc::UnboundedSender<Utterance>>,
    session: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl Announcer {
    /// Spawn the playback thread.
    pub fn spawn(speaker: Box<dyn Speaker>, timings: Timings) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Utterance>();
        let session = Arc::new(AtomicU64::new(0));
        let current = Arc::clone(&session);
        let cooldown = timings.global_cooldown;

        let worker = std::thread::Builder::new()
            .name("rollcall-audio".into())
            .spawn(move || {
                let mut last_played: Option<Instant> = None;
                while let Some(utterance) = rx.blocking_recv() {
                    if let Some(last) = last_played {
                        let ready = last + cooldown;
                        let now = Instant::now();
                        if ready > now {
                            std::thread::sleep(ready - now);
                        }
                    }
                    if utterance.session != current.load(Ordering::SeqCst) {
                        tracing::debug!(text = %utterance.text, "dropping announcement from a finished session");
                        continue;
                    }
                    if let Err(e) = speaker.speak(&utterance.text) {
                        tracing::warn!(error = %e, "announcement failed");
                    }
                    last_played = Some(Instant::now());
                }
                tracing::debug!("audio thread exiting");
            })?;

        Ok(Self {
            tracker: AttendanceTracker::new(timings),
            tx: Some(tx),
            session,
            worker: Some(worker),
        })
    }

    pub fn start_session(&mut self) {
        self.session.fetch_add(1, Ordering::SeqCst);
        self.tracker.start_session();
        tracing::info!("announcer session started");
    }

    pub fn end_session(&mut self) {
        self.session.fetch_add(1, Ordering::SeqCst);
        self.tracker.end_session();
        tracing::info!("announcer session ended");
    }

    pub fn observe(&mut self, id: &str, name: &str, attendance_marked: bool, now: Instant) {
        let Some(text) = self.tracker.observe(id, name, attendance_marked, now) else {
            return;
        };
        let utterance = Utterance {
            text,
            session: self.session.load(Ordering::SeqCst),
        };
        if let Some(tx) = &self.tx {
            if tx.send(utterance).is_err() {
                tracing::warn!("audio thread is gone; announcement skipped");
            }
        }
    }

    pub fn prune_inactive(&mut self, now: Instant) -> usize {
        let removed = self.tracker.prune_inactive(now);
        if removed > 0 {
            tracing::info!(removed, "pruned inactive people");
        }
        removed
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tracker.snapshot()
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

use super::schedule::{next_local_midnight, resolve_next_send_instant};
use super::types::{Sequence, HOURLY_WINDOW_MINUTES};

/// Admission decision for one candidate send. Deferral is a scheduling
/// outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    DeferUntil(DateTime<Utc>),
}

#[derive(Debug, Default)]
struct SequenceCounters {
    local_day: Option<NaiveDate>,
    sent_today: u32,
    recent: VecDeque<DateTime<Utc>>,
}

/// Per-sequence send volume caps: a local-calendar-day counter and a trailing
/// 60-minute log. Check and increment happen under one lock so two executions
/// racing for the last slot cannot both be admitted.
#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: Mutex<HashMap<Uuid, SequenceCounters>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild counters from the persisted send log after a restart.
    pub(crate) fn preload(
        &self,
        sequence_id: Uuid,
        local_day: NaiveDate,
        sent_today: u32,
        recent: Vec<DateTime<Utc>>,
    ) {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let entry = counters.entry(sequence_id).or_default();
        entry.local_day = Some(local_day);
        entry.sent_today = sent_today;
        entry.recent = recent.into();
    }

    /// Admits the candidate and counts it against both caps, or defers it to
    /// the earliest instant a slot can free up.
    pub fn try_admit(&self, sequence: &Sequence, now: DateTime<Utc>) -> Admission {
        if sequence.daily_limit.is_none() && sequence.hourly_limit.is_none() {
            return Admission::Admitted;
        }
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let entry = counters.entry(sequence.id).or_default();

        let local_day = now.with_timezone(&sequence.timezone).date_naive();
        if entry.local_day != Some(local_day) {
            entry.local_day = Some(local_day);
            entry.sent_today = 0;
        }
        let cutoff = now - Duration::minutes(HOURLY_WINDOW_MINUTES);
        while entry.recent.front().is_some_and(|sent| *sent <= cutoff) {
            entry.recent.pop_front();
        }

        if let Some(limit) = sequence.daily_limit {
            if entry.sent_today >= limit {
                let midnight = next_local_midnight(now, sequence.timezone);
                return Admission::DeferUntil(resolve_next_send_instant(
                    midnight,
                    sequence.timezone,
                    sequence.send_window.as_ref(),
                    sequence.send_on_weekends,
                ));
            }
        }
        if let Some(limit) = sequence.hourly_limit {
            if entry.recent.len() as u32 >= limit {
                let oldest = entry.recent.front().copied().unwrap_or(now);
                return Admission::DeferUntil(oldest + Duration::minutes(HOURLY_WINDOW_MINUTES));
            }
        }

        entry.sent_today += 1;
        entry.recent.push_back(now);
        Admission::Admitted
    }
}

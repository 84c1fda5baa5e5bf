use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Days, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use super::types::{SendWindow, Sequence, SequenceStep, StepDelay, StepKind};

const MAX_WINDOW_SCAN_DAYS: u32 = 7;

/// Returns the first instant on/after `candidate` whose local time-of-day
/// falls inside the send window on an allowed weekday.
///
/// Identity when the candidate already qualifies. Without a window any
/// time-of-day qualifies, but weekend exclusion still applies and rolls the
/// candidate to the next allowed local midnight.
pub fn resolve_next_send_instant(
    candidate: DateTime<Utc>,
    tz: Tz,
    window: Option<&SendWindow>,
    allow_weekends: bool,
) -> DateTime<Utc> {
    let mut local = candidate.with_timezone(&tz).naive_local();
    for _ in 0..=MAX_WINDOW_SCAN_DAYS {
        if !allow_weekends && is_weekend(local.weekday()) {
            local = start_of_next_day(local, window);
            continue;
        }
        let Some(window) = window else {
            return local_to_utc(tz, local);
        };
        let time = local.time();
        if time < window.start {
            local = local.date().and_time(window.start);
        } else if time > window.end {
            local = start_of_next_day(local, Some(window));
            continue;
        }
        return local_to_utc(tz, local);
    }
    // A week-long scan always finds an allowed weekday.
    local_to_utc(tz, local)
}

/// The step with the smallest order strictly greater than `current_order`, or
/// nothing when the sequence is exhausted.
pub fn next_step(steps: &[SequenceStep], current_order: u32) -> Option<&SequenceStep> {
    steps
        .iter()
        .filter(|step| step.order > current_order)
        .min_by_key(|step| step.order)
}

/// Due instant for an email step: the delay applied to the previous step's
/// completion, then resolved against the sequence's send window.
pub fn compute_due_at(
    prev_completion: DateTime<Utc>,
    step: &SequenceStep,
    sequence: &Sequence,
) -> DateTime<Utc> {
    let candidate = add_delay(prev_completion, &step.delay, sequence.timezone);
    resolve_next_send_instant(
        candidate,
        sequence.timezone,
        sequence.send_window.as_ref(),
        sequence.send_on_weekends,
    )
}

/// Due instant for any step kind. Wait and conditional steps are no-send
/// transitions and bypass the window resolver.
pub(crate) fn due_for_step(
    prev_completion: DateTime<Utc>,
    step: &SequenceStep,
    sequence: &Sequence,
) -> DateTime<Utc> {
    match &step.kind {
        StepKind::Email { .. } => compute_due_at(prev_completion, step, sequence),
        StepKind::WaitForReply { grace_hours } => {
            add_delay(prev_completion, &step.delay, sequence.timezone)
                + Duration::hours(*grace_hours as i64)
        }
        StepKind::Conditional => add_delay(prev_completion, &step.delay, sequence.timezone),
    }
}

/// Delay days are calendar days in the sequence's zone so a one-day delay
/// lands at the same wall-clock time across a DST change; hours and minutes
/// are fixed durations.
pub(crate) fn add_delay(from: DateTime<Utc>, delay: &StepDelay, tz: Tz) -> DateTime<Utc> {
    let mut instant = from;
    if delay.days > 0 {
        let local = from.with_timezone(&tz).naive_local();
        let shifted = local
            .checked_add_days(Days::new(delay.days as u64))
            .unwrap_or(local);
        instant = local_to_utc(tz, shifted);
    }
    instant + Duration::hours(delay.hours as i64) + Duration::minutes(delay.minutes as i64)
}

pub(crate) fn next_local_midnight(after: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let day = after.with_timezone(&tz).date_naive();
    let next = day.checked_add_days(Days::new(1)).unwrap_or(day);
    local_to_utc(tz, next.and_time(NaiveTime::MIN))
}

pub(crate) fn local_day_start(at: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let day = at.with_timezone(&tz).date_naive();
    local_to_utc(tz, day.and_time(NaiveTime::MIN))
}

fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

fn start_of_next_day(local: NaiveDateTime, window: Option<&SendWindow>) -> NaiveDateTime {
    let next = local
        .date()
        .checked_add_days(Days::new(1))
        .unwrap_or_else(|| local.date());
    let time = window.map(|window| window.start).unwrap_or(NaiveTime::MIN);
    next.and_time(time)
}

fn local_to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) => instant.with_timezone(&Utc),
        // Fall-back repeat: take the earlier instant.
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Spring-forward gap: the wall-clock time does not exist, skip ahead.
        LocalResult::None => match tz.from_local_datetime(&(local + Duration::hours(1))) {
            LocalResult::Single(instant) => instant.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => Utc.from_utc_datetime(&local),
        },
    }
}

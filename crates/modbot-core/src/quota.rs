//! Daily reply quotas.
//!
//! Two counters share one lock: replies sent today (global) and replies sent
//! to each sender today. Both reset lazily on the first access of a new
//! calendar day. Slots are reserved atomically at check time and either
//! committed (a reply was delivered) or released on drop, so concurrent
//! evaluations can never overshoot a cap.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::info;

use crate::domain::MemberId;

/// Source of the current calendar day.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the host's local timezone.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// How admin-flagged senders relate to the global counter.
///
/// Admins are never checked against or counted in the per-sender counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminGlobalPolicy {
    /// Admins bypass the global cap and do not consume it.
    Exempt,
    /// Admin replies are checked against and counted in the global cap.
    Counted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPolicy {
    /// `None` disables the global cap.
    pub global_daily_cap: Option<u32>,
    /// `None` disables the per-sender cap.
    pub per_sender_daily_cap: Option<u32>,
    pub admins: AdminGlobalPolicy,
}

impl QuotaPolicy {
    pub const DEFAULT_GLOBAL_CAP: u32 = 50;
    pub const DEFAULT_PER_SENDER_CAP: u32 = 3;

    /// Filtered, quota-layered policy: global + per-sender caps, admins exempt from both.
    pub fn community() -> Self {
        Self {
            global_daily_cap: Some(Self::DEFAULT_GLOBAL_CAP),
            per_sender_daily_cap: Some(Self::DEFAULT_PER_SENDER_CAP),
            admins: AdminGlobalPolicy::Exempt,
        }
    }

    /// Global cap only; admins count toward it.
    pub fn global_only() -> Self {
        Self {
            global_daily_cap: Some(Self::DEFAULT_GLOBAL_CAP),
            per_sender_daily_cap: None,
            admins: AdminGlobalPolicy::Counted,
        }
    }

    fn counts_global(&self, is_admin: bool) -> bool {
        !is_admin || self.admins == AdminGlobalPolicy::Counted
    }

    fn counts_sender(&self, is_admin: bool) -> bool {
        !is_admin && self.per_sender_daily_cap.is_some()
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::community()
    }
}

/// Why a sender was denied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuotaDenial {
    GlobalLimit { limit: u32 },
    SenderLimit { sender: MemberId, limit: u32 },
}

impl QuotaDenial {
    /// Reasoning text for a denial decision.
    pub fn describe(&self, sender_name: &str) -> String {
        match self {
            QuotaDenial::GlobalLimit { limit } => {
                format!("Daily response limit reached ({limit})")
            }
            QuotaDenial::SenderLimit { limit, .. } => {
                format!("User limit reached ({limit}) for {sender_name}")
            }
        }
    }
}

impl fmt::Display for QuotaDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaDenial::GlobalLimit { limit } => write!(f, "global limit {limit} reached"),
            QuotaDenial::SenderLimit { sender, limit } => {
                write!(f, "per-sender limit {limit} reached for {sender}")
            }
        }
    }
}

/// Read-only snapshot for operators (`/stats`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub replies_today: u32,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub per_sender_limit: Option<u32>,
    /// Reserved slots whose reasoning step is still running.
    pub in_flight: u32,
    pub last_reset: NaiveDate,
}

#[derive(Debug)]
struct QuotaState {
    day: NaiveDate,
    replies_today: u32,
    per_sender: HashMap<MemberId, u32>,
    reserved_global: u32,
    reserved_per_sender: HashMap<MemberId, u32>,
}

impl QuotaState {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            replies_today: 0,
            per_sender: HashMap::new(),
            reserved_global: 0,
            reserved_per_sender: HashMap::new(),
        }
    }

    fn reset_if_new_day(&mut self, today: NaiveDate) -> bool {
        if today == self.day {
            return false;
        }
        let previous = self.day;
        let replies = self.replies_today;
        *self = QuotaState::new(today);
        info!(%previous, %today, replies, "daily quota counters reset");
        true
    }

    fn sender_used(&self, sender: &MemberId) -> u32 {
        self.per_sender.get(sender).copied().unwrap_or(0)
            + self.reserved_per_sender.get(sender).copied().unwrap_or(0)
    }

    fn check(
        &self,
        policy: &QuotaPolicy,
        sender: &MemberId,
        is_admin: bool,
    ) -> Result<(), QuotaDenial> {
        if policy.counts_global(is_admin) {
            if let Some(limit) = policy.global_daily_cap {
                if self.replies_today + self.reserved_global >= limit {
                    return Err(QuotaDenial::GlobalLimit { limit });
                }
            }
        }
        if !is_admin {
            if let Some(limit) = policy.per_sender_daily_cap {
                if self.sender_used(sender) >= limit {
                    return Err(QuotaDenial::SenderLimit {
                        sender: sender.clone(),
                        limit,
                    });
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, sender: &MemberId, global: bool, per_sender: bool) {
        if global {
            self.replies_today += 1;
        }
        if per_sender {
            *self.per_sender.entry(sender.clone()).or_insert(0) += 1;
        }
    }
}

/// Owned, injectable quota component. Share it behind an `Arc`.
pub struct QuotaTracker {
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<QuotaState>,
}

impl QuotaTracker {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: QuotaPolicy, clock: Arc<dyn Clock>) -> Self {
        let today = clock.today();
        Self {
            policy,
            clock,
            state: Mutex::new(QuotaState::new(today)),
        }
    }

    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    fn lock(&self) -> MutexGuard<'_, QuotaState> {
        // Counters stay consistent under every critical section, so a poisoned lock is usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Zero the counters when `today` differs from the last reset day.
    pub fn reset_if_new_day(&self, today: NaiveDate) -> bool {
        self.lock().reset_if_new_day(today)
    }

    /// Whether a reply to `sender` would currently be allowed (no side effects beyond the lazy reset).
    pub fn check_allowed(&self, sender: &MemberId, is_admin: bool) -> Result<(), QuotaDenial> {
        self.check_allowed_at(sender, is_admin, self.clock.today())
    }

    pub fn check_allowed_at(
        &self,
        sender: &MemberId,
        is_admin: bool,
        today: NaiveDate,
    ) -> Result<(), QuotaDenial> {
        let mut st = self.lock();
        st.reset_if_new_day(today);
        st.check(&self.policy, sender, is_admin)
    }

    /// Count a delivered reply directly (no reservation).
    pub fn record_reply(&self, sender: &MemberId, is_admin: bool) {
        let today = self.clock.today();
        let mut st = self.lock();
        st.reset_if_new_day(today);
        st.record(
            sender,
            self.policy.counts_global(is_admin),
            self.policy.counts_sender(is_admin),
        );
    }

    /// Atomically check the caps and hold a slot for `sender`.
    ///
    /// The slot counts against the caps until the returned reservation is
    /// committed (becomes a recorded reply) or dropped (released).
    pub fn try_reserve(
        &self,
        sender: &MemberId,
        is_admin: bool,
    ) -> Result<Reservation<'_>, QuotaDenial> {
        let today = self.clock.today();
        let global = self.policy.counts_global(is_admin);
        let per_sender = self.policy.counts_sender(is_admin);

        let mut st = self.lock();
        st.reset_if_new_day(today);
        st.check(&self.policy, sender, is_admin)?;
        if global {
            st.reserved_global += 1;
        }
        if per_sender {
            *st.reserved_per_sender.entry(sender.clone()).or_insert(0) += 1;
        }

        Ok(Reservation {
            tracker: self,
            sender: sender.clone(),
            global,
            per_sender,
            day: st.day,
            settled: false,
        })
    }

    pub fn daily_stats(&self) -> DailyStats {
        self.daily_stats_at(self.clock.today())
    }

    pub fn daily_stats_at(&self, today: NaiveDate) -> DailyStats {
        let mut st = self.lock();
        st.reset_if_new_day(today);
        let limit = self.policy.global_daily_cap;
        DailyStats {
            replies_today: st.replies_today,
            limit,
            remaining: limit.map(|l| l.saturating_sub(st.replies_today)),
            per_sender_limit: self.policy.per_sender_daily_cap,
            in_flight: st.reserved_global,
            last_reset: st.day,
        }
    }

    /// Replies counted for `sender` today.
    pub fn sender_replies(&self, sender: &MemberId) -> u32 {
        self.lock().per_sender.get(sender).copied().unwrap_or(0)
    }

    fn settle(&self, r: &Reservation<'_>, commit: bool) {
        let mut st = self.lock();
        if st.day == r.day {
            if r.global {
                st.reserved_global = st.reserved_global.saturating_sub(1);
            }
            if r.per_sender {
                if let Some(n) = st.reserved_per_sender.get_mut(&r.sender) {
                    *n = n.saturating_sub(1);
                    if *n == 0 {
                        st.reserved_per_sender.remove(&r.sender);
                    }
                }
            }
        }
        // A reservation from a previous day was wiped by the reset; a commit still lands on today.
        if commit {
            st.record(&r.sender, r.global, r.per_sender);
        }
    }
}

/// A held quota slot. Dropping it without [`Reservation::commit`] releases the slot.
#[must_use = "dropping a reservation releases the slot"]
pub struct Reservation<'a> {
    tracker: &'a QuotaTracker,
    sender: MemberId,
    global: bool,
    per_sender: bool,
    day: NaiveDate,
    settled: bool,
}

impl Reservation<'_> {
    /// Turn the slot into a recorded reply.
    pub fn commit(mut self) {
        self.tracker.settle(&self, true);
        self.settled = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.tracker.settle(self, false);
        }
    }
}

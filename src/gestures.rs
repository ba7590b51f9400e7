//! Swipe classification over the recent channel history.
//!
//! Every activation is pushed into a [`HistoryBuffer`]; the latest channel
//! then selects rules from a [`RuleSet`] which are checked by scanning the
//! earlier entries backward. A vertical swipe needs `out` then `mid` then the
//! latest channel; a horizontal swipe only needs `out` somewhere before it.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::history::HistoryBuffer;
use crate::input::Channel;

/// Inactivity gap that ends a session.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Swipe {
    Up,
    Down,
    Left,
    Right,
}

impl Swipe {
    pub const ALL: [Swipe; 4] = [Swipe::Up, Swipe::Down, Swipe::Left, Swipe::Right];

    /// Numeric code used by the sensor tooling (0 is "no gesture").
    pub fn code(self) -> u8 {
        match self {
            Swipe::Up => 1,
            Swipe::Down => 2,
            Swipe::Left => 3,
            Swipe::Right => 4,
        }
    }

    pub fn binding_key(self) -> &'static str {
        match self {
            Swipe::Up => "swipe.up",
            Swipe::Down => "swipe.down",
            Swipe::Left => "swipe.left",
            Swipe::Right => "swipe.right",
        }
    }

    pub fn parse(s: &str) -> Option<Swipe> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Some(Swipe::Up),
            "down" => Some(Swipe::Down),
            "left" => Some(Swipe::Left),
            "right" => Some(Swipe::Right),
            _ => None,
        }
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Swipe::Up | Swipe::Down)
    }
}

impl fmt::Display for Swipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Swipe::Up => "Up",
            Swipe::Down => "Down",
            Swipe::Left => "Left",
            Swipe::Right => "Right",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerticalRule {
    pub latest: Channel,
    pub mid: Channel,
    pub out: Channel,
    pub direction: Swipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizontalRule {
    pub latest: Channel,
    pub out: Channel,
    pub side: Side,
}

const fn vertical(latest: Channel, mid: Channel, out: Channel, direction: Swipe) -> VerticalRule {
    VerticalRule {
        latest,
        mid,
        out,
        direction,
    }
}

const fn horizontal(latest: Channel, out: Channel, side: Side) -> HorizontalRule {
    HorizontalRule { latest, out, side }
}

/// Electrode order of a vertical swipe ending on `latest`, as printed by the
/// sensor firmware (grid code + 1).
pub static DEFAULT_VERTICAL_RULES: [VerticalRule; 4] = [
    vertical(6, 3, 1, Swipe::Up),
    vertical(7, 4, 2, Swipe::Up),
    vertical(2, 3, 5, Swipe::Down),
    vertical(3, 4, 6, Swipe::Down),
];

pub static DEFAULT_HORIZONTAL_RULES: [HorizontalRule; 6] = [
    horizontal(3, 1, Side::Right),
    horizontal(4, 4, Side::Right),
    horizontal(6, 6, Side::Right),
    horizontal(2, 2, Side::Left),
    horizontal(5, 3, Side::Left),
    horizontal(7, 5, Side::Left),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_vertical")]
    pub vertical: Vec<VerticalRule>,
    #[serde(default = "default_horizontal")]
    pub horizontal: Vec<HorizontalRule>,
}

fn default_vertical() -> Vec<VerticalRule> {
    DEFAULT_VERTICAL_RULES.to_vec()
}

fn default_horizontal() -> Vec<HorizontalRule> {
    DEFAULT_HORIZONTAL_RULES.to_vec()
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            vertical: default_vertical(),
            horizontal: default_horizontal(),
        }
    }
}

impl RuleSet {
    pub fn vertical_for(&self, latest: Channel) -> impl Iterator<Item = &VerticalRule> {
        self.vertical.iter().filter(move |r| r.latest == latest)
    }

    pub fn horizontal_for(&self, latest: Channel) -> impl Iterator<Item = &HorizontalRule> {
        self.horizontal.iter().filter(move |r| r.latest == latest)
    }
}

/// Horizontal votes collected for one event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub right: u32,
    pub left: u32,
}

impl Tally {
    pub fn add(&mut self, side: Side) {
        match side {
            Side::Right => self.right += 1,
            Side::Left => self.left += 1,
        }
    }

    /// Ties, including no votes at all, decide nothing.
    pub fn verdict(&self) -> Option<Swipe> {
        if self.right > self.left {
            Some(Swipe::Right)
        } else if self.left > self.right {
            Some(Swipe::Left)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct GestureEngine {
    history: HistoryBuffer,
    rules: RuleSet,
    timeout: Duration,
    last_event: Option<Instant>,
}

impl Default for GestureEngine {
    fn default() -> Self {
        Self::new(RuleSet::default(), DEFAULT_SESSION_TIMEOUT)
    }
}

impl GestureEngine {
    pub fn new(rules: RuleSet, timeout: Duration) -> Self {
        Self {
            history: HistoryBuffer::new(),
            rules,
            timeout,
            last_event: None,
        }
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forget the current session entirely.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_event = None;
    }

    /// Feed one activation. Returns the swipe it completes, if any.
    pub fn process_event(&mut self, channel: Channel, at: Instant) -> Option<Swipe> {
        if let Some(last) = self.last_event {
            if at.saturating_duration_since(last) >= self.timeout {
                self.history.clear();
            }
        }
        self.last_event = Some(at);

        self.history.push(channel);

        let result = self
            .identify_vertical(channel)
            .or_else(|| self.identify_horizontal(channel));
        if result.is_some() {
            self.history.clear();
        }
        result
    }

    fn identify_vertical(&self, latest: Channel) -> Option<Swipe> {
        self.rules
            .vertical_for(latest)
            .find(|r| self.vertical_gesture(r.mid, r.out))
            .map(|r| r.direction)
    }

    fn identify_horizontal(&self, latest: Channel) -> Option<Swipe> {
        let mut tally = Tally::default();
        for rule in self.rules.horizontal_for(latest) {
            if self.horizontal_gesture(rule.out) {
                tally.add(rule.side);
            }
        }
        tally.verdict()
    }

    /// `mid` somewhere before the latest entry, `out` somewhere before `mid`.
    fn vertical_gesture(&self, mid: Channel, out: Channel) -> bool {
        let mut earlier = self.earlier();
        earlier.any(|c| c == mid) && earlier.any(|c| c == out)
    }

    fn horizontal_gesture(&self, out: Channel) -> bool {
        self.earlier().any(|c| c == out)
    }

    /// The session window minus the entry just pushed, newest first.
    fn earlier(&self) -> impl Iterator<Item = Channel> + '_ {
        self.history.iter_back().skip(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Feeds `seq` 50 ms apart starting at `t0`, returns every result.
    fn feed(engine: &mut GestureEngine, t0: Instant, seq: &[Channel]) -> Vec<Option<Swipe>> {
        seq.iter()
            .enumerate()
            .map(|(i, &ch)| engine.process_event(ch, t0 + ms(50 * i as u64)))
            .collect()
    }

    #[test]
    fn default_tables_cover_each_latest_channel_once() {
        let rules = RuleSet::default();
        for ch in [2, 3, 4, 5, 6, 7] {
            assert_eq!(rules.horizontal_for(ch).count(), 1, "channel {ch}");
        }
        assert_eq!(rules.vertical_for(6).next().map(|r| (r.mid, r.out)), Some((3, 1)));
        assert_eq!(rules.vertical_for(7).next().map(|r| (r.mid, r.out)), Some((4, 2)));
        assert_eq!(rules.vertical_for(2).next().map(|r| r.direction), Some(Swipe::Down));
        assert_eq!(rules.vertical_for(4).count(), 0);
        assert_eq!(rules.horizontal_for(1).count(), 0);
    }

    #[test]
    fn tally_verdicts() {
        let mut t = Tally::default();
        assert_eq!(t.verdict(), None);
        t.add(Side::Right);
        assert_eq!(t.verdict(), Some(Swipe::Right));
        t.add(Side::Left);
        assert_eq!(t.verdict(), None);
        t.add(Side::Left);
        assert_eq!(t.verdict(), Some(Swipe::Left));
    }

    fn vertical_only() -> GestureEngine {
        let rules = RuleSet {
            vertical: DEFAULT_VERTICAL_RULES.to_vec(),
            horizontal: Vec::new(),
        };
        GestureEngine::new(rules, DEFAULT_SESSION_TIMEOUT)
    }

    #[test]
    fn detects_swipe_up() {
        let mut engine = vertical_only();
        let out = feed(&mut engine, Instant::now(), &[1, 3, 6]);
        assert_eq!(out, vec![None, None, Some(Swipe::Up)]);
        assert!(engine.history().is_empty());
    }

    #[test]
    fn left_column_up_is_shadowed_by_right_swipe() {
        // 3 after 1 already completes a Right with the default tables
        let mut engine = GestureEngine::default();
        let out = feed(&mut engine, Instant::now(), &[1, 3, 6]);
        assert_eq!(out, vec![None, Some(Swipe::Right), None]);
    }

    #[test]
    fn detects_swipe_up_right_column() {
        let mut engine = GestureEngine::default();
        let out = feed(&mut engine, Instant::now(), &[2, 4, 7]);
        assert_eq!(out.last(), Some(&Some(Swipe::Up)));
    }

    #[test]
    fn detects_swipe_down() {
        let mut engine = GestureEngine::default();
        let out = feed(&mut engine, Instant::now(), &[6, 4, 3]);
        assert_eq!(out.last(), Some(&Some(Swipe::Down)));

        let mut engine = GestureEngine::default();
        let out = feed(&mut engine, Instant::now(), &[5, 3, 2]);
        assert_eq!(out.last(), Some(&Some(Swipe::Down)));
    }

    #[test]
    fn vertical_needs_out_before_mid() {
        let mut engine = GestureEngine::default();
        // 1 after 3: wrong order for Up; latest 6 then falls back to horizontal (out=6), absent
        let out = feed(&mut engine, Instant::now(), &[3, 1, 6]);
        assert_eq!(out, vec![None, None, None]);
        assert_eq!(engine.history().len(), 3);
    }

    #[test]
    fn vertical_tolerates_noise_between_electrodes() {
        let mut engine = GestureEngine::default();
        let out = feed(&mut engine, Instant::now(), &[2, 5, 4, 1, 7]);
        assert_eq!(out, vec![None, None, None, None, Some(Swipe::Up)]);
    }

    #[test]
    fn detects_horizontal_swipes() {
        let mut engine = GestureEngine::default();
        let out = feed(&mut engine, Instant::now(), &[1, 3]);
        assert_eq!(out, vec![None, Some(Swipe::Right)]);

        let mut engine = GestureEngine::default();
        let out = feed(&mut engine, Instant::now(), &[3, 5]);
        assert_eq!(out, vec![None, Some(Swipe::Left)]);
    }

    #[test]
    fn latest_entry_does_not_match_itself() {
        let mut engine = GestureEngine::default();
        // latest 4 looks for an earlier 4
        assert_eq!(engine.process_event(4, Instant::now()), None);
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn vertical_wins_over_horizontal() {
        let mut engine = GestureEngine::default();
        // 7 ends both an Up (4 then 2 before it) and a Left (5 before it)
        let out = feed(&mut engine, Instant::now(), &[5, 2, 4, 7]);
        assert_eq!(out.last(), Some(&Some(Swipe::Up)));
    }

    #[test]
    fn timeout_resets_session() {
        let mut engine = GestureEngine::default();
        let t0 = Instant::now();
        assert_eq!(engine.process_event(1, t0), None);
        assert_eq!(engine.process_event(3, t0 + ms(600)), None);
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.history().latest(), Some(3));
    }

    #[test]
    fn timeout_boundary_is_inclusive() {
        let mut engine = GestureEngine::default();
        let t0 = Instant::now();
        engine.process_event(1, t0);
        assert_eq!(engine.process_event(3, t0 + ms(500)), None);

        let mut engine = GestureEngine::default();
        engine.process_event(1, t0);
        assert_eq!(engine.process_event(3, t0 + ms(499)), Some(Swipe::Right));
    }

    #[test]
    fn triggering_event_starts_new_session() {
        let mut engine = GestureEngine::default();
        let t0 = Instant::now();
        engine.process_event(5, t0);
        assert_eq!(engine.process_event(3, t0 + ms(700)), None);
        // the 5 belonged to the expired session, so no Down
        assert_eq!(engine.process_event(2, t0 + ms(750)), None);
        assert_eq!(engine.history().iter_back().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn emission_is_one_shot() {
        let mut engine = GestureEngine::default();
        let t0 = Instant::now();
        let out = feed(&mut engine, t0, &[2, 4, 7]);
        assert_eq!(out.last(), Some(&Some(Swipe::Up)));
        assert_eq!(engine.process_event(7, t0 + ms(200)), None);
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn cleared_engine_behaves_like_new() {
        let t0 = Instant::now();
        let seq = [5, 3, 1, 4, 2, 6, 7, 5];

        let mut fresh = GestureEngine::default();
        let expected = feed(&mut fresh, t0, &seq);

        let mut used = GestureEngine::default();
        feed(&mut used, t0, &[2, 4, 7]);
        assert!(used.history().is_empty());
        let got = feed(&mut used, t0 + ms(200), &seq);
        assert_eq!(got, expected);
    }

    #[test]
    fn bounded_history_under_long_sessions() {
        let mut engine = GestureEngine::default();
        let t0 = Instant::now();
        for i in 0..100u64 {
            // neither channel ends any default rule
            let ch = if i % 2 == 0 { 1 } else { 8 };
            engine.process_event(ch, t0 + ms(10 * i));
            assert!(engine.history().len() <= engine.history().capacity());
        }
        assert!(engine.history().is_full());
    }

    #[test]
    fn oldest_entry_drops_out_of_window() {
        let mut engine = GestureEngine::default();
        let t0 = Instant::now();
        engine.process_event(1, t0);
        for i in 1..=9u64 {
            engine.process_event(9, t0 + ms(10 * i));
        }
        // window is now [1, 9 x9]; one more push evicts the 1
        engine.process_event(9, t0 + ms(100));
        assert_eq!(engine.process_event(3, t0 + ms(110)), None);
    }

    #[test]
    fn unknown_channels_never_match() {
        let mut engine = GestureEngine::default();
        let out = feed(&mut engine, Instant::now(), &[42, 1, 200, 9]);
        assert!(out.iter().all(Option::is_none));
    }

    #[test]
    fn horizontal_tie_yields_none() {
        let rules = RuleSet {
            vertical: Vec::new(),
            horizontal: vec![horizontal(4, 1, Side::Right), horizontal(4, 2, Side::Left)],
        };
        let mut engine = GestureEngine::new(rules, DEFAULT_SESSION_TIMEOUT);
        let out = feed(&mut engine, Instant::now(), &[1, 2, 4]);
        assert_eq!(out, vec![None, None, None]);
        assert_eq!(engine.history().len(), 3);
    }

    #[test]
    fn horizontal_majority_wins() {
        let rules = RuleSet {
            vertical: Vec::new(),
            horizontal: vec![
                horizontal(4, 1, Side::Right),
                horizontal(4, 5, Side::Right),
                horizontal(4, 2, Side::Left),
            ],
        };
        let mut engine = GestureEngine::new(rules, DEFAULT_SESSION_TIMEOUT);
        let out = feed(&mut engine, Instant::now(), &[1, 2, 5, 4]);
        assert_eq!(out.last(), Some(&Some(Swipe::Right)));
    }

    #[test]
    fn reset_forgets_last_event() {
        let mut engine = GestureEngine::default();
        let t0 = Instant::now();
        engine.process_event(1, t0);
        engine.reset();
        assert!(engine.history().is_empty());
        assert_eq!(engine.process_event(3, t0 + ms(10)), None);
    }

    #[test]
    fn swipe_codes_and_names() {
        let codes: Vec<u8> = Swipe::ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes, vec![1, 2, 3, 4]);
        assert_eq!(Swipe::Left.to_string(), "Left");
        assert_eq!(Swipe::parse("RIGHT"), Some(Swipe::Right));
        assert_eq!(Swipe::parse("diagonal"), None);
    }
}

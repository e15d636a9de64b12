use std::time::Duration;

use shuttled_core::action::{ActionEntry, ActionMap, PressKind};
use shuttled_core::key::KeyId;
use tokio::time::Instant;
use tracing::debug;

use crate::timer::KeyTimerRegistry;

/// The outcome of one down/up cycle of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub key: KeyId,
    pub press: PressKind,
    pub entry: ActionEntry,
}

/// Tells a short press from a hold, independently for every key.
///
/// A key is either idle or awaiting its hold deadline. Key-down arms (or
/// re-arms) the deadline; key-up before it resolves a press; reaching it
/// resolves a hold. Key-up on an idle key, including the release after a
/// hold, does nothing. Actions are looked up in the map at resolution time.
#[derive(Debug, Default)]
pub struct KeyDisambiguator {
    pending: KeyTimerRegistry<Duration>,
}

impl KeyDisambiguator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_down(&mut self, key: KeyId, map: &impl ActionMap, now: Instant) {
        let delay = match self.pending.cancel(key) {
            Some(delay) => {
                debug!(%key, "key re-pressed while awaiting hold, restarting timer");
                delay
            }
            None => Duration::from_millis(map.hold_delay_ms(key)),
        };
        self.pending.schedule(key, delay, now, delay);
    }

    pub fn key_up(&mut self, key: KeyId, map: &impl ActionMap) -> Option<ResolvedAction> {
        self.pending.cancel(key)?;
        Some(ResolvedAction {
            key,
            press: PressKind::Press,
            entry: map.press_action(key),
        })
    }

    /// Resolve every key whose hold deadline has passed at `now`.
    pub fn fire_due(&mut self, map: &impl ActionMap, now: Instant) -> Vec<ResolvedAction> {
        self.pending
            .expire(now)
            .into_iter()
            .map(|(key, _)| {
                let hold = map.hold_action(key);
                let entry = if hold.is_none() {
                    map.press_action(key)
                } else {
                    hold
                };
                ResolvedAction {
                    key,
                    press: PressKind::Hold,
                    entry,
                }
            })
            .collect()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.next_deadline()
    }

    #[cfg(test)]
    pub fn is_awaiting(&self, key: KeyId) -> bool {
        self.pending.is_pending(key)
    }

    /// Forget every pending hold without resolving it.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttled_core::action::ActionKind;
    use shuttled_core::config::{Config, KeyConfig};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn button(n: u8) -> KeyId {
        KeyId::button(n).unwrap()
    }

    fn config_with(key: KeyId, press: ActionEntry, hold: ActionEntry, delay: u64) -> Config {
        let mut config = Config::default();
        config.set_key(
            key,
            KeyConfig {
                hold_delay_ms: delay,
                press,
                hold,
            },
        );
        config
    }

    #[test]
    fn release_before_delay_resolves_press() {
        let key = button(0);
        let config = config_with(
            key,
            ActionEntry::new(ActionKind::GoHome),
            ActionEntry::new(ActionKind::LaunchVoiceAssist),
            1000,
        );
        let t0 = Instant::now();
        let mut d = KeyDisambiguator::new();

        d.key_down(key, &config, t0);
        assert!(d.fire_due(&config, t0 + ms(300)).is_empty());
        let resolved = d.key_up(key, &config).unwrap();

        assert_eq!(resolved.press, PressKind::Press);
        assert_eq!(resolved.entry.kind, ActionKind::GoHome);
        assert!(!d.is_awaiting(key));
        assert!(d.fire_due(&config, t0 + ms(5000)).is_empty());
    }

    #[test]
    fn hold_resolves_once_and_release_is_silent() {
        let key = button(1);
        let config = config_with(
            key,
            ActionEntry::new(ActionKind::GoHome),
            ActionEntry::new(ActionKind::LaunchVoiceAssist),
            1000,
        );
        let t0 = Instant::now();
        let mut d = KeyDisambiguator::new();

        d.key_down(key, &config, t0);
        let fired = d.fire_due(&config, t0 + ms(1000));
        assert_eq!(
            fired,
            vec![ResolvedAction {
                key,
                press: PressKind::Hold,
                entry: ActionEntry::new(ActionKind::LaunchVoiceAssist),
            }]
        );
        assert!(d.fire_due(&config, t0 + ms(3000)).is_empty());
        assert_eq!(d.key_up(key, &config), None);
    }

    #[test]
    fn hold_without_action_falls_back_to_press() {
        let key = button(3);
        let config = config_with(
            key,
            ActionEntry::new(ActionKind::GoHome),
            ActionEntry::NONE,
            800,
        );
        let t0 = Instant::now();
        let mut d = KeyDisambiguator::new();

        d.key_down(key, &config, t0);
        assert_eq!(d.next_deadline(), Some(t0 + ms(800)));
        let fired = d.fire_due(&config, t0 + ms(900));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].press, PressKind::Hold);
        assert_eq!(fired[0].entry.kind, ActionKind::GoHome);
        assert_eq!(d.key_up(key, &config), None);
    }

    #[test]
    fn keys_do_not_interfere() {
        let a = button(0);
        let b = KeyId::WHEEL_LEFT;
        let mut config = config_with(
            a,
            ActionEntry::new(ActionKind::GoHome),
            ActionEntry::new(ActionKind::StartDrivingMode),
            500,
        );
        config.set_key(
            b,
            KeyConfig {
                hold_delay_ms: 500,
                press: ActionEntry::with_extra(ActionKind::SendKeyEvent, "165"),
                hold: ActionEntry::NONE,
            },
        );
        let t0 = Instant::now();
        let mut d = KeyDisambiguator::new();

        d.key_down(a, &config, t0);
        d.key_down(b, &config, t0 + ms(100));
        let press_b = d.key_up(b, &config).unwrap();
        assert_eq!(press_b.key, b);
        assert_eq!(press_b.press, PressKind::Press);

        assert!(d.is_awaiting(a));
        let fired = d.fire_due(&config, t0 + ms(500));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].key, a);
        assert_eq!(fired[0].entry.kind, ActionKind::StartDrivingMode);
    }

    #[test]
    fn repress_restarts_timer() {
        let key = button(2);
        let config = config_with(
            key,
            ActionEntry::new(ActionKind::GoHome),
            ActionEntry::new(ActionKind::LaunchVoiceAssist),
            1000,
        );
        let t0 = Instant::now();
        let mut d = KeyDisambiguator::new();

        d.key_down(key, &config, t0);
        d.key_down(key, &config, t0 + ms(600));
        assert!(d.fire_due(&config, t0 + ms(1000)).is_empty());
        assert_eq!(d.fire_due(&config, t0 + ms(1600)).len(), 1);
    }

    #[test]
    fn up_on_idle_key_does_nothing() {
        let config = Config::default();
        let mut d = KeyDisambiguator::new();
        assert_eq!(d.key_up(KeyId::RING_RIGHT, &config), None);
    }

    #[test]
    fn entries_are_read_at_resolution_time() {
        let key = button(4);
        let mut config = config_with(
            key,
            ActionEntry::new(ActionKind::GoHome),
            ActionEntry::NONE,
            1000,
        );
        let t0 = Instant::now();
        let mut d = KeyDisambiguator::new();

        d.key_down(key, &config, t0);
        config.key_mut(key).press = ActionEntry::new(ActionKind::StartDrivingMode);
        let resolved = d.key_up(key, &config).unwrap();
        assert_eq!(resolved.entry.kind, ActionKind::StartDrivingMode);
    }

    #[test]
    fn unmapped_key_resolves_to_none() {
        let config = Config::default();
        let t0 = Instant::now();
        let mut d = KeyDisambiguator::new();

        d.key_down(KeyId::RING_MIDDLE, &config, t0);
        let resolved = d.key_up(KeyId::RING_MIDDLE, &config).unwrap();
        assert!(resolved.entry.is_none());
    }

    #[test]
    fn reset_drops_pending_holds() {
        let config = Config::default();
        let t0 = Instant::now();
        let mut d = KeyDisambiguator::new();

        d.key_down(button(0), &config, t0);
        d.key_down(button(1), &config, t0);
        d.reset();

        assert_eq!(d.next_deadline(), None);
        assert!(d.fire_due(&config, t0 + ms(10_000)).is_empty());
        assert_eq!(d.key_up(button(0), &config), None);
    }
}

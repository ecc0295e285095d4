//! Input rules: conditions on local input mapped to server actions.
//!
//! # How rules fire (for beginners)
//!
//! A [`Rule`] pairs one [`Condition`] with two action lists.  When the
//! condition becomes true (a hotkey is pressed, a button goes down, a screen
//! connects) the *activate* list runs; when it stops being true (the hotkey or
//! button is released) the *deactivate* list runs.
//!
//! Every rule is checked in registration order and every matching rule fires,
//! so two rules bound to the same hotkey both run, the later one last.  Input
//! that triggers a rule is *consumed*: the server does not forward it to the
//! active screen.

use serde::{Deserialize, Serialize};

use crate::domain::topology::{Direction, ScreenName};
use crate::keymap::{
    parse_button_binding, parse_hotkey, ButtonId, KeyId, KeyParseError, ModifierMask,
};

/// Off / on / flip, used by lock and broadcast actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    Off,
    On,
    #[default]
    Toggle,
}

impl Toggle {
    /// The new state when applied to `current`.
    pub fn apply(self, current: bool) -> bool {
        match self {
            Toggle::Off => false,
            Toggle::On => true,
            Toggle::Toggle => !current,
        }
    }
}

/// What a rule waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Keystroke { key: KeyId, mask: ModifierMask },
    MouseButton { button: ButtonId, mask: ModifierMask },
    /// A screen connected.  `None` matches any screen.
    ScreenConnected { screen: Option<ScreenName> },
}

impl Condition {
    /// Parses `"Control+Alt+F1"` style text.
    ///
    /// # Errors
    ///
    /// Returns the [`KeyParseError`] from [`parse_hotkey`].
    pub fn keystroke(text: &str) -> Result<Self, KeyParseError> {
        let (key, mask) = parse_hotkey(text)?;
        Ok(Condition::Keystroke { key, mask })
    }

    /// Parses `"Control+Button3"` style text.
    ///
    /// # Errors
    ///
    /// Returns the [`KeyParseError`] from [`parse_button_binding`].
    pub fn mouse_button(text: &str) -> Result<Self, KeyParseError> {
        let (button, mask) = parse_button_binding(text)?;
        Ok(Condition::MouseButton { button, mask })
    }
}

/// What a rule does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SwitchToScreen(ScreenName),
    SwitchInDirection(Direction),
    SwitchToNextScreen,
    LockCursor(Toggle),
    /// Send key events to the listed screens as well as the active one.
    /// An empty list means every connected screen.
    KeyboardBroadcast { mode: Toggle, screens: Vec<ScreenName> },
    /// Inject a key press or release.  An empty list means the active screen.
    Keystroke {
        key: KeyId,
        mask: ModifierMask,
        down: bool,
        screens: Vec<ScreenName>,
    },
    /// Inject a mouse button press or release into the active screen.
    MouseButton { button: ButtonId, down: bool },
    RestartServer,
}

impl Action {
    /// Press-then-release pair for a keystroke, as activate/deactivate lists.
    ///
    /// # Errors
    ///
    /// Returns the [`KeyParseError`] from [`parse_hotkey`].
    pub fn keystroke_pair(
        text: &str,
        screens: Vec<ScreenName>,
    ) -> Result<(Action, Action), KeyParseError> {
        let (key, mask) = parse_hotkey(text)?;
        let press = Action::Keystroke {
            key,
            mask,
            down: true,
            screens: screens.clone(),
        };
        let release = Action::Keystroke {
            key,
            mask,
            down: false,
            screens,
        };
        Ok((press, release))
    }

    /// Screens this action names, for validation against the topology.
    pub fn screens(&self) -> &[ScreenName] {
        match self {
            Action::SwitchToScreen(screen) => std::slice::from_ref(screen),
            Action::KeyboardBroadcast { screens, .. } | Action::Keystroke { screens, .. } => {
                screens
            }
            _ => &[],
        }
    }
}

/// A condition with the actions it triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub condition: Condition,
    pub activate: Vec<Action>,
    pub deactivate: Vec<Action>,
}

impl Rule {
    pub fn new(condition: Condition, activate: Vec<Action>) -> Self {
        Self {
            condition,
            activate,
            deactivate: Vec::new(),
        }
    }

    pub fn with_deactivate(mut self, deactivate: Vec<Action>) -> Self {
        self.deactivate = deactivate;
        self
    }
}

/// Local input as seen by the rule engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleInput {
    KeyDown { key: KeyId, mask: ModifierMask },
    KeyUp { key: KeyId, mask: ModifierMask },
    ButtonDown { button: ButtonId, mask: ModifierMask },
    ButtonUp { button: ButtonId, mask: ModifierMask },
    ScreenConnected(ScreenName),
}

/// Result of [`RuleEngine::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Evaluation {
    /// Actions to perform, in order.
    pub actions: Vec<Action>,
    /// `true` when the input must not be forwarded.
    pub consumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engaged {
    Key(KeyId),
    Button(ButtonId),
}

/// Ordered rule list plus which press-style rules are currently held.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
    engaged: Vec<(usize, Engaged)>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            engaged: Vec::new(),
        }
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Matches `input` against every rule.
    ///
    /// Modifier comparison ignores Caps, Num and Scroll Lock.  A release
    /// fires the deactivate list of every rule its press activated, whatever
    /// the modifiers are by then.
    pub fn evaluate(&mut self, input: &RuleInput) -> Evaluation {
        match input {
            RuleInput::KeyDown { key, mask } => self.press(Engaged::Key(*key), *mask),
            RuleInput::ButtonDown { button, mask } => self.press(Engaged::Button(*button), *mask),
            RuleInput::KeyUp { key, .. } => self.release(Engaged::Key(*key)),
            RuleInput::ButtonUp { button, .. } => self.release(Engaged::Button(*button)),
            RuleInput::ScreenConnected(name) => {
                let actions = self
                    .rules
                    .iter()
                    .filter(|rule| match &rule.condition {
                        Condition::ScreenConnected { screen } => {
                            screen.as_ref().map_or(true, |s| s == name)
                        }
                        _ => false,
                    })
                    .flat_map(|rule| rule.activate.iter().cloned())
                    .collect();
                Evaluation {
                    actions,
                    consumed: false,
                }
            }
        }
    }

    fn press(&mut self, input: Engaged, mask: ModifierMask) -> Evaluation {
        let mask = mask.without_locks();
        let mut eval = Evaluation::default();
        for (index, rule) in self.rules.iter().enumerate() {
            let hit = match (&rule.condition, input) {
                (Condition::Keystroke { key, mask: want }, Engaged::Key(k)) => {
                    *key == k && want.without_locks() == mask
                }
                (Condition::MouseButton { button, mask: want }, Engaged::Button(b)) => {
                    *button == b && want.without_locks() == mask
                }
                _ => false,
            };
            if hit {
                eval.actions.extend(rule.activate.iter().cloned());
                eval.consumed = true;
                if !self.engaged.contains(&(index, input)) {
                    self.engaged.push((index, input));
                }
            }
        }
        eval
    }

    fn release(&mut self, input: Engaged) -> Evaluation {
        let mut eval = Evaluation::default();
        let rules = &self.rules;
        self.engaged.retain(|&(index, held)| {
            if held != input {
                return true;
            }
            if let Some(rule) = rules.get(index) {
                eval.actions.extend(rule.deactivate.iter().cloned());
            }
            eval.consumed = true;
            false
        });
        eval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch_rule(hotkey: &str, screen: &str) -> Rule {
        Rule::new(
            Condition::keystroke(hotkey).unwrap(),
            vec![Action::SwitchToScreen(ScreenName::from(screen))],
        )
    }

    #[test]
    fn test_hotkey_with_modifier_fires_and_is_consumed() {
        // Arrange
        let mut engine = RuleEngine::new(vec![switch_rule("Control+F1", "b")]);

        // Act
        let eval = engine.evaluate(&RuleInput::KeyDown {
            key: KeyId::F1,
            mask: ModifierMask::CONTROL,
        });

        // Assert
        assert_eq!(eval.actions, [Action::SwitchToScreen(ScreenName::from("b"))]);
        assert!(eval.consumed);
    }

    #[test]
    fn test_same_key_without_modifier_fires_nothing() {
        let mut engine = RuleEngine::new(vec![switch_rule("Control+F1", "b")]);

        let eval = engine.evaluate(&RuleInput::KeyDown {
            key: KeyId::F1,
            mask: ModifierMask::NONE,
        });

        assert_eq!(eval, Evaluation::default());
    }

    #[test]
    fn test_lock_modifiers_are_ignored() {
        let mut engine = RuleEngine::new(vec![switch_rule("Control+F1", "b")]);

        let eval = engine.evaluate(&RuleInput::KeyDown {
            key: KeyId::F1,
            mask: ModifierMask::CONTROL | ModifierMask::NUM_LOCK | ModifierMask::CAPS_LOCK,
        });

        assert!(eval.consumed);
    }

    #[test]
    fn test_extra_modifier_does_not_match() {
        let mut engine = RuleEngine::new(vec![switch_rule("Control+F1", "b")]);

        let eval = engine.evaluate(&RuleInput::KeyDown {
            key: KeyId::F1,
            mask: ModifierMask::CONTROL | ModifierMask::SHIFT,
        });

        assert!(!eval.consumed);
    }

    #[test]
    fn test_every_matching_rule_fires_in_registration_order() {
        // Arrange
        let mut engine = RuleEngine::new(vec![
            switch_rule("Super+Left", "a"),
            Rule::new(
                Condition::keystroke("Super+Left").unwrap(),
                vec![Action::LockCursor(Toggle::On)],
            ),
            switch_rule("Super+Left", "c"),
        ]);

        // Act
        let eval = engine.evaluate(&RuleInput::KeyDown {
            key: KeyId::LEFT,
            mask: ModifierMask::SUPER,
        });

        // Assert
        assert_eq!(
            eval.actions,
            [
                Action::SwitchToScreen(ScreenName::from("a")),
                Action::LockCursor(Toggle::On),
                Action::SwitchToScreen(ScreenName::from("c")),
            ]
        );
    }

    #[test]
    fn test_release_fires_deactivate_and_is_consumed() {
        // Arrange
        let (press, release) = Action::keystroke_pair("Control+C", vec![]).unwrap();
        let mut engine = RuleEngine::new(vec![Rule::new(
            Condition::keystroke("Alt+F5").unwrap(),
            vec![press],
        )
        .with_deactivate(vec![release.clone()])]);

        // Act
        engine.evaluate(&RuleInput::KeyDown {
            key: KeyId::function(5).unwrap(),
            mask: ModifierMask::ALT,
        });
        // Alt released first; the F5 release still ends the rule.
        let up = engine.evaluate(&RuleInput::KeyUp {
            key: KeyId::function(5).unwrap(),
            mask: ModifierMask::NONE,
        });
        let again = engine.evaluate(&RuleInput::KeyUp {
            key: KeyId::function(5).unwrap(),
            mask: ModifierMask::NONE,
        });

        // Assert
        assert_eq!(up.actions, [release]);
        assert!(up.consumed);
        assert!(!again.consumed);
    }

    #[test]
    fn test_mouse_button_condition() {
        let mut engine = RuleEngine::new(vec![Rule::new(
            Condition::mouse_button("Shift+Button3").unwrap(),
            vec![Action::SwitchToNextScreen],
        )]);

        let down = engine.evaluate(&RuleInput::ButtonDown {
            button: 3,
            mask: ModifierMask::SHIFT,
        });
        let other = engine.evaluate(&RuleInput::ButtonDown {
            button: 1,
            mask: ModifierMask::SHIFT,
        });

        assert_eq!(down.actions, [Action::SwitchToNextScreen]);
        assert!(!other.consumed);
    }

    #[test]
    fn test_screen_connected_matches_named_or_any() {
        // Arrange
        let mut engine = RuleEngine::new(vec![
            Rule::new(
                Condition::ScreenConnected {
                    screen: Some(ScreenName::from("b")),
                },
                vec![Action::SwitchToScreen(ScreenName::from("b"))],
            ),
            Rule::new(
                Condition::ScreenConnected { screen: None },
                vec![Action::LockCursor(Toggle::Off)],
            ),
        ]);

        // Act
        let b = engine.evaluate(&RuleInput::ScreenConnected(ScreenName::from("b")));
        let c = engine.evaluate(&RuleInput::ScreenConnected(ScreenName::from("c")));

        // Assert
        assert_eq!(b.actions.len(), 2);
        assert_eq!(c.actions, [Action::LockCursor(Toggle::Off)]);
        assert!(!b.consumed);
    }

    #[test]
    fn test_toggle_apply() {
        assert!(Toggle::Toggle.apply(false));
        assert!(!Toggle::Toggle.apply(true));
        assert!(Toggle::On.apply(true));
        assert!(!Toggle::Off.apply(true));
    }
}

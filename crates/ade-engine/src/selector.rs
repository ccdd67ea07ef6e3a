//! Action selection
//!
//! Chooses between the fixed control-cohort policy, a rule-based policy for
//! capable learners and unseen states, and epsilon-greedy over learned
//! Q-values restricted to the actions that make sense for the learner.

use rand::Rng;
use serde::{Deserialize, Serialize};

use ade_core::{CohortMode, Representation};
use ade_rl::{Action, LearnerTopicState, QPolicy, QValues};

use crate::misconception::Misconception;

/// Which branch produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ControlCohort,
    MasteryBypass,
    Exploration,
    Exploitation,
    RuleBasedFallback,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::ControlCohort => "control_cohort",
            Strategy::MasteryBypass => "mastery_bypass",
            Strategy::Exploration => "exploration",
            Strategy::Exploitation => "exploitation",
            Strategy::RuleBasedFallback => "rule_based_fallback",
        }
    }
}

/// A chosen action with its justification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    pub used_exploration: bool,
    pub strategy: Strategy,
    pub epsilon: f64,
}

/// What the selector looks at for one decision
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub state: &'a LearnerTopicState,
    /// Learned values for the state's key
    pub q_values: &'a QValues,
    pub cohort: CohortMode,
    pub misconception: Option<Misconception>,
}

pub struct ActionSelector {
    policy: QPolicy,
    support_bias: f64,
}

impl ActionSelector {
    /// Mastery at which epsilon-greedy is bypassed for the rule-based policy
    pub const BYPASS_MASTERY: f64 = 80.0;

    pub fn new(policy: QPolicy, support_bias: f64) -> Self {
        Self {
            policy,
            support_bias: support_bias.clamp(0.0, 1.0),
        }
    }

    pub fn policy(&self) -> &QPolicy {
        &self.policy
    }

    pub fn decide<R: Rng + ?Sized>(&self, input: &DecisionInput<'_>, rng: &mut R) -> Decision {
        let state = input.state;
        let epsilon = self.policy.epsilon(state.total_attempts);

        if input.cohort == CohortMode::Control {
            return Decision {
                action: Action::MaintainDifficulty,
                reason: "Control cohort: fixed policy keeps the current difficulty".to_string(),
                used_exploration: false,
                strategy: Strategy::ControlCohort,
                epsilon,
            };
        }

        if state.mastery.value() >= Self::BYPASS_MASTERY {
            let (action, reason) = rule_based(state, input.misconception.as_ref());
            return Decision {
                action,
                reason,
                used_exploration: false,
                strategy: Strategy::MasteryBypass,
                epsilon,
            };
        }

        let candidates = valid_actions(state);

        if self.policy.should_explore(epsilon, rng) {
            if let Some(action) = self.explore(state, &candidates, rng) {
                return Decision {
                    action,
                    reason: format!("Exploring alternatives (epsilon {epsilon:.3})"),
                    used_exploration: true,
                    strategy: Strategy::Exploration,
                    epsilon,
                };
            }
        }

        match self.policy.best_action(input.q_values, &candidates) {
            Some(action) => {
                let value = input.q_values.get(&action).copied().unwrap_or(0.0);
                Decision {
                    action,
                    reason: format!("Highest learned value for this situation (Q {value:.2})"),
                    used_exploration: false,
                    strategy: Strategy::Exploitation,
                    epsilon,
                }
            }
            None => {
                let (action, reason) = rule_based(state, input.misconception.as_ref());
                Decision {
                    action,
                    reason,
                    used_exploration: false,
                    strategy: Strategy::RuleBasedFallback,
                    epsilon,
                }
            }
        }
    }

    /// Uniform exploratory pick, biased toward support actions when struggling
    fn explore<R: Rng + ?Sized>(
        &self,
        state: &LearnerTopicState,
        candidates: &[Action],
        rng: &mut R,
    ) -> Option<Action> {
        if state.wrong_streak >= 2 {
            let (support, other): (Vec<Action>, Vec<Action>) =
                candidates.iter().partition(|a| a.is_support());
            let pool = if rng.gen::<f64>() < self.support_bias {
                support
            } else {
                other
            };
            if let Some(action) = self.policy.random_action(&pool, rng) {
                return Some(action);
            }
        }
        self.policy.random_action(candidates, rng)
    }
}

/// Actions that are legal for the learner's current situation, in `Action::ALL` order
pub fn valid_actions(state: &LearnerTopicState) -> Vec<Action> {
    Action::ALL
        .into_iter()
        .filter(|action| match action {
            Action::IncreaseDifficulty => state.wrong_streak < 2 && !state.difficulty.is_max(),
            Action::DecreaseDifficulty => !state.difficulty.is_min(),
            Action::SwitchToVisual => {
                state.current_representation != Representation::Visual
            }
            Action::SwitchToRealWorld => {
                state.current_representation != Representation::RealWorld
            }
            Action::MaintainDifficulty
            | Action::CycleRepresentation
            | Action::HintThenRetry
            | Action::AdvanceTopic
            | Action::ReviewPrerequisite
            | Action::RepeatCurrent => true,
        })
        .collect()
}

/// Ordered pedagogical rules; the first match wins
pub fn rule_based(
    state: &LearnerTopicState,
    misconception: Option<&Misconception>,
) -> (Action, String) {
    let mastery = state.mastery.value();
    let difficulty = state.difficulty;

    if let Some(m) = misconception {
        if state.wrong_streak >= 2 {
            return (
                Action::HintThenRetry,
                format!("Misconception detected ({}): hint with scaffolding", m.describe()),
            );
        }
    }

    if state.wrong_streak >= 3 && mastery < 60.0 {
        return if difficulty.is_min() {
            (
                Action::HintThenRetry,
                format!(
                    "Preventing frustration after {} consecutive misses: already at the easiest level, giving a hint",
                    state.wrong_streak
                ),
            )
        } else {
            (
                Action::DecreaseDifficulty,
                format!(
                    "Preventing frustration after {} consecutive misses: lowering difficulty",
                    state.wrong_streak
                ),
            )
        };
    }

    if mastery >= 85.0 && state.correct_streak >= 3 {
        return if difficulty.is_max() {
            (
                Action::AdvanceTopic,
                "Mastered at the hardest level: advancing to the next topic".to_string(),
            )
        } else {
            (
                Action::IncreaseDifficulty,
                format!(
                    "High mastery ({mastery:.1}) with {} correct in a row: raising difficulty",
                    state.correct_streak
                ),
            )
        };
    }

    if (60.0..85.0).contains(&mastery) && state.wrong_streak <= 1 && state.correct_streak >= 2 {
        return (
            Action::MaintainDifficulty,
            "In the flow zone: keeping the current challenge".to_string(),
        );
    }

    if state.correct_streak >= 7 && difficulty.level() <= 2 && mastery >= 75.0 {
        return (
            Action::IncreaseDifficulty,
            "Avoiding boredom: long streak on easy questions, raising difficulty".to_string(),
        );
    }

    (
        Action::MaintainDifficulty,
        "Steady practice at the current level".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::{Difficulty, Mastery, Representation, StudentId, TopicId};
    use ade_rl::PolicyParams;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn create_test_state(mastery: f64) -> LearnerTopicState {
        let mut state = LearnerTopicState::new(StudentId::from("s1"), TopicId::from("t1"));
        state.mastery = Mastery::new(mastery);
        state
    }

    fn selector() -> ActionSelector {
        ActionSelector::new(QPolicy::new(PolicyParams::default()), 0.8)
    }

    fn greedy_selector() -> ActionSelector {
        let params = PolicyParams {
            initial_epsilon: 0.0,
            min_epsilon: 0.0,
            ..PolicyParams::default()
        };
        ActionSelector::new(QPolicy::new(params), 0.8)
    }

    fn input<'a>(state: &'a LearnerTopicState, q: &'a QValues) -> DecisionInput<'a> {
        DecisionInput {
            state,
            q_values: q,
            cohort: CohortMode::Adaptive,
            misconception: None,
        }
    }

    #[test]
    fn test_control_cohort_always_maintains() {
        let state = create_test_state(10.0);
        let q = QValues::new();
        let mut rng = StdRng::seed_from_u64(1);
        let decision = selector().decide(
            &DecisionInput {
                cohort: CohortMode::Control,
                ..input(&state, &q)
            },
            &mut rng,
        );
        assert_eq!(decision.action, Action::MaintainDifficulty);
        assert_eq!(decision.strategy, Strategy::ControlCohort);
        assert!(!decision.used_exploration);
    }

    #[test]
    fn test_high_mastery_bypasses_exploration() {
        let mut state = create_test_state(90.0);
        state.correct_streak = 4;
        let q = QValues::new();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let decision = selector().decide(&input(&state, &q), &mut rng);
            assert_eq!(decision.strategy, Strategy::MasteryBypass);
            assert_eq!(decision.action, Action::IncreaseDifficulty);
        }
    }

    #[test]
    fn test_unseen_state_falls_back_to_rules() {
        let mut state = create_test_state(40.0);
        state.wrong_streak = 3;
        let q = QValues::new();
        let mut rng = StdRng::seed_from_u64(1);
        let decision = greedy_selector().decide(&input(&state, &q), &mut rng);
        assert_eq!(decision.strategy, Strategy::RuleBasedFallback);
        assert_eq!(decision.action, Action::DecreaseDifficulty);
        assert!(decision.reason.contains("frustration"));
    }

    #[test]
    fn test_exploitation_respects_filter() {
        let mut state = create_test_state(40.0);
        state.wrong_streak = 2;
        let mut q = QValues::new();
        q.insert(Action::IncreaseDifficulty, 9.0);
        q.insert(Action::HintThenRetry, 1.0);
        let mut rng = StdRng::seed_from_u64(1);
        let decision = greedy_selector().decide(&input(&state, &q), &mut rng);
        assert_eq!(decision.strategy, Strategy::Exploitation);
        assert_eq!(decision.action, Action::HintThenRetry);
    }

    #[test]
    fn test_valid_actions_filter() {
        let mut state = create_test_state(40.0);
        state.wrong_streak = 2;
        assert!(!valid_actions(&state).contains(&Action::IncreaseDifficulty));

        let mut state = create_test_state(40.0);
        state.difficulty = Difficulty::MIN;
        assert!(!valid_actions(&state).contains(&Action::DecreaseDifficulty));

        state.difficulty = Difficulty::MAX;
        assert!(!valid_actions(&state).contains(&Action::IncreaseDifficulty));

        state.current_representation = Representation::Visual;
        let valid = valid_actions(&state);
        assert!(!valid.contains(&Action::SwitchToVisual));
        assert!(valid.contains(&Action::SwitchToRealWorld));
    }

    #[test]
    fn test_struggling_exploration_bias() {
        let mut state = create_test_state(20.0);
        state.wrong_streak = 2;
        let q = QValues::new();
        let mut rng = StdRng::seed_from_u64(99);
        let selector = selector();

        let trials = 2_000;
        let mut support = 0;
        for _ in 0..trials {
            let decision = selector.decide(&input(&state, &q), &mut rng);
            assert!(decision.used_exploration);
            assert_ne!(decision.action, Action::IncreaseDifficulty);
            if decision.action.is_support() {
                support += 1;
            }
        }
        let share = f64::from(support) / f64::from(trials);
        assert!((share - 0.8).abs() < 0.05, "support share {share}");
    }

    #[test]
    fn test_rule_misconception_first() {
        let mut state = create_test_state(40.0);
        state.wrong_streak = 3;
        let m = Misconception::PrerequisiteGap { misses: 3 };
        let (action, reason) = rule_based(&state, Some(&m));
        assert_eq!(action, Action::HintThenRetry);
        assert!(reason.contains("Misconception"));

        // Below two misses the misconception rule does not apply
        state.wrong_streak = 1;
        let (action, _) = rule_based(&state, Some(&m));
        assert_eq!(action, Action::MaintainDifficulty);
    }

    #[test]
    fn test_rule_frustration_at_minimum_hints() {
        let mut state = create_test_state(40.0);
        state.wrong_streak = 4;
        state.difficulty = Difficulty::MIN;
        let (action, reason) = rule_based(&state, None);
        assert_eq!(action, Action::HintThenRetry);
        assert!(reason.contains("frustration"));
    }

    #[test]
    fn test_rule_advance_at_maximum() {
        let mut state = create_test_state(88.0);
        state.correct_streak = 3;
        state.difficulty = Difficulty::MAX;
        assert_eq!(rule_based(&state, None).0, Action::AdvanceTopic);
    }

    #[test]
    fn test_rule_flow_state() {
        let mut state = create_test_state(70.0);
        state.correct_streak = 2;
        let (action, reason) = rule_based(&state, None);
        assert_eq!(action, Action::MaintainDifficulty);
        assert!(reason.contains("flow"));
    }

    #[test]
    fn test_rule_boredom() {
        // Flow takes precedence for a clean streak
        let mut state = create_test_state(78.0);
        state.correct_streak = 8;
        state.difficulty = Difficulty::new(2);
        assert_eq!(rule_based(&state, None).0, Action::MaintainDifficulty);

        // Boredom applies once the flow rule declines
        state.wrong_streak = 2;
        let (action, reason) = rule_based(&state, None);
        assert_eq!(action, Action::IncreaseDifficulty);
        assert!(reason.contains("boredom"));
    }

    #[test]
    fn test_rule_default() {
        let state = create_test_state(10.0);
        let (action, reason) = rule_based(&state, None);
        assert_eq!(action, Action::MaintainDifficulty);
        assert!(reason.contains("Steady practice"));
    }
}

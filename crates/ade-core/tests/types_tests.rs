//! Wire-format tests for the shared value objects

use ade_core::{
    AttemptRecord, CognitiveDomain, Difficulty, Mastery, Representation, StudentId, TopicId,
};

#[test]
fn test_ids_serialize_as_plain_strings() {
    let student = StudentId::new("s-17");
    assert_eq!(serde_json::to_string(&student).unwrap(), "\"s-17\"");

    let topic: TopicId = serde_json::from_str("\"fractions\"").unwrap();
    assert_eq!(topic.as_str(), "fractions");
    assert_eq!(topic.to_string(), "fractions");
}

#[test]
fn test_attempt_record_builders() {
    let attempt = AttemptRecord::new(true, Difficulty::new(4), Representation::Visual)
        .with_hint(true)
        .with_elapsed(42.5);

    assert!(attempt.was_correct);
    assert!(attempt.hint_used);
    assert_eq!(attempt.difficulty.level(), 4);
    assert_eq!(attempt.elapsed_seconds, 42.5);
}

#[test]
fn test_attempt_record_json_shape() {
    let attempt = AttemptRecord::new(false, Difficulty::new(2), Representation::RealWorld);
    let json = serde_json::to_value(&attempt).unwrap();

    assert_eq!(json["was_correct"], false);
    assert_eq!(json["difficulty"], 2);
    assert_eq!(json["representation"], "real_world");
}

#[test]
fn test_out_of_range_values_are_clamped_on_read() {
    let difficulty: Difficulty = serde_json::from_str("9").unwrap();
    assert!(difficulty.is_max());

    let mastery: Mastery = serde_json::from_str("-3.5").unwrap();
    assert_eq!(mastery.value(), 0.0);
}

#[test]
fn test_unknown_domain_is_rejected() {
    assert!("synthesis".parse::<CognitiveDomain>().is_err());
    assert_eq!(
        "higher_order_thinking".parse::<CognitiveDomain>().unwrap(),
        CognitiveDomain::HigherOrderThinking
    );
}

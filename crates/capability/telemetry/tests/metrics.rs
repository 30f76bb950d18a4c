use hub_telemetry::{metrics, record_history_stored, record_not_permitted};

#[test]
fn counters_accumulate() {
    let before = metrics().snapshot();
    record_history_stored(3);
    record_not_permitted();
    let after = metrics().snapshot();
    assert!(after.history_stored >= before.history_stored + 3);
    assert!(after.rejected_not_permitted > before.rejected_not_permitted);
}

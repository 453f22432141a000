// Serialization of diagnostic snapshots

use super::{fake_handle, tracked_layer};

#[test]
fn test_state_info_json() {
    let layer = tracked_layer();
    let h = fake_handle(1);
    layer.open(h).unwrap();
    layer.acquire(h).unwrap();
    layer.release(h).unwrap();

    let info = layer.info(h).unwrap();
    let json = serde_json::to_value(&info).unwrap();

    assert_eq!(json["handle"], serde_json::json!(h.addr() as u64));
    assert_eq!(json["phase"], "Open");
    assert_eq!(json["lock"]["acquisitions"], 1);
    assert_eq!(json["lock"]["contentions"], 0);
    assert_eq!(json["poisoned"], false);
    assert_eq!(json["has_companion"], true);
    assert!(json["opened_at"].is_string());

    layer.close(h);
}

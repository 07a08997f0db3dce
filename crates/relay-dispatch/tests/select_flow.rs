use std::net::UdpSocket;
use std::time::Duration;

use relay_dispatch::{CommandDispatcher, DispatchConfig};
use relay_ingest::{IngestPoller, Ingested, TrackRegistry};
use relay_proto::{OutboundCommand, Rect};

#[test]
fn detection_frame_to_selection_packet() {
    let registry = TrackRegistry::new();
    let mut poller =
        IngestPoller::bind("detections", "127.0.0.1:0".parse().unwrap(), registry.clone()).unwrap();

    let detector = UdpSocket::bind("127.0.0.1:0").unwrap();
    detector.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    detector
        .send_to(
            br#"{"objects":[{"x":10,"y":20,"size":30,"label":"car","id":1,"data":"moving"}]}"#,
            poller.local_addr().unwrap(),
        )
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let batches = poller.tick();
    assert!(matches!(batches.as_slice(), [Ingested::Objects(t)] if t.len() == 1));

    let tracks = registry.tracks();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].id, 1);
    assert_eq!(tracks[0].rect, Rect::new(10.0, 20.0, 30.0, 30.0));
    assert_eq!(tracks[0].label, "car");

    let gimbal = UdpSocket::bind("127.0.0.1:0").unwrap();
    let dispatcher = CommandDispatcher::new(DispatchConfig {
        detection_peer: Some(detector.local_addr().unwrap()),
        gimbal_peer: Some(gimbal.local_addr().unwrap()),
        ..Default::default()
    })
    .unwrap();

    let selected = registry.on_select(1).unwrap();
    dispatcher.send(OutboundCommand::select(&selected), None).unwrap();

    let mut buf = [0u8; 512];
    let n = detector.recv(&mut buf).unwrap();
    let got: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
    assert_eq!(
        got,
        serde_json::json!({"id": 1, "data": "moving", "camera_mode": 1, "tracking_mode": 1})
    );
}

#[test]
fn stale_selection_after_refresh_is_not_found() {
    let registry = TrackRegistry::new();
    let mut poller =
        IngestPoller::bind("detections", "127.0.0.1:0".parse().unwrap(), registry.clone()).unwrap();
    let src = UdpSocket::bind("127.0.0.1:0").unwrap();
    let to = poller.local_addr().unwrap();
    src.send_to(br#"{"objects":[{"x":0,"y":0,"size":5,"id":1}]}"#, to).unwrap();
    src.send_to(br#"{"objects":[{"x":0,"y":0,"size":5,"id":2}]}"#, to).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(poller.tick().len(), 2);
    assert!(registry.on_select(1).is_none());
    assert_eq!(registry.on_select(2).map(|t| t.id), Some(2));
}

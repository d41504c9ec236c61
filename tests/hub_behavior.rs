//! Hub contract tests: ordered fan-out, slow-subscriber drops, synthetic
//! heartbeats, the delivery watchdog, the stream age cap, and the dealer
//! note side channel.

use std::collections::HashSet;
use std::time::Duration;

use g38d::game::event::{Event, EventEnvelope};
use g38d::hub::{EventHub, HubConfig, HubDelivery, Role, TopicFilter};

fn quiet_config() -> HubConfig {
    // Long intervals so only explicit publishes reach subscribers.
    HubConfig {
        heartbeat_interval: Duration::from_secs(3600),
        watchdog_window: Duration::from_secs(7200),
        max_stream_age: Duration::from_secs(7200),
        subscriber_buffer: 256,
        dispatch_deadline: Duration::from_secs(10),
    }
}

fn env(seq: u64) -> EventEnvelope {
    EventEnvelope::for_room("R1", seq, Event::RoundCreated { has_jackpot: false })
}

#[tokio::test]
async fn s5_slow_subscriber_is_dropped_others_unaffected() {
    let mut cfg = quiet_config();
    cfg.subscriber_buffer = 2;
    cfg.dispatch_deadline = Duration::from_millis(100);
    let hub = EventHub::start(cfg);

    // X never reads; Y consumes everything.
    let (_x_id, mut x_rx) = hub.subscribe("R1", Role::Player, TopicFilter::All).await;
    let (_y_id, mut y_rx) = hub.subscribe("R1", Role::Player, TopicFilter::All).await;

    for seq in 0..10u64 {
        hub.publish(env(seq)).await;
        // Keep Y drained so only X exerts back-pressure.
        while let Ok(delivery) = y_rx.try_recv() {
            match delivery {
                HubDelivery::Event(e) => assert!(e.seq <= seq),
                other => panic!("unexpected delivery {other:?}"),
            }
        }
    }

    assert_eq!(hub.subscriber_count("R1").await, 1, "X was dropped");

    // X got its buffered prefix, then the closed channel.
    let mut got = 0;
    while let Some(delivery) = x_rx.recv().await {
        match delivery {
            HubDelivery::Event(e) => {
                assert_eq!(e.seq, got);
                got += 1;
            }
            HubDelivery::Bye { .. } => break,
            other => panic!("unexpected delivery {other:?}"),
        }
    }
    assert!(got < 10, "a frozen subscriber cannot see the full stream");
}

#[tokio::test]
async fn delivery_preserves_sequence_order_per_subscriber() {
    let hub = EventHub::start(quiet_config());
    let (_id, mut rx) = hub.subscribe("R1", Role::Player, TopicFilter::All).await;

    for seq in 0..50u64 {
        hub.publish(env(seq)).await;
    }
    for expect in 0..50u64 {
        match rx.recv().await {
            Some(HubDelivery::Event(e)) => assert_eq!(e.seq, expect),
            other => panic!("expected event, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn events_are_scoped_to_their_room() {
    let hub = EventHub::start(quiet_config());
    let (_a, mut a_rx) = hub.subscribe("R1", Role::Player, TopicFilter::All).await;
    let (_b, mut b_rx) = hub.subscribe("R2", Role::Player, TopicFilter::All).await;

    hub.publish(env(0)).await;
    match a_rx.recv().await {
        Some(HubDelivery::Event(e)) => assert_eq!(e.room, "R1"),
        other => panic!("expected event, got {other:?}"),
    }
    assert!(b_rx.try_recv().is_err(), "R2 subscriber sees nothing");
}

#[tokio::test]
async fn topic_filter_limits_delivered_kinds() {
    let hub = EventHub::start(quiet_config());
    let filter = TopicFilter::Kinds(HashSet::from(["ROUND_COMPLETED".to_string()]));
    let (_id, mut rx) = hub.subscribe("R1", Role::Player, filter).await;

    hub.publish(env(0)).await;
    hub.publish(EventEnvelope::for_room("R1", 1, Event::RoundCompleted {}))
        .await;

    match rx.recv().await {
        Some(HubDelivery::Event(e)) => {
            assert_eq!(e.seq, 1);
            assert!(matches!(e.event, Event::RoundCompleted {}));
        }
        other => panic!("expected filtered event, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn heartbeats_repeat_the_last_published_ordinal() {
    let mut cfg = quiet_config();
    cfg.heartbeat_interval = Duration::from_secs(15);
    let hub = EventHub::start(cfg);
    let (_id, mut rx) = hub.subscribe("R1", Role::Player, TopicFilter::All).await;

    hub.publish(env(7)).await;
    match rx.recv().await {
        Some(HubDelivery::Event(e)) => assert_eq!(e.seq, 7),
        other => panic!("expected event, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(16)).await;
    match rx.recv().await {
        Some(HubDelivery::Event(e)) => {
            assert!(matches!(e.event, Event::Heartbeat {}));
            assert_eq!(e.seq, 7, "heartbeat repeats, never advances");
        }
        other => panic!("expected heartbeat, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn silent_subscriber_is_torn_down_by_the_watchdog() {
    let mut cfg = quiet_config();
    // No heartbeats, so nothing refreshes the delivery stamp.
    cfg.watchdog_window = Duration::from_secs(30);
    let hub = EventHub::start(cfg);
    let (_id, mut rx) = hub.subscribe("R1", Role::Player, TopicFilter::All).await;

    tokio::time::sleep(Duration::from_secs(32)).await;
    match rx.recv().await {
        Some(HubDelivery::Bye { reason }) => assert_eq!(reason, "watchdog"),
        other => panic!("expected watchdog close, got {other:?}"),
    }
    assert_eq!(hub.subscriber_count("R1").await, 0);
}

#[tokio::test(start_paused = true)]
async fn stream_age_cap_closes_with_a_normal_signal() {
    let mut cfg = quiet_config();
    cfg.heartbeat_interval = Duration::from_secs(15);
    cfg.watchdog_window = Duration::from_secs(40);
    cfg.max_stream_age = Duration::from_secs(600);
    let hub = EventHub::start(cfg);
    let (_id, mut rx) = hub.subscribe("R1", Role::Player, TopicFilter::All).await;

    tokio::time::sleep(Duration::from_secs(601)).await;
    // Heartbeats kept the subscription alive until the cap; drain them.
    loop {
        match rx.recv().await {
            Some(HubDelivery::Event(e)) => {
                assert!(matches!(e.event, Event::Heartbeat {}));
            }
            Some(HubDelivery::Bye { reason }) => {
                assert_eq!(reason, "stream-age");
                break;
            }
            other => panic!("unexpected delivery {other:?}"),
        }
    }
    assert_eq!(hub.subscriber_count("R1").await, 0);
}

#[tokio::test]
async fn notes_fan_out_to_topic_members_only() {
    let hub = EventHub::start(quiet_config());
    let (a_id, mut a_rx) = hub.subscribe("R1", Role::Dealer, TopicFilter::All).await;
    let (_b_id, mut b_rx) = hub.subscribe("R1", Role::Dealer, TopicFilter::All).await;

    hub.note_subscribe(a_id, "R1", "shift-change").await;
    hub.publish_note("R1", "shift-change", serde_json::json!({"next": "dealer-2"}))
        .await;

    match a_rx.recv().await {
        Some(HubDelivery::Note { topic, data }) => {
            assert_eq!(topic, "shift-change");
            assert_eq!(data["next"], "dealer-2");
        }
        other => panic!("expected note, got {other:?}"),
    }
    assert!(b_rx.try_recv().is_err(), "non-member sees no note");

    // Unsubscribing ends delivery.
    hub.note_unsubscribe(a_id, "R1", "shift-change").await;
    hub.publish_note("R1", "shift-change", serde_json::json!({})).await;
    assert!(a_rx.try_recv().is_err());
}

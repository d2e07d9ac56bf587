use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{ConnectionState, MemberId, PopulationIndex},
    error::SyncError,
    protocol::{Command, Tag, TagPayload, ViewKind},
};
use tokio::sync::Mutex;

use crate::{
    command::CommandSender,
    connection::{normalize_url, Connection, FrameSink},
    router::MessageRouter,
    settings::{load_settings, ReconnectPolicy, Settings},
    store::ViewStateStore,
};

struct RecordingSink {
    frames: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        self.frames.lock().await.push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}

fn test_connection() -> Connection {
    Connection::new(normalize_url("ws://localhost:8081/api/populations/ws/").expect("url"))
}

async fn open_connection_with_recorder() -> (Connection, Arc<Mutex<Vec<String>>>) {
    let connection = test_connection();
    assert!(connection.advance(ConnectionState::Connecting));
    assert!(connection.advance(ConnectionState::Open));
    let frames = Arc::new(Mutex::new(Vec::new()));
    connection
        .install_sink_for_test(Box::new(RecordingSink {
            frames: Arc::clone(&frames),
        }))
        .await;
    (connection, frames)
}

mod connection_state {
    use super::*;

    #[test]
    fn advance_walks_the_happy_path() {
        let connection = test_connection();
        assert_eq!(connection.state(), ConnectionState::Idle);
        assert!(connection.advance(ConnectionState::Connecting));
        assert!(connection.advance(ConnectionState::Open));
        assert!(connection.advance(ConnectionState::Closed));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn advance_refuses_regressions_and_terminal_exits() {
        let connection = test_connection();
        assert!(!connection.advance(ConnectionState::Open), "must pass connecting");
        connection.advance(ConnectionState::Connecting);
        connection.advance(ConnectionState::Errored);
        assert!(!connection.advance(ConnectionState::Open));
        assert!(!connection.advance(ConnectionState::Closed));
        assert_eq!(connection.state(), ConnectionState::Errored);
    }

    #[test]
    fn url_normalization_maps_http_schemes() {
        assert_eq!(
            normalize_url("http://localhost:8081/ws").expect("ws url").scheme(),
            "ws"
        );
        assert_eq!(
            normalize_url("https://engine.example/ws").expect("wss url").scheme(),
            "wss"
        );
        assert!(matches!(
            normalize_url("ftp://engine.example/ws"),
            Err(SyncError::Transport(_))
        ));
    }
}

mod command_sender {
    use super::*;

    #[tokio::test]
    async fn send_transmits_exactly_one_flat_frame_while_open() {
        let (connection, frames) = open_connection_with_recorder().await;
        let sender = CommandSender::new(connection);

        sender
            .send(&Command::RemovePopulation {
                population_index: PopulationIndex(2),
            })
            .await
            .expect("send while open");

        let frames = frames.lock().await;
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).expect("frame json");
        assert_eq!(
            frame,
            serde_json::json!({"type": "remove_population", "population_index": 2})
        );
    }

    #[tokio::test]
    async fn send_fails_with_state_error_in_every_non_open_state() {
        for target in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Closed,
            ConnectionState::Errored,
        ] {
            let connection = test_connection();
            let frames = Arc::new(Mutex::new(Vec::new()));
            connection
                .install_sink_for_test(Box::new(RecordingSink {
                    frames: Arc::clone(&frames),
                }))
                .await;
            match target {
                ConnectionState::Idle => {}
                ConnectionState::Connecting => {
                    connection.advance(ConnectionState::Connecting);
                }
                ConnectionState::Closed => {
                    connection.advance(ConnectionState::Connecting);
                    connection.advance(ConnectionState::Open);
                    connection.advance(ConnectionState::Closed);
                }
                ConnectionState::Errored => {
                    connection.advance(ConnectionState::Connecting);
                    connection.advance(ConnectionState::Errored);
                }
                ConnectionState::Open => unreachable!(),
            }
            assert_eq!(connection.state(), target);

            let sender = CommandSender::new(connection.clone());
            let result = sender
                .send(&Command::AddPopulation {
                    configuration: "{}".to_string(),
                })
                .await;

            let Err(SyncError::State { state }) = result else {
                panic!("expected state error in {:?}", connection.state());
            };
            assert_eq!(state, connection.state());
            assert!(frames.lock().await.is_empty(), "nothing may be transmitted");
        }
    }
}

mod router {
    use super::*;

    #[test]
    fn multi_tag_frames_dispatch_in_lexicographic_order() {
        let router = MessageRouter::new(ViewKind::PopulationDetail);
        let payloads = router
            .route(r#"{"members": {}, "configuration": "a: 1", "individual_type": "bitvector"}"#)
            .expect("well-formed frame");
        let tags: Vec<Tag> = payloads.iter().map(TagPayload::tag).collect();
        assert_eq!(tags, vec![Tag::Configuration, Tag::IndividualType, Tag::Members]);
    }

    #[test]
    fn unknown_tag_is_dropped_without_disturbing_the_frame() {
        let router = MessageRouter::new(ViewKind::PopulationList);
        let payloads = router
            .route(r#"{"telemetry": 42, "initial_configuration": "{}"}"#)
            .expect("frame survives unknown tag");
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].tag(), Tag::InitialConfiguration);
    }

    #[test]
    fn tags_outside_the_view_set_are_dropped() {
        let router = MessageRouter::new(ViewKind::PopulationList);
        let payloads = router
            .route(r#"{"genome": [1, 0, 1], "current_metrics": []}"#)
            .expect("frame survives unregistered tag");
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].tag(), Tag::CurrentMetrics);
    }

    #[test]
    fn schema_mismatch_drops_the_pair_not_the_frame() {
        let router = MessageRouter::new(ViewKind::PopulationDetail);
        let payloads = router
            .route(r#"{"members": "not a map", "configuration": "a: 1"}"#)
            .expect("frame survives one bad pair");
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].tag(), Tag::Configuration);
    }

    #[test]
    fn non_object_frames_are_protocol_errors() {
        let router = MessageRouter::new(ViewKind::PopulationList);
        assert!(router.route("[1, 2, 3]").unwrap_err().is_protocol());
        assert!(router.route("not json at all").unwrap_err().is_protocol());
    }

    #[test]
    fn empty_object_yields_no_payloads() {
        let router = MessageRouter::new(ViewKind::PopulationList);
        assert!(router.route("{}").expect("empty frame").is_empty());
    }
}

mod store {
    use super::*;

    fn configuration(text: &str) -> TagPayload {
        TagPayload::decode(Tag::Configuration, serde_json::json!(text)).expect("configuration")
    }

    #[test]
    fn last_write_wins_per_tag() {
        let mut store = ViewStateStore::new(ViewKind::PopulationDetail);
        store.apply(configuration("a: 1"));
        store.apply(configuration("a: 2"));
        assert_eq!(
            store.get(Tag::Configuration),
            Some(&configuration("a: 2"))
        );
    }

    #[test]
    fn applying_one_tag_never_alters_another() {
        let mut store = ViewStateStore::new(ViewKind::PopulationDetail);
        store.apply(configuration("a: 1"));
        store.apply(
            TagPayload::decode(Tag::IndividualType, serde_json::json!("bitvector"))
                .expect("individual type"),
        );
        assert_eq!(store.get(Tag::Configuration), Some(&configuration("a: 1")));
    }

    #[test]
    fn readiness_latches_on_the_last_missing_tag() {
        let mut store = ViewStateStore::new(ViewKind::PopulationList);
        store.apply(
            TagPayload::decode(Tag::CurrentMetrics, serde_json::json!([])).expect("metrics"),
        );
        assert!(!store.ready());
        store.apply(
            TagPayload::decode(Tag::InitialConfiguration, serde_json::json!("{}"))
                .expect("initial configuration"),
        );
        assert!(store.ready());
    }

    #[test]
    fn readiness_survives_later_falsy_payloads() {
        let mut store = ViewStateStore::new(ViewKind::PopulationList);
        store.apply(
            TagPayload::decode(Tag::CurrentMetrics, serde_json::json!([])).expect("metrics"),
        );
        store.apply(
            TagPayload::decode(Tag::InitialConfiguration, serde_json::json!("{}"))
                .expect("initial configuration"),
        );
        assert!(store.ready());
        store.apply(
            TagPayload::decode(Tag::InitialConfiguration, serde_json::json!(""))
                .expect("empty configuration"),
        );
        assert!(store.ready(), "readiness is monotonic");
    }

    #[test]
    fn view_state_only_contains_delivered_tags() {
        let store = ViewStateStore::new(ViewKind::Individual);
        let snapshot = store.snapshot(ConnectionState::Open);
        assert!(snapshot.values.is_empty());
        assert!(!snapshot.ready);
        assert_eq!(snapshot.connection, ConnectionState::Open);
    }

    #[test]
    fn members_sort_by_descending_fitness_with_stable_ties() {
        let mut store = ViewStateStore::new(ViewKind::PopulationDetail);
        store.apply(
            TagPayload::decode(
                Tag::Members,
                serde_json::json!({
                    "m1": {"fitness": 0.8, "url": "/x"},
                    "m2": {"fitness": 0.95, "url": "/y"},
                    "m3": {"fitness": null, "url": "/z"},
                    "m4": {"fitness": 0.8, "url": "/w"},
                }),
            )
            .expect("members"),
        );
        let snapshot = store.snapshot(ConnectionState::Open);
        let order: Vec<&MemberId> = snapshot
            .members_by_fitness()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(
            order,
            vec![
                &MemberId::new("m2"),
                &MemberId::new("m1"),
                &MemberId::new("m4"),
                &MemberId::new("m3"),
            ]
        );
    }

    #[test]
    fn metrics_history_reshapes_into_time_ordered_rows() {
        let mut store = ViewStateStore::new(ViewKind::PopulationDetail);
        store.apply(
            TagPayload::decode(
                Tag::DetailedMetrics,
                serde_json::json!({
                    "current": {
                        "amount_of_members": 2,
                        "amount_of_evaluated_members": 2,
                        "amount_of_unevaluated_members": 0,
                        "fitness_minimum": 0.1,
                        "fitness_maximum": 0.9,
                        "fitness_median": 0.5,
                        "fitness_mean": 0.5,
                        "fitness_standard_deviation": 0.4,
                    },
                    "history": {
                        "columns": ["timestamp", "fitness_mean", "fitness_maximum"],
                        "data": [
                            ["2024-05-01 12:00:02", 0.6, 0.9],
                            ["2024-05-01 12:00:01", 0.5, null],
                            [null, 1.0, 1.0],
                        ],
                    },
                }),
            )
            .expect("detailed metrics"),
        );
        let snapshot = store.snapshot(ConnectionState::Open);
        let history = snapshot.metrics_history();
        assert_eq!(history.len(), 2, "row without timestamp is skipped");
        assert!(history[0].timestamp < history[1].timestamp);
        assert_eq!(history[0].values["fitness_mean"], Some(0.5));
        assert_eq!(history[0].values["fitness_maximum"], None);
        assert_eq!(history[1].values["fitness_maximum"], Some(0.9));
    }
}

mod settings {
    use super::*;
    use std::time::Duration;

    #[test]
    fn off_policy_never_retries() {
        assert_eq!(ReconnectPolicy::Off.delay_for(1), None);
    }

    #[test]
    fn backoff_schedule_grows_and_caps_without_jitter() {
        let policy = ReconnectPolicy::Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: false,
            max_attempts: 4,
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(350)));
        assert_eq!(policy.delay_for(4), None, "attempts exhausted");
    }

    #[test]
    fn jittered_delays_stay_below_the_deterministic_delay() {
        let policy = ReconnectPolicy::Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(400),
            multiplier: 2.0,
            jitter: true,
            max_attempts: 10,
        };
        for _ in 0..50 {
            let delay = policy.delay_for(2).expect("delay");
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn environment_overrides_apply() {
        std::env::set_var("APP__CONNECT_TIMEOUT_MS", "2500");
        std::env::set_var("APP__RECONNECT", "backoff");
        std::env::set_var("APP__RECONNECT_MAX_ATTEMPTS", "3");
        std::env::set_var("APP__RECONNECT_JITTER", "false");

        let settings = load_settings();
        assert_eq!(settings.connect_timeout, Some(Duration::from_millis(2500)));
        let ReconnectPolicy::Backoff {
            jitter,
            max_attempts,
            ..
        } = settings.reconnect
        else {
            panic!("expected backoff policy");
        };
        assert_eq!(max_attempts, 3);
        assert!(!jitter);

        std::env::remove_var("APP__CONNECT_TIMEOUT_MS");
        std::env::remove_var("APP__RECONNECT");
        std::env::remove_var("APP__RECONNECT_MAX_ATTEMPTS");
        std::env::remove_var("APP__RECONNECT_JITTER");

        let defaults = Settings::default();
        assert_eq!(defaults.connect_timeout, None);
        assert_eq!(defaults.reconnect, ReconnectPolicy::Off);
    }
}

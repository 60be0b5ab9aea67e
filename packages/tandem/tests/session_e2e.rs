//! Full two-client sessions over a shared in-process store.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use tandem::config::{Config, CursorConfig, MatchmakingConfig, SessionConfig, SurfaceSize};
use tandem::model::{Episode, WINDOW_COUNT};
use tandem::{Client, ClientInput, EngineError, SessionEvent, SessionOutcome, Store};

const WAIT: Duration = Duration::from_secs(5);

/// Fast timings: a 20ms display delay and a two-move tissue pull.
fn fast_config() -> Config {
    Config {
        matchmaking: MatchmakingConfig {
            pairing_timeout: Duration::from_secs(2),
        },
        session: SessionConfig {
            advance_delay: Duration::from_millis(20),
            tissue_step: 50.0,
            cursor: CursorConfig {
                min_interval: Duration::from_millis(50),
                surface: SurfaceSize {
                    width: 100.0,
                    height: 100.0,
                },
            },
        },
    }
}

struct TestClient {
    inputs: mpsc::Sender<ClientInput>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    /// Everything received so far, including events skipped by `wait_for`.
    seen: Vec<SessionEvent>,
    task: JoinHandle<Result<SessionOutcome, EngineError>>,
}

impl TestClient {
    fn spawn(store: &Store, config: &Config) -> Self {
        let (input_tx, input_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let client = Client::new(store.clone(), config.clone());
        let task = tokio::spawn(async move { client.run(input_rx, event_tx).await });
        Self {
            inputs: input_tx,
            events: event_rx,
            seen: Vec::new(),
            task,
        }
    }

    async fn send(&self, input: ClientInput) {
        self.inputs.send(input).await.expect("input channel closed");
    }

    /// Receive until an event matches, recording everything seen.
    async fn wait_for(&mut self, what: &str, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("event stream ended");
                self.seen.push(event.clone());
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    async fn wait_for_episode(&mut self, episode: Episode) {
        self.wait_for(episode.as_str(), |e| {
            matches!(e, SessionEvent::EpisodeEntered { episode: entered } if *entered == episode)
        })
        .await;
    }

    fn episode_entries(&self, episode: Episode) -> usize {
        self.seen
            .iter()
            .filter(|e| {
                matches!(e, SessionEvent::EpisodeEntered { episode: entered } if *entered == episode)
            })
            .count()
    }

    fn client_id(&self) -> String {
        self.seen
            .iter()
            .rev()
            .find_map(|e| match e {
                SessionEvent::PairingStarted { client } => Some(client.to_string()),
                _ => None,
            })
            .expect("no pairing has started")
    }
}

/// Pair two clients and assert the Paired events agree with each other.
async fn pair(store: &Store, config: &Config) -> (TestClient, TestClient) {
    let mut a = TestClient::spawn(store, config);
    let mut b = TestClient::spawn(store, config);
    let paired_a = a.wait_for("paired", |e| matches!(e, SessionEvent::Paired { .. })).await;
    let paired_b = b.wait_for("paired", |e| matches!(e, SessionEvent::Paired { .. })).await;

    let (SessionEvent::Paired { room: room_a, partner: partner_a, .. },
         SessionEvent::Paired { room: room_b, partner: partner_b, .. }) = (paired_a, paired_b)
    else {
        unreachable!()
    };
    assert_eq!(room_a, room_b, "both members share one room");
    assert_eq!(partner_a.to_string(), b.client_id());
    assert_eq!(partner_b.to_string(), a.client_id());
    (a, b)
}

/// Drive a freshly-paired pair through lights and tissue to the ending.
async fn run_to_ending(a: &mut TestClient, b: &mut TestClient) {
    a.wait_for_episode(Episode::Opening).await;
    b.wait_for_episode(Episode::Opening).await;
    a.send(ClientInput::Enter).await;
    b.send(ClientInput::Enter).await;
    a.wait_for_episode(Episode::Lights).await;
    b.wait_for_episode(Episode::Lights).await;

    for index in 0..WINDOW_COUNT {
        a.send(ClientInput::WindowClick { index }).await;
        b.send(ClientInput::WindowClick { index }).await;
        let off_target = index + 1;
        for client in [&mut *a, &mut *b] {
            client
                .wait_for("window to go dark", |e| {
                    matches!(e, SessionEvent::WindowsChanged { windows_off, .. } if *windows_off == off_target)
                })
                .await;
        }
    }

    a.wait_for_episode(Episode::Tissue).await;
    b.wait_for_episode(Episode::Tissue).await;

    // a holds first; b presses only after seeing a hold, so b is the dragger
    a.send(ClientInput::PointerDown).await;
    b.wait_for("partner holding", |e| {
        matches!(e, SessionEvent::PartnerHoldingChanged { holding: true })
    })
    .await;
    b.send(ClientInput::PointerDown).await;
    b.send(ClientInput::PointerMove { x: 10.0, y: 10.0 }).await;
    b.send(ClientInput::PointerMove { x: 20.0, y: 10.0 }).await;

    a.wait_for("tissue completion", |e| matches!(e, SessionEvent::TissueCompleted)).await;
    b.wait_for("tissue completion", |e| matches!(e, SessionEvent::TissueCompleted)).await;

    a.wait_for_episode(Episode::Ending).await;
    b.wait_for_episode(Episode::Ending).await;
}

#[tokio::test]
async fn full_session_reaches_the_ending() {
    let store = Store::new();
    let config = fast_config();
    let (mut a, mut b) = pair(&store, &config).await;
    run_to_ending(&mut a, &mut b).await;

    // both members saw progress mirrored, wherever the drag happened
    assert!(a.seen.iter().any(|e| matches!(
        e,
        SessionEvent::ProgressChanged { progress } if *progress >= 100.0
    )));

    // every stage was entered exactly once
    for client in [&a, &b] {
        for episode in [Episode::Opening, Episode::Lights, Episode::Tissue, Episode::Ending] {
            assert_eq!(
                client.episode_entries(episode),
                1,
                "{episode} entered exactly once"
            );
        }
    }
}

#[tokio::test]
async fn restart_from_the_ending_pairs_again_with_fresh_identities() {
    let store = Store::new();
    let config = fast_config();
    let (mut a, mut b) = pair(&store, &config).await;
    let (first_a, first_b) = (a.client_id(), b.client_id());
    run_to_ending(&mut a, &mut b).await;

    a.send(ClientInput::Restart).await;
    b.send(ClientInput::Restart).await;

    let second_room = {
        let paired = a.wait_for("re-pairing", |e| matches!(e, SessionEvent::Paired { .. })).await;
        let SessionEvent::Paired { room, .. } = paired else {
            unreachable!()
        };
        room
    };
    b.wait_for("re-pairing", |e| matches!(e, SessionEvent::Paired { .. })).await;

    // fresh identities, and the controller is back at the opening
    assert_ne!(a.client_id(), first_a);
    assert_ne!(b.client_id(), first_b);
    a.wait_for_episode(Episode::Opening).await;
    b.wait_for_episode(Episode::Opening).await;

    // the new room is a new room
    let first_room = a
        .seen
        .iter()
        .find_map(|e| match e {
            SessionEvent::Paired { room, .. } => Some(room.clone()),
            _ => None,
        })
        .expect("first pairing recorded");
    assert_ne!(first_room, second_room);
}

#[tokio::test]
async fn partner_disconnect_abandons_the_session() {
    let store = Store::new();
    let config = fast_config();
    let (mut a, mut b) = pair(&store, &config).await;

    a.wait_for_episode(Episode::Opening).await;
    b.wait_for_episode(Episode::Opening).await;
    a.send(ClientInput::Enter).await;
    b.send(ClientInput::Enter).await;
    a.wait_for_episode(Episode::Lights).await;
    b.wait_for_episode(Episode::Lights).await;

    // a's embedding application goes away mid-session
    drop(a.inputs);
    assert_eq!(a.task.await.unwrap().unwrap(), SessionOutcome::Closed);

    b.wait_for("partner to leave", |e| matches!(e, SessionEvent::PartnerLeft)).await;
    b.wait_for("session end", |e| {
        matches!(
            e,
            SessionEvent::SessionEnded {
                outcome: SessionOutcome::Abandoned
            }
        )
    })
    .await;
    assert_eq!(b.task.await.unwrap().unwrap(), SessionOutcome::Abandoned);
}

#[tokio::test]
async fn cursor_positions_reach_the_partner_as_percentages() {
    let store = Store::new();
    let config = fast_config();
    let (mut a, mut b) = pair(&store, &config).await;
    a.wait_for_episode(Episode::Opening).await;
    b.wait_for_episode(Episode::Opening).await;

    // surface is 100x100, so pixels map 1:1 onto percentages
    a.send(ClientInput::PointerMove { x: 25.0, y: 75.0 }).await;
    let moved = b
        .wait_for("partner cursor", |e| {
            matches!(e, SessionEvent::PartnerCursorMoved { .. })
        })
        .await;
    let SessionEvent::PartnerCursorMoved { x, y } = moved else {
        unreachable!()
    };
    assert_eq!((x, y), (25.0, 75.0));
}

#[tokio::test]
async fn third_client_times_out_instead_of_joining() {
    let store = Store::new();
    let config = Config {
        matchmaking: MatchmakingConfig {
            pairing_timeout: Duration::from_millis(200),
        },
        ..fast_config()
    };
    let (_a, _b) = pair(&store, &config).await;

    let mut c = TestClient::spawn(&store, &config);
    c.wait_for("pairing start", |e| matches!(e, SessionEvent::PairingStarted { .. }))
        .await;
    let err = c.task.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::PairingTimeout));
}

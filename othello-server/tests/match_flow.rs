//! End-to-end session flows driven through the intent handler.

use std::sync::Arc;
use std::time::Duration;

use othello_ai::Difficulty;
use othello_core::{Player, RatingRecord, Winner};
use othello_server::app::{self, Client, SharedState};
use othello_server::protocol::{ClientMessage, FinishReason, Outcome, ServerMessage};
use othello_server::session::{Connection, Identity};
use othello_server::{AppState, MemoryStore, ServerConfig, Store};
use tokio::sync::mpsc::{self, UnboundedReceiver};

fn config() -> ServerConfig {
    let mut config = ServerConfig {
        grace_secs: 5,
        turn_timeout_secs: 0,
        ..ServerConfig::default()
    };
    config.search.max_nodes = 5_000;
    config
}

fn server(config: ServerConfig) -> (SharedState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(config, store.clone());
    (state, store)
}

fn client(state: &SharedState, id: &str) -> (Client, UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Connection {
        id: state.next_conn_id(),
        tx,
    };
    let identity = Identity {
        id: id.to_string(),
        display_name: id.to_string(),
    };
    (app::connect(state, identity, conn), rx)
}

fn send(state: &SharedState, client: &mut Client, msg: ClientMessage) {
    app::handle_message(state, client, msg);
}

fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

async fn recv_until<F>(rx: &mut UnboundedReceiver<ServerMessage>, pred: F) -> ServerMessage
where
    F: Fn(&ServerMessage) -> bool,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed");
        if pred(&msg) {
            return msg;
        }
    }
}

fn mv(row: i32, col: i32) -> ClientMessage {
    ClientMessage::Move { row, col }
}

fn room_code(messages: &[ServerMessage]) -> String {
    messages
        .iter()
        .find_map(|m| match m {
            ServerMessage::RoomCreated { room_id } => Some(room_id.clone()),
            _ => None,
        })
        .expect("room_created")
}

fn ready_color(messages: &[ServerMessage]) -> Player {
    messages
        .iter()
        .find_map(|m| match m {
            ServerMessage::GameReady { color, .. } => Some(*color),
            _ => None,
        })
        .expect("game_ready")
}

/// Friend room with ann as Black and bob as White.
fn friend_game(
    state: &SharedState,
) -> (
    String,
    (Client, UnboundedReceiver<ServerMessage>),
    (Client, UnboundedReceiver<ServerMessage>),
) {
    let (mut ann, mut rx_ann) = client(state, "ann");
    let (mut bob, mut rx_bob) = client(state, "bob");
    send(
        state,
        &mut ann,
        ClientMessage::CreateRoom {
            player_name: "Ann".into(),
            difficulty: None,
        },
    );
    let code = room_code(&drain(&mut rx_ann));
    send(
        state,
        &mut bob,
        ClientMessage::JoinRoom {
            room_id: code.to_lowercase(),
            player_name: "Bob".into(),
        },
    );
    assert_eq!(ready_color(&drain(&mut rx_ann)), Player::Black);
    assert_eq!(ready_color(&drain(&mut rx_bob)), Player::White);
    (code, (ann, rx_ann), (bob, rx_bob))
}

/// Ranked game between ann (Black) and bob (White).
fn ranked_game(
    state: &SharedState,
) -> (
    (Client, UnboundedReceiver<ServerMessage>),
    (Client, UnboundedReceiver<ServerMessage>),
) {
    let (mut ann, mut rx_ann) = client(state, "ann");
    let (mut bob, mut rx_bob) = client(state, "bob");
    send(
        state,
        &mut ann,
        ClientMessage::QueueRanked {
            player_name: "Ann".into(),
        },
    );
    send(
        state,
        &mut bob,
        ClientMessage::QueueRanked {
            player_name: "Bob".into(),
        },
    );
    let ann_msgs = drain(&mut rx_ann);
    let bob_msgs = drain(&mut rx_bob);
    assert!(matches!(ann_msgs[0], ServerMessage::Queued));
    assert_eq!(ready_color(&ann_msgs), Player::Black);
    assert_eq!(ready_color(&bob_msgs), Player::White);
    assert!(bob_msgs.iter().any(|m| matches!(
        m,
        ServerMessage::GameReady {
            opponent_rating: Some(1200),
            ..
        }
    )));
    assert_eq!(state.registry.queue_len(), 0);
    ((ann, rx_ann), (bob, rx_bob))
}

#[tokio::test]
async fn friend_room_flow() {
    let (state, store) = server(config());
    let (code, (mut ann, mut rx_ann), (mut bob, mut rx_bob)) = friend_game(&state);

    // White cannot move first.
    send(&state, &mut bob, mv(2, 3));
    assert!(matches!(
        drain(&mut rx_bob).as_slice(),
        [ServerMessage::MoveRejected { .. }]
    ));

    send(&state, &mut ann, mv(2, 3));
    for rx in [&mut rx_ann, &mut rx_bob] {
        match drain(rx).as_slice() {
            [ServerMessage::StateUpdate(view)] => {
                assert_eq!(view.current_player, Player::White);
                assert_eq!((view.black_count, view.white_count), (4, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    send(&state, &mut bob, mv(9, 9));
    assert!(matches!(
        drain(&mut rx_bob).as_slice(),
        [ServerMessage::MoveRejected { .. }]
    ));

    send(
        &state,
        &mut bob,
        ClientMessage::Chat {
            message: " hi ann ".into(),
        },
    );
    assert_eq!(
        drain(&mut rx_ann),
        vec![ServerMessage::Chat {
            from: "Bob".into(),
            message: "hi ann".into()
        }]
    );

    send(&state, &mut ann, ClientMessage::Resign);
    for (rx, outcome) in [(&mut rx_ann, Outcome::Loss), (&mut rx_bob, Outcome::Win)] {
        assert!(drain(rx).iter().any(|m| *m
            == ServerMessage::GameOver {
                winner: Some(Winner::White),
                reason: FinishReason::Resignation,
                outcome,
                elo_change: 0,
                new_elo: None,
            }));
    }

    let results = store.results();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.record.mode == "friend"));
    assert!(results.iter().all(|r| r.rating.is_none()));
    assert!(state.registry.get(&code).is_some());
}

#[tokio::test]
async fn join_errors() {
    let (state, _store) = server(config());
    let (code, _ann, _bob) = friend_game(&state);

    let (mut cat, mut rx_cat) = client(&state, "cat");
    send(
        &state,
        &mut cat,
        ClientMessage::JoinRoom {
            room_id: code.clone(),
            player_name: "Cat".into(),
        },
    );
    assert_eq!(
        drain(&mut rx_cat),
        vec![ServerMessage::RoomFull { room_id: code }]
    );

    send(
        &state,
        &mut cat,
        ClientMessage::JoinRoom {
            room_id: "zzzzzz".into(),
            player_name: "Cat".into(),
        },
    );
    assert_eq!(
        drain(&mut rx_cat),
        vec![ServerMessage::RoomNotFound {
            room_id: "ZZZZZZ".into()
        }]
    );

    send(&state, &mut cat, mv(2, 3));
    assert!(matches!(
        drain(&mut rx_cat).as_slice(),
        [ServerMessage::MoveRejected { .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn ranked_disconnect_costs_sixteen() {
    let (state, store) = server(config());
    let ((mut ann, mut rx_ann), (mut bob, _rx_bob)) = ranked_game(&state);
    send(&state, &mut ann, mv(2, 3));
    send(&state, &mut bob, mv(2, 2));
    send(&state, &mut ann, mv(2, 1));

    app::disconnect(&state, &bob);
    recv_until(&mut rx_ann, |m| {
        matches!(m, ServerMessage::OpponentDisconnected { grace_secs: 5 })
    })
    .await;

    let over = recv_until(&mut rx_ann, |m| matches!(m, ServerMessage::GameOver { .. })).await;
    assert_eq!(
        over,
        ServerMessage::GameOver {
            winner: Some(Winner::Black),
            reason: FinishReason::Disconnect,
            outcome: Outcome::Win,
            elo_change: 0,
            new_elo: Some(1200),
        }
    );

    let bob_record = store.rating("bob").unwrap().unwrap();
    assert_eq!(bob_record.elo_rating, 1184);
    assert_eq!(bob_record.disconnects, 1);
    assert_eq!(bob_record.current_streak, 0);
    let bob_result = store
        .results()
        .into_iter()
        .find(|r| r.player_id == "bob")
        .unwrap();
    assert_eq!(bob_result.record.elo_change, -16);
    assert_eq!(bob_result.record.outcome, Outcome::Loss);
    assert_eq!(bob_result.record.move_count, 3);
}

#[tokio::test(start_paused = true)]
async fn early_disconnect_is_abandon() {
    let (state, store) = server(config());
    store.set_rating("bob", RatingRecord::with_rating(1200));
    let ((mut ann, mut rx_ann), (mut bob, _rx_bob)) = ranked_game(&state);
    send(&state, &mut ann, mv(2, 3));
    send(&state, &mut bob, mv(2, 2));

    app::disconnect(&state, &bob);
    let over = recv_until(&mut rx_ann, |m| matches!(m, ServerMessage::GameOver { .. })).await;
    assert!(matches!(
        over,
        ServerMessage::GameOver {
            reason: FinishReason::Abandon,
            outcome: Outcome::Abandoned,
            elo_change: 0,
            ..
        }
    ));

    let bob_record = store.rating("bob").unwrap().unwrap();
    assert_eq!(bob_record.elo_rating, 1200);
    assert_eq!(bob_record.abandons, 1);
    assert_eq!(bob_record.games_played(), 0);
}

#[tokio::test(start_paused = true)]
async fn reconnect_within_grace_resumes() {
    let (state, store) = server(config());
    let (code, (mut ann, mut rx_ann), (bob, _rx_bob)) = friend_game(&state);
    send(&state, &mut ann, mv(2, 3));
    app::disconnect(&state, &bob);
    drain(&mut rx_ann);

    let (mut bob2, mut rx_bob2) = client(&state, "bob");
    send(&state, &mut bob2, ClientMessage::Rejoin { room_id: code });
    match drain(&mut rx_bob2).as_slice() {
        [ServerMessage::GameReady { color, state, .. }] => {
            assert_eq!(*color, Player::White);
            assert_eq!(state.current_player, Player::White);
            assert_eq!(state.black_count, 4);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(drain(&mut rx_ann), vec![ServerMessage::OpponentReconnected]);

    // The stale grace timer fires and must not end the game.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(drain(&mut rx_ann).is_empty());
    assert!(store.results().is_empty());

    send(&state, &mut bob2, mv(2, 2));
    assert!(matches!(
        drain(&mut rx_ann).as_slice(),
        [ServerMessage::StateUpdate(_)]
    ));
}

#[tokio::test]
async fn computer_replies_and_undo_takes_back_both_moves() {
    let (state, _store) = server(config());
    let (mut ann, mut rx_ann) = client(&state, "ann");
    send(
        &state,
        &mut ann,
        ClientMessage::CreateRoom {
            player_name: "Ann".into(),
            difficulty: Some(Difficulty::Medium),
        },
    );
    let opening = drain(&mut rx_ann);
    room_code(&opening);
    assert!(opening.iter().any(|m| matches!(
        m,
        ServerMessage::GameReady {
            color: Player::Black,
            opponent_rating: None,
            ..
        }
    )));

    send(&state, &mut ann, mv(2, 3));
    let reply = recv_until(&mut rx_ann, |m| {
        matches!(m, ServerMessage::StateUpdate(v) if v.current_player == Player::Black)
    })
    .await;
    let ServerMessage::StateUpdate(view) = reply else {
        unreachable!()
    };
    assert_eq!(view.black_count as u32 + view.white_count as u32, 6);
    assert!(view.last_move.is_some());

    send(&state, &mut ann, ClientMessage::Undo);
    match drain(&mut rx_ann).as_slice() {
        [ServerMessage::StateUpdate(view)] => {
            assert_eq!((view.black_count, view.white_count), (2, 2));
            assert_eq!(view.current_player, Player::Black);
            assert_eq!(view.last_move, None);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn draw_then_rematch_with_swapped_colors() {
    let (state, store) = server(config());
    let (code, (mut ann, mut rx_ann), (mut bob, mut rx_bob)) = friend_game(&state);

    send(&state, &mut ann, ClientMessage::DrawOffer);
    assert_eq!(drain(&mut rx_bob), vec![ServerMessage::DrawOffered]);
    send(&state, &mut bob, ClientMessage::DrawResponse { accept: true });
    for rx in [&mut rx_ann, &mut rx_bob] {
        assert!(drain(rx).iter().any(|m| matches!(
            m,
            ServerMessage::GameOver {
                winner: Some(Winner::Draw),
                reason: FinishReason::Agreement,
                outcome: Outcome::Draw,
                ..
            }
        )));
    }
    assert_eq!(store.results().len(), 2);

    send(&state, &mut ann, ClientMessage::Rematch);
    assert_eq!(drain(&mut rx_bob), vec![ServerMessage::RematchRequested]);
    send(&state, &mut bob, ClientMessage::Rematch);
    assert_eq!(ready_color(&drain(&mut rx_ann)), Player::White);
    assert_eq!(ready_color(&drain(&mut rx_bob)), Player::Black);

    assert!(state.registry.get(&code).is_none());
    assert_eq!(state.registry.room_count(), 1);

    // bob opens the new game.
    send(&state, &mut bob, mv(2, 3));
    assert!(matches!(
        drain(&mut rx_ann).as_slice(),
        [ServerMessage::StateUpdate(_)]
    ));
}

#[tokio::test]
async fn leave_queue_and_ping() {
    let (state, _store) = server(config());
    let (mut ann, mut rx_ann) = client(&state, "ann");
    let (mut bob, mut rx_bob) = client(&state, "bob");
    send(
        &state,
        &mut ann,
        ClientMessage::QueueRanked {
            player_name: "Ann".into(),
        },
    );
    send(&state, &mut ann, ClientMessage::LeaveQueue);
    send(
        &state,
        &mut bob,
        ClientMessage::QueueRanked {
            player_name: "Bob".into(),
        },
    );
    assert_eq!(drain(&mut rx_ann), vec![ServerMessage::Queued]);
    assert_eq!(drain(&mut rx_bob), vec![ServerMessage::Queued]);
    assert_eq!(state.registry.queue_len(), 1);

    send(&state, &mut ann, ClientMessage::Ping);
    assert_eq!(drain(&mut rx_ann), vec![ServerMessage::Pong]);
}

#[tokio::test]
async fn one_live_seat_per_player() {
    let (state, store) = server(config());
    let ((mut ann, mut rx_ann), (_bob, mut rx_bob)) = ranked_game(&state);

    // A second connection for ann cannot start anything while that game lives.
    let (mut ann2, mut rx_ann2) = client(&state, "ann");
    send(
        &state,
        &mut ann2,
        ClientMessage::QueueRanked {
            player_name: "Ann".into(),
        },
    );
    send(
        &state,
        &mut ann2,
        ClientMessage::CreateRoom {
            player_name: "Ann".into(),
            difficulty: None,
        },
    );
    let refused = ServerMessage::Error {
        message: "already in a room".into(),
    };
    assert_eq!(drain(&mut rx_ann2), vec![refused.clone(), refused]);
    assert_eq!(state.registry.queue_len(), 0);
    assert_eq!(state.registry.room_count(), 1);

    let (mut cat, mut rx_cat) = client(&state, "cat");
    send(
        &state,
        &mut cat,
        ClientMessage::QueueRanked {
            player_name: "Cat".into(),
        },
    );
    assert_eq!(drain(&mut rx_cat), vec![ServerMessage::Queued]);

    send(&state, &mut ann, ClientMessage::Resign);
    drain(&mut rx_ann);
    drain(&mut rx_bob);
    assert_eq!(store.rating("ann").unwrap().unwrap().elo_rating, 1184);

    // Once it is over the second connection may queue and is paired with cat.
    send(
        &state,
        &mut ann2,
        ClientMessage::QueueRanked {
            player_name: "Ann".into(),
        },
    );
    assert_eq!(ready_color(&drain(&mut rx_ann2)), Player::White);
    assert_eq!(ready_color(&drain(&mut rx_cat)), Player::Black);

    send(&state, &mut ann2, ClientMessage::Resign);
    let record = store.rating("ann").unwrap().unwrap();
    assert_eq!(record.losses, 2);
    // 1184 against 1200: round(32 * -0.477) = -15.
    assert_eq!(record.elo_rating, 1169);
    assert_eq!(
        store
            .results()
            .iter()
            .filter(|r| r.player_id == "ann")
            .count(),
        2
    );
}

#[tokio::test]
async fn rejoin_elsewhere_keeps_live_room() {
    let (state, _store) = server(config());
    let (code, (mut ann, mut rx_ann), (_bob, mut rx_bob)) = friend_game(&state);

    let (mut cat, mut rx_cat) = client(&state, "cat");
    let (mut dan, _rx_dan) = client(&state, "dan");
    send(
        &state,
        &mut cat,
        ClientMessage::CreateRoom {
            player_name: "Cat".into(),
            difficulty: None,
        },
    );
    let other = room_code(&drain(&mut rx_cat));
    send(
        &state,
        &mut dan,
        ClientMessage::JoinRoom {
            room_id: other.clone(),
            player_name: "Dan".into(),
        },
    );

    send(&state, &mut ann, ClientMessage::Rejoin { room_id: other });
    assert_eq!(
        drain(&mut rx_ann),
        vec![ServerMessage::Error {
            message: "already in a room".into()
        }]
    );
    assert_eq!(state.registry.room_of(ann.conn.id), Some(code));

    send(&state, &mut ann, mv(2, 3));
    assert!(matches!(
        drain(&mut rx_bob).as_slice(),
        [ServerMessage::StateUpdate(_)]
    ));

    // Closing the socket still reaches ann's own room.
    drain(&mut rx_ann);
    app::disconnect(&state, &ann);
    assert_eq!(
        drain(&mut rx_bob),
        vec![ServerMessage::OpponentDisconnected { grace_secs: 5 }]
    );
}

#[tokio::test]
async fn out_of_range_move_is_rejected() {
    let (state, _store) = server(config());
    let (_code, (mut ann, mut rx_ann), _bob) = friend_game(&state);

    let msg: ClientMessage =
        serde_json::from_str(r#"{"type":"move","row":-1,"col":300}"#).unwrap();
    send(&state, &mut ann, msg);
    assert_eq!(
        drain(&mut rx_ann),
        vec![ServerMessage::MoveRejected {
            reason: "(-1, 300) is off the board".into()
        }]
    );
}

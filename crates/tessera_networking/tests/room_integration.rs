//! End-to-end room behaviour driven through raw frames.

use serde_json::json;
use tessera_core::EntityId;
use tessera_networking::{Room, RoomError, TimerAction, TimerOwner};
use tessera_shared::protocol::{ChatChannel, ChunkData, EntityDelta, FailureReason, PresenceAction};
use tessera_shared::{
    ChunkId, ChunkState, DeltaType, ErrorCode, ItemSpawn, ServerMessage, SessionId, TesseraConfig, Vec3,
};

const A: SessionId = 1;
const B: SessionId = 2;

fn config() -> TesseraConfig {
    let mut config = TesseraConfig::default();
    config.world.npc_count = 0;
    config.gameplay.items.clear();
    config
}

/// Room with players A and B at the spawn point, creates already flushed.
fn room_with_two_players(config: TesseraConfig) -> (Room, EntityId, EntityId) {
    let mut room = Room::new(config);
    let a = room.connect(A, A).unwrap();
    let b = room.connect(B, B).unwrap();
    room.tick(0);
    room.drain_outbox();
    (room, a, b)
}

fn send(room: &mut Room, session: SessionId, frame: &serde_json::Value, now_ms: u64) {
    room.handle_message(session, &frame.to_string(), now_ms).unwrap();
}

fn subscribe(room: &mut Room, session: SessionId, chunks: &[&str], now_ms: u64) {
    let frame = json!({
        "event": "chunk:subscribe",
        "data": { "chunks": chunks, "position": { "x": 0.0, "y": 0.0, "z": 0.0 } }
    });
    send(room, session, &frame, now_ms);
}

fn move_to(room: &mut Room, session: SessionId, x: f32, z: f32, now_ms: u64) {
    let frame = json!({
        "event": "chunk:position",
        "data": {
            "position": { "x": x, "y": 0.0, "z": z },
            "rotation": { "yaw": 0.0, "pitch": 0.0 },
            "velocity": { "x": 0.0, "y": 0.0, "z": 0.0 },
            "clientTime": now_ms,
        }
    });
    send(room, session, &frame, now_ms);
}

fn interact(room: &mut Room, session: SessionId, chunk: &str, entity: EntityId, now_ms: u64) {
    let frame = json!({
        "event": "chunk:entity-interact",
        "data": { "chunkId": chunk, "entityId": entity.to_bits(), "interactionType": "pickup", "data": {} }
    });
    send(room, session, &frame, now_ms);
}

fn messages_for(outbox: &[(SessionId, ServerMessage)], session: SessionId) -> Vec<&ServerMessage> {
    outbox.iter().filter(|(s, _)| *s == session).map(|(_, m)| m).collect()
}

fn deltas_for(outbox: &[(SessionId, ServerMessage)], session: SessionId) -> Vec<&EntityDelta> {
    messages_for(outbox, session)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::EntityDelta(delta) => Some(delta),
            _ => None,
        })
        .collect()
}

fn errors_for(outbox: &[(SessionId, ServerMessage)], session: SessionId) -> Vec<ErrorCode> {
    messages_for(outbox, session)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::Error(err) => Some(err.code),
            _ => None,
        })
        .collect()
}

fn chunk(id: &str) -> ChunkId {
    id.parse().unwrap()
}

// =============================================================================
// Movement and handoff
// =============================================================================

#[test]
fn test_walk_across_chunk_boundary() {
    let (mut room, a, _) = room_with_two_players(config());
    subscribe(&mut room, A, &["0,0", "1,0"], 0);
    subscribe(&mut room, B, &["0,0", "1,0"], 0);
    let out = room.drain_outbox();
    let data_seq = messages_for(&out, B)
        .into_iter()
        .find_map(|m| match m {
            ServerMessage::ChunkData(ChunkData { chunk_id, sequence, .. }) if *chunk_id == chunk("0,0") => {
                Some(*sequence)
            }
            _ => None,
        })
        .unwrap();

    // (31, 0, 31) stays in chunk (0,0).
    move_to(&mut room, A, 31.0, 31.0, 5_000);
    room.tick(5_000);
    let out = room.drain_outbox();
    let deltas = deltas_for(&out, B);
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].chunk_id, chunk("0,0"));
    assert_eq!(deltas[0].sequence, data_seq + 1);
    assert_eq!(deltas[0].updates.len(), 1);
    assert_eq!(deltas[0].updates[0].delta_type, DeltaType::Update);
    assert_eq!(deltas[0].updates[0].entity.as_ref().unwrap().position, Vec3::new(31.0, 0.0, 31.0));

    // (33, 0, 31) is still chunk (0,0).
    move_to(&mut room, A, 33.0, 31.0, 5_500);
    room.tick(5_500);
    let out = room.drain_outbox();
    assert!(deltas_for(&out, B).iter().all(|d| d.chunk_id == chunk("0,0")));
    assert_eq!(room.registry().find_entity(a), Some(chunk("0,0")));

    // (97, 0, 31) crosses into (1,0).
    move_to(&mut room, A, 97.0, 31.0, 10_500);
    let out = room.drain_outbox();
    let presence: Vec<_> = messages_for(&out, B)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::PlayerPresence(p) => Some((p.chunk_id, p.action, p.player_count)),
            _ => None,
        })
        .collect();
    assert_eq!(
        presence,
        vec![(chunk("0,0"), PresenceAction::Left, 1), (chunk("1,0"), PresenceAction::Entered, 1)]
    );

    room.tick(10_500);
    let out = room.drain_outbox();
    assert_eq!(room.registry().find_entity(a), Some(chunk("1,0")));
    assert_eq!(room.session(A).unwrap().current_chunk, chunk("1,0"));

    for session in [A, B] {
        let handoffs: Vec<_> = deltas_for(&out, session)
            .into_iter()
            .flat_map(|d| d.updates.iter().map(move |u| (d.chunk_id, u)))
            .filter(|(_, u)| u.delta_type == DeltaType::Handoff)
            .collect();
        assert_eq!(handoffs.len(), 1, "session {session} must see exactly one handoff");
        assert_eq!(handoffs[0].0, chunk("1,0"));
        assert_eq!(handoffs[0].1.handoff_to, Some(chunk("1,0")));
        assert_eq!(handoffs[0].1.entity_id, a.to_bits());
    }

    let state_changes: Vec<_> = messages_for(&out, B)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::StateChange(s) => Some((s.chunk_id, s.previous_state, s.new_state)),
            _ => None,
        })
        .collect();
    assert_eq!(state_changes, vec![(chunk("1,0"), ChunkState::Warm, ChunkState::Hot)]);
}

#[test]
fn test_handoff_reaches_origin_only_subscriber() {
    let (mut room, a, _) = room_with_two_players(config());
    subscribe(&mut room, B, &["0,0"], 0);
    room.drain_outbox();

    move_to(&mut room, A, 31.0, 31.0, 5_000);
    move_to(&mut room, A, 70.0, 31.0, 8_000);
    room.tick(8_000);
    let out = room.drain_outbox();

    let deltas = deltas_for(&out, B);
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].chunk_id, chunk("0,0"));
    let update = &deltas[0].updates[0];
    assert_eq!(update.delta_type, DeltaType::Handoff);
    assert_eq!(update.entity_id, a.to_bits());
    assert_eq!(update.handoff_to, Some(chunk("1,0")));
    assert!(deltas_for(&out, A).is_empty(), "A subscribes to nothing");
}

#[test]
fn test_speed_violation_leaves_canonical_state() {
    let (mut room, a, _) = room_with_two_players(config());
    subscribe(&mut room, B, &["0,0"], 0);
    room.drain_outbox();

    move_to(&mut room, A, 100.0, 0.0, 1_000);
    room.tick(1_000);
    let out = room.drain_outbox();
    assert_eq!(room.store().position(a).unwrap().0, Vec3::ZERO);
    assert_eq!(room.session(A).unwrap().rejected_updates(), 1);
    assert!(deltas_for(&out, B).is_empty());
    assert!(errors_for(&out, A).is_empty(), "rejections are silent");

    // Still measured from the last accepted report.
    move_to(&mut room, A, 10.0, 0.0, 2_000);
    room.tick(2_000);
    assert_eq!(room.store().position(a).unwrap().0, Vec3::new(10.0, 0.0, 0.0));
}

#[test]
fn test_vertical_teleport_leaves_canonical_state() {
    let (mut room, a, _) = room_with_two_players(config());
    let frame = json!({
        "event": "chunk:position",
        "data": {
            "position": { "x": 0.0, "y": 500.0, "z": 0.0 },
            "rotation": { "yaw": 0.0, "pitch": 0.0 },
            "velocity": { "x": 0.0, "y": 0.0, "z": 0.0 },
            "clientTime": 1_000,
        }
    });
    send(&mut room, A, &frame, 1_000);
    room.tick(1_000);
    assert_eq!(room.store().position(a).unwrap().0, Vec3::ZERO);
    assert_eq!(room.session(A).unwrap().rejected_updates(), 1);
}

#[test]
fn test_position_updates_are_throttled() {
    let (mut room, a, _) = room_with_two_players(config());
    move_to(&mut room, A, 1.0, 0.0, 1_000);
    move_to(&mut room, A, 1.2, 0.0, 1_020);
    move_to(&mut room, A, 1.4, 0.0, 1_049);

    assert_eq!(room.session(A).unwrap().dropped_updates(), 2);
    assert_eq!(room.store().position(a).unwrap().0, Vec3::new(1.0, 0.0, 0.0));

    move_to(&mut room, A, 1.5, 0.0, 1_050);
    assert_eq!(room.store().position(a).unwrap().0, Vec3::new(1.5, 0.0, 0.0));
}

// =============================================================================
// Subscriptions
// =============================================================================

#[test]
fn test_subscription_cap_and_batch_limit() {
    let (mut room, ..) = room_with_two_players(config());
    let grid: Vec<String> = (-2..=2).flat_map(|x| (-2..=2).map(move |z| format!("{x},{z}"))).collect();
    let grid: Vec<&str> = grid.iter().map(String::as_str).collect();
    subscribe(&mut room, A, &grid, 0);
    assert_eq!(room.registry().subscription_count(A), 25);
    room.drain_outbox();

    subscribe(&mut room, A, &["3,3", "50,50", "0,0"], 0);
    let out = room.drain_outbox();
    let ack = messages_for(&out, A)
        .into_iter()
        .find_map(|m| match m {
            ServerMessage::SubscribeAck(ack) => Some(ack.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(ack.subscribed, vec![chunk("0,0")]);
    let failed: Vec<_> = ack.failed.iter().map(|f| (f.chunk_id, f.reason)).collect();
    assert_eq!(
        failed,
        vec![(chunk("3,3"), FailureReason::LimitExceeded), (chunk("50,50"), FailureReason::OutOfBounds)]
    );
    assert_eq!(room.registry().subscription_count(A), 25);

    let oversized: Vec<String> = (0..26).map(|x| format!("{},0", x % 6)).collect();
    let oversized: Vec<&str> = oversized.iter().map(String::as_str).collect();
    subscribe(&mut room, B, &oversized, 0);
    let out = room.drain_outbox();
    assert_eq!(errors_for(&out, B), vec![ErrorCode::BatchTooLarge]);
    assert_eq!(room.registry().subscription_count(B), 0);
}

#[test]
fn test_unsubscribe_and_lifecycle() {
    let mut config = config();
    config.world.unload_grace_ticks = 3;
    let (mut room, ..) = room_with_two_players(config);
    let far = chunk("2,2");

    subscribe(&mut room, B, &["2,2"], 0);
    let out = room.drain_outbox();
    let data = messages_for(&out, B)
        .into_iter()
        .find_map(|m| match m {
            ServerMessage::ChunkData(data) => Some(data.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(data.chunk_id, far);
    assert!(data.entities.is_empty());
    assert_eq!(data.server_state, ChunkState::Cold);

    room.tick(50);
    let out = room.drain_outbox();
    assert!(messages_for(&out, B).iter().any(|m| matches!(
        m,
        ServerMessage::StateChange(s) if s.chunk_id == far && s.new_state == ChunkState::Warm
    )));

    send(&mut room, B, &json!({ "event": "chunk:unsubscribe", "data": { "chunks": ["2,2", "4,4"] } }), 60);
    let out = room.drain_outbox();
    assert!(messages_for(&out, B)
        .iter()
        .any(|m| matches!(m, ServerMessage::UnsubscribeAck(ack) if ack.unsubscribed == vec![far])));

    for t in 2..8 {
        room.tick(t * 50);
    }
    assert_eq!(room.registry().chunk_state(far), None);
    assert!(!room.registry().is_loaded(far));
    assert!(room.drain_outbox().iter().all(|(_, m)| !matches!(m, ServerMessage::StateChange(_))));
}

#[test]
fn test_resync_resends_subscribed_chunks() {
    let (mut room, a, b) = room_with_two_players(config());
    subscribe(&mut room, A, &["0,0"], 0);
    room.drain_outbox();

    send(&mut room, A, &json!({ "event": "chunk:resync", "data": { "chunks": ["0,0", "3,3"] } }), 10);
    let out = room.drain_outbox();
    let data: Vec<_> = messages_for(&out, A)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::ChunkData(data) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(data.len(), 1);
    let mut ids: Vec<_> = data[0].entities.iter().map(|e| e.entity_id).collect();
    ids.sort_unstable();
    let mut expected = vec![a.to_bits(), b.to_bits()];
    expected.sort_unstable();
    assert_eq!(ids, expected);
    assert_eq!(errors_for(&out, A), vec![ErrorCode::NotSubscribed]);
}

// =============================================================================
// Sessions
// =============================================================================

#[test]
fn test_disconnect_unwinds_everything() {
    let (mut room, a, _) = room_with_two_players(config());
    subscribe(&mut room, A, &["0,0", "1,0"], 0);
    subscribe(&mut room, B, &["0,0"], 0);
    room.drain_outbox();

    room.disconnect(A).unwrap();
    room.tick(50);
    let out = room.drain_outbox();

    let left: Vec<_> = messages_for(&out, B)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::PlayerPresence(p) if p.player_id == A => Some((p.chunk_id, p.action)),
            _ => None,
        })
        .collect();
    assert_eq!(left, vec![(chunk("0,0"), PresenceAction::Left)]);

    let deletes: Vec<_> = deltas_for(&out, B)
        .into_iter()
        .flat_map(|d| d.updates.iter())
        .filter(|u| u.delta_type == DeltaType::Delete)
        .map(|u| u.entity_id)
        .collect();
    assert_eq!(deletes, vec![a.to_bits()]);

    assert!(messages_for(&out, A).is_empty());
    assert!(!room.store().is_alive(a));
    assert_eq!(room.registry().find_entity(a), None);
    assert_eq!(room.registry().subscription_count(A), 0);
    assert!(room.registry().chunks_with_player_present(A).is_empty());
    assert_eq!(room.validator().anchor(A), None);
    assert_eq!(room.disconnect(A), Err(RoomError::UnknownSession(A)));
}

#[test]
fn test_stale_handle_after_slot_reuse() {
    let (mut room, a, _) = room_with_two_players(config());
    subscribe(&mut room, B, &["0,0"], 0);
    room.disconnect(A).unwrap();
    let c = room.connect(3, 3).unwrap();
    room.tick(50);
    room.drain_outbox();

    assert!(!room.store().is_alive(a));
    assert!(room.store().is_alive(c));
    let visible = room.registry().visible_entities(chunk("0,0"), room.store());
    assert!(visible.iter().all(|e| e.entity_id != a.to_bits()));
    assert_eq!(room.registry().tracked_entities(), 2);

    interact(&mut room, B, "0,0", a, 60);
    let out = room.drain_outbox();
    assert_eq!(errors_for(&out, B), vec![ErrorCode::EntityNotFound]);
}

#[test]
fn test_connection_limits() {
    let mut config = config();
    config.server.max_sessions = 2;
    let (mut room, ..) = room_with_two_players(config);
    assert_eq!(room.connect(A, 9), Err(RoomError::DuplicateSession(A)));
    assert_eq!(room.connect(9, A), Err(RoomError::PlayerInRoom(A)));
    assert_eq!(room.connect(3, 3), Err(RoomError::RoomFull(2)));
}

#[test]
fn test_garbage_frames_get_errors() {
    let (mut room, ..) = room_with_two_players(config());
    room.handle_message(A, "definitely not json", 0).unwrap();
    room.handle_message(A, r#"{"event":"chunk:teleport","data":{}}"#, 0).unwrap();
    room.handle_message(A, r#"{"event":"chunk:position","data":{"position":{"x":1e39,"y":0,"z":0}}}"#, 0).unwrap();
    let out = room.drain_outbox();
    assert_eq!(errors_for(&out, A).len(), 3);
    assert!(errors_for(&out, A).iter().all(|code| *code == ErrorCode::InvalidPayload));
    assert_eq!(room.handle_message(99, "{}", 0), Err(RoomError::UnknownSession(99)));
}

// =============================================================================
// Items
// =============================================================================

fn item_config() -> TesseraConfig {
    let mut config = config();
    config.gameplay.items = vec![
        ItemSpawn { item_type: "gem".into(), position: Vec3::new(2.0, 0.0, 0.0) },
        ItemSpawn { item_type: "ammo".into(), position: Vec3::new(0.0, 0.0, 2.0) },
        ItemSpawn { item_type: "key".into(), position: Vec3::new(10.0, 0.0, 0.0) },
    ];
    config
}

#[test]
fn test_pickup_cooldown_and_respawn() {
    let (mut room, ..) = room_with_two_players(item_config());
    subscribe(&mut room, B, &["0,0"], 0);
    room.drain_outbox();
    let gem = room.items()[0].entity.unwrap();
    let ammo = room.items()[1].entity.unwrap();

    let before = room.registry().entity_count(chunk("0,0"));

    interact(&mut room, A, "0,0", gem, 100);
    assert!(!room.store().is_alive(gem));
    assert_eq!(room.registry().find_entity(gem), None);
    assert_eq!(room.registry().entity_count(chunk("0,0")), before - 1);
    assert_eq!(room.items()[0].entity, None);
    assert!(room.timers().is_pending(TimerOwner::ItemSpawn(0), TimerAction::RespawnItem { spawn: 0 }));

    room.tick(100);
    let out = room.drain_outbox();
    let deletes: Vec<_> = deltas_for(&out, B)
        .into_iter()
        .flat_map(|d| d.updates.iter())
        .filter(|u| u.delta_type == DeltaType::Delete)
        .map(|u| u.entity_id)
        .collect();
    assert_eq!(deletes, vec![gem.to_bits()]);

    interact(&mut room, A, "0,0", ammo, 200);
    let out = room.drain_outbox();
    assert_eq!(errors_for(&out, A), vec![ErrorCode::InvalidInteraction]);
    assert!(room.store().is_alive(ammo));

    room.tick(700);
    interact(&mut room, A, "0,0", ammo, 700);
    assert!(!room.store().is_alive(ammo));
    assert_eq!(room.registry().find_entity(ammo), None);
    assert_eq!(room.registry().entity_count(chunk("0,0")), before - 2);

    room.tick(30_100);
    let respawned = room.items()[0].entity.unwrap();
    assert!(room.store().is_alive(respawned));
    assert_ne!(respawned, gem);
    assert_eq!(room.registry().find_entity(respawned), Some(chunk("0,0")));
    let out = room.drain_outbox();
    assert!(deltas_for(&out, B)
        .iter()
        .flat_map(|d| d.updates.iter())
        .any(|u| u.delta_type == DeltaType::Create && u.entity_id == respawned.to_bits()));
}

#[test]
fn test_pickup_rejections() {
    let (mut room, ..) = room_with_two_players(item_config());
    let gem = room.items()[0].entity.unwrap();
    let key = room.items()[2].entity.unwrap();

    interact(&mut room, A, "1,0", gem, 10);
    interact(&mut room, A, "0,0", key, 10);
    let out = room.drain_outbox();
    assert_eq!(errors_for(&out, A), vec![ErrorCode::EntityNotFound, ErrorCode::OutOfRange]);
    assert!(room.store().is_alive(gem));
    assert!(room.store().is_alive(key));
}

#[test]
fn test_disconnect_cancels_pickup_cooldown() {
    let (mut room, ..) = room_with_two_players(item_config());
    let gem = room.items()[0].entity.unwrap();
    interact(&mut room, A, "0,0", gem, 10);
    assert_eq!(room.timers().pending_for(TimerOwner::Player(A)), 1);

    room.disconnect(A).unwrap();
    assert_eq!(room.timers().pending_for(TimerOwner::Player(A)), 0);
    assert_eq!(room.timers().pending_for(TimerOwner::ItemSpawn(0)), 1);
}

// =============================================================================
// Chat
// =============================================================================

#[test]
fn test_chat_channels() {
    let (mut room, ..) = room_with_two_players(config());
    move_to(&mut room, B, 60.0, 0.0, 5_000);
    room.drain_outbox();

    let chat = |channel: &str, text: &str| json!({ "event": "chat:send", "data": { "channel": channel, "text": text } });

    send(&mut room, A, &chat("global", "  hello\tall  "), 5_100);
    let out = room.drain_outbox();
    for session in [A, B] {
        let lines: Vec<_> = messages_for(&out, session)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Chat(c) => Some((c.player_id, c.channel, c.text.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec![(A, ChatChannel::Global, "hello all".to_string())]);
    }

    send(&mut room, A, &chat("proximity", "near"), 5_200);
    let out = room.drain_outbox();
    assert_eq!(messages_for(&out, A).len(), 1);
    assert!(messages_for(&out, B).is_empty(), "B is 60 units away");

    send(&mut room, A, &chat("global", " \u{7} "), 5_300);
    let out = room.drain_outbox();
    assert_eq!(errors_for(&out, A), vec![ErrorCode::ChatRejected]);
    assert!(messages_for(&out, B).is_empty());
}
